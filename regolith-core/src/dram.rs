//! Byte-addressed main memory mapped at a fixed physical base address.

use crate::AddressRange;
use std::sync::Mutex;
use thiserror::Error;

/// Default physical base address for DRAM, matching the platform memory map.
pub const DRAM_BASE: u64 = 0x8000_0000;

/// Flat little-endian main memory.
///
/// This can be categorized as *main memory* according to the types of memory resources defined by
/// the RISC-V spec: plain loads and stores with no side effects.
///
/// The byte buffer is behind a mutex only so that the owning [`Bus`](crate::bus::Bus) can be
/// shared between the CPU worker and the device-tick thread; at runtime the bytes are touched by
/// the worker alone.
#[derive(Debug)]
pub struct Dram {
    mem: Mutex<Box<[u8]>>,
    base: u64,
    size: u64,
}

impl Dram {
    /// Create a new zero-initialized memory of `size` bytes mapped at `base`.
    pub fn new(base: u64, size: u64) -> Result<Self, DramError> {
        const_assert!(usize::BITS >= 64);
        AddressRange::from_base_and_size(base, size).map_err(|_| DramError::InvalidSize(size))?;
        Ok(Self {
            mem: Mutex::new(vec![0u8; size as usize].into_boxed_slice()),
            base,
            size,
        })
    }

    /// Returns the size expressed in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the physical address range this memory occupies.
    pub fn range(&self) -> AddressRange {
        AddressRange::from_base_and_size(self.base, self.size).unwrap()
    }

    /// Returns `true` iff the access `[addr, addr + len)` lies entirely within memory.
    pub fn valid(&self, addr: u64, len: usize) -> bool {
        self.range().contains_access(addr, len)
    }

    /// Reads a range of bytes into `dst`, failing without any effect if the range is not entirely
    /// backed by memory.
    pub fn read_bytes(&self, addr: u64, dst: &mut [u8]) -> Result<(), DramError> {
        if !self.valid(addr, dst.len()) {
            return Err(DramError::OutOfRange {
                addr,
                len: dst.len(),
            });
        }
        let mem = self.mem.lock().unwrap();
        let offset = (addr - self.base) as usize;
        dst.copy_from_slice(&mem[offset..offset + dst.len()]);
        Ok(())
    }

    /// Writes a range of bytes from `src`, failing without mutating memory if the range is not
    /// entirely backed by memory.
    pub fn write_bytes(&self, addr: u64, src: &[u8]) -> Result<(), DramError> {
        if !self.valid(addr, src.len()) {
            return Err(DramError::OutOfRange {
                addr,
                len: src.len(),
            });
        }
        let mut mem = self.mem.lock().unwrap();
        let offset = (addr - self.base) as usize;
        mem[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }
}

macro_rules! typed_access_fns {
    ( $( $read_fn:ident, $write_fn:ident => $u:ident ),* $(,)? ) => {
        impl Dram {
            $(
                /// Reads a little-endian value. The caller must ensure the access is valid
                /// (the bus checks this before routing here).
                pub fn $read_fn(&self, addr: u64) -> $u {
                    debug_assert!(self.valid(addr, std::mem::size_of::<$u>()));
                    let mem = self.mem.lock().unwrap();
                    let offset = (addr - self.base) as usize;
                    let bytes = &mem[offset..offset + std::mem::size_of::<$u>()];
                    $u::from_le_bytes(bytes.try_into().unwrap())
                }

                /// Writes a little-endian value. The caller must ensure the access is valid.
                pub fn $write_fn(&self, addr: u64, value: $u) {
                    debug_assert!(self.valid(addr, std::mem::size_of::<$u>()));
                    let mut mem = self.mem.lock().unwrap();
                    let offset = (addr - self.base) as usize;
                    mem[offset..offset + std::mem::size_of::<$u>()]
                        .copy_from_slice(&value.to_le_bytes());
                }
            )*
        }
    };
}

typed_access_fns! {
    read_u8, write_u8 => u8,
    read_u16, write_u16 => u16,
    read_u32, write_u32 => u32,
    read_u64, write_u64 => u64,
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum DramError {
    #[error("memory access [{addr:#x}, +{len}) is out of range")]
    OutOfRange { addr: u64, len: usize },
    #[error("invalid memory size {0:#x}")]
    InvalidSize(u64),
}
