//! The physical memory bus: one 64-bit address space routing to DRAM or MMIO devices.

use crate::device::Device;
use crate::dram::Dram;
use crate::AddressRange;
use log::warn;
use rangemap::RangeInclusiveMap;
use std::sync::Arc;
use thiserror::Error;

/// Crossbar over the single physical address space.
///
/// Owns the DRAM and an ordered list of devices. Every access is routed to at most one owner:
/// DRAM if the full access range lies inside it, otherwise the unique device whose range contains
/// the full access. Registration rejects any device whose range overlaps DRAM or an
/// already-registered device, so the one-owner property holds by construction.
#[derive(Debug)]
pub struct Bus {
    dram: Dram,
    devices: Vec<Arc<dyn Device>>,
    /// Routing table from physical address to index in `devices`.
    regions: RangeInclusiveMap<u64, usize>,
}

impl Bus {
    pub fn new(dram: Dram) -> Self {
        Self {
            dram,
            devices: Vec::new(),
            regions: RangeInclusiveMap::new(),
        }
    }

    pub fn dram(&self) -> &Dram {
        &self.dram
    }

    /// Registers a memory-mapped device.
    ///
    /// Fails if the device's range overlaps DRAM or any previously registered device.
    pub fn add_device(&mut self, device: Arc<dyn Device>) -> Result<(), BusError> {
        let range = device.range();
        if range.overlaps(self.dram.range()) {
            return Err(BusError::Overlap {
                name: device.name().to_owned(),
                range,
                other: "DRAM".to_owned(),
                other_range: self.dram.range(),
            });
        }
        if self.regions.overlaps(&range.into()) {
            let (other_range, &index) = self
                .regions
                .overlapping(&range.into())
                .next()
                .expect("overlaps() implies an overlapping entry");
            return Err(BusError::Overlap {
                name: device.name().to_owned(),
                range,
                other: self.devices[index].name().to_owned(),
                other_range: AddressRange::new(*other_range.start(), *other_range.end()).unwrap(),
            });
        }
        self.regions.insert(range.into(), self.devices.len());
        self.devices.push(device);
        Ok(())
    }

    /// Returns `true` if some owner (DRAM or a device) claims the byte at `addr`.
    ///
    /// Used by the MMU when splitting a misaligned access into byte-wide accesses.
    pub fn accessible(&self, addr: u64) -> bool {
        self.dram.range().contains(addr) || self.regions.contains_key(&addr)
    }

    /// Invokes `tick()` on every registered device, in registration order.
    pub fn tick_devices(&self) {
        for device in &self.devices {
            device.tick();
        }
    }

    fn route(&self, addr: u64, size: usize) -> Option<&Arc<dyn Device>> {
        let (_, &index) = self.regions.get_key_value(&addr)?;
        let device = &self.devices[index];
        device.range().contains_access(addr, size).then_some(device)
    }
}

macro_rules! route_access_fns {
    ( $( $read_fn:ident, $write_fn:ident => $u:ident ),* $(,)? ) => {
        impl Bus {
            $(
                /// Routes a typed read to DRAM or a device. `None` when no owner claims the
                /// entire access.
                pub fn $read_fn(&self, addr: u64) -> Option<$u> {
                    const SIZE: usize = std::mem::size_of::<$u>();
                    if self.dram.valid(addr, SIZE) {
                        return Some(self.dram.$read_fn(addr));
                    }
                    let device = self.route(addr, SIZE)?;
                    device
                        .read(addr - device.range().start(), SIZE)
                        .map(|v| v as $u)
                }

                /// Routes a typed write to DRAM or a device. `false` when no owner claims the
                /// entire access or the device rejects it.
                pub fn $write_fn(&self, addr: u64, value: $u) -> bool {
                    const SIZE: usize = std::mem::size_of::<$u>();
                    if self.dram.valid(addr, SIZE) {
                        self.dram.$write_fn(addr, value);
                        return true;
                    }
                    match self.route(addr, SIZE) {
                        Some(device) => {
                            device.write(addr - device.range().start(), SIZE, value as u64)
                        }
                        None => {
                            warn!("unclaimed bus write of {SIZE} bytes at {addr:#x}");
                            false
                        }
                    }
                }
            )*
        }
    };
}

route_access_fns! {
    read_u8, write_u8 => u8,
    read_u16, write_u16 => u16,
    read_u32, write_u32 => u32,
    read_u64, write_u64 => u64,
}

#[derive(Error, Debug)]
pub enum BusError {
    #[error("device '{name}' {range} overlaps with '{other}' {other_range}")]
    Overlap {
        name: String,
        range: AddressRange,
        other: String,
        other_range: AddressRange,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dram::DRAM_BASE;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct ScratchDevice {
        range: AddressRange,
        reg: Mutex<u64>,
    }

    impl ScratchDevice {
        fn new(start: u64, size: u64) -> Self {
            Self {
                range: AddressRange::from_base_and_size(start, size).unwrap(),
                reg: Mutex::new(0),
            }
        }
    }

    impl Device for ScratchDevice {
        fn name(&self) -> &str {
            "scratch"
        }

        fn range(&self) -> AddressRange {
            self.range
        }

        fn read(&self, offset: u64, size: usize) -> Option<u64> {
            (offset == 0 && size == 4).then(|| *self.reg.lock().unwrap())
        }

        fn write(&self, offset: u64, size: usize, value: u64) -> bool {
            if offset == 0 && size == 4 {
                *self.reg.lock().unwrap() = value;
                true
            } else {
                false
            }
        }
    }

    fn bus_with_scratch() -> Bus {
        let mut bus = Bus::new(Dram::new(DRAM_BASE, 0x1000).unwrap());
        bus.add_device(Arc::new(ScratchDevice::new(0x1000_0000, 0x100)))
            .unwrap();
        bus
    }

    #[test]
    fn test_routing() {
        let bus = bus_with_scratch();

        assert!(bus.write_u32(DRAM_BASE, 0x1234_5678));
        assert_eq!(Some(0x1234_5678), bus.read_u32(DRAM_BASE));

        assert!(bus.write_u32(0x1000_0000, 42));
        assert_eq!(Some(42), bus.read_u32(0x1000_0000));

        // Unclaimed hole between the device and DRAM.
        assert_eq!(None, bus.read_u32(0x2000_0000));
        assert!(!bus.write_u32(0x2000_0000, 1));
    }

    #[test]
    fn test_overlapping_registration_fails() {
        let mut bus = bus_with_scratch();
        // Overlaps the existing device.
        assert!(bus
            .add_device(Arc::new(ScratchDevice::new(0x1000_00F0, 0x100)))
            .is_err());
        // Overlaps DRAM.
        assert!(bus
            .add_device(Arc::new(ScratchDevice::new(DRAM_BASE + 0x800, 0x1000)))
            .is_err());
        // Disjoint registration still works.
        assert!(bus
            .add_device(Arc::new(ScratchDevice::new(0x3000_0000, 0x100)))
            .is_ok());
    }

    #[test]
    fn test_accessible() {
        let bus = bus_with_scratch();
        assert!(bus.accessible(DRAM_BASE));
        assert!(bus.accessible(DRAM_BASE + 0xFFF));
        assert!(!bus.accessible(DRAM_BASE + 0x1000));
        assert!(bus.accessible(0x1000_0000));
        assert!(bus.accessible(0x1000_00FF));
        assert!(!bus.accessible(0x1000_0100));
    }
}
