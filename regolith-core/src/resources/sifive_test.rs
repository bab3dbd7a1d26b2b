//! The SiFive test finisher: the guest's way to shut the machine down.
//!
//! A 32-bit store to offset 0 encodes `status = value[15:0]`, `code = value[31:16]`. A PASS,
//! FAIL, or RESET status invokes the shutdown callback with `(code, status)`; anything else is
//! ignored.

use std::fmt;

use log::debug;

use crate::device::Device;
use crate::AddressRange;

pub const DEFAULT_BASE: u64 = 0x10_0000;
pub const SIZE: u64 = 0x1000;

/// Status values a guest can write to the finisher register.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u16)]
pub enum TestStatus {
    Fail = 0x3333,
    Pass = 0x5555,
    Reset = 0x7777,
}

impl TestStatus {
    fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x3333 => Some(Self::Fail),
            0x5555 => Some(Self::Pass),
            0x7777 => Some(Self::Reset),
            _ => None,
        }
    }
}

type ShutdownCallback = Box<dyn Fn(u16, TestStatus) + Send + Sync>;

pub struct SiFiveTest {
    range: AddressRange,
    on_shutdown: ShutdownCallback,
}

impl fmt::Debug for SiFiveTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiFiveTest")
            .field("range", &self.range)
            .finish_non_exhaustive()
    }
}

impl SiFiveTest {
    pub fn new(on_shutdown: ShutdownCallback) -> Self {
        Self {
            range: AddressRange::from_base_and_size(DEFAULT_BASE, SIZE).unwrap(),
            on_shutdown,
        }
    }
}

impl Device for SiFiveTest {
    fn name(&self) -> &str {
        "SiFiveTest"
    }

    fn range(&self) -> AddressRange {
        self.range
    }

    fn read(&self, _offset: u64, _size: usize) -> Option<u64> {
        Some(0)
    }

    fn write(&self, offset: u64, _size: usize, value: u64) -> bool {
        if offset == 0 {
            let status = value as u16;
            let code = (value >> 16) as u16;
            if let Some(status) = TestStatus::from_u16(status) {
                debug!("test finisher write: {status:?} code {code}");
                (self.on_shutdown)(code, status);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_pass_invokes_callback_with_code() {
        let seen = Arc::new(AtomicU32::new(0));
        let device = {
            let seen = seen.clone();
            SiFiveTest::new(Box::new(move |code, status| {
                assert_eq!(TestStatus::Pass, status);
                seen.store(code as u32 | 0x8000_0000, Ordering::SeqCst);
            }))
        };

        assert!(device.write(0, 4, 0x5555 | (42 << 16)));
        assert_eq!(42 | 0x8000_0000, seen.load(Ordering::SeqCst));
    }

    #[test]
    fn test_other_statuses_ignored() {
        let device = SiFiveTest::new(Box::new(|_, _| panic!("must not shut down")));
        assert!(device.write(0, 4, 0x1234));
        assert!(device.write(4, 4, 0x5555));
        assert_eq!(Some(0), device.read(0, 4));
    }
}
