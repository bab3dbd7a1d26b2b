//! Core-local interruptor: the machine timer and software-interrupt device.
//!
//! `mtime` is derived from the host monotonic clock scaled by the device frequency, so guest
//! time advances with wall-clock time regardless of emulation speed. A guest write to `mtime`
//! adjusts the internal epoch so that future samples stay consistent.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::core::interrupts::{MSIP, MTIP, STIP};
use crate::core::IrqHub;
use crate::device::{read_le, write_le, Device};
use crate::AddressRange;

pub const DEFAULT_BASE: u64 = 0x200_0000;
pub const SIZE: u64 = 0x10000;
/// 10 MHz timebase.
pub const DEFAULT_FREQ_HZ: u64 = 10_000_000;

const MSIP_OFFSET: u64 = 0x0;
const MTIMECMP_OFFSET: u64 = 0x4000;
const MTIME_OFFSET: u64 = 0xBFF8;

#[derive(Debug)]
struct State {
    mtime: u64,
    mtimecmp: u64,
    epoch: Instant,
}

impl State {
    /// Recomputes mtime from the host clock.
    fn sample(&mut self, freq_hz: u64) {
        self.mtime = (self.epoch.elapsed().as_secs_f64() * freq_hz as f64) as u64;
    }

    /// Moves the epoch so that the current mtime reads as `self.mtime`.
    fn rebase(&mut self, freq_hz: u64) {
        let elapsed = std::time::Duration::from_secs_f64(self.mtime as f64 / freq_hz as f64);
        self.epoch = Instant::now() - elapsed;
    }
}

#[derive(Debug)]
pub struct Clint {
    range: AddressRange,
    hub: Arc<IrqHub>,
    freq_hz: u64,
    state: Mutex<State>,
}

impl Clint {
    pub fn new(hub: Arc<IrqHub>, freq_hz: u64) -> Self {
        Self {
            range: AddressRange::from_base_and_size(DEFAULT_BASE, SIZE).unwrap(),
            hub,
            freq_hz,
            state: Mutex::new(State {
                mtime: 0,
                mtimecmp: u64::MAX,
                epoch: Instant::now(),
            }),
        }
    }

    /// Propagates the current timer state: the `time` CSR mirror, MTIP, and (with STCE) STIP.
    fn sync(&self, state: &State) {
        self.hub.set_time(state.mtime);
        self.hub
            .set_interrupt_pending(MTIP, state.mtime >= state.mtimecmp);
        if self.hub.stce() {
            self.hub
                .set_interrupt_pending(STIP, state.mtime >= self.hub.stimecmp());
        }
    }
}

impl Device for Clint {
    fn name(&self) -> &str {
        "CLINT"
    }

    fn range(&self) -> AddressRange {
        self.range
    }

    fn read(&self, offset: u64, size: usize) -> Option<u64> {
        if size > 8 {
            return None;
        }
        match offset {
            o if (MSIP_OFFSET..MSIP_OFFSET + 4).contains(&o) => {
                let msip = u64::from(self.hub.mip() & MSIP != 0);
                Some(read_le(msip, o - MSIP_OFFSET, size))
            }
            o if (MTIMECMP_OFFSET..MTIMECMP_OFFSET + 8).contains(&o) => {
                let state = self.state.lock().unwrap();
                Some(read_le(state.mtimecmp, o - MTIMECMP_OFFSET, size))
            }
            o if (MTIME_OFFSET..MTIME_OFFSET + 8).contains(&o) => {
                let state = self.state.lock().unwrap();
                Some(read_le(state.mtime, o - MTIME_OFFSET, size))
            }
            _ => None,
        }
    }

    fn write(&self, offset: u64, size: usize, value: u64) -> bool {
        if size > 8 {
            return false;
        }
        match offset {
            o if (MSIP_OFFSET..MSIP_OFFSET + 4).contains(&o) => {
                let mut msip = 0u64;
                write_le(&mut msip, o - MSIP_OFFSET, size, value);
                self.hub.set_interrupt_pending(MSIP, msip & 1 != 0);
                true
            }
            o if (MTIMECMP_OFFSET..MTIMECMP_OFFSET + 8).contains(&o) => {
                let mut state = self.state.lock().unwrap();
                let mut reg = state.mtimecmp;
                write_le(&mut reg, o - MTIMECMP_OFFSET, size, value);
                state.mtimecmp = reg;
                state.sample(self.freq_hz);
                self.sync(&state);
                true
            }
            o if (MTIME_OFFSET..MTIME_OFFSET + 8).contains(&o) => {
                let mut state = self.state.lock().unwrap();
                let mut reg = state.mtime;
                write_le(&mut reg, o - MTIME_OFFSET, size, value);
                state.mtime = reg;
                state.rebase(self.freq_hz);
                self.sync(&state);
                true
            }
            _ => false,
        }
    }

    fn tick(&self) {
        let mut state = self.state.lock().unwrap();
        state.sample(self.freq_hz);
        self.sync(&state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clint() -> (Arc<IrqHub>, Clint) {
        let hub = Arc::new(IrqHub::new());
        let clint = Clint::new(hub.clone(), DEFAULT_FREQ_HZ);
        (hub, clint)
    }

    #[test]
    fn test_mtip_follows_mtimecmp() {
        let (hub, clint) = clint();
        clint.tick();
        // The reset mtimecmp is u64::MAX, so no timer interrupt is pending.
        assert_eq!(0, hub.mip() & MTIP);

        // mtimecmp = 0 is immediately in the past.
        assert!(clint.write(MTIMECMP_OFFSET, 8, 0));
        assert_ne!(0, hub.mip() & MTIP);

        // A larger compare value clears MTIP again.
        assert!(clint.write(MTIMECMP_OFFSET, 8, u64::MAX));
        assert_eq!(0, hub.mip() & MTIP);
    }

    #[test]
    fn test_mtime_write_rebases() {
        let (hub, clint) = clint();
        assert!(clint.write(MTIME_OFFSET, 8, 1 << 40));
        clint.tick();
        let now = clint.read(MTIME_OFFSET, 8).unwrap();
        // mtime keeps counting from the written value.
        assert!(now >= 1 << 40);
        assert_eq!(now, hub.time());
    }

    #[test]
    fn test_msip_write_sets_pending() {
        let (hub, clint) = clint();
        assert!(clint.write(MSIP_OFFSET, 4, 1));
        assert_ne!(0, hub.mip() & MSIP);
        assert_eq!(1, clint.read(MSIP_OFFSET, 4).unwrap());
        assert!(clint.write(MSIP_OFFSET, 4, 0));
        assert_eq!(0, hub.mip() & MSIP);
    }

    #[test]
    fn test_stip_requires_stce() {
        let (hub, clint) = clint();
        hub.set_stimecmp(0);
        clint.tick();
        assert_eq!(0, hub.mip() & STIP);

        hub.set_stce(true);
        clint.tick();
        assert_ne!(0, hub.mip() & STIP);
    }

    #[test]
    fn test_partial_register_reads() {
        let (_, clint) = clint();
        assert!(clint.write(MTIMECMP_OFFSET, 8, 0x1122_3344_5566_7788));
        assert_eq!(0x5566_7788, clint.read(MTIMECMP_OFFSET, 4).unwrap());
        assert_eq!(0x1122_3344, clint.read(MTIMECMP_OFFSET + 4, 4).unwrap());
        assert_eq!(0x88, clint.read(MTIMECMP_OFFSET, 1).unwrap());
    }

    #[test]
    fn test_time_csr_mirror() {
        let (hub, clint) = clint();
        clint.tick();
        let t = hub.time();
        let direct = clint.read(MTIME_OFFSET, 8).unwrap();
        assert!(direct >= t);
    }
}
