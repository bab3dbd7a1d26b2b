//! The execution engine: a CPU worker thread driving the fetch-decode-execute loop, and the
//! controlling thread advancing device time.
//!
//! The worker polls the guest-initiated shutdown flag every iteration and the host-initiated
//! flag every 65536 iterations; the controller keeps ticking devices until the worker exits,
//! then joins it. Startup is synchronized with a condition variable so device ticking does not
//! begin before the worker runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info};
use thiserror::Error;

use crate::bus::Bus;
use crate::core::trap::Trap;
use crate::core::{Hart, IrqHub, Mmu};
use crate::instruction::decode;
use crate::resources::TestStatus;

/// How long the controller sleeps between device-tick rounds.
const TICK_INTERVAL: Duration = Duration::from_micros(100);

/// The two shutdown request lines into the engine.
///
/// Both flags are strictly monotonic: once set they are never cleared. The guest flag is set by
/// the test-finisher device (from either thread); the host flag by a timeout or an external
/// request. Raising either also wakes a hart blocked in `wfi`.
#[derive(Debug)]
pub struct PowerControl {
    hub: Arc<IrqHub>,
    guest: AtomicBool,
    host: AtomicBool,
    details: Mutex<Option<(u16, TestStatus)>>,
}

impl PowerControl {
    pub fn new(hub: Arc<IrqHub>) -> Self {
        Self {
            hub,
            guest: AtomicBool::new(false),
            host: AtomicBool::new(false),
            details: Mutex::new(None),
        }
    }

    /// Guest-initiated shutdown, recording the `(code, status)` pair from the test device.
    pub fn request_guest_shutdown(&self, code: u16, status: TestStatus) {
        let mut details = self.details.lock().unwrap();
        if details.is_none() {
            *details = Some((code, status));
        }
        self.guest.store(true, Ordering::SeqCst);
        self.hub.request_wakeup();
    }

    /// Host-initiated shutdown (timeout or external request).
    pub fn request_host_shutdown(&self) {
        self.host.store(true, Ordering::SeqCst);
        self.hub.request_wakeup();
    }

    fn guest_shutdown(&self) -> bool {
        self.guest.load(Ordering::Relaxed)
    }

    fn host_shutdown(&self) -> bool {
        self.host.load(Ordering::Relaxed)
    }

    fn shutdown_details(&self) -> Option<(u16, TestStatus)> {
        *self.details.lock().unwrap()
    }
}

/// How a completed run ended.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Shutdown {
    /// The guest wrote PASS/FAIL/RESET to the test device.
    Guest { code: u16, status: TestStatus },
    /// The host side stopped the run (timeout or external request).
    Host,
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("CPU worker thread failed: {0}")]
    Worker(String),
    #[error("the engine has no hart to run (a previous run lost it)")]
    HartUnavailable,
}

/// Owns the hart and the bus, and drives them until shutdown.
#[derive(Debug)]
pub struct Engine {
    hart: Option<Hart>,
    bus: Arc<Bus>,
    power: Arc<PowerControl>,
}

impl Engine {
    pub fn new(hart: Hart, bus: Arc<Bus>, power: Arc<PowerControl>) -> Self {
        Self {
            hart: Some(hart),
            bus,
            power,
        }
    }

    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    pub fn power(&self) -> &Arc<PowerControl> {
        &self.power
    }

    /// The hart, available between runs for inspection.
    pub fn hart(&self) -> Option<&Hart> {
        self.hart.as_ref()
    }

    /// Runs the fetch-decode-execute loop until a shutdown request, with an optional wall-clock
    /// timeout that is turned into a host shutdown when exceeded.
    pub fn run_until_halt(&mut self, timeout: Option<Duration>) -> Result<Shutdown, EngineError> {
        let mut hart = self.hart.take().ok_or(EngineError::HartUnavailable)?;
        let mut mmu = Mmu::new(self.bus.clone());

        let power = self.power.clone();
        let bus = self.bus.clone();
        let deadline = timeout.map(|t| Instant::now() + t);
        let running = Mutex::new(false);
        let started = Condvar::new();

        info!("starting CPU worker at pc {:#x}", hart.pc());

        let join_result = thread::scope(|scope| {
            let worker = scope.spawn(|| {
                *running.lock().unwrap() = true;
                started.notify_all();

                cpu_loop(&mut hart, &mut mmu, &power);

                *running.lock().unwrap() = false;
                started.notify_all();
            });

            // Do not start ticking devices until the worker is actually running (or has
            // already wound down).
            let mut guard = running.lock().unwrap();
            while !*guard && !worker.is_finished() {
                guard = started.wait(guard).unwrap();
            }
            drop(guard);

            loop {
                if !*running.lock().unwrap() {
                    break;
                }
                if let Some(deadline) = deadline {
                    if Instant::now() >= deadline && !power.host_shutdown() {
                        debug!("execution timeout exceeded, requesting host shutdown");
                        power.request_host_shutdown();
                    }
                }
                bus.tick_devices();
                thread::sleep(TICK_INTERVAL);
            }

            worker.join()
        });

        match join_result {
            Ok(()) => {
                self.hart = Some(hart);
                Ok(match self.power.shutdown_details() {
                    Some((code, status)) => Shutdown::Guest { code, status },
                    None => Shutdown::Host,
                })
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<String>()
                    .cloned()
                    .or_else(|| panic.downcast_ref::<&str>().map(|s| s.to_string()))
                    .unwrap_or_else(|| "unknown panic".to_owned());
                Err(EngineError::Worker(message))
            }
        }
    }
}

fn cpu_loop(hart: &mut Hart, mmu: &mut Mmu, power: &PowerControl) {
    // The host flag is only polled when this counter wraps, every 65536 iterations.
    let mut iteration: u16 = 0;
    loop {
        if power.guest_shutdown() {
            break;
        }
        if iteration == 0 && power.host_shutdown() {
            break;
        }
        iteration = iteration.wrapping_add(1);

        step(hart, mmu);
    }
    debug!("CPU worker exiting at pc {:#x}", hart.pc());
}

/// Executes a single instruction, including interrupt recognition and trap handling.
///
/// The order is fixed: the cycle counter advances, a pending enabled interrupt is taken before
/// fetch (so the interrupted PC is the next instruction to retire), then fetch, decode, PC
/// advance, execute, and the instructions-retired counter.
pub fn step(hart: &mut Hart, mmu: &mut Mmu) {
    hart.counters_mut().advance_cycle();

    let result = (|| -> Result<(), Trap> {
        hart.check_interrupts()?;

        let (word, len) = mmu.ifetch(hart)?;
        let decoded = decode(word, len, hart.pc());

        hart.set_pc(hart.pc().wrapping_add(len.size()));
        (decoded.exec)(hart, mmu, &decoded)?;

        hart.counters_mut().advance_instret();
        Ok(())
    })();

    if let Err(trap) = result {
        hart.handle_trap(trap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{csr, Config};
    use crate::dram::{Dram, DRAM_BASE};
    use crate::resources::{Clint, SiFiveTest};
    use crate::PrivilegeLevel;

    fn machine(program: &[u32]) -> (Engine, Arc<IrqHub>) {
        let hub = Arc::new(IrqHub::new());
        let power = Arc::new(PowerControl::new(hub.clone()));

        let mut bus = Bus::new(Dram::new(DRAM_BASE, 0x10000).unwrap());
        let test_device = {
            let power = power.clone();
            SiFiveTest::new(Box::new(move |code, status| {
                power.request_guest_shutdown(code, status)
            }))
        };
        bus.add_device(Arc::new(test_device)).unwrap();
        bus.add_device(Arc::new(Clint::new(
            hub.clone(),
            crate::resources::clint::DEFAULT_FREQ_HZ,
        )))
        .unwrap();

        for (i, word) in program.iter().enumerate() {
            bus.dram().write_u32(DRAM_BASE + 4 * i as u64, *word);
        }

        let hart = Hart::new(hub.clone(), Config::default());
        (Engine::new(hart, Arc::new(bus), power), hub)
    }

    #[test]
    fn test_guest_shutdown_via_test_device() {
        // lui t0, 0x100      (test device base)
        // lui t1, 0x2a       -> 0x2A000 = (42 << 16) >> 4... build 42 << 16 | 0x5555 instead:
        // li via lui+addi: lui t1, 0x2a5      ; t1 = 0x2A5000
        // addi t1, t1, 0x555                  ; t1 = 0x2A5555 = (42 << 16) | 0x5555
        // sw t1, 0(t0)
        let program = [
            0x0010_02B7u32, // lui t0, 0x100
            0x002A_5337,    // lui t1, 0x2A5
            0x5553_0313,    // addi t1, t1, 0x555
            0x0062_A023,    // sw t1, 0(t0)
        ];
        let (mut engine, _) = machine(&program);
        let outcome = engine
            .run_until_halt(Some(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(
            Shutdown::Guest {
                code: 42,
                status: TestStatus::Pass
            },
            outcome
        );
        // The store itself must have retired.
        let hart = engine.hart().unwrap();
        assert!(hart.counters().minstret() >= 4);
    }

    #[test]
    fn test_fail_status_is_reported() {
        // Store 0x3333 (FAIL, code 7) to the test device via the same sequence.
        let program = [
            0x0010_02B7u32, // lui t0, 0x100
            0x0007_3337,    // lui t1, 0x73
            0x3333_0313,    // addi t1, t1, 0x333
            0x0062_A023,    // sw t1, 0(t0)
        ];
        let (mut engine, _) = machine(&program);
        let outcome = engine
            .run_until_halt(Some(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(
            Shutdown::Guest {
                code: 7,
                status: TestStatus::Fail
            },
            outcome
        );
    }

    #[test]
    fn test_host_timeout_stops_spinning_guest() {
        // An infinite loop: j .
        let program = [0x0000_006Fu32];
        let (mut engine, _) = machine(&program);
        let outcome = engine
            .run_until_halt(Some(Duration::from_millis(50)))
            .unwrap();
        assert_eq!(Shutdown::Host, outcome);
    }

    #[test]
    fn test_wfi_resumes_via_timer_interrupt() {
        // Program the CLINT so that mtime crosses mtimecmp shortly, then wfi. The trap handler
        // at mtvec writes PASS to the test device.
        //
        //   0x8000_0000: auipc t0, 0x1          ; handler base 0x8000_1000 (mtvec)
        //   0x8000_0004: csrrw x0, mtvec, t0
        //   0x8000_0008: lui t0, 0x2004         ; mtimecmp address
        //   0x8000_000c: lui t2, 0x400          ; a compare value a few hundred ms out
        //   0x8000_0010: sd t2, 0(t0)
        //   0x8000_0014: addi t1, x0, 128       ; mie.MTIE
        //   0x8000_0018: csrrw x0, mie, t1
        //   0x8000_001c: csrrsi x0, mstatus, 8  ; mstatus.MIE
        //   0x8000_0020: wfi
        //   0x8000_0024: j .
        //
        //   handler (0x8000_1000):
        //     lui t0, 0x100
        //     lui t1, 0x5
        //     addi t1, t1, 0x555               ; 0x5555
        //     sw t1, 0(t0)
        let program = [
            0x0000_1297u32, // auipc t0, 0x1
            0x3052_9073,    // csrrw x0, mtvec, t0
            0x0200_42B7,    // lui t0, 0x2004
            0x0040_03B7,    // lui t2, 0x400
            0x0072_B023,    // sd t2, 0(t0)
            0x0800_0313,    // addi t1, x0, 128
            0x3043_1073,    // csrrw x0, mie, t1
            0x3004_6073,    // csrrsi x0, mstatus, 8
            0x1050_0073,    // wfi
            0x0000_006F,    // j .
        ];
        let (mut engine, _) = machine(&program);
        {
            let bus = engine.bus().clone();
            let handler = [
                0x0010_02B7u32, // lui t0, 0x100
                0x0000_5337,    // lui t1, 0x5
                0x5553_0313,    // addi t1, t1, 0x555
                0x0062_A023,    // sw t1, 0(t0)
            ];
            for (i, word) in handler.iter().enumerate() {
                bus.dram().write_u32(0x8000_1000 + 4 * i as u64, *word);
            }
        }

        let outcome = engine
            .run_until_halt(Some(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(
            Shutdown::Guest {
                code: 0,
                status: TestStatus::Pass
            },
            outcome
        );

        // The interrupt was taken at the instruction after the wfi.
        let hart = engine.hart().unwrap();
        assert_eq!(
            DRAM_BASE + 0x24,
            hart.read_csr(csr::MEPC, PrivilegeLevel::Machine).unwrap()
        );
        assert_eq!(
            7 | crate::core::trap::INTERRUPT_BIT,
            hart.read_csr(csr::MCAUSE, PrivilegeLevel::Machine)
                .unwrap()
        );
    }

    #[test]
    fn test_reset_vector() {
        let program = [0x0000_006Fu32];
        let (engine, _) = machine(&program);
        assert_eq!(DRAM_BASE, engine.hart().unwrap().pc());
    }
}
