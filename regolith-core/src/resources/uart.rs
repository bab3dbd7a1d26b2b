//! An NS16550-compatible UART as a memory-mapped device.
//!
//! Resources:
//! - <https://uart16550.readthedocs.io>
//! - <https://github.com/qemu/qemu/blob/master/hw/char/serial.c>
//!
//! The transmit path drains to a host writer (stdout by default) on every controller tick. The
//! receive FIFO is fed by the host through [`Uart::queue_rx`]; there is no blocking host-stdin
//! reader. Data-ready and transmitter-empty conditions drive interrupt source 10 on the PLIC.

use std::fmt;
use std::io::{self, Write};
use std::sync::Mutex;

use bitvec::order::Lsb0;
use bitvec::view::BitView;
use log::warn;

use crate::device::Device;
use crate::resources::plic::IrqLine;
use crate::AddressRange;

pub const DEFAULT_BASE: u64 = 0x1000_0000;
pub const SIZE: u64 = 0x100;
/// The platform wires the UART to PLIC source 10.
pub const IRQ_ID: u32 = 10;

/// State of a [`Uart`].
#[derive(Debug, Clone)]
struct State {
    /// Interrupt Enable Register
    ier: u8,
    /// Line Control Register
    lcr: u8,
    /// Line Status Register
    lsr: u8,
    /// Modem Status Register
    msr: u8,
    /// Scratch Register
    scr: u8,
    /// Divisor Latch Register
    dlr: u16,

    /// Receiver FIFO Interrupt Trigger Level (set by the FIFO Control Register).
    ///
    /// Expressed in bytes. The possible values are 1, 4, 8, or 14 bytes.
    rx_fifo_itl: u8,

    /// Receiver FIFO
    rx_fifo_buf: [u8; 16],
    rx_fifo_len: u8,

    /// Transmitter FIFO
    tx_fifo_buf: [u8; 16],
    tx_fifo_len: u8,
}

impl State {
    /// Returns the reset state.
    fn new() -> Self {
        Self {
            ier: 0x00,
            lcr: 0x03,
            lsr: 0x60,
            msr: 0x00,
            scr: 0x00,
            dlr: 0x0000,
            // RX FIFO Interrupt Trigger Level is 14 bytes on reset
            rx_fifo_itl: 14,
            rx_fifo_buf: [0; 16],
            rx_fifo_len: 0,
            tx_fifo_buf: [0; 16],
            tx_fifo_len: 0,
        }
    }

    /// Returns `true` if the Divisor Latch Access Bit is `1`.
    fn dlab(&self) -> bool {
        (self.lcr >> 7) == 1
    }

    /// Set the Data Ready indicator of the Line Status Register.
    fn set_lsr_dr(&mut self, value: bool) {
        self.lsr.view_bits_mut::<Lsb0>().set(0, value);
    }

    /// Returns `true` if the Overrun Error indicator of the Line Status Register is `1`.
    fn lsr_oe(&self) -> bool {
        self.lsr.view_bits::<Lsb0>()[1]
    }

    /// Set the Overrun Error indicator of the Line Status Register.
    fn set_lsr_oe(&mut self, value: bool) {
        self.lsr.view_bits_mut::<Lsb0>().set(1, value);
    }

    /// Returns `true` if the Transmitter Holding Register Empty indicator is `1`.
    fn lsr_thre(&self) -> bool {
        self.lsr.view_bits::<Lsb0>()[5]
    }

    /// Set the Transmitter Holding Register Empty indicator of the Line Status Register.
    fn set_lsr_thre(&mut self, value: bool) {
        self.lsr.view_bits_mut::<Lsb0>().set(5, value);
    }

    /// Set the Transmitter FIFO Empty indicator of the Line Status Register.
    fn set_lsr_tfe(&mut self, value: bool) {
        self.lsr.view_bits_mut::<Lsb0>().set(6, value);
    }

    /// Returns the bitmask to be applied to each character.
    fn char_mask(&self) -> u8 {
        (((1 << ((self.lcr & 0b11) + 1)) - 1) << 4) | 0xF
    }

    /// The Interrupt Identification Register value, computed from the pending conditions in
    /// priority order: received data available above the trigger level, then THR empty.
    fn iir(&self) -> u8 {
        const FIFOS_ENABLED: u8 = 0xC0;
        if self.ier & 0x01 != 0 && self.rx_fifo_len >= self.rx_fifo_itl {
            FIFOS_ENABLED | 0b0100
        } else if self.ier & 0x02 != 0 && self.lsr_thre() {
            FIFOS_ENABLED | 0b0010
        } else {
            FIFOS_ENABLED | 0b0001
        }
    }

    /// Whether the interrupt line to the PLIC is high.
    fn interrupt_pending(&self) -> bool {
        self.iir() & 1 == 0
    }
}

/// UART device with a 16-byte FIFO in each direction.
pub struct Uart {
    range: AddressRange,
    irq: IrqLine,
    state: Mutex<State>,
    output: Mutex<Box<dyn Write + Send>>,
}

impl fmt::Debug for Uart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Uart")
            .field("range", &self.range)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Uart {
    /// Create a new UART in reset state, transmitting to the host's stdout.
    pub fn new(irq: IrqLine) -> Self {
        Self::with_output(irq, Box::new(io::stdout()))
    }

    /// Create a new UART transmitting to an arbitrary writer.
    pub fn with_output(irq: IrqLine, output: Box<dyn Write + Send>) -> Self {
        Self {
            range: AddressRange::from_base_and_size(DEFAULT_BASE, SIZE).unwrap(),
            irq,
            state: Mutex::new(State::new()),
            output: Mutex::new(output),
        }
    }

    /// Queues host-side input bytes into the receive FIFO. Bytes that do not fit set the
    /// overrun indicator and are dropped.
    pub fn queue_rx(&self, bytes: &[u8]) {
        let mut state = self.state.lock().unwrap();
        for &byte in bytes {
            if (state.rx_fifo_len as usize) < state.rx_fifo_buf.len() {
                let len = state.rx_fifo_len as usize;
                state.rx_fifo_buf[len] = byte;
                state.rx_fifo_len += 1;
            } else {
                state.set_lsr_oe(true);
            }
        }
        if state.rx_fifo_len > 0 {
            state.set_lsr_dr(true);
        }
        self.update_irq(&state);
    }

    fn update_irq(&self, state: &State) {
        self.irq.set_level(state.interrupt_pending());
    }

    fn read_rbr(&self, state: &mut State) -> u8 {
        let value = state.rx_fifo_buf[0];
        if state.rx_fifo_len > 0 {
            let len = state.rx_fifo_len as usize;
            state.rx_fifo_buf.copy_within(1..len, 0);
            state.rx_fifo_len -= 1;
            if state.rx_fifo_len == 0 {
                state.set_lsr_dr(false);
            }
        }
        value
    }

    fn write_thr(&self, state: &mut State, value: u8) {
        if state.tx_fifo_len as usize == state.tx_fifo_buf.len() {
            // Full FIFO: discard the oldest byte.
            state.tx_fifo_buf.copy_within(1.., 0);
            state.tx_fifo_len -= 1;
        }
        let masked = value & state.char_mask();
        let len = state.tx_fifo_len as usize;
        state.tx_fifo_buf[len] = masked;
        state.tx_fifo_len += 1;
        state.set_lsr_tfe(false);
        if state.tx_fifo_len as usize == state.tx_fifo_buf.len() {
            state.set_lsr_thre(false);
        }
    }

    fn write_fcr(&self, state: &mut State, value: u8) {
        let bits = value.view_bits::<Lsb0>();
        if bits[1] {
            state.rx_fifo_len = 0;
            state.set_lsr_dr(false);
        }
        if bits[2] {
            state.tx_fifo_len = 0;
            state.set_lsr_thre(true);
            state.set_lsr_tfe(true);
        }
        state.rx_fifo_itl = match (bits[7], bits[6]) {
            (false, false) => 1,
            (false, true) => 4,
            (true, false) => 8,
            (true, true) => 14,
        };
    }
}

impl Device for Uart {
    fn name(&self) -> &str {
        "UART16550"
    }

    fn range(&self) -> AddressRange {
        self.range
    }

    /// Registers are byte-mapped; only single-byte accesses touch them meaningfully, which is
    /// how guests drive a 16550.
    fn read(&self, offset: u64, size: usize) -> Option<u64> {
        if size != 1 {
            return Some(0);
        }
        let mut state = self.state.lock().unwrap();
        let dlab = state.dlab();
        let value = match offset {
            0 if dlab => state.dlr as u8,
            0 => self.read_rbr(&mut state),
            1 if dlab => (state.dlr >> 8) as u8,
            1 => state.ier,
            2 => state.iir(),
            3 => state.lcr,
            4 => 0, // MCR is write-only
            5 => {
                let value = state.lsr;
                // The Overrun Error indicator is cleared when reading the Line Status Register
                if state.lsr_oe() {
                    state.set_lsr_oe(false);
                }
                value
            }
            6 => state.msr,
            7 => state.scr,
            _ => return None,
        };
        self.update_irq(&state);
        Some(value as u64)
    }

    fn write(&self, offset: u64, size: usize, value: u64) -> bool {
        if size != 1 {
            return true;
        }
        let value = value as u8;
        let mut state = self.state.lock().unwrap();
        let dlab = state.dlab();
        match offset {
            0 if dlab => state.dlr = (state.dlr & 0xFF00) | value as u16,
            0 => self.write_thr(&mut state, value),
            1 if dlab => state.dlr = ((value as u16) << 8) | (state.dlr & 0xFF),
            1 => state.ier = value,
            2 => self.write_fcr(&mut state, value),
            3 => state.lcr = value,
            4 => {} // Modem control: no modem is simulated.
            5 | 6 => {} // LSR and MSR are read-only.
            7 => state.scr = value,
            _ => return false,
        }
        self.update_irq(&state);
        true
    }

    fn tick(&self) {
        let mut state = self.state.lock().unwrap();
        if state.tx_fifo_len > 0 {
            let mut output = self.output.lock().unwrap();
            let len = state.tx_fifo_len as usize;
            match output.write(&state.tx_fifo_buf[..len]) {
                Ok(n) => {
                    state.tx_fifo_buf.copy_within(n..len, 0);
                    state.tx_fifo_len -= n as u8;
                    if (state.tx_fifo_len as usize) < state.tx_fifo_buf.len() {
                        state.set_lsr_thre(true);
                    }
                    if state.tx_fifo_len == 0 {
                        state.set_lsr_tfe(true);
                    }
                    if let Err(err) = output.flush() {
                        warn!("I/O error while flushing UART output: {err}");
                    }
                }
                Err(err) => {
                    warn!("I/O error while draining UART transmit FIFO: {err}");
                }
            }
        }
        self.update_irq(&state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::interrupts::MEIP;
    use crate::core::IrqHub;
    use crate::resources::plic::Plic;
    use std::sync::Arc;

    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn uart() -> (Arc<IrqHub>, Arc<Plic>, Uart, Arc<Mutex<Vec<u8>>>) {
        let hub = Arc::new(IrqHub::new());
        let plic = Arc::new(Plic::new(hub.clone(), 31));
        let sink = Arc::new(Mutex::new(Vec::new()));
        let uart = Uart::with_output(
            IrqLine::new(plic.clone(), IRQ_ID),
            Box::new(Shared(sink.clone())),
        );
        (hub, plic, uart, sink)
    }

    #[test]
    fn test_transmit_drains_on_tick() {
        let (_, _, uart, sink) = uart();
        for &b in b"hi" {
            assert!(uart.write(0, 1, b as u64));
        }
        uart.tick();
        assert_eq!(b"hi".to_vec(), *sink.lock().unwrap());
        // THRE and TFE are set once the FIFO drained.
        assert_eq!(0x60, uart.read(5, 1).unwrap() & 0x60);
    }

    #[test]
    fn test_receive_data_ready() {
        let (_, _, uart, _) = uart();
        uart.queue_rx(b"A");
        // Data Ready set in LSR.
        assert_eq!(1, uart.read(5, 1).unwrap() & 1);
        assert_eq!(b'A' as u64, uart.read(0, 1).unwrap());
        // FIFO now empty: DR cleared.
        assert_eq!(0, uart.read(5, 1).unwrap() & 1);
    }

    #[test]
    fn test_rx_interrupt_via_plic() {
        let (hub, plic, uart, _) = uart();
        // Enable the UART source in the PLIC's M context.
        plic.write(IRQ_ID as u64 * 4, 4, 1);
        plic.write(0x2000, 4, 1 << IRQ_ID);
        // Enable the received-data-available interrupt (IER bit 0) and set a 1-byte trigger.
        assert!(uart.write(2, 1, 0b0000_0001));
        assert!(uart.write(1, 1, 0x01));

        uart.queue_rx(b"x");
        assert_ne!(0, hub.mip() & MEIP);

        // Draining the FIFO drops the line again.
        uart.read(0, 1);
        assert_eq!(0, hub.mip() & MEIP);
    }

    #[test]
    fn test_divisor_latch_access() {
        let (_, _, uart, _) = uart();
        // Set DLAB, write the divisor, clear DLAB.
        assert!(uart.write(3, 1, 0x83));
        assert!(uart.write(0, 1, 0x45));
        assert!(uart.write(1, 1, 0x01));
        assert_eq!(0x45, uart.read(0, 1).unwrap());
        assert_eq!(0x01, uart.read(1, 1).unwrap());
        assert!(uart.write(3, 1, 0x03));
        // Offset 0 reads the (empty) receive buffer again.
        assert_eq!(0, uart.read(0, 1).unwrap());
    }

    #[test]
    fn test_overrun() {
        let (_, _, uart, _) = uart();
        uart.queue_rx(&[0x55; 17]);
        // Overrun indicator set, then cleared by the LSR read.
        assert_eq!(2, uart.read(5, 1).unwrap() & 2);
        assert_eq!(0, uart.read(5, 1).unwrap() & 2);
    }
}
