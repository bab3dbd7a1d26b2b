//! Memory-mapped devices: the interrupt fabric and the platform peripherals the core depends on.

pub mod clint;
pub mod debug_console;
pub mod plic;
pub mod sifive_test;
pub mod uart;

pub use clint::Clint;
pub use debug_console::DebugConsole;
pub use plic::{IrqLine, Plic};
pub use sifive_test::{SiFiveTest, TestStatus};
pub use uart::Uart;
