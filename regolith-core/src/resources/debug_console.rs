//! A bare-bones debug console: byte stores at offset 0 go straight to the host console.

use std::fmt;
use std::io::{self, Write};
use std::sync::Mutex;

use log::warn;

use crate::device::Device;
use crate::AddressRange;

pub const DEFAULT_BASE: u64 = 0x1000_8000;
pub const SIZE: u64 = 8;

pub struct DebugConsole {
    range: AddressRange,
    output: Mutex<Box<dyn Write + Send>>,
}

impl fmt::Debug for DebugConsole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugConsole")
            .field("range", &self.range)
            .finish_non_exhaustive()
    }
}

impl DebugConsole {
    pub fn new() -> Self {
        Self::with_output(Box::new(io::stdout()))
    }

    pub fn with_output(output: Box<dyn Write + Send>) -> Self {
        Self {
            range: AddressRange::from_base_and_size(DEFAULT_BASE, SIZE).unwrap(),
            output: Mutex::new(output),
        }
    }
}

impl Default for DebugConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for DebugConsole {
    fn name(&self) -> &str {
        "debug-console"
    }

    fn range(&self) -> AddressRange {
        self.range
    }

    fn read(&self, _offset: u64, _size: usize) -> Option<u64> {
        Some(0)
    }

    fn write(&self, offset: u64, size: usize, value: u64) -> bool {
        if offset == 0 && size == 1 {
            let mut output = self.output.lock().unwrap();
            if let Err(err) = output.write_all(&[value as u8]).and_then(|()| output.flush()) {
                warn!("I/O error on debug console: {err}");
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[test]
    fn test_bytes_reach_console() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let console = DebugConsole::with_output(Box::new(Shared(sink.clone())));
        for &b in b"ok\n" {
            assert!(console.write(0, 1, b as u64));
        }
        assert_eq!(b"ok\n".to_vec(), *sink.lock().unwrap());
        assert_eq!(Some(0), console.read(0, 1));
    }
}
