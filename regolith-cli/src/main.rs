use std::fs::File;
use std::io::{Read, Write};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use goblin::elf::program_header::PT_LOAD;
use log::{debug, info, warn};

use regolith_core::bus::Bus;
use regolith_core::core::{Config, Hart, IrqHub};
use regolith_core::dram::{Dram, DRAM_BASE};
use regolith_core::engine::{Engine, PowerControl, Shutdown};
use regolith_core::resources::plic::IrqLine;
use regolith_core::resources::{uart, Clint, DebugConsole, Plic, SiFiveTest, TestStatus, Uart};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// ELF file to run.
    elf: String,
    /// DRAM size in MiB.
    #[arg(long, default_value_t = 128)]
    memory: u64,
    /// Signature file to dump the architectural-test signature to.
    #[arg(long, short)]
    signature: Option<String>,
    /// Execution timeout in milliseconds.
    #[arg(long)]
    timeout: Option<u64>,
    /// Run without any graphical output. Accepted for compatibility; this frontend is always
    /// headless.
    #[arg(long, default_value_t = true)]
    #[allow(unused)]
    headless: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(&args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let mut buf = Vec::new();
    File::open(&args.elf)?.read_to_end(&mut buf)?;
    let elf = goblin::elf::Elf::parse(&buf)?;

    let hub = Arc::new(IrqHub::new());
    let power = Arc::new(PowerControl::new(hub.clone()));

    let mut bus = Bus::new(Dram::new(DRAM_BASE, args.memory << 20)?);
    bus.add_device(Arc::new(SiFiveTest::new({
        let power = power.clone();
        Box::new(move |code, status| power.request_guest_shutdown(code, status))
    })))?;
    bus.add_device(Arc::new(Clint::new(
        hub.clone(),
        regolith_core::resources::clint::DEFAULT_FREQ_HZ,
    )))?;
    let plic = Arc::new(Plic::new(hub.clone(), 31));
    bus.add_device(plic.clone())?;
    bus.add_device(Arc::new(Uart::new(IrqLine::new(plic, uart::IRQ_ID))))?;
    bus.add_device(Arc::new(DebugConsole::new()))?;

    // Copy all loadable segments from the ELF file into system memory.
    for header in elf.program_headers.iter().filter(|h| h.p_type == PT_LOAD) {
        debug!(
            "loading segment: file range [{:#x}..{:#x}] to pmem range [{:#x}..{:#x}]",
            header.p_offset,
            header.p_offset + header.p_filesz,
            header.p_paddr,
            header.p_paddr + header.p_memsz,
        );
        bus.dram()
            .write_bytes(header.p_paddr, &buf[header.file_range()])?;
    }

    let hart = Hart::new(
        hub,
        Config {
            hart_id: 0,
            reset_vector: elf.entry,
        },
    );
    info!("entry point {:#x}, {} MiB memory", elf.entry, args.memory);

    let mut engine = Engine::new(hart, Arc::new(bus), power);
    let outcome = engine.run_until_halt(args.timeout.map(Duration::from_millis))?;

    if let Some(path) = &args.signature {
        dump_signature(&elf, engine.bus(), path)?;
    }

    Ok(match outcome {
        Shutdown::Guest {
            status: TestStatus::Pass,
            ..
        } => ExitCode::SUCCESS,
        Shutdown::Guest { code, status } => {
            eprintln!("guest reported {status:?} (code {code})");
            ExitCode::FAILURE
        }
        Shutdown::Host => {
            eprintln!("execution stopped by the host (timeout)");
            ExitCode::FAILURE
        }
    })
}

/// Dumps the memory between the `begin_signature` and `end_signature` symbols as one 32-bit
/// little-endian value per line, lowercase hex, 8 digits zero-padded.
fn dump_signature(
    elf: &goblin::elf::Elf,
    bus: &Bus,
    path: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut begin = None;
    let mut end = None;
    for sym in elf.syms.iter() {
        match elf.strtab.get_at(sym.st_name) {
            Some("begin_signature") => begin = Some(sym.st_value),
            Some("end_signature") => end = Some(sym.st_value),
            _ => {}
        }
    }
    let begin = begin.ok_or("missing symbol `begin_signature`")?;
    let end = end.ok_or("missing symbol `end_signature`")?;
    if begin > end || begin % 4 != 0 || end % 4 != 0 {
        return Err(format!("invalid signature range [{begin:#x}, {end:#x})").into());
    }

    let mut file = File::create(path)?;
    for address in (begin..end).step_by(4) {
        let Some(word) = bus.read_u32(address) else {
            warn!("signature read outside memory at {address:#x}");
            return Err(format!("signature region not in memory at {address:#x}").into());
        };
        writeln!(file, "{word:08x}")?;
    }
    Ok(())
}
