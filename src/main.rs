mod emulator;
mod input;

use std::path::PathBuf;

use anyhow::Context;
use chip8_vm::config::{DEFAULT_FRAME_RATE, DEFAULT_INSTRUCTIONS_PER_SECOND};
use chip8_vm::{MachineConfig, Quirks, Settings};
use clap::Parser;

use crate::emulator::Emulator;

#[derive(Parser, Debug)]
#[command(version, about = "A CHIP-8 virtual machine for the terminal")]
struct Args {
    /// ROM file to run
    rom: PathBuf,

    /// Timer ticks (and screen refreshes) per second
    #[arg(long, default_value_t = DEFAULT_FRAME_RATE, value_parser = clap::value_parser!(u64).range(1..))]
    fps: u64,

    /// Instructions executed per second
    #[arg(long, default_value_t = DEFAULT_INSTRUCTIONS_PER_SECOND)]
    ips: u64,

    /// Seed for the random number instruction
    #[arg(long)]
    seed: Option<u64>,

    /// OR/AND/XOR reset VF, like the COSMAC VIP
    #[arg(long)]
    vip_logic: bool,

    /// Register store/load advance the index register, like the COSMAC VIP
    #[arg(long)]
    vip_load_store: bool,

    /// Write log output to this file (the terminal UI logs nothing otherwise)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Run without a terminal UI and print the final screen
    #[arg(long)]
    headless: bool,

    /// Instructions to execute in headless mode
    #[arg(long, default_value_t = 1000)]
    cycles: u64,
}

impl From<Args> for Settings {
    fn from(args: Args) -> Self {
        let mut settings = Settings::new(args.fps, args.ips, args.rom);
        settings.machine = MachineConfig {
            quirks: Quirks {
                logic_resets_flag: args.vip_logic,
                load_store_increments_index: args.vip_load_store,
            },
            seed: args.seed,
        };
        settings.log_file = args.log_file;
        settings.headless = args.headless;
        settings.cycles = args.cycles;
        settings
    }
}

/// Where log records go. The terminal UI draws over stderr, so it only
/// logs when a file was given.
#[derive(Debug, PartialEq, Eq)]
enum LogTarget {
    File(PathBuf),
    Stderr,
    Off,
}

fn log_target(settings: &Settings) -> LogTarget {
    match (&settings.log_file, settings.headless) {
        (Some(path), _) => LogTarget::File(path.clone()),
        (None, true) => LogTarget::Stderr,
        (None, false) => LogTarget::Off,
    }
}

fn init_logging(target: &LogTarget) -> anyhow::Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    match target {
        LogTarget::File(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("creating log file {}", path.display()))?;
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        LogTarget::Stderr => {
            builder.target(env_logger::Target::Stderr);
        }
        // Without an installed logger every record is discarded.
        LogTarget::Off => return Ok(()),
    }
    builder.init();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let settings = Settings::from(Args::parse());
    init_logging(&log_target(&settings))?;

    let headless = settings.headless;
    let emulator = Emulator::new(settings)?;
    if headless {
        print!("{}", emulator.run_headless()?);
    } else {
        emulator.run()?;
    }

    Ok(())
}
