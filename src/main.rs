use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use em32::config::DEFAULT_MEMORY_MB;
use em32::devices::StdConsole;
use em32::{EmulatorConfig, RunExit, System};

const EXIT_LOAD_ERROR: u8 = 1;
const EXIT_FATAL: u8 = 2;
const EXIT_ESCAPE: u8 = 3;

#[derive(Debug, Parser)]
#[command(name = "em32", version, about = "Run an em32 executable image")]
struct Args {
    /// Trace faults and host-bridge calls
    #[arg(short, long)]
    verbose: bool,

    /// Guest memory in MiB
    #[arg(short, long, default_value_t = DEFAULT_MEMORY_MB)]
    memory: u32,

    /// Flat ram-filesystem image loaded at the top of memory
    #[arg(short = 'f', long = "filesystem")]
    filesystem: Option<PathBuf>,

    /// Revalidate every access instead of caching code and stack pages
    #[arg(long)]
    safe: bool,

    /// Write a snapshot here when the run ends
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Stop after this many cycles
    #[arg(long)]
    max_cycles: Option<u64>,

    /// Executable image (optionally gzip or zstd compressed)
    image: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    let config = EmulatorConfig {
        memory_mb: args.memory,
        fast_path: !args.safe,
        filesystem: args.filesystem.clone(),
        ..EmulatorConfig::default()
    };

    let mut system = match System::new(config, Box::new(StdConsole::new())) {
        Ok(system) => system,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(EXIT_LOAD_ERROR);
        }
    };
    if let Err(e) = system.load_file(&args.image) {
        error!("{}: {}", args.image.display(), e);
        return ExitCode::from(EXIT_LOAD_ERROR);
    }

    let result = system.run(args.max_cycles.unwrap_or(u64::MAX));

    if let Some(path) = &args.snapshot {
        if let Err(e) = system.snapshot().save(path) {
            error!("snapshot {}: {}", path.display(), e);
        }
    }

    match result {
        Ok(RunExit::Halted(code)) => ExitCode::from(code as u8),
        Ok(RunExit::Escaped) => ExitCode::from(EXIT_ESCAPE),
        Ok(RunExit::BudgetExhausted) => ExitCode::SUCCESS,
        // already logged by the cpu
        Err(_) => ExitCode::from(EXIT_FATAL),
    }
}
