use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::error;

use elastiq::{
    sweep_stale, Config, QueueError, Result, Runtime, DATA_STORE_KEY, MEMORY_BUFFER, STALE_AFTER,
};

#[derive(Parser)]
#[command(name = "elastiq", version, about = "Elastic queue smoke and maintenance tool")]
struct Cli {
    /// Data store root directory (defaults to the configured one)
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// JSON settings file with configuration overrides
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a burst of events and report how it landed across tiers
    Fill {
        /// Route to exercise
        #[arg(long, default_value = "smoke-test")]
        route: String,

        /// Number of events to write
        #[arg(long, default_value_t = 100)]
        count: u64,

        /// Payload size in bytes
        #[arg(long, default_value_t = 64)]
        size: usize,
    },
    /// Read events until the queue reports empty
    Drain {
        /// Route to exercise
        #[arg(long, default_value = "smoke-test")]
        route: String,
    },
    /// Write a burst of events and drain it back, verifying order
    Smoke {
        /// Route to exercise
        #[arg(long, default_value = "smoke-test")]
        route: String,

        /// Number of events to write
        #[arg(long, default_value_t = 100)]
        count: u64,

        /// Payload size in bytes
        #[arg(long, default_value_t = 64)]
        size: usize,
    },
    /// Remove holding areas left behind by crashed processes
    Sweep {
        /// Staleness window in seconds
        #[arg(long, default_value_t = STALE_AFTER.as_secs())]
        stale_secs: u64,
    },
}

fn main() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        error!("{}", e);
        exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.settings {
        Some(path) => Config::from_file(path)?,
        None => Config::new(),
    };
    if let Some(dir) = &cli.data_dir {
        config.set(DATA_STORE_KEY, dir.display().to_string());
    }

    match cli.command {
        Command::Fill { route, count, size } => fill(config, &route, count, size),
        Command::Drain { route } => drain(config, &route),
        Command::Smoke { route, count, size } => smoke(config, &route, count, size),
        Command::Sweep { stale_secs } => {
            let root = config.data_store();
            sweep_stale(
                &root,
                config.running_in_cloud(),
                Duration::from_secs(stale_secs),
            )?;
            println!("swept {}", root.display());
            Ok(())
        }
    }
}

/// Writes a burst and reports the memory/spill split, exercising the
/// tier boundary from the shell. The store is transient, so the burst
/// is discarded when the runtime shuts down.
fn fill(config: Config, route: &str, count: u64, size: usize) -> Result<()> {
    let runtime = Runtime::init(config)?;
    let queue = runtime.queue(route);

    for i in 0..count {
        queue.write(&payload(i, size))?;
    }
    let in_memory = count.min(MEMORY_BUFFER);
    let spilled = count - in_memory;

    runtime.shutdown();
    println!("route {}: wrote {count} events ({in_memory} in memory, {spilled} spilled)", queue.id());
    Ok(())
}

fn drain(config: Config, route: &str) -> Result<()> {
    let runtime = Runtime::init(config)?;
    let queue = runtime.queue(route);

    let mut drained = 0u64;
    while queue.read()?.is_some() {
        drained += 1;
    }

    runtime.shutdown();
    println!("route {}: drained {drained} events", queue.id());
    Ok(())
}

fn smoke(config: Config, route: &str, count: u64, size: usize) -> Result<()> {
    let runtime = Runtime::init(config)?;
    let queue = runtime.queue(route);

    for i in 0..count {
        queue.write(&payload(i, size))?;
    }

    let mut drained = 0u64;
    while let Some(event) = queue.read()? {
        if event != payload(drained, size) {
            return Err(QueueError::StringError(format!(
                "event {drained} came back out of order"
            )));
        }
        drained += 1;
    }

    runtime.shutdown();

    if drained != count {
        return Err(QueueError::StringError(format!(
            "wrote {count} events but drained {drained}"
        )));
    }
    println!("route {}: wrote {count} events, drained {drained} in order", queue.id());
    Ok(())
}

/// Deterministic payload: a numbered header padded out to `size`.
fn payload(i: u64, size: usize) -> Vec<u8> {
    let mut event = format!("event-{i:09}-").into_bytes();
    event.resize(size.max(event.len()), b'x');
    event
}
