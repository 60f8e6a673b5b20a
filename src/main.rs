//! Command-line entry point: parses the `daemon` / `version` / `schema`
//! subcommands and bootstraps logging the way the teacher's `main.rs` does.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use autosuspend::checks::registry::{activity_schema, wakeup_schema};
use autosuspend::config::{general_parameters, Config, ConfigSchema};
use autosuspend::scheduler::{self, RunOptions};
use autosuspend::{build_engine, default_clock, default_inhibit_lock};

#[derive(Parser)]
#[command(name = "autosuspend", version)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", default_value = "/etc/autosuspend.conf")]
    config: PathBuf,

    /// Redirect the formatted log stream to a file instead of stdout.
    #[arg(short = 'l', long = "logging")]
    logging: Option<PathBuf>,

    /// Force debug-level logging.
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the suspend loop.
    Daemon {
        /// Evaluate every activity check instead of short-circuiting on the first match.
        #[arg(short = 'a', long = "allchecks")]
        all_checks: bool,
        /// Bound the daemon's lifetime to this many seconds of ticking.
        #[arg(short = 'r', long = "runfor")]
        run_for: Option<u64>,
    },
    /// Print the release string.
    Version,
    /// Print the JSON configuration schema.
    Schema,
}

fn init_logging(debug: bool, logging: Option<&PathBuf>) {
    let filter = if debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()))
    };

    match logging {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .unwrap_or_else(|e| panic!("cannot open log file {}: {e}", path.display()));
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(file))
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
}

fn print_schema() {
    let schema = ConfigSchema {
        general_parameters: general_parameters(),
        activity_checks: activity_schema(),
        wakeup_checks: wakeup_schema(),
    };
    println!("{}", schema.to_json().expect("schema always serializes"));
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if matches!(cli.command, Command::Version) {
        println!("autosuspend {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    if matches!(cli.command, Command::Schema) {
        print_schema();
        return Ok(());
    }

    init_logging(cli.debug, cli.logging.as_ref());

    let Command::Daemon { all_checks, run_for } = cli.command else {
        unreachable!("version and schema handled above");
    };

    let config = Config::load(&cli.config)?;
    let interval = Duration::from_secs(config.general.interval);
    let engine = build_engine(&config, default_inhibit_lock(), default_clock(), all_checks)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let max_iterations = run_for.map(|seconds| (seconds / config.general.interval).max(1));
    runtime.block_on(scheduler::run(
        engine,
        RunOptions {
            interval,
            max_iterations,
        },
    ))?;

    Ok(())
}
