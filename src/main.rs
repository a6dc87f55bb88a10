use std::path::PathBuf;
use std::process::ExitCode;

use apptag_reconciler::cli::{self, Command};
use apptag_reconciler::config::{Config, LogFormat};
use apptag_reconciler::logging;
use apptag_reconciler::tags::Cancellation;
use clap::Parser;
use tracing::warn;

#[derive(Parser)]
#[command(name = "apptag")]
#[command(version, about = "Keeps latest and quarantine tags of application versions consistent")]
struct Cli {
    /// Configuration file (default: $XDG_DATA_HOME/apptag/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level or filter directives; RUST_LOG takes precedence
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    /// Log the writes a command would make instead of sending them
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

fn main() -> ExitCode {
    let args = Cli::parse();

    match run(args) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(cli::EXIT_FAILURE)
        }
    }
}

fn run(args: Cli) -> anyhow::Result<u8> {
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(level) = args.log_level {
        config.log.level = level;
    }
    if let Some(format) = args.log_format {
        config.log.format = format;
    }
    let _guard = logging::init(&config.log)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async {
            let cancellation = Cancellation::new();
            let on_interrupt = cancellation.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, stopping after the current operation");
                    on_interrupt.cancel();
                }
            });

            cli::run(
                args.command,
                &config,
                args.dry_run,
                &cancellation,
                &mut std::io::stdout(),
            )
            .await
        })
}
