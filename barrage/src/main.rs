mod cli;
mod exit_codes;
mod output;
mod plan;
mod run;
mod run_error;
mod workload;

use clap::Parser;
use mimalloc::MiMalloc;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const DEFAULT_LOG_FILTER: &str = "warn";

/// `RUST_LOG` wins over `--log-level`; logs go to stderr so stdout stays machine-readable.
fn init_tracing(log_level: Option<&str>) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(log_level.unwrap_or(DEFAULT_LOG_FILTER))
            .map_err(|e| anyhow::anyhow!("invalid --log-level: {e}"))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = match cli::Cli::try_parse() {
        Ok(v) => v,
        Err(err) => {
            use clap::error::ErrorKind;
            let _ = err.print();
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                    exit_codes::ExitCode::Success.as_i32()
                }
                _ => exit_codes::ExitCode::InvalidInput.as_i32(),
            };
            std::process::exit(code);
        }
    };

    if let Err(err) = init_tracing(cli.log_level.as_deref()) {
        eprintln!("{err:#}");
        std::process::exit(exit_codes::ExitCode::InvalidInput.as_i32());
    }

    let res = match cli.command {
        cli::Command::Run(args) => run::run(args).await,
        cli::Command::Validate(args) => run::validate(args).await,
    };

    let code = match res {
        Ok(code) => code.as_i32(),
        Err(err) => {
            eprintln!("{err}");
            err.exit_code().as_i32()
        }
    };

    std::process::exit(code);
}
