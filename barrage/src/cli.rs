use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Progress bar on stderr and a text summary on stdout.
    HumanReadable,
    /// Emit JSON progress and summary lines (NDJSON) to stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "barrage",
    author,
    version,
    about = "Staged HTTP load generator with threshold gates",
    long_about = "barrage ramps a population of virtual users through the stages of a YAML test plan, sends the plan's requests against a target, aggregates metrics and evaluates pass/fail thresholds.\n\nEnvironment variables from the current process are visible to the plan; use `--env KEY=VALUE` to add/override values.",
    after_help = "Examples:\n  barrage run plans/basic.yaml\n  barrage run plans/basic.yaml --env BASE_URL=http://127.0.0.1:22555\n  barrage run plans/spike.yaml --output json --summary-export out/summary.json\n  barrage validate plans/stress.yaml"
)]
pub struct Cli {
    /// Log filter (e.g. info, debug, barrage_core=trace). `RUST_LOG` takes precedence.
    #[arg(long, global = true, value_name = "FILTER")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a test plan
    Run(RunArgs),

    /// Parse and check a test plan without generating load
    Validate(ValidateArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the test plan (.yaml)
    pub plan: PathBuf,

    /// Add/override env vars visible to the plan (repeatable, KEY=VALUE).
    /// CLI-provided vars override the current process env.
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Write the JSON summary to this path (overrides the plan's `summaryExport`)
    #[arg(long, value_name = "PATH")]
    pub summary_export: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Path to the test plan (.yaml)
    pub plan: PathBuf,

    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_run_with_overrides() {
        let parsed = Cli::try_parse_from([
            "barrage",
            "run",
            "basic.yaml",
            "--env",
            "BASE_URL=http://127.0.0.1:1",
            "--env",
            "EMPTY=",
            "--summary-export",
            "out/summary.json",
            "--output",
            "json",
            "--log-level",
            "debug",
        ]);

        let cli = match parsed {
            Ok(v) => v,
            Err(err) => panic!("failed to parse args: {err}"),
        };

        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.plan, PathBuf::from("basic.yaml"));
                assert_eq!(
                    args.env,
                    vec!["BASE_URL=http://127.0.0.1:1".to_string(), "EMPTY=".to_string()]
                );
                assert_eq!(args.summary_export, Some(PathBuf::from("out/summary.json")));
                assert_eq!(args.output, OutputFormat::Json);
            }
            Command::Validate(_) => panic!("expected run command"),
        }
    }

    #[test]
    fn cli_defaults_to_human_output() {
        let cli = match Cli::try_parse_from(["barrage", "run", "p.yaml"]) {
            Ok(v) => v,
            Err(err) => panic!("failed to parse args: {err}"),
        };
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.output, OutputFormat::HumanReadable);
                assert!(args.summary_export.is_none());
            }
            Command::Validate(_) => panic!("expected run command"),
        }
    }

    #[test]
    fn cli_requires_plan_path() {
        assert!(Cli::try_parse_from(["barrage", "validate"]).is_err());
    }
}
