use anyhow::Context as _;
use std::collections::BTreeMap;
use std::sync::Arc;

use barrage_core::metrics::Registry;
use barrage_core::{EnvVars, JsonArtifact, RunController, RunStatus};
use tokio_util::sync::CancellationToken;

use crate::cli::{RunArgs, ValidateArgs};
use crate::exit_codes::ExitCode;
use crate::output;
use crate::plan::PlanYaml;
use crate::run_error::{ResultExt as _, RunError};
use crate::workload::HttpWorkload;

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output);

    let env = merged_env(&args.env).invalid_input()?;
    let plan = PlanYaml::load(&args.plan).await.invalid_input()?;
    let summary_export = args
        .summary_export
        .clone()
        .or_else(|| plan.summary_export.clone());
    let (config, http) = plan.resolve(env).invalid_input()?;

    let mut controller = RunController::new(config.clone())
        .context("invalid run config")
        .invalid_input()?;
    let workload = HttpWorkload::new(http.clone(), controller.registry())
        .context("failed to register http metrics")
        .invalid_input()?;

    out.print_header(&args.plan, &config, &http);
    if let Some(progress) = out.progress() {
        controller = controller.with_progress(progress);
    }
    if let Some(path) = summary_export {
        controller = controller.with_reporter(Box::new(JsonArtifact::new(path)));
    }

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, aborting run");
                cancel.cancel();
            }
        }
    });

    let outcome = controller.run(workload, cancel).await;
    interrupt.abort();
    let outcome = outcome.context("run failed").runtime_error()?;

    out.print_summary(&outcome.summary).runtime_error()?;

    if !outcome.report_errors.is_empty() {
        return Err(RunError::RuntimeError(anyhow::anyhow!(
            "failed to report summary: {}",
            outcome.report_errors.join("; ")
        )));
    }

    Ok(ExitCode::from_outcome(
        matches!(outcome.status, RunStatus::Aborted),
        outcome.thresholds_passed(),
    ))
}

/// Loads and resolves the plan exactly as `run` would, without sending traffic.
pub async fn validate(args: ValidateArgs) -> Result<ExitCode, RunError> {
    let env = merged_env(&args.env).invalid_input()?;
    let plan = PlanYaml::load(&args.plan).await.invalid_input()?;
    let (config, http) = plan.resolve(env).invalid_input()?;

    let controller = RunController::new(config.clone())
        .context("invalid run config")
        .invalid_input()?;
    HttpWorkload::new(http.clone(), &Registry::default())
        .context("failed to register http metrics")
        .invalid_input()?;

    let thresholds: usize = config.thresholds.iter().map(|t| t.expressions.len()).sum();
    println!(
        "plan ok: stages={} duration={} max_vus={} thresholds={thresholds} requests={} target={}",
        controller.schedule().stages().len(),
        humantime::format_duration(controller.schedule().total_duration()),
        controller.schedule().max_target(),
        http.requests.len(),
        http.base_url,
    );

    Ok(ExitCode::Success)
}

fn process_env_snapshot() -> BTreeMap<String, String> {
    std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect()
}

fn merged_env(overrides: &[String]) -> anyhow::Result<EnvVars> {
    let mut map = process_env_snapshot();

    for raw in overrides {
        let (k, v) = parse_env_override(raw)?;
        map.insert(k, v);
    }

    let vars: Vec<(Arc<str>, Arc<str>)> = map
        .into_iter()
        .map(|(k, v)| (Arc::<str>::from(k), Arc::<str>::from(v)))
        .collect();

    Ok(Arc::from(vars.into_boxed_slice()))
}

fn parse_env_override(s: &str) -> anyhow::Result<(String, String)> {
    let (k, v) = s
        .split_once('=')
        .with_context(|| format!("invalid --env (expected KEY=VALUE): {s}"))?;
    if k.is_empty() {
        anyhow::bail!("invalid --env (empty KEY): {s}");
    }
    Ok((k.to_string(), v.to_string()))
}
