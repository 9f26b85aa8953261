use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use aloni_engine::{
    load_engine_config, load_schedule_fixture, BookingEngine, EngineConfig, FixedClock,
    RunReport, ScriptedLog, ScriptedSurface,
};
use aloni_surface::PlaywrightCliSurface;
use anyhow::{bail, Context, Result};
use serde::Serialize;

use crate::bridge_diagnostics::BridgeDiagnostics;
use crate::cli_args::Cli;

#[derive(Debug, Serialize)]
pub(crate) struct RunSummary {
    pub(crate) mode: &'static str,
    pub(crate) report: RunReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) replay: Option<ScriptedLog>,
}

pub(crate) async fn run_cli(cli: Cli) -> Result<ExitCode> {
    let config = load_engine_config(&cli.config)?;
    let summary = match (&cli.replay_fixture, &cli.surface_cli) {
        (Some(fixture), _) => run_replay(&cli, config, fixture).await?,
        (None, Some(bridge)) => run_live(&cli, config, bridge).await?,
        (None, None) => bail!("either --surface-cli or --replay-fixture is required"),
    };
    emit_summary(&summary, cli.summary_json_out.as_deref())?;
    Ok(if summary.report.outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

pub(crate) async fn run_replay(
    cli: &Cli,
    config: EngineConfig,
    fixture_path: &Path,
) -> Result<RunSummary> {
    let fixture = load_schedule_fixture(fixture_path)?;
    let surface = Arc::new(ScriptedSurface::new(fixture, &config.profile)?);
    let today = cli.today.unwrap_or_else(|| surface.today());
    tracing::info!(
        fixture = %fixture_path.display(),
        today = %today,
        "starting replay run"
    );
    let engine =
        BookingEngine::new(config, surface.clone())?.with_clock(Arc::new(FixedClock(today)));
    let report = engine.run().await;
    Ok(RunSummary {
        mode: "replay",
        report,
        replay: Some(surface.log()),
    })
}

async fn run_live(cli: &Cli, config: EngineConfig, bridge: &str) -> Result<RunSummary> {
    let surface = Arc::new(
        PlaywrightCliSurface::new(bridge)?
            .with_operation_timeout(Duration::from_millis(cli.surface_timeout_ms)),
    );
    surface
        .start_session()
        .await
        .with_context(|| format!("failed to start surface bridge session via {bridge}"))?;

    let mut engine = BookingEngine::new(config, surface.clone())?
        .with_diagnostics(Arc::new(BridgeDiagnostics::new(surface.clone())));
    if let Some(today) = cli.today {
        engine = engine.with_clock(Arc::new(FixedClock(today)));
    }
    tracing::info!(bridge = %bridge, "starting live run");
    let report = engine.run().await;

    if let Err(error) = surface.shutdown_session().await {
        tracing::warn!(error = %error, "surface bridge shutdown failed");
    }
    Ok(RunSummary {
        mode: "live",
        report,
        replay: None,
    })
}

pub(crate) fn emit_summary(summary: &RunSummary, out: Option<&Path>) -> Result<()> {
    let rendered =
        serde_json::to_string_pretty(summary).context("failed to serialize run summary")?;
    let Some(path) = out else {
        println!("{rendered}");
        return Ok(());
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, format!("{rendered}\n"))
        .with_context(|| format!("failed to write run summary {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use clap::Parser;
    use serde_json::Value;
    use tempfile::tempdir;

    use super::{emit_summary, run_cli, run_replay};
    use crate::cli_args::Cli;

    fn fixture_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn replay_cli(extra: &[&str]) -> Cli {
        let config = fixture_dir().join("aloni.json");
        let fixture = fixture_dir().join("replay-week.json");
        let mut args = vec![
            "aloni".to_string(),
            "--config".to_string(),
            config.display().to_string(),
            "--replay-fixture".to_string(),
            fixture.display().to_string(),
        ];
        args.extend(extra.iter().map(|arg| arg.to_string()));
        Cli::try_parse_from(args).expect("parse")
    }

    #[tokio::test]
    async fn functional_replay_run_books_the_fixture_session() {
        let cli = replay_cli(&[]);
        let config = aloni_engine::load_engine_config(&cli.config).expect("config");
        let fixture = cli.replay_fixture.clone().expect("fixture");
        let summary = run_replay(&cli, config, &fixture).await.expect("replay");
        assert!(summary.report.outcome.is_success());
        let replay = summary.replay.expect("replay log");
        assert_eq!(replay.bookings.len(), 1);
        assert_eq!(summary.report.target_date, replay.bookings.first().map(|b| b.date));
    }

    #[tokio::test]
    async fn integration_replay_cli_writes_summary_json() {
        let temp = tempdir().expect("tempdir");
        let out = temp.path().join("runs/summary.json");
        let cli = replay_cli(&["--summary-json-out", out.to_str().expect("utf8 path")]);
        let exit = run_cli(cli).await.expect("run");
        assert_eq!(exit, std::process::ExitCode::SUCCESS);

        let raw = std::fs::read_to_string(&out).expect("summary");
        let summary: Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(summary["mode"], "replay");
        assert_eq!(summary["report"]["outcome"]["status"], "committed");
        assert_eq!(summary["report"]["commit_rung"], "plain");
    }

    #[tokio::test]
    async fn regression_replay_today_override_can_skip_the_run() {
        // Friday runs are outside the allow-list.
        let cli = replay_cli(&["--today", "2026-10-23"]);
        let config = aloni_engine::load_engine_config(&cli.config).expect("config");
        let fixture = cli.replay_fixture.clone().expect("fixture");
        let summary = run_replay(&cli, config, &fixture).await.expect("replay");
        assert!(matches!(
            summary.report.outcome,
            aloni_engine::RunOutcome::Skipped { .. }
        ));
        assert_eq!(summary.replay.expect("log").selection_clicks.len(), 0);
    }

    #[tokio::test]
    async fn regression_cli_without_surface_is_rejected() {
        let config = fixture_dir().join("aloni.json");
        let cli = Cli::try_parse_from(["aloni", "--config", config.to_str().expect("utf8")])
            .expect("parse");
        if cli.surface_cli.is_some() || cli.replay_fixture.is_some() {
            return;
        }
        let error = run_cli(cli).await.expect_err("missing surface");
        assert!(error.to_string().contains("--surface-cli"));
    }

    #[test]
    fn unit_emit_summary_creates_parent_directories() {
        let temp = tempdir().expect("tempdir");
        let out = temp.path().join("nested/deeper/summary.json");
        let summary = super::RunSummary {
            mode: "replay",
            report: serde_json::from_value(serde_json::json!({
                "outcome": { "status": "skipped", "reason": "not a booking day" },
                "today": "2026-10-22",
                "target_date": "2026-11-05",
                "navigation": [],
                "matching": null,
                "drift_recoveries": 0,
                "guard_restarts": 0,
                "guard_checks": 0,
                "commit_rung": null,
                "overlays_dismissed": 0,
                "started_unix_ms": 1,
                "finished_unix_ms": 2
            }))
            .expect("report"),
            replay: None,
        };
        emit_summary(&summary, Some(&out)).expect("emit");
        let raw = std::fs::read_to_string(&out).expect("read");
        assert!(raw.contains("\"not a booking day\""));
        assert!(!raw.contains("\"replay\":"));
    }

    #[derive(Clone, Default)]
    struct SharedLog(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedLog {
        fn write(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
            self.0.lock().expect("lock").extend_from_slice(bytes);
            Ok(bytes.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn regression_run_outcome_is_logged_once() {
        let log = SharedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let temp = tempdir().expect("tempdir");
        let out = temp.path().join("summary.json");
        let cli = replay_cli(&["--summary-json-out", out.to_str().expect("utf8 path")]);
        run_cli(cli).await.expect("run");

        let captured = String::from_utf8(log.0.lock().expect("lock").clone()).expect("utf8");
        assert_eq!(captured.matches("run committed").count(), 1);
        assert_eq!(captured.matches("session booked").count(), 0);
    }
}
