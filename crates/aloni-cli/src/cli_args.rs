use std::path::PathBuf;

use chrono::NaiveDate;
use clap::Parser;

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_today(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|error| format!("expected YYYY-MM-DD: {error}"))
}

#[derive(Debug, Parser)]
#[command(
    name = "aloni",
    about = "Converge a calendar surface on a target day and book exactly one session",
    version
)]
pub(crate) struct Cli {
    #[arg(
        long,
        env = "ALONI_CONFIG",
        default_value = "aloni.json",
        help = "Engine config JSON (target, matching, navigation, commit and surface profile)"
    )]
    pub(crate) config: PathBuf,

    #[arg(
        long = "surface-cli",
        env = "ALONI_SURFACE_CLI",
        conflicts_with = "replay_fixture",
        help = "Playwright bridge executable driving the live surface"
    )]
    pub(crate) surface_cli: Option<String>,

    #[arg(
        long = "surface-timeout-ms",
        env = "ALONI_SURFACE_TIMEOUT_MS",
        default_value_t = 30_000,
        value_parser = parse_positive_u64,
        help = "Per-operation timeout for the live surface bridge"
    )]
    pub(crate) surface_timeout_ms: u64,

    #[arg(
        long = "replay-fixture",
        env = "ALONI_REPLAY_FIXTURE",
        help = "Run against a scripted schedule fixture instead of a live surface"
    )]
    pub(crate) replay_fixture: Option<PathBuf>,

    #[arg(
        long,
        env = "ALONI_TODAY",
        value_parser = parse_today,
        help = "Override the run date (YYYY-MM-DD); replay runs default to the fixture's today"
    )]
    pub(crate) today: Option<NaiveDate>,

    #[arg(
        long = "summary-json-out",
        env = "ALONI_SUMMARY_JSON_OUT",
        help = "Write the run summary here instead of stdout"
    )]
    pub(crate) summary_json_out: Option<PathBuf>,
}
