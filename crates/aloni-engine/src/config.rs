use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Weekday;
use serde::{Deserialize, Serialize};

fn default_commit_token() -> String {
    "book".to_string()
}

fn default_max_scroll_attempts() -> usize {
    20
}

fn default_scroll_step_px() -> i64 {
    800
}

fn default_match_settle_ms() -> u64 {
    300
}

/// Which date the weekday allow-list is checked against.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WeekdayGate {
    /// The computed target date must fall on an allowed weekday.
    TargetDate,
    /// The run itself must happen on an allowed weekday, so a Thursday run
    /// with a Mon/Tue/Wed allow-list skips even though its target is a
    /// Wednesday.
    #[default]
    RunDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookingTargetConfig {
    pub days_ahead: i64,
    #[serde(default)]
    pub weekdays: Option<Vec<String>>,
    #[serde(default)]
    pub weekday_gate: WeekdayGate,
    pub time: String,
    pub location: String,
    pub category: String,
}

impl BookingTargetConfig {
    pub fn allowed_weekdays(&self) -> Result<Option<Vec<Weekday>>> {
        let Some(raw) = self.weekdays.as_ref() else {
            return Ok(None);
        };
        let mut parsed = Vec::with_capacity(raw.len());
        for entry in raw {
            let weekday = Weekday::from_str(entry.trim())
                .map_err(|_| anyhow::anyhow!("unknown weekday '{}' in target.weekdays", entry))?;
            if !parsed.contains(&weekday) {
                parsed.push(weekday);
            }
        }
        Ok(Some(parsed))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchingConfig {
    pub disqualifying_terms: Vec<String>,
    #[serde(default = "default_commit_token")]
    pub commit_token: String,
    #[serde(default = "default_max_scroll_attempts")]
    pub max_scroll_attempts: usize,
    #[serde(default = "default_scroll_step_px")]
    pub scroll_step_px: i64,
    #[serde(default = "default_match_settle_ms")]
    pub settle_ms: u64,
}

impl MatchingConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NavigationConfig {
    pub max_steps: usize,
    pub tries_per_strategy: usize,
    pub strip_scroll_px: i64,
    pub settle_ms: u64,
    pub backoff_ms: u64,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            max_steps: 30,
            tries_per_strategy: 3,
            strip_scroll_px: 300,
            settle_ms: 400,
            backoff_ms: 250,
        }
    }
}

impl NavigationConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReloadConfig {
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            poll_interval_ms: 100,
        }
    }
}

impl ReloadConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommitConfig {
    pub confirmation_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub max_guard_restarts: usize,
    pub dismiss_success: bool,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout_ms: 3_000,
            poll_interval_ms: 200,
            max_guard_restarts: 2,
            dismiss_success: true,
        }
    }
}

impl CommitConfig {
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunConfig {
    pub max_drift_recoveries: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_drift_recoveries: 3,
        }
    }
}

/// Backend-native selectors and attribute names describing where each
/// signal lives on the surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SurfaceProfile {
    pub day_cell: String,
    pub date_attribute: String,
    pub label_attribute: String,
    pub selected_attribute: String,
    pub selected_marker: String,
    pub today_marker: String,
    pub heading: String,
    pub sticky_day_indicator: String,
    pub page_next: String,
    pub page_prev: String,
    pub day_strip: String,
    pub result_list: String,
    pub list_scroll_container: String,
    pub row: String,
    pub row_time: String,
    pub row_location: String,
    pub row_category: String,
    pub row_status: String,
    pub row_cta: String,
    pub cta_text: String,
    pub success_indicator: String,
    pub destructive_dialog: String,
    pub dialog_keep_option: String,
    pub overlay_close: Vec<String>,
}

impl Default for SurfaceProfile {
    fn default() -> Self {
        Self {
            day_cell: "div.cal-date".to_string(),
            date_attribute: "data-date".to_string(),
            label_attribute: "aria-label".to_string(),
            selected_attribute: "aria-selected".to_string(),
            selected_marker: "div.cal-date[aria-selected='true']".to_string(),
            today_marker: "div.cal-date.today".to_string(),
            heading: "h2.schedule-date".to_string(),
            sticky_day_indicator: "div.sticky-day".to_string(),
            page_next: "button[aria-label='Next week']".to_string(),
            page_prev: "button[aria-label='Previous week']".to_string(),
            day_strip: "div.cal-strip".to_string(),
            result_list: "div.session-list".to_string(),
            list_scroll_container: "div.session-list".to_string(),
            row: "div.session-row-view".to_string(),
            row_time: "div.session-time".to_string(),
            row_location: "div.session-location".to_string(),
            row_category: "div.session-name".to_string(),
            row_status: "div.session-status".to_string(),
            row_cta: "button.session-cta".to_string(),
            cta_text: "div.btn-text".to_string(),
            success_indicator: "button:has-text(\"I'm done\")".to_string(),
            destructive_dialog: "div[role='dialog']:has-text('Cancel')".to_string(),
            dialog_keep_option: "button:has-text('Keep')".to_string(),
            overlay_close: vec![
                "button:has-text('Close')".to_string(),
                "button[aria-label*='close' i]".to_string(),
            ],
        }
    }
}

impl SurfaceProfile {
    fn required_selectors(&self) -> [(&'static str, &str); 12] {
        [
            ("day_cell", self.day_cell.as_str()),
            ("date_attribute", self.date_attribute.as_str()),
            ("label_attribute", self.label_attribute.as_str()),
            ("selected_attribute", self.selected_attribute.as_str()),
            ("selected_marker", self.selected_marker.as_str()),
            ("result_list", self.result_list.as_str()),
            ("row", self.row.as_str()),
            ("row_time", self.row_time.as_str()),
            ("row_status", self.row_status.as_str()),
            ("row_cta", self.row_cta.as_str()),
            ("success_indicator", self.success_indicator.as_str()),
            ("destructive_dialog", self.destructive_dialog.as_str()),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    pub target: BookingTargetConfig,
    pub matching: MatchingConfig,
    #[serde(default)]
    pub navigation: NavigationConfig,
    #[serde(default)]
    pub reload: ReloadConfig,
    #[serde(default)]
    pub commit: CommitConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub profile: SurfaceProfile,
}

pub fn parse_engine_config(raw: &str) -> Result<EngineConfig> {
    let config = serde_json::from_str::<EngineConfig>(raw)
        .context("failed to parse booking engine config")?;
    validate_engine_config(&config)?;
    Ok(config)
}

pub fn load_engine_config(path: &Path) -> Result<EngineConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    parse_engine_config(&raw).with_context(|| format!("invalid config {}", path.display()))
}

pub fn validate_engine_config(config: &EngineConfig) -> Result<()> {
    let target = &config.target;
    if target.days_ahead < 0 {
        bail!(
            "target.days_ahead must be zero or positive (got {})",
            target.days_ahead
        );
    }
    for (field, value) in [
        ("target.time", target.time.as_str()),
        ("target.location", target.location.as_str()),
        ("target.category", target.category.as_str()),
    ] {
        if value.trim().is_empty() {
            bail!("{field} cannot be empty");
        }
    }
    if let Some(weekdays) = target.allowed_weekdays()? {
        if weekdays.is_empty() {
            bail!("target.weekdays cannot be an empty list; omit it to allow every weekday");
        }
    }

    let matching = &config.matching;
    if matching.commit_token.trim().is_empty() {
        bail!("matching.commit_token cannot be empty");
    }
    if matching
        .disqualifying_terms
        .iter()
        .any(|term| term.trim().is_empty())
    {
        bail!("matching.disqualifying_terms cannot contain empty terms");
    }
    if matching.scroll_step_px <= 0 {
        bail!("matching.scroll_step_px must be greater than 0");
    }

    if config.navigation.max_steps == 0 {
        bail!("navigation.max_steps must be greater than 0");
    }
    if config.navigation.tries_per_strategy == 0 {
        bail!("navigation.tries_per_strategy must be greater than 0");
    }
    if config.navigation.strip_scroll_px <= 0 {
        bail!("navigation.strip_scroll_px must be greater than 0");
    }

    for (field, selector) in config.profile.required_selectors() {
        if selector.trim().is_empty() {
            bail!("profile.{field} cannot be empty");
        }
    }
    Ok(())
}
