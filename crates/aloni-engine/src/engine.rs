use std::sync::Arc;

use aloni_surface::Surface;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::collaborators::{
    CaptureRequest, Diagnostics, OverlayDismisser, StabilizeSurface, TracingDiagnostics,
};
use crate::config::{validate_engine_config, EngineConfig};
use crate::date_target::{resolve_target_date, TargetResolution, SKIP_REASON_NOT_A_BOOKING_DAY};
use crate::guarded_commit::{CommitOutcome, CommitRung, GuardedCommitter};
use crate::navigation::{NavigationAttemptCounter, NavigationController, NavigationError};
use crate::session_matcher::{
    DisqualifyingTerms, MatchError, MatchStats, SessionMatcher, SessionPredicate,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Resolve,
    Navigate,
    Match,
    Guard,
    Commit,
}

impl RunPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resolve => "resolve",
            Self::Navigate => "navigate",
            Self::Match => "match",
            Self::Guard => "guard",
            Self::Commit => "commit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Skipped { reason: String },
    Committed,
    Failed { phase: RunPhase, reason: String },
}

impl RunOutcome {
    /// Skipped and committed runs both count as success for the caller.
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    fn failed(phase: RunPhase, reason: impl ToString) -> Self {
        Self::Failed {
            phase,
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub today: NaiveDate,
    pub target_date: Option<NaiveDate>,
    /// One entry per convergence, including re-convergence after drift.
    pub navigation: Vec<NavigationAttemptCounter>,
    pub matching: Option<MatchStats>,
    pub drift_recoveries: usize,
    pub guard_restarts: usize,
    pub guard_checks: usize,
    pub commit_rung: Option<CommitRung>,
    pub overlays_dismissed: usize,
    pub started_unix_ms: u64,
    pub finished_unix_ms: u64,
}

impl RunReport {
    fn new(today: NaiveDate) -> Self {
        Self {
            outcome: RunOutcome::Skipped {
                reason: String::new(),
            },
            today,
            target_date: None,
            navigation: Vec::new(),
            matching: None,
            drift_recoveries: 0,
            guard_restarts: 0,
            guard_checks: 0,
            commit_rung: None,
            overlays_dismissed: 0,
            started_unix_ms: current_unix_timestamp_ms(),
            finished_unix_ms: 0,
        }
    }

    pub fn navigation_steps(&self) -> usize {
        self.navigation.iter().map(|counter| counter.steps).sum()
    }

    pub fn drift_regressions(&self) -> usize {
        self.navigation
            .iter()
            .map(|counter| counter.drift_regressions)
            .sum()
    }
}

/// Runs one resolve, navigate, match, guard and commit sequence against a
/// surface.
pub struct BookingEngine {
    config: EngineConfig,
    terms: DisqualifyingTerms,
    predicate: SessionPredicate,
    surface: Arc<dyn Surface>,
    clock: Arc<dyn Clock>,
    stabilizer: Arc<dyn StabilizeSurface>,
    diagnostics: Arc<dyn Diagnostics>,
}

impl BookingEngine {
    pub fn new(config: EngineConfig, surface: Arc<dyn Surface>) -> Result<Self> {
        validate_engine_config(&config)?;
        let terms = DisqualifyingTerms::new(&config.matching.disqualifying_terms)
            .context("failed to build disqualifying term matcher")?;
        let predicate = SessionPredicate::from_target(&config.target);
        let stabilizer = Arc::new(OverlayDismisser::from_profile(&config.profile));
        Ok(Self {
            config,
            terms,
            predicate,
            surface,
            clock: Arc::new(SystemClock),
            stabilizer,
            diagnostics: Arc::new(TracingDiagnostics),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_stabilizer(mut self, stabilizer: Arc<dyn StabilizeSurface>) -> Self {
        self.stabilizer = stabilizer;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn run(&self) -> RunReport {
        let today = self.clock.today();
        let mut report = RunReport::new(today);
        let outcome = self.execute(today, &mut report).await;
        match &outcome {
            RunOutcome::Failed { phase, reason } => {
                tracing::error!(
                    phase = phase.as_str(),
                    reason = reason.as_str(),
                    target_date = ?report.target_date,
                    "run failed"
                );
                self.diagnostics
                    .capture(&CaptureRequest {
                        label: format!("aloni-{}-failure", phase.as_str()),
                        phase: phase.as_str().to_string(),
                        target_date: report.target_date,
                        reason: reason.clone(),
                    })
                    .await;
            }
            RunOutcome::Skipped { reason } => {
                tracing::info!(
                    reason = reason.as_str(),
                    target_date = ?report.target_date,
                    "run skipped"
                );
            }
            RunOutcome::Committed => {
                tracing::info!(
                    target_date = ?report.target_date,
                    rung = ?report.commit_rung,
                    navigation_steps = report.navigation_steps(),
                    "run committed"
                );
            }
        }
        report.outcome = outcome;
        report.finished_unix_ms = current_unix_timestamp_ms();
        report
    }

    async fn execute(&self, today: NaiveDate, report: &mut RunReport) -> RunOutcome {
        let target_config = &self.config.target;
        let allowed = match target_config.allowed_weekdays() {
            Ok(allowed) => allowed,
            Err(error) => return RunOutcome::failed(RunPhase::Resolve, format!("{error:#}")),
        };
        let resolution = match resolve_target_date(
            today,
            target_config.days_ahead,
            allowed.as_deref(),
            target_config.weekday_gate,
        ) {
            Ok(resolution) => resolution,
            Err(error) => return RunOutcome::failed(RunPhase::Resolve, error),
        };
        let target = match resolution {
            TargetResolution::Book(target) => target.date(),
            TargetResolution::Skipped {
                date,
                checked_weekday,
            } => {
                report.target_date = Some(date);
                tracing::info!(
                    target_date = %date,
                    weekday = %checked_weekday,
                    gate = ?target_config.weekday_gate,
                    "weekday allow-list excludes this run"
                );
                return RunOutcome::Skipped {
                    reason: SKIP_REASON_NOT_A_BOOKING_DAY.to_string(),
                };
            }
        };
        report.target_date = Some(target);
        tracing::info!(%today, target_date = %target, "resolved target date");

        if let Err(outcome) = self.converge(today, target, report).await {
            return outcome;
        }

        let surface = self.surface.as_ref();
        let matcher = SessionMatcher::new(
            surface,
            &self.config.profile,
            &self.config.matching,
            &self.terms,
            today,
        );
        let mut committer = GuardedCommitter::new(
            surface,
            &self.config.profile,
            &self.config.commit,
            &self.terms,
            self.config.matching.commit_token.as_str(),
            today,
        );

        loop {
            self.stabilize(report).await;
            let matched = match matcher.find_match(target, &self.predicate).await {
                Ok(matched) => matched,
                Err(MatchError::Drifted { verdict }) => {
                    if report.drift_recoveries >= self.config.run.max_drift_recoveries {
                        return RunOutcome::failed(
                            RunPhase::Match,
                            format!(
                                "selection kept drifting ({}) after {} recoveries",
                                verdict.as_str(),
                                report.drift_recoveries
                            ),
                        );
                    }
                    report.drift_recoveries += 1;
                    tracing::warn!(
                        target_date = %target,
                        recovery = report.drift_recoveries,
                        verdict = verdict.as_str(),
                        "re-converging after drift during matching"
                    );
                    if let Err(outcome) = self.converge(today, target, report).await {
                        return outcome;
                    }
                    continue;
                }
                Err(error) => return RunOutcome::failed(RunPhase::Match, error),
            };
            report.matching = Some(matched.stats);

            let outcome = committer.commit(target, matched.row).await;
            report.guard_checks = committer.guard_checks();
            match outcome {
                Ok(CommitOutcome::Success { rung }) => {
                    report.commit_rung = Some(rung);
                    return RunOutcome::Committed;
                }
                Ok(CommitOutcome::GuardFailed { failure }) => {
                    if report.guard_restarts >= self.config.commit.max_guard_restarts {
                        return RunOutcome::failed(RunPhase::Guard, failure);
                    }
                    report.guard_restarts += 1;
                    tracing::warn!(
                        restart = report.guard_restarts,
                        failure = %failure,
                        "guard rejected match; rescanning"
                    );
                }
                Ok(CommitOutcome::CommitFailed { failure }) => {
                    return RunOutcome::failed(RunPhase::Commit, failure);
                }
                Err(error) if committer.attempted() => {
                    return RunOutcome::failed(RunPhase::Commit, error);
                }
                Err(error) => return RunOutcome::failed(RunPhase::Guard, error),
            }
        }
    }

    async fn converge(
        &self,
        today: NaiveDate,
        target: NaiveDate,
        report: &mut RunReport,
    ) -> Result<(), RunOutcome> {
        self.stabilize(report).await;
        let controller = NavigationController::new(
            self.surface.as_ref(),
            &self.config.profile,
            &self.config.navigation,
            &self.config.reload,
            today,
        );
        match controller.converge(target).await {
            Ok(navigation) => {
                report.navigation.push(navigation.counter);
                Ok(())
            }
            Err(error) => {
                let reason = error.to_string();
                if let NavigationError::BudgetExhausted { counter, .. } = error {
                    report.navigation.push(counter);
                }
                Err(RunOutcome::failed(RunPhase::Navigate, reason))
            }
        }
    }

    async fn stabilize(&self, report: &mut RunReport) {
        match self.stabilizer.stabilize(self.surface.as_ref()).await {
            Ok(dismissed) => report.overlays_dismissed += dismissed,
            Err(error) => {
                tracing::warn!(error = %error, "surface stabilization failed; continuing");
            }
        }
    }
}

fn current_unix_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
