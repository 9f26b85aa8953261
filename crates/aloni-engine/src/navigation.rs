use aloni_surface::{ClickMode, ElementHandle, QuerySpec, Surface, SurfaceError, SurfaceResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calendar_locator::{CalendarLocator, LocateOutcome};
use crate::config::{NavigationConfig, ReloadConfig, SurfaceProfile};
use crate::drift_detector::{DriftDetector, DriftVerdict, SelectionSignals};
use crate::reload_awaiter::ReloadAwaiter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStrategy {
    /// Click the neighbour of the currently selected day cell.
    RelativeDay,
    /// Click the next/previous week control.
    PagingControl,
    /// Scroll the day strip horizontally.
    StripScroll,
    /// Click the located target cell.
    DirectCell,
}

impl StepStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RelativeDay => "relative_day",
            Self::PagingControl => "paging_control",
            Self::StripScroll => "strip_scroll",
            Self::DirectCell => "direct_cell",
        }
    }

    fn changes_selection(self) -> bool {
        matches!(self, Self::RelativeDay | Self::DirectCell)
    }
}

/// Escalation order used while the target cell is not materialized.
pub const STEPPING_LADDER: [StepStrategy; 3] = [
    StepStrategy::RelativeDay,
    StepStrategy::PagingControl,
    StepStrategy::StripScroll,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationPhase {
    Start,
    Stepping,
    Reloading,
    Verifying,
    Converged,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    fn toward(current: Option<NaiveDate>, target: NaiveDate) -> Self {
        match current {
            Some(current) if current > target => Self::Backward,
            _ => Self::Forward,
        }
    }

    fn sign(self) -> i64 {
        match self {
            Self::Forward => 1,
            Self::Backward => -1,
        }
    }
}

/// Per-run bookkeeping for bounded retry and escalation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationAttemptCounter {
    pub steps: usize,
    pub relative_day: usize,
    pub paging_control: usize,
    pub strip_scroll: usize,
    pub direct_cell: usize,
    pub idle_steps: usize,
    pub reloads_observed: usize,
    pub drift_regressions: usize,
    pub escalation_level: usize,
    #[serde(skip)]
    ladder_index: usize,
    #[serde(skip)]
    tries_on_current: usize,
}

impl NavigationAttemptCounter {
    fn record(&mut self, strategy: StepStrategy) {
        let slot = match strategy {
            StepStrategy::RelativeDay => &mut self.relative_day,
            StepStrategy::PagingControl => &mut self.paging_control,
            StepStrategy::StripScroll => &mut self.strip_scroll,
            StepStrategy::DirectCell => &mut self.direct_cell,
        };
        *slot = slot.saturating_add(1);
    }

    /// Number of strategy interactions that actually reached the surface.
    pub fn stepping_attempts(&self) -> usize {
        self.relative_day + self.paging_control + self.strip_scroll + self.direct_cell
    }

    fn current_rung(&self) -> StepStrategy {
        STEPPING_LADDER[self.ladder_index % STEPPING_LADDER.len()]
    }

    fn escalate(&mut self) {
        self.tries_on_current = 0;
        self.ladder_index += 1;
        if self.ladder_index % STEPPING_LADDER.len() == 0 {
            self.escalation_level += 1;
        }
    }

    fn restart_ladder(&mut self) {
        self.tries_on_current = 0;
        self.ladder_index = 0;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationReport {
    pub target_date: NaiveDate,
    pub counter: NavigationAttemptCounter,
}

#[derive(Debug, Error)]
pub enum NavigationError {
    #[error(
        "navigation did not converge on {target_date} within {max_steps} steps (last verdict {last_verdict:?}, last strategy {last_strategy:?})"
    )]
    BudgetExhausted {
        target_date: NaiveDate,
        max_steps: usize,
        last_verdict: DriftVerdict,
        last_strategy: Option<StepStrategy>,
        counter: NavigationAttemptCounter,
    },
    #[error(transparent)]
    Surface(#[from] SurfaceError),
}

enum StepResult {
    Interacted,
    Unavailable,
}

/// Drives the surface's selected day toward the target and reports
/// `Converged` only once the drift detector confirms it.
pub struct NavigationController<'a, S: Surface + ?Sized> {
    surface: &'a S,
    profile: &'a SurfaceProfile,
    config: &'a NavigationConfig,
    reload: &'a ReloadConfig,
    today: NaiveDate,
}

impl<'a, S: Surface + ?Sized> NavigationController<'a, S> {
    pub fn new(
        surface: &'a S,
        profile: &'a SurfaceProfile,
        config: &'a NavigationConfig,
        reload: &'a ReloadConfig,
        today: NaiveDate,
    ) -> Self {
        Self {
            surface,
            profile,
            config,
            reload,
            today,
        }
    }

    pub async fn converge(&self, target: NaiveDate) -> Result<NavigationReport, NavigationError> {
        let detector = DriftDetector::new(self.surface, self.profile, self.today);
        let locator = CalendarLocator::new(self.surface, self.profile);
        let awaiter = ReloadAwaiter::new(self.surface, self.profile, self.reload);

        let mut counter = NavigationAttemptCounter::default();
        let mut phase = NavigationPhase::Start;
        let mut direction = Direction::Forward;
        let mut last_verdict = DriftVerdict::Unknown;
        let mut last_strategy: Option<StepStrategy> = None;
        let mut last_distance: Option<i64> = None;
        let mut left_default = false;

        loop {
            match phase {
                NavigationPhase::Start => {
                    let signals = detector.observe().await?;
                    last_verdict = signals.classify(target, self.today);
                    direction = Direction::toward(signals.best_date(), target);
                    last_distance = distance(&signals, target);
                    tracing::info!(
                        target_date = %target,
                        current = ?signals.best_date(),
                        verdict = last_verdict.as_str(),
                        direction = ?direction,
                        "navigation start"
                    );
                    phase = if last_verdict == DriftVerdict::Matched {
                        NavigationPhase::Converged
                    } else {
                        NavigationPhase::Stepping
                    };
                }
                NavigationPhase::Stepping => {
                    if counter.steps >= self.config.max_steps {
                        phase = NavigationPhase::Failed;
                        continue;
                    }
                    counter.steps += 1;
                    match self
                        .step(&locator, target, direction, &mut counter)
                        .await?
                    {
                        Some(strategy) => {
                            counter.record(strategy);
                            last_strategy = Some(strategy);
                            phase = NavigationPhase::Reloading;
                        }
                        None => {
                            counter.idle_steps += 1;
                            tracing::debug!(
                                step = counter.steps,
                                "no stepping control available; backing off"
                            );
                            tokio::time::sleep(self.config.backoff()).await;
                            phase = NavigationPhase::Verifying;
                        }
                    }
                }
                NavigationPhase::Reloading => {
                    let observation = match last_strategy {
                        Some(strategy) if strategy.changes_selection() => {
                            awaiter.await_reload().await?
                        }
                        _ => awaiter.await_reload_within(self.config.settle()).await?,
                    };
                    if observation.observed_reload {
                        counter.reloads_observed += 1;
                    }
                    tokio::time::sleep(self.config.settle()).await;
                    phase = NavigationPhase::Verifying;
                }
                NavigationPhase::Verifying => {
                    let signals = detector.observe().await?;
                    last_verdict = signals.classify(target, self.today);
                    let current = signals.best_date();
                    match last_verdict {
                        DriftVerdict::Matched => {
                            phase = NavigationPhase::Converged;
                        }
                        DriftVerdict::DefaultDrift => {
                            if left_default || last_strategy == Some(StepStrategy::DirectCell) {
                                counter.drift_regressions += 1;
                                tracing::warn!(
                                    target_date = %target,
                                    step = counter.steps,
                                    regressions = counter.drift_regressions,
                                    "selection snapped back to today; re-issuing navigation"
                                );
                                counter.restart_ladder();
                                left_default = false;
                            } else {
                                self.note_progress(&mut counter, None, last_distance);
                            }
                            direction = Direction::toward(Some(self.today), target);
                            last_distance = Some((target - self.today).num_days().abs());
                            phase = NavigationPhase::Stepping;
                        }
                        DriftVerdict::Unknown => {
                            if current.is_some_and(|date| date != self.today) {
                                left_default = true;
                            }
                            let now_distance = distance(&signals, target);
                            self.note_progress(&mut counter, now_distance, last_distance);
                            if now_distance.is_some() {
                                last_distance = now_distance;
                            }
                            direction = Direction::toward(current, target);
                            phase = NavigationPhase::Stepping;
                        }
                    }
                }
                NavigationPhase::Converged => {
                    tracing::info!(
                        target_date = %target,
                        steps = counter.steps,
                        drift_regressions = counter.drift_regressions,
                        "navigation converged"
                    );
                    return Ok(NavigationReport {
                        target_date: target,
                        counter,
                    });
                }
                NavigationPhase::Failed => {
                    tracing::error!(
                        target_date = %target,
                        steps = counter.steps,
                        last_verdict = last_verdict.as_str(),
                        "navigation budget exhausted"
                    );
                    return Err(NavigationError::BudgetExhausted {
                        target_date: target,
                        max_steps: self.config.max_steps,
                        last_verdict,
                        last_strategy,
                        counter,
                    });
                }
            }
        }
    }

    /// One stepping action. A materialized target cell is clicked directly;
    /// otherwise the ladder is walked from the current rung until one
    /// strategy reaches the surface.
    async fn step(
        &self,
        locator: &CalendarLocator<'_, S>,
        target: NaiveDate,
        direction: Direction,
        counter: &mut NavigationAttemptCounter,
    ) -> SurfaceResult<Option<StepStrategy>> {
        let located = locator.locate(target).await?;
        tracing::debug!(
            step = counter.steps,
            outcome = located.label(),
            "calendar locate"
        );
        if let LocateOutcome::Found(cell) = located {
            let cell = cell.into_element();
            if let StepResult::Interacted = self.click_with_fallback(&cell).await? {
                return Ok(Some(StepStrategy::DirectCell));
            }
        }

        for _ in 0..STEPPING_LADDER.len() {
            let strategy = counter.current_rung();
            match self.perform(strategy, direction, counter.escalation_level).await? {
                StepResult::Interacted => {
                    tracing::debug!(
                        step = counter.steps,
                        strategy = strategy.as_str(),
                        level = counter.escalation_level,
                        direction = ?direction,
                        "stepping interaction issued"
                    );
                    return Ok(Some(strategy));
                }
                StepResult::Unavailable => {
                    tracing::debug!(
                        strategy = strategy.as_str(),
                        "stepping strategy unavailable; escalating"
                    );
                    counter.escalate();
                }
            }
        }
        Ok(None)
    }

    async fn perform(
        &self,
        strategy: StepStrategy,
        direction: Direction,
        level: usize,
    ) -> SurfaceResult<StepResult> {
        match strategy {
            StepStrategy::RelativeDay => self.step_relative_day(direction).await,
            StepStrategy::PagingControl => self.step_paging(direction, level).await,
            StepStrategy::StripScroll => self.step_strip_scroll(direction, level).await,
            StepStrategy::DirectCell => Ok(StepResult::Unavailable),
        }
    }

    async fn step_relative_day(&self, direction: Direction) -> SurfaceResult<StepResult> {
        let cells = self
            .surface
            .query(None, &QuerySpec::selector(self.profile.day_cell.as_str()))
            .await?;
        let mut selected_index = None;
        for (index, cell) in cells.iter().enumerate() {
            let selected = recoverable(
                self.surface
                    .read_attribute(cell, self.profile.selected_attribute.as_str())
                    .await,
            )?
            .flatten();
            if selected.is_some_and(|value| value.trim().eq_ignore_ascii_case("true")) {
                selected_index = Some(index);
                break;
            }
        }
        let Some(selected_index) = selected_index else {
            return Ok(StepResult::Unavailable);
        };
        let neighbour = match direction {
            Direction::Forward => selected_index.checked_add(1),
            Direction::Backward => selected_index.checked_sub(1),
        };
        match neighbour.and_then(|index| cells.get(index)) {
            Some(cell) => self.click_with_fallback(cell).await,
            None => Ok(StepResult::Unavailable),
        }
    }

    async fn step_paging(&self, direction: Direction, level: usize) -> SurfaceResult<StepResult> {
        let selector = match direction {
            Direction::Forward => self.profile.page_next.as_str(),
            Direction::Backward => self.profile.page_prev.as_str(),
        };
        if selector.trim().is_empty() {
            return Ok(StepResult::Unavailable);
        }
        let mut clicked = false;
        for repeat in 0..=level {
            let Some(control) = self
                .surface
                .query_first(None, &QuerySpec::selector(selector))
                .await?
            else {
                break;
            };
            match self.click_with_fallback(&control).await? {
                StepResult::Interacted => clicked = true,
                StepResult::Unavailable => break,
            }
            if repeat < level {
                tokio::time::sleep(self.config.settle()).await;
            }
        }
        Ok(if clicked {
            StepResult::Interacted
        } else {
            StepResult::Unavailable
        })
    }

    async fn step_strip_scroll(
        &self,
        direction: Direction,
        level: usize,
    ) -> SurfaceResult<StepResult> {
        if self.profile.day_strip.trim().is_empty() {
            return Ok(StepResult::Unavailable);
        }
        let Some(strip) = self
            .surface
            .query_first(None, &QuerySpec::selector(self.profile.day_strip.as_str()))
            .await?
        else {
            return Ok(StepResult::Unavailable);
        };
        let multiplier = i64::try_from(level.saturating_add(1)).unwrap_or(i64::MAX);
        let dx = self
            .config
            .strip_scroll_px
            .saturating_mul(multiplier)
            .saturating_mul(direction.sign());
        match recoverable(self.surface.scroll(Some(&strip), dx, 0).await)? {
            Some(()) => Ok(StepResult::Interacted),
            None => Ok(StepResult::Unavailable),
        }
    }

    async fn click_with_fallback(&self, element: &ElementHandle) -> SurfaceResult<StepResult> {
        for mode in [ClickMode::Normal, ClickMode::Forced] {
            match self.surface.click(element, mode).await {
                Ok(()) => return Ok(StepResult::Interacted),
                Err(error) if error.is_recoverable() => {
                    tracing::debug!(
                        element = %element,
                        mode = mode.as_str(),
                        error = %error,
                        "navigation click rejected"
                    );
                }
                Err(error) => return Err(error),
            }
        }
        Ok(StepResult::Unavailable)
    }

    fn note_progress(
        &self,
        counter: &mut NavigationAttemptCounter,
        now_distance: Option<i64>,
        last_distance: Option<i64>,
    ) {
        let progressed = matches!(
            (now_distance, last_distance),
            (Some(now), Some(before)) if now < before
        ) || matches!((now_distance, last_distance), (Some(_), None));
        if progressed {
            counter.tries_on_current = 0;
            return;
        }
        counter.tries_on_current += 1;
        if counter.tries_on_current >= self.config.tries_per_strategy {
            tracing::debug!(
                strategy = counter.current_rung().as_str(),
                tries = counter.tries_on_current,
                "no progress; escalating stepping strategy"
            );
            counter.escalate();
        }
    }
}

fn distance(signals: &SelectionSignals, target: NaiveDate) -> Option<i64> {
    signals
        .best_date()
        .map(|current| (target - current).num_days().abs())
}

fn recoverable<T>(result: SurfaceResult<T>) -> SurfaceResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(error) if error.is_recoverable() => Ok(None),
        Err(error) => Err(error),
    }
}
