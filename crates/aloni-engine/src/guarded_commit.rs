use aloni_surface::{
    wait_for, ClickMode, ElementHandle, QuerySpec, Surface, SurfaceResult, WaitOutcome,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{CommitConfig, SurfaceProfile};
use crate::drift_detector::{DriftDetector, DriftVerdict};
use crate::session_matcher::{
    query_rows, read_session_fields, DisqualifyingTerms, SessionFields, SessionPredicate,
    SessionRow,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitRung {
    Plain,
    Forced,
    InnerText,
    PointerAtCenter,
    SyntheticEvents,
}

impl CommitRung {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Forced => "forced",
            Self::InnerText => "inner_text",
            Self::PointerAtCenter => "pointer_at_center",
            Self::SyntheticEvents => "synthetic_events",
        }
    }
}

pub const COMMIT_LADDER: [CommitRung; 5] = [
    CommitRung::Plain,
    CommitRung::Forced,
    CommitRung::InnerText,
    CommitRung::PointerAtCenter,
    CommitRung::SyntheticEvents,
];

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GuardFailure {
    #[error("selection is not on the target date ({verdict:?})")]
    Drifted { verdict: DriftVerdict },
    #[error("matched row is no longer rendered")]
    RowMissing,
    #[error("{count} rendered rows describe the matched session")]
    RowAmbiguous { count: usize },
    #[error("row status now contains disqualifying term '{term}'")]
    Disqualified { term: String },
    #[error("row call-to-action reads '{cta}' instead of the commit token")]
    TokenMismatch { cta: String },
}

#[derive(Debug, PartialEq, Eq)]
pub enum CommitGuardResult {
    /// Fresh handle to the row that passed every check.
    Passed(ElementHandle),
    Failed(GuardFailure),
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommitFailure {
    #[error("surface offered a destructive confirmation; kept the existing state")]
    DestructiveDialog,
    #[error("row changed between commit attempts (call-to-action now '{cta}')")]
    StateChanged { cta: String },
    #[error("selection left the target date between commit attempts ({verdict:?})")]
    SelectionDrifted { verdict: DriftVerdict },
    #[error("no confirmation after {rungs} commit attempts")]
    NoConfirmation { rungs: usize },
    #[error("a commit was already attempted in this run")]
    AlreadyAttempted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommitOutcome {
    Success { rung: CommitRung },
    GuardFailed { failure: GuardFailure },
    CommitFailed { failure: CommitFailure },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CommitSignal {
    /// A success indicator that was not on screen before the first rung.
    Success(ElementHandle),
    DestructiveDialog,
}

/// Issues the irreversible action at most once per run, and only after a
/// fresh re-read of the row and the selection still agrees with the match.
pub struct GuardedCommitter<'a, S: Surface + ?Sized> {
    surface: &'a S,
    profile: &'a SurfaceProfile,
    config: &'a CommitConfig,
    terms: &'a DisqualifyingTerms,
    commit_token: &'a str,
    today: NaiveDate,
    attempted: bool,
    guard_checks: usize,
}

impl<'a, S: Surface + ?Sized> GuardedCommitter<'a, S> {
    pub fn new(
        surface: &'a S,
        profile: &'a SurfaceProfile,
        config: &'a CommitConfig,
        terms: &'a DisqualifyingTerms,
        commit_token: &'a str,
        today: NaiveDate,
    ) -> Self {
        Self {
            surface,
            profile,
            config,
            terms,
            commit_token,
            today,
            attempted: false,
            guard_checks: 0,
        }
    }

    pub fn guard_checks(&self) -> usize {
        self.guard_checks
    }

    pub fn attempted(&self) -> bool {
        self.attempted
    }

    /// Re-validates the matched session against a fresh read of the surface.
    pub async fn guard(
        &mut self,
        target: NaiveDate,
        expected: &SessionFields,
    ) -> SurfaceResult<CommitGuardResult> {
        self.guard_checks += 1;
        let verdict = DriftDetector::new(self.surface, self.profile, self.today)
            .check(target)
            .await?;
        if verdict != DriftVerdict::Matched {
            return Ok(CommitGuardResult::Failed(GuardFailure::Drifted { verdict }));
        }

        let (handle, fields) = match self.fresh_row(expected).await? {
            Ok(found) => found,
            Err(failure) => return Ok(CommitGuardResult::Failed(failure)),
        };
        if let Some(term) = self.terms.find(&fields.status) {
            return Ok(CommitGuardResult::Failed(GuardFailure::Disqualified {
                term: term.to_string(),
            }));
        }
        if !self.is_commit_token(&fields.cta) {
            return Ok(CommitGuardResult::Failed(GuardFailure::TokenMismatch {
                cta: fields.cta,
            }));
        }
        Ok(CommitGuardResult::Passed(handle))
    }

    pub async fn commit(
        &mut self,
        target: NaiveDate,
        row: SessionRow,
    ) -> SurfaceResult<CommitOutcome> {
        if self.attempted {
            return Ok(CommitOutcome::CommitFailed {
                failure: CommitFailure::AlreadyAttempted,
            });
        }
        let expected = row.fields().clone();
        let mut row_handle = match self.guard(target, &expected).await? {
            CommitGuardResult::Passed(handle) => handle,
            CommitGuardResult::Failed(failure) => {
                tracing::warn!(
                    target_date = %target,
                    failure = %failure,
                    "commit guard rejected the matched row"
                );
                return Ok(CommitOutcome::GuardFailed { failure });
            }
        };
        self.attempted = true;
        let stale_success = self.visible_success_indicators().await?;
        if !stale_success.is_empty() {
            tracing::warn!(
                count = stale_success.len(),
                "success indicator already on screen before commit; ignoring it"
            );
        }

        for (index, rung) in COMMIT_LADDER.into_iter().enumerate() {
            if index > 0 {
                if self.destructive_dialog_visible().await? {
                    return self.refuse_destructive(target, rung).await;
                }
                let verdict = DriftDetector::new(self.surface, self.profile, self.today)
                    .check(target)
                    .await?;
                if verdict != DriftVerdict::Matched {
                    tracing::error!(
                        verdict = verdict.as_str(),
                        "selection drifted mid-commit; stopping"
                    );
                    return self
                        .stop(target, rung, CommitFailure::SelectionDrifted { verdict })
                        .await;
                }
                match self.fresh_row(&expected).await? {
                    Ok((handle, fields)) if self.is_commit_token(&fields.cta) => {
                        row_handle = handle;
                    }
                    Ok((_, fields)) => {
                        tracing::error!(
                            cta = fields.cta.as_str(),
                            "row state changed mid-commit; stopping"
                        );
                        return self
                            .stop(target, rung, CommitFailure::StateChanged { cta: fields.cta })
                            .await;
                    }
                    Err(failure) => {
                        tracing::warn!(failure = %failure, "row vanished between commit attempts");
                        return self
                            .stop(
                                target,
                                rung,
                                CommitFailure::StateChanged { cta: String::new() },
                            )
                            .await;
                    }
                }
            }

            if !self.issue_rung(&row_handle, rung).await? {
                continue;
            }
            match self.await_signal(&stale_success).await? {
                Some(CommitSignal::DestructiveDialog) => {
                    return self.refuse_destructive(target, rung).await;
                }
                Some(CommitSignal::Success(indicator)) => {
                    tracing::info!(target_date = %target, rung = rung.as_str(), "commit confirmed");
                    if self.config.dismiss_success {
                        self.click_handle(&indicator).await?;
                    }
                    return Ok(CommitOutcome::Success { rung });
                }
                None => {
                    tracing::debug!(rung = rung.as_str(), "no commit confirmation yet");
                }
            }
        }

        self.stop(
            target,
            CommitRung::SyntheticEvents,
            CommitFailure::NoConfirmation {
                rungs: COMMIT_LADDER.len(),
            },
        )
        .await
    }

    /// Ends the ladder with `failure`, unless a destructive dialog is open,
    /// which is always answered first.
    async fn stop(
        &self,
        target: NaiveDate,
        rung: CommitRung,
        failure: CommitFailure,
    ) -> SurfaceResult<CommitOutcome> {
        if self.destructive_dialog_visible().await? {
            return self.refuse_destructive(target, rung).await;
        }
        Ok(CommitOutcome::CommitFailed { failure })
    }

    async fn refuse_destructive(
        &self,
        target: NaiveDate,
        rung: CommitRung,
    ) -> SurfaceResult<CommitOutcome> {
        tracing::error!(
            target_date = %target,
            rung = rung.as_str(),
            "destructive confirmation appeared; choosing the non-destructive option"
        );
        self.keep_existing_state().await?;
        Ok(CommitOutcome::CommitFailed {
            failure: CommitFailure::DestructiveDialog,
        })
    }

    fn is_commit_token(&self, cta: &str) -> bool {
        cta.trim().eq_ignore_ascii_case(self.commit_token.trim())
    }

    async fn fresh_row(
        &self,
        expected: &SessionFields,
    ) -> SurfaceResult<Result<(ElementHandle, SessionFields), GuardFailure>> {
        let mut same = Vec::new();
        for handle in query_rows(self.surface, self.profile).await? {
            match read_session_fields(self.surface, self.profile, &handle).await {
                Ok(fields) if SessionPredicate::same_session(expected, &fields) => {
                    same.push((handle, fields));
                }
                Ok(_) => {}
                Err(error) if error.is_recoverable() => {}
                Err(error) => return Err(error),
            }
        }
        Ok(match same.len() {
            0 => Err(GuardFailure::RowMissing),
            1 => same.pop().ok_or(GuardFailure::RowMissing),
            count => Err(GuardFailure::RowAmbiguous { count }),
        })
    }

    /// Returns false when the rung could not reach the element at all.
    async fn issue_rung(&self, row: &ElementHandle, rung: CommitRung) -> SurfaceResult<bool> {
        let Some(cta) = self
            .surface
            .query_first(Some(row), &QuerySpec::selector(self.profile.row_cta.as_str()))
            .await?
        else {
            return Ok(false);
        };
        let (element, mode) = match rung {
            CommitRung::Plain => (cta, ClickMode::Normal),
            CommitRung::Forced => (cta, ClickMode::Forced),
            CommitRung::InnerText => {
                let inner = if self.profile.cta_text.trim().is_empty() {
                    None
                } else {
                    self.surface
                        .query_first(
                            Some(&cta),
                            &QuerySpec::selector(self.profile.cta_text.as_str()),
                        )
                        .await?
                };
                match inner {
                    Some(inner) => (inner, ClickMode::Normal),
                    None => {
                        tracing::debug!("call-to-action has no inner text element");
                        return Ok(false);
                    }
                }
            }
            CommitRung::PointerAtCenter => (cta, ClickMode::PointerAtCenter),
            CommitRung::SyntheticEvents => (cta, ClickMode::SyntheticEvents),
        };
        match self.surface.click(&element, mode).await {
            Ok(()) => Ok(true),
            Err(error) if error.is_recoverable() => {
                tracing::debug!(
                    rung = rung.as_str(),
                    error = %error,
                    "commit rung could not click"
                );
                Ok(false)
            }
            Err(error) => Err(error),
        }
    }

    async fn await_signal(
        &self,
        stale_success: &[ElementHandle],
    ) -> SurfaceResult<Option<CommitSignal>> {
        let this = self;
        let outcome = wait_for(
            self.config.confirmation_timeout(),
            self.config.poll_interval(),
            move || async move {
                this.commit_signal(stale_success)
                    .await
                    .map(|signal| signal.is_some())
            },
        )
        .await?;
        match outcome {
            WaitOutcome::Settled => self.commit_signal(stale_success).await,
            WaitOutcome::TimedOut => Ok(None),
        }
    }

    /// The destructive dialog outranks any success indicator shown with it.
    async fn commit_signal(
        &self,
        stale_success: &[ElementHandle],
    ) -> SurfaceResult<Option<CommitSignal>> {
        if self.destructive_dialog_visible().await? {
            return Ok(Some(CommitSignal::DestructiveDialog));
        }
        Ok(self
            .visible_success_indicators()
            .await?
            .into_iter()
            .find(|indicator| !stale_success.contains(indicator))
            .map(CommitSignal::Success))
    }

    async fn destructive_dialog_visible(&self) -> SurfaceResult<bool> {
        if self.profile.destructive_dialog.trim().is_empty() {
            return Ok(false);
        }
        let dialogs = self
            .surface
            .query(None, &QuerySpec::selector(self.profile.destructive_dialog.as_str()))
            .await?;
        for dialog in dialogs {
            if self.is_visible(&dialog).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn visible_success_indicators(&self) -> SurfaceResult<Vec<ElementHandle>> {
        let mut visible = Vec::new();
        for indicator in self
            .surface
            .query(None, &QuerySpec::selector(self.profile.success_indicator.as_str()))
            .await?
        {
            if self.is_visible(&indicator).await? {
                visible.push(indicator);
            }
        }
        Ok(visible)
    }

    async fn is_visible(&self, element: &ElementHandle) -> SurfaceResult<bool> {
        match self.surface.is_visible(element).await {
            Ok(visible) => Ok(visible),
            Err(error) if error.is_recoverable() => Ok(false),
            Err(error) => Err(error),
        }
    }

    async fn keep_existing_state(&self) -> SurfaceResult<()> {
        self.click_first(&self.profile.dialog_keep_option).await
    }

    async fn click_first(&self, selector: &str) -> SurfaceResult<()> {
        if selector.trim().is_empty() {
            return Ok(());
        }
        let Some(element) = self
            .surface
            .query_first(None, &QuerySpec::selector(selector))
            .await?
        else {
            return Ok(());
        };
        self.click_handle(&element).await
    }

    async fn click_handle(&self, element: &ElementHandle) -> SurfaceResult<()> {
        match self.surface.click(element, ClickMode::Normal).await {
            Err(error) if error.is_recoverable() => {
                tracing::debug!(element = %element, error = %error, "dismiss click rejected");
                Ok(())
            }
            other => other,
        }
    }
}
