use std::collections::HashSet;

use aho_corasick::{AhoCorasick, BuildError};
use aloni_surface::{ElementHandle, QuerySpec, Surface, SurfaceError, SurfaceResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{BookingTargetConfig, MatchingConfig, SurfaceProfile};
use crate::drift_detector::{DriftDetector, DriftVerdict};

/// What a row must show to be the session we want.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPredicate {
    pub time: String,
    pub location: String,
    pub category: String,
}

impl SessionPredicate {
    pub fn new(
        time: impl Into<String>,
        location: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            time: time.into(),
            location: location.into(),
            category: category.into(),
        }
    }

    pub fn from_target(target: &BookingTargetConfig) -> Self {
        Self::new(
            target.time.as_str(),
            target.location.as_str(),
            target.category.as_str(),
        )
    }

    pub fn matches(&self, fields: &SessionFields) -> bool {
        time_matches(&fields.time, &self.time)
            && contains_ignore_case(&fields.location, &self.location)
            && contains_ignore_case(&fields.category, &self.category)
    }

    /// True when both rows describe the same session, ignoring status and CTA.
    pub fn same_session(left: &SessionFields, right: &SessionFields) -> bool {
        normalize_time(&left.time) == normalize_time(&right.time)
            && left.location.trim().eq_ignore_ascii_case(right.location.trim())
            && left.category.trim().eq_ignore_ascii_case(right.category.trim())
    }
}

impl std::fmt::Display for SessionPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} / {} / {}", self.time, self.location, self.category)
    }
}

fn normalize_time(raw: &str) -> String {
    raw.chars()
        .filter(|ch| !ch.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Start time must be equal after normalization; only a range suffix may
/// follow it. "6:15 pm" matches "6:15 PM - 7:05 PM" but not "6:15 am".
fn time_matches(row_time: &str, wanted: &str) -> bool {
    let row_time = normalize_time(row_time);
    let wanted = normalize_time(wanted);
    if wanted.is_empty() {
        return false;
    }
    match row_time.strip_prefix(wanted.as_str()) {
        Some(rest) => rest.is_empty() || rest.starts_with(['-', '\u{2013}', '\u{2014}']),
        None => false,
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    let needle = needle.trim().to_lowercase();
    !needle.is_empty() && haystack.to_lowercase().contains(&needle)
}

/// Text fields read from one result row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionFields {
    pub time: String,
    pub location: String,
    pub category: String,
    pub status: String,
    pub cta: String,
}

/// A row that matched the predicate and carries no disqualifying status.
/// Not `Clone`: the committer re-reads rows instead of trusting a copy.
#[derive(Debug, PartialEq, Eq)]
pub struct SessionRow {
    handle: ElementHandle,
    fields: SessionFields,
}

impl SessionRow {
    pub fn handle(&self) -> &ElementHandle {
        &self.handle
    }

    pub fn fields(&self) -> &SessionFields {
        &self.fields
    }
}

/// Case-insensitive multi-term scan over row status text.
#[derive(Debug, Clone)]
pub struct DisqualifyingTerms {
    terms: Vec<String>,
    matcher: Option<AhoCorasick>,
}

impl DisqualifyingTerms {
    pub fn new(terms: &[String]) -> Result<Self, BuildError> {
        let terms: Vec<String> = terms
            .iter()
            .map(|term| term.trim().to_string())
            .filter(|term| !term.is_empty())
            .collect();
        let matcher = if terms.is_empty() {
            None
        } else {
            Some(
                AhoCorasick::builder()
                    .ascii_case_insensitive(true)
                    .build(&terms)?,
            )
        };
        Ok(Self { terms, matcher })
    }

    /// First disqualifying term found in `status`, if any.
    pub fn find(&self, status: &str) -> Option<&str> {
        let matcher = self.matcher.as_ref()?;
        let found = matcher.find(status)?;
        self.terms
            .get(found.pattern().as_usize())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchStats {
    pub passes: usize,
    pub scrolls: usize,
    pub rows_scanned: usize,
    pub disqualified: usize,
}

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("no bookable row for {predicate} after {passes} passes ({disqualified} disqualified)")]
    NotFound {
        predicate: String,
        passes: usize,
        disqualified: usize,
    },
    #[error("{count} bookable rows match {predicate}; refusing to guess")]
    AmbiguousMatch { predicate: String, count: usize },
    #[error("selection drifted ({verdict:?}) while scanning rows")]
    Drifted { verdict: DriftVerdict },
    #[error(transparent)]
    Surface(#[from] SurfaceError),
}

#[derive(Debug)]
pub struct MatchedSession {
    pub row: SessionRow,
    pub stats: MatchStats,
}

/// Reads one row's fields. Missing sub-elements read as empty strings.
pub async fn read_session_fields<S: Surface + ?Sized>(
    surface: &S,
    profile: &SurfaceProfile,
    row: &ElementHandle,
) -> SurfaceResult<SessionFields> {
    let mut fields = SessionFields::default();
    for (slot, selector) in [
        (&mut fields.time, profile.row_time.as_str()),
        (&mut fields.location, profile.row_location.as_str()),
        (&mut fields.category, profile.row_category.as_str()),
        (&mut fields.status, profile.row_status.as_str()),
        (&mut fields.cta, profile.row_cta.as_str()),
    ] {
        if selector.trim().is_empty() {
            continue;
        }
        if let Some(text) = surface
            .query_text(Some(row), &QuerySpec::selector(selector))
            .await?
        {
            *slot = text;
        }
    }
    Ok(fields)
}

/// Current row handles, scoped to the result list when it is rendered.
pub async fn query_rows<S: Surface + ?Sized>(
    surface: &S,
    profile: &SurfaceProfile,
) -> SurfaceResult<Vec<ElementHandle>> {
    let list = surface
        .query_first(None, &QuerySpec::selector(profile.result_list.as_str()))
        .await?;
    surface
        .query(list.as_ref(), &QuerySpec::selector(profile.row.as_str()))
        .await
}

pub struct SessionMatcher<'a, S: Surface + ?Sized> {
    surface: &'a S,
    profile: &'a SurfaceProfile,
    config: &'a MatchingConfig,
    terms: &'a DisqualifyingTerms,
    today: NaiveDate,
}

impl<'a, S: Surface + ?Sized> SessionMatcher<'a, S> {
    pub fn new(
        surface: &'a S,
        profile: &'a SurfaceProfile,
        config: &'a MatchingConfig,
        terms: &'a DisqualifyingTerms,
        today: NaiveDate,
    ) -> Self {
        Self {
            surface,
            profile,
            config,
            terms,
            today,
        }
    }

    pub async fn find_match(
        &self,
        target: NaiveDate,
        predicate: &SessionPredicate,
    ) -> Result<MatchedSession, MatchError> {
        let detector = DriftDetector::new(self.surface, self.profile, self.today);
        let mut stats = MatchStats::default();
        let mut disqualified: HashSet<SessionFields> = HashSet::new();

        loop {
            stats.passes += 1;
            let verdict = detector.check(target).await?;
            if verdict != DriftVerdict::Matched {
                tracing::warn!(
                    target_date = %target,
                    pass = stats.passes,
                    verdict = verdict.as_str(),
                    "selection drifted during row scan"
                );
                return Err(MatchError::Drifted { verdict });
            }

            let mut candidates = Vec::new();
            for handle in query_rows(self.surface, self.profile).await? {
                let fields = match read_session_fields(self.surface, self.profile, &handle).await
                {
                    Ok(fields) => fields,
                    Err(error) if error.is_recoverable() => {
                        tracing::debug!(row = %handle, error = %error, "row re-rendered mid-read");
                        continue;
                    }
                    Err(error) => return Err(error.into()),
                };
                stats.rows_scanned += 1;
                if !predicate.matches(&fields) {
                    continue;
                }
                if let Some(term) = self.terms.find(&fields.status) {
                    tracing::debug!(
                        row = %handle,
                        status = fields.status.as_str(),
                        term,
                        "matching row is disqualified"
                    );
                    disqualified.insert(fields);
                    continue;
                }
                candidates.push(SessionRow { handle, fields });
            }
            stats.disqualified = disqualified.len();

            // Rows read while the selection snapped back describe the wrong day.
            let verdict = detector.check(target).await?;
            if verdict != DriftVerdict::Matched {
                tracing::warn!(
                    target_date = %target,
                    pass = stats.passes,
                    verdict = verdict.as_str(),
                    "selection drifted while rows were read; discarding the scan"
                );
                return Err(MatchError::Drifted { verdict });
            }

            if candidates.len() > 1 {
                return Err(MatchError::AmbiguousMatch {
                    predicate: predicate.to_string(),
                    count: candidates.len(),
                });
            }
            if let Some(row) = candidates.pop() {
                tracing::info!(
                    target_date = %target,
                    row = %row.handle,
                    passes = stats.passes,
                    "matched bookable session"
                );
                return Ok(MatchedSession { row, stats });
            }

            if stats.scrolls >= self.config.max_scroll_attempts {
                return Err(MatchError::NotFound {
                    predicate: predicate.to_string(),
                    passes: stats.passes,
                    disqualified: stats.disqualified,
                });
            }
            self.scroll_list().await?;
            stats.scrolls += 1;
            tokio::time::sleep(self.config.settle()).await;
        }
    }

    async fn scroll_list(&self) -> SurfaceResult<()> {
        let container = if self.profile.list_scroll_container.trim().is_empty() {
            None
        } else {
            self.surface
                .query_first(
                    None,
                    &QuerySpec::selector(self.profile.list_scroll_container.as_str()),
                )
                .await?
        };
        match self
            .surface
            .scroll(container.as_ref(), 0, self.config.scroll_step_px)
            .await
        {
            Err(error) if error.is_recoverable() && container.is_some() => {
                self.surface.scroll(None, 0, self.config.scroll_step_px).await
            }
            other => other,
        }
    }
}
