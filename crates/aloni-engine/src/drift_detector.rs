use aloni_surface::{ElementHandle, QuerySpec, Surface, SurfaceError, SurfaceResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::SurfaceProfile;
use crate::date_text::parse_date_text;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftVerdict {
    /// At least one selection signal names the target date.
    Matched,
    /// The surface snapped back to its default "today" selection.
    DefaultDrift,
    /// Not converged; never treated as success.
    Unknown,
}

impl DriftVerdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Matched => "matched",
            Self::DefaultDrift => "default_drift",
            Self::Unknown => "unknown",
        }
    }
}

/// Independent readings of "which day is selected", in priority order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionSignals {
    pub heading: Option<NaiveDate>,
    pub selected_cell: Option<NaiveDate>,
    pub sticky_indicator: Option<NaiveDate>,
    pub today_selected: bool,
}

impl SelectionSignals {
    /// Highest-priority date reading, if any signal produced one.
    pub fn best_date(&self) -> Option<NaiveDate> {
        self.heading.or(self.selected_cell).or(self.sticky_indicator)
    }

    pub fn classify(&self, target: NaiveDate, today: NaiveDate) -> DriftVerdict {
        if self.today_selected && target != today {
            return DriftVerdict::DefaultDrift;
        }
        let agrees = [self.heading, self.selected_cell, self.sticky_indicator]
            .into_iter()
            .any(|signal| signal == Some(target));
        if agrees {
            DriftVerdict::Matched
        } else {
            DriftVerdict::Unknown
        }
    }
}

pub struct DriftDetector<'a, S: Surface + ?Sized> {
    surface: &'a S,
    profile: &'a SurfaceProfile,
    today: NaiveDate,
}

impl<'a, S: Surface + ?Sized> DriftDetector<'a, S> {
    pub fn new(surface: &'a S, profile: &'a SurfaceProfile, today: NaiveDate) -> Self {
        Self {
            surface,
            profile,
            today,
        }
    }

    pub async fn check(&self, target: NaiveDate) -> SurfaceResult<DriftVerdict> {
        let signals = self.observe().await?;
        let verdict = signals.classify(target, self.today);
        tracing::debug!(
            target_date = %target,
            verdict = verdict.as_str(),
            heading = ?signals.heading,
            selected_cell = ?signals.selected_cell,
            sticky_indicator = ?signals.sticky_indicator,
            today_selected = signals.today_selected,
            "drift check"
        );
        Ok(verdict)
    }

    pub async fn observe(&self) -> SurfaceResult<SelectionSignals> {
        let heading = absorb(self.text_signal(self.profile.heading.as_str()).await)?;
        let selected_cell = absorb(self.selected_cell_signal().await)?;
        let sticky_indicator =
            absorb(self.text_signal(self.profile.sticky_day_indicator.as_str()).await)?;
        let today_marker_selected = absorb(self.today_marker_selected().await)?.unwrap_or(false);
        Ok(SelectionSignals {
            heading,
            selected_cell,
            sticky_indicator,
            today_selected: today_marker_selected || selected_cell == Some(self.today),
        })
    }

    async fn text_signal(&self, selector: &str) -> SurfaceResult<Option<NaiveDate>> {
        if selector.trim().is_empty() {
            return Ok(None);
        }
        let text = self
            .surface
            .query_text(None, &QuerySpec::selector(selector))
            .await?;
        Ok(text.and_then(|text| parse_date_text(&text, self.today)))
    }

    async fn selected_cell_signal(&self) -> SurfaceResult<Option<NaiveDate>> {
        let spec = QuerySpec::selector(self.profile.selected_marker.as_str());
        let Some(cell) = self.surface.query_first(None, &spec).await? else {
            return Ok(None);
        };
        self.read_cell_date(&cell).await
    }

    async fn read_cell_date(&self, cell: &ElementHandle) -> SurfaceResult<Option<NaiveDate>> {
        for attribute in [
            self.profile.date_attribute.as_str(),
            self.profile.label_attribute.as_str(),
        ] {
            if let Some(value) = self.surface.read_attribute(cell, attribute).await? {
                if let Some(date) = parse_date_text(&value, self.today) {
                    return Ok(Some(date));
                }
            }
        }
        let text = self.surface.read_text(cell).await?;
        Ok(parse_date_text(&text, self.today))
    }

    async fn today_marker_selected(&self) -> SurfaceResult<Option<bool>> {
        if self.profile.today_marker.trim().is_empty() {
            return Ok(None);
        }
        let spec = QuerySpec::selector(self.profile.today_marker.as_str());
        let Some(marker) = self.surface.query_first(None, &spec).await? else {
            return Ok(None);
        };
        let selected = self
            .surface
            .read_attribute(&marker, self.profile.selected_attribute.as_str())
            .await?;
        Ok(Some(
            selected.is_some_and(|value| value.trim().eq_ignore_ascii_case("true")),
        ))
    }
}

/// A signal whose element re-rendered mid-read is simply absent this round.
fn absorb<T>(result: SurfaceResult<Option<T>>) -> Result<Option<T>, SurfaceError> {
    match result {
        Ok(value) => Ok(value),
        Err(error) if error.is_recoverable() => Ok(None),
        Err(error) => Err(error),
    }
}
