use aloni_surface::{ElementHandle, QuerySpec, Surface, SurfaceResult};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::config::SurfaceProfile;
use crate::date_text::{cell_text_matches_date, label_matches_date, label_tokens};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocateStrategy {
    StructuralAttribute,
    AccessibleLabel,
    CellHeuristic,
}

impl LocateStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StructuralAttribute => "structural_attribute",
            Self::AccessibleLabel => "accessible_label",
            Self::CellHeuristic => "cell_heuristic",
        }
    }
}

/// Strategies in priority order.
pub const LOCATE_STRATEGIES: [LocateStrategy; 3] = [
    LocateStrategy::StructuralAttribute,
    LocateStrategy::AccessibleLabel,
    LocateStrategy::CellHeuristic,
];

/// Located day cell. Deliberately not `Clone`: it is consumed by the click
/// that uses it and must be re-acquired after any navigation or reload.
#[derive(Debug, PartialEq, Eq)]
pub struct DayCellHandle {
    handle: ElementHandle,
    strategy: LocateStrategy,
}

impl DayCellHandle {
    pub fn strategy(&self) -> LocateStrategy {
        self.strategy
    }

    pub fn into_element(self) -> ElementHandle {
        self.handle
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum LocateOutcome {
    Found(DayCellHandle),
    /// Day cells are rendered but none of them is the target.
    NotVisible,
    /// No day cell is rendered at all.
    NotFound,
}

impl LocateOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Found(_) => "found",
            Self::NotVisible => "not_visible",
            Self::NotFound => "not_found",
        }
    }
}

pub struct CalendarLocator<'a, S: Surface + ?Sized> {
    surface: &'a S,
    profile: &'a SurfaceProfile,
}

impl<'a, S: Surface + ?Sized> CalendarLocator<'a, S> {
    pub fn new(surface: &'a S, profile: &'a SurfaceProfile) -> Self {
        Self { surface, profile }
    }

    pub async fn locate(&self, target: NaiveDate) -> SurfaceResult<LocateOutcome> {
        for strategy in LOCATE_STRATEGIES {
            match self.try_strategy(strategy, target).await {
                Ok(Some(handle)) => {
                    tracing::debug!(
                        target_date = %target,
                        strategy = strategy.as_str(),
                        "located target day cell"
                    );
                    return Ok(LocateOutcome::Found(DayCellHandle { handle, strategy }));
                }
                Ok(None) => {}
                Err(error) if error.is_recoverable() => {
                    tracing::debug!(
                        strategy = strategy.as_str(),
                        error = %error,
                        "day cell strategy hit a re-rendering surface"
                    );
                }
                Err(error) => return Err(error),
            }
        }

        let rendered = self
            .surface
            .query(None, &QuerySpec::selector(self.profile.day_cell.as_str()))
            .await?;
        if rendered.is_empty() {
            Ok(LocateOutcome::NotFound)
        } else {
            Ok(LocateOutcome::NotVisible)
        }
    }

    async fn try_strategy(
        &self,
        strategy: LocateStrategy,
        target: NaiveDate,
    ) -> SurfaceResult<Option<ElementHandle>> {
        let profile = self.profile;
        match strategy {
            LocateStrategy::StructuralAttribute => {
                let spec = QuerySpec::attribute(
                    profile.day_cell.as_str(),
                    profile.date_attribute.as_str(),
                    target.format("%Y-%m-%d").to_string(),
                );
                self.surface.query_first(None, &spec).await
            }
            LocateStrategy::AccessibleLabel => {
                let spec = QuerySpec::label(
                    profile.day_cell.as_str(),
                    profile.label_attribute.as_str(),
                    label_tokens(target),
                );
                for candidate in self.surface.query(None, &spec).await? {
                    let label = self
                        .surface
                        .read_attribute(&candidate, profile.label_attribute.as_str())
                        .await?;
                    if label.is_some_and(|label| label_matches_date(&label, target)) {
                        return Ok(Some(candidate));
                    }
                }
                Ok(None)
            }
            LocateStrategy::CellHeuristic => {
                // Narrowed by day number on the surface, then checked here.
                let spec = QuerySpec::text(profile.day_cell.as_str(), target.day().to_string());
                for candidate in self.surface.query(None, &spec).await? {
                    let text = self.surface.read_text(&candidate).await?;
                    let label = self
                        .surface
                        .read_attribute(&candidate, profile.label_attribute.as_str())
                        .await?;
                    if cell_text_matches_date(&text, label.as_deref(), target) {
                        return Ok(Some(candidate));
                    }
                }
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{CalendarLocator, LocateOutcome, LocateStrategy};
    use crate::config::SurfaceProfile;
    use crate::test_support::StaticSurface;

    fn target() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 11, 11).expect("date")
    }

    #[tokio::test]
    async fn unit_structural_attribute_wins_over_later_strategies() {
        let profile = SurfaceProfile::default();
        let surface = StaticSurface::default();
        surface.add(
            &profile.day_cell,
            "by-label",
            "W 11",
            &[("aria-label", "Wednesday, November 11, 2026")],
        );
        surface.add(
            &profile.day_cell,
            "by-attribute",
            "W 11",
            &[("data-date", "2026-11-11")],
        );

        let outcome = CalendarLocator::new(&surface, &profile)
            .locate(target())
            .await
            .expect("locate");
        let LocateOutcome::Found(cell) = outcome else {
            panic!("expected found, got {outcome:?}");
        };
        assert_eq!(cell.strategy(), LocateStrategy::StructuralAttribute);
        assert_eq!(cell.into_element().id(), "by-attribute");
    }

    #[tokio::test]
    async fn functional_label_strategy_rejects_substring_day_collisions() {
        let profile = SurfaceProfile::default();
        let surface = StaticSurface::default();
        let early = NaiveDate::from_ymd_opt(2026, 11, 1).expect("date");
        surface.add(
            &profile.day_cell,
            "nov-15",
            "",
            &[("aria-label", "Sunday, November 15, 2026")],
        );
        surface.add(
            &profile.day_cell,
            "nov-1",
            "",
            &[("aria-label", "Sunday, November 1, 2026")],
        );

        let outcome = CalendarLocator::new(&surface, &profile)
            .locate(early)
            .await
            .expect("locate");
        let LocateOutcome::Found(cell) = outcome else {
            panic!("expected found, got {outcome:?}");
        };
        assert_eq!(cell.strategy(), LocateStrategy::AccessibleLabel);
        assert_eq!(cell.into_element().id(), "nov-1");
    }

    #[tokio::test]
    async fn regression_heuristic_ignores_neighbouring_month_with_same_day() {
        let profile = SurfaceProfile::default();
        let surface = StaticSurface::default();
        surface.add(
            &profile.day_cell,
            "dec-11",
            "W 11",
            &[("aria-label", "December 11")],
        );
        surface.add(
            &profile.day_cell,
            "oct-11",
            "W 11",
            &[("aria-label", "October 11")],
        );
        surface.add(&profile.day_cell, "nov-11", "W 11", &[]);

        let outcome = CalendarLocator::new(&surface, &profile)
            .locate(target())
            .await
            .expect("locate");
        let LocateOutcome::Found(cell) = outcome else {
            panic!("expected found, got {outcome:?}");
        };
        assert_eq!(cell.strategy(), LocateStrategy::CellHeuristic);
        assert_eq!(cell.into_element().id(), "nov-11");
    }

    #[tokio::test]
    async fn regression_heuristic_reads_only_cells_showing_the_target_day() {
        let profile = SurfaceProfile::default();
        let surface = StaticSurface::default();
        surface.add(&profile.day_cell, "nov-9", "M 9", &[]);
        surface.add(&profile.day_cell, "nov-10", "T 10", &[]);
        surface.add(&profile.day_cell, "nov-11", "W 11", &[]);
        surface.add(&profile.day_cell, "nov-12", "T 12", &[]);

        let outcome = CalendarLocator::new(&surface, &profile)
            .locate(target())
            .await
            .expect("locate");
        let LocateOutcome::Found(cell) = outcome else {
            panic!("expected found, got {outcome:?}");
        };
        assert_eq!(cell.strategy(), LocateStrategy::CellHeuristic);
        assert_eq!(cell.into_element().id(), "nov-11");
        assert_eq!(surface.text_reads(), vec!["nov-11".to_string()]);
    }

    #[tokio::test]
    async fn unit_not_visible_is_distinct_from_not_found() {
        let profile = SurfaceProfile::default();
        let surface = StaticSurface::default();
        let locator = CalendarLocator::new(&surface, &profile);
        assert_eq!(
            locator.locate(target()).await.expect("locate"),
            LocateOutcome::NotFound
        );

        surface.add(
            &profile.day_cell,
            "oct-20",
            "T 20",
            &[("data-date", "2026-10-20")],
        );
        assert_eq!(
            locator.locate(target()).await.expect("locate"),
            LocateOutcome::NotVisible
        );
    }
}
