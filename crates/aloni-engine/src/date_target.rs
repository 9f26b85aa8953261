use chrono::{Datelike, Days, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::WeekdayGate;

pub const SKIP_REASON_NOT_A_BOOKING_DAY: &str = "not a booking day";

/// The single calendar date a run aims for. Computed once, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDate {
    pub calendar_date: NaiveDate,
    pub weekday_constraint_satisfied: bool,
}

impl TargetDate {
    pub fn date(&self) -> NaiveDate {
        self.calendar_date
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetResolution {
    Book(TargetDate),
    /// Normal early exit: the weekday allow-list excludes this run.
    Skipped {
        date: NaiveDate,
        checked_weekday: Weekday,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetDateError {
    #[error("days ahead must be zero or positive (got {0})")]
    NegativeOffset(i64),
    #[error("target date {days} days after {today} is out of range")]
    OutOfRange { today: NaiveDate, days: i64 },
}

/// Computes the target date `days_ahead` after `today` and applies the
/// optional weekday allow-list according to `gate`.
pub fn resolve_target_date(
    today: NaiveDate,
    days_ahead: i64,
    allowed_weekdays: Option<&[Weekday]>,
    gate: WeekdayGate,
) -> Result<TargetResolution, TargetDateError> {
    let offset =
        u64::try_from(days_ahead).map_err(|_| TargetDateError::NegativeOffset(days_ahead))?;
    let calendar_date = today
        .checked_add_days(Days::new(offset))
        .ok_or(TargetDateError::OutOfRange {
            today,
            days: days_ahead,
        })?;

    let checked_weekday = match gate {
        WeekdayGate::TargetDate => calendar_date.weekday(),
        WeekdayGate::RunDate => today.weekday(),
    };
    let satisfied = allowed_weekdays.map_or(true, |allowed| allowed.contains(&checked_weekday));
    if !satisfied {
        return Ok(TargetResolution::Skipped {
            date: calendar_date,
            checked_weekday,
        });
    }
    Ok(TargetResolution::Book(TargetDate {
        calendar_date,
        weekday_constraint_satisfied: true,
    }))
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, NaiveDate, Weekday};
    use proptest::prelude::*;

    use super::{resolve_target_date, TargetDateError, TargetResolution};
    use crate::config::WeekdayGate;

    fn thursday() -> NaiveDate {
        let date = NaiveDate::from_ymd_opt(2026, 10, 22).expect("date");
        assert_eq!(date.weekday(), Weekday::Thu);
        date
    }

    #[test]
    fn unit_thirteen_days_from_thursday_lands_on_wednesday() {
        let resolution = resolve_target_date(
            thursday(),
            13,
            Some(&[Weekday::Mon, Weekday::Tue, Weekday::Wed]),
            WeekdayGate::TargetDate,
        )
        .expect("resolve");
        let TargetResolution::Book(target) = resolution else {
            panic!("expected a booking date, got {resolution:?}");
        };
        assert_eq!(target.calendar_date, NaiveDate::from_ymd_opt(2026, 11, 4).expect("date"));
        assert_eq!(target.calendar_date.weekday(), Weekday::Wed);
        assert!(target.weekday_constraint_satisfied);
    }

    #[test]
    fn functional_run_date_gate_skips_thursday_runs() {
        let resolution = resolve_target_date(
            thursday(),
            13,
            Some(&[Weekday::Mon, Weekday::Tue, Weekday::Wed]),
            WeekdayGate::RunDate,
        )
        .expect("resolve");
        assert_eq!(
            resolution,
            TargetResolution::Skipped {
                date: NaiveDate::from_ymd_opt(2026, 11, 4).expect("date"),
                checked_weekday: Weekday::Thu,
            }
        );
    }

    #[test]
    fn functional_target_gate_skips_excluded_target_weekday() {
        let resolution = resolve_target_date(
            thursday(),
            14,
            Some(&[Weekday::Mon, Weekday::Tue, Weekday::Wed]),
            WeekdayGate::TargetDate,
        )
        .expect("resolve");
        assert!(matches!(
            resolution,
            TargetResolution::Skipped {
                checked_weekday: Weekday::Thu,
                ..
            }
        ));
    }

    #[test]
    fn unit_missing_allow_list_books_every_weekday_and_zero_offset_is_today() {
        let resolution =
            resolve_target_date(thursday(), 0, None, WeekdayGate::TargetDate).expect("resolve");
        assert_eq!(
            resolution,
            TargetResolution::Book(super::TargetDate {
                calendar_date: thursday(),
                weekday_constraint_satisfied: true,
            })
        );
    }

    #[test]
    fn regression_negative_and_overflowing_offsets_are_rejected() {
        assert_eq!(
            resolve_target_date(thursday(), -1, None, WeekdayGate::TargetDate),
            Err(TargetDateError::NegativeOffset(-1))
        );
        assert!(matches!(
            resolve_target_date(NaiveDate::MAX, 1, None, WeekdayGate::TargetDate),
            Err(TargetDateError::OutOfRange { .. })
        ));
    }

    proptest! {
        #[test]
        fn property_resolution_is_idempotent_for_fixed_now(base in 0i64..20_000, offset in 0i64..400, mask in 0u8..128) {
            let today = NaiveDate::from_ymd_opt(2000, 1, 1).expect("date") + chrono::Duration::days(base);
            let allowed = [
                Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu,
                Weekday::Fri, Weekday::Sat, Weekday::Sun,
            ]
            .into_iter()
            .enumerate()
            .filter(|(index, _)| mask & (1 << index) != 0)
            .map(|(_, weekday)| weekday)
            .collect::<Vec<_>>();
            let first = resolve_target_date(today, offset, Some(&allowed), WeekdayGate::TargetDate);
            let second = resolve_target_date(today, offset, Some(&allowed), WeekdayGate::TargetDate);
            prop_assert_eq!(first, second);
        }
    }
}
