//! Parsing of the free-form date strings a calendar surface renders:
//! headings such as `Wednesday, Nov 11`, accessible labels such as
//! `Wednesday, November 11, 2026`, and compact cells such as `W 11`.

use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate, Weekday};
use regex::Regex;

const MONTH_NAMES: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

const WEEKDAYS: [(Weekday, &str); 7] = [
    (Weekday::Mon, "monday"),
    (Weekday::Tue, "tuesday"),
    (Weekday::Wed, "wednesday"),
    (Weekday::Thu, "thursday"),
    (Weekday::Fri, "friday"),
    (Weekday::Sat, "saturday"),
    (Weekday::Sun, "sunday"),
];

fn iso_date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").expect("iso date pattern compiles")
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct DateTokens {
    weekday: Option<Weekday>,
    month: Option<u32>,
    day: Option<u32>,
    year: Option<i32>,
    weekday_initial: Option<char>,
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

fn month_from_token(token: &str) -> Option<u32> {
    if token.len() < 3 {
        return None;
    }
    MONTH_NAMES
        .iter()
        .position(|name| name.starts_with(token))
        .and_then(|index| u32::try_from(index + 1).ok())
}

fn weekday_from_token(token: &str) -> Option<Weekday> {
    if token.len() < 2 {
        return None;
    }
    let mut matches = WEEKDAYS.iter().filter(|(_, name)| name.starts_with(token));
    let (weekday, _) = matches.next()?;
    // "t" / "s" prefixes are ambiguous between two weekdays.
    if matches.next().is_some() {
        return None;
    }
    Some(*weekday)
}

fn day_from_token(token: &str) -> Option<u32> {
    let digits_end = token
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_digit())
        .map(|(index, _)| index)
        .unwrap_or(token.len());
    if digits_end == 0 || digits_end > 2 {
        return None;
    }
    let suffix = &token[digits_end..];
    if !matches!(suffix, "" | "st" | "nd" | "rd" | "th") {
        return None;
    }
    token[..digits_end]
        .parse::<u32>()
        .ok()
        .filter(|day| (1..=31).contains(day))
}

fn scan(text: &str) -> DateTokens {
    let mut found = DateTokens::default();
    for token in tokens(text) {
        if found.day.is_none() {
            if let Some(day) = day_from_token(&token) {
                found.day = Some(day);
                continue;
            }
        }
        if found.year.is_none() && token.len() == 4 && token.chars().all(|ch| ch.is_ascii_digit())
        {
            found.year = token.parse::<i32>().ok();
            continue;
        }
        if !token.chars().all(char::is_alphabetic) {
            continue;
        }
        if found.month.is_none() {
            if let Some(month) = month_from_token(&token) {
                // "mar" / "may" are months, never weekdays; "sat"/"sun" never months.
                found.month = Some(month);
                continue;
            }
        }
        if found.weekday.is_none() {
            if let Some(weekday) = weekday_from_token(&token) {
                found.weekday = Some(weekday);
            }
        }
        if found.weekday_initial.is_none() {
            found.weekday_initial = token.chars().next();
        }
    }
    found
}

fn weekday_name(weekday: Weekday) -> &'static str {
    WEEKDAYS
        .iter()
        .find(|(candidate, _)| *candidate == weekday)
        .map(|(_, name)| *name)
        .unwrap_or("monday")
}

/// Label tokens (`Wednesday`, `Nov`, `11`) that an accessible day label is
/// expected to contain for `date`.
pub fn label_tokens(date: NaiveDate) -> Vec<String> {
    vec![
        date.format("%A").to_string(),
        date.format("%b").to_string(),
        date.day().to_string(),
    ]
}

/// Parses a heading/label/indicator text into a full date.
///
/// Text without a year is resolved against `today`: the candidate in the
/// previous, current or next year closest to `today` wins, preferring
/// candidates whose weekday agrees with a weekday token in the text.
pub fn parse_date_text(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    if let Some(captures) = iso_date_pattern().captures(text) {
        let year = captures.get(1)?.as_str().parse::<i32>().ok()?;
        let month = captures.get(2)?.as_str().parse::<u32>().ok()?;
        let day = captures.get(3)?.as_str().parse::<u32>().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    let found = scan(text);
    let month = found.month?;
    let day = found.day?;
    if let Some(year) = found.year {
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        return match found.weekday {
            Some(weekday) if date.weekday() != weekday => None,
            _ => Some(date),
        };
    }

    let candidates = [today.year() - 1, today.year(), today.year() + 1]
        .into_iter()
        .filter_map(|year| NaiveDate::from_ymd_opt(year, month, day))
        .collect::<Vec<_>>();
    let weekday_agrees = |date: &NaiveDate| found.weekday.map_or(true, |wd| date.weekday() == wd);
    let pool = if candidates.iter().any(weekday_agrees) {
        candidates.iter().copied().filter(weekday_agrees).collect()
    } else {
        candidates
    };
    pool.into_iter()
        .min_by_key(|date| (*date - today).num_days().abs())
}

/// True when an accessible label names exactly `date`: weekday, month and
/// day-of-month must all be present and agree, and a year, if present, too.
pub fn label_matches_date(label: &str, date: NaiveDate) -> bool {
    let found = scan(label);
    found.weekday == Some(date.weekday())
        && found.month == Some(date.month())
        && found.day == Some(date.day())
        && found.year.map_or(true, |year| year == date.year())
}

/// Heuristic match for compact day cells (`W 11`, `Wed\n11`).
///
/// Day-of-month must agree and the first letter of the weekday must agree.
/// When the cell text or its label carries a month token, the month must
/// agree too, which rejects a neighbouring month sharing the day number.
pub fn cell_text_matches_date(text: &str, label: Option<&str>, date: NaiveDate) -> bool {
    let found = scan(text);
    if found.day != Some(date.day()) {
        return false;
    }
    let expected_initial = weekday_name(date.weekday()).chars().next();
    match (found.weekday, found.weekday_initial) {
        (Some(weekday), _) if weekday != date.weekday() => return false,
        (Some(_), _) => {}
        (None, initial) if initial.is_none() || initial != expected_initial => return false,
        (None, _) => {}
    }
    if found.month.is_some_and(|month| month != date.month()) {
        return false;
    }
    if let Some(label) = label {
        let label_tokens = scan(label);
        if label_tokens.month.is_some_and(|month| month != date.month()) {
            return false;
        }
        if label_tokens.year.is_some_and(|year| year != date.year()) {
            return false;
        }
    }
    true
}
