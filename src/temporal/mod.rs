//! Date-window resolution from natural-language queries
//!
//! Recognised expressions, in priority order:
//! - `this week`, `last week` (Monday to Sunday)
//! - `this month`, `last month`
//! - `this quarter`
//! - `Q3 2025`, `q3-2025`, `Q4/2026`
//! - `2025-09-02`
//! - `September 2, 2025`, `Sep 2 2025`
//!
//! Windows for the current week, month or quarter end at the close of today.

use chrono::{Datelike, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use std::sync::OnceLock;

/// Inclusive timestamp range, from 00:00:00 on the first day to 23:59:59 on the last
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl DateWindow {
    /// Whole days `first..=last`
    pub fn days(first: NaiveDate, last: NaiveDate) -> Self {
        Self {
            start: first.and_time(NaiveTime::MIN),
            end: end_of_day(last),
        }
    }

    pub fn first_day(&self) -> NaiveDate {
        self.start.date()
    }

    pub fn last_day(&self) -> NaiveDate {
        self.end.date()
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.first_day() <= day && day <= self.last_day()
    }

    /// Whether `[from, to]` shares at least one day with the window
    pub fn overlaps(&self, from: NaiveDate, to: NaiveDate) -> bool {
        from <= self.last_day() && to >= self.first_day()
    }
}

fn end_of_day(day: NaiveDate) -> NaiveDateTime {
    day.and_time(NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN))
}

struct Patterns {
    this_week: Regex,
    last_week: Regex,
    this_month: Regex,
    last_month: Regex,
    this_quarter: Regex,
    quarter: Regex,
    iso: Regex,
    long_form: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let re = |p: &str| Regex::new(p).expect("valid regex");
        Patterns {
            this_week: re(r"(?i)\bthis\s+week\b"),
            last_week: re(r"(?i)\blast\s+week\b"),
            this_month: re(r"(?i)\bthis\s+month\b"),
            last_month: re(r"(?i)\blast\s+month\b"),
            this_quarter: re(r"(?i)\bthis\s+quarter\b"),
            quarter: re(r"(?i)\bq([1-4])\s*[-/ ]?\s*(\d{4})\b"),
            iso: re(r"(?:^|\D)(\d{4})-(\d{2})-(\d{2})(?:\D|$)"),
            long_form: re(
                r"(?i)\b(january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sep|oct|nov|dec)\.?\s+(\d{1,2}),?\s+(\d{4})\b",
            ),
        }
    })
}

/// Resolve a window from `query` relative to the local clock
pub fn resolve_now(query: &str) -> Option<DateWindow> {
    resolve(query, Local::now().naive_local())
}

/// Resolve a window from `query` relative to `now`; `None` when nothing matches
pub fn resolve(query: &str, now: NaiveDateTime) -> Option<DateWindow> {
    let p = patterns();
    let today = now.date();

    if p.this_week.is_match(query) {
        let monday = today - Duration::days(today.weekday().num_days_from_monday() as i64);
        return Some(DateWindow::days(monday, today));
    }

    if p.last_week.is_match(query) {
        let last_sunday = today - Duration::days(today.weekday().num_days_from_monday() as i64 + 1);
        return Some(DateWindow::days(last_sunday - Duration::days(6), last_sunday));
    }

    if p.this_month.is_match(query) {
        let first = today.with_day(1)?;
        return Some(DateWindow::days(first, today));
    }

    if p.last_month.is_match(query) {
        let last_prev = today.with_day(1)?.pred_opt()?;
        return Some(DateWindow::days(last_prev.with_day(1)?, last_prev));
    }

    if p.this_quarter.is_match(query) {
        let quarter = (today.month() - 1) / 3 + 1;
        let window = quarter_bounds(quarter, today.year())?;
        let end = window.end.min(end_of_day(today));
        return Some(DateWindow {
            start: window.start,
            end,
        });
    }

    for caps in p.quarter.captures_iter(query) {
        let quarter: u32 = caps[1].parse().ok()?;
        if let Some(window) = caps[2].parse().ok().and_then(|y| quarter_bounds(quarter, y)) {
            return Some(window);
        }
    }

    for caps in p.iso.captures_iter(query) {
        let date = caps[1].parse().ok().and_then(|y| {
            NaiveDate::from_ymd_opt(y, caps[2].parse().ok()?, caps[3].parse().ok()?)
        });
        if let Some(day) = date {
            return Some(DateWindow::days(day, day));
        }
    }

    for caps in p.long_form.captures_iter(query) {
        let Some(month) = month_number(&caps[1]) else {
            continue;
        };
        let date = caps[3]
            .parse()
            .ok()
            .and_then(|y| NaiveDate::from_ymd_opt(y, month, caps[2].parse().ok()?));
        if let Some(day) = date {
            return Some(DateWindow::days(day, day));
        }
    }

    None
}

/// Calendar quarter `q` (1 to 4) of `year`; the end is the day before the next quarter
pub fn quarter_bounds(q: u32, year: i32) -> Option<DateWindow> {
    if !(1..=4).contains(&q) {
        return None;
    }
    let start = NaiveDate::from_ymd_opt(year, 3 * (q - 1) + 1, 1)?;
    let next_start = if q == 4 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, 3 * q + 1, 1)?
    };
    Some(DateWindow::days(start, next_start.pred_opt()?))
}

fn month_number(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let prefix = name.get(..3)?.to_ascii_lowercase();
    MONTHS
        .iter()
        .position(|m| *m == prefix)
        .map(|i| i as u32 + 1)
}
