use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::policy::Window;

use super::error::MeterError;

/// Source of wall-clock time for period derivation.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        let mut guard = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// `2025-10` for monthly windows, `2025-10-18` for daily ones.
pub fn period_key(window: Window, at: DateTime<Utc>) -> String {
    match window {
        Window::Month => format!("{:04}-{:02}", at.year(), at.month()),
        Window::Day => format!("{:04}-{:02}-{:02}", at.year(), at.month(), at.day()),
    }
}

/// Start of the window following the one containing `at`.
pub fn period_reset(window: Window, at: DateTime<Utc>) -> DateTime<Utc> {
    let date = at.date_naive();
    let next = match window {
        Window::Month => first_of_month(date)
            .checked_add_months(Months::new(1))
            .unwrap_or(NaiveDate::MAX),
        Window::Day => date.succ_opt().unwrap_or(NaiveDate::MAX),
    };
    Utc.from_utc_datetime(&next.and_time(NaiveTime::MIN))
}

/// Month keys for the `months` calendar months ending with the one
/// containing `at`, oldest first.
pub fn trailing_months(at: DateTime<Utc>, months: u32) -> Vec<String> {
    let first = first_of_month(at.date_naive());
    (0..months)
        .rev()
        .filter_map(|offset| first.checked_sub_months(Months::new(offset)))
        .map(month_key)
        .collect()
}

/// Reporting period for usage totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UsagePeriod {
    #[default]
    CurrentMonth,
    LastMonth,
    CurrentYear,
    Month { year: i32, month: u32 },
    Year(i32),
}

impl UsagePeriod {
    /// Period-key prefix covering every counter inside the period, e.g.
    /// `2025-09` or `2025`.
    pub fn prefix(&self, at: DateTime<Utc>) -> String {
        let this_month = first_of_month(at.date_naive());
        match *self {
            UsagePeriod::CurrentMonth => month_key(this_month),
            UsagePeriod::LastMonth => month_key(
                this_month
                    .checked_sub_months(Months::new(1))
                    .unwrap_or(NaiveDate::MIN),
            ),
            UsagePeriod::CurrentYear => format!("{:04}", at.year()),
            UsagePeriod::Month { year, month } => format!("{year:04}-{month:02}"),
            UsagePeriod::Year(year) => format!("{year:04}"),
        }
    }
}

impl fmt::Display for UsagePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsagePeriod::CurrentMonth => f.write_str("current_month"),
            UsagePeriod::LastMonth => f.write_str("last_month"),
            UsagePeriod::CurrentYear => f.write_str("current_year"),
            UsagePeriod::Month { year, month } => write!(f, "{year:04}-{month:02}"),
            UsagePeriod::Year(year) => write!(f, "{year:04}"),
        }
    }
}

impl FromStr for UsagePeriod {
    type Err = MeterError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "current_month" => Ok(UsagePeriod::CurrentMonth),
            "last_month" => Ok(UsagePeriod::LastMonth),
            "current_year" => Ok(UsagePeriod::CurrentYear),
            custom => parse_explicit_period(custom)
                .ok_or_else(|| MeterError::InvalidPeriod(custom.to_string())),
        }
    }
}

fn parse_explicit_period(value: &str) -> Option<UsagePeriod> {
    let shaped = value
        .bytes()
        .enumerate()
        .all(|(i, b)| if i == 4 { b == b'-' } else { b.is_ascii_digit() });
    if !shaped {
        return None;
    }

    match value.len() {
        4 => value.parse().ok().map(UsagePeriod::Year),
        7 => NaiveDate::parse_from_str(&format!("{value}-01"), "%Y-%m-%d")
            .ok()
            .map(|date| UsagePeriod::Month {
                year: date.year(),
                month: date.month(),
            }),
        _ => None,
    }
}

fn month_key(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(date.day0()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 15, 30, 0).unwrap()
    }

    #[test]
    fn keys_follow_window_granularity() {
        let now = at(2025, 10, 18);
        assert_eq!(period_key(Window::Month, now), "2025-10");
        assert_eq!(period_key(Window::Day, now), "2025-10-18");
    }

    #[test]
    fn reset_rolls_over_year_boundary() {
        let reset = period_reset(Window::Month, at(2025, 12, 31));
        assert_eq!(reset, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());

        let daily = period_reset(Window::Day, at(2025, 2, 28));
        assert_eq!(daily, Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn trailing_months_are_calendar_months() {
        let months = trailing_months(at(2025, 3, 31), 4);
        assert_eq!(months, vec!["2024-12", "2025-01", "2025-02", "2025-03"]);
    }

    #[test]
    fn usage_periods_resolve_to_key_prefixes() {
        let now = at(2026, 1, 12);
        assert_eq!(UsagePeriod::CurrentMonth.prefix(now), "2026-01");
        assert_eq!(UsagePeriod::LastMonth.prefix(now), "2025-12");
        assert_eq!(UsagePeriod::CurrentYear.prefix(now), "2026");
        assert_eq!("2025-07".parse::<UsagePeriod>().unwrap().prefix(now), "2025-07");
        assert_eq!("2024".parse::<UsagePeriod>().unwrap(), UsagePeriod::Year(2024));
        assert_eq!("last_month".parse::<UsagePeriod>().unwrap(), UsagePeriod::LastMonth);
    }

    #[test]
    fn malformed_periods_are_rejected() {
        for raw in ["", "2025-13", "2025-1", "25-10", "2025/10", "yesterday", "2025-10-01"] {
            assert!(
                matches!(raw.parse::<UsagePeriod>(), Err(MeterError::InvalidPeriod(_))),
                "{raw} should not parse"
            );
        }
    }

    #[test]
    fn manual_clock_moves_on_set() {
        let clock = ManualClock::new(at(2025, 10, 31));
        clock.set(at(2025, 11, 1));
        assert_eq!(period_key(Window::Month, clock.now()), "2025-11");
    }
}
