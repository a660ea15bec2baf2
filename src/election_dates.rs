//! Estimates of upcoming Canadian election dates.
//!
//! Each jurisdiction is described by an [`ElectionRule`]: a fixed-date rule
//! such as "third Monday of October, every four years from 2025". Dates are
//! computed from the rule alone, so snap elections are never predicted.

use std::fmt::{Display, Formatter};

use chrono::{Datelike, Duration, Month, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::model::common::Jurisdiction;

/// The `n`th `weekday` of the month, counting from 1.
///
/// Returns `None` if `n` is zero or the month has fewer than `n` such weekdays.
pub fn nth_weekday_of_month(year: i32, month: Month, weekday: Weekday, n: u8) -> Option<NaiveDate> {
    if n == 0 {
        return None;
    }
    let first = NaiveDate::from_ymd_opt(year, month.number_from_month(), 1)?;
    let offset = (7 + weekday.num_days_from_monday() - first.weekday().num_days_from_monday()) % 7;
    let day = 1 + offset + 7 * (u32::from(n) - 1);
    NaiveDate::from_ymd_opt(year, month.number_from_month(), day)
}

/// The last `weekday` of the month. Only `None` for years chrono can't represent.
pub fn last_weekday_of_month(year: i32, month: Month, weekday: Weekday) -> Option<NaiveDate> {
    let next_month = month.succ();
    let next_year = if next_month == Month::January { year + 1 } else { year };
    let last_day = NaiveDate::from_ymd_opt(next_year, next_month.number_from_month(), 1)?.pred_opt()?;
    let back = (7 + last_day.weekday().num_days_from_monday() - weekday.num_days_from_monday()) % 7;
    last_day.checked_sub_signed(Duration::days(back.into()))
}

/// Which occurrence of the weekday within the month.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Occurrence {
    Nth(u8),
    Last,
}

/// A fixed-date election rule.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ElectionRule {
    /// Any year in which an election falls.
    pub anchor_year: i32,
    pub cycle_years: i32,
    pub month: Month,
    pub weekday: Weekday,
    pub occurrence: Occurrence,
}

impl ElectionRule {
    const fn new(anchor_year: i32, month: Month, occurrence: Occurrence, weekday: Weekday) -> Self {
        Self {
            anchor_year,
            cycle_years: 4,
            month,
            weekday,
            occurrence,
        }
    }

    /// The election date in the given year, ignoring the cycle.
    pub fn date_in(&self, year: i32) -> Option<NaiveDate> {
        match self.occurrence {
            Occurrence::Nth(n) => nth_weekday_of_month(year, self.month, self.weekday, n),
            Occurrence::Last => last_weekday_of_month(year, self.month, self.weekday),
        }
    }

    /// The first election on or after `reference`.
    pub fn next_on_or_after(&self, reference: NaiveDate) -> Option<NaiveDate> {
        let behind = (reference.year() - self.anchor_year).rem_euclid(self.cycle_years);
        let mut year = if behind == 0 {
            reference.year()
        } else {
            reference.year() + self.cycle_years - behind
        };
        loop {
            let date = self.date_in(year)?;
            if date >= reference {
                return Some(date);
            }
            year += self.cycle_years;
        }
    }
}

impl Display for ElectionRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let occurrence = match self.occurrence {
            Occurrence::Nth(1) => "first",
            Occurrence::Nth(2) => "second",
            Occurrence::Nth(3) => "third",
            Occurrence::Nth(4) => "fourth",
            Occurrence::Nth(_) => "fifth",
            Occurrence::Last => "last",
        };
        write!(
            f,
            "{occurrence} {} of {}, every {} years from {}",
            weekday_name(self.weekday),
            self.month.name(),
            self.cycle_years,
            self.anchor_year
        )
    }
}

fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// A computed election date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionDate {
    pub date: NaiveDate,
    /// True when the date comes from a generic rule rather than the
    /// jurisdiction's own fixed-date legislation.
    pub estimated: bool,
    /// Human-readable description of the rule applied.
    pub rule: String,
}

/// Federal general elections under the fixed-date provisions.
pub const FEDERAL_RULE: ElectionRule =
    ElectionRule::new(2025, Month::October, Occurrence::Nth(3), Weekday::Mon);

/// Applied to provinces and municipalities without a table entry.
pub const DEFAULT_RULE: ElectionRule =
    ElectionRule::new(2022, Month::October, Occurrence::Nth(3), Weekday::Mon);

const PROVINCIAL_RULES: &[(&[&str], ElectionRule)] = &[
    (&["ontario"], ElectionRule::new(2022, Month::June, Occurrence::Nth(1), Weekday::Thu)),
    (&["british columbia"], ElectionRule::new(2024, Month::October, Occurrence::Nth(3), Weekday::Sat)),
    (&["alberta"], ElectionRule::new(2027, Month::October, Occurrence::Nth(3), Weekday::Mon)),
    (&["saskatchewan"], ElectionRule::new(2024, Month::October, Occurrence::Last, Weekday::Mon)),
    (&["manitoba"], ElectionRule::new(2023, Month::October, Occurrence::Nth(1), Weekday::Tue)),
    (&["quebec"], ElectionRule::new(2022, Month::October, Occurrence::Nth(1), Weekday::Mon)),
];

const MUNICIPAL_RULES: &[(&[&str], ElectionRule)] = &[
    (&["toronto", "ottawa"], ElectionRule::new(2022, Month::October, Occurrence::Nth(4), Weekday::Mon)),
    (&["vancouver"], ElectionRule::new(2022, Month::October, Occurrence::Nth(3), Weekday::Sat)),
    (&["calgary", "edmonton"], ElectionRule::new(2021, Month::October, Occurrence::Nth(3), Weekday::Mon)),
    (&["montreal"], ElectionRule::new(2021, Month::November, Occurrence::Nth(1), Weekday::Sun)),
    (&["winnipeg"], ElectionRule::new(2022, Month::October, Occurrence::Nth(4), Weekday::Wed)),
    (&["regina", "saskatoon"], ElectionRule::new(2024, Month::November, Occurrence::Nth(2), Weekday::Wed)),
    (&["halifax"], ElectionRule::new(2024, Month::October, Occurrence::Nth(3), Weekday::Sat)),
    (&["st. john's"], ElectionRule::new(2021, Month::September, Occurrence::Last, Weekday::Tue)),
];

/// Find the rule for `name`, ignoring case and surrounding whitespace.
fn lookup(table: &[(&[&str], ElectionRule)], name: &str) -> Option<ElectionRule> {
    let name = name.trim().to_lowercase();
    table
        .iter()
        .find(|(names, _)| names.contains(&name.as_str()))
        .map(|&(_, rule)| rule)
}

fn apply(rule: ElectionRule, estimated: bool, reference: NaiveDate) -> ElectionDate {
    // Every rule names a weekday that occurs at least four times a month, so
    // a date always exists for representable years.
    let date = rule.next_on_or_after(reference).unwrap_or(NaiveDate::MAX);
    ElectionDate {
        date,
        estimated,
        rule: rule.to_string(),
    }
}

/// The next federal general election on or after `reference`.
///
/// Always estimated, since a minority parliament can be dissolved early.
pub fn next_federal_election_date(reference: NaiveDate) -> ElectionDate {
    apply(FEDERAL_RULE, true, reference)
}

/// The next general election for the named province on or after `reference`.
pub fn next_provincial_election_date(name: &str, reference: NaiveDate) -> ElectionDate {
    match lookup(PROVINCIAL_RULES, name) {
        Some(rule) => apply(rule, false, reference),
        None => apply(DEFAULT_RULE, true, reference),
    }
}

/// The next general election for the named municipality on or after `reference`.
pub fn next_municipal_election_date(name: &str, reference: NaiveDate) -> ElectionDate {
    match lookup(MUNICIPAL_RULES, name) {
        Some(rule) => apply(rule, false, reference),
        None => apply(DEFAULT_RULE, true, reference),
    }
}

/// The next election at the given level. Provincial and municipal lookups
/// without a name use the default rule.
pub fn next_election_date(
    jurisdiction: Jurisdiction,
    name: Option<&str>,
    reference: NaiveDate,
) -> ElectionDate {
    match (jurisdiction, name) {
        (Jurisdiction::Federal, _) => next_federal_election_date(reference),
        (Jurisdiction::Provincial, Some(name)) => next_provincial_election_date(name, reference),
        (Jurisdiction::Municipal, Some(name)) => next_municipal_election_date(name, reference),
        (_, None) => apply(DEFAULT_RULE, true, reference),
    }
}
