//! # Calendar Features
//!
//! Date-derived columns: calendar parts, US federal bank holidays, payday proximity
//! and social-security deposit days. Every function here looks only at `trandate`,
//! so none of them can leak usage.
//!
//! Business-day rules follow the US banking calendar: weekends and federal holidays
//! are closed, a fixed-date holiday falling on a Saturday is observed on the Friday
//! before and one falling on a Sunday on the Monday after.

use crate::table::FeatureTable;
use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::HashSet;

pub const WDAY_LEVELS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
pub const MONTH_LEVELS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Numeric calendar columns, all finite by construction.
pub const CALENDAR_COLUMNS: [&str; 9] = [
    "wday",
    "week",
    "mweek",
    "month",
    "quarter",
    "payday_dist",
    "payday",
    "holiday",
    "ssd",
];

/// Categorical columns with their level sets, needed to reload a cached table.
pub fn categorical_levels() -> Vec<(&'static str, Vec<String>)> {
    vec![
        ("wday_label", WDAY_LEVELS.iter().map(|s| s.to_string()).collect()),
        ("month_label", MONTH_LEVELS.iter().map(|s| s.to_string()).collect()),
    ]
}

/// Federal holidays, including their observed substitutes, for a span of years.
#[derive(Debug, Clone)]
pub struct HolidayCalendar {
    days: HashSet<NaiveDate>,
}

impl HolidayCalendar {
    pub fn for_years(first: i32, last: i32) -> Self {
        let mut days = HashSet::new();
        // Observed New Year's Day can fall on December 31 of the prior year.
        for year in first..=last + 1 {
            for holiday in federal_holidays(year) {
                days.insert(holiday);
            }
        }
        Self { days }
    }

    pub fn covering(dates: &[NaiveDate]) -> Self {
        let first = dates.iter().map(|d| d.year()).min().unwrap_or(2000);
        let last = dates.iter().map(|d| d.year()).max().unwrap_or(first);
        Self::for_years(first - 1, last)
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.days.contains(&date)
    }

    pub fn is_business_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.is_holiday(date)
    }

    /// The date itself if it is a business day, otherwise the closest earlier one.
    pub fn roll_back(&self, mut date: NaiveDate) -> NaiveDate {
        while !self.is_business_day(date) {
            match date.pred_opt() {
                Some(previous) => date = previous,
                None => break,
            }
        }
        date
    }

    /// Paydays of a month: the 15th and the last calendar day, each rolled back to a
    /// business day.
    pub fn paydays(&self, year: i32, month: u32) -> [NaiveDate; 2] {
        let fifteenth = ymd(year, month, 15);
        [self.roll_back(fifteenth), self.roll_back(last_day_of_month(year, month))]
    }

    /// Days elapsed since the most recent payday on or before `date`.
    pub fn days_since_payday(&self, date: NaiveDate) -> i64 {
        let (prev_year, prev_month) = previous_month(date.year(), date.month());
        self.paydays(date.year(), date.month())
            .into_iter()
            .chain(self.paydays(prev_year, prev_month))
            .filter(|&p| p <= date)
            .map(|p| (date - p).num_days())
            .min()
            .unwrap_or(0)
    }

    /// Social-security deposit days: the 3rd of the month and the second, third and
    /// fourth Wednesdays, each rolled back to a business day.
    pub fn is_social_security_day(&self, date: NaiveDate) -> bool {
        let (year, month) = (date.year(), date.month());
        let third = self.roll_back(ymd(year, month, 3));
        if third == date {
            return true;
        }
        (2..=4).any(|n| {
            NaiveDate::from_weekday_of_month_opt(year, month, Weekday::Wed, n)
                .is_some_and(|wednesday| self.roll_back(wednesday) == date)
        })
    }
}

/// Week of the month, 1 for days 1 to 7 and so on up to 5.
pub fn week_of_month(date: NaiveDate) -> u32 {
    (date.day() - 1) / 7 + 1
}

pub fn quarter(date: NaiveDate) -> u32 {
    (date.month() - 1) / 3 + 1
}

/// Appends `wday`, `week`, `mweek`, `month`, `quarter` and the categorical
/// `wday_label` and `month_label` columns.
pub fn add_dates(table: &mut FeatureTable) {
    let dates = &table.trandate;
    let wday: Vec<f64> = dates
        .iter()
        .map(|d| d.weekday().number_from_monday() as f64)
        .collect();
    let week: Vec<f64> = dates.iter().map(|d| d.iso_week().week() as f64).collect();
    let mweek: Vec<f64> = dates.iter().map(|&d| week_of_month(d) as f64).collect();
    let month: Vec<f64> = dates.iter().map(|d| d.month() as f64).collect();
    let quarters: Vec<f64> = dates.iter().map(|&d| quarter(d) as f64).collect();
    let wday_codes: Vec<usize> = dates
        .iter()
        .map(|d| d.weekday().num_days_from_monday() as usize)
        .collect();
    let month_codes: Vec<usize> = dates.iter().map(|d| d.month0() as usize).collect();

    table.set_numeric("wday", wday);
    table.set_numeric("week", week);
    table.set_numeric("mweek", mweek);
    table.set_numeric("month", month);
    table.set_numeric("quarter", quarters);
    for (name, levels) in categorical_levels() {
        let codes = if name == "wday_label" {
            wday_codes.clone()
        } else {
            month_codes.clone()
        };
        table.set_categorical(name, levels, codes);
    }
}

/// Appends `payday_dist` (days since the last payday) and the `payday` flag.
pub fn add_paydays(table: &mut FeatureTable, holidays: &HolidayCalendar) {
    let distance: Vec<f64> = table
        .trandate
        .iter()
        .map(|&d| holidays.days_since_payday(d) as f64)
        .collect();
    let on_payday = distance.iter().map(|&d| flag(d == 0.0)).collect();
    table.set_numeric("payday_dist", distance);
    table.set_numeric("payday", on_payday);
}

pub fn add_holidays(table: &mut FeatureTable, holidays: &HolidayCalendar) {
    let values = table
        .trandate
        .iter()
        .map(|&d| flag(holidays.is_holiday(d)))
        .collect();
    table.set_numeric("holiday", values);
}

pub fn add_social_security(table: &mut FeatureTable, holidays: &HolidayCalendar) {
    let values = table
        .trandate
        .iter()
        .map(|&d| flag(holidays.is_social_security_day(d)))
        .collect();
    table.set_numeric("ssd", values);
}

fn flag(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}

fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN)
}

fn previous_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 { (year - 1, 12) } else { (year, month - 1) }
}

fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    ymd(next_year, next_month, 1).pred_opt().unwrap_or(NaiveDate::MIN)
}

fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u8) -> Option<NaiveDate> {
    NaiveDate::from_weekday_of_month_opt(year, month, weekday, n)
}

fn last_weekday(year: i32, month: u32, weekday: Weekday) -> NaiveDate {
    let mut date = last_day_of_month(year, month);
    while date.weekday() != weekday {
        match date.pred_opt() {
            Some(previous) => date = previous,
            None => break,
        }
    }
    date
}

/// A fixed-date holiday plus its observed weekday substitute.
fn fixed_holiday(year: i32, month: u32, day: u32) -> Vec<NaiveDate> {
    let date = ymd(year, month, day);
    let observed = match date.weekday() {
        Weekday::Sat => date.pred_opt(),
        Weekday::Sun => date.succ_opt(),
        _ => None,
    };
    std::iter::once(date).chain(observed).collect()
}

fn federal_holidays(year: i32) -> Vec<NaiveDate> {
    let mut days = Vec::with_capacity(16);
    days.extend(fixed_holiday(year, 1, 1));
    days.extend(nth_weekday(year, 1, Weekday::Mon, 3));
    days.extend(nth_weekday(year, 2, Weekday::Mon, 3));
    days.push(last_weekday(year, 5, Weekday::Mon));
    if year >= 2021 {
        days.extend(fixed_holiday(year, 6, 19));
    }
    days.extend(fixed_holiday(year, 7, 4));
    days.extend(nth_weekday(year, 9, Weekday::Mon, 1));
    days.extend(nth_weekday(year, 10, Weekday::Mon, 2));
    days.extend(fixed_holiday(year, 11, 11));
    days.extend(nth_weekday(year, 11, Weekday::Thu, 4));
    days.extend(fixed_holiday(year, 12, 25));
    days
}
