use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeriodError {
    #[error("Invalid period label: {0}")]
    InvalidLabel(String),

    #[error("Period ends before it starts: {start}..{end}")]
    Inverted { start: NaiveDate, end: NaiveDate },
}

/// A closed date range a catalog snapshot is valid for.
///
/// Ordered by start date, then end date. The string form is the stable key
/// used in the persisted panel: `2019` for a calendar year, `2019-03` for a
/// month, `2019-01-01..2019-06-30` for anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    start: NaiveDate,
    end: NaiveDate,
}

impl Period {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, PeriodError> {
        if end < start {
            return Err(PeriodError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn year(year: i32) -> Result<Self, PeriodError> {
        let start = NaiveDate::from_ymd_opt(year, 1, 1)
            .ok_or_else(|| PeriodError::InvalidLabel(year.to_string()))?;
        let end = NaiveDate::from_ymd_opt(year, 12, 31)
            .ok_or_else(|| PeriodError::InvalidLabel(year.to_string()))?;
        Self::new(start, end)
    }

    pub fn month(year: i32, month: u32) -> Result<Self, PeriodError> {
        let label = || format!("{:04}-{:02}", year, month);
        let start =
            NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| PeriodError::InvalidLabel(label()))?;
        let next = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)
        };
        let end = next
            .and_then(|d| d.pred_opt())
            .ok_or_else(|| PeriodError::InvalidLabel(label()))?;
        Self::new(start, end)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    fn is_calendar_year(&self) -> bool {
        self.start.year() == self.end.year()
            && self.start.ordinal() == 1
            && self.end.month() == 12
            && self.end.day() == 31
    }

    fn is_calendar_month(&self) -> bool {
        self.start.day() == 1
            && self.start.year() == self.end.year()
            && self.start.month() == self.end.month()
            && self.end.succ_opt().map_or(true, |next| next.day() == 1)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_calendar_year() {
            write!(f, "{:04}", self.start.year())
        } else if self.is_calendar_month() {
            write!(f, "{:04}-{:02}", self.start.year(), self.start.month())
        } else {
            write!(f, "{}..{}", self.start, self.end)
        }
    }
}

impl FromStr for Period {
    type Err = PeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || PeriodError::InvalidLabel(s.to_string());

        if let Some((a, b)) = s.split_once("..") {
            let start = NaiveDate::parse_from_str(a.trim(), "%Y-%m-%d").map_err(|_| invalid())?;
            let end = NaiveDate::parse_from_str(b.trim(), "%Y-%m-%d").map_err(|_| invalid())?;
            return Self::new(start, end);
        }

        let parts: Vec<&str> = s.split('-').collect();
        match parts.as_slice() {
            [y] if y.len() == 4 => Self::year(y.parse().map_err(|_| invalid())?),
            [y, m] if y.len() == 4 => Self::month(
                y.parse().map_err(|_| invalid())?,
                m.parse().map_err(|_| invalid())?,
            ),
            [_, _, _] => {
                let day = NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| invalid())?;
                Self::new(day, day)
            }
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for Period {
    type Error = PeriodError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Period> for String {
    fn from(period: Period) -> Self {
        period.to_string()
    }
}

/// Inclusive bounds on periods; an open side admits everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodRange {
    pub from: Option<Period>,
    pub to: Option<Period>,
}

impl PeriodRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(from: Period, to: Period) -> Self {
        Self { from: Some(from), to: Some(to) }
    }

    pub fn contains(&self, period: &Period) -> bool {
        self.from.map_or(true, |from| *period >= from) && self.to.map_or(true, |to| *period <= to)
    }
}
