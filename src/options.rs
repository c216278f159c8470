//! Render options: the JSON job description sent to the render API.
//!
//! Only `dashboard_id` is mandatory on the wire. Every optional field is
//! omitted from the serialised body when unset, so the request carries exactly
//! what the caller supplied:
//!
//! ```json
//! {
//!   "dashboard_id": 1234,
//!   "daterange": {"start": "2015-01-01", "end": "2015-01-05"},
//!   "aggregation": "daily",
//!   "filters": [{"name": "AGE", "value": [1, 2]}],
//!   "dashboard_ts": 1446069112
//! }
//! ```

use crate::error::DashMailError;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dashboard identifier, numeric or named; serialised as given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DashboardId {
    Numeric(u64),
    Named(String),
}

impl fmt::Display for DashboardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DashboardId::Numeric(n) => write!(f, "{n}"),
            DashboardId::Named(s) => f.write_str(s),
        }
    }
}

impl From<u64> for DashboardId {
    fn from(n: u64) -> Self {
        DashboardId::Numeric(n)
    }
}

impl From<&str> for DashboardId {
    fn from(s: &str) -> Self {
        DashboardId::Named(s.to_string())
    }
}

/// Time bucket the dashboard's charts aggregate over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

/// A single filter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Text(s.to_string())
    }
}

impl From<i64> for Scalar {
    fn from(n: i64) -> Self {
        Scalar::Integer(n)
    }
}

/// Filter value: one scalar or a list of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    One(Scalar),
    Many(Vec<Scalar>),
}

/// A named dashboard filter, e.g. `{"name": "user_id", "value": "300"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub name: String,
    pub value: FilterValue,
}

impl Filter {
    pub fn new(name: impl Into<String>, value: impl Into<Scalar>) -> Self {
        Self {
            name: name.into(),
            value: FilterValue::One(value.into()),
        }
    }

    pub fn any_of<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Scalar>,
    {
        Self {
            name: name.into(),
            value: FilterValue::Many(values.into_iter().map(Into::into).collect()),
        }
    }
}

/// Inclusive date range, serialised as ISO dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// The render job description posted to the render API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderOptions {
    pub dashboard_id: DashboardId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daterange: Option<DateRange>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<Aggregation>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,

    /// Epoch seconds; forces the service to render fresh data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_ts: Option<i64>,
}

impl RenderOptions {
    pub fn new(dashboard_id: impl Into<DashboardId>) -> Self {
        Self {
            dashboard_id: dashboard_id.into(),
            daterange: None,
            aggregation: None,
            filters: Vec::new(),
            dashboard_ts: None,
        }
    }

    pub fn daterange(mut self, range: DateRange) -> Self {
        self.daterange = Some(range);
        self
    }

    pub fn aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = Some(aggregation);
        self
    }

    pub fn filters(mut self, filters: Vec<Filter>) -> Self {
        self.filters = filters;
        self
    }

    pub fn timestamp(mut self, epoch_secs: i64) -> Self {
        self.dashboard_ts = Some(epoch_secs);
        self
    }

    /// Wrap the options in the `{"data": …}` envelope the API expects.
    pub fn to_request_body(&self) -> Result<Vec<u8>, DashMailError> {
        serde_json::to_vec(&Envelope { data: self })
            .map_err(|e| DashMailError::Internal(format!("Failed to serialise render options: {e}")))
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    data: &'a RenderOptions,
}

// ── Date-range helper ────────────────────────────────────────────────────

static ORDINAL_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})(st|nd|rd|th)\b").expect("valid regex"));

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%b %d %Y",
    "%B %d %Y",
    "%d %b %Y",
    "%d %B %Y",
    "%Y %b %d",
    // Two-digit years; chrono pivots 00–68 to 20xx and 69–99 to 19xx.
    "%m/%d/%y",
    "%m-%d-%y",
    "%b %d %y",
    "%B %d %y",
    "%d %b %y",
    "%d %B %y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
];

/// `%Y` happily reads "18" as year 18; anything before this is a typo for a
/// two-digit year and is left to the `%y` formats.
const MIN_YEAR: i32 = 1000;

/// Parse a loosely formatted calendar date.
///
/// Accepts ISO and US numeric forms (four- or two-digit years), month-name
/// forms with optional ordinal suffixes and commas ("Jan 1st, 2018"), ISO
/// date-times without a zone ("2018-01-29 10:30") and RFC 3339 timestamps.
/// Times are dropped. A year before 1000 is never returned.
pub fn parse_date(input: &str) -> Result<NaiveDate, DashMailError> {
    let trimmed = input.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(ts.date_naive());
    }

    let without_ordinals = ORDINAL_SUFFIX.replace_all(trimmed, "$1");
    let without_commas = without_ordinals.replace(',', " ");
    let normalised = WHITESPACE.replace_all(without_commas.trim(), " ");

    let dates = DATE_FORMATS
        .iter()
        .filter_map(|fmt| NaiveDate::parse_from_str(&normalised, fmt).ok());
    let datetimes = DATETIME_FORMATS
        .iter()
        .filter_map(|fmt| NaiveDateTime::parse_from_str(&normalised, fmt).ok())
        .map(|dt| dt.date());

    dates
        .chain(datetimes)
        .find(|d| d.year() >= MIN_YEAR)
        .ok_or_else(|| DashMailError::InvalidDate {
            input: input.to_string(),
        })
}

/// Build a [`DateRange`] from two human-entered dates.
///
/// ```rust
/// let range = dashmail::create_daterange("Jan 1st, 2018", "Jan 29, 2018").unwrap();
/// assert_eq!(range.start.to_string(), "2018-01-01");
/// assert_eq!(range.end.to_string(), "2018-01-29");
/// ```
pub fn create_daterange(start: &str, end: &str) -> Result<DateRange, DashMailError> {
    let start = parse_date(start)?;
    let end = parse_date(end)?;
    if end < start {
        return Err(DashMailError::InvalidDateRange {
            start: start.to_string(),
            end: end.to_string(),
        });
    }
    Ok(DateRange { start, end })
}
