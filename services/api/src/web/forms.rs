//! services/api/src/web/forms.rs
//!
//! Request payloads as staff submit them, and their conversion into
//! booking-engine inputs.

use std::sync::LazyLock;

use booking_core::{end_of_day, BibId, DayOfWeek, Interval, NewReservation};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use regex::Regex;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use crate::error::ApiError;

/// Default and maximum size of the calendar window, in days.
pub const CALENDAR_DAYS: u32 = 90;
const MAX_CALENDAR_DAYS: u32 = 366;

static LABELLED_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((.+)\)$").expect("labelled id pattern is valid"));

/// Extracts the id from `"Display Name (id)"`, or accepts a bare id.
pub fn parse_identity(field: &str, raw: &str) -> Result<String, ApiError> {
    let raw = raw.trim();
    if let Some(captures) = LABELLED_ID.captures(raw) {
        let id = captures[1].trim();
        if !id.is_empty() {
            return Ok(id.to_string());
        }
    }
    if raw.is_empty() || raw.contains(char::is_whitespace) || raw.contains(['(', ')']) {
        return Err(ApiError::BadRequest(format!("{field} must be of the form 'name (id)'")));
    }
    Ok(raw.to_string())
}

/// ORs a list of single-day values (Sunday = 1 ... Saturday = 64).
pub fn parse_repeat_on(values: &[i32]) -> Result<DayOfWeek, ApiError> {
    values
        .iter()
        .map(|value| {
            DayOfWeek::new(*value)
                .filter(|day| DayOfWeek::DAYS.contains(day))
                .ok_or_else(|| ApiError::BadRequest(format!("{value} is not a day of the week")))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(DayOfWeek::from_days)
}

/// The form for creating a reservation.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateReservationForm {
    /// `"Name (username)"` or a bare username.
    pub user: String,
    /// `"Title (mms id)"` or a bare mms id.
    pub bib: String,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    /// Day values to repeat on; empty for a one-off booking.
    #[serde(default)]
    pub repeat_on: Vec<i32>,
    /// Last day of the series, inclusive.
    #[serde(default)]
    pub end_repeating_on: Option<NaiveDate>,
}

impl CreateReservationForm {
    pub fn into_request(self, created_by: Option<String>) -> Result<NewReservation, ApiError> {
        let user = parse_identity("user", &self.user)?;
        let bib_id = BibId(parse_identity("bib", &self.bib)?);
        let repeat_on = parse_repeat_on(&self.repeat_on)?;
        let end_repeating_on = match self.end_repeating_on {
            Some(date) => Some(
                end_of_day(date, self.start.offset())
                    .ok_or_else(|| ApiError::BadRequest(format!("{date} has no end of day")))?,
            ),
            None => None,
        };
        Ok(NewReservation {
            bib_id,
            user,
            created_by,
            start: self.start,
            end: self.end,
            end_repeating_on,
            repeat_on,
        })
    }
}

#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
pub struct IntervalInput {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Which of `intervals` each of `bibs` is free for.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AvailabilityForm {
    pub bibs: Vec<String>,
    pub intervals: Vec<IntervalInput>,
}

impl AvailabilityForm {
    pub fn parse(self) -> Result<(Vec<BibId>, Vec<Interval>), ApiError> {
        if self.bibs.is_empty() || self.intervals.is_empty() {
            return Err(ApiError::BadRequest("at least one bib and one interval are required".into()));
        }
        let bibs = self
            .bibs
            .iter()
            .map(|raw| parse_identity("bib", raw).map(BibId))
            .collect::<Result<Vec<_>, _>>()?;
        let intervals = self
            .intervals
            .iter()
            .map(|i| {
                if i.start < i.end {
                    Ok(Interval::new(i.start, i.end))
                } else {
                    Err(ApiError::BadRequest(format!("{} is not before {}", i.start, i.end)))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok((bibs, intervals))
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CalendarQuery {
    /// Start of the window; defaults to now.
    pub from: Option<DateTime<Utc>>,
    /// Length of the window in days; defaults to 90.
    pub days: Option<u32>,
}

impl CalendarQuery {
    pub fn window(&self, now: DateTime<Utc>) -> Result<Interval, ApiError> {
        let days = self.days.unwrap_or(CALENDAR_DAYS);
        if days == 0 || days > MAX_CALENDAR_DAYS {
            return Err(ApiError::BadRequest(format!("days must be between 1 and {MAX_CALENDAR_DAYS}")));
        }
        let start = self.from.unwrap_or(now);
        Ok(Interval::new(start, start + Duration::days(i64::from(days))))
    }
}
