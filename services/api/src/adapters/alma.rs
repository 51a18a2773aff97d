//! services/api/src/adapters/alma.rs
//!
//! The Alma REST API adapter, the concrete implementation of the
//! `BookingProvider` port. Bookings are Alma "requests" of type BOOKING;
//! loans are created on the user by item barcode, and returns are scan-in
//! operations on the bib's first holding.
//!
//! Every call carries `format=json` and the API key as query parameters.
//! A 204 is success without a body; any 4xx/5xx becomes
//! `ProviderError::Rejected` with the decoded payload.

use std::time::Duration;

use async_trait::async_trait;
use booking_core::{
    BibId, BookingId, BookingProvider, HoldingId, Interval, ItemId, LoanId, ProviderError, ProviderResult,
};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::AlmaConfig;

const ALMA_DATETIME: &str = "%Y-%m-%dT%H:%M:%SZ";
const ALMA_DATETIME_FRACTIONAL: &str = "%Y-%m-%dT%H:%M:%S%.fZ";
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

//=========================================================================================
// Datetime and Payload Helpers
//=========================================================================================

/// Parses an Alma UTC timestamp, with or without fractional seconds.
pub fn parse_alma_datetime(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, ALMA_DATETIME)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, ALMA_DATETIME_FRACTIONAL))
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

pub fn format_alma_datetime(dt: &DateTime<Utc>) -> String {
    dt.format(ALMA_DATETIME).to_string()
}

#[derive(Debug, Deserialize)]
struct BusyPeriod {
    from_time: String,
    to_time: String,
}

#[derive(Debug, Deserialize)]
struct AvailabilityResponse {
    /// Alma sends `null` when nothing is booked.
    #[serde(default)]
    booking_availability: Option<Vec<BusyPeriod>>,
}

#[derive(Debug, Deserialize)]
struct Holding {
    holding_id: String,
}

#[derive(Debug, Deserialize)]
struct HoldingsResponse {
    #[serde(default)]
    holding: Vec<Holding>,
}

/// Reads an id that Alma sends either as a string or as a bare number.
fn id_field(response: &Value, field: &str) -> ProviderResult<String> {
    match response.get(field) {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        _ => Err(ProviderError::Malformed(format!("response has no {}", field))),
    }
}

fn request_id(response: &Value) -> ProviderResult<BookingId> {
    id_field(response, "request_id").map(BookingId)
}

fn loan_id(response: &Value) -> ProviderResult<LoanId> {
    id_field(response, "loan_id").map(LoanId)
}

fn busy_periods(response: Value) -> ProviderResult<Vec<Interval>> {
    let parsed: AvailabilityResponse =
        serde_json::from_value(response).map_err(|e| ProviderError::Malformed(e.to_string()))?;
    let mut busy = Vec::new();
    for period in parsed.booking_availability.unwrap_or_default() {
        let (Some(start), Some(end)) = (parse_alma_datetime(&period.from_time), parse_alma_datetime(&period.to_time))
        else {
            return Err(ProviderError::Malformed(format!(
                "unreadable busy period {} - {}",
                period.from_time, period.to_time
            )));
        };
        if start < end {
            busy.push(Interval::new(start, end));
        }
    }
    Ok(busy)
}

fn first_holding_id(response: Value) -> ProviderResult<HoldingId> {
    let parsed: HoldingsResponse =
        serde_json::from_value(response).map_err(|e| ProviderError::Malformed(e.to_string()))?;
    parsed
        .holding
        .into_iter()
        .next()
        .map(|h| HoldingId(h.holding_id))
        .ok_or_else(|| ProviderError::Malformed("bib has no holdings".into()))
}

/// Delay before retry number `attempt` (1-based): doubles from the base, capped.
fn retry_delay(attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    RETRY_BASE_DELAY.saturating_mul(factor).min(MAX_RETRY_DELAY)
}

fn is_retryable(err: &ProviderError) -> bool {
    match err {
        ProviderError::Transport(_) => true,
        ProviderError::Rejected { status, .. } => *status >= 500,
        ProviderError::Malformed(_) => false,
    }
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An HTTP client for the Alma REST API that implements the `BookingProvider` port.
#[derive(Clone)]
pub struct AlmaClient {
    http: Client,
    config: AlmaConfig,
}

impl AlmaClient {
    pub fn new(config: AlmaConfig) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}almaws/v1/{}", self.config.base_url, path)
    }

    /// Sends one request. `Ok(None)` is a 204.
    async fn send(&self, builder: RequestBuilder) -> ProviderResult<Option<Value>> {
        let response = builder
            .query(&[("format", "json"), ("apikey", self.config.api_key.as_str())])
            .send()
            .await
            // The URL carries the API key.
            .map_err(|e| ProviderError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| ProviderError::Transport(e.without_url().to_string()))?;

        if status.is_client_error() || status.is_server_error() {
            let payload = serde_json::from_slice(&body)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()));
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                payload,
            });
        }
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| ProviderError::Malformed(format!("status {}: {}", status, e)))
    }

    /// GETs `path`, retrying transport failures and 5xx responses.
    async fn get(&self, path: &str, query: &[(&str, String)]) -> ProviderResult<Value> {
        let mut attempt = 1;
        loop {
            let result = self.send(self.http.get(self.url(path)).query(query)).await;
            match result {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => return Ok(Value::Null),
                Err(e) if is_retryable(&e) && attempt < self.config.read_retries => {
                    let delay = retry_delay(attempt);
                    warn!("Alma GET {} failed (attempt {}), retrying in {:?}: {}", path, attempt, delay, e);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

//=========================================================================================
// `BookingProvider` Trait Implementation
//=========================================================================================

#[async_trait]
impl BookingProvider for AlmaClient {
    async fn create_booking(&self, user: &str, bib_id: &BibId, interval: &Interval) -> ProviderResult<BookingId> {
        let body = json!({
            "request_type": "BOOKING",
            "pickup_location_type": "LIBRARY",
            "pickup_location_library": self.config.library_code,
            "booking_start_date": format_alma_datetime(&interval.start),
            "booking_end_date": format_alma_datetime(&interval.end),
        });
        let builder = self
            .http
            .post(self.url(&format!("bibs/{}/requests", bib_id)))
            .query(&[("user_id", user), ("user_id_type", self.config.user_id_type.as_str())])
            .json(&body);
        let response = self
            .send(builder)
            .await?
            .ok_or_else(|| ProviderError::Malformed("empty booking response".into()))?;
        let id = request_id(&response)?;
        debug!("Alma created request {} on bib {}", id, bib_id);
        Ok(id)
    }

    async fn cancel_booking(&self, booking_id: &BookingId, bib_id: &BibId) -> ProviderResult<()> {
        let builder = self
            .http
            .delete(self.url(&format!("bibs/{}/requests/{}", bib_id, booking_id)));
        self.send(builder).await?;
        Ok(())
    }

    async fn get_availability(&self, bib_id: &BibId, horizon_days: u32) -> ProviderResult<Vec<Interval>> {
        let response = self
            .get(
                &format!("bibs/{}/booking-availability", bib_id),
                &[("period", horizon_days.to_string()), ("period_type", "days".to_string())],
            )
            .await?;
        busy_periods(response)
    }

    async fn create_loan(&self, user: &str, barcode: &str) -> ProviderResult<LoanId> {
        let body = json!({
            "circ_desk": { "value": self.config.circ_desk },
            "library": { "value": self.config.library_code },
        });
        let builder = self
            .http
            .post(self.url(&format!("users/{}/loans", user)))
            .query(&[("user_id_type", self.config.user_id_type.as_str()), ("item_barcode", barcode)])
            .json(&body);
        let response = self
            .send(builder)
            .await?
            .ok_or_else(|| ProviderError::Malformed("empty loan response".into()))?;
        let id = loan_id(&response)?;
        debug!("Alma created loan {} for {} on item {}", id, user, barcode);
        Ok(id)
    }

    async fn first_holding(&self, bib_id: &BibId) -> ProviderResult<HoldingId> {
        let response = self.get(&format!("bibs/{}/holdings", bib_id), &[]).await?;
        first_holding_id(response)
    }

    async fn scan_in(&self, bib_id: &BibId, holding_id: &HoldingId, item_id: &ItemId) -> ProviderResult<()> {
        let builder = self
            .http
            .post(self.url(&format!("bibs/{}/holdings/{}/items/{}", bib_id, holding_id, item_id)))
            .query(&[
                ("op", "scan"),
                ("library", self.config.library_code.as_str()),
                ("circ_desk", self.config.circ_desk.as_str()),
            ]);
        self.send(builder).await?;
        Ok(())
    }
}
