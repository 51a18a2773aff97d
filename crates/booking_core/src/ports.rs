//! crates/booking_core/src/ports.rs
//!
//! Defines the service contracts (traits) the booking engine depends on.
//! These traits form the boundary of the hexagonal architecture: the engine
//! never talks to a database or to the remote library system directly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{BibId, Booking, BookingId, HoldingId, Interval, ItemId, LoanId, Reservation};

//=========================================================================================
// Port Error and Result Types
//=========================================================================================

/// A generic error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// The store refused a write because it would overlap an existing booking.
    #[error("Conflicting write: {0}")]
    Conflict(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// Failures reported by the external booking provider.
///
/// The `Display` form never includes the provider's payload; it is only
/// available through [`ProviderError::payload`] and the `Debug` form.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("The booking provider rejected the request (status {status})")]
    Rejected {
        status: u16,
        payload: serde_json::Value,
    },
    #[error("Could not reach the booking provider: {0}")]
    Transport(String),
    #[error("Unexpected response from the booking provider: {0}")]
    Malformed(String),
}

impl ProviderError {
    pub fn payload(&self) -> Option<&serde_json::Value> {
        match self {
            ProviderError::Rejected { payload, .. } => Some(payload),
            _ => None,
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReservationStore: Send + Sync {
    // --- Reservations ---
    async fn insert_reservation(&self, reservation: &Reservation) -> PortResult<()>;

    async fn get_reservation(&self, reservation_id: Uuid) -> PortResult<Reservation>;

    /// Removes a reservation. Its bookings must already be gone.
    async fn delete_reservation(&self, reservation_id: Uuid) -> PortResult<()>;

    // --- Bookings ---
    async fn insert_booking(&self, booking: &Booking) -> PortResult<()>;

    async fn get_booking(&self, booking_id: &BookingId) -> PortResult<Booking>;

    /// Persists the state, item and lifecycle timestamps of a booking.
    async fn update_booking(&self, booking: &Booking) -> PortResult<()>;

    async fn delete_booking(&self, booking_id: &BookingId) -> PortResult<()>;

    /// The bookings of one reservation, ordered by start.
    async fn bookings_for_reservation(&self, reservation_id: Uuid) -> PortResult<Vec<Booking>>;

    /// Every booked interval of a bib that overlaps `window`.
    async fn intervals_overlapping(&self, bib_id: &BibId, window: &Interval) -> PortResult<Vec<Interval>>;

    // --- Listings ---
    async fn bookings_for_user(&self, user: &str, ending_after: DateTime<Utc>) -> PortResult<Vec<Booking>>;

    async fn bookings_between(&self, window: &Interval) -> PortResult<Vec<Booking>>;
}

/// The remote library system that is the authority on bookings and loans.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BookingProvider: Send + Sync {
    /// Books `bib_id` for `user` and returns the provider's booking id.
    async fn create_booking(&self, user: &str, bib_id: &BibId, interval: &Interval) -> ProviderResult<BookingId>;

    async fn cancel_booking(&self, booking_id: &BookingId, bib_id: &BibId) -> ProviderResult<()>;

    /// The busy periods of `bib_id` within the next `horizon_days` days.
    async fn get_availability(&self, bib_id: &BibId, horizon_days: u32) -> ProviderResult<Vec<Interval>>;

    /// Checks the item with `barcode` out to `user` and returns the loan id.
    async fn create_loan(&self, user: &str, barcode: &str) -> ProviderResult<LoanId>;

    /// The holding items of `bib_id` are scanned back into.
    async fn first_holding(&self, bib_id: &BibId) -> ProviderResult<HoldingId>;

    /// Records the physical return of an item.
    async fn scan_in(&self, bib_id: &BibId, holding_id: &HoldingId, item_id: &ItemId) -> ProviderResult<()>;
}
