//! crates/booking_core/src/error.rs
//!
//! The error type returned by every booking-engine operation.

use crate::conflict::Conflict;
use crate::domain::{BookingId, BookingState};
use crate::ports::{PortError, ProviderError};

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    /// Malformed or inconsistent input. Nothing was attempted.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// The requested intervals overlap existing bookings. Nothing was attempted.
    #[error("That time is not available ({} conflicting interval(s))", .conflicts.len())]
    Unavailable { conflicts: Vec<Conflict> },

    #[error("Cannot change a {from} booking to {to}")]
    InvalidTransition { from: BookingState, to: BookingState },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Booking provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Storage error: {0}")]
    Store(PortError),

    /// Local and remote state have diverged; `bookings` need manual repair.
    #[error("Local and remote state diverged: {message}")]
    StateConsistency {
        message: String,
        bookings: Vec<BookingId>,
    },

    /// A multi-booking deletion stopped at the first failure.
    #[error("Deletion stopped after {} booking(s); {} remain", .deleted.len(), .remaining.len())]
    Incomplete {
        deleted: Vec<BookingId>,
        remaining: Vec<BookingId>,
        #[source]
        source: Box<BookingError>,
    },
}

impl From<PortError> for BookingError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::NotFound(what) => BookingError::NotFound(what),
            other => BookingError::Store(other),
        }
    }
}

impl BookingError {
    pub(crate) fn diverged(message: impl Into<String>, bookings: Vec<BookingId>) -> Self {
        BookingError::StateConsistency {
            message: message.into(),
            bookings,
        }
    }
}
