//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service and how it is
//! rendered as an HTTP response.

use crate::config::ConfigError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use booking_core::{BookingError, BookingId, Conflict, PortError};
use serde::Serialize;
use tracing::{error, warn};
use utoipa::ToSchema;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A request that could not be parsed into a booking-engine call.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Represents an error that propagated up from the booking engine.
    #[error(transparent)]
    Booking(#[from] BookingError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

/// The JSON body of every error response.
#[derive(Debug, Default, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    /// The requested intervals that collide with existing bookings.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[schema(value_type = Vec<Object>)]
    pub conflicts: Vec<Conflict>,
    /// Bookings whose local and remote state may disagree.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[schema(value_type = Vec<String>)]
    pub bookings: Vec<BookingId>,
    /// Bookings a stopped deletion did remove.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[schema(value_type = Vec<String>)]
    pub deleted: Vec<BookingId>,
}

impl ErrorBody {
    fn message(error: impl ToString) -> Self {
        Self {
            error: error.to_string(),
            ..Self::default()
        }
    }
}

fn booking_response(err: BookingError) -> (StatusCode, ErrorBody) {
    match err {
        BookingError::Validation(_) | BookingError::InvalidTransition { .. } => {
            (StatusCode::BAD_REQUEST, ErrorBody::message(err))
        }
        BookingError::NotFound(_) => (StatusCode::NOT_FOUND, ErrorBody::message(err)),
        BookingError::Unavailable { ref conflicts } => {
            let conflicts = conflicts.clone();
            (
                StatusCode::CONFLICT,
                ErrorBody {
                    conflicts,
                    ..ErrorBody::message(err)
                },
            )
        }
        BookingError::Store(PortError::Conflict(_)) => {
            (StatusCode::CONFLICT, ErrorBody::message("That time is not available"))
        }
        BookingError::Store(ref e) => {
            error!("Storage failure: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, ErrorBody::message("Storage failure"))
        }
        BookingError::Provider(ref e) => {
            // The payload goes to the log only.
            warn!("Booking provider failure: {} payload={:?}", e, e.payload());
            (StatusCode::BAD_GATEWAY, ErrorBody::message(e))
        }
        BookingError::StateConsistency { ref bookings, .. } => {
            error!("{}: {:?}", err, bookings);
            let bookings = bookings.clone();
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    bookings,
                    ..ErrorBody::message(err)
                },
            )
        }
        BookingError::Incomplete {
            deleted,
            remaining,
            source,
        } => {
            error!("Deletion stopped, {} booking(s) remain: {}", remaining.len(), source);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    error: format!("Deletion stopped before finishing: {source}"),
                    conflicts: Vec::new(),
                    bookings: remaining,
                    deleted,
                },
            )
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, ErrorBody::message(self)),
            ApiError::Booking(err) => booking_response(err),
            other => {
                error!("Internal error: {:?}", other);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody::message("An unexpected internal error occurred"),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
