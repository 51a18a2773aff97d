//! services/api/src/web/middleware.rs
//!
//! Staff identification for routes that change bookings.

use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use tracing::warn;

pub const STAFF_HEADER: &str = "x-staff-user";

/// The staff member acting on a request, recorded as a reservation's creator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaffUser(pub String);

/// Middleware that reads the `x-staff-user` header into a [`StaffUser`] extension.
///
/// Requests without a usable header are rejected with 401 Unauthorized.
pub async fn require_staff(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    let staff = req
        .headers()
        .get(STAFF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            warn!("Rejected {} {}: no {} header", req.method(), req.uri(), STAFF_HEADER);
            StatusCode::UNAUTHORIZED
        })?;

    req.extensions_mut().insert(StaffUser(staff));
    Ok(next.run(req).await)
}
