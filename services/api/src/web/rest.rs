//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::error::{ApiError, ErrorBody};
use crate::web::forms::{AvailabilityForm, CalendarQuery, CreateReservationForm, IntervalInput};
use crate::web::middleware::StaffUser;
use crate::web::state::AppState;
use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use booking_core::{
    AvailabilityRow, Booking, BookingId, DeleteScope, DeletionReport, ItemId, Reservation, ReservationDetails,
    StateChange,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        create_reservation_handler,
        get_reservation_handler,
        delete_reservation_handler,
        get_booking_handler,
        change_state_handler,
        delete_booking_handler,
        availability_handler,
        user_bookings_handler,
        calendar_handler,
    ),
    components(
        schemas(
            CreateReservationForm,
            AvailabilityForm,
            IntervalInput,
            ReservationView,
            ReservationDetailsView,
            BookingView,
            StateChangeRequest,
            TargetState,
            DeletionView,
            AvailabilityView,
            SlotView,
            ErrorBody,
        )
    ),
    tags(
        (name = "Equipment Booking API", description = "Recurring reservations of library equipment.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct ReservationView {
    id: Uuid,
    bib_id: String,
    user: String,
    created_by: Option<String>,
    /// Bitmask, Sunday = 1 ... Saturday = 64.
    repeat_on: i32,
    /// The repeat days spelled out, e.g. `"Mon, Wed"`.
    repeat_on_days: String,
    end_repeating_on: Option<DateTime<Utc>>,
    created_on: DateTime<Utc>,
}

impl From<Reservation> for ReservationView {
    fn from(r: Reservation) -> Self {
        Self {
            id: r.id,
            bib_id: r.bib_id.0,
            user: r.user,
            created_by: r.created_by,
            repeat_on: i32::from(r.repeat_on),
            repeat_on_days: r.repeat_on.to_string(),
            end_repeating_on: r.end_repeating_on,
            created_on: r.created_on,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct BookingView {
    id: String,
    reservation_id: Uuid,
    bib_id: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    /// `reserved`, `loaned` or `returned`.
    state: String,
    item_id: Option<String>,
    /// The provider's loan, once the item is checked out.
    loan_id: Option<String>,
    created_on: DateTime<Utc>,
    loaned_on: Option<DateTime<Utc>>,
    returned_on: Option<DateTime<Utc>>,
}

impl From<Booking> for BookingView {
    fn from(b: Booking) -> Self {
        Self {
            id: b.id.0,
            reservation_id: b.reservation_id,
            bib_id: b.bib_id.0,
            start: b.interval.start,
            end: b.interval.end,
            state: b.state.to_string(),
            item_id: b.item_id.map(|i| i.0),
            loan_id: b.loan_id.map(|l| l.0),
            created_on: b.created_on,
            loaned_on: b.loaned_on,
            returned_on: b.returned_on,
        }
    }
}

fn booking_views(bookings: Vec<Booking>) -> Vec<BookingView> {
    bookings.into_iter().map(BookingView::from).collect()
}

#[derive(Serialize, ToSchema)]
pub struct ReservationDetailsView {
    reservation: ReservationView,
    bookings: Vec<BookingView>,
}

impl From<ReservationDetails> for ReservationDetailsView {
    fn from(d: ReservationDetails) -> Self {
        Self {
            reservation: d.reservation.into(),
            bookings: booking_views(d.bookings),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    Loaned,
    Returned,
}

/// The payload for moving a booking forward.
#[derive(Debug, Deserialize, ToSchema)]
pub struct StateChangeRequest {
    state: TargetState,
    /// Required when the booking is loaned.
    item_id: Option<String>,
    /// The barcode of the item handed out. Required when the booking is loaned.
    barcode: Option<String>,
}

fn required(field: &str, value: Option<String>) -> Result<String, ApiError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("{field} is required to loan a booking")))
}

impl StateChangeRequest {
    fn into_change(self) -> Result<StateChange, ApiError> {
        match self.state {
            TargetState::Loaned => Ok(StateChange::Loaned {
                item_id: ItemId(required("item_id", self.item_id)?),
                barcode: required("barcode", self.barcode)?,
            }),
            TargetState::Returned => Ok(StateChange::Returned),
        }
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DeleteBookingQuery {
    /// `this` (default), `following` or `series`.
    #[param(value_type = Option<String>)]
    #[serde(default)]
    scope: DeleteScope,
}

#[derive(Serialize, ToSchema)]
pub struct DeletionView {
    deleted: Vec<String>,
    reservation_deleted: bool,
}

impl From<DeletionReport> for DeletionView {
    fn from(r: DeletionReport) -> Self {
        Self {
            deleted: r.deleted.into_iter().map(|id| id.0).collect(),
            reservation_deleted: r.reservation_deleted,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct SlotView {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    is_available: bool,
}

#[derive(Serialize, ToSchema)]
pub struct AvailabilityView {
    bib_id: String,
    slots: Vec<SlotView>,
}

impl From<AvailabilityRow> for AvailabilityView {
    fn from(row: AvailabilityRow) -> Self {
        Self {
            bib_id: row.bib_id.0,
            slots: row
                .slots
                .into_iter()
                .map(|s| SlotView {
                    start: s.interval.start,
                    end: s.interval.end,
                    is_available: s.is_available,
                })
                .collect(),
        }
    }
}

//=========================================================================================
// Reservation Handlers
//=========================================================================================

/// Create a reservation and book every interval it expands into.
///
/// Either every booking is created or none is.
#[utoipa::path(
    post,
    path = "/reservations",
    request_body = CreateReservationForm,
    responses(
        (status = 201, description = "Reservation created", body = ReservationDetailsView),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 409, description = "The bib is not available for some interval", body = ErrorBody),
        (status = 502, description = "The booking provider failed", body = ErrorBody)
    ),
    params(
        ("x-staff-user" = String, Header, description = "The staff member creating the reservation.")
    )
)]
pub async fn create_reservation_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(StaffUser(staff)): Extension<StaffUser>,
    Json(form): Json<CreateReservationForm>,
) -> Result<impl IntoResponse, ApiError> {
    let request = form.into_request(Some(staff))?;
    let details = app_state.service.create(request).await?;
    Ok((StatusCode::CREATED, Json(ReservationDetailsView::from(details))))
}

/// Fetch a reservation with its bookings.
#[utoipa::path(
    get,
    path = "/reservations/{id}",
    responses(
        (status = 200, description = "The reservation", body = ReservationDetailsView),
        (status = 404, description = "No such reservation", body = ErrorBody)
    ),
    params(("id" = Uuid, Path, description = "The reservation id."))
)]
pub async fn get_reservation_handler(
    State(app_state): State<Arc<AppState>>,
    Path(reservation_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let details = app_state.service.get(reservation_id).await?;
    Ok(Json(ReservationDetailsView::from(details)))
}

/// Cancel every booking of a reservation and delete it.
#[utoipa::path(
    delete,
    path = "/reservations/{id}",
    responses(
        (status = 200, description = "Reservation deleted", body = DeletionView),
        (status = 404, description = "No such reservation", body = ErrorBody),
        (status = 500, description = "Deletion stopped part way", body = ErrorBody)
    ),
    params(
        ("id" = Uuid, Path, description = "The reservation id."),
        ("x-staff-user" = String, Header, description = "The staff member deleting the reservation.")
    )
)]
pub async fn delete_reservation_handler(
    State(app_state): State<Arc<AppState>>,
    Path(reservation_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let report = app_state.service.delete_reservation(reservation_id).await?;
    Ok(Json(DeletionView::from(report)))
}

//=========================================================================================
// Booking Handlers
//=========================================================================================

#[utoipa::path(
    get,
    path = "/bookings/{id}",
    responses(
        (status = 200, description = "The booking", body = BookingView),
        (status = 404, description = "No such booking", body = ErrorBody)
    ),
    params(("id" = String, Path, description = "The booking id issued by the provider."))
)]
pub async fn get_booking_handler(
    State(app_state): State<Arc<AppState>>,
    Path(booking_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let booking = app_state.service.booking(&BookingId(booking_id)).await?;
    Ok(Json(BookingView::from(booking)))
}

/// Loan or return a booking.
#[utoipa::path(
    put,
    path = "/bookings/{id}/state",
    request_body = StateChangeRequest,
    responses(
        (status = 200, description = "The updated booking", body = BookingView),
        (status = 400, description = "Transition not allowed", body = ErrorBody),
        (status = 404, description = "No such booking", body = ErrorBody),
        (status = 502, description = "The booking provider failed", body = ErrorBody)
    ),
    params(
        ("id" = String, Path, description = "The booking id issued by the provider."),
        ("x-staff-user" = String, Header, description = "The staff member handling the item.")
    )
)]
pub async fn change_state_handler(
    State(app_state): State<Arc<AppState>>,
    Path(booking_id): Path<String>,
    Json(payload): Json<StateChangeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let change = payload.into_change()?;
    let booking = app_state.service.change_state(&BookingId(booking_id), change).await?;
    Ok(Json(BookingView::from(booking)))
}

/// Delete a booking, the bookings after it, or its whole series.
#[utoipa::path(
    delete,
    path = "/bookings/{id}",
    responses(
        (status = 200, description = "Bookings deleted", body = DeletionView),
        (status = 404, description = "No such booking", body = ErrorBody),
        (status = 500, description = "Deletion stopped part way", body = ErrorBody)
    ),
    params(
        ("id" = String, Path, description = "The booking id issued by the provider."),
        DeleteBookingQuery,
        ("x-staff-user" = String, Header, description = "The staff member deleting the booking.")
    )
)]
pub async fn delete_booking_handler(
    State(app_state): State<Arc<AppState>>,
    Path(booking_id): Path<String>,
    Query(query): Query<DeleteBookingQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let report = app_state
        .service
        .delete_booking(&BookingId(booking_id), query.scope)
        .await?;
    Ok(Json(DeletionView::from(report)))
}

//=========================================================================================
// Listing Handlers
//=========================================================================================

/// Preview which intervals each bib is free for, according to the provider.
#[utoipa::path(
    post,
    path = "/availability",
    request_body = AvailabilityForm,
    responses(
        (status = 200, description = "Availability per bib and interval", body = [AvailabilityView]),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 502, description = "The booking provider failed", body = ErrorBody)
    )
)]
pub async fn availability_handler(
    State(app_state): State<Arc<AppState>>,
    Json(form): Json<AvailabilityForm>,
) -> Result<impl IntoResponse, ApiError> {
    let (bibs, intervals) = form.parse()?;
    let rows = app_state
        .service
        .preview_availability(&bibs, &intervals, Utc::now())
        .await?;
    Ok(Json(rows.into_iter().map(AvailabilityView::from).collect::<Vec<_>>()))
}

/// Bookings of a user that have not ended yet.
#[utoipa::path(
    get,
    path = "/users/{username}/bookings",
    responses((status = 200, description = "Upcoming bookings", body = [BookingView])),
    params(("username" = String, Path, description = "The user's id in the library system."))
)]
pub async fn user_bookings_handler(
    State(app_state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let bookings = app_state.service.upcoming_for_user(&username, Utc::now()).await?;
    Ok(Json(booking_views(bookings)))
}

/// Every booking in a window, 90 days from now by default.
#[utoipa::path(
    get,
    path = "/calendar",
    responses(
        (status = 200, description = "Bookings in the window", body = [BookingView]),
        (status = 400, description = "Invalid window", body = ErrorBody)
    ),
    params(CalendarQuery)
)]
pub async fn calendar_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<CalendarQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let window = query.window(Utc::now())?;
    let bookings = app_state.service.calendar(&window).await?;
    Ok(Json(booking_views(bookings)))
}
