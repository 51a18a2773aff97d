//! crates/booking_core/src/reservation.rs
//!
//! The reservation aggregate: expands a request into bookings, checks them for
//! conflicts, creates them through the provider and keeps the series together
//! on deletion.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use dashmap::DashMap;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::booking::{BookingLifecycle, DeleteScope, StateChange};
use crate::conflict::{find_conflicts, intersects};
use crate::domain::{BibId, Booking, BookingId, Interval, Reservation, ReservationDetails, ReservationId};
use crate::error::BookingError;
use crate::ports::{BookingProvider, ReservationStore};
use crate::recurrence::Recurrence;
use crate::weekdays::DayOfWeek;

/// Everything needed to create a reservation.
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub bib_id: BibId,
    pub user: String,
    pub created_by: Option<String>,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub end_repeating_on: Option<DateTime<FixedOffset>>,
    pub repeat_on: DayOfWeek,
}

impl NewReservation {
    /// Checks the request and drops the recurrence end when nothing repeats.
    pub fn validate(mut self) -> Result<Self, BookingError> {
        if self.user.trim().is_empty() {
            return Err(BookingError::Validation("a user is required".into()));
        }
        if self.bib_id.as_str().trim().is_empty() {
            return Err(BookingError::Validation("a bib is required".into()));
        }
        if self.start >= self.end {
            return Err(BookingError::Validation("the start must be before the end".into()));
        }
        if self.repeat_on.is_empty() {
            self.end_repeating_on = None;
            return Ok(self);
        }
        match self.end_repeating_on {
            None => Err(BookingError::Validation("repeating reservations need an end date".into())),
            Some(until) if until <= self.start => Err(BookingError::Validation(
                "the repeat end date must be after the start".into(),
            )),
            Some(_) => Ok(self),
        }
    }

    pub fn recurrence(&self) -> Recurrence<FixedOffset> {
        Recurrence::new(self.start, self.end, self.end_repeating_on, self.repeat_on)
    }
}

/// Stretches a repeat end date to the last second of that day, in `offset`.
pub fn end_of_day(date: NaiveDate, offset: &FixedOffset) -> Option<DateTime<FixedOffset>> {
    let last_second = NaiveTime::from_hms_opt(23, 59, 59)?;
    offset.from_local_datetime(&date.and_time(last_second)).single()
}

/// What a deletion removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionReport {
    pub deleted: Vec<BookingId>,
    /// Set when the parent reservation went away as well.
    pub reservation_deleted: bool,
}

/// Availability of one bib for each requested interval, per the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRow {
    pub bib_id: BibId,
    pub slots: Vec<SlotAvailability>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotAvailability {
    pub interval: Interval,
    pub is_available: bool,
}

/// Orchestrates reservations on top of the store and provider ports.
///
/// Checking availability and creating the bookings happens under a per-bib
/// lock, so two concurrent requests for the same bib cannot both pass the
/// check. Different bibs never wait on each other.
pub struct ReservationService {
    store: Arc<dyn ReservationStore>,
    provider: Arc<dyn BookingProvider>,
    bib_locks: DashMap<BibId, Arc<Mutex<()>>>,
}

impl ReservationService {
    pub fn new(store: Arc<dyn ReservationStore>, provider: Arc<dyn BookingProvider>) -> Self {
        Self {
            store,
            provider,
            bib_locks: DashMap::new(),
        }
    }

    fn lifecycle(&self) -> BookingLifecycle<'_> {
        BookingLifecycle::new(self.store.as_ref(), self.provider.as_ref())
    }

    fn bib_lock(&self, bib_id: &BibId) -> Arc<Mutex<()>> {
        self.bib_locks.entry(bib_id.clone()).or_default().clone()
    }

    /// Drops the lock of `bib_id` once no request holds or awaits it.
    fn release_bib_lock(&self, bib_id: &BibId) {
        self.bib_locks.remove_if(bib_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    //=====================================================================================
    // Creation
    //=====================================================================================

    pub async fn create(&self, request: NewReservation) -> Result<ReservationDetails, BookingError> {
        let request = request.validate()?;
        let candidates: Vec<Interval> = request.recurrence().iter().collect();
        let window = Interval::spanning(&candidates)
            .ok_or_else(|| BookingError::Validation("the request does not produce any interval".into()))?;

        let bib_id = request.bib_id.clone();
        let lock = self.bib_lock(&bib_id);
        let result = {
            let _guard = lock.lock().await;
            self.check_and_book(request, candidates, window).await
        };
        drop(lock);
        self.release_bib_lock(&bib_id);
        result
    }

    /// Runs with the bib's lock held.
    async fn check_and_book(
        &self,
        request: NewReservation,
        candidates: Vec<Interval>,
        window: Interval,
    ) -> Result<ReservationDetails, BookingError> {
        let existing = self.store.intervals_overlapping(&request.bib_id, &window).await?;
        let conflicts = find_conflicts(&candidates, &existing);
        if !conflicts.is_empty() {
            info!("Bib {} unavailable: {} conflict(s)", request.bib_id, conflicts.len());
            return Err(BookingError::Unavailable { conflicts });
        }

        let now = Utc::now();
        let reservation = Reservation {
            id: Uuid::new_v4(),
            bib_id: request.bib_id,
            user: request.user,
            created_by: request.created_by,
            repeat_on: request.repeat_on,
            end_repeating_on: request.end_repeating_on.map(|d| d.with_timezone(&Utc)),
            created_on: now,
        };
        self.store.insert_reservation(&reservation).await?;

        let lifecycle = self.lifecycle();
        let mut bookings = Vec::with_capacity(candidates.len());
        for interval in candidates {
            match lifecycle.create(&reservation, interval, now).await {
                Ok(booking) => bookings.push(booking),
                Err(cause) => return Err(self.roll_back(&reservation, &bookings, cause).await),
            }
        }

        info!(
            "Reservation {} created for {} on bib {} with {} booking(s)",
            reservation.id,
            reservation.user,
            reservation.bib_id,
            bookings.len()
        );
        Ok(ReservationDetails { reservation, bookings })
    }

    /// Undoes a partially created reservation after `cause` stopped it.
    async fn roll_back(&self, reservation: &Reservation, created: &[Booking], cause: BookingError) -> BookingError {
        warn!(
            "Creating reservation {} failed after {} booking(s), rolling back: {}",
            reservation.id,
            created.len(),
            cause
        );
        let lifecycle = self.lifecycle();
        let mut orphaned = Vec::new();
        for booking in created.iter().rev() {
            if let Err(e) = lifecycle.cancel(booking).await {
                error!("Rollback could not cancel booking {}: {}", booking.id, e);
                orphaned.push(booking.id.clone());
            }
        }
        if !orphaned.is_empty() {
            return BookingError::diverged(
                format!("creation failed ({cause}) and some bookings could not be rolled back"),
                orphaned,
            );
        }
        if let Err(e) = self.store.delete_reservation(reservation.id).await {
            error!("Rollback could not delete reservation {}: {:?}", reservation.id, e);
            return BookingError::diverged(
                format!(
                    "creation failed ({cause}) and reservation {} remains without bookings: {e}",
                    reservation.id
                ),
                Vec::new(),
            );
        }
        cause
    }

    //=====================================================================================
    // Queries
    //=====================================================================================

    pub async fn get(&self, reservation_id: ReservationId) -> Result<ReservationDetails, BookingError> {
        let reservation = self.store.get_reservation(reservation_id).await?;
        let bookings = self.store.bookings_for_reservation(reservation_id).await?;
        Ok(ReservationDetails { reservation, bookings })
    }

    pub async fn booking(&self, booking_id: &BookingId) -> Result<Booking, BookingError> {
        Ok(self.store.get_booking(booking_id).await?)
    }

    /// Bookings of `user` that have not ended yet.
    pub async fn upcoming_for_user(&self, user: &str, now: DateTime<Utc>) -> Result<Vec<Booking>, BookingError> {
        Ok(self.store.bookings_for_user(user, now).await?)
    }

    pub async fn calendar(&self, window: &Interval) -> Result<Vec<Booking>, BookingError> {
        Ok(self.store.bookings_between(window).await?)
    }

    /// Asks the provider, for each bib, which of `intervals` are free.
    ///
    /// This is only a preview: the authoritative check happens in [`Self::create`].
    pub async fn preview_availability(
        &self,
        bibs: &[BibId],
        intervals: &[Interval],
        now: DateTime<Utc>,
    ) -> Result<Vec<AvailabilityRow>, BookingError> {
        let Some(last_end) = intervals.iter().map(|i| i.end).max() else {
            return Ok(Vec::new());
        };
        let horizon_days = u32::try_from((last_end - now).num_days() + 1).unwrap_or(1).max(1);

        let lookups = bibs.iter().map(|bib_id| async move {
            let busy = self.provider.get_availability(bib_id, horizon_days).await?;
            let slots = intervals
                .iter()
                .map(|interval| SlotAvailability {
                    interval: *interval,
                    is_available: !busy.iter().any(|b| intersects(interval, b)),
                })
                .collect();
            Ok::<_, BookingError>(AvailabilityRow {
                bib_id: bib_id.clone(),
                slots,
            })
        });
        try_join_all(lookups).await
    }

    //=====================================================================================
    // State changes
    //=====================================================================================

    pub async fn change_state(&self, booking_id: &BookingId, change: StateChange) -> Result<Booking, BookingError> {
        let mut booking = self.store.get_booking(booking_id).await?;
        let reservation = self.store.get_reservation(booking.reservation_id).await?;
        self.lifecycle()
            .advance(&mut booking, &reservation.user, change, Utc::now())
            .await?;
        Ok(booking)
    }

    //=====================================================================================
    // Deletion
    //=====================================================================================

    /// Deletes `booking_id`, the bookings after it, or its whole series.
    /// An emptied reservation is removed as well.
    pub async fn delete_booking(&self, booking_id: &BookingId, scope: DeleteScope) -> Result<DeletionReport, BookingError> {
        let booking = self.store.get_booking(booking_id).await?;
        let lifecycle = self.lifecycle();

        let deleted = match scope {
            DeleteScope::Series => return self.delete_reservation(booking.reservation_id).await,
            DeleteScope::This => {
                lifecycle.cancel(&booking).await?;
                vec![booking.id.clone()]
            }
            DeleteScope::Following => {
                let mut following: Vec<Booking> = self
                    .store
                    .bookings_for_reservation(booking.reservation_id)
                    .await?
                    .into_iter()
                    .filter(|b| b.interval.start >= booking.interval.start)
                    .collect();
                following.sort_by_key(|b| b.interval.start);
                lifecycle.cancel_all(&following).await?
            }
        };

        let remaining = self.store.bookings_for_reservation(booking.reservation_id).await?;
        let reservation_deleted = remaining.is_empty();
        if reservation_deleted {
            self.store.delete_reservation(booking.reservation_id).await?;
            info!("Reservation {} emptied and deleted", booking.reservation_id);
        }
        Ok(DeletionReport {
            deleted,
            reservation_deleted,
        })
    }

    /// Deletes every booking of the reservation, then the reservation itself.
    /// Stops at the first booking that cannot be cancelled.
    pub async fn delete_reservation(&self, reservation_id: ReservationId) -> Result<DeletionReport, BookingError> {
        let bookings = self.store.bookings_for_reservation(reservation_id).await?;
        let deleted = self.lifecycle().cancel_all(&bookings).await?;
        self.store.delete_reservation(reservation_id).await?;
        info!("Reservation {} deleted with {} booking(s)", reservation_id, deleted.len());
        Ok(DeletionReport {
            deleted,
            reservation_deleted: true,
        })
    }
}
