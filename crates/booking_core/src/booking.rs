//! crates/booking_core/src/booking.rs
//!
//! The lifecycle of a single booking: RESERVED -> LOANED -> RETURNED.
//!
//! The pure transition rules live on [`Booking`]; [`BookingLifecycle`] pairs them
//! with the remote calls each transition requires and the local write that
//! follows. The remote call always goes first, so a local record never claims
//! something the provider did not accept.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::domain::{Booking, BookingId, BookingState, Interval, ItemId, LoanId, Reservation};
use crate::error::BookingError;
use crate::ports::{BookingProvider, ReservationStore};

/// A requested change of a booking's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StateChange {
    /// The booked equipment was handed out. `item_id` is the physical unit,
    /// `barcode` the label the provider checks it out by.
    Loaned { item_id: ItemId, barcode: String },
    Returned,
}

impl StateChange {
    pub fn target(&self) -> BookingState {
        match self {
            StateChange::Loaned { .. } => BookingState::Loaned,
            StateChange::Returned => BookingState::Returned,
        }
    }
}

/// Which bookings a deletion applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeleteScope {
    /// Only the selected booking.
    #[default]
    This,
    /// The selected booking and every later one of the same reservation.
    Following,
    /// The whole reservation.
    Series,
}

impl Booking {
    /// A freshly created booking, as returned by the provider.
    pub fn reserved(id: BookingId, reservation: &Reservation, interval: Interval, now: DateTime<Utc>) -> Self {
        Self {
            id,
            reservation_id: reservation.id,
            bib_id: reservation.bib_id.clone(),
            interval,
            state: BookingState::Reserved,
            item_id: None,
            loan_id: None,
            created_on: now,
            loaned_on: None,
            returned_on: None,
        }
    }

    /// Whether moving to `target` is a change (`true`), a no-op (`false`), or
    /// not allowed at all. States only move forward, one step at a time.
    pub fn check_transition(&self, target: BookingState) -> Result<bool, BookingError> {
        match (self.state, target) {
            (from, to) if from == to => Ok(false),
            (BookingState::Reserved, BookingState::Loaned) | (BookingState::Loaned, BookingState::Returned) => Ok(true),
            (from, to) => Err(BookingError::InvalidTransition { from, to }),
        }
    }

    /// Returns `false` if the booking was already loaned; nothing is touched then.
    pub fn mark_loaned(&mut self, item_id: ItemId, loan_id: LoanId, now: DateTime<Utc>) -> Result<bool, BookingError> {
        if !self.check_transition(BookingState::Loaned)? {
            return Ok(false);
        }
        self.state = BookingState::Loaned;
        self.item_id = Some(item_id);
        self.loan_id = Some(loan_id);
        self.loaned_on.get_or_insert(now);
        Ok(true)
    }

    /// Returns `false` if the booking was already returned.
    pub fn mark_returned(&mut self, now: DateTime<Utc>) -> Result<bool, BookingError> {
        if !self.check_transition(BookingState::Returned)? {
            return Ok(false);
        }
        self.state = BookingState::Returned;
        self.returned_on.get_or_insert(now);
        Ok(true)
    }
}

/// Runs booking transitions against the provider and the store.
pub struct BookingLifecycle<'a> {
    store: &'a dyn ReservationStore,
    provider: &'a dyn BookingProvider,
}

impl<'a> BookingLifecycle<'a> {
    pub fn new(store: &'a dyn ReservationStore, provider: &'a dyn BookingProvider) -> Self {
        Self { store, provider }
    }

    /// Books `interval` remotely, then records it. If the local write fails the
    /// remote booking is cancelled again.
    pub async fn create(&self, reservation: &Reservation, interval: Interval, now: DateTime<Utc>) -> Result<Booking, BookingError> {
        let id = self
            .provider
            .create_booking(&reservation.user, &reservation.bib_id, &interval)
            .await?;
        let booking = Booking::reserved(id, reservation, interval, now);

        if let Err(store_err) = self.store.insert_booking(&booking).await {
            error!("Failed to record booking {}: {:?}", booking.id, store_err);
            return match self.provider.cancel_booking(&booking.id, &booking.bib_id).await {
                Ok(()) => Err(store_err.into()),
                Err(cancel_err) => {
                    error!("Failed to cancel unrecorded booking {}: {:?}", booking.id, cancel_err);
                    Err(BookingError::diverged(
                        format!("booking exists remotely but could not be recorded: {store_err}"),
                        vec![booking.id],
                    ))
                }
            };
        }

        info!("Created booking {} for bib {} at {}", booking.id, booking.bib_id, booking.interval);
        Ok(booking)
    }

    /// Applies `change` to `booking`, which was reserved by `user`. Loaning
    /// checks the item out remotely and returning scans it back in, both
    /// before the local state moves.
    pub async fn advance(
        &self,
        booking: &mut Booking,
        user: &str,
        change: StateChange,
        now: DateTime<Utc>,
    ) -> Result<(), BookingError> {
        match change {
            StateChange::Loaned { item_id, barcode } => {
                if !booking.check_transition(BookingState::Loaned)? {
                    return Ok(());
                }
                let loan_id = self.provider.create_loan(user, &barcode).await?;

                booking.mark_loaned(item_id, loan_id.clone(), now)?;
                if let Err(e) = self.store.update_booking(booking).await {
                    error!("Loan {} created but booking {} not updated: {:?}", loan_id, booking.id, e);
                    return Err(BookingError::diverged(
                        format!("item was checked out as loan {loan_id} but the booking could not be updated: {e}"),
                        vec![booking.id.clone()],
                    ));
                }
                info!("Booking {} loaned (loan {})", booking.id, loan_id);
            }
            StateChange::Returned => {
                if !booking.check_transition(BookingState::Returned)? {
                    return Ok(());
                }
                let item_id = booking.item_id.clone().ok_or_else(|| {
                    BookingError::diverged("loaned booking has no item to scan in", vec![booking.id.clone()])
                })?;
                let holding_id = self.provider.first_holding(&booking.bib_id).await?;
                self.provider.scan_in(&booking.bib_id, &holding_id, &item_id).await?;

                booking.mark_returned(now)?;
                if let Err(e) = self.store.update_booking(booking).await {
                    error!("Item {} scanned in but booking {} not updated: {:?}", item_id, booking.id, e);
                    return Err(BookingError::diverged(
                        format!("item was scanned in but the booking could not be updated: {e}"),
                        vec![booking.id.clone()],
                    ));
                }
                info!("Booking {} returned (item {})", booking.id, item_id);
            }
        }
        Ok(())
    }

    /// Cancels `booking` remotely, then removes it locally. A remote failure
    /// leaves the local record in place.
    pub async fn cancel(&self, booking: &Booking) -> Result<(), BookingError> {
        self.provider.cancel_booking(&booking.id, &booking.bib_id).await?;
        if let Err(e) = self.store.delete_booking(&booking.id).await {
            error!("Booking {} cancelled remotely but not deleted locally: {:?}", booking.id, e);
            return Err(BookingError::diverged(
                format!("booking was cancelled remotely but could not be deleted: {e}"),
                vec![booking.id.clone()],
            ));
        }
        info!("Cancelled booking {}", booking.id);
        Ok(())
    }

    /// Cancels `bookings` in order, stopping at the first failure.
    pub async fn cancel_all(&self, bookings: &[Booking]) -> Result<Vec<BookingId>, BookingError> {
        let mut deleted = Vec::with_capacity(bookings.len());
        for (index, booking) in bookings.iter().enumerate() {
            if let Err(e) = self.cancel(booking).await {
                return Err(BookingError::Incomplete {
                    deleted,
                    remaining: bookings[index..].iter().map(|b| b.id.clone()).collect(),
                    source: Box::new(e),
                });
            }
            deleted.push(booking.id.clone());
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BibId, HoldingId};
    use crate::ports::{MockBookingProvider, MockReservationStore, PortError, ProviderError};
    use crate::weekdays::DayOfWeek;
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 1, 4, 9, 0, 0).unwrap()
    }

    fn reservation() -> Reservation {
        Reservation {
            id: Uuid::new_v4(),
            bib_id: BibId::from("9990246"),
            user: "mdj2".to_string(),
            created_by: Some("staff".to_string()),
            repeat_on: DayOfWeek::NONE,
            end_repeating_on: None,
            created_on: now(),
        }
    }

    fn interval() -> Interval {
        Interval::new(now() + Duration::hours(1), now() + Duration::hours(2))
    }

    fn booking() -> Booking {
        Booking::reserved(BookingId::from("b1"), &reservation(), interval(), now())
    }

    #[test]
    fn states_only_move_forward_one_step() {
        let mut b = booking();
        assert!(matches!(
            b.check_transition(BookingState::Returned),
            Err(BookingError::InvalidTransition { from: BookingState::Reserved, to: BookingState::Returned })
        ));
        assert!(b.mark_loaned(ItemId::from("i1"), LoanId::from("loan-i1"), now()).unwrap());
        assert!(matches!(
            b.check_transition(BookingState::Reserved),
            Err(BookingError::InvalidTransition { .. })
        ));
        assert!(b.mark_returned(now()).unwrap());
        assert!(b.check_transition(BookingState::Loaned).is_err());
    }

    #[test]
    fn loaned_timestamp_is_set_once() {
        let mut b = booking();
        let first = now();
        assert!(b.mark_loaned(ItemId::from("i1"), LoanId::from("loan-i1"), first).unwrap());
        assert!(!b.mark_loaned(ItemId::from("i2"), LoanId::from("loan-i2"), first + Duration::hours(1)).unwrap());
        assert_eq!(b.loaned_on, Some(first));
        assert_eq!(b.item_id, Some(ItemId::from("i1")));
    }

    #[test]
    fn returned_timestamp_is_set_once() {
        let mut b = booking();
        b.mark_loaned(ItemId::from("i1"), LoanId::from("loan-i1"), now()).unwrap();
        let returned = now() + Duration::hours(3);
        assert!(b.mark_returned(returned).unwrap());
        assert!(!b.mark_returned(returned + Duration::hours(1)).unwrap());
        assert_eq!(b.returned_on, Some(returned));
        assert_eq!(b.state, BookingState::Returned);
    }

    #[tokio::test]
    async fn create_does_not_record_when_provider_fails() {
        let mut provider = MockBookingProvider::new();
        provider
            .expect_create_booking()
            .returning(|_, _, _| Err(ProviderError::Transport("timeout".into())));
        let mut store = MockReservationStore::new();
        store.expect_insert_booking().never();

        let lifecycle = BookingLifecycle::new(&store, &provider);
        let result = lifecycle.create(&reservation(), interval(), now()).await;
        assert!(matches!(result, Err(BookingError::Provider(ProviderError::Transport(_)))));
    }

    #[tokio::test]
    async fn create_cancels_remote_booking_when_store_fails() {
        let mut provider = MockBookingProvider::new();
        provider
            .expect_create_booking()
            .returning(|_, _, _| Ok(BookingId::from("b9")));
        provider
            .expect_cancel_booking()
            .withf(|id, _| id.as_str() == "b9")
            .times(1)
            .returning(|_, _| Ok(()));
        let mut store = MockReservationStore::new();
        store
            .expect_insert_booking()
            .returning(|_| Err(PortError::Unexpected("disk full".into())));

        let lifecycle = BookingLifecycle::new(&store, &provider);
        let result = lifecycle.create(&reservation(), interval(), now()).await;
        assert!(matches!(result, Err(BookingError::Store(PortError::Unexpected(_)))));
    }

    fn loan_change() -> StateChange {
        StateChange::Loaned {
            item_id: ItemId::from("i1"),
            barcode: "50110020840266".into(),
        }
    }

    #[tokio::test]
    async fn loan_checks_item_out_before_updating() {
        let mut provider = MockBookingProvider::new();
        provider
            .expect_create_loan()
            .withf(|user, barcode| user == "mdj2" && barcode == "50110020840266")
            .times(1)
            .returning(|_, _| Ok(LoanId::from("loan-7")));
        let mut store = MockReservationStore::new();
        store
            .expect_update_booking()
            .withf(|b| b.state == BookingState::Loaned && b.loan_id == Some(LoanId::from("loan-7")))
            .times(1)
            .returning(|_| Ok(()));

        let mut b = booking();
        let lifecycle = BookingLifecycle::new(&store, &provider);
        lifecycle.advance(&mut b, "mdj2", loan_change(), now()).await.unwrap();
        assert_eq!(b.state, BookingState::Loaned);
        assert_eq!(b.item_id, Some(ItemId::from("i1")));
        assert_eq!(b.loaned_on, Some(now()));
    }

    #[tokio::test]
    async fn rejected_loan_leaves_booking_reserved() {
        let mut provider = MockBookingProvider::new();
        provider.expect_create_loan().returning(|_, _| {
            Err(ProviderError::Rejected {
                status: 400,
                payload: serde_json::json!({ "errorList": { "error": [{ "errorCode": "401651" }] } }),
            })
        });
        let mut store = MockReservationStore::new();
        store.expect_update_booking().never();

        let mut b = booking();
        let lifecycle = BookingLifecycle::new(&store, &provider);
        let result = lifecycle.advance(&mut b, "mdj2", loan_change(), now()).await;
        assert!(matches!(result, Err(BookingError::Provider(ProviderError::Rejected { status: 400, .. }))));
        assert_eq!(b.state, BookingState::Reserved);
        assert_eq!(b.loaned_on, None);
        assert_eq!(b.loan_id, None);
    }

    #[tokio::test]
    async fn repeated_loan_makes_no_remote_call() {
        let mut provider = MockBookingProvider::new();
        provider.expect_create_loan().never();
        let mut store = MockReservationStore::new();
        store.expect_update_booking().never();

        let mut b = booking();
        b.mark_loaned(ItemId::from("i1"), LoanId::from("loan-1"), now()).unwrap();
        let lifecycle = BookingLifecycle::new(&store, &provider);
        lifecycle.advance(&mut b, "mdj2", loan_change(), now() + Duration::hours(1)).await.unwrap();
        assert_eq!(b.loan_id, Some(LoanId::from("loan-1")));
        assert_eq!(b.loaned_on, Some(now()));
    }

    #[tokio::test]
    async fn loan_reports_divergence_when_update_fails() {
        let mut provider = MockBookingProvider::new();
        provider.expect_create_loan().returning(|_, _| Ok(LoanId::from("loan-7")));
        let mut store = MockReservationStore::new();
        store
            .expect_update_booking()
            .returning(|_| Err(PortError::Unexpected("connection lost".into())));

        let mut b = booking();
        let lifecycle = BookingLifecycle::new(&store, &provider);
        let result = lifecycle.advance(&mut b, "mdj2", loan_change(), now()).await;
        assert!(matches!(result, Err(BookingError::StateConsistency { .. })));
    }

    #[tokio::test]
    async fn return_scans_item_in_before_updating() {
        let mut provider = MockBookingProvider::new();
        provider
            .expect_first_holding()
            .returning(|_| Ok(HoldingId::from("h1")));
        provider
            .expect_scan_in()
            .withf(|bib, holding, item| bib.as_str() == "9990246" && holding.as_str() == "h1" && item.as_str() == "i1")
            .times(1)
            .returning(|_, _, _| Ok(()));
        let mut store = MockReservationStore::new();
        store
            .expect_update_booking()
            .withf(|b| b.state == BookingState::Returned && b.returned_on.is_some())
            .times(1)
            .returning(|_| Ok(()));

        let mut b = booking();
        b.mark_loaned(ItemId::from("i1"), LoanId::from("loan-i1"), now()).unwrap();
        let lifecycle = BookingLifecycle::new(&store, &provider);
        lifecycle.advance(&mut b, "mdj2", StateChange::Returned, now()).await.unwrap();
        assert_eq!(b.state, BookingState::Returned);
    }

    #[tokio::test]
    async fn failed_scan_in_leaves_booking_loaned() {
        let mut provider = MockBookingProvider::new();
        provider
            .expect_first_holding()
            .returning(|_| Ok(HoldingId::from("h1")));
        provider.expect_scan_in().returning(|_, _, _| {
            Err(ProviderError::Rejected {
                status: 400,
                payload: serde_json::json!({ "errorList": { "error": [{ "errorCode": "401873" }] } }),
            })
        });
        let mut store = MockReservationStore::new();
        store.expect_update_booking().never();

        let mut b = booking();
        b.mark_loaned(ItemId::from("i1"), LoanId::from("loan-i1"), now()).unwrap();
        let lifecycle = BookingLifecycle::new(&store, &provider);
        let result = lifecycle.advance(&mut b, "mdj2", StateChange::Returned, now()).await;
        assert!(matches!(result, Err(BookingError::Provider(ProviderError::Rejected { status: 400, .. }))));
        assert_eq!(b.state, BookingState::Loaned);
        assert_eq!(b.returned_on, None);
    }

    #[tokio::test]
    async fn cancel_keeps_local_record_when_remote_fails() {
        let mut provider = MockBookingProvider::new();
        provider
            .expect_cancel_booking()
            .returning(|_, _| Err(ProviderError::Transport("connection reset".into())));
        let mut store = MockReservationStore::new();
        store.expect_delete_booking().never();

        let lifecycle = BookingLifecycle::new(&store, &provider);
        assert!(lifecycle.cancel(&booking()).await.is_err());
    }

    #[tokio::test]
    async fn cancel_reports_divergence_when_local_delete_fails() {
        let mut provider = MockBookingProvider::new();
        provider.expect_cancel_booking().returning(|_, _| Ok(()));
        let mut store = MockReservationStore::new();
        store
            .expect_delete_booking()
            .returning(|_| Err(PortError::Unexpected("connection lost".into())));

        let lifecycle = BookingLifecycle::new(&store, &provider);
        match lifecycle.cancel(&booking()).await {
            Err(BookingError::StateConsistency { bookings, .. }) => {
                assert_eq!(bookings, vec![BookingId::from("b1")]);
            }
            other => panic!("expected a consistency error, got {other:?}"),
        }
    }
}
