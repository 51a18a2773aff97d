//! In-memory implementations of the store and provider ports for tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use booking_core::{
    BibId, Booking, BookingId, BookingProvider, HoldingId, Interval, ItemId, LoanId, PortError, PortResult,
    ProviderError, ProviderResult, Reservation, ReservationStore,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Default)]
struct StoreState {
    reservations: HashMap<Uuid, Reservation>,
    bookings: BTreeMap<BookingId, Booking>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn booking_count(&self) -> usize {
        self.state.lock().unwrap().bookings.len()
    }

    pub fn reservation_count(&self) -> usize {
        self.state.lock().unwrap().reservations.len()
    }

    /// Seeds a booking that exists outside any reservation created by the test.
    pub fn seed(&self, booking: Booking) {
        self.state.lock().unwrap().bookings.insert(booking.id.clone(), booking);
    }
}

fn sorted(mut bookings: Vec<Booking>) -> Vec<Booking> {
    bookings.sort_by_key(|b| b.interval.start);
    bookings
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn insert_reservation(&self, reservation: &Reservation) -> PortResult<()> {
        self.state
            .lock()
            .unwrap()
            .reservations
            .insert(reservation.id, reservation.clone());
        Ok(())
    }

    async fn get_reservation(&self, reservation_id: Uuid) -> PortResult<Reservation> {
        self.state
            .lock()
            .unwrap()
            .reservations
            .get(&reservation_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Reservation {reservation_id} not found")))
    }

    async fn delete_reservation(&self, reservation_id: Uuid) -> PortResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.bookings.values().any(|b| b.reservation_id == reservation_id) {
            return Err(PortError::Conflict(format!("Reservation {reservation_id} still has bookings")));
        }
        state.reservations.remove(&reservation_id);
        Ok(())
    }

    async fn insert_booking(&self, booking: &Booking) -> PortResult<()> {
        self.state
            .lock()
            .unwrap()
            .bookings
            .insert(booking.id.clone(), booking.clone());
        Ok(())
    }

    async fn get_booking(&self, booking_id: &BookingId) -> PortResult<Booking> {
        self.state
            .lock()
            .unwrap()
            .bookings
            .get(booking_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Booking {booking_id} not found")))
    }

    async fn update_booking(&self, booking: &Booking) -> PortResult<()> {
        let mut state = self.state.lock().unwrap();
        match state.bookings.get_mut(&booking.id) {
            Some(stored) => {
                *stored = booking.clone();
                Ok(())
            }
            None => Err(PortError::NotFound(format!("Booking {} not found", booking.id))),
        }
    }

    async fn delete_booking(&self, booking_id: &BookingId) -> PortResult<()> {
        self.state.lock().unwrap().bookings.remove(booking_id);
        Ok(())
    }

    async fn bookings_for_reservation(&self, reservation_id: Uuid) -> PortResult<Vec<Booking>> {
        let state = self.state.lock().unwrap();
        Ok(sorted(
            state
                .bookings
                .values()
                .filter(|b| b.reservation_id == reservation_id)
                .cloned()
                .collect(),
        ))
    }

    async fn intervals_overlapping(&self, bib_id: &BibId, window: &Interval) -> PortResult<Vec<Interval>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .bookings
            .values()
            .filter(|b| &b.bib_id == bib_id && b.interval.intersects(window))
            .map(|b| b.interval)
            .collect())
    }

    async fn bookings_for_user(&self, user: &str, ending_after: DateTime<Utc>) -> PortResult<Vec<Booking>> {
        let state = self.state.lock().unwrap();
        Ok(sorted(
            state
                .bookings
                .values()
                .filter(|b| b.interval.end >= ending_after)
                .filter(|b| state.reservations.get(&b.reservation_id).is_some_and(|r| r.user == user))
                .cloned()
                .collect(),
        ))
    }

    async fn bookings_between(&self, window: &Interval) -> PortResult<Vec<Booking>> {
        let state = self.state.lock().unwrap();
        Ok(sorted(
            state
                .bookings
                .values()
                .filter(|b| b.interval.start >= window.start && b.interval.end < window.end)
                .cloned()
                .collect(),
        ))
    }
}

#[derive(Default)]
struct ProviderState {
    next_id: u32,
    live: BTreeMap<BookingId, (BibId, Interval)>,
    created: u32,
    refuse_cancel: HashSet<BookingId>,
    scanned_in: Vec<(BibId, HoldingId, ItemId)>,
    busy: Vec<Interval>,
    /// Create calls answered with a server error, counted from 1.
    fail_create_at: Option<u32>,
    create_calls: u32,
    loans: Vec<(String, String)>,
    refuse_loans: bool,
}

/// A provider that books everything it is asked to, unless told otherwise.
#[derive(Default)]
pub struct FakeProvider {
    state: Mutex<ProviderState>,
}

impl FakeProvider {
    /// Total bookings ever created remotely.
    pub fn created(&self) -> u32 {
        self.state.lock().unwrap().created
    }

    /// Bookings currently live remotely.
    pub fn live(&self) -> usize {
        self.state.lock().unwrap().live.len()
    }

    pub fn refuse_cancel(&self, booking_id: &BookingId) {
        self.state.lock().unwrap().refuse_cancel.insert(booking_id.clone());
    }

    pub fn scanned_in(&self) -> Vec<(BibId, HoldingId, ItemId)> {
        self.state.lock().unwrap().scanned_in.clone()
    }

    pub fn set_busy(&self, busy: Vec<Interval>) {
        self.state.lock().unwrap().busy = busy;
    }

    /// Makes the `call`-th create request fail.
    pub fn fail_create_at(&self, call: u32) {
        self.state.lock().unwrap().fail_create_at = Some(call);
    }

    /// Loans created remotely, as (user, barcode).
    pub fn loans(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().loans.clone()
    }

    pub fn refuse_loans(&self) {
        self.state.lock().unwrap().refuse_loans = true;
    }
}

#[async_trait]
impl BookingProvider for FakeProvider {
    async fn create_booking(&self, _user: &str, bib_id: &BibId, interval: &Interval) -> ProviderResult<BookingId> {
        // Give concurrent requests a chance to interleave.
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap();
        state.create_calls += 1;
        if state.fail_create_at == Some(state.create_calls) {
            return Err(ProviderError::Rejected {
                status: 503,
                payload: serde_json::json!({ "errorsExist": true }),
            });
        }
        state.next_id += 1;
        state.created += 1;
        let id = BookingId(format!("req-{}", state.next_id));
        state.live.insert(id.clone(), (bib_id.clone(), *interval));
        Ok(id)
    }

    async fn cancel_booking(&self, booking_id: &BookingId, _bib_id: &BibId) -> ProviderResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.refuse_cancel.contains(booking_id) {
            return Err(ProviderError::Rejected {
                status: 500,
                payload: serde_json::json!({ "errorsExist": true }),
            });
        }
        state.live.remove(booking_id);
        Ok(())
    }

    async fn get_availability(&self, _bib_id: &BibId, _horizon_days: u32) -> ProviderResult<Vec<Interval>> {
        Ok(self.state.lock().unwrap().busy.clone())
    }

    async fn create_loan(&self, user: &str, barcode: &str) -> ProviderResult<LoanId> {
        let mut state = self.state.lock().unwrap();
        if state.refuse_loans {
            return Err(ProviderError::Rejected {
                status: 400,
                payload: serde_json::json!({ "errorList": { "error": [{ "errorCode": "401651" }] } }),
            });
        }
        state.loans.push((user.to_string(), barcode.to_string()));
        Ok(LoanId(format!("loan-{}", state.loans.len())))
    }

    async fn first_holding(&self, _bib_id: &BibId) -> ProviderResult<HoldingId> {
        Ok(HoldingId::from("holding-1"))
    }

    async fn scan_in(&self, bib_id: &BibId, holding_id: &HoldingId, item_id: &ItemId) -> ProviderResult<()> {
        self.state
            .lock()
            .unwrap()
            .scanned_in
            .push((bib_id.clone(), holding_id.clone(), item_id.clone()));
        Ok(())
    }
}
