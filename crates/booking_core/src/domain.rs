//! crates/booking_core/src/domain.rs
//!
//! Defines the pure, core data structures for the booking engine.
//! These structs are independent of any database or HTTP representation.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::weekdays::DayOfWeek;

//=========================================================================================
// Identifiers
//=========================================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// The catalog id (MMS id) of a bib, i.e. a class of bookable equipment.
    BibId
);
string_id!(
    /// The id the booking provider assigned to a booking. It is the booking's
    /// permanent identifier, locally as well as remotely.
    BookingId
);
string_id!(
    /// One physical, barcoded unit of a bib.
    ItemId
);
string_id!(
    /// The holding record an item belongs to; needed to scan an item back in.
    HoldingId
);
string_id!(
    /// The id the provider assigned to the loan of an item.
    LoanId
);

pub type ReservationId = Uuid;

//=========================================================================================
// Interval
//=========================================================================================

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Interval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        debug_assert!(start < end, "Interval start must be before end");
        Self { start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Touching endpoints do not intersect: back-to-back bookings are legal.
    pub fn intersects(&self, other: &Interval) -> bool {
        self.start < other.end && self.end > other.start
    }

    /// The smallest interval covering every interval in `intervals`.
    pub fn spanning(intervals: &[Interval]) -> Option<Interval> {
        let start = intervals.iter().map(|i| i.start).min()?;
        let end = intervals.iter().map(|i| i.end).max()?;
        Some(Interval { start, end })
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

//=========================================================================================
// Reservation (aggregate root)
//=========================================================================================

/// One user's intent to book a bib, possibly repeating on some weekdays.
/// Every concrete time slot is a child [`Booking`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub bib_id: BibId,
    /// The person the equipment is booked for.
    pub user: String,
    /// The staff member who entered the reservation.
    pub created_by: Option<String>,
    pub repeat_on: DayOfWeek,
    pub end_repeating_on: Option<DateTime<Utc>>,
    pub created_on: DateTime<Utc>,
}

/// A reservation together with its bookings, ordered by start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationDetails {
    pub reservation: Reservation,
    pub bookings: Vec<Booking>,
}

//=========================================================================================
// Booking
//=========================================================================================

/// Where a booking is in its lifecycle. The numeric codes are the stored form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingState {
    Reserved,
    Loaned,
    Returned,
}

impl BookingState {
    pub fn code(self) -> i16 {
        match self {
            BookingState::Reserved => 1,
            BookingState::Loaned => 2,
            BookingState::Returned => 4,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(BookingState::Reserved),
            2 => Some(BookingState::Loaned),
            4 => Some(BookingState::Returned),
            _ => None,
        }
    }
}

impl fmt::Display for BookingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BookingState::Reserved => "reserved",
            BookingState::Loaned => "loaned",
            BookingState::Returned => "returned",
        };
        f.write_str(name)
    }
}

/// One concrete `[start, end)` slot of a reservation, mirrored by a booking in
/// the external provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub reservation_id: ReservationId,
    pub bib_id: BibId,
    pub interval: Interval,
    pub state: BookingState,
    /// The physical item handed out, recorded when the booking is loaned.
    pub item_id: Option<ItemId>,
    /// The provider's record of the item being checked out.
    pub loan_id: Option<LoanId>,
    pub created_on: DateTime<Utc>,
    pub loaned_on: Option<DateTime<Utc>>,
    pub returned_on: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 1, 4, h, m, 0).unwrap()
    }

    #[test]
    fn identical_intervals_intersect() {
        let a = Interval::new(at(10, 0), at(11, 0));
        assert!(a.intersects(&a));
    }

    #[test]
    fn touching_intervals_do_not_intersect() {
        let a = Interval::new(at(10, 0), at(11, 0));
        let b = Interval::new(at(11, 0), at(12, 0));
        assert!(!a.intersects(&b));
        assert!(!b.intersects(&a));
    }

    #[test]
    fn intersects_is_symmetric() {
        let samples = [
            Interval::new(at(9, 0), at(10, 0)),
            Interval::new(at(9, 30), at(11, 0)),
            Interval::new(at(10, 0), at(10, 1)),
            Interval::new(at(10, 30), at(10, 31)),
            Interval::new(at(8, 0), at(12, 0)),
            Interval::new(at(11, 0), at(12, 0)),
        ];
        for a in &samples {
            for b in &samples {
                assert_eq!(a.intersects(b), b.intersects(a), "{a} vs {b}");
            }
        }
    }

    #[test]
    fn contained_interval_intersects() {
        let outer = Interval::new(at(10, 0), at(11, 0));
        let inner = Interval::new(at(10, 15), at(10, 16));
        assert!(outer.intersects(&inner));
    }

    #[test]
    fn spanning_covers_all() {
        let a = Interval::new(at(12, 0), at(13, 0));
        let b = Interval::new(at(9, 0), at(10, 0));
        assert_eq!(Interval::spanning(&[a, b]), Some(Interval::new(at(9, 0), at(13, 0))));
        assert_eq!(Interval::spanning(&[]), None);
    }

    #[test]
    fn state_codes_round_trip() {
        for state in [BookingState::Reserved, BookingState::Loaned, BookingState::Returned] {
            assert_eq!(BookingState::from_code(state.code()), Some(state));
        }
        assert_eq!(BookingState::from_code(3), None);
    }
}
