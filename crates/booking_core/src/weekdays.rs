//! crates/booking_core/src/weekdays.rs
//!
//! A compact bitset of the weekdays a reservation repeats on.
//!
//! The integer form is what gets stored and sent over the wire, so the bit
//! assignment (Sunday = 1 through Saturday = 64) is fixed.

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

const ALL_BITS: u8 = 0b0111_1111;

const ABBREVIATIONS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// A set of weekdays, one bit per day. `0` means "does not repeat".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct DayOfWeek(u8);

impl DayOfWeek {
    pub const NONE: DayOfWeek = DayOfWeek(0);
    pub const SUNDAY: DayOfWeek = DayOfWeek(1);
    pub const MONDAY: DayOfWeek = DayOfWeek(2);
    pub const TUESDAY: DayOfWeek = DayOfWeek(4);
    pub const WEDNESDAY: DayOfWeek = DayOfWeek(8);
    pub const THURSDAY: DayOfWeek = DayOfWeek(16);
    pub const FRIDAY: DayOfWeek = DayOfWeek(32);
    pub const SATURDAY: DayOfWeek = DayOfWeek(64);

    /// Sunday through Saturday, in rendering order.
    pub const DAYS: [DayOfWeek; 7] = [
        Self::SUNDAY,
        Self::MONDAY,
        Self::TUESDAY,
        Self::WEDNESDAY,
        Self::THURSDAY,
        Self::FRIDAY,
        Self::SATURDAY,
    ];

    /// Builds a bitset from its integer form. Returns `None` if any bit outside
    /// the seven day bits is set.
    pub fn new(bits: i32) -> Option<Self> {
        u8::try_from(bits)
            .ok()
            .filter(|b| b & !ALL_BITS == 0)
            .map(DayOfWeek)
    }

    /// ORs the given days together.
    pub fn from_days<I>(days: I) -> Self
    where
        I: IntoIterator<Item = DayOfWeek>,
    {
        days.into_iter().fold(Self::NONE, |acc, day| acc | day)
    }

    /// The single-day bit owned by a calendar date.
    ///
    /// Computed as `2^((monday_based_weekday + 1) mod 7)`, which puts Sunday on
    /// bit 0 and Saturday on bit 6.
    pub fn of<D: Datelike>(date: &D) -> Self {
        let monday_based = date.weekday().num_days_from_monday();
        DayOfWeek(1 << ((monday_based + 1) % 7))
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if every day in `other` is also in `self`.
    pub fn contains(self, other: DayOfWeek) -> bool {
        !other.is_empty() && self.0 & other.0 == other.0
    }

    /// Each set day, Sunday first. The iterator borrows nothing, so calling
    /// `iter()` again always starts over.
    pub fn iter(self) -> impl Iterator<Item = DayOfWeek> {
        Self::DAYS.into_iter().filter(move |day| self.contains(*day))
    }
}

impl BitOr for DayOfWeek {
    type Output = DayOfWeek;

    fn bitor(self, rhs: DayOfWeek) -> DayOfWeek {
        DayOfWeek(self.0 | rhs.0)
    }
}

impl BitOrAssign for DayOfWeek {
    fn bitor_assign(&mut self, rhs: DayOfWeek) {
        self.0 |= rhs.0;
    }
}

impl FromIterator<DayOfWeek> for DayOfWeek {
    fn from_iter<I: IntoIterator<Item = DayOfWeek>>(iter: I) -> Self {
        Self::from_days(iter)
    }
}

impl TryFrom<i32> for DayOfWeek {
    type Error = String;

    fn try_from(bits: i32) -> Result<Self, Self::Error> {
        DayOfWeek::new(bits).ok_or_else(|| format!("{bits} is not a valid day-of-week bitmask"))
    }
}

impl From<DayOfWeek> for i32 {
    fn from(days: DayOfWeek) -> i32 {
        i32::from(days.0)
    }
}

impl fmt::Display for DayOfWeek {
    /// `DayOfWeek(3)` renders as `"Sun, Mon"`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::DAYS
            .iter()
            .zip(ABBREVIATIONS)
            .filter(|(day, _)| self.contains(**day))
            .map(|(_, name)| name)
            .collect();
        f.write_str(&names.join(", "))
    }
}
