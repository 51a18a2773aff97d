//! crates/booking_core/src/conflict.rs
//!
//! Overlap detection between the intervals of a new reservation and the ones
//! already booked for the same bib.

use serde::{Deserialize, Serialize};

use crate::domain::Interval;

/// A candidate interval that cannot be booked, and what it collides with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub candidate: Interval,
    pub conflicts_with: Interval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Candidate,
    Existing,
}

pub fn intersects(a: &Interval, b: &Interval) -> bool {
    a.intersects(b)
}

/// Every collision between a candidate and an existing interval, or between
/// two candidates of the same request. Overlaps among `existing` are ignored.
///
/// Sorts all intervals by start and sweeps once, keeping only the intervals
/// still open at the current start.
pub fn find_conflicts(candidates: &[Interval], existing: &[Interval]) -> Vec<Conflict> {
    let mut events: Vec<(Interval, Origin)> = candidates
        .iter()
        .map(|i| (*i, Origin::Candidate))
        .chain(existing.iter().map(|i| (*i, Origin::Existing)))
        .collect();
    events.sort_by_key(|(interval, _)| interval.start);

    let mut open: Vec<(Interval, Origin)> = Vec::new();
    let mut conflicts = Vec::new();

    for (interval, origin) in events {
        open.retain(|(other, _)| other.end > interval.start);
        for (other, other_origin) in &open {
            if !interval.intersects(other) {
                continue;
            }
            match (origin, *other_origin) {
                (Origin::Existing, Origin::Existing) => {}
                (Origin::Candidate, _) => conflicts.push(Conflict {
                    candidate: interval,
                    conflicts_with: *other,
                }),
                (Origin::Existing, Origin::Candidate) => conflicts.push(Conflict {
                    candidate: *other,
                    conflicts_with: interval,
                }),
            }
        }
        open.push((interval, origin));
    }

    conflicts
}

/// True iff none of `candidates` overlaps `existing` or another candidate.
pub fn is_available(candidates: &[Interval], existing: &[Interval]) -> bool {
    find_conflicts(candidates, existing).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn t(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 1, 5, h, 0, 0).unwrap()
    }

    fn iv(start: u32, end: u32) -> Interval {
        Interval::new(t(start), t(end))
    }

    /// Every candidate against every existing interval and every other candidate.
    fn naive_available(candidates: &[Interval], existing: &[Interval]) -> bool {
        candidates.iter().enumerate().all(|(i, c)| {
            existing.iter().all(|e| !intersects(c, e))
                && candidates.iter().skip(i + 1).all(|o| !intersects(c, o))
        })
    }

    #[test]
    fn empty_inputs_are_available() {
        assert!(is_available(&[], &[]));
        assert!(is_available(&[iv(9, 10)], &[]));
        assert!(is_available(&[], &[iv(9, 10)]));
    }

    #[test]
    fn back_to_back_is_available() {
        assert!(is_available(&[iv(10, 11)], &[iv(9, 10), iv(11, 12)]));
    }

    #[test]
    fn overlap_with_existing_is_reported() {
        let conflicts = find_conflicts(&[iv(10, 12)], &[iv(8, 9), iv(11, 13)]);
        assert_eq!(
            conflicts,
            vec![Conflict {
                candidate: iv(10, 12),
                conflicts_with: iv(11, 13)
            }]
        );
    }

    #[test]
    fn existing_starting_first_is_still_attributed_to_candidate() {
        let conflicts = find_conflicts(&[iv(10, 12)], &[iv(9, 11)]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].candidate, iv(10, 12));
        assert_eq!(conflicts[0].conflicts_with, iv(9, 11));
    }

    #[test]
    fn candidates_colliding_with_each_other() {
        assert!(!is_available(&[iv(9, 12), iv(11, 13)], &[]));
    }

    #[test]
    fn overlapping_existing_intervals_are_not_our_problem() {
        assert!(is_available(&[iv(14, 15)], &[iv(9, 12), iv(10, 11)]));
    }

    #[test]
    fn sweep_agrees_with_pairwise_check() {
        let pool = [
            iv(0, 2),
            iv(1, 3),
            iv(2, 4),
            iv(3, 5),
            iv(5, 6),
            iv(6, 9),
            iv(7, 8),
            iv(10, 11),
            iv(11, 12),
        ];
        // Split the pool into candidates/existing by every bitmask.
        for mask in 0u32..(1 << pool.len()) {
            let (mut candidates, mut existing) = (Vec::new(), Vec::new());
            for (bit, interval) in pool.iter().enumerate() {
                if mask & (1 << bit) != 0 {
                    candidates.push(*interval);
                } else {
                    existing.push(*interval);
                }
            }
            assert_eq!(
                is_available(&candidates, &existing),
                naive_available(&candidates, &existing),
                "mask {mask:#b}"
            );
        }
    }
}
