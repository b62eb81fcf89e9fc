//! Tower-of-Hanoi rotation.
//!
//! Day `k` (1-indexed from the rotation start date) writes into slot
//! `trailing_zeros(k)`, capped at the last configured slot. Slot 0 is used
//! every other day, slot 1 every 4th day, slot 2 every 8th day and so on.
//! The slot only depends on the calendar day, so a retried run on the same
//! day always targets the same slot.

use chrono::NaiveDate;
use std::fmt::{Display, Formatter};

/// Largest rotation size, one suffix letter per slot.
pub static MAX_ROTATION_SIZE: u8 = 26;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RotationSlot {
    index: u8,
}

impl RotationSlot {
    /// Returns `None` when `index` is outside `[0, size)`.
    pub fn new(index: u8, size: u8) -> Option<Self> {
        (index < size && size <= MAX_ROTATION_SIZE).then_some(Self { index })
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    /// `A` for slot 0, `B` for slot 1, ...
    pub fn suffix(&self) -> char {
        char::from(b'A' + self.index)
    }
}

impl Display for RotationSlot {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.index, self.suffix())
    }
}

/// Whole days from `start` to `today`, clamped at zero for a start date in the future.
pub fn day_offset(today: NaiveDate, start: NaiveDate) -> u64 {
    u64::try_from(today.signed_duration_since(start).num_days()).unwrap_or(0)
}

/// Slot index for a day offset. `None` when rotation is disabled (`size == 0`).
pub fn slot_index(day_offset: u64, size: u8) -> Option<u8> {
    if size == 0 {
        return None;
    }
    let day = day_offset.saturating_add(1);
    // day >= 1 so trailing_zeros < 64
    let raw = u8::try_from(day.trailing_zeros()).unwrap_or(u8::MAX);
    Some(raw.min(size - 1))
}

/// Slot written on `today` for a rotation of `size` slots starting on `start`.
pub fn plan(today: NaiveDate, start: NaiveDate, size: u8) -> Option<RotationSlot> {
    slot_index(day_offset(today, start), size).and_then(|index| RotationSlot::new(index, size))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_classic_sequence() {
        let slots: Vec<_> = (0..16).map(|d| slot_index(d, 5).unwrap()).collect();
        assert_eq!(slots, vec![0, 1, 0, 2, 0, 1, 0, 3, 0, 1, 0, 2, 0, 1, 0, 4]);
    }

    #[test]
    fn test_matches_trailing_zero_formula() {
        for size in 1..=MAX_ROTATION_SIZE {
            for d in 0..2048u64 {
                let expected = ((d + 1).trailing_zeros() as u8).min(size - 1);
                assert_eq!(slot_index(d, size), Some(expected), "d={d} size={size}");
                assert_eq!(slot_index(d, size), slot_index(d, size));
            }
        }
    }

    #[test]
    fn test_single_slot_always_zero() {
        for d in 0..1000 {
            assert_eq!(slot_index(d, 1), Some(0));
        }
    }

    #[test]
    fn test_disabled_rotation() {
        assert_eq!(slot_index(7, 0), None);
        assert_eq!(plan(date(2024, 1, 8), date(2024, 1, 1), 0), None);
    }

    #[test]
    fn test_overflow_collapses_into_last_slot() {
        // day 8 and day 16 both land in the last of three slots
        assert_eq!(slot_index(7, 3), Some(2));
        assert_eq!(slot_index(15, 3), Some(2));
    }

    #[test]
    fn test_day_offset_clamps_future_start() {
        assert_eq!(day_offset(date(2024, 1, 1), date(2024, 3, 1)), 0);
        assert_eq!(day_offset(date(2024, 3, 1), date(2024, 2, 28)), 2);
    }

    #[test]
    fn test_plan_from_dates() {
        let start = date(2024, 1, 1);
        let slot = plan(date(2024, 1, 1), start, 11).unwrap();
        assert_eq!(slot.index(), 0);
        assert_eq!(slot.suffix(), 'A');

        let slot = plan(date(2024, 1, 2), start, 11).unwrap();
        assert_eq!(slot.index(), 1);
        assert_eq!(slot.suffix(), 'B');

        let slot = plan(date(2024, 1, 4), start, 11).unwrap();
        assert_eq!(slot.suffix(), 'C');
    }

    #[test]
    fn test_rotation_slot_range() {
        assert!(RotationSlot::new(0, 1).is_some());
        assert!(RotationSlot::new(1, 1).is_none());
        assert!(RotationSlot::new(25, 26).is_some());
        assert!(RotationSlot::new(0, 27).is_none());
    }
}
