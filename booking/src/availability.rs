//! Slot availability and free-slot enumeration.
//!
//! The overlap algorithm lives here, in application code, and is the primary
//! source of truth. The store's slot index and advisory lock only back it up
//! against concurrent writers.

use chrono::{NaiveDate, NaiveTime, TimeDelta};
use fieldbook_core::BookingError;
use fieldbook_core::error::{ConflictError, ValidationError};
use fieldbook_core::types::{Booking, BookingCode, BookingId, Resource, ResourceId, ResourceStatus, Slot};
use serde::{Deserialize, Serialize};

/// Why a slot cannot be booked
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum UnavailableReason {
    /// Resource is not Active
    ResourceStatus {
        /// Current status
        status: ResourceStatus,
    },
    /// Slot extends beyond the opening window
    OutsideOperatingHours {
        /// Opening time
        open: NaiveTime,
        /// Closing time
        close: NaiveTime,
    },
    /// An active booking overlaps
    Overlaps {
        /// Overlapping booking
        booking_id: BookingId,
        /// Its code
        code: BookingCode,
        /// Its start
        start: NaiveTime,
        /// Its end
        end: NaiveTime,
    },
}

impl UnavailableReason {
    /// Typed error for a reservation that hit this reason
    #[must_use]
    pub fn into_error(self, resource_id: ResourceId, slot: &Slot) -> BookingError {
        match self {
            Self::ResourceStatus { status } => {
                ValidationError::ResourceUnavailable { resource_id, status }.into()
            },
            Self::OutsideOperatingHours { open, close } => ValidationError::OutsideOperatingHours {
                start: slot.start,
                end: slot.end,
                open,
                close,
            }
            .into(),
            Self::Overlaps { code, .. } => ConflictError::SlotTaken {
                resource_id,
                date: slot.date,
                start: slot.start,
                end: slot.end,
                conflicting: Some(code),
            }
            .into(),
        }
    }
}

/// Result of an availability check
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Availability {
    /// Free to book
    Available,
    /// Cannot be booked
    Unavailable(UnavailableReason),
}

impl Availability {
    /// Whether the slot is free
    #[must_use]
    pub const fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }

    /// `Ok(())` when available, otherwise the matching typed error
    ///
    /// # Errors
    ///
    /// Validation errors for status and hours, `ConflictError::SlotTaken`
    /// for overlaps.
    pub fn into_result(self, resource_id: ResourceId, slot: &Slot) -> Result<(), BookingError> {
        match self {
            Self::Available => Ok(()),
            Self::Unavailable(reason) => Err(reason.into_error(resource_id, slot)),
        }
    }
}

/// Stateless availability checks over a day's bookings
#[derive(Clone, Copy, Debug, Default)]
pub struct AvailabilityChecker;

impl AvailabilityChecker {
    /// Decide whether `slot` is free on `resource`.
    ///
    /// Checks run in order: resource status, operating hours, then the
    /// half-open overlap test against every slot-holding booking of the same
    /// resource and date. `exclude` skips one booking (a reschedule checks
    /// against everything but itself).
    #[must_use]
    pub fn check(
        resource: &Resource,
        slot: &Slot,
        existing: &[Booking],
        exclude: Option<BookingId>,
    ) -> Availability {
        if !resource.status.is_bookable() {
            return Availability::Unavailable(UnavailableReason::ResourceStatus {
                status: resource.status,
            });
        }

        if !resource.hours.contains(slot) {
            return Availability::Unavailable(UnavailableReason::OutsideOperatingHours {
                open: resource.hours.open,
                close: resource.hours.close,
            });
        }

        existing
            .iter()
            .filter(|b| b.resource_id == resource.id && b.holds_slot())
            .filter(|b| Some(b.id) != exclude)
            .find(|b| b.slot.overlaps(slot))
            .map_or(Availability::Available, |b| {
                Availability::Unavailable(UnavailableReason::Overlaps {
                    booking_id: b.id,
                    code: b.code.clone(),
                    start: b.slot.start,
                    end: b.slot.end,
                })
            })
    }

    /// Free slots on `date`, each at most `max_len` long.
    ///
    /// Gaps between slot-holding bookings inside operating hours are cut into
    /// consecutive chunks of `max_len`; a trailing chunk shorter than
    /// `min_len` is dropped. With `not_before` set, no candidate starts
    /// earlier than that time.
    #[must_use]
    pub fn suggest(
        resource: &Resource,
        date: NaiveDate,
        existing: &[Booking],
        max_len: TimeDelta,
        min_len: TimeDelta,
        not_before: Option<NaiveTime>,
    ) -> SlotSuggestions {
        if !resource.status.is_bookable() || max_len <= TimeDelta::zero() {
            return SlotSuggestions::empty(date);
        }

        let mut busy: Vec<(NaiveTime, NaiveTime)> = existing
            .iter()
            .filter(|b| b.resource_id == resource.id && b.holds_slot() && b.slot.date == date)
            .map(|b| (b.slot.start, b.slot.end))
            .collect();
        busy.sort_unstable();

        let open = not_before.map_or(resource.hours.open, |t| t.max(resource.hours.open));
        let close = resource.hours.close;

        let mut gaps = Vec::new();
        let mut cursor = open;
        for (start, end) in busy {
            if start > cursor {
                gaps.push((cursor, start.min(close)));
            }
            cursor = cursor.max(end);
            if cursor >= close {
                break;
            }
        }
        if cursor < close {
            gaps.push((cursor, close));
        }
        gaps.retain(|(s, e)| s < e);

        SlotSuggestions {
            date,
            gaps,
            max_len,
            min_len: min_len.min(max_len),
            gap: 0,
            cursor: None,
        }
    }
}

/// Lazy, finite iterator over free slots.
///
/// Cloning captures the current position; [`SlotSuggestions::restarted`]
/// starts over from the first gap.
#[derive(Clone, Debug)]
pub struct SlotSuggestions {
    date: NaiveDate,
    gaps: Vec<(NaiveTime, NaiveTime)>,
    max_len: TimeDelta,
    min_len: TimeDelta,
    gap: usize,
    cursor: Option<NaiveTime>,
}

impl SlotSuggestions {
    fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            gaps: Vec::new(),
            max_len: TimeDelta::zero(),
            min_len: TimeDelta::zero(),
            gap: 0,
            cursor: None,
        }
    }

    /// A fresh iterator over the same gaps
    #[must_use]
    pub fn restarted(&self) -> Self {
        Self {
            gap: 0,
            cursor: None,
            ..self.clone()
        }
    }

    /// Free intervals the suggestions are cut from
    #[must_use]
    pub fn gaps(&self) -> &[(NaiveTime, NaiveTime)] {
        &self.gaps
    }
}

impl Iterator for SlotSuggestions {
    type Item = Slot;

    fn next(&mut self) -> Option<Slot> {
        loop {
            let &(gap_start, gap_end) = self.gaps.get(self.gap)?;
            let start = self.cursor.unwrap_or(gap_start);
            let remaining = gap_end - start;

            if remaining <= TimeDelta::zero() || remaining < self.min_len {
                self.gap += 1;
                self.cursor = None;
                continue;
            }

            let end = start + remaining.min(self.max_len);
            self.cursor = Some(end);
            return Some(Slot::new(self.date, start, end));
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fieldbook_core::types::{
        BookingOwner, BookingPaymentStatus, BookingStatus, Money, OperatingHours, PaymentMethod,
        ResourceTypeId, UserId,
    };
    use fieldbook_testing::properties::slot_on;
    use proptest::prelude::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
    }

    fn field() -> Resource {
        Resource {
            id: ResourceId::new(),
            resource_type_id: ResourceTypeId::new(),
            name: "Field 1".to_string(),
            hours: OperatingHours::new(t(6, 0), t(22, 0)),
            status: ResourceStatus::Active,
        }
    }

    fn booking(resource: &Resource, slot: Slot, status: BookingStatus) -> Booking {
        Booking {
            id: BookingId::new(),
            code: BookingCode::new(format!("BK-{}", slot.start.format("%H%M"))),
            resource_id: resource.id,
            owner: BookingOwner::Registered { user_id: UserId::new() },
            slot,
            status,
            total_price: Money::from_minor(100_000),
            payment_status: BookingPaymentStatus::Unpaid,
            payment_method: PaymentMethod::Cash,
            note: None,
            created_at: Utc::now(),
            confirmed_by: None,
            confirmed_at: None,
            cancelled_by: None,
            cancelled_at: None,
            cancel_reason: None,
            completed_at: None,
            version: 1,
        }
    }

    #[test]
    fn back_to_back_slots_are_available() {
        let field = field();
        let existing = vec![booking(&field, Slot::new(day(), t(10, 0), t(11, 0)), BookingStatus::Confirmed)];

        let result = AvailabilityChecker::check(&field, &Slot::new(day(), t(11, 0), t(12, 0)), &existing, None);

        assert!(result.is_available());
    }

    #[test]
    fn overlap_names_the_conflicting_booking() {
        let field = field();
        let held = booking(&field, Slot::new(day(), t(10, 0), t(11, 0)), BookingStatus::Pending);
        let existing = vec![held.clone()];

        let result = AvailabilityChecker::check(&field, &Slot::new(day(), t(10, 30), t(11, 30)), &existing, None);

        match result {
            Availability::Unavailable(UnavailableReason::Overlaps { booking_id, code, .. }) => {
                assert_eq!(booking_id, held.id);
                assert_eq!(code, held.code);
            },
            other => panic!("expected overlap, got {other:?}"),
        }
    }

    #[test]
    fn cancelled_and_completed_bookings_release_the_slot() {
        let field = field();
        let slot = Slot::new(day(), t(10, 0), t(11, 0));
        let existing = vec![
            booking(&field, slot, BookingStatus::Cancelled),
            booking(&field, slot, BookingStatus::Completed),
        ];

        assert!(AvailabilityChecker::check(&field, &slot, &existing, None).is_available());
    }

    #[test]
    fn excluded_booking_does_not_conflict_with_itself() {
        let field = field();
        let own = booking(&field, Slot::new(day(), t(10, 0), t(11, 0)), BookingStatus::Confirmed);
        let moved = Slot::new(day(), t(10, 30), t(11, 30));

        let existing = vec![own.clone()];
        assert!(!AvailabilityChecker::check(&field, &moved, &existing, None).is_available());
        assert!(AvailabilityChecker::check(&field, &moved, &existing, Some(own.id)).is_available());
    }

    #[test]
    fn status_is_checked_before_anything_else() {
        let mut field = field();
        field.status = ResourceStatus::Maintenance;
        let slot = Slot::new(day(), t(3, 0), t(4, 0));

        let result = AvailabilityChecker::check(&field, &slot, &[], None);

        assert_eq!(
            result,
            Availability::Unavailable(UnavailableReason::ResourceStatus {
                status: ResourceStatus::Maintenance
            })
        );
        let err = result.into_result(field.id, &slot).unwrap_err();
        assert_eq!(err.category(), fieldbook_core::ErrorCategory::Validation);
    }

    #[test]
    fn slot_past_closing_is_rejected() {
        let field = field();
        let slot = Slot::new(day(), t(21, 30), t(22, 30));

        let result = AvailabilityChecker::check(&field, &slot, &[], None);

        assert!(matches!(
            result,
            Availability::Unavailable(UnavailableReason::OutsideOperatingHours { .. })
        ));
    }

    #[test]
    fn suggestions_fill_gaps_and_drop_short_tails() {
        let mut field = field();
        field.hours = OperatingHours::new(t(8, 0), t(12, 0));
        let existing = vec![
            booking(&field, Slot::new(day(), t(9, 0), t(10, 15)), BookingStatus::Confirmed),
            booking(&field, Slot::new(day(), t(11, 45), t(12, 0)), BookingStatus::Pending),
        ];

        let slots: Vec<_> = AvailabilityChecker::suggest(
            &field,
            day(),
            &existing,
            TimeDelta::minutes(60),
            TimeDelta::minutes(30),
            None,
        )
        .map(|s| (s.start, s.end))
        .collect();

        // 10:15-11:45 yields one hour, then a 30 minute tail
        assert_eq!(
            slots,
            vec![(t(8, 0), t(9, 0)), (t(10, 15), t(11, 15)), (t(11, 15), t(11, 45))]
        );
    }

    #[test]
    fn suggestions_respect_not_before_and_restart() {
        let field = field();
        let suggestions = AvailabilityChecker::suggest(
            &field,
            day(),
            &[],
            TimeDelta::minutes(120),
            TimeDelta::minutes(30),
            Some(t(19, 0)),
        );

        let first: Vec<_> = suggestions.clone().collect();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].start, t(19, 0));
        assert_eq!(first[1], Slot::new(day(), t(21, 0), t(22, 0)));

        let mut partial = suggestions;
        partial.next();
        assert_eq!(partial.restarted().count(), 2);
        assert_eq!(partial.count(), 1);
    }

    #[test]
    fn inactive_resource_suggests_nothing() {
        let mut field = field();
        field.status = ResourceStatus::Inactive;
        let mut suggestions =
            AvailabilityChecker::suggest(&field, day(), &[], TimeDelta::minutes(60), TimeDelta::minutes(30), None);
        assert!(suggestions.next().is_none());
    }

    proptest! {
        #[test]
        fn accepting_only_available_slots_never_double_books(
            candidates in proptest::collection::vec(slot_on(day()), 1..40)
        ) {
            let field = field();
            let mut accepted: Vec<Booking> = Vec::new();
            for slot in candidates {
                if AvailabilityChecker::check(&field, &slot, &accepted, None).is_available() {
                    accepted.push(booking(&field, slot, BookingStatus::Pending));
                }
            }
            for (i, a) in accepted.iter().enumerate() {
                for b in &accepted[i + 1..] {
                    prop_assert!(!a.slot.overlaps(&b.slot));
                }
            }
        }

        #[test]
        fn suggested_slots_are_always_available(
            taken in proptest::collection::vec(slot_on(day()), 0..10),
            max_q in 1i64..12,
        ) {
            let field = field();
            let mut existing: Vec<Booking> = Vec::new();
            for slot in taken {
                if AvailabilityChecker::check(&field, &slot, &existing, None).is_available() {
                    existing.push(booking(&field, slot, BookingStatus::Confirmed));
                }
            }
            let max_len = TimeDelta::minutes(max_q * 15);
            for slot in AvailabilityChecker::suggest(&field, day(), &existing, max_len, TimeDelta::minutes(15), None) {
                prop_assert!(slot.duration_minutes() <= max_len.num_minutes());
                prop_assert!(AvailabilityChecker::check(&field, &slot, &existing, None).is_available());
            }
        }
    }
}
