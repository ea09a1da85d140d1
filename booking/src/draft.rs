//! Server-side reservation drafts.
//!
//! A draft is an immutable snapshot of what the customer picked (resource,
//! slot, owner, note) stored under a random correlation id until they choose
//! how to pay. Drafts expire after a TTL measured by the injected clock and
//! can be taken exactly once.

use chrono::{DateTime, TimeDelta, Utc};
use fieldbook_core::BookingError;
use fieldbook_core::environment::Clock;
use fieldbook_core::error::ValidationError;
use fieldbook_core::types::{BookingOwner, ResourceId, Slot};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

/// Correlation id of a stored draft
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DraftId(Uuid);

impl DraftId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Rebuild an id received from a client
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for DraftId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the customer picked before choosing a payment method
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingDraft {
    /// Resource
    pub resource_id: ResourceId,
    /// Slot
    pub slot: Slot,
    /// Owner
    pub owner: BookingOwner,
    /// Customer note
    pub note: Option<String>,
}

#[derive(Debug)]
struct Stored {
    draft: BookingDraft,
    expires_at: DateTime<Utc>,
}

/// In-process draft store
#[derive(Clone)]
pub struct DraftStore {
    clock: Arc<dyn Clock>,
    ttl: TimeDelta,
    max_duration_minutes: i64,
    drafts: Arc<Mutex<HashMap<DraftId, Stored>>>,
}

impl DraftStore {
    /// Store whose drafts live for `ttl`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration, max_duration_minutes: i64) -> Self {
        Self {
            clock,
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            max_duration_minutes,
            drafts: Arc::default(),
        }
    }

    /// Validate and store a draft.
    ///
    /// # Errors
    ///
    /// [`ValidationError`] when the slot is malformed or too long, or a
    /// guest draft lacks a name or phone number.
    pub fn stash(&self, draft: BookingDraft) -> Result<DraftId, BookingError> {
        if !draft.slot.is_well_formed() {
            return Err(ValidationError::InvalidTimeRange {
                start: draft.slot.start,
                end: draft.slot.end,
            }
            .into());
        }
        let minutes = draft.slot.duration_minutes();
        if minutes > self.max_duration_minutes {
            return Err(ValidationError::DurationOutOfRange {
                minutes,
                min: 1,
                max: self.max_duration_minutes,
            }
            .into());
        }
        if let BookingOwner::Guest { contact } = &draft.owner {
            if contact.name.trim().is_empty() || contact.phone.trim().is_empty() {
                return Err(ValidationError::IncompleteContact("name and phone are required".to_string()).into());
            }
        }

        let now = self.clock.now();
        let id = DraftId::new();
        let mut drafts = self.drafts();
        drafts.retain(|_, stored| stored.expires_at > now);
        drafts.insert(
            id,
            Stored {
                draft,
                expires_at: now + self.ttl,
            },
        );
        tracing::debug!(draft_id = %id, "Draft stored");
        Ok(id)
    }

    /// Remove and return a live draft; `None` if unknown, taken, or expired
    #[must_use]
    pub fn take(&self, id: DraftId) -> Option<BookingDraft> {
        let now = self.clock.now();
        self.drafts()
            .remove(&id)
            .filter(|stored| stored.expires_at > now)
            .map(|stored| stored.draft)
    }

    /// Read a live draft without consuming it
    #[must_use]
    pub fn peek(&self, id: DraftId) -> Option<BookingDraft> {
        let now = self.clock.now();
        self.drafts()
            .get(&id)
            .filter(|stored| stored.expires_at > now)
            .map(|stored| stored.draft.clone())
    }

    /// Drop expired drafts; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut drafts = self.drafts();
        let before = drafts.len();
        drafts.retain(|_, stored| stored.expires_at > now);
        before - drafts.len()
    }

    /// Number of stored drafts, expired ones included until purged
    #[must_use]
    pub fn len(&self) -> usize {
        self.drafts().len()
    }

    /// Whether the store holds no drafts
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.drafts().is_empty()
    }

    fn drafts(&self) -> MutexGuard<'_, HashMap<DraftId, Stored>> {
        self.drafts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use fieldbook_core::types::{GuestContact, UserId};
    use fieldbook_testing::{ManualClock, test_clock};

    fn t(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    fn draft(start: u32, end: u32) -> BookingDraft {
        BookingDraft {
            resource_id: ResourceId::new(),
            slot: Slot::new(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(), t(start), t(end)),
            owner: BookingOwner::Registered { user_id: UserId::new() },
            note: Some("bring bibs".to_string()),
        }
    }

    fn store(clock: &ManualClock) -> DraftStore {
        DraftStore::new(Arc::new(clock.clone()), Duration::from_secs(15 * 60), 480)
    }

    #[test]
    fn take_is_single_use() {
        let clock = test_clock();
        let drafts = store(&clock);
        let id = drafts.stash(draft(10, 11)).unwrap();

        let peeked = drafts.peek(id).unwrap();
        assert_eq!(drafts.take(id), Some(peeked));
        assert!(drafts.take(id).is_none());
    }

    #[test]
    fn drafts_expire_after_ttl() {
        let clock = test_clock();
        let drafts = store(&clock);
        let id = drafts.stash(draft(10, 11)).unwrap();

        clock.advance(chrono::Duration::minutes(15));

        assert!(drafts.peek(id).is_none());
        assert_eq!(drafts.purge_expired(), 1);
        assert!(drafts.take(id).is_none());
        assert!(drafts.is_empty());
    }

    #[test]
    fn stash_validates_shape() {
        let clock = test_clock();
        let drafts = store(&clock);

        assert!(drafts.stash(draft(11, 10)).is_err());
        assert!(drafts.stash(draft(6, 15)).is_err());

        let mut guest = draft(10, 11);
        guest.owner = BookingOwner::Guest {
            contact: GuestContact {
                name: String::new(),
                phone: "0900000000".to_string(),
                email: None,
            },
        };
        assert!(drafts.stash(guest).is_err());
        assert_eq!(drafts.len(), 0);
    }
}
