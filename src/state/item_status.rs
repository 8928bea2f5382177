/// Queue item status definitions
///
/// Every item in a work queue is in exactly one of these states. The allowed
/// transitions between them are what keeps a completed action from ever being
/// performed twice.
use serde::Serialize;
use std::fmt;

/// Represents the processing status of a queued item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Waiting to be claimed by the worker (or being retried)
    Pending,

    /// The remote action succeeded; never processed again
    Done,

    /// Gave up after too many attempts or a non-retryable error
    Failed,
}

impl ItemStatus {
    /// Checks whether the worker may move an item from this status to `next`
    ///
    /// Only pending items change status during processing. `Done` is final and
    /// `Failed` can only return to `Pending` through [`ItemStatus::can_reset`].
    ///
    /// # Arguments
    ///
    /// * `next` - The status the item would move to
    ///
    /// # Returns
    ///
    /// * `true` - The transition is permitted
    /// * `false` - The transition would violate the queue invariants
    pub fn can_transition_to(&self, next: ItemStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Pending | Self::Done | Self::Failed)
        )
    }

    /// Returns true if the bulk "reset failed" operation applies to this status
    pub fn can_reset(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Parses a status from its database string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all possible statuses
    pub fn all_states() -> &'static [ItemStatus] {
        &[Self::Pending, Self::Done, Self::Failed]
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_can_move_anywhere() {
        for next in ItemStatus::all_states() {
            assert!(ItemStatus::Pending.can_transition_to(*next));
        }
    }

    #[test]
    fn test_done_is_final() {
        for next in ItemStatus::all_states() {
            assert!(
                !ItemStatus::Done.can_transition_to(*next),
                "done -> {} must be rejected",
                next
            );
        }
        assert!(!ItemStatus::Done.can_reset());
    }

    #[test]
    fn test_failed_only_returns_through_reset() {
        assert!(!ItemStatus::Failed.can_transition_to(ItemStatus::Pending));
        assert!(!ItemStatus::Failed.can_transition_to(ItemStatus::Done));
        assert!(ItemStatus::Failed.can_reset());
        assert!(!ItemStatus::Pending.can_reset());
    }

    #[test]
    fn test_db_string_roundtrip() {
        for status in ItemStatus::all_states() {
            let db = status.to_db_string();
            assert_eq!(ItemStatus::from_db_string(db), Some(*status));
        }
    }

    #[test]
    fn test_from_db_string_invalid() {
        assert_eq!(ItemStatus::from_db_string("claimed"), None);
        assert_eq!(ItemStatus::from_db_string(""), None);
        assert_eq!(ItemStatus::from_db_string("PENDING"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", ItemStatus::Pending), "pending");
        assert_eq!(format!("{}", ItemStatus::Done), "done");
        assert_eq!(format!("{}", ItemStatus::Failed), "failed");
    }
}
