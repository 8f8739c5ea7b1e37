//! Ticket and holder identity types

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a process contending for a GPU
///
/// Equality is the only comparison the queue protocol relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HolderId(u32);

impl HolderId {
    /// Wrap a raw OS process id
    pub fn new(pid: u32) -> Self {
        Self(pid)
    }

    /// Identity of the calling process
    pub fn current() -> Self {
        Self(std::process::id())
    }

    /// The underlying process id
    pub fn pid(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for HolderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A queued request for the right to claim a GPU
///
/// Tickets are immutable once created. Queue order is insertion order;
/// `enqueued_at` is only used for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Unique ticket identifier
    pub id: Uuid,
    /// Process that owns this ticket
    pub holder: HolderId,
    /// Enqueue timestamp
    pub enqueued_at: DateTime<Utc>,
}

impl Ticket {
    /// Create a new ticket for `holder` stamped with the current time
    pub fn new(holder: HolderId) -> Self {
        Self {
            id: Uuid::new_v4(),
            holder,
            enqueued_at: Utc::now(),
        }
    }

    /// Whether this ticket belongs to `holder`
    pub fn is_held_by(&self, holder: &HolderId) -> bool {
        self.holder == *holder
    }
}

/// Renders `<ISO-8601 timestamp, second precision> <holder>`
impl std::fmt::Display for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}",
            self.enqueued_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.holder
        )
    }
}
