use crate::events::{EventRecord, SessionStatus};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Receives session timeline events.
///
/// Publishing must not fail the caller: sinks log their own I/O errors.
pub trait EventSink: Send + Sync {
    fn publish(&self, record: &EventRecord);
}

/// A session as seen by crash recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub strategy: String,
    pub underlying: String,
    pub started_at: DateTime<Utc>,
    pub status: SessionStatus,
}

/// A position entered but never seen to exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub session_id: String,
    pub leg_id: u32,
    pub leg_name: String,
    pub symbol: String,
    pub quantity: u32,
    pub entry_price: Decimal,
    pub stop_price: Decimal,
    pub entered_at: DateTime<Utc>,
}

/// Out-of-band reconciliation surface. The engine never calls this itself.
pub trait RecoveryQuery {
    /// Sessions that started but never recorded a close.
    fn sessions_still_running(&self) -> Result<Vec<SessionRecord>>;

    /// Positions of `session_id` that were entered but not exited.
    fn active_positions_for(&self, session_id: &str) -> Result<Vec<OpenPosition>>;
}
