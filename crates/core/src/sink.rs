//! Event sink implementations and journal replay.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::events::{EventRecord, SessionEvent, SessionStatus};
use crate::traits::{EventSink, OpenPosition, RecoveryQuery, SessionRecord};

// =============================================================================
// Tracing
// =============================================================================

/// Logs every event as a structured `tracing` line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn publish(&self, record: &EventRecord) {
        let leg = record.event.leg_id();
        match &record.event {
            SessionEvent::PhaseChanged { from, to, .. } => {
                debug!(session = %record.session_id, ?leg, %from, %to, "Leg phase changed");
            }
            SessionEvent::LegExited {
                symbol,
                pnl,
                pnl_pct,
                reason,
                ..
            } => {
                info!(
                    session = %record.session_id,
                    ?leg,
                    symbol = %symbol,
                    pnl = %pnl,
                    pnl_pct = %pnl_pct.round_dp(2),
                    reason = %reason,
                    "Leg exited"
                );
            }
            SessionEvent::ExitOrderFailed {
                symbol,
                error,
                restored_stop_order_id,
                ..
            } => {
                warn!(
                    session = %record.session_id,
                    ?leg,
                    symbol = %symbol,
                    error = %error,
                    restored_stop = ?restored_stop_order_id,
                    "Exit order failed, broker position may still be open"
                );
            }
            SessionEvent::LegFailed { error, .. } => {
                warn!(session = %record.session_id, ?leg, error = %error, "Leg failed");
            }
            SessionEvent::SessionCrashed { reason } => {
                warn!(session = %record.session_id, reason = %reason, "Session marked crashed");
            }
            other => {
                debug!(session = %record.session_id, ?leg, event = other.name(), "{:?}", other);
            }
        }
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// Keeps every record in memory, in publish order.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<EventRecord>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn records(&self) -> Vec<EventRecord> {
        self.records.lock().clone()
    }

    /// Events only, without envelopes.
    #[must_use]
    pub fn events(&self) -> Vec<SessionEvent> {
        self.records.lock().iter().map(|r| r.event.clone()).collect()
    }

    /// Events belonging to one leg.
    #[must_use]
    pub fn leg_events(&self, leg_id: u32) -> Vec<SessionEvent> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.event.leg_id() == Some(leg_id))
            .map(|r| r.event.clone())
            .collect()
    }
}

impl EventSink for MemorySink {
    fn publish(&self, record: &EventRecord) {
        self.records.lock().push(record.clone());
    }
}

impl RecoveryQuery for MemorySink {
    fn sessions_still_running(&self) -> Result<Vec<SessionRecord>> {
        Ok(JournalState::replay(self.records.lock().iter()).running())
    }

    fn active_positions_for(&self, session_id: &str) -> Result<Vec<OpenPosition>> {
        Ok(JournalState::replay(self.records.lock().iter()).open_positions(session_id))
    }
}

// =============================================================================
// Fan-out
// =============================================================================

/// Publishes to several sinks in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn publish(&self, record: &EventRecord) {
        for sink in &self.sinks {
            sink.publish(record);
        }
    }
}

// =============================================================================
// JSON-lines journal
// =============================================================================

/// Appends one JSON object per event to a file.
pub struct JournalSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JournalSink {
    /// Opens (or creates) the journal in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or its parent directory cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open journal {}", path.display()))?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, record: &EventRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }
}

impl EventSink for JournalSink {
    fn publish(&self, record: &EventRecord) {
        if let Err(e) = self.append(record) {
            warn!(path = %self.path.display(), error = %e, "Failed to append journal record");
        }
    }
}

/// Read side of a journal file.
pub struct JournalReader {
    path: PathBuf,
}

impl JournalReader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Parses every record. Malformed lines are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn records(&self) -> Result<Vec<EventRecord>> {
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open journal {}", self.path.display()))?;
        let mut records = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<EventRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(line = line_no + 1, error = %e, "Skipping malformed journal line"),
            }
        }
        Ok(records)
    }

    /// Appends a `SessionCrashed` record for every session that never closed.
    /// Returns the affected session ids.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be read or appended to.
    pub fn mark_crashed(&self, reason: &str) -> Result<Vec<String>> {
        let running = self.sessions_still_running()?;
        if running.is_empty() {
            return Ok(Vec::new());
        }
        let sink = JournalSink::open(&self.path)?;
        let mut ids = Vec::with_capacity(running.len());
        for session in running {
            sink.append(&EventRecord {
                session_id: session.session_id.clone(),
                at: Utc::now(),
                event: SessionEvent::SessionCrashed {
                    reason: reason.to_string(),
                },
            })?;
            ids.push(session.session_id);
        }
        Ok(ids)
    }
}

impl RecoveryQuery for JournalReader {
    fn sessions_still_running(&self) -> Result<Vec<SessionRecord>> {
        Ok(JournalState::replay(self.records()?.iter()).running())
    }

    fn active_positions_for(&self, session_id: &str) -> Result<Vec<OpenPosition>> {
        Ok(JournalState::replay(self.records()?.iter()).open_positions(session_id))
    }
}

/// Session and position state rebuilt from a record stream.
#[derive(Debug, Default)]
struct JournalState {
    sessions: BTreeMap<String, SessionRecord>,
    open: BTreeMap<(String, u32), OpenPosition>,
    /// Legs whose exit order failed; they stay open after `LegExited`.
    exit_failed: BTreeSet<(String, u32)>,
}

impl JournalState {
    fn replay<'a>(records: impl Iterator<Item = &'a EventRecord>) -> Self {
        let mut state = Self::default();
        for record in records {
            let sid = &record.session_id;
            match &record.event {
                SessionEvent::SessionStarted {
                    strategy,
                    underlying,
                    ..
                } => {
                    state.sessions.insert(
                        sid.clone(),
                        SessionRecord {
                            session_id: sid.clone(),
                            strategy: strategy.clone(),
                            underlying: underlying.clone(),
                            started_at: record.at,
                            status: SessionStatus::Running,
                        },
                    );
                }
                SessionEvent::SessionClosed { status, .. } => {
                    if let Some(session) = state.sessions.get_mut(sid) {
                        session.status = *status;
                    }
                }
                SessionEvent::SessionCrashed { .. } => {
                    if let Some(session) = state.sessions.get_mut(sid) {
                        session.status = SessionStatus::Crashed;
                    }
                }
                SessionEvent::LegEntered {
                    leg_id,
                    leg_name,
                    symbol,
                    quantity,
                    entry_price,
                    stop_price,
                    ..
                } => {
                    state.open.insert(
                        (sid.clone(), *leg_id),
                        OpenPosition {
                            session_id: sid.clone(),
                            leg_id: *leg_id,
                            leg_name: leg_name.clone(),
                            symbol: symbol.clone(),
                            quantity: *quantity,
                            entry_price: *entry_price,
                            stop_price: *stop_price,
                            entered_at: record.at,
                        },
                    );
                }
                SessionEvent::StopUpdated {
                    leg_id, new_stop, ..
                } => {
                    if let Some(pos) = state.open.get_mut(&(sid.clone(), *leg_id)) {
                        pos.stop_price = *new_stop;
                    }
                }
                SessionEvent::ExitOrderFailed { leg_id, .. } => {
                    state.exit_failed.insert((sid.clone(), *leg_id));
                }
                SessionEvent::LegExited { leg_id, .. } => {
                    let key = (sid.clone(), *leg_id);
                    if !state.exit_failed.contains(&key) {
                        state.open.remove(&key);
                    }
                }
                _ => {}
            }
        }
        state
    }

    fn running(&self) -> Vec<SessionRecord> {
        self.sessions
            .values()
            .filter(|s| s.status == SessionStatus::Running)
            .cloned()
            .collect()
    }

    fn open_positions(&self, session_id: &str) -> Vec<OpenPosition> {
        self.open
            .values()
            .filter(|p| p.session_id == session_id)
            .cloned()
            .collect()
    }
}
