//! Lock state stored in the key-value store.

use reservoir_core::now_unix_ms;
use serde::Deserialize;
use serde::Serialize;

use crate::verified;

/// Current lock mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RWLockMode {
    /// Nobody holds the lock.
    Free,
    /// One or more readers hold the lock.
    Read,
    /// A single writer holds the lock.
    Write,
}

impl RWLockMode {
    /// Lowercase name for logs and status output.
    pub fn as_str(&self) -> &'static str {
        match self {
            RWLockMode::Free => "free",
            RWLockMode::Read => "read",
            RWLockMode::Write => "write",
        }
    }
}

/// A reader holding the lock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReaderEntry {
    /// Unique holder identifier.
    pub holder_id: String,
    /// Lease deadline (Unix ms).
    pub deadline_ms: u64,
}

impl ReaderEntry {
    /// Whether this reader's lease has elapsed.
    pub fn is_expired(&self) -> bool {
        verified::is_reader_expired(self.deadline_ms, now_unix_ms())
    }
}

/// The writer holding the lock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WriterEntry {
    /// Unique holder identifier.
    pub holder_id: String,
    /// Token issued when this writer acquired the lock.
    pub fencing_token: u64,
    /// Lease deadline (Unix ms).
    pub deadline_ms: u64,
}

impl WriterEntry {
    /// Whether this writer's lease has elapsed.
    pub fn is_expired(&self) -> bool {
        verified::is_writer_expired(self.deadline_ms, now_unix_ms())
    }
}

/// Full lock state, serialized as JSON under `__rwlock:{name}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RWLockState {
    /// Lock name.
    pub name: String,
    /// Current mode.
    pub mode: RWLockMode,
    /// Active writer, if any.
    pub writer: Option<WriterEntry>,
    /// Active readers.
    pub readers: Vec<ReaderEntry>,
    /// Global token, incremented on every write acquisition.
    pub fencing_token: u64,
}

impl RWLockState {
    /// Fresh state with nobody holding the lock.
    pub fn free(name: &str) -> Self {
        Self {
            name: name.to_string(),
            mode: RWLockMode::Free,
            writer: None,
            readers: Vec::new(),
            fencing_token: 0,
        }
    }

    /// Number of readers whose lease has not elapsed.
    pub fn active_reader_count(&self) -> u32 {
        self.readers.iter().filter(|r| !r.is_expired()).count() as u32
    }

    /// Whether `holder_id` holds an active read lock.
    pub fn has_read_lock(&self, holder_id: &str) -> bool {
        self.readers.iter().any(|r| r.holder_id == holder_id && !r.is_expired())
    }

    /// Whether `holder_id` holds the active write lock.
    pub fn has_write_lock(&self, holder_id: &str) -> bool {
        self.writer.as_ref().is_some_and(|w| w.holder_id == holder_id && !w.is_expired())
    }

    /// Whether the writer slot is empty or its lease has elapsed.
    pub fn is_writer_expired(&self) -> bool {
        self.writer.as_ref().is_none_or(|w| w.is_expired())
    }

    /// Drop readers whose lease has elapsed.
    pub fn cleanup_expired_readers(&mut self) {
        self.readers.retain(|r| !r.is_expired());
        self.mode = verified::compute_mode_after_cleanup(self.mode, self.readers.len() as u32, !self.is_writer_expired());
    }

    /// Drop the writer if its lease has elapsed.
    pub fn cleanup_expired_writer(&mut self) {
        if self.writer.as_ref().is_some_and(|w| w.is_expired()) {
            self.writer = None;
        }
        self.mode = verified::compute_mode_after_cleanup(self.mode, self.readers.len() as u32, self.writer.is_some());
    }
}
