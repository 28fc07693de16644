//! In-memory alarm log
//!
//! Unbounded until an operator clears it. Entries are never mutated.

use parking_lot::Mutex;

use crate::domain::AlarmEvent;

/// Size of the quick-display view
pub const RECENT_ALARMS_VIEW: usize = 10;

#[derive(Debug, Default)]
pub struct AlarmLog {
    entries: Mutex<Vec<AlarmEvent>>,
}

impl AlarmLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, event: AlarmEvent) {
        self.entries.lock().push(event);
    }

    /// Most recent `limit` entries, oldest first
    pub fn recent(&self, limit: usize) -> Vec<AlarmEvent> {
        let entries = self.entries.lock();
        let start = entries.len().saturating_sub(limit);
        entries[start..].to_vec()
    }

    /// The capped quick-display view
    pub fn recent_view(&self) -> Vec<AlarmEvent> {
        self.recent(RECENT_ALARMS_VIEW)
    }

    pub fn all(&self) -> Vec<AlarmEvent> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Returns the number of removed entries
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let removed = entries.len();
        entries.clear();
        removed
    }
}
