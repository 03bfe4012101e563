/*!
Event note collection shared by the per-frame aggregation and the close hooks
*/

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type NoteSet = BTreeSet<String>;

/// Detection cause -> notes recorded under that cause
pub type NoteSetMap = BTreeMap<String, NoteSet>;

/// Union `source` into `target`, cause by cause.
pub fn merge_notes(target: &mut NoteSetMap, source: &NoteSetMap) {
    for (cause, notes) in source {
        target
            .entry(cause.clone())
            .or_default()
            .extend(notes.iter().cloned());
    }
}

/// The slice of an event the detection core writes to. Persistence happens
/// elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    pub monitor_id: u32,
    pub cause: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    notes: NoteSetMap,
}

impl Event {
    pub fn new(id: u64, monitor_id: u32, cause: impl Into<String>) -> Self {
        Self {
            id,
            monitor_id,
            cause: cause.into(),
            start_time: Utc::now(),
            end_time: None,
            notes: NoteSetMap::new(),
        }
    }

    pub fn update_notes(&mut self, notes: &NoteSetMap) {
        merge_notes(&mut self.notes, notes);
    }

    pub fn notes(&self) -> &NoteSetMap {
        &self.notes
    }

    pub fn close(&mut self) {
        self.end_time = Some(Utc::now());
    }

    pub fn is_closed(&self) -> bool {
        self.end_time.is_some()
    }
}
