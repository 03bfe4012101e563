/*!
Zone capability interface consumed by detectors, plus the in-memory zone
used by the monitor runtime.
*/

use serde::Serialize;
pub use zone_store::ZoneType;
use zone_store::ZoneRecord;

/// What a detector may read from, and do to, a monitor zone.
///
/// The type never changes during a monitoring session. Alarm and
/// post-processing transitions take `&mut self`, so only one evaluation can
/// touch a zone at a time.
pub trait Zone: Send {
    fn id(&self) -> u32;
    fn label(&self) -> &str;
    fn zone_type(&self) -> ZoneType;
    fn score(&self) -> i32;

    fn is_post_proc_enabled(&self) -> bool;
    fn is_post_proc_in_progress(&self) -> bool;
    fn stop_post_processing(&mut self);
    fn set_alarm(&mut self);

    fn is_active(&self) -> bool {
        self.zone_type() == ZoneType::Active
    }

    fn is_inclusive(&self) -> bool {
        self.zone_type() == ZoneType::Inclusive
    }

    fn is_exclusive(&self) -> bool {
        self.zone_type() == ZoneType::Exclusive
    }

    fn is_preclusive(&self) -> bool {
        self.zone_type() == ZoneType::Preclusive
    }

    fn is_inactive(&self) -> bool {
        self.zone_type() == ZoneType::Inactive
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PostProcState {
    Idle,
    InProgress,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorZone {
    id: u32,
    label: String,
    zone_type: ZoneType,
    score: i32,
    alarmed: bool,
    /// `None` when the zone has no deferred post-processing
    post_processing: Option<PostProcState>,
}

impl MonitorZone {
    pub fn new(id: u32, label: impl Into<String>, zone_type: ZoneType) -> Self {
        Self {
            id,
            label: label.into(),
            zone_type,
            score: 0,
            alarmed: false,
            post_processing: None,
        }
    }

    pub fn from_record(record: &ZoneRecord) -> Self {
        Self::new(record.id, record.name.clone(), record.zone_type)
    }

    pub fn with_score(mut self, score: i32) -> Self {
        self.score = score;
        self
    }

    pub fn with_post_processing(mut self) -> Self {
        self.post_processing = Some(PostProcState::Idle);
        self
    }

    pub fn set_score(&mut self, score: i32) {
        self.score = score;
    }

    /// Begin deferred analysis. No-op for zones without post-processing.
    pub fn start_post_processing(&mut self) {
        if self.post_processing.is_some() {
            self.post_processing = Some(PostProcState::InProgress);
        }
    }

    pub fn post_processing(&self) -> Option<PostProcState> {
        self.post_processing
    }

    pub fn is_alarmed(&self) -> bool {
        self.alarmed
    }

    /// Clear the alarm before the next frame.
    pub fn reset_alarm(&mut self) {
        self.alarmed = false;
    }
}

impl Zone for MonitorZone {
    fn id(&self) -> u32 {
        self.id
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn zone_type(&self) -> ZoneType {
        self.zone_type
    }

    fn score(&self) -> i32 {
        self.score
    }

    fn is_post_proc_enabled(&self) -> bool {
        self.post_processing.is_some()
    }

    fn is_post_proc_in_progress(&self) -> bool {
        self.post_processing == Some(PostProcState::InProgress)
    }

    fn stop_post_processing(&mut self) {
        if self.post_processing.is_some() {
            self.post_processing = Some(PostProcState::Idle);
        }
    }

    fn set_alarm(&mut self) {
        self.alarmed = true;
    }
}
