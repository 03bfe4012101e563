/*!
Per-plugin detection unit: zone assignment, thresholds and the tiered zone
evaluation run against every frame.
*/

use std::fmt;
use std::sync::Arc;

use crate::core::{
    error::DetectorError,
    event::{Event, NoteSet, NoteSetMap},
    frame::Frame,
    log_sink::{LogSink, TracingSink, LOG_DEBUG},
    plugin_config::ZoneSettings,
    plugin_loader::PluginLoader,
    zone::{Zone, ZoneType},
};

/// Behavior a concrete plugin supplies to its detector.
pub trait DetectorPlugin: Send {
    /// Test one zone of the frame. `index` is the zone's position in the
    /// monitor's zone array.
    fn check_zone(&mut self, zone: &dyn Zone, index: usize, frame: &Frame) -> Result<bool, DetectorError>;

    /// Receive the per-zone settings of the zones the plugin is enabled on.
    fn load_config(&mut self, _settings: &ZoneSettings) -> Result<(), DetectorError> {
        Ok(())
    }

    fn on_create_event(&mut self, _zone: &dyn Zone, _index: usize, _event: &mut Event) {}

    /// May append to `note`, which is then stored under the detection cause.
    fn on_close_event(&mut self, _zone: &dyn Zone, _index: usize, _event: &mut Event, _note: &mut String) {}

    fn clone_box(&self) -> Box<dyn DetectorPlugin>;
}

/// Outcome of one detection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Detection {
    pub alarm: bool,
    pub score: i32,
    /// Labels of the zones that alarmed
    pub notes: NoteSet,
}

pub struct Detector {
    detection_cause: String,
    plugin_name: String,
    min_alarm_score: f64,
    max_alarm_score: f64,
    image_scale_factor: f64,
    new_width: u32,
    new_height: u32,
    log_prefix: String,
    enabled: bool,
    zones: Vec<usize>,
    sink: Arc<dyn LogSink>,
    plugin: Box<dyn DetectorPlugin>,
    // declared after `plugin` so the plugin drops before its module
    module: Option<PluginLoader>,
}

impl Detector {
    pub fn new(
        plugin_name: impl Into<String>,
        detection_cause: impl Into<String>,
        plugin: Box<dyn DetectorPlugin>,
    ) -> Self {
        let plugin_name = plugin_name.into();
        Self {
            detection_cause: detection_cause.into(),
            log_prefix: plugin_name.clone(),
            plugin_name,
            min_alarm_score: 0.0,
            max_alarm_score: 0.0,
            image_scale_factor: 1.0,
            new_width: 0,
            new_height: 0,
            enabled: false,
            zones: Vec::new(),
            sink: Arc::new(TracingSink),
            plugin,
            module: None,
        }
    }

    pub fn with_alarm_scores(mut self, min: f64, max: f64) -> Self {
        self.min_alarm_score = min;
        self.max_alarm_score = max;
        self
    }

    pub fn with_scale_factor(mut self, factor: f64) -> Self {
        self.image_scale_factor = factor;
        self
    }

    pub fn with_target_size(mut self, width: u32, height: u32) -> Self {
        self.new_width = width;
        self.new_height = height;
        self
    }

    pub fn with_log_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.log_prefix = prefix.into();
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Route this detector's log lines to `sink`. Detectors built inside a
    /// plugin module are given the host's sink when they are registered.
    pub fn set_sink(&mut self, sink: Arc<dyn LogSink>) {
        self.sink = sink;
    }

    pub fn detection_cause(&self) -> &str {
        &self.detection_cause
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    pub fn alarm_score_range(&self) -> (f64, f64) {
        (self.min_alarm_score, self.max_alarm_score)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn plugin_zones(&self) -> &[usize] {
        &self.zones
    }

    pub(crate) fn module(&self) -> Option<&PluginLoader> {
        self.module.as_ref()
    }

    pub(crate) fn retain_module(&mut self, loader: PluginLoader) {
        self.module = Some(loader);
    }

    /// Assign the zone indices and enable the detector in one step.
    pub fn enable_plugin(&mut self, zones: Vec<usize>) {
        self.zones = zones;
        self.enabled = true;
    }

    pub fn load_config(&mut self, settings: &ZoneSettings) -> Result<(), DetectorError> {
        self.plugin.load_config(settings)
    }

    /// Size the plugin should analyse the frame at. An explicit target size
    /// wins over the scale factor.
    pub fn scaled_dimensions(&self, frame: &Frame) -> (u32, u32) {
        if self.new_width > 0 && self.new_height > 0 {
            return (self.new_width, self.new_height);
        }
        if self.image_scale_factor > 0.0 && self.image_scale_factor != 1.0 {
            let scale = |v: u32| ((v as f64) * self.image_scale_factor).round().max(1.0) as u32;
            return (scale(frame.width()), scale(frame.height()));
        }
        (frame.width(), frame.height())
    }

    pub fn log(&self, level: u8, level_name: &str, message: &str) {
        let line = format!("{} [{}: {}]", level_name, self.log_prefix, message);
        self.sink.log(level, level_name, &line);
    }

    /// Run the tiered evaluation against one frame.
    ///
    /// A preclusive match cancels the pass. Otherwise active zones decide
    /// whether inclusive zones (on alarm) or exclusive zones (no alarm) are
    /// evaluated next; never both.
    pub fn detect(&mut self, frame: &Frame, zones: &mut [Box<dyn Zone>]) -> Result<Detection, DetectorError> {
        if !self.enabled {
            return Ok(Detection::default());
        }

        let mut detection = Detection::default();

        if self.evaluate_tier(ZoneType::Preclusive, frame, zones, &mut detection)? {
            self.log(LOG_DEBUG, "DEBUG", &format!(
                "Preclusive zone alarmed, discarding score {}", detection.score
            ));
            return Ok(Detection::default());
        }

        detection.alarm = self.evaluate_tier(ZoneType::Active, frame, zones, &mut detection)?;

        if detection.alarm {
            self.evaluate_tier(ZoneType::Inclusive, frame, zones, &mut detection)?;
        } else {
            detection.alarm = self.evaluate_tier(ZoneType::Exclusive, frame, zones, &mut detection)?;
        }

        Ok(detection)
    }

    fn evaluate_tier(
        &mut self,
        tier: ZoneType,
        frame: &Frame,
        zones: &mut [Box<dyn Zone>],
        detection: &mut Detection,
    ) -> Result<bool, DetectorError> {
        let count = zones.len();
        let mut matched = false;

        for &index in &self.zones {
            let zone = zones
                .get_mut(index)
                .ok_or(DetectorError::ZoneIndexOutOfRange { index, count })?;

            if zone.zone_type() != tier {
                continue;
            }
            if zone.is_post_proc_enabled() && !zone.is_post_proc_in_progress() {
                continue;
            }
            if tier != ZoneType::Active {
                self.log(LOG_DEBUG, "DEBUG", &format!(
                    "Checking {} zone {}", tier.as_str().to_lowercase(), zone.label()
                ));
            }

            if !self.plugin.check_zone(zone.as_ref(), index, frame)? {
                continue;
            }

            matched = true;
            detection.score += zone.score();

            let message = if zone.is_post_proc_enabled() {
                zone.stop_post_processing();
                format!("Zone is alarmed, zone score = {} (post-processing)", zone.score())
            } else {
                if tier != ZoneType::Preclusive {
                    zone.set_alarm();
                }
                format!("Zone is alarmed, zone score = {}", zone.score())
            };
            self.log(LOG_DEBUG, "DEBUG", &message);

            if tier != ZoneType::Preclusive {
                detection.notes.insert(zone.label().to_string());
            }
        }

        Ok(matched)
    }

    pub fn on_create_event(&mut self, zones: &[Box<dyn Zone>], event: &mut Event) {
        for &index in &self.zones {
            if let Some(zone) = zones.get(index) {
                self.plugin.on_create_event(zone.as_ref(), index, event);
            }
        }
    }

    /// Let the plugin annotate every assigned zone, then store each zone's
    /// note under this detector's cause. Notes from successive zones are
    /// unioned, not overwritten.
    pub fn on_close_event(&mut self, zones: &[Box<dyn Zone>], event: &mut Event) {
        for &index in &self.zones {
            let Some(zone) = zones.get(index) else {
                continue;
            };

            let mut note = format!("  [Zone {}]\n", zone.label());
            self.plugin.on_close_event(zone.as_ref(), index, event, &mut note);

            let mut notes = NoteSetMap::new();
            notes.entry(self.detection_cause.clone()).or_default().insert(note);
            event.update_notes(&notes);
        }
    }
}

/// Copies never start enabled; the plugin must be enabled again.
impl Clone for Detector {
    fn clone(&self) -> Self {
        Self {
            detection_cause: self.detection_cause.clone(),
            plugin_name: self.plugin_name.clone(),
            min_alarm_score: self.min_alarm_score,
            max_alarm_score: self.max_alarm_score,
            image_scale_factor: self.image_scale_factor,
            new_width: self.new_width,
            new_height: self.new_height,
            log_prefix: self.log_prefix.clone(),
            enabled: false,
            zones: self.zones.clone(),
            sink: Arc::clone(&self.sink),
            plugin: self.plugin.clone_box(),
            module: self.module.clone(),
        }
    }
}

impl fmt::Debug for Detector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Detector")
            .field("plugin_name", &self.plugin_name)
            .field("detection_cause", &self.detection_cause)
            .field("enabled", &self.enabled)
            .field("zones", &self.zones)
            .finish_non_exhaustive()
    }
}
