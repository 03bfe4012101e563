/*!
Per-monitor orchestration: loads zone and plugin configuration from the store,
drives every detector over each frame and folds their results together.
*/

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};
use zone_store::{ConfigStore, ZoneRecord};

use crate::core::{
    detector::Detector,
    error::AnalyserError,
    event::{Event, NoteSetMap},
    frame::Frame,
    log_sink::{LogSink, TracingSink},
    plugin_config::{PluginGeneralConfig, PluginRegistry, PluginZoneConfig, ZoneConfig, ZoneSettings},
    plugin_loader::DetectorRegistrar,
    zone::Zone,
};

/// Zone indices a plugin is enabled on, and whether that is enough to run it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnabledZones {
    pub indices: Vec<usize>,
    /// True iff at least one index is an Active or Exclusive zone
    pub enabled: bool,
}

pub struct Analyser {
    monitor_id: u32,
    native_detection: bool,
    detectors: Vec<Detector>,
    monitor_zones: Vec<ZoneRecord>,
    zones_config: Vec<ZoneConfig>,
    registry: PluginRegistry,
    sink: Arc<dyn LogSink>,
}

impl Analyser {
    pub fn new(monitor_id: u32, native_detection: bool) -> Self {
        Self {
            monitor_id,
            native_detection,
            detectors: Vec::new(),
            monitor_zones: Vec::new(),
            zones_config: Vec::new(),
            registry: PluginRegistry::new(),
            sink: Arc::new(TracingSink),
        }
    }

    /// Sink every registered detector logs through.
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        for detector in &mut self.detectors {
            detector.set_sink(Arc::clone(&self.sink));
        }
        self
    }

    pub fn monitor_id(&self) -> u32 {
        self.monitor_id
    }

    pub fn is_native_detection_enabled(&self) -> bool {
        self.native_detection
    }

    pub fn detectors(&self) -> &[Detector] {
        &self.detectors
    }

    pub fn monitor_zones(&self) -> &[ZoneRecord] {
        &self.monitor_zones
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Names of the loaded plugins in registration order, without repeats.
    pub fn plugin_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for detector in &self.detectors {
            if !names.iter().any(|n| n == detector.plugin_name()) {
                names.push(detector.plugin_name().to_string());
            }
        }
        names
    }

    pub fn add_detector(&mut self, mut detector: Detector) {
        detector.set_sink(Arc::clone(&self.sink));
        self.registry.mark_registered(detector.plugin_name());
        info!("Registered detector '{}' ({})", detector.plugin_name(), detector.detection_cause());
        self.detectors.push(detector);
    }

    /// Full configuration pipeline for the monitor: zones, per-plugin
    /// configuration, then the merged per-zone flags.
    pub fn initialize(&mut self, store: &dyn ConfigStore, config_file: Option<&Path>) -> Result<usize, AnalyserError> {
        let zone_count = self.load_monitor_zones(store)?;
        if zone_count == 0 {
            warn!("Monitor {} has no zones, no plugin can be enabled", self.monitor_id);
        }

        let enabled = self.configure_plugins(store, config_file)?;
        self.load_zones_config(store)?;

        info!(
            "Analyser ready for monitor {}: {} zone(s), {}/{} detector(s) enabled",
            self.monitor_id, zone_count, enabled, self.detectors.len()
        );
        Ok(enabled)
    }

    /// Load the monitor's zones ordered by (type, id). Positions in this list
    /// are the zone indices used by every detector.
    pub fn load_monitor_zones(&mut self, store: &dyn ConfigStore) -> Result<usize, AnalyserError> {
        self.monitor_zones = store.monitor_zones(self.monitor_id)?;
        debug!("Loaded {} zone(s) for monitor {}", self.monitor_zones.len(), self.monitor_id);
        Ok(self.monitor_zones.len())
    }

    pub fn enabled_zones_for_plugin(&self, store: &dyn ConfigStore, plugin: &str) -> Result<EnabledZones, AnalyserError> {
        let enabled_ids = store.enabled_zone_ids(self.monitor_id, plugin)?;

        let mut result = EnabledZones::default();
        let mut described = Vec::new();

        for (index, zone) in self.monitor_zones.iter().enumerate() {
            if enabled_ids.binary_search(&zone.id).is_err() {
                continue;
            }
            result.indices.push(index);
            result.enabled |= zone.zone_type.can_trigger();
            described.push(format!("{} ({})", zone.name, zone.zone_type));
        }

        if result.enabled {
            info!("Plugin '{}' is enabled for zone(s): {}", plugin, described.join(", "));
        } else {
            info!("Plugin '{}' is disabled (not enabled for any active or exclusive zones)", plugin);
        }
        Ok(result)
    }

    /// Load the plugin's settings for the zones in `indices`. Records the
    /// plugin's flags for every zone of the monitor in the registry.
    pub fn plugin_config(
        &mut self,
        store: &dyn ConfigStore,
        plugin: &str,
        indices: &[usize],
    ) -> Result<ZoneSettings, AnalyserError> {
        let rows = store.plugin_settings(self.monitor_id, plugin)?;

        self.registry.clear_zones(plugin);
        let mut settings = ZoneSettings::new();
        let mut matched = 0;

        for (index, zone) in self.monitor_zones.iter().enumerate() {
            let flags = self.registry.zone_entry(plugin, zone.id);

            for row in rows.iter().filter(|r| r.zone_id == zone.id) {
                matched += 1;
                if row.is_yes() {
                    flags.set_flag(&row.name);
                }
                if indices.contains(&index) {
                    settings
                        .entry(index)
                        .or_default()
                        .insert(row.name.clone(), row.value.clone());
                }
            }

            if flags.enabled && flags.require_nat_det && !self.native_detection {
                warn!(
                    "Plugin '{}' will never enter in alarm on zone '{}' because native detection is required but not enabled",
                    plugin, zone.name
                );
            }
        }

        if matched != rows.len() {
            warn!(
                "Plugin '{}' has {} setting(s) for zones unknown to monitor {}",
                plugin, rows.len() - matched, self.monitor_id
            );
        }
        Ok(settings)
    }

    /// Configure every registered detector from the store. Returns how many
    /// detectors ended up enabled.
    pub fn configure_plugins(&mut self, store: &dyn ConfigStore, config_file: Option<&Path>) -> Result<usize, AnalyserError> {
        let mut enabled = 0;

        for position in 0..self.detectors.len() {
            let plugin = self.detectors[position].plugin_name().to_string();

            if let Some(path) = config_file {
                if !is_valid_config_file(&plugin, path)? {
                    warn!("Plugin '{}' has no [{}] section in {:?}, leaving it unconfigured", plugin, plugin, path);
                    continue;
                }
            }

            let zones = self.enabled_zones_for_plugin(store, &plugin)?;
            let settings = self.plugin_config(store, &plugin, &zones.indices)?;

            if !zones.enabled {
                continue;
            }
            if let Some(&index) = zones.indices.iter().find(|&&i| i >= self.monitor_zones.len()) {
                return Err(AnalyserError::InvalidZoneIndex { index, count: self.monitor_zones.len() });
            }

            let detector = &mut self.detectors[position];
            if let Err(e) = detector.load_config(&settings) {
                warn!("Plugin '{}' rejected its configuration: {}", plugin, e);
                continue;
            }
            detector.enable_plugin(zones.indices);
            self.registry.mark_configured(&plugin);
            enabled += 1;
        }

        Ok(enabled)
    }

    /// Merge the native-detection flags of all loaded plugins into one entry
    /// per zone index. Returns false when no plugin is loaded.
    pub fn load_zones_config(&mut self, store: &dyn ConfigStore) -> Result<bool, AnalyserError> {
        self.zones_config = vec![ZoneConfig::default(); self.monitor_zones.len()];

        let plugins = self.plugin_names();
        if plugins.is_empty() {
            return Ok(false);
        }

        let flags = store.native_detection_flags(self.monitor_id, &plugins)?;
        for (index, zone) in self.monitor_zones.iter().enumerate() {
            for flag in flags.iter().filter(|f| f.zone_id == zone.id) {
                self.zones_config[index].set_flag(&flag.name);
            }
        }
        Ok(true)
    }

    /// Merged native-detection flags of the zone at `index`.
    pub fn zone_config(&self, index: usize) -> Option<ZoneConfig> {
        self.zones_config.get(index).copied()
    }

    pub fn plugin_general_config(&self, plugin: &str) -> Option<PluginGeneralConfig> {
        self.registry.general(plugin)
    }

    /// Per-zone flags of a plugin keyed by zone id, with defaults for every
    /// monitor zone it has no row for.
    pub fn plugin_zone_config(&self, plugin: &str) -> BTreeMap<u32, PluginZoneConfig> {
        let mut config = self.registry.zones(plugin).cloned().unwrap_or_default();
        for zone in &self.monitor_zones {
            config.entry(zone.id).or_default();
        }
        config
    }

    /// Run every detector over the frame, in registration order. Detectors
    /// with a nonzero score contribute their notes and cause; the summed
    /// score is returned. A detector that fails or panics is logged and
    /// skipped. Repeated causes are collapsed: a cause already present in
    /// `cause`, including one the caller put there, is not appended again.
    pub fn do_detection(
        &mut self,
        frame: &Frame,
        zones: &mut [Box<dyn Zone>],
        notes: &mut NoteSetMap,
        cause: &mut String,
    ) -> i32 {
        let mut score = 0;

        for detector in &mut self.detectors {
            let outcome = catch_unwind(AssertUnwindSafe(|| detector.detect(frame, zones)));
            let detection = match outcome {
                Ok(Ok(detection)) => detection,
                Ok(Err(e)) => {
                    warn!("Detector {} failed on monitor {}: {}", detector.plugin_name(), self.monitor_id, e);
                    continue;
                }
                Err(_) => {
                    warn!("Detector {} panicked on monitor {}", detector.plugin_name(), self.monitor_id);
                    continue;
                }
            };
            if detection.score == 0 {
                continue;
            }

            score += detection.score;
            notes
                .entry(detector.detection_cause().to_string())
                .or_default()
                .extend(detection.notes);

            let already_listed = cause.split(", ").any(|c| c == detector.detection_cause());
            if !already_listed {
                if !cause.is_empty() {
                    cause.push_str(", ");
                }
                cause.push_str(detector.detection_cause());
            }
        }

        score
    }

    pub fn on_create_event(&mut self, zones: &[Box<dyn Zone>], event: &mut Event) {
        for detector in &mut self.detectors {
            detector.on_create_event(zones, event);
        }
    }

    pub fn on_close_event(&mut self, zones: &[Box<dyn Zone>], event: &mut Event) {
        for detector in &mut self.detectors {
            detector.on_close_event(zones, event);
        }
    }

    /// Delete store rows of plugins that are no longer loaded for this monitor.
    pub fn cleanup_plugins(&self, store: &dyn ConfigStore) -> Result<usize, AnalyserError> {
        let keep = self.plugin_names();
        let deleted = store.delete_plugins_except(self.monitor_id, &keep)?;
        if deleted > 0 {
            info!("Removed {} setting(s) of unloaded plugins from monitor {}", deleted, self.monitor_id);
        }
        Ok(deleted)
    }
}

impl DetectorRegistrar for Analyser {
    fn add_detector(&mut self, detector: Detector) {
        Analyser::add_detector(self, detector);
    }
}

/// True when the file has a `[plugin]` section header line.
pub fn is_valid_config_file(plugin: &str, path: &Path) -> Result<bool, AnalyserError> {
    let content = std::fs::read_to_string(path).map_err(|source| AnalyserError::PluginConfigFile {
        path: path.to_path_buf(),
        source,
    })?;
    let header = format!("[{}]", plugin);
    Ok(content.lines().any(|line| line.trim_end() == header))
}
