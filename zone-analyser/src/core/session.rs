/*!
One monitor's analysis session: plugin loading, analyser initialization,
cleanup of stale settings, and full reloads.
*/

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use zone_store::{SqliteConfigStore, ZoneType};

use crate::core::{
    analyser::Analyser,
    config::AnalyserConfig,
    error::SessionError,
    plugin_config::ZoneConfig,
    plugin_loader::PluginManager,
};

pub struct MonitorSession {
    config: AnalyserConfig,
    store: SqliteConfigStore,
    manager: Option<PluginManager>,
    started_at: DateTime<Utc>,
    reloads: u32,
}

impl MonitorSession {
    pub fn open(config: AnalyserConfig) -> Result<Self, SessionError> {
        let store = SqliteConfigStore::open(&config.store.path)?;
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: AnalyserConfig, store: SqliteConfigStore) -> Self {
        Self {
            config,
            store,
            manager: None,
            started_at: Utc::now(),
            reloads: 0,
        }
    }

    pub fn config(&self) -> &AnalyserConfig {
        &self.config
    }

    pub fn store(&self) -> &SqliteConfigStore {
        &self.store
    }

    pub fn analyser(&self) -> Option<&Analyser> {
        self.manager.as_ref().map(PluginManager::analyser)
    }

    /// Load the plugin directory and bring the analyser up.
    pub fn start(&mut self) -> Result<SessionSummary, SessionError> {
        let mut manager = PluginManager::new(self.new_analyser());

        let dir = &self.config.plugins.dir;
        if dir.is_dir() {
            manager.load_plugins(dir)?;
        } else {
            warn!("Plugin directory {:?} does not exist, running without plugins", dir);
        }

        self.start_with(manager)
    }

    /// Initialize the analyser owned by `manager` against the store, then
    /// drop settings of plugins it did not load.
    pub fn start_with(&mut self, mut manager: PluginManager) -> Result<SessionSummary, SessionError> {
        info!("Starting analysis of monitor {}", self.config.monitor.id);

        manager
            .analyser_mut()
            .initialize(&self.store, self.config.plugins.config_file.as_deref())?;
        manager.analyser().cleanup_plugins(&self.store)?;

        self.manager = Some(manager);
        self.started_at = Utc::now();
        Ok(self.summary())
    }

    /// Throw away every detector and module and start from scratch.
    pub fn reload(&mut self) -> Result<SessionSummary, SessionError> {
        self.manager = None;
        self.reloads += 1;
        info!("Reloading monitor {} (reload #{})", self.config.monitor.id, self.reloads);
        self.start()
    }

    pub fn new_analyser(&self) -> Analyser {
        Analyser::new(self.config.monitor.id, self.config.monitor.native_detection)
    }

    pub fn summary(&self) -> SessionSummary {
        let mut summary = SessionSummary {
            monitor_id: self.config.monitor.id,
            native_detection: self.config.monitor.native_detection,
            started_at: self.started_at,
            reloads: self.reloads,
            zones: Vec::new(),
            detectors: Vec::new(),
            modules: Vec::new(),
        };

        let Some(manager) = &self.manager else {
            return summary;
        };
        let analyser = manager.analyser();

        summary.modules = manager.loaded_modules().map(str::to_string).collect();
        summary.zones = analyser
            .monitor_zones()
            .iter()
            .enumerate()
            .map(|(index, zone)| ZoneSummary {
                index,
                id: zone.id,
                name: zone.name.clone(),
                zone_type: zone.zone_type,
                config: analyser.zone_config(index).unwrap_or_default(),
            })
            .collect();
        summary.detectors = analyser
            .detectors()
            .iter()
            .map(|detector| DetectorSummary {
                plugin: detector.plugin_name().to_string(),
                cause: detector.detection_cause().to_string(),
                enabled: detector.is_enabled(),
                zones: detector
                    .plugin_zones()
                    .iter()
                    .filter_map(|&i| analyser.monitor_zones().get(i).map(|z| z.name.clone()))
                    .collect(),
                module: detector.module().map(|m| m.path().to_path_buf()),
            })
            .collect();

        summary
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub monitor_id: u32,
    pub native_detection: bool,
    pub started_at: DateTime<Utc>,
    pub reloads: u32,
    pub zones: Vec<ZoneSummary>,
    pub detectors: Vec<DetectorSummary>,
    pub modules: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ZoneSummary {
    pub index: usize,
    pub id: u32,
    pub name: String,
    pub zone_type: ZoneType,
    pub config: ZoneConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectorSummary {
    pub plugin: String,
    pub cause: String,
    pub enabled: bool,
    pub zones: Vec<String>,
    pub module: Option<PathBuf>,
}

impl SessionSummary {
    pub fn enabled_detectors(&self) -> usize {
        self.detectors.iter().filter(|d| d.enabled).count()
    }
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Monitor {} (native detection {}), {} zone(s), {}/{} detector(s) enabled",
            self.monitor_id,
            if self.native_detection { "on" } else { "off" },
            self.zones.len(),
            self.enabled_detectors(),
            self.detectors.len()
        )?;
        for zone in &self.zones {
            writeln!(f, "  zone #{} {} [{}] id={}", zone.index, zone.name, zone.zone_type, zone.id)?;
        }
        for detector in &self.detectors {
            let state = if detector.enabled { "enabled" } else { "disabled" };
            writeln!(
                f,
                "  detector {} ({}) {}: {}",
                detector.plugin,
                detector.cause,
                state,
                detector.zones.join(", ")
            )?;
        }
        Ok(())
    }
}

/// Helper function to open a session from a config file
pub fn create_session_from_config_file(config_path: impl AsRef<Path>) -> Result<MonitorSession, SessionError> {
    let config = AnalyserConfig::load(config_path)?;
    MonitorSession::open(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::detector::{Detector, DetectorPlugin};
    use crate::core::error::DetectorError;
    use crate::core::frame::Frame;
    use crate::core::plugin_loader::DetectorRegistrar;
    use crate::core::zone::Zone;
    use zone_store::{ZoneRecord, SETTING_ENABLED};

    #[derive(Clone)]
    struct NeverPlugin;

    impl DetectorPlugin for NeverPlugin {
        fn check_zone(&mut self, _zone: &dyn Zone, _index: usize, _frame: &Frame) -> Result<bool, DetectorError> {
            Ok(false)
        }

        fn clone_box(&self) -> Box<dyn DetectorPlugin> {
            Box::new(self.clone())
        }
    }

    fn seeded_store() -> SqliteConfigStore {
        let store = SqliteConfigStore::open_in_memory().unwrap();
        for (id, name, zone_type) in [(4, "Drive", ZoneType::Active), (6, "Road", ZoneType::Preclusive)] {
            store
                .insert_zone(3, &ZoneRecord { id, name: name.to_string(), zone_type })
                .unwrap();
        }
        store.set_plugin_setting(3, 4, "face", SETTING_ENABLED, "yes").unwrap();
        store.set_plugin_setting(3, 4, "retired", SETTING_ENABLED, "yes").unwrap();
        store
    }

    fn config(plugin_dir: &Path) -> AnalyserConfig {
        let mut config = AnalyserConfig::default();
        config.monitor.id = 3;
        config.plugins.dir = plugin_dir.to_path_buf();
        config
    }

    #[test]
    fn start_initializes_and_removes_stale_plugins() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = MonitorSession::with_store(config(dir.path()), seeded_store());

        let mut manager = PluginManager::new(session.new_analyser());
        manager.add_detector(Detector::new("face", "Face", Box::new(NeverPlugin)));

        let summary = session.start_with(manager).unwrap();
        assert_eq!(summary.monitor_id, 3);
        assert_eq!(summary.zones.len(), 2);
        assert_eq!(summary.enabled_detectors(), 1);
        assert_eq!(summary.detectors[0].zones, vec!["Drive".to_string()]);
        assert!(summary.detectors[0].module.is_none());
        assert_eq!(session.store().plugin_names(3).unwrap(), vec!["face".to_string()]);

        let text = summary.to_string();
        assert!(text.contains("1/1 detector(s) enabled"));
        assert!(text.contains("detector face (Face) enabled: Drive"));
    }

    #[test]
    fn reload_starts_over_from_the_plugin_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = MonitorSession::with_store(config(dir.path()), seeded_store());

        let mut manager = PluginManager::new(session.new_analyser());
        manager.add_detector(Detector::new("face", "Face", Box::new(NeverPlugin)));
        session.start_with(manager).unwrap();

        let summary = session.reload().unwrap();
        assert_eq!(summary.reloads, 1);
        assert!(summary.detectors.is_empty());
        assert!(session.store().plugin_names(3).unwrap().is_empty());
    }

    #[test]
    fn summary_serializes_to_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = MonitorSession::with_store(config(dir.path()), seeded_store());
        assert!(session.analyser().is_none());

        let summary = session.start().unwrap();
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["monitor_id"], 3);
        assert_eq!(json["zones"][1]["zone_type"], serde_json::to_value(ZoneType::Preclusive).unwrap());
        assert_eq!(json["zones"][0]["config"]["require_nat_det"], false);
    }

    #[test]
    fn missing_config_file_fails_to_open() {
        let result = create_session_from_config_file("/nonexistent/analyser.toml");
        assert!(matches!(result, Err(SessionError::Config(_))));
    }
}
