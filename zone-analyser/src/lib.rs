/*!
Zone detection core for video surveillance monitors: tiered per-plugin zone
evaluation, per-monitor orchestration, and native plugin loading.
*/

pub mod core;

pub use crate::core::{
    analyser::{Analyser, EnabledZones},
    config::AnalyserConfig,
    detector::{Detection, Detector, DetectorPlugin},
    error::{AnalyserError, ConfigError, DetectorError, PluginError, SessionError},
    event::{Event, NoteSet, NoteSetMap},
    frame::Frame,
    log_sink::{LogSink, TracingSink},
    plugin_config::{PluginGeneralConfig, PluginZoneConfig, ZoneConfig, ZoneSettings},
    plugin_loader::{DetectorRegistrar, PluginLoader, PluginManager, PluginModule, ENGINE_VERSION},
    session::{MonitorSession, SessionSummary},
    zone::{MonitorZone, Zone, ZoneType},
};
