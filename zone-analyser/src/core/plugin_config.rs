/*!
Per-plugin and per-zone configuration model, scoped to one monitor session
*/

use std::collections::BTreeMap;

use serde::Serialize;
use zone_store::{
    SETTING_ENABLED, SETTING_INCLUDE_NAT_DET, SETTING_REINIT_NAT_DET, SETTING_REQUIRE_NAT_DET,
};

/// Zone index -> setting name -> raw value, for the zones a plugin is enabled on
pub type ZoneSettings = BTreeMap<usize, BTreeMap<String, String>>;

/// Flags a plugin declares for one zone. All default to false.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PluginZoneConfig {
    pub enabled: bool,
    pub require_nat_det: bool,
    pub include_nat_det: bool,
    pub reinit_nat_det: bool,
}

impl PluginZoneConfig {
    /// Set the flag named by `name`. Unknown names are ignored.
    pub fn set_flag(&mut self, name: &str) {
        match name {
            SETTING_ENABLED => self.enabled = true,
            SETTING_REQUIRE_NAT_DET => self.require_nat_det = true,
            SETTING_INCLUDE_NAT_DET => self.include_nat_det = true,
            SETTING_REINIT_NAT_DET => self.reinit_nat_det = true,
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PluginGeneralConfig {
    pub registered: bool,
    pub configured: bool,
}

/// Native-detection flags merged across every loaded plugin for one zone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ZoneConfig {
    pub require_nat_det: bool,
    pub include_nat_det: bool,
    pub reinit_nat_det: bool,
}

impl ZoneConfig {
    pub fn set_flag(&mut self, name: &str) {
        match name {
            SETTING_REQUIRE_NAT_DET => self.require_nat_det = true,
            SETTING_INCLUDE_NAT_DET => self.include_nat_det = true,
            SETTING_REINIT_NAT_DET => self.reinit_nat_det = true,
            _ => {}
        }
    }
}

/// Bookkeeping for every plugin seen during one monitor session. Filled while
/// the analyser initializes, read-only afterwards, dropped on reload.
#[derive(Debug, Default, Clone)]
pub struct PluginRegistry {
    general: BTreeMap<String, PluginGeneralConfig>,
    zones: BTreeMap<String, BTreeMap<u32, PluginZoneConfig>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_registered(&mut self, plugin: &str) {
        self.general.entry(plugin.to_string()).or_default().registered = true;
    }

    pub fn mark_configured(&mut self, plugin: &str) {
        self.general.entry(plugin.to_string()).or_default().configured = true;
    }

    pub fn general(&self, plugin: &str) -> Option<PluginGeneralConfig> {
        self.general.get(plugin).copied()
    }

    pub fn zone_entry(&mut self, plugin: &str, zone_id: u32) -> &mut PluginZoneConfig {
        self.zones
            .entry(plugin.to_string())
            .or_default()
            .entry(zone_id)
            .or_default()
    }

    pub fn zone(&self, plugin: &str, zone_id: u32) -> Option<PluginZoneConfig> {
        self.zones.get(plugin).and_then(|z| z.get(&zone_id)).copied()
    }

    pub fn zones(&self, plugin: &str) -> Option<&BTreeMap<u32, PluginZoneConfig>> {
        self.zones.get(plugin)
    }

    /// Drop the zone flags of a plugin before they are read again.
    pub fn clear_zones(&mut self, plugin: &str) {
        self.zones.remove(plugin);
    }

    pub fn clear(&mut self) {
        self.general.clear();
        self.zones.clear();
    }
}
