/*!
Configuration store for monitor zones and per-zone plugin settings.

The store is only touched while a monitor's analyser initializes or cleans
up; nothing here sits on the per-frame path.
*/

mod error;
mod sqlite;
mod types;

pub use error::{Result, StoreError};
pub use sqlite::SqliteConfigStore;
pub use types::{
    is_yes, PluginSetting, ZoneFlag, ZoneRecord, ZoneType, SETTING_ENABLED,
    SETTING_INCLUDE_NAT_DET, SETTING_REINIT_NAT_DET, SETTING_REQUIRE_NAT_DET,
};

/// Queries the analyser needs from the relational configuration store.
pub trait ConfigStore {
    /// Zones of a monitor, ordered by (type, id). The position of a zone in
    /// this list is its index everywhere else.
    fn monitor_zones(&self, monitor_id: u32) -> Result<Vec<ZoneRecord>>;

    /// Every setting row of a plugin on a monitor, ordered by zone id.
    fn plugin_settings(&self, monitor_id: u32, plugin: &str) -> Result<Vec<PluginSetting>>;

    /// Ids of the zones with `Enabled = yes` for the plugin, ascending.
    fn enabled_zone_ids(&self, monitor_id: u32, plugin: &str) -> Result<Vec<u32>>;

    /// Distinct (zone, flag) pairs set to yes for any of the given plugins,
    /// restricted to the native-detection flags.
    fn native_detection_flags(&self, monitor_id: u32, plugins: &[String]) -> Result<Vec<ZoneFlag>>;

    /// Delete the monitor's plugin rows whose plugin name is not in `keep`.
    /// Returns the number of rows removed.
    fn delete_plugins_except(&self, monitor_id: u32, keep: &[String]) -> Result<usize>;
}
