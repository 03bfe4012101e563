/*!
SQLite implementation of the configuration store.
Zone rows and plugin setting rows live in the `Zones` and `PluginsConfig` tables.
*/

use std::path::Path;

use rusqlite::{Connection, Row, ToSql};
use tracing::{debug, info};

use crate::error::Result;
use crate::types::{
    PluginSetting, ZoneFlag, ZoneRecord, ZoneType, SETTING_INCLUDE_NAT_DET,
    SETTING_REINIT_NAT_DET, SETTING_REQUIRE_NAT_DET,
};
use crate::ConfigStore;

pub struct SqliteConfigStore {
    conn: Connection,
}

impl SqliteConfigStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())?;
        let store = Self { conn };
        store.initialize_schema()?;

        info!("Opened configuration store: {:?}", db_path.as_ref());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<()> {
        self.conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS Zones (
                Id INTEGER PRIMARY KEY,
                MonitorId INTEGER NOT NULL,
                Name TEXT NOT NULL,
                Type TEXT NOT NULL DEFAULT 'Active'
            );

            CREATE TABLE IF NOT EXISTS PluginsConfig (
                Id INTEGER PRIMARY KEY AUTOINCREMENT,
                MonitorId INTEGER NOT NULL,
                ZoneId INTEGER NOT NULL,
                pluginName TEXT NOT NULL,
                Name TEXT NOT NULL,
                Value TEXT NOT NULL,
                UNIQUE (MonitorId, ZoneId, pluginName, Name)
            );

            CREATE INDEX IF NOT EXISTS idx_zones_monitor ON Zones(MonitorId);
            CREATE INDEX IF NOT EXISTS idx_plugins_monitor ON PluginsConfig(MonitorId, pluginName);
        "#)?;

        Ok(())
    }

    /// Insert or replace a zone row.
    pub fn insert_zone(&self, monitor_id: u32, zone: &ZoneRecord) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO Zones (Id, MonitorId, Name, Type) VALUES (?1, ?2, ?3, ?4)",
            (zone.id, monitor_id, &zone.name, zone.zone_type.as_str()),
        )?;
        Ok(())
    }

    /// Insert or replace one plugin setting for a zone.
    pub fn set_plugin_setting(
        &self,
        monitor_id: u32,
        zone_id: u32,
        plugin: &str,
        name: &str,
        value: &str,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO PluginsConfig (MonitorId, ZoneId, pluginName, Name, Value)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            (monitor_id, zone_id, plugin, name, value),
        )?;
        debug!("Set {}.{} = {} on zone {} of monitor {}", plugin, name, value, zone_id, monitor_id);
        Ok(())
    }

    /// Plugin names with at least one row on the monitor.
    pub fn plugin_names(&self, monitor_id: u32) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT pluginName FROM PluginsConfig WHERE MonitorId = ?1 ORDER BY pluginName"
        )?;
        let rows = stmt.query_map([monitor_id], |row| row.get::<_, String>(0))?;

        let mut names = Vec::new();
        for name in rows {
            names.push(name?);
        }
        Ok(names)
    }

    fn row_to_setting(row: &Row) -> rusqlite::Result<PluginSetting> {
        Ok(PluginSetting {
            zone_id: row.get(0)?,
            name: row.get(1)?,
            value: row.get(2)?,
        })
    }
}

fn placeholders(count: usize, first: usize) -> String {
    (first..first + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(",")
}

impl ConfigStore for SqliteConfigStore {
    fn monitor_zones(&self, monitor_id: u32) -> Result<Vec<ZoneRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT Id, Name, Type FROM Zones WHERE MonitorId = ?1
             ORDER BY CASE Type
                 WHEN 'Active' THEN 1
                 WHEN 'Inclusive' THEN 2
                 WHEN 'Exclusive' THEN 3
                 WHEN 'Preclusive' THEN 4
                 WHEN 'Inactive' THEN 5
                 ELSE 6
             END, Id"
        )?;

        let rows = stmt.query_map([monitor_id], |row| {
            Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?;

        let mut zones = Vec::new();
        for row in rows {
            let (id, name, zone_type) = row?;
            zones.push(ZoneRecord {
                id,
                name,
                zone_type: zone_type.parse::<ZoneType>()?,
            });
        }

        Ok(zones)
    }

    fn plugin_settings(&self, monitor_id: u32, plugin: &str) -> Result<Vec<PluginSetting>> {
        let mut stmt = self.conn.prepare(
            "SELECT ZoneId, Name, Value FROM PluginsConfig
             WHERE MonitorId = ?1 AND pluginName = ?2
             ORDER BY ZoneId ASC, Id ASC"
        )?;

        let rows = stmt.query_map((monitor_id, plugin), Self::row_to_setting)?;

        let mut settings = Vec::new();
        for row in rows {
            settings.push(row?);
        }
        Ok(settings)
    }

    fn enabled_zone_ids(&self, monitor_id: u32, plugin: &str) -> Result<Vec<u32>> {
        let mut stmt = self.conn.prepare(
            "SELECT ZoneId FROM PluginsConfig
             WHERE MonitorId = ?1 AND pluginName = ?2 AND Name = 'Enabled'
               AND lower(trim(Value)) = 'yes'
             ORDER BY ZoneId ASC"
        )?;

        let rows = stmt.query_map((monitor_id, plugin), |row| row.get::<_, u32>(0))?;

        let mut ids = Vec::new();
        for id in rows {
            ids.push(id?);
        }
        Ok(ids)
    }

    fn native_detection_flags(&self, monitor_id: u32, plugins: &[String]) -> Result<Vec<ZoneFlag>> {
        if plugins.is_empty() {
            return Ok(Vec::new());
        }

        // ?1 monitor, ?2..?4 flag names, then one slot per plugin
        let query = format!(
            "SELECT DISTINCT ZoneId, Name FROM PluginsConfig
             WHERE MonitorId = ?1 AND Name IN (?2, ?3, ?4)
               AND lower(trim(Value)) = 'yes'
               AND pluginName IN ({})
             ORDER BY ZoneId ASC, Name ASC",
            placeholders(plugins.len(), 5)
        );

        let mut params: Vec<&dyn ToSql> = vec![
            &monitor_id,
            &SETTING_REQUIRE_NAT_DET,
            &SETTING_INCLUDE_NAT_DET,
            &SETTING_REINIT_NAT_DET,
        ];
        params.extend(plugins.iter().map(|p| p as &dyn ToSql));

        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map(&params[..], |row| {
            Ok(ZoneFlag {
                zone_id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;

        let mut flags = Vec::new();
        for flag in rows {
            flags.push(flag?);
        }
        Ok(flags)
    }

    fn delete_plugins_except(&self, monitor_id: u32, keep: &[String]) -> Result<usize> {
        if keep.is_empty() {
            let deleted = self.conn.execute(
                "DELETE FROM PluginsConfig WHERE MonitorId = ?1",
                [monitor_id],
            )?;
            return Ok(deleted);
        }

        let query = format!(
            "DELETE FROM PluginsConfig WHERE MonitorId = ?1 AND pluginName NOT IN ({})",
            placeholders(keep.len(), 2)
        );

        let mut params: Vec<&dyn ToSql> = vec![&monitor_id];
        params.extend(keep.iter().map(|p| p as &dyn ToSql));

        let deleted = self.conn.execute(&query, &params[..])?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SETTING_ENABLED;

    fn zone(id: u32, name: &str, zone_type: ZoneType) -> ZoneRecord {
        ZoneRecord { id, name: name.to_string(), zone_type }
    }

    fn seeded() -> SqliteConfigStore {
        let store = SqliteConfigStore::open_in_memory().unwrap();
        store.insert_zone(1, &zone(7, "Door", ZoneType::Exclusive)).unwrap();
        store.insert_zone(1, &zone(3, "Street", ZoneType::Preclusive)).unwrap();
        store.insert_zone(1, &zone(9, "Yard", ZoneType::Active)).unwrap();
        store.insert_zone(1, &zone(2, "Porch", ZoneType::Active)).unwrap();
        store.insert_zone(1, &zone(5, "Gate", ZoneType::Inclusive)).unwrap();
        store.insert_zone(2, &zone(4, "Other", ZoneType::Active)).unwrap();
        store
    }

    #[test]
    fn zones_are_ordered_by_type_then_id() {
        let store = seeded();
        let ids: Vec<u32> = store.monitor_zones(1).unwrap().iter().map(|z| z.id).collect();
        assert_eq!(ids, vec![2, 9, 5, 7, 3]);
    }

    #[test]
    fn zone_listing_is_repeatable() {
        let store = seeded();
        assert_eq!(store.monitor_zones(1).unwrap(), store.monitor_zones(1).unwrap());
    }

    #[test]
    fn unknown_zone_type_is_an_error() {
        let store = seeded();
        store.conn.execute(
            "INSERT INTO Zones (Id, MonitorId, Name, Type) VALUES (11, 1, 'Mask', 'Privacy')",
            [],
        ).unwrap();
        assert!(store.monitor_zones(1).is_err());
    }

    #[test]
    fn enabled_zone_ids_accept_any_yes_casing() {
        let store = seeded();
        store.set_plugin_setting(1, 9, "face", SETTING_ENABLED, "Yes").unwrap();
        store.set_plugin_setting(1, 2, "face", SETTING_ENABLED, "yes").unwrap();
        store.set_plugin_setting(1, 5, "face", SETTING_ENABLED, "No").unwrap();
        store.set_plugin_setting(2, 4, "face", SETTING_ENABLED, "yes").unwrap();

        assert_eq!(store.enabled_zone_ids(1, "face").unwrap(), vec![2, 9]);
    }

    #[test]
    fn native_flags_are_distinct_across_plugins() {
        let store = seeded();
        store.set_plugin_setting(1, 9, "face", SETTING_REQUIRE_NAT_DET, "Yes").unwrap();
        store.set_plugin_setting(1, 9, "plate", SETTING_REQUIRE_NAT_DET, "yes").unwrap();
        store.set_plugin_setting(1, 2, "plate", SETTING_INCLUDE_NAT_DET, "yes").unwrap();
        store.set_plugin_setting(1, 5, "gone", SETTING_REINIT_NAT_DET, "yes").unwrap();
        store.set_plugin_setting(1, 7, "face", SETTING_ENABLED, "yes").unwrap();

        let flags = store
            .native_detection_flags(1, &["face".to_string(), "plate".to_string()])
            .unwrap();
        assert_eq!(
            flags,
            vec![
                ZoneFlag { zone_id: 2, name: SETTING_INCLUDE_NAT_DET.to_string() },
                ZoneFlag { zone_id: 9, name: SETTING_REQUIRE_NAT_DET.to_string() },
            ]
        );
        assert!(store.native_detection_flags(1, &[]).unwrap().is_empty());
    }

    #[test]
    fn delete_keeps_listed_plugins_and_other_monitors() {
        let store = seeded();
        store.set_plugin_setting(1, 9, "PluginA", SETTING_ENABLED, "yes").unwrap();
        store.set_plugin_setting(1, 9, "PluginB", SETTING_ENABLED, "yes").unwrap();
        store.set_plugin_setting(1, 2, "PluginB", SETTING_REQUIRE_NAT_DET, "no").unwrap();
        store.set_plugin_setting(2, 4, "PluginB", SETTING_ENABLED, "yes").unwrap();

        let deleted = store.delete_plugins_except(1, &["PluginA".to_string()]).unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.plugin_names(1).unwrap(), vec!["PluginA".to_string()]);
        assert_eq!(store.plugin_names(2).unwrap(), vec!["PluginB".to_string()]);
    }

    #[test]
    fn delete_with_empty_keep_list_clears_monitor() {
        let store = seeded();
        store.set_plugin_setting(1, 9, "PluginA", SETTING_ENABLED, "yes").unwrap();
        store.set_plugin_setting(2, 4, "PluginA", SETTING_ENABLED, "yes").unwrap();

        assert_eq!(store.delete_plugins_except(1, &[]).unwrap(), 1);
        assert!(store.plugin_names(1).unwrap().is_empty());
        assert_eq!(store.plugin_names(2).unwrap().len(), 1);
    }
}
