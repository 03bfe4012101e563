use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub const SETTING_ENABLED: &str = "Enabled";
pub const SETTING_REQUIRE_NAT_DET: &str = "RequireNatDet";
pub const SETTING_INCLUDE_NAT_DET: &str = "IncludeNatDet";
pub const SETTING_REINIT_NAT_DET: &str = "ReInitNatDet";

/// Role of a zone. The declaration order is the sort order used when a
/// monitor's zones are listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ZoneType {
    Active,
    Inclusive,
    Exclusive,
    Preclusive,
    Inactive,
}

impl ZoneType {
    pub const ALL: [ZoneType; 5] = [
        ZoneType::Active,
        ZoneType::Inclusive,
        ZoneType::Exclusive,
        ZoneType::Preclusive,
        ZoneType::Inactive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneType::Active => "Active",
            ZoneType::Inclusive => "Inclusive",
            ZoneType::Exclusive => "Exclusive",
            ZoneType::Preclusive => "Preclusive",
            ZoneType::Inactive => "Inactive",
        }
    }

    /// Only Active and Exclusive zones can start an alarm on their own.
    pub fn can_trigger(&self) -> bool {
        matches!(self, ZoneType::Active | ZoneType::Exclusive)
    }
}

impl fmt::Display for ZoneType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ZoneType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ZoneType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| StoreError::UnknownZoneType(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneRecord {
    pub id: u32,
    pub name: String,
    pub zone_type: ZoneType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSetting {
    pub zone_id: u32,
    pub name: String,
    pub value: String,
}

impl PluginSetting {
    pub fn is_yes(&self) -> bool {
        is_yes(&self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneFlag {
    pub zone_id: u32,
    pub name: String,
}

/// Boolean settings are stored as text; any casing of "yes" is true.
pub fn is_yes(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("yes")
}
