use tracing::{debug, error, info, warn};

// syslog priorities
pub const LOG_ERR: u8 = 3;
pub const LOG_WARNING: u8 = 4;
pub const LOG_NOTICE: u8 = 5;
pub const LOG_INFO: u8 = 6;
pub const LOG_DEBUG: u8 = 7;

/// Process-wide log sink. Receives an already formatted line.
pub trait LogSink: Send + Sync {
    fn log(&self, level: u8, level_name: &str, message: &str);
}

/// Forwards detector log lines to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: u8, _level_name: &str, message: &str) {
        match level {
            0..=LOG_ERR => error!(target: "zone_analyser::plugin", "{}", message),
            LOG_WARNING => warn!(target: "zone_analyser::plugin", "{}", message),
            LOG_NOTICE | LOG_INFO => info!(target: "zone_analyser::plugin", "{}", message),
            _ => debug!(target: "zone_analyser::plugin", "{}", message),
        }
    }
}
