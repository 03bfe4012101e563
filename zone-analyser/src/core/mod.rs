/*!
Core modules of the zone analyser
*/

pub mod analyser;
pub mod config;
pub mod detector;
pub mod error;
pub mod event;
pub mod frame;
pub mod log_sink;
pub mod plugin_config;
pub mod plugin_loader;
pub mod session;
pub mod zone;
