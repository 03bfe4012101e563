use std::ffi::CStr;
use std::path::{Path, PathBuf};

use zone_analyser::{
    declare_zone_plugin, Analyser, Detector, DetectorError, DetectorPlugin, DetectorRegistrar, Frame,
    PluginError, PluginLoader, PluginManager, PluginModule, Zone, ENGINE_VERSION,
};

#[derive(Clone)]
struct MotionPlugin;

impl DetectorPlugin for MotionPlugin {
    fn check_zone(&mut self, _zone: &dyn Zone, _index: usize, _frame: &Frame) -> Result<bool, DetectorError> {
        Ok(true)
    }

    fn clone_box(&self) -> Box<dyn DetectorPlugin> {
        Box::new(self.clone())
    }
}

fn register(registrar: &mut dyn DetectorRegistrar, path: &Path) {
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    registrar.add_detector(Detector::new(name, "Motion", Box::new(MotionPlugin)).with_scale_factor(0.5));
}

declare_zone_plugin!(register);

/// Calls the exported entry points the way a loaded library would be called.
struct InProcessModule {
    path: PathBuf,
}

impl PluginModule for InProcessModule {
    fn path(&self) -> &Path {
        &self.path
    }

    fn engine_version(&self) -> Result<String, PluginError> {
        let version = unsafe { CStr::from_ptr(zone_plugin_engine_version()) };
        Ok(version.to_string_lossy().into_owned())
    }

    fn register(&self, registrar: &mut dyn DetectorRegistrar) -> Result<(), PluginError> {
        zone_plugin_register(registrar, &self.path);
        Ok(())
    }
}

#[test]
fn exported_version_is_the_engine_version() {
    let version = unsafe { CStr::from_ptr(zone_plugin_engine_version()) };
    assert_eq!(version.to_str().unwrap(), ENGINE_VERSION);
}

#[test]
fn exported_module_registers_through_the_manager() {
    let mut manager = PluginManager::new(Analyser::new(2, false));
    let loader = PluginLoader::from_module(InProcessModule { path: PathBuf::from("/usr/lib/zm/motion.so") });

    assert_eq!(manager.register_module(loader).unwrap(), 1);

    let detector = &manager.analyser().detectors()[0];
    assert_eq!(detector.plugin_name(), "motion");
    assert_eq!(detector.detection_cause(), "Motion");
    assert_eq!(detector.scaled_dimensions(&Frame::new(640, 480, Vec::new())), (320, 240));
    assert_eq!(manager.loaded_modules().collect::<Vec<_>>(), vec!["motion"]);
}
