/*!
Native plugin modules.

A plugin is a shared library exporting two entry points:

- `zone_plugin_engine_version` returns the engine version the plugin was
  built against, as a NUL-terminated string
- `zone_plugin_register` receives the registrar and the module's own path,
  and registers one or more detectors

Use [`declare_zone_plugin!`](crate::declare_zone_plugin) to export both. The
registration entry point uses the Rust ABI, so plugins must be built with the
same toolchain as the engine.
*/

use std::collections::BTreeMap;
use std::ffi::{c_char, CStr};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;
use tracing::{debug, info, warn};

use crate::core::{analyser::Analyser, detector::Detector, error::PluginError};

pub const ENGINE_VERSION: &str = "1.0.0";
pub const ENGINE_VERSION_CSTR: &CStr = c"1.0.0";

pub const SYMBOL_ENGINE_VERSION: &[u8] = b"zone_plugin_engine_version\0";
pub const SYMBOL_REGISTER: &[u8] = b"zone_plugin_register\0";

pub type EngineVersionFn = unsafe extern "C" fn() -> *const c_char;
pub type RegisterFn = unsafe fn(&mut dyn DetectorRegistrar, &Path);

/// Receives the detectors a plugin builds while it registers.
pub trait DetectorRegistrar {
    fn add_detector(&mut self, detector: Detector);
}

/// The two entry points of a loaded module.
pub trait PluginModule: Send + Sync {
    fn path(&self) -> &Path;

    fn engine_version(&self) -> Result<String, PluginError>;

    fn register(&self, registrar: &mut dyn DetectorRegistrar) -> Result<(), PluginError>;
}

/// A shared library opened with `libloading`, closed when dropped.
pub struct NativeModule {
    path: PathBuf,
    version_fn: EngineVersionFn,
    register_fn: RegisterFn,
    // closed last, after the resolved pointers are gone
    _library: Library,
}

impl NativeModule {
    pub fn open(path: &Path) -> Result<Self, PluginError> {
        // SAFETY: loading a plugin runs its initializers; plugins are trusted code
        let library = unsafe { Library::new(path) }.map_err(|e| PluginError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        // SAFETY: the symbol types match what `declare_zone_plugin!` exports
        let resolved = unsafe { resolve_entry_points(&library) };
        match resolved {
            Ok((version_fn, register_fn)) => Ok(Self {
                path: path.to_path_buf(),
                version_fn,
                register_fn,
                _library: library,
            }),
            Err(e) => {
                drop(library);
                Err(PluginError::NotAPlugin {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

unsafe fn resolve_entry_points(library: &Library) -> Result<(EngineVersionFn, RegisterFn), libloading::Error> {
    let version = unsafe { library.get::<EngineVersionFn>(SYMBOL_ENGINE_VERSION)? };
    let register = unsafe { library.get::<RegisterFn>(SYMBOL_REGISTER)? };
    Ok((*version, *register))
}

impl PluginModule for NativeModule {
    fn path(&self) -> &Path {
        &self.path
    }

    fn engine_version(&self) -> Result<String, PluginError> {
        // SAFETY: resolved from the library this module keeps open
        let ptr = unsafe { (self.version_fn)() };
        if ptr.is_null() {
            return Err(PluginError::NotAPlugin {
                path: self.path.clone(),
                reason: "engine version entry point returned null".to_string(),
            });
        }
        // SAFETY: the plugin returns a pointer to a static NUL-terminated string
        let version = unsafe { CStr::from_ptr(ptr) };
        Ok(version.to_string_lossy().into_owned())
    }

    fn register(&self, registrar: &mut dyn DetectorRegistrar) -> Result<(), PluginError> {
        // SAFETY: the engine version matched, so the plugin was built against this registrar
        unsafe { (self.register_fn)(registrar, &self.path) };
        Ok(())
    }
}

impl Drop for NativeModule {
    fn drop(&mut self) {
        debug!("Unloading plugin {:?}", self.path);
    }
}

/// Shared handle to a loaded module. Cloning is cheap; the module is
/// unloaded when the last clone, including those held by detectors, drops.
#[derive(Clone)]
pub struct PluginLoader {
    module: Arc<dyn PluginModule>,
}

impl PluginLoader {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PluginError> {
        let module = NativeModule::open(path.as_ref())?;
        Ok(Self::from_module(module))
    }

    pub fn from_module(module: impl PluginModule + 'static) -> Self {
        Self { module: Arc::new(module) }
    }

    pub fn path(&self) -> &Path {
        self.module.path()
    }

    /// File stem of the module path.
    pub fn name(&self) -> String {
        self.path()
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path().display().to_string())
    }

    /// Check the module's engine version and let it register its detectors.
    /// Every registered detector keeps a clone of this loader. Detectors reach
    /// `registrar` only if the module's registration completes without error
    /// or panic. Returns the number of detectors registered.
    pub fn register(&self, registrar: &mut dyn DetectorRegistrar) -> Result<usize, PluginError> {
        let actual = self.module.engine_version()?;
        if actual != ENGINE_VERSION {
            return Err(PluginError::VersionMismatch {
                path: self.path().to_path_buf(),
                expected: ENGINE_VERSION.to_string(),
                actual,
            });
        }

        let mut retaining = RetainingRegistrar { loader: self, pending: Vec::new() };
        catch_unwind(AssertUnwindSafe(|| self.module.register(&mut retaining))).map_err(|_| {
            PluginError::RegisterFailed {
                path: self.path().to_path_buf(),
                reason: "plugin panicked during registration".to_string(),
            }
        })??;

        let count = retaining.pending.len();
        for detector in retaining.pending {
            registrar.add_detector(detector);
        }
        Ok(count)
    }

    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.module)
    }
}

impl fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginLoader")
            .field("path", &self.path())
            .field("references", &self.reference_count())
            .finish()
    }
}

/// Holds the detectors of a module until its registration has succeeded, so
/// a failing module leaves nothing behind.
struct RetainingRegistrar<'a> {
    loader: &'a PluginLoader,
    pending: Vec<Detector>,
}

impl DetectorRegistrar for RetainingRegistrar<'_> {
    fn add_detector(&mut self, mut detector: Detector) {
        detector.retain_module(self.loader.clone());
        self.pending.push(detector);
    }
}

/// Owns the analyser of one monitor and the modules loaded into it.
pub struct PluginManager {
    analyser: Analyser,
    loaders: BTreeMap<String, PluginLoader>,
}

impl PluginManager {
    pub fn new(analyser: Analyser) -> Self {
        Self { analyser, loaders: BTreeMap::new() }
    }

    pub fn analyser(&self) -> &Analyser {
        &self.analyser
    }

    pub fn analyser_mut(&mut self) -> &mut Analyser {
        &mut self.analyser
    }

    pub fn loaded_modules(&self) -> impl Iterator<Item = &str> {
        self.loaders.keys().map(String::as_str)
    }

    pub fn load_plugin(&mut self, path: &Path) -> Result<usize, PluginError> {
        let loader = PluginLoader::load(path)?;
        self.register_module(loader)
    }

    pub fn register_module(&mut self, loader: PluginLoader) -> Result<usize, PluginError> {
        let count = loader.register(self)?;
        info!("Loaded plugin {:?} ({} detector(s))", loader.path(), count);
        self.loaders.insert(loader.name(), loader);
        Ok(count)
    }

    /// Load every shared library in `dir`, in file name order. Modules that
    /// fail to load are logged and skipped. Returns how many loaded.
    pub fn load_plugins(&mut self, dir: &Path) -> Result<usize, PluginError> {
        let entries = std::fs::read_dir(dir).map_err(|e| PluginError::Load {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file()
                    && path.extension().and_then(|ext| ext.to_str()) == Some(std::env::consts::DLL_EXTENSION)
            })
            .collect();
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            match self.load_plugin(&path) {
                Ok(_) => loaded += 1,
                Err(e) => warn!("Skipping plugin: {}", e),
            }
        }
        debug!("Loaded {} plugin module(s) from {:?}", loaded, dir);
        Ok(loaded)
    }

    pub fn into_analyser(self) -> Analyser {
        self.analyser
    }
}

impl DetectorRegistrar for PluginManager {
    fn add_detector(&mut self, detector: Detector) {
        self.analyser.add_detector(detector);
    }
}

/// Export the plugin entry points from a `cdylib` crate.
///
/// ```rust,ignore
/// fn register(registrar: &mut dyn DetectorRegistrar, path: &Path) {
///     registrar.add_detector(Detector::new("face", "Face", Box::new(FacePlugin::default())));
/// }
///
/// zone_analyser::declare_zone_plugin!(register);
/// ```
#[macro_export]
macro_rules! declare_zone_plugin {
    ($register:path) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn zone_plugin_engine_version() -> *const ::std::ffi::c_char {
            $crate::core::plugin_loader::ENGINE_VERSION_CSTR.as_ptr()
        }

        #[unsafe(no_mangle)]
        pub fn zone_plugin_register(
            registrar: &mut dyn $crate::core::plugin_loader::DetectorRegistrar,
            path: &::std::path::Path,
        ) {
            $register(registrar, path)
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::detector::DetectorPlugin;
    use crate::core::error::DetectorError;
    use crate::core::frame::Frame;
    use crate::core::zone::Zone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    struct NullPlugin;

    impl DetectorPlugin for NullPlugin {
        fn check_zone(&mut self, _zone: &dyn Zone, _index: usize, _frame: &Frame) -> Result<bool, DetectorError> {
            Ok(false)
        }

        fn clone_box(&self) -> Box<dyn DetectorPlugin> {
            Box::new(self.clone())
        }
    }

    struct FakeModule {
        path: PathBuf,
        version: &'static str,
        detectors: Vec<(&'static str, &'static str)>,
        failure: Option<Failure>,
        unloads: Arc<AtomicUsize>,
    }

    /// How registration ends after the detectors were added.
    #[derive(Clone, Copy)]
    enum Failure {
        Error,
        Panic,
    }

    impl FakeModule {
        fn new(version: &'static str, unloads: &Arc<AtomicUsize>) -> Self {
            Self {
                path: PathBuf::from("/plugins/face.so"),
                version,
                detectors: vec![("face", "Face"), ("face_night", "Face")],
                failure: None,
                unloads: Arc::clone(unloads),
            }
        }

        fn failing(failure: Failure, unloads: &Arc<AtomicUsize>) -> Self {
            let mut module = Self::new(ENGINE_VERSION, unloads);
            module.detectors = vec![("half", "Half")];
            module.failure = Some(failure);
            module
        }
    }

    impl PluginModule for FakeModule {
        fn path(&self) -> &Path {
            &self.path
        }

        fn engine_version(&self) -> Result<String, PluginError> {
            Ok(self.version.to_string())
        }

        fn register(&self, registrar: &mut dyn DetectorRegistrar) -> Result<(), PluginError> {
            for (name, cause) in &self.detectors {
                registrar.add_detector(Detector::new(*name, *cause, Box::new(NullPlugin)));
            }
            match self.failure {
                None => Ok(()),
                Some(Failure::Error) => Err(PluginError::RegisterFailed {
                    path: self.path.clone(),
                    reason: "model file missing".to_string(),
                }),
                Some(Failure::Panic) => panic!("model file missing"),
            }
        }
    }

    impl Drop for FakeModule {
        fn drop(&mut self) {
            self.unloads.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn version_constants_agree() {
        assert_eq!(ENGINE_VERSION_CSTR.to_str().unwrap(), ENGINE_VERSION);
    }

    #[test]
    fn register_attaches_module_to_each_detector() {
        let unloads = Arc::new(AtomicUsize::new(0));
        let mut manager = PluginManager::new(Analyser::new(1, true));

        let count = manager
            .register_module(PluginLoader::from_module(FakeModule::new(ENGINE_VERSION, &unloads)))
            .unwrap();

        assert_eq!(count, 2);
        assert_eq!(manager.loaded_modules().collect::<Vec<_>>(), vec!["face"]);
        let detectors = manager.analyser().detectors();
        assert_eq!(detectors.len(), 2);
        assert!(detectors.iter().all(|d| d.module().is_some()));
        // manager + two detectors
        assert_eq!(detectors[0].module().unwrap().reference_count(), 3);
        assert_eq!(
            manager.analyser().plugin_general_config("face_night").map(|c| c.registered),
            Some(true)
        );
    }

    #[test]
    fn version_mismatch_is_compared_by_value() {
        let unloads = Arc::new(AtomicUsize::new(0));
        let prefix = &ENGINE_VERSION[..3];
        assert_eq!(prefix.as_ptr(), ENGINE_VERSION.as_ptr());

        let loader = PluginLoader::from_module(FakeModule::new(prefix, &unloads));
        let mut analyser = Analyser::new(1, true);

        match loader.register(&mut analyser) {
            Err(PluginError::VersionMismatch { expected, actual, .. }) => {
                assert_eq!(expected, ENGINE_VERSION);
                assert_eq!(actual, prefix);
            }
            other => panic!("expected version mismatch, got {:?}", other),
        }
        assert!(analyser.detectors().is_empty());

        drop(loader);
        assert_eq!(unloads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn module_unloads_once_with_the_last_copy() {
        let unloads = Arc::new(AtomicUsize::new(0));
        let loader = PluginLoader::from_module(FakeModule::new(ENGINE_VERSION, &unloads));
        let copy = loader.clone();
        assert_eq!(copy.reference_count(), 2);

        drop(loader);
        assert_eq!(unloads.load(Ordering::SeqCst), 0);
        assert_eq!(copy.name(), "face");

        drop(copy);
        assert_eq!(unloads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn detectors_keep_their_module_loaded() {
        let unloads = Arc::new(AtomicUsize::new(0));
        let loader = PluginLoader::from_module(FakeModule::new(ENGINE_VERSION, &unloads));
        let mut analyser = Analyser::new(1, true);
        loader.register(&mut analyser).unwrap();
        drop(loader);

        assert_eq!(unloads.load(Ordering::SeqCst), 0);
        let copy = analyser.detectors()[0].clone();
        drop(analyser);
        assert_eq!(unloads.load(Ordering::SeqCst), 0);

        drop(copy);
        assert_eq!(unloads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_registration_leaves_no_detectors_behind() {
        for failure in [Failure::Error, Failure::Panic] {
            let unloads = Arc::new(AtomicUsize::new(0));
            let mut manager = PluginManager::new(Analyser::new(1, true));

            let result = manager.register_module(PluginLoader::from_module(FakeModule::failing(failure, &unloads)));

            assert!(matches!(result, Err(PluginError::RegisterFailed { .. })));
            assert!(manager.analyser().detectors().is_empty());
            assert!(manager.analyser().plugin_general_config("half").is_none());
            assert_eq!(manager.loaded_modules().count(), 0);
            assert_eq!(unloads.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn missing_library_is_a_load_error() {
        let result = PluginLoader::load("/nonexistent/libnothing.so");
        assert!(matches!(result, Err(PluginError::Load { .. })));
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn library_without_entry_points_is_not_a_plugin() {
        let result = PluginLoader::load("libc.so.6");
        assert!(matches!(result, Err(PluginError::NotAPlugin { .. })));
    }

    #[test]
    fn directory_scan_skips_broken_modules() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join(format!("broken.{}", std::env::consts::DLL_EXTENSION));
        std::fs::write(&broken, b"not a shared library").unwrap();
        std::fs::write(dir.path().join("README.txt"), b"notes").unwrap();

        let mut manager = PluginManager::new(Analyser::new(1, true));
        assert_eq!(manager.load_plugins(dir.path()).unwrap(), 0);
        assert_eq!(manager.loaded_modules().count(), 0);

        let missing = manager.load_plugins(&dir.path().join("absent"));
        assert!(matches!(missing, Err(PluginError::Load { .. })));
    }
}
