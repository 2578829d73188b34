use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use libloading::{Library, Symbol};
use vst3::Steinberg::IPluginFactory2;

use super::bundle;
use super::c_api::*;

type GetPluginFactory = unsafe extern "system" fn() -> *mut c_void;

#[cfg(target_os = "windows")]
type ModuleInit = unsafe extern "system" fn() -> bool;
#[cfg(target_os = "linux")]
type ModuleInit = unsafe extern "system" fn(handle: *mut c_void) -> bool;
type ModuleExit = unsafe extern "system" fn() -> bool;

/// One class exported by a plugin factory.
#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub cid: TUID,
    pub name: String,
    pub category: String,
    pub sub_categories: String,
    pub vendor: String,
    pub version: String,
}

impl ClassInfo {
    pub fn is_audio_module(&self) -> bool {
        self.category == AUDIO_MODULE_CLASS
    }

    /// VST3 sub-categories are `|`-separated, e.g. `Fx|Delay` or `Instrument|Synth`.
    pub fn is_instrument(&self) -> bool {
        self.sub_categories
            .split('|')
            .any(|c| c.eq_ignore_ascii_case("Instrument"))
    }
}

/// A loaded VST3 binary and its plugin factory.
pub struct Vst3Module {
    path: PathBuf,
    factory: *mut c_void,
    exit: Option<ModuleExit>,
    // Dropped last, after the factory is released and the exit hook has run.
    _library: Library,
}

unsafe impl Send for Vst3Module {}
unsafe impl Sync for Vst3Module {}

impl Vst3Module {
    pub fn load(bundle_path: &Path) -> Result<Arc<Self>> {
        let binary = bundle::resolve_module_path(bundle_path)
            .ok_or_else(|| anyhow!("No loadable binary in {}", bundle_path.display()))?;
        log::debug!("Loading VST3 module {}", binary.display());

        unsafe {
            let (library, handle) = open_library(&binary)?;
            let exit = enter_module(&library, handle)?;

            let factory = {
                let get_factory: Symbol<GetPluginFactory> = library
                    .get(b"GetPluginFactory")
                    .context("GetPluginFactory symbol not found")?;
                get_factory()
            };
            if factory.is_null() {
                if let Some(exit) = exit {
                    exit();
                }
                return Err(anyhow!("GetPluginFactory returned null"));
            }

            Ok(Arc::new(Self {
                path: bundle_path.to_path_buf(),
                factory,
                exit,
                _library: library,
            }))
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn factory(&self) -> *mut c_void {
        self.factory
    }

    fn factory_vtbl(&self) -> &'static IPluginFactoryVtbl {
        unsafe { get_vtbl::<IPluginFactoryVtbl>(self.factory) }
    }

    pub fn factory_vendor(&self) -> String {
        unsafe {
            let mut info: PFactoryInfo = std::mem::zeroed();
            if (self.factory_vtbl().get_factory_info)(self.factory, &mut info) == K_RESULT_OK {
                read_cstr(&info.vendor)
            } else {
                String::new()
            }
        }
    }

    /// Every class the factory exports. Uses `IPluginFactory2` when available
    /// for sub-categories and version; older factories fall back to the
    /// factory-wide vendor.
    pub fn classes(&self) -> Vec<ClassInfo> {
        let vtbl = self.factory_vtbl();
        let count = unsafe { (vtbl.count_classes)(self.factory) }.max(0);
        let factory2 = unsafe { query::<IPluginFactory2>(self.factory) };
        let vendor = self.factory_vendor();

        let mut out = Vec::with_capacity(count as usize);
        for index in 0..count {
            let info = unsafe {
                match factory2 {
                    Some(f2) => class_info2(f2, index),
                    None => None,
                }
                .or_else(|| class_info(self.factory, index, &vendor))
            };
            if let Some(info) = info {
                out.push(info);
            }
        }
        if let Some(f2) = factory2 {
            unsafe { release(f2) };
        }
        out
    }

    /// Creates an instance of class `cid` answering interface `iid`.
    ///
    /// # Safety
    /// The returned pointer is an owned reference; release it when done.
    pub unsafe fn create_instance(&self, cid: &TUID, iid: &TUID) -> Option<*mut c_void> {
        let mut obj: *mut c_void = std::ptr::null_mut();
        let res = (self.factory_vtbl().create_instance)(self.factory, cid, iid, &mut obj);
        (res == K_RESULT_OK && !obj.is_null()).then_some(obj)
    }
}

impl Drop for Vst3Module {
    fn drop(&mut self) {
        unsafe {
            release(self.factory);
            if let Some(exit) = self.exit {
                exit();
            }
        }
        log::debug!("Unloaded VST3 module {}", self.path.display());
    }
}

unsafe fn class_info2(factory2: *mut c_void, index: i32) -> Option<ClassInfo> {
    let vtbl = get_vtbl::<IPluginFactory2Vtbl>(factory2);
    let mut info: PClassInfo2 = std::mem::zeroed();
    if (vtbl.get_class_info2)(factory2, index, &mut info) != K_RESULT_OK {
        return None;
    }
    Some(ClassInfo {
        cid: info.cid,
        name: read_cstr(&info.name),
        category: read_cstr(&info.category),
        sub_categories: read_cstr(&info.sub_categories),
        vendor: read_cstr(&info.vendor),
        version: read_cstr(&info.version),
    })
}

unsafe fn class_info(factory: *mut c_void, index: i32, vendor: &str) -> Option<ClassInfo> {
    let vtbl = get_vtbl::<IPluginFactoryVtbl>(factory);
    let mut info: PClassInfo = std::mem::zeroed();
    if (vtbl.get_class_info)(factory, index, &mut info) != K_RESULT_OK {
        return None;
    }
    Some(ClassInfo {
        cid: info.cid,
        name: read_cstr(&info.name),
        category: read_cstr(&info.category),
        sub_categories: String::new(),
        vendor: vendor.to_string(),
        version: String::new(),
    })
}

/// The library plus its raw `dlopen` handle, which `ModuleEntry` expects.
#[cfg(target_os = "linux")]
unsafe fn open_library(binary: &Path) -> Result<(Library, *mut c_void)> {
    use libloading::os::unix;
    let library = unix::Library::new(binary)
        .with_context(|| format!("Failed to load {}", binary.display()))?;
    let handle = library.into_raw();
    Ok((Library::from(unix::Library::from_raw(handle)), handle))
}

#[cfg(not(target_os = "linux"))]
unsafe fn open_library(binary: &Path) -> Result<(Library, *mut c_void)> {
    let library =
        Library::new(binary).with_context(|| format!("Failed to load {}", binary.display()))?;
    Ok((library, std::ptr::null_mut()))
}

/// Runs the platform entry point and returns the matching exit hook.
#[cfg(target_os = "windows")]
unsafe fn enter_module(library: &Library, _handle: *mut c_void) -> Result<Option<ModuleExit>> {
    if let Ok(init) = library.get::<ModuleInit>(b"InitDll") {
        if !init() {
            return Err(anyhow!("InitDll failed"));
        }
    }
    Ok(library.get::<ModuleExit>(b"ExitDll").ok().map(|f| *f))
}

#[cfg(target_os = "linux")]
unsafe fn enter_module(library: &Library, handle: *mut c_void) -> Result<Option<ModuleExit>> {
    if let Ok(entry) = library.get::<ModuleInit>(b"ModuleEntry") {
        if !entry(handle) {
            return Err(anyhow!("ModuleEntry failed"));
        }
    }
    Ok(library.get::<ModuleExit>(b"ModuleExit").ok().map(|f| *f))
}

// TODO: call bundleEntry/bundleExit once a CFBundleRef can be created for the
// bundle; most plugins tolerate their absence.
#[cfg(not(any(target_os = "windows", target_os = "linux")))]
unsafe fn enter_module(_library: &Library, _handle: *mut c_void) -> Result<Option<ModuleExit>> {
    Ok(None)
}
