//! Prints one JSON line per VST3 bundle describing the plugin classes it
//! exposes.
//!
//! Usage: `plugin_scanner [DIR_OR_BUNDLE...]`. Directories are listed the
//! same way the editor's browser lists them; with no arguments the
//! configured plugin directory is scanned.

use serde::Serialize;
use std::path::{Path, PathBuf};

use vst3_loader::browser::{PluginBrowser, PLUGIN_EXTENSION};
use vst3_loader::config::LoaderConfig;
use vst3_loader::vst3::format::describe;
use vst3_loader::vst3::Vst3Module;

#[derive(Serialize)]
struct ClassEntry {
    name: String,
    vendor: String,
    version: String,
    category: String,
    is_instrument: bool,
}

#[derive(Serialize)]
struct ScanResult {
    path: String,
    descriptions: Vec<ClassEntry>,
    success: bool,
    error: Option<String>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    #[cfg(windows)]
    unsafe {
        use windows::Win32::System::Diagnostics::Debug::{
            SetErrorMode, SEM_FAILCRITICALERRORS, SEM_NOGPFAULTERRORBOX, SEM_NOOPENFILEERRORBOX,
        };
        SetErrorMode(SEM_FAILCRITICALERRORS | SEM_NOGPFAULTERRORBOX | SEM_NOOPENFILEERRORBOX);
    }

    let mut targets: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if targets.is_empty() {
        targets.push(LoaderConfig::load().plugin_directory);
    }

    let mut failures = 0;
    for bundle in targets.iter().flat_map(|target| expand(target)) {
        let result = scan(&bundle);
        if !result.success {
            failures += 1;
        }
        let json = serde_json::to_string(&result).unwrap_or_else(|_| "{}".to_string());
        println!("{}", json);
    }

    if failures > 0 {
        log::warn!("{} bundle(s) could not be scanned", failures);
        std::process::exit(1);
    }
}

/// A bundle stays as it is; any other directory is listed one level deep.
fn expand(target: &Path) -> Vec<PathBuf> {
    let is_bundle = target
        .extension()
        .is_some_and(|ext| ext == PLUGIN_EXTENSION);
    if target.is_dir() && !is_bundle {
        PluginBrowser::new(target).all_plugins().to_vec()
    } else {
        vec![target.to_path_buf()]
    }
}

fn scan(path: &Path) -> ScanResult {
    let path_str = path.to_string_lossy().into_owned();
    if !path.exists() {
        return ScanResult {
            path: path_str,
            descriptions: Vec::new(),
            success: false,
            error: Some("File not found".to_string()),
        };
    }

    match Vst3Module::load(path) {
        Ok(module) => {
            let descriptions = module
                .classes()
                .iter()
                .filter(|class| class.is_audio_module())
                .map(|class| {
                    let desc = describe(path, class);
                    ClassEntry {
                        name: desc.name,
                        vendor: desc.manufacturer,
                        version: desc.version,
                        category: desc.category,
                        is_instrument: desc.is_instrument,
                    }
                })
                .collect();
            ScanResult {
                path: path_str,
                descriptions,
                success: true,
                error: None,
            }
        }
        Err(e) => {
            log::error!("Failed to scan {}: {:#}", path.display(), e);
            ScanResult {
                path: path_str,
                descriptions: Vec::new(),
                success: false,
                error: Some(format!("{e:#}")),
            }
        }
    }
}
