//! Listing of the plugin bundles installed in one directory.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

pub const PLUGIN_EXTENSION: &str = "vst3";

/// Where VST3 plugins are installed system-wide on this platform.
pub fn default_plugin_directory() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        PathBuf::from("/Library/Audio/Plug-Ins/VST3")
    }
    #[cfg(target_os = "windows")]
    {
        PathBuf::from(r"C:\Program Files\Common Files\VST3")
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        PathBuf::from("/usr/lib/vst3")
    }
}

type SelectionCallback = Box<dyn FnMut(&Path) + Send>;

/// Searchable list of `.vst3` entries (files or bundles) found directly in
/// one directory.
pub struct PluginBrowser {
    directory: PathBuf,
    all_plugins: Vec<PathBuf>,
    filtered: Vec<PathBuf>,
    search_text: String,
    selected_row: Option<usize>,
    on_plugin_selected: Option<SelectionCallback>,
}

impl PluginBrowser {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        let mut browser = Self {
            directory: directory.into(),
            all_plugins: Vec::new(),
            filtered: Vec::new(),
            search_text: String::new(),
            selected_row: None,
            on_plugin_selected: None,
        };
        browser.scan_plugins();
        browser
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Re-reads the directory. Missing or unreadable directories give an
    /// empty list.
    pub fn scan_plugins(&mut self) {
        self.all_plugins = WalkDir::new(&self.directory)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    log::debug!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .map(|entry| entry.into_path())
            .filter(|path| path.extension().is_some_and(|ext| ext == PLUGIN_EXTENSION))
            .collect();
        self.all_plugins
            .sort_by_cached_key(|path| path.to_string_lossy().to_lowercase());
        log::info!(
            "Found {} plugins in {}",
            self.all_plugins.len(),
            self.directory.display()
        );
        self.update_filtered_list();
    }

    pub fn all_plugins(&self) -> &[PathBuf] {
        &self.all_plugins
    }

    pub fn search_text(&self) -> &str {
        &self.search_text
    }

    pub fn set_search_text(&mut self, text: &str) {
        if self.search_text != text {
            self.search_text = text.to_string();
            self.update_filtered_list();
        }
    }

    fn update_filtered_list(&mut self) {
        let needle = self.search_text.to_lowercase();
        self.filtered = self
            .all_plugins
            .iter()
            .filter(|path| needle.is_empty() || display_name(path).to_lowercase().contains(&needle))
            .cloned()
            .collect();
        if self.selected_row.is_some_and(|row| row >= self.filtered.len()) {
            self.selected_row = None;
        }
    }

    pub fn filtered_plugins(&self) -> &[PathBuf] {
        &self.filtered
    }

    pub fn num_rows(&self) -> usize {
        self.filtered.len()
    }

    pub fn select_row(&mut self, row: Option<usize>) {
        self.selected_row = row.filter(|&r| r < self.filtered.len());
    }

    pub fn selected_row(&self) -> Option<usize> {
        self.selected_row
    }

    pub fn selected_plugin(&self) -> Option<&Path> {
        self.selected_row
            .and_then(|row| self.filtered.get(row))
            .map(PathBuf::as_path)
    }

    pub fn is_plugin_selected(&self) -> bool {
        self.selected_plugin().is_some()
    }

    pub fn set_on_plugin_selected<F>(&mut self, callback: F)
    where
        F: FnMut(&Path) + Send + 'static,
    {
        self.on_plugin_selected = Some(Box::new(callback));
    }

    pub fn row_double_clicked(&mut self, row: usize) {
        let Some(path) = self.filtered.get(row) else {
            return;
        };
        if let Some(callback) = self.on_plugin_selected.as_mut() {
            callback(path);
        }
    }
}

/// The bundle's base name, as shown in the list.
pub fn display_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
