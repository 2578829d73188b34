//! The wrapper's editor.
//!
//! [`EditorModel`] holds everything the window shows and reacts to user
//! actions and processor events; [`view`] draws it with egui and wires it
//! into `nih_plug`.

pub mod embed;
pub mod view;

use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};

use crate::browser::PluginBrowser;
use crate::config::LoaderConfig;
use crate::host::dispatch::{Dispatcher, JobQueue};
use crate::host::{HostProcessor, HostedEditor, InstanceLease, ParentHandle, ProcessorEvent};
use embed::EditorContainer;

pub const DEFAULT_EDITOR_WIDTH: u32 = 650;
pub const MARGIN: u32 = 10;
pub const BROWSER_HEIGHT: u32 = 435;
pub const LABEL_HEIGHT: u32 = 30;
pub const BUTTON_HEIGHT: u32 = 30;
pub const BUTTON_TOP_SPACING: u32 = 5;

pub const NO_PLUGIN_TEXT: &str = "No plugin loaded";
pub const LOADING_TEXT: &str = "Loading...";
pub const NO_EDITOR_SUFFIX: &str = " (no editor)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTone {
    Normal,
    Error,
}

/// What the window currently shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewState {
    pub browser_visible: bool,
    /// Browser is dimmed and ignores input while a load runs.
    pub browser_covered: bool,
    pub load_button_visible: bool,
    pub load_button_enabled: bool,
    pub close_button_visible: bool,
    pub status_text: String,
    pub status_tone: StatusTone,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            browser_visible: true,
            browser_covered: false,
            load_button_visible: true,
            load_button_enabled: false,
            close_button_visible: false,
            status_text: NO_PLUGIN_TEXT.to_string(),
            status_tone: StatusTone::Normal,
        }
    }
}

pub struct EditorModel {
    processor: HostProcessor,
    browser: PluginBrowser,
    load_queue: Arc<dyn Dispatcher>,
    events: Receiver<ProcessorEvent>,
    hosted_editor: Option<HostedEditor>,
    /// Dropped after `hosted_editor`, never before.
    hosted_lease: Option<InstanceLease>,
    hosted_instance: Option<u64>,
    hosted_size: Option<(u32, u32)>,
    view: ViewState,
    focus_pending: bool,
    requested_size: Option<(u32, u32)>,
    double_clicked: Arc<Mutex<Option<PathBuf>>>,
    parent: Option<ParentHandle>,
    container: Option<EditorContainer>,
}

impl EditorModel {
    pub fn new(
        processor: HostProcessor,
        mut browser: PluginBrowser,
        load_queue: Arc<dyn Dispatcher>,
    ) -> Self {
        let double_clicked = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&double_clicked);
        browser.set_on_plugin_selected(move |path: &Path| {
            if let Ok(mut slot) = sink.lock() {
                *slot = Some(path.to_path_buf());
            }
        });

        let mut model = Self {
            events: processor.subscribe(),
            processor,
            browser,
            load_queue,
            hosted_editor: None,
            hosted_lease: None,
            hosted_instance: None,
            hosted_size: None,
            view: ViewState::default(),
            focus_pending: true,
            requested_size: None,
            double_clicked,
            parent: None,
            container: None,
        };
        model.set_hosted_editor_if_needed();
        model.processor_state_changed(false);
        model
    }

    /// Browser over the configured directory and a load queue that waits
    /// the configured delay before every load.
    pub fn with_config(processor: HostProcessor, config: &LoaderConfig) -> anyhow::Result<Self> {
        let queue = JobQueue::spawn_with_delay("vst3-loader-load", config.load_delay())?;
        let browser = PluginBrowser::new(config.plugin_directory.clone());
        Ok(Self::new(processor, browser, Arc::new(queue)))
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn browser(&self) -> &PluginBrowser {
        &self.browser
    }

    pub fn browser_mut(&mut self) -> &mut PluginBrowser {
        &mut self.browser
    }

    pub fn processor(&self) -> &HostProcessor {
        &self.processor
    }

    pub fn hosted_editor(&self) -> Option<&HostedEditor> {
        self.hosted_editor.as_ref()
    }

    pub fn has_hosted_editor(&self) -> bool {
        self.hosted_editor.is_some()
    }

    pub fn set_search_text(&mut self, text: &str) {
        self.browser.set_search_text(text);
        self.refresh_load_button();
    }

    pub fn select_row(&mut self, row: Option<usize>) {
        self.browser.select_row(row);
        self.refresh_load_button();
    }

    pub fn row_double_clicked(&mut self, row: usize) {
        self.browser.row_double_clicked(row);
        let picked = self.double_clicked.lock().ok().and_then(|mut slot| slot.take());
        if let Some(path) = picked {
            self.load_plugin(&path);
        }
    }

    fn refresh_load_button(&mut self) {
        if !self.view.browser_covered {
            self.view.load_button_enabled = self.browser.is_plugin_selected();
        }
    }

    /// Drops the current editor, shows the loading state and queues the load.
    pub fn load_plugin(&mut self, path: &Path) {
        self.drop_hosted_editor();
        self.set_loading_state();

        let processor = self.processor.clone();
        let path = path.to_string_lossy().into_owned();
        self.load_queue
            .call_async(Box::new(move || processor.load_plugin(&path)));
    }

    /// The Load button.
    pub fn load_selected_plugin(&mut self) {
        if let Some(path) = self.browser.selected_plugin().map(Path::to_path_buf) {
            self.load_plugin(&path);
        }
    }

    pub fn close_plugin(&mut self) {
        self.drop_hosted_editor();
        self.processor.close_hosted_plugin();
        self.processor_state_changed(false);
    }

    fn set_loading_state(&mut self) {
        self.view.load_button_enabled = false;
        self.view.browser_covered = true;
        self.view.status_tone = StatusTone::Normal;
        self.view.status_text = LOADING_TEXT.to_string();
    }

    /// Handles every processor event received since the last call. Returns
    /// whether anything arrived.
    pub fn poll_processor_events(&mut self) -> bool {
        let mut changed = false;
        while let Ok(event) = self.events.try_recv() {
            match event {
                ProcessorEvent::LoadFinished => {
                    self.set_hosted_editor_if_needed();
                    self.processor_state_changed(true);
                }
                ProcessorEvent::InstanceReleased => {
                    if self.processor.hosted_instance_id() != self.hosted_instance {
                        self.drop_hosted_editor();
                    }
                    self.processor_state_changed(false);
                }
            }
            changed = true;
        }
        changed
    }

    /// Builds an editor for a newly hosted instance. An instance keeps its
    /// editor until it is replaced or closed.
    pub fn set_hosted_editor_if_needed(&mut self) {
        let Some(instance_id) = self.processor.hosted_instance_id() else {
            return;
        };
        if self.hosted_instance == Some(instance_id) {
            return;
        }
        self.drop_hosted_editor();
        self.hosted_instance = Some(instance_id);
        if let Some((editor, lease)) = self.processor.create_hosted_editor_if_needed() {
            self.hosted_editor = Some(editor);
            self.hosted_lease = Some(lease);
        }
        self.hosted_size = self.hosted_editor.as_ref().map(HostedEditor::size);
        match &self.hosted_editor {
            Some(editor) => log::debug!("Hosted editor ready: {:?}", editor),
            None => log::info!("Hosted plugin has no editor"),
        }
        self.attach_hosted_view();
    }

    /// Re-derives the visible state from the processor. Load errors are only
    /// shown when `show_error` is set, i.e. after a load attempt finished.
    pub fn processor_state_changed(&mut self, show_error: bool) {
        let hosted = self.processor.is_hosted_plugin_loaded();
        if !hosted && self.hosted_editor.is_some() {
            self.drop_hosted_editor();
        }
        let error = self.processor.hosted_plugin_loading_error();

        self.view.browser_visible = !hosted;
        self.view.browser_covered = false;
        self.view.load_button_visible = !hosted;
        self.view.load_button_enabled = self.browser.is_plugin_selected();
        self.view.close_button_visible = hosted;

        if hosted {
            let mut text = self.processor.hosted_plugin_name();
            if self.hosted_editor.is_none() {
                text.push_str(NO_EDITOR_SUFFIX);
            }
            self.view.status_text = text;
            self.view.status_tone = StatusTone::Normal;
        } else if show_error && !error.is_empty() {
            self.view.status_text = error;
            self.view.status_tone = StatusTone::Error;
        } else {
            self.view.status_text = NO_PLUGIN_TEXT.to_string();
            self.view.status_tone = StatusTone::Normal;
        }

        // A load started by a state restore shows the same way as one from
        // the Load button.
        if self.processor.is_currently_loading() {
            self.set_loading_state();
        }
    }

    /// Detaches and drops the editor, then its window, then the lease on
    /// the instance it was built from.
    fn drop_hosted_editor(&mut self) {
        if let Some(HostedEditor::Native(view)) = self.hosted_editor.as_mut() {
            if view.is_attached() {
                view.detach();
            }
        }
        self.hosted_editor = None;
        self.container = None;
        self.hosted_lease = None;
        self.hosted_instance = None;
        self.hosted_size = None;
    }

    /// Size of the area above the buttons.
    pub fn content_size(&self) -> (u32, u32) {
        self.hosted_size
            .unwrap_or((DEFAULT_EDITOR_WIDTH, BROWSER_HEIGHT))
    }

    pub fn editor_size(&self) -> (u32, u32) {
        let (width, height) = self.content_size();
        (
            width,
            height + BUTTON_TOP_SPACING + BUTTON_HEIGHT + LABEL_HEIGHT,
        )
    }

    /// Follows size changes of a native hosted view. Returns `true` when the
    /// window needs to be resized.
    pub fn sync_hosted_view_size(&mut self) -> bool {
        let Some(HostedEditor::Native(view)) = self.hosted_editor.as_mut() else {
            return false;
        };
        let size = view.take_resize_request().unwrap_or_else(|| view.size());
        if size.0 == 0 || size.1 == 0 || self.hosted_size == Some(size) {
            return false;
        }
        log::debug!("Hosted editor resized to {}x{}", size.0, size.1);
        self.hosted_size = Some(size);
        if let Some(container) = &self.container {
            container.resize(size.0, size.1);
        }
        true
    }

    /// The window size to ask the host for. `None` when the window already
    /// has `current` size or the same size was asked for before and is still
    /// pending.
    pub fn take_size_request(&mut self, current: (u32, u32)) -> Option<(u32, u32)> {
        let wanted = self.editor_size();
        if wanted == current {
            self.requested_size = None;
            return None;
        }
        if self.requested_size == Some(wanted) {
            return None;
        }
        self.requested_size = Some(wanted);
        Some(wanted)
    }

    /// Called at the start of every frame. `true` only on the first frame
    /// after the model was created, and only if the search field is usable
    /// then.
    pub fn take_focus_request(&mut self) -> bool {
        std::mem::take(&mut self.focus_pending)
            && self.view.browser_visible
            && !self.view.browser_covered
    }

    /// The window was opened inside `parent`.
    pub fn open(&mut self, parent: ParentHandle) {
        self.parent = Some(parent);
        self.attach_hosted_view();
    }

    /// The window is going away; detaches the hosted view from it.
    pub fn close_window(&mut self) {
        if let Some(HostedEditor::Native(view)) = self.hosted_editor.as_mut() {
            view.detach();
        }
        self.container = None;
        self.parent = None;
    }

    pub fn is_window_open(&self) -> bool {
        self.parent.is_some()
    }

    fn attach_hosted_view(&mut self) {
        let Some(parent) = self.parent else {
            return;
        };
        let Some(HostedEditor::Native(view)) = self.hosted_editor.as_mut() else {
            return;
        };
        let (width, height) = view.size();
        let container = match EditorContainer::create(parent, width, height) {
            Ok(container) => container,
            Err(e) => {
                log::error!("Could not create a window for the hosted editor: {:#}", e);
                return;
            }
        };
        if let Err(e) = view.attach(container.handle()) {
            log::error!("Could not attach the hosted editor: {:#}", e);
            return;
        }
        self.container = Some(container);
    }
}

impl Drop for EditorModel {
    fn drop(&mut self) {
        self.drop_hosted_editor();
    }
}
