//! The hosted-plugin session and everything that forwards to it.
//!
//! One mutex guards the whole session. Control calls (load, close, state,
//! editor creation) block on it; the audio path only ever `try_lock`s and
//! lets the block through unprocessed when the control path holds it.

use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError, Weak};

use super::broadcast::{ChangeBroadcaster, ProcessorEvent};
use super::buffer::ChannelAdapter;
use super::dispatch::JobQueue;
use super::format::{FormatManager, PluginInstance, VST3_FORMAT_NAME};
use super::midi::{MidiBuffer, PlayHead};
use super::state::HostedState;
use super::view::{GenericEditor, HostedEditor};
use crate::config::LoaderConfig;
use crate::error::{LoadError, StateError};

const CONFIGURE_FAILED: &str = "Failed to configure hosted plugin";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackConfig {
    pub sample_rate: f64,
    pub block_size: usize,
}

impl From<&LoaderConfig> for PlaybackConfig {
    fn from(config: &LoaderConfig) -> Self {
        Self {
            sample_rate: config.default_sample_rate,
            block_size: config.default_block_size,
        }
    }
}

struct Session {
    instance: Option<Box<dyn PluginInstance>>,
    instance_id: u64,
    is_loading: bool,
    error: String,
    path: String,
    name: String,
    pending_state: Option<Vec<u8>>,
    /// Latest restore that arrived while another load was running.
    queued_restore: Option<HostedState>,
    playback: PlaybackConfig,
    adapter: ChannelAdapter,
    /// One entry per live [`InstanceLease`].
    leases: Vec<u64>,
    /// Released instances kept alive until their editors are gone.
    retired: Vec<(u64, Box<dyn PluginInstance>)>,
}

impl Session {
    /// Takes the instance out of the session. An instance that still has an
    /// editor is parked in `retired` instead of being returned for dropping.
    fn release_instance(&mut self) -> Released {
        self.path.clear();
        self.name.clear();
        let Some(instance) = self.instance.take() else {
            return Released::Nothing;
        };
        if self.leases.contains(&self.instance_id) {
            log::debug!("Keeping released instance alive until its editor closes");
            self.retired.push((self.instance_id, instance));
            Released::Retired
        } else {
            Released::Instance(instance)
        }
    }

    /// Marks the session as loading and stashes `pending_state` for the new
    /// instance. `None` when a load is already running.
    fn begin_load(&mut self, pending_state: Option<Vec<u8>>) -> Option<Released> {
        if self.is_loading {
            return None;
        }
        self.is_loading = true;
        self.pending_state = pending_state;
        Some(self.release_instance())
    }
}

enum Released {
    Nothing,
    Retired,
    Instance(Box<dyn PluginInstance>),
}

/// Keeps a hosted instance alive while an editor built from it exists.
/// Dropping the last lease of a released instance destroys it, so the
/// editor has to go first.
pub struct InstanceLease {
    shared: Weak<Shared>,
    instance_id: u64,
}

impl Drop for InstanceLease {
    fn drop(&mut self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let retired = {
            let mut session = shared.lock();
            if let Some(pos) = session.leases.iter().position(|&id| id == self.instance_id) {
                session.leases.swap_remove(pos);
            }
            if session.leases.contains(&self.instance_id) {
                None
            } else {
                session
                    .retired
                    .iter()
                    .position(|(id, _)| *id == self.instance_id)
                    .map(|pos| session.retired.swap_remove(pos))
            }
        };
        if retired.is_some() {
            log::debug!("Destroying released instance {}", self.instance_id);
        }
        drop(retired);
    }
}

struct Shared {
    session: Mutex<Session>,
    formats: FormatManager,
    broadcaster: ChangeBroadcaster,
    latency: AtomicU32,
    tail_bits: AtomicU64,
    next_instance_id: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Session> {
        match self.session.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn publish_timing(&self, instance: Option<&dyn PluginInstance>) {
        let (latency, tail) = instance
            .map(|i| (i.latency_samples(), i.tail_length_seconds()))
            .unwrap_or((0, 0.0));
        self.latency.store(latency, Ordering::Relaxed);
        self.tail_bits.store(tail.to_bits(), Ordering::Relaxed);
    }

    /// Drops what the session released and posts resolution of `path` to the
    /// message thread. The session must already be marked as loading.
    fn start_load(self: &Arc<Self>, path: String, released: Released) {
        let notify = !matches!(released, Released::Nothing);
        drop(released);
        self.publish_timing(None);
        if notify {
            self.broadcaster.send(ProcessorEvent::InstanceReleased);
        }

        log::info!("Loading hosted plugin {}", path);
        let shared = Arc::clone(self);
        self.formats
            .dispatcher()
            .call_async(Box::new(move || shared.resolve_and_instantiate(path)));
    }

    /// Starts the restore that arrived during the load that just finished.
    fn start_queued_restore(self: &Arc<Self>) {
        let (path, released) = {
            let mut session = self.lock();
            let Some(state) = session.queued_restore.take() else {
                return;
            };
            match session.begin_load(Some(state.inner_state)) {
                Some(released) => (state.plugin_path, released),
                None => return,
            }
        };
        self.start_load(path, released);
    }

    /// Runs on the message thread.
    fn resolve_and_instantiate(self: &Arc<Self>, path: String) {
        let Some(format) = self.formats.format_named(VST3_FORMAT_NAME) else {
            return self.fail_load(LoadError::FormatUnavailable);
        };

        let descriptions = format.find_all_types_for_file(Path::new(&path));
        if descriptions.is_empty() {
            return self.fail_load(LoadError::NoCandidates);
        }

        let Some(description) = descriptions.into_iter().find(|d| !d.is_instrument) else {
            return self.fail_load(LoadError::WrongKind);
        };

        let playback = self.lock().playback;
        let shared = Arc::clone(self);
        self.formats.create_plugin_instance_async(
            format,
            description,
            playback.sample_rate,
            playback.block_size,
            move |result| match result {
                Ok(instance) => shared.finish_load(path, instance),
                Err(message) => shared.fail_load(LoadError::instantiation(message)),
            },
        );
    }

    fn finish_load(self: &Arc<Self>, path: String, mut instance: Box<dyn PluginInstance>) {
        let description = instance.description();
        let mut session = self.lock();
        let playback = session.playback;

        let configured = instance.enable_all_buses();
        if configured {
            instance.prepare_to_play(playback.sample_rate, playback.block_size);
            let channels = instance
                .total_num_input_channels()
                .max(instance.total_num_output_channels());
            session.adapter.prepare(channels, playback.block_size);
        }

        if let Some(state) = session.pending_state.take() {
            instance.set_state(&state);
        }

        let rejected = if configured {
            self.publish_timing(Some(&*instance));
            session.instance = Some(instance);
            session.instance_id = self.next_instance_id.fetch_add(1, Ordering::Relaxed) + 1;
            session.path = path;
            session.name = description.display_name();
            session.error.clear();
            log::info!("Hosting '{}' from {}", session.name, session.path);
            None
        } else {
            log::error!("'{}' could not be configured", description.display_name());
            session.error = LoadError::instantiation(CONFIGURE_FAILED).to_string();
            Some(instance)
        };
        session.is_loading = false;
        drop(session);
        drop(rejected);

        self.broadcaster.send(ProcessorEvent::LoadFinished);
        self.start_queued_restore();
    }

    fn fail_load(self: &Arc<Self>, error: LoadError) {
        log::error!("Loading hosted plugin failed: {}", error);
        {
            let mut session = self.lock();
            session.error = error.to_string();
            session.pending_state = None;
            session.is_loading = false;
        }
        self.broadcaster.send(ProcessorEvent::LoadFinished);
        self.start_queued_restore();
    }
}

/// Cheap handle to the shared processor; clones refer to the same session.
#[derive(Clone)]
pub struct HostProcessor {
    shared: Arc<Shared>,
}

impl HostProcessor {
    pub fn new(formats: FormatManager, playback: PlaybackConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                session: Mutex::new(Session {
                    instance: None,
                    instance_id: 0,
                    is_loading: false,
                    error: String::new(),
                    path: String::new(),
                    name: String::new(),
                    pending_state: None,
                    queued_restore: None,
                    playback,
                    adapter: ChannelAdapter::new(),
                    leases: Vec::new(),
                    retired: Vec::new(),
                }),
                formats,
                broadcaster: ChangeBroadcaster::new(),
                latency: AtomicU32::new(0),
                tail_bits: AtomicU64::new(0f64.to_bits()),
                next_instance_id: AtomicU64::new(0),
            }),
        }
    }

    /// VST3 support plus a dedicated message thread.
    pub fn with_default_formats(config: &LoaderConfig) -> anyhow::Result<Self> {
        let message_thread = JobQueue::spawn("vst3-loader-message")?;
        let mut formats = FormatManager::new(Arc::new(message_thread));
        formats.add_default_formats();
        Ok(Self::new(formats, PlaybackConfig::from(config)))
    }

    pub fn subscribe(&self) -> Receiver<ProcessorEvent> {
        self.shared.broadcaster.subscribe()
    }

    /// Starts loading `path` unless a load is already running. The previous
    /// session is released right away; its error stays until this attempt
    /// resolves.
    pub fn load_plugin(&self, path: &str) {
        let Some(released) = self.shared.lock().begin_load(None) else {
            log::warn!("Ignoring load of {} while another load is running", path);
            return;
        };
        self.shared.start_load(path.to_string(), released);
    }

    /// Does nothing while a load is running.
    pub fn close_hosted_plugin(&self) {
        let previous = {
            let mut session = self.shared.lock();
            if session.is_loading {
                return;
            }
            session.error.clear();
            session.release_instance()
        };
        if matches!(previous, Released::Nothing) {
            return;
        }
        log::info!("Closing hosted plugin");
        drop(previous);
        self.shared.publish_timing(None);
        self.shared.broadcaster.send(ProcessorEvent::InstanceReleased);
    }

    pub fn is_hosted_plugin_loaded(&self) -> bool {
        self.shared.lock().instance.is_some()
    }

    pub fn is_currently_loading(&self) -> bool {
        self.shared.lock().is_loading
    }

    pub fn hosted_plugin_loading_error(&self) -> String {
        self.shared.lock().error.clone()
    }

    pub fn hosted_plugin_name(&self) -> String {
        self.shared.lock().name.clone()
    }

    pub fn hosted_plugin_path(&self) -> String {
        self.shared.lock().path.clone()
    }

    /// Changes every time a new instance is installed; `None` when empty.
    pub fn hosted_instance_id(&self) -> Option<u64> {
        let session = self.shared.lock();
        session.instance.as_ref().map(|_| session.instance_id)
    }

    pub fn playback(&self) -> PlaybackConfig {
        self.shared.lock().playback
    }

    /// The hosted plugin's own editor, or a parameter list when it has none.
    /// The lease keeps the instance alive after a release and must be
    /// dropped after the editor.
    pub fn create_hosted_editor_if_needed(&self) -> Option<(HostedEditor, InstanceLease)> {
        let mut session = self.shared.lock();
        let session = &mut *session;
        let instance = session.instance.as_mut()?;
        let editor = match instance.create_editor() {
            Some(view) => HostedEditor::Native(view),
            None => HostedEditor::Generic(GenericEditor::new(instance.parameter_access()?)),
        };
        session.leases.push(session.instance_id);
        let lease = InstanceLease {
            shared: Arc::downgrade(&self.shared),
            instance_id: session.instance_id,
        };
        Some((editor, lease))
    }

    /// Released instances still waiting for their editors to close.
    pub fn retired_instance_count(&self) -> usize {
        self.shared.lock().retired.len()
    }

    pub fn prepare_to_play(&self, sample_rate: f64, block_size: usize) {
        let mut session = self.shared.lock();
        let session = &mut *session;
        session.playback = PlaybackConfig {
            sample_rate,
            block_size,
        };
        if let Some(instance) = session.instance.as_mut() {
            instance.release_resources();
            instance.prepare_to_play(sample_rate, block_size);
            let channels = instance
                .total_num_input_channels()
                .max(instance.total_num_output_channels());
            session.adapter.prepare(channels, block_size);
        }
        self.shared.publish_timing(session.instance.as_deref());
    }

    pub fn release_resources(&self) {
        if let Some(instance) = self.shared.lock().instance.as_mut() {
            instance.release_resources();
        }
    }

    pub fn reset(&self) {
        if let Some(instance) = self.shared.lock().instance.as_mut() {
            instance.reset();
        }
    }

    pub fn latency_samples(&self) -> u32 {
        self.shared.latency.load(Ordering::Relaxed)
    }

    pub fn tail_length_seconds(&self) -> f64 {
        f64::from_bits(self.shared.tail_bits.load(Ordering::Relaxed))
    }

    /// Returns `false` when the block was left untouched: nothing is hosted,
    /// the session was busy, or the block is larger than prepared for.
    pub fn process_block(
        &self,
        channels: &mut [&mut [f32]],
        num_samples: usize,
        midi: &mut MidiBuffer,
        play_head: Option<&PlayHead>,
    ) -> bool {
        self.with_session_rt(|instance, adapter| {
            let required = instance
                .total_num_input_channels()
                .max(instance.total_num_output_channels());
            adapter.run(channels, num_samples, required, |wide| {
                instance.process_block(wide, num_samples, midi, play_head)
            })
        })
    }

    pub fn process_block_bypassed(
        &self,
        channels: &mut [&mut [f32]],
        num_samples: usize,
        midi: &mut MidiBuffer,
    ) -> bool {
        self.with_session_rt(|instance, adapter| {
            let required = instance
                .total_num_input_channels()
                .max(instance.total_num_output_channels());
            adapter.run(channels, num_samples, required, |wide| {
                instance.process_block_bypassed(wide, num_samples, midi)
            })
        })
    }

    fn with_session_rt<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut dyn PluginInstance, &mut ChannelAdapter) -> bool,
    {
        let mut guard = match self.shared.session.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return false,
        };
        let session = &mut *guard;
        let Some(instance) = session.instance.as_mut() else {
            return false;
        };
        let processed = f(instance.as_mut(), &mut session.adapter);
        self.shared
            .latency
            .store(instance.latency_samples(), Ordering::Relaxed);
        processed
    }

    /// The XML container for the current session, or `None` when nothing is
    /// hosted.
    pub fn state_information(&self) -> Option<Vec<u8>> {
        let mut session = self.shared.lock();
        let session = &mut *session;
        let instance = session.instance.as_mut()?;
        let state = HostedState {
            plugin_path: session.path.clone(),
            inner_state: instance.state(),
        };
        Some(state.to_xml().into_bytes())
    }

    /// Stashes the inner state and reloads the plugin it belongs to. A
    /// document without a plugin path changes nothing. A restore arriving
    /// during a load runs once that load has finished.
    pub fn set_state_information(&self, data: &[u8]) -> Result<(), StateError> {
        let Some(state) = HostedState::from_xml(data)? else {
            return Ok(());
        };
        let released = {
            let mut session = self.shared.lock();
            if session.is_loading {
                log::info!("Restoring {} after the running load", state.plugin_path);
                session.queued_restore = Some(state);
                return Ok(());
            }
            session.begin_load(Some(state.inner_state))
        };
        if let Some(released) = released {
            self.shared.start_load(state.plugin_path, released);
        }
        Ok(())
    }
}
