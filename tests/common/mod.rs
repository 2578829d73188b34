#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use vst3_loader::host::dispatch::{Dispatcher, Job};
use vst3_loader::host::format::{InstanceResult, VST3_FORMAT_NAME};
use vst3_loader::host::midi::{MidiBuffer, PlayHead};
use vst3_loader::host::view::{ParameterAccess, ParameterInfo};
use vst3_loader::host::{
    AudioPluginFormat, FormatManager, HostProcessor, NativeView, ParentHandle, PlaybackConfig,
    PluginDescription, PluginInstance,
};

/// Queues jobs until the test runs them.
#[derive(Default)]
pub struct ManualDispatcher {
    jobs: Mutex<VecDeque<Job>>,
}

impl ManualDispatcher {
    pub fn pending(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    /// Runs jobs, including ones queued by earlier jobs, until none are left.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        loop {
            let job = self.jobs.lock().unwrap().pop_front();
            match job {
                Some(job) => {
                    job();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }
}

impl Dispatcher for ManualDispatcher {
    fn call_async(&self, job: Job) {
        self.jobs.lock().unwrap().push_back(job);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorKind {
    None,
    Generic,
    Native { width: u32, height: u32 },
}

#[derive(Clone)]
pub struct MockPlugin {
    pub description: PluginDescription,
    pub inputs: usize,
    pub outputs: usize,
    pub configurable: bool,
    pub state: Vec<u8>,
    pub editor: EditorKind,
    pub latency: u32,
}

/// What the tests can observe about the instances a [`MockFormat`] made.
#[derive(Default)]
pub struct Probe {
    pub applied_states: Vec<Vec<u8>>,
    pub prepared: Vec<(f64, usize)>,
    /// Per processed block, the channels the instance received.
    pub seen_blocks: Vec<Vec<Vec<f32>>>,
    pub bypassed_blocks: usize,
    pub dropped: usize,
    pub view_events: Vec<String>,
    pub pending_resize: Option<(u32, u32)>,
}

pub fn effect(path: &Path, manufacturer: &str, name: &str) -> PluginDescription {
    PluginDescription {
        name: name.to_string(),
        manufacturer: manufacturer.to_string(),
        version: "1.0.0".to_string(),
        category: "Fx".to_string(),
        path: path.to_path_buf(),
        uid: [1; 16],
        is_instrument: false,
    }
}

pub fn instrument(path: &Path, name: &str) -> PluginDescription {
    PluginDescription {
        is_instrument: true,
        category: "Instrument|Synth".to_string(),
        ..effect(path, "Acme", name)
    }
}

pub fn stereo(description: PluginDescription) -> MockPlugin {
    MockPlugin {
        description,
        inputs: 2,
        outputs: 2,
        configurable: true,
        state: Vec::new(),
        editor: EditorKind::None,
        latency: 0,
    }
}

#[derive(Default)]
pub struct MockFormat {
    plugins: Mutex<HashMap<PathBuf, Vec<MockPlugin>>>,
    failure: Mutex<Option<String>>,
    pub create_calls: AtomicUsize,
    pub probe: Arc<Mutex<Probe>>,
}

impl MockFormat {
    pub fn add(&self, path: &Path, plugins: Vec<MockPlugin>) {
        self.plugins
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), plugins);
    }

    pub fn fail_instantiation(&self, message: Option<&str>) {
        *self.failure.lock().unwrap() = message.map(str::to_string);
    }

    pub fn creates(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

impl AudioPluginFormat for MockFormat {
    fn name(&self) -> &str {
        VST3_FORMAT_NAME
    }

    fn find_all_types_for_file(&self, path: &Path) -> Vec<PluginDescription> {
        self.plugins
            .lock()
            .unwrap()
            .get(path)
            .map(|plugins| plugins.iter().map(|p| p.description.clone()).collect())
            .unwrap_or_default()
    }

    fn create_instance(
        &self,
        description: &PluginDescription,
        _sample_rate: f64,
        _block_size: usize,
    ) -> InstanceResult {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.failure.lock().unwrap().clone() {
            return Err(message);
        }
        let plugin = self
            .plugins
            .lock()
            .unwrap()
            .get(&description.path)
            .and_then(|plugins| plugins.iter().find(|p| p.description == *description).cloned())
            .ok_or_else(|| "unknown plugin".to_string())?;
        Ok(Box::new(MockInstance {
            plugin,
            probe: self.probe.clone(),
            params: Arc::new(MockParams::default()),
        }))
    }
}

pub struct MockInstance {
    plugin: MockPlugin,
    probe: Arc<Mutex<Probe>>,
    params: Arc<MockParams>,
}

impl PluginInstance for MockInstance {
    fn description(&self) -> PluginDescription {
        self.plugin.description.clone()
    }

    fn total_num_input_channels(&self) -> usize {
        self.plugin.inputs
    }

    fn total_num_output_channels(&self) -> usize {
        self.plugin.outputs
    }

    fn enable_all_buses(&mut self) -> bool {
        self.plugin.configurable
    }

    fn prepare_to_play(&mut self, sample_rate: f64, block_size: usize) {
        self.probe
            .lock()
            .unwrap()
            .prepared
            .push((sample_rate, block_size));
    }

    fn release_resources(&mut self) {}

    fn reset(&mut self) {}

    fn latency_samples(&self) -> u32 {
        self.plugin.latency
    }

    fn tail_length_seconds(&self) -> f64 {
        0.0
    }

    /// Records its input, then writes `channel index + 1` everywhere.
    fn process_block(
        &mut self,
        channels: &mut [&mut [f32]],
        num_samples: usize,
        _midi: &mut MidiBuffer,
        _play_head: Option<&PlayHead>,
    ) {
        let seen = channels
            .iter()
            .map(|c| c[..num_samples].to_vec())
            .collect();
        self.probe.lock().unwrap().seen_blocks.push(seen);
        for (i, channel) in channels.iter_mut().enumerate() {
            channel[..num_samples].fill(i as f32 + 1.0);
        }
    }

    fn process_block_bypassed(
        &mut self,
        _channels: &mut [&mut [f32]],
        _num_samples: usize,
        _midi: &mut MidiBuffer,
    ) {
        self.probe.lock().unwrap().bypassed_blocks += 1;
    }

    fn state(&mut self) -> Vec<u8> {
        self.plugin.state.clone()
    }

    fn set_state(&mut self, data: &[u8]) {
        self.plugin.state = data.to_vec();
        self.probe.lock().unwrap().applied_states.push(data.to_vec());
    }

    fn create_editor(&mut self) -> Option<Box<dyn NativeView>> {
        match self.plugin.editor {
            EditorKind::Native { width, height } => Some(Box::new(MockView {
                size: (width, height),
                attached: false,
                probe: self.probe.clone(),
            })),
            _ => None,
        }
    }

    fn parameter_access(&self) -> Option<Arc<dyn ParameterAccess>> {
        match self.plugin.editor {
            EditorKind::Generic => Some(self.params.clone() as Arc<dyn ParameterAccess>),
            _ => None,
        }
    }
}

impl Drop for MockInstance {
    fn drop(&mut self) {
        self.probe.lock().unwrap().dropped += 1;
    }
}

pub struct MockView {
    size: (u32, u32),
    attached: bool,
    probe: Arc<Mutex<Probe>>,
}

impl NativeView for MockView {
    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn attach(&mut self, parent: ParentHandle) -> anyhow::Result<()> {
        self.attached = true;
        self.probe
            .lock()
            .unwrap()
            .view_events
            .push(format!("attach {}", parent.platform_type()));
        Ok(())
    }

    fn detach(&mut self) {
        self.attached = false;
        self.probe
            .lock()
            .unwrap()
            .view_events
            .push("detach".to_string());
    }

    fn is_attached(&self) -> bool {
        self.attached
    }

    fn take_resize_request(&mut self) -> Option<(u32, u32)> {
        let request = self.probe.lock().unwrap().pending_resize.take();
        if let Some(size) = request {
            self.size = size;
        }
        request
    }
}

#[derive(Default)]
pub struct MockParams {
    values: Mutex<HashMap<u32, f64>>,
}

impl ParameterAccess for MockParams {
    fn parameters(&self) -> Vec<ParameterInfo> {
        (0..3)
            .map(|id| ParameterInfo {
                id,
                title: format!("Param {id}"),
                units: String::new(),
                step_count: 0,
                default_normalized: 0.5,
                read_only: false,
                hidden: false,
                bypass: false,
            })
            .collect()
    }

    fn normalized(&self, id: u32) -> f64 {
        self.values.lock().unwrap().get(&id).copied().unwrap_or(0.5)
    }

    fn set_normalized(&self, id: u32, value: f64) {
        self.values.lock().unwrap().insert(id, value);
    }

    fn display_value(&self, _id: u32, value: f64) -> String {
        format!("{value:.2}")
    }
}

pub struct Harness {
    pub processor: HostProcessor,
    pub message_thread: Arc<ManualDispatcher>,
    pub format: Arc<MockFormat>,
}

impl Harness {
    pub fn new() -> Self {
        let message_thread = Arc::new(ManualDispatcher::default());
        let format = Arc::new(MockFormat::default());
        let mut formats = FormatManager::new(message_thread.clone());
        formats.add_format(format.clone());
        let processor = HostProcessor::new(
            formats,
            PlaybackConfig {
                sample_rate: 48_000.0,
                block_size: 64,
            },
        );
        Self {
            processor,
            message_thread,
            format,
        }
    }

    pub fn with_plugin(path: &str, plugin: impl FnOnce(&Path) -> MockPlugin) -> Self {
        let harness = Self::new();
        let path = Path::new(path);
        harness.format.add(path, vec![plugin(path)]);
        harness
    }

    pub fn probe(&self) -> std::sync::MutexGuard<'_, Probe> {
        self.format.probe.lock().unwrap()
    }

    /// Loads `path` and runs the message thread to completion.
    pub fn load(&self, path: &str) {
        self.processor.load_plugin(path);
        self.message_thread.run_all();
    }
}
