use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::dispatch::Dispatcher;
use super::midi::{MidiBuffer, PlayHead};
use super::view::{NativeView, ParameterAccess};

pub const VST3_FORMAT_NAME: &str = "VST3";

/// One plugin class found inside a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginDescription {
    pub name: String,
    pub manufacturer: String,
    pub version: String,
    pub category: String,
    pub path: PathBuf,
    #[serde(skip)]
    pub uid: [u8; 16],
    pub is_instrument: bool,
}

impl PluginDescription {
    /// `"<manufacturer> - <name>"`, as shown in the status line.
    pub fn display_name(&self) -> String {
        format!("{} - {}", self.manufacturer, self.name)
    }
}

/// Instantiation result. Failures carry the format's message, which may be
/// empty.
pub type InstanceResult = Result<Box<dyn PluginInstance>, String>;

/// A plugin format able to enumerate and instantiate plugins.
pub trait AudioPluginFormat: Send + Sync {
    fn name(&self) -> &str;
    fn find_all_types_for_file(&self, path: &Path) -> Vec<PluginDescription>;
    fn create_instance(
        &self,
        description: &PluginDescription,
        sample_rate: f64,
        block_size: usize,
    ) -> InstanceResult;
}

/// A live hosted plugin. Every call happens with the processor's session
/// lock held, so implementations never see concurrent calls.
pub trait PluginInstance: Send {
    fn description(&self) -> PluginDescription;
    fn total_num_input_channels(&self) -> usize;
    fn total_num_output_channels(&self) -> usize;
    fn enable_all_buses(&mut self) -> bool;
    fn prepare_to_play(&mut self, sample_rate: f64, block_size: usize);
    fn release_resources(&mut self);
    fn reset(&mut self);
    fn latency_samples(&self) -> u32;
    fn tail_length_seconds(&self) -> f64;
    fn process_block(
        &mut self,
        channels: &mut [&mut [f32]],
        num_samples: usize,
        midi: &mut MidiBuffer,
        play_head: Option<&PlayHead>,
    );

    /// Audio passes through untouched except for output channels beyond the
    /// input count, which are cleared.
    fn process_block_bypassed(
        &mut self,
        channels: &mut [&mut [f32]],
        num_samples: usize,
        _midi: &mut MidiBuffer,
    ) {
        let inputs = self.total_num_input_channels();
        let outputs = self.total_num_output_channels();
        for channel in channels.iter_mut().take(outputs).skip(inputs) {
            let n = num_samples.min(channel.len());
            channel[..n].fill(0.0);
        }
    }

    fn state(&mut self) -> Vec<u8>;
    fn set_state(&mut self, data: &[u8]);
    fn create_editor(&mut self) -> Option<Box<dyn NativeView>>;
    fn parameter_access(&self) -> Option<Arc<dyn ParameterAccess>>;
}

/// The formats a processor can load from, plus the thread their
/// asynchronous instantiation runs on.
pub struct FormatManager {
    formats: Vec<Arc<dyn AudioPluginFormat>>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl FormatManager {
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            formats: Vec::new(),
            dispatcher,
        }
    }

    pub fn add_format(&mut self, format: Arc<dyn AudioPluginFormat>) {
        self.formats.push(format);
    }

    pub fn add_default_formats(&mut self) {
        self.add_format(Arc::new(crate::vst3::Vst3Format::new()));
    }

    pub fn formats(&self) -> &[Arc<dyn AudioPluginFormat>] {
        &self.formats
    }

    pub fn format_named(&self, name: &str) -> Option<Arc<dyn AudioPluginFormat>> {
        self.formats.iter().find(|f| f.name() == name).cloned()
    }

    pub fn dispatcher(&self) -> &Arc<dyn Dispatcher> {
        &self.dispatcher
    }

    /// Instantiates on the dispatcher and hands the result to `callback`
    /// there.
    pub fn create_plugin_instance_async<F>(
        &self,
        format: Arc<dyn AudioPluginFormat>,
        description: PluginDescription,
        sample_rate: f64,
        block_size: usize,
        callback: F,
    ) where
        F: FnOnce(InstanceResult) + Send + 'static,
    {
        self.dispatcher.call_async(Box::new(move || {
            log::info!(
                "Instantiating '{}' from {}",
                description.name,
                description.path.display()
            );
            callback(format.create_instance(&description, sample_rate, block_size));
        }));
    }
}
