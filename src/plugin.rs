//! The plugin DAWs see: a VST3 effect forwarding everything to the plugin
//! it hosts.

use std::num::NonZeroU32;
use std::sync::Arc;

use nih_plug::params::persist::PersistentField;
use nih_plug::prelude::*;
use nih_plug_egui::EguiState;

use crate::config::LoaderConfig;
use crate::editor::{self, DEFAULT_EDITOR_WIDTH};
use crate::host::dispatch::CurrentThread;
use crate::host::midi::{MidiBuffer, MidiEvent, MidiMessage, PlayHead};
use crate::host::{FormatManager, HostProcessor, PlaybackConfig};

/// The hosted plugin's XML container, read from and written to the live
/// processor whenever the DAW saves or restores a project.
pub struct HostedStateField {
    processor: HostProcessor,
}

impl<'a> PersistentField<'a, String> for HostedStateField {
    fn set(&self, new_value: String) {
        if new_value.is_empty() {
            return;
        }
        if let Err(e) = self.processor.set_state_information(new_value.as_bytes()) {
            log::warn!("Ignoring saved hosted plugin state: {}", e);
        }
    }

    fn map<F, R>(&self, f: F) -> R
    where
        F: Fn(&String) -> R,
    {
        let xml = self
            .processor
            .state_information()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or_default();
        f(&xml)
    }
}

#[derive(Params)]
pub struct LoaderParams {
    #[persist = "editor-state"]
    pub editor_state: Arc<EguiState>,

    #[persist = "hosted-state"]
    pub hosted_state: HostedStateField,

    #[id = "bypass"]
    pub bypass: BoolParam,
}

impl LoaderParams {
    fn new(processor: HostProcessor) -> Self {
        let (width, height) = (
            DEFAULT_EDITOR_WIDTH,
            editor::BROWSER_HEIGHT
                + editor::BUTTON_TOP_SPACING
                + editor::BUTTON_HEIGHT
                + editor::LABEL_HEIGHT,
        );
        Self {
            editor_state: EguiState::from_size(width, height),
            hosted_state: HostedStateField { processor },
            bypass: BoolParam::new("Bypass", false).make_bypass(),
        }
    }
}

pub struct Vst3Loader {
    params: Arc<LoaderParams>,
    config: LoaderConfig,
    processor: HostProcessor,
    midi: MidiBuffer,
    sample_rate: f32,
    reported_latency: u32,
}

fn create_processor(config: &LoaderConfig) -> HostProcessor {
    HostProcessor::with_default_formats(config).unwrap_or_else(|e| {
        log::error!("Could not start the message thread, loading inline: {:#}", e);
        let mut formats = FormatManager::new(Arc::new(CurrentThread));
        formats.add_default_formats();
        HostProcessor::new(formats, PlaybackConfig::from(config))
    })
}

impl Default for Vst3Loader {
    fn default() -> Self {
        let config = LoaderConfig::load();
        let processor = create_processor(&config);
        Self {
            params: Arc::new(LoaderParams::new(processor.clone())),
            sample_rate: config.default_sample_rate as f32,
            config,
            processor,
            midi: MidiBuffer::default(),
            reported_latency: 0,
        }
    }
}

const fn symmetric(channels: u32) -> AudioIOLayout {
    AudioIOLayout {
        main_input_channels: NonZeroU32::new(channels),
        main_output_channels: NonZeroU32::new(channels),
        ..AudioIOLayout::const_default()
    }
}

impl Vst3Loader {
    fn collect_midi(&mut self, context: &mut impl ProcessContext<Self>) {
        self.midi.clear();
        while let Some(event) = context.next_event() {
            let midi = match event {
                NoteEvent::NoteOn {
                    timing,
                    channel,
                    note,
                    velocity,
                    ..
                } => MidiEvent {
                    sample_offset: timing,
                    message: MidiMessage::NoteOn {
                        channel,
                        note,
                        velocity,
                    },
                },
                NoteEvent::NoteOff {
                    timing,
                    channel,
                    note,
                    velocity,
                    ..
                } => MidiEvent {
                    sample_offset: timing,
                    message: MidiMessage::NoteOff {
                        channel,
                        note,
                        velocity,
                    },
                },
                NoteEvent::PolyPressure {
                    timing,
                    channel,
                    note,
                    pressure,
                    ..
                } => MidiEvent {
                    sample_offset: timing,
                    message: MidiMessage::PolyPressure {
                        channel,
                        note,
                        pressure,
                    },
                },
                _ => continue,
            };
            if !self.midi.push(midi) {
                log::debug!("MIDI buffer full, dropping events for this block");
            }
        }
    }

    fn send_midi(&self, context: &mut impl ProcessContext<Self>) {
        for event in self.midi.iter() {
            let timing = event.sample_offset;
            let note_event = match event.message {
                MidiMessage::NoteOn {
                    channel,
                    note,
                    velocity,
                } => NoteEvent::NoteOn {
                    timing,
                    voice_id: None,
                    channel,
                    note,
                    velocity,
                },
                MidiMessage::NoteOff {
                    channel,
                    note,
                    velocity,
                } => NoteEvent::NoteOff {
                    timing,
                    voice_id: None,
                    channel,
                    note,
                    velocity,
                },
                MidiMessage::PolyPressure {
                    channel,
                    note,
                    pressure,
                } => NoteEvent::PolyPressure {
                    timing,
                    voice_id: None,
                    channel,
                    note,
                    pressure,
                },
            };
            context.send_event(note_event);
        }
    }

    fn process_status(&self) -> ProcessStatus {
        let tail = self.processor.tail_length_seconds();
        if tail.is_infinite() {
            ProcessStatus::KeepAlive
        } else if tail > 0.0 {
            ProcessStatus::Tail((tail * self.sample_rate as f64).ceil() as u32)
        } else {
            ProcessStatus::Normal
        }
    }
}

fn play_head(transport: &Transport) -> PlayHead {
    PlayHead {
        sample_rate: transport.sample_rate as f64,
        playing: transport.playing,
        tempo: transport.tempo,
        time_signature: transport
            .time_sig_numerator
            .zip(transport.time_sig_denominator),
        position_samples: transport.pos_samples(),
        position_beats: transport.pos_beats(),
        bar_start_beats: transport.bar_start_pos_beats(),
    }
}

impl Plugin for Vst3Loader {
    const NAME: &'static str = "VST3 Loader";
    const VENDOR: &'static str = "kuro7983";
    const URL: &'static str = "";
    const EMAIL: &'static str = "";
    const VERSION: &'static str = env!("CARGO_PKG_VERSION");

    const AUDIO_IO_LAYOUTS: &'static [AudioIOLayout] = &[
        symmetric(2),
        symmetric(1),
        symmetric(4),
        symmetric(6),
        symmetric(8),
    ];

    const MIDI_INPUT: MidiConfig = MidiConfig::Basic;
    const MIDI_OUTPUT: MidiConfig = MidiConfig::Basic;
    const SAMPLE_ACCURATE_AUTOMATION: bool = false;

    type SysExMessage = ();
    type BackgroundTask = ();

    fn params(&self) -> Arc<dyn Params> {
        self.params.clone()
    }

    fn editor(&mut self, _async_executor: AsyncExecutor<Self>) -> Option<Box<dyn Editor>> {
        editor::view::create_editor(
            self.params.editor_state.clone(),
            self.processor.clone(),
            self.config.clone(),
        )
    }

    fn initialize(
        &mut self,
        audio_io_layout: &AudioIOLayout,
        buffer_config: &BufferConfig,
        context: &mut impl InitContext<Self>,
    ) -> bool {
        log::info!(
            "Preparing for {} Hz, {} samples, {:?} channels",
            buffer_config.sample_rate,
            buffer_config.max_buffer_size,
            audio_io_layout.main_output_channels
        );
        self.sample_rate = buffer_config.sample_rate;
        self.processor.prepare_to_play(
            buffer_config.sample_rate as f64,
            buffer_config.max_buffer_size as usize,
        );
        self.reported_latency = self.processor.latency_samples();
        context.set_latency_samples(self.reported_latency);
        true
    }

    fn reset(&mut self) {
        self.processor.reset();
    }

    fn deactivate(&mut self) {
        self.processor.release_resources();
    }

    fn process(
        &mut self,
        buffer: &mut Buffer,
        _aux: &mut AuxiliaryBuffers,
        context: &mut impl ProcessContext<Self>,
    ) -> ProcessStatus {
        self.collect_midi(context);
        let num_samples = buffer.samples();
        let transport = play_head(context.transport());
        let channels = buffer.as_slice();

        if self.params.bypass.value() {
            self.processor
                .process_block_bypassed(channels, num_samples, &mut self.midi);
        } else {
            self.processor
                .process_block(channels, num_samples, &mut self.midi, Some(&transport));
        }
        self.send_midi(context);

        let latency = self.processor.latency_samples();
        if latency != self.reported_latency {
            log::debug!("Hosted plugin latency is now {} samples", latency);
            self.reported_latency = latency;
            context.set_latency_samples(latency);
        }

        self.process_status()
    }
}

impl Vst3Plugin for Vst3Loader {
    const VST3_CLASS_ID: [u8; 16] = *b"Vst3LoaderWrappr";
    const VST3_SUBCATEGORIES: &'static [Vst3SubCategory] = &[Vst3SubCategory::Fx];
}

nih_export_vst3!(Vst3Loader);
