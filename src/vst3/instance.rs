use std::ffi::c_void;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

use vst3::Interface;
use vst3::Steinberg::FUnknown;
use vst3::Steinberg::Vst::{IAudioProcessor, IComponent, IConnectionPoint, IEditController};

use super::c_api::*;
use super::events::EventList;
use super::host_context::{new_component_handler, new_host_application};
use super::module::Vst3Module;
use super::params::{read_parameter_infos, EditQueue, ParameterChanges, Vst3Parameters, MAX_PARAM_CHANGES};
use super::stream::MemoryStream;
use super::view::Vst3View;
use crate::host::format::{PluginDescription, PluginInstance};
use crate::host::midi::{MidiBuffer, PlayHead};
use crate::host::view::{NativeView, ParameterAccess};

const EDIT_QUEUE_SIZE: usize = 1024;
const STATE_MAGIC: &[u8; 8] = b"VST3LDR1";

/// A live VST3 effect: component, processor and (maybe separate) controller.
pub struct Vst3Instance {
    description: PluginDescription,
    host_app: *mut c_void,
    component: *mut c_void,
    component_initialized: bool,
    processor: *mut c_void,
    controller: *mut c_void,
    separate_controller: bool,
    connected: bool,
    handler: *mut c_void,
    edits: Arc<EditQueue>,
    restart_flags: Arc<AtomicI32>,
    latency: AtomicU32,

    input_buses: Vec<i32>,
    output_buses: Vec<i32>,
    event_inputs: i32,
    event_outputs: i32,
    bypass_param: Option<ParamId>,
    bypassed: bool,

    sample_rate: f64,
    block_size: usize,
    active: bool,

    spare: Vec<Vec<f32>>,
    input_ptrs: Vec<*mut f32>,
    output_ptrs: Vec<*mut f32>,
    input_bus_buffers: Vec<AudioBusBuffers>,
    output_bus_buffers: Vec<AudioBusBuffers>,
    in_events: EventList,
    out_events: EventList,
    in_changes: ParameterChanges,
    out_changes: ParameterChanges,
    context: ProcessContext,

    // Released last so the library outlives every object it created.
    module: Arc<Vst3Module>,
}

unsafe impl Send for Vst3Instance {}

impl Vst3Instance {
    pub fn create(
        module: Arc<Vst3Module>,
        description: PluginDescription,
        sample_rate: f64,
        block_size: usize,
    ) -> Result<Self, String> {
        let component = unsafe { create_component(&module, &description.uid) }
            .ok_or_else(|| format!("Failed to create an instance of '{}'", description.name))?;

        let mut instance = Self {
            description,
            host_app: new_host_application(),
            component,
            component_initialized: false,
            processor: std::ptr::null_mut(),
            controller: std::ptr::null_mut(),
            separate_controller: false,
            connected: false,
            handler: std::ptr::null_mut(),
            edits: Arc::new(EditQueue::new(EDIT_QUEUE_SIZE)),
            restart_flags: Arc::new(AtomicI32::new(0)),
            latency: AtomicU32::new(0),
            input_buses: Vec::new(),
            output_buses: Vec::new(),
            event_inputs: 0,
            event_outputs: 0,
            bypass_param: None,
            bypassed: false,
            sample_rate,
            block_size,
            active: false,
            spare: Vec::new(),
            input_ptrs: Vec::new(),
            output_ptrs: Vec::new(),
            input_bus_buffers: Vec::new(),
            output_bus_buffers: Vec::new(),
            in_events: EventList::with_capacity(MidiBuffer::DEFAULT_CAPACITY),
            out_events: EventList::with_capacity(MidiBuffer::DEFAULT_CAPACITY),
            in_changes: ParameterChanges::new(MAX_PARAM_CHANGES),
            out_changes: ParameterChanges::new(0),
            context: ProcessContext::default(),
            module,
        };

        unsafe {
            let vtbl = instance.component_vtbl();
            if (vtbl.initialize)(instance.component, instance.host_app) != K_RESULT_OK {
                return Err("Failed to initialize component".to_string());
            }
            instance.component_initialized = true;

            instance.processor = query::<IAudioProcessor>(instance.component)
                .ok_or_else(|| "Plugin has no audio processor".to_string())?;

            instance.attach_controller();
            instance.read_buses();
        }
        instance.bypass_param = unsafe { read_parameter_infos(instance.controller) }
            .into_iter()
            .find(|p| p.bypass)
            .map(|p| p.id);

        log::debug!(
            "Created '{}': {} in / {} out channels, controller: {}",
            instance.description.name,
            instance.total_num_input_channels(),
            instance.total_num_output_channels(),
            if instance.controller.is_null() {
                "none"
            } else if instance.separate_controller {
                "separate"
            } else {
                "single"
            }
        );
        Ok(instance)
    }

    fn component_vtbl(&self) -> &'static IComponentVtbl {
        unsafe { get_vtbl::<IComponentVtbl>(self.component) }
    }

    fn processor_vtbl(&self) -> &'static IAudioProcessorVtbl {
        unsafe { get_vtbl::<IAudioProcessorVtbl>(self.processor) }
    }

    /// Finds the edit controller (on the component itself or as its own
    /// class), installs the component handler and syncs component state.
    unsafe fn attach_controller(&mut self) {
        if let Some(controller) = query::<IEditController>(self.component) {
            self.controller = controller;
        } else {
            let mut cid: TUID = [0; 16];
            let res = (self.component_vtbl().get_controller_class_id)(self.component, &mut cid);
            if res != K_RESULT_OK || cid == [0; 16] {
                log::info!("'{}' has no edit controller", self.description.name);
                return;
            }
            let Some(controller) = self.module.create_instance(&cid, &IEditController::IID) else {
                log::warn!("Failed to create controller for '{}'", self.description.name);
                return;
            };
            let vtbl = get_vtbl::<IEditControllerVtbl>(controller);
            if (vtbl.initialize)(controller, self.host_app) != K_RESULT_OK {
                log::warn!("Failed to initialize controller for '{}'", self.description.name);
                release(controller);
                return;
            }
            self.controller = controller;
            self.separate_controller = true;
        }

        let vtbl = get_vtbl::<IEditControllerVtbl>(self.controller);
        self.handler = new_component_handler(self.edits.clone(), self.restart_flags.clone());
        (vtbl.set_component_handler)(self.controller, self.handler);

        if self.separate_controller {
            self.connected = link_connection_points(self.component, self.controller);
        }

        let mut stream = MemoryStream::new();
        if (self.component_vtbl().get_state)(self.component, stream.as_ptr()) == K_RESULT_OK {
            stream.rewind();
            (vtbl.set_component_state)(self.controller, stream.as_ptr());
        }
    }

    unsafe fn read_buses(&mut self) {
        let vtbl = self.component_vtbl();
        let component = self.component;
        let read = |dir: i32| -> Vec<i32> {
            let count = (vtbl.get_bus_count)(component, K_AUDIO, dir).max(0);
            (0..count)
                .map(|index| {
                    let mut info: BusInfo = std::mem::zeroed();
                    if (vtbl.get_bus_info)(component, K_AUDIO, dir, index, &mut info)
                        == K_RESULT_OK
                    {
                        info.channel_count.max(0)
                    } else {
                        0
                    }
                })
                .collect()
        };
        self.input_buses = read(K_INPUT);
        self.output_buses = read(K_OUTPUT);
        self.event_inputs = (vtbl.get_bus_count)(component, K_EVENT, K_INPUT).max(0);
        self.event_outputs = (vtbl.get_bus_count)(component, K_EVENT, K_OUTPUT).max(0);
    }

    fn refresh_latency(&self) {
        if self.processor.is_null() {
            return;
        }
        let latency = unsafe { (self.processor_vtbl().get_latency_samples)(self.processor) };
        self.latency.store(latency, Ordering::Relaxed);
    }

    fn set_processing_state(&mut self, on: bool) {
        let state = u8::from(on);
        unsafe {
            if on {
                (self.component_vtbl().set_active)(self.component, state);
                (self.processor_vtbl().set_processing)(self.processor, state);
            } else {
                (self.processor_vtbl().set_processing)(self.processor, state);
                (self.component_vtbl().set_active)(self.component, state);
            }
        }
        self.active = on;
    }

    fn run_process(
        &mut self,
        channels: &mut [&mut [f32]],
        num_samples: usize,
        midi: &mut MidiBuffer,
        play_head: Option<&PlayHead>,
    ) {
        self.input_ptrs.clear();
        self.output_ptrs.clear();
        let inputs: usize = self.input_buses.iter().map(|&c| c as usize).sum();
        let outputs: usize = self.output_buses.iter().map(|&c| c as usize).sum();
        for index in 0..inputs {
            let ptr = channel_ptr(channels, &mut self.spare, index, num_samples, true);
            self.input_ptrs.push(ptr);
        }
        for index in 0..outputs {
            let ptr = channel_ptr(channels, &mut self.spare, index, num_samples, false);
            self.output_ptrs.push(ptr);
        }

        self.input_bus_buffers.clear();
        self.output_bus_buffers.clear();
        let mut offset = 0;
        for &count in &self.input_buses {
            self.input_bus_buffers.push(AudioBusBuffers {
                num_channels: count,
                silence_flags: 0,
                channel_buffers32: unsafe { self.input_ptrs.as_mut_ptr().add(offset) },
            });
            offset += count as usize;
        }
        offset = 0;
        for &count in &self.output_buses {
            self.output_bus_buffers.push(AudioBusBuffers {
                num_channels: count,
                silence_flags: 0,
                channel_buffers32: unsafe { self.output_ptrs.as_mut_ptr().add(offset) },
            });
            offset += count as usize;
        }

        self.in_events.fill_from(midi);
        self.out_events.clear();
        self.context = process_context(play_head, self.sample_rate);

        let mut data = ProcessData {
            process_mode: K_REALTIME,
            symbolic_sample_size: K_SAMPLE_32,
            num_samples: num_samples as i32,
            num_inputs: self.input_bus_buffers.len() as i32,
            num_outputs: self.output_bus_buffers.len() as i32,
            inputs: self.input_bus_buffers.as_mut_ptr(),
            outputs: self.output_bus_buffers.as_mut_ptr(),
            input_param_changes: self.in_changes.as_ptr(),
            output_param_changes: self.out_changes.as_ptr(),
            input_events: if self.event_inputs > 0 {
                self.in_events.as_ptr()
            } else {
                std::ptr::null_mut()
            },
            output_events: if self.event_outputs > 0 {
                self.out_events.as_ptr()
            } else {
                std::ptr::null_mut()
            },
            process_context: &mut self.context,
        };
        unsafe {
            (self.processor_vtbl().process)(self.processor, &mut data);
        }

        midi.clear();
        self.out_events.drain_into(midi);
    }

    unsafe fn read_stream(
        object: *mut c_void,
        get_state: unsafe extern "system" fn(*mut c_void, *mut c_void) -> TResult,
    ) -> Vec<u8> {
        if object.is_null() {
            return Vec::new();
        }
        let mut stream = MemoryStream::new();
        if get_state(object, stream.as_ptr()) == K_RESULT_OK {
            stream.into_bytes()
        } else {
            Vec::new()
        }
    }
}

impl PluginInstance for Vst3Instance {
    fn description(&self) -> PluginDescription {
        self.description.clone()
    }

    fn total_num_input_channels(&self) -> usize {
        self.input_buses.iter().map(|&c| c as usize).sum()
    }

    fn total_num_output_channels(&self) -> usize {
        self.output_buses.iter().map(|&c| c as usize).sum()
    }

    /// Activates every audio and event bus. Only the main output bus is
    /// required; plugins may refuse optional buses.
    fn enable_all_buses(&mut self) -> bool {
        let vtbl = self.component_vtbl();
        let buses = [
            (K_AUDIO, K_INPUT, self.input_buses.len() as i32),
            (K_AUDIO, K_OUTPUT, self.output_buses.len() as i32),
            (K_EVENT, K_INPUT, self.event_inputs),
            (K_EVENT, K_OUTPUT, self.event_outputs),
        ];
        let mut main_output = false;
        for (media, dir, count) in buses {
            for index in 0..count {
                let res = unsafe { (vtbl.activate_bus)(self.component, media, dir, index, 1) };
                if media == K_AUDIO && dir == K_OUTPUT && index == K_MAIN_BUS {
                    main_output = res == K_RESULT_OK;
                } else if res != K_RESULT_OK {
                    log::debug!("Bus {media}/{dir}/{index} refused activation ({res})");
                }
            }
        }
        main_output
    }

    fn prepare_to_play(&mut self, sample_rate: f64, block_size: usize) {
        if self.active {
            self.release_resources();
        }
        self.sample_rate = sample_rate;
        self.block_size = block_size;

        let vtbl = self.processor_vtbl();
        let mut setup = ProcessSetup {
            process_mode: K_REALTIME,
            symbolic_sample_size: K_SAMPLE_32,
            max_samples_per_block: block_size as i32,
            sample_rate,
        };
        unsafe {
            if (vtbl.can_process_sample_size)(self.processor, K_SAMPLE_32) != K_RESULT_OK {
                log::warn!("'{}' does not report 32-bit support", self.description.name);
            }
            let res = (vtbl.setup_processing)(self.processor, &mut setup);
            if res != K_RESULT_OK {
                log::warn!("setupProcessing returned {res} for '{}'", self.description.name);
            }
        }

        let channels = self
            .total_num_input_channels()
            .max(self.total_num_output_channels());
        self.spare = vec![vec![0.0; block_size]; channels];
        self.input_ptrs = Vec::with_capacity(self.total_num_input_channels());
        self.output_ptrs = Vec::with_capacity(self.total_num_output_channels());
        self.input_bus_buffers = Vec::with_capacity(self.input_buses.len());
        self.output_bus_buffers = Vec::with_capacity(self.output_buses.len());

        self.set_processing_state(true);
        self.refresh_latency();
    }

    fn release_resources(&mut self) {
        if self.active {
            self.set_processing_state(false);
        }
    }

    fn reset(&mut self) {
        if self.active {
            self.set_processing_state(false);
            self.set_processing_state(true);
        }
    }

    fn latency_samples(&self) -> u32 {
        let flags = self
            .restart_flags
            .fetch_and(!K_RESTART_LATENCY_CHANGED, Ordering::AcqRel);
        if flags & K_RESTART_LATENCY_CHANGED != 0 {
            self.refresh_latency();
        }
        self.latency.load(Ordering::Relaxed)
    }

    fn tail_length_seconds(&self) -> f64 {
        if self.processor.is_null() || self.sample_rate <= 0.0 {
            return 0.0;
        }
        let tail = unsafe { (self.processor_vtbl().get_tail_samples)(self.processor) };
        if tail == K_INFINITE_TAIL {
            f64::INFINITY
        } else {
            tail as f64 / self.sample_rate
        }
    }

    fn process_block(
        &mut self,
        channels: &mut [&mut [f32]],
        num_samples: usize,
        midi: &mut MidiBuffer,
        play_head: Option<&PlayHead>,
    ) {
        if !self.active {
            return;
        }
        self.in_changes.clear();
        if self.bypassed {
            if let Some(id) = self.bypass_param {
                self.in_changes.set(id, 0.0);
            }
            self.bypassed = false;
        }
        self.edits.drain_into(&mut self.in_changes);
        self.run_process(channels, num_samples, midi, play_head);
    }

    /// Uses the plugin's own bypass parameter when it has one, so latency
    /// compensation and tails stay consistent.
    fn process_block_bypassed(
        &mut self,
        channels: &mut [&mut [f32]],
        num_samples: usize,
        midi: &mut MidiBuffer,
    ) {
        match self.bypass_param {
            Some(id) if self.active => {
                self.in_changes.clear();
                self.edits.drain_into(&mut self.in_changes);
                self.in_changes.set(id, 1.0);
                self.bypassed = true;
                self.run_process(channels, num_samples, midi, None);
            }
            _ => {
                let inputs = self.total_num_input_channels();
                let outputs = self.total_num_output_channels();
                for channel in channels.iter_mut().take(outputs).skip(inputs) {
                    let n = num_samples.min(channel.len());
                    channel[..n].fill(0.0);
                }
            }
        }
    }

    fn state(&mut self) -> Vec<u8> {
        unsafe {
            let component = Self::read_stream(self.component, self.component_vtbl().get_state);
            let controller = if self.separate_controller {
                Self::read_stream(
                    self.controller,
                    get_vtbl::<IEditControllerVtbl>(self.controller).get_state,
                )
            } else {
                Vec::new()
            };
            encode_state(&component, &controller)
        }
    }

    fn set_state(&mut self, data: &[u8]) {
        let empty: &[u8] = &[];
        let (component, controller) = decode_state(data).unwrap_or((data, empty));
        unsafe {
            let mut stream = MemoryStream::from_bytes(component.to_vec());
            let res = (self.component_vtbl().set_state)(self.component, stream.as_ptr());
            if res != K_RESULT_OK {
                log::warn!("'{}' rejected its saved state ({res})", self.description.name);
            }
            if self.controller.is_null() {
                return;
            }
            let vtbl = get_vtbl::<IEditControllerVtbl>(self.controller);
            stream.rewind();
            (vtbl.set_component_state)(self.controller, stream.as_ptr());
            if !controller.is_empty() {
                let mut stream = MemoryStream::from_bytes(controller.to_vec());
                (vtbl.set_state)(self.controller, stream.as_ptr());
            }
        }
        self.refresh_latency();
    }

    fn create_editor(&mut self) -> Option<Box<dyn NativeView>> {
        let view = unsafe { Vst3View::create(self.controller, self.module.clone()) }?;
        Some(Box::new(view))
    }

    fn parameter_access(&self) -> Option<Arc<dyn ParameterAccess>> {
        if self.controller.is_null() {
            return None;
        }
        let access =
            unsafe { Vst3Parameters::new(self.controller, self.edits.clone(), self.module.clone()) };
        Some(Arc::new(access))
    }
}

impl Drop for Vst3Instance {
    fn drop(&mut self) {
        if self.active {
            self.set_processing_state(false);
        }
        unsafe {
            if self.connected {
                unlink_connection_points(self.component, self.controller);
            }
            if !self.controller.is_null() {
                let vtbl = get_vtbl::<IEditControllerVtbl>(self.controller);
                (vtbl.set_component_handler)(self.controller, std::ptr::null_mut());
                if self.separate_controller {
                    (vtbl.terminate)(self.controller);
                }
                release(self.controller);
            }
            release(self.handler);
            release(self.processor);
            if self.component_initialized {
                (self.component_vtbl().terminate)(self.component);
            }
            release(self.component);
            release(self.host_app);
        }
        log::debug!("Released '{}'", self.description.name);
    }
}

/// Creates the component directly, falling back to `FUnknown` plus a query
/// for factories that only answer the base interface.
unsafe fn create_component(module: &Vst3Module, cid: &TUID) -> Option<*mut c_void> {
    if let Some(component) = module.create_instance(cid, &IComponent::IID) {
        return Some(component);
    }
    let unknown = module.create_instance(cid, &FUnknown::IID)?;
    let component = query::<IComponent>(unknown);
    release(unknown);
    component
}

unsafe fn connection_points(
    component: *mut c_void,
    controller: *mut c_void,
) -> Option<(*mut c_void, *mut c_void)> {
    match (
        query::<IConnectionPoint>(component),
        query::<IConnectionPoint>(controller),
    ) {
        (Some(a), Some(b)) => Some((a, b)),
        (a, b) => {
            release(a.unwrap_or(std::ptr::null_mut()));
            release(b.unwrap_or(std::ptr::null_mut()));
            None
        }
    }
}

unsafe fn link_connection_points(component: *mut c_void, controller: *mut c_void) -> bool {
    let Some((comp_cp, ctrl_cp)) = connection_points(component, controller) else {
        return false;
    };
    let comp_vtbl = get_vtbl::<IConnectionPointVtbl>(comp_cp);
    let ctrl_vtbl = get_vtbl::<IConnectionPointVtbl>(ctrl_cp);
    let r1 = (comp_vtbl.connect)(comp_cp, ctrl_cp);
    let r2 = (ctrl_vtbl.connect)(ctrl_cp, comp_cp);
    log::debug!("Connected component and controller ({r1}, {r2})");
    release(comp_cp);
    release(ctrl_cp);
    true
}

unsafe fn unlink_connection_points(component: *mut c_void, controller: *mut c_void) {
    let Some((comp_cp, ctrl_cp)) = connection_points(component, controller) else {
        return;
    };
    (get_vtbl::<IConnectionPointVtbl>(comp_cp).disconnect)(comp_cp, ctrl_cp);
    (get_vtbl::<IConnectionPointVtbl>(ctrl_cp).disconnect)(ctrl_cp, comp_cp);
    release(comp_cp);
    release(ctrl_cp);
}

/// Host channel `index`, or a spare buffer when the host block is narrower
/// than the plugin. Spare inputs are cleared first.
fn channel_ptr(
    channels: &mut [&mut [f32]],
    spare: &mut [Vec<f32>],
    index: usize,
    num_samples: usize,
    clear: bool,
) -> *mut f32 {
    if let Some(channel) = channels.get_mut(index).filter(|c| c.len() >= num_samples) {
        return channel.as_mut_ptr();
    }
    match spare.get_mut(index).filter(|s| s.len() >= num_samples) {
        Some(buffer) => {
            if clear {
                buffer[..num_samples].fill(0.0);
            }
            buffer.as_mut_ptr()
        }
        None => std::ptr::null_mut(),
    }
}

pub(crate) fn process_context(play_head: Option<&PlayHead>, sample_rate: f64) -> ProcessContext {
    let mut context = ProcessContext {
        sample_rate,
        ..Default::default()
    };
    let Some(head) = play_head else {
        return context;
    };
    if head.playing {
        context.state |= K_PLAYING;
    }
    if let Some(tempo) = head.tempo {
        context.tempo = tempo;
        context.state |= K_TEMPO_VALID;
    }
    if let Some((numerator, denominator)) = head.time_signature {
        context.time_sig_numerator = numerator;
        context.time_sig_denominator = denominator;
        context.state |= K_TIME_SIG_VALID;
    }
    if let Some(samples) = head.position_samples {
        context.project_time_samples = samples;
        context.continous_time_samples = samples;
    }
    if let Some(beats) = head.position_beats {
        context.project_time_music = beats;
        context.state |= K_PROJECT_TIME_MUSIC_VALID;
    }
    if let Some(bar) = head.bar_start_beats {
        context.bar_position_music = bar;
        context.state |= K_BAR_POSITION_VALID;
    }
    context
}

/// `magic | len | component | len | controller`, lengths as little-endian u32.
pub(crate) fn encode_state(component: &[u8], controller: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(STATE_MAGIC.len() + 8 + component.len() + controller.len());
    out.extend_from_slice(STATE_MAGIC);
    for part in [component, controller] {
        out.extend_from_slice(&(part.len() as u32).to_le_bytes());
        out.extend_from_slice(part);
    }
    out
}

/// Splits a blob written by [`encode_state`]. Anything else is `None`, and
/// callers treat it as raw component state.
pub(crate) fn decode_state(data: &[u8]) -> Option<(&[u8], &[u8])> {
    let rest = data.strip_prefix(STATE_MAGIC.as_slice())?;
    let (component, rest) = take_chunk(rest)?;
    let (controller, rest) = take_chunk(rest)?;
    rest.is_empty().then_some((component, controller))
}

fn take_chunk(data: &[u8]) -> Option<(&[u8], &[u8])> {
    let len_bytes: [u8; 4] = data.get(..4)?.try_into().ok()?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    let body = data.get(4..4 + len)?;
    Some((body, &data[4 + len..]))
}
