//! Raw VST3 ABI: vtable layouts, structs and constants. Interface IDs come
//! from the `vst3` crate.

use std::ffi::{c_char, c_void};

pub type TUID = [u8; 16];
pub type TResult = i32;
pub type ParamId = u32;

pub const K_RESULT_OK: TResult = 0;
pub const K_RESULT_FALSE: TResult = 1;

#[cfg(windows)]
pub const K_NO_INTERFACE: TResult = 0x8000_4002_u32 as i32;
#[cfg(windows)]
pub const K_INVALID_ARGUMENT: TResult = 0x8007_0057_u32 as i32;
#[cfg(windows)]
pub const K_NOT_IMPLEMENTED: TResult = 0x8000_4001_u32 as i32;

#[cfg(not(windows))]
pub const K_NO_INTERFACE: TResult = -1;
#[cfg(not(windows))]
pub const K_INVALID_ARGUMENT: TResult = 2;
#[cfg(not(windows))]
pub const K_NOT_IMPLEMENTED: TResult = 3;

pub const AUDIO_MODULE_CLASS: &str = "Audio Module Class";

pub const K_AUDIO: i32 = 0;
pub const K_EVENT: i32 = 1;
pub const K_INPUT: i32 = 0;
pub const K_OUTPUT: i32 = 1;
pub const K_MAIN_BUS: i32 = 0;

pub const K_REALTIME: i32 = 0;
pub const K_SAMPLE_32: i32 = 0;
pub const K_INFINITE_TAIL: u32 = u32::MAX;

pub const K_NOTE_ON_EVENT: u16 = 0;
pub const K_NOTE_OFF_EVENT: u16 = 1;
pub const K_POLY_PRESSURE_EVENT: u16 = 4;

pub const K_PARAM_IS_READ_ONLY: i32 = 1 << 1;
pub const K_PARAM_IS_HIDDEN: i32 = 1 << 4;
pub const K_PARAM_IS_BYPASS: i32 = 1 << 16;

pub const K_RESTART_LATENCY_CHANGED: i32 = 1 << 3;

pub const K_PLAYING: u32 = 1 << 1;
pub const K_PROJECT_TIME_MUSIC_VALID: u32 = 1 << 9;
pub const K_TEMPO_VALID: u32 = 1 << 10;
pub const K_BAR_POSITION_VALID: u32 = 1 << 11;
pub const K_TIME_SIG_VALID: u32 = 1 << 13;

pub const K_IB_SEEK_SET: i32 = 0;
pub const K_IB_SEEK_CUR: i32 = 1;
pub const K_IB_SEEK_END: i32 = 2;

pub type String128 = [u16; 128];

#[repr(C)]
pub struct PFactoryInfo {
    pub vendor: [c_char; 64],
    pub url: [c_char; 256],
    pub email: [c_char; 128],
    pub flags: i32,
}

#[repr(C)]
pub struct PClassInfo {
    pub cid: TUID,
    pub cardinality: i32,
    pub category: [c_char; 32],
    pub name: [c_char; 64],
}

#[repr(C)]
pub struct PClassInfo2 {
    pub cid: TUID,
    pub cardinality: i32,
    pub category: [c_char; 32],
    pub name: [c_char; 64],
    pub class_flags: u32,
    pub sub_categories: [c_char; 128],
    pub vendor: [c_char; 64],
    pub version: [c_char; 64],
    pub sdk_version: [c_char; 64],
}

#[repr(C)]
pub struct FUnknownVtbl {
    pub query_interface: unsafe extern "system" fn(
        this: *mut c_void,
        iid: *const TUID,
        obj: *mut *mut c_void,
    ) -> TResult,
    pub add_ref: unsafe extern "system" fn(this: *mut c_void) -> u32,
    pub release: unsafe extern "system" fn(this: *mut c_void) -> u32,
}

#[repr(C)]
pub struct IPluginFactoryVtbl {
    pub base: FUnknownVtbl,
    pub get_factory_info:
        unsafe extern "system" fn(this: *mut c_void, info: *mut PFactoryInfo) -> TResult,
    pub count_classes: unsafe extern "system" fn(this: *mut c_void) -> i32,
    pub get_class_info:
        unsafe extern "system" fn(this: *mut c_void, index: i32, info: *mut PClassInfo) -> TResult,
    pub create_instance: unsafe extern "system" fn(
        this: *mut c_void,
        cid: *const TUID,
        iid: *const TUID,
        obj: *mut *mut c_void,
    ) -> TResult,
}

#[repr(C)]
pub struct IPluginFactory2Vtbl {
    pub factory: IPluginFactoryVtbl,
    pub get_class_info2:
        unsafe extern "system" fn(this: *mut c_void, index: i32, info: *mut PClassInfo2) -> TResult,
}

#[repr(C)]
pub struct IBStreamVtbl {
    pub base: FUnknownVtbl,
    pub read: unsafe extern "system" fn(
        this: *mut c_void,
        buffer: *mut c_void,
        num_bytes: i32,
        num_bytes_read: *mut i32,
    ) -> TResult,
    pub write: unsafe extern "system" fn(
        this: *mut c_void,
        buffer: *const c_void,
        num_bytes: i32,
        num_bytes_written: *mut i32,
    ) -> TResult,
    pub seek: unsafe extern "system" fn(
        this: *mut c_void,
        pos: i64,
        mode: i32,
        result_pos: *mut i64,
    ) -> TResult,
    pub tell: unsafe extern "system" fn(this: *mut c_void, pos: *mut i64) -> TResult,
}

#[repr(C)]
pub struct BusInfo {
    pub media_type: i32,
    pub direction: i32,
    pub channel_count: i32,
    pub name: String128,
    pub bus_type: i32,
    pub flags: u32,
}

#[repr(C)]
pub struct IComponentVtbl {
    pub base: FUnknownVtbl,
    // IPluginBase
    pub initialize: unsafe extern "system" fn(this: *mut c_void, context: *mut c_void) -> TResult,
    pub terminate: unsafe extern "system" fn(this: *mut c_void) -> TResult,
    // IComponent
    pub get_controller_class_id:
        unsafe extern "system" fn(this: *mut c_void, class_id: *mut TUID) -> TResult,
    pub set_io_mode: unsafe extern "system" fn(this: *mut c_void, mode: i32) -> TResult,
    pub get_bus_count: unsafe extern "system" fn(this: *mut c_void, type_: i32, dir: i32) -> i32,
    pub get_bus_info: unsafe extern "system" fn(
        this: *mut c_void,
        type_: i32,
        dir: i32,
        index: i32,
        info: *mut BusInfo,
    ) -> TResult,
    pub get_routing_info: unsafe extern "system" fn(
        this: *mut c_void,
        in_info: *mut c_void,
        out_info: *mut c_void,
    ) -> TResult,
    pub activate_bus: unsafe extern "system" fn(
        this: *mut c_void,
        type_: i32,
        dir: i32,
        index: i32,
        state: u8,
    ) -> TResult,
    pub set_active: unsafe extern "system" fn(this: *mut c_void, state: u8) -> TResult,
    pub set_state: unsafe extern "system" fn(this: *mut c_void, state: *mut c_void) -> TResult,
    pub get_state: unsafe extern "system" fn(this: *mut c_void, state: *mut c_void) -> TResult,
}

#[repr(C)]
pub struct IAudioProcessorVtbl {
    pub base: FUnknownVtbl,
    pub set_bus_arrangements: unsafe extern "system" fn(
        this: *mut c_void,
        inputs: *mut u64,
        num_ins: i32,
        outputs: *mut u64,
        num_outs: i32,
    ) -> TResult,
    pub get_bus_arrangement: unsafe extern "system" fn(
        this: *mut c_void,
        dir: i32,
        index: i32,
        arr: *mut u64,
    ) -> TResult,
    pub can_process_sample_size:
        unsafe extern "system" fn(this: *mut c_void, symbolic_sample_size: i32) -> TResult,
    pub get_latency_samples: unsafe extern "system" fn(this: *mut c_void) -> u32,
    pub setup_processing:
        unsafe extern "system" fn(this: *mut c_void, setup: *mut ProcessSetup) -> TResult,
    pub set_processing: unsafe extern "system" fn(this: *mut c_void, state: u8) -> TResult,
    pub process: unsafe extern "system" fn(this: *mut c_void, data: *mut ProcessData) -> TResult,
    pub get_tail_samples: unsafe extern "system" fn(this: *mut c_void) -> u32,
}

#[repr(C)]
pub struct AudioBusBuffers {
    pub num_channels: i32,
    pub silence_flags: u64,
    pub channel_buffers32: *mut *mut f32,
}

#[repr(C)]
pub struct ProcessData {
    pub process_mode: i32,
    pub symbolic_sample_size: i32,
    pub num_samples: i32,
    pub num_inputs: i32,
    pub num_outputs: i32,
    pub inputs: *mut AudioBusBuffers,
    pub outputs: *mut AudioBusBuffers,
    pub input_param_changes: *mut c_void,
    pub output_param_changes: *mut c_void,
    pub input_events: *mut c_void,
    pub output_events: *mut c_void,
    pub process_context: *mut ProcessContext,
}

#[repr(C)]
pub struct ProcessSetup {
    pub process_mode: i32,
    pub symbolic_sample_size: i32,
    pub max_samples_per_block: i32,
    pub sample_rate: f64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Chord {
    pub key_note: u8,
    pub root_note: u8,
    pub chord_mask: i16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameRate {
    pub frames_per_second: u32,
    pub flags: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessContext {
    pub state: u32,
    pub sample_rate: f64,
    pub project_time_samples: i64,
    pub system_time: i64,
    pub continous_time_samples: i64,
    pub project_time_music: f64,
    pub bar_position_music: f64,
    pub cycle_start_music: f64,
    pub cycle_end_music: f64,
    pub tempo: f64,
    pub time_sig_numerator: i32,
    pub time_sig_denominator: i32,
    pub chord: Chord,
    pub smpte_offset_subframes: i32,
    pub frame_rate: FrameRate,
    pub samples_to_next_clock: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct NoteOnEvent {
    pub channel: i16,
    pub pitch: i16,
    pub tuning: f32,
    pub velocity: f32,
    pub length: i32,
    pub note_id: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct NoteOffEvent {
    pub channel: i16,
    pub pitch: i16,
    pub velocity: f32,
    pub note_id: i32,
    pub tuning: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct PolyPressureEvent {
    pub channel: i16,
    pub pitch: i16,
    pub pressure: f32,
    pub note_id: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union EventPayload {
    pub note_on: NoteOnEvent,
    pub note_off: NoteOffEvent,
    pub poly_pressure: PolyPressureEvent,
    pub raw: [u64; 3],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct Event {
    pub bus_index: i32,
    pub sample_offset: i32,
    pub ppq_position: f64,
    pub flags: u16,
    pub type_: u16,
    pub payload: EventPayload,
}

#[repr(C)]
pub struct IEventListVtbl {
    pub base: FUnknownVtbl,
    pub get_event_count: unsafe extern "system" fn(this: *mut c_void) -> i32,
    pub get_event:
        unsafe extern "system" fn(this: *mut c_void, index: i32, event: *mut Event) -> TResult,
    pub add_event: unsafe extern "system" fn(this: *mut c_void, event: *mut Event) -> TResult,
}

#[repr(C)]
pub struct IParamValueQueueVtbl {
    pub base: FUnknownVtbl,
    pub get_parameter_id: unsafe extern "system" fn(this: *mut c_void) -> ParamId,
    pub get_point_count: unsafe extern "system" fn(this: *mut c_void) -> i32,
    pub get_point: unsafe extern "system" fn(
        this: *mut c_void,
        index: i32,
        sample_offset: *mut i32,
        value: *mut f64,
    ) -> TResult,
    pub add_point: unsafe extern "system" fn(
        this: *mut c_void,
        sample_offset: i32,
        value: f64,
        index: *mut i32,
    ) -> TResult,
}

#[repr(C)]
pub struct IParameterChangesVtbl {
    pub base: FUnknownVtbl,
    pub get_parameter_count: unsafe extern "system" fn(this: *mut c_void) -> i32,
    pub get_parameter_data: unsafe extern "system" fn(this: *mut c_void, index: i32) -> *mut c_void,
    pub add_parameter_data: unsafe extern "system" fn(
        this: *mut c_void,
        id: *const ParamId,
        index: *mut i32,
    ) -> *mut c_void,
}

#[repr(C)]
pub struct VstParameterInfo {
    pub id: ParamId,
    pub title: String128,
    pub short_title: String128,
    pub units: String128,
    pub step_count: i32,
    pub default_normalized_value: f64,
    pub unit_id: i32,
    pub flags: i32,
}

#[repr(C)]
pub struct IEditControllerVtbl {
    pub base: FUnknownVtbl,
    // IPluginBase
    pub initialize: unsafe extern "system" fn(this: *mut c_void, context: *mut c_void) -> TResult,
    pub terminate: unsafe extern "system" fn(this: *mut c_void) -> TResult,
    // IEditController
    pub set_component_state:
        unsafe extern "system" fn(this: *mut c_void, state: *mut c_void) -> TResult,
    pub set_state: unsafe extern "system" fn(this: *mut c_void, state: *mut c_void) -> TResult,
    pub get_state: unsafe extern "system" fn(this: *mut c_void, state: *mut c_void) -> TResult,
    pub get_parameter_count: unsafe extern "system" fn(this: *mut c_void) -> i32,
    pub get_parameter_info: unsafe extern "system" fn(
        this: *mut c_void,
        param_index: i32,
        info: *mut VstParameterInfo,
    ) -> TResult,
    pub get_param_string_by_value: unsafe extern "system" fn(
        this: *mut c_void,
        id: ParamId,
        value: f64,
        string: *mut String128,
    ) -> TResult,
    pub get_param_value_by_string: unsafe extern "system" fn(
        this: *mut c_void,
        id: ParamId,
        string: *const u16,
        value: *mut f64,
    ) -> TResult,
    pub normalized_param_to_plain:
        unsafe extern "system" fn(this: *mut c_void, id: ParamId, value: f64) -> f64,
    pub plain_param_to_normalized:
        unsafe extern "system" fn(this: *mut c_void, id: ParamId, plain_value: f64) -> f64,
    pub get_param_normalized: unsafe extern "system" fn(this: *mut c_void, id: ParamId) -> f64,
    pub set_param_normalized:
        unsafe extern "system" fn(this: *mut c_void, id: ParamId, value: f64) -> TResult,
    pub set_component_handler:
        unsafe extern "system" fn(this: *mut c_void, handler: *mut c_void) -> TResult,
    pub create_view:
        unsafe extern "system" fn(this: *mut c_void, name: *const c_char) -> *mut c_void,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ViewRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl ViewRect {
    pub fn from_size(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            right: width as i32,
            bottom: height as i32,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (
            (self.right - self.left).max(0) as u32,
            (self.bottom - self.top).max(0) as u32,
        )
    }
}

#[repr(C)]
pub struct IPlugViewVtbl {
    pub base: FUnknownVtbl,
    pub is_platform_type_supported:
        unsafe extern "system" fn(this: *mut c_void, type_: *const c_char) -> TResult,
    pub attached: unsafe extern "system" fn(
        this: *mut c_void,
        parent: *mut c_void,
        type_: *const c_char,
    ) -> TResult,
    pub removed: unsafe extern "system" fn(this: *mut c_void) -> TResult,
    pub on_wheel: unsafe extern "system" fn(this: *mut c_void, distance: f32) -> TResult,
    pub on_key_down: unsafe extern "system" fn(
        this: *mut c_void,
        key: i16,
        key_code: i16,
        modifiers: i16,
    ) -> TResult,
    pub on_key_up: unsafe extern "system" fn(
        this: *mut c_void,
        key: i16,
        key_code: i16,
        modifiers: i16,
    ) -> TResult,
    pub get_size: unsafe extern "system" fn(this: *mut c_void, size: *mut ViewRect) -> TResult,
    pub on_size: unsafe extern "system" fn(this: *mut c_void, new_size: *mut ViewRect) -> TResult,
    pub on_focus: unsafe extern "system" fn(this: *mut c_void, state: u8) -> TResult,
    pub set_frame: unsafe extern "system" fn(this: *mut c_void, frame: *mut c_void) -> TResult,
    pub can_resize: unsafe extern "system" fn(this: *mut c_void) -> TResult,
    pub check_size_constraint:
        unsafe extern "system" fn(this: *mut c_void, rect: *mut ViewRect) -> TResult,
}

#[repr(C)]
pub struct IPlugFrameVtbl {
    pub base: FUnknownVtbl,
    pub resize_view: unsafe extern "system" fn(
        this: *mut c_void,
        view: *mut c_void,
        new_size: *mut ViewRect,
    ) -> TResult,
}

#[repr(C)]
pub struct IHostApplicationVtbl {
    pub base: FUnknownVtbl,
    pub get_name: unsafe extern "system" fn(this: *mut c_void, name: *mut String128) -> TResult,
    pub create_instance: unsafe extern "system" fn(
        this: *mut c_void,
        cid: *const TUID,
        iid: *const TUID,
        obj: *mut *mut c_void,
    ) -> TResult,
}

#[repr(C)]
pub struct IComponentHandlerVtbl {
    pub base: FUnknownVtbl,
    pub begin_edit: unsafe extern "system" fn(this: *mut c_void, id: ParamId) -> TResult,
    pub perform_edit:
        unsafe extern "system" fn(this: *mut c_void, id: ParamId, value_normalized: f64) -> TResult,
    pub end_edit: unsafe extern "system" fn(this: *mut c_void, id: ParamId) -> TResult,
    pub restart_component: unsafe extern "system" fn(this: *mut c_void, flags: i32) -> TResult,
}

#[repr(C)]
pub struct IConnectionPointVtbl {
    pub base: FUnknownVtbl,
    pub connect: unsafe extern "system" fn(this: *mut c_void, other: *mut c_void) -> TResult,
    pub disconnect: unsafe extern "system" fn(this: *mut c_void, other: *mut c_void) -> TResult,
    pub notify: unsafe extern "system" fn(this: *mut c_void, message: *mut c_void) -> TResult,
}

pub type AttrId = *const c_char;

#[repr(C)]
pub struct IAttributeListVtbl {
    pub base: FUnknownVtbl,
    pub set_int: unsafe extern "system" fn(this: *mut c_void, id: AttrId, value: i64) -> TResult,
    pub get_int: unsafe extern "system" fn(this: *mut c_void, id: AttrId, value: *mut i64) -> TResult,
    pub set_float: unsafe extern "system" fn(this: *mut c_void, id: AttrId, value: f64) -> TResult,
    pub get_float:
        unsafe extern "system" fn(this: *mut c_void, id: AttrId, value: *mut f64) -> TResult,
    pub set_string:
        unsafe extern "system" fn(this: *mut c_void, id: AttrId, string: *const u16) -> TResult,
    pub get_string: unsafe extern "system" fn(
        this: *mut c_void,
        id: AttrId,
        string: *mut u16,
        size_in_bytes: u32,
    ) -> TResult,
    pub set_binary: unsafe extern "system" fn(
        this: *mut c_void,
        id: AttrId,
        data: *const c_void,
        size_in_bytes: u32,
    ) -> TResult,
    pub get_binary: unsafe extern "system" fn(
        this: *mut c_void,
        id: AttrId,
        data: *mut *const c_void,
        size_in_bytes: *mut u32,
    ) -> TResult,
}

#[repr(C)]
pub struct IMessageVtbl {
    pub base: FUnknownVtbl,
    pub get_message_id: unsafe extern "system" fn(this: *mut c_void) -> *const c_char,
    pub set_message_id: unsafe extern "system" fn(this: *mut c_void, id: *const c_char),
    pub get_attributes: unsafe extern "system" fn(this: *mut c_void) -> *mut c_void,
}

/// Reads the vtable of a COM-style object.
///
/// # Safety
/// `ptr` must point at a live object whose first field is a `*const T`.
pub unsafe fn get_vtbl<T>(ptr: *mut c_void) -> &'static T {
    &**(ptr as *mut *mut T)
}

/// Queries `ptr` for the interface `I`, returning an owned reference.
///
/// # Safety
/// `ptr` must be a live VST3 object.
pub unsafe fn query<I: vst3::Interface>(ptr: *mut c_void) -> Option<*mut c_void> {
    if ptr.is_null() {
        return None;
    }
    let mut out: *mut c_void = std::ptr::null_mut();
    let res = (get_vtbl::<FUnknownVtbl>(ptr).query_interface)(
        ptr,
        &I::IID as *const _ as *const TUID,
        &mut out,
    );
    (res == K_RESULT_OK && !out.is_null()).then_some(out)
}

/// # Safety
/// `ptr` must be null or a live VST3 object the caller owns a reference to.
pub unsafe fn release(ptr: *mut c_void) {
    if !ptr.is_null() {
        (get_vtbl::<FUnknownVtbl>(ptr).release)(ptr);
    }
}

pub fn read_cstr(buf: &[c_char]) -> String {
    let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    let bytes: Vec<u8> = buf[..len].iter().map(|&c| c as u8).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

pub fn read_string128(buf: &String128) -> String {
    let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..len])
}

pub fn write_string128(s: &str) -> String128 {
    let mut buf = [0u16; 128];
    for (slot, ch) in buf.iter_mut().take(127).zip(s.encode_utf16()) {
        *slot = ch;
    }
    buf
}
