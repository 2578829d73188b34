//! Parameter plumbing between the GUI side and the hosted processor.
//!
//! Edits from the plugin's own editor (`performEdit`) and from the generic
//! editor go into an [`EditQueue`]; the audio thread drains it into a
//! pre-allocated [`ParameterChanges`] before each `process` call.

use std::ffi::c_void;
use std::sync::{Arc, Mutex};

use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::HeapRb;
use vst3::Interface;
use vst3::Steinberg::FUnknown;
use vst3::Steinberg::Vst::{IParamValueQueue, IParameterChanges};

use super::c_api::*;
use super::module::Vst3Module;
use crate::host::view::{ParameterAccess, ParameterInfo};

/// Max distinct parameters delivered to the processor per block.
pub const MAX_PARAM_CHANGES: usize = 128;

type EditProducer = <HeapRb<(ParamId, f64)> as Split>::Prod;
type EditConsumer = <HeapRb<(ParamId, f64)> as Split>::Cons;

pub struct EditQueue {
    producer: Mutex<EditProducer>,
    consumer: Mutex<EditConsumer>,
}

impl EditQueue {
    pub fn new(capacity: usize) -> Self {
        let (producer, consumer) = HeapRb::<(ParamId, f64)>::new(capacity).split();
        Self {
            producer: Mutex::new(producer),
            consumer: Mutex::new(consumer),
        }
    }

    /// GUI side. Returns `false` when the queue is full.
    pub fn push(&self, id: ParamId, value: f64) -> bool {
        match self.producer.lock() {
            Ok(mut producer) => producer.try_push((id, value)).is_ok(),
            Err(_) => false,
        }
    }

    /// Audio side. Never blocks: a contended consumer is skipped for a block.
    pub fn drain_into(&self, changes: &mut ParameterChanges) {
        if let Ok(mut consumer) = self.consumer.try_lock() {
            while let Some((id, value)) = consumer.try_pop() {
                if !changes.set(id, value) {
                    break;
                }
            }
        }
    }

    #[cfg(test)]
    pub fn drain_into_vec(&self) -> Vec<(ParamId, f64)> {
        let mut out = Vec::new();
        if let Ok(mut consumer) = self.consumer.lock() {
            while let Some(edit) = consumer.try_pop() {
                out.push(edit);
            }
        }
        out
    }
}

/// One parameter, one point at sample offset 0.
#[repr(C)]
struct ParamValueQueue {
    vtbl: *const IParamValueQueueVtbl,
    id: ParamId,
    value: f64,
}

/// Pre-allocated `IParameterChanges`. `add_parameter_data` is refused, so the
/// same type doubles as the (always empty) output list.
#[repr(C)]
pub struct ParameterChanges {
    vtbl: *const IParameterChangesVtbl,
    queues: Vec<ParamValueQueue>,
    used: usize,
}

impl ParameterChanges {
    pub fn new(capacity: usize) -> Self {
        let queues = (0..capacity)
            .map(|_| ParamValueQueue {
                vtbl: &PARAM_VALUE_QUEUE_VTBL,
                id: 0,
                value: 0.0,
            })
            .collect();
        Self {
            vtbl: &PARAMETER_CHANGES_VTBL,
            queues,
            used: 0,
        }
    }

    pub fn clear(&mut self) {
        self.used = 0;
    }

    pub fn len(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Latest value wins when the same parameter is set twice in a block.
    pub fn set(&mut self, id: ParamId, value: f64) -> bool {
        if let Some(queue) = self.queues[..self.used].iter_mut().find(|q| q.id == id) {
            queue.value = value;
            return true;
        }
        let Some(queue) = self.queues.get_mut(self.used) else {
            return false;
        };
        queue.id = id;
        queue.value = value;
        self.used += 1;
        true
    }

    pub fn as_ptr(&mut self) -> *mut c_void {
        self as *mut Self as *mut c_void
    }
}

unsafe extern "system" fn changes_query_interface(
    this: *mut c_void,
    iid: *const TUID,
    obj: *mut *mut c_void,
) -> TResult {
    if obj.is_null() || iid.is_null() {
        return K_INVALID_ARGUMENT;
    }
    if *iid == FUnknown::IID || *iid == IParameterChanges::IID {
        *obj = this;
        return K_RESULT_OK;
    }
    *obj = std::ptr::null_mut();
    K_NO_INTERFACE
}

unsafe extern "system" fn queue_query_interface(
    this: *mut c_void,
    iid: *const TUID,
    obj: *mut *mut c_void,
) -> TResult {
    if obj.is_null() || iid.is_null() {
        return K_INVALID_ARGUMENT;
    }
    if *iid == FUnknown::IID || *iid == IParamValueQueue::IID {
        *obj = this;
        return K_RESULT_OK;
    }
    *obj = std::ptr::null_mut();
    K_NO_INTERFACE
}

// Owned by the instance; reference counting is a no-op.
unsafe extern "system" fn static_add_ref(_this: *mut c_void) -> u32 {
    1
}

unsafe extern "system" fn static_release(_this: *mut c_void) -> u32 {
    1
}

unsafe extern "system" fn changes_get_parameter_count(this: *mut c_void) -> i32 {
    (*(this as *mut ParameterChanges)).used as i32
}

unsafe extern "system" fn changes_get_parameter_data(this: *mut c_void, index: i32) -> *mut c_void {
    let changes = &mut *(this as *mut ParameterChanges);
    if index < 0 || index as usize >= changes.used {
        return std::ptr::null_mut();
    }
    &mut changes.queues[index as usize] as *mut ParamValueQueue as *mut c_void
}

unsafe extern "system" fn changes_add_parameter_data(
    _this: *mut c_void,
    _id: *const ParamId,
    index: *mut i32,
) -> *mut c_void {
    if !index.is_null() {
        *index = -1;
    }
    std::ptr::null_mut()
}

unsafe extern "system" fn queue_get_parameter_id(this: *mut c_void) -> ParamId {
    (*(this as *mut ParamValueQueue)).id
}

unsafe extern "system" fn queue_get_point_count(_this: *mut c_void) -> i32 {
    1
}

unsafe extern "system" fn queue_get_point(
    this: *mut c_void,
    index: i32,
    sample_offset: *mut i32,
    value: *mut f64,
) -> TResult {
    if index != 0 {
        return K_INVALID_ARGUMENT;
    }
    if !sample_offset.is_null() {
        *sample_offset = 0;
    }
    if !value.is_null() {
        *value = (*(this as *mut ParamValueQueue)).value;
    }
    K_RESULT_OK
}

unsafe extern "system" fn queue_add_point(
    _this: *mut c_void,
    _sample_offset: i32,
    _value: f64,
    _index: *mut i32,
) -> TResult {
    K_RESULT_FALSE
}

static PARAM_VALUE_QUEUE_VTBL: IParamValueQueueVtbl = IParamValueQueueVtbl {
    base: FUnknownVtbl {
        query_interface: queue_query_interface,
        add_ref: static_add_ref,
        release: static_release,
    },
    get_parameter_id: queue_get_parameter_id,
    get_point_count: queue_get_point_count,
    get_point: queue_get_point,
    add_point: queue_add_point,
};

static PARAMETER_CHANGES_VTBL: IParameterChangesVtbl = IParameterChangesVtbl {
    base: FUnknownVtbl {
        query_interface: changes_query_interface,
        add_ref: static_add_ref,
        release: static_release,
    },
    get_parameter_count: changes_get_parameter_count,
    get_parameter_data: changes_get_parameter_data,
    add_parameter_data: changes_add_parameter_data,
};

/// Reads every parameter description from a controller.
///
/// # Safety
/// `controller` must be a live `IEditController`.
pub unsafe fn read_parameter_infos(controller: *mut c_void) -> Vec<ParameterInfo> {
    if controller.is_null() {
        return Vec::new();
    }
    let vtbl = get_vtbl::<IEditControllerVtbl>(controller);
    let count = (vtbl.get_parameter_count)(controller).max(0);
    let mut out = Vec::with_capacity(count as usize);
    for index in 0..count {
        let mut info: VstParameterInfo = std::mem::zeroed();
        if (vtbl.get_parameter_info)(controller, index, &mut info) != K_RESULT_OK {
            continue;
        }
        out.push(ParameterInfo {
            id: info.id,
            title: read_string128(&info.title),
            units: read_string128(&info.units),
            step_count: info.step_count,
            default_normalized: info.default_normalized_value,
            read_only: info.flags & K_PARAM_IS_READ_ONLY != 0,
            hidden: info.flags & K_PARAM_IS_HIDDEN != 0,
            bypass: info.flags & K_PARAM_IS_BYPASS != 0,
        });
    }
    out
}

/// [`ParameterAccess`] over a hosted controller. Holds its own reference to
/// the controller and the module so it may outlive the instance briefly.
pub struct Vst3Parameters {
    controller: *mut c_void,
    edits: Arc<EditQueue>,
    _module: Arc<Vst3Module>,
}

unsafe impl Send for Vst3Parameters {}
unsafe impl Sync for Vst3Parameters {}

impl Vst3Parameters {
    /// # Safety
    /// `controller` must be a live `IEditController`.
    pub unsafe fn new(
        controller: *mut c_void,
        edits: Arc<EditQueue>,
        module: Arc<Vst3Module>,
    ) -> Self {
        (get_vtbl::<FUnknownVtbl>(controller).add_ref)(controller);
        Self {
            controller,
            edits,
            _module: module,
        }
    }

    fn vtbl(&self) -> &'static IEditControllerVtbl {
        unsafe { get_vtbl::<IEditControllerVtbl>(self.controller) }
    }
}

impl ParameterAccess for Vst3Parameters {
    fn parameters(&self) -> Vec<ParameterInfo> {
        unsafe { read_parameter_infos(self.controller) }
    }

    fn normalized(&self, id: u32) -> f64 {
        unsafe { (self.vtbl().get_param_normalized)(self.controller, id) }
    }

    fn set_normalized(&self, id: u32, value: f64) {
        let value = value.clamp(0.0, 1.0);
        unsafe {
            (self.vtbl().set_param_normalized)(self.controller, id, value);
        }
        if !self.edits.push(id, value) {
            log::warn!("Parameter edit queue full; dropped edit for {}", id);
        }
    }

    fn display_value(&self, id: u32, value: f64) -> String {
        let mut text: String128 = [0; 128];
        let res = unsafe {
            (self.vtbl().get_param_string_by_value)(self.controller, id, value, &mut text)
        };
        if res == K_RESULT_OK {
            read_string128(&text)
        } else {
            format!("{value:.3}")
        }
    }
}

impl Drop for Vst3Parameters {
    fn drop(&mut self) {
        unsafe { release(self.controller) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_queue_is_bounded() {
        let queue = EditQueue::new(2);
        assert!(queue.push(1, 0.1));
        assert!(queue.push(2, 0.2));
        assert!(!queue.push(3, 0.3));
        assert_eq!(queue.drain_into_vec(), vec![(1, 0.1), (2, 0.2)]);
    }

    #[test]
    fn changes_coalesce_by_id_and_expose_points() {
        let queue = EditQueue::new(8);
        queue.push(4, 0.1);
        queue.push(9, 0.5);
        queue.push(4, 0.7);

        let mut changes = ParameterChanges::new(MAX_PARAM_CHANGES);
        queue.drain_into(&mut changes);
        assert_eq!(changes.len(), 2);

        unsafe {
            let ptr = changes.as_ptr();
            let v = get_vtbl::<IParameterChangesVtbl>(ptr);
            assert_eq!((v.get_parameter_count)(ptr), 2);
            let first = (v.get_parameter_data)(ptr, 0);
            let qv = get_vtbl::<IParamValueQueueVtbl>(first);
            assert_eq!((qv.get_parameter_id)(first), 4);
            let mut offset = -1;
            let mut value = 0.0;
            assert_eq!((qv.get_point)(first, 0, &mut offset, &mut value), K_RESULT_OK);
            assert_eq!((offset, value), (0, 0.7));
            assert!((v.get_parameter_data)(ptr, 2).is_null());
        }

        changes.clear();
        assert!(changes.is_empty());
    }

    #[test]
    fn changes_refuse_past_capacity() {
        let mut changes = ParameterChanges::new(1);
        assert!(changes.set(1, 0.0));
        assert!(changes.set(1, 1.0));
        assert!(!changes.set(2, 0.0));
    }
}
