//! Host objects handed to the hosted plugin: `IHostApplication` as the
//! initialize context and `IComponentHandler` for controller edits.

use std::ffi::c_void;
use std::sync::atomic::{fence, AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

use vst3::Interface;
use vst3::Steinberg::FUnknown;
use vst3::Steinberg::Vst::{IAttributeList, IComponentHandler, IHostApplication, IMessage};

use super::c_api::*;
use super::message::{new_attribute_list, new_message};
use super::params::EditQueue;

pub const HOST_NAME: &str = "VST3 Loader";

#[repr(C)]
struct HostApplication {
    vtbl: *const IHostApplicationVtbl,
    ref_count: AtomicU32,
    name: String128,
}

/// A new host application object with one reference owned by the caller.
pub fn new_host_application() -> *mut c_void {
    Box::into_raw(Box::new(HostApplication {
        vtbl: &HOST_APPLICATION_VTBL,
        ref_count: AtomicU32::new(1),
        name: write_string128(HOST_NAME),
    })) as *mut c_void
}

unsafe extern "system" fn host_query_interface(
    this: *mut c_void,
    iid: *const TUID,
    obj: *mut *mut c_void,
) -> TResult {
    if obj.is_null() || iid.is_null() {
        return K_INVALID_ARGUMENT;
    }
    if *iid == FUnknown::IID || *iid == IHostApplication::IID {
        host_add_ref(this);
        *obj = this;
        return K_RESULT_OK;
    }
    *obj = std::ptr::null_mut();
    K_NO_INTERFACE
}

unsafe extern "system" fn host_add_ref(this: *mut c_void) -> u32 {
    let host = &*(this as *mut HostApplication);
    host.ref_count.fetch_add(1, Ordering::Relaxed) + 1
}

unsafe extern "system" fn host_release(this: *mut c_void) -> u32 {
    let host = this as *mut HostApplication;
    let remaining = (*host).ref_count.fetch_sub(1, Ordering::Release) - 1;
    if remaining == 0 {
        fence(Ordering::Acquire);
        drop(Box::from_raw(host));
    }
    remaining
}

unsafe extern "system" fn host_get_name(this: *mut c_void, name: *mut String128) -> TResult {
    if name.is_null() {
        return K_INVALID_ARGUMENT;
    }
    *name = (*(this as *mut HostApplication)).name;
    K_RESULT_OK
}

unsafe extern "system" fn host_create_instance(
    _this: *mut c_void,
    cid: *const TUID,
    iid: *const TUID,
    obj: *mut *mut c_void,
) -> TResult {
    if cid.is_null() || iid.is_null() || obj.is_null() {
        return K_INVALID_ARGUMENT;
    }
    *obj = std::ptr::null_mut();
    if *cid == IMessage::IID && *iid == IMessage::IID {
        *obj = new_message();
        return K_RESULT_OK;
    }
    if *cid == IAttributeList::IID && *iid == IAttributeList::IID {
        *obj = new_attribute_list();
        return K_RESULT_OK;
    }
    log::debug!("Plugin asked the host for an unsupported class");
    K_NO_INTERFACE
}

static HOST_APPLICATION_VTBL: IHostApplicationVtbl = IHostApplicationVtbl {
    base: FUnknownVtbl {
        query_interface: host_query_interface,
        add_ref: host_add_ref,
        release: host_release,
    },
    get_name: host_get_name,
    create_instance: host_create_instance,
};

#[repr(C)]
struct ComponentHandler {
    vtbl: *const IComponentHandlerVtbl,
    ref_count: AtomicU32,
    edits: Arc<EditQueue>,
    restart_flags: Arc<AtomicI32>,
}

/// A component handler forwarding `performEdit` into `edits` and
/// accumulating `restartComponent` flags into `restart_flags`.
pub fn new_component_handler(edits: Arc<EditQueue>, restart_flags: Arc<AtomicI32>) -> *mut c_void {
    Box::into_raw(Box::new(ComponentHandler {
        vtbl: &COMPONENT_HANDLER_VTBL,
        ref_count: AtomicU32::new(1),
        edits,
        restart_flags,
    })) as *mut c_void
}

unsafe extern "system" fn handler_query_interface(
    this: *mut c_void,
    iid: *const TUID,
    obj: *mut *mut c_void,
) -> TResult {
    if obj.is_null() || iid.is_null() {
        return K_INVALID_ARGUMENT;
    }
    if *iid == FUnknown::IID || *iid == IComponentHandler::IID {
        handler_add_ref(this);
        *obj = this;
        return K_RESULT_OK;
    }
    *obj = std::ptr::null_mut();
    K_NO_INTERFACE
}

unsafe extern "system" fn handler_add_ref(this: *mut c_void) -> u32 {
    let handler = &*(this as *mut ComponentHandler);
    handler.ref_count.fetch_add(1, Ordering::Relaxed) + 1
}

unsafe extern "system" fn handler_release(this: *mut c_void) -> u32 {
    let handler = this as *mut ComponentHandler;
    let remaining = (*handler).ref_count.fetch_sub(1, Ordering::Release) - 1;
    if remaining == 0 {
        fence(Ordering::Acquire);
        drop(Box::from_raw(handler));
    }
    remaining
}

unsafe extern "system" fn handler_begin_edit(_this: *mut c_void, _id: ParamId) -> TResult {
    K_RESULT_OK
}

unsafe extern "system" fn handler_perform_edit(this: *mut c_void, id: ParamId, value: f64) -> TResult {
    let handler = &*(this as *mut ComponentHandler);
    if handler.edits.push(id, value) {
        K_RESULT_OK
    } else {
        K_RESULT_FALSE
    }
}

unsafe extern "system" fn handler_end_edit(_this: *mut c_void, _id: ParamId) -> TResult {
    K_RESULT_OK
}

unsafe extern "system" fn handler_restart_component(this: *mut c_void, flags: i32) -> TResult {
    let handler = &*(this as *mut ComponentHandler);
    log::debug!("Hosted plugin requested restart (flags=0x{:x})", flags);
    handler.restart_flags.fetch_or(flags, Ordering::AcqRel);
    K_RESULT_OK
}

static COMPONENT_HANDLER_VTBL: IComponentHandlerVtbl = IComponentHandlerVtbl {
    base: FUnknownVtbl {
        query_interface: handler_query_interface,
        add_ref: handler_add_ref,
        release: handler_release,
    },
    begin_edit: handler_begin_edit,
    perform_edit: handler_perform_edit,
    end_edit: handler_end_edit,
    restart_component: handler_restart_component,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_reports_its_name() {
        let host = new_host_application();
        unsafe {
            let v = get_vtbl::<IHostApplicationVtbl>(host);
            let mut name = [0u16; 128];
            assert_eq!((v.get_name)(host, &mut name), K_RESULT_OK);
            assert_eq!(read_string128(&name), HOST_NAME);
            assert_eq!((v.base.release)(host), 0);
        }
    }

    #[test]
    fn host_creates_messages() {
        let host = new_host_application();
        unsafe {
            let v = get_vtbl::<IHostApplicationVtbl>(host);
            let mut obj = std::ptr::null_mut();
            let res = (v.create_instance)(
                host,
                &IMessage::IID as *const _ as *const TUID,
                &IMessage::IID as *const _ as *const TUID,
                &mut obj,
            );
            assert_eq!(res, K_RESULT_OK);
            release(obj);
            (v.base.release)(host);
        }
    }

    #[test]
    fn handler_forwards_edits_and_restart_flags() {
        let edits = Arc::new(EditQueue::new(4));
        let flags = Arc::new(AtomicI32::new(0));
        let handler = new_component_handler(edits.clone(), flags.clone());
        unsafe {
            let v = get_vtbl::<IComponentHandlerVtbl>(handler);
            (v.perform_edit)(handler, 7, 0.5);
            (v.restart_component)(handler, K_RESTART_LATENCY_CHANGED);
            (v.base.release)(handler);
        }
        assert_eq!(edits.drain_into_vec(), vec![(7, 0.5)]);
        assert_eq!(flags.load(Ordering::Acquire), K_RESTART_LATENCY_CHANGED);
    }
}
