//! Host-side `IMessage` and `IAttributeList` objects. Plugins with a separate
//! controller ask the host for these to talk to their processor through
//! `IConnectionPoint::notify`.

use std::collections::HashMap;
use std::ffi::{c_char, c_void, CStr};
use std::sync::atomic::{fence, AtomicU32, Ordering};
use std::sync::Mutex;

use vst3::Interface;
use vst3::Steinberg::FUnknown;
use vst3::Steinberg::Vst::{IAttributeList, IMessage};

use super::c_api::*;

#[derive(Debug, Clone, PartialEq)]
enum AttrValue {
    Int(i64),
    Float(f64),
    String(Vec<u16>),
    Binary(Vec<u8>),
}

#[repr(C)]
struct AttributeList {
    vtbl: *const IAttributeListVtbl,
    ref_count: AtomicU32,
    values: Mutex<HashMap<String, AttrValue>>,
}

#[repr(C)]
struct Message {
    vtbl: *const IMessageVtbl,
    ref_count: AtomicU32,
    id: Mutex<Option<Vec<u8>>>,
    attributes: *mut c_void,
}

/// A new attribute list with one reference owned by the caller.
pub fn new_attribute_list() -> *mut c_void {
    Box::into_raw(Box::new(AttributeList {
        vtbl: &ATTRIBUTE_LIST_VTBL,
        ref_count: AtomicU32::new(1),
        values: Mutex::new(HashMap::new()),
    })) as *mut c_void
}

/// A new message with one reference owned by the caller.
pub fn new_message() -> *mut c_void {
    Box::into_raw(Box::new(Message {
        vtbl: &MESSAGE_VTBL,
        ref_count: AtomicU32::new(1),
        id: Mutex::new(None),
        attributes: new_attribute_list(),
    })) as *mut c_void
}

unsafe fn attr_key(id: AttrId) -> Option<String> {
    (!id.is_null()).then(|| CStr::from_ptr(id).to_string_lossy().into_owned())
}

unsafe fn with_values<R>(
    this: *mut c_void,
    f: impl FnOnce(&mut HashMap<String, AttrValue>) -> R,
) -> R {
    let list = &*(this as *mut AttributeList);
    let mut values = match list.values.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    f(&mut values)
}

unsafe fn store(this: *mut c_void, id: AttrId, value: AttrValue) -> TResult {
    let Some(key) = attr_key(id) else {
        return K_INVALID_ARGUMENT;
    };
    with_values(this, |values| values.insert(key, value));
    K_RESULT_OK
}

unsafe extern "system" fn attr_query_interface(
    this: *mut c_void,
    iid: *const TUID,
    obj: *mut *mut c_void,
) -> TResult {
    if obj.is_null() || iid.is_null() {
        return K_INVALID_ARGUMENT;
    }
    if *iid == FUnknown::IID || *iid == IAttributeList::IID {
        attr_add_ref(this);
        *obj = this;
        return K_RESULT_OK;
    }
    *obj = std::ptr::null_mut();
    K_NO_INTERFACE
}

unsafe extern "system" fn attr_add_ref(this: *mut c_void) -> u32 {
    let list = &*(this as *mut AttributeList);
    list.ref_count.fetch_add(1, Ordering::Relaxed) + 1
}

unsafe extern "system" fn attr_release(this: *mut c_void) -> u32 {
    let list = this as *mut AttributeList;
    let remaining = (*list).ref_count.fetch_sub(1, Ordering::Release) - 1;
    if remaining == 0 {
        fence(Ordering::Acquire);
        drop(Box::from_raw(list));
    }
    remaining
}

unsafe extern "system" fn attr_set_int(this: *mut c_void, id: AttrId, value: i64) -> TResult {
    store(this, id, AttrValue::Int(value))
}

unsafe extern "system" fn attr_get_int(this: *mut c_void, id: AttrId, value: *mut i64) -> TResult {
    let Some(key) = attr_key(id).filter(|_| !value.is_null()) else {
        return K_INVALID_ARGUMENT;
    };
    match with_values(this, |values| values.get(&key).cloned()) {
        Some(AttrValue::Int(v)) => {
            *value = v;
            K_RESULT_OK
        }
        _ => K_RESULT_FALSE,
    }
}

unsafe extern "system" fn attr_set_float(this: *mut c_void, id: AttrId, value: f64) -> TResult {
    store(this, id, AttrValue::Float(value))
}

unsafe extern "system" fn attr_get_float(this: *mut c_void, id: AttrId, value: *mut f64) -> TResult {
    let Some(key) = attr_key(id).filter(|_| !value.is_null()) else {
        return K_INVALID_ARGUMENT;
    };
    match with_values(this, |values| values.get(&key).cloned()) {
        Some(AttrValue::Float(v)) => {
            *value = v;
            K_RESULT_OK
        }
        _ => K_RESULT_FALSE,
    }
}

unsafe extern "system" fn attr_set_string(
    this: *mut c_void,
    id: AttrId,
    string: *const u16,
) -> TResult {
    let mut chars = Vec::new();
    if !string.is_null() {
        let mut i = 0;
        while *string.add(i) != 0 {
            chars.push(*string.add(i));
            i += 1;
        }
    }
    store(this, id, AttrValue::String(chars))
}

unsafe extern "system" fn attr_get_string(
    this: *mut c_void,
    id: AttrId,
    string: *mut u16,
    size_in_bytes: u32,
) -> TResult {
    let capacity = (size_in_bytes as usize / 2).saturating_sub(1);
    let Some(key) = attr_key(id).filter(|_| !string.is_null() && size_in_bytes >= 2) else {
        return K_INVALID_ARGUMENT;
    };
    match with_values(this, |values| values.get(&key).cloned()) {
        Some(AttrValue::String(chars)) => {
            let n = chars.len().min(capacity);
            std::ptr::copy_nonoverlapping(chars.as_ptr(), string, n);
            *string.add(n) = 0;
            K_RESULT_OK
        }
        _ => {
            *string = 0;
            K_RESULT_FALSE
        }
    }
}

unsafe extern "system" fn attr_set_binary(
    this: *mut c_void,
    id: AttrId,
    data: *const c_void,
    size_in_bytes: u32,
) -> TResult {
    let bytes = if data.is_null() || size_in_bytes == 0 {
        Vec::new()
    } else {
        std::slice::from_raw_parts(data as *const u8, size_in_bytes as usize).to_vec()
    };
    store(this, id, AttrValue::Binary(bytes))
}

unsafe extern "system" fn attr_get_binary(
    this: *mut c_void,
    id: AttrId,
    data: *mut *const c_void,
    size_in_bytes: *mut u32,
) -> TResult {
    if data.is_null() || size_in_bytes.is_null() {
        return K_INVALID_ARGUMENT;
    }
    *data = std::ptr::null();
    *size_in_bytes = 0;
    let Some(key) = attr_key(id) else {
        return K_INVALID_ARGUMENT;
    };
    // The pointer handed out stays valid until the key is overwritten or the
    // list is released.
    with_values(this, |values| match values.get(&key) {
        Some(AttrValue::Binary(bytes)) => {
            *data = bytes.as_ptr() as *const c_void;
            *size_in_bytes = bytes.len() as u32;
            K_RESULT_OK
        }
        _ => K_RESULT_FALSE,
    })
}

static ATTRIBUTE_LIST_VTBL: IAttributeListVtbl = IAttributeListVtbl {
    base: FUnknownVtbl {
        query_interface: attr_query_interface,
        add_ref: attr_add_ref,
        release: attr_release,
    },
    set_int: attr_set_int,
    get_int: attr_get_int,
    set_float: attr_set_float,
    get_float: attr_get_float,
    set_string: attr_set_string,
    get_string: attr_get_string,
    set_binary: attr_set_binary,
    get_binary: attr_get_binary,
};

unsafe extern "system" fn msg_query_interface(
    this: *mut c_void,
    iid: *const TUID,
    obj: *mut *mut c_void,
) -> TResult {
    if obj.is_null() || iid.is_null() {
        return K_INVALID_ARGUMENT;
    }
    if *iid == FUnknown::IID || *iid == IMessage::IID {
        msg_add_ref(this);
        *obj = this;
        return K_RESULT_OK;
    }
    *obj = std::ptr::null_mut();
    K_NO_INTERFACE
}

unsafe extern "system" fn msg_add_ref(this: *mut c_void) -> u32 {
    let msg = &*(this as *mut Message);
    msg.ref_count.fetch_add(1, Ordering::Relaxed) + 1
}

unsafe extern "system" fn msg_release(this: *mut c_void) -> u32 {
    let msg = this as *mut Message;
    let remaining = (*msg).ref_count.fetch_sub(1, Ordering::Release) - 1;
    if remaining == 0 {
        fence(Ordering::Acquire);
        attr_release((*msg).attributes);
        drop(Box::from_raw(msg));
    }
    remaining
}

unsafe extern "system" fn msg_get_message_id(this: *mut c_void) -> *const c_char {
    let msg = &*(this as *mut Message);
    match msg.id.lock() {
        Ok(id) => id
            .as_ref()
            .map_or(std::ptr::null(), |bytes| bytes.as_ptr() as *const c_char),
        Err(_) => std::ptr::null(),
    }
}

unsafe extern "system" fn msg_set_message_id(this: *mut c_void, id: *const c_char) {
    let msg = &*(this as *mut Message);
    let bytes = (!id.is_null()).then(|| CStr::from_ptr(id).to_bytes_with_nul().to_vec());
    if let Ok(mut slot) = msg.id.lock() {
        *slot = bytes;
    }
}

unsafe extern "system" fn msg_get_attributes(this: *mut c_void) -> *mut c_void {
    // Borrowed reference, as IMessage::getAttributes does not transfer
    // ownership.
    (*(this as *mut Message)).attributes
}

static MESSAGE_VTBL: IMessageVtbl = IMessageVtbl {
    base: FUnknownVtbl {
        query_interface: msg_query_interface,
        add_ref: msg_add_ref,
        release: msg_release,
    },
    get_message_id: msg_get_message_id,
    set_message_id: msg_set_message_id,
    get_attributes: msg_get_attributes,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn attribute_list_stores_typed_values() {
        let list = new_attribute_list();
        unsafe {
            let v = get_vtbl::<IAttributeListVtbl>(list);
            let key = CString::new("gain").unwrap();
            assert_eq!((v.set_float)(list, key.as_ptr(), 0.25), K_RESULT_OK);

            let mut out = 0.0;
            assert_eq!((v.get_float)(list, key.as_ptr(), &mut out), K_RESULT_OK);
            assert_eq!(out, 0.25);

            let mut wrong = 0i64;
            assert_eq!((v.get_int)(list, key.as_ptr(), &mut wrong), K_RESULT_FALSE);

            let text: Vec<u16> = "abc".encode_utf16().chain(Some(0)).collect();
            (v.set_string)(list, key.as_ptr(), text.as_ptr());
            let mut buf = [0u16; 3];
            (v.get_string)(list, key.as_ptr(), buf.as_mut_ptr(), 6);
            assert_eq!(&buf, &['a' as u16, 'b' as u16, 0]);

            assert_eq!((v.base.release)(list), 0);
        }
    }

    #[test]
    fn message_keeps_its_id() {
        let msg = new_message();
        unsafe {
            let v = get_vtbl::<IMessageVtbl>(msg);
            let id = CString::new("Meter").unwrap();
            (v.set_message_id)(msg, id.as_ptr());
            assert_eq!(CStr::from_ptr((v.get_message_id)(msg)), id.as_c_str());
            assert!(!(v.get_attributes)(msg).is_null());
            assert_eq!((v.base.release)(msg), 0);
        }
    }
}
