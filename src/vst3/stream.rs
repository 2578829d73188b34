use std::ffi::c_void;
use std::sync::atomic::{AtomicU32, Ordering};

use vst3::Interface;
use vst3::Steinberg::{FUnknown, IBStream};

use super::c_api::*;

/// Growable in-memory `IBStream` used for component and controller state.
///
/// Lives on the host's stack for the duration of one call; plugins that keep
/// an extra reference past the call are not supported.
#[repr(C)]
pub struct MemoryStream {
    vtbl: *const IBStreamVtbl,
    ref_count: AtomicU32,
    data: Vec<u8>,
    cursor: usize,
}

impl MemoryStream {
    pub fn new() -> Self {
        Self::from_bytes(Vec::new())
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            vtbl: &MEMORY_STREAM_VTBL,
            ref_count: AtomicU32::new(1),
            data,
            cursor: 0,
        }
    }

    pub fn as_ptr(&mut self) -> *mut c_void {
        self as *mut Self as *mut c_void
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

impl Default for MemoryStream {
    fn default() -> Self {
        Self::new()
    }
}

unsafe fn stream<'a>(this: *mut c_void) -> &'a mut MemoryStream {
    &mut *(this as *mut MemoryStream)
}

unsafe extern "system" fn stream_query_interface(
    this: *mut c_void,
    iid: *const TUID,
    obj: *mut *mut c_void,
) -> TResult {
    if obj.is_null() || iid.is_null() {
        return K_INVALID_ARGUMENT;
    }
    if *iid == FUnknown::IID || *iid == IBStream::IID {
        stream_add_ref(this);
        *obj = this;
        return K_RESULT_OK;
    }
    *obj = std::ptr::null_mut();
    K_NO_INTERFACE
}

unsafe extern "system" fn stream_add_ref(this: *mut c_void) -> u32 {
    stream(this).ref_count.fetch_add(1, Ordering::Relaxed) + 1
}

unsafe extern "system" fn stream_release(this: *mut c_void) -> u32 {
    stream(this)
        .ref_count
        .fetch_sub(1, Ordering::Relaxed)
        .saturating_sub(1)
}

unsafe extern "system" fn stream_read(
    this: *mut c_void,
    buffer: *mut c_void,
    num_bytes: i32,
    num_bytes_read: *mut i32,
) -> TResult {
    let stream = stream(this);
    if num_bytes < 0 || (buffer.is_null() && num_bytes > 0) {
        return K_INVALID_ARGUMENT;
    }
    let available = stream.data.len().saturating_sub(stream.cursor);
    let to_read = available.min(num_bytes as usize);
    if to_read > 0 {
        std::ptr::copy_nonoverlapping(
            stream.data.as_ptr().add(stream.cursor),
            buffer as *mut u8,
            to_read,
        );
        stream.cursor += to_read;
    }
    if !num_bytes_read.is_null() {
        *num_bytes_read = to_read as i32;
    }
    K_RESULT_OK
}

unsafe extern "system" fn stream_write(
    this: *mut c_void,
    buffer: *const c_void,
    num_bytes: i32,
    num_bytes_written: *mut i32,
) -> TResult {
    let stream = stream(this);
    if num_bytes < 0 || (buffer.is_null() && num_bytes > 0) {
        return K_INVALID_ARGUMENT;
    }
    let len = num_bytes as usize;
    if len > 0 {
        let bytes = std::slice::from_raw_parts(buffer as *const u8, len);
        let end = stream.cursor + len;
        if end > stream.data.len() {
            stream.data.resize(end, 0);
        }
        stream.data[stream.cursor..end].copy_from_slice(bytes);
        stream.cursor = end;
    }
    if !num_bytes_written.is_null() {
        *num_bytes_written = num_bytes;
    }
    K_RESULT_OK
}

unsafe extern "system" fn stream_seek(
    this: *mut c_void,
    pos: i64,
    mode: i32,
    result_pos: *mut i64,
) -> TResult {
    let stream = stream(this);
    let new_pos = match mode {
        K_IB_SEEK_SET => pos,
        K_IB_SEEK_CUR => stream.cursor as i64 + pos,
        K_IB_SEEK_END => stream.data.len() as i64 + pos,
        _ => return K_INVALID_ARGUMENT,
    };
    if new_pos < 0 {
        return K_INVALID_ARGUMENT;
    }
    stream.cursor = new_pos as usize;
    if !result_pos.is_null() {
        *result_pos = new_pos;
    }
    K_RESULT_OK
}

unsafe extern "system" fn stream_tell(this: *mut c_void, pos: *mut i64) -> TResult {
    if pos.is_null() {
        return K_INVALID_ARGUMENT;
    }
    *pos = stream(this).cursor as i64;
    K_RESULT_OK
}

static MEMORY_STREAM_VTBL: IBStreamVtbl = IBStreamVtbl {
    base: FUnknownVtbl {
        query_interface: stream_query_interface,
        add_ref: stream_add_ref,
        release: stream_release,
    },
    read: stream_read,
    write: stream_write,
    seek: stream_seek,
    tell: stream_tell,
};

#[cfg(test)]
mod tests {
    use super::*;

    unsafe fn vtbl(stream: &mut MemoryStream) -> &'static IBStreamVtbl {
        get_vtbl::<IBStreamVtbl>(stream.as_ptr())
    }

    #[test]
    fn write_seek_read() {
        let mut stream = MemoryStream::new();
        unsafe {
            let v = vtbl(&mut stream);
            let payload = *b"hello world";
            let mut written = 0;
            (v.write)(
                stream.as_ptr(),
                payload.as_ptr() as *const c_void,
                payload.len() as i32,
                &mut written,
            );
            assert_eq!(written, 11);

            let mut pos = 0;
            (v.seek)(stream.as_ptr(), 6, K_IB_SEEK_SET, &mut pos);
            assert_eq!(pos, 6);

            let mut out = [0u8; 16];
            let mut read = 0;
            (v.read)(
                stream.as_ptr(),
                out.as_mut_ptr() as *mut c_void,
                16,
                &mut read,
            );
            assert_eq!(&out[..read as usize], b"world");

            assert_eq!(
                (v.seek)(stream.as_ptr(), -1, K_IB_SEEK_SET, std::ptr::null_mut()),
                K_INVALID_ARGUMENT
            );
        }
        assert_eq!(stream.into_bytes(), b"hello world");
    }

    #[test]
    fn seeking_past_end_then_writing_zero_fills() {
        let mut stream = MemoryStream::from_bytes(vec![1, 2]);
        unsafe {
            let v = vtbl(&mut stream);
            (v.seek)(stream.as_ptr(), 2, K_IB_SEEK_END, std::ptr::null_mut());
            let byte = [9u8];
            (v.write)(
                stream.as_ptr(),
                byte.as_ptr() as *const c_void,
                1,
                std::ptr::null_mut(),
            );
        }
        assert_eq!(stream.bytes(), &[1, 2, 0, 0, 9]);
    }

    #[test]
    fn query_interface_answers_ibstream() {
        let mut stream = MemoryStream::new();
        unsafe {
            let mut obj = std::ptr::null_mut();
            let res = (vtbl(&mut stream).base.query_interface)(
                stream.as_ptr(),
                &IBStream::IID as *const _ as *const TUID,
                &mut obj,
            );
            assert_eq!(res, K_RESULT_OK);
            assert_eq!(obj, stream.as_ptr());
        }
    }
}
