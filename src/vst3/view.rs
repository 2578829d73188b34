use std::ffi::{c_char, c_void, CString};
use std::sync::atomic::{fence, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use vst3::Interface;
use vst3::Steinberg::{FUnknown, IPlugFrame};

use super::c_api::*;
use super::module::Vst3Module;
use crate::host::view::{NativeView, ParentHandle};

/// `IPlugFrame` given to the plugin's view. Resize requests are applied to
/// the view right away and remembered so the wrapper's window can follow.
#[repr(C)]
struct PlugFrame {
    vtbl: *const IPlugFrameVtbl,
    ref_count: AtomicU32,
    requested: Mutex<Option<(u32, u32)>>,
}

fn new_plug_frame() -> *mut PlugFrame {
    Box::into_raw(Box::new(PlugFrame {
        vtbl: &PLUG_FRAME_VTBL,
        ref_count: AtomicU32::new(1),
        requested: Mutex::new(None),
    }))
}

unsafe extern "system" fn frame_query_interface(
    this: *mut c_void,
    iid: *const TUID,
    obj: *mut *mut c_void,
) -> TResult {
    if obj.is_null() || iid.is_null() {
        return K_INVALID_ARGUMENT;
    }
    if *iid == FUnknown::IID || *iid == IPlugFrame::IID {
        frame_add_ref(this);
        *obj = this;
        return K_RESULT_OK;
    }
    *obj = std::ptr::null_mut();
    K_NO_INTERFACE
}

unsafe extern "system" fn frame_add_ref(this: *mut c_void) -> u32 {
    let frame = &*(this as *mut PlugFrame);
    frame.ref_count.fetch_add(1, Ordering::Relaxed) + 1
}

unsafe extern "system" fn frame_release(this: *mut c_void) -> u32 {
    let frame = this as *mut PlugFrame;
    let remaining = (*frame).ref_count.fetch_sub(1, Ordering::Release) - 1;
    if remaining == 0 {
        fence(Ordering::Acquire);
        drop(Box::from_raw(frame));
    }
    remaining
}

unsafe extern "system" fn frame_resize_view(
    this: *mut c_void,
    view: *mut c_void,
    new_size: *mut ViewRect,
) -> TResult {
    if view.is_null() || new_size.is_null() {
        return K_INVALID_ARGUMENT;
    }
    let frame = &*(this as *mut PlugFrame);
    let size = (*new_size).size();
    log::debug!("Hosted editor requested {}x{}", size.0, size.1);
    if let Ok(mut requested) = frame.requested.lock() {
        *requested = Some(size);
    }
    (get_vtbl::<IPlugViewVtbl>(view).on_size)(view, new_size);
    K_RESULT_OK
}

static PLUG_FRAME_VTBL: IPlugFrameVtbl = IPlugFrameVtbl {
    base: FUnknownVtbl {
        query_interface: frame_query_interface,
        add_ref: frame_add_ref,
        release: frame_release,
    },
    resize_view: frame_resize_view,
};

/// The hosted plugin's own editor (`IPlugView`).
pub struct Vst3View {
    view: *mut c_void,
    frame: *mut PlugFrame,
    attached: bool,
    _module: Arc<Vst3Module>,
}

unsafe impl Send for Vst3View {}

impl Vst3View {
    /// Asks the controller for its `"editor"` view.
    ///
    /// # Safety
    /// `controller` must be a live `IEditController`.
    pub unsafe fn create(controller: *mut c_void, module: Arc<Vst3Module>) -> Option<Self> {
        if controller.is_null() {
            return None;
        }
        let name = b"editor\0".as_ptr() as *const c_char;
        let view = (get_vtbl::<IEditControllerVtbl>(controller).create_view)(controller, name);
        if view.is_null() {
            return None;
        }
        Some(Self {
            view,
            frame: new_plug_frame(),
            attached: false,
            _module: module,
        })
    }

    fn vtbl(&self) -> &'static IPlugViewVtbl {
        unsafe { get_vtbl::<IPlugViewVtbl>(self.view) }
    }
}

impl NativeView for Vst3View {
    fn size(&self) -> (u32, u32) {
        let mut rect = ViewRect::default();
        let res = unsafe { (self.vtbl().get_size)(self.view, &mut rect) };
        if res == K_RESULT_OK {
            rect.size()
        } else {
            (0, 0)
        }
    }

    fn attach(&mut self, parent: ParentHandle) -> Result<()> {
        if self.attached {
            self.detach();
        }
        let platform = CString::new(parent.platform_type())?;
        let vtbl = self.vtbl();
        unsafe {
            if (vtbl.is_platform_type_supported)(self.view, platform.as_ptr()) != K_RESULT_OK {
                return Err(anyhow!(
                    "Hosted editor does not support {}",
                    parent.platform_type()
                ));
            }
            (vtbl.set_frame)(self.view, self.frame as *mut c_void);
            let res = (vtbl.attached)(self.view, parent.as_ptr(), platform.as_ptr());
            if res != K_RESULT_OK {
                (vtbl.set_frame)(self.view, std::ptr::null_mut());
                return Err(anyhow!("IPlugView::attached failed ({res})"));
            }
        }
        self.attached = true;
        Ok(())
    }

    fn detach(&mut self) {
        if !self.attached {
            return;
        }
        unsafe {
            let vtbl = self.vtbl();
            (vtbl.removed)(self.view);
            (vtbl.set_frame)(self.view, std::ptr::null_mut());
        }
        self.attached = false;
    }

    fn is_attached(&self) -> bool {
        self.attached
    }

    fn take_resize_request(&mut self) -> Option<(u32, u32)> {
        let frame = unsafe { &*self.frame };
        frame.requested.lock().ok().and_then(|mut r| r.take())
    }
}

impl Drop for Vst3View {
    fn drop(&mut self) {
        self.detach();
        unsafe {
            release(self.view);
            frame_release(self.frame as *mut c_void);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_answers_iplugframe_and_counts_references() {
        let frame = new_plug_frame() as *mut c_void;
        unsafe {
            let mut obj = std::ptr::null_mut();
            let res = frame_query_interface(
                frame,
                &IPlugFrame::IID as *const _ as *const TUID,
                &mut obj,
            );
            assert_eq!(res, K_RESULT_OK);
            assert_eq!(frame_release(obj), 1);
            assert_eq!(frame_release(frame), 0);
        }
    }
}
