//! The native window a hosted plugin's own editor is attached to.
//!
//! On Windows this is a dedicated child `HWND` inside the DAW's parent
//! window, which is what VST3 editors expect to draw into. Elsewhere the
//! view is attached straight to the parent handle.

use anyhow::Result;

use crate::host::view::ParentHandle;

pub struct EditorContainer {
    handle: ParentHandle,
    owned: bool,
}

impl EditorContainer {
    pub fn create(parent: ParentHandle, width: u32, height: u32) -> Result<Self> {
        match parent {
            #[cfg(windows)]
            ParentHandle::Win32Hwnd(hwnd) => {
                let child = win32::create_container(hwnd, width, height)?;
                log::debug!("Created editor container {:#x} ({}x{})", child, width, height);
                Ok(Self {
                    handle: ParentHandle::Win32Hwnd(child),
                    owned: true,
                })
            }
            _ => {
                let _ = (width, height);
                Ok(Self {
                    handle: parent,
                    owned: false,
                })
            }
        }
    }

    /// Handle to attach the hosted view to.
    pub fn handle(&self) -> ParentHandle {
        self.handle
    }

    pub fn resize(&self, width: u32, height: u32) {
        if self.owned {
            resize_owned(self.handle, width, height);
        }
    }
}

impl Drop for EditorContainer {
    fn drop(&mut self) {
        if self.owned {
            destroy_owned(self.handle);
        }
    }
}

#[cfg(windows)]
fn resize_owned(handle: ParentHandle, width: u32, height: u32) {
    if let ParentHandle::Win32Hwnd(hwnd) = handle {
        win32::resize(hwnd, width, height);
    }
}

#[cfg(not(windows))]
fn resize_owned(_handle: ParentHandle, _width: u32, _height: u32) {}

#[cfg(windows)]
fn destroy_owned(handle: ParentHandle) {
    if let ParentHandle::Win32Hwnd(hwnd) = handle {
        win32::destroy(hwnd);
    }
}

#[cfg(not(windows))]
fn destroy_owned(_handle: ParentHandle) {}

#[cfg(windows)]
mod win32 {
    use anyhow::{anyhow, Result};
    use windows::core::w;
    use windows::Win32::Foundation::{
        GetLastError, ERROR_CLASS_ALREADY_EXISTS, HINSTANCE, HWND, LPARAM, LRESULT, WPARAM,
    };
    use windows::Win32::System::LibraryLoader::GetModuleHandleW;
    use windows::Win32::UI::WindowsAndMessaging::{
        CreateWindowExW, DefWindowProcW, DestroyWindow, GetWindowLongPtrW, RegisterClassExW,
        SetWindowLongPtrW, SetWindowPos, CS_HREDRAW, CS_OWNDC, CS_VREDRAW, GWL_STYLE, HWND_TOP,
        SWP_NOACTIVATE, SWP_NOMOVE, SWP_NOSIZE, WINDOW_EX_STYLE, WM_ERASEBKGND, WNDCLASSEXW,
        WS_CHILD, WS_CLIPCHILDREN, WS_CLIPSIBLINGS, WS_VISIBLE,
    };

    unsafe extern "system" fn wnd_proc(
        hwnd: HWND,
        msg: u32,
        wparam: WPARAM,
        lparam: LPARAM,
    ) -> LRESULT {
        // The plugin paints the whole client area.
        if msg == WM_ERASEBKGND {
            return LRESULT(1);
        }
        unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) }
    }

    fn ensure_class(hinstance: HINSTANCE) -> Result<()> {
        let wc = WNDCLASSEXW {
            cbSize: std::mem::size_of::<WNDCLASSEXW>() as u32,
            style: CS_HREDRAW | CS_VREDRAW | CS_OWNDC,
            lpfnWndProc: Some(wnd_proc),
            cbClsExtra: 0,
            cbWndExtra: 0,
            hInstance: hinstance,
            hIcon: Default::default(),
            hCursor: Default::default(),
            hbrBackground: Default::default(),
            lpszMenuName: w!(""),
            lpszClassName: w!("Vst3LoaderContainer"),
            hIconSm: Default::default(),
        };
        unsafe {
            if RegisterClassExW(&wc) == 0 {
                let err = GetLastError();
                if err != ERROR_CLASS_ALREADY_EXISTS {
                    return Err(anyhow!("RegisterClassExW failed: {err:?}"));
                }
            }
        }
        Ok(())
    }

    pub fn create_container(parent: usize, width: u32, height: u32) -> Result<usize> {
        let parent = HWND(parent as *mut _);
        unsafe {
            let hinstance = GetModuleHandleW(None)
                .map(|m| HINSTANCE(m.0))
                .map_err(|e| anyhow!("GetModuleHandleW: {e:?}"))?;
            ensure_class(hinstance)?;

            let style = GetWindowLongPtrW(parent, GWL_STYLE) as u32;
            let clipped = style | WS_CLIPCHILDREN.0 | WS_CLIPSIBLINGS.0;
            if style != clipped {
                SetWindowLongPtrW(parent, GWL_STYLE, clipped as isize);
            }

            let hwnd = CreateWindowExW(
                WINDOW_EX_STYLE(0),
                w!("Vst3LoaderContainer"),
                w!(""),
                WS_CHILD | WS_VISIBLE | WS_CLIPCHILDREN | WS_CLIPSIBLINGS,
                0,
                0,
                width as i32,
                height as i32,
                Some(parent),
                None,
                Some(hinstance),
                None,
            )
            .map_err(|e| anyhow!("CreateWindowExW: {e:?}"))?;
            if hwnd.0.is_null() {
                return Err(anyhow!("Failed to create editor container window"));
            }
            let _ = SetWindowPos(
                hwnd,
                Some(HWND_TOP),
                0,
                0,
                0,
                0,
                SWP_NOMOVE | SWP_NOSIZE | SWP_NOACTIVATE,
            );
            Ok(hwnd.0 as usize)
        }
    }

    pub fn resize(hwnd: usize, width: u32, height: u32) {
        unsafe {
            let _ = SetWindowPos(
                HWND(hwnd as *mut _),
                Some(HWND_TOP),
                0,
                0,
                width as i32,
                height as i32,
                SWP_NOMOVE | SWP_NOACTIVATE,
            );
        }
    }

    pub fn destroy(hwnd: usize) {
        unsafe {
            let _ = DestroyWindow(HWND(hwnd as *mut _));
        }
    }
}
