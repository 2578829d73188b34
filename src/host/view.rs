use std::ffi::c_void;
use std::fmt;
use std::sync::Arc;

/// The native window the DAW handed to the wrapper's editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentHandle {
    Win32Hwnd(usize),
    AppKitNsView(usize),
    X11Window(u32),
}

impl ParentHandle {
    /// Platform type string an `IPlugView` expects for this handle.
    pub fn platform_type(&self) -> &'static str {
        match self {
            ParentHandle::Win32Hwnd(_) => "HWND",
            ParentHandle::AppKitNsView(_) => "NSView",
            ParentHandle::X11Window(_) => "X11EmbedWindowID",
        }
    }

    pub fn as_ptr(&self) -> *mut c_void {
        match *self {
            ParentHandle::Win32Hwnd(h) | ParentHandle::AppKitNsView(h) => h as *mut c_void,
            ParentHandle::X11Window(id) => id as usize as *mut c_void,
        }
    }
}

/// A hosted plugin's own editor window.
pub trait NativeView: Send {
    fn size(&self) -> (u32, u32);
    fn attach(&mut self, parent: ParentHandle) -> anyhow::Result<()>;
    fn detach(&mut self);
    fn is_attached(&self) -> bool;
    /// A size the plugin asked for since the last call, if any.
    fn take_resize_request(&mut self) -> Option<(u32, u32)>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterInfo {
    pub id: u32,
    pub title: String,
    pub units: String,
    pub step_count: i32,
    pub default_normalized: f64,
    pub read_only: bool,
    pub hidden: bool,
    pub bypass: bool,
}

/// Live access to a hosted plugin's parameters, usable from the GUI thread
/// while the audio thread processes.
pub trait ParameterAccess: Send + Sync {
    fn parameters(&self) -> Vec<ParameterInfo>;
    fn normalized(&self, id: u32) -> f64;
    /// One complete edit gesture.
    fn set_normalized(&self, id: u32, value: f64);
    fn display_value(&self, id: u32, value: f64) -> String;
}

/// Fallback editor listing every visible parameter.
pub struct GenericEditor {
    access: Arc<dyn ParameterAccess>,
    parameters: Vec<ParameterInfo>,
}

impl GenericEditor {
    pub const WIDTH: u32 = 650;
    pub const ROW_HEIGHT: u32 = 28;
    const MIN_HEIGHT: u32 = 2 * Self::ROW_HEIGHT;
    const MAX_HEIGHT: u32 = 600;

    pub fn new(access: Arc<dyn ParameterAccess>) -> Self {
        let parameters = access
            .parameters()
            .into_iter()
            .filter(|p| !p.hidden)
            .collect();
        Self { access, parameters }
    }

    pub fn parameters(&self) -> &[ParameterInfo] {
        &self.parameters
    }

    pub fn access(&self) -> &Arc<dyn ParameterAccess> {
        &self.access
    }

    pub fn size(&self) -> (u32, u32) {
        let rows = self.parameters.len() as u32 * Self::ROW_HEIGHT;
        (Self::WIDTH, rows.clamp(Self::MIN_HEIGHT, Self::MAX_HEIGHT))
    }
}

/// Whatever the editor shows in place of the browser while a plugin is hosted.
pub enum HostedEditor {
    Native(Box<dyn NativeView>),
    Generic(GenericEditor),
}

impl HostedEditor {
    pub fn size(&self) -> (u32, u32) {
        match self {
            HostedEditor::Native(view) => view.size(),
            HostedEditor::Generic(editor) => editor.size(),
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, HostedEditor::Native(_))
    }
}

impl fmt::Debug for HostedEditor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostedEditor::Native(view) => f
                .debug_struct("Native")
                .field("size", &view.size())
                .finish(),
            HostedEditor::Generic(editor) => f
                .debug_struct("Generic")
                .field("parameters", &editor.parameters.len())
                .finish(),
        }
    }
}

impl Drop for HostedEditor {
    fn drop(&mut self) {
        if let HostedEditor::Native(view) = self {
            if view.is_attached() {
                view.detach();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<ParameterInfo>);

    impl ParameterAccess for Fixed {
        fn parameters(&self) -> Vec<ParameterInfo> {
            self.0.clone()
        }
        fn normalized(&self, _id: u32) -> f64 {
            0.0
        }
        fn set_normalized(&self, _id: u32, _value: f64) {}
        fn display_value(&self, _id: u32, value: f64) -> String {
            format!("{value:.2}")
        }
    }

    fn param(id: u32, hidden: bool) -> ParameterInfo {
        ParameterInfo {
            id,
            title: format!("P{id}"),
            units: String::new(),
            step_count: 0,
            default_normalized: 0.5,
            read_only: false,
            hidden,
            bypass: false,
        }
    }

    #[test]
    fn generic_editor_hides_hidden_parameters_and_clamps_height() {
        let editor = GenericEditor::new(Arc::new(Fixed(vec![param(1, false), param(2, true)])));
        assert_eq!(editor.parameters().len(), 1);
        assert_eq!(editor.size(), (650, 56));

        let many = (0..100).map(|i| param(i, false)).collect();
        let editor = GenericEditor::new(Arc::new(Fixed(many)));
        assert_eq!(editor.size(), (650, 600));
    }

    #[test]
    fn platform_types() {
        assert_eq!(ParentHandle::Win32Hwnd(1).platform_type(), "HWND");
        assert_eq!(ParentHandle::AppKitNsView(1).platform_type(), "NSView");
        assert_eq!(ParentHandle::X11Window(7).as_ptr() as usize, 7);
    }
}
