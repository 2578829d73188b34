pub mod broadcast;
pub mod buffer;
pub mod dispatch;
pub mod format;
pub mod midi;
pub mod processor;
pub mod state;
pub mod view;

pub use broadcast::ProcessorEvent;
pub use format::{AudioPluginFormat, FormatManager, PluginDescription, PluginInstance};
pub use processor::{HostProcessor, InstanceLease, PlaybackConfig};
pub use view::{HostedEditor, NativeView, ParentHandle};
