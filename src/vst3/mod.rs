//! Hosting of VST3 plugins over the raw COM-style ABI.

pub mod bundle;
pub mod c_api;
pub mod events;
pub mod format;
pub mod host_context;
pub mod instance;
pub mod message;
pub mod module;
pub mod params;
pub mod stream;
pub mod view;

pub use format::Vst3Format;
pub use module::{ClassInfo, Vst3Module};
