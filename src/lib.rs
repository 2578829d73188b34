//! VST3 Loader: a VST3 effect that hosts one other VST3 effect, chosen at
//! runtime from a plugin browser, and forwards audio, MIDI, state and its
//! editor to it.

pub mod browser;
pub mod config;
pub mod editor;
pub mod error;
pub mod host;
pub mod plugin;
pub mod vst3;

pub use plugin::{LoaderParams, Vst3Loader};
