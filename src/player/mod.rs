//! Player: scheduler, mixer and the real-time audio engine
//!
//! The [`Sequencer`] walks compiled note/event streams and mixes the
//! voices; [`engine`] wraps it in a cpal output stream with a thread-safe
//! control handle.

pub mod commands;
pub mod device;
pub mod engine;
pub mod sequencer;

pub use device::{list_output_devices, AudioConfig, AudioDeviceInfo};
pub use engine::{
    get_engine_handle, init_engine, shutdown_engine, AudioEngine, PlayerHandle, PlayerState,
};
pub use sequencer::Sequencer;
