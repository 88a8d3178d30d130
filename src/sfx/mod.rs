//! Sample-effects mixer
//!
//! A fixed bank of 16 PCM clips decoded from disk, each with its own
//! gain, panning and transport. The bank's summed output is mixed on top
//! of the music and keeps playing while the music is paused.

pub mod bank;
pub mod sample;

pub use bank::{SfxBank, SfxSlots, SFX_SLOTS};
pub use sample::SfxClip;
