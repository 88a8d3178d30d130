//! chipbeat — chiptune MML compiler and real-time synthesis engine
//!
//! Compiles a textual music-macro-language (MML) source into per-channel
//! note/event streams and renders them as a 44.1 kHz stereo signal: nine
//! wavetable voices with ADSR, vibrato, octave-arpeggio, pitch glides and
//! ring modulation, plus a noise drum voice, a stereo tap delay, soft-knee
//! compression and an independent sample-effects mixer.
//!
//! Typical embedding:
//!
//! ```no_run
//! use chipbeat::player::{init_engine, get_engine_handle, AudioConfig};
//!
//! chipbeat::logging::init();
//! init_engine(AudioConfig::default()).expect("audio device");
//! let player = get_engine_handle().unwrap();
//! player.load_music("song.mml").unwrap();
//! player.start();
//! ```

pub mod logging;
pub mod mml;
pub mod player;
pub mod sfx;
pub mod synth;

/// Engine sample rate; all timing computations assume it
pub const SAMPLE_RATE: f64 = 44100.0;

pub use mml::{parse, Song};
pub use player::{
    get_engine_handle, init_engine, shutdown_engine, AudioConfig, AudioEngine, PlayerHandle,
    PlayerState,
};
pub use sfx::SfxBank;
