//! MML compiler
//!
//! Turns a textual music-macro-language source into per-channel note and
//! event streams plus the global song settings. Sections are introduced by
//! `@1`..`@9` (melodic channels), `@d` (drums) and `@g` (globals).

pub mod parser;
pub mod song;
pub mod source;

pub use parser::{parse, Timing};
pub use song::{
    ChannelTrack, DelayParams, DrumEventKind, DrumNote, DrumTrack, DrumTrackEvent, EventKind,
    MelodicNote, Pitch, Song, SongSettings, TrackEvent, NUM_CHANNELS,
};
