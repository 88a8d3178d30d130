//! Parsed song data model: note streams, event streams, global settings

use crate::synth::drum::{DrumKind, NoiseKind};

/// Number of melodic channels
pub const NUM_CHANNELS: usize = 9;

/// What a melodic note sounds: a pitch in Hz, or silence
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pitch {
    Tone(f64),
    Rest,
}

/// One melodic note with its length in frames
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MelodicNote {
    pub pitch: Pitch,
    pub frames: u32,
}

/// One drum note; `None` is a rest
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrumNote {
    pub kind: Option<DrumKind>,
    pub frames: u32,
}

/// Parameter change on a melodic channel, scheduled at an absolute frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackEvent {
    pub frame: u64,
    pub kind: EventKind,
}

/// Parameter change on the drum channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrumTrackEvent {
    pub frame: u64,
    pub kind: DrumEventKind,
}

/// Melodic channel event taxonomy
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventKind {
    /// `V<1..10>`: gain = value/20
    Volume(u32),
    /// `^`: gain += 0.05, capped at 0.5
    VolumeUp,
    /// `_`: gain -= 0.05, floored at 0.001
    VolumeDown,
    /// `WAVEFORM=<0..99>`
    Waveform(u32),
    /// `WAVEFLIP`: invert the table vertically
    WaveFlip,
    /// Envelope times in ms
    AttackTime(u32),
    PeakTime(u32),
    DecayTime(u32),
    ReleaseTime(u32),
    /// Envelope levels in percent
    PeakLevel(u32),
    SustainLevel(u32),
    LfoOn,
    LfoOff,
    /// Cents
    LfoRange(u32),
    /// Hz
    LfoSpeed(u32),
    /// Milliseconds
    LfoWait(u32),
    /// Cycles per second
    AstroOn(u32),
    AstroOff,
    /// `,`: start the pitch fall now
    FallStart,
    /// Cents per second
    FallSpeed(u32),
    /// Milliseconds
    FallWait(u32),
    /// `*`: start the pitch rise now
    RiseStart,
    RiseSpeed(u32),
    RiseRange(u32),
    /// 0 disables; otherwise factor = 1 + 3·value/100
    BeefUp(u32),
    /// Modulator channel index (0-based)
    RingModOn(usize),
    RingModOff,
    DefaultTone,
    PresetBeep,
    PresetPoppy,
    PresetPoppyVib,
    PresetBell,
}

/// Drum channel event taxonomy
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DrumEventKind {
    Volume(u32),
    VolumeUp,
    VolumeDown,
    ResetDrums,
    /// Percent of the tunable range
    KickPitch(u32),
    SnarePitch(u32),
    HiHatPitch(u32),
    /// 0 disables; otherwise factor = 1 + 1.6·value/100
    BeefUp(u32),
    WhiteNoise,
    PinkNoise,
    KickNoise(NoiseKind),
    SnareNoise(NoiseKind),
    HiHatNoise(NoiseKind),
    /// Milliseconds
    KickLength(u32),
    SnareLength(u32),
    HiHatLength(u32),
    /// Percent
    SquareLevel(u32),
    NoiseLevel(u32),
}

/// One melodic channel's compiled streams
#[derive(Debug, Clone, Default)]
pub struct ChannelTrack {
    pub notes: Vec<MelodicNote>,
    pub events: Vec<TrackEvent>,
    pub total_frames: u64,
}

/// The drum channel's compiled streams
#[derive(Debug, Clone, Default)]
pub struct DrumTrack {
    pub notes: Vec<DrumNote>,
    pub events: Vec<DrumTrackEvent>,
    pub total_frames: u64,
}

/// Tap-delay configuration for one stereo side
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayParams {
    pub first_ms: u32,
    pub echo_ms: u32,
    pub gain: f32,
}

/// Global settings collected from the `@g` section
#[derive(Debug, Clone, PartialEq)]
pub struct SongSettings {
    pub tempo: f64,
    pub loop_enabled: bool,
    pub repeats: u32,
    pub delay_enabled: bool,
    pub delay_left: DelayParams,
    pub delay_right: DelayParams,
    pub master_gain: f32,
    pub channel_gains: [f32; NUM_CHANNELS],
    pub drum_gain: f32,
}

impl Default for SongSettings {
    fn default() -> Self {
        Self {
            tempo: 120.0,
            loop_enabled: true,
            repeats: 1,
            delay_enabled: true,
            delay_left: DelayParams { first_ms: 500, echo_ms: 500, gain: 0.20 },
            delay_right: DelayParams { first_ms: 750, echo_ms: 500, gain: 0.20 },
            master_gain: 0.7,
            channel_gains: [0.5; NUM_CHANNELS],
            drum_gain: 0.5,
        }
    }
}

/// A fully compiled song: all channel streams plus the global settings
#[derive(Debug, Clone)]
pub struct Song {
    pub tracks: Vec<ChannelTrack>,
    pub drums: DrumTrack,
    pub settings: SongSettings,
    /// Frame offset recorded by the furthest `%%` marker
    pub bookmark: u64,
}

impl Default for Song {
    fn default() -> Self {
        Self::empty()
    }
}

impl Song {
    pub fn empty() -> Self {
        Self {
            tracks: vec![ChannelTrack::default(); NUM_CHANNELS],
            drums: DrumTrack::default(),
            settings: SongSettings::default(),
            bookmark: 0,
        }
    }

    /// Longest stream length in frames (end of the last note)
    pub fn last_frame_pure(&self) -> u64 {
        let mut max = self.drums.total_frames;
        for track in &self.tracks {
            max = max.max(track.total_frames);
        }
        max
    }
}
