//! MML parsers: global directives, melodic channels, the drum channel
//!
//! Parsing is single-pass over the stripped section text. Repeat blocks
//! are expanded textually first so that every event carries an absolute
//! frame position. Configuration tags are matched longest-first at each
//! cursor position, which keeps tag text from being misread as note
//! letters.

use crate::mml::song::{
    ChannelTrack, DrumEventKind, DrumNote, DrumTrack, DrumTrackEvent, EventKind, MelodicNote,
    Pitch, Song, SongSettings, TrackEvent, NUM_CHANNELS,
};
use crate::mml::source;
use crate::synth::drum::{DrumKind, NoiseKind};
use crate::SAMPLE_RATE;

/// Maximum nesting of `{}` repeat blocks
const MAX_REPEAT_DEPTH: usize = 16;

/// Cap on a channel's textually expanded source
const MAX_EXPANDED_LEN: usize = 1 << 20;

/// Frame lengths derived from the tempo.
///
/// The measure is rounded to whole frames and every note length divides it,
/// so a quarter note at tempo 120 is exactly 22050 frames.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// Frames in a measure (32 base-32nd units)
    pub measure: u32,
}

impl Timing {
    pub fn new(tempo: f64) -> Self {
        Self {
            measure: (SAMPLE_RATE * 7.5 * 32.0 / tempo).round() as u32,
        }
    }

    /// Frames in a 32nd note
    pub fn base(&self) -> u32 {
        self.measure / 32
    }

    /// Default note length: a 16th note
    pub fn default_note_len(&self) -> u32 {
        self.measure / 16
    }

    /// Frames in a quarter note
    pub fn quarter(&self) -> u32 {
        self.measure / 4
    }
}

/// Frequency of tone number `t` (semitone index + 12·octave)
pub fn note_frequency(tone: i32) -> f64 {
    let semitone_ratio = 2f64.powf(1.0 / 12.0);
    let middle_c = 220.0 * semitone_ratio.powi(3);
    let c_zero = middle_c * 0.5f64.powi(4);
    c_zero * semitone_ratio.powi(tone)
}

fn semitone_for_letter(letter: u8) -> i32 {
    match letter {
        b'C' => 0,
        b'D' => 2,
        b'E' => 4,
        b'F' => 5,
        b'G' => 7,
        b'A' => 9,
        b'B' => 11,
        _ => 0,
    }
}

/// Read up to `max_digits` consecutive ASCII digits at `pos`; any further
/// digits are counted as consumed but ignored, matching the documented
/// digit widths of each tag.
fn read_number(bytes: &[u8], pos: usize, max_digits: usize) -> (u32, usize) {
    let mut value: u32 = 0;
    let mut used = 0;
    let mut i = pos;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        if used < max_digits {
            value = value.saturating_mul(10) + (bytes[i] - b'0') as u32;
        }
        used += 1;
        i += 1;
    }
    (value, i - pos)
}

// ---------------------------------------------------------------------------
// Repeat expansion
// ---------------------------------------------------------------------------

/// Expand `{N ...}` repeat blocks in place.
///
/// A digit right after `{` sets the count (0 is treated as 1, default 2);
/// blocks nest via a stack of open positions. Unmatched `}` is ignored;
/// unmatched `{` is closed implicitly at end of input. Expansion is bounded
/// by a nesting-depth and total-size cap.
pub fn expand_repeats(src: &str) -> String {
    let bytes = src.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut stack: Vec<(usize, u32)> = Vec::new();
    let mut i = 0;

    let close = |out: &mut Vec<u8>, start: usize, count: u32| {
        let copies = count.saturating_sub(1);
        if !(1..=8).contains(&copies) {
            return;
        }
        let segment = out[start..].to_vec();
        for _ in 0..copies {
            if out.len() + segment.len() > MAX_EXPANDED_LEN {
                log::warn!("repeat expansion exceeds {} bytes, truncating", MAX_EXPANDED_LEN);
                return;
            }
            out.extend_from_slice(&segment);
        }
    };

    while i < bytes.len() {
        match bytes[i] {
            b'{' => {
                i += 1;
                let mut count = 2;
                if i < bytes.len() && bytes[i].is_ascii_digit() {
                    count = (bytes[i] - b'0') as u32;
                    if count == 0 {
                        count = 1;
                    }
                    i += 1;
                    while i < bytes.len() && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                if stack.len() >= MAX_REPEAT_DEPTH {
                    log::warn!("repeat nesting deeper than {}, ignoring block count", MAX_REPEAT_DEPTH);
                    count = 1;
                }
                stack.push((out.len(), count));
            }
            b'}' => {
                i += 1;
                if let Some((start, count)) = stack.pop() {
                    close(&mut out, start, count);
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    // end of input closes any blocks still open
    while let Some((start, count)) = stack.pop() {
        close(&mut out, start, count);
    }

    String::from_utf8(out).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Configuration tags
// ---------------------------------------------------------------------------

/// Parameter digit width and clamp for a value-carrying tag
fn clamped(bytes: &[u8], pos: usize, digits: usize, min: u32, max: u32) -> (u32, usize) {
    let (raw, used) = read_number(bytes, pos, digits);
    (raw.clamp(min, max), used)
}

/// Try to match a melodic configuration tag at `pos`.
///
/// Returns the consumed byte count and the event to emit, if any. Longer
/// tags are tested before their prefixes (`PRESET=POPPYVIB` before
/// `PRESET=POPPY`, `ASTRO=OFF` before `ASTRO=`).
fn match_melodic_tag(bytes: &[u8], pos: usize) -> Option<(usize, Option<EventKind>)> {
    let rest = &bytes[pos..];
    let starts = |tag: &[u8]| rest.starts_with(tag);

    if starts(b"PRESET=POPPYVIB") {
        return Some((15, Some(EventKind::PresetPoppyVib)));
    }
    if starts(b"PRESET=POPPY") {
        return Some((12, Some(EventKind::PresetPoppy)));
    }
    if starts(b"PRESET=BEEP") {
        return Some((11, Some(EventKind::PresetBeep)));
    }
    if starts(b"PRESET=BELL") {
        return Some((11, Some(EventKind::PresetBell)));
    }
    if starts(b"DEFAULTTONE") {
        return Some((11, Some(EventKind::DefaultTone)));
    }
    if starts(b"WAVEFORM=") {
        let (v, used) = clamped(bytes, pos + 9, 2, 0, 99);
        return Some((9 + used, Some(EventKind::Waveform(v))));
    }
    if starts(b"WAVEFLIP") {
        return Some((8, Some(EventKind::WaveFlip)));
    }
    if starts(b"ATTACKTIME=") {
        let (v, used) = clamped(bytes, pos + 11, 4, 0, 9999);
        return Some((11 + used, Some(EventKind::AttackTime(v))));
    }
    if starts(b"PEAKTIME=") {
        let (v, used) = clamped(bytes, pos + 9, 4, 0, 9999);
        return Some((9 + used, Some(EventKind::PeakTime(v))));
    }
    if starts(b"DECAYTIME=") {
        let (v, used) = clamped(bytes, pos + 10, 4, 0, 9999);
        return Some((10 + used, Some(EventKind::DecayTime(v))));
    }
    if starts(b"RELEASETIME=") {
        let (v, used) = clamped(bytes, pos + 12, 4, 0, 9999);
        return Some((12 + used, Some(EventKind::ReleaseTime(v))));
    }
    if starts(b"PEAKLEVEL=") {
        let (v, used) = clamped(bytes, pos + 10, 3, 0, 100);
        return Some((10 + used, Some(EventKind::PeakLevel(v))));
    }
    if starts(b"SUSTAINLEVEL=") {
        let (v, used) = clamped(bytes, pos + 13, 3, 0, 100);
        return Some((13 + used, Some(EventKind::SustainLevel(v))));
    }
    if starts(b"LFORANGE=") {
        let (v, used) = clamped(bytes, pos + 9, 4, 1, 3600);
        return Some((9 + used, Some(EventKind::LfoRange(v))));
    }
    if starts(b"LFOSPEED=") {
        let (v, used) = clamped(bytes, pos + 9, 3, 0, 100);
        return Some((9 + used, Some(EventKind::LfoSpeed(v))));
    }
    if starts(b"LFOWAIT=") {
        let (v, used) = clamped(bytes, pos + 8, 4, 1, 3000);
        return Some((8 + used, Some(EventKind::LfoWait(v))));
    }
    if starts(b"LFO=OFF") {
        return Some((7, Some(EventKind::LfoOff)));
    }
    if starts(b"LFO=ON") {
        return Some((6, Some(EventKind::LfoOn)));
    }
    if starts(b"ASTRO=OFF") {
        return Some((9, Some(EventKind::AstroOff)));
    }
    if starts(b"ASTRO=") {
        let (v, used) = clamped(bytes, pos + 6, 3, 0, 100);
        let kind = if v == 0 { EventKind::AstroOff } else { EventKind::AstroOn(v) };
        return Some((6 + used, Some(kind)));
    }
    if starts(b"FALLSPEED=") {
        let (v, used) = clamped(bytes, pos + 10, 4, 1, 6000);
        return Some((10 + used, Some(EventKind::FallSpeed(v))));
    }
    if starts(b"FALLWAIT=") {
        let (v, used) = clamped(bytes, pos + 9, 4, 1, 9999);
        return Some((9 + used, Some(EventKind::FallWait(v))));
    }
    if starts(b"RISESPEED=") {
        let (v, used) = clamped(bytes, pos + 10, 4, 1, 9600);
        return Some((10 + used, Some(EventKind::RiseSpeed(v))));
    }
    if starts(b"RISERANGE=") {
        let (v, used) = clamped(bytes, pos + 10, 4, 1, 9600);
        return Some((10 + used, Some(EventKind::RiseRange(v))));
    }
    if starts(b"BEEFUP=") {
        let (v, used) = clamped(bytes, pos + 7, 3, 0, 100);
        return Some((7 + used, Some(EventKind::BeefUp(v))));
    }
    if starts(b"RINGMOD=OFF") {
        return Some((11, Some(EventKind::RingModOff)));
    }
    if starts(b"RINGMOD=") {
        let (v, used) = clamped(bytes, pos + 8, 1, 0, 9);
        let kind = if v == 0 {
            EventKind::RingModOff
        } else {
            EventKind::RingModOn((v - 1) as usize)
        };
        return Some((8 + used, Some(kind)));
    }

    None
}

/// Try to match a drum configuration tag at `pos`
fn match_drum_tag(bytes: &[u8], pos: usize) -> Option<(usize, Option<DrumEventKind>)> {
    let rest = &bytes[pos..];
    let starts = |tag: &[u8]| rest.starts_with(tag);

    if starts(b"RESETDRUMS") {
        return Some((10, Some(DrumEventKind::ResetDrums)));
    }
    if starts(b"WHITENOISE") {
        return Some((10, Some(DrumEventKind::WhiteNoise)));
    }
    if starts(b"PINKNOISE") {
        return Some((9, Some(DrumEventKind::PinkNoise)));
    }
    if starts(b"KICKNOISE=WHITE") {
        return Some((15, Some(DrumEventKind::KickNoise(NoiseKind::White))));
    }
    if starts(b"KICKNOISE=PINK") {
        return Some((14, Some(DrumEventKind::KickNoise(NoiseKind::Pink))));
    }
    if starts(b"SNARENOISE=WHITE") {
        return Some((16, Some(DrumEventKind::SnareNoise(NoiseKind::White))));
    }
    if starts(b"SNARENOISE=PINK") {
        return Some((15, Some(DrumEventKind::SnareNoise(NoiseKind::Pink))));
    }
    if starts(b"HIHATNOISE=WHITE") {
        return Some((16, Some(DrumEventKind::HiHatNoise(NoiseKind::White))));
    }
    if starts(b"HIHATNOISE=PINK") {
        return Some((15, Some(DrumEventKind::HiHatNoise(NoiseKind::Pink))));
    }
    if starts(b"KICKPITCH=") {
        let (v, used) = clamped(bytes, pos + 10, 3, 0, 100);
        return Some((10 + used, Some(DrumEventKind::KickPitch(v))));
    }
    if starts(b"SNAREPITCH=") {
        let (v, used) = clamped(bytes, pos + 11, 3, 0, 100);
        return Some((11 + used, Some(DrumEventKind::SnarePitch(v))));
    }
    if starts(b"HIHATPITCH=") {
        let (v, used) = clamped(bytes, pos + 11, 3, 0, 100);
        return Some((11 + used, Some(DrumEventKind::HiHatPitch(v))));
    }
    if starts(b"BEEFUP=") {
        let (v, used) = clamped(bytes, pos + 7, 3, 0, 100);
        return Some((7 + used, Some(DrumEventKind::BeefUp(v))));
    }
    if starts(b"KICKLENGTH=") {
        let (v, used) = clamped(bytes, pos + 11, 4, 0, 9999);
        return Some((11 + used, Some(DrumEventKind::KickLength(v))));
    }
    if starts(b"SNARELENGTH=") {
        let (v, used) = clamped(bytes, pos + 12, 4, 0, 9999);
        return Some((12 + used, Some(DrumEventKind::SnareLength(v))));
    }
    if starts(b"HIHATLENGTH=") {
        let (v, used) = clamped(bytes, pos + 12, 4, 0, 9999);
        return Some((12 + used, Some(DrumEventKind::HiHatLength(v))));
    }
    if starts(b"SQUARELEVEL=") {
        let (v, used) = clamped(bytes, pos + 12, 3, 0, 100);
        return Some((12 + used, Some(DrumEventKind::SquareLevel(v))));
    }
    if starts(b"NOISELEVEL=") {
        let (v, used) = clamped(bytes, pos + 11, 3, 0, 100);
        return Some((11 + used, Some(DrumEventKind::NoiseLevel(v))));
    }

    None
}

// ---------------------------------------------------------------------------
// Global section
// ---------------------------------------------------------------------------

fn erase(s: &mut String, pos: usize, len: usize) {
    s.replace_range(pos..pos + len, "");
}

/// Apply the `@g` section to the song settings.
///
/// Directives are consumed in priority order (all `TEMPO=` occurrences
/// before any `DELAYTIME=AUTO`, so auto delay times always see the final
/// tempo), then a second pass handles the legacy `T=` and `V<n>=` forms.
fn parse_global(global: &str, settings: &mut SongSettings) {
    let mut s = global.to_string();

    loop {
        if let Some(pos) = s.find("TEMPO=") {
            let (v, used) = clamped(s.as_bytes(), pos + 6, 3, 40, 400);
            settings.tempo = v as f64;
            erase(&mut s, pos, 6 + used);
        } else if let Some(pos) = s.find("REPEAT=") {
            let (v, used) = clamped(s.as_bytes(), pos + 7, 1, 1, 9);
            settings.loop_enabled = false;
            settings.repeats = v;
            erase(&mut s, pos, 7 + used);
        } else if let Some(pos) = s.find("LOOP=ON") {
            settings.loop_enabled = true;
            erase(&mut s, pos, 7);
        } else if let Some(pos) = s.find("LOOP=OFF") {
            settings.loop_enabled = false;
            erase(&mut s, pos, 8);
        } else if let Some(pos) = s.find("DELAY=ON") {
            settings.delay_enabled = true;
            erase(&mut s, pos, 8);
        } else if let Some(pos) = s.find("DELAY=OFF") {
            settings.delay_enabled = false;
            erase(&mut s, pos, 9);
        } else if let Some(pos) = s.find("DELAYTIME=AUTO3") {
            let mut magic = 39999.996; // 333.3333 ms at tempo 120
            let mut len = 15;
            if s.as_bytes().get(pos + 15) == Some(&b'L') {
                magic = 79999.992;
                len += 1;
            }
            let value = ((magic / settings.tempo) as u32).clamp(10, 999);
            set_delay_times(settings, value);
            erase(&mut s, pos, len);
        } else if let Some(pos) = s.find("DELAYTIME=AUTO") {
            let value = ((60000.0 / settings.tempo) as u32).clamp(10, 999);
            set_delay_times(settings, value);
            erase(&mut s, pos, 14);
        } else if let Some(pos) = s.find("DELAYTIME=") {
            let (v, used) = clamped(s.as_bytes(), pos + 10, 4, 10, 999);
            set_delay_times(settings, v);
            erase(&mut s, pos, 10 + used);
        } else if let Some(pos) = s.find("DELAYLEVEL=") {
            let (v, used) = clamped(s.as_bytes(), pos + 11, 3, 1, 99);
            settings.delay_left.gain = v as f32 / 100.0;
            settings.delay_right.gain = v as f32 / 100.0;
            erase(&mut s, pos, 11 + used);
        } else if let Some(pos) = s.find("MASTERVOLUME=") {
            let (v, used) = clamped(s.as_bytes(), pos + 13, 3, 1, 99);
            settings.master_gain = v as f32 / 100.0;
            erase(&mut s, pos, 13 + used);
        } else {
            break;
        }
    }

    // legacy single-letter forms
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'T' if bytes.get(i + 1) == Some(&b'=') => {
                let (v, used) = read_number(bytes, i + 2, 3);
                if used > 0 {
                    settings.tempo = (v as f64).clamp(40.0, 320.0);
                }
                i += 2 + used;
            }
            b'V' => {
                let target = bytes.get(i + 1).copied();
                if bytes.get(i + 2) == Some(&b'=') {
                    match target {
                        Some(ch @ b'1'..=b'9') => {
                            let (v, used) = read_number(bytes, i + 3, 2);
                            let v = v.min(10);
                            settings.channel_gains[(ch - b'1') as usize] = v as f32 / 20.0;
                            i += 3 + used;
                        }
                        Some(b'd') | Some(b'D') => {
                            let (v, used) = read_number(bytes, i + 3, 2);
                            let v = v.min(10);
                            settings.drum_gain = v as f32 / 20.0;
                            i += 3 + used;
                        }
                        _ => i += 1,
                    }
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
}

fn set_delay_times(settings: &mut SongSettings, ms: u32) {
    settings.delay_left.first_ms = ms;
    settings.delay_left.echo_ms = ms;
    settings.delay_right.first_ms = ms * 3 / 2;
    settings.delay_right.echo_ms = ms;
}

// ---------------------------------------------------------------------------
// Melodic channels
// ---------------------------------------------------------------------------

struct TupletNote {
    /// Semitone number, or `None` for a rest slot
    tone: Option<i32>,
    ties: u32,
}

fn parse_channel(src: &str, timing: &Timing, bookmark: &mut u64) -> ChannelTrack {
    let expanded = expand_repeats(src);
    let bytes = expanded.as_bytes();

    let mut track = ChannelTrack::default();
    let mut frames_written: u64 = 0;
    let mut octave: i32 = 4;
    let mut note_len: u32 = timing.default_note_len();
    let mut i = 0;

    let push_note = |track: &mut ChannelTrack, frames_written: &mut u64, pitch: Pitch, frames: u32| {
        track.notes.push(MelodicNote { pitch, frames });
        track.total_frames += frames as u64;
        *frames_written += frames as u64;
    };

    while i < bytes.len() {
        if let Some((consumed, kind)) = match_melodic_tag(bytes, i) {
            if let Some(kind) = kind {
                track.events.push(TrackEvent { frame: frames_written, kind });
            }
            i += consumed;
            continue;
        }

        match bytes[i] {
            letter @ b'A'..=b'G' => {
                let mut tone = semitone_for_letter(letter) + octave * 12;
                i += 1;
                if bytes.get(i) == Some(&b'#') {
                    tone += 1;
                    i += 1;
                } else if bytes.get(i) == Some(&b'b') {
                    tone -= 1;
                    i += 1;
                }

                if bytes.get(i) == Some(&b',') {
                    track.events.push(TrackEvent { frame: frames_written, kind: EventKind::FallStart });
                    i += 1;
                }

                let mut total_len = note_len;
                let mut extra: u64 = 0;
                if bytes.get(i) == Some(&b'~') {
                    total_len += note_len;
                    extra += note_len as u64;
                    i += 1;
                    loop {
                        match bytes.get(i) {
                            Some(&b'~') => {
                                total_len += note_len;
                                extra += note_len as u64;
                                i += 1;
                            }
                            Some(&b',') => {
                                track.events.push(TrackEvent {
                                    frame: frames_written + extra,
                                    kind: EventKind::FallStart,
                                });
                                i += 1;
                            }
                            _ => break,
                        }
                    }
                }

                push_note(
                    &mut track,
                    &mut frames_written,
                    Pitch::Tone(note_frequency(tone)),
                    total_len,
                );
            }
            b'<' => {
                octave = (octave - 1).max(0);
                i += 1;
            }
            b'>' => {
                octave = (octave + 1).min(9);
                i += 1;
            }
            b'*' => {
                track.events.push(TrackEvent { frame: frames_written, kind: EventKind::RiseStart });
                i += 1;
            }
            b'L' => {
                i += 1;
                let (n, used) = read_number(bytes, i, 2);
                if used > 0 && n > 0 {
                    note_len = timing.measure / n;
                }
                i += used;
            }
            b'O' => {
                i += 1;
                if let Some(d) = bytes.get(i).filter(|b| b.is_ascii_digit()) {
                    octave = (d - b'0') as i32;
                    i += 1;
                }
            }
            b'[' => {
                i = parse_tuplet(bytes, i + 1, timing, &mut octave, note_len, &mut track, &mut frames_written);
            }
            b':' => {
                push_note(&mut track, &mut frames_written, Pitch::Rest, note_len);
                i += 1;
            }
            b'V' => {
                i += 1;
                let (v, used) = read_number(bytes, i, 2);
                track.events.push(TrackEvent {
                    frame: frames_written,
                    kind: EventKind::Volume(v.clamp(1, 10)),
                });
                i += used;
            }
            b'^' => {
                track.events.push(TrackEvent { frame: frames_written, kind: EventKind::VolumeUp });
                i += 1;
            }
            b'_' => {
                track.events.push(TrackEvent { frame: frames_written, kind: EventKind::VolumeDown });
                i += 1;
            }
            b'%' => {
                i += 1;
                if bytes.get(i) == Some(&b'%') {
                    if frames_written > *bookmark {
                        *bookmark = frames_written;
                    }
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }

    track
}

/// Parse the body of a `[ ... ]` tuplet; returns the cursor after `]`.
///
/// The block's whole length (default: the current note length, or
/// `measure/N` when a number appears inside) is divided evenly across note
/// and tie slots; the first note absorbs the division remainder. Rises are
/// scheduled at the accumulated slot position of the note they precede.
fn parse_tuplet(
    bytes: &[u8],
    mut i: usize,
    timing: &Timing,
    octave: &mut i32,
    note_len: u32,
    track: &mut ChannelTrack,
    frames_written: &mut u64,
) -> usize {
    let mut whole_len = note_len;
    let mut notes: Vec<TupletNote> = Vec::new();
    let mut rises: Vec<usize> = Vec::new();

    loop {
        match bytes.get(i) {
            None | Some(&b']') => {
                if bytes.get(i).is_some() {
                    i += 1;
                }
                break;
            }
            Some(&d) if d.is_ascii_digit() => {
                let (n, used) = read_number(bytes, i, 2);
                if n > 0 {
                    whole_len = timing.measure / n;
                }
                i += used;
            }
            Some(&(letter @ b'A'..=b'G')) => {
                let mut tone = semitone_for_letter(letter) + *octave * 12;
                i += 1;
                if bytes.get(i) == Some(&b'#') {
                    tone += 1;
                    i += 1;
                } else if bytes.get(i) == Some(&b'b') {
                    tone -= 1;
                    i += 1;
                }
                let mut ties = 0;
                while bytes.get(i) == Some(&b'~') {
                    ties += 1;
                    i += 1;
                }
                notes.push(TupletNote { tone: Some(tone), ties });
            }
            Some(&b':') => {
                notes.push(TupletNote { tone: None, ties: 0 });
                i += 1;
            }
            Some(&b'<') => {
                *octave = (*octave - 1).max(0);
                i += 1;
            }
            Some(&b'>') => {
                *octave = (*octave + 1).min(9);
                i += 1;
            }
            Some(&b'*') => {
                rises.push(notes.len());
                i += 1;
            }
            _ => {
                // configuration tags are inert inside tuplets
                if let Some((consumed, _)) = match_melodic_tag(bytes, i) {
                    i += consumed;
                } else {
                    i += 1;
                }
            }
        }
    }

    let division: u32 = notes.len() as u32 + notes.iter().map(|n| n.ties).sum::<u32>();
    if division == 0 {
        return i; // empty tuplet is a no-op
    }
    let each = whole_len / division;
    let remainder = whole_len % division;

    for &rise_pos in &rises {
        let wait_units: u32 = notes[..rise_pos].iter().map(|n| 1 + n.ties).sum();
        track.events.push(TrackEvent {
            frame: *frames_written + (wait_units * each) as u64,
            kind: EventKind::RiseStart,
        });
    }

    for (j, note) in notes.iter().enumerate() {
        let mut len = each * (1 + note.ties);
        if j == 0 {
            len += remainder;
        }
        let pitch = match note.tone {
            Some(tone) => Pitch::Tone(note_frequency(tone)),
            None => Pitch::Rest,
        };
        track.notes.push(MelodicNote { pitch, frames: len });
        track.total_frames += len as u64;
        *frames_written += len as u64;
    }

    i
}

// ---------------------------------------------------------------------------
// Drum channel
// ---------------------------------------------------------------------------

fn drum_kind_for_letter(letter: u8) -> Option<DrumKind> {
    match letter {
        b'K' => Some(DrumKind::Kick),
        b'S' => Some(DrumKind::Snare),
        b'H' => Some(DrumKind::HiHat),
        b'k' => Some(DrumKind::KickQuiet),
        b's' => Some(DrumKind::SnareQuiet),
        b'h' => Some(DrumKind::HiHatQuiet),
        _ => None,
    }
}

fn parse_drums(src: &str, timing: &Timing, bookmark: &mut u64) -> DrumTrack {
    let expanded = expand_repeats(src);
    let bytes = expanded.as_bytes();

    let mut track = DrumTrack::default();
    let mut frames_written: u64 = 0;
    let mut note_len: u32 = timing.default_note_len();
    let mut i = 0;

    let push_note = |track: &mut DrumTrack, frames_written: &mut u64, kind: Option<DrumKind>, frames: u32| {
        track.notes.push(DrumNote { kind, frames });
        track.total_frames += frames as u64;
        *frames_written += frames as u64;
    };

    while i < bytes.len() {
        if let Some((consumed, kind)) = match_drum_tag(bytes, i) {
            if let Some(kind) = kind {
                track.events.push(DrumTrackEvent { frame: frames_written, kind });
            }
            i += consumed;
            continue;
        }

        let ch = bytes[i];
        if let Some(kind) = drum_kind_for_letter(ch) {
            i += 1;
            let mut total_len = note_len;
            while bytes.get(i) == Some(&b'~') {
                total_len += note_len;
                i += 1;
            }
            push_note(&mut track, &mut frames_written, Some(kind), total_len);
            continue;
        }

        match ch {
            b'L' => {
                i += 1;
                let (n, used) = read_number(bytes, i, 2);
                if used > 0 && n > 0 {
                    note_len = timing.measure / n;
                }
                i += used;
            }
            b':' => {
                push_note(&mut track, &mut frames_written, None, note_len);
                i += 1;
            }
            b'[' => {
                i = parse_drum_tuplet(bytes, i + 1, timing, note_len, &mut track, &mut frames_written);
            }
            b'V' => {
                i += 1;
                let (v, used) = read_number(bytes, i, 2);
                track.events.push(DrumTrackEvent {
                    frame: frames_written,
                    kind: DrumEventKind::Volume(v.clamp(1, 10)),
                });
                i += used;
            }
            b'^' => {
                track.events.push(DrumTrackEvent { frame: frames_written, kind: DrumEventKind::VolumeUp });
                i += 1;
            }
            b'_' => {
                track.events.push(DrumTrackEvent { frame: frames_written, kind: DrumEventKind::VolumeDown });
                i += 1;
            }
            b'%' => {
                i += 1;
                if bytes.get(i) == Some(&b'%') {
                    if frames_written > *bookmark {
                        *bookmark = frames_written;
                    }
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }

    track
}

fn parse_drum_tuplet(
    bytes: &[u8],
    mut i: usize,
    timing: &Timing,
    note_len: u32,
    track: &mut DrumTrack,
    frames_written: &mut u64,
) -> usize {
    let mut whole_len = note_len;
    let mut notes: Vec<(Option<DrumKind>, u32)> = Vec::new();

    loop {
        match bytes.get(i) {
            None | Some(&b']') => {
                if bytes.get(i).is_some() {
                    i += 1;
                }
                break;
            }
            Some(&d) if d.is_ascii_digit() => {
                let (n, used) = read_number(bytes, i, 2);
                if n > 0 {
                    whole_len = timing.measure / n;
                }
                i += used;
            }
            Some(&ch) if drum_kind_for_letter(ch).is_some() => {
                let kind = drum_kind_for_letter(ch);
                i += 1;
                let mut ties = 0;
                while bytes.get(i) == Some(&b'~') {
                    ties += 1;
                    i += 1;
                }
                notes.push((kind, ties));
            }
            Some(&b':') => {
                notes.push((None, 0));
                i += 1;
            }
            _ => {
                if let Some((consumed, _)) = match_drum_tag(bytes, i) {
                    i += consumed;
                } else {
                    i += 1;
                }
            }
        }
    }

    let division: u32 = notes.len() as u32 + notes.iter().map(|n| n.1).sum::<u32>();
    if division == 0 {
        return i;
    }
    let each = whole_len / division;
    let remainder = whole_len % division;

    for (j, &(kind, ties)) in notes.iter().enumerate() {
        let mut len = each * (1 + ties);
        if j == 0 {
            len += remainder;
        }
        track.notes.push(DrumNote { kind, frames: len });
        track.total_frames += len as u64;
        *frames_written += len as u64;
    }

    i
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Compile an MML source into a song
pub fn parse(raw_source: &str) -> Song {
    let stripped = source::strip(raw_source);
    let sections = source::split_sections(&stripped);

    let mut settings = SongSettings::default();
    parse_global(&sections.global, &mut settings);

    let timing = Timing::new(settings.tempo);
    let mut bookmark: u64 = 0;

    let mut tracks = Vec::with_capacity(NUM_CHANNELS);
    for channel in 0..NUM_CHANNELS {
        tracks.push(parse_channel(&sections.melodic[channel], &timing, &mut bookmark));
    }
    let drums = parse_drums(&sections.drum, &timing, &mut bookmark);

    log::info!(
        "parsed song: tempo {}, {} frames, bookmark {}",
        settings.tempo,
        tracks.iter().map(|t| t.total_frames).chain([drums.total_frames]).max().unwrap_or(0),
        bookmark
    );

    Song {
        tracks,
        drums,
        settings,
        bookmark,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn freq_of(note: &MelodicNote) -> f64 {
        match note.pitch {
            Pitch::Tone(f) => f,
            Pitch::Rest => panic!("expected a tone"),
        }
    }

    #[test]
    fn middle_c_quarter_note() {
        // S1: one 22050-frame note at 261.626 Hz, everything else empty
        let song = parse("@g TEMPO=120 DELAY=OFF LOOP=OFF @1 L4 C");
        let track = &song.tracks[0];
        assert_eq!(track.notes.len(), 1);
        assert_eq!(track.notes[0].frames, 22050);
        assert!((freq_of(&track.notes[0]) - 261.626).abs() < 0.01);
        assert_eq!(track.total_frames, 22050);
        for other in &song.tracks[1..] {
            assert_eq!(other.total_frames, 0);
        }
        assert_eq!(song.drums.total_frames, 0);
        assert_eq!(song.last_frame_pure(), 22050);
        assert!(!song.settings.delay_enabled);
        assert!(!song.settings.loop_enabled);
    }

    #[test]
    fn tuplet_triplet() {
        // S2: three equal notes filling measure/3 each
        let song = parse("@g TEMPO=120 LOOP=OFF @1 [3 CEG]");
        let track = &song.tracks[0];
        assert_eq!(track.notes.len(), 3);
        for note in &track.notes {
            assert_eq!(note.frames, 22050);
        }
        assert!((freq_of(&track.notes[0]) - 261.626).abs() < 0.01);
        assert!((freq_of(&track.notes[1]) - 329.628).abs() < 0.01);
        assert!((freq_of(&track.notes[2]) - 391.995).abs() < 0.01);
        assert_eq!(track.total_frames, 66150);
    }

    #[test]
    fn tuplet_remainder_goes_to_first_slot() {
        // measure = round(44100*240/130) = 81415; [4 CDE] leaves a remainder
        let song = parse("@g TEMPO=130 @1 [4 CDE]");
        let track = &song.tracks[0];
        let whole = 81415u32 / 4;
        let each = whole / 3;
        let total: u64 = track.notes.iter().map(|n| n.frames as u64).sum();
        assert_eq!(total, whole as u64);
        assert_eq!(track.notes[0].frames, each + whole % 3);
        assert_eq!(track.notes[1].frames, each);
        assert_eq!(track.notes[2].frames, each);
    }

    #[test]
    fn nested_repeats_expand_in_sequence() {
        // S3: {2 C{3 D}E} -> C D D D E C D D D E
        let song = parse("@1 {2 C{3 D}E}");
        let track = &song.tracks[0];
        assert_eq!(track.notes.len(), 10);
        let tones: Vec<f64> = track.notes.iter().map(freq_of).collect();
        let c = note_frequency(48);
        let d = note_frequency(50);
        let e = note_frequency(52);
        let expected = [c, d, d, d, e, c, d, d, d, e];
        for (got, want) in tones.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-9);
        }
    }

    #[test]
    fn repeat_notes_and_events_duplicate() {
        let song = parse("@1 {2 ^C}");
        let track = &song.tracks[0];
        assert_eq!(track.notes.len(), 2);
        assert_eq!(track.events.len(), 2);
        assert_eq!(track.events[0].frame, 0);
        assert_eq!(track.events[1].frame, track.notes[0].frames as u64);
    }

    #[test]
    fn empty_repeat_and_tuplet_are_noops() {
        let song = parse("@1 {3 }[4 ]");
        assert!(song.tracks[0].notes.is_empty());
        assert!(song.tracks[0].events.is_empty());
    }

    #[test]
    fn unmatched_brace_closes_at_end_of_input() {
        let song = parse("@1 {2 C");
        assert_eq!(song.tracks[0].notes.len(), 2);
    }

    #[test]
    fn rest_then_note() {
        // S4: leading rest occupies the first 22050 frames
        let song = parse("@g TEMPO=120 @1 L4 :C");
        let track = &song.tracks[0];
        assert_eq!(track.notes.len(), 2);
        assert_eq!(track.notes[0].pitch, Pitch::Rest);
        assert_eq!(track.notes[0].frames, 22050);
        assert_eq!(track.notes[1].frames, 22050);
    }

    #[test]
    fn ties_extend_the_note() {
        let song = parse("@g TEMPO=120 @1 L4 C~~");
        let track = &song.tracks[0];
        assert_eq!(track.notes.len(), 1);
        assert_eq!(track.notes[0].frames, 3 * 22050);
    }

    #[test]
    fn sharps_and_flats_shift_a_semitone() {
        let song = parse("@1 O4 C C# Cb");
        let track = &song.tracks[0];
        let c = note_frequency(48);
        assert!((freq_of(&track.notes[0]) - c).abs() < 1e-9);
        assert!((freq_of(&track.notes[1]) - note_frequency(49)).abs() < 1e-9);
        assert!((freq_of(&track.notes[2]) - note_frequency(47)).abs() < 1e-9);
    }

    #[test]
    fn octave_shifts_clamp() {
        let song = parse("@1 O0 < C O9 >>> C");
        let track = &song.tracks[0];
        assert!((freq_of(&track.notes[0]) - note_frequency(0)).abs() < 1e-9);
        assert!((freq_of(&track.notes[1]) - note_frequency(9 * 12)).abs() < 1e-9);
    }

    #[test]
    fn events_are_ordered_and_bounded() {
        let song = parse("@g TEMPO=120 @1 L4 V5 C ^ D _ E WAVEFORM=2 F");
        let track = &song.tracks[0];
        let mut last = 0;
        for event in &track.events {
            assert!(event.frame >= last);
            assert!(event.frame <= track.total_frames);
            last = event.frame;
        }
        assert_eq!(track.events.len(), 4);
    }

    #[test]
    fn sum_of_note_lengths_equals_total_frames() {
        let song = parse("@g TEMPO=97 @1 L8 CDE{3 FG}[5 AB<C>DE] : C~~ %%");
        let track = &song.tracks[0];
        let sum: u64 = track.notes.iter().map(|n| n.frames as u64).sum();
        assert_eq!(sum, track.total_frames);
    }

    #[test]
    fn tag_letters_are_not_parsed_as_notes() {
        // DECAYTIME= begins with D/E/C/A -- none may become notes
        let song = parse("@1 DECAYTIME=100");
        let track = &song.tracks[0];
        assert!(track.notes.is_empty());
        assert_eq!(track.events.len(), 1);
        assert_eq!(track.events[0].kind, EventKind::DecayTime(100));
    }

    #[test]
    fn preset_tags_disambiguate_by_length() {
        let song = parse("@1 PRESET=POPPYVIB PRESET=POPPY");
        let kinds: Vec<EventKind> = song.tracks[0].events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::PresetPoppyVib, EventKind::PresetPoppy]);
    }

    #[test]
    fn ringmod_parameter_is_zero_based() {
        let song = parse("@1 RINGMOD=2 C RINGMOD=OFF");
        let kinds: Vec<EventKind> = song.tracks[0].events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::RingModOn(1), EventKind::RingModOff]);
    }

    #[test]
    fn fall_markers_inside_ties() {
        let song = parse("@g TEMPO=120 @1 L4 C~,~");
        let track = &song.tracks[0];
        assert_eq!(track.notes.len(), 1);
        assert_eq!(track.notes[0].frames, 3 * 22050);
        assert_eq!(track.events.len(), 1);
        assert_eq!(track.events[0].kind, EventKind::FallStart);
        assert_eq!(track.events[0].frame, 22050);
    }

    #[test]
    fn bookmark_records_furthest_marker() {
        let song = parse("@g TEMPO=120 @1 L4 C %% D @2 L4 CDE %%");
        assert_eq!(song.bookmark, 3 * 22050);
    }

    #[test]
    fn drum_bar() {
        // S6: four hits on quarter-note boundaries
        let song = parse("@g TEMPO=120 LOOP=OFF @d L4 KSHS");
        let drums = &song.drums;
        assert_eq!(drums.notes.len(), 4);
        let kinds: Vec<Option<DrumKind>> = drums.notes.iter().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            vec![
                Some(DrumKind::Kick),
                Some(DrumKind::Snare),
                Some(DrumKind::HiHat),
                Some(DrumKind::Snare)
            ]
        );
        let mut frame = 0u64;
        for (idx, note) in drums.notes.iter().enumerate() {
            assert_eq!(frame, idx as u64 * 22050);
            frame += note.frames as u64;
        }
        assert_eq!(drums.total_frames, 88200);
    }

    #[test]
    fn quiet_drums_map_to_quiet_kinds() {
        let song = parse("@d ksh");
        let kinds: Vec<Option<DrumKind>> = song.drums.notes.iter().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            vec![
                Some(DrumKind::KickQuiet),
                Some(DrumKind::SnareQuiet),
                Some(DrumKind::HiHatQuiet)
            ]
        );
    }

    #[test]
    fn drum_tags_emit_events() {
        let song = parse("@d KICKPITCH=75 PINKNOISE K SNARELENGTH=500 S");
        let kinds: Vec<DrumEventKind> = song.drums.events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                DrumEventKind::KickPitch(75),
                DrumEventKind::PinkNoise,
                DrumEventKind::SnareLength(500)
            ]
        );
        assert_eq!(song.drums.events[2].frame, song.drums.notes[0].frames as u64);
    }

    #[test]
    fn global_directives_apply() {
        let song = parse("@g TEMPO=140 DELAY=ON DELAYTIME=200 DELAYLEVEL=30 MASTERVOLUME=80 REPEAT=3");
        let s = &song.settings;
        assert_eq!(s.tempo, 140.0);
        assert!(s.delay_enabled);
        assert_eq!(s.delay_left.first_ms, 200);
        assert_eq!(s.delay_right.first_ms, 300);
        assert!((s.delay_left.gain - 0.30).abs() < 1e-6);
        assert!((s.master_gain - 0.80).abs() < 1e-6);
        assert!(!s.loop_enabled);
        assert_eq!(s.repeats, 3);
    }

    #[test]
    fn auto_delay_time_follows_tempo() {
        let song = parse("@g TEMPO=150 DELAYTIME=AUTO");
        assert_eq!(song.settings.delay_left.first_ms, 400);
        let song3 = parse("@g TEMPO=120 DELAYTIME=AUTO3");
        assert_eq!(song3.settings.delay_left.first_ms, 333);
        let song3l = parse("@g TEMPO=120 DELAYTIME=AUTO3L");
        assert_eq!(song3l.settings.delay_left.first_ms, 666);
    }

    #[test]
    fn legacy_global_forms() {
        let song = parse("@g T=180 V1=10 V9=5 Vd=2");
        assert_eq!(song.settings.tempo, 180.0);
        assert!((song.settings.channel_gains[0] - 0.5).abs() < 1e-6);
        assert!((song.settings.channel_gains[8] - 0.25).abs() < 1e-6);
        assert!((song.settings.drum_gain - 0.1).abs() < 1e-6);
    }

    #[test]
    fn tempo_clamps_to_range() {
        let song = parse("@g TEMPO=999");
        assert_eq!(song.settings.tempo, 400.0);
    }

    #[test]
    fn empty_source_is_an_empty_song() {
        let song = parse("");
        assert_eq!(song.last_frame_pure(), 0);
        assert!(song.tracks.iter().all(|t| t.notes.is_empty()));
    }

    #[test]
    fn unknown_tokens_are_skipped() {
        let song = parse("@g TEMPO=120 @1 L4 C?!x7C");
        // '7' is an unknown token outside a tuplet and is skipped
        assert_eq!(song.tracks[0].notes.len(), 2);
    }

    #[test]
    fn rise_inside_tuplet_lands_on_its_note() {
        let song = parse("@g TEMPO=120 @1 [4 C*EG]");
        let track = &song.tracks[0];
        // whole = measure/4 = 22050, three slots of 7350
        assert_eq!(track.events.len(), 1);
        assert_eq!(track.events[0].kind, EventKind::RiseStart);
        assert_eq!(track.events[0].frame, 7350);
    }

    #[test]
    fn measure_rounds_to_nearest_frame() {
        // tempo 97: 44100*240/97 = 109113.40... -> 109113
        let timing = Timing::new(97.0);
        assert_eq!(timing.measure, 109113);
        assert_eq!(timing.quarter(), 109113 / 4);
        // tempo 120 divides exactly, giving the canonical 22050 quarter
        assert_eq!(Timing::new(120.0).quarter(), 22050);
    }
}
