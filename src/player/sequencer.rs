//! Scheduler and mixer core
//!
//! Owns the nine melodic voices, the drum voice and the two delay lines,
//! walks the compiled note/event streams sample by sample and produces the
//! final stereo mix. Runs entirely inside the audio callback; everything
//! here is allocation-free per frame.

use crate::mml::{DrumEventKind, EventKind, Pitch, Song, NUM_CHANNELS};
use crate::sfx::SfxSlots;
use crate::synth::drum::DrumVoice;
use crate::synth::{compress, DelayLine, Voice};

/// Brick-wall cap on the final output
const MASTER_OUT_CAP: f32 = 0.88;

/// Master-stage soft-knee compressor parameters
const COMP_THRESHOLD: f32 = 0.5;
const COMP_RATIO: f32 = 8.0;

/// Safety pad appended after the delay tail
const END_PAD_FRAMES: u64 = 1000;

#[derive(Default, Clone, Copy)]
struct ChannelCursor {
    note_index: usize,
    event_index: usize,
    remaining: i64,
    done: bool,
}

pub struct Sequencer {
    song: Song,

    voices: Vec<Voice>,
    drum: DrumVoice,
    delay: [DelayLine; 2],

    cursors: [ChannelCursor; NUM_CHANNELS],
    drum_cursor: ChannelCursor,

    enabled: [bool; NUM_CHANNELS],
    silenced: [bool; NUM_CHANNELS],
    drum_enabled: bool,
    drum_silenced: bool,

    ring_mod_enabled: [bool; NUM_CHANNELS],
    ring_mod_feed: [Option<usize>; NUM_CHANNELS],
    ring_mod_mute: [bool; NUM_CHANNELS],

    frame_pos: u64,
    song_last_frame: u64,
    song_last_frame_pure: u64,
    song_finished: bool,
    loop_enabled: bool,
    repeats_remaining: u32,
    delay_enabled: bool,
    master_gain: f32,
    bookmark: u64,

    /// Per-frame voice output cache, filled before mixing each side
    voice_out: [f32; NUM_CHANNELS],
    drum_out: f32,
}

impl Sequencer {
    pub fn new() -> Self {
        let mut seq = Self {
            song: Song::empty(),
            voices: (0..NUM_CHANNELS).map(|_| Voice::new()).collect(),
            drum: DrumVoice::new(),
            delay: [DelayLine::new(), DelayLine::new()],
            cursors: [ChannelCursor::default(); NUM_CHANNELS],
            drum_cursor: ChannelCursor::default(),
            enabled: [true; NUM_CHANNELS],
            silenced: [false; NUM_CHANNELS],
            drum_enabled: true,
            drum_silenced: false,
            ring_mod_enabled: [false; NUM_CHANNELS],
            ring_mod_feed: [None; NUM_CHANNELS],
            ring_mod_mute: [false; NUM_CHANNELS],
            frame_pos: 0,
            song_last_frame: 0,
            song_last_frame_pure: 0,
            song_finished: false,
            loop_enabled: true,
            repeats_remaining: 1,
            delay_enabled: true,
            master_gain: 0.7,
            bookmark: 0,
            voice_out: [0.0; NUM_CHANNELS],
            drum_out: 0.0,
        };
        seq.set_song(Song::empty());
        seq
    }

    // ----- song lifecycle --------------------------------------------------

    /// Install a freshly parsed song and rewind to its beginning.
    ///
    /// Every voice is reset to its defaults first, then the song's global
    /// settings are applied, so nothing leaks between songs.
    pub fn set_song(&mut self, song: Song) {
        for (i, voice) in self.voices.iter_mut().enumerate() {
            voice.reset_for_new_song();
            voice.set_gain(song.settings.channel_gains[i]);
            self.enabled[i] = true;
            self.silenced[i] = false;
            self.ring_mod_enabled[i] = false;
            self.ring_mod_feed[i] = None;
            self.ring_mod_mute[i] = false;
        }
        self.drum.reset_drum_tones();
        self.drum.disable_beef_up();
        self.drum.set_beef_up_factor(1.0);
        self.drum.set_gain(song.settings.drum_gain);
        self.drum.clear_history();
        self.drum_enabled = true;
        self.drum_silenced = false;

        let left = song.settings.delay_left;
        let right = song.settings.delay_right;
        self.delay[0].set_parameters(left.first_ms as i32, left.echo_ms as i32, left.gain);
        self.delay[1].set_parameters(right.first_ms as i32, right.echo_ms as i32, right.gain);
        self.delay[0].clear_buffer();
        self.delay[1].clear_buffer();
        self.delay_enabled = song.settings.delay_enabled;

        self.loop_enabled = song.settings.loop_enabled;
        self.repeats_remaining = song.settings.repeats;
        self.master_gain = song.settings.master_gain;
        self.bookmark = song.bookmark;

        self.song = song;
        self.go_to_beginning();
    }

    /// Rewind to frame zero: reset cursors, dispatch frame-0 events and arm
    /// the first note of every stream.
    pub fn go_to_beginning(&mut self) {
        self.song_last_frame_pure = self.song.last_frame_pure();
        let delay_tail = self.delay[0]
            .total_delay_frames()
            .max(self.delay[1].total_delay_frames());
        self.song_last_frame = self.song_last_frame_pure + delay_tail + END_PAD_FRAMES;
        self.song_finished = false;
        self.frame_pos = 0;

        self.cursors = [ChannelCursor::default(); NUM_CHANNELS];
        self.drum_cursor = ChannelCursor::default();

        for channel in 0..NUM_CHANNELS {
            while self.cursors[channel].event_index < self.song.tracks[channel].events.len()
                && self.song.tracks[channel].events[self.cursors[channel].event_index].frame == 0
            {
                let kind = self.song.tracks[channel].events[self.cursors[channel].event_index].kind;
                self.apply_event(channel, kind);
                self.cursors[channel].event_index += 1;
            }

            match self.song.tracks[channel].notes.first().copied() {
                None => {
                    self.cursors[channel].done = true;
                    self.enabled[channel] = false;
                }
                Some(note) => {
                    self.cursors[channel].remaining = note.frames as i64;
                    match note.pitch {
                        Pitch::Rest => {
                            self.voices[channel].set_to_rest();
                            self.voices[channel].confirm_first_note_is_rest();
                        }
                        Pitch::Tone(freq) => self.voices[channel].set_new_note(freq),
                    }
                }
            }
        }

        while self.drum_cursor.event_index < self.song.drums.events.len()
            && self.song.drums.events[self.drum_cursor.event_index].frame == 0
        {
            let kind = self.song.drums.events[self.drum_cursor.event_index].kind;
            self.apply_drum_event(kind);
            self.drum_cursor.event_index += 1;
        }

        self.drum_silenced = false;
        match self.song.drums.notes.first().copied() {
            None => {
                self.drum_cursor.done = true;
                self.drum_enabled = false;
            }
            Some(note) => {
                self.drum_cursor.remaining = note.frames as i64;
                match note.kind {
                    Some(kind) => self.drum.set_new_drum(kind),
                    None => self.drum.rest(),
                }
            }
        }
    }

    // ----- per-frame rendering ---------------------------------------------

    /// Produce one stereo frame and advance the song by one sample
    pub fn render_frame(&mut self, sfx: &mut SfxSlots) -> (f32, f32) {
        for i in 0..NUM_CHANNELS {
            self.voice_out[i] = self.voices[i].output();
        }
        self.drum_out = self.drum.output();

        let left = self.mix_side(0, sfx);
        let right = self.mix_side(1, sfx);

        self.advance_cursors();

        if self.all_channels_done() {
            self.flush_pending_events();
            if self.loop_enabled {
                log::debug!("looping back to beginning at frame {}", self.frame_pos);
                self.reenable_all_channels();
                self.go_to_beginning();
            } else if self.repeats_remaining > 1 {
                self.repeats_remaining -= 1;
                log::debug!("repeat pass, {} remaining", self.repeats_remaining);
                self.reenable_all_channels();
                self.go_to_beginning();
            }
        }

        if !self.song_finished {
            self.frame_pos += 1;
            self.advance_voices();
            if self.frame_pos >= self.song_last_frame {
                self.song_finished = true;
            }
        }

        (left, right)
    }

    fn mix_side(&mut self, side: usize, sfx: &mut SfxSlots) -> f32 {
        let mut mix = 0.0f32;

        for i in 0..NUM_CHANNELS {
            if !self.enabled[i] || self.silenced[i] {
                continue;
            }
            if self.ring_mod_enabled[i] {
                if let Some(feed) = self.ring_mod_feed[i] {
                    mix += compress(
                        self.voice_out[i] * self.voice_out[feed],
                        COMP_THRESHOLD,
                        COMP_RATIO,
                    );
                }
            } else if !self.ring_mod_mute[i] {
                mix += compress(self.voice_out[i], COMP_THRESHOLD, COMP_RATIO);
            }
        }

        if self.drum_enabled && !self.drum_silenced {
            mix += compress(self.drum_out, COMP_THRESHOLD, COMP_RATIO);
        }

        if self.delay_enabled {
            mix += self.delay[side].update(mix);
        }

        mix = compress(mix * self.master_gain, COMP_THRESHOLD, COMP_RATIO);
        mix += sfx.output(side);

        mix.clamp(-MASTER_OUT_CAP, MASTER_OUT_CAP)
    }

    fn advance_cursors(&mut self) {
        for channel in 0..NUM_CHANNELS {
            if self.cursors[channel].done {
                continue;
            }

            while self.cursors[channel].event_index < self.song.tracks[channel].events.len()
                && self.song.tracks[channel].events[self.cursors[channel].event_index].frame
                    <= self.frame_pos
            {
                let kind = self.song.tracks[channel].events[self.cursors[channel].event_index].kind;
                self.apply_event(channel, kind);
                self.cursors[channel].event_index += 1;
            }

            self.cursors[channel].remaining -= 1;
            if self.cursors[channel].remaining <= 0 {
                self.cursors[channel].note_index += 1;
                match self.song.tracks[channel].notes.get(self.cursors[channel].note_index).copied() {
                    None => {
                        // stream exhausted; the release and delay tails keep
                        // sounding until the song's absolute last frame
                        self.cursors[channel].done = true;
                        self.voices[channel].set_to_rest();
                    }
                    Some(note) => {
                        self.cursors[channel].remaining = note.frames as i64;
                        match note.pitch {
                            Pitch::Rest => self.voices[channel].set_to_rest(),
                            Pitch::Tone(freq) => self.voices[channel].set_new_note(freq),
                        }
                    }
                }
            }
        }

        if !self.drum_cursor.done {
            while self.drum_cursor.event_index < self.song.drums.events.len()
                && self.song.drums.events[self.drum_cursor.event_index].frame <= self.frame_pos
            {
                let kind = self.song.drums.events[self.drum_cursor.event_index].kind;
                self.apply_drum_event(kind);
                self.drum_cursor.event_index += 1;
            }

            self.drum_cursor.remaining -= 1;
            if self.drum_cursor.remaining <= 0 {
                self.drum_cursor.note_index += 1;
                match self.song.drums.notes.get(self.drum_cursor.note_index).copied() {
                    None => {
                        self.drum_cursor.done = true;
                        self.drum.rest();
                    }
                    Some(note) => {
                        self.drum_cursor.remaining = note.frames as i64;
                        match note.kind {
                            Some(kind) => self.drum.set_new_drum(kind),
                            None => self.drum.rest(),
                        }
                    }
                }
            }
        }
    }

    fn all_channels_done(&self) -> bool {
        self.cursors.iter().all(|c| c.done) && self.drum_cursor.done
    }

    /// Events scheduled at a channel's final frame must land before looping
    fn flush_pending_events(&mut self) {
        for channel in 0..NUM_CHANNELS {
            while self.cursors[channel].event_index < self.song.tracks[channel].events.len() {
                let kind = self.song.tracks[channel].events[self.cursors[channel].event_index].kind;
                self.apply_event(channel, kind);
                self.cursors[channel].event_index += 1;
            }
        }
        while self.drum_cursor.event_index < self.song.drums.events.len() {
            let kind = self.song.drums.events[self.drum_cursor.event_index].kind;
            self.apply_drum_event(kind);
            self.drum_cursor.event_index += 1;
        }
    }

    fn reenable_all_channels(&mut self) {
        for i in 0..NUM_CHANNELS {
            self.enabled[i] = true;
        }
        self.drum_enabled = true;
    }

    fn advance_voices(&mut self) {
        for voice in self.voices.iter_mut() {
            voice.advance();
        }
        self.drum.advance();
    }

    // ----- event application -----------------------------------------------

    fn apply_event(&mut self, channel: usize, kind: EventKind) {
        let voice = &mut self.voices[channel];
        match kind {
            EventKind::Volume(v) => voice.set_gain(v as f32 / 20.0),
            EventKind::VolumeUp => {
                let gain = (voice.gain() + 0.05).min(0.5);
                voice.set_gain(gain);
            }
            EventKind::VolumeDown => {
                let gain = (voice.gain() - 0.05).max(0.001);
                voice.set_gain(gain);
            }
            EventKind::Waveform(v) => voice.set_table(v as i32),
            EventKind::WaveFlip => voice.flip_y_axis(),
            EventKind::AttackTime(ms) => voice.envelope_mut().set_attack_ms(ms),
            EventKind::PeakTime(ms) => voice.envelope_mut().set_peak_ms(ms),
            EventKind::DecayTime(ms) => voice.envelope_mut().set_decay_ms(ms),
            EventKind::ReleaseTime(ms) => voice.envelope_mut().set_release_ms(ms),
            EventKind::PeakLevel(pct) => voice.envelope_mut().set_peak_level(pct as f32 / 100.0),
            EventKind::SustainLevel(pct) => {
                voice.envelope_mut().set_sustain_level(pct as f32 / 100.0)
            }
            EventKind::LfoOn => voice.enable_lfo(),
            EventKind::LfoOff => voice.disable_lfo(),
            EventKind::LfoRange(cents) => voice.lfo_mut().set_range_cents(cents),
            EventKind::LfoSpeed(hz) => voice.lfo_mut().set_speed_hz(hz as f64),
            EventKind::LfoWait(ms) => voice.lfo_mut().set_wait_ms(ms),
            EventKind::AstroOn(cps) => voice.enable_astro(cps),
            EventKind::AstroOff => voice.disable_astro(),
            EventKind::FallStart => voice.start_fall(),
            EventKind::FallSpeed(v) => voice.set_fall_speed(v as f64),
            EventKind::FallWait(ms) => voice.set_fall_wait_ms(ms as f64),
            EventKind::RiseStart => voice.start_rise(),
            EventKind::RiseSpeed(v) => voice.set_rise_speed(v as f64),
            EventKind::RiseRange(v) => voice.set_rise_range(v as f64),
            EventKind::BeefUp(v) => {
                if v == 0 {
                    voice.disable_beef_up();
                } else {
                    voice.enable_beef_up();
                    voice.set_beef_up_factor(v as f32 * 3.0 / 100.0 + 1.0);
                }
            }
            EventKind::RingModOn(feed) => self.enable_ring_mod(channel, feed),
            EventKind::RingModOff => self.disable_ring_mod(channel),
            EventKind::DefaultTone | EventKind::PresetBeep => {
                voice.set_table(1);
                voice.envelope_mut().set_adsr(0, 0, 0, 0, 0.65, 0.65);
            }
            EventKind::PresetPoppy => {
                voice.set_table(1);
                voice.envelope_mut().set_adsr(0, 50, 10, 50, 0.90, 0.40);
            }
            EventKind::PresetPoppyVib => {
                voice.set_table(1);
                voice.envelope_mut().set_adsr(0, 50, 10, 50, 0.90, 0.40);
                voice.enable_lfo();
                voice.lfo_mut().set_range_cents(22);
                voice.lfo_mut().set_wait_ms(250);
                voice.lfo_mut().set_speed_hz(6.0);
            }
            EventKind::PresetBell => {
                voice.set_table(1);
                voice.envelope_mut().set_adsr(0, 0, 800, 0, 0.80, 0.0);
            }
        }
    }

    fn enable_ring_mod(&mut self, channel: usize, feed: usize) {
        if feed >= NUM_CHANNELS {
            return;
        }
        self.ring_mod_enabled[channel] = true;
        self.ring_mod_feed[channel] = Some(feed);
        self.ring_mod_mute[feed] = true;
    }

    fn disable_ring_mod(&mut self, channel: usize) {
        let feed = self.ring_mod_feed[channel].take();
        self.ring_mod_enabled[channel] = false;
        if let Some(feed) = feed {
            // revive the feeder only if no other channel still modulates by it
            let still_used = self.ring_mod_feed.iter().any(|f| *f == Some(feed));
            if !still_used {
                self.ring_mod_mute[feed] = false;
            }
        }
    }

    fn apply_drum_event(&mut self, kind: DrumEventKind) {
        match kind {
            DrumEventKind::Volume(v) => self.drum.set_gain(v as f32 / 20.0),
            DrumEventKind::VolumeUp => {
                let gain = (self.drum.gain() + 0.05).min(0.5);
                self.drum.set_gain(gain);
            }
            DrumEventKind::VolumeDown => {
                let gain = (self.drum.gain() - 0.05).max(0.001);
                self.drum.set_gain(gain);
            }
            DrumEventKind::ResetDrums => self.drum.reset_drum_tones(),
            DrumEventKind::KickPitch(pct) => {
                self.drum.tune_kick(pct as f64 / 100.0 * 300.0 + 50.0);
            }
            DrumEventKind::SnarePitch(pct) => {
                self.drum.tune_snare(pct as f64 / 100.0 * 1040.0 + 200.0);
            }
            DrumEventKind::HiHatPitch(pct) => {
                self.drum.tune_hihat(pct as f64 / 100.0 * 2400.0 + 1200.0);
            }
            DrumEventKind::BeefUp(v) => {
                if v == 0 {
                    self.drum.disable_beef_up();
                } else {
                    self.drum.enable_beef_up();
                    self.drum.set_beef_up_factor(v as f32 * 1.6 / 100.0 + 1.0);
                }
            }
            DrumEventKind::WhiteNoise => self.drum.use_white_noise(),
            DrumEventKind::PinkNoise => self.drum.use_pink_noise(),
            DrumEventKind::KickNoise(kind) => self.drum.set_kick_noise(kind),
            DrumEventKind::SnareNoise(kind) => self.drum.set_snare_noise(kind),
            DrumEventKind::HiHatNoise(kind) => self.drum.set_hihat_noise(kind),
            DrumEventKind::KickLength(ms) => self.drum.set_kick_length_ms(ms),
            DrumEventKind::SnareLength(ms) => self.drum.set_snare_length_ms(ms),
            DrumEventKind::HiHatLength(ms) => self.drum.set_hihat_length_ms(ms),
            DrumEventKind::SquareLevel(pct) => self.drum.set_square_level(pct as f32 / 100.0),
            DrumEventKind::NoiseLevel(pct) => self.drum.set_noise_level(pct as f32 / 100.0),
        }
    }

    // ----- seek ------------------------------------------------------------

    /// Jump to an absolute frame without emitting audio.
    ///
    /// Rewinds, replays every event up to the destination, fast-forwards the
    /// note cursors and clocks each voice silently through the partial note
    /// so envelopes and modulators land in the same state as real playback.
    pub fn seek(&mut self, destination: u64) {
        let destination = destination.min(self.song_last_frame);
        self.go_to_beginning();

        for channel in 0..NUM_CHANNELS {
            while self.cursors[channel].event_index < self.song.tracks[channel].events.len()
                && self.song.tracks[channel].events[self.cursors[channel].event_index].frame
                    <= destination
            {
                let kind = self.song.tracks[channel].events[self.cursors[channel].event_index].kind;
                self.apply_event(channel, kind);
                self.cursors[channel].event_index += 1;
            }

            let mut seek_pos: u64 = 0;
            loop {
                let notes = &self.song.tracks[channel].notes;
                match notes.get(self.cursors[channel].note_index).copied() {
                    None => {
                        self.cursors[channel].done = true;
                        self.voices[channel].set_to_rest();
                        break;
                    }
                    Some(note) => {
                        if seek_pos + note.frames as u64 >= destination {
                            self.cursors[channel].remaining = note.frames as i64;
                            match note.pitch {
                                Pitch::Rest => self.voices[channel].set_to_rest(),
                                Pitch::Tone(freq) => self.voices[channel].set_new_note(freq),
                            }
                            break;
                        }
                        seek_pos += note.frames as u64;
                        self.cursors[channel].note_index += 1;
                    }
                }
            }

            while !self.cursors[channel].done && seek_pos < destination {
                seek_pos += 1;
                self.voices[channel].advance();
                self.cursors[channel].remaining -= 1;
            }
        }

        while self.drum_cursor.event_index < self.song.drums.events.len()
            && self.song.drums.events[self.drum_cursor.event_index].frame <= destination
        {
            let kind = self.song.drums.events[self.drum_cursor.event_index].kind;
            self.apply_drum_event(kind);
            self.drum_cursor.event_index += 1;
        }

        let mut seek_pos: u64 = 0;
        loop {
            match self.song.drums.notes.get(self.drum_cursor.note_index).copied() {
                None => {
                    self.drum_cursor.done = true;
                    self.drum.rest();
                    break;
                }
                Some(note) => {
                    if seek_pos + note.frames as u64 >= destination {
                        self.drum_cursor.remaining = note.frames as i64;
                        match note.kind {
                            Some(kind) => self.drum.set_new_drum(kind),
                            None => self.drum.rest(),
                        }
                        break;
                    }
                    seek_pos += note.frames as u64;
                    self.drum_cursor.note_index += 1;
                }
            }
        }
        while !self.drum_cursor.done && seek_pos < destination {
            seek_pos += 1;
            self.drum.advance();
            self.drum_cursor.remaining -= 1;
        }

        self.frame_pos = destination;
        log::debug!("seek complete at frame {}", destination);
    }

    // ----- accessors and control -------------------------------------------

    pub fn frame_pos(&self) -> u64 {
        self.frame_pos
    }

    pub fn song_last_frame(&self) -> u64 {
        self.song_last_frame
    }

    pub fn song_last_frame_pure(&self) -> u64 {
        self.song_last_frame_pure
    }

    pub fn is_song_finished(&self) -> bool {
        self.song_finished
    }

    /// True once playback has passed the end of the last note
    pub fn finished(&self) -> bool {
        self.song_finished || self.frame_pos >= self.song_last_frame_pure
    }

    /// Fraction of the song played so far; 0 after the song finishes
    pub fn progress_ratio(&self) -> f32 {
        if self.song_finished || self.song_last_frame_pure == 0 {
            return 0.0;
        }
        self.frame_pos as f32 / self.song_last_frame_pure as f32
    }

    pub fn bookmark(&self) -> u64 {
        self.bookmark
    }

    pub fn master_gain(&self) -> f32 {
        self.master_gain
    }

    pub fn set_master_gain(&mut self, gain: f32) {
        self.master_gain = gain.clamp(0.0, 1.0);
    }

    pub fn enable_looping(&mut self) {
        self.loop_enabled = true;
    }

    pub fn disable_looping(&mut self) {
        self.loop_enabled = false;
    }

    pub fn delay_enabled(&self) -> bool {
        self.delay_enabled
    }

    pub fn enable_delay(&mut self) {
        self.delay_enabled = true;
    }

    pub fn disable_delay(&mut self) {
        self.delay_enabled = false;
        self.delay[0].clear_buffer();
        self.delay[1].clear_buffer();
    }

    pub fn enable_channel(&mut self, channel: usize) {
        self.enabled[channel.min(NUM_CHANNELS - 1)] = true;
    }

    pub fn disable_channel(&mut self, channel: usize) {
        self.enabled[channel.min(NUM_CHANNELS - 1)] = false;
    }

    pub fn silence_channel(&mut self, channel: usize) {
        self.silenced[channel.min(NUM_CHANNELS - 1)] = true;
    }

    pub fn activate_channel(&mut self, channel: usize) {
        self.silenced[channel.min(NUM_CHANNELS - 1)] = false;
    }

    pub fn enable_drum_channel(&mut self) {
        self.drum_enabled = true;
    }

    pub fn disable_drum_channel(&mut self) {
        self.drum_enabled = false;
    }

    pub fn channel_gain(&self, channel: usize) -> f32 {
        self.voices[channel.min(NUM_CHANNELS - 1)].gain()
    }

    pub fn set_channel_gain(&mut self, channel: usize, gain: f32) {
        self.voices[channel.min(NUM_CHANNELS - 1)].set_gain(gain);
    }

    /// Averaged recent level per channel (nine melodic, then drums)
    pub fn channel_levels(&self) -> [f32; NUM_CHANNELS + 1] {
        let mut levels = [0.0; NUM_CHANNELS + 1];
        for i in 0..NUM_CHANNELS {
            levels[i] = self.voices[i].historical_average();
        }
        levels[NUM_CHANNELS] = self.drum.historical_average();
        levels
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mml;
    use crate::sfx::SfxBank;

    fn render(seq: &mut Sequencer, bank: &SfxBank, frames: usize) -> Vec<(f32, f32)> {
        let mut sfx = bank.lock();
        (0..frames).map(|_| seq.render_frame(&mut sfx)).collect()
    }

    #[test]
    fn middle_c_renders_and_ends() {
        // S1: one quarter note, no delay, no loop
        let mut seq = Sequencer::new();
        seq.set_song(mml::parse("@g TEMPO=120 DELAY=OFF LOOP=OFF @1 L4 C"));
        assert_eq!(seq.song_last_frame_pure(), 22050);
        let bank = SfxBank::new();
        let frames = render(&mut seq, &bank, 22050);
        let peak = frames.iter().map(|f| f.0.abs()).fold(0.0f32, f32::max);
        assert!(peak > 0.01);
        let last_frame = seq.song_last_frame() as usize;
        render(&mut seq, &bank, last_frame);
        assert!(seq.is_song_finished());
    }

    #[test]
    fn empty_song_finishes_immediately() {
        let mut seq = Sequencer::new();
        seq.set_song(mml::parse(""));
        assert_eq!(seq.song_last_frame_pure(), 0);
        assert!(seq.finished());
    }

    #[test]
    fn leading_rest_renders_exact_silence() {
        // S4: the voice must stay at exactly 0.0 through the rest
        let mut seq = Sequencer::new();
        seq.set_song(mml::parse("@g TEMPO=120 DELAY=OFF LOOP=OFF @1 L4 :C"));
        let bank = SfxBank::new();
        let frames = render(&mut seq, &bank, 22050);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.0, 0.0, "frame {}", i);
            assert_eq!(frame.1, 0.0, "frame {}", i);
        }
        let rest = render(&mut seq, &bank, 22050);
        let peak = rest.iter().map(|f| f.0.abs()).fold(0.0f32, f32::max);
        assert!(peak > 0.01);
    }

    #[test]
    fn output_never_exceeds_master_cap() {
        let mut seq = Sequencer::new();
        seq.set_song(mml::parse(
            "@g TEMPO=200 MASTERVOLUME=99 @1 L1 V10 BEEFUP=100 C @2 L1 V10 C @3 L1 V10 C \
             @4 L1 V10 C @5 L1 V10 C @d L1 V10 BEEFUP=100 K",
        ));
        let bank = SfxBank::new();
        for frame in render(&mut seq, &bank, 30000) {
            assert!(frame.0.abs() <= MASTER_OUT_CAP);
            assert!(frame.1.abs() <= MASTER_OUT_CAP);
        }
    }

    #[test]
    fn ring_mod_mutes_the_feeder() {
        // S5: channel 2 only feeds channel 1's ring modulation
        let mut seq = Sequencer::new();
        seq.set_song(mml::parse("@g LOOP=OFF @1 L4 RINGMOD=2 C @2 L4 G"));
        assert!(seq.ring_mod_enabled[0]);
        assert_eq!(seq.ring_mod_feed[0], Some(1));
        assert!(seq.ring_mod_mute[1]);
        assert_eq!(seq.song_last_frame_pure(), 22050);
    }

    #[test]
    fn ring_mod_off_revives_feeder() {
        let mut seq = Sequencer::new();
        seq.set_song(mml::parse("@1 RINGMOD=2 C RINGMOD=OFF C @2 CC"));
        let bank = SfxBank::new();
        let last_frame = seq.song_last_frame_pure() as usize;
        render(&mut seq, &bank, last_frame);
        assert!(!seq.ring_mod_enabled[0]);
        assert!(!seq.ring_mod_mute[1]);
    }

    #[test]
    fn volume_events_change_channel_gain() {
        let mut seq = Sequencer::new();
        seq.set_song(mml::parse("@g LOOP=OFF @1 L4 V4 C ^^ D"));
        assert!((seq.channel_gain(0) - 0.2).abs() < 1e-6);
        let bank = SfxBank::new();
        render(&mut seq, &bank, 22052);
        assert!((seq.channel_gain(0) - 0.3).abs() < 1e-6);
    }

    #[test]
    fn delay_tail_rings_past_the_last_note() {
        // property 5: after the last note only the delay echo remains
        let mut seq = Sequencer::new();
        seq.set_song(mml::parse(
            "@g TEMPO=120 LOOP=OFF DELAY=ON DELAYTIME=100 DELAYLEVEL=50 @1 L4 RELEASETIME=1 C",
        ));
        let bank = SfxBank::new();
        let pure = seq.song_last_frame_pure() as usize;
        render(&mut seq, &bank, pure);
        // skip the short release tail, then look for echo energy
        render(&mut seq, &bank, 2000);
        let tail = render(&mut seq, &bank, 4000);
        let peak = tail.iter().map(|f| f.0.abs()).fold(0.0f32, f32::max);
        assert!(peak > 0.0, "delay tail should ring past the note stream");
    }

    #[test]
    fn looping_rewinds_to_frame_zero() {
        let mut seq = Sequencer::new();
        seq.set_song(mml::parse("@g TEMPO=400 LOOP=ON DELAY=OFF @1 L32 C"));
        let bank = SfxBank::new();
        let total = seq.song_last_frame_pure();
        render(&mut seq, &bank, total as usize + 10);
        assert!(!seq.is_song_finished());
        assert!(seq.frame_pos() < total + 10);
    }

    #[test]
    fn repeat_count_plays_n_times_then_finishes() {
        let mut seq = Sequencer::new();
        seq.set_song(mml::parse("@g TEMPO=400 REPEAT=2 DELAY=OFF @1 L32 C"));
        let bank = SfxBank::new();
        let last = seq.song_last_frame();
        // two passes plus tail padding is more than enough
        render(&mut seq, &bank, (last as usize) * 3);
        assert!(seq.is_song_finished());
    }

    #[test]
    fn seek_matches_straight_playback() {
        // property 6: voice state after seek(d) equals state after playing d
        // frames (delay contents aside)
        let source = "@g TEMPO=120 LOOP=OFF DELAY=OFF @1 L8 CDEFGAB>C @d L8 KSKS";
        let bank = SfxBank::new();

        let mut played = Sequencer::new();
        played.set_song(mml::parse(source));
        let dest = 30000u64;
        render(&mut played, &bank, dest as usize);

        let mut sought = Sequencer::new();
        sought.set_song(mml::parse(source));
        sought.seek(dest);

        assert_eq!(played.frame_pos(), sought.frame_pos());
        for ch in 0..NUM_CHANNELS {
            assert_eq!(played.cursors[ch].note_index, sought.cursors[ch].note_index, "ch {}", ch);
            assert_eq!(played.cursors[ch].remaining, sought.cursors[ch].remaining, "ch {}", ch);
        }
        assert_eq!(played.drum_cursor.note_index, sought.drum_cursor.note_index);
        assert_eq!(played.drum_cursor.remaining, sought.drum_cursor.remaining);

        // both continue producing audio from the same position
        let next_played = render(&mut played, &bank, 256);
        let next_sought = render(&mut sought, &bank, 256);
        let peak_played = next_played.iter().map(|f| f.0.abs()).fold(0.0f32, f32::max);
        let peak_sought = next_sought.iter().map(|f| f.0.abs()).fold(0.0f32, f32::max);
        assert!(peak_played > 0.01);
        assert!(peak_sought > 0.01);
    }

    #[test]
    fn seek_past_end_clamps() {
        let mut seq = Sequencer::new();
        seq.set_song(mml::parse("@g LOOP=OFF @1 L4 C"));
        seq.seek(u64::MAX);
        assert_eq!(seq.frame_pos(), seq.song_last_frame());
    }

    #[test]
    fn pending_events_flush_before_loop() {
        // the WAVEFORM event sits at the channel's final frame; after one
        // loop pass it must have been applied exactly once
        let mut seq = Sequencer::new();
        seq.set_song(mml::parse("@g TEMPO=400 REPEAT=2 DELAY=OFF @1 L32 C WAVEFORM=0"));
        let bank = SfxBank::new();
        let total = seq.song_last_frame_pure();
        render(&mut seq, &bank, total as usize + 2);
        assert_eq!(seq.voices[0].table_tag(), 0);
    }

    #[test]
    fn delay_toggle_preserves_player_settings() {
        let mut seq = Sequencer::new();
        seq.set_song(mml::parse("@g TEMPO=120 DELAY=ON DELAYLEVEL=40 MASTERVOLUME=60 @1 L4 C"));
        let gain_before = seq.master_gain();
        seq.disable_delay();
        assert!(!seq.delay_enabled());
        seq.enable_delay();
        assert!(seq.delay_enabled());
        assert_eq!(seq.master_gain(), gain_before);
        assert_eq!(seq.song_last_frame(), seq.song_last_frame_pure() + seq.delay[0].total_delay_frames().max(seq.delay[1].total_delay_frames()) + 1000);
    }

    #[test]
    fn channel_levels_report_activity() {
        let mut seq = Sequencer::new();
        seq.set_song(mml::parse("@g LOOP=OFF @1 L1 C"));
        let bank = SfxBank::new();
        render(&mut seq, &bank, 8192);
        let levels = seq.channel_levels();
        assert!(levels[0] > 0.0);
        assert_eq!(levels[1], 0.0);
    }
}
