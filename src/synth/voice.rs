//! Melodic wavetable voice
//!
//! A phase accumulator over a single-cycle wavetable, combined with the
//! ADSR envelope, vibrato LFO, octave-arpeggio, pitch glides, an optional
//! pre-compressor gain boost and a short cross-fade guard against clicks
//! at note boundaries.

use super::astro::Astro;
use super::envelope::Envelope;
use super::glide::{Fall, Rise};
use super::lfo::Lfo;
use super::wavetable::{WaveTable, TABLE_SIZE};
use super::compress;
use crate::SAMPLE_RATE;

/// Samples over which a new note cross-fades from the previous amplitude
const POP_GUARD_SAMPLES: u32 = 60;

/// Entries in the metering history ring (one entry per 8 output samples)
const HISTORY_SIZE: usize = 64;

pub struct Voice {
    table: WaveTable,
    envelope: Envelope,
    lfo: Lfo,
    astro: Astro,
    fall: Fall,
    rise: Rise,

    phase: f64,
    increment: f64,
    freq: f64,
    adjusted_freq: f64,
    /// Additive Hz offset applied when computing the phase increment
    pub detune: f64,
    gain: f32,
    y_flip: f32,

    lfo_enabled: bool,
    astro_enabled: bool,
    fall_active: bool,
    rise_active: bool,

    beef_up: bool,
    beef_up_factor: f32,

    pop_guard_count: u32,
    last_amp: f32,

    history: [f32; HISTORY_SIZE],
    history_index: usize,
    history_wait: u32,
}

impl Voice {
    pub fn new() -> Self {
        Self {
            table: WaveTable::new(),
            envelope: Envelope::new(),
            lfo: Lfo::new(),
            astro: Astro::new(),
            fall: Fall::new(),
            rise: Rise::new(),
            phase: 0.0,
            increment: 0.0,
            freq: 10.0,
            adjusted_freq: 0.0,
            detune: 0.0,
            gain: 0.5,
            y_flip: 1.0,
            lfo_enabled: false,
            astro_enabled: false,
            fall_active: false,
            rise_active: false,
            beef_up: false,
            beef_up_factor: 1.0,
            pop_guard_count: 0,
            last_amp: 0.0,
            history: [0.0; HISTORY_SIZE],
            history_index: 0,
            history_wait: 0,
        }
    }

    // ----- configuration ---------------------------------------------------

    pub fn set_table(&mut self, tag: i32) {
        self.table.select(tag);
    }

    pub fn table_tag(&self) -> i32 {
        self.table.tag()
    }

    pub fn flip_y_axis(&mut self) {
        self.y_flip = -1.0;
    }

    pub fn reset_y_flip(&mut self) {
        self.y_flip = 1.0;
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }

    pub fn enable_lfo(&mut self) {
        self.lfo_enabled = true;
    }

    pub fn disable_lfo(&mut self) {
        self.lfo_enabled = false;
    }

    pub fn lfo_mut(&mut self) -> &mut Lfo {
        &mut self.lfo
    }

    pub fn enable_astro(&mut self, cycles_per_sec: u32) {
        self.astro_enabled = true;
        self.astro.set_speed(cycles_per_sec);
    }

    pub fn disable_astro(&mut self) {
        self.astro_enabled = false;
    }

    pub fn start_fall(&mut self) {
        self.fall_active = true;
        self.fall.refresh();
    }

    pub fn stop_fall(&mut self) {
        self.fall_active = false;
        self.fall.refresh();
    }

    pub fn set_fall_speed(&mut self, cents_per_sec: f64) {
        self.fall.set_speed(cents_per_sec);
    }

    pub fn set_fall_wait_ms(&mut self, ms: f64) {
        self.fall.set_wait_ms(ms);
    }

    pub fn reset_fall(&mut self) {
        self.fall_active = false;
        self.fall.set_to_default();
    }

    pub fn start_rise(&mut self) {
        self.rise_active = true;
        self.rise.refresh();
    }

    pub fn stop_rise(&mut self) {
        self.rise_active = false;
        self.rise.refresh();
    }

    pub fn set_rise_speed(&mut self, cents_per_sec: f64) {
        self.rise.set_speed(cents_per_sec);
    }

    pub fn set_rise_range(&mut self, cents: f64) {
        self.rise.set_range(cents);
    }

    pub fn reset_rise(&mut self) {
        self.rise_active = false;
        self.rise.set_to_default();
    }

    pub fn enable_beef_up(&mut self) {
        self.beef_up = true;
    }

    pub fn disable_beef_up(&mut self) {
        self.beef_up = false;
    }

    pub fn set_beef_up_factor(&mut self, factor: f32) {
        self.beef_up_factor = factor;
    }

    // ----- note control ----------------------------------------------------

    /// Begin a new note at the given frequency.
    ///
    /// Restarts the envelope and modulators, cancels a glide that has
    /// already made audible progress, and arms the pop guard.
    pub fn set_new_note(&mut self, freq: f64) {
        self.envelope.clear_first_note_flag();
        self.set_frequency(freq);
        self.envelope.refresh();
        self.envelope.set_resting(false);
        if self.fall_active && self.fall.octaves_traveled() > 0.0 {
            self.stop_fall();
        }
        if self.rise_active && self.rise.frames_elapsed() > 30 {
            self.stop_rise();
        }
        self.pop_guard_count = POP_GUARD_SAMPLES;
    }

    /// Enter the release stage
    pub fn set_to_rest(&mut self) {
        self.envelope.set_resting(true);
    }

    pub fn is_resting(&self) -> bool {
        self.envelope.is_resting()
    }

    /// Mark that this channel opens with a rest so no release tail leaks
    pub fn confirm_first_note_is_rest(&mut self) {
        self.envelope.confirm_first_note_is_rest();
    }

    fn set_frequency(&mut self, freq: f64) {
        self.freq = freq;
        self.adjusted_freq = freq;
        self.set_increment(freq);
        if self.lfo_enabled {
            self.lfo.refresh();
        }
        if self.astro_enabled {
            self.astro.refresh();
        }
    }

    fn set_increment(&mut self, freq: f64) {
        self.adjusted_freq = freq + self.detune;
        self.increment = (TABLE_SIZE as f64 * self.adjusted_freq / SAMPLE_RATE).max(0.0);
    }

    /// Reset phase and envelope for the start of a song
    pub fn refresh_for_song_beginning(&mut self) {
        self.phase = 0.0;
        self.last_amp = 0.0;
        self.envelope.refresh();
    }

    /// Restore every per-song setting to its default
    pub fn reset_for_new_song(&mut self) {
        self.set_table(1);
        self.refresh_for_song_beginning();
        self.envelope.set_adsr(22, 18, 250, 40, 0.9, 0.5);
        self.disable_astro();
        self.disable_lfo();
        self.lfo.reset_to_defaults();
        self.detune = 0.0;
        self.reset_rise();
        self.reset_fall();
        self.disable_beef_up();
        self.set_beef_up_factor(1.0);
        self.reset_y_flip();
        self.clear_history();
    }

    // ----- per-sample processing -------------------------------------------

    /// Advance phase, modulators and envelope by one frame
    pub fn advance(&mut self) {
        self.phase += self.increment;
        while self.phase >= TABLE_SIZE as f64 {
            self.phase -= TABLE_SIZE as f64;
        }

        self.adjusted_freq = self.freq;

        if self.astro_enabled {
            self.adjusted_freq = self.astro.process(self.freq);
            if self.astro.state_changed() {
                let f = self.adjusted_freq;
                self.set_increment(f);
            }
            if self.fall_active {
                let f = self.fall.process(self.adjusted_freq);
                self.set_increment(f);
            }
            if self.rise_active {
                let f = self.rise.process(self.adjusted_freq);
                self.set_increment(f);
            }
        } else if self.lfo_enabled {
            let f = self.lfo.process(self.freq).max(10.0);
            self.set_increment(f);
        }

        if self.fall_active && !self.astro_enabled {
            let f = self.fall.process(self.freq);
            self.set_increment(f);
        }
        if self.rise_active && !self.astro_enabled {
            let f = self.rise.process(self.adjusted_freq);
            self.set_increment(f);
        }

        self.envelope.advance();
    }

    /// Current output sample, envelope and gain applied
    pub fn output(&mut self) -> f32 {
        let (env_level, phase_reset) = self.envelope.output();
        if phase_reset {
            self.phase = 0.0;
        }

        let raw = self.table.at(self.phase as usize) * self.y_flip;
        let mut out = raw * env_level;

        if self.beef_up {
            out = compress(out * self.beef_up_factor, 0.90, 4.0).clamp(-0.99, 0.99);
        }

        out *= self.gain;

        if self.pop_guard_count > 0 {
            out = self.pop_guard(out);
        } else {
            self.last_amp = out;
        }

        self.history_wait += 1;
        if self.history_wait >= 8 {
            self.push_history(out);
            self.history_wait = 0;
        }

        out
    }

    /// Cross-fade from the last pre-note amplitude over the guard window.
    /// Runs in a +1.0-offset domain so the weights stay non-negative.
    fn pop_guard(&mut self, input: f32) -> f32 {
        let in_positive = (input + 1.0).max(0.0);
        let last_positive = (self.last_amp + 1.0).max(0.0);
        let mixed = in_positive
            + (last_positive - in_positive) * (self.pop_guard_count as f32 / POP_GUARD_SAMPLES as f32);
        self.pop_guard_count -= 1;
        mixed - 1.0
    }

    // ----- metering --------------------------------------------------------

    fn push_history(&mut self, sample: f32) {
        self.history[self.history_index] = sample.abs();
        self.history_index = (self.history_index + 1) % HISTORY_SIZE;
    }

    /// Average absolute level over the history window
    pub fn historical_average(&self) -> f32 {
        self.history.iter().sum::<f32>() / HISTORY_SIZE as f32
    }

    pub fn clear_history(&mut self) {
        self.history = [0.0; HISTORY_SIZE];
        self.history_index = 0;
        self.history_wait = 0;
    }
}

impl Default for Voice {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_rest_outputs_exact_silence() {
        let mut voice = Voice::new();
        voice.reset_for_new_song();
        voice.set_to_rest();
        voice.confirm_first_note_is_rest();
        for _ in 0..1000 {
            voice.advance();
            assert_eq!(voice.output(), 0.0);
        }
    }

    #[test]
    fn note_produces_signal() {
        let mut voice = Voice::new();
        voice.reset_for_new_song();
        voice.set_new_note(440.0);
        let mut peak = 0.0f32;
        for _ in 0..4410 {
            voice.advance();
            peak = peak.max(voice.output().abs());
        }
        assert!(peak > 0.1);
    }

    #[test]
    fn pop_guard_bounds_sample_steps() {
        let mut voice = Voice::new();
        voice.reset_for_new_song();
        // no attack so the raw note would jump instantly; 100 Hz keeps the
        // square from flipping sign inside the guard window
        voice.envelope_mut().set_adsr(0, 100, 0, 10, 0.9, 0.9);
        voice.set_new_note(100.0);
        let mut last = voice.output();
        let mut max_step = 0.0f32;
        for _ in 0..POP_GUARD_SAMPLES {
            voice.advance();
            let out = voice.output();
            max_step = max_step.max((out - last).abs());
            last = out;
        }
        // one-sixtieth of full scale plus slack for the waveform's own slope
        assert!(max_step <= 0.9 / 60.0 + 0.05, "step {}", max_step);
    }

    #[test]
    fn beef_up_never_exceeds_clamp() {
        let mut voice = Voice::new();
        voice.reset_for_new_song();
        voice.enable_beef_up();
        voice.set_beef_up_factor(4.0);
        voice.set_gain(1.0);
        voice.set_new_note(440.0);
        for _ in 0..4410 {
            voice.advance();
            assert!(voice.output().abs() <= 0.99);
        }
    }

    #[test]
    fn historical_average_tracks_output() {
        let mut voice = Voice::new();
        voice.reset_for_new_song();
        voice.set_new_note(440.0);
        for _ in 0..HISTORY_SIZE * 8 + 8 {
            voice.advance();
            voice.output();
        }
        assert!(voice.historical_average() > 0.0);
        voice.clear_history();
        assert_eq!(voice.historical_average(), 0.0);
    }
}
