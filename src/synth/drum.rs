//! Noise-plus-pitched drum voice
//!
//! Three-way signal: a white or pink noise table, plus a square "pitched"
//! element whose frequency falls during the hit transient. Six presets
//! cover loud and quiet kick/snare/hi-hat.

use rand::Rng;

use crate::SAMPLE_RATE;

const NOISE_TABLE_SIZE: usize = 9999;
const PITCH_TABLE_SIZE: usize = 4096;
const HISTORY_SIZE: usize = 64;

/// Drum hit kinds in preset order; quiet variants differ only in level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrumKind {
    Kick,
    Snare,
    HiHat,
    KickQuiet,
    SnareQuiet,
    HiHatQuiet,
}

impl DrumKind {
    pub fn index(self) -> usize {
        match self {
            DrumKind::Kick => 0,
            DrumKind::Snare => 1,
            DrumKind::HiHat => 2,
            DrumKind::KickQuiet => 3,
            DrumKind::SnareQuiet => 4,
            DrumKind::HiHatQuiet => 5,
        }
    }
}

/// Noise flavor per preset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseKind {
    White,
    Pink,
}

/// Envelope and transient parameters for one preset
#[derive(Clone, Copy)]
struct DrumTone {
    attack_frames: u32,
    peak_frames: u32,
    decay_frames: u32,
    env_frames: u32,
    peak_level: f32,
    frequency: f64,
    pitch_fall_delta: f64,
    pitch_fall_limit: f64,
    pitch_start_level: f32,
    level_fall_delta: f32,
}

impl DrumTone {
    /// attack/peak/decay and transient time in ms; `fall_ratio` divides the
    /// base frequency to give the total pitch drop
    fn new(
        attack_ms: f64,
        peak_ms: f64,
        decay_ms: f64,
        peak_level: f32,
        freq: f64,
        transient_ms: f64,
        pitch_start_level: f32,
        fall_ratio: f64,
    ) -> Self {
        let attack_frames = (SAMPLE_RATE * attack_ms / 1000.0) as u32;
        let peak_frames = (SAMPLE_RATE * peak_ms / 1000.0) as u32;
        let decay_frames = (SAMPLE_RATE * decay_ms / 1000.0) as u32;
        let transient_frames = SAMPLE_RATE * transient_ms / 1000.0;
        Self {
            attack_frames,
            peak_frames,
            decay_frames,
            env_frames: attack_frames + peak_frames + decay_frames,
            peak_level,
            frequency: freq,
            pitch_fall_delta: (freq / fall_ratio) / transient_frames,
            pitch_fall_limit: freq / fall_ratio,
            pitch_start_level,
            level_fall_delta: peak_level / transient_frames as f32,
        }
    }
}

pub struct DrumVoice {
    white_table: Vec<f32>,
    pink_table: Vec<f32>,
    pitch_table: Vec<f32>,

    tones: [DrumTone; 6],
    noise_kind: [NoiseKind; 6],

    // user tuning retained across length/pitch changes
    kick_freq: f64,
    snare_freq: f64,
    hihat_freq: f64,
    kick_peak_ms: f64,
    kick_decay_ms: f64,
    snare_peak_ms: f64,
    snare_decay_ms: f64,
    hihat_peak_ms: f64,
    hihat_decay_ms: f64,

    square_level: f32,
    noise_level: f32,

    phase: f64,
    pitch_phase: f64,
    increment: f64,
    gain: f32,
    resting: bool,
    current: usize,
    pitch_level: f32,
    pitch_fall: f64,

    env_pos: u32,
    env_finished: bool,

    beef_up: bool,
    beef_up_factor: f32,
    beef_up_factor_noise: f32,

    history: [f32; HISTORY_SIZE],
    history_index: usize,
    history_wait: u32,
}

fn default_tones() -> [DrumTone; 6] {
    [
        DrumTone::new(1.0, 25.0, 15.0, 0.8, 200.0, 50.0, 0.9, 2.0),
        DrumTone::new(1.0, 20.0, 120.0, 0.95, 720.0, 100.0, 0.85, 1.2),
        DrumTone::new(1.0, 17.0, 3.0, 0.5, 2400.0, 1.0, 0.2, 2.0),
        DrumTone::new(1.0, 25.0, 15.0, 0.4, 200.0, 50.0, 0.5, 2.0),
        DrumTone::new(1.0, 20.0, 120.0, 0.5, 720.0, 100.0, 0.45, 1.2),
        DrumTone::new(1.0, 17.0, 3.0, 0.2, 2400.0, 1.0, 0.1, 2.0),
    ]
}

impl DrumVoice {
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        let white_table: Vec<f32> = (0..NOISE_TABLE_SIZE)
            .map(|_| rng.gen::<f32>() * 2.0 - 1.0)
            .collect();

        // pink noise via Paul Kellet's economy filter over the white table
        let mut pink_table = vec![0.0f32; NOISE_TABLE_SIZE];
        let (mut b0, mut b1, mut b2) = (0.0f32, 0.0f32, 0.0f32);
        for (i, &white) in white_table.iter().enumerate() {
            b0 = 0.99765 * b0 + white * 0.0990460;
            b1 = 0.96300 * b1 + white * 0.2965164;
            b2 = 0.57000 * b2 + white * 1.0526913;
            pink_table[i] = (b0 + b1 + b2 + white * 0.1848) * 0.32;
        }

        let mut pitch_table = vec![0.95f32; PITCH_TABLE_SIZE];
        for slot in pitch_table.iter_mut().skip(PITCH_TABLE_SIZE / 2) {
            *slot = -0.95;
        }

        Self {
            white_table,
            pink_table,
            pitch_table,
            tones: default_tones(),
            noise_kind: [NoiseKind::White; 6],
            kick_freq: 200.0,
            snare_freq: 720.0,
            hihat_freq: 2400.0,
            kick_peak_ms: 25.0,
            kick_decay_ms: 15.0,
            snare_peak_ms: 20.0,
            snare_decay_ms: 120.0,
            hihat_peak_ms: 17.0,
            hihat_decay_ms: 3.0,
            square_level: 1.0,
            noise_level: 1.0,
            phase: 0.0,
            pitch_phase: 0.0,
            increment: 0.0,
            gain: 0.5,
            resting: true,
            current: 0,
            pitch_level: 1.0,
            pitch_fall: 0.0,
            env_pos: 0,
            env_finished: false,
            beef_up: false,
            beef_up_factor: 1.0,
            beef_up_factor_noise: 1.0,
            history: [0.0; HISTORY_SIZE],
            history_index: 0,
            history_wait: 0,
        }
    }

    // ----- configuration ---------------------------------------------------

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Restore every preset, tuning and level to default
    pub fn reset_drum_tones(&mut self) {
        self.square_level = 1.0;
        self.noise_level = 1.0;
        self.use_white_noise();
        self.tones = default_tones();
        self.kick_freq = 200.0;
        self.snare_freq = 720.0;
        self.hihat_freq = 2400.0;
        self.kick_peak_ms = 25.0;
        self.kick_decay_ms = 15.0;
        self.snare_peak_ms = 20.0;
        self.snare_decay_ms = 120.0;
        self.hihat_peak_ms = 17.0;
        self.hihat_decay_ms = 3.0;
    }

    fn rebuild_kick(&mut self) {
        self.tones[0] = DrumTone::new(1.0, self.kick_peak_ms, self.kick_decay_ms, 0.8, self.kick_freq, 50.0, 0.9, 2.0);
        self.tones[3] = DrumTone::new(1.0, self.kick_peak_ms, self.kick_decay_ms, 0.4, self.kick_freq, 50.0, 0.5, 2.0);
    }

    fn rebuild_snare(&mut self) {
        self.tones[1] = DrumTone::new(1.0, self.snare_peak_ms, self.snare_decay_ms, 0.95, self.snare_freq, 100.0, 0.85, 1.2);
        self.tones[4] = DrumTone::new(1.0, self.snare_peak_ms, self.snare_decay_ms, 0.5, self.snare_freq, 100.0, 0.45, 1.2);
    }

    fn rebuild_hihat(&mut self) {
        self.tones[2] = DrumTone::new(1.0, self.hihat_peak_ms, self.hihat_decay_ms, 0.5, self.hihat_freq, 1.0, 0.2, 2.0);
        self.tones[5] = DrumTone::new(1.0, self.hihat_peak_ms, self.hihat_decay_ms, 0.2, self.hihat_freq, 1.0, 0.1, 2.0);
    }

    /// Kick hit length in ms (peak is fixed at 25 ms, decay takes the rest)
    pub fn set_kick_length_ms(&mut self, ms: u32) {
        let len = ms.min(400) as f64;
        let (peak, decay) = if len >= 25.0 { (25.0, len - 25.0) } else { (len, 0.0) };
        self.kick_peak_ms = peak;
        self.kick_decay_ms = decay;
        self.rebuild_kick();
    }

    pub fn set_snare_length_ms(&mut self, ms: u32) {
        let len = ms.min(1000) as f64;
        let (peak, decay) = if len >= 20.0 { (20.0, len - 20.0) } else { (len, 0.0) };
        self.snare_peak_ms = peak;
        self.snare_decay_ms = decay;
        self.rebuild_snare();
    }

    pub fn set_hihat_length_ms(&mut self, ms: u32) {
        let len = ms.min(1000) as f64;
        let (peak, decay) = if len >= 17.0 { (17.0, len - 17.0) } else { (len, 0.0) };
        self.hihat_peak_ms = peak;
        self.hihat_decay_ms = decay;
        self.rebuild_hihat();
    }

    /// Kick base frequency, clamped to 50..350 Hz
    pub fn tune_kick(&mut self, freq: f64) {
        self.kick_freq = freq.clamp(50.0, 350.0);
        self.rebuild_kick();
    }

    /// Snare base frequency, clamped to 200..1240 Hz
    pub fn tune_snare(&mut self, freq: f64) {
        self.snare_freq = freq.clamp(200.0, 1240.0);
        self.rebuild_snare();
    }

    /// Hi-hat base frequency, clamped to 1200..3600 Hz
    pub fn tune_hihat(&mut self, freq: f64) {
        self.hihat_freq = freq.clamp(1200.0, 3600.0);
        self.rebuild_hihat();
    }

    pub fn use_white_noise(&mut self) {
        self.noise_kind = [NoiseKind::White; 6];
    }

    pub fn use_pink_noise(&mut self) {
        self.noise_kind = [NoiseKind::Pink; 6];
    }

    pub fn set_kick_noise(&mut self, kind: NoiseKind) {
        self.noise_kind[0] = kind;
        self.noise_kind[3] = kind;
    }

    pub fn set_snare_noise(&mut self, kind: NoiseKind) {
        self.noise_kind[1] = kind;
        self.noise_kind[4] = kind;
    }

    pub fn set_hihat_noise(&mut self, kind: NoiseKind) {
        self.noise_kind[2] = kind;
        self.noise_kind[5] = kind;
    }

    pub fn set_square_level(&mut self, level: f32) {
        self.square_level = level;
    }

    pub fn set_noise_level(&mut self, level: f32) {
        self.noise_level = level;
    }

    pub fn enable_beef_up(&mut self) {
        self.beef_up = true;
    }

    pub fn disable_beef_up(&mut self) {
        self.beef_up = false;
    }

    /// Boost factor works on the pitched element; the noise element gets a
    /// scaled-back version
    pub fn set_beef_up_factor(&mut self, factor: f32) {
        self.beef_up_factor = factor;
        self.beef_up_factor_noise = (factor - 1.0) * 0.80 + 1.0;
    }

    // ----- note control ----------------------------------------------------

    pub fn set_new_drum(&mut self, kind: DrumKind) {
        self.resting = false;
        self.current = kind.index();
        self.pitch_fall = 0.0;
        self.pitch_level = self.tones[self.current].pitch_start_level;
        self.set_increment();
        self.phase = 0.0;
        self.env_pos = 0;
        self.env_finished = false;
    }

    pub fn rest(&mut self) {
        self.resting = true;
    }

    pub fn is_resting(&self) -> bool {
        self.resting
    }

    // ----- per-sample processing -------------------------------------------

    fn set_increment(&mut self) {
        let adjusted = self.tones[self.current].frequency + self.pitch_fall;
        self.increment = (PITCH_TABLE_SIZE as f64 * adjusted / SAMPLE_RATE).max(0.0);
    }

    pub fn advance(&mut self) {
        self.phase += 1.0;
        if self.phase >= NOISE_TABLE_SIZE as f64 {
            self.phase -= NOISE_TABLE_SIZE as f64;
        }

        self.pitch_phase += self.increment;
        while self.pitch_phase >= PITCH_TABLE_SIZE as f64 {
            self.pitch_phase -= PITCH_TABLE_SIZE as f64;
        }

        self.set_increment();

        let tone = &self.tones[self.current];
        if self.pitch_fall > -tone.pitch_fall_limit {
            self.pitch_fall -= tone.pitch_fall_delta;
        }
        self.pitch_level = (self.pitch_level - tone.level_fall_delta).max(0.0);

        if !self.env_finished {
            self.env_pos += 1;
            if self.env_pos >= tone.env_frames {
                self.env_finished = true;
            }
        }
    }

    fn envelope_output(&self) -> f32 {
        if self.resting {
            return 0.0;
        }
        let tone = &self.tones[self.current];
        if self.env_pos < tone.attack_frames {
            (self.env_pos as f32 / tone.attack_frames as f32) * tone.peak_level
        } else if self.env_pos < tone.attack_frames + tone.peak_frames {
            tone.peak_level
        } else if self.env_pos < tone.env_frames {
            let decay_pos = self.env_pos - tone.attack_frames - tone.peak_frames;
            tone.peak_level - (decay_pos as f32 / tone.decay_frames as f32) * tone.peak_level
        } else {
            0.0
        }
    }

    pub fn output(&mut self) -> f32 {
        let ph = self.phase as usize;
        let noise_out = match self.noise_kind[self.current] {
            NoiseKind::Pink => self.pink_table[ph] * self.noise_level,
            NoiseKind::White => self.white_table[ph] * self.noise_level,
        };
        let pitch_out = self.pitch_table[self.pitch_phase as usize] * self.pitch_level * self.square_level;

        let env = self.envelope_output();
        let out = if !self.beef_up {
            (noise_out * self.gain + pitch_out * self.gain) * env
        } else {
            let boosted = pitch_out * self.gain * env * self.beef_up_factor
                + noise_out * self.gain * env * self.beef_up_factor_noise;
            boosted.clamp(-0.99, 0.99)
        };

        self.history_wait += 1;
        if self.history_wait >= 8 {
            self.push_history(out);
            self.history_wait = 0;
        }

        out
    }

    // ----- metering --------------------------------------------------------

    fn push_history(&mut self, sample: f32) {
        self.history[self.history_index] = sample.abs();
        self.history_index = (self.history_index + 1) % HISTORY_SIZE;
    }

    pub fn historical_average(&self) -> f32 {
        self.history.iter().sum::<f32>() / HISTORY_SIZE as f32
    }

    pub fn clear_history(&mut self) {
        self.history = [0.0; HISTORY_SIZE];
        self.history_index = 0;
        self.history_wait = 0;
    }
}

impl Default for DrumVoice {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resting_voice_is_silent() {
        let mut drum = DrumVoice::new();
        drum.rest();
        for _ in 0..100 {
            drum.advance();
            assert_eq!(drum.output(), 0.0);
        }
    }

    #[test]
    fn kick_produces_transient_then_decays() {
        let mut drum = DrumVoice::new();
        drum.set_new_drum(DrumKind::Kick);
        let mut peak = 0.0f32;
        for _ in 0..2000 {
            drum.advance();
            peak = peak.max(drum.output().abs());
        }
        assert!(peak > 0.1);
        // run past the 41 ms envelope; output must die out
        for _ in 0..(SAMPLE_RATE as usize / 10) {
            drum.advance();
            drum.output();
        }
        drum.advance();
        assert_eq!(drum.output(), 0.0);
    }

    #[test]
    fn quiet_variants_peak_lower() {
        let mut loud = DrumVoice::new();
        let mut quiet = DrumVoice::new();
        // share the noise tables so levels are comparable
        quiet.white_table = loud.white_table.clone();
        quiet.pink_table = loud.pink_table.clone();
        loud.set_new_drum(DrumKind::Snare);
        quiet.set_new_drum(DrumKind::SnareQuiet);
        let mut loud_peak = 0.0f32;
        let mut quiet_peak = 0.0f32;
        for _ in 0..4410 {
            loud.advance();
            quiet.advance();
            loud_peak = loud_peak.max(loud.output().abs());
            quiet_peak = quiet_peak.max(quiet.output().abs());
        }
        assert!(quiet_peak < loud_peak);
    }

    #[test]
    fn tuning_clamps_to_documented_ranges() {
        let mut drum = DrumVoice::new();
        drum.tune_kick(10.0);
        assert_eq!(drum.kick_freq, 50.0);
        drum.tune_kick(1000.0);
        assert_eq!(drum.kick_freq, 350.0);
        drum.tune_snare(5000.0);
        assert_eq!(drum.snare_freq, 1240.0);
        drum.tune_hihat(100.0);
        assert_eq!(drum.hihat_freq, 1200.0);
    }

    #[test]
    fn beef_up_is_brick_limited() {
        let mut drum = DrumVoice::new();
        drum.enable_beef_up();
        drum.set_beef_up_factor(5.0);
        drum.set_gain(1.0);
        drum.set_new_drum(DrumKind::Snare);
        for _ in 0..4410 {
            drum.advance();
            assert!(drum.output().abs() <= 0.99);
        }
    }
}
