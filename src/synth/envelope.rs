//! ADSR amplitude envelope shared by the melodic voices

use crate::SAMPLE_RATE;

/// Attack/peak/decay/sustain/release contour, advanced one frame per call.
///
/// The release stage runs while the voice is resting; once it completes the
/// envelope reports zero and asks the voice to reset its phase so the next
/// note starts clean.
pub struct Envelope {
    attack_frames: u32,
    peak_frames: u32,
    decay_frames: u32,
    release_frames: u32,
    env_frames: u32,
    decay_start: u32,
    peak_level: f32,
    sustain_level: f32,
    decay_amount: f32,

    env_pos: u32,
    ad_finished: bool,
    release_pos: u32,
    release_finished: bool,
    resting: bool,
    /// Set when the channel's very first note is a rest, so the release
    /// ramp from sustain level is suppressed and the voice stays silent.
    force_silence_at_beginning: bool,
}

fn ms_to_frames(ms: u32) -> u32 {
    (SAMPLE_RATE * ms as f64 / 1000.0) as u32
}

impl Envelope {
    pub fn new() -> Self {
        let mut env = Self {
            attack_frames: 1000,
            peak_frames: 1000,
            decay_frames: 9600,
            release_frames: 2000,
            env_frames: 0,
            decay_start: 0,
            peak_level: 0.9,
            sustain_level: 0.5,
            decay_amount: 0.0,
            env_pos: 0,
            ad_finished: false,
            release_pos: 0,
            release_finished: true,
            resting: false,
            force_silence_at_beginning: false,
        };
        env.readjust();
        env
    }

    pub fn set_attack_ms(&mut self, ms: u32) {
        self.attack_frames = ms_to_frames(ms);
        self.readjust();
    }

    pub fn set_peak_ms(&mut self, ms: u32) {
        self.peak_frames = ms_to_frames(ms);
        self.readjust();
    }

    pub fn set_decay_ms(&mut self, ms: u32) {
        self.decay_frames = ms_to_frames(ms);
        self.readjust();
    }

    pub fn set_release_ms(&mut self, ms: u32) {
        self.release_frames = ms_to_frames(ms);
        self.readjust();
    }

    pub fn set_peak_level(&mut self, level: f32) {
        self.peak_level = level;
        self.readjust();
    }

    pub fn set_sustain_level(&mut self, level: f32) {
        self.sustain_level = level;
        self.readjust();
    }

    /// Set the whole contour at once (times in ms, levels in [0,1])
    pub fn set_adsr(&mut self, attack: u32, peak: u32, decay: u32, release: u32, peak_level: f32, sustain_level: f32) {
        self.attack_frames = ms_to_frames(attack);
        self.peak_frames = ms_to_frames(peak);
        self.decay_frames = ms_to_frames(decay);
        self.release_frames = ms_to_frames(release);
        self.peak_level = peak_level;
        self.sustain_level = sustain_level;
        self.readjust();
    }

    fn readjust(&mut self) {
        self.env_frames = self.attack_frames + self.peak_frames + self.decay_frames;
        self.decay_start = self.attack_frames + self.peak_frames;
        self.decay_amount = self.peak_level - self.sustain_level;
    }

    /// Restart the contour for a new note
    pub fn refresh(&mut self) {
        self.env_pos = 0;
        self.ad_finished = false;
        self.release_pos = 0;
        self.release_finished = false;
    }

    pub fn set_resting(&mut self, resting: bool) {
        self.resting = resting;
    }

    pub fn is_resting(&self) -> bool {
        self.resting
    }

    /// Keep the voice silent until its first real note arrives
    pub fn confirm_first_note_is_rest(&mut self) {
        self.force_silence_at_beginning = true;
    }

    pub fn clear_first_note_flag(&mut self) {
        self.force_silence_at_beginning = false;
    }

    /// Advance one frame: note stages while playing, release while resting
    pub fn advance(&mut self) {
        if !self.resting {
            if !self.ad_finished {
                self.env_pos += 1;
                if self.env_pos >= self.env_frames {
                    self.ad_finished = true;
                }
            }
        } else if !self.release_finished {
            self.release_pos += 1;
            if self.release_pos >= self.release_frames {
                self.release_finished = true;
            }
        }
    }

    /// Current amplitude. Returns `(level, phase_reset)` where
    /// `phase_reset` is true once the release has fully decayed.
    pub fn output(&self) -> (f32, bool) {
        if !self.resting {
            let level = if self.env_pos < self.attack_frames {
                self.peak_level * (self.env_pos as f32 / self.attack_frames as f32)
            } else if self.env_pos < self.decay_start {
                self.peak_level
            } else if self.env_pos < self.env_frames {
                self.peak_level
                    - self.decay_amount
                        * ((self.env_pos - self.decay_start) as f32 / self.decay_frames as f32)
            } else {
                self.sustain_level
            };
            (level, false)
        } else if !self.release_finished && !self.force_silence_at_beginning && self.release_frames > 0
        {
            let level = self.sustain_level
                * ((self.release_frames - self.release_pos) as f32 / self.release_frames as f32);
            (level, false)
        } else {
            (0.0, true)
        }
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self::new()
    }
}
