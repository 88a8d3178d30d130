//! Fixed bank of sample-effect slots with per-slot gain/pan/transport

use parking_lot::Mutex;

use super::sample::SfxClip;
use crate::synth::compress;

/// Number of slots in the bank
pub const SFX_SLOTS: usize = 16;

/// One slot: a clip plus its playback state.
pub struct SfxSlot {
    clip: Option<SfxClip>,
    error: String,
    gain: f32,
    left_gain: f32,
    right_gain: f32,
    panning: f32,
    pos: usize,
    playing: bool,
}

impl SfxSlot {
    fn new() -> Self {
        Self {
            clip: None,
            error: String::new(),
            gain: 0.85,
            left_gain: 0.85,
            right_gain: 0.85,
            panning: 0.5,
            pos: 0,
            playing: false,
        }
    }

    fn recompute_side_gains(&mut self) {
        self.left_gain = 2.0 * self.gain * self.panning;
        self.right_gain = 2.0 * self.gain * (1.0 - self.panning);
    }

    fn set_gain(&mut self, gain: f32) {
        self.gain = gain.clamp(0.0, 1.0);
        self.recompute_side_gains();
    }

    fn set_panning(&mut self, panning: f32) {
        self.panning = panning.clamp(0.0, 1.0);
        self.recompute_side_gains();
    }

    fn start(&mut self) {
        if self.clip.is_some() {
            self.pos = 0;
            self.playing = true;
        }
    }

    fn stop(&mut self) {
        self.playing = false;
        self.pos = 0;
    }

    /// One sample for the given side (0 = left, 1 = right). The position
    /// advances only on the right-side call so both sides read the same
    /// frame.
    fn update(&mut self, channel: usize) -> f32 {
        if !self.playing {
            return 0.0;
        }
        let clip = match &self.clip {
            Some(clip) => clip,
            None => return 0.0,
        };

        let out = if channel == 0 {
            clip.left[self.pos] * self.left_gain
        } else {
            let data = if clip.stereo { &clip.right } else { &clip.left };
            let out = data[self.pos] * self.right_gain;
            self.pos += 1;
            out
        };

        if self.pos >= clip.len() {
            self.playing = false;
            self.pos = 0;
        }
        out
    }
}

/// The slot array, owned behind the bank's mutex
pub struct SfxSlots {
    slots: [SfxSlot; SFX_SLOTS],
}

impl SfxSlots {
    fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| SfxSlot::new()),
        }
    }

    /// Summed output for one side, soft-compressed and clamped
    pub fn output(&mut self, channel: usize) -> f32 {
        let mut sum = 0.0;
        for slot in self.slots.iter_mut() {
            sum += slot.update(channel);
        }
        compress(sum, 0.6, 5.0).min(0.99)
    }
}

/// Thread-safe sample-effects mixer shared between the control thread and
/// the audio callback. Decoding happens on the caller's thread; the decoded
/// clip is swapped into its slot only while the slot is not playing.
pub struct SfxBank {
    slots: Mutex<SfxSlots>,
}

impl SfxBank {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(SfxSlots::new()),
        }
    }

    /// Lock the slot array for the audio callback
    pub fn lock(&self) -> parking_lot::MutexGuard<'_, SfxSlots> {
        self.slots.lock()
    }

    /// Decode a clip into a slot. On failure the slot keeps its previous
    /// contents and the error text is retained for `error_text`.
    pub fn load(&self, slot: usize, path: &str) -> Result<(), String> {
        if slot >= SFX_SLOTS {
            return Err(format!("SFX slot out of range: {}", slot));
        }
        match SfxClip::load(path) {
            Ok(clip) => {
                let mut slots = self.slots.lock();
                let entry = &mut slots.slots[slot];
                if entry.playing {
                    entry.playing = false;
                    entry.pos = 0;
                }
                entry.clip = Some(clip);
                entry.error.clear();
                Ok(())
            }
            Err(e) => {
                log::error!("{}", e);
                let mut slots = self.slots.lock();
                slots.slots[slot].error = e.clone();
                Err(e)
            }
        }
    }

    pub fn start(&self, slot: usize) {
        self.slots.lock().slots[slot.min(SFX_SLOTS - 1)].start();
    }

    pub fn stop(&self, slot: usize) {
        self.slots.lock().slots[slot.min(SFX_SLOTS - 1)].stop();
    }

    pub fn pause(&self, slot: usize) {
        self.slots.lock().slots[slot.min(SFX_SLOTS - 1)].playing = false;
    }

    pub fn resume(&self, slot: usize) {
        let mut slots = self.slots.lock();
        let entry = &mut slots.slots[slot.min(SFX_SLOTS - 1)];
        if entry.clip.is_some() {
            entry.playing = true;
        }
    }

    pub fn set_gain(&self, slot: usize, gain: f32) {
        self.slots.lock().slots[slot.min(SFX_SLOTS - 1)].set_gain(gain);
    }

    /// Gain of a slot; out-of-range slots report 0.0
    pub fn gain(&self, slot: usize) -> f32 {
        if slot >= SFX_SLOTS {
            return 0.0;
        }
        self.slots.lock().slots[slot].gain
    }

    pub fn set_panning(&self, slot: usize, panning: f32) {
        self.slots.lock().slots[slot.min(SFX_SLOTS - 1)].set_panning(panning);
    }

    /// Panning of a slot; out-of-range slots report center (0.5)
    pub fn panning(&self, slot: usize) -> f32 {
        if slot >= SFX_SLOTS {
            return 0.5;
        }
        self.slots.lock().slots[slot].panning
    }

    /// Last load error for a slot; out-of-range slots report ""
    pub fn error_text(&self, slot: usize) -> String {
        if slot >= SFX_SLOTS {
            return String::new();
        }
        self.slots.lock().slots[slot].error.clone()
    }
}

impl Default for SfxBank {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_clip(frames: usize, value: f32) -> SfxClip {
        SfxClip {
            left: vec![value; frames],
            right: Vec::new(),
            stereo: false,
            sample_rate: 44100,
        }
    }

    fn load_test_clip(bank: &SfxBank, slot: usize, clip: SfxClip) {
        let mut slots = bank.slots.lock();
        slots.slots[slot].clip = Some(clip);
    }

    #[test]
    fn silent_when_not_playing() {
        let bank = SfxBank::new();
        load_test_clip(&bank, 0, test_clip(100, 0.5));
        let mut slots = bank.lock();
        assert_eq!(slots.output(0), 0.0);
        assert_eq!(slots.output(1), 0.0);
    }

    #[test]
    fn position_advances_on_right_channel_only() {
        let bank = SfxBank::new();
        load_test_clip(&bank, 0, test_clip(4, 0.25));
        bank.set_gain(0, 0.5);
        bank.start(0);
        let mut slots = bank.lock();
        // two left reads in a row hit the same frame
        let left1 = slots.slots[0].update(0);
        let left2 = slots.slots[0].update(0);
        assert_eq!(left1, left2);
        assert_eq!(slots.slots[0].pos, 0);
        slots.slots[0].update(1);
        assert_eq!(slots.slots[0].pos, 1);
    }

    #[test]
    fn slot_stops_and_rewinds_at_end() {
        let bank = SfxBank::new();
        load_test_clip(&bank, 0, test_clip(3, 0.25));
        bank.start(0);
        let mut slots = bank.lock();
        for _ in 0..3 {
            slots.slots[0].update(0);
            slots.slots[0].update(1);
        }
        assert!(!slots.slots[0].playing);
        assert_eq!(slots.slots[0].pos, 0);
    }

    #[test]
    fn panning_splits_gain() {
        let bank = SfxBank::new();
        load_test_clip(&bank, 0, test_clip(100, 1.0));
        bank.set_gain(0, 0.5);
        bank.set_panning(0, 1.0);
        bank.start(0);
        let mut slots = bank.lock();
        let left = slots.slots[0].update(0);
        let right = slots.slots[0].update(1);
        assert!((left - 1.0).abs() < 1e-6);
        assert_eq!(right, 0.0);
    }

    #[test]
    fn out_of_range_getters_return_defaults() {
        let bank = SfxBank::new();
        assert_eq!(bank.gain(99), 0.0);
        assert_eq!(bank.panning(99), 0.5);
        assert_eq!(bank.error_text(99), "");
    }

    #[test]
    fn output_is_clamped() {
        let bank = SfxBank::new();
        for slot in 0..4 {
            load_test_clip(&bank, slot, test_clip(100, 0.99));
            bank.set_gain(slot, 1.0);
            bank.start(slot);
        }
        let mut slots = bank.lock();
        for _ in 0..50 {
            assert!(slots.output(0) <= 0.99);
            assert!(slots.output(1) <= 0.99);
        }
    }
}
