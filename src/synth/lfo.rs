//! Low-frequency pitch modulator with a wait-then-sweep contract

use crate::SAMPLE_RATE;

const LFO_TABLE_SIZE: usize = 4096;

/// Sine-table vibrato. Holds the incoming frequency untouched for the
/// configured wait time, then scales it by `2^(sin·cents/1200)`.
pub struct Lfo {
    table: Vec<f64>,
    phase: f64,
    increment: f64,
    wait_pos: u32,
    wait_frames: u32,
    range_cents: f64,
}

impl Lfo {
    pub fn new() -> Self {
        let mut table = vec![0.0; LFO_TABLE_SIZE];
        for (i, slot) in table.iter_mut().enumerate() {
            *slot = (std::f64::consts::TAU * i as f64 / LFO_TABLE_SIZE as f64).sin();
        }
        let mut lfo = Self {
            table,
            phase: 0.0,
            increment: 0.0,
            wait_pos: 0,
            wait_frames: 0,
            range_cents: 24.0,
        };
        lfo.reset_to_defaults();
        lfo
    }

    /// Default vibrato: 200 ms wait, 24 cents, 6 Hz
    pub fn reset_to_defaults(&mut self) {
        self.phase = 0.0;
        self.wait_pos = 0;
        self.set_wait_ms(200);
        self.set_range_cents(24);
        self.set_speed_hz(6.0);
    }

    pub fn set_wait_ms(&mut self, ms: u32) {
        self.wait_frames = (SAMPLE_RATE * ms as f64 / 1000.0) as u32;
    }

    pub fn set_range_cents(&mut self, cents: u32) {
        self.range_cents = cents as f64;
    }

    pub fn set_speed_hz(&mut self, hz: f64) {
        self.increment = LFO_TABLE_SIZE as f64 * hz / SAMPLE_RATE;
    }

    /// Restart the wait and sweep, called at every note start
    pub fn refresh(&mut self) {
        self.phase = 0.0;
        self.wait_pos = 0;
    }

    /// Process one frame of frequency
    pub fn process(&mut self, freq: f64) -> f64 {
        if self.wait_pos < self.wait_frames {
            self.wait_pos += 1;
            return freq;
        }
        let factor = 2f64.powf(self.table[self.phase as usize] * self.range_cents / 1200.0);
        self.phase += self.increment;
        if self.phase >= LFO_TABLE_SIZE as f64 {
            self.phase -= LFO_TABLE_SIZE as f64;
        }
        freq * factor
    }
}

impl Default for Lfo {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_unchanged_during_wait() {
        let mut lfo = Lfo::new();
        lfo.set_wait_ms(10);
        lfo.refresh();
        for _ in 0..441 {
            assert_eq!(lfo.process(440.0), 440.0);
        }
    }

    #[test]
    fn zero_speed_returns_unmodulated_after_wait() {
        let mut lfo = Lfo::new();
        lfo.set_wait_ms(0);
        lfo.set_speed_hz(0.0);
        lfo.refresh();
        // phase stays at table[0] == sin(0) == 0 -> factor 1.0
        for _ in 0..100 {
            assert!((lfo.process(440.0) - 440.0).abs() < 1e-9);
        }
    }

    #[test]
    fn sweep_stays_within_range() {
        let mut lfo = Lfo::new();
        lfo.set_wait_ms(0);
        lfo.set_range_cents(100);
        lfo.set_speed_hz(50.0);
        lfo.refresh();
        let max_factor = 2f64.powf(100.0 / 1200.0);
        for _ in 0..44100 {
            let out = lfo.process(440.0);
            assert!(out <= 440.0 * max_factor + 1e-6);
            assert!(out >= 440.0 / max_factor - 1e-6);
        }
    }
}
