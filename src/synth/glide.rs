//! One-shot monotonic pitch glides: Fall (downward) and Rise (upward)

use crate::SAMPLE_RATE;

/// Lowest frequency either glide will output
const FREQ_FLOOR: f64 = 20.0;

fn octaves_per_frame(cents_per_sec: f64) -> f64 {
    (cents_per_sec / 1200.0) / SAMPLE_RATE
}

/// Downward glide: after an optional wait, the pitch travels down at a
/// constant octave rate, clamped to 8 octaves of total travel.
pub struct Fall {
    speed_cents: f64,
    oct_traveled: f64,
    oct_delta: f64,
    wait_pos: u32,
    wait_frames: u32,
}

impl Fall {
    pub fn new() -> Self {
        Self {
            speed_cents: 600.0,
            oct_traveled: 0.0,
            oct_delta: octaves_per_frame(600.0),
            wait_pos: 0,
            wait_frames: 0,
        }
    }

    pub fn set_to_default(&mut self) {
        self.speed_cents = 600.0;
        self.oct_delta = octaves_per_frame(600.0);
        self.oct_traveled = 0.0;
        self.wait_pos = 0;
        self.wait_frames = 0;
    }

    /// Glide rate in cents per second
    pub fn set_speed(&mut self, cents_per_sec: f64) {
        self.speed_cents = cents_per_sec;
        self.oct_delta = octaves_per_frame(cents_per_sec);
    }

    pub fn set_wait_ms(&mut self, ms: f64) {
        self.wait_frames = (ms / 1000.0 * SAMPLE_RATE) as u32;
    }

    /// Rearm for a fresh glide
    pub fn refresh(&mut self) {
        self.wait_pos = 0;
        self.oct_traveled = 0.0;
    }

    /// Octaves traveled so far; used to decide if a new note should cancel
    pub fn octaves_traveled(&self) -> f64 {
        self.oct_traveled
    }

    pub fn process(&mut self, freq: f64) -> f64 {
        if self.wait_pos < self.wait_frames {
            self.wait_pos += 1;
            return freq;
        }
        self.oct_traveled += self.oct_delta;
        if self.oct_traveled > 8.0 {
            self.oct_traveled = 8.0;
        }
        (freq * 0.5f64.powf(self.oct_traveled)).max(FREQ_FLOOR)
    }
}

impl Default for Fall {
    fn default() -> Self {
        Self::new()
    }
}

/// Upward glide: starts the configured range below the target pitch and
/// closes the gap at a constant octave rate.
pub struct Rise {
    speed_cents: f64,
    range_cents: f64,
    oct_deviation: f64,
    oct_delta: f64,
    pos: u32,
}

impl Rise {
    pub fn new() -> Self {
        Self {
            speed_cents: 1200.0,
            range_cents: 100.0,
            oct_deviation: 100.0 / 1200.0,
            oct_delta: octaves_per_frame(1200.0),
            pos: 0,
        }
    }

    pub fn set_to_default(&mut self) {
        self.speed_cents = 1200.0;
        self.range_cents = 100.0;
        self.oct_deviation = 100.0 / 1200.0;
        self.oct_delta = octaves_per_frame(1200.0);
        self.pos = 0;
    }

    pub fn set_speed(&mut self, cents_per_sec: f64) {
        self.speed_cents = cents_per_sec;
        self.oct_delta = octaves_per_frame(cents_per_sec);
    }

    pub fn set_range(&mut self, cents: f64) {
        self.range_cents = cents;
        self.oct_deviation = cents / 1200.0;
    }

    /// Rearm from the full configured deviation
    pub fn refresh(&mut self) {
        self.oct_deviation = self.range_cents / 1200.0;
        self.pos = 0;
    }

    /// Frames processed since the glide was armed
    pub fn frames_elapsed(&self) -> u32 {
        self.pos
    }

    pub fn process(&mut self, freq: f64) -> f64 {
        self.pos += 1;
        if self.oct_deviation == 0.0 {
            return freq;
        }
        self.oct_deviation -= self.oct_delta;
        if self.oct_deviation < 0.0 {
            self.oct_deviation = 0.0;
        }
        (freq * 0.5f64.powf(self.oct_deviation)).max(FREQ_FLOOR)
    }
}

impl Default for Rise {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fall_waits_then_descends() {
        let mut fall = Fall::new();
        fall.set_speed(1200.0); // one octave per second
        fall.set_wait_ms(10.0);
        fall.refresh();
        for _ in 0..441 {
            assert_eq!(fall.process(440.0), 440.0);
        }
        let mut last = 440.0;
        for _ in 0..1000 {
            let out = fall.process(440.0);
            assert!(out < last);
            last = out;
        }
    }

    #[test]
    fn fall_respects_floor() {
        let mut fall = Fall::new();
        fall.set_speed(6000.0);
        fall.refresh();
        let mut out = 440.0;
        for _ in 0..SAMPLE_RATE as usize * 3 {
            out = fall.process(440.0);
        }
        assert_eq!(out, 20.0);
    }

    #[test]
    fn rise_converges_to_target() {
        let mut rise = Rise::new();
        rise.set_speed(1200.0);
        rise.set_range(1200.0); // start one octave below
        rise.refresh();
        let first = rise.process(440.0);
        assert!((first - 220.0).abs() / 220.0 < 0.01);
        let mut out = first;
        for _ in 0..SAMPLE_RATE as usize + 10 {
            out = rise.process(440.0);
        }
        assert_eq!(out, 440.0);
    }
}
