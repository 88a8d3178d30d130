//! Square-wave octave-toggle pitch modulator ("Astro" arpeggio)

/// Alternates the incoming frequency between its base octave and one octave
/// up, holding each for half a cycle. `state_changed` is true only on the
/// two boundary samples so the voice knows when to recompute its phase
/// increment.
pub struct Astro {
    frame_count: u32,
    cycle_frames: u32,
    middle_point: u32,
    processed_freq: f64,
    status_changed: bool,
}

const ASTRO_SAMPLE_RATE: u32 = 44100;

impl Astro {
    pub fn new() -> Self {
        let mut astro = Self {
            frame_count: 0,
            cycle_frames: 4410,
            middle_point: 2205,
            processed_freq: 440.0,
            status_changed: false,
        };
        astro.set_speed(12);
        astro
    }

    /// Toggle rate in cycles per second, clamped to 1..100
    pub fn set_speed(&mut self, cycles_per_sec: u32) {
        let cps = cycles_per_sec.clamp(1, 100);
        self.cycle_frames = ASTRO_SAMPLE_RATE / cps;
        self.middle_point = self.cycle_frames / 2;
    }

    /// Process one frame; returns the (possibly octave-shifted) frequency
    pub fn process(&mut self, freq: f64) -> f64 {
        if self.frame_count == self.middle_point {
            self.processed_freq = freq * 2.0;
            self.status_changed = true;
        } else if self.frame_count == 0 {
            self.processed_freq = freq;
            self.status_changed = true;
        } else {
            self.status_changed = false;
        }

        self.frame_count += 1;
        if self.frame_count >= self.cycle_frames {
            self.frame_count = 0;
        }

        self.processed_freq
    }

    /// True only on the samples where the octave just toggled
    pub fn state_changed(&self) -> bool {
        self.status_changed
    }

    /// Restart the cycle from the base octave
    pub fn refresh(&mut self) {
        self.frame_count = 0;
    }
}

impl Default for Astro {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggles_one_octave_at_half_cycle() {
        let mut astro = Astro::new();
        astro.set_speed(10); // 4410-frame cycle
        astro.refresh();
        assert_eq!(astro.process(100.0), 100.0);
        assert!(astro.state_changed());
        for _ in 1..2205 {
            assert_eq!(astro.process(100.0), 100.0);
            assert!(!astro.state_changed());
        }
        assert_eq!(astro.process(100.0), 200.0);
        assert!(astro.state_changed());
    }

    #[test]
    fn speed_is_clamped() {
        let mut astro = Astro::new();
        astro.set_speed(0);
        astro.refresh();
        astro.process(100.0);
        // clamped to 1 cps -> full cycle is one second
        for _ in 1..22050 {
            astro.process(100.0);
        }
        assert_eq!(astro.process(100.0), 200.0);
    }
}
