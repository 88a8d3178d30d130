//! Precomputed single-cycle wavetables for the melodic voices

use std::f32::consts::TAU;

/// Number of samples in one table cycle
pub const TABLE_SIZE: usize = 4096;

/// Hard ceiling applied to every table after synthesis
const TABLE_CLAMP: f32 = 0.99;

/// A single-cycle waveform table selected by numeric tag.
///
/// Tags follow the `WAVEFORM=` taxonomy: 0 sine, 1 square, 2 saw,
/// 3 triangle, 4 sine + 3rd/6th/9th/12th harmonics, 5 sine + 2nd..5th
/// harmonics, 6 pulse 12.5%, 7 pulse 25%, 8 pulse 33%. Unknown tags fall
/// back to the square table.
pub struct WaveTable {
    samples: Vec<f32>,
    tag: i32,
}

impl WaveTable {
    /// Create a table with the default square waveform
    pub fn new() -> Self {
        let mut table = Self {
            samples: vec![0.0; TABLE_SIZE],
            tag: -1,
        };
        table.select(1);
        table
    }

    /// Currently selected waveform tag
    pub fn tag(&self) -> i32 {
        self.tag
    }

    /// Read one sample by integer phase index
    #[inline]
    pub fn at(&self, index: usize) -> f32 {
        self.samples[index]
    }

    /// Rebuild the table for the requested tag.
    ///
    /// Selecting the already-active tag is a no-op, so event streams can
    /// repeat `WAVEFORM=` settings without paying the synthesis cost.
    pub fn select(&mut self, tag: i32) {
        if self.tag == tag {
            return;
        }
        self.tag = tag;

        match tag {
            0 => self.fill_sine(0.99),
            1 => self.fill_square(0.80),
            2 => {
                for i in 0..TABLE_SIZE {
                    self.samples[i] = -0.99 + (i as f32 / TABLE_SIZE as f32) * 1.98;
                }
            }
            3 => self.fill_triangle(),
            4 => {
                // odd-flavored harmonic stack: 3rd, 6th, 9th, 12th
                self.fill_sine(0.90);
                for &h in &[3, 6, 9, 12] {
                    self.add_harmonic(h, 0.90 / h as f32);
                }
            }
            5 => {
                self.fill_sine(0.68);
                for &h in &[2, 3, 4, 5] {
                    self.add_harmonic(h, 0.68 / h as f32);
                }
            }
            6 => self.fill_pulse(TABLE_SIZE / 8, 0.80),
            7 => self.fill_pulse(TABLE_SIZE / 4, 0.80),
            8 => self.fill_pulse(TABLE_SIZE / 3, 0.80),
            _ => self.fill_square(0.80),
        }

        for s in self.samples.iter_mut() {
            *s = s.clamp(-TABLE_CLAMP, TABLE_CLAMP);
        }
    }

    fn fill_sine(&mut self, amp: f32) {
        for i in 0..TABLE_SIZE {
            self.samples[i] = (TAU * i as f32 / TABLE_SIZE as f32).sin() * amp;
        }
    }

    /// Mix a sine partial into the table. The partial's cycle length is the
    /// integer division of the table size, so high harmonics land slightly
    /// detuned from the exact ratio.
    fn add_harmonic(&mut self, harmonic: usize, amp: f32) {
        let cycle = TABLE_SIZE / harmonic;
        for i in 0..TABLE_SIZE {
            self.samples[i] += (TAU * (i % cycle) as f32 / cycle as f32).sin() * amp;
        }
    }

    fn fill_square(&mut self, amp: f32) {
        for i in 0..TABLE_SIZE {
            self.samples[i] = if i < TABLE_SIZE / 2 { amp } else { -amp };
        }
    }

    /// Pulse with the low segment first, matching the classic duty shapes
    fn fill_pulse(&mut self, low_len: usize, amp: f32) {
        for i in 0..TABLE_SIZE {
            self.samples[i] = if i < low_len { -amp } else { amp };
        }
    }

    fn fill_triangle(&mut self) {
        // ramp up through the first half, down through the second,
        // offset a quarter cycle so the wave starts at zero going up
        let half = TABLE_SIZE / 2;
        for i in 0..half {
            let index = (TABLE_SIZE / 4 + i) % TABLE_SIZE;
            self.samples[index] = -0.99 + (i as f32 / half as f32) * 1.98;
        }
        for i in half..TABLE_SIZE {
            let index = (TABLE_SIZE / 4 + i) % TABLE_SIZE;
            self.samples[index] = 0.99 - ((i - half) as f32 / half as f32) * 1.98;
        }
    }
}

impl Default for WaveTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_tags_stay_in_range() {
        let mut table = WaveTable::new();
        for tag in 0..9 {
            table.select(tag);
            for i in 0..TABLE_SIZE {
                assert!(table.at(i).abs() <= 0.99, "tag {} index {}", tag, i);
            }
        }
    }

    #[test]
    fn square_has_equal_duty() {
        let mut table = WaveTable::new();
        table.select(1);
        let positive = (0..TABLE_SIZE).filter(|&i| table.at(i) > 0.0).count();
        assert_eq!(positive, TABLE_SIZE / 2);
    }

    #[test]
    fn reselect_same_tag_is_noop() {
        let mut table = WaveTable::new();
        table.select(0);
        let before = table.at(100);
        table.select(0);
        assert_eq!(before, table.at(100));
    }

    #[test]
    fn unknown_tag_falls_back_to_square() {
        let mut table = WaveTable::new();
        table.select(42);
        assert_eq!(table.at(0), 0.80);
        assert_eq!(table.at(TABLE_SIZE - 1), -0.80);
    }
}
