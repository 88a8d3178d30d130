//! Dual-tap feedback-free delay line, one instance per stereo side

/// Ring capacity per buffer: two seconds at 44.1 kHz
const DELAY_TABLE_SIZE: usize = 88200;
const DELAY_SAMPLE_RATE: usize = 44100;

/// Two chained ring buffers give a first tap and an echo tap. The read
/// index leads the write index by one slot so each buffer contributes its
/// full length of latency.
pub struct DelayLine {
    buffer1: Vec<f32>,
    buffer2: Vec<f32>,
    buffer1_len: usize,
    buffer2_len: usize,
    read1: usize,
    write1: usize,
    read2: usize,
    write2: usize,
    out_gain1: f32,
    out_gain2: f32,
    total_delay_frames: u64,
}

impl DelayLine {
    pub fn new() -> Self {
        Self {
            buffer1: vec![0.0; DELAY_TABLE_SIZE],
            buffer2: vec![0.0; DELAY_TABLE_SIZE],
            buffer1_len: DELAY_TABLE_SIZE,
            buffer2_len: DELAY_TABLE_SIZE,
            read1: 1,
            write1: 0,
            read2: 1,
            write2: 0,
            out_gain1: 0.5,
            out_gain2: 0.2,
            total_delay_frames: 0,
        }
    }

    /// Configure tap times (ms) and gain. A negative time leaves the times
    /// unchanged; a negative gain leaves the gains unchanged. The echo tap
    /// gain is always 0.4 of the first tap gain.
    pub fn set_parameters(&mut self, first_delay_ms: i32, delay_ms: i32, gain: f32) {
        if first_delay_ms >= 0 && delay_ms >= 0 {
            self.buffer1_len = (DELAY_SAMPLE_RATE * first_delay_ms as usize) / 1000;
            self.buffer2_len = (DELAY_SAMPLE_RATE * delay_ms as usize) / 1000;
            self.total_delay_frames = (self.buffer1_len + self.buffer2_len * 2) as u64;
            self.read1 = 1;
            self.write1 = 0;
            self.read2 = 1;
            self.write2 = 0;
        }
        if gain > -0.001 {
            self.out_gain1 = gain;
            self.out_gain2 = gain * 0.4;
        }
    }

    /// Frames until the last echo of an input has fully drained
    pub fn total_delay_frames(&self) -> u64 {
        self.total_delay_frames
    }

    /// Push one input sample and return the summed tap output
    pub fn update(&mut self, input: f32) -> f32 {
        self.buffer1[self.write1] = input;
        let out1 = self.buffer1[self.read1];

        self.buffer2[self.write2] = out1;
        let out2 = self.buffer2[self.read2];

        self.write1 += 1;
        if self.write1 >= self.buffer1_len {
            self.write1 = 0;
        }
        self.read1 += 1;
        if self.read1 >= self.buffer1_len {
            self.read1 = 0;
        }
        self.write2 += 1;
        if self.write2 >= self.buffer2_len {
            self.write2 = 0;
        }
        self.read2 += 1;
        if self.read2 >= self.buffer2_len {
            self.read2 = 0;
        }

        (out1 * self.out_gain1).min(1.0) + (out2 * self.out_gain2).min(1.0)
    }

    /// Zero both rings and re-seat the indices
    pub fn clear_buffer(&mut self) {
        self.buffer1.iter_mut().for_each(|s| *s = 0.0);
        self.buffer2.iter_mut().for_each(|s| *s = 0.0);
        self.read1 = 1;
        self.write1 = 0;
        self.read2 = 1;
        self.write2 = 0;
    }
}

impl Default for DelayLine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_tap_arrives_after_configured_time() {
        let mut delay = DelayLine::new();
        // 10 ms -> 441-frame first buffer
        delay.set_parameters(10, 10, 0.5);
        delay.clear_buffer();
        let mut out = delay.update(1.0);
        assert_eq!(out, 0.0);
        for _ in 1..440 {
            out = delay.update(0.0);
            assert_eq!(out, 0.0);
        }
        out = delay.update(0.0);
        assert!((out - 0.5).abs() < 1e-6);
    }

    #[test]
    fn echo_tap_is_scaled_down() {
        let mut delay = DelayLine::new();
        delay.set_parameters(10, 10, 0.5);
        delay.clear_buffer();
        delay.update(1.0);
        let mut outputs = Vec::new();
        for _ in 0..1000 {
            outputs.push(delay.update(0.0));
        }
        // echo arrives a second buffer later at gain 0.5 * 0.4 = 0.2
        assert!((outputs[879] - 0.2).abs() < 1e-6, "echo {}", outputs[879]);
    }

    #[test]
    fn total_delay_frames_counts_both_taps() {
        let mut delay = DelayLine::new();
        delay.set_parameters(500, 500, 0.2);
        assert_eq!(delay.total_delay_frames(), (22050 + 22050 * 2) as u64);
    }

    #[test]
    fn negative_parameters_leave_state_unchanged() {
        let mut delay = DelayLine::new();
        delay.set_parameters(500, 500, 0.2);
        let frames = delay.total_delay_frames();
        delay.set_parameters(-1, -1, 0.9);
        assert_eq!(delay.total_delay_frames(), frames);
        delay.set_parameters(100, 100, -0.1);
        assert_ne!(delay.total_delay_frames(), frames);
    }
}
