//! Streaming nearest-neighbour resampler
//!
//! Converts float capture frames at whatever rate the device delivers into
//! 16-bit PCM at the analyzer's fixed rate. Each call may hand over a chunk of
//! any size; the unconsumed tail and the fractional read position are carried
//! to the next call so chunk boundaries never drop or repeat a sample.
//!
//! The read position is kept as an integer numerator over the target rate, so
//! feeding a signal in pieces yields exactly the same samples as feeding it in
//! one go.

/// Sample rate expected by the audience analyzer socket.
pub const ANALYZER_SAMPLE_RATE: u32 = 16_000;

/// Carry-over between calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResamplerState {
    /// Input samples received but not yet consumed.
    carryover_tail: Vec<f32>,
    /// Read position within `carryover_tail`, in units of 1/target_rate input samples.
    phase_num: u64,
}

impl ResamplerState {
    /// Fractional read position in input samples, always in `[0, 1)`.
    pub fn fractional_phase(&self, target_rate: u32) -> f64 {
        if target_rate == 0 {
            return 0.0;
        }
        self.phase_num as f64 / f64::from(target_rate)
    }

    /// Samples held back for the next call.
    pub fn carryover_tail(&self) -> &[f32] {
        &self.carryover_tail
    }
}

/// Resample one frame, returning the emitted samples and the state for the next call.
pub fn resample(
    input: &[f32],
    input_rate: u32,
    target_rate: u32,
    state: ResamplerState,
) -> (Vec<i16>, ResamplerState) {
    let mut state = state;
    let out = resample_into(input, input_rate, target_rate, &mut state);
    (out, state)
}

fn resample_into(
    input: &[f32],
    input_rate: u32,
    target_rate: u32,
    state: &mut ResamplerState,
) -> Vec<i16> {
    if input_rate == 0 || target_rate == 0 {
        return Vec::new();
    }

    state.carryover_tail.extend_from_slice(input);
    let available = state.carryover_tail.len() as u64 * u64::from(target_rate);
    if available <= state.phase_num {
        return Vec::new();
    }

    let step = u64::from(input_rate);
    let count = (available - state.phase_num) / step;
    let mut out = Vec::with_capacity(count as usize);
    for n in 0..count {
        let index = (state.phase_num + n * step) / u64::from(target_rate);
        out.push(to_pcm16(state.carryover_tail[index as usize]));
    }

    let position = state.phase_num + count * step;
    let consumed = (position / u64::from(target_rate)) as usize;
    state.phase_num = position % u64::from(target_rate);
    state.carryover_tail.drain(..consumed);

    out
}

fn to_pcm16(sample: f32) -> i16 {
    let sample = if sample.is_finite() { sample.clamp(-1.0, 1.0) } else { 0.0 };
    (sample * i16::MAX as f32) as i16
}

/// Owned resampler for a single capture stream.
#[derive(Debug, Clone)]
pub struct StreamingResampler {
    target_rate: u32,
    state: ResamplerState,
}

impl StreamingResampler {
    pub fn new(target_rate: u32) -> Self {
        Self {
            target_rate,
            state: ResamplerState::default(),
        }
    }

    pub fn process(&mut self, input: &[f32], input_rate: u32) -> Vec<i16> {
        resample_into(input, input_rate, self.target_rate, &mut self.state)
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    pub fn state(&self) -> &ResamplerState {
        &self.state
    }

    pub fn reset(&mut self) {
        self.state = ResamplerState::default();
    }
}

/// Serialize samples as little-endian bytes, the layout the analyzer expects.
pub fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Inverse of [`pcm16_to_le_bytes`]. A trailing odd byte is ignored.
pub fn le_bytes_to_pcm16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}
