//! Audio frames and loudness measurement.

/// One capture callback's worth of normalized samples in `[-1, 1]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AudioFrame {
    samples: Vec<f32>,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    /// Normalizes signed 16-bit samples by `i16::MAX + 1`.
    pub fn from_i16(samples: &[i16]) -> Self {
        Self {
            samples: samples.iter().map(|&s| f32::from(s) / 32768.0).collect(),
        }
    }

    /// Decodes little-endian signed 16-bit PCM. A trailing odd byte is ignored.
    pub fn from_pcm16_le(bytes: &[u8]) -> Self {
        let samples: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self::from_i16(&samples)
    }

    /// Encodes the frame as little-endian signed 16-bit PCM.
    pub fn to_pcm16_le(&self) -> Vec<u8> {
        self.to_i16().flat_map(i16::to_le_bytes).collect()
    }

    /// Quantizes to signed 16-bit samples. Non-finite samples become silence.
    pub fn to_i16(&self) -> impl Iterator<Item = i16> + '_ {
        self.samples.iter().map(|&s| {
            let clamped = if s.is_finite() { s.clamp(-1.0, 1.0) } else { 0.0 };
            (clamped * 32767.0).round() as i16
        })
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn level(&self) -> f32 {
        level(self)
    }
}

/// Root-mean-square amplitude of a frame, in `[0, 1]`.
///
/// Empty frames and frames of silence measure 0. Non-finite samples count
/// as silence.
pub fn level(frame: &AudioFrame) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = frame
        .samples()
        .iter()
        .map(|&s| if s.is_finite() { f64::from(s) } else { 0.0 })
        .map(|s| s * s)
        .sum();
    let rms = (sum_squares / frame.len() as f64).sqrt() as f32;
    rms.clamp(0.0, 1.0)
}
