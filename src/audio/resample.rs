use crate::error::{EngineError, EngineResult};
use std::borrow::Cow;

// Practical bounds for consumer and pro audio hardware.
pub(super) const MIN_DEVICE_RATE: u32 = 2_000;
pub(super) const MAX_DEVICE_RATE: u32 = 1_600_000;

/// Rate converter between the capture and render endpoints of one session.
///
/// Holds no sample history: every call is a pure function of the frame and
/// the ratio, so the capture thread can call it without coordination.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resampler {
    input_rate: u32,
    output_rate: u32,
    channels: u16,
    ratio: f64,
}

impl Resampler {
    pub fn new(input_rate: u32, output_rate: u32, channels: u16) -> EngineResult<Self> {
        for rate in [input_rate, output_rate] {
            if !(MIN_DEVICE_RATE..=MAX_DEVICE_RATE).contains(&rate) {
                return Err(EngineError::InvalidConfig(format!(
                    "unsupported device sample rate {rate}Hz for resampling"
                )));
            }
        }
        if channels == 0 {
            return Err(EngineError::InvalidConfig(
                "resampler needs at least one channel".to_string(),
            ));
        }
        Ok(Self {
            input_rate,
            output_rate,
            channels,
            ratio: f64::from(output_rate) / f64::from(input_rate),
        })
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    pub fn is_passthrough(&self) -> bool {
        self.input_rate == self.output_rate
    }

    /// Convert one interleaved frame. Matching rates hand the input back
    /// borrowed.
    pub fn process<'a>(&self, samples: &'a [i16]) -> Cow<'a, [i16]> {
        if self.is_passthrough() {
            return Cow::Borrowed(samples);
        }
        resample_linear(samples, self.channels, self.ratio)
    }
}

/// Per-channel linear interpolation over interleaved `i16` samples.
///
/// Produces `round(frames * ratio)` frames. Positions past the last input
/// frame hold the final value. A trailing partial frame is ignored.
pub fn resample_linear(input: &[i16], channels: u16, ratio: f64) -> Cow<'_, [i16]> {
    // Guard rails
    if ratio == 1.0 || !ratio.is_finite() || ratio <= 0.0 {
        return Cow::Borrowed(input);
    }
    let channels = usize::from(channels.max(1));
    let input_frames = input.len() / channels;
    if input_frames == 0 {
        return Cow::Borrowed(input);
    }

    let output_frames = (input_frames as f64 * ratio).round() as usize;
    let last = input_frames - 1;
    let mut output = Vec::with_capacity(output_frames * channels);

    for i in 0..output_frames {
        let src_pos = i as f64 / ratio;
        let idx = src_pos.floor() as usize;
        let frac = src_pos - idx as f64;

        for ch in 0..channels {
            let value = if idx < last {
                let a = f64::from(input[idx * channels + ch]);
                let b = f64::from(input[(idx + 1) * channels + ch]);
                a + (b - a) * frac
            } else {
                f64::from(input[last * channels + ch])
            };
            output.push(clamp_to_i16(value));
        }
    }

    Cow::Owned(output)
}

/// Re-interleave a frame for an endpoint with a different channel count.
///
/// Mono output averages every input channel. Otherwise output channel `n`
/// copies input channel `n`, repeating the last input channel when the
/// output has more.
pub fn adapt_channels(input: &[i16], from: u16, to: u16) -> Cow<'_, [i16]> {
    let from = usize::from(from.max(1));
    let to = usize::from(to.max(1));
    if from == to {
        return Cow::Borrowed(input);
    }

    let frames = input.len() / from;
    let mut output = Vec::with_capacity(frames * to);
    for frame in input.chunks_exact(from) {
        if to == 1 {
            let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
            output.push((sum / from as i32) as i16);
        } else {
            output.extend((0..to).map(|ch| frame[ch.min(from - 1)]));
        }
    }
    Cow::Owned(output)
}

fn clamp_to_i16(value: f64) -> i16 {
    value.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
}
