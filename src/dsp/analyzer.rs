use super::{ComplexSpectrum, MagnitudeSpectrum};
use crate::audio::{select_channel, AudioFrame, ChannelMode};
use crate::error::{EngineError, EngineResult};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

/// Symmetric Hann window of `size` points.
pub fn hann_window(size: usize) -> Vec<f32> {
    if size <= 1 {
        return vec![1.0; size];
    }
    let m = (size - 1) as f32;
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / m).cos()))
        .collect()
}

/// Rolling mono window plus a planned forward FFT.
///
/// Each pushed frame slides the window forward by its length; the spectrum
/// always covers the most recent `fft_size` samples.
pub struct SpectrumAnalyzer {
    fft_size: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    rolling: Vec<f32>,
    mono: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    channel_mode: ChannelMode,
}

impl SpectrumAnalyzer {
    pub fn new(fft_size: usize, channel_mode: ChannelMode) -> EngineResult<Self> {
        if fft_size < 16 {
            return Err(EngineError::InvalidConfig(format!(
                "fft size must be at least 16, got {fft_size}"
            )));
        }
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        Ok(Self {
            fft_size,
            fft,
            window: hann_window(fft_size),
            rolling: vec![0.0; fft_size],
            mono: Vec::new(),
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
            scratch,
            channel_mode,
        })
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn bin_count(&self) -> usize {
        self.fft_size / 2 + 1
    }

    /// Fold one captured frame into the rolling window and transform it.
    pub fn push_frame(&mut self, frame: &AudioFrame) -> (MagnitudeSpectrum, ComplexSpectrum) {
        let mut mono = std::mem::take(&mut self.mono);
        mono.clear();
        select_channel(
            &mut mono,
            &frame.samples,
            usize::from(frame.channels),
            self.channel_mode,
        );
        let result = self.push_samples(&mono);
        self.mono = mono;
        result
    }

    /// Same as [`push_frame`](Self::push_frame) for mono `f32` input.
    pub fn push_samples(&mut self, samples: &[f32]) -> (MagnitudeSpectrum, ComplexSpectrum) {
        let n = samples.len();
        if n >= self.fft_size {
            self.rolling
                .copy_from_slice(&samples[n - self.fft_size..]);
        } else if n > 0 {
            self.rolling.rotate_left(n);
            let start = self.fft_size - n;
            self.rolling[start..].copy_from_slice(samples);
        }
        self.transform()
    }

    fn transform(&mut self) -> (MagnitudeSpectrum, ComplexSpectrum) {
        for ((slot, &sample), &w) in self
            .buffer
            .iter_mut()
            .zip(self.rolling.iter())
            .zip(self.window.iter())
        {
            *slot = Complex::new(sample * w, 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        let bins = self.bin_count();
        let complex: Vec<Complex<f32>> = self.buffer[..bins].to_vec();
        let magnitude: Vec<f32> = complex.iter().map(|c| c.norm()).collect();
        (
            MagnitudeSpectrum::new(magnitude),
            ComplexSpectrum::new(complex),
        )
    }

    pub fn reset(&mut self) {
        self.rolling.fill(0.0);
    }
}
