//! Spectral analysis: FFT front end, noise model, gating, anomaly scoring,
//! and template identification.

mod analyzer;
mod characteristics;
mod identify;
mod processor;
mod spectrogram;
#[cfg(test)]
mod tests;

pub use analyzer::{hann_window, SpectrumAnalyzer};
pub use characteristics::SignalCharacteristics;
pub use identify::{
    IdentifyOutcome, SignalIdentifier, SignalTemplate, TemplateData, TemplateSet,
    DEFAULT_IDENTIFICATION_THRESHOLD,
};
pub use processor::{
    AnomalyScore, NoiseModel, SpectralProcessor, DEFAULT_OVERSUBTRACTION, DEFAULT_SPECTRAL_FLOOR,
    STD_EPSILON,
};
pub use spectrogram::Spectrogram;

use rustfft::num_complex::Complex;
use std::ops::Deref;

/// Per-bin magnitudes (`fft_size / 2 + 1` entries). Immutable once built.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MagnitudeSpectrum(Vec<f32>);

impl MagnitudeSpectrum {
    pub fn new(bins: Vec<f32>) -> Self {
        Self(bins)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }

    /// Index of the largest bin; lowest index wins ties.
    pub fn peak_bin(&self) -> Option<usize> {
        argmax(&self.0)
    }
}

impl Deref for MagnitudeSpectrum {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.0
    }
}

impl From<Vec<f32>> for MagnitudeSpectrum {
    fn from(bins: Vec<f32>) -> Self {
        Self(bins)
    }
}

/// Complex bins with the same indexing as [`MagnitudeSpectrum`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ComplexSpectrum(Vec<Complex<f32>>);

impl ComplexSpectrum {
    pub fn new(bins: Vec<Complex<f32>>) -> Self {
        Self(bins)
    }

    pub fn as_slice(&self) -> &[Complex<f32>] {
        &self.0
    }

    pub fn magnitude(&self) -> MagnitudeSpectrum {
        MagnitudeSpectrum(self.0.iter().map(|c| c.norm()).collect())
    }
}

impl Deref for ComplexSpectrum {
    type Target = [Complex<f32>];

    fn deref(&self) -> &[Complex<f32>] {
        &self.0
    }
}

/// Centre frequency of `bin` for a real FFT of `fft_size` points.
pub fn bin_frequency(bin: usize, sample_rate: u32, fft_size: usize) -> f32 {
    if fft_size == 0 {
        return 0.0;
    }
    bin as f32 * sample_rate as f32 / fft_size as f32
}

pub(crate) fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &value) in values.iter().enumerate() {
        match best {
            Some((_, current)) if value <= current => {}
            _ if value.is_nan() => {}
            _ => best = Some((idx, value)),
        }
    }
    best.map(|(idx, _)| idx)
}

pub(crate) fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|v| v * v).sum::<f32>().sqrt()
}
