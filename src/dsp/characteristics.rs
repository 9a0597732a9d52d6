use super::{argmax, bin_frequency, MagnitudeSpectrum};
use serde::{Deserialize, Serialize};

/// Summary measurements of a noise-subtracted spectrum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalCharacteristics {
    /// Residual power over noise power in dB; `None` without a noise estimate.
    pub snr_db: Option<f32>,
    /// Span between the lowest and highest bins holding residual energy.
    pub bandwidth_hz: f32,
    pub spectral_centroid_hz: f32,
    pub peak_frequency_hz: f32,
}

impl SignalCharacteristics {
    pub fn measure(
        residual: &MagnitudeSpectrum,
        noise_mean: &[f32],
        sample_rate: u32,
        fft_size: usize,
    ) -> Self {
        let freq = |bin: usize| bin_frequency(bin, sample_rate, fft_size);

        let signal_power: f32 = residual.iter().map(|m| m * m).sum();
        let noise_power: f32 = noise_mean.iter().map(|m| m * m).sum();
        let snr_db = (noise_power > 0.0 && signal_power > 0.0)
            .then(|| 10.0 * (signal_power / noise_power).log10());

        let first = residual.iter().position(|&m| m > 0.0);
        let last = residual.iter().rposition(|&m| m > 0.0);
        let bandwidth_hz = match (first, last) {
            (Some(lo), Some(hi)) if hi > lo => freq(hi) - freq(lo),
            _ => 0.0,
        };

        let total: f32 = residual.iter().sum();
        let spectral_centroid_hz = if total > 0.0 {
            residual
                .iter()
                .enumerate()
                .map(|(bin, &m)| freq(bin) * m)
                .sum::<f32>()
                / total
        } else {
            0.0
        };

        let peak_frequency_hz = if first.is_some() {
            argmax(residual).map(freq).unwrap_or(0.0)
        } else {
            0.0
        };

        Self {
            snr_db,
            bandwidth_hz,
            spectral_centroid_hz,
            peak_frequency_hz,
        }
    }
}
