use super::MagnitudeSpectrum;
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Share of the raw bin that always survives gating.
pub const DEFAULT_SPECTRAL_FLOOR: f32 = 0.10;

/// Multiplier on the noise mean before subtraction.
pub const DEFAULT_OVERSUBTRACTION: f32 = 1.5;

/// Lower bound on per-bin standard deviation.
pub const STD_EPSILON: f32 = 1e-9;

/// Per-bin noise statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoiseModel {
    pub mean: Vec<f32>,
    pub std_dev: Vec<f32>,
    pub calibrated: bool,
}

impl NoiseModel {
    pub fn bin_count(&self) -> usize {
        self.mean.len()
    }
}

/// Largest per-bin z-score of a spectrum against the noise model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnomalyScore {
    pub max_z: f32,
    pub peak_bin: usize,
}

impl AnomalyScore {
    pub fn exceeds(&self, threshold: f32) -> bool {
        self.max_z > threshold
    }
}

/// Noise-adaptive spectral gate and anomaly scorer.
#[derive(Debug, Clone)]
pub struct SpectralProcessor {
    model: NoiseModel,
    spectral_floor: f32,
    oversubtraction: f32,
}

impl Default for SpectralProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_SPECTRAL_FLOOR, DEFAULT_OVERSUBTRACTION)
    }
}

impl SpectralProcessor {
    pub fn new(spectral_floor: f32, oversubtraction: f32) -> Self {
        Self {
            model: NoiseModel::default(),
            spectral_floor: spectral_floor.clamp(0.0, 1.0),
            oversubtraction: oversubtraction.max(0.0),
        }
    }

    pub fn noise_model(&self) -> &NoiseModel {
        &self.model
    }

    pub fn is_calibrated(&self) -> bool {
        self.model.calibrated
    }

    pub fn spectral_floor(&self) -> f32 {
        self.spectral_floor
    }

    pub fn oversubtraction(&self) -> f32 {
        self.oversubtraction
    }

    /// Forget the noise model; gating and detection go quiet until the next
    /// calibration.
    pub fn reset(&mut self) {
        self.model = NoiseModel::default();
    }

    /// Fit per-bin mean and standard deviation over `frames`.
    ///
    /// Every frame must have the same bin count. On error the previous model
    /// is left untouched.
    pub fn calibrate(&mut self, frames: &[MagnitudeSpectrum]) -> EngineResult<()> {
        let Some(first) = frames.first() else {
            return Err(EngineError::ShapeMismatch {
                expected: 1,
                found: 0,
            });
        };
        let bins = first.len();
        if let Some(bad) = frames.iter().find(|frame| frame.len() != bins) {
            return Err(EngineError::ShapeMismatch {
                expected: bins,
                found: bad.len(),
            });
        }

        let count = frames.len() as f64;
        let mut sums = vec![0.0f64; bins];
        for frame in frames {
            for (acc, &value) in sums.iter_mut().zip(frame.iter()) {
                *acc += f64::from(value);
            }
        }
        let mean: Vec<f64> = sums.into_iter().map(|sum| sum / count).collect();

        let mut sq = vec![0.0f64; bins];
        for frame in frames {
            for ((acc, &value), &mu) in sq.iter_mut().zip(frame.iter()).zip(mean.iter()) {
                let diff = f64::from(value) - mu;
                *acc += diff * diff;
            }
        }
        let std_dev = sq
            .into_iter()
            .map(|total| ((total / count).sqrt() as f32).max(STD_EPSILON))
            .collect();

        self.model = NoiseModel {
            mean: mean.into_iter().map(|mu| mu as f32).collect(),
            std_dev,
            calibrated: true,
        };
        debug!(frames = frames.len(), bins, "noise model calibrated");
        Ok(())
    }

    /// Soft spectral subtraction: `max(x - mean * oversubtraction, x * floor)`
    /// per bin. Uncalibrated processors return the input untouched.
    pub fn gate(&self, spectrum: &MagnitudeSpectrum) -> MagnitudeSpectrum {
        if !self.model.calibrated {
            return spectrum.clone();
        }
        if spectrum.len() != self.model.bin_count() {
            warn!(
                expected = self.model.bin_count(),
                found = spectrum.len(),
                "skipping gate for spectrum with foreign bin count"
            );
            return spectrum.clone();
        }
        spectrum
            .iter()
            .zip(self.model.mean.iter())
            .map(|(&value, &mu)| {
                let subtracted = value - mu * self.oversubtraction;
                let floor = value * self.spectral_floor;
                subtracted.max(floor)
            })
            .collect::<Vec<f32>>()
            .into()
    }

    /// Plain noise subtraction clipped at zero, used for measurements and for
    /// capturing 1-D templates.
    pub fn residual(&self, spectrum: &MagnitudeSpectrum) -> MagnitudeSpectrum {
        if !self.model.calibrated || spectrum.len() != self.model.bin_count() {
            return spectrum.clone();
        }
        spectrum
            .iter()
            .zip(self.model.mean.iter())
            .map(|(&value, &mu)| (value - mu).max(0.0))
            .collect::<Vec<f32>>()
            .into()
    }

    /// Maximum z-score and the bin it sits in. `None` when uncalibrated or
    /// when the spectrum does not line up with the model.
    pub fn anomaly_score(&self, spectrum: &MagnitudeSpectrum) -> Option<AnomalyScore> {
        if !self.model.calibrated || spectrum.len() != self.model.bin_count() {
            return None;
        }
        let mut best: Option<AnomalyScore> = None;
        for (bin, ((&value, &mu), &sigma)) in spectrum
            .iter()
            .zip(self.model.mean.iter())
            .zip(self.model.std_dev.iter())
            .enumerate()
        {
            let z = (value - mu) / sigma;
            match best {
                Some(current) if z <= current.max_z => {}
                _ if z.is_nan() => {}
                _ => best = Some(AnomalyScore { max_z: z, peak_bin: bin }),
            }
        }
        best
    }

    pub fn detect_anomaly(&self, spectrum: &MagnitudeSpectrum, threshold: f32) -> bool {
        self.anomaly_score(spectrum)
            .is_some_and(|score| score.exceeds(threshold))
    }
}
