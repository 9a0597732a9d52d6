use super::defaults::{
    FORBIDDEN_DEVICE_CHARS, MAX_ANALYSIS_QUEUE, MAX_BLACK_BOX_SECONDS, MAX_DEVICE_NAME_BYTES,
    MAX_FFT_SIZE, MAX_FRAME_SIZE, MAX_OVERSUBTRACTION, MAX_SPECTROGRAM_HISTORY, MIN_FFT_SIZE,
    MIN_FRAME_SIZE,
};
use super::{EngineConfig, PipelineConfig};
use crate::error::{EngineError, EngineResult};
use anyhow::{bail, Context, Result};
use clap::Parser;

impl EngineConfig {
    /// Parse CLI arguments and validate them right away.
    pub fn parse_args() -> Result<Self> {
        let mut config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Check CLI values and normalize device names.
    pub fn validate(&mut self) -> Result<()> {
        if let Some(frame_size) = self.frame_size {
            if !(MIN_FRAME_SIZE..=MAX_FRAME_SIZE).contains(&frame_size) {
                bail!(
                    "--frame-size must be between {MIN_FRAME_SIZE} and {MAX_FRAME_SIZE}, got {frame_size}"
                );
            }
        }
        if self.calibration_frames == 0 {
            bail!("--calibration-frames must be at least 1");
        }
        if !(1..=1000).contains(&self.analysis_poll_ms) {
            bail!(
                "--analysis-poll-ms must be between 1 and 1000, got {}",
                self.analysis_poll_ms
            );
        }

        self.input_device = sanitize_device(self.input_device.take(), "--input-device")?;
        self.output_device = sanitize_device(self.output_device.take(), "--output-device")?;

        self.pipeline_config()
            .validate()
            .context("invalid pipeline settings")?;
        Ok(())
    }
}

impl PipelineConfig {
    /// Bounds-check every runtime knob. Called by the pipeline before it
    /// opens any device.
    pub fn validate(&self) -> EngineResult<()> {
        let invalid = |msg: String| Err(EngineError::InvalidConfig(msg));

        if !(MIN_FRAME_SIZE..=MAX_FRAME_SIZE).contains(&self.frame_size) {
            return invalid(format!(
                "frame size must be between {MIN_FRAME_SIZE} and {MAX_FRAME_SIZE}, got {}",
                self.frame_size
            ));
        }
        if !(MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&self.fft_size)
            || !self.fft_size.is_power_of_two()
        {
            return invalid(format!(
                "fft size must be a power of two between {MIN_FFT_SIZE} and {MAX_FFT_SIZE}, got {}",
                self.fft_size
            ));
        }
        if !self.black_box_seconds.is_finite()
            || self.black_box_seconds <= 0.0
            || self.black_box_seconds > MAX_BLACK_BOX_SECONDS
        {
            return invalid(format!(
                "black box duration must be in (0, {MAX_BLACK_BOX_SECONDS}] seconds, got {}",
                self.black_box_seconds
            ));
        }
        if !(0.0..=MAX_OVERSUBTRACTION).contains(&self.oversubtraction) {
            return invalid(format!(
                "oversubtraction must be between 0.0 and {MAX_OVERSUBTRACTION}, got {}",
                self.oversubtraction
            ));
        }
        if !(0.0..=1.0).contains(&self.spectral_floor) {
            return invalid(format!(
                "spectral floor must be between 0.0 and 1.0, got {}",
                self.spectral_floor
            ));
        }
        if !self.anomaly_threshold.is_finite() || self.anomaly_threshold <= 0.0 {
            return invalid(format!(
                "anomaly threshold must be a positive z-score, got {}",
                self.anomaly_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.identification_threshold) {
            return invalid(format!(
                "identification threshold must be between 0.0 and 1.0, got {}",
                self.identification_threshold
            ));
        }
        if !(1..=MAX_ANALYSIS_QUEUE).contains(&self.analysis_queue_capacity) {
            return invalid(format!(
                "analysis queue must hold between 1 and {MAX_ANALYSIS_QUEUE} frames, got {}",
                self.analysis_queue_capacity
            ));
        }
        if self.identify_every == 0 {
            return invalid("identify interval must be at least 1 frame".to_string());
        }
        if !(1..=MAX_SPECTROGRAM_HISTORY).contains(&self.spectrogram_history) {
            return invalid(format!(
                "spectrogram history must be between 1 and {MAX_SPECTROGRAM_HISTORY} rows, got {}",
                self.spectrogram_history
            ));
        }
        if self.analysis_poll.is_zero() {
            return invalid("analysis poll interval must be non-zero".to_string());
        }
        Ok(())
    }
}

/// Trim a device name and reject values that cannot name a real endpoint.
/// Blank names fall back to the host default.
pub(super) fn sanitize_device(value: Option<String>, flag: &str) -> Result<Option<String>> {
    let Some(raw) = value else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.len() > MAX_DEVICE_NAME_BYTES
        || trimmed
            .chars()
            .any(|ch| FORBIDDEN_DEVICE_CHARS.contains(&ch))
    {
        bail!("{flag} must be <={MAX_DEVICE_NAME_BYTES} bytes with no control characters");
    }
    Ok(Some(trimmed.to_string()))
}
