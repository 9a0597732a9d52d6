//! Engine settings: CLI parsing, defaults, and the runtime copy handed to the
//! pipeline.

mod defaults;
mod validation;

use crate::audio::{ChannelMode, HIGH_QUALITY_FRAME_SIZE, LOW_LATENCY_FRAME_SIZE};
use crate::dsp::{
    DEFAULT_IDENTIFICATION_THRESHOLD, DEFAULT_OVERSUBTRACTION, DEFAULT_SPECTRAL_FLOOR,
};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use defaults::{
    DEFAULT_ANALYSIS_POLL_MS, DEFAULT_ANALYSIS_QUEUE, DEFAULT_ANOMALY_THRESHOLD,
    DEFAULT_BLACK_BOX_SECONDS, DEFAULT_CALIBRATION_FRAMES, DEFAULT_FFT_SIZE,
    DEFAULT_IDENTIFY_EVERY, DEFAULT_MAX_STREAM_FAULTS, DEFAULT_SPECTROGRAM_HISTORY,
    DEFAULT_TEMPLATE_DIR,
};

/// Capture granularity presets. Switching needs a pipeline restart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyMode {
    /// 512-sample frames, about 10 ms at 48 kHz.
    #[default]
    Low,
    /// 4096-sample frames, about 85 ms at 48 kHz.
    High,
}

impl LatencyMode {
    pub fn frame_size(self) -> usize {
        match self {
            LatencyMode::Low => LOW_LATENCY_FRAME_SIZE,
            LatencyMode::High => HIGH_QUALITY_FRAME_SIZE,
        }
    }
}

/// CLI options for the Signal Hunter engine.
#[derive(Debug, Parser, Clone)]
#[command(about = "Signal Hunter audio proxy", author, version)]
pub struct EngineConfig {
    /// Capture granularity preset
    #[arg(long = "latency-mode", value_enum, default_value_t = LatencyMode::Low)]
    pub latency_mode: LatencyMode,

    /// Samples per channel per frame (overrides --latency-mode)
    #[arg(long = "frame-size")]
    pub frame_size: Option<usize>,

    /// FFT window length for analysis
    #[arg(long = "fft-size", default_value_t = DEFAULT_FFT_SIZE)]
    pub fft_size: usize,

    /// Seconds of audio kept in the black box
    #[arg(long = "black-box-seconds", default_value_t = DEFAULT_BLACK_BOX_SECONDS)]
    pub black_box_seconds: f64,

    /// Multiplier on the noise mean before subtraction
    #[arg(long = "oversubtraction", default_value_t = DEFAULT_OVERSUBTRACTION)]
    pub oversubtraction: f32,

    /// Fraction of each raw bin kept after gating
    #[arg(long = "spectral-floor", default_value_t = DEFAULT_SPECTRAL_FLOOR)]
    pub spectral_floor: f32,

    /// Per-bin z-score above which a signal is reported
    #[arg(long = "anomaly-threshold", default_value_t = DEFAULT_ANOMALY_THRESHOLD)]
    pub anomaly_threshold: f32,

    /// Minimum template score for a positive identification
    #[arg(
        long = "identification-threshold",
        default_value_t = DEFAULT_IDENTIFICATION_THRESHOLD
    )]
    pub identification_threshold: f32,

    /// Frame queue capacity between capture and analysis threads
    #[arg(long = "analysis-queue", default_value_t = DEFAULT_ANALYSIS_QUEUE)]
    pub analysis_queue: usize,

    /// Run detection and identification every N analyzed frames
    #[arg(long = "identify-every", default_value_t = DEFAULT_IDENTIFY_EVERY)]
    pub identify_every: u32,

    /// Rows of spectrogram history kept for 2-D template matching
    #[arg(long = "spectrogram-history", default_value_t = DEFAULT_SPECTROGRAM_HISTORY)]
    pub spectrogram_history: usize,

    /// Which input channel(s) feed analysis
    #[arg(long = "channel-mode", value_enum, default_value_t = ChannelMode::Mix)]
    pub channel_mode: ChannelMode,

    /// Consecutive device faults tolerated before the pipeline stops
    #[arg(long = "max-stream-faults", default_value_t = DEFAULT_MAX_STREAM_FAULTS)]
    pub max_stream_faults: u32,

    /// Analysis idle poll interval (milliseconds)
    #[arg(long = "analysis-poll-ms", default_value_t = DEFAULT_ANALYSIS_POLL_MS)]
    pub analysis_poll_ms: u64,

    /// Spectra collected for the startup noise calibration
    #[arg(long = "calibration-frames", default_value_t = DEFAULT_CALIBRATION_FRAMES)]
    pub calibration_frames: usize,

    /// Capture device name (defaults to the host default)
    #[arg(long = "input-device")]
    pub input_device: Option<String>,

    /// Render device name (defaults to the host default)
    #[arg(long = "output-device")]
    pub output_device: Option<String>,

    /// Directory holding stored signal templates
    #[arg(long = "template-dir", default_value = DEFAULT_TEMPLATE_DIR)]
    pub template_dir: PathBuf,

    /// Directory for black-box and snapshot exports (defaults to the temp dir)
    #[arg(long = "export-dir")]
    pub export_dir: Option<PathBuf>,

    /// Print detected audio devices and exit
    #[arg(long = "list-devices", default_value_t = false)]
    pub list_devices: bool,

    /// Enable JSON trace logging
    #[arg(long = "logs", env = "SIGNAL_HUNTER_LOGS", default_value_t = false)]
    pub logs: bool,

    /// Disable all file logging (overrides --logs)
    #[arg(long = "no-logs", env = "SIGNAL_HUNTER_NO_LOGS", default_value_t = false)]
    pub no_logs: bool,
}

impl EngineConfig {
    pub fn effective_frame_size(&self) -> usize {
        self.frame_size
            .unwrap_or_else(|| self.latency_mode.frame_size())
    }

    pub fn logging_enabled(&self) -> bool {
        self.logs && !self.no_logs
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig::from(self)
    }
}

/// Runtime settings for one pipeline session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub frame_size: usize,
    pub fft_size: usize,
    pub black_box_seconds: f64,
    pub oversubtraction: f32,
    pub spectral_floor: f32,
    pub anomaly_threshold: f32,
    pub identification_threshold: f32,
    pub analysis_queue_capacity: usize,
    pub identify_every: u32,
    pub spectrogram_history: usize,
    pub channel_mode: ChannelMode,
    pub max_stream_faults: u32,
    #[serde(with = "duration_ms")]
    pub analysis_poll: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_size: LOW_LATENCY_FRAME_SIZE,
            fft_size: DEFAULT_FFT_SIZE,
            black_box_seconds: DEFAULT_BLACK_BOX_SECONDS,
            oversubtraction: DEFAULT_OVERSUBTRACTION,
            spectral_floor: DEFAULT_SPECTRAL_FLOOR,
            anomaly_threshold: DEFAULT_ANOMALY_THRESHOLD,
            identification_threshold: DEFAULT_IDENTIFICATION_THRESHOLD,
            analysis_queue_capacity: DEFAULT_ANALYSIS_QUEUE,
            identify_every: DEFAULT_IDENTIFY_EVERY,
            spectrogram_history: DEFAULT_SPECTROGRAM_HISTORY,
            channel_mode: ChannelMode::Mix,
            max_stream_faults: DEFAULT_MAX_STREAM_FAULTS,
            analysis_poll: Duration::from_millis(DEFAULT_ANALYSIS_POLL_MS),
        }
    }
}

impl From<&EngineConfig> for PipelineConfig {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            frame_size: cfg.effective_frame_size(),
            fft_size: cfg.fft_size,
            black_box_seconds: cfg.black_box_seconds,
            oversubtraction: cfg.oversubtraction,
            spectral_floor: cfg.spectral_floor,
            anomaly_threshold: cfg.anomaly_threshold,
            identification_threshold: cfg.identification_threshold,
            analysis_queue_capacity: cfg.analysis_queue,
            identify_every: cfg.identify_every,
            spectrogram_history: cfg.spectrogram_history,
            channel_mode: cfg.channel_mode,
            max_stream_faults: cfg.max_stream_faults,
            analysis_poll: Duration::from_millis(cfg.analysis_poll_ms),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(
        value: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
