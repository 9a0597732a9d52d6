pub const DEFAULT_FFT_SIZE: usize = 4096;
pub const DEFAULT_BLACK_BOX_SECONDS: f64 = 30.0;
pub const DEFAULT_ANOMALY_THRESHOLD: f32 = 5.0;
pub const DEFAULT_ANALYSIS_QUEUE: usize = 20;
pub const DEFAULT_IDENTIFY_EVERY: u32 = 4;
pub const DEFAULT_SPECTROGRAM_HISTORY: usize = 512;
pub const DEFAULT_MAX_STREAM_FAULTS: u32 = 8;
pub const DEFAULT_ANALYSIS_POLL_MS: u64 = 50;
pub const DEFAULT_CALIBRATION_FRAMES: usize = 100;
pub const DEFAULT_TEMPLATE_DIR: &str = "templates";

pub(super) const MIN_FRAME_SIZE: usize = 64;
pub(super) const MAX_FRAME_SIZE: usize = 16_384;
pub(super) const MIN_FFT_SIZE: usize = 256;
pub(super) const MAX_FFT_SIZE: usize = 32_768;
pub(super) const MAX_BLACK_BOX_SECONDS: f64 = 600.0;
pub(super) const MAX_OVERSUBTRACTION: f32 = 10.0;
pub(super) const MAX_ANALYSIS_QUEUE: usize = 1024;
pub(super) const MAX_SPECTROGRAM_HISTORY: usize = 10_000;
pub(super) const MAX_DEVICE_NAME_BYTES: usize = 256;
pub(super) const FORBIDDEN_DEVICE_CHARS: &[char] = &['\0', '\n', '\r'];
