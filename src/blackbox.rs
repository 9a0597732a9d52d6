//! Rolling archive of recent input audio with on-demand WAV export.

use crate::audio::{ring_capacity, AudioFrame, ChannelMode, RingBuffer};
use crate::config::PipelineConfig;
use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, SecondsFormat, Utc};
use hound::{SampleFormat, WavSpec, WavWriter};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const CAPTURE_WAV: &str = "capture.wav";
const METADATA_JSON: &str = "metadata.json";
const CONTEXT_JSON: &str = "context.json";
const CAPTURE_SHA256: &str = "capture.sha256";

/// Fixed-duration ring of captured frames, oldest evicted first.
#[derive(Debug, Clone)]
pub struct BlackBoxRecorder {
    frames: RingBuffer<AudioFrame>,
    sample_rate: u32,
    channels: u16,
}

impl BlackBoxRecorder {
    pub fn new(seconds: f64, sample_rate: u32, channels: u16, frame_size: usize) -> Self {
        Self {
            frames: RingBuffer::new(ring_capacity(seconds, sample_rate, frame_size)),
            sample_rate,
            channels: channels.max(1),
        }
    }

    pub fn append(&mut self, frame: AudioFrame) {
        self.frames.push(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.frames.capacity()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Seconds of audio currently buffered.
    pub fn buffered_seconds(&self) -> f64 {
        let samples: usize = self.frames.iter().map(|frame| frame.samples.len()).sum();
        samples as f64 / (f64::from(self.sample_rate) * f64::from(self.channels))
    }

    /// Write every buffered frame, oldest first, as one 16-bit PCM WAV.
    ///
    /// An existing directory as `destination` gets a timestamped
    /// `blackbox_<UTC>.wav` inside it; anything else is used as the file path.
    pub fn flush(&self, destination: &Path) -> EngineResult<PathBuf> {
        if self.frames.is_empty() {
            return Err(EngineError::EmptyBuffer);
        }
        let path = if destination.is_dir() {
            unique_path(destination, "blackbox", Some("wav"), Utc::now())
        } else {
            destination.to_path_buf()
        };
        self.write_wav(&path)?;
        info!(
            path = %path.display(),
            frames = self.frames.len(),
            seconds = self.buffered_seconds(),
            "black box flushed"
        );
        Ok(path)
    }

    /// Write a `snapshot_<UTC>/` directory with the capture, settings,
    /// caller context and a SHA-256 of the WAV bytes.
    pub fn export_snapshot(
        &self,
        directory: &Path,
        metadata: &SnapshotMetadata,
        context: &serde_json::Value,
    ) -> EngineResult<SnapshotReceipt> {
        if self.frames.is_empty() {
            return Err(EngineError::EmptyBuffer);
        }
        let snapshot_dir = unique_path(directory, "snapshot", None, metadata.timestamp_utc);
        fs::create_dir_all(&snapshot_dir).map_err(|err| write_failure(&snapshot_dir, err))?;

        let wav_path = snapshot_dir.join(CAPTURE_WAV);
        self.write_wav(&wav_path)?;

        write_json(&snapshot_dir.join(METADATA_JSON), metadata)?;
        write_json(&snapshot_dir.join(CONTEXT_JSON), context)?;

        let wav_bytes = fs::read(&wav_path).map_err(|err| write_failure(&wav_path, err))?;
        let sha256 = hex::encode(Sha256::digest(&wav_bytes));
        let hash_path = snapshot_dir.join(CAPTURE_SHA256);
        fs::write(&hash_path, &sha256).map_err(|err| write_failure(&hash_path, err))?;

        info!(dir = %snapshot_dir.display(), sha256 = %sha256, "snapshot exported");
        Ok(SnapshotReceipt {
            directory: snapshot_dir,
            wav_path,
            sha256,
        })
    }

    fn write_wav(&self, path: &Path) -> EngineResult<()> {
        let spec = WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec)?;
        for frame in self.frames.iter() {
            for &sample in &frame.samples {
                writer.write_sample(sample)?;
            }
        }
        writer.finalize()?;
        debug!(path = %path.display(), "wav written");
        Ok(())
    }
}

/// Engine settings recorded next to a snapshot capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub timestamp_utc: DateTime<Utc>,
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_size: usize,
    pub fft_size: usize,
    pub black_box_seconds: f64,
    pub oversubtraction: f32,
    pub spectral_floor: f32,
    pub anomaly_threshold: f32,
    pub identification_threshold: f32,
    pub channel_mode: ChannelMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_device: Option<String>,
}

impl SnapshotMetadata {
    pub fn from_config(config: &PipelineConfig, sample_rate: u32, channels: u16) -> Self {
        Self {
            timestamp_utc: Utc::now(),
            sample_rate,
            channels,
            frame_size: config.frame_size,
            fft_size: config.fft_size,
            black_box_seconds: config.black_box_seconds,
            oversubtraction: config.oversubtraction,
            spectral_floor: config.spectral_floor,
            anomaly_threshold: config.anomaly_threshold,
            identification_threshold: config.identification_threshold,
            channel_mode: config.channel_mode,
            input_device: None,
            output_device: None,
        }
    }

    pub fn with_devices(mut self, input: Option<String>, output: Option<String>) -> Self {
        self.input_device = input;
        self.output_device = output;
        self
    }
}

/// Where a snapshot landed and the digest of its capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotReceipt {
    pub directory: PathBuf,
    pub wav_path: PathBuf,
    pub sha256: String,
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> EngineResult<()> {
    let body = serde_json::to_vec_pretty(value)
        .map_err(|err| EngineError::WriteFailure(format!("{}: {err}", path.display())))?;
    fs::write(path, body).map_err(|err| write_failure(path, err))
}

fn write_failure(path: &Path, err: std::io::Error) -> EngineError {
    EngineError::WriteFailure(format!("{}: {err}", path.display()))
}

/// `<dir>/<prefix>_<UTC stamp>[.ext]`, suffixed with a counter if taken.
fn unique_path(dir: &Path, prefix: &str, ext: Option<&str>, at: DateTime<Utc>) -> PathBuf {
    let stamp = at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '-', '.'], "");
    let name = |n: u32| {
        let base = if n == 0 {
            format!("{prefix}_{stamp}")
        } else {
            format!("{prefix}_{stamp}_{n}")
        };
        match ext {
            Some(ext) => dir.join(format!("{base}.{ext}")),
            None => dir.join(base),
        }
    };
    let mut attempt = 0;
    let mut path = name(attempt);
    while path.exists() {
        attempt += 1;
        path = name(attempt);
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn frame(value: i16, len: usize, channels: u16) -> AudioFrame {
        AudioFrame::new(vec![value; len], channels)
    }

    #[test]
    fn capacity_follows_duration() {
        // 1 s at 48 kHz in 1024-sample frames rounds up to 47 frames.
        let recorder = BlackBoxRecorder::new(1.0, 48_000, 1, 1024);
        assert_eq!(recorder.capacity(), 47);
    }

    #[test]
    fn flush_empty_buffer_fails() {
        let dir = tempdir().expect("tempdir");
        let recorder = BlackBoxRecorder::new(1.0, 48_000, 1, 1024);
        assert_eq!(recorder.flush(dir.path()), Err(EngineError::EmptyBuffer));
    }

    #[test]
    fn flush_writes_frames_in_order() {
        let dir = tempdir().expect("tempdir");
        let mut recorder = BlackBoxRecorder::new(0.1, 1000, 2, 10);
        assert_eq!(recorder.capacity(), 10);
        for value in 0..12 {
            recorder.append(frame(value, 20, 2));
        }

        let path = recorder.flush(&dir.path().join("out.wav")).expect("flush");
        let mut reader = hound::WavReader::open(&path).expect("open");
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 1000);
        assert_eq!(spec.bits_per_sample, 16);

        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.expect("sample")).collect();
        assert_eq!(samples.len(), 10 * 20);
        // Frames 0 and 1 were evicted.
        assert_eq!(samples[0], 2);
        assert_eq!(samples[samples.len() - 1], 11);
    }

    #[test]
    fn flush_into_directory_creates_timestamped_file() {
        let dir = tempdir().expect("tempdir");
        let mut recorder = BlackBoxRecorder::new(1.0, 8000, 1, 256);
        recorder.append(frame(7, 256, 1));

        let first = recorder.flush(dir.path()).expect("flush");
        let second = recorder.flush(dir.path()).expect("flush again");
        assert_ne!(first, second);
        for path in [&first, &second] {
            assert_eq!(path.parent(), Some(dir.path()));
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            assert!(name.starts_with("blackbox_"), "{name}");
            assert!(name.ends_with(".wav"), "{name}");
        }
    }

    #[test]
    fn flush_to_missing_directory_is_write_failure() {
        let dir = tempdir().expect("tempdir");
        let mut recorder = BlackBoxRecorder::new(1.0, 8000, 1, 256);
        recorder.append(frame(1, 256, 1));
        let target = dir.path().join("missing").join("out.wav");
        assert!(matches!(
            recorder.flush(&target),
            Err(EngineError::WriteFailure(_))
        ));
    }

    #[test]
    fn snapshot_writes_all_artifacts() {
        let dir = tempdir().expect("tempdir");
        let mut recorder = BlackBoxRecorder::new(1.0, 48_000, 1, 1024);
        recorder.append(frame(100, 1024, 1));
        recorder.append(frame(-100, 1024, 1));

        let metadata = SnapshotMetadata::from_config(&PipelineConfig::default(), 48_000, 1)
            .with_devices(Some("mic".to_string()), None);
        let context = serde_json::json!({ "StarSystem": "Sol" });
        let receipt = recorder
            .export_snapshot(dir.path(), &metadata, &context)
            .expect("snapshot");

        assert!(receipt.wav_path.exists());
        let stored_hash =
            fs::read_to_string(receipt.directory.join(CAPTURE_SHA256)).expect("hash file");
        assert_eq!(stored_hash, receipt.sha256);
        let wav_bytes = fs::read(&receipt.wav_path).expect("wav");
        assert_eq!(hex::encode(Sha256::digest(&wav_bytes)), receipt.sha256);

        let meta: serde_json::Value = serde_json::from_slice(
            &fs::read(receipt.directory.join(METADATA_JSON)).expect("metadata"),
        )
        .expect("json");
        assert_eq!(meta["sample_rate"], 48_000);
        assert_eq!(meta["input_device"], "mic");
        assert!(meta.get("output_device").is_none());

        let ctx: serde_json::Value = serde_json::from_slice(
            &fs::read(receipt.directory.join(CONTEXT_JSON)).expect("context"),
        )
        .expect("json");
        assert_eq!(ctx, context);
    }
}
