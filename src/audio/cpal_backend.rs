//! Hardware endpoints via CPAL.
//!
//! CPAL delivers audio on callback threads and its stream handles cannot move
//! between threads, so each opened endpoint parks its stream on a small owner
//! thread and exposes blocking `read_frame` / `write_frame` calls backed by
//! queues. Dropping the endpoint stops and joins the owner thread.

use super::device::{AudioBackend, DeviceDirection, DeviceInfo, InputDevice, OutputDevice};
use super::dispatch::FrameAssembler;
use super::AudioFrame;
use crate::error::{EngineError, EngineResult};
use crate::lock_or_recover;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::collections::VecDeque;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

const INPUT_QUEUE_FRAMES: usize = 8;
const OUTPUT_QUEUE_FRAMES: usize = 4;
const MIN_IO_TIMEOUT: Duration = Duration::from_millis(200);

/// Enumerate capture and render endpoints with their native formats.
pub fn list_devices() -> EngineResult<Vec<DeviceInfo>> {
    let host = cpal::default_host();
    let mut infos = Vec::new();

    let inputs = host
        .input_devices()
        .map_err(|err| EngineError::DeviceUnavailable(format!("no input devices: {err}")))?;
    for (index, device) in inputs.enumerate() {
        let Ok(config) = device.default_input_config() else {
            continue;
        };
        infos.push(DeviceInfo {
            name: device.name().unwrap_or_else(|_| "Unknown Device".to_string()),
            index: Some(index),
            channels: config.channels(),
            sample_rate: config.sample_rate().0,
            direction: DeviceDirection::Capture,
        });
    }

    let outputs = host
        .output_devices()
        .map_err(|err| EngineError::DeviceUnavailable(format!("no output devices: {err}")))?;
    for (index, device) in outputs.enumerate() {
        let Ok(config) = device.default_output_config() else {
            continue;
        };
        infos.push(DeviceInfo {
            name: device.name().unwrap_or_else(|_| "Unknown Device".to_string()),
            index: Some(index),
            channels: config.channels(),
            sample_rate: config.sample_rate().0,
            direction: DeviceDirection::Render,
        });
    }

    Ok(infos)
}

/// Opens endpoints on the platform's default CPAL host.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

fn find_device(info: &DeviceInfo) -> EngineResult<cpal::Device> {
    let host = cpal::default_host();
    let unavailable = |what: String| EngineError::DeviceUnavailable(what);
    match (info.direction, info.index) {
        (DeviceDirection::Capture, Some(index)) => host
            .input_devices()
            .map_err(|err| unavailable(format!("no input devices: {err}")))?
            .nth(index)
            .ok_or_else(|| unavailable(format!("input device #{index} '{}' not found", info.name))),
        (DeviceDirection::Render, Some(index)) => host
            .output_devices()
            .map_err(|err| unavailable(format!("no output devices: {err}")))?
            .nth(index)
            .ok_or_else(|| unavailable(format!("output device #{index} '{}' not found", info.name))),
        (DeviceDirection::Capture, None) => host
            .default_input_device()
            .ok_or_else(|| unavailable("no default input device available".to_string())),
        (DeviceDirection::Render, None) => host
            .default_output_device()
            .ok_or_else(|| unavailable("no default output device available".to_string())),
    }
}

fn io_timeout(frame_size: usize, sample_rate: u32) -> Duration {
    let frame = Duration::from_secs_f64(frame_size as f64 / f64::from(sample_rate.max(1)));
    (frame * 4).max(MIN_IO_TIMEOUT)
}

impl AudioBackend for CpalBackend {
    fn open_input(
        &self,
        info: &DeviceInfo,
        frame_size: usize,
    ) -> EngineResult<Box<dyn InputDevice>> {
        let device = find_device(info)?;
        let default_config = device
            .default_input_config()
            .map_err(|err| EngineError::DeviceUnavailable(format!("{}: {err}", info.name)))?;
        let format = default_config.sample_format();
        let stream_config: StreamConfig = default_config.into();
        let sample_rate = stream_config.sample_rate.0;
        let channels = stream_config.channels.max(1);

        debug!(
            device = %info.name,
            ?format,
            sample_rate,
            channels,
            frame_size,
            "opening capture stream"
        );

        let (sender, receiver) = bounded::<AudioFrame>(INPUT_QUEUE_FRAMES);
        let dropped = Arc::new(AtomicU64::new(0));
        let assembler = FrameAssembler::new(frame_size, channels, sender, dropped.clone());
        let guard = spawn_stream_owner("capture", move || {
            build_input_stream(&device, &stream_config, format, assembler)
        })?;

        info!(device = %info.name, sample_rate, channels, "capture stream running");
        Ok(Box::new(CpalInput {
            receiver,
            sample_rate,
            channels,
            timeout: io_timeout(frame_size, sample_rate),
            dropped,
            _guard: guard,
        }))
    }

    fn open_output(
        &self,
        info: &DeviceInfo,
        frame_size: usize,
    ) -> EngineResult<Box<dyn OutputDevice>> {
        let device = find_device(info)?;
        let default_config = device
            .default_output_config()
            .map_err(|err| EngineError::DeviceUnavailable(format!("{}: {err}", info.name)))?;
        let format = default_config.sample_format();
        let stream_config: StreamConfig = default_config.into();
        let sample_rate = stream_config.sample_rate.0;
        let channels = stream_config.channels.max(1);

        debug!(
            device = %info.name,
            ?format,
            sample_rate,
            channels,
            "opening render stream"
        );

        let capacity = frame_size.max(1) * usize::from(channels) * OUTPUT_QUEUE_FRAMES;
        let queue = Arc::new(OutputQueue::new(capacity));
        let callback_queue = queue.clone();
        let guard = spawn_stream_owner("render", move || {
            build_output_stream(&device, &stream_config, format, callback_queue)
        })?;

        info!(device = %info.name, sample_rate, channels, "render stream running");
        Ok(Box::new(CpalOutput {
            queue,
            sample_rate,
            channels,
            timeout: io_timeout(frame_size, sample_rate),
            _guard: guard,
        }))
    }
}

/// Keeps a CPAL stream alive on its own thread until dropped.
struct StreamGuard {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        // Disconnecting the channel wakes the owner thread.
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("audio stream owner thread panicked");
            }
        }
    }
}

fn spawn_stream_owner<F>(label: &'static str, build: F) -> EngineResult<StreamGuard>
where
    F: FnOnce() -> EngineResult<cpal::Stream> + Send + 'static,
{
    let (ready_tx, ready_rx) = bounded::<EngineResult<()>>(1);
    let (stop_tx, stop_rx) = bounded::<()>(1);

    let handle = thread::Builder::new()
        .name(format!("cpal-{label}"))
        .spawn(move || {
            let stream = match build().and_then(|stream| {
                stream
                    .play()
                    .map_err(|err| EngineError::DeviceUnavailable(err.to_string()))?;
                Ok(stream)
            }) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };
            let _ = stop_rx.recv();
            if let Err(err) = stream.pause() {
                debug!(stream = label, "failed to pause audio stream: {err}");
            }
            drop(stream);
        })
        .map_err(|err| EngineError::DeviceUnavailable(format!("spawn {label} thread: {err}")))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(StreamGuard {
            stop: Some(stop_tx),
            handle: Some(handle),
        }),
        Ok(Err(err)) => {
            let _ = handle.join();
            Err(err)
        }
        Err(_) => {
            let _ = handle.join();
            Err(EngineError::DeviceUnavailable(format!(
                "{label} stream exited before starting"
            )))
        }
    }
}

fn build_input_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    format: SampleFormat,
    mut assembler: FrameAssembler,
) -> EngineResult<cpal::Stream> {
    let err_fn = |err| warn!("audio_stream_error: {err}");
    let stream = match format {
        SampleFormat::F32 => device.build_input_stream(
            config,
            move |data: &[f32], _| {
                assembler.push(data, |sample| {
                    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
                });
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            config,
            move |data: &[i16], _| {
                assembler.push(data, |sample| sample);
            },
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            config,
            move |data: &[u16], _| {
                assembler.push(data, |sample| (i32::from(sample) - 32_768) as i16);
            },
            err_fn,
            None,
        ),
        other => {
            return Err(EngineError::DeviceUnavailable(format!(
                "unsupported sample format: {other:?}"
            )))
        }
    };
    stream.map_err(|err| EngineError::DeviceUnavailable(err.to_string()))
}

fn build_output_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    format: SampleFormat,
    queue: Arc<OutputQueue>,
) -> EngineResult<cpal::Stream> {
    let err_fn = |err| warn!("audio_stream_error: {err}");
    let stream = match format {
        SampleFormat::F32 => device.build_output_stream(
            config,
            move |data: &mut [f32], _| {
                queue.drain_into(data, 0.0, |sample| f32::from(sample) / 32_768.0);
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_output_stream(
            config,
            move |data: &mut [i16], _| {
                queue.drain_into(data, 0, |sample| sample);
            },
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_output_stream(
            config,
            move |data: &mut [u16], _| {
                queue.drain_into(data, 32_768, |sample| (i32::from(sample) + 32_768) as u16);
            },
            err_fn,
            None,
        ),
        other => {
            return Err(EngineError::DeviceUnavailable(format!(
                "unsupported sample format: {other:?}"
            )))
        }
    };
    stream.map_err(|err| EngineError::DeviceUnavailable(err.to_string()))
}

struct CpalInput {
    receiver: Receiver<AudioFrame>,
    sample_rate: u32,
    channels: u16,
    timeout: Duration,
    dropped: Arc<AtomicU64>,
    _guard: StreamGuard,
}

impl InputDevice for CpalInput {
    fn read_frame(&mut self) -> EngineResult<Option<AudioFrame>> {
        match self.receiver.recv_timeout(self.timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Err(EngineError::StreamFault(format!(
                "no audio from input within {}ms",
                self.timeout.as_millis()
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(EngineError::StreamFault(
                "capture stream disconnected".to_string(),
            )),
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        let overruns = self.dropped.load(std::sync::atomic::Ordering::Relaxed);
        if overruns > 0 {
            debug!(overruns, "capture callback overran the input queue");
        }
    }
}

/// Sample queue between `write_frame` and the render callback.
struct OutputQueue {
    samples: Mutex<VecDeque<i16>>,
    space: Condvar,
    capacity: usize,
}

impl OutputQueue {
    fn new(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            space: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Render callback side: never blocks, plays silence on underrun or contention.
    fn drain_into<T, F>(&self, out: &mut [T], silence: T, mut convert: F)
    where
        T: Copy,
        F: FnMut(i16) -> T,
    {
        match self.samples.try_lock() {
            Ok(mut queue) => {
                for slot in out.iter_mut() {
                    *slot = queue.pop_front().map(&mut convert).unwrap_or(silence);
                }
                self.space.notify_one();
            }
            Err(_) => out.fill(silence),
        }
    }

    /// Writer side: appends every sample, waiting for the callback to free
    /// space whenever the queue is full. Frames longer than the queue are
    /// streamed through it in pieces.
    fn push_blocking(&self, samples: &[i16], timeout: Duration) -> EngineResult<()> {
        let mut pending = samples;
        let mut queue = lock_or_recover(&self.samples, "render queue");
        while !pending.is_empty() {
            let free = self.capacity.saturating_sub(queue.len());
            if free == 0 {
                let (guard, wait) = self
                    .space
                    .wait_timeout(queue, timeout)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                queue = guard;
                if wait.timed_out() && queue.len() >= self.capacity {
                    return Err(EngineError::StreamFault(format!(
                        "render queue did not drain within {}ms",
                        timeout.as_millis()
                    )));
                }
                continue;
            }
            let (chunk, rest) = pending.split_at(free.min(pending.len()));
            queue.extend(chunk.iter().copied());
            pending = rest;
        }
        Ok(())
    }
}

struct CpalOutput {
    queue: Arc<OutputQueue>,
    sample_rate: u32,
    channels: u16,
    timeout: Duration,
    _guard: StreamGuard,
}

impl OutputDevice for CpalOutput {
    fn write_frame(&mut self, samples: &[i16]) -> EngineResult<()> {
        self.queue.push_blocking(samples, self.timeout)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_blocking_streams_frames_longer_than_the_queue() {
        let queue = Arc::new(OutputQueue::new(4));
        let samples: Vec<i16> = (1..=10).collect();

        let reader = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut played = Vec::new();
                while played.len() < 10 {
                    let mut out = [0i16; 3];
                    queue.drain_into(&mut out, 0, |s| s);
                    played.extend(out.iter().copied().filter(|&s| s != 0));
                    thread::sleep(Duration::from_millis(1));
                }
                played
            })
        };

        queue
            .push_blocking(&samples, Duration::from_secs(5))
            .expect("frame written");
        assert_eq!(reader.join().expect("reader thread"), samples);
    }

    #[test]
    fn push_blocking_times_out_when_nothing_drains() {
        let queue = OutputQueue::new(4);
        let err = queue
            .push_blocking(&[1, 2, 3, 4, 5, 6], Duration::from_millis(20))
            .expect_err("queue never drains");
        assert!(matches!(err, EngineError::StreamFault(_)));
        assert_eq!(lock_or_recover(&queue.samples, "test").len(), 4);
    }
}
