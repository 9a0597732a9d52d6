use super::AudioFrame;
use clap::ValueEnum;
use crossbeam_channel::{Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Which part of a multi-channel frame feeds the analyzer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    /// Average all channels.
    #[default]
    Mix,
    Left,
    Right,
}

/// Append the analysis view of interleaved `i16` samples to `buf` as `f32`
/// in `[-1, 1)`. Mono input passes through whatever the mode; `Right` on a
/// mono source falls back to the only channel.
pub fn select_channel(buf: &mut Vec<f32>, data: &[i16], channels: usize, mode: ChannelMode) {
    let convert = |sample: i16| f32::from(sample) / 32_768.0;
    if channels <= 1 {
        buf.extend(data.iter().copied().map(convert));
        return;
    }

    match mode {
        ChannelMode::Left | ChannelMode::Right => {
            let offset = if mode == ChannelMode::Left { 0 } else { 1 };
            buf.extend(
                data.chunks_exact(channels)
                    .map(|frame| convert(frame[offset])),
            );
        }
        ChannelMode::Mix => {
            // Average each interleaved frame to produce a mono representation.
            let mut acc = 0.0f32;
            let mut count = 0usize;
            for sample in data.iter().copied() {
                acc += convert(sample);
                count += 1;
                if count == channels {
                    buf.push(acc / channels as f32);
                    acc = 0.0;
                    count = 0;
                }
            }
            if count > 0 {
                buf.push(acc / count as f32);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchOutcome {
    Queued,
    Dropped,
    Disconnected,
}

/// Producer half of the capture → analysis hand-off. Never blocks: a full
/// queue costs the analysis side one frame and bumps the drop counter.
pub(crate) struct AnalysisDispatcher {
    sender: Sender<AudioFrame>,
    dropped: Arc<AtomicU64>,
}

impl AnalysisDispatcher {
    pub(crate) fn new(sender: Sender<AudioFrame>, dropped: Arc<AtomicU64>) -> Self {
        Self { sender, dropped }
    }

    pub(crate) fn offer(&self, frame: AudioFrame) -> DispatchOutcome {
        match self.sender.try_send(frame) {
            Ok(()) => DispatchOutcome::Queued,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                DispatchOutcome::Dropped
            }
            Err(TrySendError::Disconnected(_)) => DispatchOutcome::Disconnected,
        }
    }
}

/// Re-blocks callback-sized chunks from a device into fixed frames.
#[cfg_attr(not(feature = "device-io"), allow(dead_code))]
pub(crate) struct FrameAssembler {
    frame_samples: usize,
    channels: u16,
    pending: Vec<i16>,
    sender: Sender<AudioFrame>,
    dropped: Arc<AtomicU64>,
}

#[cfg_attr(not(feature = "device-io"), allow(dead_code))]
impl FrameAssembler {
    pub(crate) fn new(
        frame_size: usize,
        channels: u16,
        sender: Sender<AudioFrame>,
        dropped: Arc<AtomicU64>,
    ) -> Self {
        let frame_samples = frame_size.max(1) * usize::from(channels.max(1));
        Self {
            frame_samples,
            channels: channels.max(1),
            pending: Vec::with_capacity(frame_samples * 2),
            sender,
            dropped,
        }
    }

    pub(crate) fn push<T, F>(&mut self, data: &[T], convert: F)
    where
        T: Copy,
        F: FnMut(T) -> i16,
    {
        self.pending.extend(data.iter().copied().map(convert));

        while self.pending.len() >= self.frame_samples {
            let samples: Vec<i16> = self.pending.drain(..self.frame_samples).collect();
            if let Err(err) = self.sender.try_send(AudioFrame::new(samples, self.channels)) {
                match err {
                    TrySendError::Full(_) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    TrySendError::Disconnected(_) => break,
                }
            }
        }
    }
}
