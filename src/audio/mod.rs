//! Audio frames, device seams, and the capture-side helpers.
//!
//! Frames are interleaved 16-bit PCM. The capture thread reads one frame at a
//! time from an [`InputDevice`], forwards it (resampled if the endpoints run at
//! different rates) to an [`OutputDevice`], then hands it to analysis.

/// Low-latency capture granularity (~10 ms at 48 kHz).
pub const LOW_LATENCY_FRAME_SIZE: usize = 512;

/// High-quality capture granularity (~85 ms at 48 kHz).
pub const HIGH_QUALITY_FRAME_SIZE: usize = 4096;

#[cfg(feature = "device-io")]
mod cpal_backend;
mod device;
mod dispatch;
mod resample;
mod ring;

#[cfg(feature = "device-io")]
pub use cpal_backend::{list_devices, CpalBackend};
pub use device::{AudioBackend, DeviceDirection, DeviceInfo, InputDevice, OutputDevice};
pub use dispatch::{select_channel, ChannelMode};
pub(crate) use dispatch::{AnalysisDispatcher, DispatchOutcome};
pub use resample::{adapt_channels, resample_linear, Resampler};
pub use ring::{ring_capacity, RingBuffer};

/// One block of interleaved PCM as read from the input device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub channels: u16,
    /// Capture order, assigned by the pipeline; zero for frames built elsewhere.
    pub sequence: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, channels: u16) -> Self {
        Self {
            samples,
            channels: channels.max(1),
            sequence: 0,
        }
    }

    /// Number of sample frames (samples per channel).
    pub fn frame_len(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
