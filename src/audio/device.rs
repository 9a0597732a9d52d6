use super::AudioFrame;
use crate::error::EngineResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceDirection {
    Capture,
    Render,
}

/// Endpoint description handed in by platform enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    /// Position in the host's enumeration; `None` selects the host default.
    pub index: Option<usize>,
    pub channels: u16,
    pub sample_rate: u32,
    pub direction: DeviceDirection,
}

impl DeviceInfo {
    pub fn is_usable(&self) -> bool {
        self.channels > 0 && self.sample_rate > 0
    }
}

/// Blocking frame source.
///
/// `read_frame` returns `Ok(None)` once the source is exhausted; live devices
/// never do.
pub trait InputDevice: Send {
    fn read_frame(&mut self) -> EngineResult<Option<AudioFrame>>;
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> u16;
}

/// Blocking frame sink. `write_frame` takes interleaved samples at the
/// device's own rate and channel count.
pub trait OutputDevice: Send {
    fn write_frame(&mut self, samples: &[i16]) -> EngineResult<()>;
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> u16;
}

/// Opens endpoints for a session. Implemented by the cpal backend and by
/// scripted devices in tests.
pub trait AudioBackend {
    fn open_input(
        &self,
        info: &DeviceInfo,
        frame_size: usize,
    ) -> EngineResult<Box<dyn InputDevice>>;

    fn open_output(
        &self,
        info: &DeviceInfo,
        frame_size: usize,
    ) -> EngineResult<Box<dyn OutputDevice>>;
}
