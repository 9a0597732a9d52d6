use super::PipelineStats;
use crate::dsp::{ComplexSpectrum, MagnitudeSpectrum, SignalCharacteristics};
use crate::error::EngineError;
use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;

/// How long a full channel may hold up an event that ends the session.
const TERMINAL_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// One analysis cycle's spectra.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumFrame {
    /// Capture sequence of the frame that completed this window.
    pub sequence: u64,
    pub magnitude: MagnitudeSpectrum,
    pub complex: ComplexSpectrum,
    /// `magnitude` after noise gating; equal to it before calibration.
    pub gated: MagnitudeSpectrum,
}

/// Anomaly verdict plus identification, emitted every `identify_every`
/// analyzed frames.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionReport {
    pub sequence: u64,
    pub detected: bool,
    /// `None` until the noise model is calibrated.
    pub max_z: Option<f32>,
    pub peak_bin: Option<usize>,
    pub peak_frequency_hz: Option<f32>,
    /// Set only for a positive identification.
    pub match_name: Option<String>,
    /// Best template score, matched or not.
    pub match_score: Option<f32>,
    pub skipped_templates: Vec<String>,
    pub characteristics: Option<SignalCharacteristics>,
}

/// A failure reported from inside a running session.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineFault {
    pub error: EngineError,
    /// Consecutive capture-side faults including this one; zero for
    /// analysis-side errors.
    pub consecutive: u32,
    /// The session is shutting down because of it.
    pub fatal: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Spectrum(SpectrumFrame),
    Detection(DetectionReport),
    Calibrated { frames: usize },
    Fault(EngineFault),
    Stopped { stats: PipelineStats },
}

impl EngineEvent {
    pub fn label(&self) -> &'static str {
        match self {
            EngineEvent::Spectrum(_) => "spectrum",
            EngineEvent::Detection(_) => "detection",
            EngineEvent::Calibrated { .. } => "calibrated",
            EngineEvent::Fault(_) => "fault",
            EngineEvent::Stopped { .. } => "stopped",
        }
    }

    /// Fatal faults and `Stopped` end the session and are worth waiting for.
    pub fn is_terminal(&self) -> bool {
        match self {
            EngineEvent::Fault(fault) => fault.fatal,
            EngineEvent::Stopped { .. } => true,
            _ => false,
        }
    }
}

/// Receives engine events on the pipeline threads. Implementations must
/// return promptly.
pub trait EngineObserver: Send + Sync {
    fn notify(&self, event: EngineEvent);

    /// Events this observer had to discard.
    fn dropped_events(&self) -> u64 {
        0
    }
}

impl<F> EngineObserver for F
where
    F: Fn(EngineEvent) + Send + Sync,
{
    fn notify(&self, event: EngineEvent) {
        self(event)
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl EngineObserver for NullObserver {
    fn notify(&self, _event: EngineEvent) {}
}

/// Forwards events into a bounded channel; a full channel drops the event,
/// unless it is terminal, in which case the sender waits up to a second for
/// room.
#[derive(Debug)]
pub struct ChannelObserver {
    sender: Sender<EngineEvent>,
    dropped: AtomicU64,
}

impl ChannelObserver {
    pub fn bounded(capacity: usize) -> (Self, Receiver<EngineEvent>) {
        let (sender, receiver) = bounded(capacity.max(1));
        (
            Self {
                sender,
                dropped: AtomicU64::new(0),
            },
            receiver,
        )
    }
}

impl EngineObserver for ChannelObserver {
    fn notify(&self, event: EngineEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) if event.is_terminal() => {
                let label = event.label();
                match self.sender.send_timeout(event, TERMINAL_SEND_TIMEOUT) {
                    Ok(()) | Err(SendTimeoutError::Disconnected(_)) => {}
                    Err(SendTimeoutError::Timeout(_)) => {
                        warn!(event = label, "event channel stayed full; dropping");
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            // Nobody is listening any more.
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
