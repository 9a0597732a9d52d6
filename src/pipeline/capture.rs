use super::events::{EngineEvent, EngineFault, EngineObserver};
use super::{Counters, PipelineState, SharedState};
use crate::audio::{
    adapt_channels, AnalysisDispatcher, DispatchOutcome, InputDevice, OutputDevice, Resampler,
};
use crate::error::EngineError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Warn about analysis drops once per this many frames.
const DROP_LOG_INTERVAL: u64 = 100;

/// Real-time side of a session: read, forward, hand off. Owns both devices,
/// so they close when this worker's thread ends.
pub(super) struct CaptureWorker {
    pub(super) input: Box<dyn InputDevice>,
    pub(super) output: Box<dyn OutputDevice>,
    pub(super) resampler: Resampler,
    pub(super) dispatcher: AnalysisDispatcher,
    pub(super) stop: Arc<AtomicBool>,
    pub(super) state: SharedState,
    pub(super) counters: Arc<Counters>,
    pub(super) observer: Arc<dyn EngineObserver>,
    pub(super) max_stream_faults: u32,
}

impl CaptureWorker {
    pub(super) fn run(mut self) {
        let output_channels = self.output.channels();
        let mut consecutive_faults = 0u32;
        let mut sequence = 0u64;
        let mut analysis_attached = true;

        info!(
            input_rate = self.resampler.input_rate(),
            output_rate = self.resampler.output_rate(),
            ratio = self.resampler.ratio(),
            "capture loop started"
        );

        while !self.stop.load(Ordering::Relaxed) {
            let step = self.input.read_frame().and_then(|frame| {
                let Some(frame) = frame else {
                    return Ok(None);
                };
                let adapted = adapt_channels(&frame.samples, frame.channels, output_channels);
                let resampled = self.resampler.process(&adapted);
                self.output.write_frame(&resampled)?;
                Ok(Some(frame))
            });

            let mut frame = match step {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    info!(frames = sequence, "input reached end of stream");
                    self.state.set(PipelineState::Stopping);
                    break;
                }
                Err(err) => {
                    consecutive_faults += 1;
                    self.counters.stream_faults.fetch_add(1, Ordering::Relaxed);
                    let fatal = consecutive_faults > self.max_stream_faults;
                    if fatal {
                        error!(consecutive_faults, "capture failed: {err}");
                    } else {
                        warn!(consecutive_faults, "capture fault: {err}");
                    }
                    self.observer.notify(EngineEvent::Fault(EngineFault {
                        error: as_stream_fault(err),
                        consecutive: consecutive_faults,
                        fatal,
                    }));
                    if fatal {
                        self.state.set(PipelineState::Stopping);
                        self.stop.store(true, Ordering::Relaxed);
                        break;
                    }
                    continue;
                }
            };

            if consecutive_faults > 0 {
                debug!(consecutive_faults, "capture recovered");
                consecutive_faults = 0;
            }
            frame.sequence = sequence;
            sequence += 1;
            self.counters.captured.fetch_add(1, Ordering::Relaxed);
            self.counters.forwarded.fetch_add(1, Ordering::Relaxed);

            if !analysis_attached {
                continue;
            }
            match self.dispatcher.offer(frame) {
                DispatchOutcome::Queued => {}
                DispatchOutcome::Dropped => {
                    let dropped = self.counters.dropped.load(Ordering::Relaxed);
                    if dropped % DROP_LOG_INTERVAL == 1 {
                        warn!(dropped, "analysis queue full; dropping frames for analysis");
                    }
                }
                DispatchOutcome::Disconnected => {
                    // Forwarding carries on without analysis.
                    warn!("analysis thread gone; forwarding only");
                    analysis_attached = false;
                }
            }
        }

        info!(
            captured = self.counters.captured.load(Ordering::Relaxed),
            dropped = self.counters.dropped.load(Ordering::Relaxed),
            "capture loop exited"
        );
    }
}

/// Device errors surface as stream faults whatever the backend called them.
fn as_stream_fault(err: EngineError) -> EngineError {
    match err {
        EngineError::StreamFault(_) => err,
        other => EngineError::StreamFault(other.to_string()),
    }
}
