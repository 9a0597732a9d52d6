//! The two-thread audio proxy.
//!
//! A capture thread reads fixed-size frames, forwards them to the output
//! device (resampled when the endpoints disagree on rate) and offers each one
//! to a bounded analysis queue without ever blocking on it. An analysis
//! thread turns queued frames into spectra, keeps the noise model, spectrogram,
//! templates and black box, and reports through an [`EngineObserver`].
//!
//! State moves `Stopped -> Starting -> Running -> Stopping -> Stopped`.

mod analysis;
mod capture;
mod control;
mod events;

pub use control::TemplateShape;
pub use events::{
    ChannelObserver, DetectionReport, EngineEvent, EngineFault, EngineObserver, NullObserver,
    SpectrumFrame,
};

use crate::audio::{AnalysisDispatcher, AudioBackend, DeviceInfo, Resampler};
use crate::blackbox::{BlackBoxRecorder, SnapshotMetadata, SnapshotReceipt};
use crate::config::PipelineConfig;
use crate::dsp::{NoiseModel, SignalTemplate, TemplateData, TemplateSet};
use crate::error::{EngineError, EngineResult};
use analysis::{AnalysisChannels, AnalysisOutcome, AnalysisWorker};
use capture::CaptureWorker;
use control::ControlCommand;
use crossbeam_channel::{bounded, unbounded, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

/// How long a control request waits for the analysis thread to answer.
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl PipelineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PipelineState::Starting,
            2 => PipelineState::Running,
            3 => PipelineState::Stopping,
            _ => PipelineState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            PipelineState::Stopped => 0,
            PipelineState::Starting => 1,
            PipelineState::Running => 2,
            PipelineState::Stopping => 3,
        }
    }
}

/// Lifecycle state shared between the pipeline and its capture thread.
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedState(Arc<AtomicU8>);

impl SharedState {
    pub(crate) fn get(&self) -> PipelineState {
        PipelineState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, next: PipelineState) {
        let prev = PipelineState::from_u8(self.0.swap(next.as_u8(), Ordering::AcqRel));
        if prev != next {
            debug!(from = ?prev, to = ?next, "pipeline state");
        }
    }
}

/// Point-in-time copy of the session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub frames_captured: u64,
    pub frames_forwarded: u64,
    /// Frames forwarded but never analyzed because the queue was full.
    pub frames_dropped: u64,
    pub frames_analyzed: u64,
    pub stream_faults: u64,
    pub observer_drops: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    captured: AtomicU64,
    forwarded: AtomicU64,
    dropped: Arc<AtomicU64>,
    analyzed: AtomicU64,
    stream_faults: AtomicU64,
}

impl Counters {
    fn snapshot(&self, observer: &dyn EngineObserver) -> PipelineStats {
        PipelineStats {
            frames_captured: self.captured.load(Ordering::Relaxed),
            frames_forwarded: self.forwarded.load(Ordering::Relaxed),
            frames_dropped: self.dropped.load(Ordering::Relaxed),
            frames_analyzed: self.analyzed.load(Ordering::Relaxed),
            stream_faults: self.stream_faults.load(Ordering::Relaxed),
            observer_drops: observer.dropped_events(),
        }
    }
}

/// Pieces every worker of a session holds a reference to.
#[derive(Clone)]
pub(crate) struct SessionShared {
    stop: Arc<AtomicBool>,
    counters: Arc<Counters>,
    observer: Arc<dyn EngineObserver>,
}

/// Cloneable control surface of a running session. Every request is served
/// by the analysis thread between frames; once the session ends requests
/// fail with [`EngineError::NotRunning`]. A live session that does not answer
/// within two seconds yields [`EngineError::ReplyTimeout`].
#[derive(Clone)]
pub struct PipelineHandle {
    control: Sender<ControlCommand>,
    shared: SessionShared,
    config: PipelineConfig,
    input: DeviceInfo,
    output: DeviceInfo,
    sample_rate: u32,
    channels: u16,
}

impl PipelineHandle {
    /// Calibrate the noise model from the next `frames` spectra.
    pub fn calibrate(&self, frames: usize) -> EngineResult<()> {
        self.send(ControlCommand::Calibrate { frames })
    }

    pub fn reset_noise(&self) -> EngineResult<()> {
        self.send(ControlCommand::ResetNoise)
    }

    pub fn set_templates(&self, templates: TemplateSet) -> EngineResult<()> {
        self.send(ControlCommand::SetTemplates(templates))
    }

    pub fn upsert_template(&self, template: SignalTemplate) -> EngineResult<()> {
        self.send(ControlCommand::UpsertTemplate(template))
    }

    pub fn remove_template(&self, name: &str) -> EngineResult<()> {
        self.send(ControlCommand::RemoveTemplate(name.to_string()))
    }

    /// Cut template data from the live state, ready for a [`TemplateStore`].
    ///
    /// [`TemplateStore`]: crate::store::TemplateStore
    pub fn capture_template(&self, shape: TemplateShape) -> EngineResult<TemplateData> {
        self.request(|reply| ControlCommand::CaptureTemplate { shape, reply })?
    }

    pub fn noise_model(&self) -> EngineResult<NoiseModel> {
        self.request(|reply| ControlCommand::NoiseModel { reply })
    }

    /// Owned copy of the black box as it stands now.
    pub fn black_box(&self) -> EngineResult<BlackBoxRecorder> {
        self.request(|reply| ControlCommand::SnapshotBlackBox { reply })
    }

    /// Write the buffered audio on the calling thread.
    pub fn flush_black_box(&self, destination: &Path) -> EngineResult<PathBuf> {
        self.black_box()?.flush(destination)
    }

    pub fn export_snapshot(
        &self,
        directory: &Path,
        context: &serde_json::Value,
    ) -> EngineResult<SnapshotReceipt> {
        let black_box = self.black_box()?;
        black_box.export_snapshot(directory, &self.snapshot_metadata(), context)
    }

    /// Live counters of the session this handle controls.
    pub fn stats(&self) -> PipelineStats {
        self.shared.counters.snapshot(&*self.shared.observer)
    }

    pub fn input_device(&self) -> &DeviceInfo {
        &self.input
    }

    pub fn output_device(&self) -> &DeviceInfo {
        &self.output
    }

    fn snapshot_metadata(&self) -> SnapshotMetadata {
        SnapshotMetadata::from_config(&self.config, self.sample_rate, self.channels).with_devices(
            Some(self.input.name.clone()),
            Some(self.output.name.clone()),
        )
    }

    fn send(&self, command: ControlCommand) -> EngineResult<()> {
        self.control
            .send(command)
            .map_err(|_| EngineError::NotRunning)
    }

    fn request<T>(&self, build: impl FnOnce(Sender<T>) -> ControlCommand) -> EngineResult<T> {
        self.request_within(REPLY_TIMEOUT, build)
    }

    fn request_within<T>(
        &self,
        timeout: Duration,
        build: impl FnOnce(Sender<T>) -> ControlCommand,
    ) -> EngineResult<T> {
        let (reply_tx, reply_rx) = bounded(1);
        self.send(build(reply_tx))?;
        reply_rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => EngineError::ReplyTimeout(timeout),
            RecvTimeoutError::Disconnected => EngineError::NotRunning,
        })
    }
}

struct Session {
    shared: SessionShared,
    handle: PipelineHandle,
    capture: Option<JoinHandle<()>>,
    analysis: Option<JoinHandle<AnalysisOutcome>>,
}

impl Session {
    fn capture_finished(&self) -> bool {
        self.capture
            .as_ref()
            .map_or(true, |capture| capture.is_finished())
    }
}

/// Owner of one capture/analysis session at a time.
pub struct AudioProxyPipeline {
    config: PipelineConfig,
    state: SharedState,
    session: Option<Session>,
    templates: TemplateSet,
    observer: Option<Arc<dyn EngineObserver>>,
    last_black_box: Option<BlackBoxRecorder>,
    last_metadata: Option<SnapshotMetadata>,
    last_stats: PipelineStats,
}

impl Default for AudioProxyPipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

impl AudioProxyPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            state: SharedState::default(),
            session: None,
            templates: TemplateSet::new(),
            observer: None,
            last_black_box: None,
            last_metadata: None,
            last_stats: PipelineStats::default(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Replace the settings used by the next session.
    pub fn set_config(&mut self, config: PipelineConfig) -> EngineResult<()> {
        if self.session.is_some() {
            return Err(EngineError::AlreadyRunning);
        }
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn state(&self) -> PipelineState {
        self.state.get()
    }

    /// True while a session exists whose capture thread is still going.
    pub fn is_running(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| !session.capture_finished())
    }

    /// Control surface of the current session.
    pub fn handle(&self) -> Option<PipelineHandle> {
        self.session.as_ref().map(|session| session.handle.clone())
    }

    /// Live counters of the current session, or the final ones of the last.
    pub fn stats(&self) -> PipelineStats {
        match &self.session {
            Some(session) => session.shared.counters.snapshot(&*session.shared.observer),
            None => self.last_stats,
        }
    }

    /// Open both endpoints and spawn the capture and analysis threads.
    ///
    /// Device failures leave the pipeline `Stopped` and come back as
    /// [`EngineError::DeviceUnavailable`]. A session whose capture thread
    /// ends on its own (end of stream or too many stream faults) is joined
    /// by the next [`stop`](Self::stop), [`wait`](Self::wait),
    /// [`flush_black_box`](Self::flush_black_box) or
    /// [`export_snapshot`](Self::export_snapshot).
    pub fn start(
        &mut self,
        backend: &dyn AudioBackend,
        input: &DeviceInfo,
        output: &DeviceInfo,
        templates: TemplateSet,
        observer: Arc<dyn EngineObserver>,
    ) -> EngineResult<PipelineHandle> {
        self.reap_finished();
        if self.session.is_some() {
            return Err(EngineError::AlreadyRunning);
        }
        self.config.validate()?;
        self.state.set(PipelineState::Starting);
        info!(
            input = %input.name,
            output = %output.name,
            frame_size = self.config.frame_size,
            "starting pipeline"
        );

        match self.spawn_session(backend, input, output, templates, Arc::clone(&observer)) {
            Ok(session) => {
                let handle = session.handle.clone();
                self.session = Some(session);
                self.observer = Some(observer);
                Ok(handle)
            }
            Err(err) => {
                error!("pipeline failed to start: {err}");
                self.state.set(PipelineState::Stopped);
                Err(err)
            }
        }
    }

    fn spawn_session(
        &mut self,
        backend: &dyn AudioBackend,
        input_info: &DeviceInfo,
        output_info: &DeviceInfo,
        templates: TemplateSet,
        observer: Arc<dyn EngineObserver>,
    ) -> EngineResult<Session> {
        let frame_size = self.config.frame_size;
        let input = backend
            .open_input(input_info, frame_size)
            .map_err(as_device_unavailable)?;
        let output = backend
            .open_output(output_info, frame_size)
            .map_err(as_device_unavailable)?;
        let sample_rate = input.sample_rate();
        let channels = input.channels();
        let resampler = Resampler::new(sample_rate, output.sample_rate(), output.channels())
            .map_err(as_device_unavailable)?;

        let shared = SessionShared {
            stop: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
            observer,
        };
        let (frame_tx, frame_rx) = bounded(self.config.analysis_queue_capacity);
        let (control_tx, control_rx) = unbounded();

        let worker = AnalysisWorker::new(
            self.config.clone(),
            sample_rate,
            channels,
            AnalysisChannels {
                frames: frame_rx,
                control: control_rx,
            },
            shared.clone(),
            templates,
        )?;
        let analysis = thread::spawn(move || worker.run());

        let capture_worker = CaptureWorker {
            input,
            output,
            resampler,
            dispatcher: AnalysisDispatcher::new(frame_tx, Arc::clone(&shared.counters.dropped)),
            stop: Arc::clone(&shared.stop),
            state: self.state.clone(),
            counters: Arc::clone(&shared.counters),
            observer: Arc::clone(&shared.observer),
            max_stream_faults: self.config.max_stream_faults,
        };
        // Running before capture exists, so an instant end of stream can
        // still move the state on to Stopping.
        self.state.set(PipelineState::Running);
        let capture = thread::spawn(move || capture_worker.run());

        let handle = PipelineHandle {
            control: control_tx,
            shared: shared.clone(),
            config: self.config.clone(),
            input: input_info.clone(),
            output: output_info.clone(),
            sample_rate,
            channels,
        };
        self.last_metadata = Some(handle.snapshot_metadata());
        Ok(Session {
            shared,
            handle,
            capture: Some(capture),
            analysis: Some(analysis),
        })
    }

    /// Raise the stop flag and join both threads.
    pub fn stop(&mut self) -> EngineResult<PipelineStats> {
        self.finish(true)
    }

    /// Join both threads without raising the stop flag; returns once the
    /// input reaches end of stream or capture fails for good. Live devices
    /// never end on their own.
    pub fn wait(&mut self) -> EngineResult<PipelineStats> {
        self.finish(false)
    }

    /// Stop the current session and start a new one with `config`, keeping
    /// the templates and observer of the previous session.
    pub fn restart(
        &mut self,
        backend: &dyn AudioBackend,
        input: &DeviceInfo,
        output: &DeviceInfo,
        config: PipelineConfig,
    ) -> EngineResult<PipelineHandle> {
        if self.session.is_some() {
            self.stop()?;
        }
        self.set_config(config)?;
        let observer = self
            .observer
            .clone()
            .unwrap_or_else(|| Arc::new(NullObserver));
        let templates = self.templates.clone();
        self.start(backend, input, output, templates, observer)
    }

    /// Join a session whose capture thread has already exited.
    fn reap_finished(&mut self) {
        if self
            .session
            .as_ref()
            .is_some_and(|session| session.capture_finished())
        {
            debug!("joining a session that ended on its own");
            let _ = self.finish(false);
        }
    }

    fn finish(&mut self, raise_stop: bool) -> EngineResult<PipelineStats> {
        let Some(mut session) = self.session.take() else {
            return Err(EngineError::NotRunning);
        };
        self.state.set(PipelineState::Stopping);
        if raise_stop {
            session.shared.stop.store(true, Ordering::Relaxed);
        }

        // Capture goes first: its exit closes the frame queue and the devices.
        if let Some(capture) = session.capture.take() {
            if capture.join().is_err() {
                error!("capture thread panicked");
            }
        }
        if let Some(analysis) = session.analysis.take() {
            match analysis.join() {
                Ok(outcome) => {
                    self.last_black_box = Some(outcome.black_box);
                    self.templates = outcome.templates;
                }
                Err(_) => error!("analysis thread panicked"),
            }
        }

        let stats = session.shared.counters.snapshot(&*session.shared.observer);
        self.last_stats = stats;
        self.state.set(PipelineState::Stopped);
        info!(
            captured = stats.frames_captured,
            analyzed = stats.frames_analyzed,
            dropped = stats.frames_dropped,
            faults = stats.stream_faults,
            "pipeline stopped"
        );
        session
            .shared
            .observer
            .notify(EngineEvent::Stopped { stats });
        Ok(stats)
    }

    /// Templates of the running session as of its start, or as the last
    /// session left them.
    pub fn templates(&self) -> &TemplateSet {
        &self.templates
    }

    /// Flush the live black box, or the one left by the last session.
    pub fn flush_black_box(&mut self, destination: &Path) -> EngineResult<PathBuf> {
        self.reap_finished();
        match &self.session {
            Some(session) => session.handle.flush_black_box(destination),
            None => self
                .last_black_box
                .as_ref()
                .ok_or(EngineError::EmptyBuffer)?
                .flush(destination),
        }
    }

    pub fn export_snapshot(
        &mut self,
        directory: &Path,
        context: &serde_json::Value,
    ) -> EngineResult<SnapshotReceipt> {
        self.reap_finished();
        match &self.session {
            Some(session) => session.handle.export_snapshot(directory, context),
            None => {
                let (Some(black_box), Some(metadata)) = (&self.last_black_box, &self.last_metadata)
                else {
                    return Err(EngineError::EmptyBuffer);
                };
                let mut metadata = metadata.clone();
                metadata.timestamp_utc = chrono::Utc::now();
                black_box.export_snapshot(directory, &metadata, context)
            }
        }
    }
}

impl Drop for AudioProxyPipeline {
    fn drop(&mut self) {
        if self.session.is_some() {
            let _ = self.stop();
        }
    }
}

fn as_device_unavailable(err: EngineError) -> EngineError {
    match err {
        EngineError::DeviceUnavailable(_) => err,
        other => EngineError::DeviceUnavailable(other.to_string()),
    }
}
