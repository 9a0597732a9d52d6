use super::control::{ControlCommand, TemplateShape};
use super::events::{DetectionReport, EngineEvent, EngineFault, EngineObserver, SpectrumFrame};
use super::{Counters, SessionShared};
use crate::audio::AudioFrame;
use crate::blackbox::BlackBoxRecorder;
use crate::config::PipelineConfig;
use crate::dsp::{
    bin_frequency, MagnitudeSpectrum, SignalCharacteristics, SignalIdentifier, SpectralProcessor,
    SpectrumAnalyzer, Spectrogram, TemplateData, TemplateSet,
};
use crate::error::{EngineError, EngineResult};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Spectra still to collect before calibrating.
struct PendingCalibration {
    target: usize,
    spectra: Vec<MagnitudeSpectrum>,
}

/// Analysis side of a session. Owns the noise model, templates, spectrogram
/// and black box; everything external reaches them through control commands.
pub(super) struct AnalysisWorker {
    config: PipelineConfig,
    sample_rate: u32,
    frames: Receiver<AudioFrame>,
    control: Receiver<ControlCommand>,
    stop: Arc<AtomicBool>,
    counters: Arc<Counters>,
    observer: Arc<dyn EngineObserver>,
    analyzer: SpectrumAnalyzer,
    processor: SpectralProcessor,
    identifier: SignalIdentifier,
    spectrogram: Spectrogram,
    templates: TemplateSet,
    black_box: BlackBoxRecorder,
    calibration: Option<PendingCalibration>,
    latest: Option<MagnitudeSpectrum>,
    analyzed: u64,
}

/// What a finished analysis thread hands back to the pipeline.
pub(super) struct AnalysisOutcome {
    pub(super) black_box: BlackBoxRecorder,
    pub(super) templates: TemplateSet,
}

pub(super) struct AnalysisChannels {
    pub(super) frames: Receiver<AudioFrame>,
    pub(super) control: Receiver<ControlCommand>,
}

impl AnalysisWorker {
    pub(super) fn new(
        config: PipelineConfig,
        sample_rate: u32,
        channels: u16,
        queues: AnalysisChannels,
        shared: SessionShared,
        templates: TemplateSet,
    ) -> EngineResult<Self> {
        let analyzer = SpectrumAnalyzer::new(config.fft_size, config.channel_mode)?;
        let spectrogram = Spectrogram::new(config.spectrogram_history, analyzer.bin_count());
        let black_box = BlackBoxRecorder::new(
            config.black_box_seconds,
            sample_rate,
            channels,
            config.frame_size,
        );
        Ok(Self {
            processor: SpectralProcessor::new(config.spectral_floor, config.oversubtraction),
            identifier: SignalIdentifier::new(config.identification_threshold),
            sample_rate,
            frames: queues.frames,
            control: queues.control,
            stop: shared.stop,
            counters: shared.counters,
            observer: shared.observer,
            analyzer,
            spectrogram,
            templates,
            black_box,
            calibration: None,
            latest: None,
            analyzed: 0,
            config,
        })
    }

    pub(super) fn run(mut self) -> AnalysisOutcome {
        info!(
            fft_size = self.config.fft_size,
            templates = self.templates.len(),
            "analysis loop started"
        );
        loop {
            self.drain_control();
            if self.stop.load(Ordering::Relaxed) {
                break;
            }
            match self.frames.recv_timeout(self.config.analysis_poll) {
                Ok(frame) => self.analyze(frame),
                Err(RecvTimeoutError::Timeout) => continue,
                // Capture has finished and the queue is drained.
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!(analyzed = self.analyzed, "analysis loop exited");
        AnalysisOutcome {
            black_box: self.black_box,
            templates: self.templates,
        }
    }

    fn drain_control(&mut self) {
        loop {
            match self.control.try_recv() {
                Ok(command) => self.handle_command(command),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return,
            }
        }
    }

    fn handle_command(&mut self, command: ControlCommand) {
        debug!(command = command.label(), "control command");
        match command {
            ControlCommand::Calibrate { frames } => {
                self.calibration = Some(PendingCalibration {
                    target: frames.max(1),
                    spectra: Vec::with_capacity(frames.max(1)),
                });
            }
            ControlCommand::ResetNoise => {
                self.calibration = None;
                self.processor.reset();
                info!("noise model reset");
            }
            ControlCommand::SetTemplates(templates) => {
                info!(count = templates.len(), "templates replaced");
                self.templates = templates;
            }
            ControlCommand::UpsertTemplate(template) => {
                info!(template = template.name(), "template stored");
                self.templates.insert(template);
            }
            ControlCommand::RemoveTemplate(name) => {
                if self.templates.remove(&name) {
                    info!(template = %name, "template removed");
                }
            }
            ControlCommand::CaptureTemplate { shape, reply } => {
                let _ = reply.send(self.capture_template(shape));
            }
            ControlCommand::SnapshotBlackBox { reply } => {
                let _ = reply.send(self.black_box.clone());
            }
            ControlCommand::NoiseModel { reply } => {
                let _ = reply.send(self.processor.noise_model().clone());
            }
        }
    }

    fn capture_template(&self, shape: TemplateShape) -> EngineResult<TemplateData> {
        match shape {
            TemplateShape::Spectrum => {
                let latest = self.latest.as_ref().ok_or(EngineError::EmptyBuffer)?;
                if !self.processor.is_calibrated() {
                    return Err(EngineError::InvalidTemplate(
                        "noise model is not calibrated".to_string(),
                    ));
                }
                Ok(TemplateData::Spectrum {
                    bins: self.processor.residual(latest).into_inner(),
                })
            }
            TemplateShape::Tile { rows, cols } => self.spectrogram.capture_tile(rows, cols),
        }
    }

    fn analyze(&mut self, frame: AudioFrame) {
        let sequence = frame.sequence;
        let (magnitude, complex) = self.analyzer.push_frame(&frame);
        self.black_box.append(frame);
        self.analyzed += 1;
        self.counters.analyzed.fetch_add(1, Ordering::Relaxed);

        self.collect_calibration(&magnitude);

        let gated = self.processor.gate(&magnitude);
        self.spectrogram.push(&gated);

        if self.analyzed % u64::from(self.config.identify_every) == 0 {
            let report = self.detect(sequence, &magnitude);
            if report.detected {
                debug!(
                    sequence,
                    peak_bin = ?report.peak_bin,
                    max_z = ?report.max_z,
                    matched = ?report.match_name,
                    "signal detected"
                );
            }
            self.observer.notify(EngineEvent::Detection(report));
        }

        self.observer.notify(EngineEvent::Spectrum(SpectrumFrame {
            sequence,
            magnitude: magnitude.clone(),
            complex,
            gated,
        }));
        self.latest = Some(magnitude);
    }

    fn collect_calibration(&mut self, magnitude: &MagnitudeSpectrum) {
        let Some(pending) = self.calibration.as_mut() else {
            return;
        };
        pending.spectra.push(magnitude.clone());
        if pending.spectra.len() < pending.target {
            return;
        }
        let Some(pending) = self.calibration.take() else {
            return;
        };
        match self.processor.calibrate(&pending.spectra) {
            Ok(()) => {
                info!(frames = pending.spectra.len(), "noise model calibrated");
                self.observer.notify(EngineEvent::Calibrated {
                    frames: pending.spectra.len(),
                });
            }
            Err(err) => {
                warn!("calibration failed: {err}");
                self.observer.notify(EngineEvent::Fault(EngineFault {
                    error: err,
                    consecutive: 0,
                    fatal: false,
                }));
            }
        }
    }

    fn detect(&self, sequence: u64, magnitude: &MagnitudeSpectrum) -> DetectionReport {
        let mut report = DetectionReport {
            sequence,
            ..DetectionReport::default()
        };
        let Some(score) = self.processor.anomaly_score(magnitude) else {
            trace!(sequence, "detection skipped; noise model not calibrated");
            return report;
        };
        let fft_size = self.analyzer.fft_size();
        report.max_z = Some(score.max_z);
        report.peak_bin = Some(score.peak_bin);
        report.peak_frequency_hz = Some(bin_frequency(score.peak_bin, self.sample_rate, fft_size));
        report.detected = score.exceeds(self.config.anomaly_threshold);
        if !report.detected {
            return report;
        }

        let residual = self.processor.residual(magnitude);
        let outcome = self
            .identifier
            .identify(&residual, &self.spectrogram, &self.templates);
        report.match_name = outcome.match_name().map(str::to_string);
        report.match_score = outcome.best_name.as_ref().map(|_| outcome.best_score);
        report.skipped_templates = outcome.skipped;
        report.characteristics = Some(SignalCharacteristics::measure(
            &residual,
            &self.processor.noise_model().mean,
            self.sample_rate,
            fft_size,
        ));
        report
    }
}
