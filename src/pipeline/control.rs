use crate::blackbox::BlackBoxRecorder;
use crate::dsp::{NoiseModel, SignalTemplate, TemplateData, TemplateSet};
use crate::error::EngineResult;
use crossbeam_channel::Sender;

/// Which kind of template to cut from the live analysis state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateShape {
    /// Noise-subtracted copy of the latest magnitude spectrum.
    Spectrum,
    /// The most recent `rows` spectrogram rows, first `cols` bins.
    Tile { rows: usize, cols: usize },
}

/// Requests served by the analysis thread between frames.
pub(crate) enum ControlCommand {
    Calibrate {
        frames: usize,
    },
    ResetNoise,
    SetTemplates(TemplateSet),
    UpsertTemplate(SignalTemplate),
    RemoveTemplate(String),
    CaptureTemplate {
        shape: TemplateShape,
        reply: Sender<EngineResult<TemplateData>>,
    },
    SnapshotBlackBox {
        reply: Sender<BlackBoxRecorder>,
    },
    NoiseModel {
        reply: Sender<NoiseModel>,
    },
}

impl ControlCommand {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            ControlCommand::Calibrate { .. } => "calibrate",
            ControlCommand::ResetNoise => "reset_noise",
            ControlCommand::SetTemplates(_) => "set_templates",
            ControlCommand::UpsertTemplate(_) => "upsert_template",
            ControlCommand::RemoveTemplate(_) => "remove_template",
            ControlCommand::CaptureTemplate { .. } => "capture_template",
            ControlCommand::SnapshotBlackBox { .. } => "snapshot_black_box",
            ControlCommand::NoiseModel { .. } => "noise_model",
        }
    }
}
