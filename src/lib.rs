//! Signal Hunter: a low-latency audio proxy with a parallel spectral analysis
//! engine for anomaly detection, template identification and black-box
//! capture.

pub mod audio;
pub mod blackbox;
pub mod config;
pub mod dsp;
pub mod error;
mod lock;
pub mod pipeline;
pub mod store;
pub mod telemetry;

pub(crate) use lock::lock_or_recover;

pub use blackbox::{BlackBoxRecorder, SnapshotMetadata, SnapshotReceipt};
pub use config::{EngineConfig, LatencyMode, PipelineConfig};
pub use error::{EngineError, EngineResult};
pub use pipeline::{
    AudioProxyPipeline, ChannelObserver, DetectionReport, EngineEvent, EngineFault,
    EngineObserver, NullObserver, PipelineHandle, PipelineState, PipelineStats, SpectrumFrame,
    TemplateShape,
};
pub use store::{load_template_set, JsonTemplateStore, MemoryTemplateStore, TemplateStore};
