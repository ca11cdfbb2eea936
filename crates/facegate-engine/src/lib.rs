//! facegate-engine — inference thread, real-time detection loop and
//! capture-time verification on top of `facegate-core`.

pub mod config;
pub mod engine;
pub mod realtime;
pub mod source;

pub use config::{Config, ConfigError};
pub use engine::{
    spawn_engine, spawn_engine_with, EngineError, EngineHandle, EngineStatus, ExtractionResult,
    FaceAnalysis, Pipeline, Verdict,
};
pub use realtime::{start_real_time_detection, DetectionHandle, DetectionUpdate, LoopState, RealTimeConfig};
pub use source::{FrameSource, ImageSequence, SourceError, StaticFrame};
