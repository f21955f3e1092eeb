pub mod analyzer;
pub mod backend;
pub mod config;
pub mod error;
pub mod inference;
pub mod models;
pub mod objects;
pub mod onnx;
pub mod preprocess;
pub mod preview;
pub mod ranking;
pub mod report;
pub mod scan;
pub mod taxonomy;

pub use analyzer::SurgicalSceneAnalyzer;
pub use backend::BackendKind;
pub use config::{AnalyzerConfig, Settings};
pub use error::{Error, Result};
pub use models::{AnalyzedFrame, DetectedObject, FrameRecord, FrameSummary};
