pub mod association;
pub mod bbox;
pub mod color;
pub mod config;
pub mod consolidate;
pub mod detection;
pub mod detector;
pub mod error;
pub mod frame;
pub mod kalman;
pub mod pipeline;
pub mod predictor;
pub mod proximity;
pub mod replay;
pub mod sink;

#[cfg(feature = "opencv")]
pub mod capture;

pub use config::Config;
pub use detection::{ClassId, Detection};
pub use error::Error;
pub use frame::{Detector, Frame, FrameSource};
pub use pipeline::{FrameOutcome, Pipeline, RunSummary};
pub use predictor::{MotionPredictor, PredictionResult, PredictorKind, TrackId, TrackKey};
pub use proximity::{AlertRecord, Region};
pub use sink::{CsvSink, MemorySink, RecordSink};
