use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("frame source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("detector model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("detector failed: {0}")]
    Detector(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("frame {width}x{height} is too small for region scale factor {factor}")]
    InvalidRegion { width: u32, height: u32, factor: f32 },

    #[error("replay line {line}: {reason}")]
    Replay { line: usize, reason: String },

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV Error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML Error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[cfg(feature = "opencv")]
    #[error("OpenCV Error: {0}")]
    OpenCv(#[from] opencv::Error),
}
