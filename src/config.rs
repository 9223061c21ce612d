use serde_derive::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::association::AssociationMetric;
use crate::error::Error;
use crate::kalman::KalmanParams;
use crate::predictor::PredictorKind;
use crate::proximity::ProximityRule;

/// What motion state is keyed by.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyBy {
    /// One state per class; objects of the same class share it.
    Class,
    /// One state per associated track.
    #[default]
    Track,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TrackingConfig {
    pub key_by: KeyBy,
    /// Frames a track may go unseen before its state is dropped.
    pub max_age: u32,
    pub association: AssociationMetric,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            key_by: KeyBy::default(),
            max_age: 30,
            association: AssociationMetric::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub predictions: PathBuf,
    pub alerts: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            predictions: PathBuf::from("tracking_and_predictions.csv"),
            alerts: PathBuf::from("alert_times.csv"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Pixels.
    pub proximity_threshold: f32,
    pub iou_threshold: f32,
    /// Region size is the frame size divided by this.
    pub region_scale_factor: f32,
    pub overlay_image: Option<PathBuf>,
    pub model_path: PathBuf,
    /// Video file, camera index or recorded detections file.
    pub source: String,
    /// Display label of the region.
    pub label: String,
    pub predictor: PredictorKind,
    pub proximity: ProximityRule,
    pub kalman: KalmanParams,
    pub tracking: TrackingConfig,
    pub output: OutputConfig,
    pub class_names: Vec<String>,
    pub confidence_threshold: f32,
    /// Overrides the frame rate reported by the source.
    pub fps: Option<f64>,
    /// Width and height of replayed frames.
    pub frame_size: [u32; 2],
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proximity_threshold: 40.0,
            iou_threshold: 0.5,
            region_scale_factor: 2.0,
            overlay_image: None,
            model_path: PathBuf::from("yolov8n.onnx"),
            source: "0".to_string(),
            label: "robotic arm".to_string(),
            predictor: PredictorKind::default(),
            proximity: ProximityRule::default(),
            kalman: KalmanParams::default(),
            tracking: TrackingConfig::default(),
            output: OutputConfig::default(),
            class_names: Vec::new(),
            confidence_threshold: 0.25,
            fps: None,
            frame_size: [640, 480],
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, Error> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !(self.iou_threshold > 0.0 && self.iou_threshold <= 1.0) {
            return Err(Error::Config(format!(
                "iou_threshold must be in (0, 1], got {}",
                self.iou_threshold
            )));
        }

        if !(self.proximity_threshold > 0.0) {
            return Err(Error::Config(format!(
                "proximity_threshold must be positive, got {}",
                self.proximity_threshold
            )));
        }

        if !(self.region_scale_factor >= 1.0) || !self.region_scale_factor.is_finite() {
            return Err(Error::Config(format!(
                "region_scale_factor must be at least 1, got {}",
                self.region_scale_factor
            )));
        }

        if self.tracking.max_age == 0 {
            return Err(Error::Config("tracking.max_age must be at least 1".into()));
        }

        if let ProximityRule::NearMargin { margin } = self.proximity {
            if !(margin >= 0.0) {
                return Err(Error::Config(format!("near margin must be >= 0, got {}", margin)));
            }
        }

        Ok(())
    }
}
