//! Per-frame flow: consolidate, key, predict, evaluate proximity, record.

use nalgebra as na;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::association::TrackAssociator;
use crate::config::{Config, KeyBy};
use crate::consolidate::consolidate;
use crate::error::Error;
use crate::frame::{Detector, Frame, FrameSource};
use crate::kalman::KalmanPredictor;
use crate::predictor::{DeadReckoning, MotionPredictor, PredictorKind, TrackKey};
use crate::proximity::{AlertRecord, ProximityEvaluator, Region};
use crate::sink::{PredictionRecord, RecordSink};
use crate::Detection;

/// Predictor selected by the configuration.
pub fn build_predictor(config: &Config, fps: f64) -> Box<dyn MotionPredictor> {
    match config.predictor {
        PredictorKind::DeadReckoning => Box::new(DeadReckoning::new()),
        PredictorKind::Kalman => Box::new(KalmanPredictor::new(config.kalman, fps)),
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct FrameOutcome {
    /// Consolidated detections, parallel to `predictions`.
    pub detections: Vec<Detection>,
    pub predictions: Vec<PredictionRecord>,
    pub alerts: Vec<AlertRecord>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub detections: u64,
    pub alerts: u64,
}

pub struct Pipeline<P, S> {
    iou_threshold: f32,
    key_by: KeyBy,
    associator: TrackAssociator,
    predictor: P,
    evaluator: ProximityEvaluator,
    sink: S,
    label: String,
    start: Option<f64>,
    summary: RunSummary,
}

impl<S: RecordSink> Pipeline<Box<dyn MotionPredictor>, S> {
    /// Pipeline for a stream of `dims` frames at `fps`, with the region derived
    /// from the frame size.
    pub fn from_config(config: &Config, dims: (u32, u32), fps: f64, sink: S) -> Result<Self, Error> {
        let region = Region::centered(dims.0, dims.1, config.region_scale_factor)?;
        info!(
            "region \"{}\": ({}, {}) - ({}, {})",
            config.label,
            region.top_left.x,
            region.top_left.y,
            region.bottom_right.x,
            region.bottom_right.y
        );

        Ok(Self::new(config, region, build_predictor(config, fps), sink))
    }
}

impl<P: MotionPredictor, S: RecordSink> Pipeline<P, S> {
    pub fn new(config: &Config, region: Region, predictor: P, sink: S) -> Self {
        Self {
            iou_threshold: config.iou_threshold,
            key_by: config.tracking.key_by,
            associator: TrackAssociator::new(
                config.tracking.association,
                config.tracking.max_age,
            ),
            predictor,
            evaluator: ProximityEvaluator::new(region, config.proximity, config.proximity_threshold),
            sink,
            label: config.label.clone(),
            start: None,
            summary: RunSummary::default(),
        }
    }

    #[inline]
    pub fn region(&self) -> &Region {
        &self.evaluator.region
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[inline]
    pub fn predictor(&self) -> &P {
        &self.predictor
    }

    #[inline]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    #[inline]
    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    /// Flushes the sink and hands it back.
    pub fn finish(mut self) -> Result<S, Error> {
        self.sink.flush()?;
        Ok(self.sink)
    }

    fn keys(&mut self, dets: &[Detection]) -> Vec<TrackKey> {
        match self.key_by {
            KeyBy::Class => dets.iter().map(|d| TrackKey::Class(d.class)).collect(),
            KeyBy::Track => {
                let association = self.associator.associate(dets);

                for id in association.retired {
                    self.predictor.forget(&TrackKey::Track(id));
                }

                association.ids.into_iter().map(TrackKey::Track).collect()
            }
        }
    }

    /// Runs one frame's detections through the pipeline.
    pub fn process(&mut self, frame: &Frame, detections: Vec<Detection>) -> Result<FrameOutcome, Error> {
        let start = *self.start.get_or_insert(frame.timestamp);
        let dets = consolidate(detections, self.iou_threshold);
        let keys = self.keys(&dets);

        let mut outcome = FrameOutcome::default();

        for (det, key) in dets.iter().zip(keys) {
            let measured = det.center_px();
            let prediction = self.predictor.predict(
                key,
                na::Point2::new(measured.0 as f64, measured.1 as f64),
                frame.timestamp,
            );

            debug!(
                "frame {} {} {}: ({}, {}) -> ({}, {})",
                frame.index,
                key,
                det.class_name,
                prediction.current_x,
                prediction.current_y,
                prediction.future_x,
                prediction.future_y
            );

            let record = PredictionRecord {
                timestamp: frame.timestamp,
                key,
                measured,
                prediction,
                class_name: det.class_name.clone(),
            };
            self.sink.prediction(&record)?;
            outcome.predictions.push(record);

            if let Some(alert) = self.evaluator.evaluate(det, &prediction, frame.timestamp, start) {
                warn!(
                    "proximity alert: {} near \"{}\" at {:.2}s, heading to ({}, {})",
                    det.class_name, self.label, alert.elapsed, alert.future_x, alert.future_y
                );

                self.sink.alert(&alert)?;
                outcome.alerts.push(alert);
            }
        }

        outcome.detections = dets;

        self.summary.frames += 1;
        self.summary.detections += outcome.predictions.len() as u64;
        self.summary.alerts += outcome.alerts.len() as u64;

        Ok(outcome)
    }

    /// Pulls frames until the source ends or `keep_going` returns false.
    ///
    /// Every frame is fully processed and recorded before the next is acquired, so
    /// stopping between frames leaves all state consistent.
    pub fn run<F, D, K>(
        &mut self,
        source: &mut F,
        detector: &mut D,
        mut keep_going: K,
    ) -> Result<RunSummary, Error>
    where
        F: FrameSource + ?Sized,
        D: Detector + ?Sized,
        K: FnMut(&Frame, &FrameOutcome) -> bool,
    {
        let (w, h) = source.dims();
        info!("stream started: {}x{} @ {:.1} fps", w, h, source.fps());

        while let Some(frame) = source.next_frame()? {
            let detections = detector.detect(&frame)?;
            let outcome = self.process(&frame, detections)?;

            if !keep_going(&frame, &outcome) {
                info!("stopped after frame {}", frame.index);
                break;
            }
        }

        self.sink.flush()?;

        let summary = self.summary;
        info!(
            "stream finished: {} frames, {} detections, {} alerts",
            summary.frames, summary.detections, summary.alerts
        );

        Ok(summary)
    }
}

/// Checks that an optional overlay image exists before the stream starts.
pub fn check_overlay(path: Option<&Path>) -> Result<(), Error> {
    match path {
        Some(p) if !p.is_file() => Err(Error::Config(format!(
            "overlay image {} not found",
            p.display()
        ))),
        _ => Ok(()),
    }
}
