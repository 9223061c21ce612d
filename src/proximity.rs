use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb};
use crate::error::Error;
use crate::predictor::PredictionResult;
use crate::Detection;

/// Fixed rectangle of interest, in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub top_left: na::Point2<i32>,
    pub bottom_right: na::Point2<i32>,
}

impl Region {
    pub fn new(top_left: na::Point2<i32>, bottom_right: na::Point2<i32>) -> Result<Self, Error> {
        if top_left.x >= bottom_right.x || top_left.y >= bottom_right.y {
            return Err(Error::Config(format!(
                "region corners out of order: {:?} {:?}",
                top_left, bottom_right
            )));
        }

        Ok(Self {
            top_left,
            bottom_right,
        })
    }

    /// Region of `1 / factor` of the frame size around the frame center.
    pub fn centered(width: u32, height: u32, factor: f32) -> Result<Self, Error> {
        let invalid = || Error::InvalidRegion {
            width,
            height,
            factor,
        };

        if !factor.is_finite() || factor < 1.0 {
            return Err(invalid());
        }

        let rw = (width as f32 / factor) as i32;
        let rh = (height as f32 / factor) as i32;
        if rw < 1 || rh < 1 {
            return Err(invalid());
        }

        let (cx, cy) = ((width / 2) as i32, (height / 2) as i32);
        let top_left = na::Point2::new(cx - rw / 2, cy - rh / 2);
        let bottom_right = na::Point2::new(top_left.x + rw, top_left.y + rh);

        Self::new(top_left, bottom_right)
    }

    #[inline]
    pub fn width(&self) -> i32 {
        self.bottom_right.x - self.top_left.x
    }

    #[inline]
    pub fn height(&self) -> i32 {
        self.bottom_right.y - self.top_left.y
    }

    #[inline]
    pub fn center(&self) -> (f32, f32) {
        self.bbox().center()
    }

    #[inline]
    pub fn bbox(&self) -> BBox<Ltrb> {
        BBox::ltrb(
            self.top_left.x as f32,
            self.top_left.y as f32,
            self.bottom_right.x as f32,
            self.bottom_right.y as f32,
        )
    }
}

/// Distance between the detection's center and the region's center is at most `threshold`.
pub fn is_near(detection: &Detection, region: &Region, threshold: f32) -> bool {
    let (dx, dy) = detection.bbox().center();
    let (rx, ry) = region.center();

    (dx - rx).hypot(dy - ry) <= threshold
}

/// Predicate deciding whether a detection is close enough to the region to alert.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ProximityRule {
    /// Center-to-center distance within the proximity threshold.
    #[default]
    Distance,
    /// Box strictly intersects the region.
    Overlap,
    /// Box lies outside the region within `margin` pixels of one of its sides.
    NearMargin {
        #[serde(default = "default_margin")]
        margin: f32,
    },
}

fn default_margin() -> f32 {
    10.0
}

impl ProximityRule {
    pub fn evaluate(&self, detection: &Detection, region: &Region, threshold: f32) -> bool {
        match *self {
            ProximityRule::Distance => is_near(detection, region, threshold),
            ProximityRule::Overlap => detection.bbox().overlaps(&region.bbox()),
            ProximityRule::NearMargin { margin } => detection.bbox().near(&region.bbox(), margin),
        }
    }
}

/// One row of the alert log.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AlertRecord {
    pub timestamp: f64,
    pub elapsed: f64,
    pub class_name: String,
    pub current_x: i32,
    pub current_y: i32,
    pub future_x: i32,
    pub future_y: i32,
    pub region_x1: i32,
    pub region_y1: i32,
    pub region_x2: i32,
    pub region_y2: i32,
}

/// Region plus the rule that decides when a detection near it raises an alert.
///
/// There is no cooldown: an object that stays near the region alerts every frame.
#[derive(Debug, Clone)]
pub struct ProximityEvaluator {
    pub region: Region,
    pub rule: ProximityRule,
    pub threshold: f32,
}

impl ProximityEvaluator {
    pub fn new(region: Region, rule: ProximityRule, threshold: f32) -> Self {
        Self {
            region,
            rule,
            threshold,
        }
    }

    pub fn evaluate(
        &self,
        detection: &Detection,
        prediction: &PredictionResult,
        timestamp: f64,
        start: f64,
    ) -> Option<AlertRecord> {
        if !self.rule.evaluate(detection, &self.region, self.threshold) {
            return None;
        }

        Some(AlertRecord {
            timestamp,
            elapsed: timestamp - start,
            class_name: detection.class_name.clone(),
            current_x: prediction.current_x,
            current_y: prediction.current_y,
            future_x: prediction.future_x,
            future_y: prediction.future_y,
            region_x1: self.region.top_left.x,
            region_y1: self.region.top_left.y,
            region_x2: self.region.bottom_right.x,
            region_y2: self.region.bottom_right.y,
        })
    }
}
