use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::detection::ClassId;

/// Identity assigned by [`crate::association::TrackAssociator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub u32);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Key under which a predictor keeps motion state.
///
/// `Class` shares one state among every object of a class, which corrupts velocity
/// as soon as two objects of that class are visible. It is kept for compatibility
/// with logs produced that way; `Track` keys state by associated identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKey {
    Class(ClassId),
    Track(TrackId),
}

impl fmt::Display for TrackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKey::Class(c) => write!(f, "class {}", c),
            TrackKey::Track(t) => write!(f, "track {}", t),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PredictorKind {
    #[default]
    DeadReckoning,
    Kalman,
}

/// Current and extrapolated position, in whole pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictionResult {
    pub current_x: i32,
    pub current_y: i32,
    pub future_x: i32,
    pub future_y: i32,
}

impl PredictionResult {
    #[inline]
    pub fn current(&self) -> na::Point2<i32> {
        na::Point2::new(self.current_x, self.current_y)
    }

    #[inline]
    pub fn future(&self) -> na::Point2<i32> {
        na::Point2::new(self.future_x, self.future_y)
    }
}

pub trait MotionPredictor {
    /// Feeds the measured position of `key` at `timestamp` (seconds) and returns the
    /// current and one-step-ahead position.
    fn predict(
        &mut self,
        key: TrackKey,
        measurement: na::Point2<f64>,
        timestamp: f64,
    ) -> PredictionResult;

    /// Drops all state kept for `key`.
    fn forget(&mut self, key: &TrackKey);

    /// Number of keys with live state.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn kind(&self) -> PredictorKind;
}

impl<P: MotionPredictor + ?Sized> MotionPredictor for Box<P> {
    fn predict(
        &mut self,
        key: TrackKey,
        measurement: na::Point2<f64>,
        timestamp: f64,
    ) -> PredictionResult {
        (**self).predict(key, measurement, timestamp)
    }

    fn forget(&mut self, key: &TrackKey) {
        (**self).forget(key)
    }

    fn len(&self) -> usize {
        (**self).len()
    }

    fn kind(&self) -> PredictorKind {
        (**self).kind()
    }
}

/// Last known position of a key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackState {
    pub last_x: f64,
    pub last_y: f64,
    pub last_timestamp: f64,
}

impl TrackState {
    /// Displacement since the last sighting and the velocity it implies.
    ///
    /// A non-positive time delta (duplicate or reordered timestamps) yields zero.
    pub fn motion(
        &self,
        current: na::Point2<f64>,
        timestamp: f64,
    ) -> (na::Vector2<f64>, na::Vector2<f64>) {
        let dt = timestamp - self.last_timestamp;

        if dt > 0.0 {
            let displacement = na::Vector2::new(current.x - self.last_x, current.y - self.last_y);
            (displacement, displacement / dt)
        } else {
            (na::Vector2::zeros(), na::Vector2::zeros())
        }
    }
}

/// Velocity extrapolation from the previous sighting.
#[derive(Debug, Default)]
pub struct DeadReckoning {
    states: HashMap<TrackKey, TrackState>,
}

impl DeadReckoning {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn state(&self, key: &TrackKey) -> Option<&TrackState> {
        self.states.get(key)
    }
}

impl MotionPredictor for DeadReckoning {
    fn predict(
        &mut self,
        key: TrackKey,
        measurement: na::Point2<f64>,
        timestamp: f64,
    ) -> PredictionResult {
        let current = na::Point2::new(measurement.x.trunc(), measurement.y.trunc());

        let last = self.states.get(&key).copied().unwrap_or(TrackState {
            last_x: current.x,
            last_y: current.y,
            last_timestamp: timestamp,
        });

        // velocity * dt reduces to the displacement itself; using it directly keeps
        // the extrapolation exact for whole-pixel positions.
        let (displacement, velocity) = last.motion(current, timestamp);
        let future = current + displacement;

        tracing::trace!(
            "{}: pos=({}, {}) vel=({:.2}, {:.2})",
            key,
            current.x,
            current.y,
            velocity.x,
            velocity.y
        );

        self.states.insert(
            key,
            TrackState {
                last_x: current.x,
                last_y: current.y,
                last_timestamp: timestamp,
            },
        );

        PredictionResult {
            current_x: current.x as i32,
            current_y: current.y as i32,
            future_x: future.x as i32,
            future_y: future.y as i32,
        }
    }

    fn forget(&mut self, key: &TrackKey) {
        self.states.remove(key);
    }

    fn len(&self) -> usize {
        self.states.len()
    }

    fn kind(&self) -> PredictorKind {
        PredictorKind::DeadReckoning
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(c: i32) -> TrackKey {
        TrackKey::Class(ClassId(c))
    }

    #[test]
    fn first_sighting_has_no_motion() {
        let mut p = DeadReckoning::new();
        let r = p.predict(key(1), na::Point2::new(42.7, 13.2), 5.0);

        assert_eq!(r.current(), na::Point2::new(42, 13));
        assert_eq!(r.future(), r.current());
        assert_eq!(p.len(), 1);
    }

    #[test]
    fn constant_velocity_is_extrapolated_exactly() {
        let mut p = DeadReckoning::new();
        let dt = 0.1;

        for step in 0..50 {
            let x = 100.0 + 7.0 * step as f64;
            let y = 300.0 - 3.0 * step as f64;
            let r = p.predict(key(2), na::Point2::new(x, y), step as f64 * dt);

            if step > 0 {
                assert_eq!(r.future_x, x as i32 + 7);
                assert_eq!(r.future_y, y as i32 - 3);
            }
        }
    }

    #[test]
    fn duplicate_timestamp_means_zero_velocity() {
        let mut p = DeadReckoning::new();
        p.predict(key(3), na::Point2::new(10.0, 10.0), 1.0);
        let r = p.predict(key(3), na::Point2::new(20.0, 10.0), 1.0);

        assert_eq!(r.future(), na::Point2::new(20, 10));

        // state was still overwritten
        assert_eq!(p.state(&key(3)).map(|s| s.last_x), Some(20.0));
    }

    #[test]
    fn reordered_timestamp_means_zero_velocity() {
        let mut p = DeadReckoning::new();
        p.predict(key(3), na::Point2::new(10.0, 10.0), 2.0);
        let r = p.predict(key(3), na::Point2::new(20.0, 30.0), 1.0);

        assert_eq!(r.future(), na::Point2::new(20, 30));
    }

    #[test]
    fn keys_are_independent() {
        let mut p = DeadReckoning::new();
        p.predict(key(1), na::Point2::new(0.0, 0.0), 0.0);
        p.predict(TrackKey::Track(TrackId(1)), na::Point2::new(500.0, 500.0), 0.0);

        let r = p.predict(key(1), na::Point2::new(10.0, 0.0), 1.0);
        assert_eq!(r.future(), na::Point2::new(20, 0));
        assert_eq!(p.len(), 2);

        p.forget(&key(1));
        assert_eq!(p.len(), 1);
        let r = p.predict(key(1), na::Point2::new(30.0, 0.0), 2.0);
        assert_eq!(r.future(), r.current());
    }

    #[test]
    fn velocity_is_reported_per_second() {
        let state = TrackState {
            last_x: 120.0,
            last_y: 110.0,
            last_timestamp: 0.0,
        };
        let (disp, vel) = state.motion(na::Point2::new(130.0, 110.0), 0.5);

        assert_eq!(disp, na::Vector2::new(10.0, 0.0));
        assert_eq!(vel, na::Vector2::new(20.0, 0.0));
    }
}
