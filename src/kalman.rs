//! Constant velocity Kalman filter with a dead reckoning look-ahead.
//!
//! State: [x, y, vx, vy] (pixels, pixels per frame)
//! Measurement: [x, y]

use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{trace, warn};

use crate::predictor::{MotionPredictor, PredictionResult, PredictorKind, TrackKey};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct KalmanParams {
    /// Diagonal of the process noise covariance.
    pub process_noise: f64,
    /// Diagonal of the measurement noise covariance.
    pub measurement_noise: f64,
    /// Diagonal of the covariance a new filter starts with.
    pub initial_covariance: f64,
}

impl Default for KalmanParams {
    fn default() -> Self {
        Self {
            process_noise: 0.03,
            measurement_noise: 1.0,
            initial_covariance: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KalmanFilter {
    state: na::Vector4<f64>,
    covariance: na::Matrix4<f64>,
    transition: na::Matrix4<f64>,
    measurement: na::Matrix2x4<f64>,
    process_noise: na::Matrix4<f64>,
    measurement_noise: na::Matrix2<f64>,
}

impl KalmanFilter {
    /// Starts at `initial` with zero velocity.
    pub fn new(initial: na::Point2<f64>, params: &KalmanParams) -> Self {
        #[rustfmt::skip]
        let transition = na::Matrix4::new(
            1.0, 0.0, 1.0, 0.0,
            0.0, 1.0, 0.0, 1.0,
            0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        );

        #[rustfmt::skip]
        let measurement = na::Matrix2x4::new(
            1.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0,
        );

        Self {
            state: na::Vector4::new(initial.x, initial.y, 0.0, 0.0),
            covariance: na::Matrix4::identity() * params.initial_covariance,
            transition,
            measurement,
            process_noise: na::Matrix4::identity() * params.process_noise,
            measurement_noise: na::Matrix2::identity() * params.measurement_noise,
        }
    }

    /// Fuses a position measurement into the estimate.
    ///
    /// A singular innovation covariance leaves the estimate untouched.
    pub fn correct(&mut self, z: na::Vector2<f64>) {
        let h = &self.measurement;
        let s = h * self.covariance * h.transpose() + self.measurement_noise;

        let s_inv = match s.try_inverse() {
            Some(m) => m,
            None => {
                warn!("singular innovation covariance, measurement skipped");
                return;
            }
        };

        let gain = self.covariance * h.transpose() * s_inv;
        let innovation = z - h * self.state;

        self.state += gain * innovation;
        self.covariance = (na::Matrix4::identity() - gain * h) * self.covariance;
    }

    /// Advances the estimate by one frame and returns the new state.
    pub fn predict(&mut self) -> na::Vector4<f64> {
        self.state = self.transition * self.state;
        self.covariance =
            self.transition * self.covariance * self.transition.transpose() + self.process_noise;

        self.state
    }

    #[inline]
    pub fn position(&self) -> na::Point2<f64> {
        na::Point2::new(self.state[0], self.state[1])
    }

    #[inline]
    pub fn velocity(&self) -> na::Vector2<f64> {
        na::Vector2::new(self.state[2], self.state[3])
    }

    #[inline]
    pub fn covariance(&self) -> &na::Matrix4<f64> {
        &self.covariance
    }

    /// Position `dt` seconds past the current estimate.
    #[inline]
    pub fn future(&self, dt: f64) -> na::Point2<f64> {
        self.position() + self.velocity() * dt
    }
}

/// One [`KalmanFilter`] per key, created on first sighting.
#[derive(Debug)]
pub struct KalmanPredictor {
    params: KalmanParams,
    look_ahead: f64,
    filters: HashMap<TrackKey, KalmanFilter>,
}

impl KalmanPredictor {
    /// `fps` sets the look-ahead to one frame interval. Sources that cannot report
    /// a frame rate (zero, negative or NaN) get no look-ahead.
    pub fn new(params: KalmanParams, fps: f64) -> Self {
        let look_ahead = if fps.is_finite() && fps > 0.0 {
            1.0 / fps
        } else {
            warn!("invalid frame rate {}, look-ahead disabled", fps);
            0.0
        };

        Self {
            params,
            look_ahead,
            filters: HashMap::new(),
        }
    }

    #[inline]
    pub fn look_ahead(&self) -> f64 {
        self.look_ahead
    }

    #[inline]
    pub fn filter(&self, key: &TrackKey) -> Option<&KalmanFilter> {
        self.filters.get(key)
    }
}

impl MotionPredictor for KalmanPredictor {
    fn predict(
        &mut self,
        key: TrackKey,
        measurement: na::Point2<f64>,
        _timestamp: f64,
    ) -> PredictionResult {
        let params = &self.params;
        let filter = self
            .filters
            .entry(key)
            .or_insert_with(|| KalmanFilter::new(measurement, params));

        filter.correct(measurement.coords);
        filter.predict();

        let filtered = filter.position();
        let future = filter.future(self.look_ahead);

        trace!(
            "{}: filtered=({:.1}, {:.1}) vel=({:.2}, {:.2})",
            key,
            filtered.x,
            filtered.y,
            filter.velocity().x,
            filter.velocity().y
        );

        PredictionResult {
            current_x: filtered.x as i32,
            current_y: filtered.y as i32,
            future_x: future.x as i32,
            future_y: future.y as i32,
        }
    }

    fn forget(&mut self, key: &TrackKey) {
        self.filters.remove(key);
    }

    fn len(&self) -> usize {
        self.filters.len()
    }

    fn kind(&self) -> PredictorKind {
        PredictorKind::Kalman
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::ClassId;
    use approx::assert_relative_eq;

    const KEY: TrackKey = TrackKey::Class(ClassId(0));

    #[test]
    fn stationary_target_stays_put() {
        let mut p = KalmanPredictor::new(KalmanParams::default(), 30.0);

        for _ in 0..5 {
            let r = p.predict(KEY, na::Point2::new(50.0, 60.0), 0.0);
            assert_eq!(r.current(), na::Point2::new(50, 60));
            assert_eq!(r.future(), na::Point2::new(50, 60));
        }

        let f = p.filter(&KEY).unwrap();
        assert_relative_eq!(f.velocity().norm(), 0.0);
    }

    #[test]
    fn converges_after_target_stops() {
        let mut p = KalmanPredictor::new(KalmanParams::default(), 30.0);

        for i in 0..10 {
            p.predict(KEY, na::Point2::new(100.0 + 5.0 * i as f64, 200.0), 0.0);
        }
        assert!(p.filter(&KEY).unwrap().velocity().x > 4.0);

        for _ in 0..50 {
            p.predict(KEY, na::Point2::new(145.0, 200.0), 0.0);
        }

        let f = p.filter(&KEY).unwrap();
        assert_relative_eq!(f.position().x, 145.0, epsilon = 0.05);
        assert_relative_eq!(f.position().y, 200.0, epsilon = 0.05);
        assert_relative_eq!(f.velocity().x, 0.0, epsilon = 0.05);
    }

    #[test]
    fn tracks_constant_velocity() {
        let mut p = KalmanPredictor::new(KalmanParams::default(), 30.0);

        for i in 0..40 {
            p.predict(KEY, na::Point2::new(100.0 + 5.0 * i as f64, 200.0), 0.0);
        }

        let f = p.filter(&KEY).unwrap();
        assert_relative_eq!(f.velocity().x, 5.0, epsilon = 0.05);
        // one step ahead of the last measurement (295)
        assert_relative_eq!(f.position().x, 300.0, epsilon = 0.1);
        assert_relative_eq!(f.future(p.look_ahead()).x, f.position().x + 5.0 / 30.0, epsilon = 1e-3);
    }

    #[test]
    fn invalid_fps_disables_look_ahead() {
        assert_eq!(KalmanPredictor::new(KalmanParams::default(), 0.0).look_ahead(), 0.0);
        assert_eq!(KalmanPredictor::new(KalmanParams::default(), f64::NAN).look_ahead(), 0.0);
        assert_relative_eq!(KalmanPredictor::new(KalmanParams::default(), 25.0).look_ahead(), 0.04);
    }

    #[test]
    fn covariance_stays_symmetric() {
        let mut f = KalmanFilter::new(na::Point2::new(0.0, 0.0), &KalmanParams::default());

        for i in 0..20 {
            f.correct(na::Vector2::new(i as f64, -(i as f64)));
            f.predict();
        }

        let p = f.covariance();
        assert_relative_eq!(*p, p.transpose(), epsilon = 1e-9);
    }
}
