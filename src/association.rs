//! Frame-to-frame data association giving each detection a persistent [`TrackId`].

use munkres::{solve_assignment, WeightMatrix};
use serde_derive::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bbox::{BBox, Ltrb};
use crate::detection::ClassId;
use crate::predictor::TrackId;
use crate::Detection;

const DISALLOWED: f64 = 100000.0;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(tag = "metric", rename_all = "snake_case")]
pub enum AssociationMetric {
    /// Cost `1 - IoU`; pairs below `min_iou` never match.
    Iou { min_iou: f32 },
    /// Cost is the center distance in pixels; pairs further than `max_distance` never match.
    Centroid { max_distance: f32 },
}

impl Default for AssociationMetric {
    fn default() -> Self {
        AssociationMetric::Iou { min_iou: 0.1 }
    }
}

impl AssociationMetric {
    /// Matching cost, or `None` if the pair is gated out.
    pub fn cost(&self, a: &BBox<Ltrb>, b: &BBox<Ltrb>) -> Option<f64> {
        match *self {
            AssociationMetric::Iou { min_iou } => {
                let iou = a.iou(b);
                (iou > 0. && iou >= min_iou).then(|| 1.0 - iou as f64)
            }
            AssociationMetric::Centroid { max_distance } => {
                let (ax, ay) = a.center();
                let (bx, by) = b.center();
                let dist = (ax - bx).hypot(ay - by);
                (dist <= max_distance).then(|| dist as f64)
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Tracked {
    id: TrackId,
    class: ClassId,
    bbox: BBox<Ltrb>,
    misses: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Association {
    /// Track id of each detection, in detection order.
    pub ids: Vec<TrackId>,
    /// Tracks dropped this frame after exceeding the miss budget.
    pub retired: Vec<TrackId>,
}

pub struct TrackAssociator {
    metric: AssociationMetric,
    max_age: u32,
    tracks: Vec<Tracked>,
    next_id: u32,
}

impl TrackAssociator {
    /// A track survives `max_age` consecutive frames without a matching detection.
    pub fn new(metric: AssociationMetric, max_age: u32) -> Self {
        Self {
            metric,
            max_age,
            tracks: Vec::with_capacity(64),
            next_id: 1,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    fn cost(&self, track: &Tracked, det: &Detection) -> Option<f64> {
        if track.class != det.class {
            return None;
        }

        self.metric.cost(&track.bbox, &det.bbox())
    }

    /// Optimal one-to-one matching between live tracks and `dets`.
    fn assignment(&self, dets: &[Detection]) -> Vec<(usize, usize)> {
        if self.tracks.is_empty() || dets.is_empty() {
            return Vec::new();
        }

        let n = dets.len().max(self.tracks.len());
        let mut weights = Vec::with_capacity(n * n);
        for r in 0..n {
            for c in 0..n {
                let cost = match (self.tracks.get(r), dets.get(c)) {
                    (Some(track), Some(det)) => self.cost(track, det),
                    _ => None,
                };
                weights.push(cost.unwrap_or(DISALLOWED));
            }
        }

        let mut mat = WeightMatrix::from_row_vec(n, weights);
        match solve_assignment(&mut mat) {
            Ok(positions) => positions
                .into_iter()
                .filter(|p| p.row < self.tracks.len() && p.column < dets.len())
                .filter(|p| self.cost(&self.tracks[p.row], &dets[p.column]).is_some())
                .map(|p| (p.row, p.column))
                .collect(),
            Err(err) => {
                warn!("assignment could not be solved: {:?}", err);
                Vec::new()
            }
        }
    }

    pub fn associate(&mut self, dets: &[Detection]) -> Association {
        let pairs = self.assignment(dets);

        let mut ids: Vec<Option<TrackId>> = vec![None; dets.len()];
        let mut matched = vec![false; self.tracks.len()];

        for (row, col) in pairs {
            let track = &mut self.tracks[row];
            track.bbox = dets[col].bbox();
            track.misses = 0;
            matched[row] = true;
            ids[col] = Some(track.id);
        }

        for (track, matched) in self.tracks.iter_mut().zip(matched) {
            if !matched {
                track.misses += 1;
            }
        }

        let max_age = self.max_age;
        let mut retired = Vec::new();
        self.tracks.retain(|t| {
            if t.misses > max_age {
                retired.push(t.id);
                false
            } else {
                true
            }
        });

        let ids = ids
            .into_iter()
            .zip(dets)
            .map(|(id, det)| match id {
                Some(id) => id,
                None => {
                    let id = TrackId(self.next_id);
                    self.next_id += 1;
                    debug!("new track {} for class {}", id, det.class);

                    self.tracks.push(Tracked {
                        id,
                        class: det.class,
                        bbox: det.bbox(),
                        misses: 0,
                    });

                    id
                }
            })
            .collect();

        if !retired.is_empty() {
            debug!("retired tracks {:?}", retired);
        }

        Association { ids, retired }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x1: f32, y1: f32, x2: f32, y2: f32, class: i32) -> Detection {
        Detection::new(BBox::ltrb(x1, y1, x2, y2), 0.9, ClassId(class), "")
    }

    #[test]
    fn moving_object_keeps_its_id() {
        let mut a = TrackAssociator::new(AssociationMetric::default(), 3);

        let first = a.associate(&[det(100., 100., 120., 120., 5)]);
        let second = a.associate(&[det(110., 100., 130., 120., 5)]);

        assert_eq!(first.ids, second.ids);
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn same_class_objects_get_distinct_ids() {
        let mut a = TrackAssociator::new(AssociationMetric::default(), 3);

        let f1 = a.associate(&[det(0., 0., 20., 20., 1), det(300., 300., 320., 320., 1)]);
        assert_ne!(f1.ids[0], f1.ids[1]);

        // listed in the opposite order, each box still follows its own track
        let f2 = a.associate(&[det(302., 300., 322., 320., 1), det(2., 0., 22., 20., 1)]);
        assert_eq!(f2.ids[0], f1.ids[1]);
        assert_eq!(f2.ids[1], f1.ids[0]);
    }

    #[test]
    fn class_mismatch_never_matches() {
        let mut a = TrackAssociator::new(AssociationMetric::default(), 3);

        let f1 = a.associate(&[det(0., 0., 20., 20., 1)]);
        let f2 = a.associate(&[det(0., 0., 20., 20., 2)]);

        assert_ne!(f1.ids[0], f2.ids[0]);
    }

    #[test]
    fn unseen_tracks_are_retired() {
        let mut a = TrackAssociator::new(AssociationMetric::default(), 2);
        let id = a.associate(&[det(0., 0., 20., 20., 1)]).ids[0];

        assert!(a.associate(&[]).retired.is_empty());
        assert!(a.associate(&[]).retired.is_empty());
        assert_eq!(a.associate(&[]).retired, vec![id]);
        assert!(a.is_empty());
    }

    #[test]
    fn centroid_metric_matches_fast_movers() {
        let mut a = TrackAssociator::new(AssociationMetric::Centroid { max_distance: 50. }, 1);

        let f1 = a.associate(&[det(0., 0., 10., 10., 1)]);
        let f2 = a.associate(&[det(40., 0., 50., 10., 1)]);
        assert_eq!(f1.ids, f2.ids);

        let f3 = a.associate(&[det(200., 0., 210., 10., 1)]);
        assert_ne!(f2.ids, f3.ids);
    }
}
