//! Duplicate suppression for a single frame's detections.
//!
//! Unlike non-maximum suppression, overlapping boxes are not dropped but merged
//! into their enclosing box, so the consolidated detection covers every duplicate
//! the detector produced for the same object.

use tracing::debug;

use crate::Detection;

/// Merges detections whose boxes overlap by at least `iou_threshold`.
///
/// The result can hold fewer detections than a single [`merge_pass`] returns.
///
/// Runs [`merge_pass`] until a pass merges nothing. For most frames the first pass
/// is already stable; further passes only happen when a grown box starts to overlap
/// a seed it was previously compared against, and they guarantee that consolidating
/// the output again is a no-op.
pub fn consolidate(detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    let input = detections.len();
    let mut current = merge_pass(detections, iou_threshold);

    loop {
        let before = current.len();
        current = merge_pass(current, iou_threshold);

        if current.len() == before {
            break;
        }
    }

    if current.len() < input {
        debug!("consolidated {} detections into {}", input, current.len());
    }

    current
}

/// Single greedy merge pass.
///
/// Detections are visited in descending confidence order (ties keep input order).
/// Each unclaimed detection seeds an accumulator box which absorbs every later
/// unclaimed detection whose IoU with the accumulator reaches the threshold. The
/// merged detection keeps the seed's class and the highest confidence. Boxes that
/// do not overlap at all are never merged, even at a threshold of zero.
pub fn merge_pass(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    if detections.is_empty() {
        return detections;
    }

    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut used = vec![false; detections.len()];
    let mut consolidated = Vec::with_capacity(detections.len());

    for idx in 0..detections.len() {
        if used[idx] {
            continue;
        }
        used[idx] = true;

        let seed = &detections[idx];
        let mut acc = seed.bbox();
        let mut confidence = seed.confidence;

        for (other, claimed) in detections[idx + 1..].iter().zip(used[idx + 1..].iter_mut()) {
            if *claimed {
                continue;
            }

            let bbox = other.bbox();
            let iou = acc.iou(&bbox);
            if iou > 0. && iou >= iou_threshold {
                *claimed = true;
                acc = acc.union(&bbox);
                confidence = confidence.max(other.confidence);
            }
        }

        let mut merged = seed.clone().with_bbox(acc);
        merged.confidence = confidence;
        consolidated.push(merged);
    }

    consolidated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BBox;
    use crate::detection::ClassId;

    fn det(x1: f32, y1: f32, x2: f32, y2: f32, p: f32, class: i32) -> Detection {
        Detection::new(BBox::ltrb(x1, y1, x2, y2), p, ClassId(class), format!("c{}", class))
    }

    #[test]
    fn empty_input() {
        assert!(consolidate(vec![], 0.5).is_empty());
    }

    #[test]
    fn disjoint_boxes_pass_through() {
        let input = vec![det(0., 0., 10., 10., 0.4, 1), det(20., 20., 30., 30., 0.9, 2)];

        for threshold in [0.0, 0.01, 0.5, 1.0] {
            let out = consolidate(input.clone(), threshold);
            assert_eq!(out.len(), 2);
            assert!(out.contains(&input[0]));
            assert!(out.contains(&input[1]));
        }
    }

    #[test]
    fn touching_boxes_stay_apart_at_zero_threshold() {
        let input = vec![det(0., 0., 10., 10., 0.9, 1), det(10., 0., 20., 10., 0.8, 1)];
        assert_eq!(consolidate(input, 0.0).len(), 2);
    }

    #[test]
    fn output_follows_confidence_order() {
        let input = vec![det(0., 0., 10., 10., 0.4, 1), det(20., 20., 30., 30., 0.9, 2)];
        let out = consolidate(input, 0.5);

        assert_eq!(out[0].class, ClassId(2));
        assert_eq!(out[1].class, ClassId(1));
    }

    #[test]
    fn merge_keeps_seed_label_and_max_confidence() {
        let input = vec![
            det(0., 0., 10., 10., 0.6, 3),
            det(1., 0., 11., 10., 0.8, 7),
        ];
        let out = consolidate(input, 0.5);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].class, ClassId(7));
        assert_eq!(out[0].class_name, "c7");
        assert_eq!(out[0].confidence, 0.8);
        assert_eq!(out[0].bbox(), BBox::ltrb(0., 0., 11., 10.));
    }

    #[test]
    fn threshold_is_inclusive() {
        // intersection 50, union 100
        let input = vec![det(0., 0., 10., 10., 0.9, 1), det(0., 0., 10., 5., 0.5, 1)];

        assert_eq!(consolidate(input.clone(), 0.5).len(), 1);

        let just_above = f32::from_bits(0.5f32.to_bits() + 1);
        assert_eq!(consolidate(input, just_above).len(), 2);
    }

    #[test]
    fn equal_confidence_keeps_input_order() {
        let input = vec![
            det(0., 0., 10., 10., 0.5, 1),
            det(0., 0., 10., 10., 0.5, 2),
        ];
        let out = consolidate(input, 0.5);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].class, ClassId(1));
    }

    #[test]
    fn grown_box_is_merged_on_a_later_pass() {
        // B is checked against A's box before A absorbs C and grows towards B.
        let a = det(0., 0., 10., 10., 0.9, 1);
        let b = det(12., 0., 22., 10., 0.8, 1);
        let c = det(2., 0., 20., 10., 0.7, 1);

        let single = merge_pass(vec![a.clone(), b.clone(), c.clone()], 0.3);
        assert_eq!(single.len(), 2);

        let out = consolidate(vec![a, b, c], 0.3);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bbox(), BBox::ltrb(0., 0., 22., 10.));
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::bbox::BBox;
    use crate::detection::ClassId;
    use proptest::prelude::*;

    fn arb_detection() -> impl Strategy<Value = Detection> {
        (0i32..200, 0i32..200, 1i32..60, 1i32..60, 0.0f32..1.0, 0i32..4).prop_map(
            |(x, y, w, h, p, c)| {
                Detection::new(
                    BBox::ltrb(x as f32, y as f32, (x + w) as f32, (y + h) as f32),
                    p,
                    ClassId(c),
                    "",
                )
            },
        )
    }

    proptest! {
        #[test]
        fn prop_consolidation_is_idempotent(
            dets in prop::collection::vec(arb_detection(), 0..24),
            threshold in 0.0f32..=1.0
        ) {
            let once = consolidate(dets, threshold);
            let twice = consolidate(once.clone(), threshold);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_output_never_grows_and_covers_inputs(
            dets in prop::collection::vec(arb_detection(), 0..24),
            threshold in 0.0f32..=1.0
        ) {
            let out = consolidate(dets.clone(), threshold);
            prop_assert!(out.len() <= dets.len());

            for d in &dets {
                let b = d.bbox();
                let covered = out.iter().any(|o| {
                    let ob = o.bbox();
                    ob.left() <= b.left()
                        && ob.top() <= b.top()
                        && ob.right() >= b.right()
                        && ob.bottom() >= b.bottom()
                        && ob.area() >= b.area()
                });
                prop_assert!(covered);
            }
        }
    }
}
