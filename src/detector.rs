//! Decoding of YOLOv8 style output tensors into [`Detection`]s.

use ndarray::prelude::*;
use std::collections::BTreeMap;

use crate::bbox::BBox;
use crate::detection::{ClassId, Detection};

pub struct YoloDecoderConfig {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Only these classes are reported; `None` keeps all.
    pub classes: Option<Vec<i32>>,
    pub class_names: Vec<String>,
}

impl YoloDecoderConfig {
    pub fn new(confidence_threshold: f32, class_names: Vec<String>) -> Self {
        Self {
            confidence_threshold,
            iou_threshold: 0.45,
            classes: None,
            class_names,
        }
    }
}

pub struct YoloDecoder {
    config: YoloDecoderConfig,
}

impl YoloDecoder {
    pub fn new(config: YoloDecoderConfig) -> Self {
        Self { config }
    }

    pub fn class_name(&self, class: i32) -> String {
        usize::try_from(class)
            .ok()
            .and_then(|idx| self.config.class_names.get(idx))
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class))
    }

    /// Decodes a `[batch, 4 + classes, anchors]` tensor whose boxes are
    /// center/size in model input pixels (`in_w` x `in_h`) into frame pixel boxes.
    ///
    /// Box corners are truncated to whole pixels.
    pub fn decode(
        &self,
        view: ArrayView3<'_, f32>,
        in_w: usize,
        in_h: usize,
        frame_width: u32,
        frame_height: u32,
    ) -> Vec<Vec<Detection>> {
        let shape = view.shape();
        let (nbatches, rows, nanchors) = (shape[0], shape[1], shape[2]);
        let sx = frame_width as f32 / in_w as f32;
        let sy = frame_height as f32 / in_h as f32;

        let mut results: Vec<Vec<Detection>> = (0..nbatches).map(|_| vec![]).collect();
        if rows <= 4 {
            return results;
        }

        for (batch, results) in results.iter_mut().enumerate() {
            let preds = view.index_axis(Axis(0), batch);

            // The bounding boxes grouped by (maximum) class index.
            let mut bboxes: BTreeMap<i32, Vec<Detection>> = BTreeMap::new();

            for anchor in 0..nanchors {
                let column = preds.index_axis(Axis(1), anchor);

                let mut class_index = -1;
                let mut confidence = 0.0;

                for (idx, val) in column.iter().skip(4).copied().enumerate() {
                    if val > confidence {
                        class_index = idx as i32;
                        confidence = val;
                    }
                }

                if class_index < 0 || confidence <= self.config.confidence_threshold {
                    continue;
                }

                if let Some(classes) = &self.config.classes {
                    if !classes.contains(&class_index) {
                        continue;
                    }
                }

                let scaled = BBox::xywh(column[0], column[1], column[2], column[3])
                    .scale(sx, sy)
                    .as_ltrb();
                let bbox = BBox::ltrb(
                    scaled.left().trunc(),
                    scaled.top().trunc(),
                    scaled.right().trunc(),
                    scaled.bottom().trunc(),
                );

                bboxes.entry(class_index).or_default().push(Detection::new(
                    bbox,
                    confidence,
                    ClassId(class_index),
                    self.class_name(class_index),
                ));
            }

            for (_, mut dets) in bboxes {
                if dets.len() > 1 {
                    self.non_maximum_suppression(&mut dets);
                }

                results.append(&mut dets);
            }
        }

        results
    }

    fn non_maximum_suppression(&self, dets: &mut Vec<Detection>) {
        dets.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let mut keep = vec![true; dets.len()];
        for idx in 0..dets.len() {
            if !keep[idx] {
                continue;
            }

            for other in idx + 1..dets.len() {
                if keep[other] && dets[idx].iou(&dets[other]) > self.config.iou_threshold {
                    keep[other] = false;
                }
            }
        }

        let mut keep = keep.into_iter();
        dets.retain(|_| keep.next().unwrap_or(false));
    }
}
