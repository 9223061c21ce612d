use serde_derive::{Deserialize, Serialize};
use std::fmt;

use crate::bbox::{BBox, Ltrb};

/// Class index as reported by the detector.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ClassId(pub i32);

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Contains (x1,y1) left top and (x2,y2) right bottom corners of bbox in frame pixels
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    #[serde(rename = "p")]
    pub confidence: f32,
    #[serde(rename = "c")]
    pub class: ClassId,
    #[serde(rename = "name", default)]
    pub class_name: String,
}

impl Detection {
    pub fn new(
        bbox: BBox<Ltrb>,
        confidence: f32,
        class: ClassId,
        class_name: impl Into<String>,
    ) -> Self {
        Self {
            x1: bbox.left(),
            y1: bbox.top(),
            x2: bbox.right(),
            y2: bbox.bottom(),
            confidence,
            class,
            class_name: class_name.into(),
        }
    }

    #[inline(always)]
    pub fn bbox(&self) -> BBox<Ltrb> {
        BBox::ltrb(self.x1, self.y1, self.x2, self.y2)
    }

    /// Replaces the box, keeping confidence and label.
    #[inline]
    pub fn with_bbox(mut self, bbox: BBox<Ltrb>) -> Self {
        self.x1 = bbox.left();
        self.y1 = bbox.top();
        self.x2 = bbox.right();
        self.y2 = bbox.bottom();
        self
    }

    /// Box center truncated to whole pixels.
    #[inline]
    pub fn center_px(&self) -> (i32, i32) {
        let (cx, cy) = self.bbox().center();

        (cx as i32, cy as i32)
    }

    #[inline]
    pub fn iou(&self, other: &Detection) -> f32 {
        self.bbox().iou(&other.bbox())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_truncates() {
        let det = Detection::new(BBox::ltrb(100., 100., 121., 121.), 0.9, ClassId(5), "arm");
        assert_eq!(det.center_px(), (110, 110));
    }

    #[test]
    fn wire_format() {
        let json = r#"{"x1":1,"y1":2,"x2":3,"y2":4,"p":0.5,"c":7,"name":"cup"}"#;
        let det: Detection = serde_json::from_str(json).unwrap();

        assert_eq!(det.bbox(), BBox::ltrb(1., 2., 3., 4.));
        assert_eq!(det.class, ClassId(7));
        assert_eq!(det.class_name, "cup");

        let nameless: Detection =
            serde_json::from_str(r#"{"x1":1,"y1":2,"x2":3,"y2":4,"p":0.5,"c":7}"#).unwrap();
        assert!(nameless.class_name.is_empty());
    }
}
