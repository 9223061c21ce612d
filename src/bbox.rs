use serde_derive::{Deserialize, Serialize};
use std::marker::PhantomData;

pub trait BBoxFormat: std::fmt::Debug + Copy + PartialEq {}

/// Left-top-right-bottom format, contains left top and right bottom corners
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct Ltrb;
impl BBoxFormat for Ltrb {}

/// X-y-width-height format, contains coordinates of the center of bbox and width-height
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct Xywh;
impl BBoxFormat for Xywh {}

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct BBox<F: BBoxFormat>([f32; 4], PhantomData<F>);

impl BBox<Ltrb> {
    #[inline]
    pub fn ltrb(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        BBox([x1, y1, x2, y2], PhantomData)
    }

    #[inline(always)]
    pub fn left(&self) -> f32 {
        self.0[0]
    }

    #[inline(always)]
    pub fn top(&self) -> f32 {
        self.0[1]
    }

    #[inline(always)]
    pub fn right(&self) -> f32 {
        self.0[2]
    }

    #[inline(always)]
    pub fn bottom(&self) -> f32 {
        self.0[3]
    }

    #[inline(always)]
    pub fn width(&self) -> f32 {
        self.right() - self.left()
    }

    #[inline(always)]
    pub fn height(&self) -> f32 {
        self.bottom() - self.top()
    }

    /// Area of the box; inverted boxes count as empty.
    #[inline]
    pub fn area(&self) -> f32 {
        self.width().max(0.) * self.height().max(0.)
    }

    #[inline]
    pub fn center(&self) -> (f32, f32) {
        (
            (self.left() + self.right()) / 2.,
            (self.top() + self.bottom()) / 2.,
        )
    }

    pub fn intersection_area(&self, other: &Self) -> f32 {
        let w = self.right().min(other.right()) - self.left().max(other.left());
        let h = self.bottom().min(other.bottom()) - self.top().max(other.top());

        w.max(0.) * h.max(0.)
    }

    /// Intersection over union. A zero-area union yields `0.0`.
    pub fn iou(&self, other: &Self) -> f32 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;

        if union > 0. {
            inter / union
        } else {
            0.
        }
    }

    /// Smallest box enclosing both boxes.
    #[inline]
    pub fn union(&self, other: &Self) -> Self {
        Self::ltrb(
            self.left().min(other.left()),
            self.top().min(other.top()),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }

    /// Strict overlap: boxes sharing only an edge do not overlap.
    #[inline]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.left() < other.right()
            && self.right() > other.left()
            && self.top() < other.bottom()
            && self.bottom() > other.top()
    }

    /// True if `self` lies outside `other` on some axis with a gap of at most `margin`.
    ///
    /// Each axis side is checked on its own, so a box diagonal to `other` counts as
    /// near when either of its gaps is within the margin.
    pub fn near(&self, other: &Self, margin: f32) -> bool {
        (self.right() < other.left() && other.left() - self.right() <= margin)
            || (self.left() > other.right() && self.left() - other.right() <= margin)
            || (self.bottom() < other.top() && other.top() - self.bottom() <= margin)
            || (self.top() > other.bottom() && self.top() - other.bottom() <= margin)
    }
}

impl BBox<Xywh> {
    #[inline]
    pub fn xywh(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        BBox([cx, cy, w, h], PhantomData)
    }

    #[inline(always)]
    pub fn as_ltrb(&self) -> BBox<Ltrb> {
        self.into()
    }

    /// Scales center and size independently per axis.
    #[inline]
    pub fn scale(&self, sx: f32, sy: f32) -> Self {
        Self::xywh(self.0[0] * sx, self.0[1] * sy, self.0[2] * sx, self.0[3] * sy)
    }
}

impl<'a> From<&'a BBox<Xywh>> for BBox<Ltrb> {
    #[inline]
    fn from(v: &'a BBox<Xywh>) -> Self {
        Self(
            [
                v.0[0] - v.0[2] / 2.,
                v.0[1] - v.0[3] / 2.,
                v.0[0] + v.0[2] / 2.,
                v.0[1] + v.0[3] / 2.,
            ],
            PhantomData,
        )
    }
}
