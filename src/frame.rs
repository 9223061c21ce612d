use ndarray::Array3;

use crate::detection::Detection;
use crate::error::Error;

pub struct Frame {
    pub index: u64,
    pub dims: (u32, u32),
    pub timestamp: f64, // in seconds
    /// HxWxC pixel buffer; absent for frames replayed from recorded detections.
    pub pixels: Option<Array3<u8>>,
}

impl Frame {
    #[inline]
    pub fn width(&self) -> u32 {
        self.dims.0
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.dims.1
    }
}

/// Blocking supplier of frames; `Ok(None)` marks the end of the stream.
pub trait FrameSource {
    fn dims(&self) -> (u32, u32);

    /// Nominal frame rate; zero when the source cannot tell.
    fn fps(&self) -> f64;

    fn next_frame(&mut self) -> Result<Option<Frame>, Error>;
}

/// Object detector run once per frame.
pub trait Detector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Error>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Error> {
        (**self).detect(frame)
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn dims(&self) -> (u32, u32) {
        (**self).dims()
    }

    fn fps(&self) -> f64 {
        (**self).fps()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, Error> {
        (**self).next_frame()
    }
}
