//! Camera/video frames and an ONNX YOLOv8 detector backed by OpenCV.

use ndarray::prelude::*;
use opencv::{
    core::{self, Mat},
    dnn,
    prelude::*,
    videoio,
};
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

use crate::detector::{YoloDecoder, YoloDecoderConfig};
use crate::error::Error;
use crate::frame::{Detector, Frame, FrameSource};
use crate::Detection;

const INPUT_W: usize = 640;
const INPUT_H: usize = 640;

/// Frames from a camera index or a video file.
pub struct VideoSource {
    cap: videoio::VideoCapture,
    dims: (u32, u32),
    fps: f64,
    index: u64,
    // Wall clock for live cameras, container timestamps for files.
    started: Option<Instant>,
}

impl VideoSource {
    /// Opens `source`: an integer is a camera index, anything else a file path.
    pub fn open(source: &str) -> Result<Self, Error> {
        let unavailable = |reason: String| Error::SourceUnavailable(format!("{}: {}", source, reason));

        let (cap, live) = match source.parse::<i32>() {
            Ok(idx) => (videoio::VideoCapture::new(idx, videoio::CAP_ANY), true),
            Err(_) => (videoio::VideoCapture::from_file(source, videoio::CAP_ANY), false),
        };

        let cap = cap.map_err(|e| unavailable(e.to_string()))?;
        if !cap.is_opened()? {
            return Err(unavailable("cannot be opened".into()));
        }

        let width = cap.get(videoio::CAP_PROP_FRAME_WIDTH)? as u32;
        let height = cap.get(videoio::CAP_PROP_FRAME_HEIGHT)? as u32;
        let fps = cap.get(videoio::CAP_PROP_FPS)?;

        info!("opened {}: {}x{} @ {:.1} fps", source, width, height, fps);

        Ok(Self {
            cap,
            dims: (width, height),
            fps,
            index: 0,
            started: live.then(Instant::now),
        })
    }
}

impl FrameSource for VideoSource {
    fn dims(&self) -> (u32, u32) {
        self.dims
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, Error> {
        let mut mat = Mat::default();
        if !self.cap.read(&mut mat)? || mat.rows() == 0 || mat.cols() == 0 {
            return Ok(None);
        }

        let timestamp = match self.started {
            Some(started) => started.elapsed().as_secs_f64(),
            None => self.cap.get(videoio::CAP_PROP_POS_MSEC)? / 1000.0,
        };

        let (rows, cols, channels) = (mat.rows() as usize, mat.cols() as usize, mat.channels() as usize);
        let mat = if mat.is_continuous() { mat } else { mat.try_clone()? };
        let pixels = Array3::from_shape_vec((rows, cols, channels), mat.data_bytes()?.to_vec())
            .map_err(|e| Error::SourceUnavailable(format!("unexpected frame layout: {}", e)))?;

        let index = self.index;
        self.index += 1;

        Ok(Some(Frame {
            index,
            dims: (cols as u32, rows as u32),
            timestamp,
            pixels: Some(pixels),
        }))
    }
}

/// BGR `HxWx3` pixels back into an OpenCV matrix.
pub fn to_mat(pixels: &Array3<u8>) -> Result<Mat, Error> {
    let (rows, _, channels) = pixels.dim();
    let data: Vec<u8> = pixels.iter().copied().collect();
    let flat = Mat::from_slice(&data)?;

    Ok(flat.reshape(channels as i32, rows as i32)?.try_clone()?)
}

pub struct OnnxDetector {
    net: dnn::Net,
    decoder: YoloDecoder,
}

impl OnnxDetector {
    pub fn new(model: impl AsRef<Path>, config: YoloDecoderConfig) -> Result<Self, Error> {
        let model = model.as_ref();
        let unavailable = |reason: String| Error::ModelUnavailable(format!("{}: {}", model.display(), reason));

        if !model.is_file() {
            return Err(unavailable("not found".into()));
        }

        let path = model.to_string_lossy();
        let net = dnn::read_net_from_onnx(&path).map_err(|e| unavailable(e.to_string()))?;
        if net.empty()? {
            return Err(unavailable("empty network".into()));
        }

        info!("loaded detector model {}", model.display());

        Ok(Self {
            net,
            decoder: YoloDecoder::new(config),
        })
    }
}

impl Detector for OnnxDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Error> {
        let pixels = match &frame.pixels {
            Some(pixels) => pixels,
            None => {
                warn!("frame {} has no pixels", frame.index);
                return Ok(vec![]);
            }
        };

        let image = to_mat(pixels)?;
        let blob = dnn::blob_from_image(
            &image,
            1.0 / 255.0,
            core::Size::new(INPUT_W as _, INPUT_H as _),
            core::Scalar::new(0., 0., 0., 0.),
            true,
            false,
            core::CV_32F,
        )?;

        self.net.set_input(&blob, "", 1.0, core::Scalar::default())?;
        let out = self.net.forward_single("")?;

        let size = out.mat_size();
        if size.len() != 3 {
            return Err(Error::Detector(format!("unexpected output rank {}", size.len())));
        }

        let shape = (size[0] as usize, size[1] as usize, size[2] as usize);
        let view = ArrayView3::from_shape(shape, out.data_typed::<f32>()?)
            .map_err(|e| Error::Detector(e.to_string()))?;

        let mut batches = self
            .decoder
            .decode(view, INPUT_W, INPUT_H, frame.width(), frame.height());

        Ok(batches.pop().unwrap_or_default())
    }
}
