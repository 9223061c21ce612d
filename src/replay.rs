//! Recorded detections, one frame per line: `<timestamp_ms>:<json array of detections>`.

use std::collections::VecDeque;
use std::io::BufRead;
use std::path::Path;
use tracing::info;

use crate::error::Error;
use crate::frame::{Detector, Frame, FrameSource};
use crate::Detection;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedFrame {
    pub timestamp: f64, // in seconds
    pub detections: Vec<Detection>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recording {
    pub frames: Vec<RecordedFrame>,
}

impl Recording {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|err| {
            Error::SourceUnavailable(format!("{}: {}", path.display(), err))
        })?;

        let recording = Self::parse(std::io::BufReader::new(file))?;
        info!("loaded {} recorded frames from {}", recording.frames.len(), path.display());

        Ok(recording)
    }

    /// Blank lines are skipped; any other malformed line is an error.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self, Error> {
        let mut frames = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let err = |reason: String| Error::Replay {
                line: idx + 1,
                reason,
            };

            let (ts, vector) = line
                .split_once(':')
                .ok_or_else(|| err("expected `:`".into()))?;

            let ts: f64 = ts
                .trim()
                .parse()
                .map_err(|e| err(format!("parse timestamp failed: {}", e)))?;

            let detections: Vec<Detection> = serde_json::from_str(vector)
                .map_err(|e| err(format!("parse json failed: {}", e)))?;

            frames.push(RecordedFrame {
                timestamp: ts / 1000.0,
                detections,
            });
        }

        Ok(Self { frames })
    }

    /// Splits into a frame source yielding pixel-less frames and a detector that
    /// hands back each frame's recorded detections.
    pub fn into_parts(self, dims: (u32, u32), fps: f64) -> (ReplaySource, RecordedDetector) {
        let timestamps = self.frames.iter().map(|f| f.timestamp).collect();
        let detections = self.frames.into_iter().map(|f| f.detections).collect();

        (
            ReplaySource {
                dims,
                fps,
                timestamps,
                next_index: 0,
            },
            RecordedDetector { detections },
        )
    }
}

pub struct ReplaySource {
    dims: (u32, u32),
    fps: f64,
    timestamps: VecDeque<f64>,
    next_index: u64,
}

impl FrameSource for ReplaySource {
    fn dims(&self) -> (u32, u32) {
        self.dims
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, Error> {
        Ok(self.timestamps.pop_front().map(|timestamp| {
            let index = self.next_index;
            self.next_index += 1;

            Frame {
                index,
                dims: self.dims,
                timestamp,
                pixels: None,
            }
        }))
    }
}

pub struct RecordedDetector {
    detections: Vec<Vec<Detection>>,
}

impl Detector for RecordedDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Error> {
        usize::try_from(frame.index)
            .ok()
            .and_then(|idx| self.detections.get_mut(idx))
            .map(std::mem::take)
            .ok_or_else(|| Error::Detector(format!("no recorded detections for frame {}", frame.index)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::ClassId;

    const DATA: &str = r#"
0:[{"x1":100,"y1":100,"x2":120,"y2":120,"p":0.9,"c":5,"name":"cup"}]
1000:[{"x1":110,"y1":100,"x2":130,"y2":120,"p":0.8,"c":5,"name":"cup"}]
1500:[]
"#;

    #[test]
    fn parses_frames() {
        let rec = Recording::parse(DATA.as_bytes()).unwrap();

        assert_eq!(rec.frames.len(), 3);
        assert_eq!(rec.frames[1].timestamp, 1.0);
        assert_eq!(rec.frames[1].detections[0].class, ClassId(5));
        assert!(rec.frames[2].detections.is_empty());
    }

    #[test]
    fn reports_bad_line_number() {
        let data = "0:[]\n\n17[]\n";

        match Recording::parse(data.as_bytes()) {
            Err(Error::Replay { line, .. }) => assert_eq!(line, 3),
            other => panic!("unexpected {:?}", other),
        }

        assert!(matches!(
            Recording::parse("x:[]".as_bytes()),
            Err(Error::Replay { line: 1, .. })
        ));
        assert!(matches!(
            Recording::parse("5:{".as_bytes()),
            Err(Error::Replay { line: 1, .. })
        ));
    }

    #[test]
    fn replays_in_order() {
        let (mut source, mut detector) =
            Recording::parse(DATA.as_bytes()).unwrap().into_parts((640, 480), 30.0);

        let mut seen = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            assert!(frame.pixels.is_none());
            seen.push((frame.index, frame.timestamp, detector.detect(&frame).unwrap().len()));
        }

        assert_eq!(seen, vec![(0, 0.0, 1), (1, 1.0, 1), (2, 1.5, 0)]);
    }

    #[test]
    fn missing_file_is_source_error() {
        assert!(matches!(
            Recording::load("/definitely/not/here.dets"),
            Err(Error::SourceUnavailable(_))
        ));
    }
}
