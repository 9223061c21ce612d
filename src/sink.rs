//! Append-only prediction and alert record streams.

use std::fs::File;
use std::path::Path;
use tracing::{error, info};

use crate::error::Error;
use crate::predictor::{PredictionResult, PredictorKind, TrackKey};
use crate::proximity::AlertRecord;

const DEAD_RECKONING_HEADER: [&str; 6] = [
    "timestamp",
    "current_x",
    "current_y",
    "future_x",
    "future_y",
    "class_name",
];

const KALMAN_HEADER: [&str; 5] = ["det_x", "det_y", "pred_x", "pred_y", "class_name"];

const ALERT_HEADER: [&str; 11] = [
    "timestamp",
    "elapsed",
    "class_name",
    "current_x",
    "current_y",
    "future_x",
    "future_y",
    "region_x1",
    "region_y1",
    "region_x2",
    "region_y2",
];

/// One processed detection.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRecord {
    pub timestamp: f64,
    pub key: TrackKey,
    /// Box center as measured this frame.
    pub measured: (i32, i32),
    pub prediction: PredictionResult,
    pub class_name: String,
}

pub trait RecordSink {
    fn prediction(&mut self, record: &PredictionRecord) -> Result<(), Error>;

    fn alert(&mut self, record: &AlertRecord) -> Result<(), Error>;

    fn flush(&mut self) -> Result<(), Error>;
}

impl<S: RecordSink + ?Sized> RecordSink for &mut S {
    fn prediction(&mut self, record: &PredictionRecord) -> Result<(), Error> {
        (**self).prediction(record)
    }

    fn alert(&mut self, record: &AlertRecord) -> Result<(), Error> {
        (**self).alert(record)
    }

    fn flush(&mut self) -> Result<(), Error> {
        (**self).flush()
    }
}

/// Collects records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub predictions: Vec<PredictionRecord>,
    pub alerts: Vec<AlertRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordSink for MemorySink {
    fn prediction(&mut self, record: &PredictionRecord) -> Result<(), Error> {
        self.predictions.push(record.clone());
        Ok(())
    }

    fn alert(&mut self, record: &AlertRecord) -> Result<(), Error> {
        self.alerts.push(record.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// Prediction and alert logs as CSV files.
///
/// Both files are created and get their header row on construction. Buffered rows
/// are flushed by [`RecordSink::flush`] and again when the sink is dropped.
pub struct CsvSink {
    format: PredictorKind,
    predictions: csv::Writer<File>,
    alerts: csv::Writer<File>,
}

impl CsvSink {
    pub fn create(
        predictions: impl AsRef<Path>,
        alerts: impl AsRef<Path>,
        format: PredictorKind,
    ) -> Result<Self, Error> {
        let mut pred_writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(predictions.as_ref())?;
        let mut alert_writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(alerts.as_ref())?;

        match format {
            PredictorKind::DeadReckoning => pred_writer.write_record(DEAD_RECKONING_HEADER)?,
            PredictorKind::Kalman => pred_writer.write_record(KALMAN_HEADER)?,
        }
        alert_writer.write_record(ALERT_HEADER)?;

        info!(
            "logging predictions to {} and alerts to {}",
            predictions.as_ref().display(),
            alerts.as_ref().display()
        );

        Ok(Self {
            format,
            predictions: pred_writer,
            alerts: alert_writer,
        })
    }
}

impl RecordSink for CsvSink {
    fn prediction(&mut self, record: &PredictionRecord) -> Result<(), Error> {
        let p = &record.prediction;

        match self.format {
            PredictorKind::DeadReckoning => self.predictions.write_record(&[
                record.timestamp.to_string(),
                p.current_x.to_string(),
                p.current_y.to_string(),
                p.future_x.to_string(),
                p.future_y.to_string(),
                record.class_name.clone(),
            ])?,
            PredictorKind::Kalman => self.predictions.write_record(&[
                record.measured.0.to_string(),
                record.measured.1.to_string(),
                p.future_x.to_string(),
                p.future_y.to_string(),
                record.class_name.clone(),
            ])?,
        }

        Ok(())
    }

    fn alert(&mut self, record: &AlertRecord) -> Result<(), Error> {
        self.alerts.serialize(record)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Error> {
        self.predictions.flush()?;
        self.alerts.flush()?;
        Ok(())
    }
}

impl Drop for CsvSink {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            error!("failed to flush record logs: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::ClassId;

    fn record() -> PredictionRecord {
        PredictionRecord {
            timestamp: 1.5,
            key: TrackKey::Class(ClassId(5)),
            measured: (120, 110),
            prediction: PredictionResult {
                current_x: 120,
                current_y: 110,
                future_x: 130,
                future_y: 110,
            },
            class_name: "cup".into(),
        }
    }

    fn alert() -> AlertRecord {
        AlertRecord {
            timestamp: 1.5,
            elapsed: 0.5,
            class_name: "cup".into(),
            current_x: 120,
            current_y: 110,
            future_x: 130,
            future_y: 110,
            region_x1: 0,
            region_y1: 0,
            region_x2: 50,
            region_y2: 50,
        }
    }

    #[test]
    fn dead_reckoning_log_layout() {
        let dir = tempfile::tempdir().unwrap();
        let (pred, alerts) = (dir.path().join("pred.csv"), dir.path().join("alerts.csv"));

        {
            let mut sink = CsvSink::create(&pred, &alerts, PredictorKind::DeadReckoning).unwrap();
            sink.prediction(&record()).unwrap();
            sink.alert(&alert()).unwrap();
        }

        let pred = std::fs::read_to_string(pred).unwrap();
        assert_eq!(
            pred,
            "timestamp,current_x,current_y,future_x,future_y,class_name\n1.5,120,110,130,110,cup\n"
        );

        let alerts = std::fs::read_to_string(alerts).unwrap();
        let mut lines = alerts.lines();
        assert_eq!(lines.next(), Some(ALERT_HEADER.join(",").as_str()));
        assert_eq!(lines.next(), Some("1.5,0.5,cup,120,110,130,110,0,0,50,50"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn kalman_log_layout() {
        let dir = tempfile::tempdir().unwrap();
        let (pred, alerts) = (dir.path().join("pred.csv"), dir.path().join("alerts.csv"));

        let mut sink = CsvSink::create(&pred, &alerts, PredictorKind::Kalman).unwrap();
        let mut r = record();
        r.prediction.current_x = 118;
        sink.prediction(&r).unwrap();
        sink.flush().unwrap();

        let pred = std::fs::read_to_string(pred).unwrap();
        assert_eq!(pred, "det_x,det_y,pred_x,pred_y,class_name\n120,110,130,110,cup\n");

        // header is written even when no alert ever fires
        let alerts = std::fs::read_to_string(alerts).unwrap();
        assert_eq!(alerts.lines().count(), 1);
    }

    #[test]
    fn unwritable_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing").join("pred.csv");

        assert!(CsvSink::create(missing, dir.path().join("a.csv"), PredictorKind::Kalman).is_err());
    }
}
