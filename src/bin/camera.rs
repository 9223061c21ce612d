use anyhow::{Context, Result};
use clap::Parser;
use opencv::{
    core::{self, Mat},
    highgui, imgcodecs, imgproc,
    prelude::*,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use zonewatch::capture::{to_mat, OnnxDetector, VideoSource};
use zonewatch::color::color_for;
use zonewatch::detector::YoloDecoderConfig;
use zonewatch::pipeline::check_overlay;
use zonewatch::{Config, CsvSink, Frame, FrameOutcome, FrameSource, Pipeline, Region};

const WINDOW: &str = "zonewatch";

/// Live proximity alerting on a camera or video file
#[derive(Parser, Debug)]
#[command(author, version, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Camera index or video file
    #[arg(short, long)]
    source: Option<String>,

    /// ONNX detector model
    #[arg(short, long)]
    model: Option<PathBuf>,
}

fn scalar(rgb: [u8; 3]) -> core::Scalar {
    core::Scalar::new(rgb[2] as f64, rgb[1] as f64, rgb[0] as f64, 0.0)
}

fn region_rect(region: &Region) -> core::Rect {
    core::Rect::new(
        region.top_left.x,
        region.top_left.y,
        region.width(),
        region.height(),
    )
}

fn draw(
    frame: &mut Mat,
    outcome: &FrameOutcome,
    region: &Region,
    label: &str,
    overlay: Option<&Mat>,
) -> opencv::Result<()> {
    let rect = region_rect(region);

    if let Some(overlay) = overlay {
        let mut roi = Mat::roi(frame, rect)?;
        overlay.copy_to(&mut roi)?;
    }

    imgproc::rectangle(frame, rect, core::Scalar::new(255.0, 0.0, 0.0, 0.0), 2, imgproc::LINE_8, 0)?;
    imgproc::put_text(
        frame,
        label,
        core::Point::new(rect.x, rect.y - 10),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.6,
        core::Scalar::new(255.0, 0.0, 0.0, 0.0),
        2,
        imgproc::LINE_AA,
        false,
    )?;

    for (det, record) in outcome.detections.iter().zip(&outcome.predictions) {
        let color = scalar(color_for(det.class));
        let p = &record.prediction;

        imgproc::rectangle(
            frame,
            core::Rect::new(
                det.x1 as i32,
                det.y1 as i32,
                (det.x2 - det.x1) as i32,
                (det.y2 - det.y1) as i32,
            ),
            color,
            2,
            imgproc::LINE_8,
            0,
        )?;

        imgproc::arrowed_line(
            frame,
            core::Point::new(p.current_x, p.current_y),
            core::Point::new(p.future_x, p.future_y),
            color,
            2,
            imgproc::LINE_8,
            0,
            0.2,
        )?;

        imgproc::circle(
            frame,
            core::Point::new(p.future_x, p.future_y),
            5,
            color,
            imgproc::FILLED,
            imgproc::LINE_8,
            0,
        )?;

        imgproc::put_text(
            frame,
            &format!("{} ({}) {}", det.class_name, det.class, record.key),
            core::Point::new(det.x1 as i32, det.y1 as i32 - 10),
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.5,
            color,
            2,
            imgproc::LINE_AA,
            false,
        )?;
    }

    if !outcome.alerts.is_empty() {
        imgproc::put_text(
            frame,
            "PROXIMITY ALERT",
            core::Point::new(10, 30),
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.9,
            core::Scalar::new(0.0, 0.0, 255.0, 0.0),
            2,
            imgproc::LINE_AA,
            false,
        )?;
    }

    Ok(())
}

fn load_overlay(config: &Config, region: &Region) -> Result<Option<Mat>> {
    let path = match &config.overlay_image {
        Some(path) => path,
        None => return Ok(None),
    };

    check_overlay(Some(path))?;
    let image = imgcodecs::imread(&path.to_string_lossy(), imgcodecs::IMREAD_COLOR)?;

    let mut resized = Mat::default();
    imgproc::resize(
        &image,
        &mut resized,
        core::Size::new(region.width(), region.height()),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )?;

    Ok(Some(resized))
}

/// Draws the outcome on the frame and shows it; false once `q` or escape is pressed.
fn show(frame: &Frame, outcome: &FrameOutcome, region: &Region, label: &str, overlay: Option<&Mat>) -> Result<bool> {
    let pixels = match &frame.pixels {
        Some(pixels) => pixels,
        None => return Ok(true),
    };

    let mut mat = to_mat(pixels)?;
    draw(&mut mat, outcome, region, label, overlay)?;
    highgui::imshow(WINDOW, &mat)?;

    let key = highgui::wait_key(1)?;
    Ok(key != 'q' as i32 && key != 27)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("zonewatch=info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(source) = args.source {
        config.source = source;
    }
    if let Some(model) = args.model {
        config.model_path = model;
    }
    config.validate()?;

    let mut source = VideoSource::open(&config.source)?;
    let mut detector = OnnxDetector::new(
        &config.model_path,
        YoloDecoderConfig::new(config.confidence_threshold, config.class_names.clone()),
    )?;

    let dims = source.dims();
    let fps = config.fps.unwrap_or_else(|| source.fps());
    let sink = CsvSink::create(
        &config.output.predictions,
        &config.output.alerts,
        config.predictor,
    )?;

    let mut pipeline = Pipeline::from_config(&config, dims, fps, sink)?;
    let region = *pipeline.region();
    let label = pipeline.label().to_string();
    let overlay = load_overlay(&config, &region)?;

    highgui::named_window(WINDOW, highgui::WINDOW_AUTOSIZE)?;

    let mut failure = None;
    let summary = pipeline.run(&mut source, &mut detector, |frame, outcome| {
        match show(frame, outcome, &region, &label, overlay.as_ref()) {
            Ok(keep_going) => keep_going,
            Err(err) => {
                warn!("display failed: {}", err);
                failure = Some(err);
                false
            }
        }
    })?;

    pipeline.finish()?;
    highgui::destroy_all_windows()?;

    if let Some(err) = failure {
        return Err(err);
    }

    info!("processed {} frames with {} alerts", summary.frames, summary.alerts);

    Ok(())
}
