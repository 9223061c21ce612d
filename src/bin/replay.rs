use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use zonewatch::replay::Recording;
use zonewatch::{Config, CsvSink, Pipeline, PredictorKind};

const DEFAULT_FPS: f64 = 30.0;

/// Runs recorded detections through prediction and proximity alerting
#[derive(Parser, Debug)]
#[command(author, version, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Recorded detections (`<timestamp_ms>:<json>` per line)
    #[arg(short, long)]
    source: Option<String>,

    /// dead_reckoning or kalman
    #[arg(short, long, value_parser = parse_predictor)]
    predictor: Option<PredictorKind>,

    /// Proximity threshold in pixels
    #[arg(long)]
    proximity_threshold: Option<f32>,

    /// Prediction log path
    #[arg(long)]
    predictions: Option<PathBuf>,

    /// Alert log path
    #[arg(long)]
    alerts: Option<PathBuf>,
}

fn parse_predictor(s: &str) -> Result<PredictorKind, String> {
    match s {
        "dead_reckoning" | "dr" => Ok(PredictorKind::DeadReckoning),
        "kalman" => Ok(PredictorKind::Kalman),
        other => Err(format!("unknown predictor `{}`", other)),
    }
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
    if let Some(predictor) = args.predictor {
        config.predictor = predictor;
    }
    if let Some(threshold) = args.proximity_threshold {
        config.proximity_threshold = threshold;
    }
    if let Some(path) = args.predictions {
        config.output.predictions = path;
    }
    if let Some(path) = args.alerts {
        config.output.alerts = path;
    }
    config.validate()?;

    let recording = Recording::load(&config.source)?;
    let dims = (config.frame_size[0], config.frame_size[1]);
    let fps = config.fps.unwrap_or(DEFAULT_FPS);
    let (mut source, mut detector) = recording.into_parts(dims, fps);

    let sink = CsvSink::create(
        &config.output.predictions,
        &config.output.alerts,
        config.predictor,
    )?;

    let mut pipeline = Pipeline::from_config(&config, dims, fps, sink)?;
    let summary = pipeline.run(&mut source, &mut detector, |_, _| true)?;
    pipeline.finish()?;

    info!(
        "replayed {} frames with {} alerts",
        summary.frames, summary.alerts
    );

    Ok(())
}
