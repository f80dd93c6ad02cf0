use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

mod camera;
mod centerline;
mod config;
mod detector;
mod geometry;
mod mat;
mod motor;
mod obstacle;
mod perception;
mod pid;
mod pipeline;
mod segmentation;

use crate::camera::{FrameSource, NokhwaCamera, SyntheticCamera};
use crate::config::LanePilotConfig;
use crate::detector::{BlobDetector, NullDetector, ObjectDetector};
use crate::motor::LoggingMotorDriver;
use crate::pipeline::DriveAssistPipeline;

#[derive(Parser)]
#[command(name = "lanepilot")]
#[command(about = "Vision-based lane following and obstacle avoidance")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Camera device index
    #[arg(short = 'd', long, default_value = "0")]
    camera_device: u32,

    /// Use the synthetic road scene instead of camera hardware
    #[arg(long)]
    simulate: bool,

    /// Disable obstacle detection, lane keeping only
    #[arg(long)]
    no_detector: bool,

    /// Run a perception throughput benchmark
    #[arg(long)]
    benchmark: bool,

    /// Number of benchmark iterations
    #[arg(long, default_value = "100")]
    benchmark_iterations: usize,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(format!("lanepilot={}", log_level))
        .try_init(); // Use try_init to avoid panic if already initialized

    info!("Starting LanePilot - vision-based lane following");

    let config = LanePilotConfig::load(&args.config).await?;
    info!("Configuration loaded successfully");

    if args.benchmark {
        info!("Starting benchmark mode");
        run_benchmark(&args, config).await?;
        return Ok(());
    }

    run_drive_assist(&args, config).await
}

fn build_frame_source(args: &Args, config: &LanePilotConfig) -> Result<Box<dyn FrameSource>> {
    if args.simulate {
        info!("Using synthetic road scene");
        return Ok(Box::new(SyntheticCamera::new(&config.vision)));
    }

    let mut camera = NokhwaCamera::new(args.camera_device, &config.vision);
    camera.initialize()?;
    Ok(Box::new(camera))
}

fn build_detector(args: &Args) -> Arc<dyn ObjectDetector> {
    if args.no_detector {
        info!("Obstacle detection disabled");
        Arc::new(NullDetector)
    } else {
        Arc::new(BlobDetector::default())
    }
}

async fn run_drive_assist(args: &Args, config: LanePilotConfig) -> Result<()> {
    let frame_source = build_frame_source(args, &config)?;
    let detector = build_detector(args);

    let mut pipeline = DriveAssistPipeline::new(
        config,
        frame_source,
        detector,
        Arc::new(LoggingMotorDriver),
    )?;

    info!("Pipeline initialized, starting main control loop");

    match pipeline.run().await {
        Ok(_) => info!("Pipeline completed successfully"),
        Err(e) => {
            error!("Pipeline error: {}", e);
            return Err(e);
        }
    }

    Ok(())
}

/// Runs the full perception-control cycle over synthetic frames at maximum
/// rate and reports throughput.
async fn run_benchmark(args: &Args, config: LanePilotConfig) -> Result<()> {
    use std::time::Instant;

    info!(
        "Running benchmark with {} iterations",
        args.benchmark_iterations
    );

    let camera = SyntheticCamera::new(&config.vision);
    let mut pipeline = DriveAssistPipeline::new(
        config,
        Box::new(camera),
        Arc::new(BlobDetector::default()),
        Arc::new(LoggingMotorDriver),
    )?;

    let start = Instant::now();
    for i in 0..args.benchmark_iterations {
        pipeline.process_single_frame().await?;
        if (i + 1) % 10 == 0 {
            info!(
                "Benchmark progress: {}/{}",
                i + 1,
                args.benchmark_iterations
            );
        }
    }

    let duration = start.elapsed();
    let fps = args.benchmark_iterations as f64 / duration.as_secs_f64();

    info!("Benchmark completed");
    info!("Performance: {:.2} frames/second", fps);
    info!("Total iterations: {}", args.benchmark_iterations);

    Ok(())
}
