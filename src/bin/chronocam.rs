//! chronocam - record a timestamped video stream from a machine-vision camera.
//!
//! Per session this writes, named from the start wall clock:
//! 1. `video_<stamp>.<ext>` — one encoded frame per delivered grab
//! 2. `videolog_<stamp>.csv` — the per-frame timing log
//! 3. `session_<stamp>.json` — machine-readable header + summary
//!
//! Exit code 0 on completion or operator cancellation (Ctrl-C), 1 on a
//! configuration error or fatal device/IO failure.

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use std::fs;
use std::path::PathBuf;

use chronocam::{
    sink, AcquisitionLoop, Camera, CancelToken, CropPreset, ExposureMode, SessionConfig,
};

#[derive(Parser, Debug)]
#[command(
    name = "chronocam",
    version,
    about = "Record a timestamped video stream with a per-frame timing log"
)]
struct Args {
    /// Acquisition frame rate in frames per second (required)
    #[arg(long)]
    fps: Option<f64>,

    /// Number of frames to record; omit for continuous acquisition
    #[arg(long)]
    frames: Option<u64>,

    /// Auto exposure mode
    #[arg(long, value_enum, default_value = "off")]
    autoexposure: ExposureMode,

    /// Absolute exposure time in microseconds; forces auto exposure off
    #[arg(long)]
    exposuretime: Option<f64>,

    /// Crop to a centered 1920x1080 region
    #[arg(long)]
    crop1080: bool,

    /// Crop to a centered 1280x720 region
    #[arg(long, conflicts_with = "crop1080")]
    crop720: bool,

    /// Camera URI: stub://<name>, or a V4L2 device path with the camera-v4l2
    /// feature
    #[arg(long, env = "CHRONOCAM_DEVICE", default_value = "stub://camera")]
    device: String,

    /// Directory for the session artifacts
    #[arg(long, env = "CHRONOCAM_OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let crop = if args.crop1080 {
        CropPreset::Crop1080p
    } else if args.crop720 {
        CropPreset::Crop720p
    } else {
        CropPreset::Native
    };

    // Validation happens before any device interaction; a bad configuration
    // exits with code 1 and leaves no artifacts behind.
    let config = SessionConfig::new(
        args.fps,
        args.frames,
        args.autoexposure,
        args.exposuretime,
        crop,
    )?;

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            log::info!("cancellation requested, finishing current frame");
            cancel.cancel();
        })
        .context("install Ctrl-C handler")?;
    }

    let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("create output directory {}", args.output_dir.display()))?;
    let video_path = args
        .output_dir
        .join(format!("video_{stamp}.{}", sink::default_extension()));
    let log_path = args.output_dir.join(format!("videolog_{stamp}.csv"));
    let sidecar_path = args.output_dir.join(format!("session_{stamp}.json"));

    log::info!(
        "chronocam {} recording from {}",
        env!("CARGO_PKG_VERSION"),
        args.device
    );
    log::info!("video file: {}", video_path.display());
    log::info!("timing log: {}", log_path.display());

    let camera = Camera::open(&args.device)?;
    let session = AcquisitionLoop::new(camera, config, cancel);
    let sink_path = video_path.clone();
    let report = session.run(&log_path, move |resolved| {
        sink::open_default(&sink_path, resolved)
    })?;

    let sidecar = serde_json::json!({
        "header": report.header,
        "summary": report.summary,
        "video": video_path,
        "timing_log": report.log_path,
    });
    fs::write(&sidecar_path, serde_json::to_vec_pretty(&sidecar)?)
        .with_context(|| format!("write session sidecar {}", sidecar_path.display()))?;

    if report.summary.cancelled {
        log::info!("recording cancelled by operator");
    }
    Ok(())
}
