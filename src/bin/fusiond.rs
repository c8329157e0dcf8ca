//! fusiond - UAV detection fusion daemon
//!
//! This daemon:
//! 1. Loads settings (file named by FIRE_UAV_SETTINGS plus FIRE_* overrides)
//! 2. Builds the detection pipeline with the configured sinks
//! 3. Optionally replays newline-delimited DetectionBatch JSON through it
//! 4. Serves the loopback REST API until Ctrl-C

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use uav_geofusion::{
    api::{ApiConfig, ApiServer},
    DetectionBatch, DetectionPipeline, FusionConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "UAV detection fusion daemon")]
struct Args {
    /// Settings file (.toml or .json).
    #[arg(long, env = "FIRE_UAV_SETTINGS", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Replay newline-delimited detection batches from this file.
    #[arg(long, value_name = "NDJSON")]
    replay: Option<PathBuf>,

    /// Delay between replayed batches.
    #[arg(long, default_value_t = 0)]
    replay_interval_ms: u64,

    /// Do not start the REST API; exit once the replay finishes.
    #[arg(long)]
    no_api: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = FusionConfig::load_from(args.config.as_deref())?;
    let pipeline = Arc::new(DetectionPipeline::from_config(&cfg)?);
    log::info!(
        "fusiond v{} ready (projector={}, votes {}/{} frames, notifications in {})",
        env!("CARGO_PKG_VERSION"),
        pipeline.projector_name(),
        cfg.aggregator.votes_required,
        cfg.aggregator.window,
        cfg.notifications_dir.display()
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel();
    let shutdown_signal = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_signal.store(true, Ordering::SeqCst);
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let api_handle = if args.no_api {
        None
    } else {
        let handle = ApiServer::new(ApiConfig::from(&cfg), pipeline.clone()).spawn()?;
        if let Some(path) = &handle.token_path {
            log::info!("fusion api capability token written to {}", path.display());
        } else {
            log::warn!(
                "fusion api capability token (handle securely): {}",
                handle.token
            );
        }
        Some(handle)
    };

    if let Some(path) = &args.replay {
        let interval = Duration::from_millis(args.replay_interval_ms);
        replay(path, &pipeline, interval, &shutdown)?;
    }

    if let Some(handle) = api_handle {
        if !shutdown.load(Ordering::SeqCst) {
            log::info!("fusiond waiting for shutdown signal (Ctrl-C)...");
            let _ = rx.recv();
        }
        log::info!("shutdown signal received, stopping API server...");
        handle.stop()?;
    }

    let objects = pipeline.objects()?;
    log::info!("fusiond stopped; {} objects registered", objects.len());
    Ok(())
}

fn replay(
    path: &Path,
    pipeline: &DetectionPipeline,
    interval: Duration,
    shutdown: &AtomicBool,
) -> Result<()> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open replay file {}", path.display()))?;
    let mut batches = 0u64;
    let mut confirmed = 0usize;
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        if shutdown.load(Ordering::SeqCst) {
            log::info!("replay interrupted after {} batches", batches);
            break;
        }
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let batch: DetectionBatch = match serde_json::from_str(&line) {
            Ok(batch) => batch,
            Err(e) => {
                log::warn!("replay line {}: invalid batch: {}", idx + 1, e);
                continue;
            }
        };
        if let Err(e) = batch.validate() {
            log::warn!("replay line {}: {}", idx + 1, e);
            continue;
        }
        let out = pipeline.process_batch(&batch)?;
        for det in &out {
            log::info!(
                "frame {}: confirmed {} class={} conf={:.2} lat={:.6} lon={:.6}",
                batch.frame_id,
                det.object_id.as_deref().unwrap_or("-"),
                det.class_id,
                det.confidence,
                det.lat,
                det.lon
            );
        }
        batches += 1;
        confirmed += out.len();
        if !interval.is_zero() {
            std::thread::sleep(interval);
        }
    }
    log::info!(
        "replay of {} finished: {} batches, {} confirmations",
        path.display(),
        batches,
        confirmed
    );
    Ok(())
}
