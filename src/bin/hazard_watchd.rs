//! hazard-watchd - safety detection daemon
//!
//! This daemon:
//! 1. Loads detection config from file + environment
//! 2. Loads a model through the provider registry, with fallback and retry
//! 3. Runs the detection pipeline against the configured source
//! 4. Logs ranked batches, safety alerts, and periodic statistics
//! 5. Stops cleanly on Ctrl-C or after `--seconds`

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

use hazard_watch::{
    detect::StubProvider,
    ingest::{SyntheticConfig, SyntheticSource},
    pipeline::{to_pixel_rect, OverlaySummary},
    DaemonConfig, Detection, DetectionPipeline, ProviderRegistry,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Real-time safety detection over a live camera feed"
)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "HAZARD_WATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Source URL override.
    #[arg(long)]
    source: Option<String>,

    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long)]
    seconds: Option<u64>,

    /// Seconds between statistics log lines.
    #[arg(long, default_value_t = 10)]
    stats_every: u64,

    /// Print batches and final statistics as JSON lines on stdout.
    #[arg(long)]
    json: bool,

    /// Simulated inference latency for stub models, in milliseconds.
    #[arg(long, default_value_t = 50)]
    stub_latency_ms: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = DaemonConfig::load_from(args.config.as_deref())?;
    if let Some(url) = &args.source {
        cfg.source.url = url.clone();
    }
    // The daemon exists to detect.
    cfg.detection.enabled = true;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(args, cfg))
}

async fn run(args: Args, cfg: DaemonConfig) -> Result<()> {
    let (stop_tx, mut stop_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        stop_tx.send_replace(true);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let mut registry = ProviderRegistry::new();
    registry.register(
        StubProvider::new().with_infer_latency(Duration::from_millis(args.stub_latency_ms)),
    );
    #[cfg(feature = "backend-tract")]
    registry.register(hazard_watch::detect::TractProvider::new(
        cfg.source.width,
        cfg.source.height,
    ));
    log::info!("model providers: {}", registry.list().join(", "));

    let source = Arc::new(SyntheticSource::new(SyntheticConfig {
        url: cfg.source.url.clone(),
        width: cfg.source.width,
        height: cfg.source.height,
        warmup_polls: 2,
    })?);

    let pipeline = DetectionPipeline::new(cfg.detection.clone(), Arc::new(registry))?;
    log::info!(
        "hazard-watchd starting. source={} models={}",
        cfg.source.url,
        cfg.detection.candidates().join(",")
    );
    if !pipeline.load().await {
        let state = pipeline.backend_state();
        return Err(anyhow!(
            "no detection model available: {}",
            state.error.unwrap_or_else(|| "unknown error".to_string())
        ));
    }

    let alert_task = tokio::spawn(log_alerts(pipeline.subscribe_alerts()));
    let mut batches = pipeline.subscribe_detections();
    pipeline.start_detection(source.clone());

    let mut stats_tick = tokio::time::interval(Duration::from_secs(args.stats_every.max(1)));
    stats_tick.tick().await;
    let deadline = args.seconds.map(Duration::from_secs);
    let until = async {
        match deadline {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(until);

    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                log::info!("shutdown signal received");
                break;
            }
            _ = &mut until => {
                log::info!("run time elapsed");
                break;
            }
            changed = batches.changed() => {
                if changed.is_err() {
                    break;
                }
                let batch = batches.borrow_and_update().clone();
                report_batch(&batch, &cfg, args.json)?;
            }
            _ = stats_tick.tick() => {
                let stats = pipeline.stats();
                let src = source.stats();
                log::info!(
                    "stats: total={} high={} avg_conf={:.2} rate={:.2}/s frames={} url={}",
                    stats.total_detections,
                    stats.high_priority_count,
                    stats.average_confidence,
                    stats.detection_rate,
                    src.frames_captured,
                    src.url
                );
            }
        }
    }

    pipeline.stop_detection();
    alert_task.abort();

    let stats = pipeline.stats();
    let counters = pipeline.counters();
    if args.json {
        println!(
            "{}",
            serde_json::json!({ "stats": stats, "counters": counters })
        );
    }
    log::info!(
        "hazard-watchd stopped. cycles={} skipped={} failures={} detections={}",
        counters.cycles_published,
        counters.ticks_skipped,
        counters.inference_failures,
        stats.total_detections
    );
    Ok(())
}

fn report_batch(batch: &[Detection], cfg: &DaemonConfig, json: bool) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    if json {
        println!("{}", serde_json::to_string(batch)?);
        return Ok(());
    }
    let summary = OverlaySummary::from_batch(batch);
    log::info!(
        "batch: {} objects, {} safety alerts",
        summary.objects,
        summary.safety_alerts
    );
    let (w, h) = (cfg.source.width as f32, cfg.source.height as f32);
    for det in batch {
        let rect = to_pixel_rect(&det.bbox, w, h);
        log::debug!(
            "  {:?} {} {:.0}% at ({:.0},{:.0}) {:.0}x{:.0}",
            det.priority,
            det.label,
            det.score * 100.0,
            rect.left,
            rect.top,
            rect.width,
            rect.height
        );
    }
    Ok(())
}

async fn log_alerts(mut alerts: broadcast::Receiver<hazard_watch::AlertEvent>) {
    loop {
        match alerts.recv().await {
            Ok(event) => {
                let labels: Vec<&str> = event.detections.iter().map(|d| d.label.as_str()).collect();
                log::warn!("safety alert at {}: {}", event.timestamp, labels.join(", "));
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                log::warn!("alert log fell behind; {} alerts dropped", missed);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
