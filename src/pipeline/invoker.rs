//! Detection scheduling.
//!
//! One scheduler task per started pipeline ticks every `interval`. A tick that finds
//! the previous cycle still running is dropped, so at most one inference call is in
//! flight. Each cycle runs as its own task:
//!
//! sample frame -> infer (with timeout) -> classify -> rank -> stats + alerts -> publish
//!
//! Stopping bumps a generation counter; a cycle whose generation is stale when it
//! finishes discards its result instead of publishing it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::config::{ConfigUpdate, ObjectDetectionConfig};
use crate::detect::{
    BackendState, Detection, InferenceBackend, ModelLoader, ModelProvider, RawDetection,
};
use crate::error::{is_backend_fault, DetectError, DetectResult, FrameError};
use crate::frame::{Frame, FrameSampler, FrameSource};
use crate::pipeline::alert::{AlertEvaluator, AlertEvent};
use crate::pipeline::classify::classify_all;
use crate::pipeline::rank::rank;
use crate::pipeline::stats::{DetectionStats, StatsAggregator};

/// Running totals for the scheduler itself.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleCounters {
    pub cycles_published: u64,
    pub ticks_skipped: u64,
    pub inference_failures: u64,
    pub results_discarded: u64,
}

/// Real-time detection pipeline for one video source at a time.
///
/// Dropping the pipeline stops detection.
pub struct DetectionPipeline {
    inner: Arc<Inner>,
}

struct Scheduler {
    shutdown: watch::Sender<bool>,
}

struct Inner {
    config: Arc<Mutex<ObjectDetectionConfig>>,
    loader: ModelLoader,
    sampler: FrameSampler,
    alerts: AlertEvaluator,
    /// Also serializes the generation check with publishing.
    stats: Mutex<StatsAggregator>,
    batch: watch::Sender<Vec<Detection>>,
    busy: AtomicBool,
    generation: AtomicU64,
    load_pending: AtomicBool,
    scheduler: Mutex<Option<Scheduler>>,
    cycles_published: AtomicU64,
    ticks_skipped: AtomicU64,
    inference_failures: AtomicU64,
    results_discarded: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl DetectionPipeline {
    pub fn new(config: ObjectDetectionConfig, provider: Arc<dyn ModelProvider>) -> DetectResult<Self> {
        config.validate()?;
        let config = Arc::new(Mutex::new(config));
        let (batch, _) = watch::channel(Vec::new());
        Ok(Self {
            inner: Arc::new(Inner {
                loader: ModelLoader::new(provider, Arc::clone(&config)),
                config,
                sampler: FrameSampler::new(),
                alerts: AlertEvaluator::new(),
                stats: Mutex::new(StatsAggregator::new()),
                batch,
                busy: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                load_pending: AtomicBool::new(false),
                scheduler: Mutex::new(None),
                cycles_published: AtomicU64::new(0),
                ticks_skipped: AtomicU64::new(0),
                inference_failures: AtomicU64::new(0),
                results_discarded: AtomicU64::new(0),
            }),
        })
    }

    // ---------------- configuration ----------------

    pub fn config(&self) -> ObjectDetectionConfig {
        self.inner.config()
    }

    /// Apply a partial config change. Invalid changes are rejected and leave the
    /// config untouched. Switching `model` drops the loaded backend and restarts any
    /// load in flight so the new model is the first candidate.
    pub fn update_config(&self, update: &ConfigUpdate) -> DetectResult<ObjectDetectionConfig> {
        let (next, model_changed) = {
            let mut current = lock(&self.inner.config);
            let next = update.apply_to(&current)?;
            let model_changed = next.model != current.model;
            *current = next.clone();
            (next, model_changed)
        };
        if model_changed {
            log::info!("model changed to {}; reloading backend", next.model);
            self.inner.loader.invalidate();
        }
        Ok(next)
    }

    /// Flip `enabled`. Returns the new value.
    pub fn toggle_detection(&self) -> bool {
        let mut cfg = lock(&self.inner.config);
        cfg.enabled = !cfg.enabled;
        log::info!("object detection {}", if cfg.enabled { "enabled" } else { "disabled" });
        cfg.enabled
    }

    // ---------------- backend lifecycle ----------------

    pub async fn load(&self) -> bool {
        self.inner.loader.load().await
    }

    pub async fn retry_load(&self) -> bool {
        self.inner.loader.retry_load().await
    }

    pub fn loader(&self) -> &ModelLoader {
        &self.inner.loader
    }

    pub fn backend_state(&self) -> BackendState {
        self.inner.loader.state()
    }

    pub fn subscribe_backend_state(&self) -> watch::Receiver<BackendState> {
        self.inner.loader.subscribe()
    }

    // ---------------- scheduling ----------------

    /// Start sampling `source`. Must be called inside a tokio runtime.
    ///
    /// Returns `false` when detection is already running. Cycles only fire while the
    /// config is enabled and a backend is loaded; an enabled pipeline without a backend
    /// starts loading one.
    pub fn start_detection(&self, source: Arc<dyn FrameSource>) -> bool {
        let mut slot = lock(&self.inner.scheduler);
        if slot.is_some() {
            log::debug!("object detection already running");
            return false;
        }
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let cfg = self.inner.config();
        log::info!(
            "starting object detection with interval {:?}",
            cfg.interval()
        );
        if cfg.enabled && !self.inner.loader.is_loaded() {
            self.inner.ensure_loading();
        }
        tokio::spawn(run_scheduler(
            Arc::clone(&self.inner),
            source,
            generation,
            shutdown_rx,
        ));
        *slot = Some(Scheduler { shutdown });
        true
    }

    /// Stop the timer and publish an empty batch. Idempotent.
    ///
    /// A cycle already in flight is allowed to finish, but its result is discarded.
    pub fn stop_detection(&self) {
        self.inner.stop();
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.scheduler).is_some()
    }

    // ---------------- outputs ----------------

    /// Current ranked batch.
    pub fn detections(&self) -> Vec<Detection> {
        self.inner.batch.borrow().clone()
    }

    pub fn subscribe_detections(&self) -> watch::Receiver<Vec<Detection>> {
        self.inner.batch.subscribe()
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<AlertEvent> {
        self.inner.alerts.subscribe()
    }

    pub fn stats(&self) -> DetectionStats {
        lock(&self.inner.stats).stats().clone()
    }

    /// Zero the statistics without interrupting detection.
    pub fn reset_stats(&self) {
        lock(&self.inner.stats).reset();
        log::info!("detection statistics reset");
    }

    pub fn counters(&self) -> CycleCounters {
        let inner = &self.inner;
        CycleCounters {
            cycles_published: inner.cycles_published.load(Ordering::Relaxed),
            ticks_skipped: inner.ticks_skipped.load(Ordering::Relaxed),
            inference_failures: inner.inference_failures.load(Ordering::Relaxed),
            results_discarded: inner.results_discarded.load(Ordering::Relaxed),
        }
    }
}

impl Drop for DetectionPipeline {
    fn drop(&mut self) {
        self.inner.stop();
    }
}

/// Releases the busy flag when a cycle ends, however it ends.
struct BusyGuard(Arc<Inner>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.busy.store(false, Ordering::Release);
    }
}

async fn run_scheduler(
    inner: Arc<Inner>,
    source: Arc<dyn FrameSource>,
    generation: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut period = inner.config().interval();
    let mut ticker = new_ticker(period);
    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let cfg = inner.config();
                if cfg.interval() != period {
                    period = cfg.interval();
                    log::info!("detection interval changed to {:?}", period);
                    ticker = new_ticker(period);
                }
                inner.on_tick(&source, generation, cfg);
            }
        }
    }
    log::debug!("detection scheduler {} stopped", generation);
}

fn new_ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

impl Inner {
    fn config(&self) -> ObjectDetectionConfig {
        lock(&self.config).clone()
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn stop(&self) {
        let scheduler = lock(&self.scheduler).take();
        {
            let _publish = lock(&self.stats);
            self.generation.fetch_add(1, Ordering::SeqCst);
            self.batch.send_replace(Vec::new());
        }
        if let Some(scheduler) = scheduler {
            scheduler.shutdown.send_replace(true);
            log::info!("object detection stopped");
        }
    }

    fn on_tick(
        self: &Arc<Self>,
        source: &Arc<dyn FrameSource>,
        generation: u64,
        cfg: ObjectDetectionConfig,
    ) {
        if !self.is_current(generation) || !cfg.enabled {
            return;
        }
        if !self.loader.is_loaded() {
            self.ensure_loading();
            return;
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.ticks_skipped.fetch_add(1, Ordering::Relaxed);
            log::debug!("previous detection cycle still running; tick skipped");
            return;
        }

        let guard = BusyGuard(Arc::clone(self));
        let inner = Arc::clone(self);
        let source = Arc::clone(source);
        tokio::spawn(async move {
            let _guard = guard;
            inner.run_cycle(source.as_ref(), generation, &cfg).await;
        });
    }

    async fn run_cycle(&self, source: &dyn FrameSource, generation: u64, cfg: &ObjectDetectionConfig) {
        let frame = match self.sampler.sample(source) {
            Ok(frame) => frame,
            Err(e) if e.downcast_ref::<FrameError>() == Some(&FrameError::NotReady) => return,
            Err(e) => {
                self.fail_cycle(generation, e, cfg);
                return;
            }
        };
        let Some(backend) = self.loader.handle() else {
            return;
        };

        match infer_with_timeout(backend, &frame, cfg.inference_timeout()).await {
            Ok(raw) => {
                let mut batch =
                    classify_all(raw, cfg.threshold, cfg.alert_threshold, frame.captured_at_ms);
                rank(&mut batch);
                self.publish(generation, batch, cfg);
            }
            Err(e) => self.fail_cycle(generation, e, cfg),
        }
    }

    /// Publish a batch unless the cycle was stopped meanwhile.
    fn publish(&self, generation: u64, batch: Vec<Detection>, cfg: &ObjectDetectionConfig) -> bool {
        let mut stats = lock(&self.stats);
        if !self.is_current(generation) {
            self.results_discarded.fetch_add(1, Ordering::Relaxed);
            log::debug!("discarding result of a stopped detection cycle");
            return false;
        }
        stats.update(&batch);
        self.alerts.evaluate(&batch, cfg.enable_alerts);
        self.batch.send_replace(batch);
        self.cycles_published.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn fail_cycle(&self, generation: u64, err: anyhow::Error, cfg: &ObjectDetectionConfig) {
        log::error!("object detection failed: {:#}", err);
        self.inference_failures.fetch_add(1, Ordering::Relaxed);
        let current = self.publish(generation, Vec::new(), cfg);
        // the next enabled tick finds no handle and starts the reload
        if current && is_backend_fault(&err) {
            log::warn!("model error detected, attempting to reload");
            self.loader.invalidate();
        }
    }

    /// Spawn a background load unless one is already pending or loading is terminal.
    fn ensure_loading(self: &Arc<Self>) {
        if self.loader.state().error.is_some() {
            return;
        }
        if self.load_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            if !inner.loader.load().await {
                log::warn!("no inference backend available");
            }
            inner.load_pending.store(false, Ordering::Release);
        });
    }
}

async fn infer_with_timeout(
    backend: Arc<dyn InferenceBackend>,
    frame: &Frame,
    limit: Duration,
) -> anyhow::Result<Vec<RawDetection>> {
    match tokio::time::timeout(limit, backend.infer(frame)).await {
        Ok(result) => {
            result.map_err(|e| DetectError::InferenceFailure(format!("{:#}", e)).into())
        }
        Err(_) => Err(DetectError::InferenceTimeout(limit).into()),
    }
}
