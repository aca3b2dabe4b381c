//! Backend lifecycle: load, fallback, retry, invalidate.
//!
//! The loader exclusively owns the single live Backend Handle. Cycles borrow it for
//! one inference call through [`ModelLoader::handle`] and never keep it across cycles.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::watch;

use crate::config::ObjectDetectionConfig;
use crate::detect::backend::{InferenceBackend, ModelProvider};
use crate::error::DetectError;

/// Load status published to status badges.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendState {
    pub loaded: bool,
    pub loading: bool,
    /// Set only once every model failed on every pass. Cleared by `retry_load`.
    pub error: Option<String>,
    /// Position of the loaded model in the configured fallback list (`models`). A
    /// model outside that list reports its position among the pass candidates.
    pub active_model_index: usize,
    pub active_model: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BackendStatus {
    Idle,
    Loading,
    Ready,
    Error,
}

impl BackendState {
    pub fn status(&self) -> BackendStatus {
        if self.error.is_some() {
            BackendStatus::Error
        } else if self.loaded {
            BackendStatus::Ready
        } else if self.loading {
            BackendStatus::Loading
        } else {
            BackendStatus::Idle
        }
    }
}

/// Acquires and owns the inference backend.
pub struct ModelLoader {
    provider: Arc<dyn ModelProvider>,
    config: Arc<Mutex<ObjectDetectionConfig>>,
    handle: Mutex<Option<Arc<dyn InferenceBackend>>>,
    state: watch::Sender<BackendState>,
    /// Completed failed passes since the last success or explicit retry.
    retry_count: AtomicU32,
    /// Bumped whenever the handle is invalidated; stale loads are discarded.
    epoch: AtomicU64,
    load_lock: tokio::sync::Mutex<()>,
}

impl ModelLoader {
    pub fn new(provider: Arc<dyn ModelProvider>, config: Arc<Mutex<ObjectDetectionConfig>>) -> Self {
        let (state, _) = watch::channel(BackendState::default());
        Self {
            provider,
            config,
            handle: Mutex::new(None),
            state,
            retry_count: AtomicU32::new(0),
            epoch: AtomicU64::new(0),
            load_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> BackendState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BackendState> {
        self.state.subscribe()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::SeqCst)
    }

    /// Borrow the live backend for one call.
    pub fn handle(&self) -> Option<Arc<dyn InferenceBackend>> {
        self.handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.handle().is_some()
    }

    /// Load a backend, walking the fallback list with retry passes.
    ///
    /// Returns `true` immediately when a handle already exists, and `false` immediately
    /// while in the terminal error state (see [`ModelLoader::retry_load`]).
    pub async fn load(&self) -> bool {
        if self.is_loaded() {
            return true;
        }
        let _guard = self.load_lock.lock().await;
        if self.is_loaded() {
            return true;
        }
        if self.state.borrow().error.is_some() {
            log::debug!("model load skipped: loader is in terminal error state");
            return false;
        }
        self.run_passes().await
    }

    /// Clear the terminal error, reset the retry counter, and load again.
    pub async fn retry_load(&self) -> bool {
        {
            let _guard = self.load_lock.lock().await;
            self.retry_count.store(0, Ordering::SeqCst);
            self.dispose_handle();
            self.state.send_modify(|s| {
                s.error = None;
                s.loaded = false;
            });
        }
        log::info!("model load retry requested");
        self.load().await
    }

    /// Drop the live handle so the next `load` acquires a fresh one.
    pub fn invalidate(&self) {
        self.dispose_handle();
        self.state.send_modify(|s| {
            s.loaded = false;
            s.active_model = None;
        });
    }

    fn dispose_handle(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let previous = self
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(backend) = previous {
            log::info!("disposed backend {}", backend.name());
        }
    }

    fn config_snapshot(&self) -> ObjectDetectionConfig {
        self.config
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn run_passes(&self) -> bool {
        let mut last_error = String::from("no models configured");
        // Invalidation during a load restarts the pass with a fresh candidate list.
        // Up to `max_retries` restarts are free; after that each one counts as a
        // failed pass.
        let mut free_restarts = 0u32;
        'passes: loop {
            let cfg = self.config_snapshot();
            let candidates = cfg.candidates();
            let pass = self.retry_count() + 1;
            let epoch = self.epoch.load(Ordering::SeqCst);

            for (index, model) in candidates.iter().enumerate() {
                self.state.send_modify(|s| {
                    s.loading = true;
                    s.loaded = false;
                });
                log::info!(
                    "loading model {} ({}/{} in pass {}/{})",
                    model,
                    index + 1,
                    candidates.len(),
                    pass,
                    cfg.max_retries
                );

                let backend = match self.try_load(model, &cfg).await {
                    Ok(backend) => backend,
                    Err(e) => {
                        log::warn!("{}", e);
                        last_error = e.to_string();
                        if index + 1 < candidates.len() {
                            log::info!("trying fallback model {}", candidates[index + 1]);
                        }
                        continue;
                    }
                };

                if self.epoch.load(Ordering::SeqCst) != epoch {
                    log::info!("discarding {}: backend was invalidated during load", model);
                    last_error = format!("{} was invalidated during load", model);
                    if free_restarts < cfg.max_retries {
                        free_restarts += 1;
                        continue 'passes;
                    }
                    break;
                }

                self.install(backend, index, model, &cfg);
                return true;
            }

            let failed = self.retry_count.fetch_add(1, Ordering::SeqCst) + 1;
            if failed >= cfg.max_retries {
                let err = DetectError::ModelsExhausted {
                    passes: failed,
                    last_error: last_error.clone(),
                };
                log::error!("{}", err);
                self.state.send_modify(|s| {
                    s.loading = false;
                    s.loaded = false;
                    s.error = Some(err.to_string());
                });
                return false;
            }

            let delay = cfg.backoff(failed);
            log::info!(
                "all models failed; retrying in {:?} ({}/{})",
                delay,
                failed,
                cfg.max_retries
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn try_load(
        &self,
        model: &str,
        cfg: &ObjectDetectionConfig,
    ) -> Result<Box<dyn InferenceBackend>, DetectError> {
        let backend = tokio::time::timeout(cfg.load_timeout(), self.provider.load(model))
            .await
            .map_err(|_| {
                DetectError::load(model, format!("timed out after {:?}", cfg.load_timeout()))
            })?
            .map_err(|e| DetectError::load(model, format!("{:#}", e)))?;
        backend
            .warm_up()
            .await
            .map_err(|e| DetectError::load(model, format!("warm-up failed: {:#}", e)))?;
        Ok(backend)
    }

    /// `pass_cfg` is the config snapshot the pass started from.
    fn install(
        &self,
        backend: Box<dyn InferenceBackend>,
        candidate: usize,
        model: &str,
        pass_cfg: &ObjectDetectionConfig,
    ) {
        let backend: Arc<dyn InferenceBackend> = Arc::from(backend);
        log::info!("model {} loaded ({})", model, backend.name());
        *self
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(backend);

        // Fallback moves `model`; a user change made since the pass started wins.
        if model != pass_cfg.model {
            let mut cfg = self
                .config
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if cfg.model == pass_cfg.model {
                log::info!("active model switched from {} to {}", cfg.model, model);
                cfg.model = model.to_string();
            }
        }
        let index = pass_cfg.fallback_index(model).unwrap_or(candidate);

        self.retry_count.store(0, Ordering::SeqCst);
        self.state.send_modify(|s| {
            s.loaded = true;
            s.loading = false;
            s.error = None;
            s.active_model_index = index;
            s.active_model = Some(model.to_string());
        });
    }
}
