//! Shared, swappable registry.
//!
//! Readers take an `Arc` of the current snapshot and keep using it for the
//! whole event, so a concurrent refresh never shows them a half-updated
//! registry. Refresh builds a complete new snapshot first, then swaps the
//! pointer under a short write lock.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::RegistryError;
use crate::registry::diff::{compare, RegistryDiff};
use crate::registry::litellm::parse_catalog;
use crate::registry::snapshot::RegistrySnapshot;

/// Somewhere a fresh registry can be loaded from.
pub trait RegistrySource: Send + Sync {
    /// Build a new snapshot. `current` is the snapshot in service, for
    /// sources that only supply part of the registry.
    fn load(&self, current: &RegistrySnapshot) -> Result<RegistrySnapshot, RegistryError>;

    fn describe(&self) -> String;
}

/// A complete registry bundle on disk.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RegistrySource for FileSource {
    fn load(&self, _current: &RegistrySnapshot) -> Result<RegistrySnapshot, RegistryError> {
        RegistrySnapshot::from_file(&self.path)
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

/// A LiteLLM pricing catalog on disk, merged over the current providers.
#[derive(Debug, Clone)]
pub struct LiteLlmSource {
    path: PathBuf,
}

impl LiteLlmSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RegistrySource for LiteLlmSource {
    fn load(&self, current: &RegistrySnapshot) -> Result<RegistrySnapshot, RegistryError> {
        let content = std::fs::read_to_string(&self.path)?;
        let catalog: serde_json::Value = serde_json::from_str(&content)?;
        current.with_models(parse_catalog(&catalog))
    }

    fn describe(&self) -> String {
        format!("litellm:{}", self.path.display())
    }
}

#[derive(Debug, Clone)]
struct RefreshState {
    last_success: DateTime<Utc>,
    last_error: Option<String>,
    consecutive_failures: u32,
}

/// Process-wide registry handle.
#[derive(Debug)]
pub struct RegistryHandle {
    current: RwLock<Arc<RegistrySnapshot>>,
    state: RwLock<RefreshState>,
    max_age: chrono::Duration,
}

impl RegistryHandle {
    pub fn new(snapshot: RegistrySnapshot, max_age: Duration) -> Self {
        let last_success = snapshot.loaded_at();
        Self {
            current: RwLock::new(Arc::new(snapshot)),
            state: RwLock::new(RefreshState {
                last_success,
                last_error: None,
                consecutive_failures: 0,
            }),
            max_age: chrono::Duration::from_std(max_age)
                .unwrap_or_else(|_| chrono::Duration::days(36_500)),
        }
    }

    /// Handle over the built-in bundle.
    pub fn builtin(max_age: Duration) -> Result<Self, RegistryError> {
        Ok(Self::new(RegistrySnapshot::builtin()?, max_age))
    }

    /// The snapshot in service. Hold on to it for the duration of one event.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.read().clone()
    }

    /// Replace the snapshot in service, returning what changed.
    pub fn swap(&self, next: RegistrySnapshot) -> RegistryDiff {
        let next = Arc::new(next);
        let previous = {
            let mut current = self.current.write();
            std::mem::replace(&mut *current, Arc::clone(&next))
        };

        {
            let mut state = self.state.write();
            state.last_success = Utc::now();
            state.last_error = None;
            state.consecutive_failures = 0;
        }

        let diff = compare(previous.models(), next.models());
        log::info!(
            "REGISTRY_SWAPPED bundle_version={} models={} added={} removed={} repriced={}",
            next.bundle_version().unwrap_or("none"),
            next.model_count(),
            diff.added.len(),
            diff.removed.len(),
            diff.pricing_changes.len()
        );
        if !diff.is_empty() {
            log::debug!("REGISTRY_DIFF\n{}", diff);
        }
        diff
    }

    /// Load from `source` and swap on success. On failure the current
    /// snapshot stays in service.
    pub fn refresh_from(&self, source: &dyn RegistrySource) -> Result<RegistryDiff, RegistryError> {
        let current = self.snapshot();
        match source.load(&current) {
            Ok(next) => Ok(self.swap(next)),
            Err(e) => {
                let failures = {
                    let mut state = self.state.write();
                    state.last_error = Some(e.to_string());
                    state.consecutive_failures += 1;
                    state.consecutive_failures
                };
                log::warn!(
                    "REGISTRY_REFRESH_FAILED source={} consecutive_failures={} error={}",
                    source.describe(),
                    failures,
                    e
                );
                Err(e)
            }
        }
    }

    /// Whether the snapshot in service is older than the configured max age.
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        now - self.state.read().last_success > self.max_age
    }

    pub fn is_stale(&self) -> bool {
        self.is_stale_at(Utc::now())
    }

    pub fn last_success(&self) -> DateTime<Utc> {
        self.state.read().last_success
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.read().last_error.clone()
    }
}

/// Refresh `handle` from `source` every `interval` until shutdown.
pub fn spawn_refresh_task(
    handle: Arc<RegistryHandle>,
    source: Arc<dyn RegistrySource>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        // The first tick completes immediately; the initial snapshot is already loaded
        ticker.tick().await;
        loop {
            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        log::debug!("REGISTRY_REFRESHER_STOPPED");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let handle = Arc::clone(&handle);
                    let source = Arc::clone(&source);
                    let result = tokio::task::spawn_blocking(move || {
                        handle.refresh_from(source.as_ref()).map(|_| ())
                    })
                    .await;
                    if let Err(e) = result {
                        log::warn!("REGISTRY_REFRESH_TASK_FAILED error={}", e);
                    }
                }
            }
        }
    })
}
