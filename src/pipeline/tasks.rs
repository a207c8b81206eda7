//! Background tasks.
//!
//! The idle sweeper abandons stalled streams and forwards their partial
//! events on a channel. The registry refresher reloads the configured
//! bundle. Both stop when the shutdown flag flips to `true`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::events::CanonicalEvent;
use crate::pipeline::normalizer::Normalizer;
use crate::registry::{spawn_refresh_task, FileSource, RegistrySource};
use crate::settings::Settings;

/// Run `sweep_idle` every `interval` until shutdown or until the receiver
/// goes away.
pub fn spawn_idle_sweeper(
    normalizer: Arc<Normalizer>,
    interval: Duration,
    events_tx: mpsc::Sender<CanonicalEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        loop {
            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        log::debug!("IDLE_SWEEPER_STOPPED in_flight={}", normalizer.streams().len());
                        break;
                    }
                }
                _ = ticker.tick() => {
                    for event in normalizer.sweep_idle(Utc::now()) {
                        if events_tx.send(event).await.is_err() {
                            log::warn!("IDLE_SWEEPER_RECEIVER_CLOSED");
                            return;
                        }
                    }
                }
            }
        }
    })
}

/// Start the idle sweeper, and the registry refresher when a bundle path
/// is configured.
pub fn spawn_background_tasks(
    normalizer: &Arc<Normalizer>,
    settings: &Settings,
    events_tx: mpsc::Sender<CanonicalEvent>,
    shutdown_rx: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let mut handles = vec![spawn_idle_sweeper(
        Arc::clone(normalizer),
        settings.sweep_interval(),
        events_tx,
        shutdown_rx.clone(),
    )];

    if let Some(path) = &settings.registry.bundle_path {
        let source: Arc<dyn RegistrySource> = Arc::new(FileSource::new(path));
        log::info!(
            "REGISTRY_REFRESHER_STARTED source={} interval_secs={}",
            source.describe(),
            settings.refresh_interval().as_secs()
        );
        handles.push(spawn_refresh_task(
            Arc::clone(normalizer.registry()),
            source,
            settings.refresh_interval(),
            shutdown_rx,
        ));
    }

    handles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::CapturedRequest;
    use crate::registry::RegistryHandle;
    use serde_json::json;

    #[tokio::test]
    async fn test_sweeper_forwards_abandoned_streams() {
        let mut settings = Settings::default();
        settings.streaming.idle_timeout_ms = 20;
        let registry = Arc::new(RegistryHandle::builtin(Duration::from_secs(3600)).unwrap());
        let normalizer = Arc::new(Normalizer::new(registry, &settings));

        let now = Utc::now();
        let request = CapturedRequest::new("bg-1", now, "api.anthropic.com", "POST", "/v1/messages")
            .with_body(json!({"model": "claude-3-5-sonnet-20241022", "stream": true, "messages": []}));
        normalizer.on_request(&request).unwrap();
        normalizer.begin_stream("bg-1", now).unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_idle_sweeper(Arc::clone(&normalizer), Duration::from_millis(10), tx, shutdown_rx);

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.request_id(), "bg-1");
        assert_eq!(event.to_value().unwrap()["data"]["missing"], "idle_timeout");

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(normalizer.streams().is_empty());
    }

    #[tokio::test]
    async fn test_background_tasks_without_bundle_path() {
        let settings = Settings::default();
        let normalizer = Arc::new(Normalizer::from_settings(&settings).unwrap());
        let (tx, _rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = spawn_background_tasks(&normalizer, &settings, tx, shutdown_rx);
        assert_eq!(handles.len(), 1);
        shutdown_tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
