//! In-flight stream table.
//!
//! Each correlation id owns exactly one accumulator. Leaving `OPEN`
//! (finalize, abandon, idle sweep) removes the entry from the table first,
//! so only one caller can ever produce the terminal response for a stream.
//!
//! The table lock is never held while waiting on an accumulator lock: the
//! idle sweep checks accumulators with the table unlocked and only
//! `try_lock`s them when it re-takes the table to remove entries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::StreamError;
use crate::extraction::rules::ExtractionRules;
use crate::logging::structured::LogContext;
use crate::streaming::accumulator::{
    AssembledResponse, ChunkOutcome, MissingReason, StreamingAccumulator,
};

type Slot = Arc<Mutex<StreamingAccumulator>>;

#[derive(Debug)]
pub struct StreamManager {
    streams: Mutex<HashMap<String, Slot>>,
    idle_timeout: Duration,
}

impl StreamManager {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Open a stream for `correlation_id`.
    pub fn open(
        &self,
        correlation_id: &str,
        provider: Option<&str>,
        rules: Option<&ExtractionRules>,
        started_at: DateTime<Utc>,
    ) -> Result<(), StreamError> {
        let mut streams = self.streams.lock();
        if streams.contains_key(correlation_id) {
            return Err(StreamError::AlreadyOpen(correlation_id.to_string()));
        }
        let accumulator = StreamingAccumulator::new(correlation_id, provider, rules, started_at);
        streams.insert(correlation_id.to_string(), Arc::new(Mutex::new(accumulator)));
        log::debug!(
            "{} STREAM_OPENED provider={} in_flight={}",
            LogContext::new(correlation_id),
            provider.unwrap_or("none"),
            streams.len()
        );
        Ok(())
    }

    fn slot(&self, correlation_id: &str) -> Result<Slot, StreamError> {
        self.streams
            .lock()
            .get(correlation_id)
            .cloned()
            .ok_or_else(|| StreamError::UnknownStream(correlation_id.to_string()))
    }

    fn take(&self, correlation_id: &str) -> Result<Slot, StreamError> {
        self.streams
            .lock()
            .remove(correlation_id)
            .ok_or_else(|| StreamError::UnknownStream(correlation_id.to_string()))
    }

    pub fn add_chunk(
        &self,
        correlation_id: &str,
        raw: &str,
        now: DateTime<Utc>,
    ) -> Result<ChunkOutcome, StreamError> {
        let slot = self.slot(correlation_id)?;
        let mut accumulator = slot.lock();
        accumulator.add_chunk(raw, now)
    }

    pub fn add_payload(
        &self,
        correlation_id: &str,
        payload: Value,
        now: DateTime<Utc>,
    ) -> Result<ChunkOutcome, StreamError> {
        let slot = self.slot(correlation_id)?;
        let mut accumulator = slot.lock();
        accumulator.add_payload(payload, now)
    }

    pub fn finalize(
        &self,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<AssembledResponse, StreamError> {
        let slot = self.take(correlation_id)?;
        let mut accumulator = slot.lock();
        accumulator.finalize(now)
    }

    pub fn abandon(
        &self,
        correlation_id: &str,
        reason: MissingReason,
        now: DateTime<Utc>,
    ) -> Result<AssembledResponse, StreamError> {
        let slot = self.take(correlation_id)?;
        let mut accumulator = slot.lock();
        let response = accumulator.abandon(reason, now)?;
        log::warn!(
            "{} STREAM_ABANDONED reason={} chunks={} idle_ms={}",
            LogContext::new(correlation_id),
            reason.as_str(),
            response.chunk_count,
            (now - accumulator.last_activity()).num_milliseconds()
        );
        Ok(response)
    }

    /// Abandon every stream idle for longer than the configured timeout.
    pub fn sweep_idle(&self, now: DateTime<Utc>) -> Vec<AssembledResponse> {
        let slots: Vec<(String, Slot)> = self
            .streams
            .lock()
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect();

        // Accumulator locks are taken with the table unlocked
        let candidates: Vec<(String, Slot)> = slots
            .into_iter()
            .filter(|(_, slot)| slot.lock().is_idle(now, self.idle_timeout))
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        let expired: Vec<(String, Slot)> = {
            let mut streams = self.streams.lock();
            let ids: Vec<String> = candidates
                .into_iter()
                .filter(|(id, slot)| {
                    // Same stream, and still idle. A busy accumulator is not idle.
                    streams.get(id).is_some_and(|current| Arc::ptr_eq(current, slot))
                        && slot
                            .try_lock()
                            .is_some_and(|acc| acc.is_idle(now, self.idle_timeout))
                })
                .map(|(id, _)| id)
                .collect();
            ids.into_iter()
                .filter_map(|id| streams.remove(&id).map(|slot| (id, slot)))
                .collect()
        };

        expired
            .into_iter()
            .filter_map(|(id, slot)| {
                let mut accumulator = slot.lock();
                match accumulator.abandon(MissingReason::IdleTimeout, now) {
                    Ok(response) => {
                        log::warn!(
                            "{} STREAM_ABANDONED reason=idle_timeout chunks={} idle_ms={}",
                            LogContext::new(&id),
                            response.chunk_count,
                            (now - accumulator.last_activity()).num_milliseconds()
                        );
                        Some(response)
                    }
                    Err(e) => {
                        log::debug!("{} STREAM_SWEEP_SKIPPED error={}", LogContext::new(&id), e);
                        None
                    }
                }
            })
            .collect()
    }

    pub fn contains(&self, correlation_id: &str) -> bool {
        self.streams.lock().contains_key(correlation_id)
    }

    pub fn len(&self) -> usize {
        self.streams.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
