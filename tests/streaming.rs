//! Stream lifecycle under the manager: reassembly, split frames,
//! abandonment and concurrent access.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;

use oisp_normalize::error::StreamError;
use oisp_normalize::events::Completeness;
use oisp_normalize::registry::RegistrySnapshot;
use oisp_normalize::streaming::{MissingReason, StreamManager, StreamState};

fn t(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_720_000_000, 0).unwrap() + chrono::Duration::milliseconds(ms)
}

#[test]
fn test_reference_chunk_sequence() {
    let manager = StreamManager::new(Duration::from_secs(30));
    manager.open("ref", None, None, t(0)).unwrap();
    manager.add_payload("ref", json!({"content": "He"}), t(10)).unwrap();
    manager.add_payload("ref", json!({"content": "llo"}), t(20)).unwrap();
    manager
        .add_payload(
            "ref",
            json!({"finish_reason": "stop", "usage": {"prompt_tokens": 7, "completion_tokens": 2}}),
            t(30),
        )
        .unwrap();

    let response = manager.finalize("ref", t(40)).unwrap();
    assert_eq!(response.content.as_deref(), Some("Hello"));
    assert_eq!(response.finish_reason.as_deref(), Some("stop"));
    assert_eq!(response.usage.prompt_tokens, Some(7));
    assert_eq!(response.usage.completion_tokens, Some(2));
    assert_eq!(response.state, StreamState::Finalized);
}

#[test]
fn test_frames_split_at_arbitrary_boundaries() {
    let registry = RegistrySnapshot::builtin().unwrap();
    let rules = registry.provider("openai").map(|p| &p.extraction);
    let stream = "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n\
                  data: {\"choices\":[{\"delta\":{\"content\":\"lo, \"}}]}\n\n\
                  data: {\"choices\":[{\"delta\":{\"content\":\"world\"},\"finish_reason\":\"stop\"}]}\n\n\
                  data: [DONE]\n\n";

    for split in [1usize, 3, 7, 16, 64] {
        let manager = StreamManager::new(Duration::from_secs(30));
        manager.open("split", Some("openai"), rules, t(0)).unwrap();
        let bytes: Vec<char> = stream.chars().collect();
        for (i, piece) in bytes.chunks(split).enumerate() {
            let piece: String = piece.iter().collect();
            manager.add_chunk("split", &piece, t(i as i64)).unwrap();
        }
        let response = manager.finalize("split", t(10_000)).unwrap();
        assert_eq!(response.content.as_deref(), Some("Hello, world"), "split={}", split);
        assert_eq!(response.chunk_count, 3, "split={}", split);
        assert_eq!(response.malformed_chunks, 0, "split={}", split);
        assert!(response.done_received);
    }
}

#[test]
fn test_ollama_ndjson_stream() {
    let registry = RegistrySnapshot::builtin().unwrap();
    let rules = registry.provider("ollama").map(|p| &p.extraction);
    let manager = StreamManager::new(Duration::from_secs(30));
    manager.open("nd", Some("ollama"), rules, t(0)).unwrap();
    manager
        .add_chunk(
            "nd",
            "{\"model\":\"llama3.1\",\"message\":{\"role\":\"assistant\",\"content\":\"Hi\"},\"done\":false}\n\
             {\"model\":\"llama3.1\",\"message\":{\"role\":\"assistant\",\"content\":\"!\"},\"done\":true,\"done_reason\":\"stop\",\"prompt_eval_count\":26,\"eval_count\":2}\n",
            t(5),
        )
        .unwrap();
    let response = manager.finalize("nd", t(6)).unwrap();
    assert_eq!(response.content.as_deref(), Some("Hi!"));
    assert_eq!(response.finish_reason.as_deref(), Some("stop"));
    assert_eq!(response.model.as_deref(), Some("llama3.1"));
    assert_eq!(response.usage.prompt_tokens, Some(26));
    assert_eq!(response.usage.completion_tokens, Some(2));
}

#[test]
fn test_idle_stream_abandoned_exactly_once_under_contention() {
    let manager = Arc::new(StreamManager::new(Duration::from_millis(100)));
    manager.open("idle", None, None, t(0)).unwrap();
    manager.add_payload("idle", json!({"content": "par"}), t(10)).unwrap();

    let barrier = Arc::new(Barrier::new(6));
    let terminal = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..6)
        .map(|i| {
            let manager = Arc::clone(&manager);
            let barrier = Arc::clone(&barrier);
            let terminal = Arc::clone(&terminal);
            std::thread::spawn(move || {
                barrier.wait();
                let produced = match i % 3 {
                    0 => manager.sweep_idle(t(1_000)).len(),
                    1 => manager
                        .abandon("idle", MissingReason::ClientDisconnect, t(1_000))
                        .map(|_| 1)
                        .unwrap_or(0),
                    _ => manager.finalize("idle", t(1_000)).map(|_| 1).unwrap_or(0),
                };
                terminal.fetch_add(produced, Ordering::SeqCst);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(terminal.load(Ordering::SeqCst), 1);
    assert!(manager.is_empty());
}

#[test]
fn test_abandoned_stream_is_partial() {
    let manager = StreamManager::new(Duration::from_millis(100));
    manager.open("p", None, None, t(0)).unwrap();
    manager.add_payload("p", json!({"content": "half"}), t(10)).unwrap();

    assert!(manager.sweep_idle(t(50)).is_empty());
    let abandoned = manager.sweep_idle(t(500));
    assert_eq!(abandoned.len(), 1);
    let response = &abandoned[0];
    assert_eq!(response.state, StreamState::Abandoned);
    assert_eq!(response.completeness, Completeness::Partial);
    assert_eq!(response.missing, Some(MissingReason::IdleTimeout));
    assert_eq!(response.content.as_deref(), Some("half"));
    assert_eq!(response.latency_ms, 500);

    assert_eq!(
        manager.add_payload("p", json!({"content": "late"}), t(600)),
        Err(StreamError::UnknownStream("p".to_string()))
    );
}

#[test]
fn test_many_concurrent_streams_do_not_interfere() {
    let manager = Arc::new(StreamManager::new(Duration::from_secs(30)));
    let handles: Vec<_> = (0..16)
        .map(|i| {
            let manager = Arc::clone(&manager);
            std::thread::spawn(move || {
                let id = format!("stream-{}", i);
                manager.open(&id, None, None, t(0)).unwrap();
                for n in 0..20 {
                    manager
                        .add_chunk(&id, &format!("data: {{\"content\":\"{}\"}}\n\n", i), t(n))
                        .unwrap();
                }
                (i, manager.finalize(&id, t(100)).unwrap())
            })
        })
        .collect();

    for handle in handles {
        let (i, response) = handle.join().unwrap();
        assert_eq!(response.content, Some(i.to_string().repeat(20)));
        assert_eq!(response.chunk_count, 20);
    }
    assert!(manager.is_empty());
}
