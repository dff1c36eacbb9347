//! Custom test assertions for integration tests

use export_chunker::{Event, RunSummary};
use serde_json::Value;
use tokio::sync::broadcast;

/// Read every record of every chunk, in chunk order
pub fn read_all_records(summary: &RunSummary) -> Vec<Value> {
    summary
        .chunks
        .iter()
        .flat_map(|chunk| {
            let content = std::fs::read_to_string(&chunk.path).unwrap();
            serde_json::from_str::<Vec<Value>>(&content).unwrap()
        })
        .collect()
}

/// Check the chunk-size and record-count invariants of a finished run
pub fn assert_chunk_layout(summary: &RunSummary, max_per_chunk: u64, max_total: u64) {
    let sum: u64 = summary.chunks.iter().map(|c| c.record_count).sum();
    assert_eq!(sum, summary.total_records, "chunk counts must add up");
    assert!(summary.total_records <= max_total, "cap exceeded");

    if let Some((last, full)) = summary.chunks.split_last() {
        for chunk in full {
            assert_eq!(chunk.record_count, max_per_chunk, "non-final chunk not full");
        }
        assert!(last.record_count >= 1 && last.record_count <= max_per_chunk);
    }
}

/// Drain every event currently buffered on a receiver
pub fn drain_events(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}
