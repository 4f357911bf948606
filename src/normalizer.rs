//! Telemetry normalization
//!
//! Prepares one session's inbound batch for tracker dispatch:
//! - invalid events are rejected individually, never the whole batch
//! - exact retransmits (same signal_type + session_time) are dropped
//! - survivors are sorted by session_time, server arrival time as tie-break
//!
//! Late arrivals are NOT filtered here; trackers handle them as history
//! corrections, which keeps ingestion idempotent under client-side
//! batching, polling, and retransmission.

use log::warn;
use std::collections::HashSet;

use crate::types::{RejectedEvent, SignalType, TelemetryEvent};

/// Dedup key for one session: exact retransmits share a bit pattern
pub type SeenSamples = HashSet<(SignalType, u64)>;

/// A batch ready for tracker dispatch
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    /// Validated, deduplicated, time-ordered events
    pub events: Vec<TelemetryEvent>,
    pub rejected: Vec<RejectedEvent>,
    pub duplicates: usize,
}

/// Normalizer for inbound telemetry batches
pub struct Normalizer;

impl Normalizer {
    /// Normalize a batch against the session's dedup history
    pub fn normalize(events: Vec<TelemetryEvent>, seen: &mut SeenSamples) -> NormalizedBatch {
        let mut batch = NormalizedBatch::default();

        for (index, event) in events.into_iter().enumerate() {
            if let Err(e) = event.validate() {
                warn!(
                    "rejected event {} for session {}: {}",
                    index, event.session_id, e
                );
                batch.rejected.push(RejectedEvent {
                    index,
                    signal_type: event.signal_type,
                    reason: e.to_string(),
                });
                continue;
            }

            // session_time is finite after validation, so the bit pattern
            // is a stable identity for exact retransmits
            if !seen.insert((event.signal_type, event.session_time.to_bits())) {
                batch.duplicates += 1;
                continue;
            }

            batch.events.push(event);
        }

        batch
            .events
            .sort_by(|a, b| {
                a.session_time
                    .total_cmp(&b.session_time)
                    .then_with(|| a.received_at.cmp(&b.received_at))
            });

        batch
    }
}
