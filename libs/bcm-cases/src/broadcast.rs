//! Broadcast planner
//!
//! Change detection on the transmit side: remembers the last payload sent
//! per identity and picks which aggregated buckets go out for a cycle.

use serde::Serialize;
use tracing::{debug, trace};

use crate::layout::MAX_UNIQUE_MESSAGES;
use crate::types::{AggregatedMessageBucket, MessageId, Payload};

/// Why a transmit cycle runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastReason {
    /// First cycle after power-up: everything valid goes out
    Startup,
    /// Pattern tick: buckets carrying a pattern
    PatternTick,
    /// Inputs or manual state changed: buckets whose payload changed
    StateChange,
}

#[derive(Debug, Clone)]
pub struct Broadcaster {
    history: Vec<(MessageId, Payload)>,
    capacity: usize,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(MAX_UNIQUE_MESSAGES)
    }
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Last payload transmitted for `id`
    pub fn last_sent(&self, id: MessageId) -> Option<Payload> {
        self.history
            .iter()
            .find(|(sent, _)| *sent == id)
            .map(|(_, payload)| *payload)
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// Mark changed buckets and return the ones to transmit for `reason`
    pub fn plan(
        &mut self,
        reason: BroadcastReason,
        mut buckets: Vec<AggregatedMessageBucket>,
    ) -> Vec<AggregatedMessageBucket> {
        for bucket in &mut buckets {
            bucket.data_changed = self.last_sent(bucket.id) != Some(bucket.payload);
        }

        let selected: Vec<AggregatedMessageBucket> = buckets
            .into_iter()
            .filter(|b| {
                b.valid
                    && match reason {
                        BroadcastReason::Startup => true,
                        BroadcastReason::PatternTick => b.has_pattern,
                        BroadcastReason::StateChange => b.data_changed,
                    }
            })
            .collect();

        for bucket in &selected {
            self.record(bucket.id, bucket.payload);
        }

        if !selected.is_empty() {
            debug!("{:?} broadcast: {} messages", reason, selected.len());
        }
        selected
    }

    fn record(&mut self, id: MessageId, payload: Payload) {
        if let Some(slot) = self.history.iter().position(|(sent, _)| *sent == id) {
            self.history[slot].1 = payload;
        } else if self.history.len() < self.capacity {
            self.history.push((id, payload));
        } else {
            trace!("Broadcast history full, {} not remembered", id);
        }
    }
}
