//! Aggregation and override
//!
//! Folds the active list plus relayed messages into one bucket per message
//! identity.
//!
//! Pass 1 builds, per identity, the bits claimed by inputs with an armed
//! pattern. Pass 2 merges in list order: an entry of a flashing input in its
//! off phase contributes zeros, an overridable entry contributes only the
//! bits no pattern claims, anything else contributes its payload. Relayed
//! messages are OR'd in last.

use tracing::trace;

use crate::conditions::{check_conditions, InputState};
use crate::layout::MAX_UNIQUE_MESSAGES;
use crate::pattern::PatternTimerBank;
use crate::relay::RelaySource;
use crate::types::{ActiveCaseInstance, AggregatedMessageBucket, MessageId, Payload};

/// Bucket limits for one aggregation run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationLimits {
    /// Maximum buckets returned
    pub capacity: usize,
    /// Priority for buckets created by a relayed message
    pub relay_priority: u8,
}

impl Default for AggregationLimits {
    fn default() -> Self {
        Self {
            capacity: MAX_UNIQUE_MESSAGES,
            relay_priority: crate::j1939::DEFAULT_PRIORITY,
        }
    }
}

fn or_into(target: &mut Payload, bits: &Payload) {
    for (t, b) in target.iter_mut().zip(bits) {
        *t |= *b;
    }
}

/// Bits claimed by pattern-driven entries, per identity
fn pattern_masks(
    entries: &[ActiveCaseInstance],
    timers: &PatternTimerBank,
) -> Vec<(MessageId, Payload)> {
    let mut masks: Vec<(MessageId, Payload)> = Vec::new();
    for entry in entries.iter().filter(|e| e.record.valid) {
        let patterned = entry
            .owner
            .input()
            .is_some_and(|input| timers.has_pattern(input));
        if !patterned {
            continue;
        }

        let full = masks.len() >= MAX_UNIQUE_MESSAGES;
        match masks.iter_mut().find(|(id, _)| *id == entry.record.id) {
            Some((_, mask)) => or_into(mask, &entry.record.payload),
            None if !full => {
                masks.push((entry.record.id, entry.record.payload));
            },
            None => {},
        }
    }
    masks
}

/// Build the outbound message set
pub fn aggregate<S, R>(
    entries: &[ActiveCaseInstance],
    timers: &PatternTimerBank,
    inputs: &S,
    relay: &R,
    limits: AggregationLimits,
) -> Vec<AggregatedMessageBucket>
where
    S: InputState + ?Sized,
    R: RelaySource + ?Sized,
{
    let mut buckets: Vec<AggregatedMessageBucket> = Vec::with_capacity(limits.capacity);
    if limits.capacity == 0 {
        return buckets;
    }

    let masks = pattern_masks(entries, timers);

    for entry in entries.iter().filter(|e| e.record.valid) {
        let record = &entry.record;

        let has_pattern = entry
            .owner
            .input()
            .is_some_and(|input| timers.has_pattern(input));
        let in_off_phase = has_pattern
            && entry
                .owner
                .input()
                .is_some_and(|input| !timers.is_in_on_phase(input));

        if !check_conditions(&record.must_be_on, &record.must_be_off, inputs) {
            trace!(
                "{} case {} skipped: prerequisites not met",
                entry.owner,
                entry.case_index
            );
            continue;
        }

        let effective: Payload = if in_off_phase {
            [0; 8]
        } else if record.is_overridable() {
            let claimed = masks
                .iter()
                .find(|(id, _)| *id == record.id)
                .map(|(_, mask)| *mask)
                .unwrap_or([0; 8]);
            let mut data = record.payload;
            for (d, m) in data.iter_mut().zip(claimed.iter()) {
                *d &= !*m;
            }
            data
        } else {
            record.payload
        };

        let full = buckets.len() >= limits.capacity;
        match buckets.iter_mut().find(|b| b.id == record.id) {
            Some(bucket) => {
                or_into(&mut bucket.payload, &effective);
                bucket.has_pattern |= has_pattern;
            },
            None if !full => {
                let mut bucket = AggregatedMessageBucket::new(record.priority, record.id, effective);
                bucket.has_pattern = has_pattern;
                buckets.push(bucket);
            },
            None => {
                trace!("Bucket capacity reached, dropping {}", record.id);
            },
        }
    }

    for slot in 0..relay.slot_count() {
        let Some(message) = relay.relayed_message(slot) else {
            continue;
        };
        let full = buckets.len() >= limits.capacity;
        match buckets.iter_mut().find(|b| b.id == message.id) {
            Some(bucket) => or_into(&mut bucket.payload, &message.payload),
            None if !full => {
                buckets.push(AggregatedMessageBucket::new(
                    limits.relay_priority,
                    message.id,
                    message.payload,
                ));
            },
            None => {},
        }
    }

    buckets
}
