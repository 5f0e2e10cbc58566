//! Active case list
//!
//! A bounded set of armed case instances. Slots past `len` keep whatever a
//! compaction left behind; the legacy OFF-load skip reads that stale tail,
//! so the list is a fixed slot vector plus a live length rather than a
//! plain `Vec` of live entries.

use tracing::{debug, warn};

use crate::layout::{LEGACY_SKIP_INPUTS, MAX_ACTIVE_CASES};
use crate::types::{ActiveCaseInstance, CaseRecord, CaseSide, EntryOwner, MessageId};

/// A message identity captured for a clearing entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearingPair {
    pub id: MessageId,
    pub priority: u8,
}

/// Unique (identity, priority) pairs in first-seen order, keyed on identity
///
/// Stops collecting once `limit` pairs are held.
pub fn collect_clearing_pairs<'a, I>(records: I, limit: usize) -> Vec<ClearingPair>
where
    I: IntoIterator<Item = &'a CaseRecord>,
{
    let mut pairs: Vec<ClearingPair> = Vec::new();
    for record in records {
        if pairs.len() >= limit {
            break;
        }
        if !pairs.iter().any(|p| p.id == record.id) {
            pairs.push(ClearingPair {
                id: record.id,
                priority: record.priority,
            });
        }
    }
    pairs
}

#[derive(Debug, Clone)]
pub struct ActiveCaseList {
    slots: Vec<ActiveCaseInstance>,
    len: usize,
    capacity: usize,
}

impl Default for ActiveCaseList {
    fn default() -> Self {
        Self::new(MAX_ACTIVE_CASES)
    }
}

impl ActiveCaseList {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            len: 0,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    /// Live entries in list order
    pub fn entries(&self) -> &[ActiveCaseInstance] {
        &self.slots[..self.len]
    }

    pub fn get(&self, slot: usize) -> Option<&ActiveCaseInstance> {
        self.entries().get(slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActiveCaseInstance> {
        self.entries().iter()
    }

    /// Append an entry; returns false (and drops it) when full
    pub fn insert(&mut self, entry: ActiveCaseInstance) -> bool {
        if self.is_full() {
            warn!(
                "Active case list full ({}), dropping {} case {} {}",
                self.capacity, entry.owner, entry.case_index, entry.record.id
            );
            return false;
        }
        if self.len < self.slots.len() {
            self.slots[self.len] = entry;
        } else {
            self.slots.push(entry);
        }
        self.len += 1;
        true
    }

    /// Append after stepping over stale slots still holding valid entries
    /// owned by the legacy skip inputs
    ///
    /// Stepped-over slots become live again.
    pub fn insert_after_legacy_skip(&mut self, entry: ActiveCaseInstance) -> bool {
        while self.len < self.capacity
            && self.slots.get(self.len).is_some_and(|stale| {
                stale.record.valid
                    && stale
                        .owner
                        .input()
                        .is_some_and(|input| LEGACY_SKIP_INPUTS.contains(&input))
            })
        {
            debug!("Reviving stale slot {} before OFF case insert", self.len);
            self.len += 1;
        }
        self.insert(entry)
    }

    /// Remove every live entry matching `pred`, keeping order
    ///
    /// Returns the number removed. Slots past the new length are left as-is.
    pub fn remove_where<F>(&mut self, mut pred: F) -> usize
    where
        F: FnMut(&ActiveCaseInstance) -> bool,
    {
        let mut write = 0;
        for read in 0..self.len {
            if !pred(&self.slots[read]) {
                if write != read {
                    self.slots[write] = self.slots[read];
                }
                write += 1;
            }
        }
        let removed = self.len - write;
        self.len = write;
        removed
    }

    pub fn remove_for_input(&mut self, input: u8) -> usize {
        self.remove_where(|e| e.belongs_to(input))
    }

    /// Drop every one-shot entry
    pub fn prune_one_shot(&mut self) -> usize {
        self.remove_where(|e| e.one_shot)
    }

    /// Capture clearing pairs from the live entries matching `filter`
    pub fn clearing_pairs<F>(&self, filter: F, limit: usize) -> Vec<ClearingPair>
    where
        F: Fn(&ActiveCaseInstance) -> bool,
    {
        collect_clearing_pairs(
            self.iter().filter(|e| filter(*e)).map(|e| &e.record),
            limit,
        )
    }

    /// Append one one-shot all-zero entry per pair
    ///
    /// Entry `i` gets case index `i`. Returns how many were inserted.
    pub fn push_clearing(&mut self, owner: EntryOwner, pairs: &[ClearingPair]) -> usize {
        let mut inserted = 0;
        for (i, pair) in pairs.iter().enumerate() {
            let entry = ActiveCaseInstance::one_shot(
                owner,
                i as u8,
                CaseSide::Off,
                CaseRecord::clearing(pair.id, pair.priority),
            );
            if !self.insert(entry) {
                break;
            }
            inserted += 1;
        }
        inserted
    }

    /// Empty the list including the stale tail
    pub fn reset(&mut self) {
        self.slots.clear();
        self.len = 0;
    }
}
