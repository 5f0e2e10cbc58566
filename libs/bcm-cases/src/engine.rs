//! Case engine - owns the active list, pattern timers and relay table
//!
//! Input transitions load or retract cases; `aggregate` folds the current
//! state into outbound buckets; the caller transmits and then calls
//! `prune_one_shot_entries`. The engine is single-threaded; wrap it in one
//! lock when shared.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::active::{ActiveCaseList, ClearingPair};
use crate::aggregate::{aggregate, AggregationLimits};
use crate::conditions::InputState;
use crate::config::EngineConfig;
use crate::error::{CaseError, Result};
use crate::layout::{loadable_case_count, MAX_ON_CASES_PER_INPUT};
use crate::pattern::{PatternTimer, PatternTimerBank};
use crate::relay::{RelaySource, RelayTable};
use crate::store::{CaseStorage, CaseStore};
use crate::types::{
    ActiveCaseInstance, AggregatedMessageBucket, CaseRecord, CaseSide, EntryOwner,
};

/// Read-only counters for diagnostics screens and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Diagnostics {
    pub store_reads: u32,
    pub bounds_errors: u32,
    pub active_entries: usize,
    pub armed_patterns: usize,
    pub relay_slots_used: usize,
    pub relay_received: u32,
    pub relay_processed: u32,
    pub relay_last_id: u32,
}

/// Owner and case index of one active slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActiveEntryInfo {
    pub owner: EntryOwner,
    pub case_index: u8,
    pub side: CaseSide,
    pub one_shot: bool,
}

pub struct CaseEngine<S> {
    pub(crate) store: CaseStore<S>,
    pub(crate) active: ActiveCaseList,
    pub(crate) timers: PatternTimerBank,
    relay: RelayTable,
    limits: AggregationLimits,
}

impl<S: CaseStorage> CaseEngine<S> {
    pub fn new(storage: S, config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store: CaseStore::new(storage),
            active: ActiveCaseList::new(config.active_capacity),
            timers: PatternTimerBank::new(),
            relay: RelayTable::new(),
            limits: config.aggregation_limits(),
        })
    }

    /// Engine with the default limits
    pub fn with_defaults(storage: S) -> Self {
        Self {
            store: CaseStore::new(storage),
            active: ActiveCaseList::default(),
            timers: PatternTimerBank::new(),
            relay: RelayTable::new(),
            limits: AggregationLimits::default(),
        }
    }

    pub fn store(&self) -> &CaseStore<S> {
        &self.store
    }

    pub fn active(&self) -> &ActiveCaseList {
        &self.active
    }

    pub fn timers(&self) -> &PatternTimerBank {
        &self.timers
    }

    pub fn relay(&self) -> &RelayTable {
        &self.relay
    }

    pub fn relay_mut(&mut self) -> &mut RelayTable {
        &mut self.relay
    }

    // ========================================================================
    // Input transitions
    // ========================================================================

    /// Apply a debounced input edge
    pub fn on_input_transition(&mut self, input: u8, activated: bool) -> Result<()> {
        self.store.check_input(input)?;
        if activated {
            self.activate(input);
        } else {
            self.deactivate(input);
        }
        Ok(())
    }

    fn load_configured(&self, input: u8, case_index: u8, side: CaseSide) -> Option<CaseRecord> {
        match self.store.read_case(input, case_index, side) {
            Ok(record) if record.valid => Some(record),
            Ok(_) => {
                debug!("IN{:02} {} case {} not configured", input + 1, side, case_index);
                None
            },
            Err(e) => {
                warn!("IN{:02} {} case {}: {}", input + 1, side, case_index, e);
                None
            },
        }
    }

    fn activate(&mut self, input: u8) {
        let captured = self
            .active
            .clearing_pairs(|e| e.belongs_to(input), MAX_ON_CASES_PER_INPUT);
        self.active.remove_for_input(input);

        let staged: Vec<(u8, CaseRecord)> = (0..loadable_case_count(input, CaseSide::On))
            .filter_map(|i| self.load_configured(input, i, CaseSide::On).map(|r| (i, r)))
            .collect();

        // Identities the new ON cases no longer drive get an explicit zero
        let stale: Vec<ClearingPair> = captured
            .into_iter()
            .filter(|pair| !staged.iter().any(|(_, r)| r.id == pair.id))
            .collect();
        self.active.push_clearing(EntryOwner::Input(input), &stale);

        let mut pattern = None;
        let mut loaded = 0;
        for (case_index, record) in staged {
            if !self
                .active
                .insert(ActiveCaseInstance::persistent(input, case_index, record))
            {
                break;
            }
            loaded += 1;
            if case_index == 0 && record.has_pattern_timing() {
                pattern = Some((record.pattern_on, record.pattern_off));
            }
        }

        match pattern {
            Some((on, off)) => self.timers.arm(input, on, off),
            None => self.timers.disarm(input),
        }

        info!(
            "IN{:02} on: {} cases loaded, {} cleared{}",
            input + 1,
            loaded,
            stale.len(),
            pattern
                .map(|(on, off)| format!(", pattern {}/{}", on, off))
                .unwrap_or_default()
        );
    }

    fn deactivate(&mut self, input: u8) {
        self.timers.disarm(input);

        let pairs = self.active.clearing_pairs(
            |e| e.belongs_to(input) && e.side == CaseSide::On,
            MAX_ON_CASES_PER_INPUT,
        );
        self.active.remove_for_input(input);
        self.active.push_clearing(EntryOwner::Input(input), &pairs);

        let mut loaded = 0;
        for case_index in 0..loadable_case_count(input, CaseSide::Off) {
            if self.active.is_full() {
                break;
            }
            let Some(record) = self.load_configured(input, case_index, CaseSide::Off) else {
                continue;
            };
            let entry =
                ActiveCaseInstance::one_shot(EntryOwner::Input(input), case_index, CaseSide::Off, record);
            if !self.active.insert_after_legacy_skip(entry) {
                break;
            }
            loaded += 1;
        }

        info!(
            "IN{:02} off: {} cleared, {} OFF cases queued",
            input + 1,
            pairs.len(),
            loaded
        );
    }

    // ========================================================================
    // Periodic work
    // ========================================================================

    /// Advance all pattern timers by one tick
    pub fn tick(&mut self) {
        self.timers.tick();
    }

    pub fn is_in_on_phase(&self, input: u8) -> bool {
        self.timers.is_in_on_phase(input)
    }

    /// Outbound message set with the configured limits
    pub fn aggregate<I: InputState + ?Sized>(&self, inputs: &I) -> Vec<AggregatedMessageBucket> {
        self.aggregate_with_limits(inputs, self.limits)
    }

    pub fn aggregate_with_limits<I: InputState + ?Sized>(
        &self,
        inputs: &I,
        limits: AggregationLimits,
    ) -> Vec<AggregatedMessageBucket> {
        aggregate(self.active.entries(), &self.timers, inputs, &self.relay, limits)
    }

    /// Aggregate against an external relay source instead of the built-in table
    pub fn aggregate_with_relay<I, R>(&self, inputs: &I, relay: &R) -> Vec<AggregatedMessageBucket>
    where
        I: InputState + ?Sized,
        R: RelaySource + ?Sized,
    {
        aggregate(self.active.entries(), &self.timers, inputs, relay, self.limits)
    }

    /// Drop one-shot entries after a transmission
    pub fn prune_one_shot_entries(&mut self) -> usize {
        let removed = self.active.prune_one_shot();
        if removed > 0 {
            debug!("Pruned {} one-shot entries", removed);
        }
        removed
    }

    /// Empty the active list and stop all timers (startup only)
    pub fn reset(&mut self) {
        self.active.reset();
        self.timers.reset();
        self.relay.clear();
        self.store.reset_counters();
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            store_reads: self.store.read_count(),
            bounds_errors: self.store.bounds_errors(),
            active_entries: self.active.len(),
            armed_patterns: self.timers.armed_count(),
            relay_slots_used: self.relay.len(),
            relay_received: self.relay.received_count(),
            relay_processed: self.relay.processed_count(),
            relay_last_id: self.relay.last_id(),
        }
    }

    pub fn pattern_timer(&self, input: u8) -> Option<PatternTimer> {
        self.timers.get(input).copied()
    }

    pub fn active_entry(&self, slot: usize) -> Option<ActiveEntryInfo> {
        self.active.get(slot).map(|e| ActiveEntryInfo {
            owner: e.owner,
            case_index: e.case_index,
            side: e.side,
            one_shot: e.one_shot,
        })
    }

    /// Pattern nibbles of an active ON entry
    pub fn active_case_pattern(&self, input: u8, case_index: u8) -> Option<(u8, u8)> {
        self.active
            .iter()
            .find(|e| e.belongs_to(input) && e.case_index == case_index && e.side == CaseSide::On)
            .map(|e| (e.record.pattern_on, e.record.pattern_off))
    }

    pub(crate) fn list_full(&self) -> CaseError {
        CaseError::ListFull(self.active.capacity())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::conditions::InputSnapshot;
    use crate::store::MemoryStore;
    use crate::types::MessageId;

    const LIGHTS: MessageId = MessageId::new(0xFF01, 0x1E);
    const AUX: MessageId = MessageId::new(0xFF02, 0x1E);

    fn byte0(bits: u8) -> [u8; 8] {
        [bits, 0, 0, 0, 0, 0, 0, 0]
    }

    fn engine_with(cases: &[(u8, u8, CaseSide, CaseRecord)]) -> CaseEngine<MemoryStore> {
        let mut image = MemoryStore::erased();
        for (input, index, side, record) in cases {
            image.write_case(*input, *index, *side, record).unwrap();
        }
        CaseEngine::with_defaults(image)
    }

    #[test]
    fn test_activation_loads_cases_and_arms_pattern() {
        let mut engine = engine_with(&[
            (2, 0, CaseSide::On, CaseRecord::new(6, LIGHTS, byte0(0x80)).with_pattern(3, 3)),
            (2, 1, CaseSide::On, CaseRecord::new(6, AUX, byte0(0x01))),
        ]);
        engine.on_input_transition(2, true).unwrap();

        assert_eq!(engine.active().len(), 2);
        assert!(engine.active().iter().all(|e| !e.one_shot));
        let timer = engine.pattern_timer(2).unwrap();
        assert!(timer.has_pattern);
        assert_eq!(timer.countdown, 3);
        assert_eq!(engine.active_case_pattern(2, 0), Some((3, 3)));
    }

    #[test]
    fn test_pattern_on_later_case_does_not_arm() {
        let mut engine = engine_with(&[
            (2, 0, CaseSide::On, CaseRecord::new(6, LIGHTS, byte0(0x80))),
            (2, 1, CaseSide::On, CaseRecord::new(6, AUX, byte0(0x01)).with_pattern(2, 2)),
        ]);
        engine.on_input_transition(2, true).unwrap();
        assert!(!engine.timers().has_pattern(2));
    }

    #[test]
    fn test_deactivation_clears_once_per_identity() {
        let mut engine = engine_with(&[
            (0, 0, CaseSide::On, CaseRecord::new(6, LIGHTS, byte0(0x01))),
            (0, 1, CaseSide::On, CaseRecord::new(6, LIGHTS, byte0(0x02))),
        ]);
        engine.on_input_transition(0, true).unwrap();
        engine.on_input_transition(0, false).unwrap();

        let entries = engine.active().entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].one_shot);
        assert_eq!(entries[0].record.id, LIGHTS);
        assert_eq!(entries[0].record.payload, [0; 8]);

        engine.prune_one_shot_entries();
        assert!(engine.active().is_empty());
    }

    #[test]
    fn test_deactivation_queues_off_cases() {
        let mut engine = engine_with(&[
            (24, 0, CaseSide::On, CaseRecord::new(6, LIGHTS, byte0(0x01))),
            (24, 0, CaseSide::Off, CaseRecord::new(6, AUX, byte0(0x10))),
        ]);
        engine.on_input_transition(24, true).unwrap();
        engine.on_input_transition(24, false).unwrap();

        let buckets = engine.aggregate(&InputSnapshot::new());
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].payload, [0; 8]);
        assert_eq!(buckets[1].id, AUX);
        assert_eq!(buckets[1].payload[0], 0x10);

        engine.prune_one_shot_entries();
        assert!(engine.aggregate(&InputSnapshot::new()).is_empty());
    }

    #[test]
    fn test_reactivation_clears_dropped_identity() {
        let mut engine = engine_with(&[(3, 0, CaseSide::On, CaseRecord::new(6, LIGHTS, byte0(0x01)))]);
        // A stale entry for another identity owned by input 3
        engine.active.insert(ActiveCaseInstance::persistent(
            3,
            1,
            CaseRecord::new(5, AUX, byte0(0x04)),
        ));

        engine.on_input_transition(3, true).unwrap();
        let entries = engine.active().entries();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].one_shot);
        assert_eq!(entries[0].record.id, AUX);
        assert_eq!(entries[0].record.priority, 5);
        assert_eq!(entries[1].record.id, LIGHTS);
        assert!(!entries[1].one_shot);
    }

    #[test]
    fn test_invalid_input_counts_bounds_error() {
        let mut engine = engine_with(&[]);
        assert!(matches!(
            engine.on_input_transition(44, true),
            Err(CaseError::InputOutOfRange(44))
        ));
        assert_eq!(engine.diagnostics().bounds_errors, 1);
    }

    #[test]
    fn test_reset_and_diagnostics() {
        let mut engine = engine_with(&[(2, 0, CaseSide::On, CaseRecord::new(6, LIGHTS, byte0(0x80)).with_pattern(1, 1))]);
        engine.on_input_transition(2, true).unwrap();
        let diag = engine.diagnostics();
        assert_eq!(diag.active_entries, 1);
        assert_eq!(diag.armed_patterns, 1);
        assert!(diag.store_reads > 0);
        assert_eq!(engine.active_entry(0).unwrap().owner, EntryOwner::Input(2));
        assert!(engine.active_entry(1).is_none());

        engine.reset();
        assert_eq!(engine.diagnostics(), Diagnostics::default());
    }
}
