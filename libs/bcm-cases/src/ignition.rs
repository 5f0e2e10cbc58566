//! Ignition-tracking controller
//!
//! Cases flagged "track ignition" follow the global ignition flag instead of
//! their input: they are loaded for every input when ignition comes on and
//! cleared with synthetic zero frames when it goes off.

use serde::Serialize;
use tracing::{debug, info};

use crate::active::collect_clearing_pairs;
use crate::engine::CaseEngine;
use crate::layout::{loadable_case_count, MAX_ACTIVE_CASES, NUM_INPUTS};
use crate::store::CaseStorage;
use crate::types::{ActiveCaseInstance, CaseRecord, CaseSide, EntryOwner};

/// Sources that make up the global ignition flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct IgnitionFlags {
    /// A configured ignition input is active
    pub switched: bool,
    /// Ignition latched by a one-button start input
    pub one_button: bool,
    /// Ignition requested over the bus (control frame byte 4 bit 0)
    pub bus: bool,
    /// Security disarmed over the bus (control frame byte 4 bit 1)
    pub security_disarmed: bool,
}

impl IgnitionFlags {
    pub fn ignition(&self) -> bool {
        self.switched || self.one_button || self.bus
    }
}

impl<S: CaseStorage> CaseEngine<S> {
    /// ON case `case_index` of `input` follows the ignition flag
    pub fn is_track_ignition(&self, input: u8, case_index: u8) -> bool {
        self.store
            .case_config(input, case_index, CaseSide::On)
            .is_ok_and(|config| config.is_track_ignition())
    }

    /// Case 0 of `input` marks it as an ignition input
    pub fn is_ignition_input(&self, input: u8) -> bool {
        self.store
            .case_config(input, 0, CaseSide::On)
            .is_ok_and(|config| config.is_ignition_input())
    }

    /// Ignition inputs that are not one-button start inputs
    pub fn switched_ignition_inputs(&self) -> Vec<u8> {
        (0..NUM_INPUTS as u8)
            .filter(|&input| self.is_ignition_input(input) && !self.is_one_button_start(input))
            .collect()
    }

    /// One-button start inputs, in ascending order
    pub fn one_button_inputs(&self) -> Vec<u8> {
        (0..NUM_INPUTS as u8)
            .filter(|&input| self.is_one_button_start(input))
            .collect()
    }

    fn tracked_cases(&self) -> Vec<(u8, u8, CaseRecord)> {
        let mut cases = Vec::new();
        for input in 0..NUM_INPUTS as u8 {
            for case_index in 0..loadable_case_count(input, CaseSide::On) {
                if !self.is_track_ignition(input, case_index) {
                    continue;
                }
                if let Ok(record) = self.store.read_case(input, case_index, CaseSide::On) {
                    if record.valid {
                        cases.push((input, case_index, record));
                    }
                }
            }
        }
        cases
    }

    /// Reload or clear every ignition-tracked case
    pub fn set_ignition_tracked(&mut self, active: bool) {
        let store = &self.store;
        let removed = self.active.remove_where(|entry| {
            entry.owner.input().is_some_and(|input| {
                store
                    .case_config(input, entry.case_index, CaseSide::On)
                    .is_ok_and(|config| config.is_track_ignition())
            })
        });

        let tracked = self.tracked_cases();
        let added = if active {
            let mut loaded = 0;
            for (input, case_index, record) in tracked {
                if !self
                    .active
                    .insert(ActiveCaseInstance::persistent(input, case_index, record))
                {
                    break;
                }
                loaded += 1;
            }
            loaded
        } else {
            let pairs = collect_clearing_pairs(tracked.iter().map(|(_, _, r)| r), MAX_ACTIVE_CASES);
            self.active.push_clearing(EntryOwner::Synthetic, &pairs)
        };

        debug!("Ignition tracking removed {} entries", removed);
        info!(
            "Ignition {}: {} tracked entries {}",
            if active { "on" } else { "off" },
            added,
            if active { "loaded" } else { "cleared" }
        );
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::conditions::InputSnapshot;
    use crate::store::MemoryStore;
    use crate::types::{CaseConfig, MessageId};

    const MARKERS: MessageId = MessageId::new(0xFF20, 0x1E);
    const DASH: MessageId = MessageId::new(0xFF21, 0x1E);

    fn engine() -> CaseEngine<MemoryStore> {
        let tracked = CaseConfig::default().track_ignition();
        let mut image = MemoryStore::erased();
        image
            .write_case(4, 0, CaseSide::On, &CaseRecord::new(6, MARKERS, [0x01, 0, 0, 0, 0, 0, 0, 0]).with_config(tracked))
            .unwrap();
        image
            .write_case(4, 1, CaseSide::On, &CaseRecord::new(6, DASH, [0x02, 0, 0, 0, 0, 0, 0, 0]))
            .unwrap();
        image
            .write_case(9, 1, CaseSide::On, &CaseRecord::new(5, MARKERS, [0x04, 0, 0, 0, 0, 0, 0, 0]).with_config(tracked))
            .unwrap();
        image
            .write_case(
                12,
                0,
                CaseSide::On,
                &CaseRecord::new(6, DASH, [0x08, 0, 0, 0, 0, 0, 0, 0])
                    .with_config(CaseConfig::default().ignition_input()),
            )
            .unwrap();
        CaseEngine::with_defaults(image)
    }

    #[test]
    fn test_flags() {
        let engine = engine();
        assert!(engine.is_track_ignition(4, 0));
        assert!(!engine.is_track_ignition(4, 1));
        assert!(engine.is_track_ignition(9, 1));
        assert!(!engine.is_track_ignition(50, 0));
        assert!(engine.is_ignition_input(12));
        assert!(!engine.is_ignition_input(4));
        assert_eq!(engine.switched_ignition_inputs(), vec![12]);
        assert!(engine.one_button_inputs().is_empty());
    }

    #[test]
    fn test_ignition_on_loads_tracked_cases() {
        let mut engine = engine();
        engine.set_ignition_tracked(true);

        let entries = engine.active().entries();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| !e.one_shot));
        assert_eq!(entries[0].owner, EntryOwner::Input(4));
        assert_eq!(entries[1].owner, EntryOwner::Input(9));

        let buckets = engine.aggregate(&InputSnapshot::new());
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].payload[0], 0x05);
    }

    #[test]
    fn test_ignition_off_replaces_with_synthetic_clear() {
        let mut engine = engine();
        engine.set_ignition_tracked(true);
        engine.set_ignition_tracked(false);

        let entries = engine.active().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].owner, EntryOwner::Synthetic);
        assert!(entries[0].one_shot);
        assert_eq!(entries[0].record.id, MARKERS);
        assert_eq!(entries[0].record.priority, 6);
        assert_eq!(entries[0].record.payload, [0; 8]);
    }

    #[test]
    fn test_repeated_on_does_not_duplicate() {
        let mut engine = engine();
        engine.set_ignition_tracked(true);
        engine.set_ignition_tracked(true);
        assert_eq!(engine.active().len(), 2);
    }

    #[test]
    fn test_untracked_entries_survive() {
        let mut engine = engine();
        engine.on_input_transition(4, true).unwrap();
        assert_eq!(engine.active().len(), 2);

        engine.set_ignition_tracked(false);
        let entries = engine.active().entries();
        // IN05 case 1 stays, case 0 replaced by a synthetic clear
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].record.id, DASH);
        assert_eq!(entries[1].owner, EntryOwner::Synthetic);
    }

    #[test]
    fn test_ignition_flags() {
        let mut flags = IgnitionFlags::default();
        assert!(!flags.ignition());
        flags.security_disarmed = true;
        assert!(!flags.ignition());
        flags.bus = true;
        assert!(flags.ignition());
    }
}
