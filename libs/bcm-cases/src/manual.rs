//! Manual override controller
//!
//! Drives an input's case 0 directly, bypassing its debounced state. Used by
//! the one-button start machine for ignition and crank.

use tracing::{debug, info};

use crate::engine::CaseEngine;
use crate::error::{CaseError, Result};
use crate::store::CaseStorage;
use crate::types::{ActiveCaseInstance, CaseRecord, CaseSide, EntryOwner};

/// Bit positions (primary, secondary) encoded by a case 0 payload byte 0
///
/// The secondary bit sits one below the primary, wrapping from bit 0 to bit 7.
pub fn manual_bits(byte0: u8) -> Option<(u8, u8)> {
    if byte0.count_ones() != 1 {
        return None;
    }
    let primary = byte0.trailing_zeros() as u8;
    let secondary = if primary == 0 { 7 } else { primary - 1 };
    Some((primary, secondary))
}

impl<S: CaseStorage> CaseEngine<S> {
    /// Force `input`'s case 0 on with the primary and/or secondary bit
    ///
    /// Fails without touching the active list when case 0 is missing, its
    /// byte 0 does not carry exactly one bit, or the list cannot take the
    /// clearing and manual entries.
    pub fn set_manual(&mut self, input: u8, primary_on: bool, secondary_on: bool) -> Result<()> {
        let record = self.store.read_configured_case(input, 0, CaseSide::On)?;
        let byte0 = record.payload[0];
        let (primary, secondary) =
            manual_bits(byte0).ok_or(CaseError::AmbiguousPrimaryBit { input, byte: byte0 })?;

        let owned = self.active.iter().filter(|e| e.belongs_to(input)).count();
        if self.active.len() - owned + 2 > self.active.capacity() {
            return Err(self.list_full());
        }

        self.clear_manual(input)?;

        let mut bits = 0u8;
        if primary_on {
            bits |= 1 << primary;
        }
        if secondary_on {
            bits |= 1 << secondary;
        }
        let mut payload = [0u8; 8];
        payload[0] = bits;

        let manual = CaseRecord { payload, ..record };
        if !self
            .active
            .insert(ActiveCaseInstance::persistent(input, 0, manual))
        {
            return Err(self.list_full());
        }

        info!(
            "IN{:02} manual: primary bit {} {}, secondary bit {} {}",
            input + 1,
            primary,
            if primary_on { "on" } else { "off" },
            secondary,
            if secondary_on { "on" } else { "off" }
        );
        Ok(())
    }

    /// Drop `input`'s entries and disarm its pattern timer, then queue one
    /// zero frame for its case 0 identity
    ///
    /// Without a readable, configured case 0 there is no identity to clear,
    /// so only the removal happens.
    pub fn clear_manual(&mut self, input: u8) -> Result<()> {
        self.store.check_input(input)?;

        let removed = self.active.remove_for_input(input);
        self.timers.disarm(input);

        let record = match self.store.read_configured_case(input, 0, CaseSide::On) {
            Ok(record) => record,
            Err(e) => {
                debug!(
                    "IN{:02} manual cleared, {} entries removed, no clearing frame: {}",
                    input + 1,
                    removed,
                    e
                );
                return Ok(());
            },
        };

        let clearing = ActiveCaseInstance::one_shot(
            EntryOwner::Input(input),
            0,
            CaseSide::Off,
            CaseRecord::clearing(record.id, record.priority),
        );
        if !self.active.insert(clearing) {
            return Err(self.list_full());
        }

        debug!("IN{:02} manual cleared, {} entries removed", input + 1, removed);
        Ok(())
    }

    /// Case 0 of `input` is configured for one-button start
    pub fn is_one_button_start(&self, input: u8) -> bool {
        self.store
            .case_config(input, 0, CaseSide::On)
            .is_ok_and(|config| config.is_one_button_start())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::conditions::InputSnapshot;
    use crate::config::EngineConfig;
    use crate::store::MemoryStore;
    use crate::types::{CaseConfig, MessageId};

    const START: MessageId = MessageId::new(0xFF10, 0x1E);

    fn engine(byte0: u8, config: CaseConfig) -> CaseEngine<MemoryStore> {
        let mut image = MemoryStore::erased();
        let record = CaseRecord::new(3, START, [byte0, 0xAA, 0, 0, 0, 0, 0, 0]).with_config(config);
        image.write_case(1, 0, CaseSide::On, &record).unwrap();
        CaseEngine::with_defaults(image)
    }

    #[test]
    fn test_manual_bits() {
        assert_eq!(manual_bits(0x20), Some((5, 4)));
        assert_eq!(manual_bits(0x01), Some((0, 7)));
        assert_eq!(manual_bits(0x80), Some((7, 6)));
        assert_eq!(manual_bits(0x00), None);
        assert_eq!(manual_bits(0x21), None);
    }

    #[test]
    fn test_set_manual_bit_five_with_secondary() {
        let mut engine = engine(0x20, CaseConfig::default());
        engine.set_manual(1, true, true).unwrap();

        let entries = engine.active().entries();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].one_shot);
        assert_eq!(entries[0].record.payload, [0; 8]);
        assert!(!entries[1].one_shot);
        assert_eq!(entries[1].record.payload, [0x30, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(entries[1].record.priority, 3);

        let buckets = engine.aggregate(&InputSnapshot::new());
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].payload[0], 0x30);
    }

    #[test]
    fn test_set_manual_primary_only_then_clear() {
        let mut engine = engine(0x20, CaseConfig::default());
        engine.set_manual(1, true, false).unwrap();
        engine.prune_one_shot_entries();
        assert_eq!(engine.active().entries()[0].record.payload[0], 0x20);

        engine.clear_manual(1).unwrap();
        let entries = engine.active().entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].one_shot);
        assert_eq!(entries[0].record.id, START);
        assert_eq!(entries[0].record.priority, 3);
    }

    #[test]
    fn test_clear_manual_without_case_zero_still_removes() {
        let mut image = MemoryStore::erased();
        image
            .write_case(0, 1, CaseSide::On, &CaseRecord::new(6, START, [0x04, 0, 0, 0, 0, 0, 0, 0]))
            .unwrap();
        let mut engine = CaseEngine::with_defaults(image);
        engine.on_input_transition(0, true).unwrap();
        engine.prune_one_shot_entries();
        engine.timers.arm(0, 2, 2);
        assert_eq!(engine.active().len(), 1);

        engine.clear_manual(0).unwrap();
        assert!(engine.active().is_empty());
        assert!(!engine.timers().has_pattern(0));
    }

    #[test]
    fn test_clear_manual_rejects_invalid_input() {
        let mut engine = CaseEngine::with_defaults(MemoryStore::erased());
        assert!(matches!(
            engine.clear_manual(44),
            Err(CaseError::InputOutOfRange(44))
        ));
        assert_eq!(engine.store().bounds_errors(), 1);
    }

    #[test]
    fn test_set_manual_rejects_ambiguous_byte() {
        let mut engine = engine(0x30, CaseConfig::default());
        let err = engine.set_manual(1, true, false).unwrap_err();
        assert!(matches!(err, CaseError::AmbiguousPrimaryBit { input: 1, byte: 0x30 }));
        assert!(engine.active().is_empty());
    }

    #[test]
    fn test_set_manual_unconfigured_case() {
        let mut engine = CaseEngine::with_defaults(MemoryStore::erased());
        assert!(matches!(
            engine.set_manual(1, true, false),
            Err(CaseError::Unconfigured(_))
        ));
        assert!(engine.active().is_empty());
    }

    #[test]
    fn test_set_manual_full_list_is_untouched() {
        let mut image = MemoryStore::erased();
        image
            .write_case(1, 0, CaseSide::On, &CaseRecord::new(3, START, [0x20, 0, 0, 0, 0, 0, 0, 0]))
            .unwrap();
        let config = EngineConfig {
            active_capacity: 1,
            ..EngineConfig::default()
        };
        let mut engine = CaseEngine::new(image, &config).unwrap();

        assert!(matches!(engine.set_manual(1, true, false), Err(CaseError::ListFull(1))));
        assert!(engine.active().is_empty());
    }

    #[test]
    fn test_is_one_button_start() {
        let engine = engine(0x20, CaseConfig::default().one_button_start());
        assert!(engine.is_one_button_start(1));
        assert!(!engine.is_one_button_start(0));
        assert!(!engine.is_one_button_start(60));
    }
}
