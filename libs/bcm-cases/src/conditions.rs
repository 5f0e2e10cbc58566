//! Prerequisite evaluation for the must-be-on / must-be-off bitmaps
//!
//! Input `i` lives at bit `i % 8` of byte `i / 8` (inputs 40-43 in the low
//! nibble of byte 5). Byte 5 bit 0x20 gates on the ignition flag. The
//! security bit (byte 5, 0x10) and bytes 6-7 are carried but not evaluated.

use serde::{Deserialize, Serialize};

use crate::layout::{
    is_valid_input, CONDITION_FLAGS_BYTE, IGNITION_CONDITION_BIT, NUM_INPUTS,
};

/// Current input and ignition state, passed explicitly into evaluation
pub trait InputState {
    fn is_active(&self, input: u8) -> bool;
    fn ignition(&self) -> bool;
}

/// Packed snapshot of all input levels plus the ignition flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InputSnapshot {
    bits: u64,
    ignition: bool,
}

impl InputSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot with the listed inputs active
    pub fn with_active(inputs: &[u8]) -> Self {
        let mut snapshot = Self::default();
        for &input in inputs {
            snapshot.set(input, true);
        }
        snapshot
    }

    pub fn set(&mut self, input: u8, active: bool) {
        if !is_valid_input(input) {
            return;
        }
        if active {
            self.bits |= 1u64 << input;
        } else {
            self.bits &= !(1u64 << input);
        }
    }

    pub fn set_ignition(&mut self, on: bool) {
        self.ignition = on;
    }

    /// Active inputs in ascending order
    pub fn active_inputs(&self) -> impl Iterator<Item = u8> + '_ {
        (0..NUM_INPUTS as u8).filter(move |&i| self.is_active(i))
    }
}

impl InputState for InputSnapshot {
    fn is_active(&self, input: u8) -> bool {
        is_valid_input(input) && self.bits & (1u64 << input) != 0
    }

    fn ignition(&self) -> bool {
        self.ignition
    }
}

/// Check a case's prerequisites against `state`
pub fn check_conditions<S: InputState + ?Sized>(
    must_be_on: &[u8; 8],
    must_be_off: &[u8; 8],
    state: &S,
) -> bool {
    for input in 0..NUM_INPUTS as u8 {
        let byte = input as usize / 8;
        let mask = 1u8 << (input % 8);
        let active = state.is_active(input);

        if must_be_on[byte] & mask != 0 && !active {
            return false;
        }
        if must_be_off[byte] & mask != 0 && active {
            return false;
        }
    }

    let ignition = state.ignition();
    if must_be_on[CONDITION_FLAGS_BYTE] & IGNITION_CONDITION_BIT != 0 && !ignition {
        return false;
    }
    if must_be_off[CONDITION_FLAGS_BYTE] & IGNITION_CONDITION_BIT != 0 && ignition {
        return false;
    }

    true
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::layout::SECURITY_CONDITION_BIT;
    use crate::types::{CaseRecord, MessageId};

    fn record() -> CaseRecord {
        CaseRecord::new(6, MessageId::new(0xFF02, 0x1E), [1, 0, 0, 0, 0, 0, 0, 0])
    }

    fn check(record: &CaseRecord, state: &InputSnapshot) -> bool {
        check_conditions(&record.must_be_on, &record.must_be_off, state)
    }

    #[test]
    fn test_no_prerequisites_always_pass() {
        assert!(check(&record(), &InputSnapshot::new()));
    }

    #[test]
    fn test_must_be_on_and_off() {
        let r = record().require_on(9).require_off(41);
        assert!(!check(&r, &InputSnapshot::new()));
        assert!(check(&r, &InputSnapshot::with_active(&[9])));
        assert!(!check(&r, &InputSnapshot::with_active(&[9, 41])));
    }

    #[test]
    fn test_ignition_gate() {
        let needs_ign = record().require_ignition(true);
        let needs_no_ign = record().require_ignition(false);
        let mut state = InputSnapshot::new();

        assert!(!check(&needs_ign, &state));
        assert!(check(&needs_no_ign, &state));

        state.set_ignition(true);
        assert!(check(&needs_ign, &state));
        assert!(!check(&needs_no_ign, &state));
    }

    #[test]
    fn test_security_and_reserved_bytes_ignored() {
        let mut r = record();
        r.must_be_on[CONDITION_FLAGS_BYTE] |= SECURITY_CONDITION_BIT;
        r.must_be_on[6] = 0xFF;
        r.must_be_off[7] = 0xFF;
        assert!(check(&r, &InputSnapshot::new()));
    }

    #[test]
    fn test_snapshot_bits() {
        let mut s = InputSnapshot::with_active(&[0, 43, 50]);
        assert!(s.is_active(0));
        assert!(s.is_active(43));
        assert!(!s.is_active(50));
        s.set(0, false);
        assert_eq!(s.active_inputs().collect::<Vec<_>>(), vec![43]);
    }
}
