//! Relayed message table (inLINK)
//!
//! Frames whose PGN high nibble is `0xA` are relayed onto the output bus
//! with the PGN translated to `0xFxxx`. `0xAF00` is the control frame and
//! is never relayed; its byte 4 carries the bus ignition request (bit 0)
//! and the security state (bit 1, set = disarmed).

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::j1939;
use crate::types::{MessageId, Payload};

pub const RELAY_SLOTS: usize = 16;

/// Control frame PGN
pub const CONTROL_PGN: u16 = 0xAF00;

const CONTROL_FLAGS_BYTE: usize = 4;
const CONTROL_IGNITION_BIT: u8 = 0x01;
const CONTROL_SECURITY_BIT: u8 = 0x02;

/// One relayed message after PGN translation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedMessage {
    pub id: MessageId,
    pub payload: Payload,
}

/// Source of relayed messages merged into aggregation
pub trait RelaySource {
    /// Message held in `slot`, if any
    fn relayed_message(&self, slot: usize) -> Option<RelayedMessage>;

    fn slot_count(&self) -> usize {
        RELAY_SLOTS
    }
}

/// Relay source with nothing to merge
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRelay;

impl RelaySource for NoRelay {
    fn relayed_message(&self, _slot: usize) -> Option<RelayedMessage> {
        None
    }

    fn slot_count(&self) -> usize {
        0
    }
}

/// Whether a frame identifier is a relayable message
pub fn is_relay_frame(can_id: u32) -> bool {
    let pgn = j1939::pgn(can_id);
    (pgn >> 8) as u8 & 0xF0 == 0xA0 && pgn != CONTROL_PGN
}

/// `0xAxxx` -> `0xFxxx`
pub fn translate_pgn(pgn: u16) -> u16 {
    (pgn & 0x0FFF) | 0xF000
}

/// Decoded control frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ControlFrame {
    pub bus_ignition: bool,
    pub security_disarmed: bool,
}

impl ControlFrame {
    pub fn decode(can_id: u32, data: &Payload) -> Option<Self> {
        if j1939::pgn(can_id) != CONTROL_PGN {
            return None;
        }
        let flags = data[CONTROL_FLAGS_BYTE];
        Some(Self {
            bus_ignition: flags & CONTROL_IGNITION_BIT != 0,
            security_disarmed: flags & CONTROL_SECURITY_BIT != 0,
        })
    }
}

/// Fixed slot table of relayed messages
#[derive(Debug, Clone, Default)]
pub struct RelayTable {
    slots: [Option<RelayedMessage>; RELAY_SLOTS],
    received: u32,
    processed: u32,
    last_id: u32,
}

impl RelayTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one received frame; returns true if it was relayed
    ///
    /// An existing slot for the translated identity is updated in place,
    /// otherwise the first empty slot is used, otherwise slot 0 is overwritten.
    pub fn process(&mut self, can_id: u32, data: &Payload) -> bool {
        if !is_relay_frame(can_id) {
            return false;
        }

        self.received = self.received.wrapping_add(1);
        self.last_id = can_id;

        let id = MessageId::new(translate_pgn(j1939::pgn(can_id)), j1939::source_addr(can_id));
        let message = RelayedMessage { id, payload: *data };

        let slot = self
            .slots
            .iter()
            .position(|s| s.is_some_and(|m| m.id == id))
            .or_else(|| self.slots.iter().position(Option::is_none))
            .unwrap_or(0);

        debug!("Relaying {:08X} as {} in slot {}", can_id, id, slot);
        self.slots[slot] = Some(message);
        self.processed = self.processed.wrapping_add(1);
        true
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn received_count(&self) -> u32 {
        self.received
    }

    pub fn processed_count(&self) -> u32 {
        self.processed
    }

    pub fn last_id(&self) -> u32 {
        self.last_id
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

impl RelaySource for RelayTable {
    fn relayed_message(&self, slot: usize) -> Option<RelayedMessage> {
        self.slots.get(slot).copied().flatten()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn frame(pgn: u16, sa: u8) -> u32 {
        j1939::can_id(6, pgn, sa)
    }

    #[test]
    fn test_relay_filter() {
        assert!(is_relay_frame(frame(0xAF01, 0x80)));
        assert!(is_relay_frame(frame(0xA003, 0x80)));
        assert!(!is_relay_frame(frame(0xAF00, 0x80)));
        assert!(!is_relay_frame(frame(0xFF01, 0x80)));
        assert!(!is_relay_frame(frame(0xBF01, 0x80)));
    }

    #[test]
    fn test_translate() {
        assert_eq!(translate_pgn(0xAF03), 0xFF03);
        assert_eq!(translate_pgn(0xA123), 0xF123);
    }

    #[test]
    fn test_update_in_place() {
        let mut table = RelayTable::new();
        assert!(table.process(frame(0xAF03, 0x1A), &[1; 8]));
        assert!(table.process(frame(0xAF03, 0x1A), &[2; 8]));
        assert_eq!(table.len(), 1);
        let msg = table.relayed_message(0).unwrap();
        assert_eq!(msg.id, MessageId::new(0xFF03, 0x1A));
        assert_eq!(msg.payload, [2; 8]);
        assert_eq!(table.received_count(), 2);
        assert_eq!(table.processed_count(), 2);
        assert_eq!(table.last_id(), frame(0xAF03, 0x1A));
    }

    #[test]
    fn test_full_table_overwrites_slot_zero() {
        let mut table = RelayTable::new();
        for i in 0..RELAY_SLOTS as u8 {
            table.process(frame(0xAF01, i), &[i; 8]);
        }
        assert_eq!(table.len(), RELAY_SLOTS);

        table.process(frame(0xAF01, 0x99), &[0x99; 8]);
        assert_eq!(table.len(), RELAY_SLOTS);
        assert_eq!(table.relayed_message(0).unwrap().id.source_addr, 0x99);
        assert_eq!(table.relayed_message(1).unwrap().id.source_addr, 1);
    }

    #[test]
    fn test_ignored_frames_do_not_count() {
        let mut table = RelayTable::new();
        assert!(!table.process(frame(0xAF00, 0x1A), &[0; 8]));
        assert!(!table.process(frame(0xFEF1, 0x00), &[0; 8]));
        assert_eq!(table.received_count(), 0);
        assert!(table.is_empty());
    }

    #[test]
    fn test_control_frame_decode() {
        let mut data = [0u8; 8];
        data[4] = 0x03;
        let ctrl = ControlFrame::decode(frame(0xAF00, 0x80), &data).unwrap();
        assert!(ctrl.bus_ignition);
        assert!(ctrl.security_disarmed);
        assert!(ControlFrame::decode(frame(0xAF01, 0x80), &data).is_none());
    }
}
