//! 29-bit J1939 identifier helpers
//!
//! Layout: `[priority:3][pgn:16][source address:8]`, with the PGN field
//! covering the reserved, data-page, PF and PS bits.

use crate::types::MessageId;

/// Priority used when a message has no case of its own
pub const DEFAULT_PRIORITY: u8 = 6;

pub fn can_id(priority: u8, pgn: u16, source_addr: u8) -> u32 {
    ((priority as u32 & 0x07) << 26) | ((pgn as u32) << 8) | source_addr as u32
}

pub fn pgn(can_id: u32) -> u16 {
    ((can_id >> 8) & 0xFFFF) as u16
}

pub fn source_addr(can_id: u32) -> u8 {
    (can_id & 0xFF) as u8
}

pub fn priority(can_id: u32) -> u8 {
    ((can_id >> 26) & 0x07) as u8
}

pub fn message_id(can_id: u32) -> MessageId {
    MessageId::new(pgn(can_id), source_addr(can_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_fields() {
        let id = can_id(6, 0xFF01, 0x1E);
        assert_eq!(id, 0x18FF011E);
        assert_eq!(priority(id), 6);
        assert_eq!(pgn(id), 0xFF01);
        assert_eq!(source_addr(id), 0x1E);
        assert_eq!(message_id(id), MessageId::new(0xFF01, 0x1E));
    }

    #[test]
    fn test_priority_masked() {
        assert_eq!(priority(can_id(0xFF, 0, 0)), 7);
    }
}
