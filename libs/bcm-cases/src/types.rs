//! Case engine data types
//!
//! Records are decoded from the fixed 32-byte layout:
//!
//! | Offset | Meaning                                           |
//! |--------|---------------------------------------------------|
//! | 0      | priority (low 3 bits)                             |
//! | 1-2    | pgn, high byte first                              |
//! | 3      | source address                                    |
//! | 4      | configuration byte (see [`CaseConfig`])           |
//! | 5-6    | reserved                                          |
//! | 7      | pattern timing: high nibble on, low nibble off    |
//! | 8-15   | must-be-on prerequisite bitmap                    |
//! | 16-23  | must-be-off prerequisite bitmap                   |
//! | 24-31  | payload                                           |

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::layout::{is_valid_input, CASE_SIZE, CONDITION_FLAGS_BYTE, IGNITION_CONDITION_BIT};

/// Eight-byte message payload
pub type Payload = [u8; 8];

/// Record byte offsets
pub mod offsets {
    pub const PRIORITY: u16 = 0;
    pub const PGN_HIGH: u16 = 1;
    pub const PGN_LOW: u16 = 2;
    pub const SOURCE_ADDR: u16 = 3;
    pub const CONFIG: u16 = 4;
    pub const PATTERN: u16 = 7;
    pub const MUST_BE_ON: u16 = 8;
    pub const MUST_BE_OFF: u16 = 16;
    pub const PAYLOAD: u16 = 24;
}

// ============================================================================
// Message identity
// ============================================================================

/// Outbound message identity: parameter group number plus source address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MessageId {
    pub pgn: u16,
    pub source_addr: u8,
}

impl MessageId {
    pub const fn new(pgn: u16, source_addr: u8) -> Self {
        Self { pgn, source_addr }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}/{:02X}", self.pgn, self.source_addr)
    }
}

/// Which store region a case belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseSide {
    /// Loaded while the input is active
    On,
    /// Sent once when the input turns inactive
    Off,
}

impl fmt::Display for CaseSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaseSide::On => write!(f, "ON"),
            CaseSide::Off => write!(f, "OFF"),
        }
    }
}

// ============================================================================
// Case configuration byte
// ============================================================================

/// Record byte 4: four 2-bit fields, each enabled by the value `01`
///
/// - bits 0-1: ignition input
/// - bits 2-3: overridable by pattern cases
/// - bits 4-5: one-button start
/// - bits 6-7: follows the ignition flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseConfig(pub u8);

impl CaseConfig {
    const IGNITION_INPUT_SHIFT: u8 = 0;
    const OVERRIDABLE_SHIFT: u8 = 2;
    const ONE_BUTTON_SHIFT: u8 = 4;
    const TRACK_IGNITION_SHIFT: u8 = 6;

    #[inline]
    fn field_enabled(self, shift: u8) -> bool {
        (self.0 >> shift) & 0x03 == 0x01
    }

    #[inline]
    fn with_field(self, shift: u8) -> Self {
        Self((self.0 & !(0x03 << shift)) | (0x01 << shift))
    }

    pub fn is_ignition_input(self) -> bool {
        self.field_enabled(Self::IGNITION_INPUT_SHIFT)
    }

    pub fn is_overridable(self) -> bool {
        self.field_enabled(Self::OVERRIDABLE_SHIFT)
    }

    pub fn is_one_button_start(self) -> bool {
        self.field_enabled(Self::ONE_BUTTON_SHIFT)
    }

    pub fn is_track_ignition(self) -> bool {
        self.field_enabled(Self::TRACK_IGNITION_SHIFT)
    }

    pub fn ignition_input(self) -> Self {
        self.with_field(Self::IGNITION_INPUT_SHIFT)
    }

    pub fn overridable(self) -> Self {
        self.with_field(Self::OVERRIDABLE_SHIFT)
    }

    pub fn one_button_start(self) -> Self {
        self.with_field(Self::ONE_BUTTON_SHIFT)
    }

    pub fn track_ignition(self) -> Self {
        self.with_field(Self::TRACK_IGNITION_SHIFT)
    }
}

// ============================================================================
// Case record
// ============================================================================

/// One decoded case record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CaseRecord {
    /// J1939 priority, 0-7
    pub priority: u8,
    pub id: MessageId,
    pub config: CaseConfig,
    /// Ticks spent in the on phase (0-15)
    pub pattern_on: u8,
    /// Ticks spent in the off phase (0-15)
    pub pattern_off: u8,
    pub must_be_on: [u8; 8],
    pub must_be_off: [u8; 8],
    pub payload: Payload,
    /// False when the header was all ones (no case configured)
    pub valid: bool,
}

impl CaseRecord {
    /// A configured record with no pattern, prerequisites or flags
    pub fn new(priority: u8, id: MessageId, payload: Payload) -> Self {
        Self {
            priority: priority & 0x07,
            id,
            payload,
            valid: true,
            ..Default::default()
        }
    }

    /// All-zero record that turns every bit of `id` off when aggregated
    pub fn clearing(id: MessageId, priority: u8) -> Self {
        Self::new(priority, id, [0; 8])
    }

    pub fn with_pattern(mut self, on_ticks: u8, off_ticks: u8) -> Self {
        self.pattern_on = on_ticks & 0x0F;
        self.pattern_off = off_ticks & 0x0F;
        self
    }

    pub fn with_config(mut self, config: CaseConfig) -> Self {
        self.config = config;
        self
    }

    /// Require `input` to be active
    pub fn require_on(mut self, input: u8) -> Self {
        if is_valid_input(input) {
            self.must_be_on[input as usize / 8] |= 1u8 << (input % 8);
        }
        self
    }

    /// Require `input` to be inactive
    pub fn require_off(mut self, input: u8) -> Self {
        if is_valid_input(input) {
            self.must_be_off[input as usize / 8] |= 1u8 << (input % 8);
        }
        self
    }

    /// Gate on the global ignition flag being on (`true`) or off (`false`)
    pub fn require_ignition(mut self, on: bool) -> Self {
        if on {
            self.must_be_on[CONDITION_FLAGS_BYTE] |= IGNITION_CONDITION_BIT;
        } else {
            self.must_be_off[CONDITION_FLAGS_BYTE] |= IGNITION_CONDITION_BIT;
        }
        self
    }

    pub fn is_overridable(&self) -> bool {
        self.config.is_overridable()
    }

    /// Whether either pattern nibble is nonzero
    pub fn has_pattern_timing(&self) -> bool {
        self.pattern_on != 0 || self.pattern_off != 0
    }

    /// Encode into the 32-byte store layout
    pub fn to_bytes(&self) -> [u8; CASE_SIZE as usize] {
        let mut bytes = [0u8; CASE_SIZE as usize];
        bytes[offsets::PRIORITY as usize] = self.priority & 0x07;
        bytes[offsets::PGN_HIGH as usize] = (self.id.pgn >> 8) as u8;
        bytes[offsets::PGN_LOW as usize] = self.id.pgn as u8;
        bytes[offsets::SOURCE_ADDR as usize] = self.id.source_addr;
        bytes[offsets::CONFIG as usize] = self.config.0;
        bytes[offsets::PATTERN as usize] = (self.pattern_on << 4) | (self.pattern_off & 0x0F);

        let mbo = offsets::MUST_BE_ON as usize;
        let mbf = offsets::MUST_BE_OFF as usize;
        let data = offsets::PAYLOAD as usize;
        bytes[mbo..mbo + 8].copy_from_slice(&self.must_be_on);
        bytes[mbf..mbf + 8].copy_from_slice(&self.must_be_off);
        bytes[data..data + 8].copy_from_slice(&self.payload);
        bytes
    }
}

// ============================================================================
// Active list entries
// ============================================================================

/// Who owns an active entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOwner {
    /// A physical input (0-43)
    Input(u8),
    /// Clearing entry injected by the ignition-tracking controller
    Synthetic,
}

impl EntryOwner {
    /// Owning input, if this entry belongs to a valid physical input
    pub fn input(self) -> Option<u8> {
        match self {
            EntryOwner::Input(input) if is_valid_input(input) => Some(input),
            _ => None,
        }
    }
}

impl fmt::Display for EntryOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryOwner::Input(input) => write!(f, "IN{:02}", *input as u16 + 1),
            EntryOwner::Synthetic => write!(f, "IGN"),
        }
    }
}

/// One armed case in the active list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveCaseInstance {
    pub owner: EntryOwner,
    pub case_index: u8,
    pub side: CaseSide,
    /// Removed after the next transmission
    pub one_shot: bool,
    pub record: CaseRecord,
}

impl ActiveCaseInstance {
    /// Entry that stays until its input is cleared
    pub fn persistent(input: u8, case_index: u8, record: CaseRecord) -> Self {
        Self {
            owner: EntryOwner::Input(input),
            case_index,
            side: CaseSide::On,
            one_shot: false,
            record,
        }
    }

    /// Entry dropped by the next prune
    pub fn one_shot(owner: EntryOwner, case_index: u8, side: CaseSide, record: CaseRecord) -> Self {
        Self {
            owner,
            case_index,
            side,
            one_shot: true,
            record,
        }
    }

    pub fn belongs_to(&self, input: u8) -> bool {
        self.owner == EntryOwner::Input(input)
    }
}

// ============================================================================
// Aggregation output
// ============================================================================

/// One outbound message after merging every contributing entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedMessageBucket {
    /// Priority of the first contributor
    pub priority: u8,
    pub id: MessageId,
    pub payload: Payload,
    pub valid: bool,
    /// At least one contributor's input has an armed pattern
    pub has_pattern: bool,
    /// Differs from the last transmitted payload; set by the broadcaster
    pub data_changed: bool,
}

impl AggregatedMessageBucket {
    pub fn new(priority: u8, id: MessageId, payload: Payload) -> Self {
        Self {
            priority,
            id,
            payload,
            valid: true,
            has_pattern: false,
            data_changed: false,
        }
    }
}
