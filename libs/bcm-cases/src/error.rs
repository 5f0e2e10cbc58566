//! Case Engine Error Types

use thiserror::Error;

use crate::types::CaseSide;

/// Result type for case engine operations
pub type Result<T> = std::result::Result<T, CaseError>;

/// Case engine errors
#[derive(Debug, Error)]
pub enum CaseError {
    /// Input index outside 0..44
    #[error("Input {0} out of range")]
    InputOutOfRange(u8),

    /// Case index not present in the count table for this input
    #[error("Case {case_index} out of range for input {input} ({side})")]
    CaseOutOfRange {
        input: u8,
        case_index: u8,
        side: CaseSide,
    },

    /// Input has no OFF region
    #[error("Input {0} has no OFF case region")]
    NoOffRegion(u8),

    /// Address beyond the store or below both case regions
    #[error("Address 0x{0:04X} outside the case regions")]
    AddressOutOfRange(u16),

    /// Case addresses must be word aligned
    #[error("Address 0x{0:04X} is not word aligned")]
    Misaligned(u16),

    /// Record header is all ones
    #[error("No case configured at 0x{0:04X}")]
    Unconfigured(u16),

    /// Payload byte 0 of the manual case must carry exactly one bit
    #[error("Input {input} case 0 payload byte 0x{byte:02X} does not have exactly one bit set")]
    AmbiguousPrimaryBit { input: u8, byte: u8 },

    /// Active case list has no room
    #[error("Active case list full ({0} entries)")]
    ListFull(usize),

    /// Store image has the wrong length
    #[error("Store image must be {expected} bytes, got {actual}")]
    ImageSize { expected: usize, actual: usize },

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport error from a frame sink
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaseError {
    /// Whether this failure increments the bounds-error diagnostic counter
    pub fn is_bounds_error(&self) -> bool {
        matches!(
            self,
            CaseError::InputOutOfRange(_)
                | CaseError::CaseOutOfRange { .. }
                | CaseError::NoOffRegion(_)
                | CaseError::AddressOutOfRange(_)
                | CaseError::Misaligned(_)
        )
    }
}
