//! Store layout: region bases, per-input case counts and byte offsets
//!
//! Each case record is 32 bytes. ON cases for all 44 inputs are packed from
//! `ON_REGION_BASE`; the inputs that have OFF cases (0-1 and 24-31) are packed
//! from `OFF_REGION_BASE`. The tables are fixed by the provisioning layout and
//! must match the store image byte for byte.

use crate::error::{CaseError, Result};
use crate::types::CaseSide;

/// Number of physical inputs
pub const NUM_INPUTS: usize = 44;

/// Size of one case record in bytes
pub const CASE_SIZE: u16 = 32;

/// Size of the persistent store
pub const STORE_SIZE: u16 = 0x1000;

/// First byte of the ON case region
pub const ON_REGION_BASE: u16 = 0x0022;

/// First byte of the OFF case region
pub const OFF_REGION_BASE: u16 = 0x0D62;

/// Offset table marker for an input without a region
pub const NO_REGION: u16 = 0xFFFF;

pub const MAX_ACTIVE_CASES: usize = 64;
pub const MAX_ON_CASES_PER_INPUT: usize = 8;
pub const MAX_OFF_CASES_PER_INPUT: usize = 2;
pub const MAX_UNIQUE_MESSAGES: usize = 24;

/// Prerequisite byte holding the ignition and security condition bits
pub const CONDITION_FLAGS_BYTE: usize = 5;
pub const IGNITION_CONDITION_BIT: u8 = 0x20;
pub const SECURITY_CONDITION_BIT: u8 = 0x10;

/// Neutral safety input checked before the starter engages
pub const NEUTRAL_INPUT: u8 = 15;

/// Owners whose stale slots are stepped over when loading OFF cases
pub const LEGACY_SKIP_INPUTS: [u8; 2] = [22, 23];

#[rustfmt::skip]
pub const ON_CASE_COUNT: [u8; NUM_INPUTS] = [
    4, 2, 4, 4, 2, 6, 1, 6,
    1, 2, 2, 2, 2, 2, 6, 2,
    2, 6, 2, 2, 2, 2, 6, 6,
    2, 2, 2, 2, 2, 2, 2, 2,
    1, 1, 1, 1, 1, 1,
    2, 2, 1, 1, 1, 1,
];

#[rustfmt::skip]
pub const OFF_CASE_COUNT: [u8; NUM_INPUTS] = [
    2, 2, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0,
    2, 2, 2, 2, 2, 2, 2, 2,
    0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0,
];

#[rustfmt::skip]
pub const ON_OFFSETS: [u16; NUM_INPUTS] = [
    0, 128, 192, 320, 448, 512, 704, 736,
    928, 960, 1024, 1088, 1152, 1216, 1280, 1472,
    1536, 1600, 1792, 1856, 1920, 1984, 2048, 2240,
    2432, 2496, 2560, 2624, 2688, 2752, 2816, 2880,
    2944, 2976, 3008, 3040, 3072, 3104,
    3136, 3200, 3264, 3296, 3328, 3360,
];

#[rustfmt::skip]
pub const OFF_OFFSETS: [u16; NUM_INPUTS] = [
    0, 64, NO_REGION, NO_REGION, NO_REGION, NO_REGION, NO_REGION, NO_REGION,
    NO_REGION, NO_REGION, NO_REGION, NO_REGION, NO_REGION, NO_REGION, NO_REGION, NO_REGION,
    NO_REGION, NO_REGION, NO_REGION, NO_REGION, NO_REGION, NO_REGION, NO_REGION, NO_REGION,
    160, 224, 288, 352, 416, 480, 544, 608,
    NO_REGION, NO_REGION, NO_REGION, NO_REGION, NO_REGION, NO_REGION,
    NO_REGION, NO_REGION, NO_REGION, NO_REGION, NO_REGION, NO_REGION,
];

/// Whether `input` names a physical input
#[inline]
pub fn is_valid_input(input: u8) -> bool {
    (input as usize) < NUM_INPUTS
}

/// Number of cases configured for `input` on `side` (0 for an invalid input)
pub fn case_count(input: u8, side: CaseSide) -> u8 {
    if !is_valid_input(input) {
        return 0;
    }
    match side {
        CaseSide::On => ON_CASE_COUNT[input as usize],
        CaseSide::Off => OFF_CASE_COUNT[input as usize],
    }
}

/// Number of cases the engine will load for `input` on `side`,
/// clamped to the per-input limits
pub fn loadable_case_count(input: u8, side: CaseSide) -> u8 {
    let limit = match side {
        CaseSide::On => MAX_ON_CASES_PER_INPUT,
        CaseSide::Off => MAX_OFF_CASES_PER_INPUT,
    };
    case_count(input, side).min(limit as u8)
}

/// Validate a record address against the store bounds, the case regions and
/// word alignment
pub fn check_address(address: u16) -> Result<()> {
    if address >= STORE_SIZE {
        return Err(CaseError::AddressOutOfRange(address));
    }
    if address < ON_REGION_BASE && address < OFF_REGION_BASE {
        return Err(CaseError::AddressOutOfRange(address));
    }
    if address & 0x01 != 0 {
        return Err(CaseError::Misaligned(address));
    }
    Ok(())
}

/// Compute the store address of a case record
///
/// Pure calculation; diagnostics counting happens in `CaseStore`.
pub fn case_address(input: u8, case_index: u8, side: CaseSide) -> Result<u16> {
    if !is_valid_input(input) {
        return Err(CaseError::InputOutOfRange(input));
    }

    if case_index >= case_count(input, side) {
        return Err(CaseError::CaseOutOfRange {
            input,
            case_index,
            side,
        });
    }

    let (base, offset) = match side {
        CaseSide::On => (ON_REGION_BASE, ON_OFFSETS[input as usize]),
        CaseSide::Off => {
            let offset = OFF_OFFSETS[input as usize];
            if offset == NO_REGION {
                return Err(CaseError::NoOffRegion(input));
            }
            (OFF_REGION_BASE, offset)
        },
    };

    let address = base as u32 + offset as u32 + case_index as u32 * CASE_SIZE as u32;
    if address >= STORE_SIZE as u32 {
        return Err(CaseError::AddressOutOfRange(address as u16));
    }
    let address = address as u16;
    check_address(address)?;
    Ok(address)
}
