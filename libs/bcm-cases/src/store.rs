//! Case store: address resolution and record decoding over a byte-addressed image
//!
//! `CaseStorage` is the narrow read interface to the persistent store.
//! `MemoryStore` is the in-RAM image used by tooling and tests.
//! `CaseStore` adds validation and the read/bounds diagnostics on top.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{debug, warn};

use crate::error::{CaseError, Result};
use crate::layout::{self, CASE_SIZE, STORE_SIZE};
use crate::types::{offsets, CaseConfig, CaseRecord, CaseSide, MessageId};

/// Erased store content
pub const ERASED: u8 = 0xFF;

/// Byte-level read access to the persistent store
pub trait CaseStorage: Send + Sync {
    /// Read one byte; addresses past the end read as erased
    fn read_byte(&self, address: u16) -> u8;
}

// ============================================================================
// In-memory image
// ============================================================================

/// A full store image held in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryStore {
    bytes: Vec<u8>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::erased()
    }
}

impl MemoryStore {
    /// Image with every byte erased
    pub fn erased() -> Self {
        Self {
            bytes: vec![ERASED; STORE_SIZE as usize],
        }
    }

    /// Wrap a raw image; must be exactly the store size
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != STORE_SIZE as usize {
            return Err(CaseError::ImageSize {
                expected: STORE_SIZE as usize,
                actual: bytes.len(),
            });
        }
        Ok(Self { bytes })
    }

    /// Load a raw binary image from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        debug!("Loaded store image {} ({} bytes)", path.display(), bytes.len());
        Self::from_bytes(bytes)
    }

    /// Write the raw image to disk
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, &self.bytes)?;
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn write_byte(&mut self, address: u16, value: u8) -> Result<()> {
        let slot = self
            .bytes
            .get_mut(address as usize)
            .ok_or(CaseError::AddressOutOfRange(address))?;
        *slot = value;
        Ok(())
    }

    /// Encode `record` at the slot of (`input`, `case_index`, `side`)
    ///
    /// Returns the record address. Bytes that fall past the end of the
    /// store are dropped.
    pub fn write_case(
        &mut self,
        input: u8,
        case_index: u8,
        side: CaseSide,
        record: &CaseRecord,
    ) -> Result<u16> {
        let address = layout::case_address(input, case_index, side)?;
        self.write_record_at(address, &record.to_bytes());
        Ok(address)
    }

    /// Reset the slot of (`input`, `case_index`, `side`) to erased
    pub fn erase_case(&mut self, input: u8, case_index: u8, side: CaseSide) -> Result<u16> {
        let address = layout::case_address(input, case_index, side)?;
        self.write_record_at(address, &[ERASED; CASE_SIZE as usize]);
        Ok(address)
    }

    fn write_record_at(&mut self, address: u16, bytes: &[u8]) {
        let start = address as usize;
        let end = (start + bytes.len()).min(self.bytes.len());
        let fit = end - start;
        self.bytes[start..end].copy_from_slice(&bytes[..fit]);
        if fit < bytes.len() {
            warn!(
                "Case at 0x{:04X} overhangs the store end by {} bytes",
                address,
                bytes.len() - fit
            );
        }
    }
}

impl CaseStorage for MemoryStore {
    fn read_byte(&self, address: u16) -> u8 {
        self.bytes.get(address as usize).copied().unwrap_or(ERASED)
    }
}

// ============================================================================
// Validated access with diagnostics
// ============================================================================

/// Read-only case access over a storage backend
///
/// Counters use relaxed atomics so the store can be shared behind `&self`.
#[derive(Debug)]
pub struct CaseStore<S> {
    storage: S,
    reads: AtomicU32,
    bounds_errors: AtomicU32,
}

impl<S: CaseStorage> CaseStore<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            reads: AtomicU32::new(0),
            bounds_errors: AtomicU32::new(0),
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Store reads so far (one per decode plus one per byte)
    pub fn read_count(&self) -> u32 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Range and alignment violations so far
    pub fn bounds_errors(&self) -> u32 {
        self.bounds_errors.load(Ordering::Relaxed)
    }

    pub fn reset_counters(&self) {
        self.reads.store(0, Ordering::Relaxed);
        self.bounds_errors.store(0, Ordering::Relaxed);
    }

    /// Count `err` if it is a bounds violation and hand it back
    pub(crate) fn note(&self, err: CaseError) -> CaseError {
        if err.is_bounds_error() {
            self.bounds_errors.fetch_add(1, Ordering::Relaxed);
        }
        err
    }

    /// Validate an input index, counting a bounds error on failure
    pub fn check_input(&self, input: u8) -> Result<()> {
        if layout::is_valid_input(input) {
            Ok(())
        } else {
            Err(self.note(CaseError::InputOutOfRange(input)))
        }
    }

    fn read_byte(&self, address: u16) -> u8 {
        if address >= STORE_SIZE {
            self.bounds_errors.fetch_add(1, Ordering::Relaxed);
            return ERASED;
        }
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.storage.read_byte(address)
    }

    fn read_block<const N: usize>(&self, address: u16) -> [u8; N] {
        let mut out = [0u8; N];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.read_byte(address.wrapping_add(i as u16));
        }
        out
    }

    /// Resolve (`input`, `case_index`, `side`) to a record address
    ///
    /// Every failure increments the bounds counter.
    pub fn resolve_address(&self, input: u8, case_index: u8, side: CaseSide) -> Result<u16> {
        layout::case_address(input, case_index, side).map_err(|e| self.note(e))
    }

    /// Decode the record at `address`
    ///
    /// An all-ones header yields `valid == false`; that is not an error.
    pub fn decode_case(&self, address: u16) -> Result<CaseRecord> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        layout::check_address(address).map_err(|e| self.note(e))?;

        let header: [u8; 4] = self.read_block(address);
        if header == [ERASED; 4] {
            return Ok(CaseRecord::default());
        }

        let config = self.read_byte(address + offsets::CONFIG);
        let pattern = self.read_byte(address + offsets::PATTERN);
        let must_be_on = self.read_block(address + offsets::MUST_BE_ON);
        let must_be_off = self.read_block(address + offsets::MUST_BE_OFF);
        let payload = self.read_block(address + offsets::PAYLOAD);

        Ok(CaseRecord {
            priority: header[0] & 0x07,
            id: MessageId::new(u16::from_be_bytes([header[1], header[2]]), header[3]),
            config: CaseConfig(config),
            pattern_on: pattern >> 4,
            pattern_off: pattern & 0x0F,
            must_be_on,
            must_be_off,
            payload,
            valid: true,
        })
    }

    /// Resolve and decode in one step
    pub fn read_case(&self, input: u8, case_index: u8, side: CaseSide) -> Result<CaseRecord> {
        let address = self.resolve_address(input, case_index, side)?;
        self.decode_case(address)
    }

    /// Resolve and decode, treating an unconfigured slot as an error
    pub fn read_configured_case(
        &self,
        input: u8,
        case_index: u8,
        side: CaseSide,
    ) -> Result<CaseRecord> {
        let address = self.resolve_address(input, case_index, side)?;
        let record = self.decode_case(address)?;
        if record.valid {
            Ok(record)
        } else {
            Err(CaseError::Unconfigured(address))
        }
    }

    /// Configuration byte of a case without decoding the rest of the record
    pub fn case_config(&self, input: u8, case_index: u8, side: CaseSide) -> Result<CaseConfig> {
        let address = self.resolve_address(input, case_index, side)?;
        Ok(CaseConfig(self.read_byte(address + offsets::CONFIG)))
    }
}
