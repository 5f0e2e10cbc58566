//! Engine configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::aggregate::AggregationLimits;
use crate::error::{CaseError, Result};
use crate::j1939::DEFAULT_PRIORITY;
use crate::layout::{MAX_ACTIVE_CASES, MAX_UNIQUE_MESSAGES};

/// Default pattern tick interval (250ms)
pub const DEFAULT_TICK_MS: u64 = 250;

/// Default input scan interval (30ms)
pub const DEFAULT_SCAN_MS: u64 = 30;

/// Runtime limits and timing for the case engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Pattern tick interval in milliseconds
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Input scan interval in milliseconds
    #[serde(default = "default_scan_ms")]
    pub scan_ms: u64,

    /// Active case list capacity
    #[serde(default = "default_active_capacity")]
    pub active_capacity: usize,

    /// Maximum distinct outbound messages per aggregation
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// Priority for messages that only come from the relay table
    #[serde(default = "default_relay_priority")]
    pub relay_priority: u8,

    /// Raw store image to load at startup
    #[serde(default)]
    pub store_image: Option<PathBuf>,
}

fn default_tick_ms() -> u64 {
    DEFAULT_TICK_MS
}

fn default_scan_ms() -> u64 {
    DEFAULT_SCAN_MS
}

fn default_active_capacity() -> usize {
    MAX_ACTIVE_CASES
}

fn default_max_messages() -> usize {
    MAX_UNIQUE_MESSAGES
}

fn default_relay_priority() -> u8 {
    DEFAULT_PRIORITY
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            scan_ms: default_scan_ms(),
            active_capacity: default_active_capacity(),
            max_messages: default_max_messages(),
            relay_priority: default_relay_priority(),
            store_image: None,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tick_ms == 0 || self.scan_ms == 0 {
            return Err(CaseError::Config(
                "tick_ms and scan_ms must be greater than zero".to_string(),
            ));
        }
        if self.active_capacity == 0 || self.active_capacity > MAX_ACTIVE_CASES {
            return Err(CaseError::Config(format!(
                "active_capacity must be within 1..={}",
                MAX_ACTIVE_CASES
            )));
        }
        if self.max_messages == 0 || self.max_messages > MAX_UNIQUE_MESSAGES {
            return Err(CaseError::Config(format!(
                "max_messages must be within 1..={}",
                MAX_UNIQUE_MESSAGES
            )));
        }
        if self.relay_priority > 7 {
            return Err(CaseError::Config(format!(
                "relay_priority {} exceeds 7",
                self.relay_priority
            )));
        }
        Ok(())
    }

    pub fn aggregation_limits(&self) -> AggregationLimits {
        AggregationLimits {
            capacity: self.max_messages,
            relay_priority: self.relay_priority,
        }
    }
}
