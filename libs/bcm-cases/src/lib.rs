//! BCM Cases - case-based message composition engine
//!
//! Turns debounced input levels into J1939 output frames for a vehicle
//! body-control module:
//! - Case records decoded from a 4 KiB persistent store
//! - Per-input pattern timers for flashing outputs
//! - A bounded active case list with explicit clearing frames
//! - Aggregation with override masking and relayed messages
//! - Manual, ignition-tracking and one-button start controllers
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌─────────────┐
//! │  Scheduler  │────▶│  Controller  │────▶│ Broadcaster │──▶ FrameSink
//! │ (tick/scan) │     │ (ign, 1-btn) │     │  (changes)  │
//! └─────────────┘     └──────────────┘     └─────────────┘
//!                            │                    ▲
//!                            ▼                    │
//!                     ┌──────────────┐     ┌─────────────┐
//!                     │    Engine    │────▶│  Aggregate  │◀── RelayTable
//!                     │ (active list)│     │  (OR/mask)  │
//!                     └──────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌──────────────┐
//!                     │  CaseStore   │
//!                     │ (ON/OFF map) │
//!                     └──────────────┘
//! ```

mod active;
mod aggregate;
mod broadcast;
mod conditions;
mod config;
mod controller;
mod engine;
mod error;
mod ignition;
pub mod j1939;
pub mod layout;
mod manual;
mod one_button;
mod pattern;
mod relay;
mod scheduler;
mod store;
pub mod types;

// Re-export public API
pub use active::{collect_clearing_pairs, ActiveCaseList, ClearingPair};
pub use aggregate::{aggregate, AggregationLimits};
pub use broadcast::{BroadcastReason, Broadcaster};
pub use conditions::{check_conditions, InputSnapshot, InputState};
pub use config::{EngineConfig, DEFAULT_SCAN_MS, DEFAULT_TICK_MS};
pub use controller::BodyController;
pub use engine::{ActiveEntryInfo, CaseEngine, Diagnostics};
pub use error::{CaseError, Result};
pub use ignition::IgnitionFlags;
pub use manual::manual_bits;
pub use one_button::{
    OneButtonAction, OneButtonBank, OneButtonStart, MAX_ONE_BUTTON_INPUTS, QUICK_PRESS_MS,
    STARTER_DELAY_MS,
};
pub use pattern::{PatternPhase, PatternTimer, PatternTimerBank};
pub use relay::{
    is_relay_frame, translate_pgn, ControlFrame, NoRelay, RelaySource, RelayTable,
    RelayedMessage, CONTROL_PGN, RELAY_SLOTS,
};
pub use scheduler::{
    CaseScheduler, ChannelSink, FrameSink, InboundFrame, InputSource, OutboundFrame,
    SchedulerStatus, SharedInputs,
};
pub use store::{CaseStorage, CaseStore, MemoryStore, ERASED};

// Re-export record types for convenience
pub use types::{
    ActiveCaseInstance, AggregatedMessageBucket, CaseConfig, CaseRecord, CaseSide, EntryOwner,
    MessageId, Payload,
};
