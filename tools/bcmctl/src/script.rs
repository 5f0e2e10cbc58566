//! Simulation script format
//!
//! ```yaml
//! cases:
//!   - { input: 2, pgn: 0xFF01, source_addr: 0x1E, payload: [0x80], pattern: [3, 3] }
//! steps:
//!   - input: { index: 2, active: true }
//!   - tick: 4
//!   - input: { index: 2, active: false }
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

use bcm_cases::{j1939, CaseConfig, CaseRecord, CaseSide, MemoryStore, MessageId};

#[derive(Debug, Deserialize)]
pub struct Script {
    /// Cases written into the image before the run
    #[serde(default)]
    pub cases: Vec<CaseSpec>,
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseFlag {
    IgnitionInput,
    Overridable,
    OneButtonStart,
    TrackIgnition,
}

#[derive(Debug, Deserialize)]
pub struct CaseSpec {
    pub input: u8,
    #[serde(default)]
    pub case: u8,
    #[serde(default = "default_side")]
    pub side: CaseSide,
    #[serde(default = "default_priority")]
    pub priority: u8,
    pub pgn: u16,
    #[serde(default)]
    pub source_addr: u8,
    /// Up to 8 bytes; missing bytes are zero
    pub payload: Vec<u8>,
    /// On and off ticks
    #[serde(default)]
    pub pattern: Option<[u8; 2]>,
    #[serde(default)]
    pub flags: Vec<CaseFlag>,
    #[serde(default)]
    pub require_on: Vec<u8>,
    #[serde(default)]
    pub require_off: Vec<u8>,
    #[serde(default)]
    pub ignition: Option<bool>,
}

fn default_side() -> CaseSide {
    CaseSide::On
}

fn default_priority() -> u8 {
    j1939::DEFAULT_PRIORITY
}

impl CaseSpec {
    pub fn to_record(&self) -> Result<CaseRecord> {
        if self.payload.len() > 8 {
            bail!(
                "IN{:02} case {}: payload has {} bytes, at most 8 allowed",
                u16::from(self.input) + 1,
                self.case,
                self.payload.len()
            );
        }
        let mut payload = [0u8; 8];
        payload[..self.payload.len()].copy_from_slice(&self.payload);

        let config = self.flags.iter().fold(CaseConfig::default(), |config, flag| match flag {
            CaseFlag::IgnitionInput => config.ignition_input(),
            CaseFlag::Overridable => config.overridable(),
            CaseFlag::OneButtonStart => config.one_button_start(),
            CaseFlag::TrackIgnition => config.track_ignition(),
        });

        let mut record = CaseRecord::new(
            self.priority,
            MessageId::new(self.pgn, self.source_addr),
            payload,
        )
        .with_config(config);
        if let Some([on, off]) = self.pattern {
            record = record.with_pattern(on, off);
        }
        for &input in &self.require_on {
            record = record.require_on(input);
        }
        for &input in &self.require_off {
            record = record.require_off(input);
        }
        if let Some(on) = self.ignition {
            record = record.require_ignition(on);
        }
        Ok(record)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Debounced input edge
    Input { index: u8, active: bool },
    /// Pattern ticks to run
    Tick(u32),
    /// Advance the clock and rescan held buttons
    Wait(u64),
    /// Force case 0 of an input
    Manual {
        input: u8,
        #[serde(default = "default_true")]
        primary: bool,
        #[serde(default)]
        secondary: bool,
    },
    ClearManual(u8),
    /// Received bus frame
    Frame { can_id: u32, data: Vec<u8> },
}

fn default_true() -> bool {
    true
}

impl Script {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script {}", path.display()))?;
        serde_yaml::from_str(&text)
            .with_context(|| format!("Failed to parse script {}", path.display()))
    }

    /// Write the script's cases into `image`
    pub fn apply_cases(&self, image: &mut MemoryStore) -> Result<()> {
        for spec in &self.cases {
            let record = spec.to_record()?;
            image
                .write_case(spec.input, spec.case, spec.side, &record)
                .with_context(|| {
                    format!(
                        "IN{:02} {} case {}",
                        u16::from(spec.input) + 1,
                        spec.side,
                        spec.case
                    )
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    const SCRIPT: &str = r#"
cases:
  - input: 2
    pgn: 0xFF01
    source_addr: 0x1E
    payload: [0x80]
    pattern: [3, 3]
  - input: 24
    side: off
    pgn: 0xFF02
    payload: [0x01, 0x02]
    flags: [overridable]
    require_on: [9]
    ignition: true
steps:
  - input: { index: 2, active: true }
  - tick: 4
  - wait: 500
  - manual: { input: 1, secondary: true }
  - clear_manual: 1
  - frame: { can_id: 0x18A10521, data: [1] }
"#;

    #[test]
    fn test_parse_script() {
        let script: Script = serde_yaml::from_str(SCRIPT).unwrap();
        assert_eq!(script.cases.len(), 2);
        assert_eq!(script.steps.len(), 6);
        assert!(matches!(script.steps[1], Step::Tick(4)));
        assert!(matches!(
            script.steps[3],
            Step::Manual { input: 1, primary: true, secondary: true }
        ));

        let flasher = script.cases[0].to_record().unwrap();
        assert_eq!(flasher.priority, 6);
        assert_eq!(flasher.id, MessageId::new(0xFF01, 0x1E));
        assert_eq!((flasher.pattern_on, flasher.pattern_off), (3, 3));

        let off = script.cases[1].to_record().unwrap();
        assert_eq!(script.cases[1].side, CaseSide::Off);
        assert!(off.is_overridable());
        assert_eq!(off.must_be_on[1], 0x02);
        assert_eq!(off.payload, [0x01, 0x02, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_apply_cases() {
        let script: Script = serde_yaml::from_str(SCRIPT).unwrap();
        let mut image = MemoryStore::erased();
        script.apply_cases(&mut image).unwrap();
        assert_ne!(image, MemoryStore::erased());
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let spec: CaseSpec =
            serde_yaml::from_str("{ input: 0, pgn: 1, payload: [1, 2, 3, 4, 5, 6, 7, 8, 9] }").unwrap();
        assert!(spec.to_record().is_err());
    }

    #[test]
    fn test_out_of_range_input_reports_error() {
        let script: Script =
            serde_yaml::from_str("cases:\n  - { input: 255, pgn: 0xFF01, payload: [1] }\nsteps: []\n").unwrap();
        let err = script.apply_cases(&mut MemoryStore::erased()).unwrap_err();
        assert!(err.to_string().starts_with("IN256"));

        let spec: CaseSpec =
            serde_yaml::from_str("{ input: 255, pgn: 1, payload: [1, 2, 3, 4, 5, 6, 7, 8, 9] }").unwrap();
        assert!(spec.to_record().unwrap_err().to_string().starts_with("IN256"));
    }
}
