//! One-button start
//!
//! A single push button replaces the ignition key: a press from ignition off
//! switches ignition on, holding it with the gearbox in neutral cranks the
//! engine, and a press that starts with ignition on switches it off on
//! release.

use serde::Serialize;
use tracing::{debug, info};

use crate::conditions::InputState;
use crate::layout::NEUTRAL_INPUT;

/// Presses shorter than this count as a quick toggle
pub const QUICK_PRESS_MS: u64 = 500;

/// Hold time before the starter engages
pub const STARTER_DELAY_MS: u64 = 1000;

/// At most this many one-button inputs are tracked
pub const MAX_ONE_BUTTON_INPUTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OneButtonAction {
    /// Primary bit on (`SetManual(primary)`)
    IgnitionOn,
    /// Primary and secondary bits on (`SetManual(primary, secondary)`)
    Crank,
    /// Manual case cleared
    IgnitionOff,
}

/// Latching state machine for one button
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OneButtonStart {
    pub input: u8,
    pressed: bool,
    pressed_at_ms: u64,
    began_with_ignition: bool,
    cranking: bool,
}

impl OneButtonStart {
    pub fn new(input: u8) -> Self {
        Self {
            input,
            pressed: false,
            pressed_at_ms: 0,
            began_with_ignition: false,
            cranking: false,
        }
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed
    }

    pub fn is_cranking(&self) -> bool {
        self.cranking
    }

    /// Feed the debounced button level
    ///
    /// `ignition` is the global flag before this update; `neutral` is the
    /// level of the neutral-gear input.
    pub fn update(
        &mut self,
        pressed: bool,
        ignition: bool,
        neutral: bool,
        now_ms: u64,
    ) -> Option<OneButtonAction> {
        match (self.pressed, pressed) {
            (false, true) => {
                self.pressed = true;
                self.pressed_at_ms = now_ms;
                self.began_with_ignition = ignition;
                self.cranking = false;
                debug!("IN{:02} start button pressed", self.input + 1);
                if ignition {
                    None
                } else {
                    Some(OneButtonAction::IgnitionOn)
                }
            },
            (true, true) => {
                let held = now_ms.saturating_sub(self.pressed_at_ms);
                if !self.began_with_ignition && !self.cranking && neutral && held >= STARTER_DELAY_MS {
                    self.cranking = true;
                    info!("IN{:02} starter engaged after {}ms", self.input + 1, held);
                    Some(OneButtonAction::Crank)
                } else {
                    None
                }
            },
            (true, false) => {
                self.pressed = false;
                let held = now_ms.saturating_sub(self.pressed_at_ms);
                let kind = if held < QUICK_PRESS_MS { "quick" } else { "long" };
                let was_cranking = std::mem::take(&mut self.cranking);
                if self.began_with_ignition {
                    info!("IN{:02} {} press: ignition off", self.input + 1, kind);
                    Some(OneButtonAction::IgnitionOff)
                } else {
                    if was_cranking {
                        info!("IN{:02} starter released", self.input + 1);
                    } else {
                        debug!("IN{:02} {} press released, ignition stays on", self.input + 1, kind);
                    }
                    Some(OneButtonAction::IgnitionOn)
                }
            },
            (false, false) => None,
        }
    }
}

/// All one-button machines, scanned together
#[derive(Debug, Clone, Default, Serialize)]
pub struct OneButtonBank {
    machines: Vec<OneButtonStart>,
}

impl OneButtonBank {
    /// Track the first `MAX_ONE_BUTTON_INPUTS` of `inputs`
    pub fn new(inputs: impl IntoIterator<Item = u8>) -> Self {
        Self {
            machines: inputs
                .into_iter()
                .take(MAX_ONE_BUTTON_INPUTS)
                .map(OneButtonStart::new)
                .collect(),
        }
    }

    pub fn contains(&self, input: u8) -> bool {
        self.machines.iter().any(|m| m.input == input)
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    pub fn machines(&self) -> &[OneButtonStart] {
        &self.machines
    }

    /// Update every machine from `state`; actions are returned in input order
    pub fn scan<I: InputState + ?Sized>(&mut self, state: &I, now_ms: u64) -> Vec<(u8, OneButtonAction)> {
        let neutral = state.is_active(NEUTRAL_INPUT);
        let mut ignition = state.ignition();
        let mut actions = Vec::new();
        for machine in &mut self.machines {
            let pressed = state.is_active(machine.input);
            if let Some(action) = machine.update(pressed, ignition, neutral, now_ms) {
                ignition = action != OneButtonAction::IgnitionOff;
                actions.push((machine.input, action));
            }
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::InputSnapshot;

    #[test]
    fn test_press_from_off_turns_ignition_on() {
        let mut button = OneButtonStart::new(1);
        assert_eq!(button.update(true, false, false, 0), Some(OneButtonAction::IgnitionOn));
        assert!(button.is_pressed());
        assert_eq!(button.update(true, true, false, 200), None);
        // Release keeps ignition on
        assert_eq!(button.update(false, true, false, 300), Some(OneButtonAction::IgnitionOn));
        assert!(!button.is_pressed());
    }

    #[test]
    fn test_press_from_on_turns_ignition_off_on_release() {
        let mut button = OneButtonStart::new(1);
        assert_eq!(button.update(true, true, false, 0), None);
        assert_eq!(button.update(true, true, true, 1500), None);
        assert_eq!(button.update(false, true, false, 1600), Some(OneButtonAction::IgnitionOff));
    }

    #[test]
    fn test_hold_in_neutral_cranks_once() {
        let mut button = OneButtonStart::new(1);
        button.update(true, false, true, 0);
        assert_eq!(button.update(true, true, true, 999), None);
        assert_eq!(button.update(true, true, true, 1000), Some(OneButtonAction::Crank));
        assert!(button.is_cranking());
        assert_eq!(button.update(true, true, true, 1200), None);
        assert_eq!(button.update(false, true, true, 1300), Some(OneButtonAction::IgnitionOn));
        assert!(!button.is_cranking());
    }

    #[test]
    fn test_hold_out_of_neutral_never_cranks() {
        let mut button = OneButtonStart::new(1);
        button.update(true, false, false, 0);
        assert_eq!(button.update(true, true, false, 5000), None);
        assert!(!button.is_cranking());
    }

    #[test]
    fn test_bank_scan() {
        let mut bank = OneButtonBank::new([1, 3]);
        assert!(bank.contains(3));
        assert!(!bank.contains(2));

        let mut state = InputSnapshot::with_active(&[3, NEUTRAL_INPUT]);
        assert_eq!(bank.scan(&state, 0), vec![(3, OneButtonAction::IgnitionOn)]);

        state.set_ignition(true);
        assert_eq!(bank.scan(&state, 1000), vec![(3, OneButtonAction::Crank)]);

        state.set(3, false);
        assert_eq!(bank.scan(&state, 1100), vec![(3, OneButtonAction::IgnitionOn)]);
    }

    #[test]
    fn test_bank_limit() {
        let bank = OneButtonBank::new(0..20);
        assert_eq!(bank.len(), MAX_ONE_BUTTON_INPUTS);
    }
}
