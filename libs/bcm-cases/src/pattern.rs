//! Pattern timer bank - one flasher state machine per input
//!
//! A timer is armed from case 0 of an input and shared by every case of that
//! input, so all of its messages flash in step. `tick` is called at the fixed
//! pattern interval (250 ms by default).

use serde::{Deserialize, Serialize};

use crate::layout::{is_valid_input, NUM_INPUTS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternPhase {
    #[default]
    Inactive,
    OnPhase,
    OffPhase,
}

/// Flasher state for one input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PatternTimer {
    pub phase: PatternPhase,
    /// Ticks left before the next toggle check
    pub countdown: u8,
    pub on_ticks: u8,
    pub off_ticks: u8,
    pub has_pattern: bool,
}

impl PatternTimer {
    fn advance(&mut self) {
        if self.countdown == 0 {
            match self.phase {
                PatternPhase::OnPhase => {
                    self.phase = PatternPhase::OffPhase;
                    self.countdown = self.off_ticks;
                },
                PatternPhase::OffPhase => {
                    self.phase = PatternPhase::OnPhase;
                    self.countdown = self.on_ticks;
                },
                PatternPhase::Inactive => {},
            }
        }

        if self.countdown > 0 {
            self.countdown -= 1;
        }
    }
}

/// Timers for all inputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternTimerBank {
    timers: [PatternTimer; NUM_INPUTS],
}

impl Default for PatternTimerBank {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternTimerBank {
    pub fn new() -> Self {
        Self {
            timers: [PatternTimer::default(); NUM_INPUTS],
        }
    }

    /// Start `input` flashing in the on phase
    pub fn arm(&mut self, input: u8, on_ticks: u8, off_ticks: u8) {
        if let Some(timer) = self.timers.get_mut(input as usize) {
            *timer = PatternTimer {
                phase: PatternPhase::OnPhase,
                countdown: on_ticks,
                on_ticks,
                off_ticks,
                has_pattern: true,
            };
        }
    }

    /// Stop `input` flashing; durations are kept for diagnostics
    pub fn disarm(&mut self, input: u8) {
        if let Some(timer) = self.timers.get_mut(input as usize) {
            timer.phase = PatternPhase::Inactive;
            timer.has_pattern = false;
            timer.countdown = 0;
        }
    }

    /// Advance every armed timer by one tick
    ///
    /// When the countdown is already zero the phase toggles and reloads from
    /// the new phase's duration; the countdown is then decremented if nonzero.
    pub fn tick(&mut self) {
        for timer in self
            .timers
            .iter_mut()
            .filter(|t| t.has_pattern && t.phase != PatternPhase::Inactive)
        {
            timer.advance();
        }
    }

    /// Whether `input`'s messages should carry their payload right now
    ///
    /// True for inputs without an armed pattern; false for an invalid input.
    pub fn is_in_on_phase(&self, input: u8) -> bool {
        if !is_valid_input(input) {
            return false;
        }
        let timer = &self.timers[input as usize];
        !timer.has_pattern || timer.phase == PatternPhase::OnPhase
    }

    pub fn has_pattern(&self, input: u8) -> bool {
        self.timers
            .get(input as usize)
            .is_some_and(|t| t.has_pattern)
    }

    pub fn get(&self, input: u8) -> Option<&PatternTimer> {
        self.timers.get(input as usize)
    }

    pub fn armed_count(&self) -> usize {
        self.timers.iter().filter(|t| t.has_pattern).count()
    }

    pub fn reset(&mut self) {
        self.timers = [PatternTimer::default(); NUM_INPUTS];
    }
}
