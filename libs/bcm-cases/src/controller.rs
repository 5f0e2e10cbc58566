//! Body controller - the main loop around the case engine
//!
//! Owns the engine together with the debounced input image, the ignition
//! sources, the one-button machines and the broadcast history. Every entry
//! point is synchronous; the async scheduler drives it under one lock.

use tracing::{debug, info, warn};

use crate::broadcast::{BroadcastReason, Broadcaster};
use crate::conditions::{InputSnapshot, InputState};
use crate::engine::CaseEngine;
use crate::error::Result;
use crate::ignition::IgnitionFlags;
use crate::layout::NUM_INPUTS;
use crate::one_button::{OneButtonAction, OneButtonBank};
use crate::relay::ControlFrame;
use crate::store::CaseStorage;
use crate::types::{AggregatedMessageBucket, Payload};

pub struct BodyController<S> {
    engine: CaseEngine<S>,
    inputs: InputSnapshot,
    flags: IgnitionFlags,
    ignition_inputs: Vec<u8>,
    one_button: OneButtonBank,
    broadcaster: Broadcaster,
    tracked_ignition: bool,
    state_changed: bool,
}

impl<S: CaseStorage> BodyController<S> {
    pub fn new(engine: CaseEngine<S>) -> Self {
        let ignition_inputs = engine.switched_ignition_inputs();
        let one_button = OneButtonBank::new(engine.one_button_inputs());
        info!(
            "Body controller: {} ignition inputs, {} one-button inputs",
            ignition_inputs.len(),
            one_button.len()
        );
        Self {
            engine,
            inputs: InputSnapshot::new(),
            flags: IgnitionFlags::default(),
            ignition_inputs,
            one_button,
            broadcaster: Broadcaster::default(),
            tracked_ignition: false,
            state_changed: false,
        }
    }

    pub fn engine(&self) -> &CaseEngine<S> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut CaseEngine<S> {
        &mut self.engine
    }

    pub fn inputs(&self) -> &InputSnapshot {
        &self.inputs
    }

    pub fn flags(&self) -> IgnitionFlags {
        self.flags
    }

    pub fn ignition(&self) -> bool {
        self.flags.ignition()
    }

    pub fn one_button(&self) -> &OneButtonBank {
        &self.one_button
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    // ========================================================================
    // Main loop entry points
    // ========================================================================

    /// Power-up: load cases for inputs already active and send everything
    pub fn startup<I: InputState + ?Sized>(&mut self, initial: &I, now_ms: u64) -> Vec<AggregatedMessageBucket> {
        self.engine.reset();
        self.broadcaster.clear();
        self.one_button = OneButtonBank::new(
            self.one_button
                .machines()
                .iter()
                .map(|m| m.input)
                .collect::<Vec<_>>(),
        );
        self.inputs = InputSnapshot::new();
        self.flags = IgnitionFlags {
            bus: self.flags.bus,
            security_disarmed: self.flags.security_disarmed,
            ..IgnitionFlags::default()
        };

        for input in 0..NUM_INPUTS as u8 {
            if !initial.is_active(input) {
                continue;
            }
            self.inputs.set(input, true);
            if self.one_button.contains(input) {
                continue;
            }
            if let Err(e) = self.engine.on_input_transition(input, true) {
                warn!("IN{:02} startup load failed: {}", input + 1, e);
            }
        }

        self.run_one_button(now_ms);
        self.tracked_ignition = !self.refresh_ignition_flag();
        self.apply_ignition();

        self.state_changed = false;
        self.broadcast(BroadcastReason::Startup)
    }

    /// Feed one debounced input sample
    pub fn scan<I: InputState + ?Sized>(&mut self, sample: &I, now_ms: u64) {
        for input in 0..NUM_INPUTS as u8 {
            let active = sample.is_active(input);
            if active == self.inputs.is_active(input) {
                continue;
            }
            self.inputs.set(input, active);
            self.state_changed = true;
            if self.one_button.contains(input) {
                continue;
            }
            debug!("IN{:02} {}", input + 1, if active { "on" } else { "off" });
            if let Err(e) = self.engine.on_input_transition(input, active) {
                warn!("IN{:02} transition failed: {}", input + 1, e);
            }
        }

        self.run_one_button(now_ms);
        self.refresh_ignition_flag();
        self.apply_ignition();
    }

    /// Route a received frame to the control decoder or the relay table
    pub fn process_frame(&mut self, can_id: u32, data: &Payload) -> bool {
        if let Some(control) = ControlFrame::decode(can_id, data) {
            if control.bus_ignition != self.flags.bus
                || control.security_disarmed != self.flags.security_disarmed
            {
                info!(
                    "Bus control: ignition {}, security {}",
                    control.bus_ignition,
                    if control.security_disarmed { "disarmed" } else { "armed" }
                );
            }
            self.flags.bus = control.bus_ignition;
            self.flags.security_disarmed = control.security_disarmed;
            self.refresh_ignition_flag();
            self.apply_ignition();
            return true;
        }

        if self.engine.relay_mut().process(can_id, data) {
            self.state_changed = true;
            return true;
        }
        false
    }

    /// Pattern tick: advance timers and send patterned messages
    ///
    /// A pending state change is sent first, so one-shot entries queued since
    /// the last flush go out before the tick prunes them.
    pub fn pattern_tick(&mut self) -> Vec<AggregatedMessageBucket> {
        let mut sent = self.flush_state_change().unwrap_or_default();
        self.engine.tick();
        sent.extend(self.broadcast(BroadcastReason::PatternTick));
        sent
    }

    /// Send changed messages if anything happened since the last flush
    pub fn flush_state_change(&mut self) -> Option<Vec<AggregatedMessageBucket>> {
        if !std::mem::take(&mut self.state_changed) {
            return None;
        }
        Some(self.broadcast(BroadcastReason::StateChange))
    }

    pub fn has_pending_change(&self) -> bool {
        self.state_changed
    }

    // ========================================================================
    // Manual commands
    // ========================================================================

    pub fn set_manual(&mut self, input: u8, primary_on: bool, secondary_on: bool) -> Result<()> {
        self.engine.set_manual(input, primary_on, secondary_on)?;
        self.state_changed = true;
        Ok(())
    }

    pub fn clear_manual(&mut self, input: u8) -> Result<()> {
        self.engine.clear_manual(input)?;
        self.state_changed = true;
        Ok(())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn broadcast(&mut self, reason: BroadcastReason) -> Vec<AggregatedMessageBucket> {
        let buckets = self.engine.aggregate(&self.inputs);
        let sent = self.broadcaster.plan(reason, buckets);
        self.engine.prune_one_shot_entries();
        sent
    }

    fn run_one_button(&mut self, now_ms: u64) {
        if self.one_button.is_empty() {
            return;
        }
        for (input, action) in self.one_button.scan(&self.inputs, now_ms) {
            let result = match action {
                OneButtonAction::IgnitionOn => self.engine.set_manual(input, true, false),
                OneButtonAction::Crank => self.engine.set_manual(input, true, true),
                OneButtonAction::IgnitionOff => self.engine.clear_manual(input),
            };
            match result {
                Ok(()) => {
                    self.flags.one_button = action != OneButtonAction::IgnitionOff;
                    self.inputs.set_ignition(self.flags.ignition());
                    self.state_changed = true;
                },
                Err(e) => warn!("IN{:02} one-button {:?} failed: {}", input + 1, action, e),
            }
        }
    }

    /// Recompute the ignition flag; returns the new value
    fn refresh_ignition_flag(&mut self) -> bool {
        self.flags.switched = self
            .ignition_inputs
            .iter()
            .any(|&input| self.inputs.is_active(input));
        let ignition = self.flags.ignition();
        self.inputs.set_ignition(ignition);
        ignition
    }

    fn apply_ignition(&mut self) {
        let ignition = self.flags.ignition();
        if ignition != self.tracked_ignition {
            self.engine.set_ignition_tracked(ignition);
            self.tracked_ignition = ignition;
            self.state_changed = true;
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::j1939;
    use crate::layout::NEUTRAL_INPUT;
    use crate::store::MemoryStore;
    use crate::types::{CaseConfig, CaseRecord, CaseSide, MessageId};

    const LIGHTS: MessageId = MessageId::new(0xFF01, 0x1E);
    const POWER: MessageId = MessageId::new(0xFF10, 0x1E);
    const MARKERS: MessageId = MessageId::new(0xFF20, 0x1E);

    fn controller() -> BodyController<MemoryStore> {
        let mut image = MemoryStore::erased();
        image
            .write_case(2, 0, CaseSide::On, &CaseRecord::new(6, LIGHTS, [0x80, 0, 0, 0, 0, 0, 0, 0]).with_pattern(3, 3))
            .unwrap();
        image
            .write_case(
                1,
                0,
                CaseSide::On,
                &CaseRecord::new(3, POWER, [0x20, 0, 0, 0, 0, 0, 0, 0])
                    .with_config(CaseConfig::default().one_button_start()),
            )
            .unwrap();
        image
            .write_case(
                4,
                0,
                CaseSide::On,
                &CaseRecord::new(6, MARKERS, [0x01, 0, 0, 0, 0, 0, 0, 0])
                    .with_config(CaseConfig::default().track_ignition()),
            )
            .unwrap();
        BodyController::new(CaseEngine::with_defaults(image))
    }

    #[test]
    fn test_startup_sends_active_inputs() {
        let mut controller = controller();
        let sent = controller.startup(&InputSnapshot::with_active(&[2]), 0);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].id, LIGHTS);
        assert!(sent[0].has_pattern);
        // Ignition-tracked messages are announced off
        assert_eq!(sent[1].id, MARKERS);
        assert_eq!(sent[1].payload, [0; 8]);
        assert!(!controller.ignition());
        assert!(controller.engine().active().iter().all(|e| !e.one_shot));
    }

    #[test]
    fn test_scan_then_flush() {
        let mut controller = controller();
        controller.startup(&InputSnapshot::new(), 0);
        assert!(controller.flush_state_change().is_none());

        controller.scan(&InputSnapshot::with_active(&[2]), 30);
        let sent = controller.flush_state_change().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload[0], 0x80);

        controller.scan(&InputSnapshot::new(), 60);
        let sent = controller.flush_state_change().unwrap();
        assert_eq!(sent[0].payload, [0; 8]);
        assert!(controller.engine().active().is_empty());
    }

    #[test]
    fn test_pattern_tick_flashes() {
        let mut controller = controller();
        controller.startup(&InputSnapshot::with_active(&[2]), 0);

        let mut levels = Vec::new();
        for _ in 0..8 {
            let sent = controller.pattern_tick();
            assert_eq!(sent.len(), 1);
            levels.push(sent[0].payload[0]);
        }
        assert_eq!(levels, vec![0x80, 0x80, 0x80, 0, 0, 0, 0x80, 0x80]);
    }

    #[test]
    fn test_one_button_drives_ignition_tracking() {
        let mut controller = controller();
        controller.startup(&InputSnapshot::new(), 0);

        controller.scan(&InputSnapshot::with_active(&[1]), 100);
        assert!(controller.ignition());
        let sent = controller.flush_state_change().unwrap();
        let power = sent.iter().find(|b| b.id == POWER).unwrap();
        assert_eq!(power.payload[0], 0x20);
        let markers = sent.iter().find(|b| b.id == MARKERS).unwrap();
        assert_eq!(markers.payload[0], 0x01);

        // Hold in neutral for the starter
        controller.scan(&InputSnapshot::with_active(&[1, NEUTRAL_INPUT]), 1200);
        let sent = controller.flush_state_change().unwrap();
        let power = sent.iter().find(|b| b.id == POWER).unwrap();
        assert_eq!(power.payload[0], 0x30);

        // Release: starter off, ignition stays on
        controller.scan(&InputSnapshot::with_active(&[NEUTRAL_INPUT]), 1300);
        assert!(controller.ignition());
        let sent = controller.flush_state_change().unwrap();
        let power = sent.iter().find(|b| b.id == POWER).unwrap();
        assert_eq!(power.payload[0], 0x20);

        // Second press switches off on release
        controller.scan(&InputSnapshot::with_active(&[1]), 5000);
        controller.scan(&InputSnapshot::new(), 5100);
        assert!(!controller.ignition());
        let sent = controller.flush_state_change().unwrap();
        assert!(sent.iter().all(|b| b.payload == [0; 8]));
    }

    #[test]
    fn test_control_and_relay_frames() {
        let mut controller = controller();
        controller.startup(&InputSnapshot::new(), 0);

        let control = j1939::can_id(6, 0xAF00, 0x21);
        assert!(controller.process_frame(control, &[0, 0, 0, 0, 0x01, 0, 0, 0]));
        assert!(controller.ignition());
        assert!(controller.engine().active().iter().any(|e| e.record.id == MARKERS));

        let relay = j1939::can_id(6, 0xA105, 0x21);
        assert!(controller.process_frame(relay, &[0x0F, 0, 0, 0, 0, 0, 0, 0]));
        let sent = controller.flush_state_change().unwrap();
        let relayed = sent
            .iter()
            .find(|b| b.id == MessageId::new(0xF105, 0x21))
            .unwrap();
        assert_eq!(relayed.priority, 6);

        let other = j1939::can_id(6, 0xFEF1, 0x00);
        assert!(!controller.process_frame(other, &[0; 8]));
    }

    #[test]
    fn test_bus_ignition_off_clears_before_tick_prunes() {
        let mut controller = controller();
        controller.startup(&InputSnapshot::new(), 0);
        let control = j1939::can_id(6, 0xAF00, 0x21);

        controller.process_frame(control, &[0, 0, 0, 0, 0x01, 0, 0, 0]);
        let sent = controller.flush_state_change().unwrap();
        let markers = sent.iter().find(|b| b.id == MARKERS).unwrap();
        assert_eq!(markers.payload[0], 0x01);

        controller.process_frame(control, &[0; 8]);
        assert!(!controller.ignition());
        assert!(controller.has_pending_change());

        let sent = controller.pattern_tick();
        let markers = sent.iter().find(|b| b.id == MARKERS).unwrap();
        assert_eq!(markers.payload, [0; 8]);
        assert_eq!(controller.broadcaster().last_sent(MARKERS), Some([0; 8]));
        assert!(!controller.has_pending_change());
        assert!(controller.engine().active().iter().all(|e| !e.one_shot));
    }
}
