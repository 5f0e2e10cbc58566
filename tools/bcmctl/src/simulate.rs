//! `simulate` command: run a script against the body controller with a
//! virtual clock

use anyhow::{Context, Result};
use colored::*;
use serde::Serialize;
use tracing::debug;

use bcm_cases::{
    AggregatedMessageBucket, BodyController, CaseEngine, EngineConfig, InputSnapshot,
    MemoryStore, OutboundFrame, Payload,
};

use crate::script::{Script, Step};

/// Frames produced by one script step
#[derive(Debug, Serialize)]
pub struct StepReport {
    pub step: usize,
    pub time_ms: u64,
    pub label: String,
    pub frames: Vec<OutboundFrame>,
}

pub struct Simulator {
    controller: BodyController<MemoryStore>,
    inputs: InputSnapshot,
    now_ms: u64,
    tick_ms: u64,
}

impl Simulator {
    pub fn new(image: MemoryStore, config: &EngineConfig) -> Result<Self> {
        let engine = CaseEngine::new(image, config).context("Invalid engine configuration")?;
        Ok(Self {
            controller: BodyController::new(engine),
            inputs: InputSnapshot::new(),
            now_ms: 0,
            tick_ms: config.tick_ms,
        })
    }

    pub fn controller(&self) -> &BodyController<MemoryStore> {
        &self.controller
    }

    fn frames(buckets: &[AggregatedMessageBucket]) -> Vec<OutboundFrame> {
        buckets.iter().map(OutboundFrame::from).collect()
    }

    fn flush(&mut self) -> Vec<OutboundFrame> {
        self.controller
            .flush_state_change()
            .map(|sent| Self::frames(&sent))
            .unwrap_or_default()
    }

    pub fn startup(&mut self) -> StepReport {
        let sent = self.controller.startup(&self.inputs, self.now_ms);
        StepReport {
            step: 0,
            time_ms: self.now_ms,
            label: "startup".to_string(),
            frames: Self::frames(&sent),
        }
    }

    /// Run one step; failures are reported in the label and do not stop the run
    pub fn run_step(&mut self, index: usize, step: &Step) -> StepReport {
        let (label, frames) = match step {
            Step::Input { index: n, active } => {
                self.inputs.set(*n, *active);
                self.controller.scan(&self.inputs, self.now_ms);
                (
                    format!("IN{:02} {}", *n as u16 + 1, if *active { "on" } else { "off" }),
                    self.flush(),
                )
            },
            Step::Tick(count) => {
                let mut frames = Vec::new();
                for _ in 0..*count {
                    self.now_ms += self.tick_ms;
                    let sent = self.controller.pattern_tick();
                    frames.extend(Self::frames(&sent));
                    // Held buttons are timed against the same clock
                    self.controller.scan(&self.inputs, self.now_ms);
                    frames.extend(self.flush());
                }
                (format!("tick x{}", count), frames)
            },
            Step::Wait(ms) => {
                self.now_ms += ms;
                self.controller.scan(&self.inputs, self.now_ms);
                (format!("wait {}ms", ms), self.flush())
            },
            Step::Manual {
                input,
                primary,
                secondary,
            } => {
                let label = match self.controller.set_manual(*input, *primary, *secondary) {
                    Ok(()) => format!(
                        "manual IN{:02} primary={} secondary={}",
                        *input as u16 + 1,
                        primary,
                        secondary
                    ),
                    Err(e) => format!("manual IN{:02} failed: {}", *input as u16 + 1, e),
                };
                (label, self.flush())
            },
            Step::ClearManual(input) => {
                let label = match self.controller.clear_manual(*input) {
                    Ok(()) => format!("clear manual IN{:02}", *input as u16 + 1),
                    Err(e) => format!("clear manual IN{:02} failed: {}", *input as u16 + 1, e),
                };
                (label, self.flush())
            },
            Step::Frame { can_id, data } => {
                let mut payload: Payload = [0; 8];
                let len = data.len().min(8);
                payload[..len].copy_from_slice(&data[..len]);
                let handled = self.controller.process_frame(*can_id, &payload);
                (
                    format!(
                        "frame {:08X}{}",
                        can_id,
                        if handled { "" } else { " (ignored)" }
                    ),
                    self.flush(),
                )
            },
        };
        debug!("Step {} at {}ms: {}", index, self.now_ms, label);
        StepReport {
            step: index,
            time_ms: self.now_ms,
            label,
            frames,
        }
    }
}

fn print_report(report: &StepReport) {
    println!(
        "{} {:>6}ms  {}",
        format!("[{:>3}]", report.step).bright_blue(),
        report.time_ms,
        report.label.bold()
    );
    if report.frames.is_empty() {
        println!("             {}", "(no frames)".dimmed());
    }
    for frame in &report.frames {
        let data = frame
            .data
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ");
        println!("             {}  {}", format!("{:08X}", frame.can_id).bright_yellow(), data);
    }
}

pub fn run(image: MemoryStore, script: &Script, config: &EngineConfig, json: bool) -> Result<()> {
    let mut image = image;
    script.apply_cases(&mut image)?;

    let mut sim = Simulator::new(image, config)?;
    let mut reports = vec![sim.startup()];
    for (i, step) in script.steps.iter().enumerate() {
        reports.push(sim.run_step(i + 1, step));
    }

    let diagnostics = sim.controller().engine().diagnostics();
    if json {
        #[derive(Serialize)]
        struct Output<'a> {
            steps: &'a [StepReport],
            diagnostics: bcm_cases::Diagnostics,
        }
        let output = Output {
            steps: &reports,
            diagnostics,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for report in &reports {
            print_report(report);
        }
        println!();
        println!(
            "{} {} active entries, {} store reads, {} bounds errors, ignition {}",
            "Diagnostics:".bright_cyan(),
            diagnostics.active_entries,
            diagnostics.store_reads,
            diagnostics.bounds_errors,
            if sim.controller().ignition() { "on" } else { "off" }
        );
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn simulator(yaml: &str) -> (Simulator, Script) {
        let script: Script = serde_yaml::from_str(yaml).unwrap();
        let mut image = MemoryStore::erased();
        script.apply_cases(&mut image).unwrap();
        (Simulator::new(image, &EngineConfig::default()).unwrap(), script)
    }

    #[test]
    fn test_flashing_script() {
        let (mut sim, script) = simulator(
            r#"
cases:
  - { input: 2, pgn: 0xFF01, source_addr: 0x1E, payload: [0x80], pattern: [1, 1] }
steps:
  - input: { index: 2, active: true }
  - tick: 3
  - input: { index: 2, active: false }
"#,
        );
        assert!(sim.startup().frames.is_empty());

        let on = sim.run_step(1, &script.steps[0]);
        assert_eq!(on.frames.len(), 1);
        assert_eq!(on.frames[0].can_id, 0x18FF011E);
        assert_eq!(on.frames[0].data[0], 0x80);

        let ticks = sim.run_step(2, &script.steps[1]);
        let levels: Vec<u8> = ticks
            .frames
            .iter()
            .filter(|f| f.can_id == 0x18FF011E)
            .map(|f| f.data[0])
            .collect();
        assert_eq!(levels, vec![0x80, 0x00, 0x80]);
        assert_eq!(ticks.time_ms, 750);

        let off = sim.run_step(3, &script.steps[2]);
        assert_eq!(off.frames.len(), 1);
        assert_eq!(off.frames[0].data, [0; 8]);
    }

    #[test]
    fn test_failed_manual_is_reported() {
        let (mut sim, script) = simulator("steps:\n  - manual: { input: 3 }\n");
        sim.startup();
        let report = sim.run_step(1, &script.steps[0]);
        assert!(report.label.contains("failed"));
        assert!(report.frames.is_empty());
    }
}
