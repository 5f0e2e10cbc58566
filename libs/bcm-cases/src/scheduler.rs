//! Case Scheduler - async runtime driver for the body controller
//!
//! Runs three event sources against one controller:
//! - Pattern tick: advance timers, transmit patterned messages
//! - Input scan: sample inputs, apply transitions, transmit changes
//! - Received frames: control frame and relay table updates
//!
//! The controller lock is never held across an await point.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::conditions::InputSnapshot;
use crate::controller::BodyController;
use crate::engine::Diagnostics;
use crate::error::{CaseError, Result};
use crate::j1939;
use crate::store::CaseStorage;
use crate::types::{AggregatedMessageBucket, Payload};

/// Frame handed to the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OutboundFrame {
    pub can_id: u32,
    pub data: Payload,
}

impl From<&AggregatedMessageBucket> for OutboundFrame {
    fn from(bucket: &AggregatedMessageBucket) -> Self {
        Self {
            can_id: j1939::can_id(bucket.priority, bucket.id.pgn, bucket.id.source_addr),
            data: bucket.payload,
        }
    }
}

/// Frame received from the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboundFrame {
    pub can_id: u32,
    pub data: Payload,
}

/// Outbound transport
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send(&self, frame: &OutboundFrame) -> Result<()>;
}

/// Debounced input acquisition
#[async_trait]
pub trait InputSource: Send + Sync {
    async fn sample(&self) -> Result<InputSnapshot>;
}

/// Frame sink backed by a tokio channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<OutboundFrame>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<OutboundFrame>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&self, frame: &OutboundFrame) -> Result<()> {
        self.tx
            .send(*frame)
            .await
            .map_err(|e| CaseError::Transport(e.to_string()))
    }
}

/// Input source reading a shared snapshot, written by tests or a simulator
#[derive(Debug, Clone, Default)]
pub struct SharedInputs {
    state: Arc<Mutex<InputSnapshot>>,
}

impl SharedInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, input: u8, active: bool) {
        self.state.lock().set(input, active);
    }

    pub fn replace(&self, snapshot: InputSnapshot) {
        *self.state.lock() = snapshot;
    }
}

#[async_trait]
impl InputSource for SharedInputs {
    async fn sample(&self) -> Result<InputSnapshot> {
        Ok(*self.state.lock())
    }
}

/// Case Scheduler - drives a `BodyController` from timers and frames
pub struct CaseScheduler<S, K, I> {
    controller: Arc<Mutex<BodyController<S>>>,
    sink: Arc<K>,
    inputs: Arc<I>,
    /// Shutdown signal
    shutdown: Arc<Notify>,
    /// Running state
    running: Arc<AtomicBool>,
    tick_ms: u64,
    scan_ms: u64,
    started: Instant,
    ticks: AtomicU64,
    scans: AtomicU64,
    frames_sent: AtomicU64,
    send_errors: AtomicU64,
}

impl<S, K, I> CaseScheduler<S, K, I>
where
    S: CaseStorage + 'static,
    K: FrameSink + 'static,
    I: InputSource + 'static,
{
    pub fn new(
        controller: BodyController<S>,
        sink: Arc<K>,
        inputs: Arc<I>,
        tick_ms: u64,
        scan_ms: u64,
    ) -> Self {
        Self {
            controller: Arc::new(Mutex::new(controller)),
            sink,
            inputs,
            shutdown: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
            tick_ms: tick_ms.max(1),
            scan_ms: scan_ms.max(1),
            started: Instant::now(),
            ticks: AtomicU64::new(0),
            scans: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            send_errors: AtomicU64::new(0),
        }
    }

    /// Shared handle to the controller for manual commands
    pub fn controller(&self) -> Arc<Mutex<BodyController<S>>> {
        Arc::clone(&self.controller)
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Start the scheduler loop; returns after `stop`
    pub async fn start(&self, mut frames: mpsc::Receiver<InboundFrame>) {
        if self.running.swap(true, Ordering::Relaxed) {
            warn!("Case scheduler already running");
            return;
        }
        info!(
            "Starting case scheduler with {}ms tick, {}ms scan",
            self.tick_ms, self.scan_ms
        );

        let initial = match self.inputs.sample().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("Initial input sample failed: {}", e);
                InputSnapshot::new()
            },
        };
        let now = self.now_ms();
        let sent = self.controller.lock().startup(&initial, now);
        self.transmit(&sent).await;

        let mut tick_interval = interval(Duration::from_millis(self.tick_ms));
        let mut scan_interval = interval(Duration::from_millis(self.scan_ms));
        // Both fire immediately; consume that so the first tick is one period in
        tick_interval.tick().await;
        scan_interval.tick().await;

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    self.ticks.fetch_add(1, Ordering::Relaxed);
                    let sent = self.controller.lock().pattern_tick();
                    self.transmit(&sent).await;
                }
                _ = scan_interval.tick() => {
                    self.scans.fetch_add(1, Ordering::Relaxed);
                    if let Err(e) = self.scan().await {
                        error!("Input scan error: {}", e);
                    }
                }
                Some(frame) = frames.recv() => {
                    let (handled, sent) = {
                        let mut controller = self.controller.lock();
                        let handled = controller.process_frame(frame.can_id, &frame.data);
                        (handled, controller.flush_state_change())
                    };
                    if !handled {
                        debug!("Ignoring frame {:08X}", frame.can_id);
                    }
                    if let Some(sent) = sent {
                        self.transmit(&sent).await;
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("Case scheduler received shutdown signal");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::Relaxed);
        info!("Case scheduler stopped");
    }

    async fn scan(&self) -> Result<()> {
        let sample = self.inputs.sample().await?;
        let now = self.now_ms();
        let sent = {
            let mut controller = self.controller.lock();
            controller.scan(&sample, now);
            controller.flush_state_change()
        };
        if let Some(sent) = sent {
            self.transmit(&sent).await;
        }
        Ok(())
    }

    async fn transmit(&self, buckets: &[AggregatedMessageBucket]) {
        for bucket in buckets {
            let frame = OutboundFrame::from(bucket);
            match self.sink.send(&frame).await {
                Ok(()) => {
                    self.frames_sent.fetch_add(1, Ordering::Relaxed);
                },
                Err(e) => {
                    self.send_errors.fetch_add(1, Ordering::Relaxed);
                    warn!("Send {:08X} failed: {}", frame.can_id, e);
                },
            }
        }
    }

    /// Stop the scheduler
    pub fn stop(&self) {
        info!("Stopping case scheduler...");
        self.shutdown.notify_one();
    }

    /// Check if scheduler is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Get scheduler status
    pub fn status(&self) -> SchedulerStatus {
        let controller = self.controller.lock();
        SchedulerStatus {
            running: self.is_running(),
            tick_interval_ms: self.tick_ms,
            scan_interval_ms: self.scan_ms,
            ticks: self.ticks.load(Ordering::Relaxed),
            scans: self.scans.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            ignition: controller.ignition(),
            diagnostics: controller.engine().diagnostics(),
        }
    }
}

/// Scheduler status information
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub tick_interval_ms: u64,
    pub scan_interval_ms: u64,
    pub ticks: u64,
    pub scans: u64,
    pub frames_sent: u64,
    pub send_errors: u64,
    pub ignition: bool,
    pub diagnostics: Diagnostics,
}
