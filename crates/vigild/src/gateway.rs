//! Recognition gateway: services `request` signals with `out` results.
//!
//! One request is handled per cycle. While a result waits to be consumed the
//! gateway does not look at `request`, so a request raised in that window is
//! serviced only after the client deletes `out`.
//!
//! A serviced `request` that could not be removed is retried on every tick
//! until it is gone, so it is never serviced twice.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use vigil_core::signal::SignalError;
use vigil_core::{FaceSnapshot, RecognitionOutcome, SignalDir};

use crate::engine::RecognizerHandle;

/// Latest closest-face crop, `None` until the first qualifying frame.
pub type SnapshotReceiver = watch::Receiver<Option<Arc<FaceSnapshot>>>;

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub poll_interval: Duration,
    /// `None` keeps an unconsumed result forever.
    pub result_ttl: Option<Duration>,
    /// Attempts per signal operation, at least 1.
    pub signal_retries: u32,
    /// Delay before the first retry; doubles each attempt.
    pub signal_backoff: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            poll_interval: vigil_core::signal::DEFAULT_POLL_INTERVAL,
            result_ttl: Some(Duration::from_secs(30)),
            signal_retries: 3,
            signal_backoff: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Idle,
    RequestSeen,
    ResultPublished { since: Instant },
}

impl GatewayState {
    pub fn name(&self) -> &'static str {
        match self {
            GatewayState::Idle => "idle",
            GatewayState::RequestSeen => "request_seen",
            GatewayState::ResultPublished { .. } => "result_published",
        }
    }
}

pub struct Gateway {
    signals: SignalDir,
    settings: GatewaySettings,
    state: GatewayState,
    state_tx: watch::Sender<GatewayState>,
    /// The last serviced `request` is still on disk.
    leftover_request: bool,
}

impl Gateway {
    /// Remove stale signals left by a previous run and start in `Idle`.
    pub fn start(signals: SignalDir, settings: GatewaySettings) -> Result<Self, SignalError> {
        let removed = signals.clear_stale()?;
        if removed > 0 {
            info!(removed, dir = %signals.root().display(), "removed stale signal files");
        }
        let (state_tx, _) = watch::channel(GatewayState::Idle);
        Ok(Self {
            signals,
            settings,
            state: GatewayState::Idle,
            state_tx,
            leftover_request: false,
        })
    }

    pub fn state(&self) -> GatewayState {
        self.state
    }

    /// Observe state transitions (used by the status endpoint).
    pub fn subscribe(&self) -> watch::Receiver<GatewayState> {
        self.state_tx.subscribe()
    }

    fn set_state(&mut self, next: GatewayState) {
        if self.state.name() != next.name() {
            info!(from = self.state.name(), to = next.name(), "gateway state changed");
        }
        self.state = next;
        self.state_tx.send_replace(next);
    }

    /// Poll until `shutdown` turns true or its sender is dropped.
    pub async fn run(
        mut self,
        snapshots: SnapshotReceiver,
        recognizer: RecognizerHandle,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(dir = %self.signals.root().display(), "gateway polling");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.step(&snapshots, &recognizer).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(state = self.state().name(), "gateway stopped");
    }

    /// Run one poll cycle and return the resulting state.
    pub async fn step(&mut self, snapshots: &SnapshotReceiver, recognizer: &RecognizerHandle) -> GatewayState {
        match self.state {
            GatewayState::Idle => {
                if !self.remove_leftover_request() {
                    return self.state;
                }
                match self.with_retry("stat request", || self.signals.request_pending()).await {
                    Ok(true) => {
                        self.set_state(GatewayState::RequestSeen);
                        self.service(snapshots, recognizer).await;
                    }
                    Ok(false) => {}
                    Err(e) => error!(error = %e, "cannot poll for recognition requests"),
                }
            }
            GatewayState::RequestSeen => self.service(snapshots, recognizer).await,
            GatewayState::ResultPublished { since } => self.await_ack(since).await,
        }
        self.state
    }

    async fn service(&mut self, snapshots: &SnapshotReceiver, recognizer: &RecognizerHandle) {
        let snapshot = snapshots.borrow().clone();
        let outcome = match snapshot {
            None => {
                info!("recognition requested before any face was captured");
                RecognitionOutcome::NoFaceAvailable
            }
            Some(face) => {
                let sequence = face.sequence;
                match recognizer.recognize(face).await {
                    Ok(label) => {
                        info!(label = %label, sequence, "face recognized");
                        RecognitionOutcome::Label(label)
                    }
                    Err(e) => {
                        warn!(error = %e, sequence, "recognition failed; reporting no face");
                        RecognitionOutcome::NoFaceAvailable
                    }
                }
            }
        };

        let payload = outcome.to_payload();
        if let Err(e) = self.with_retry("publish result", || self.signals.publish_result(payload)).await {
            error!(error = %e, "could not publish recognition result; dropping request");
            if let Err(e) = self.with_retry("clear request", || self.signals.clear_request()).await {
                error!(error = %e, "could not remove request");
            }
            self.set_state(GatewayState::Idle);
            return;
        }

        if let Err(e) = self.with_retry("clear request", || self.signals.clear_request()).await {
            error!(error = %e, "result published but request could not be removed; will retry");
            self.leftover_request = true;
        }
        self.set_state(GatewayState::ResultPublished { since: Instant::now() });
    }

    async fn await_ack(&mut self, since: Instant) {
        self.remove_leftover_request();
        match self.with_retry("stat result", || self.signals.result_pending()).await {
            Ok(false) => {
                debug!(waited_ms = since.elapsed().as_millis() as u64, "result consumed");
                self.set_state(GatewayState::Idle);
            }
            Ok(true) => {
                let Some(ttl) = self.settings.result_ttl else {
                    return;
                };
                if since.elapsed() < ttl {
                    return;
                }
                warn!(ttl_secs = ttl.as_secs(), "result not consumed in time; discarding it");
                match self.with_retry("discard result", || self.signals.clear_result()).await {
                    Ok(_) => self.set_state(GatewayState::Idle),
                    Err(e) => error!(error = %e, "could not discard expired result"),
                }
            }
            Err(e) => error!(error = %e, "cannot check for result acknowledgment"),
        }
    }

    /// Try once to delete an already serviced `request`. True when none is left.
    fn remove_leftover_request(&mut self) -> bool {
        if !self.leftover_request {
            return true;
        }
        match self.signals.clear_request() {
            Ok(_) => {
                info!("removed leftover request");
                self.leftover_request = false;
                true
            }
            Err(e) => {
                warn!(error = %e, "leftover request still cannot be removed");
                false
            }
        }
    }

    /// Run `op` up to `signal_retries` times with exponential backoff.
    async fn with_retry<T>(
        &self,
        what: &'static str,
        mut op: impl FnMut() -> Result<T, SignalError>,
    ) -> Result<T, SignalError> {
        let mut delay = self.settings.signal_backoff;
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.settings.signal_retries => {
                    warn!(what, attempt, error = %e, "signal I/O failed; retrying");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
