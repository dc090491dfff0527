use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};
use vigil_core::snapshot::{self, DEFAULT_SNAPSHOT_SIZE};
use vigil_core::{
    closest_face, BoundingBox, FaceDetect, FaceSnapshot, Frame, FrameSource, PresenceState, PresenceTracker,
};

pub type SnapshotSender = watch::Sender<Option<Arc<FaceSnapshot>>>;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Detection runs on the frame scaled by this factor.
    pub resize_factor: f32,
    pub snapshot_size: u32,
    /// Capture failures in a row before the loop gives up.
    pub max_consecutive_capture_errors: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            resize_factor: 0.5,
            snapshot_size: DEFAULT_SNAPSHOT_SIZE,
            max_consecutive_capture_errors: 10,
        }
    }
}

/// What one frame did to the shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    pub faces: usize,
    pub presence: PresenceState,
    pub snapshot_updated: bool,
}

/// Per-frame pipeline: detect, select the closest face, track presence and
/// refresh the snapshot. Sole writer of the presence and snapshot channels.
pub struct FrameOrchestrator<D> {
    detector: D,
    tracker: PresenceTracker,
    settings: OrchestratorSettings,
    presence_tx: watch::Sender<PresenceState>,
    snapshot_tx: SnapshotSender,
}

impl<D: FaceDetect> FrameOrchestrator<D> {
    pub fn new(
        detector: D,
        tracker: PresenceTracker,
        settings: OrchestratorSettings,
        presence_tx: watch::Sender<PresenceState>,
        snapshot_tx: SnapshotSender,
    ) -> Self {
        Self {
            detector,
            tracker,
            settings,
            presence_tx,
            snapshot_tx,
        }
    }

    pub fn process_frame(&mut self, frame: &Frame) -> FrameReport {
        let scaled = match snapshot::downscale(frame, self.settings.resize_factor) {
            Ok(scaled) => scaled,
            Err(e) => {
                warn!(sequence = frame.sequence, error = %e, "cannot downscale frame; treating as empty");
                return self.report(0, &[], false);
            }
        };

        let detections = match self.detector.detect(&scaled) {
            Ok(detections) => detections,
            Err(e) => {
                warn!(sequence = frame.sequence, error = %e, "detection failed; treating frame as empty");
                Vec::new()
            }
        };
        let boxes: Vec<BoundingBox> = detections.iter().map(|d| d.bbox).collect();

        let mut snapshot_updated = false;
        if self.tracker.qualifies(&boxes) {
            match closest_face(&boxes) {
                Ok(index) => match snapshot::crop_face(&scaled, &boxes[index], self.settings.snapshot_size) {
                    Ok(face) => {
                        self.snapshot_tx.send_replace(Some(Arc::new(face)));
                        snapshot_updated = true;
                    }
                    Err(e) => warn!(sequence = frame.sequence, error = %e, "cannot crop closest face"),
                },
                Err(e) => error!(error = %e, "closest-face selection failed"),
            }
        }

        self.report(boxes.len(), &boxes, snapshot_updated)
    }

    fn report(&mut self, faces: usize, boxes: &[BoundingBox], snapshot_updated: bool) -> FrameReport {
        let presence = self.tracker.update(boxes);
        self.presence_tx.send_if_modified(|current| {
            if *current == presence {
                return false;
            }
            *current = presence;
            true
        });
        trace!(faces, presence = ?presence, snapshot_updated, "frame processed");
        FrameReport {
            faces,
            presence,
            snapshot_updated,
        }
    }

    /// Pull frames from `source` until `stop` is set. Returns the number of
    /// frames processed, or the capture error that exhausted the retry budget.
    pub fn run<S: FrameSource>(&mut self, source: &mut S, stop: &AtomicBool) -> Result<u64, S::Error> {
        let mut processed = 0u64;
        let mut consecutive_errors = 0u32;

        while !stop.load(Ordering::Acquire) {
            match source.next_frame() {
                Ok(frame) => {
                    consecutive_errors = 0;
                    if !frame.is_well_formed() {
                        debug!(sequence = frame.sequence, "skipping malformed frame");
                        continue;
                    }
                    let report = self.process_frame(&frame);
                    if report.snapshot_updated {
                        debug!(sequence = frame.sequence, faces = report.faces, "snapshot refreshed");
                    }
                    processed += 1;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    if consecutive_errors > self.settings.max_consecutive_capture_errors {
                        error!(error = %e, consecutive_errors, "capture keeps failing; stopping vision loop");
                        return Err(e);
                    }
                    warn!(error = %e, consecutive_errors, "frame capture failed");
                }
            }
        }

        info!(processed, "vision loop stopped");
        Ok(processed)
    }
}
