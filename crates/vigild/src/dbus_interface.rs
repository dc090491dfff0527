use tokio::sync::watch;
use vigil_core::PresenceState;
use zbus::interface;

use crate::engine::RecognizerHandle;
use crate::gateway::{GatewayState, SnapshotReceiver};

pub const BUS_NAME: &str = "org.vigil.Vigil1";
pub const OBJECT_PATH: &str = "/org/vigil/Vigil1";

/// D-Bus view of the daemon's shared state.
///
/// Bus name: org.vigil.Vigil1
/// Object path: /org/vigil/Vigil1
pub struct VigilService {
    presence: watch::Receiver<PresenceState>,
    snapshots: SnapshotReceiver,
    gateway: watch::Receiver<GatewayState>,
    recognizer: RecognizerHandle,
    comm_path: String,
}

impl VigilService {
    pub fn new(
        presence: watch::Receiver<PresenceState>,
        snapshots: SnapshotReceiver,
        gateway: watch::Receiver<GatewayState>,
        recognizer: RecognizerHandle,
        comm_path: String,
    ) -> Self {
        Self {
            presence,
            snapshots,
            gateway,
            recognizer,
            comm_path,
        }
    }

    fn status_json(&self) -> serde_json::Value {
        let snapshot_sequence = self.snapshots.borrow().as_ref().map(|s| s.sequence);
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "presence": *self.presence.borrow(),
            "snapshot_sequence": snapshot_sequence,
            "gateway": self.gateway.borrow().name(),
            "recognizer_busy": self.recognizer.is_busy(),
            "comm_path": self.comm_path,
        })
    }
}

#[interface(name = "org.vigil.Vigil1")]
impl VigilService {
    /// True while a face is latched as nearby.
    async fn present(&self) -> bool {
        self.presence.borrow().is_present()
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(self.status_json().to_string())
    }
}
