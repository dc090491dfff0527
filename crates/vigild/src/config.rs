use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use vigil_core::presence::{PresenceConfig, DEFAULT_FACE_AREA_THRESHOLD, DEFAULT_MISS_LIMIT};
use vigil_core::snapshot::DEFAULT_SNAPSHOT_SIZE;

use crate::gateway::GatewaySettings;
use crate::orchestrator::OrchestratorSettings;

/// Required: directory shared with recognition clients.
pub const COMM_PATH_VAR: &str = "VIGIL_COMM_PATH";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} is not set; it must name the directory shared with recognition clients")]
    Missing(&'static str),
    #[error("{var}={value}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Which message bus serves the presence endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbusBus {
    Session,
    System,
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Signal directory for `request` / `out`.
    pub comm_path: PathBuf,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub capture_width: u32,
    pub capture_height: u32,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// JSON gallery of labeled embeddings.
    pub gallery_path: PathBuf,
    /// Largest-box area (px² at detection scale) that counts as "nearby".
    pub face_area_threshold: i64,
    /// Consecutive non-qualifying frames tolerated before presence drops.
    pub miss_limit: u32,
    /// Frames are downscaled by this factor before detection.
    pub resize_factor: f32,
    /// Edge length of the square face snapshot.
    pub snapshot_size: u32,
    /// Cosine similarity required for a gallery match.
    pub similarity_threshold: f32,
    pub poll_interval: Duration,
    /// Unconsumed results are discarded after this long; `None` keeps them forever.
    pub result_ttl: Option<Duration>,
    pub signal_retries: u32,
    pub signal_backoff: Duration,
    /// Frames discarded at startup (camera AGC/AE stabilization).
    pub warmup_frames: usize,
    pub max_capture_errors: u32,
    pub dbus_enabled: bool,
    pub dbus_bus: DbusBus,
}

impl Config {
    /// Load configuration from `VIGIL_*` environment variables with defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable optional values fall
    /// back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let comm_path = lookup(COMM_PATH_VAR)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .ok_or(ConfigError::Missing(COMM_PATH_VAR))?;
        if !comm_path.is_dir() {
            return Err(ConfigError::Invalid {
                var: COMM_PATH_VAR,
                value: comm_path.display().to_string(),
                reason: "not an existing directory",
            });
        }

        let data_dir = vigil_core::default_data_dir();
        let model_dir = lookup("VIGIL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(vigil_core::default_model_dir);
        let gallery_path = lookup("VIGIL_GALLERY_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("gallery.json"));

        let resize_factor = parse_or(&lookup, "VIGIL_RESIZE_FACTOR", 0.5f32);
        if !(resize_factor > 0.0 && resize_factor <= 1.0) {
            return Err(ConfigError::Invalid {
                var: "VIGIL_RESIZE_FACTOR",
                value: resize_factor.to_string(),
                reason: "must be in (0, 1]",
            });
        }

        let snapshot_size = parse_or(&lookup, "VIGIL_SNAPSHOT_SIZE", DEFAULT_SNAPSHOT_SIZE);
        if snapshot_size == 0 {
            return Err(ConfigError::Invalid {
                var: "VIGIL_SNAPSHOT_SIZE",
                value: "0".into(),
                reason: "must be positive",
            });
        }

        let ttl_secs = parse_or(&lookup, "VIGIL_RESULT_TTL_SECS", 30u64);

        let dbus_bus = match lookup("VIGIL_DBUS_BUS").as_deref() {
            None | Some("session") => DbusBus::Session,
            Some("system") => DbusBus::System,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "VIGIL_DBUS_BUS",
                    value: other.to_string(),
                    reason: "expected `session` or `system`",
                })
            }
        };

        Ok(Self {
            comm_path,
            camera_device: lookup("VIGIL_CAMERA_DEVICE").unwrap_or_else(|| "/dev/video0".to_string()),
            capture_width: parse_or(&lookup, "VIGIL_CAPTURE_WIDTH", 640),
            capture_height: parse_or(&lookup, "VIGIL_CAPTURE_HEIGHT", 480),
            model_dir,
            gallery_path,
            face_area_threshold: parse_or(&lookup, "VIGIL_FACE_AREA", DEFAULT_FACE_AREA_THRESHOLD),
            miss_limit: parse_or(&lookup, "VIGIL_MISS_LIMIT", DEFAULT_MISS_LIMIT),
            resize_factor,
            snapshot_size,
            similarity_threshold: parse_or(
                &lookup,
                "VIGIL_SIMILARITY_THRESHOLD",
                vigil_core::classifier::DEFAULT_SIMILARITY_THRESHOLD,
            ),
            poll_interval: Duration::from_millis(parse_or(&lookup, "VIGIL_POLL_INTERVAL_MS", 100u64).max(1)),
            result_ttl: (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs)),
            signal_retries: parse_or(&lookup, "VIGIL_SIGNAL_RETRIES", 3u32).max(1),
            signal_backoff: Duration::from_millis(parse_or(&lookup, "VIGIL_SIGNAL_BACKOFF_MS", 50u64)),
            warmup_frames: parse_or(&lookup, "VIGIL_WARMUP_FRAMES", 4),
            max_capture_errors: parse_or(&lookup, "VIGIL_MAX_CAPTURE_ERRORS", 10),
            dbus_enabled: lookup("VIGIL_DBUS_ENABLED").map(|v| v != "0").unwrap_or(true),
            dbus_bus,
        })
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join(vigil_core::SCRFD_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join(vigil_core::ARCFACE_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    pub fn presence(&self) -> PresenceConfig {
        PresenceConfig {
            face_area_threshold: self.face_area_threshold,
            miss_limit: self.miss_limit,
        }
    }

    pub fn orchestrator(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            resize_factor: self.resize_factor,
            snapshot_size: self.snapshot_size,
            max_consecutive_capture_errors: self.max_capture_errors,
        }
    }

    pub fn gateway(&self) -> GatewaySettings {
        GatewaySettings {
            poll_interval: self.poll_interval,
            result_ttl: self.result_ttl,
            signal_retries: self.signal_retries,
            signal_backoff: self.signal_backoff,
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_missing_comm_path_is_fatal() {
        let err = Config::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(COMM_PATH_VAR)));
    }

    #[test]
    fn test_comm_path_must_be_directory() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = Config::from_lookup(lookup_from(&[(COMM_PATH_VAR, missing.to_str().unwrap())]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: COMM_PATH_VAR, .. }));
    }

    #[test]
    fn test_defaults() {
        let dir = tempdir().unwrap();
        let cfg = Config::from_lookup(lookup_from(&[(COMM_PATH_VAR, dir.path().to_str().unwrap())]))
            .unwrap();
        assert_eq!(cfg.comm_path, dir.path());
        assert_eq!(cfg.face_area_threshold, 1500);
        assert_eq!(cfg.miss_limit, 3);
        assert_eq!(cfg.snapshot_size, 160);
        assert_eq!(cfg.poll_interval, Duration::from_millis(100));
        assert_eq!(cfg.result_ttl, Some(Duration::from_secs(30)));
        assert_eq!(cfg.signal_retries, 3);
        assert!((cfg.resize_factor - 0.5).abs() < f32::EPSILON);
        assert!(cfg.dbus_enabled);
        assert_eq!(cfg.dbus_bus, DbusBus::Session);
        assert!(cfg.scrfd_model_path().ends_with("det_10g.onnx"));
    }

    #[test]
    fn test_overrides_and_fallbacks() {
        let dir = tempdir().unwrap();
        let cfg = Config::from_lookup(lookup_from(&[
            (COMM_PATH_VAR, dir.path().to_str().unwrap()),
            ("VIGIL_FACE_AREA", "2400"),
            ("VIGIL_MISS_LIMIT", "not-a-number"),
            ("VIGIL_RESULT_TTL_SECS", "0"),
            ("VIGIL_SIGNAL_RETRIES", "0"),
            ("VIGIL_DBUS_ENABLED", "0"),
            ("VIGIL_DBUS_BUS", "system"),
        ]))
        .unwrap();
        assert_eq!(cfg.face_area_threshold, 2400);
        assert_eq!(cfg.miss_limit, 3);
        assert_eq!(cfg.result_ttl, None);
        assert_eq!(cfg.signal_retries, 1);
        assert!(!cfg.dbus_enabled);
        assert_eq!(cfg.dbus_bus, DbusBus::System);
    }

    #[test]
    fn test_resize_factor_out_of_range() {
        let dir = tempdir().unwrap();
        let err = Config::from_lookup(lookup_from(&[
            (COMM_PATH_VAR, dir.path().to_str().unwrap()),
            ("VIGIL_RESIZE_FACTOR", "1.5"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "VIGIL_RESIZE_FACTOR", .. }));
    }

    #[test]
    fn test_unknown_bus_rejected() {
        let dir = tempdir().unwrap();
        let err = Config::from_lookup(lookup_from(&[
            (COMM_PATH_VAR, dir.path().to_str().unwrap()),
            ("VIGIL_DBUS_BUS", "starship"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "VIGIL_DBUS_BUS", .. }));
    }
}
