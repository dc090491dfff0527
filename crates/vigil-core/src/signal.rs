//! File-mediated recognition protocol.
//!
//! Two processes share one directory. The client creates an empty `request`
//! file; the daemon answers with an `out` file whose contents are the
//! recognized label (empty when no face was available). Deleting `out` is
//! the client's acknowledgment.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

pub const REQUEST_FILE: &str = "request";
pub const RESULT_FILE: &str = "out";
const RESULT_TEMP_FILE: &str = ".out.tmp";

/// Wire value of `out` when no face snapshot was available.
pub const NO_FACE_SENTINEL: &str = "";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum SignalError {
    #[error("signal {op} failed for {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SignalError {
    fn io(op: &'static str, path: &Path, source: io::Error) -> Self {
        SignalError::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Outcome of one recognition request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionOutcome {
    Label(String),
    NoFaceAvailable,
}

impl RecognitionOutcome {
    pub fn to_payload(&self) -> &str {
        match self {
            RecognitionOutcome::Label(label) => label.as_str(),
            RecognitionOutcome::NoFaceAvailable => NO_FACE_SENTINEL,
        }
    }

    pub fn from_payload(payload: &str) -> Self {
        if payload == NO_FACE_SENTINEL {
            RecognitionOutcome::NoFaceAvailable
        } else {
            RecognitionOutcome::Label(payload.to_string())
        }
    }
}

/// The shared signal directory.
#[derive(Debug, Clone)]
pub struct SignalDir {
    root: PathBuf,
}

impl SignalDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn request_path(&self) -> PathBuf {
        self.root.join(REQUEST_FILE)
    }

    pub fn result_path(&self) -> PathBuf {
        self.root.join(RESULT_FILE)
    }

    fn temp_path(&self) -> PathBuf {
        self.root.join(RESULT_TEMP_FILE)
    }

    pub fn request_pending(&self) -> Result<bool, SignalError> {
        exists(&self.request_path())
    }

    pub fn result_pending(&self) -> Result<bool, SignalError> {
        exists(&self.result_path())
    }

    /// Create the `request` marker. Succeeds if one is already present.
    pub fn raise_request(&self) -> Result<(), SignalError> {
        let path = self.request_path();
        fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map(|_| ())
            .map_err(|e| SignalError::io("create", &path, e))
    }

    pub fn clear_request(&self) -> Result<bool, SignalError> {
        remove_if_exists(&self.request_path())
    }

    pub fn clear_result(&self) -> Result<bool, SignalError> {
        remove_if_exists(&self.result_path())
    }

    /// Write `payload` to a temp file and rename it to `out`, so readers
    /// never see a partial result.
    pub fn publish_result(&self, payload: &str) -> Result<(), SignalError> {
        let tmp = self.temp_path();
        fs::write(&tmp, payload.as_bytes()).map_err(|e| SignalError::io("write", &tmp, e))?;
        let out = self.result_path();
        fs::rename(&tmp, &out).map_err(|e| SignalError::io("rename", &out, e))
    }

    /// Read `out` if present. Does not acknowledge it.
    pub fn read_result(&self) -> Result<Option<RecognitionOutcome>, SignalError> {
        let path = self.result_path();
        match fs::read_to_string(&path) {
            Ok(payload) => Ok(Some(RecognitionOutcome::from_payload(&payload))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SignalError::io("read", &path, e)),
        }
    }

    /// Remove leftovers from a previous run. Returns how many files were deleted.
    pub fn clear_stale(&self) -> Result<usize, SignalError> {
        let mut removed = 0;
        for path in [self.request_path(), self.result_path(), self.temp_path()] {
            if remove_if_exists(&path)? {
                tracing::info!(path = %path.display(), "removed stale signal");
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn exists(path: &Path) -> Result<bool, SignalError> {
    path.try_exists().map_err(|e| SignalError::io("stat", path, e))
}

fn remove_if_exists(path: &Path) -> Result<bool, SignalError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(SignalError::io("remove", path, e)),
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Signal(#[from] SignalError),
    #[error("no result after {0:?}")]
    Timeout(Duration),
}

/// Client side of the protocol: raise a request and wait for the answer.
pub struct RecognitionClient {
    signals: SignalDir,
    poll_interval: Duration,
    timeout: Duration,
}

impl RecognitionClient {
    pub fn new(signals: SignalDir) -> Self {
        Self {
            signals,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_CLIENT_TIMEOUT,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn signals(&self) -> &SignalDir {
        &self.signals
    }

    /// Raise a request and block until the daemon publishes a result or the
    /// timeout expires. The result file is deleted on success.
    ///
    /// An `out` already present belongs to another client, so the request is
    /// only raised once that result has been consumed. Both waits share the
    /// one timeout.
    pub fn recognize(&self) -> Result<RecognitionOutcome, ClientError> {
        let started = Instant::now();
        while self.signals.result_pending()? {
            if started.elapsed() >= self.timeout {
                return Err(ClientError::Timeout(self.timeout));
            }
            std::thread::sleep(self.poll_interval);
        }

        self.signals.raise_request()?;
        tracing::debug!(dir = %self.signals.root().display(), "recognition requested");

        loop {
            if let Some(outcome) = self.signals.read_result()? {
                self.signals.clear_result()?;
                tracing::debug!(?outcome, elapsed = ?started.elapsed(), "result consumed");
                return Ok(outcome);
            }

            if started.elapsed() >= self.timeout {
                if let Err(e) = self.signals.clear_request() {
                    tracing::warn!(error = %e, "could not withdraw request after timeout");
                }
                return Err(ClientError::Timeout(self.timeout));
            }

            std::thread::sleep(self.poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_payload_sentinel() {
        assert_eq!(RecognitionOutcome::from_payload(""), RecognitionOutcome::NoFaceAvailable);
        assert_eq!(
            RecognitionOutcome::from_payload("alice"),
            RecognitionOutcome::Label("alice".into())
        );
        assert_eq!(RecognitionOutcome::NoFaceAvailable.to_payload(), NO_FACE_SENTINEL);
    }

    #[test]
    fn test_request_lifecycle() {
        let dir = tempdir().unwrap();
        let signals = SignalDir::new(dir.path());

        assert!(!signals.request_pending().unwrap());
        signals.raise_request().unwrap();
        signals.raise_request().unwrap();
        assert!(signals.request_pending().unwrap());
        assert!(signals.clear_request().unwrap());
        assert!(!signals.clear_request().unwrap());
    }

    #[test]
    fn test_publish_result_is_complete_and_leaves_no_temp() {
        let dir = tempdir().unwrap();
        let signals = SignalDir::new(dir.path());

        signals.publish_result("bob").unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join(RESULT_FILE)).unwrap(),
            "bob"
        );
        assert!(!dir.path().join(RESULT_TEMP_FILE).exists());
        assert_eq!(
            signals.read_result().unwrap(),
            Some(RecognitionOutcome::Label("bob".into()))
        );
    }

    #[test]
    fn test_read_result_absent() {
        let dir = tempdir().unwrap();
        assert_eq!(SignalDir::new(dir.path()).read_result().unwrap(), None);
    }

    #[test]
    fn test_clear_stale_removes_everything() {
        let dir = tempdir().unwrap();
        let signals = SignalDir::new(dir.path());
        fs::write(dir.path().join(REQUEST_FILE), b"").unwrap();
        fs::write(dir.path().join(RESULT_FILE), b"old").unwrap();
        fs::write(dir.path().join(RESULT_TEMP_FILE), b"half").unwrap();

        assert_eq!(signals.clear_stale().unwrap(), 3);
        assert!(!signals.request_pending().unwrap());
        assert!(!signals.result_pending().unwrap());
        assert_eq!(signals.clear_stale().unwrap(), 0);
    }

    #[test]
    fn test_missing_directory_is_signal_error() {
        let dir = tempdir().unwrap();
        let signals = SignalDir::new(dir.path().join("missing"));
        assert!(matches!(signals.raise_request(), Err(SignalError::Io { op: "create", .. })));
    }

    #[test]
    fn test_client_round_trip() {
        let dir = tempdir().unwrap();
        let signals = SignalDir::new(dir.path());
        let responder = signals.clone();

        let handle = std::thread::spawn(move || {
            while !responder.request_pending().unwrap() {
                std::thread::sleep(Duration::from_millis(5));
            }
            responder.publish_result("carol").unwrap();
            responder.clear_request().unwrap();
        });

        let client = RecognitionClient::new(signals.clone())
            .with_poll_interval(Duration::from_millis(5))
            .with_timeout(Duration::from_secs(5));
        let outcome = client.recognize().unwrap();
        handle.join().unwrap();

        assert_eq!(outcome, RecognitionOutcome::Label("carol".into()));
        assert!(!signals.result_pending().unwrap());
    }

    #[test]
    fn test_client_leaves_other_clients_result_alone() {
        let dir = tempdir().unwrap();
        let signals = SignalDir::new(dir.path());
        signals.publish_result("alice").unwrap();

        let client = RecognitionClient::new(signals.clone())
            .with_poll_interval(Duration::from_millis(5))
            .with_timeout(Duration::from_secs(5));
        let waiting = std::thread::spawn(move || client.recognize());

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(
            signals.read_result().unwrap(),
            Some(RecognitionOutcome::Label("alice".into()))
        );
        assert!(!signals.request_pending().unwrap());

        // First client consumes its result; the daemon then answers the second.
        signals.clear_result().unwrap();
        while !signals.request_pending().unwrap() {
            std::thread::sleep(Duration::from_millis(5));
        }
        signals.publish_result("bob").unwrap();
        signals.clear_request().unwrap();

        let outcome = waiting.join().unwrap().unwrap();
        assert_eq!(outcome, RecognitionOutcome::Label("bob".into()));
    }

    #[test]
    fn test_client_gives_up_on_unconsumed_result() {
        let dir = tempdir().unwrap();
        let signals = SignalDir::new(dir.path());
        signals.publish_result("alice").unwrap();

        let client = RecognitionClient::new(signals.clone())
            .with_poll_interval(Duration::from_millis(5))
            .with_timeout(Duration::from_millis(30));
        assert!(matches!(client.recognize(), Err(ClientError::Timeout(_))));
        assert!(signals.result_pending().unwrap());
        assert!(!signals.request_pending().unwrap());
    }

    #[test]
    fn test_client_times_out_and_withdraws_request() {
        let dir = tempdir().unwrap();
        let signals = SignalDir::new(dir.path());
        let client = RecognitionClient::new(signals.clone())
            .with_poll_interval(Duration::from_millis(5))
            .with_timeout(Duration::from_millis(30));

        assert!(matches!(client.recognize(), Err(ClientError::Timeout(_))));
        assert!(!signals.request_pending().unwrap());
    }
}
