use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use vigil_core::classifier::ClassifierError;
use vigil_core::recognizer::RecognizerError;
use vigil_core::{Classify, Embed, FaceSnapshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("classifier error: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("a recognition job is already in flight")]
    Busy,
    #[error("failed to spawn recognizer thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("recognizer thread exited")]
    ChannelClosed,
}

/// One snapshot to label, sent from the gateway to the recognizer thread.
struct RecognitionJob {
    snapshot: Arc<FaceSnapshot>,
    reply: oneshot::Sender<Result<String, EngineError>>,
}

/// Clone-safe handle to the recognizer thread.
#[derive(Clone)]
pub struct RecognizerHandle {
    tx: mpsc::Sender<RecognitionJob>,
    busy: Arc<AtomicBool>,
}

impl RecognizerHandle {
    /// Label `snapshot`. At most one job is accepted at a time; a second
    /// call while one is queued or running fails with [`EngineError::Busy`].
    pub async fn recognize(&self, snapshot: Arc<FaceSnapshot>) -> Result<String, EngineError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(EngineError::Busy);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let job = RecognitionJob {
            snapshot,
            reply: reply_tx,
        };
        if let Err(e) = self.tx.try_send(job) {
            self.busy.store(false, Ordering::Release);
            return Err(match e {
                mpsc::error::TrySendError::Full(_) => EngineError::Busy,
                mpsc::error::TrySendError::Closed(_) => EngineError::ChannelClosed,
            });
        }
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Spawn the recognizer on a dedicated OS thread owning the embedder and
/// classifier. The thread exits once every handle is dropped.
pub fn spawn_recognizer<E, C>(mut embedder: E, classifier: C) -> Result<RecognizerHandle, EngineError>
where
    E: Embed + Send + 'static,
    C: Classify + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<RecognitionJob>(1);
    let busy = Arc::new(AtomicBool::new(false));
    let worker_busy = Arc::clone(&busy);

    std::thread::Builder::new()
        .name("vigil-recognizer".into())
        .spawn(move || {
            tracing::info!("recognizer thread started");
            while let Some(job) = rx.blocking_recv() {
                let result = run_job(&mut embedder, &classifier, &job.snapshot);
                // Clear before replying so the caller can submit again at once.
                worker_busy.store(false, Ordering::Release);
                let _ = job.reply.send(result);
            }
            tracing::info!("recognizer thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(RecognizerHandle { tx, busy })
}

fn run_job<E: Embed, C: Classify>(
    embedder: &mut E,
    classifier: &C,
    snapshot: &FaceSnapshot,
) -> Result<String, EngineError> {
    let embedding = embedder.embed(snapshot)?;
    let label = classifier.classify(&embedding)?;
    tracing::debug!(sequence = snapshot.sequence, label = %label, "recognition job finished");
    Ok(label)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;
    use vigil_core::Embedding;

    /// Embedder that counts jobs and optionally blocks until released.
    pub(crate) struct FakeEmbedder {
        pub calls: Arc<AtomicUsize>,
        pub gate: Option<Arc<Mutex<std::sync::mpsc::Receiver<()>>>>,
        pub fail: bool,
    }

    impl FakeEmbedder {
        pub(crate) fn counting(calls: Arc<AtomicUsize>) -> Self {
            Self {
                calls,
                gate: None,
                fail: false,
            }
        }
    }

    impl Embed for FakeEmbedder {
        fn embed(&mut self, face: &FaceSnapshot) -> Result<Embedding, RecognizerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                let _ = gate.lock().unwrap().recv();
            }
            if self.fail {
                return Err(RecognizerError::MalformedSnapshot(face.size));
            }
            Ok(Embedding {
                values: vec![face.sequence as f32, 1.0],
                model_version: None,
            })
        }
    }

    /// Classifier that always answers with a fixed label.
    pub(crate) struct FixedLabel(pub &'static str);

    impl Classify for FixedLabel {
        fn classify(&self, _embedding: &Embedding) -> Result<String, ClassifierError> {
            Ok(self.0.to_string())
        }
    }

    pub(crate) fn snapshot(sequence: u64) -> Arc<FaceSnapshot> {
        Arc::new(FaceSnapshot {
            data: vec![0; 4 * 4 * 3],
            size: 4,
            sequence,
        })
    }

    #[tokio::test]
    async fn test_recognize_returns_label() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = spawn_recognizer(FakeEmbedder::counting(calls.clone()), FixedLabel("alice")).unwrap();

        assert_eq!(handle.recognize(snapshot(1)).await.unwrap(), "alice");
        assert_eq!(handle.recognize(snapshot(2)).await.unwrap(), "alice");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!handle.is_busy());
    }

    #[tokio::test]
    async fn test_second_job_in_flight_is_busy() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (release, gate) = std::sync::mpsc::channel();
        let embedder = FakeEmbedder {
            calls: calls.clone(),
            gate: Some(Arc::new(Mutex::new(gate))),
            fail: false,
        };
        let handle = spawn_recognizer(embedder, FixedLabel("bob")).unwrap();

        let first = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.recognize(snapshot(1)).await })
        };
        while !handle.is_busy() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        assert!(matches!(handle.recognize(snapshot(2)).await, Err(EngineError::Busy)));

        release.send(()).unwrap();
        assert_eq!(first.await.unwrap().unwrap(), "bob");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_embedder_failure_is_reported() {
        let embedder = FakeEmbedder {
            calls: Arc::new(AtomicUsize::new(0)),
            gate: None,
            fail: true,
        };
        let handle = spawn_recognizer(embedder, FixedLabel("x")).unwrap();
        assert!(matches!(
            handle.recognize(snapshot(1)).await,
            Err(EngineError::Recognizer(RecognizerError::MalformedSnapshot(4)))
        ));
        assert!(!handle.is_busy());
    }
}
