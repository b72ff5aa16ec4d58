//! Local semantic embeddings and the off-thread worker that generates them.
//!
//! The model is loaded once and owned exclusively by a dedicated OS thread — `std::thread`, not
//! a `tokio` task, per the concurrency model's singling-out of the embedding worker as the one
//! place requiring real OS-level concurrency. The server's main loop never touches the model
//! directly; it sends `EmbedRequest`s over a bounded channel and receives `EmbedResponse`s back,
//! each carrying the correlation id the caller submitted.

mod local;

pub use local::{
    cosine_distance, cosine_similarity, embedding_from_bytes, embedding_to_bytes, EmbeddingError,
    LocalEmbedder, BATCH_SIZE, MAX_TEXT_LENGTH, MODEL_LABEL, MODEL_VERSION,
};

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// How long the worker thread waits for the model to finish loading before the caller gives up
/// and commits to keyword-only mode for the rest of the process lifetime.
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// A request to embed one piece of text, tagged with a correlation id so the main loop can match
/// the eventual response back to the observation it was generated for.
pub struct EmbedRequest {
    pub correlation_id: String,
    pub text: String,
}

pub struct EmbedResponse {
    pub correlation_id: String,
    pub result: Result<Vec<f32>, EmbeddingError>,
}

/// Handle to the embedding worker thread. Dropping it closes the request channel, which ends the
/// worker's loop and joins the thread.
pub struct EmbeddingWorker {
    request_tx: Sender<EmbedRequest>,
    response_rx: Receiver<EmbedResponse>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl EmbeddingWorker {
    /// Spawn the worker thread and block up to [`STARTUP_TIMEOUT`] for the model to finish
    /// loading. A load failure here is the "degradable startup error" the error taxonomy
    /// describes: the caller should fall back to keyword-only search rather than treating it as
    /// fatal.
    pub fn spawn() -> Result<Self, EmbeddingError> {
        let (request_tx, request_rx) = mpsc::channel::<EmbedRequest>();
        let (response_tx, response_rx) = mpsc::channel::<EmbedResponse>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), EmbeddingError>>();

        let handle = std::thread::Builder::new()
            .name("substrate-embedding-worker".into())
            .spawn(move || {
                let embedder = match LocalEmbedder::load() {
                    Ok(e) => {
                        let _ = ready_tx.send(Ok(()));
                        e
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                while let Ok(request) = request_rx.recv() {
                    let result = embedder.embed(&request.text);
                    let response = EmbedResponse { correlation_id: request.correlation_id, result };
                    if response_tx.send(response).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| EmbeddingError::ModelInit(format!("failed to spawn worker thread: {e}")))?;

        match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(Ok(())) => Ok(Self { request_tx, response_rx, handle: Some(handle) }),
            Ok(Err(err)) => {
                let _ = handle.join();
                Err(err)
            }
            Err(RecvTimeoutError::Timeout) => Err(EmbeddingError::ModelInit(format!(
                "model load exceeded the {}s startup timeout",
                STARTUP_TIMEOUT.as_secs()
            ))),
            Err(RecvTimeoutError::Disconnected) => {
                Err(EmbeddingError::ModelInit("worker thread exited before signaling readiness".into()))
            }
        }
    }

    /// Submit a request. Non-blocking; the response arrives later via [`Self::try_recv`] or
    /// [`Self::recv_timeout`].
    pub fn submit(&self, correlation_id: String, text: String) -> bool {
        self.request_tx.send(EmbedRequest { correlation_id, text }).is_ok()
    }

    /// Drain any responses that have arrived without blocking. Called once per embedding-worker
    /// tick by the scheduler.
    pub fn try_recv(&self) -> Vec<EmbedResponse> {
        let mut out = Vec::new();
        while let Ok(response) = self.response_rx.try_recv() {
            out.push(response);
        }
        out
    }

    /// Block for a response, used by tests and by single-shot callers (the hook's duplicate
    /// suppression path, which needs a synchronous answer within its event budget).
    pub fn recv_timeout(&self, timeout: Duration) -> Option<EmbedResponse> {
        self.response_rx.recv_timeout(timeout).ok()
    }
}

impl Drop for EmbeddingWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_request_carries_its_correlation_id_through() {
        // Smoke-checks the request/response plumbing without requiring a real model load
        // (exercised separately, and gated behind network access, in the e2e suite).
        let (tx, rx) = mpsc::channel::<EmbedResponse>();
        tx.send(EmbedResponse { correlation_id: "obs-1".into(), result: Ok(vec![0.0; 384]) })
            .unwrap();
        let response = rx.recv().unwrap();
        assert_eq!(response.correlation_id, "obs-1");
    }
}
