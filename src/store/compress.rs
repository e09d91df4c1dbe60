//! Snapshot Compression Worker
//!
//! Snapshots can be large; compressing them off the caller's path keeps the
//! simulation responsive. [`SnapshotCodec`] runs a background worker task
//! speaking an id-correlated request/response protocol. Each request carries
//! a unique id; the matching response echoes it with either a result or an
//! error string, and a response for an unknown or already-resolved id is
//! ignored.
//!
//! Every request has a 15 s timeout. On timeout or any worker failure the
//! caller falls back to doing the same work synchronously and the pending
//! request is discarded, never retried. Worker failures are therefore never
//! user-visible.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::sim::GameState;

/// Per-request deadline before the synchronous fallback kicks in.
pub const WORKER_TIMEOUT: Duration = Duration::from_secs(15);

/// zstd compression level for snapshots.
const COMPRESSION_LEVEL: i32 = 3;

// =============================================================================
// WORKER PROTOCOL
// =============================================================================

/// Request to the compression worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerRequest {
    /// Serialize a snapshot and compress the JSON.
    SerializeCompress {
        /// Correlation id, unique per call.
        id: u64,
        /// The snapshot to pack.
        state: GameState,
    },
    /// Decompress and parse back into a snapshot.
    DecompressParse {
        /// Correlation id, unique per call.
        id: u64,
        /// Compressed snapshot bytes.
        compressed: Vec<u8>,
    },
    /// Like `serialize-compress`, base64-wrapped for text-only storage.
    SerializeCompressEncoded {
        /// Correlation id, unique per call.
        id: u64,
        /// The snapshot to pack.
        state: GameState,
    },
    /// Like `decompress-parse`, from a base64 string.
    DecompressParseEncoded {
        /// Correlation id, unique per call.
        id: u64,
        /// Base64 of compressed snapshot bytes.
        compressed: String,
    },
}

impl WorkerRequest {
    /// The request's correlation id.
    pub fn id(&self) -> u64 {
        match self {
            WorkerRequest::SerializeCompress { id, .. }
            | WorkerRequest::DecompressParse { id, .. }
            | WorkerRequest::SerializeCompressEncoded { id, .. }
            | WorkerRequest::DecompressParseEncoded { id, .. } => *id,
        }
    }
}

/// Successful worker output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerResult {
    /// Compressed snapshot bytes.
    Compressed(Vec<u8>),
    /// Base64 of compressed snapshot bytes.
    Encoded(String),
    /// A parsed snapshot.
    State(GameState),
}

/// Response from the worker, echoing the request id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkerResponse {
    /// Correlation id of the request this answers.
    pub id: u64,
    /// The result, when the request succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<WorkerResult>,
    /// Failure description, when it did not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Codec failure. Only the synchronous path's errors escape to callers; the
/// worker path falls back instead.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// No response within [`WORKER_TIMEOUT`].
    #[error("compression worker timed out")]
    Timeout,

    /// The worker task is gone.
    #[error("compression worker closed")]
    Closed,

    /// The worker reported a failure.
    #[error("compression worker reported: {0}")]
    Worker(String),

    /// Snapshot (de)serialization failed.
    #[error("snapshot serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Compression or decompression failed.
    #[error("compression failed: {0}")]
    Compression(#[from] std::io::Error),

    /// Stored text was not valid base64.
    #[error("base64 decode failed: {0}")]
    Decode(#[from] base64::DecodeError),
}

// =============================================================================
// SYNCHRONOUS PATH
// =============================================================================

/// Serialize and compress a snapshot on the calling thread.
pub fn serialize_compress_sync(state: &GameState) -> Result<Vec<u8>, WorkerError> {
    let json = serde_json::to_vec(&state.0)?;
    Ok(zstd::encode_all(json.as_slice(), COMPRESSION_LEVEL)?)
}

/// Decompress and parse a snapshot on the calling thread.
pub fn decompress_parse_sync(compressed: &[u8]) -> Result<GameState, WorkerError> {
    let json = zstd::decode_all(compressed)?;
    Ok(GameState(serde_json::from_slice(&json)?))
}

/// [`serialize_compress_sync`] with base64 wrapping for text-only storage.
pub fn serialize_compress_encoded_sync(state: &GameState) -> Result<String, WorkerError> {
    Ok(base64::encode(serialize_compress_sync(state)?))
}

/// [`decompress_parse_sync`] from a base64 string.
pub fn decompress_parse_encoded_sync(encoded: &str) -> Result<GameState, WorkerError> {
    decompress_parse_sync(&base64::decode(encoded)?)
}

// =============================================================================
// CODEC
// =============================================================================

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<WorkerResponse>>>>;

/// Session-scoped handle to the background compression worker.
///
/// Explicit lifecycle: one codec per session, shut down with the session, so
/// two sessions in one process never share request state.
pub struct SnapshotCodec {
    requests: mpsc::UnboundedSender<WorkerRequest>,
    pending: PendingMap,
    next_id: AtomicU64,
    worker: JoinHandle<()>,
}

impl SnapshotCodec {
    /// Spawn the worker task and return its handle.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let worker = tokio::spawn(worker_loop(rx, Arc::clone(&pending)));

        Self { requests: tx, pending, next_id: AtomicU64::new(1), worker }
    }

    /// Serialize and compress, preferring the worker path.
    pub async fn serialize_compress(&self, state: &GameState) -> Result<Vec<u8>, WorkerError> {
        let request = self.request(|id| WorkerRequest::SerializeCompress {
            id,
            state: state.clone(),
        });
        match request.await {
            Ok(WorkerResult::Compressed(bytes)) => Ok(bytes),
            Ok(other) => {
                warn!(?other, "unexpected worker result, compressing synchronously");
                serialize_compress_sync(state)
            }
            Err(e) => {
                warn!(error = %e, "worker unavailable, compressing synchronously");
                serialize_compress_sync(state)
            }
        }
    }

    /// Decompress and parse, preferring the worker path.
    pub async fn decompress_parse(&self, compressed: &[u8]) -> Result<GameState, WorkerError> {
        let request = self.request(|id| WorkerRequest::DecompressParse {
            id,
            compressed: compressed.to_vec(),
        });
        match request.await {
            Ok(WorkerResult::State(state)) => Ok(state),
            Ok(other) => {
                warn!(?other, "unexpected worker result, decompressing synchronously");
                decompress_parse_sync(compressed)
            }
            Err(e) => {
                warn!(error = %e, "worker unavailable, decompressing synchronously");
                decompress_parse_sync(compressed)
            }
        }
    }

    /// Base64 variant of [`Self::serialize_compress`].
    pub async fn serialize_compress_encoded(
        &self,
        state: &GameState,
    ) -> Result<String, WorkerError> {
        let request = self.request(|id| WorkerRequest::SerializeCompressEncoded {
            id,
            state: state.clone(),
        });
        match request.await {
            Ok(WorkerResult::Encoded(encoded)) => Ok(encoded),
            Ok(other) => {
                warn!(?other, "unexpected worker result, encoding synchronously");
                serialize_compress_encoded_sync(state)
            }
            Err(e) => {
                warn!(error = %e, "worker unavailable, encoding synchronously");
                serialize_compress_encoded_sync(state)
            }
        }
    }

    /// Base64 variant of [`Self::decompress_parse`].
    pub async fn decompress_parse_encoded(
        &self,
        encoded: &str,
    ) -> Result<GameState, WorkerError> {
        let request = self.request(|id| WorkerRequest::DecompressParseEncoded {
            id,
            compressed: encoded.to_string(),
        });
        match request.await {
            Ok(WorkerResult::State(state)) => Ok(state),
            Ok(other) => {
                warn!(?other, "unexpected worker result, decoding synchronously");
                decompress_parse_encoded_sync(encoded)
            }
            Err(e) => {
                warn!(error = %e, "worker unavailable, decoding synchronously");
                decompress_parse_encoded_sync(encoded)
            }
        }
    }

    /// Stop the worker. Pending requests fall back synchronously.
    pub fn shutdown(&self) {
        self.worker.abort();
    }

    async fn request(
        &self,
        make: impl FnOnce(u64) -> WorkerRequest,
    ) -> Result<WorkerResult, WorkerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().expect("pending lock poisoned").insert(id, tx);

        if self.requests.send(make(id)).is_err() {
            self.remove_pending(id);
            return Err(WorkerError::Closed);
        }

        match tokio::time::timeout(WORKER_TIMEOUT, rx).await {
            Ok(Ok(response)) => {
                if let Some(error) = response.error {
                    return Err(WorkerError::Worker(error));
                }
                response.result.ok_or_else(|| {
                    WorkerError::Worker("response carried neither result nor error".to_string())
                })
            }
            Ok(Err(_)) => {
                self.remove_pending(id);
                Err(WorkerError::Closed)
            }
            Err(_) => {
                // Discard the pending slot; a late response for this id is
                // ignored by the worker loop.
                self.remove_pending(id);
                Err(WorkerError::Timeout)
            }
        }
    }

    fn remove_pending(&self, id: u64) {
        self.pending.lock().expect("pending lock poisoned").remove(&id);
    }
}

impl Default for SnapshotCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SnapshotCodec {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

// =============================================================================
// WORKER TASK
// =============================================================================

async fn worker_loop(mut requests: mpsc::UnboundedReceiver<WorkerRequest>, pending: PendingMap) {
    while let Some(request) = requests.recv().await {
        let id = request.id();
        let response = match tokio::task::spawn_blocking(move || process(request)).await {
            Ok(response) => response,
            Err(e) => WorkerResponse {
                id,
                result: None,
                error: Some(format!("worker task failed: {e}")),
            },
        };
        deliver(&pending, response);
    }
}

/// Run one request on the blocking pool.
fn process(request: WorkerRequest) -> WorkerResponse {
    let id = request.id();
    let outcome = match request {
        WorkerRequest::SerializeCompress { state, .. } => {
            serialize_compress_sync(&state).map(WorkerResult::Compressed)
        }
        WorkerRequest::DecompressParse { compressed, .. } => {
            decompress_parse_sync(&compressed).map(WorkerResult::State)
        }
        WorkerRequest::SerializeCompressEncoded { state, .. } => {
            serialize_compress_encoded_sync(&state).map(WorkerResult::Encoded)
        }
        WorkerRequest::DecompressParseEncoded { compressed, .. } => {
            decompress_parse_encoded_sync(&compressed).map(WorkerResult::State)
        }
    };

    match outcome {
        Ok(result) => WorkerResponse { id, result: Some(result), error: None },
        Err(e) => WorkerResponse { id, result: None, error: Some(e.to_string()) },
    }
}

/// Hand a response to its waiter. Responses for unknown or already-resolved
/// ids are dropped.
fn deliver(pending: &PendingMap, response: WorkerResponse) -> bool {
    let waiter = pending.lock().expect("pending lock poisoned").remove(&response.id);
    match waiter {
        Some(tx) => tx.send(response).is_ok(),
        None => {
            debug!(id = response.id, "ignoring response for unknown request id");
            false
        }
    }
}
