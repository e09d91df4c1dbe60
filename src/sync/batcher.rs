//! Action Batcher
//!
//! Bounds the message rate under rapid local editing (drag-painting tiles)
//! while keeping isolated edits low-latency. Placements accumulate in a
//! buffer with a single pending flush timer; hitting the size cap flushes
//! synchronously and cancels the timer. One buffered entry goes out as a
//! `Place`, more as one `PlaceBatch` preserving arrival order.
//!
//! The buffer is cleared unconditionally after a flush attempt: a failed
//! send is logged by the sink and never retried, the periodic snapshot push
//! repairs the loss.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::sync::action::{Action, Placement};

/// Buffered placements that force an immediate flush.
pub const BATCH_MAX_SIZE: usize = 100;

/// How long an unfilled buffer waits before flushing.
pub const BATCH_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Consumer of flushed actions. Implementations swallow and log send
/// failures; the batcher never retries.
pub trait ActionSink: Send + Sync + 'static {
    /// Hand one action to the outbound path.
    fn send(&self, action: Action);
}

struct BatchBuffer {
    pending: Vec<Placement>,
    timer: Option<JoinHandle<()>>,
}

impl BatchBuffer {
    /// Take the pending placements as one wire action, cancelling the timer.
    fn take(&mut self) -> Option<Action> {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        match self.pending.len() {
            0 => None,
            1 => {
                let p = self.pending.remove(0);
                Some(Action::Place { x: p.x, y: p.y, tool: p.tool })
            }
            _ => Some(Action::PlaceBatch { placements: std::mem::take(&mut self.pending) }),
        }
    }
}

/// Coalesces local placements into batched wire messages.
pub struct ActionBatcher {
    buffer: Arc<Mutex<BatchBuffer>>,
    sink: Arc<dyn ActionSink>,
}

impl ActionBatcher {
    /// Create a batcher feeding `sink`.
    pub fn new(sink: Arc<dyn ActionSink>) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(BatchBuffer { pending: Vec::new(), timer: None })),
            sink,
        }
    }

    /// Buffer one placement. Flushes synchronously when the size cap is
    /// reached, otherwise arms the flush timer if none is pending.
    pub fn push(&self, placement: Placement) {
        let flushed = {
            let mut buffer = self.buffer.lock().expect("batch lock poisoned");
            buffer.pending.push(placement);

            if buffer.pending.len() >= BATCH_MAX_SIZE {
                buffer.take()
            } else {
                if buffer.timer.is_none() {
                    buffer.timer = Some(self.spawn_timer());
                }
                None
            }
        };

        if let Some(action) = flushed {
            self.sink.send(action);
        }
    }

    /// Flush whatever is pending right now. Called before any non-place
    /// action so placements keep their causal position, and on leave.
    pub fn flush_now(&self) {
        let flushed = self.buffer.lock().expect("batch lock poisoned").take();
        if let Some(action) = flushed {
            self.sink.send(action);
        }
    }

    /// Number of buffered placements.
    pub fn pending_len(&self) -> usize {
        self.buffer.lock().expect("batch lock poisoned").pending.len()
    }

    fn spawn_timer(&self) -> JoinHandle<()> {
        let buffer = Arc::clone(&self.buffer);
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            tokio::time::sleep(BATCH_FLUSH_INTERVAL).await;
            let flushed = {
                let mut buffer = buffer.lock().expect("batch lock poisoned");
                buffer.timer = None;
                buffer.take()
            };
            if let Some(action) = flushed {
                debug!("interval flush");
                sink.send(action);
            }
        })
    }
}

impl Drop for ActionBatcher {
    fn drop(&mut self) {
        if let Ok(mut buffer) = self.buffer.lock() {
            if let Some(timer) = buffer.timer.take() {
                timer.abort();
            }
        }
    }
}
