//! Captured-request queue.
//!
//! Handlers push every inbound request into a bounded FIFO; tests pop them with
//! a deadline. When the queue is full a handler waits up to the configured
//! capture timeout for room, then drops the capture and bumps a counter the
//! test can read. The handler still answers the request either way.

use crate::types::{CaptureError, RequestData};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct CaptureStats {
    /// Captures queued and not yet popped. May briefly over-count while a push
    /// is in flight.
    pending: AtomicUsize,
    dropped: AtomicU64,
}

/// Create a capture queue holding at most `capacity` requests.
pub(crate) fn capture_channel(
    capacity: usize,
    capture_timeout: Duration,
) -> (CaptureSender, CaptureReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    let stats = Arc::new(CaptureStats::default());
    (
        CaptureSender {
            tx,
            capture_timeout,
            stats: Arc::clone(&stats),
        },
        CaptureReceiver {
            rx: Mutex::new(rx),
            stats,
        },
    )
}

/// Producer half, cloned into every connection.
///
/// The queue reports itself closed to waiters once the accept loop and all
/// connections holding a sender have finished.
#[derive(Clone)]
pub(crate) struct CaptureSender {
    tx: mpsc::Sender<RequestData>,
    capture_timeout: Duration,
    stats: Arc<CaptureStats>,
}

impl CaptureSender {
    /// Queue a capture. Returns false if it was dropped.
    ///
    /// If the handler is cancelled while waiting for room (client hung up,
    /// connection aborted on shutdown) the capture counts as dropped.
    pub(crate) async fn push(&self, request: RequestData) -> bool {
        self.stats.pending.fetch_add(1, Ordering::SeqCst);
        let mut in_flight = InFlightPush {
            stats: &self.stats,
            label: format!("{} {}", request.method, request.uri),
            settled: false,
        };

        let result = self.tx.send_timeout(request, self.capture_timeout).await;
        in_flight.settled = true;

        match result {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(request)) => {
                self.stats.pending.fetch_sub(1, Ordering::SeqCst);
                let dropped = self.stats.dropped.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(
                    "Capture queue full for {:?}, dropped {} {} ({} dropped so far)",
                    self.capture_timeout, request.method, request.uri, dropped
                );
                false
            }
            Err(SendTimeoutError::Closed(request)) => {
                self.stats.pending.fetch_sub(1, Ordering::SeqCst);
                debug!(
                    "Capture queue closed, discarding {} {}",
                    request.method, request.uri
                );
                false
            }
        }
    }
}

/// Settles the counters for a push whose future was dropped mid-send.
struct InFlightPush<'a> {
    stats: &'a CaptureStats,
    label: String,
    settled: bool,
}

impl Drop for InFlightPush<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.stats.pending.fetch_sub(1, Ordering::SeqCst);
        let dropped = self.stats.dropped.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(
            "Handler cancelled while waiting for capture queue room, dropped {} ({} dropped so far)",
            self.label, dropped
        );
    }
}

/// Consumer half, owned by the server handle.
pub struct CaptureReceiver {
    rx: Mutex<mpsc::Receiver<RequestData>>,
    stats: Arc<CaptureStats>,
}

impl CaptureReceiver {
    /// Pop the oldest capture, waiting until one arrives.
    ///
    /// The wait ends at `min(per_item_timeout, overall_timeout)` from now. Time
    /// spent queueing behind another waiter counts against the same deadline.
    pub async fn wait(
        &self,
        per_item_timeout: Duration,
        overall_timeout: Duration,
    ) -> Result<RequestData, CaptureError> {
        let limit = per_item_timeout.min(overall_timeout);
        let deadline = Instant::now() + limit;

        let received = tokio::time::timeout_at(deadline, async {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        })
        .await;

        match received {
            Ok(Some(request)) => {
                self.stats.pending.fetch_sub(1, Ordering::SeqCst);
                Ok(request)
            }
            Ok(None) => Err(CaptureError::Closed),
            Err(_) => {
                debug!("No request captured within {:?}", limit);
                Err(CaptureError::Timeout(limit))
            }
        }
    }

    /// Pop the oldest capture without waiting.
    /// Returns `None` if the queue is empty or another task is currently waiting on it.
    pub fn try_next(&self) -> Option<RequestData> {
        let request = self.rx.try_lock().ok()?.try_recv().ok()?;
        self.stats.pending.fetch_sub(1, Ordering::SeqCst);
        Some(request)
    }

    pub fn pending(&self) -> usize {
        self.stats.pending.load(Ordering::SeqCst)
    }

    pub fn dropped(&self) -> u64 {
        self.stats.dropped.load(Ordering::SeqCst)
    }
}
