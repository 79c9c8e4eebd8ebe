//! Ingestion pipeline: the bounded work queue and its drain loop.
//!
//! The stream read loop must never block on downstream processing, and the
//! per-event handler may be slow (it does network calls). The two sides are
//! decoupled by a bounded `tokio::sync::mpsc` channel:
//!
//! - **Producer** (the stream connection): `send().await` per message.
//!   Once the queue is full the send awaits free capacity — backpressure
//!   blocks, it never drops. Data loss is unacceptable for a security
//!   event pipeline.
//! - **Consumer** (this module's [`drain`]): pops messages strictly in
//!   arrival order and hands each to the handler. A handler fault is
//!   logged and skipped; the loop continues with the next message.
//!
//! The drain loop ends when the channel closes (all senders dropped), so a
//! clean shutdown is: stop the producer, drop the senders, let the drain
//! finish in-flight work.

use metrics::{counter, gauge};
use sightline_core::Event;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How long the consumer waits on an empty queue before re-checking the
/// shutdown flag.
const IDLE_POLL: Duration = Duration::from_secs(1);

/// Statistics from a drain run.
#[derive(Debug, Clone, Default)]
pub struct DrainStats {
    /// Events handed to the handler.
    pub handled: usize,
    /// Handler invocations that returned an error (logged, skipped).
    pub handler_errors: usize,
}

/// Create the work queue joining the stream producer to the drain loop.
pub fn work_queue(capacity: usize) -> (mpsc::Sender<Event>, mpsc::Receiver<Event>) {
    mpsc::channel(capacity)
}

/// Drain the queue, invoking `handler` for each event in arrival order.
///
/// Returns once the channel is closed and empty, or once `running` is
/// cleared with nothing left in the queue. In-flight work always
/// completes: a cleared flag alone never abandons queued events as long
/// as the producer has stopped feeding them.
pub async fn drain<F, Fut>(
    mut queue: mpsc::Receiver<Event>,
    running: Arc<AtomicBool>,
    mut handler: F,
) -> DrainStats
where
    F: FnMut(Event) -> Fut,
    Fut: Future<Output = crate::error::Result<()>>,
{
    let mut stats = DrainStats::default();

    loop {
        match tokio::time::timeout(IDLE_POLL, queue.recv()).await {
            Err(_) => {
                // Idle. Leave only when shutdown was requested; the
                // producer stops first, so nothing more is coming.
                if !running.load(Ordering::SeqCst) {
                    break;
                }
            }
            Ok(None) => {
                tracing::info!("Work queue closed, drain loop ending");
                break;
            }
            Ok(Some(event)) => {
                gauge!("pipeline_queue_depth").set(queue.len() as f64);
                stats.handled += 1;
                counter!("pipeline_events_handled_total").increment(1);

                if let Err(e) = handler(event).await {
                    // A malformed document or failed report must not stop
                    // the pipeline.
                    stats.handler_errors += 1;
                    counter!("pipeline_handler_errors_total").increment(1);
                    tracing::warn!("Event handler error: {}", e);
                }
            }
        }
    }

    stats
}
