//! Periodic per-session producer.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use wsdrain_core::PayloadSource;

use crate::mailbox::EnqueueError;
use crate::session::Session;

/// Why the producer stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProducerExit {
    /// Shutdown began; the sequencer owns the mailbox from here on.
    Shutdown,
    /// The session refused a payload (and was torn down if it was full).
    Rejected(EnqueueError),
}

/// Push `source.next_payload()` into `session` every `period` until shutdown
/// or the first refused enqueue. The first push happens one period in.
pub async fn run_producer(
    session: Arc<Session>,
    source: Arc<dyn PayloadSource>,
    period: Duration,
    shutdown: CancellationToken,
) -> ProducerExit {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                debug!(session_id = %session.id(), "producer stopped for shutdown");
                return ProducerExit::Shutdown;
            }
            _ = ticker.tick() => {
                if let Err(e) = session.enqueue(source.next_payload()) {
                    debug!(session_id = %session.id(), reason = %e, "producer stopped");
                    return ProducerExit::Rejected(e);
                }
            }
        }
    }
}
