//! Drain protocol run across every live session at shutdown.
//!
//! Sequence per session: `SHUTDOWN`, `k` trailing payloads paced by a fixed
//! delay, `CLOSE`, then the mailbox is closed so the send loop flushes and
//! writes its close frame. A session that refuses any step is torn down and
//! skipped for the rest of the run. `k` is drawn once per run and shared by
//! every session.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};
use wsdrain_core::{PayloadSource, SessionId, ShutdownSettings, CLOSE, SHUTDOWN};

use crate::registry::SessionRegistry;
use crate::session::Session;

/// How many trailing payloads a drain sends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrailingCount {
    Fixed(usize),
    /// Uniform in `min..=max`.
    Random { min: usize, max: usize },
}

impl TrailingCount {
    /// Draw the count for one drain.
    pub fn draw(&self) -> usize {
        match *self {
            Self::Fixed(n) => n,
            Self::Random { min, max } => rand::thread_rng().gen_range(min..=max.max(min)),
        }
    }
}

impl From<&ShutdownSettings> for TrailingCount {
    fn from(settings: &ShutdownSettings) -> Self {
        if settings.trailing_min == settings.trailing_max {
            Self::Fixed(settings.trailing_min)
        } else {
            Self::Random {
                min: settings.trailing_min,
                max: settings.trailing_max,
            }
        }
    }
}

/// Outcome of one drain run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Trailing payload count used for every session.
    pub trailing: usize,
    /// Sessions that got the full sequence.
    pub completed: Vec<SessionId>,
    /// Sessions torn down part-way.
    pub torn_down: Vec<SessionId>,
}

/// Runs the drain protocol once.
pub struct ShutdownSequencer {
    registry: Arc<SessionRegistry>,
    source: Arc<dyn PayloadSource>,
    trailing: TrailingCount,
    pacing: Duration,
    drain_window: Duration,
}

impl ShutdownSequencer {
    pub fn new(
        registry: Arc<SessionRegistry>,
        source: Arc<dyn PayloadSource>,
        trailing: TrailingCount,
        pacing: Duration,
        drain_window: Duration,
    ) -> Self {
        Self {
            registry,
            source,
            trailing,
            pacing,
            drain_window,
        }
    }

    pub fn from_settings(
        registry: Arc<SessionRegistry>,
        source: Arc<dyn PayloadSource>,
        settings: &ShutdownSettings,
    ) -> Self {
        Self::new(
            registry,
            source,
            TrailingCount::from(settings),
            settings.pacing(),
            settings.drain_window(),
        )
    }

    /// Override the trailing count (tests pin it).
    pub fn with_trailing(mut self, trailing: TrailingCount) -> Self {
        self.trailing = trailing;
        self
    }

    /// Run the drain. Consumes the sequencer so it runs at most once.
    pub async fn run(self) -> DrainReport {
        let snapshot = self.registry.snapshot();
        info!(sessions = snapshot.len(), "starting graceful drain");

        let mut report = DrainReport::default();
        let mut live: Vec<Arc<Session>> = Vec::with_capacity(snapshot.len());

        for session in snapshot {
            if Self::offer(&session, SHUTDOWN, &mut report) {
                live.push(session);
            }
        }

        report.trailing = self.trailing.draw();
        info!(trailing = report.trailing, live = live.len(), "sending trailing payloads");

        for i in 0..report.trailing {
            if live.is_empty() {
                break;
            }
            let payload = self.source.trailing_payload(i);
            live.retain(|session| Self::offer(session, payload.as_str(), &mut report));
            tokio::time::sleep(self.pacing).await;
        }

        for session in live {
            if Self::offer(&session, CLOSE, &mut report) {
                let _ = session.close();
                report.completed.push(session.id().clone());
            }
        }

        info!(
            completed = report.completed.len(),
            torn_down = report.torn_down.len(),
            drain_window_ms = self.drain_window.as_millis() as u64,
            "drain sequence queued, waiting for flush"
        );
        tokio::time::sleep(self.drain_window).await;
        report
    }

    /// Enqueue one step; on refusal tear the session down and record it.
    fn offer(session: &Session, payload: &str, report: &mut DrainReport) -> bool {
        match session.enqueue(payload) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    session_id = %session.id(),
                    remote = ?session.remote(),
                    step = payload,
                    reason = %e,
                    "drain step refused, tearing down"
                );
                session.teardown();
                report.torn_down.push(session.id().clone());
                false
            }
        }
    }
}
