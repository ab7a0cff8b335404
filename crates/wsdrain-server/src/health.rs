use serde::{Deserialize, Serialize};

/// Body of `GET /health`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `"healthy"` while accepting connections, `"draining"` after shutdown
    /// began.
    pub status: String,
    /// Live sessions in the registry.
    pub connections: usize,
    pub uptime_secs: u64,
    pub draining: bool,
}

impl HealthResponse {
    pub fn new(connections: usize, uptime_secs: u64, draining: bool) -> Self {
        let status = if draining { "draining" } else { "healthy" };
        Self {
            status: status.into(),
            connections,
            uptime_secs,
            draining,
        }
    }

    pub fn is_healthy(&self) -> bool {
        !self.draining
    }
}
