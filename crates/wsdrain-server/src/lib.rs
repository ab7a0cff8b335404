//! # wsdrain-server
//!
//! WebSocket push server with per-session bounded mailboxes and a graceful
//! drain protocol at shutdown.

#![deny(unsafe_code)]

pub mod health;
pub mod mailbox;
pub mod producer;
pub mod registry;
pub mod sequencer;
pub mod server;
pub mod session;

pub use health::HealthResponse;
pub use mailbox::EnqueueError;
pub use registry::SessionRegistry;
pub use sequencer::{DrainReport, ShutdownSequencer, TrailingCount};
pub use server::{build_router, start, AppState, ServerError, ServerHandle};
pub use session::Session;
