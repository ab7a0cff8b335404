//! # wsdrain-client
//!
//! Reconnecting WebSocket client for the wsdrain push server.

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod reconnect;

pub use errors::ClientError;
pub use events::{ClientEvent, ConnectionState, DisconnectReason};
pub use reconnect::ReconnectLoop;
