//! # wsdrain-core
//!
//! Shared vocabulary for the wsdrain server and client: ids, the control
//! message protocol, the payload source collaborator and settings.

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod payload;
pub mod protocol;
pub mod settings;

pub use errors::SettingsError;
pub use ids::{ConnectionId, SessionId};
pub use payload::{ClockPayloadSource, PayloadSource};
pub use protocol::{Frame, CLOSE, SHUTDOWN};
pub use settings::{ClientSettings, ServerSettings, ShutdownSettings};
