//! obs-control: client for the local broadcasting application's control protocol.
//!
//! This crate speaks the stateful, frame-based control protocol exposed by
//! the broadcaster's local recording/broadcasting software over a persistent
//! WebSocket: challenge-response authentication, request/response
//! correlation with per-request expiry, and ordered event dispatch.
//!
//! ## Core Types
//!
//! - [`ControlClient`] - The connection handle: connect/disconnect, typed
//!   requests, listener registration
//! - [`ClientConfig`] - Endpoint, shared secret and timeouts
//! - [`ClientEvent`] / [`EventKind`] - Events surfaced to listeners
//! - [`ControlError`] - Error taxonomy for everything above
//!
//! ## Protocol
//!
//! - [`protocol`] - Opcode-tagged JSON frames, the event-subscription
//!   bitmask, and typed payloads such as [`protocol::StreamStatus`]
//! - [`auth::authentication_proof`] - The identify handshake proof
//!
//! ## Supervision
//!
//! The client does not reconnect by itself; [`supervisor::spawn`] provides
//! a backoff-based reconnect loop for daemons that want one.

pub mod auth;
pub mod client;
pub mod error;
pub mod events;
pub mod protocol;
pub mod supervisor;

pub use client::{ClientConfig, ControlClient};
pub use error::{ControlError, Result};
pub use events::{ClientEvent, EventKind};
pub use protocol::{OutputState, StreamStateChanged, StreamStatus, VersionInfo};
pub use supervisor::SupervisorConfig;
