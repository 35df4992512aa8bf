//! Configuration for the FRT config subscription client.
//!
//! Two pieces live here, kept in their own crate so every other crate can
//! depend on configuration without pulling in the transport or protocol
//! code:
//!
//! - [`TimingValues`]: the poll/backoff cadence, set once per `Source`.
//! - [`ProtocolConfig`]: the three environment-configurable wire protocol
//!   knobs, read once per `RequestFactory`.

mod env;
mod timing;

pub use env::{CompressionType, ProtocolConfig, ProtocolVersion};
pub use timing::TimingValues;
