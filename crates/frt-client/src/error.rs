//! Error taxonomy for the config client.
//!
//! Transport and protocol-level failures are classified here; `Connection`
//! and `Response` translate raw peer error codes into these variants, and
//! `Agent`/`Source` decide what, if anything, to do about them (see
//! `connection::FailureClass` for the transient/fatal split that feeds
//! backoff accounting).

use thiserror::Error;

/// Errors surfaced by this crate's components.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport could not establish or maintain a connection to the peer.
    #[error("transport connection error to {peer}")]
    Connection { peer: String },

    /// The transport did not complete the request within the client timeout.
    #[error("transport timeout to {peer} after {timeout_ms}ms")]
    Timeout { peer: String, timeout_ms: u64 },

    /// The request was aborted (expected during `Source::close`).
    #[error("request aborted")]
    Aborted,

    /// The server rejected the request with an application-level error code.
    #[error("server rejected request: {code}")]
    ServerError { code: String },

    /// The reply's return slot types did not match the protocol version's schema.
    #[error("response has unexpected return types for protocol v{version}")]
    UnexpectedReturnTypes { version: u8 },

    /// LZ4 (or other) decompression failed.
    #[error("decompression failed: {0}")]
    Decompress(String),

    /// The string-slot JSON payload could not be decoded. This is the one
    /// fatal, non-retryable error in the taxonomy: a malformed payload must
    /// never silently degrade into an empty configuration, so this crate
    /// surfaces it as a terminal `Error` rather than retrying it, but
    /// callers should treat it as unrecoverable for the affected Source.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// No peer is currently available to send a request to.
    #[error("no peer available")]
    NoPeerAvailable,
}

impl Error {
    /// True for the one variant that must be treated as unrecoverable
    /// rather than retried with backoff.
    pub fn is_fatal_protocol_error(&self) -> bool {
        matches!(self, Error::MalformedPayload(_))
    }
}
