//! Response: validates a reply's shape, lazily parses it, and exposes
//! the resulting state/value/trace.

use crate::compression::CompressionInfo;
use crate::config_key::ConfigKey;
use crate::config_state::{ConfigState, ConfigValue};
use crate::error::Error;
use crate::transport::RpcReply;
use frt_conf::ProtocolVersion;
use std::sync::Mutex;
use tracing::warn;

/// What `fill()` extracts from a valid reply, cached after the first call.
#[derive(Debug, Clone)]
struct Filled {
    key_echo: ConfigKey,
    state: ConfigState,
    value: ConfigValue,
    trace: serde_json::Value,
}

/// A reply in the process of being interpreted.
///
/// Built directly from a `Connection::invoke` outcome: the `Ok` side is a
/// reply that completed the RPC round trip without a transport or
/// application-level error; the `Err` side carries whichever error the
/// transport or the server attached. Both sides reach `Agent::handle_response`
/// unchanged: `Source::request_done` builds a Response either way.
pub struct Response {
    protocol_version: ProtocolVersion,
    outcome: Result<RpcReply, Error>,
    fill_result: Mutex<Option<Result<Filled, Error>>>,
}

impl Response {
    pub fn new(outcome: Result<RpcReply, Error>, protocol_version: ProtocolVersion) -> Self {
        Self {
            protocol_version,
            outcome,
            fill_result: Mutex::new(None),
        }
    }

    /// Confirms absence of a request-level error and that the return slot
    /// types match the schema for this response's protocol version.
    ///
    /// The three checks below are independent assignments evaluated in
    /// sequence, not a short-circuiting chain, matching the original; the
    /// last applicable check decides the outcome.
    pub fn validate(&self) -> bool {
        let reply = match &self.outcome {
            Err(_) => return false,
            Ok(reply) => reply,
        };
        let mut valid;
        valid = !self.is_error();
        valid = reply.string_slot.is_some();
        valid = match self.protocol_version {
            ProtocolVersion::V3 => reply.string_slot.is_some() && reply.binary_slot.is_some(),
            ProtocolVersion::V2 | ProtocolVersion::V1 => reply.string_slot.is_some(),
        };
        valid
    }

    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    pub fn error_code(&self) -> Option<String> {
        match &self.outcome {
            Ok(_) => None,
            Err(Error::ServerError { code }) => Some(code.clone()),
            Err(other) => Some(other.to_string()),
        }
    }

    pub fn error_message(&self) -> Option<String> {
        self.outcome.as_ref().err().map(|e| e.to_string())
    }

    /// Lazy, at-most-once parse of the reply payload. A second call returns
    /// the cached result and logs a warning instead of re-parsing; callers
    /// must not depend on side effects running more than once.
    pub fn fill(&self) -> Result<(), Error> {
        let mut cached = self.fill_result.lock().unwrap();
        if cached.is_some() {
            warn!("Response::fill called more than once, ignoring");
            return Ok(());
        }
        let result = self.parse();
        *cached = Some(result.clone());
        result.map(|_| ())
    }

    fn parse(&self) -> Result<Filled, Error> {
        let reply = self.outcome.as_ref().map_err(|e| clone_error(e))?;
        let raw = reply
            .string_slot
            .as_ref()
            .ok_or_else(|| Error::UnexpectedReturnTypes { version: self.protocol_version.as_i32() as u8 })?;

        let tree: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| Error::MalformedPayload(e.to_string()))?;

        let key_echo = ConfigKey::new(
            tree["defName"].as_str().unwrap_or_default(),
            tree["defNamespace"].as_str().unwrap_or_default(),
            tree["defMD5"].as_str().unwrap_or_default(),
            tree["configId"].as_str().unwrap_or_default(),
            Vec::new(),
        );

        let fingerprint = tree["configMD5"].as_str().unwrap_or_default().to_string();
        let state = ConfigState {
            generation: tree["generation"].as_i64().unwrap_or(0),
            payload_fingerprint: fingerprint.clone(),
            internal_redeploy: tree["internalRedeploy"].as_bool().unwrap_or(false),
        };
        let trace = tree.get("trace").cloned().unwrap_or(serde_json::Value::Null);

        let payload = match self.protocol_version {
            ProtocolVersion::V2 | ProtocolVersion::V1 => {
                tree.get("payload").cloned().unwrap_or(serde_json::Value::Null)
            }
            ProtocolVersion::V3 => {
                let info: CompressionInfo = serde_json::from_value(
                    tree.get("compressionInfo").cloned().unwrap_or(serde_json::Value::Null),
                )
                .map_err(|e| Error::MalformedPayload(e.to_string()))?;
                let binary = reply.binary_slot.as_deref().unwrap_or(&[]);
                let decompressed = crate::compression::decompress(
                    binary,
                    info.compression_type,
                    info.uncompressed_size,
                )?;
                if decompressed.is_empty() {
                    serde_json::Value::Null
                } else {
                    serde_json::from_slice(&decompressed)
                        .map_err(|e| Error::MalformedPayload(e.to_string()))?
                }
            }
        };

        Ok(Filled {
            key_echo,
            state,
            value: ConfigValue::new(fingerprint, payload),
            trace,
        })
    }

    pub fn key(&self) -> Option<ConfigKey> {
        self.cached_ok().map(|f| f.key_echo.clone())
    }

    pub fn state(&self) -> Option<ConfigState> {
        self.cached_ok().map(|f| f.state.clone())
    }

    pub fn value(&self) -> Option<ConfigValue> {
        self.cached_ok().map(|f| f.value.clone())
    }

    pub fn trace(&self) -> Option<serde_json::Value> {
        self.cached_ok().map(|f| f.trace.clone())
    }

    fn cached_ok(&self) -> Option<Filled> {
        self.fill_result
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|r| r.as_ref().ok().cloned())
    }
}

fn clone_error(e: &Error) -> Error {
    match e {
        Error::Connection { peer } => Error::Connection { peer: peer.clone() },
        Error::Timeout { peer, timeout_ms } => Error::Timeout {
            peer: peer.clone(),
            timeout_ms: *timeout_ms,
        },
        Error::Aborted => Error::Aborted,
        Error::ServerError { code } => Error::ServerError { code: code.clone() },
        Error::UnexpectedReturnTypes { version } => Error::UnexpectedReturnTypes { version: *version },
        Error::Decompress(s) => Error::Decompress(s.clone()),
        Error::MalformedPayload(s) => Error::MalformedPayload(s.clone()),
        Error::NoPeerAvailable => Error::NoPeerAvailable,
    }
}
