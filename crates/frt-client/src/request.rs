//! RequestFactory and Request: builds the versioned request payload
//! and tracks its in-flight lifecycle.

use crate::config_key::ConfigKey;
use crate::config_state::ConfigState;
use crate::connection::{Connection, ErrorCode};
use frt_conf::{CompressionType, ProtocolConfig, ProtocolVersion};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// The capability-negotiation string sent with every request. This crate
/// does not parse or compare it; the server side interprets it.
const VESPA_VERSION: &str = "8.0.0";

/// Builds `Request`s for a given config key against a given peer.
///
/// The three protocol knobs (version, trace level, compression) are read
/// once at construction and never re-read.
pub struct RequestFactory {
    protocol: ProtocolConfig,
    client_hostname: String,
}

impl RequestFactory {
    pub fn new(client_hostname: impl Into<String>) -> Self {
        Self {
            protocol: ProtocolConfig::from_env(),
            client_hostname: client_hostname.into(),
        }
    }

    pub fn with_protocol(client_hostname: impl Into<String>, protocol: ProtocolConfig) -> Self {
        Self {
            protocol,
            client_hostname: client_hostname.into(),
        }
    }

    pub fn protocol(&self) -> ProtocolConfig {
        self.protocol
    }

    /// Build a new request bound to `connection`, carrying the client's
    /// last-known state so the server can reply "not modified" cheaply.
    pub fn build(
        &self,
        key: &ConfigKey,
        connection: Arc<Connection>,
        client_state: ConfigState,
        server_timeout: Duration,
    ) -> Request {
        let body = self.populate_body(key, &client_state, server_timeout);
        Request {
            id: Uuid::new_v4(),
            key: key.clone(),
            client_state,
            server_timeout,
            protocol_version: self.protocol.version,
            compression: self.protocol.compression,
            body,
            connection,
            handle: Mutex::new(None),
        }
    }

    /// Field order mirrors `SlimeConfigRequest::populateSlimeRequest` in the
    /// original: version, def*, configId, clientHostname, state, timeout,
    /// trace, compressionType, vespaVersion.
    fn populate_body(
        &self,
        key: &ConfigKey,
        client_state: &ConfigState,
        server_timeout: Duration,
    ) -> serde_json::Value {
        serde_json::json!({
            "version": self.protocol.version.as_i32(),
            "defName": key.def_name,
            "defNamespace": key.def_namespace,
            "defMD5": key.def_md5,
            "defContent": key.def_content,
            "configId": key.config_id,
            "clientHostname": self.client_hostname,
            "configXxhash64": client_state.payload_fingerprint,
            "currentGeneration": client_state.generation,
            "timeout": server_timeout.as_millis() as i64,
            "trace": { "traceLevel": self.protocol.trace_level },
            "compressionType": self.protocol.compression.as_wire_str(),
            "vespaVersion": VESPA_VERSION,
        })
    }
}

/// A single in-flight (or completed) RPC request.
///
/// Owned exclusively by the `Source` that built it until the transport
/// acknowledges completion or abort.
pub struct Request {
    pub id: Uuid,
    pub key: ConfigKey,
    /// The client's config state as of when this request was built — used
    /// by `verify_state` to detect whether the server's reply indicates a
    /// change.
    pub client_state: ConfigState,
    pub server_timeout: Duration,
    pub protocol_version: ProtocolVersion,
    pub compression: CompressionType,
    pub body: serde_json::Value,
    connection: Arc<Connection>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Request {
    /// True iff `candidate` matches exactly the fingerprint and generation
    /// this request was built with — i.e. the server has nothing new.
    pub fn verify_state(&self, candidate: &ConfigState) -> bool {
        self.client_state.matches(candidate)
    }

    /// Forward an error code to the owning Connection's failure accounting.
    pub fn set_peer_error(&self, code: ErrorCode) {
        self.connection.record_error(code);
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Cancel the in-flight transport task. Idempotent: a second call is a
    /// no-op and returns `false`.
    pub fn abort(&self) -> bool {
        match self.handle.lock().unwrap().take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Registers the task driving this request's transport call, so
    /// `abort` has something to cancel. Called once by `Connection::invoke`.
    pub(crate) fn set_handle(&self, handle: JoinHandle<()>) {
        *self.handle.lock().unwrap() = Some(handle);
    }
}
