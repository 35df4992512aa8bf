//! The async RPC transport seam.
//!
//! The original's callback-based transport (`IRequestWait`) is modeled here
//! as a continuation registered with the transport, with the Source
//! participating as a state-machine handler rather than an interface
//! inheritor. In async Rust that continuation is simply the future
//! `Connection::invoke` drives to completion; the `RequestWaiter` trait
//! below is the one remaining callback seam, kept so `Source` can be
//! unit-tested against a fake `RpcTransport` without a real network.

use crate::error::Error;
use crate::request::Request;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// One RPC method call's raw reply, before `Response` interprets it.
///
/// Mirrors the two protocol shapes the wire format supports: v2 carries a
/// single string slot, v3 carries `(string, binary)`.
#[derive(Debug, Clone, Default)]
pub struct RpcReply {
    pub string_slot: Option<String>,
    pub binary_slot: Option<Vec<u8>>,
}

/// A resolved connection to one peer, capable of issuing RPC calls.
///
/// Corresponds to the original's lazily-resolved FRT `Target`.
#[async_trait]
pub trait RpcTarget: Send + Sync {
    async fn call(
        &self,
        method: &str,
        args: serde_json::Value,
        timeout: Duration,
    ) -> Result<RpcReply, Error>;

    /// False once the transport has invalidated this target (e.g. the
    /// underlying connection dropped); `Connection` re-resolves when this
    /// returns false.
    fn is_valid(&self) -> bool;
}

/// The shared transport a `ConnectionPool` is built against. Resolves peer
/// addresses into `RpcTarget`s on demand.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn resolve(&self, address: &str) -> Result<Arc<dyn RpcTarget>, Error>;
}

/// Notified when an in-flight request completes (or fails). The one
/// callback seam this crate keeps from the original's interface-inheritance
/// design.
#[async_trait]
pub trait RequestWaiter: Send + Sync {
    async fn request_done(&self, request: Arc<Request>, outcome: Result<RpcReply, Error>);
}
