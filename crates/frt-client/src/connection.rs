//! Connection: one peer endpoint, its lazily-resolved transport
//! target, and its transient/fatal failure accounting.

use crate::error::Error;
use crate::request::Request;
use crate::transport::{RequestWaiter, RpcTarget, RpcTransport};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Throttle window for the "peer suspended" warning (10s in the original).
const SUSPEND_WARN_INTERVAL: Duration = Duration::from_secs(10);

/// Error codes a peer can report, classified into the transient/fatal
/// taxonomy below.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    RpcConnection,
    RpcTimeout,
    RpcAbort,
    UnknownConfig,
    UnknownDefinition,
    UnknownVersion,
    UnknownConfigId,
    UnknownDefMd5,
    IllegalName,
    IllegalVersion,
    IllegalConfigId,
    IllegalDefMd5,
    IllegalConfigMd5,
    IllegalTimeout,
    OutdatedConfig,
    InternalError,
    /// Any code not in the taxonomy above: classifies as neither transient
    /// nor fatal, and causes no state change (matches the original's
    /// unmatched-switch-arm behavior).
    Other(String),
}

/// Which failure counter (and suspension delay) an error code feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    Fatal,
    None,
}

impl ErrorCode {
    pub fn classify(&self) -> FailureClass {
        use ErrorCode::*;
        match self {
            RpcConnection | RpcTimeout => FailureClass::Transient,
            UnknownConfig | UnknownDefinition | UnknownVersion | UnknownConfigId
            | UnknownDefMd5 | IllegalName | IllegalVersion | IllegalConfigId | IllegalDefMd5
            | IllegalConfigMd5 | IllegalTimeout | OutdatedConfig | InternalError => {
                FailureClass::Fatal
            }
            RpcAbort | Other(_) => FailureClass::None,
        }
    }
}

struct Counters {
    suspended_until: Instant,
    last_suspend_warn_at: Option<Instant>,
    transient_failures: u32,
    fatal_failures: u32,
}

/// One peer endpoint. Lifetime tied to its owning `ConnectionPool`.
pub struct Connection {
    address: String,
    transient_delay: Duration,
    fatal_delay: Duration,
    max_delay_multiplier: u32,
    counters: Mutex<Counters>,
    target: tokio::sync::Mutex<Option<Arc<dyn RpcTarget>>>,
    transport: Arc<dyn RpcTransport>,
    /// Shared with the owning `ConnectionPool` so `sync_transport` can
    /// drain every connection's outstanding callbacks, not just this one's.
    outstanding: Arc<AtomicUsize>,
}

impl Connection {
    pub fn new(
        address: impl Into<String>,
        transient_delay: Duration,
        fatal_delay: Duration,
        max_delay_multiplier: u32,
        transport: Arc<dyn RpcTransport>,
    ) -> Self {
        Self::with_outstanding_counter(
            address,
            transient_delay,
            fatal_delay,
            max_delay_multiplier,
            transport,
            Arc::new(AtomicUsize::new(0)),
        )
    }

    pub(crate) fn with_outstanding_counter(
        address: impl Into<String>,
        transient_delay: Duration,
        fatal_delay: Duration,
        max_delay_multiplier: u32,
        transport: Arc<dyn RpcTransport>,
        outstanding: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            address: address.into(),
            transient_delay,
            fatal_delay,
            max_delay_multiplier,
            counters: Mutex::new(Counters {
                suspended_until: Instant::now(),
                last_suspend_warn_at: None,
                transient_failures: 0,
                fatal_failures: 0,
            }),
            target: tokio::sync::Mutex::new(None),
            transport,
            outstanding,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn suspended_until(&self) -> Instant {
        self.counters.lock().unwrap().suspended_until
    }

    /// A Connection is "ready" iff `now >= suspendedUntil`. Read without
    /// holding a lock across the comparison beyond what's needed to copy
    /// out `suspended_until`; a racing writer at worst causes one extra
    /// round of the caller's selection loop.
    pub fn is_ready(&self) -> bool {
        Instant::now() >= self.suspended_until()
    }

    /// Resolve (or lazily refresh) this peer's target and issue `request`
    /// asynchronously. Never blocks the caller beyond target resolution:
    /// the actual RPC call and its completion happen on a spawned task,
    /// which notifies `waiter` when done. Any failure during resolution is
    /// surfaced to `waiter` as an error rather than silently dropped.
    ///
    /// Failure accounting happens exactly once, at `Source::request_done`
    /// (via `Request::set_peer_error`) — this method only surfaces the
    /// error, it never calls `record_error` itself, so a single failed
    /// request never double-counts against this connection's failure
    /// counters.
    pub async fn invoke(
        self: &Arc<Self>,
        request: Arc<Request>,
        timeout: Duration,
        waiter: Arc<dyn RequestWaiter>,
    ) {
        let target = match self.resolve_target().await {
            Ok(target) => target,
            Err(err) => {
                waiter.request_done(request, Err(err)).await;
                return;
            }
        };

        let connection = Arc::clone(self);
        let req_for_task = Arc::clone(&request);
        let method = method_name(request.protocol_version);
        let body = request.body.clone();
        let outstanding = Arc::clone(&self.outstanding);
        outstanding.fetch_add(1, Ordering::SeqCst);

        let handle = tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, target.call(method, body, timeout)).await
            {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    peer: connection.address.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
            };
            waiter.request_done(req_for_task, outcome).await;
            outstanding.fetch_sub(1, Ordering::SeqCst);
        });

        request.set_handle(handle);
    }

    async fn resolve_target(&self) -> Result<Arc<dyn RpcTarget>, Error> {
        let mut guard = self.target.lock().await;
        if let Some(target) = guard.as_ref() {
            if target.is_valid() {
                return Ok(Arc::clone(target));
            }
        }
        let fresh = self.transport.resolve(&self.address).await?;
        *guard = Some(Arc::clone(&fresh));
        Ok(fresh)
    }

    /// Classify `code` and update failure counters / `suspendedUntil`
    /// accordingly. Codes outside the known taxonomy are a genuine no-op.
    pub fn record_error(&self, code: ErrorCode) {
        match code.classify() {
            FailureClass::Transient => self.suspend(FailureClass::Transient),
            FailureClass::Fatal => self.suspend(FailureClass::Fatal),
            FailureClass::None => {}
        }
    }

    fn suspend(&self, class: FailureClass) {
        let (failures, should_warn) = {
            let mut counters = self.counters.lock().unwrap();
            let (base, count) = match class {
                FailureClass::Transient => {
                    counters.transient_failures += 1;
                    (self.transient_delay, counters.transient_failures)
                }
                FailureClass::Fatal => {
                    counters.fatal_failures += 1;
                    (self.fatal_delay, counters.fatal_failures)
                }
                FailureClass::None => unreachable!("suspend only called for Transient/Fatal"),
            };
            let multiplier = count.min(self.max_delay_multiplier);
            counters.suspended_until = Instant::now() + base * multiplier;

            let should_warn = counters
                .last_suspend_warn_at
                .map(|at| at.elapsed() >= SUSPEND_WARN_INTERVAL)
                .unwrap_or(true);
            if should_warn {
                counters.last_suspend_warn_at = Some(Instant::now());
            }
            (count, should_warn)
        };
        if should_warn {
            warn!(address = %self.address, ?class, failures, "peer suspended after repeated failures");
        } else {
            debug!(address = %self.address, ?class, failures, "peer suspended after failure");
        }
    }

    /// Clears both failure counters and `suspendedUntil` (makes the peer
    /// immediately ready).
    pub fn record_success(&self) {
        let mut counters = self.counters.lock().unwrap();
        counters.transient_failures = 0;
        counters.fatal_failures = 0;
        counters.suspended_until = Instant::now();
    }
}

fn method_name(version: frt_conf::ProtocolVersion) -> &'static str {
    match version {
        frt_conf::ProtocolVersion::V3 => "config.v3.getConfig",
        frt_conf::ProtocolVersion::V2 => "config.v2.getConfig",
        frt_conf::ProtocolVersion::V1 => "config.v1.getConfig",
    }
}
