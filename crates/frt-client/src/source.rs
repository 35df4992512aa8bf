//! Source: the per-key polling state machine tying pool, agent, and
//! request factory together.

use crate::agent::Agent;
use crate::config_key::ConfigKey;
use crate::connection::ErrorCode;
use crate::error::Error;
use crate::pool::ConnectionPool;
use crate::request::{Request, RequestFactory};
use crate::response::Response;
use crate::transport::{RpcReply, RequestWaiter};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

/// Fixed grace added to the server's own timeout so the client's socket
/// timeout always fires after the server had a chance to reply on its own.
const CLIENT_TIMEOUT_GRACE: Duration = Duration::from_secs(5);

struct SourceInner {
    closed: bool,
    current_request: Option<Arc<Request>>,
    task_handle: Option<JoinHandle<()>>,
}

/// Drives one config key's subscription: schedules polls, builds requests,
/// and feeds responses to its `Agent`.
///
/// Self-referencing (`self_ref`) so async_trait's `&self`-only
/// `RequestWaiter::request_done` can still spawn the next poll, which needs
/// an owned `Arc<Source>` for `tokio::spawn`.
pub struct Source {
    key: ConfigKey,
    pool: Arc<ConnectionPool>,
    request_factory: Arc<RequestFactory>,
    agent: Arc<Agent>,
    self_ref: Weak<Source>,
    inner: Mutex<SourceInner>,
}

impl Source {
    pub fn new(
        key: ConfigKey,
        pool: Arc<ConnectionPool>,
        request_factory: Arc<RequestFactory>,
        agent: Arc<Agent>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            key,
            pool,
            request_factory,
            agent,
            self_ref: weak.clone(),
            inner: Mutex::new(SourceInner {
                closed: false,
                current_request: None,
                task_handle: None,
            }),
        })
    }

    fn arc_self(&self) -> Arc<Self> {
        self.self_ref
            .upgrade()
            .expect("Source outlived its own Arc while still scheduling")
    }

    /// Schedules the first poll, delayed by `agent.wait_time()` (zero on a
    /// freshly constructed Agent, so the first poll fires right away).
    pub fn start(&self) {
        self.schedule_next_with_delay(self.agent.wait_time());
    }

    fn schedule_next(&self) {
        self.schedule_next_with_delay(self.agent.wait_time());
    }

    fn schedule_next_with_delay(&self, delay: Duration) {
        let source = self.arc_self();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            source.poll().await;
        });

        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            handle.abort();
            return;
        }
        inner.task_handle = Some(handle);
    }

    #[tracing::instrument(skip(self), fields(config_id = %self.key.config_id))]
    async fn poll(&self) {
        let server_timeout = self.agent.next_timeout();
        let client_timeout = server_timeout + CLIENT_TIMEOUT_GRACE;

        let peer = match self.pool.current() {
            Some(peer) => peer,
            None => {
                // No rescheduling here: the previous scheduleNext() already
                // armed the next tick, and changing that would alter the
                // retry cadence.
                warn!(key = ?self.key, "no peer available, skipping this poll");
                return;
            }
        };

        let client_state = self.agent.config_state();
        let request = Arc::new(self.request_factory.build(
            &self.key,
            Arc::clone(&peer),
            client_state,
            server_timeout,
        ));

        {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return;
            }
            inner.current_request = Some(Arc::clone(&request));
        }

        let waiter: Arc<dyn RequestWaiter> = self.arc_self();
        peer.invoke(request, client_timeout, waiter).await;
    }

    /// Idempotent. Marks the Source closed, aborts any in-flight request,
    /// then waits for its pool's outstanding transport callbacks to drain —
    /// all outside the lock, so a slow drain never blocks a concurrent
    /// `request_done` from observing `closed`.
    pub async fn close(&self) {
        let (was_already_closed, request_to_abort) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                (true, None)
            } else {
                inner.closed = true;
                if let Some(handle) = inner.task_handle.take() {
                    handle.abort();
                }
                (false, inner.current_request.take())
            }
        };

        if was_already_closed {
            return;
        }
        if let Some(request) = request_to_abort {
            request.abort();
        }
        self.pool.sync_transport().await;
    }
}

#[async_trait]
impl RequestWaiter for Source {
    async fn request_done(&self, request: Arc<Request>, outcome: Result<RpcReply, Error>) {
        if matches!(outcome, Err(Error::Aborted)) {
            return;
        }

        if let Err(ref err) = outcome {
            if let Some(code) = classify_wire_error(err) {
                request.set_peer_error(code);
            }
        }

        let response = Response::new(outcome, request.protocol_version);
        self.agent.handle_response(&request, &response);

        let mut inner = self.inner.lock().unwrap();
        if let Some(current) = &inner.current_request {
            if Arc::ptr_eq(current, &request) {
                inner.current_request = None;
            }
        }
        if inner.closed {
            return;
        }
        if self.agent.is_stopped() {
            // The Agent hit its one unrecoverable error; mark this Source
            // closed directly rather than going through close()/sync_transport(),
            // which would deadlock waiting on this very task's outstanding count.
            inner.closed = true;
            return;
        }
        drop(inner);
        self.schedule_next();
    }
}

/// Maps a transport/server outcome to the `Connection` failure taxonomy.
/// Codes with no bearing on peer health (decode/malformed-payload errors)
/// map to `None` and leave the peer's counters untouched.
fn classify_wire_error(err: &Error) -> Option<ErrorCode> {
    match err {
        Error::Connection { .. } => Some(ErrorCode::RpcConnection),
        Error::Timeout { .. } => Some(ErrorCode::RpcTimeout),
        Error::Aborted => Some(ErrorCode::RpcAbort),
        Error::ServerError { code } => Some(map_server_code(code)),
        Error::UnexpectedReturnTypes { .. }
        | Error::Decompress(_)
        | Error::MalformedPayload(_)
        | Error::NoPeerAvailable => None,
    }
}

fn map_server_code(code: &str) -> ErrorCode {
    match code {
        "UNKNOWN_CONFIG" => ErrorCode::UnknownConfig,
        "UNKNOWN_DEFINITION" => ErrorCode::UnknownDefinition,
        "UNKNOWN_VERSION" => ErrorCode::UnknownVersion,
        "UNKNOWN_CONFIGID" => ErrorCode::UnknownConfigId,
        "UNKNOWN_DEF_MD5" => ErrorCode::UnknownDefMd5,
        "ILLEGAL_NAME" => ErrorCode::IllegalName,
        "ILLEGAL_VERSION" => ErrorCode::IllegalVersion,
        "ILLEGAL_CONFIGID" => ErrorCode::IllegalConfigId,
        "ILLEGAL_DEF_MD5" => ErrorCode::IllegalDefMd5,
        "ILLEGAL_CONFIG_MD5" => ErrorCode::IllegalConfigMd5,
        "ILLEGAL_TIMEOUT" => ErrorCode::IllegalTimeout,
        "OUTDATED_CONFIG" => ErrorCode::OutdatedConfig,
        "INTERNAL_ERROR" => ErrorCode::InternalError,
        other => ErrorCode::Other(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{ConfigHolder, ConfigUpdate};
    use crate::compression::compress_lz4;
    use crate::pool::PeerSelection;
    use crate::transport::RpcTarget;
    use frt_conf::TimingValues;

    struct FakeTransport {
        payload: serde_json::Value,
    }

    struct FakeTarget {
        payload: serde_json::Value,
    }

    #[async_trait]
    impl RpcTarget for FakeTarget {
        async fn call(
            &self,
            _method: &str,
            args: serde_json::Value,
            _timeout: Duration,
        ) -> Result<RpcReply, Error> {
            let generation = args["currentGeneration"].as_i64().unwrap_or(0) + 1;
            let compressed = compress_lz4(self.payload.to_string().as_bytes());
            let mut tree = serde_json::json!({
                "defName": "foo",
                "defNamespace": "ns",
                "defMD5": "md5",
                "configId": "id/1",
                "generation": generation,
                "configMD5": format!("fp-{generation}"),
                "internalRedeploy": false,
            });
            tree["compressionInfo"] = serde_json::json!({
                "compressionType": "LZ4",
                "uncompressedSize": self.payload.to_string().len(),
            });
            Ok(RpcReply {
                string_slot: Some(tree.to_string()),
                binary_slot: Some(compressed),
            })
        }
        fn is_valid(&self) -> bool {
            true
        }
    }

    #[async_trait]
    impl crate::transport::RpcTransport for FakeTransport {
        async fn resolve(&self, _address: &str) -> Result<Arc<dyn RpcTarget>, Error> {
            Ok(Arc::new(FakeTarget {
                payload: self.payload.clone(),
            }))
        }
    }

    struct RecordingHolder {
        updates: Mutex<Vec<ConfigUpdate>>,
    }

    impl ConfigHolder for RecordingHolder {
        fn update(&self, update: ConfigUpdate) {
            self.updates.lock().unwrap().push(update);
        }
        fn on_fatal_error(&self, _error: &Error) {}
    }

    fn test_source(payload: serde_json::Value) -> (Arc<Source>, Arc<RecordingHolder>) {
        let transport = Arc::new(FakeTransport { payload });
        let pool = Arc::new(ConnectionPool::construct(
            &["p1".to_string()],
            Duration::from_millis(10),
            Duration::from_millis(50),
            6,
            transport,
            PeerSelection::RoundRobin,
        ));
        let holder = Arc::new(RecordingHolder {
            updates: Mutex::new(Vec::new()),
        });
        let agent = Arc::new(Agent::new(TimingValues::default(), holder.clone()));
        let factory = Arc::new(RequestFactory::new("client-host"));
        let key = ConfigKey::new("foo", "ns", "md5", "id/1", vec![]);
        (Source::new(key, pool, factory, agent), holder)
    }

    #[tokio::test]
    async fn start_eventually_delivers_an_update() {
        let (source, holder) = test_source(serde_json::json!({"threads": 4}));
        source.start();

        let mut delivered = false;
        for _ in 0..50 {
            if !holder.updates.lock().unwrap().is_empty() {
                delivered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(delivered);
        source.close().await;
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (source, _holder) = test_source(serde_json::json!({"threads": 1}));
        source.start();
        source.close().await;
        source.close().await;
    }

    struct MalformedTarget;
    #[async_trait]
    impl RpcTarget for MalformedTarget {
        async fn call(
            &self,
            _method: &str,
            _args: serde_json::Value,
            _timeout: Duration,
        ) -> Result<RpcReply, Error> {
            Ok(RpcReply {
                string_slot: Some("not json".into()),
                binary_slot: Some(Vec::new()),
            })
        }
        fn is_valid(&self) -> bool {
            true
        }
    }

    struct MalformedTransport;
    #[async_trait]
    impl crate::transport::RpcTransport for MalformedTransport {
        async fn resolve(&self, _address: &str) -> Result<Arc<dyn RpcTarget>, Error> {
            Ok(Arc::new(MalformedTarget))
        }
    }

    #[tokio::test]
    async fn malformed_payload_stops_the_source_from_polling_again() {
        let pool = Arc::new(ConnectionPool::construct(
            &["p1".to_string()],
            Duration::from_millis(10),
            Duration::from_millis(50),
            6,
            Arc::new(MalformedTransport),
            PeerSelection::RoundRobin,
        ));
        let holder = Arc::new(RecordingHolder {
            updates: Mutex::new(Vec::new()),
        });
        let agent = Arc::new(Agent::new(TimingValues::default(), holder));
        let factory = Arc::new(RequestFactory::new("client-host"));
        let key = ConfigKey::new("foo", "ns", "md5", "id/1", vec![]);
        let source = Source::new(key, pool, factory, agent.clone());

        source.start();

        let mut stopped = false;
        for _ in 0..50 {
            if agent.is_stopped() {
                stopped = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(stopped);

        // Give any (incorrect) rescheduled poll a chance to run, then confirm
        // the Source really did stop rather than keep retrying.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(source.inner.lock().unwrap().closed);
    }
}
