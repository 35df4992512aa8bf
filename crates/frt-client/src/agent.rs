//! Agent: turns a Response into a holder notification and the next
//! poll/backoff parameters.

use crate::config_state::{ConfigState, ConfigValue};
use crate::error::Error;
use crate::request::Request;
use crate::response::Response;
use frt_conf::TimingValues;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info};

/// Notification pushed to the holder when a subscription's state advances.
#[derive(Debug, Clone)]
pub struct ConfigUpdate {
    pub value: ConfigValue,
    /// False when only the generation moved but the payload fingerprint is
    /// unchanged (a "nothing new, just a heartbeat bump" update); still
    /// delivered even though nothing in the payload itself moved.
    pub changed: bool,
    pub generation: i64,
}

/// The external collaborator a subscription notifies. Implemented by
/// whatever owns the subscription (a `ConfigSubscriber`, a test double, ...).
pub trait ConfigHolder: Send + Sync {
    fn update(&self, update: ConfigUpdate);

    /// Called for the one class of error this crate treats as unrecoverable
    /// for the subscription (a malformed payload). See `Error::MalformedPayload`.
    fn on_fatal_error(&self, error: &Error);
}

struct AgentState {
    config_state: ConfigState,
    latest_value: Option<ConfigValue>,
    failed_requests: u32,
    num_configured: u32,
    wait_time: Duration,
    next_timeout: Duration,
    /// Set once a response fails with an unrecoverable error (a malformed
    /// payload). A stopped Agent never schedules another poll; `Source`
    /// checks `is_stopped()` after every `handle_response` call instead of
    /// unconditionally rescheduling.
    stopped: bool,
}

/// Per-subscription bookkeeping: failure counters, the last known config
/// state, and the poll/backoff parameters derived from the last response.
pub struct Agent {
    timing: TimingValues,
    state: Mutex<AgentState>,
    holder: Arc<dyn ConfigHolder>,
}

impl Agent {
    pub fn new(timing: TimingValues, holder: Arc<dyn ConfigHolder>) -> Self {
        Self {
            timing,
            state: Mutex::new(AgentState {
                config_state: ConfigState::empty(),
                latest_value: None,
                failed_requests: 0,
                num_configured: 0,
                // Fire the first poll immediately; `next_timeout` starts at
                // `initial_timeout` so the very first poll uses it as its server timeout.
                wait_time: Duration::ZERO,
                next_timeout: timing.initial_timeout,
                stopped: false,
            }),
            holder,
        }
    }

    pub fn next_timeout(&self) -> Duration {
        self.state.lock().unwrap().next_timeout
    }

    /// True once a response has failed with an unrecoverable error. A
    /// stopped Agent's subscription must not be polled again.
    pub fn is_stopped(&self) -> bool {
        self.state.lock().unwrap().stopped
    }

    pub fn wait_time(&self) -> Duration {
        self.state.lock().unwrap().wait_time
    }

    pub fn config_state(&self) -> ConfigState {
        self.state.lock().unwrap().config_state.clone()
    }

    /// Two subtleties worth calling out: `wait_time` on the OK path is set
    /// unconditionally (even when nothing changed), and a generation that
    /// fails to verify always notifies the holder and increments
    /// `num_configured`, even when the fingerprint alone is unchanged.
    pub fn handle_response(&self, request: &Request, response: &Response) {
        let mut state = self.state.lock().unwrap();

        if response.validate() && !response.is_error() {
            if let Err(err) = response.fill() {
                error!(key = ?request.key, error = %err, "malformed config payload, stopping this subscription");
                self.holder.on_fatal_error(&err);
                state.stopped = true;
                return;
            }

            let new_state = response.state().expect("fill() succeeded");
            let new_value = response.value().expect("fill() succeeded");

            if !request.verify_state(&new_state) {
                let changed = state
                    .latest_value
                    .as_ref()
                    .map(|v| !v.same_content_as(&new_value))
                    .unwrap_or(true);
                if changed {
                    state.latest_value = Some(new_value.clone());
                }
                state.config_state = new_state.clone();
                state.num_configured += 1;
                self.holder.update(ConfigUpdate {
                    value: new_value,
                    changed,
                    generation: new_state.generation,
                });
            }

            state.failed_requests = 0;
            state.wait_time = self.timing.fixed_delay + self.timing.success_delay;
            state.next_timeout = self.timing.success_timeout;
        } else {
            info!(
                key = ?request.key,
                error_code = ?response.error_code(),
                "config request failed, retrying with backoff"
            );
            record_error_backoff(&mut state, &self.timing);
        }
    }
}

fn record_error_backoff(state: &mut AgentState, timing: &TimingValues) {
    state.failed_requests += 1;
    let delay = if state.num_configured > 0 {
        timing.configured_error_delay
    } else {
        timing.unconfigured_delay
    };
    state.wait_time = timing.wait_time(delay, state.failed_requests);
    state.next_timeout = timing.error_timeout;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::compress_lz4;
    use crate::config_key::ConfigKey;
    use crate::connection::Connection;
    use crate::request::RequestFactory;
    use crate::transport::{RpcReply, RpcTarget, RpcTransport};
    use async_trait::async_trait;
    use frt_conf::ProtocolVersion;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct DeadTransport;
    #[async_trait]
    impl RpcTransport for DeadTransport {
        async fn resolve(&self, _address: &str) -> Result<Arc<dyn RpcTarget>, Error> {
            Err(Error::Connection { peer: "unused".into() })
        }
    }

    fn test_connection() -> Arc<Connection> {
        Arc::new(Connection::new(
            "p1",
            Duration::from_secs(1),
            Duration::from_secs(5),
            6,
            Arc::new(DeadTransport),
        ))
    }

    struct RecordingHolder {
        updates: Mutex<Vec<ConfigUpdate>>,
        fatal_errors: AtomicUsize,
    }

    impl RecordingHolder {
        fn new() -> Self {
            Self {
                updates: Mutex::new(Vec::new()),
                fatal_errors: AtomicUsize::new(0),
            }
        }
    }

    impl ConfigHolder for RecordingHolder {
        fn update(&self, update: ConfigUpdate) {
            self.updates.lock().unwrap().push(update);
        }

        fn on_fatal_error(&self, _error: &Error) {
            self.fatal_errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn v3_response(generation: i64, fingerprint: &str, payload: serde_json::Value) -> Response {
        let mut tree = serde_json::json!({
            "defName": "foo",
            "defNamespace": "ns",
            "defMD5": "md5",
            "configId": "id/1",
            "generation": generation,
            "configMD5": fingerprint,
            "internalRedeploy": false,
        });
        let compressed = compress_lz4(payload.to_string().as_bytes());
        tree["compressionInfo"] = serde_json::json!({
            "compressionType": "LZ4",
            "uncompressedSize": payload.to_string().len(),
        });
        let reply = RpcReply {
            string_slot: Some(tree.to_string()),
            binary_slot: Some(compressed),
        };
        Response::new(Ok(reply), ProtocolVersion::V3)
    }

    fn request_with_state(state: ConfigState) -> Request {
        let factory = RequestFactory::new("host");
        let key = ConfigKey::new("foo", "ns", "md5", "id/1", vec![]);
        factory.build(&key, test_connection(), state, Duration::from_secs(10))
    }

    #[test]
    fn ok_path_notifies_holder_on_new_generation() {
        let holder = Arc::new(RecordingHolder::new());
        let agent = Agent::new(TimingValues::default(), holder.clone());
        let request = request_with_state(ConfigState::empty());
        let response = v3_response(1, "fp-1", serde_json::json!({"x": 1}));

        agent.handle_response(&request, &response);

        let updates = holder.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert!(updates[0].changed);
        assert_eq!(updates[0].generation, 1);
        assert_eq!(agent.config_state().generation, 1);
        assert_eq!(agent.next_timeout(), TimingValues::default().success_timeout);
    }

    #[test]
    fn ok_path_with_matching_state_does_not_notify_holder() {
        let holder = Arc::new(RecordingHolder::new());
        let agent = Agent::new(TimingValues::default(), holder.clone());
        let state = ConfigState {
            generation: 5,
            payload_fingerprint: "fp-5".into(),
            internal_redeploy: false,
        };
        let request = request_with_state(state.clone());
        let response = v3_response(5, "fp-5", serde_json::json!({"x": 1}));

        agent.handle_response(&request, &response);

        assert!(holder.updates.lock().unwrap().is_empty());
        assert_eq!(agent.wait_time(), Duration::ZERO);
    }

    #[test]
    fn generation_bump_with_unchanged_fingerprint_still_notifies() {
        let holder = Arc::new(RecordingHolder::new());
        let agent = Agent::new(TimingValues::default(), holder.clone());

        let first_request = request_with_state(ConfigState::empty());
        agent.handle_response(&first_request, &v3_response(1, "fp-1", serde_json::json!({"x": 1})));

        let second_request = request_with_state(agent.config_state());
        let bumped_generation = v3_response(2, "fp-1", serde_json::json!({"x": 1}));
        agent.handle_response(&second_request, &bumped_generation);

        let updates = holder.updates.lock().unwrap();
        assert_eq!(updates.len(), 2);
        assert!(!updates[1].changed);
        assert_eq!(updates[1].generation, 2);
    }

    #[test]
    fn error_path_backs_off_and_sets_error_timeout() {
        let holder = Arc::new(RecordingHolder::new());
        let agent = Agent::new(TimingValues::default(), holder);
        let request = request_with_state(ConfigState::empty());
        let response = Response::new(
            Err(Error::ServerError { code: "UNKNOWN_CONFIG_ID".into() }),
            ProtocolVersion::V3,
        );

        agent.handle_response(&request, &response);

        assert_eq!(agent.next_timeout(), TimingValues::default().error_timeout);
        assert!(agent.wait_time() > Duration::ZERO);
    }

    #[test]
    fn malformed_payload_reports_fatal_error_and_stops() {
        let holder = Arc::new(RecordingHolder::new());
        let agent = Agent::new(TimingValues::default(), holder.clone());
        let request = request_with_state(ConfigState::empty());
        let reply = RpcReply {
            string_slot: Some("not json".into()),
            binary_slot: Some(Vec::new()),
        };
        let response = Response::new(Ok(reply), ProtocolVersion::V3);

        assert!(!agent.is_stopped());
        agent.handle_response(&request, &response);

        assert_eq!(holder.fatal_errors.load(Ordering::SeqCst), 1);
        assert!(holder.updates.lock().unwrap().is_empty());
        assert!(agent.is_stopped());
    }
}
