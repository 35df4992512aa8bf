//! FRT config subscription client.
//!
//! A long-running agent that polls a cluster of config servers over
//! request/reply RPC, with peer pooling and failure isolation so a
//! subscriber sees a steady stream of `ConfigUpdate`s even while individual
//! peers come and go. The pieces: a `ConnectionPool` of peer `Connection`s,
//! a `RequestFactory` building versioned `Request`s, `Response` parsing and
//! decompressing replies, an `Agent` turning responses into backoff/update
//! decisions, and a `Source` tying them together into one subscription's
//! poll loop.

mod agent;
mod compression;
mod config_key;
mod config_state;
mod connection;
mod error;
mod pool;
mod request;
mod response;
mod source;
mod transport;

pub use agent::{Agent, ConfigHolder, ConfigUpdate};
pub use config_key::ConfigKey;
pub use config_state::{ConfigState, ConfigValue};
pub use connection::{Connection, ErrorCode, FailureClass};
pub use error::Error;
pub use pool::{ConnectionPool, PeerSelection};
pub use request::{Request, RequestFactory};
pub use response::Response;
pub use source::Source;
pub use transport::{RequestWaiter, RpcReply, RpcTarget, RpcTransport};

pub use frt_conf::{CompressionType, ProtocolConfig, ProtocolVersion, TimingValues};
