//! `tasknode-agent`: the node agent process.
//!
//! Wires the store, scheduler and RPC server together and supervises timed
//! jobs (`crontab`) and long-running daemons (`daemon`) on this host.

pub mod context;
pub mod crontab;
pub mod daemon;
pub mod error;
pub mod heartbeat;
pub mod notify;
pub mod proto;
pub mod runtime;
pub mod serve;

pub use context::AgentContext;
pub use error::{AgentError, Result};
pub use runtime::Agent;
