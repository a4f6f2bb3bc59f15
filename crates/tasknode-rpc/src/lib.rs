//! tasknode-rpc: request/reply transport between node agents and the
//! control plane.
//!
//! Wire format: TCP, 4-byte big-endian length prefix, each frame a bincode
//! encoded [`Frame`]. Request and reply bodies are themselves bincode
//! encoded typed values, so the envelope never needs to know them.
//!
//! - Client side: [`ClientPool`] hands out one lazily-dialled [`Client`] per
//!   peer, each with a background liveness ping.
//! - Server side: implement [`Service`] per service object, register them in
//!   a [`Router`], and drive it with [`serve`].

pub mod client;
pub mod codec;
pub mod error;
pub mod frames;
pub mod methods;
pub mod server;

pub use client::{Client, ClientOptions, ClientPool};
pub use error::{Result, RpcError};
pub use frames::{ErrorShape, Frame, Outcome, ReqFrame, ResFrame};
pub use server::{decode_args, encode_reply, serve, Router, Service};
