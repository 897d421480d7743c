//! A connection-oriented, optionally-reliable messaging protocol layered over UDP,
//! for latency-sensitive multiplayer applications where most traffic is best-effort
//! but some control and state messages must be delivered exactly once.
//!
//! The reliability core (sequence numbering, ack bitfields, duplicate filtering,
//! retransmission, RTT estimation) lives in [`connection`]; [`peer`] is the
//! server/client scheduling loop built on top of it. Call [`runtime::logger::init`]
//! before using either if you want this crate's log output.

pub mod codec;
pub mod config;
pub mod connection;
pub mod control;
pub mod error;
pub mod event;
pub mod header;
pub mod peer;
pub mod pending;
pub mod seq;

pub use config::Config;
pub use connection::{Connection, State};
pub use error::NetError;
pub use event::Event;
pub use peer::{Client, MessageOptions, SendMode, SendTarget, Server};
