//! Crate-wide error taxonomy. Distinct from `utils::error`'s
//! "log at the point of failure, return a sentinel" convention used by the
//! internal helpers that are expected to fail under normal operation (a
//! duplicate packet, an over-wide window gap) — those stay `Result<T, ()>`
//! internally and are only folded into [`NetError`] at a boundary an embedder
//! actually observes.

use std::net::SocketAddr;

use collections::bytes::ReadError;

#[derive(Debug, thiserror::Error)]
pub enum NetError {
	#[error("malformed datagram from {from}: {reason}")]
	MalformedDatagram { from: SocketAddr, reason: MalformedReason },

	#[error("reliable send exhausted {attempts} attempts")]
	RetryExhausted { attempts: u32 },

	#[error("connect attempt to {addr} timed out")]
	ConnectTimedOut { addr: SocketAddr },

	#[error("connection to {addr} timed out (no traffic for {timeout_ms}ms)")]
	HeartbeatTimedOut { addr: SocketAddr, timeout_ms: u64 },

	#[error("transport error: {0}")]
	Transport(#[from] runtime::SocketError),

	#[error("connect to {addr} rejected: {reason:?}")]
	Rejected { addr: SocketAddr, reason: Vec<u8> },

	#[error("server at capacity, rejected connect from {from}")]
	AtCapacity { from: SocketAddr },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MalformedReason {
	#[error("unknown header tag {0}")]
	UnknownTag(u8),
	#[error("reliable datagram shorter than 3 bytes ({0})")]
	TooShortForSeq(usize),
}

/// Folds a codec-level read failure (a read past the written length) into the
/// richer crate error at a public boundary.
impl From<ReadError> for MalformedReason {
	fn from(_: ReadError) -> Self {
		MalformedReason::TooShortForSeq(0)
	}
}
