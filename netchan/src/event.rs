//! Application-visible events. There is no event bus: events are collected during
//! `tick()` and handed back to the caller (or routed to a callback) synchronously
//! before `tick()` returns.

use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
	/// The local side called `disconnect()`.
	Requested,
	/// The remote side sent `Disconnect`.
	RemoteRequested,
	/// No traffic was heard from the peer within the heartbeat timeout.
	TimedOut,
	/// The underlying socket itself failed.
	TransportError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionFailedReason {
	/// The server responded with `Reject`.
	Rejected { reason_code: u8, payload: Vec<u8> },
	/// The connect attempt never reached `Connected` in time.
	TimedOut,
	TransportError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
	/// Client-side only: this client's own connection reached `Connected`.
	Connected { addr: SocketAddr },
	/// Client-side only: the connect attempt did not reach `Connected`.
	ConnectionFailed { addr: SocketAddr, reason: ConnectionFailedReason },
	/// Client-side only: this client's own connection closed.
	Disconnected { addr: SocketAddr, client_id: Option<u16>, reason: DisconnectReason },
	/// Raised server-side when one of its own clients reaches `Connected`, and
	/// client-side when the server broadcasts that some *other* client joined —
	/// the two share a variant because both describe the same roster fact, just
	/// observed from different sides of the connection.
	ClientConnected { client_id: u16 },
	/// Server-side when it closes one of its own clients, and client-side on
	/// receipt of the server's broadcast that some other client left.
	ClientDisconnected { client_id: u16 },
	/// An application message passed the duplicate filter (or arrived unreliably)
	/// and is ready for dispatch. `from` is `None` on the client side (there is only
	/// ever one connection) and `Some(client_id)` on the server side.
	MessageReceived { from: Option<u16>, message_id: u16, payload: Vec<u8> },
}
