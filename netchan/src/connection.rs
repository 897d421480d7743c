//! One `Connection` per remote peer. Owns the two bitfield windows and the
//! pending-message store, tracks RTT, drives the state machine, and emits/consumes
//! control messages.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use collections::bytes::Writer;
use collections::window::{BitWindow, WIDTH};
use log::{debug, info, trace, warn};

use crate::codec::{write_message_id, Frame};
use crate::config::Config;
use crate::control::{Ack, AckExtra, Connect, Disconnect, HeartbeatPing, HeartbeatPong, Reject, Welcome};
use crate::event::{ConnectionFailedReason, DisconnectReason, Event};
use crate::header::Header;
use crate::pending::PendingStore;
use crate::seq::SeqId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
	Connecting,
	Pending,
	Connected,
	NotConnected,
	Rejected,
}

impl State {
	/// Heartbeats/welcomes/acks are only sent on a connection in one of these
	/// states.
	pub fn is_live(self) -> bool {
		!matches!(self, State::NotConnected | State::Rejected)
	}
}

/// Which side of the handshake this `Connection` represents: the client's single
/// connection to a server, or the server's record of one connected client. Only
/// the connect/heartbeat handshake differs between the two; the reliability core
/// is identical either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
	ClientSide,
	ServerSide,
}

pub struct Connection {
	pub addr: SocketAddr,
	pub id: u16,
	pub state: State,
	role: Role,

	next_outgoing_seq: SeqId,
	last_received_seq: SeqId,
	received_window: BitWindow,
	last_acked_seq: SeqId,
	acked_window: BitWindow,
	pending: PendingStore,

	rtt: Option<Duration>,
	smooth_rtt: Option<Duration>,

	last_activity_at: Duration,
	connecting_since: Duration,
	last_heartbeat_sent_at: Duration,
	next_ping_id: u8,
	pending_ping_id: Option<u8>,
	pending_ping_start: Duration,

	can_timeout: bool,

	outbox: VecDeque<Vec<u8>>,
}

impl Connection {
	fn new(addr: SocketAddr, id: u16, role: Role, state: State, now: Duration) -> Self {
		Self {
			addr,
			id,
			state,
			role,
			// Seq 0 is reserved as the "nothing received yet" sentinel that
			// `last_received_seq`/`last_acked_seq` start at, so the first reliable
			// send on a fresh connection must be 1, not 0 — otherwise it reads back
			// as gap(0, 0) == 0 on the receiving end and is discarded as a duplicate.
			next_outgoing_seq: SeqId(1),
			last_received_seq: SeqId::ZERO,
			received_window: BitWindow::empty(),
			last_acked_seq: SeqId::ZERO,
			acked_window: BitWindow::empty(),
			pending: PendingStore::with_capacity(WIDTH as usize),
			rtt: None,
			smooth_rtt: None,
			last_activity_at: now,
			connecting_since: now,
			last_heartbeat_sent_at: now,
			next_ping_id: 0,
			pending_ping_id: None,
			pending_ping_start: now,
			can_timeout: true,
			outbox: VecDeque::new(),
		}
	}

	/// A fresh client-side connection, immediately sending its first `Connect`.
	pub fn connect(addr: SocketAddr, payload: Vec<u8>, now: Duration) -> Self {
		let mut conn = Self::new(addr, 0, Role::ClientSide, State::Connecting, now);
		conn.send_connect(payload);
		conn
	}

	/// A server-side connection created on receipt of `Connect` from a new address.
	/// Always starts `Pending` — the server isn't `Connected` until the client's
	/// `Welcome` echo arrives. `auto_accept` decides whether `Welcome` is sent
	/// immediately or held for an explicit [`Connection::accept`] call.
	pub fn accept_incoming(addr: SocketAddr, id: u16, auto_accept: bool, max_attempts: u32, now: Duration) -> Self {
		let mut conn = Self::new(addr, id, Role::ServerSide, State::Pending, now);
		if auto_accept {
			conn.accept(max_attempts, now);
		}
		conn
	}

	/// Sends `Welcome(id)` reliably, for a `Pending` server-side connection the
	/// embedder has decided to accept after inspecting the `Connect` payload.
	pub fn accept(&mut self, max_attempts: u32, now: Duration) {
		if self.state != State::Pending {
			return;
		}
		self.send_welcome(max_attempts, now);
	}

	pub fn drain_outbox(&mut self) -> impl Iterator<Item = Vec<u8>> + '_ {
		self.outbox.drain(..)
	}

	pub fn pending_len(&self) -> usize {
		self.pending.len()
	}

	pub fn rtt(&self) -> Option<Duration> {
		self.rtt
	}

	fn queue_unreliable(&mut self, header: Header, fill: impl FnOnce(&mut Writer)) {
		let mut frame = Frame::new(header);
		fill(frame.writer_mut());
		self.outbox.push_back(frame.finish());
	}

	fn queue_reliable(&mut self, header: Header, max_attempts: u32, now: Duration, fill: impl FnOnce(&mut Writer)) -> SeqId {
		let seq = self.next_outgoing_seq.next();
		let mut frame = Frame::new(header);
		fill(frame.writer_mut());
		frame.set_seq(seq);
		let bytes = frame.finish();
		self.outbox.push_back(bytes.clone());
		self.pending.insert(seq, bytes, max_attempts, now);
		seq
	}

	fn send_connect(&mut self, payload: Vec<u8>) {
		self.queue_unreliable(Header::Connect, move |w| Connect { payload }.encode(w));
	}

	// ---- Application sends ----------------------------------------------------

	pub fn send_unreliable(&mut self, message_id: u16, payload: &[u8]) {
		let payload = payload.to_vec();
		self.queue_unreliable(Header::Unreliable, move |w| {
			write_message_id(w, message_id);
			w.write_bytes(&payload);
		});
	}

	pub fn send_reliable(&mut self, message_id: u16, payload: &[u8], max_attempts: u32, now: Duration) -> SeqId {
		let payload = payload.to_vec();
		self.queue_reliable(Header::Reliable, max_attempts, now, move |w| {
			write_message_id(w, message_id);
			w.write_bytes(&payload);
		})
	}

	fn send_welcome(&mut self, max_attempts: u32, now: Duration) -> SeqId {
		let id = self.id;
		self.queue_reliable(Header::Welcome, max_attempts, now, move |w| Welcome { client_id: id }.encode(w))
	}

	pub fn send_client_connected(&mut self, client_id: u16, max_attempts: u32, now: Duration) -> SeqId {
		self.queue_reliable(Header::ClientConnected, max_attempts, now, move |w| {
			crate::control::ClientConnected { client_id }.encode(w)
		})
	}

	pub fn send_client_disconnected(&mut self, client_id: u16, max_attempts: u32, now: Duration) -> SeqId {
		self.queue_reliable(Header::ClientDisconnected, max_attempts, now, move |w| {
			crate::control::ClientDisconnected { client_id }.encode(w)
		})
	}

	pub fn reject(&mut self, reason: u8, payload: Vec<u8>) {
		self.queue_unreliable(Header::Reject, move |w| Reject { reason, payload }.encode(w));
		self.state = State::Rejected;
	}

	/// Best-effort disconnect burst: no ack-tracked retry, since the peer may never
	/// respond once it's gone, so it's sent a handful of times unreliably rather
	/// than queued into the pending store.
	pub fn send_disconnect(&mut self, reason: u8, message: Vec<u8>, repeats: u32) {
		for _ in 0..repeats.max(1) {
			self.queue_unreliable(Header::Disconnect, {
				let reason = reason;
				let message = message.clone();
				move |w| Disconnect { reason, message }.encode(w)
			});
		}
	}

	/// Tears down the connection. `Disconnected` is a client-side-only event; the
	/// server-side counterpart is raised by [`crate::peer::Server`] itself as
	/// `Event::ClientDisconnected`, since only it knows the full client table to
	/// broadcast the departure to the others.
	pub fn close(&mut self, reason: DisconnectReason, events: &mut Vec<Event>) {
		if self.state == State::NotConnected {
			return;
		}

		self.pending.clear();
		self.state = State::NotConnected;

		if self.role == Role::ClientSide {
			events.push(Event::Disconnected { addr: self.addr, client_id: if self.id != 0 { Some(self.id) } else { None }, reason });
		}
	}

	/// A client-side connect attempt that never reached `Connected` within the
	/// connect timeout: distinct from [`Connection::close`] because no connection
	/// ever existed to "disconnect" from — the embedder gets `ConnectionFailed`,
	/// not `Disconnected`.
	pub fn fail_connect_attempt(&mut self, reason: ConnectionFailedReason, events: &mut Vec<Event>) {
		if self.state == State::NotConnected {
			return;
		}

		self.pending.clear();
		self.state = State::NotConnected;
		events.push(Event::ConnectionFailed { addr: self.addr, reason });
	}

	// ---- Inbound reliable pipeline ----------------------------------------------

	/// Runs the generic duplicate-filter/ack pipeline for a reliable-ranged inbound
	/// message and returns whether the caller should actually act on it (`doHandle`).
	fn inbound_reliable(&mut self, seq: SeqId, now: Duration) -> bool {
		let g = seq.gap(self.last_received_seq);
		let do_handle;

		if g > 0 {
			self.received_window.shift_by(g as u32);
			self.last_received_seq = seq;
			do_handle = !self.received_window.is_set(0);
			self.received_window.set(0);
		} else if g < 0 {
			let k = (-g) as u32;
			if k < WIDTH {
				do_handle = !self.received_window.is_set(k);
				self.received_window.set(k);
			} else {
				trace!(target: "netchan::connection", "{}: gap {k} exceeds window, treating as duplicate", self.addr);
				do_handle = false;
			}
		} else {
			do_handle = false;
		}

		self.emit_ack(seq);
		do_handle
	}

	fn emit_ack(&mut self, seq: SeqId) {
		let ack_bits = self.received_window.first16();
		let last_recv = self.last_received_seq;

		if seq == last_recv {
			self.queue_unreliable(Header::Ack, move |w| Ack { last_recv, ack_bits }.encode(w));
		} else {
			self.queue_unreliable(Header::AckExtra, move |w| AckExtra { last_recv, ack_bits, acked_seq: seq }.encode(w));
		}
	}

	// ---- Ack reception ------------------------------------------------------

	fn on_ack(&mut self, remote_last_recv: SeqId, remote_bits: u16, now: Duration) {
		let g = remote_last_recv.gap(self.last_acked_seq);

		if g > 0 {
			let shift = g as u32;

			if shift < WIDTH {
				for off in (WIDTH - shift)..WIDTH {
					let stale_seq = self.last_acked_seq.wrapping_sub(off as u16);
					if !self.acked_window.is_set(off) {
						if let Some(msg) = self.pending.get_mut(stale_seq) {
							debug!(target: "netchan::connection", "{}: seq {stale_seq} falling out of ack window unacked, retransmitting", self.addr);
							self.outbox.push_back(msg.bytes.clone());
							msg.attempts_so_far += 1;
							msg.last_send_at = now;
						}
					} else {
						self.pending.remove(stale_seq);
					}
				}
			}

			self.acked_window.shift_by(shift);
			self.acked_window.combine16(remote_bits);
			self.acked_window.set(0);
			self.pending.remove(remote_last_recv);
			self.last_acked_seq = remote_last_recv;
		} else if g < 0 {
			let k = (-g) as u32;
			if k < WIDTH {
				self.acked_window.set(k);
			}
			self.pending.remove(remote_last_recv);
		} else {
			self.acked_window.combine16(remote_bits);
		}
	}

	// ---- Dispatch ---------------------------------------------------------------

	/// Processes one inbound datagram already parsed by [`crate::codec::parse`].
	/// `message_for` is invoked with `(message_id, payload)` when an application
	/// message (reliable or unreliable) passes the duplicate filter.
	pub fn on_datagram(
		&mut self,
		header: Header,
		seq: Option<SeqId>,
		payload: &[u8],
		now: Duration,
		events: &mut Vec<Event>,
	) -> Option<(u16, Vec<u8>)> {
		if self.state == State::NotConnected || self.state == State::Rejected {
			// A fresh Connect from a stale address is handled by the peer layer
			// (which replaces this Connection entirely); anything else arriving on a
			// dead connection is ignored.
			return None;
		}

		self.last_activity_at = now;

		match header {
			Header::Connect => {
				// Only meaningful to a server-side connection re-receiving a Connect
				// it already has a record for; nothing to do beyond the activity bump
				// above (the duplicate send is harmless).
				None
			}
			Header::Reject => {
				if self.role == Role::ClientSide && self.state == State::Connecting {
					self.state = State::Rejected;
					events.push(Event::ConnectionFailed {
						addr: self.addr,
						reason: ConnectionFailedReason::Rejected { reason_code: payload.first().copied().unwrap_or(0), payload: payload.get(1..).unwrap_or(&[]).to_vec() },
					});
				}
				None
			}
			Header::Welcome => {
				let seq = seq.expect("Welcome is reliable-ranged");
				let do_handle = self.inbound_reliable(seq, now);

				if do_handle && self.role == Role::ClientSide && self.state == State::Connecting {
					if let Ok(welcome) = Welcome::decode(&mut collections::bytes::Reader::new(payload)) {
						self.id = welcome.client_id;
						self.state = State::Connected;
						info!(target: "netchan::connection", "{}: connected, assigned id {}", self.addr, self.id);
						self.send_welcome(15, now);
						events.push(Event::Connected { addr: self.addr });
					}
				} else if do_handle && self.role == Role::ServerSide && self.state == State::Pending {
					self.state = State::Connected;
					info!(target: "netchan::connection", "{}: client {} fully connected", self.addr, self.id);
					events.push(Event::ClientConnected { client_id: self.id });
				}

				None
			}
			Header::Heartbeat => {
				self.on_heartbeat(payload, now);
				None
			}
			Header::Disconnect => {
				self.close(DisconnectReason::RemoteRequested, events);
				None
			}
			Header::Ack => {
				if let Ok(ack) = Ack::decode(&mut collections::bytes::Reader::new(payload)) {
					self.on_ack(ack.last_recv, ack.ack_bits, now);
				}
				None
			}
			Header::AckExtra => {
				if let Ok(ack) = AckExtra::decode(&mut collections::bytes::Reader::new(payload)) {
					self.on_ack(ack.last_recv, ack.ack_bits, now);
					self.pending.remove(ack.acked_seq);
				}
				None
			}
			Header::Unreliable => {
				let mut r = collections::bytes::Reader::new(payload);
				let message_id = r.read::<u16>().ok()?;
				Some((message_id, r.rest().to_vec()))
			}
			Header::Reliable => {
				let seq = seq.expect("Reliable is reliable-ranged");
				let do_handle = self.inbound_reliable(seq, now);
				if !do_handle {
					return None;
				}
				let mut r = collections::bytes::Reader::new(payload);
				let message_id = r.read::<u16>().ok()?;
				Some((message_id, r.rest().to_vec()))
			}
			Header::ClientConnected => {
				// The server broadcasts this to every *other* connected client so their
				// application can update its own roster; a server-side Connection
				// never receives its own broadcast.
				let seq = seq.expect("reliable-ranged");
				let do_handle = self.inbound_reliable(seq, now);
				if do_handle {
					if let Ok(msg) = crate::control::ClientConnected::decode(&mut collections::bytes::Reader::new(payload)) {
						events.push(Event::ClientConnected { client_id: msg.client_id });
					}
				}
				None
			}
			Header::ClientDisconnected => {
				let seq = seq.expect("reliable-ranged");
				let do_handle = self.inbound_reliable(seq, now);
				if do_handle {
					if let Ok(msg) = crate::control::ClientDisconnected::decode(&mut collections::bytes::Reader::new(payload)) {
						events.push(Event::ClientDisconnected { client_id: msg.client_id });
					}
				}
				None
			}
		}
	}

	fn on_heartbeat(&mut self, payload: &[u8], now: Duration) {
		match self.role {
			Role::ServerSide => {
				if let Ok(ping) = HeartbeatPing::decode(&mut collections::bytes::Reader::new(payload)) {
					self.queue_unreliable(Header::Heartbeat, move |w| HeartbeatPong { ping_id: ping.ping_id }.encode(w));
				}
			}
			Role::ClientSide => {
				if let Ok(pong) = HeartbeatPong::decode(&mut collections::bytes::Reader::new(payload)) {
					if self.pending_ping_id == Some(pong.ping_id) {
						let elapsed = now.saturating_sub(self.pending_ping_start);
						let rtt = elapsed.max(Duration::from_millis(1));
						self.smooth_rtt = Some(match self.smooth_rtt {
							None => rtt,
							Some(prev) => {
								let smoothed = prev.mul_f64(0.7) + rtt.mul_f64(0.3);
								smoothed.max(Duration::from_millis(1))
							}
						});
						self.rtt = Some(rtt);
						self.pending_ping_id = None;
					}
				}
			}
		}
	}

	// ---- Tick-driven polling --------------------------------------------------

	/// Client-side only: sends a heartbeat ping if `heartbeat_interval` has elapsed.
	pub fn poll_heartbeat(&mut self, now: Duration, heartbeat_interval: Duration) {
		if self.role != Role::ClientSide || !self.state.is_live() {
			return;
		}

		if now.saturating_sub(self.last_heartbeat_sent_at) < heartbeat_interval {
			return;
		}

		self.last_heartbeat_sent_at = now;
		let ping_id = self.next_ping_id;
		self.next_ping_id = self.next_ping_id.wrapping_add(1);
		self.pending_ping_id = Some(ping_id);
		self.pending_ping_start = now;

		let last_known_rtt = self.rtt.map(|d| d.as_millis().min(i16::MAX as u128) as i16).unwrap_or(-1);
		self.queue_unreliable(Header::Heartbeat, move |w| HeartbeatPing { ping_id, last_known_rtt }.encode(w));
	}

	/// Client-side only, while `Connecting`: resends `Connect` on the heartbeat
	/// cadence until a `Welcome`/`Reject` arrives or the connect attempt times out.
	pub fn poll_connect_resend(&mut self, now: Duration, heartbeat_interval: Duration, payload: &[u8]) {
		if self.role != Role::ClientSide || self.state != State::Connecting {
			return;
		}

		if now.saturating_sub(self.last_heartbeat_sent_at) < heartbeat_interval {
			return;
		}

		self.last_heartbeat_sent_at = now;
		self.send_connect(payload.to_vec());
	}

	/// Checks retry timers on every still-pending reliable send and resends or
	/// clears as appropriate.
	pub fn poll_retries(&mut self, now: Duration, cfg: &Config) {
		let interval = cfg.retry_interval(self.smooth_rtt);
		let suppression = cfg.retry_suppression_window(self.smooth_rtt);

		let mut exhausted = Vec::new();

		for msg in self.pending.iter_mut() {
			let due_at = msg.last_send_at + interval;
			if now < due_at {
				continue;
			}

			if now.saturating_sub(msg.last_send_at) < suppression {
				msg.last_send_at = now;
				continue;
			}

			msg.attempts_so_far += 1;
			msg.last_send_at = now;
			self.outbox.push_back(msg.bytes.clone());

			if msg.is_exhausted() {
				exhausted.push(msg.seq);
			}
		}

		if !exhausted.is_empty() {
			warn!(target: "netchan::connection", "{}: {} reliable send(s) exhausted retries", self.addr, exhausted.len());
			for seq in exhausted {
				self.pending.remove(seq);
			}
		}
	}

	pub fn has_timed_out(&self, now: Duration, timeout_time: Duration) -> bool {
		self.can_timeout && self.state.is_live() && self.state != State::Connecting && now.saturating_sub(self.last_activity_at) > timeout_time
	}

	pub fn has_connect_attempt_timed_out(&self, now: Duration, connect_timeout_time: Duration) -> bool {
		self.state == State::Connecting && now.saturating_sub(self.connecting_since) > connect_timeout_time
	}
}

#[cfg(test)]
mod tests {
	use std::net::SocketAddr;

	use super::*;

	fn addr() -> SocketAddr {
		"127.0.0.1:9000".parse().unwrap()
	}

	#[test]
	fn connect_starts_in_connecting_state_with_queued_connect() {
		let mut conn = Connection::connect(addr(), vec![], Duration::ZERO);
		assert_eq!(conn.state, State::Connecting);
		let frames: Vec<_> = conn.drain_outbox().collect();
		assert_eq!(frames.len(), 1);
		assert_eq!(frames[0][0], Header::Connect as u8);
	}

	#[test]
	fn client_transitions_to_connected_on_welcome() {
		let mut conn = Connection::connect(addr(), vec![], Duration::ZERO);
		conn.drain_outbox().for_each(drop);

		let mut frame = Frame::new(Header::Welcome);
		Welcome { client_id: 7 }.encode(frame.writer_mut());
		frame.set_seq(SeqId(1));
		let bytes = frame.finish();

		let parsed = crate::codec::parse(&bytes).unwrap();
		let mut events = Vec::new();
		conn.on_datagram(parsed.header, parsed.seq, parsed.payload, Duration::from_millis(10), &mut events);

		assert_eq!(conn.state, State::Connected);
		assert_eq!(conn.id, 7);
		assert!(events.iter().any(|e| matches!(e, Event::Connected { .. })));
	}

	#[test]
	fn duplicate_reliable_message_is_not_redelivered() {
		let mut conn = Connection::new(addr(), 1, Role::ServerSide, State::Connected, Duration::ZERO);

		let mut frame = Frame::new(Header::Reliable);
		write_message_id(frame.writer_mut(), 42);
		frame.writer_mut().write_bytes(&[0xAA, 0xBB]);
		frame.set_seq(SeqId(1));
		let bytes = frame.finish();
		let parsed = crate::codec::parse(&bytes).unwrap();

		let mut events = Vec::new();
		let first = conn.on_datagram(parsed.header, parsed.seq, parsed.payload, Duration::ZERO, &mut events);
		assert_eq!(first, Some((42, vec![0xAA, 0xBB])));

		let second = conn.on_datagram(parsed.header, parsed.seq, parsed.payload, Duration::from_millis(5), &mut events);
		assert_eq!(second, None);

		// Still acked both times.
		assert_eq!(conn.drain_outbox().count(), 2);
	}

	#[test]
	fn out_of_order_reliable_uses_ack_extra() {
		let mut conn = Connection::new(addr(), 1, Role::ServerSide, State::Connected, Duration::ZERO);

		for seq in [5u16, 6, 7] {
			let mut frame = Frame::new(Header::Reliable);
			write_message_id(frame.writer_mut(), 1);
			frame.set_seq(SeqId(seq));
			let bytes = frame.finish();
			let parsed = crate::codec::parse(&bytes).unwrap();
			let mut events = Vec::new();
			conn.on_datagram(parsed.header, parsed.seq, parsed.payload, Duration::ZERO, &mut events);
		}

		assert_eq!(conn.last_received_seq, SeqId(7));
		assert!(conn.received_window.is_set(0));
		assert!(conn.received_window.is_set(1));
		assert!(conn.received_window.is_set(2));
	}

	#[test]
	fn retry_fires_after_interval_and_respects_max_attempts() {
		let mut conn = Connection::new(addr(), 1, Role::ClientSide, State::Connected, Duration::ZERO);
		conn.send_reliable(1, &[1, 2, 3], 2, Duration::ZERO);
		conn.drain_outbox().for_each(drop);

		let cfg = Config::default();
		// Before the retry interval elapses, nothing resends.
		conn.poll_retries(Duration::from_millis(5), &cfg);
		assert_eq!(conn.drain_outbox().count(), 0);

		// After it elapses, one retransmit (attempt 2 of 2).
		conn.poll_retries(Duration::from_millis(60), &cfg);
		assert_eq!(conn.drain_outbox().count(), 1);

		// A further retry at/after max attempts does not resend again.
		conn.poll_retries(Duration::from_millis(120), &cfg);
		assert_eq!(conn.drain_outbox().count(), 0);
	}

	#[test]
	fn heartbeat_timeout_detected_after_timeout_time() {
		let conn = Connection::new(addr(), 1, Role::ServerSide, State::Connected, Duration::ZERO);
		assert!(!conn.has_timed_out(Duration::from_millis(4000), Duration::from_millis(5000)));
		assert!(conn.has_timed_out(Duration::from_millis(6000), Duration::from_millis(5000)));
	}
}
