//! Control message payloads. Each type is the payload that follows the header
//! (and, for reliable-ranged ones, the sequence ID) for its corresponding
//! [`crate::header::Header`] tag.

use collections::bytes::{ReadError, Reader, Writer};

use crate::seq::SeqId;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Connect {
	pub payload: Vec<u8>,
}

impl Connect {
	pub fn encode(&self, w: &mut Writer) {
		w.write_bytes(&self.payload);
	}

	pub fn decode(r: &mut Reader<'_>) -> Self {
		Self { payload: r.rest().to_vec() }
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reject {
	pub reason: u8,
	pub payload: Vec<u8>,
}

impl Reject {
	pub fn encode(&self, w: &mut Writer) {
		w.write(self.reason);
		w.write_bytes(&self.payload);
	}

	pub fn decode(r: &mut Reader<'_>) -> Result<Self, ReadError> {
		Ok(Self { reason: r.read::<u8>()?, payload: r.rest().to_vec() })
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Welcome {
	pub client_id: u16,
}

impl Welcome {
	pub fn encode(&self, w: &mut Writer) {
		w.write(self.client_id);
	}

	pub fn decode(r: &mut Reader<'_>) -> Result<Self, ReadError> {
		Ok(Self { client_id: r.read::<u16>()? })
	}
}

/// Client-to-server heartbeat: a ping ID to echo back, plus the client's current
/// RTT estimate (`-1` if unmeasured).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatPing {
	pub ping_id: u8,
	pub last_known_rtt: i16,
}

impl HeartbeatPing {
	pub fn encode(&self, w: &mut Writer) {
		w.write(self.ping_id);
		w.write(self.last_known_rtt);
	}

	pub fn decode(r: &mut Reader<'_>) -> Result<Self, ReadError> {
		Ok(Self { ping_id: r.read::<u8>()?, last_known_rtt: r.read::<i16>()? })
	}
}

/// Server-to-client heartbeat echo: just the ping ID being acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatPong {
	pub ping_id: u8,
}

impl HeartbeatPong {
	pub fn encode(&self, w: &mut Writer) {
		w.write(self.ping_id);
	}

	pub fn decode(r: &mut Reader<'_>) -> Result<Self, ReadError> {
		Ok(Self { ping_id: r.read::<u8>()? })
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Disconnect {
	pub reason: u8,
	pub message: Vec<u8>,
}

impl Disconnect {
	pub fn encode(&self, w: &mut Writer) {
		w.write(self.reason);
		w.write_bytes(&self.message);
	}

	pub fn decode(r: &mut Reader<'_>) -> Result<Self, ReadError> {
		Ok(Self { reason: r.read::<u8>()?, message: r.rest().to_vec() })
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
	pub last_recv: SeqId,
	pub ack_bits: u16,
}

impl Ack {
	pub fn encode(&self, w: &mut Writer) {
		w.write(self.last_recv.0);
		w.write(self.ack_bits);
	}

	pub fn decode(r: &mut Reader<'_>) -> Result<Self, ReadError> {
		Ok(Self { last_recv: SeqId(r.read::<u16>()?), ack_bits: r.read::<u16>()? })
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckExtra {
	pub last_recv: SeqId,
	pub ack_bits: u16,
	pub acked_seq: SeqId,
}

impl AckExtra {
	pub fn encode(&self, w: &mut Writer) {
		w.write(self.last_recv.0);
		w.write(self.ack_bits);
		w.write(self.acked_seq.0);
	}

	pub fn decode(r: &mut Reader<'_>) -> Result<Self, ReadError> {
		Ok(Self {
			last_recv: SeqId(r.read::<u16>()?),
			ack_bits: r.read::<u16>()?,
			acked_seq: SeqId(r.read::<u16>()?),
		})
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConnected {
	pub client_id: u16,
}

impl ClientConnected {
	pub fn encode(&self, w: &mut Writer) {
		w.write(self.client_id);
	}

	pub fn decode(r: &mut Reader<'_>) -> Result<Self, ReadError> {
		Ok(Self { client_id: r.read::<u16>()? })
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientDisconnected {
	pub client_id: u16,
}

impl ClientDisconnected {
	pub fn encode(&self, w: &mut Writer) {
		w.write(self.client_id);
	}

	pub fn decode(r: &mut Reader<'_>) -> Result<Self, ReadError> {
		Ok(Self { client_id: r.read::<u16>()? })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ack_vs_ack_extra_sizes() {
		let mut w = Writer::new();
		Ack { last_recv: SeqId(5), ack_bits: 0xFF00 }.encode(&mut w);
		assert_eq!(w.len(), 4);

		let mut w = Writer::new();
		AckExtra { last_recv: SeqId(5), ack_bits: 0xFF00, acked_seq: SeqId(3) }.encode(&mut w);
		assert_eq!(w.len(), 6);
	}

	#[test]
	fn heartbeat_ping_roundtrip() {
		let msg = HeartbeatPing { ping_id: 9, last_known_rtt: -1 };
		let mut w = Writer::new();
		msg.encode(&mut w);
		let buf = w.into_vec();
		let mut r = Reader::new(&buf);
		assert_eq!(HeartbeatPing::decode(&mut r).unwrap(), msg);
	}

	#[test]
	fn welcome_roundtrip() {
		let msg = Welcome { client_id: 7 };
		let mut w = Writer::new();
		msg.encode(&mut w);
		let buf = w.into_vec();
		let mut r = Reader::new(&buf);
		assert_eq!(Welcome::decode(&mut r).unwrap(), msg);
	}
}
