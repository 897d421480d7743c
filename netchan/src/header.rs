//! Message header taxonomy: the one-byte tag that begins every datagram.
//!
//! The discriminants are chosen so "does this tag carry a sequence ID" is a single
//! `>=` comparison against [`Header::RELIABLE_RANGE_START`], rather than a match arm
//! per variant.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Header {
	Unreliable = 0,
	Ack = 1,
	AckExtra = 2,
	Connect = 3,
	Reject = 4,
	Heartbeat = 5,
	Disconnect = 6,
	Reliable = 7,
	Welcome = 8,
	ClientConnected = 9,
	ClientDisconnected = 10,
}

impl Header {
	/// Tags at or above this value are reliable-ranged: they carry a 16-bit
	/// sequence ID in bytes 1..3.
	pub const RELIABLE_RANGE_START: u8 = Header::Reliable as u8;

	pub fn is_reliable(self) -> bool {
		(self as u8) >= Self::RELIABLE_RANGE_START
	}

	pub fn from_u8(tag: u8) -> Option<Header> {
		Some(match tag {
			0 => Header::Unreliable,
			1 => Header::Ack,
			2 => Header::AckExtra,
			3 => Header::Connect,
			4 => Header::Reject,
			5 => Header::Heartbeat,
			6 => Header::Disconnect,
			7 => Header::Reliable,
			8 => Header::Welcome,
			9 => Header::ClientConnected,
			10 => Header::ClientDisconnected,
			_ => return None,
		})
	}
}

impl fmt::Display for Header {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(self, f)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn reliable_range_matches_expected_tags() {
		let reliable = [Header::Reliable, Header::Welcome, Header::ClientConnected, Header::ClientDisconnected];
		let unreliable = [
			Header::Unreliable,
			Header::Ack,
			Header::AckExtra,
			Header::Connect,
			Header::Reject,
			Header::Heartbeat,
			Header::Disconnect,
		];
		for h in reliable {
			assert!(h.is_reliable(), "{h:?} should be reliable-ranged");
		}
		for h in unreliable {
			assert!(!h.is_reliable(), "{h:?} should not be reliable-ranged");
		}
	}

	#[test]
	fn from_u8_rejects_unknown_tags() {
		assert_eq!(Header::from_u8(11), None);
		assert_eq!(Header::from_u8(255), None);
	}

	#[test]
	fn from_u8_roundtrips_known_tags() {
		for tag in 0u8..=10 {
			let h = Header::from_u8(tag).unwrap();
			assert_eq!(h as u8, tag);
		}
	}
}
