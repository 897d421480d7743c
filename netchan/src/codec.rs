//! Message codec: builds and parses the header/sequence-ID framing that every
//! other layer sits on top of.

use collections::bytes::Writer;

use crate::error::MalformedReason;
use crate::header::Header;
use crate::seq::SeqId;

/// Application messages carry a 16-bit ID right after the header/seq field.
pub fn write_message_id(w: &mut Writer, id: u16) {
	w.write(id);
}

/// Builds a single framed datagram: header tag, optional reserved sequence-ID slot,
/// then whatever the caller appends to [`Frame::writer_mut`].
pub struct Frame {
	writer: Writer,
	seq_offset: Option<usize>,
}

impl Frame {
	pub fn new(header: Header) -> Self {
		let mut writer = Writer::new();
		writer.write(header as u8);

		let seq_offset = if header.is_reliable() {
			let at = writer.len();
			writer.write(0u16);
			Some(at)
		} else {
			None
		};

		Self { writer, seq_offset }
	}

	/// Patches the reserved sequence-ID slot. No-op on an unreliable frame.
	pub fn set_seq(&mut self, seq: SeqId) -> &mut Self {
		if let Some(at) = self.seq_offset {
			self.writer.patch(at, seq.0);
		}
		self
	}

	pub fn writer_mut(&mut self) -> &mut Writer {
		&mut self.writer
	}

	pub fn finish(self) -> Vec<u8> {
		self.writer.into_vec()
	}
}

/// A parsed datagram: its header tag, sequence ID (if reliable-ranged), and the
/// payload bytes following the header/seq field.
pub struct Parsed<'a> {
	pub header: Header,
	pub seq: Option<SeqId>,
	pub payload: &'a [u8],
}

/// Parses the header and, if reliable-ranged, the sequence ID, off the front of a
/// raw datagram. Reliable datagrams shorter than 3 bytes and unknown header tags
/// are rejected.
pub fn parse(bytes: &[u8]) -> Result<Parsed<'_>, MalformedReason> {
	let &tag = bytes.first().ok_or(MalformedReason::TooShortForSeq(bytes.len()))?;
	let header = Header::from_u8(tag).ok_or(MalformedReason::UnknownTag(tag))?;

	if header.is_reliable() {
		if bytes.len() < 3 {
			return Err(MalformedReason::TooShortForSeq(bytes.len()));
		}

		let seq = SeqId(u16::from_le_bytes([bytes[1], bytes[2]]));
		Ok(Parsed { header, seq: Some(seq), payload: &bytes[3..] })
	} else {
		Ok(Parsed { header, seq: None, payload: &bytes[1..] })
	}
}

#[cfg(test)]
mod tests {
	use collections::bytes::Reader;

	use super::*;

	#[test]
	fn unreliable_frame_has_no_seq_slot() {
		let mut frame = Frame::new(Header::Heartbeat);
		frame.writer_mut().write(7u8);
		let bytes = frame.finish();

		let parsed = parse(&bytes).unwrap();
		assert_eq!(parsed.header, Header::Heartbeat);
		assert_eq!(parsed.seq, None);
		assert_eq!(parsed.payload, &[7u8]);
	}

	#[test]
	fn reliable_frame_roundtrips_patched_seq() {
		let mut frame = Frame::new(Header::Reliable);
		write_message_id(frame.writer_mut(), 42);
		frame.writer_mut().write_bytes(&[0xAA, 0xBB]);
		frame.set_seq(SeqId(1234));
		let bytes = frame.finish();

		let parsed = parse(&bytes).unwrap();
		assert_eq!(parsed.header, Header::Reliable);
		assert_eq!(parsed.seq, Some(SeqId(1234)));

		let mut r = Reader::new(parsed.payload);
		assert_eq!(r.read::<u16>().unwrap(), 42);
		assert_eq!(r.rest(), &[0xAA, 0xBB]);
	}

	#[test]
	fn unknown_tag_is_rejected() {
		let bytes = [200u8, 0, 0];
		assert_eq!(parse(&bytes), Err(MalformedReason::UnknownTag(200)));
	}

	#[test]
	fn short_reliable_datagram_is_rejected() {
		let bytes = [Header::Reliable as u8, 0];
		assert_eq!(parse(&bytes), Err(MalformedReason::TooShortForSeq(2)));
	}

	#[test]
	fn empty_datagram_is_rejected() {
		assert_eq!(parse(&[]), Err(MalformedReason::TooShortForSeq(0)));
	}
}
