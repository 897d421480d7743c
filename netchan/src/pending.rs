//! Pending-message store: one outbound reliable message per in-flight sequence
//! ID, retried on a timer until acked or exhausted.

use std::time::Duration;

use collections::ring::Ring;

use crate::seq::SeqId;

/// A framed, fully-built datagram (header + seq + payload) awaiting acknowledgement.
pub struct PendingMessage {
	pub seq: SeqId,
	pub bytes: Vec<u8>,
	pub max_attempts: u32,
	pub attempts_so_far: u32,
	pub last_send_at: Duration,
}

impl PendingMessage {
	pub fn is_exhausted(&self) -> bool {
		self.attempts_so_far >= self.max_attempts
	}
}

/// Ring-indexed by sequence ID mod capacity: once a sequence ID falls far enough
/// behind the next outgoing sequence that it aliases a newer entry's slot, it has
/// necessarily already been acked or retried to exhaustion, so no pending entry
/// outlives the tracked window.
pub struct PendingStore {
	ring: Ring<PendingMessage>,
}

impl PendingStore {
	pub fn with_capacity(capacity: usize) -> Self {
		Self { ring: Ring::with_capacity(capacity) }
	}

	pub fn insert(&mut self, seq: SeqId, bytes: Vec<u8>, max_attempts: u32, now: Duration) {
		self.ring.insert(u64::from(seq.0), PendingMessage { seq, bytes, max_attempts, attempts_so_far: 1, last_send_at: now });
	}

	pub fn get_mut(&mut self, seq: SeqId) -> Option<&mut PendingMessage> {
		self.ring.get_mut(u64::from(seq.0))
	}

	pub fn remove(&mut self, seq: SeqId) -> Option<PendingMessage> {
		self.ring.remove(u64::from(seq.0))
	}

	pub fn contains(&self, seq: SeqId) -> bool {
		self.ring.contains(u64::from(seq.0))
	}

	pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PendingMessage> {
		self.ring.iter_mut()
	}

	pub fn clear(&mut self) {
		self.ring.clear()
	}

	pub fn len(&self) -> usize {
		self.ring.len()
	}

	pub fn is_empty(&self) -> bool {
		self.ring.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn insert_and_remove() {
		let mut store = PendingStore::with_capacity(128);
		store.insert(SeqId(1), vec![1, 2, 3], 15, Duration::ZERO);
		assert!(store.contains(SeqId(1)));
		let msg = store.remove(SeqId(1)).unwrap();
		assert_eq!(msg.bytes, vec![1, 2, 3]);
		assert!(!store.contains(SeqId(1)));
	}

	#[test]
	fn exhaustion_is_attempt_count_reaching_max() {
		let mut store = PendingStore::with_capacity(128);
		store.insert(SeqId(42), vec![], 3, Duration::ZERO);
		let msg = store.get_mut(SeqId(42)).unwrap();
		assert!(!msg.is_exhausted());
		msg.attempts_so_far = 3;
		assert!(msg.is_exhausted());
	}
}
