//! The server's peer table: a slab of `Connection`s addressed by client ID, with a
//! hashed index from the remote socket address to that ID for inbound demultiplexing.
//!
//! A connection table tops out in the hundreds even for a busy server, so a
//! `slab::Slab` plus an `ahash`-hashed `SocketAddr -> usize` index covers it
//! without reaching for a capacity-tiered open-addressing table.

use std::net::SocketAddr;

use ahash::AHashMap;
use slab::Slab;

/// A table of `T` (one per connected peer) addressable both by a stable integer key
/// and by the peer's socket address.
pub struct PeerTable<T> {
	slab: Slab<T>,
	by_addr: AHashMap<SocketAddr, usize>,
}

impl<T> Default for PeerTable<T> {
	fn default() -> Self {
		Self { slab: Slab::new(), by_addr: AHashMap::default() }
	}
}

impl<T> PeerTable<T> {
	pub fn insert(&mut self, addr: SocketAddr, value: T) -> usize {
		let key = self.slab.insert(value);
		self.by_addr.insert(addr, key);
		key
	}

	pub fn get(&self, key: usize) -> Option<&T> {
		self.slab.get(key)
	}

	pub fn get_mut(&mut self, key: usize) -> Option<&mut T> {
		self.slab.get_mut(key)
	}

	pub fn find_by_addr(&self, addr: &SocketAddr) -> Option<usize> {
		self.by_addr.get(addr).copied()
	}

	pub fn get_by_addr_mut(&mut self, addr: &SocketAddr) -> Option<&mut T> {
		let key = *self.by_addr.get(addr)?;
		self.slab.get_mut(key)
	}

	pub fn remove(&mut self, key: usize) -> Option<T> {
		if !self.slab.contains(key) {
			return None;
		}

		self.by_addr.retain(|_, v| *v != key);
		Some(self.slab.remove(key))
	}

	pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
		self.slab.iter()
	}

	pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut T)> {
		self.slab.iter_mut()
	}

	pub fn len(&self) -> usize {
		self.slab.len()
	}

	pub fn is_empty(&self) -> bool {
		self.slab.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn insert_find_remove() {
		let mut t: PeerTable<&str> = PeerTable::default();
		let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();

		let key = t.insert(addr, "conn");
		assert_eq!(t.find_by_addr(&addr), Some(key));
		assert_eq!(t.get(key), Some(&"conn"));

		assert_eq!(t.remove(key), Some("conn"));
		assert_eq!(t.find_by_addr(&addr), None);
		assert_eq!(t.get(key), None);
	}
}
