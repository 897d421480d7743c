//! Little-endian scalar <-> byte conversions, shared by the codec and control-message
//! encoders. The wire is little-endian regardless of host byte order, so every
//! multi-byte field on the wire goes through here rather than through host-native casts.

/// A scalar type with a fixed-width little-endian wire representation.
pub trait WireScalar: Sized + Copy {
	const SIZE: usize;

	fn to_le(self, out: &mut [u8]);
	fn from_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_wire_int {
	($( $ty:ty ),+ $(,)?) => {
		$(
			impl WireScalar for $ty {
				const SIZE: usize = core::mem::size_of::<$ty>();

				#[inline]
				fn to_le(self, out: &mut [u8]) {
					out.copy_from_slice(&self.to_le_bytes());
				}

				#[inline]
				fn from_le(bytes: &[u8]) -> Self {
					let mut buf = [0u8; core::mem::size_of::<$ty>()];
					buf.copy_from_slice(bytes);
					Self::from_le_bytes(buf)
				}
			}
		)+
	};
}

impl_wire_int!(u8, i8, u16, i16, u32, i32, u64, i64);

impl WireScalar for f32 {
	const SIZE: usize = 4;

	#[inline]
	fn to_le(self, out: &mut [u8]) {
		out.copy_from_slice(&self.to_le_bytes());
	}

	#[inline]
	fn from_le(bytes: &[u8]) -> Self {
		let mut buf = [0u8; 4];
		buf.copy_from_slice(bytes);
		f32::from_le_bytes(buf)
	}
}

impl WireScalar for f64 {
	const SIZE: usize = 8;

	#[inline]
	fn to_le(self, out: &mut [u8]) {
		out.copy_from_slice(&self.to_le_bytes());
	}

	#[inline]
	fn from_le(bytes: &[u8]) -> Self {
		let mut buf = [0u8; 8];
		buf.copy_from_slice(bytes);
		f64::from_le_bytes(buf)
	}
}

/// Zig-zag encode a signed integer so small-magnitude values map to small unsigned ones.
#[inline]
pub fn zigzag_encode(v: i64) -> u64 {
	((v << 1) ^ (v >> 63)) as u64
}

/// Inverse of [`zigzag_encode`].
#[inline]
pub fn zigzag_decode(v: u64) -> i64 {
	((v >> 1) as i64) ^ -((v & 1) as i64)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn le_roundtrip() {
		let mut buf = [0u8; 8];
		42u64.to_le(&mut buf);
		assert_eq!(u64::from_le(&buf), 42);

		let mut buf = [0u8; 4];
		(-17i32).to_le(&mut buf);
		assert_eq!(i32::from_le(&buf), -17);
	}

	#[test]
	fn zigzag_roundtrip() {
		for v in [0i64, 1, -1, 2, -2, i64::MAX, i64::MIN, 12345, -98765] {
			assert_eq!(zigzag_decode(zigzag_encode(v)), v);
		}
	}
}
