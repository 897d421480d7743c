//! A minimal "log at the point of failure, propagate a sentinel" error convention.
//!
//! Many internal helpers are expected to fail under ordinary operation (a duplicate
//! packet, a gap too large to track). For those, the fact worth keeping is *why*,
//! and that fact is only known at the call site that detected it — so the call site
//! logs and the caller only needs to know that something went wrong. `warn!`/`error!`
//! from the `log` crate evaluate to `()`, so `f().ok_or(|e| warn!("..."))` reads as
//! "log and discard" in one expression.

#[doc(hidden)]
pub trait Ext<T, E> {
	fn ok_or(self, f: impl FnOnce(E)) -> Option<T>;
}

impl<T, E> Ext<T, E> for core::result::Result<T, E> {
	fn ok_or(self, f: impl FnOnce(E)) -> Option<T> {
		match self {
			Ok(v) => Some(v),
			Err(e) => {
				f(e);
				None
			}
		}
	}
}

#[doc(hidden)]
pub trait ExtOpaque<T> {
	fn some_or(self, f: impl FnOnce()) -> Option<T>;
}

impl<T> ExtOpaque<T> for Option<T> {
	fn some_or(self, f: impl FnOnce()) -> Option<T> {
		if self.is_none() {
			f();
		}

		self
	}
}

/// The sentinel result type used by internal helpers: the log line already said why.
pub type Result<T = (), E = ()> = core::result::Result<T, E>;

pub use Ext as _;
