use std::time::{Duration, Instant, SystemTime};

/// The tick loop's notion of "now". A thin wrapper over [`Instant`] rather than a bare
/// `Instant::now()` call at every use site, so tests can substitute a fake clock and
/// drive retry/timeout behavior without sleeping.
#[derive(Clone, Copy)]
pub struct Clock {
	start: Instant,
	start_sys: SystemTime,
}

impl Clock {
	pub fn new() -> Self {
		Self { start: Instant::now(), start_sys: SystemTime::now() }
	}

	/// Monotonic time elapsed since the clock was created.
	pub fn now(&self) -> Duration {
		self.start.elapsed()
	}

	/// Wall-clock UNIX time, reconstructed from the monotonic clock plus the captured
	/// start-of-day `SystemTime` rather than calling `SystemTime::now()` on every tick.
	pub fn unix_now(&self) -> Duration {
		(self.start_sys + self.now())
			.duration_since(SystemTime::UNIX_EPOCH)
			.unwrap_or_default()
	}
}

impl Default for Clock {
	fn default() -> Self {
		Self::new()
	}
}

/// A clock whose `now()` is advanced explicitly, for deterministic tests of
/// retry/timeout behavior that would otherwise depend on wall-clock sleeps.
#[derive(Clone, Copy)]
pub struct FakeClock {
	now: Duration,
}

impl FakeClock {
	pub fn new() -> Self {
		Self { now: Duration::ZERO }
	}

	pub fn now(&self) -> Duration {
		self.now
	}

	pub fn advance(&mut self, by: Duration) {
		self.now += by;
	}
}

impl Default for FakeClock {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fake_clock_advances() {
		let mut c = FakeClock::new();
		assert_eq!(c.now(), Duration::ZERO);
		c.advance(Duration::from_millis(50));
		assert_eq!(c.now(), Duration::from_millis(50));
	}
}
