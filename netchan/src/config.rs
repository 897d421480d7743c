//! Every numeric knob for the reliability layer, gathered into one `Default`-able
//! value with builder-style setters.

use std::time::Duration;

use runtime::IpMode;

#[derive(Debug, Clone)]
pub struct Config {
	/// An established connection with no inbound traffic for this long times out.
	pub timeout_time: Duration,
	/// A `Connecting` attempt with no `Welcome` this long times out, independent
	/// of `timeout_time`.
	pub connect_timeout_time: Duration,
	/// How often a heartbeat ping is sent.
	pub heartbeat_interval: Duration,
	/// Retry interval multiplier applied to `smoothRtt`.
	pub retry_backoff_multiplier: f64,
	/// Retry interval floor when `smoothRtt` is uninitialized.
	pub retry_floor_unmeasured: Duration,
	/// Retry interval floor once `smoothRtt` is known.
	pub retry_floor_measured: Duration,
	/// Redundant-retry suppression window, as a fraction of `smoothRtt`.
	pub retry_suppression_fraction: f64,
	/// Default max send attempts for a reliable message, if not overridden
	/// per-message.
	pub max_send_attempts: u32,
	/// Socket send/receive buffer size (floored at 256 KiB by the socket
	/// wrapper regardless of what's configured here).
	pub socket_buffer_size: usize,
	/// Transport IP mode.
	pub ip_mode: IpMode,
}

impl Config {
	pub fn with_timeout_time(mut self, v: Duration) -> Self {
		self.timeout_time = v;
		self
	}

	pub fn with_connect_timeout_time(mut self, v: Duration) -> Self {
		self.connect_timeout_time = v;
		self
	}

	pub fn with_heartbeat_interval(mut self, v: Duration) -> Self {
		self.heartbeat_interval = v;
		self
	}

	pub fn with_max_send_attempts(mut self, v: u32) -> Self {
		self.max_send_attempts = v;
		self
	}

	pub fn with_socket_buffer_size(mut self, v: usize) -> Self {
		self.socket_buffer_size = v;
		self
	}

	pub fn with_ip_mode(mut self, v: IpMode) -> Self {
		self.ip_mode = v;
		self
	}

	/// `max(floor, smoothRtt * multiplier)`, `smoothRtt = None` meaning unmeasured.
	pub fn retry_interval(&self, smooth_rtt: Option<Duration>) -> Duration {
		match smooth_rtt {
			None => self.retry_floor_unmeasured,
			Some(rtt) => {
				let scaled = rtt.mul_f64(self.retry_backoff_multiplier);
				scaled.max(self.retry_floor_measured)
			}
		}
	}

	/// A retry fired within `smoothRtt * fraction` of the last send is considered
	/// redundant and should just rearm instead of resending.
	pub fn retry_suppression_window(&self, smooth_rtt: Option<Duration>) -> Duration {
		smooth_rtt.map(|rtt| rtt.mul_f64(self.retry_suppression_fraction)).unwrap_or_default()
	}
}

impl Default for Config {
	fn default() -> Self {
		Self {
			timeout_time: Duration::from_millis(5000),
			connect_timeout_time: Duration::from_millis(5000),
			heartbeat_interval: Duration::from_millis(1000),
			retry_backoff_multiplier: 1.2,
			retry_floor_unmeasured: Duration::from_millis(50),
			retry_floor_measured: Duration::from_millis(10),
			retry_suppression_fraction: 0.5,
			max_send_attempts: 15,
			socket_buffer_size: runtime::DEFAULT_BUFFER_SIZE,
			ip_mode: IpMode::V4,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn retry_interval_uses_floor_when_unmeasured() {
		let cfg = Config::default();
		assert_eq!(cfg.retry_interval(None), Duration::from_millis(50));
	}

	#[test]
	fn retry_interval_scales_with_smooth_rtt() {
		let cfg = Config::default();
		assert_eq!(cfg.retry_interval(Some(Duration::from_millis(100))), Duration::from_millis(120));
	}

	#[test]
	fn retry_interval_respects_measured_floor() {
		let cfg = Config::default();
		assert_eq!(cfg.retry_interval(Some(Duration::from_millis(1))), Duration::from_millis(10));
	}

	#[test]
	fn builder_overrides_fields() {
		let cfg = Config::default().with_max_send_attempts(3).with_heartbeat_interval(Duration::from_millis(250));
		assert_eq!(cfg.max_send_attempts, 3);
		assert_eq!(cfg.heartbeat_interval, Duration::from_millis(250));
	}
}
