use std::time::SystemTime;

use log::{Level, LevelFilter};
use nu_ansi_term::ansi::RESET;
use nu_ansi_term::{Color, Style};

/// A small `log::Log` sink: timestamps each record (RFC3339, nanosecond precision)
/// and colorizes level and target, writing to stderr.
pub struct Logger;

impl log::Log for Logger {
	fn enabled(&self, _: &log::Metadata) -> bool {
		true
	}

	fn log(&self, record: &log::Record) {
		let time = humantime::format_rfc3339_nanos(SystemTime::now());

		let dim = Style::new().dimmed().prefix();

		eprintln!(
			"{dim}{time}{RESET} {}{:5}{RESET} {}{}{RESET}{dim}:{RESET} {}",
			match record.level() {
				Level::Trace => Color::Purple,
				Level::Debug => Color::Blue,
				Level::Info => Color::Green,
				Level::Warn => Color::Yellow,
				Level::Error => Color::Red,
			}
			.bold()
			.prefix(),
			record.level(),
			Style::new().bold().prefix(),
			record.target(),
			record.args()
		);
	}

	fn flush(&self) {}
}

/// Installs [`Logger`] as the global `log` sink at the given level filter. Not called
/// automatically on load, so an embedding application can install its own subscriber
/// instead.
static LOGGER: Logger = Logger;

pub fn init(level: LevelFilter) {
	if log::set_logger(&LOGGER).is_ok() {
		log::set_max_level(level);
	}
}
