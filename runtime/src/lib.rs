pub mod logger;
pub mod socket;
pub mod time;

pub use socket::{IpMode, Socket, SocketError, DEFAULT_BUFFER_SIZE, MIN_BUFFER_SIZE};
pub use time::{Clock, FakeClock};
