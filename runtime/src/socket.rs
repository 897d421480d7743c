//! The datagram transport: a narrow, non-blocking UDP socket wrapper that binds a
//! non-blocking socket and classifies transient vs fatal errors. The peer is driven
//! by repeated `tick()` calls rather than an integrated poll loop, so `Socket` only
//! needs non-blocking `send_to`/`recv_from` — there is no event loop to integrate
//! with here.

use std::io::{self, ErrorKind};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, UdpSocket};

use socket2::{Domain, Protocol, Socket as Socket2, Type};

/// Minimum and default socket buffer sizes.
pub const MIN_BUFFER_SIZE: usize = 256 * 1024;
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpMode {
	V4,
	V6,
	/// Dual-stack where the OS supports it.
	Both,
}

/// Fatal vs transient socket errors: transient errors are logged and swallowed
/// by the caller; fatal ones tear down the listener.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
	/// `ConnectionReset`, `MessageSize`, `TimedOut` and similar — the listener stays up.
	#[error("transient socket error: {0}")]
	Transient(io::Error),
	/// `Interrupted`, `NotSocket`, or the socket having been disposed — the listener
	/// must stop.
	#[error("fatal socket error: {0}")]
	Fatal(io::Error),
}

impl SocketError {
	fn classify(err: io::Error) -> Self {
		match err.kind() {
			ErrorKind::ConnectionReset | ErrorKind::TimedOut => SocketError::Transient(err),
			_ if is_message_size(&err) => SocketError::Transient(err),
			ErrorKind::Interrupted | ErrorKind::NotConnected => SocketError::Fatal(err),
			_ => SocketError::Fatal(err),
		}
	}
}

#[cfg(unix)]
fn is_message_size(err: &io::Error) -> bool {
	err.raw_os_error() == Some(libc_message_size())
}

#[cfg(unix)]
fn libc_message_size() -> i32 {
	// EMSGSIZE
	90
}

#[cfg(not(unix))]
fn is_message_size(_: &io::Error) -> bool {
	false
}

pub struct Socket {
	inner: UdpSocket,
}

impl Socket {
	/// Binds a non-blocking UDP socket on `port`, with send/receive buffers sized to
	/// `buffer_size` (floored at [`MIN_BUFFER_SIZE`]).
	pub fn bind(port: u16, mode: IpMode, buffer_size: usize) -> io::Result<Self> {
		let buffer_size = buffer_size.max(MIN_BUFFER_SIZE);

		let (domain, addr) = match mode {
			IpMode::V4 => (Domain::IPV4, SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))),
			IpMode::V6 | IpMode::Both => (Domain::IPV6, SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0))),
		};

		let socket = Socket2::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

		if mode == IpMode::Both {
			// Ignore failures: some platforms (or IPv4-only hosts) don't support this,
			// and binding still succeeds as IPv6-only in that case.
			let _ = socket.set_only_v6(false);
		}

		socket.set_nonblocking(true)?;
		socket.set_recv_buffer_size(buffer_size)?;
		socket.set_send_buffer_size(buffer_size)?;
		socket.bind(&addr.into())?;

		Ok(Self { inner: socket.into() })
	}

	/// Binds to an ephemeral local port and connects toward `addr`'s family, for
	/// client-role sockets that only ever talk to one peer.
	pub fn bind_client(mode: IpMode, buffer_size: usize) -> io::Result<Self> {
		Self::bind(0, mode, buffer_size)
	}

	pub fn local_addr(&self) -> io::Result<SocketAddr> {
		self.inner.local_addr()
	}

	/// Best-effort, non-blocking send. Transient failures are reported but do not
	/// require the caller to tear anything down.
	pub fn send_to(&self, buf: &[u8], addr: SocketAddr) -> Result<usize, SocketError> {
		match self.inner.send_to(buf, addr) {
			Ok(n) => Ok(n),
			Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
			Err(e) => Err(SocketError::classify(e)),
		}
	}

	/// Returns `Ok(None)` immediately if nothing is queued; never blocks.
	pub fn try_recv(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, SocketError> {
		match self.inner.recv_from(buf) {
			Ok((n, addr)) => Ok(Some((n, addr))),
			Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
			Err(e) => Err(SocketError::classify(e)),
		}
	}
}
