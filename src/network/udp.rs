//! UDP datagram transport
//!
//! One socket serves both directions. The send path (capture pump thread)
//! and the receive path (receive thread) call into it concurrently with no
//! lock between them: this relies on the OS datagram socket treating send
//! and receive as independent, which `std::net::UdpSocket` exposes through
//! `&self` methods. Only the remote endpoint is guarded, and only for the
//! instant it takes to copy it.

use parking_lot::RwLock;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::config::{resolve_endpoint, NetworkConfig};
use crate::constants::MAX_PACKET_SIZE;
use crate::error::NetworkError;

/// Kernel receive buffer requested for the socket
const RECV_BUFFER_BYTES: usize = 1 << 20;

/// Create a bound UDP socket with a read timeout
pub fn create_socket(bind_addr: SocketAddr, recv_timeout: Duration) -> io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::for_address(bind_addr), Type::DGRAM, Some(Protocol::UDP))?;

    if let Err(e) = socket.set_recv_buffer_size(RECV_BUFFER_BYTES) {
        tracing::debug!("Could not enlarge receive buffer: {}", e);
    }
    socket.set_read_timeout(Some(recv_timeout))?;
    socket.bind(&bind_addr.into())?;

    Ok(socket.into())
}

/// Result of one receive attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvOutcome {
    /// A datagram of `len` bytes arrived from `from`
    Datagram { len: usize, from: SocketAddr },
    /// The timeout elapsed with nothing to read
    TimedOut,
}

/// Anything that can carry an encoded frame to the peer
pub trait FrameSink: Send + Sync {
    /// Send one payload to the current destination
    fn send_frame(&self, payload: &[u8]) -> Result<usize, NetworkError>;
}

/// Bidirectional datagram transport to a single peer
pub struct DatagramTransport {
    socket: std::net::UdpSocket,
    remote: RwLock<SocketAddr>,
    stats: TransportCounters,
}

#[derive(Default)]
struct TransportCounters {
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    send_errors: AtomicU64,
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    recv_errors: AtomicU64,
}

impl DatagramTransport {
    /// Bind the local socket and set the initial remote endpoint
    pub fn bind(config: &NetworkConfig) -> Result<Self, NetworkError> {
        let bind_addr = config.bind_endpoint()?;
        let remote = config.remote_endpoint()?;

        let socket = create_socket(bind_addr, config.recv_timeout())
            .map_err(|e| NetworkError::BindFailed(format!("{}: {}", bind_addr, e)))?;

        let transport = Self::from_socket(socket, remote);
        tracing::info!(
            "UDP transport bound to {}, sending to {}",
            transport
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| bind_addr.to_string()),
            remote
        );
        Ok(transport)
    }

    /// Wrap an already bound socket
    pub fn from_socket(socket: std::net::UdpSocket, remote: SocketAddr) -> Self {
        Self {
            socket,
            remote: RwLock::new(remote),
            stats: TransportCounters::default(),
        }
    }

    /// Send to the current remote endpoint
    pub fn send(&self, payload: &[u8]) -> Result<usize, NetworkError> {
        let dest = *self.remote.read();
        self.send_to(payload, dest)
    }

    /// Send to an explicit destination. Fire-and-forget.
    pub fn send_to(&self, payload: &[u8], dest: SocketAddr) -> Result<usize, NetworkError> {
        if payload.len() > MAX_PACKET_SIZE {
            self.stats.send_errors.fetch_add(1, Ordering::Relaxed);
            return Err(NetworkError::PacketTooLarge(payload.len()));
        }

        match self.socket.send_to(payload, dest) {
            Ok(sent) => {
                self.stats.packets_sent.fetch_add(1, Ordering::Relaxed);
                self.stats.bytes_sent.fetch_add(sent as u64, Ordering::Relaxed);
                Ok(sent)
            }
            Err(e) => {
                self.stats.send_errors.fetch_add(1, Ordering::Relaxed);
                Err(NetworkError::SendFailed(format!("{}: {}", dest, e)))
            }
        }
    }

    /// Block until a datagram arrives or the read timeout elapses.
    ///
    /// A timeout is reported as [`RecvOutcome::TimedOut`], not an error.
    pub fn recv(&self, buf: &mut [u8]) -> Result<RecvOutcome, NetworkError> {
        match self.socket.recv_from(buf) {
            Ok((len, from)) => {
                self.stats.packets_received.fetch_add(1, Ordering::Relaxed);
                self.stats.bytes_received.fetch_add(len as u64, Ordering::Relaxed);
                Ok(RecvOutcome::Datagram { len, from })
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(RecvOutcome::TimedOut),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(RecvOutcome::TimedOut),
            Err(e) => {
                self.stats.recv_errors.fetch_add(1, Ordering::Relaxed);
                Err(NetworkError::ReceiveFailed(e.to_string()))
            }
        }
    }

    /// Point subsequent sends at a new peer.
    ///
    /// The address must parse and match the local socket's IP family;
    /// otherwise the previous endpoint stays in effect.
    pub fn set_remote_endpoint(&self, address: &str, port: u16) -> Result<SocketAddr, NetworkError> {
        let endpoint = resolve_endpoint(address, port)?;
        let local = self
            .local_addr()
            .map_err(|e| NetworkError::InvalidAddress(e.to_string()))?;
        if endpoint.is_ipv4() != local.is_ipv4() {
            return Err(NetworkError::InvalidAddress(format!(
                "{} is not reachable from socket bound to {}",
                endpoint, local
            )));
        }
        self.set_remote(endpoint);
        Ok(endpoint)
    }

    pub fn set_remote(&self, endpoint: SocketAddr) {
        let previous = std::mem::replace(&mut *self.remote.write(), endpoint);
        if previous != endpoint {
            tracing::info!("Remote endpoint changed: {} -> {}", previous, endpoint);
        }
    }

    pub fn remote(&self) -> SocketAddr {
        *self.remote.read()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn stats(&self) -> TransportStats {
        TransportStats {
            packets_sent: self.stats.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.stats.bytes_sent.load(Ordering::Relaxed),
            send_errors: self.stats.send_errors.load(Ordering::Relaxed),
            packets_received: self.stats.packets_received.load(Ordering::Relaxed),
            bytes_received: self.stats.bytes_received.load(Ordering::Relaxed),
            recv_errors: self.stats.recv_errors.load(Ordering::Relaxed),
        }
    }
}

impl FrameSink for DatagramTransport {
    fn send_frame(&self, payload: &[u8]) -> Result<usize, NetworkError> {
        self.send(payload)
    }
}

/// Transport statistics
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub send_errors: u64,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub recv_errors: u64,
}
