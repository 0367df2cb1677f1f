//! Unreliable datagram channel used by the announcer and listener.
//!
//! Implementations:
//! - `UdpTransport` - IPv4 UDP sockets with broadcast enabled
//! - `MemoryNetwork` - In-process broadcast bus for tests and simulations
//!
//! No ordering, delivery, or deduplication guarantees. An endpoint is closed
//! when its channel is dropped.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;
use thiserror::Error;

/// Largest presence payload we expect to read. Longer datagrams are truncated.
pub const MAX_DATAGRAM_SIZE: usize = 2048;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Failed to bind UDP port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("Send failed: {0}")]
    Send(#[source] io::Error),

    #[error("Receive failed: {0}")]
    Receive(#[source] io::Error),

    #[error("Channel closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, ChannelError>;

/// One inbound datagram and the address it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub payload: Vec<u8>,
    pub source: SocketAddr,
}

/// A bound endpoint that can broadcast and receive discrete messages.
pub trait DatagramChannel: Send {
    /// Transmit `payload` to the broadcast address on `port`. Not retried.
    fn send_broadcast(&self, payload: &[u8], port: u16) -> Result<()>;

    /// Wait up to `timeout` for one datagram. `Ok(None)` means the wait timed out.
    fn receive(&mut self, timeout: Duration) -> Result<Option<Datagram>>;
}

/// Opens datagram endpoints.
pub trait Transport: Send + Sync + 'static {
    /// Bind a local endpoint on `port`, or on any free port when `None`.
    fn open(&self, port: Option<u16>) -> Result<Box<dyn DatagramChannel>>;
}

// ============================================================================
// UDP implementation
// ============================================================================

/// UDP transport broadcasting to a fixed IPv4 address.
#[derive(Debug, Clone)]
pub struct UdpTransport {
    broadcast_address: Ipv4Addr,
}

impl UdpTransport {
    pub fn new(broadcast_address: Ipv4Addr) -> Self {
        Self { broadcast_address }
    }
}

impl Default for UdpTransport {
    fn default() -> Self {
        Self::new(Ipv4Addr::BROADCAST)
    }
}

impl Transport for UdpTransport {
    fn open(&self, port: Option<u16>) -> Result<Box<dyn DatagramChannel>> {
        let channel = UdpChannel::bind(port.unwrap_or(0), self.broadcast_address)?;
        Ok(Box::new(channel))
    }
}

/// A bound UDP socket. Several processes on one host may share the port.
pub struct UdpChannel {
    socket: UdpSocket,
    broadcast_address: Ipv4Addr,
    buf: Vec<u8>,
}

impl UdpChannel {
    pub fn bind(port: u16, broadcast_address: Ipv4Addr) -> Result<Self> {
        let bind_err = |source| ChannelError::Bind { port, source };

        let socket = socket2::Socket::new(
            socket2::Domain::IPV4,
            socket2::Type::DGRAM,
            Some(socket2::Protocol::UDP),
        )
        .map_err(bind_err)?;
        socket.set_reuse_address(true).map_err(bind_err)?;
        socket.set_broadcast(true).map_err(bind_err)?;

        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        socket
            .bind(&socket2::SockAddr::from(addr))
            .map_err(bind_err)?;

        Ok(Self {
            socket: socket.into(),
            broadcast_address,
            buf: vec![0; MAX_DATAGRAM_SIZE],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl DatagramChannel for UdpChannel {
    fn send_broadcast(&self, payload: &[u8], port: u16) -> Result<()> {
        let target = SocketAddrV4::new(self.broadcast_address, port);
        self.socket
            .send_to(payload, target)
            .map(|_| ())
            .map_err(ChannelError::Send)
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<Datagram>> {
        // A zero read timeout means "block forever" to the OS
        let timeout = timeout.max(Duration::from_millis(1));
        self.socket
            .set_read_timeout(Some(timeout))
            .map_err(ChannelError::Receive)?;

        match self.socket.recv_from(&mut self.buf) {
            Ok((len, source)) => Ok(Some(Datagram {
                payload: self.buf[..len].to_vec(),
                source,
            })),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) if is_oversized(&e) => {
                tracing::trace!("Dropping datagram larger than {} bytes", MAX_DATAGRAM_SIZE);
                Ok(None)
            }
            Err(e) => Err(ChannelError::Receive(e)),
        }
    }
}

/// Windows reports a datagram that overflows the buffer as WSAEMSGSIZE
/// rather than truncating it like Unix does.
#[cfg(windows)]
fn is_oversized(e: &io::Error) -> bool {
    const WSAEMSGSIZE: i32 = 10040;
    e.raw_os_error() == Some(WSAEMSGSIZE)
}

#[cfg(not(windows))]
fn is_oversized(_e: &io::Error) -> bool {
    false
}

// ============================================================================
// In-memory implementation
// ============================================================================

/// First port handed out for `open(None)` on a `MemoryNetwork`.
const EPHEMERAL_PORT_START: u16 = 49152;

type Subscribers = HashMap<u16, Vec<(u64, mpsc::Sender<Datagram>)>>;

/// An in-process broadcast domain.
///
/// Every channel bound to a port receives every datagram broadcast to that
/// port, the sender's own listener included.
#[derive(Clone)]
pub struct MemoryNetwork {
    ports: Arc<Mutex<Subscribers>>,
    next_port: Arc<AtomicU16>,
    next_channel: Arc<AtomicU64>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self {
            ports: Arc::new(Mutex::new(HashMap::new())),
            next_port: Arc::new(AtomicU16::new(EPHEMERAL_PORT_START)),
            next_channel: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose datagrams appear to come from `host`.
    pub fn transport(&self, host: IpAddr) -> MemoryTransport {
        MemoryTransport {
            network: self.clone(),
            host,
        }
    }

    /// Deliver a raw datagram to every channel bound to `port`.
    ///
    /// Returns the number of channels it reached.
    pub fn inject(&self, port: u16, payload: &[u8], source: SocketAddr) -> usize {
        self.deliver(
            port,
            Datagram {
                payload: payload.to_vec(),
                source,
            },
        )
    }

    /// Number of open channels bound to `port`.
    pub fn listeners(&self, port: u16) -> usize {
        self.lock_ports().get(&port).map_or(0, Vec::len)
    }

    fn lock_ports(&self) -> std::sync::MutexGuard<'_, Subscribers> {
        self.ports.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, port: u16) -> (u64, mpsc::Receiver<Datagram>) {
        let id = self.next_channel.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        self.lock_ports().entry(port).or_default().push((id, tx));
        (id, rx)
    }

    fn unregister(&self, port: u16, id: u64) {
        let mut ports = self.lock_ports();
        if let Some(subscribers) = ports.get_mut(&port) {
            subscribers.retain(|(channel_id, _)| *channel_id != id);
            if subscribers.is_empty() {
                ports.remove(&port);
            }
        }
    }

    fn deliver(&self, port: u16, datagram: Datagram) -> usize {
        let ports = self.lock_ports();
        let Some(subscribers) = ports.get(&port) else {
            return 0;
        };
        subscribers
            .iter()
            .filter(|(_, tx)| tx.send(datagram.clone()).is_ok())
            .count()
    }

    fn allocate_port(&self) -> u16 {
        self.next_port.fetch_add(1, Ordering::Relaxed)
    }
}

/// Opens channels on a `MemoryNetwork` for one simulated host.
#[derive(Clone)]
pub struct MemoryTransport {
    network: MemoryNetwork,
    host: IpAddr,
}

impl Transport for MemoryTransport {
    fn open(&self, port: Option<u16>) -> Result<Box<dyn DatagramChannel>> {
        let port = port.unwrap_or_else(|| self.network.allocate_port());
        let (id, rx) = self.network.register(port);
        Ok(Box::new(MemoryChannel {
            network: self.network.clone(),
            id,
            source: SocketAddr::new(self.host, port),
            rx,
        }))
    }
}

struct MemoryChannel {
    network: MemoryNetwork,
    id: u64,
    source: SocketAddr,
    rx: mpsc::Receiver<Datagram>,
}

impl DatagramChannel for MemoryChannel {
    fn send_broadcast(&self, payload: &[u8], port: u16) -> Result<()> {
        self.network.deliver(
            port,
            Datagram {
                payload: payload.to_vec(),
                source: self.source,
            },
        );
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<Datagram>> {
        match self.rx.recv_timeout(timeout) {
            Ok(datagram) => Ok(Some(datagram)),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(ChannelError::Closed),
        }
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.network.unregister(self.source.port(), self.id);
    }
}
