use std::{
    io,
    net::{Ipv4Addr, SocketAddr, UdpSocket},
    time::Duration,
};

use tracing::debug;

/// A fire-and-forget byte sink for packed metric payloads.
///
/// One `write` call carries one complete packet. Implementations are not expected to provide any
/// delivery guarantee: the wire protocol is designed around a lossy transport, and the client
/// never retries a failed write.
pub trait Transport: Send {
    /// Writes one packet to the remote endpoint.
    ///
    /// # Errors
    ///
    /// If the underlying sink fails to accept the packet, an error is returned. The packet is
    /// considered lost either way.
    fn write(&mut self, payload: &[u8]) -> io::Result<()>;

    /// Releases the underlying resources.
    ///
    /// # Errors
    ///
    /// If releasing the underlying resources fails, an error is returned. The transport must not
    /// be used afterwards regardless.
    fn close(&mut self) -> io::Result<()>;
}

/// A [`Transport`] over a connected UDP socket.
///
/// Each packet is sent as a single datagram, so the remote server sees exactly the line framing
/// the client produced.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Creates a new `UdpTransport` connected to the first reachable of the given addresses.
    ///
    /// When a write timeout is given, a `write` call blocks for at most that long before failing;
    /// otherwise it blocks until the datagram is handed to the OS.
    ///
    /// # Errors
    ///
    /// If binding the local socket or connecting it to the remote address fails, an error is
    /// returned.
    pub fn connect(addrs: &[SocketAddr], write_timeout: Option<Duration>) -> io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect(addrs)?;
        socket.set_write_timeout(write_timeout)?;

        debug!(remote_addr = ?socket.peer_addr().ok(), "Connected UDP transport.");

        Ok(UdpTransport { socket })
    }
}

impl Transport for UdpTransport {
    fn write(&mut self, payload: &[u8]) -> io::Result<()> {
        // A datagram send either ships the whole payload or errors; there are
        // no partial writes to handle.
        self.socket.send(payload).map(|_| ())
    }

    fn close(&mut self) -> io::Result<()> {
        // The socket is released when the transport is dropped.
        Ok(())
    }
}

/// A [`Transport`] that discards every packet.
///
/// Useful for disabling metrics without touching call sites, and as a stand-in during tests.
pub struct NopTransport;

impl Transport for NopTransport {
    fn write(&mut self, _payload: &[u8]) -> io::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}
