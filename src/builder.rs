use std::{
    io,
    net::{SocketAddr, ToSocketAddrs as _},
    time::Duration,
};

use thiserror::Error;

use crate::{
    client::StatsdClient,
    transport::UdpTransport,
    writer::{DEFAULT_PACKET_SIZE, SMALLEST_VALID_LINE},
};

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Errors that could occur while building a statsd client.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Failed to parse or resolve the remote address.
    #[error("invalid remote address: {reason}")]
    InvalidRemoteAddress {
        /// Details about the parsing or resolution failure.
        reason: String,
    },

    /// The configured packet size is too small to hold any metric line.
    #[error("packet size of {size} bytes is too small to hold any metric")]
    InvalidPacketSize {
        /// The rejected packet size, in bytes.
        size: usize,
    },

    /// Failed to open the transport to the remote host.
    #[error("failed to connect transport: {0}")]
    Connect(#[from] io::Error),
}

/// Builder for a statsd client.
pub struct StatsdBuilder {
    remote_addrs: Vec<SocketAddr>,
    write_timeout: Duration,
    max_packet_size: usize,
    prefix: String,
}

impl StatsdBuilder {
    /// Set the remote address to send metrics to.
    ///
    /// The address must be in the format of `<host>:<port>`; the host is resolved at build time,
    /// not on each send.
    ///
    /// Defaults to sending to `127.0.0.1:8125`.
    ///
    /// # Errors
    ///
    /// If the given address is not able to be parsed or resolved, an error will be returned
    /// indicating the reason.
    pub fn with_remote_address<A>(mut self, addr: A) -> Result<Self, BuildError>
    where
        A: AsRef<str>,
    {
        match addr.as_ref().to_socket_addrs() {
            Ok(addrs) => {
                self.remote_addrs = addrs.collect();
                Ok(self)
            }
            Err(e) => Err(BuildError::InvalidRemoteAddress { reason: e.to_string() }),
        }
    }

    /// Set the write timeout for sending packets.
    ///
    /// When the write timeout is reached, the write operation is aborted and the packet being
    /// sent at the time is dropped without retrying.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the maximum packet size, in bytes.
    ///
    /// This controls how many metric lines are packed into a single datagram: lines are appended
    /// to the outgoing packet until the next one would not fit. It should generally match the
    /// receive buffer guidance of the statsd server; oversizing it risks datagrams the server
    /// truncates or drops.
    ///
    /// A value of zero selects the default of 512 bytes.
    #[must_use]
    pub fn with_max_packet_size(mut self, max_packet_size: usize) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }

    /// Set the prefix prepended to every metric name.
    ///
    /// See [`make_prefix`](crate::make_prefix) for the conventional
    /// `environment.app.hostname.` layout.
    ///
    /// Defaults to no prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Builds the client, opening the UDP transport to the configured remote address.
    ///
    /// # Errors
    ///
    /// If the configured packet size cannot hold even the smallest metric line, or if opening the
    /// transport fails, an error will be returned.
    pub fn build(self) -> Result<StatsdClient, BuildError> {
        let packet_size =
            if self.max_packet_size == 0 { DEFAULT_PACKET_SIZE } else { self.max_packet_size };
        if packet_size < SMALLEST_VALID_LINE.len() {
            return Err(BuildError::InvalidPacketSize { size: packet_size });
        }

        let transport = UdpTransport::connect(&self.remote_addrs, Some(self.write_timeout))?;

        Ok(StatsdClient::from_parts(transport, packet_size, self.prefix))
    }
}

impl Default for StatsdBuilder {
    fn default() -> Self {
        StatsdBuilder {
            remote_addrs: vec![SocketAddr::from(([127, 0, 0, 1], 8125))],
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_packet_size: DEFAULT_PACKET_SIZE,
            prefix: String::new(),
        }
    }
}
