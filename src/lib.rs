//! A buffered client for sending metrics to a [statsd][statsd]-compatible server.
//!
//! [statsd]: https://github.com/statsd/statsd
//!
//! # Usage
//!
//! Using the client is straightforward:
//!
//! ```no_run
//! # use statsd_client::StatsdBuilder;
//! let client = StatsdBuilder::default()
//!     .with_remote_address("127.0.0.1:8125")?
//!     .with_prefix("prod.web.host_01.")
//!     .build()?;
//!
//! // Counters, gauges, timers, and sets all share the same shape: a stat
//! // name, a value, and a sample rate (1.0 means "always send").
//! client.increment("requests", 1, 1.0)?;
//! client.timing("latency", 32, 0.5)?;
//!
//! // Metrics are packed into a fixed-size packet and only hit the network
//! // when the packet fills up, or when explicitly flushed.
//! client.flush()?;
//! client.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Features
//!
//! ## Multi-metric packing
//!
//! Metric lines are concatenated, newline-separated, into a single datagram until the configured
//! packet size (512 bytes by default) would be exceeded, at which point the packet is flushed and
//! the line starts a fresh one. This matches the multi-metric packet guidance of common statsd
//! servers and keeps the syscall rate well below one-per-metric under load.
//!
//! ## Client-side sampling
//!
//! Every metric method takes a sample rate in `(0, 1]`. Rates below one probabilistically drop
//! the metric before it is ever formatted, and annotate the surviving lines with `|@<rate>` so
//! the server can extrapolate true counts. A metric dropped by sampling is a successful call.
//!
//! ## Thread safety
//!
//! All client methods take `&self`; a single internal lock covers the packet buffer and the
//! transport. Metrics emitted by one thread are sent in emission order.
//!
//! # Delivery semantics
//!
//! The transport is fire-and-forget: writes are never acknowledged, never retried, and a packet
//! lost in a failed write stays lost. Callers that need delivery guarantees want a different
//! protocol, not a different client.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![deny(missing_docs)]

mod builder;
pub use self::builder::{BuildError, StatsdBuilder};

mod client;
pub use self::client::{ClientError, StatsdClient};

mod prefix;
pub use self::prefix::make_prefix;

mod transport;
pub use self::transport::{NopTransport, Transport, UdpTransport};

mod writer;
