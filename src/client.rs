use std::{
    io,
    sync::Mutex,
    time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{error, trace};

use crate::{
    transport::Transport,
    writer::{MetricKind, PacketBuffer, Placement, DEFAULT_PACKET_SIZE},
};

/// Errors that could occur while emitting, flushing, or closing metrics.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A single formatted metric line cannot fit even in an empty packet.
    ///
    /// This is deterministic for a given metric name, value, and packet capacity, so it points at
    /// a logic bug in the caller rather than a transient network condition. The buffered packet
    /// and the transport are left untouched.
    #[error("metric line of {len} bytes exceeds the packet capacity of {capacity} bytes")]
    Oversized {
        /// Length of the formatted line, in bytes.
        len: usize,
        /// Total packet capacity, in bytes.
        capacity: usize,
    },

    /// The client has already been closed.
    #[error("client is closed")]
    Closed,

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

struct Inner {
    // `None` once the client has been closed.
    transport: Option<Box<dyn Transport>>,
    buffer: PacketBuffer,
    prefix: String,
}

/// A buffered statsd client.
///
/// Metric lines are packed into a fixed-capacity packet and shipped to the remote server as
/// multi-metric datagrams: a line is appended to the current packet when it fits, and the packet
/// is written out first when it doesn't. Callers should [`flush`](StatsdClient::flush)
/// periodically (and must [`close`](StatsdClient::close) on shutdown) so that a partially filled
/// packet doesn't linger indefinitely.
///
/// All methods take `&self` and may be called from any number of threads. One internal lock
/// covers the packet, the prefix, and the transport, so metrics emitted by a single thread reach
/// the wire in emission order.
pub struct StatsdClient {
    inner: Mutex<Inner>,
}

impl StatsdClient {
    /// Creates a client over a caller-supplied transport.
    ///
    /// A `max_packet_size` of zero selects the default capacity of 512 bytes. The capacity is not
    /// validated here; use [`StatsdBuilder`](crate::StatsdBuilder) for checked construction.
    pub fn from_transport<T>(transport: T, max_packet_size: usize) -> Self
    where
        T: Transport + 'static,
    {
        let capacity =
            if max_packet_size == 0 { DEFAULT_PACKET_SIZE } else { max_packet_size };

        StatsdClient {
            inner: Mutex::new(Inner {
                transport: Some(Box::new(transport)),
                buffer: PacketBuffer::new(capacity),
                prefix: String::new(),
            }),
        }
    }

    pub(crate) fn from_parts<T>(transport: T, max_packet_size: usize, prefix: String) -> Self
    where
        T: Transport + 'static,
    {
        let client = Self::from_transport(transport, max_packet_size);
        client.set_prefix(prefix);
        client
    }

    /// Increments the counter for the given stat.
    ///
    /// # Errors
    ///
    /// Fails if the line cannot fit in an empty packet, if the client is closed, or if an inline
    /// flush hits a transport error.
    pub fn increment(&self, stat: &str, count: i64, rate: f64) -> Result<(), ClientError> {
        self.emit(stat, rate, MetricKind::Counter, count)
    }

    /// Decrements the counter for the given stat.
    ///
    /// # Errors
    ///
    /// Fails under the same conditions as [`increment`](StatsdClient::increment).
    pub fn decrement(&self, stat: &str, count: i64, rate: f64) -> Result<(), ClientError> {
        self.increment(stat, -count, rate)
    }

    /// Records an absolute value for the given gauge.
    ///
    /// # Errors
    ///
    /// Fails under the same conditions as [`increment`](StatsdClient::increment).
    pub fn gauge(&self, stat: &str, value: i64, rate: f64) -> Result<(), ClientError> {
        self.emit(stat, rate, MetricKind::Gauge, value)
    }

    /// Increments the value of the gauge by the given amount.
    ///
    /// # Errors
    ///
    /// Fails under the same conditions as [`increment`](StatsdClient::increment).
    pub fn increment_gauge(&self, stat: &str, value: i64, rate: f64) -> Result<(), ClientError> {
        self.emit(stat, rate, MetricKind::GaugeDelta, value)
    }

    /// Decrements the value of the gauge by the given amount.
    ///
    /// # Errors
    ///
    /// Fails under the same conditions as [`increment`](StatsdClient::increment).
    pub fn decrement_gauge(&self, stat: &str, value: i64, rate: f64) -> Result<(), ClientError> {
        self.emit(stat, rate, MetricKind::GaugeDelta, -value)
    }

    /// Records time spent for the given stat, in milliseconds.
    ///
    /// # Errors
    ///
    /// Fails under the same conditions as [`increment`](StatsdClient::increment).
    pub fn timing(&self, stat: &str, millis: i64, rate: f64) -> Result<(), ClientError> {
        self.emit(stat, rate, MetricKind::Timer, millis)
    }

    /// Records time spent for the given stat, truncated to whole milliseconds.
    ///
    /// # Errors
    ///
    /// Fails under the same conditions as [`increment`](StatsdClient::increment).
    pub fn duration(&self, stat: &str, duration: Duration, rate: f64) -> Result<(), ClientError> {
        self.timing(stat, duration.as_millis() as i64, rate)
    }

    /// Records a unique occurrence of an event.
    ///
    /// # Errors
    ///
    /// Fails under the same conditions as [`increment`](StatsdClient::increment).
    pub fn unique(&self, stat: &str, value: i64, rate: f64) -> Result<(), ClientError> {
        self.emit(stat, rate, MetricKind::Set, value)
    }

    /// Runs the given closure, measuring the wall-clock time it takes, and records the elapsed
    /// time for the given stat.
    ///
    /// The closure runs on the calling thread, outside the client's internal lock; its return
    /// value is handed back to the caller.
    ///
    /// # Errors
    ///
    /// Fails under the same conditions as [`increment`](StatsdClient::increment). The closure has
    /// already completed when an error is returned.
    pub fn time<T, F>(&self, stat: &str, rate: f64, f: F) -> Result<T, ClientError>
    where
        F: FnOnce() -> T,
    {
        let start = Instant::now();
        let value = f();
        self.duration(stat, start.elapsed(), rate)?;
        Ok(value)
    }

    /// Sets the prefix prepended to the name of every subsequently emitted metric.
    ///
    /// Lines already sitting in the packet keep the prefix they were formatted with. See
    /// [`make_prefix`](crate::make_prefix) for the conventional prefix layout.
    pub fn set_prefix(&self, prefix: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.prefix = prefix.into();
    }

    /// Writes the buffered packet to the transport and clears it.
    ///
    /// Flushing an empty packet is a no-op: no zero-length datagram is sent.
    ///
    /// # Errors
    ///
    /// Fails if the client is closed or the transport write fails. After a failed write the
    /// packet's contents are lost; they are not retransmitted.
    pub fn flush(&self) -> Result<(), ClientError> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let transport = inner.transport.as_mut().ok_or(ClientError::Closed)?;

        flush_packet(&mut inner.buffer, transport.as_mut())
    }

    /// Flushes any buffered metrics and releases the transport.
    ///
    /// The transport is released even when the final flush fails; the flush error is still
    /// reported. Any subsequent operation on the client fails with [`ClientError::Closed`].
    ///
    /// # Errors
    ///
    /// Fails if the client is already closed, if the final flush hits a transport error, or if
    /// releasing the transport fails.
    pub fn close(&self) -> Result<(), ClientError> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let mut transport = inner.transport.take().ok_or(ClientError::Closed)?;

        let flushed = flush_packet(&mut inner.buffer, transport.as_mut());
        let closed = transport.close();

        flushed?;
        closed.map_err(ClientError::Transport)
    }

    fn emit(&self, stat: &str, rate: f64, kind: MetricKind, value: i64) -> Result<(), ClientError> {
        // The sampling draw happens before the lock is taken, so a sampled-out
        // metric never contends with other emitters.
        let sample_rate = if rate < 1.0 {
            if rand::random::<f64>() >= rate {
                return Ok(());
            }
            Some(rate)
        } else {
            None
        };

        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let transport = inner.transport.as_mut().ok_or(ClientError::Closed)?;

        inner.buffer.format_line(&inner.prefix, stat, kind, value, sample_rate);
        match inner.buffer.try_append_line() {
            Placement::Appended => Ok(()),
            Placement::Oversized => Err(ClientError::Oversized {
                len: inner.buffer.line_len(),
                capacity: inner.buffer.capacity(),
            }),
            Placement::NeedsFlush => {
                flush_packet(&mut inner.buffer, transport.as_mut())?;
                match inner.buffer.try_append_line() {
                    Placement::Appended => Ok(()),
                    _ => unreachable!("line fits an empty packet after the oversize check"),
                }
            }
        }
    }
}

fn flush_packet(
    buffer: &mut PacketBuffer,
    transport: &mut dyn Transport,
) -> Result<(), ClientError> {
    if buffer.is_empty() {
        return Ok(());
    }

    let result = transport.write(buffer.payload());

    // The packet is consumed whether or not the write succeeded; a failed
    // write loses its contents rather than growing the buffer or resending.
    trace!(payload_len = buffer.payload().len(), ok = result.is_ok(), "Flushed packet.");
    buffer.clear();

    result.map_err(|e| {
        error!(error = %e, "Failed to write packet to transport.");
        ClientError::Transport(e)
    })
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc, Mutex,
        },
        thread,
        time::Duration,
    };

    use proptest::{collection::vec as arb_vec, prelude::*, prop_oneof, proptest};

    use super::{ClientError, StatsdClient};
    use crate::transport::Transport;

    /// Records every packet written through it, and can be told to start
    /// failing writes.
    #[derive(Clone, Default)]
    struct RecordingTransport {
        payloads: Arc<Mutex<Vec<Vec<u8>>>>,
        fail_writes: Arc<AtomicBool>,
    }

    impl RecordingTransport {
        fn payloads(&self) -> Vec<String> {
            self.payloads
                .lock()
                .unwrap()
                .iter()
                .map(|p| String::from_utf8(p.clone()).unwrap())
                .collect()
        }

        fn lines(&self) -> Vec<String> {
            self.payloads()
                .iter()
                .flat_map(|p| p.lines())
                .map(ToOwned::to_owned)
                .collect()
        }

        fn set_fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }
    }

    impl Transport for RecordingTransport {
        fn write(&mut self, payload: &[u8]) -> io::Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(io::Error::other("write failed"));
            }
            self.payloads.lock().unwrap().push(payload.to_vec());
            Ok(())
        }

        fn close(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn recording_client(max_packet_size: usize) -> (StatsdClient, RecordingTransport) {
        let transport = RecordingTransport::default();
        let client = StatsdClient::from_transport(transport.clone(), max_packet_size);
        (client, transport)
    }

    #[test]
    fn increment() {
        let (client, transport) = recording_client(0);
        client.increment("incr", 1, 1.0).unwrap();
        client.flush().unwrap();
        assert_eq!(transport.payloads(), vec!["incr:1|c"]);
    }

    #[test]
    fn decrement_matches_negated_increment() {
        let (client, transport) = recording_client(0);
        client.decrement("decr", 1, 1.0).unwrap();
        client.increment("decr", -1, 1.0).unwrap();
        client.flush().unwrap();
        assert_eq!(transport.payloads(), vec!["decr:-1|c\ndecr:-1|c"]);
    }

    #[test]
    fn gauges() {
        let (client, transport) = recording_client(0);
        client.gauge("gauge", 300, 1.0).unwrap();
        client.increment_gauge("gauge", 10, 1.0).unwrap();
        client.decrement_gauge("gauge", 4, 1.0).unwrap();
        client.flush().unwrap();
        assert_eq!(transport.payloads(), vec!["gauge:300|g\ngauge:+10|g\ngauge:-4|g"]);
    }

    #[test]
    fn timing_and_unique() {
        let (client, transport) = recording_client(0);
        client.timing("timing", 350, 1.0).unwrap();
        client.unique("unique", 765, 1.0).unwrap();
        client.flush().unwrap();
        assert_eq!(transport.payloads(), vec!["timing:350|ms\nunique:765|s"]);
    }

    #[test]
    fn duration_truncates_to_whole_milliseconds() {
        let (client, transport) = recording_client(0);
        client.duration("dur", Duration::from_nanos(50), 1.0).unwrap();
        client.duration("dur", Duration::from_millis(350), 1.0).unwrap();
        client.duration("dur", Duration::from_secs(5), 1.0).unwrap();
        client.flush().unwrap();
        assert_eq!(transport.payloads(), vec!["dur:0|ms\ndur:350|ms\ndur:5000|ms"]);
    }

    #[test]
    fn time_records_elapsed_and_returns_closure_value() {
        let (client, transport) = recording_client(0);
        let value = client.time("timed", 1.0, || 42).unwrap();
        assert_eq!(value, 42);

        client.flush().unwrap();
        let lines = transport.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("timed:"));
        assert!(lines[0].ends_with("|ms"));
    }

    #[test]
    fn zero_rate_never_sends() {
        let (client, transport) = recording_client(0);
        for _ in 0..100 {
            client.increment("never", 1, 0.0).unwrap();
        }
        client.flush().unwrap();
        assert!(transport.payloads().is_empty());
    }

    #[test]
    fn sampled_lines_carry_rate_suffix() {
        let (client, transport) = recording_client(0);
        for _ in 0..1000 {
            client.increment("sampled", 1, 0.5).unwrap();
        }
        client.flush().unwrap();

        let lines = transport.lines();
        assert!(!lines.is_empty());
        assert!(lines.len() < 1000);
        for line in lines {
            assert_eq!(line, "sampled:1|c|@0.5");
        }
    }

    #[test]
    fn prefix_applies_to_subsequent_metrics_only() {
        let (client, transport) = recording_client(0);
        client.increment("bare", 1, 1.0).unwrap();
        client.set_prefix("test.svc.host_.");
        client.increment("key", 1, 1.0).unwrap();
        client.flush().unwrap();
        assert_eq!(transport.payloads(), vec!["bare:1|c\ntest.svc.host_.key:1|c"]);
    }

    #[test]
    fn overflow_flushes_before_appending() {
        // Each "stat:1|c" line is 8 bytes; a 26-byte packet holds three lines
        // (8 * 3 + 2 separators), so the fourth line forces a flush.
        let (client, transport) = recording_client(26);
        for _ in 0..4 {
            client.increment("stat", 1, 1.0).unwrap();
        }
        client.flush().unwrap();

        let payloads = transport.payloads();
        assert_eq!(
            payloads,
            vec!["stat:1|c\nstat:1|c\nstat:1|c".to_string(), "stat:1|c".to_string()]
        );
        for payload in payloads {
            assert!(payload.len() <= 26);
        }
    }

    #[test]
    fn oversized_metric_leaves_buffer_untouched() {
        let (client, transport) = recording_client(16);
        client.increment("ok", 1, 1.0).unwrap();

        let err = client.increment("a_name_far_too_long_to_fit", 1, 1.0).unwrap_err();
        assert!(matches!(
            err,
            ClientError::Oversized { len: 30, capacity: 16 }
        ));

        // The earlier metric is still buffered and flushes normally.
        client.flush().unwrap();
        assert_eq!(transport.payloads(), vec!["ok:1|c"]);
    }

    #[test]
    fn failed_flush_surfaces_error_and_clears_buffer() {
        let (client, transport) = recording_client(0);
        client.increment("lost", 1, 1.0).unwrap();

        transport.set_fail_writes(true);
        assert!(matches!(client.flush(), Err(ClientError::Transport(_))));

        // The packet was dropped, so a repeated flush has nothing to write.
        transport.set_fail_writes(false);
        client.flush().unwrap();
        assert!(transport.payloads().is_empty());
    }

    #[test]
    fn close_flushes_remaining_metrics() {
        let (client, transport) = recording_client(0);
        client.increment("tail", 1, 1.0).unwrap();
        client.close().unwrap();
        assert_eq!(transport.payloads(), vec!["tail:1|c"]);
    }

    #[test]
    fn operations_after_close_fail() {
        let (client, _transport) = recording_client(0);
        client.close().unwrap();

        assert!(matches!(client.increment("incr", 1, 1.0), Err(ClientError::Closed)));
        assert!(matches!(client.flush(), Err(ClientError::Closed)));
        assert!(matches!(client.close(), Err(ClientError::Closed)));
    }

    #[test]
    fn close_releases_transport_even_when_flush_fails() {
        let (client, transport) = recording_client(0);
        client.increment("lost", 1, 1.0).unwrap();

        transport.set_fail_writes(true);
        assert!(matches!(client.close(), Err(ClientError::Transport(_))));

        // The transport is gone despite the failed flush.
        assert!(matches!(client.flush(), Err(ClientError::Closed)));
    }

    #[test]
    fn concurrent_emitters_produce_exactly_their_lines() {
        const THREADS: usize = 8;
        const METRICS_PER_THREAD: usize = 100;

        let (client, transport) = recording_client(0);
        let client = Arc::new(client);

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let client = Arc::clone(&client);
                thread::spawn(move || {
                    for _ in 0..METRICS_PER_THREAD {
                        client.increment("concurrent", 1, 1.0).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        client.flush().unwrap();

        for payload in transport.payloads() {
            assert!(payload.len() <= 512);
        }

        let lines = transport.lines();
        assert_eq!(lines.len(), THREADS * METRICS_PER_THREAD);
        for line in lines {
            assert_eq!(line, "concurrent:1|c");
        }
    }

    #[derive(Debug, Clone)]
    enum InputMetric {
        Counter(String, i64),
        Gauge(String, i64),
        Timer(String, i64),
        Set(String, i64),
    }

    fn arb_metric() -> impl Strategy<Value = InputMetric> {
        let name_regex = "[a-z][a-z0-9_]{0,7}";
        prop_oneof![
            (name_regex, any::<i64>()).prop_map(|(n, v)| InputMetric::Counter(n, v)),
            (name_regex, any::<i64>()).prop_map(|(n, v)| InputMetric::Gauge(n, v)),
            (name_regex, any::<i64>()).prop_map(|(n, v)| InputMetric::Timer(n, v)),
            (name_regex, any::<i64>()).prop_map(|(n, v)| InputMetric::Set(n, v)),
        ]
    }

    proptest! {
        // The longest possible line is an 8-byte name, i64::MIN, and the
        // `|ms` suffix: 8 + 1 + 20 + 3 = 32 bytes, so any capacity from 32 up
        // must accept every metric and never exceed the capacity per packet.
        #[test]
        fn packing_never_loses_or_splits_lines(
            capacity in 32usize..512,
            inputs in arb_vec(arb_metric(), 1..128),
        ) {
            let (client, transport) = recording_client(capacity);

            for input in &inputs {
                match input {
                    InputMetric::Counter(name, value) => client.increment(name, *value, 1.0).unwrap(),
                    InputMetric::Gauge(name, value) => client.gauge(name, *value, 1.0).unwrap(),
                    InputMetric::Timer(name, value) => client.timing(name, *value, 1.0).unwrap(),
                    InputMetric::Set(name, value) => client.unique(name, *value, 1.0).unwrap(),
                }
            }
            client.flush().unwrap();

            for payload in transport.payloads() {
                prop_assert!(payload.len() <= capacity);
            }

            let lines = transport.lines();
            prop_assert_eq!(lines.len(), inputs.len());

            for (line, input) in lines.iter().zip(&inputs) {
                let expected = match input {
                    InputMetric::Counter(name, value) => format!("{name}:{value}|c"),
                    InputMetric::Gauge(name, value) => format!("{name}:{value}|g"),
                    InputMetric::Timer(name, value) => format!("{name}:{value}|ms"),
                    InputMetric::Set(name, value) => format!("{name}:{value}|s"),
                };
                prop_assert_eq!(line, &expected);
            }
        }
    }
}
