/// Default packet capacity, matching the multi-metric datagram guidance for
/// statsd servers.
pub(crate) const DEFAULT_PACKET_SIZE: usize = 512;

/// The smallest line the wire format can express, used to sanity-check
/// configured packet capacities.
pub(crate) const SMALLEST_VALID_LINE: &[u8] = b"a:0|c";

/// The kind of measurement being emitted, which selects the unit suffix of
/// the formatted line.
#[derive(Clone, Copy)]
pub(crate) enum MetricKind {
    Counter,
    Gauge,
    GaugeDelta,
    Timer,
    Set,
}

impl MetricKind {
    fn suffix(self) -> &'static [u8] {
        match self {
            MetricKind::Counter => b"|c",
            MetricKind::Gauge | MetricKind::GaugeDelta => b"|g",
            MetricKind::Timer => b"|ms",
            MetricKind::Set => b"|s",
        }
    }
}

/// Outcome of attempting to place a formatted line into the packet.
pub(crate) enum Placement {
    /// The line was appended to the packet.
    Appended,

    /// The line fits in an empty packet, but not in the remaining space of
    /// this one. The packet must be flushed before retrying.
    NeedsFlush,

    /// The line exceeds the total packet capacity and can never be sent.
    Oversized,
}

/// Packs formatted metric lines into a single outbound packet.
///
/// Statsd metrics are newline delimited, which means that multiple metrics can be sent in a single
/// packet, and then trivially split apart by the remote server. This helps save on the number of
/// datagrams required to ship the metrics over the network.
///
/// The packet never exceeds the capacity given at construction: lines are appended while they fit,
/// and the caller is told to flush when the next line would not. A line longer than the total
/// capacity is rejected outright, since no amount of flushing could make room for it.
pub(crate) struct PacketBuffer {
    capacity: usize,
    buf: Vec<u8>,
    line_buf: Vec<u8>,
}

impl PacketBuffer {
    /// Creates a new `PacketBuffer` with the given total capacity.
    pub fn new(capacity: usize) -> Self {
        Self { capacity, buf: Vec::with_capacity(capacity), line_buf: Vec::new() }
    }

    /// Returns the total packet capacity, in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns `true` if no lines are currently buffered.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns the currently buffered packet payload.
    pub fn payload(&self) -> &[u8] {
        &self.buf
    }

    /// Clears the buffered packet payload.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Formats `<prefix><stat>:<value><suffix>[|@<rate>]` into the line scratch buffer.
    ///
    /// The scratch buffer is reused across calls; the formatted line stays valid until the next
    /// call to this method.
    pub fn format_line(
        &mut self,
        prefix: &str,
        stat: &str,
        kind: MetricKind,
        value: i64,
        sample_rate: Option<f64>,
    ) {
        self.line_buf.clear();

        self.line_buf.extend_from_slice(prefix.as_bytes());
        self.line_buf.extend_from_slice(stat.as_bytes());
        self.line_buf.push(b':');

        // Gauge deltas always carry an explicit sign so the server applies
        // them as adjustments rather than absolute values.
        if matches!(kind, MetricKind::GaugeDelta) && value >= 0 {
            self.line_buf.push(b'+');
        }

        let mut int_writer = itoa::Buffer::new();
        self.line_buf.extend_from_slice(int_writer.format(value).as_bytes());
        self.line_buf.extend_from_slice(kind.suffix());

        // Write the sample rate if it's below 1.0, as that is the implied default.
        if let Some(rate) = sample_rate {
            let mut float_writer = ryu::Buffer::new();
            let rate_str = float_writer.format(rate);

            self.line_buf.extend_from_slice(b"|@");
            self.line_buf.extend_from_slice(rate_str.as_bytes());
        }
    }

    /// Returns the length of the most recently formatted line.
    pub fn line_len(&self) -> usize {
        self.line_buf.len()
    }

    /// Tries to place the most recently formatted line into the packet.
    ///
    /// A separating newline is written first when the packet already holds data, and counts
    /// against the remaining space. The fit checks compare the bare line length against the total
    /// capacity, so a line reported as [`Placement::NeedsFlush`] is guaranteed to append once the
    /// packet has been emptied.
    pub fn try_append_line(&mut self) -> Placement {
        if self.line_buf.len() > self.capacity {
            return Placement::Oversized;
        }

        let separator_len = usize::from(!self.buf.is_empty());
        if self.buf.len() + separator_len + self.line_buf.len() > self.capacity {
            return Placement::NeedsFlush;
        }

        if separator_len == 1 {
            self.buf.push(b'\n');
        }
        self.buf.extend_from_slice(&self.line_buf);

        Placement::Appended
    }
}
