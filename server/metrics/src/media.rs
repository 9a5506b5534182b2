use metrics::{counter, histogram};

/// Metric names under: `{ns}_media_*`.
pub struct MediaMetricsImpl {
    ns: &'static str,
}

impl MediaMetricsImpl {
    pub fn new(namespace: &'static str) -> Self {
        Self { ns: namespace }
    }

    #[inline]
    pub fn rx(&self, kind: &'static str, bytes: usize) {
        counter!(format!("{}_media_rx_packets_total", self.ns), "kind" => kind).increment(1);
        counter!(format!("{}_media_rx_bytes_total", self.ns), "kind" => kind)
            .increment(bytes as u64);
    }

    #[inline]
    pub fn forwarded(&self, kind: &'static str, fanout: usize) {
        counter!(format!("{}_media_forwarded_total", self.ns), "kind" => kind).increment(1);
        histogram!(format!("{}_media_fanout", self.ns), "kind" => kind).record(fanout as f64);
    }

    #[inline]
    pub fn drop_reason(&self, kind: &'static str, reason: &'static str) {
        counter!(
            format!("{}_media_drops_total", self.ns),
            "kind" => kind,
            "reason" => reason
        )
        .increment(1);
    }
}
