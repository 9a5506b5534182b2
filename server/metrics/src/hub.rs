use metrics::{counter, gauge};

/// Metric names under: `{ns}_hub_*`.
pub struct HubMetrics {
    ns: &'static str,
}

impl HubMetrics {
    pub fn new(namespace: &'static str) -> Self {
        Self { ns: namespace }
    }

    #[inline]
    pub fn participants(&self, n: usize) {
        gauge!(format!("{}_hub_participants", self.ns)).set(n as f64);
    }

    #[inline]
    pub fn frames_out(&self, class: &'static str) {
        counter!(format!("{}_hub_frames_out_total", self.ns), "class" => class).increment(1);
    }

    #[inline]
    pub fn queue_drop(&self, class: &'static str) {
        counter!(format!("{}_hub_queue_drops_total", self.ns), "class" => class).increment(1);
    }

    #[inline]
    pub fn evicted(&self, reason: &'static str) {
        counter!(format!("{}_hub_evictions_total", self.ns), "reason" => reason).increment(1);
    }

    #[inline]
    pub fn file_transfer(&self, direction: &'static str, outcome: &'static str) {
        counter!(
            format!("{}_hub_file_transfers_total", self.ns),
            "direction" => direction,
            "outcome" => outcome
        )
        .increment(1);
    }
}
