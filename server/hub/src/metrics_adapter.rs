//! Bridges the media crate's metrics seam onto the Prometheus impls.

use std::sync::Arc;

use lm_media::{MediaKind, MediaMetrics};
use lm_metrics::MediaMetricsImpl;

pub fn media_metrics() -> Arc<dyn MediaMetrics> {
    Arc::new(HubMediaMetrics { inner: MediaMetricsImpl::new("lm") })
}

struct HubMediaMetrics {
    inner: MediaMetricsImpl,
}

impl MediaMetrics for HubMediaMetrics {
    fn inc_rx(&self, kind: MediaKind, bytes: usize) {
        self.inner.rx(kind.as_str(), bytes);
    }
    fn inc_drop_invalid(&self, kind: MediaKind) {
        self.inner.drop_reason(kind.as_str(), "invalid");
    }
    fn inc_drop_unknown_sender(&self, kind: MediaKind) {
        self.inner.drop_reason(kind.as_str(), "unknown_sender");
    }
    fn inc_drop_not_permitted(&self, kind: MediaKind) {
        self.inner.drop_reason(kind.as_str(), "not_permitted");
    }
    fn inc_drop_rate_limited(&self, kind: MediaKind) {
        self.inner.drop_reason(kind.as_str(), "rate_limited");
    }
    fn inc_drop_would_block(&self, kind: MediaKind) {
        self.inner.drop_reason(kind.as_str(), "send_would_block");
    }
    fn inc_forwarded(&self, kind: MediaKind, fanout: usize) {
        self.inner.forwarded(kind.as_str(), fanout);
    }
}
