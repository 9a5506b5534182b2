use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, trace};

use lm_proto::datagram::{AudioHeader, VideoHeader, MAX_DATAGRAM_BYTES};

use crate::directory::{MediaDirectory, PeerId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }
}

/// Datagram output seam. `Ok(false)` means the send would have blocked and
/// the datagram was dropped; real-time media is never queued.
pub trait DatagramTx: Send + Sync {
    fn try_send(&self, to: SocketAddr, datagram: &[u8]) -> std::io::Result<bool>;
}

/// Metrics hook; wire to Prometheus or leave as [`NoopMetrics`].
pub trait MediaMetrics: Send + Sync {
    fn inc_rx(&self, kind: MediaKind, bytes: usize);
    fn inc_drop_invalid(&self, kind: MediaKind);
    fn inc_drop_unknown_sender(&self, kind: MediaKind);
    fn inc_drop_not_permitted(&self, kind: MediaKind);
    fn inc_drop_rate_limited(&self, kind: MediaKind);
    fn inc_drop_would_block(&self, kind: MediaKind);
    fn inc_forwarded(&self, kind: MediaKind, fanout: usize);
}

pub struct NoopMetrics;

impl MediaMetrics for NoopMetrics {
    fn inc_rx(&self, _kind: MediaKind, _bytes: usize) {}
    fn inc_drop_invalid(&self, _kind: MediaKind) {}
    fn inc_drop_unknown_sender(&self, _kind: MediaKind) {}
    fn inc_drop_not_permitted(&self, _kind: MediaKind) {}
    fn inc_drop_rate_limited(&self, _kind: MediaKind) {}
    fn inc_drop_would_block(&self, _kind: MediaKind) {}
    fn inc_forwarded(&self, _kind: MediaKind, _fanout: usize) {}
}

#[derive(Clone, Debug)]
pub struct MediaForwarderConfig {
    /// Maximum size of an incoming datagram.
    pub max_datagram_bytes: usize,
    /// Per-sender packets-per-second soft limit (per media kind).
    pub sender_pps_limit: u32,
    /// Per-sender bytes-per-second soft limit (per media kind).
    pub sender_bps_limit: u32,
}

impl Default for MediaForwarderConfig {
    fn default() -> Self {
        Self {
            max_datagram_bytes: MAX_DATAGRAM_BYTES,
            sender_pps_limit: 400,
            sender_bps_limit: 4 * 1024 * 1024,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct RateWindow {
    started: Instant,
    packets: u32,
    bytes: u64,
}

pub struct MediaForwarder {
    cfg: MediaForwarderConfig,
    directory: Arc<MediaDirectory>,
    metrics: Arc<dyn MediaMetrics>,
    rate: DashMap<(PeerId, MediaKind), RateWindow>,
}

impl MediaForwarder {
    pub fn new(
        cfg: MediaForwarderConfig,
        directory: Arc<MediaDirectory>,
        metrics: Arc<dyn MediaMetrics>,
    ) -> Self {
        Self { cfg, directory, metrics, rate: DashMap::new() }
    }

    pub fn directory(&self) -> &Arc<MediaDirectory> {
        &self.directory
    }

    /// Handle one datagram from `src`. Every failure mode is a silent,
    /// counted drop; the datagram path never errors out of the receive loop.
    pub fn handle(&self, kind: MediaKind, tx: &dyn DatagramTx, src: SocketAddr, datagram: &[u8]) {
        self.metrics.inc_rx(kind, datagram.len());

        if datagram.len() > self.cfg.max_datagram_bytes {
            self.metrics.inc_drop_invalid(kind);
            return;
        }

        let sender = match kind {
            MediaKind::Video => match VideoHeader::parse(datagram) {
                Ok(h) => PeerId(h.client_id),
                Err(e) => {
                    trace!(%src, "invalid video datagram: {e}");
                    self.metrics.inc_drop_invalid(kind);
                    return;
                }
            },
            MediaKind::Audio => match AudioHeader::parse(datagram) {
                Ok(h) => PeerId(h.client_id),
                Err(e) => {
                    trace!(%src, "invalid audio datagram: {e}");
                    self.metrics.inc_drop_invalid(kind);
                    return;
                }
            },
        };

        // Unknown ids are discarded before any state is touched.
        let Some(policy) = self.directory.policy(sender) else {
            self.metrics.inc_drop_unknown_sender(kind);
            return;
        };

        // The endpoint is learned even from packets that policy then drops,
        // so a muted participant still receives the streams of others.
        self.directory.learn_addr(sender, kind, src);

        let permitted = match kind {
            MediaKind::Video => policy.may_video && policy.video_on,
            MediaKind::Audio => policy.may_audio && policy.audio_on,
        };
        if !permitted {
            self.metrics.inc_drop_not_permitted(kind);
            return;
        }

        if self.rate_limited(sender, kind, datagram.len()) {
            self.metrics.inc_drop_rate_limited(kind);
            return;
        }

        let mut fanout = 0usize;
        for (peer, addr) in self.directory.recipients(sender, kind) {
            match tx.try_send(addr, datagram) {
                Ok(true) => fanout += 1,
                Ok(false) => self.metrics.inc_drop_would_block(kind),
                Err(e) => {
                    debug!(%peer, %addr, "datagram send failed: {e}");
                    self.metrics.inc_drop_would_block(kind);
                }
            }
        }
        self.metrics.inc_forwarded(kind, fanout);
    }

    pub fn forget(&self, peer: PeerId) {
        self.rate.remove(&(peer, MediaKind::Video));
        self.rate.remove(&(peer, MediaKind::Audio));
    }

    fn rate_limited(&self, sender: PeerId, kind: MediaKind, len: usize) -> bool {
        let mut win = self
            .rate
            .entry((sender, kind))
            .or_insert_with(|| RateWindow { started: Instant::now(), packets: 0, bytes: 0 });
        if win.started.elapsed() >= Duration::from_secs(1) {
            win.started = Instant::now();
            win.packets = 0;
            win.bytes = 0;
        }
        win.packets += 1;
        win.bytes += len as u64;
        win.packets > self.cfg.sender_pps_limit || win.bytes > self.cfg.sender_bps_limit as u64
    }
}
