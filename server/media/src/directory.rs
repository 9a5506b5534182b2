//! Fast-path view of who may send and where to deliver.
//!
//! Source of truth for policy is the control plane; the hub pushes updates
//! here on admit/remove/moderation. Endpoints are learned on the datagram
//! path itself.

use std::net::SocketAddr;

use dashmap::DashMap;

use crate::forwarder::MediaKind;

/// Media-plane participant id; mirrors the registry's small integer ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PeerId(pub u32);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Policy bits the forwarder checks per datagram.
#[derive(Clone, Copy, Debug, Default)]
pub struct PeerPolicy {
    pub may_video: bool,
    pub may_audio: bool,
    pub video_on: bool,
    pub audio_on: bool,
}

#[derive(Clone, Copy, Debug, Default)]
struct PeerState {
    policy: PeerPolicy,
    video_addr: Option<SocketAddr>,
    audio_addr: Option<SocketAddr>,
}

#[derive(Default)]
pub struct MediaDirectory {
    peers: DashMap<PeerId, PeerState>,
}

impl MediaDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, peer: PeerId, policy: PeerPolicy) {
        self.peers.insert(peer, PeerState { policy, ..Default::default() });
    }

    pub fn remove(&self, peer: PeerId) {
        self.peers.remove(&peer);
    }

    pub fn contains(&self, peer: PeerId) -> bool {
        self.peers.contains_key(&peer)
    }

    pub fn set_policy(&self, peer: PeerId, policy: PeerPolicy) {
        if let Some(mut st) = self.peers.get_mut(&peer) {
            st.policy = policy;
        }
    }

    pub fn policy(&self, peer: PeerId) -> Option<PeerPolicy> {
        self.peers.get(&peer).map(|st| st.policy)
    }

    /// Record the endpoint a datagram arrived from. Returns `false` for
    /// unknown peers; a changed endpoint (LAN rebind) simply replaces the old
    /// one.
    pub fn learn_addr(&self, peer: PeerId, kind: MediaKind, addr: SocketAddr) -> bool {
        match self.peers.get_mut(&peer) {
            Some(mut st) => {
                let slot = match kind {
                    MediaKind::Video => &mut st.video_addr,
                    MediaKind::Audio => &mut st.audio_addr,
                };
                if *slot != Some(addr) {
                    tracing::debug!(%peer, ?kind, %addr, "media endpoint learned");
                    *slot = Some(addr);
                }
                true
            }
            None => false,
        }
    }

    pub fn addr(&self, peer: PeerId, kind: MediaKind) -> Option<SocketAddr> {
        self.peers.get(&peer).and_then(|st| match kind {
            MediaKind::Video => st.video_addr,
            MediaKind::Audio => st.audio_addr,
        })
    }

    /// Everyone except `sender` with a learned endpoint for `kind`.
    pub fn recipients(&self, sender: PeerId, kind: MediaKind) -> Vec<(PeerId, SocketAddr)> {
        self.peers
            .iter()
            .filter(|e| *e.key() != sender)
            .filter_map(|e| {
                let addr = match kind {
                    MediaKind::Video => e.value().video_addr,
                    MediaKind::Audio => e.value().audio_addr,
                }?;
                Some((*e.key(), addr))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
