//! Shared runtime state handed to every hub task.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};

use lm_control::ParticipantId;
use lm_media::{DatagramTx, MediaDirectory, MediaForwarder};
use lm_proto::message::Envelope;

use crate::config::Config;
use crate::outbound::{Class, OutboundHandle, PushOutcome};
use crate::owner::OwnerHandle;

/// Where a participant's reliable-channel traffic goes. Remote participants
/// own a connection writer; the local host (id 0) drains an in-process
/// channel instead.
#[derive(Clone)]
pub enum Sink {
    Conn(OutboundHandle),
    Console(mpsc::Sender<Envelope>),
}

impl Sink {
    pub fn close(&self) {
        if let Sink::Conn(h) = self {
            h.close();
        }
    }
}

/// Control-channel push hub: one sink per participant.
/// One writer per connection owns the socket; everyone else enqueues here.
#[derive(Default)]
pub struct PushHub {
    inner: DashMap<ParticipantId, Sink>,
}

impl PushHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: ParticipantId, sink: Sink) {
        self.inner.insert(id, sink);
    }

    pub fn unregister(&self, id: ParticipantId) -> Option<Sink> {
        self.inner.remove(&id).map(|(_, sink)| sink)
    }

    /// Deliver one already-encoded payload (or, for the console, the typed
    /// envelope). Returns the queue outcome so callers can react to a
    /// control-class overflow.
    pub fn send_encoded(
        &self,
        id: ParticipantId,
        class: Class,
        env: &Envelope,
        encoded: &Bytes,
    ) -> PushOutcome {
        match self.inner.get(&id).map(|e| e.value().clone()) {
            Some(Sink::Conn(handle)) => handle.push(class, encoded.clone()),
            Some(Sink::Console(tx)) => {
                // local host never backs up the hub; overflow just drops
                let _ = tx.try_send(env.clone());
                PushOutcome::Queued
            }
            None => PushOutcome::Closed,
        }
    }

    /// Encode and deliver a single message to one participant.
    pub fn send_to(&self, id: ParticipantId, class: Class, env: &Envelope) -> PushOutcome {
        match env.encode() {
            Ok(bytes) => self.send_encoded(id, class, env, &Bytes::from(bytes)),
            Err(_) => PushOutcome::Closed,
        }
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.inner.contains_key(&id)
    }
}

/// Shared UDP socket used for both receive and fan-out sends. A send that
/// would block is reported as `Ok(false)` and the datagram is dropped.
pub struct UdpTx(pub Arc<UdpSocket>);

impl DatagramTx for UdpTx {
    fn try_send(&self, to: SocketAddr, datagram: &[u8]) -> std::io::Result<bool> {
        match self.0.try_send_to(datagram, to) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        }
    }
}

pub struct HubShared {
    pub cfg: Config,
    pub owner: OwnerHandle,
    pub pushes: Arc<PushHub>,
    pub media_dir: Arc<MediaDirectory>,
    pub forwarder: Arc<MediaForwarder>,
    pub bind_ip: IpAddr,
    pub shutdown: watch::Receiver<bool>,
}

impl HubShared {
    /// Resolves when shutdown is signalled.
    pub async fn shutdown_signalled(&self) {
        let mut rx = self.shutdown.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}
