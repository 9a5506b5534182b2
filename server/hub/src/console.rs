//! In-process handle for the local host (participant 0).
//!
//! The host GUI is out of scope; this is the interface it would drive. Host
//! commands enter the same owner mailbox as wire traffic, tagged with id 0,
//! so moderation validation and event ordering are identical for local and
//! remote hosts. Server events addressed to the host arrive on `recv`.

use tokio::sync::mpsc;

use lm_control::ParticipantId;
use lm_proto::message::{Envelope, Message};

use crate::owner::OwnerHandle;

pub struct HostConsole {
    owner: OwnerHandle,
    events: mpsc::Receiver<Envelope>,
}

impl HostConsole {
    pub(crate) fn new(owner: OwnerHandle, events: mpsc::Receiver<Envelope>) -> Self {
        Self { owner, events }
    }

    /// Next server event addressed to the host (roster changes, chat, ...).
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.events.recv().await
    }

    async fn send(&self, msg: Message) {
        self.owner.inbound(ParticipantId::LOCAL_HOST, Envelope::now(msg)).await;
    }

    pub async fn chat(&self, text: impl Into<String>) {
        self.send(Message::Chat { text: text.into(), sender_id: None, sender_name: None }).await;
    }

    pub async fn force_mute(&self, target: u32) {
        self.send(Message::ForceMute { target_client: Some(target) }).await;
    }

    pub async fn force_mute_all(&self) {
        self.send(Message::ForceMuteAll).await;
    }

    pub async fn force_video_off(&self, target: u32) {
        self.send(Message::ForceVideoOff { target_client: Some(target) }).await;
    }

    pub async fn force_video_off_all(&self) {
        self.send(Message::ForceVideoOffAll).await;
    }

    pub async fn force_stop_presenting(&self) {
        self.send(Message::ForceStopPresenting { target_client: None }).await;
    }

    pub async fn kick(&self, target: u32) {
        self.send(Message::Kick { target }).await;
    }

    pub async fn set_permission(&self, target: u32, field: &str, value: bool) {
        self.send(Message::SetPermission { target, field: field.to_string(), value }).await;
    }

    pub async fn request_media(&self, target: u32, request_type: &str, message: &str) {
        self.send(Message::HostRequest {
            request_type: request_type.to_string(),
            message: message.to_string(),
            target_client: Some(target),
        })
        .await;
    }

    /// Re-index the spool directory and announce anything new.
    pub async fn rescan_spool(&self) {
        self.owner.rescan_spool(ParticipantId::LOCAL_HOST).await;
    }

    /// The host leaves; the oldest remaining participant is promoted.
    pub async fn logout(&self) {
        self.send(Message::Logout).await;
    }
}
