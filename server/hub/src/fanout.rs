//! Translate control-plane events into wire messages and recipient sets,
//! then push them into per-participant queues.
//!
//! Called only from the registry owner, so dependent broadcasts go out in
//! the causal order the mutations occurred.

use bytes::Bytes;

use lm_control::{
    ChatEntry, ControlEvent, FileEntry, ForcedAction, Participant, ParticipantId, Registry,
};
use lm_metrics::HubMetrics;
use lm_proto::message::{ChatRecord, Envelope, FileRecord, Message, ParticipantRecord};

use crate::outbound::{Class, PushOutcome};
use crate::state::PushHub;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecipientSet {
    All,
    AllExcept(ParticipantId),
    Only(ParticipantId),
}

pub fn participant_record(p: &Participant) -> ParticipantRecord {
    ParticipantRecord {
        id: p.id.0,
        name: p.name.clone(),
        is_host: p.is_host(),
        video_on: p.media.video_on,
        audio_on: p.media.audio_on,
        is_presenter: p.media.is_presenter,
    }
}

pub fn chat_record(entry: &ChatEntry) -> ChatRecord {
    ChatRecord {
        sender_id: entry.sender_id.0,
        sender_name: entry.sender_name.clone(),
        text: entry.text.clone(),
        timestamp: entry.at,
    }
}

pub fn file_record(entry: &FileEntry) -> FileRecord {
    FileRecord {
        fid: entry.fid.clone(),
        filename: entry.filename.clone(),
        size: entry.size_bytes,
        uploader: entry.uploader_name.clone(),
    }
}

fn forced_message(action: ForcedAction) -> Message {
    match action {
        ForcedAction::Mute => Message::ForceMute { target_client: None },
        ForcedAction::VideoOff => Message::ForceVideoOff { target_client: None },
        ForcedAction::StopPresenting => Message::ForceStopPresenting { target_client: None },
        ForcedAction::StopScreenShare => Message::ForceStopScreenSharing { target_client: None },
    }
}

/// Map one event to the wire messages it produces.
///
/// Class picks the overflow policy: direct notifications ride the never-drop
/// control queue, broadcast mirrors ride the droppable chat-class queue.
pub fn translate(ev: &ControlEvent) -> Vec<(RecipientSet, Class, Envelope)> {
    match ev {
        ControlEvent::UserJoined { id, name } => vec![(
            RecipientSet::All,
            Class::Chat,
            Envelope::now(Message::UserJoined { id: id.0, name: name.clone() }),
        )],
        ControlEvent::UserLeft { id, reason } => vec![(
            RecipientSet::All,
            Class::Chat,
            Envelope::now(Message::UserLeft {
                id: id.0,
                reason: reason.wire_reason().map(str::to_string),
            }),
        )],
        ControlEvent::HostChanged { id } => vec![(
            RecipientSet::All,
            Class::Chat,
            Envelope::now(Message::HostChanged { host_id: id.0 }),
        )],
        ControlEvent::ChatPosted { entry } => vec![(
            RecipientSet::AllExcept(entry.sender_id),
            Class::Chat,
            Envelope::now(Message::Chat {
                text: entry.text.clone(),
                sender_id: Some(entry.sender_id.0),
                sender_name: Some(entry.sender_name.clone()),
            }),
        )],
        ControlEvent::MediaStateChanged { id, video_on, audio_on } => vec![(
            RecipientSet::All,
            Class::Chat,
            Envelope::now(Message::MediaState {
                video_on: *video_on,
                audio_on: *audio_on,
                id: Some(id.0),
            }),
        )],
        ControlEvent::PresenterGranted { id } => vec![(
            RecipientSet::Only(*id),
            Class::Control,
            Envelope::now(Message::PresenterGranted),
        )],
        ControlEvent::PresenterDenied { id, reason } => vec![(
            RecipientSet::Only(*id),
            Class::Control,
            Envelope::now(Message::PresenterDenied { reason: reason.to_string() }),
        )],
        ControlEvent::PresenterChanged { id } => vec![(
            RecipientSet::All,
            Class::Chat,
            Envelope::now(Message::PresenterChanged { presenter_id: id.map(|i| i.0) }),
        )],
        ControlEvent::Forced { target, action } => vec![(
            RecipientSet::Only(*target),
            Class::Control,
            Envelope::now(forced_message(*action)),
        )],
        ControlEvent::PermissionChanged { target, field, value } => vec![(
            RecipientSet::Only(*target),
            Class::Control,
            Envelope::now(Message::SetPermission {
                target: target.0,
                field: field.as_str().to_string(),
                value: *value,
            }),
        )],
        ControlEvent::HostPrompt { target, request_type, message } => vec![(
            RecipientSet::Only(*target),
            Class::Control,
            Envelope::now(Message::HostRequest {
                request_type: request_type.clone(),
                message: message.clone(),
                target_client: None,
            }),
        )],
        ControlEvent::FileAvailable { entry } => vec![(
            RecipientSet::All,
            Class::Chat,
            Envelope::now(Message::FileAvailable {
                fid: entry.fid.clone(),
                filename: entry.filename.clone(),
                size: entry.size_bytes,
                uploader: entry.uploader_name.clone(),
            }),
        )],
    }
}

/// Push one message to every resolved recipient. The payload is encoded once
/// and shared. Returns recipients whose control queue overflowed; the owner
/// evicts them.
pub fn deliver(
    reg: &Registry,
    pushes: &PushHub,
    metrics: &HubMetrics,
    set: RecipientSet,
    class: Class,
    env: &Envelope,
) -> Vec<ParticipantId> {
    let encoded = match env.encode() {
        Ok(b) => Bytes::from(b),
        Err(e) => {
            tracing::error!("unencodable outbound message: {e}");
            return Vec::new();
        }
    };

    let mut unhealthy = Vec::new();
    for p in reg.iter() {
        let included = match set {
            RecipientSet::All => true,
            RecipientSet::AllExcept(excluded) => p.id != excluded,
            RecipientSet::Only(only) => p.id == only,
        };
        if !included {
            continue;
        }
        match pushes.send_encoded(p.id, class, env, &encoded) {
            PushOutcome::Queued => metrics.frames_out(class.as_str()),
            PushOutcome::Replaced => metrics.queue_drop("screen"),
            PushOutcome::DroppedOldest(n) => {
                for _ in 0..n {
                    metrics.queue_drop("chat");
                }
                metrics.frames_out(class.as_str());
            }
            PushOutcome::Overflow => unhealthy.push(p.id),
            PushOutcome::Closed => {}
        }
    }
    unhealthy
}
