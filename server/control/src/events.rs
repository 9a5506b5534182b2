use crate::ids::ParticipantId;
use crate::perms::PermissionField;
use crate::session::{ChatEntry, FileEntry};

/// Why a participant left the session. Carried on `user_left`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeaveReason {
    Logout,
    Timeout,
    Kicked,
    /// Evicted for an unhealthy connection (write stall, queue overflow).
    Error,
}

impl LeaveReason {
    /// Wire representation; a plain logout carries no reason.
    pub fn wire_reason(&self) -> Option<&'static str> {
        match self {
            LeaveReason::Logout => None,
            LeaveReason::Timeout => Some("timeout"),
            LeaveReason::Kicked => Some("kicked"),
            LeaveReason::Error => Some("error"),
        }
    }
}

/// A forced state change pushed to the affected participant so its client can
/// stop the local capture, in addition to the broadcast state delta.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForcedAction {
    Mute,
    VideoOff,
    StopPresenting,
    StopScreenShare,
}

/// Domain events produced by control-plane mutations, in causal order.
/// The hub translates these into wire messages and recipient sets.
#[derive(Clone, Debug)]
pub enum ControlEvent {
    UserJoined { id: ParticipantId, name: String },
    UserLeft { id: ParticipantId, reason: LeaveReason },
    HostChanged { id: ParticipantId },
    ChatPosted { entry: ChatEntry },
    MediaStateChanged { id: ParticipantId, video_on: bool, audio_on: bool },
    PresenterGranted { id: ParticipantId },
    PresenterDenied { id: ParticipantId, reason: &'static str },
    PresenterChanged { id: Option<ParticipantId> },
    Forced { target: ParticipantId, action: ForcedAction },
    PermissionChanged { target: ParticipantId, field: PermissionField, value: bool },
    HostPrompt { target: ParticipantId, request_type: String, message: String },
    FileAvailable { entry: FileEntry },
}
