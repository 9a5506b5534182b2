//! Control-channel message catalog.
//!
//! Every record on the wire is a JSON object with a `type` tag and a
//! `timestamp` (RFC 3339). Unknown tags are surfaced as [`Decoded::Unknown`]
//! so the caller can log and move on instead of dropping the connection.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{WireError, WireResult};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub msg: Message,
}

impl Envelope {
    /// Wrap a message with the server's authoritative clock.
    pub fn now(msg: Message) -> Self {
        Self { timestamp: Utc::now(), msg }
    }

    pub fn encode(&self) -> WireResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| WireError::Malformed(e.to_string()))
    }
}

/// Roster entry carried in `login_success` and `user_joined`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub id: u32,
    pub name: String,
    pub is_host: bool,
    pub video_on: bool,
    pub audio_on: bool,
    pub is_presenter: bool,
}

/// Chat entry carried in `login_success.chat_history`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatRecord {
    pub sender_id: u32,
    pub sender_name: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Shared-file entry carried in `login_success` / `files_list_update`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileRecord {
    pub fid: String,
    pub filename: String,
    pub size: u64,
    pub uploader: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    // -- session lifecycle ---------------------------------------------------
    Login {
        name: String,
    },
    LoginSuccess {
        client_id: u32,
        participants: Vec<ParticipantRecord>,
        chat_history: Vec<ChatRecord>,
        shared_files: BTreeMap<String, FileRecord>,
        host_id: u32,
    },
    LoginError {
        reason: String,
    },
    Logout,
    Heartbeat,
    UserJoined {
        id: u32,
        name: String,
    },
    UserLeft {
        id: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    HostChanged {
        host_id: u32,
    },

    // -- chat & media state --------------------------------------------------
    Chat {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_id: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_name: Option<String>,
    },
    MediaState {
        video_on: bool,
        audio_on: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u32>,
    },

    // -- presenter arbitration -----------------------------------------------
    RequestPresenter,
    PresenterGranted,
    PresenterDenied {
        reason: String,
    },
    PresenterChanged {
        presenter_id: Option<u32>,
    },
    ScreenFrame {
        #[serde(with = "b64")]
        frame_data: Vec<u8>,
    },

    // -- moderation ----------------------------------------------------------
    ForceMute {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_client: Option<u32>,
    },
    ForceVideoOff {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_client: Option<u32>,
    },
    ForceStopPresenting {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_client: Option<u32>,
    },
    ForceStopScreenSharing {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_client: Option<u32>,
    },
    ForceMuteAll,
    ForceVideoOffAll,
    HostRequest {
        request_type: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_client: Option<u32>,
    },
    SetPermission {
        target: u32,
        field: String,
        value: bool,
    },
    Kick {
        target: u32,
    },
    PermissionError {
        message: String,
    },

    // -- file exchange -------------------------------------------------------
    FileOffer {
        fid: String,
        filename: String,
        size: u64,
    },
    FileUploadPort {
        fid: String,
        port: u16,
    },
    FileAvailable {
        fid: String,
        filename: String,
        size: u64,
        uploader: String,
    },
    FileRequest {
        fid: String,
    },
    FileDownloadPort {
        fid: String,
        port: u16,
        size: u64,
    },
    FileError {
        fid: String,
        reason: String,
    },
    GetFilesList,
    FilesListUpdate {
        shared_files: BTreeMap<String, FileRecord>,
    },

    // -- shutdown ------------------------------------------------------------
    ServerShutdown,
}

/// Result of decoding one control-channel payload.
#[derive(Clone, Debug)]
pub enum Decoded {
    Known(Envelope),
    /// Well-formed record with a tag this build does not understand.
    Unknown(String),
}

/// Decode a control-channel payload.
///
/// Malformed JSON, a missing `type`, or bad fields on a known tag are hard
/// errors; an unrecognized tag is not.
pub fn decode(payload: &[u8]) -> WireResult<Decoded> {
    let value: serde_json::Value =
        serde_json::from_slice(payload).map_err(|e| WireError::Malformed(e.to_string()))?;
    let tag = value
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or(WireError::MissingType)?
        .to_string();

    if !is_known_type(&tag) {
        return Ok(Decoded::Unknown(tag));
    }

    serde_json::from_value::<Envelope>(value)
        .map(Decoded::Known)
        .map_err(|e| WireError::Malformed(format!("{tag}: {e}")))
}

fn is_known_type(tag: &str) -> bool {
    matches!(
        tag,
        "login"
            | "login_success"
            | "login_error"
            | "logout"
            | "heartbeat"
            | "user_joined"
            | "user_left"
            | "host_changed"
            | "chat"
            | "media_state"
            | "request_presenter"
            | "presenter_granted"
            | "presenter_denied"
            | "presenter_changed"
            | "screen_frame"
            | "force_mute"
            | "force_video_off"
            | "force_stop_presenting"
            | "force_stop_screen_sharing"
            | "force_mute_all"
            | "force_video_off_all"
            | "host_request"
            | "set_permission"
            | "kick"
            | "permission_error"
            | "file_offer"
            | "file_upload_port"
            | "file_available"
            | "file_request"
            | "file_download_port"
            | "file_error"
            | "get_files_list"
            | "files_list_update"
            | "server_shutdown"
    )
}

mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}
