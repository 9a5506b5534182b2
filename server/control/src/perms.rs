use serde::{Deserialize, Serialize};

/// Host-mutable per-participant permissions. All granted by default.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub may_video: bool,
    pub may_audio: bool,
    pub may_screen_share: bool,
    pub may_chat: bool,
    pub may_upload: bool,
    pub may_download: bool,
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            may_video: true,
            may_audio: true,
            may_screen_share: true,
            may_chat: true,
            may_upload: true,
            may_download: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PermissionField {
    Video,
    Audio,
    ScreenShare,
    Chat,
    Upload,
    Download,
}

impl PermissionField {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionField::Video => "may_video",
            PermissionField::Audio => "may_audio",
            PermissionField::ScreenShare => "may_screen_share",
            PermissionField::Chat => "may_chat",
            PermissionField::Upload => "may_upload",
            PermissionField::Download => "may_download",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "may_video" => PermissionField::Video,
            "may_audio" => PermissionField::Audio,
            "may_screen_share" => PermissionField::ScreenShare,
            "may_chat" => PermissionField::Chat,
            "may_upload" => PermissionField::Upload,
            "may_download" => PermissionField::Download,
            _ => return None,
        })
    }
}

impl Permissions {
    pub fn get(&self, field: PermissionField) -> bool {
        match field {
            PermissionField::Video => self.may_video,
            PermissionField::Audio => self.may_audio,
            PermissionField::ScreenShare => self.may_screen_share,
            PermissionField::Chat => self.may_chat,
            PermissionField::Upload => self.may_upload,
            PermissionField::Download => self.may_download,
        }
    }

    pub fn set(&mut self, field: PermissionField, value: bool) {
        match field {
            PermissionField::Video => self.may_video = value,
            PermissionField::Audio => self.may_audio = value,
            PermissionField::ScreenShare => self.may_screen_share = value,
            PermissionField::Chat => self.may_chat = value,
            PermissionField::Upload => self.may_upload = value,
            PermissionField::Download => self.may_download = value,
        }
    }
}
