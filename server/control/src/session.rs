//! Per-session shared state: chat log, shared-file index, spool scanner.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::errors::{ControlError, ControlResult};
use crate::events::ControlEvent;
use crate::ids::ParticipantId;
use crate::registry::Registry;

/// Upper bound on a chat message body, in bytes.
pub const MAX_CHAT_BYTES: usize = 4 * 1024;
const MAX_FILENAME_BYTES: usize = 255;
const MAX_FID_BYTES: usize = 128;

#[derive(Clone, Debug)]
pub struct ChatEntry {
    pub sender_id: ParticipantId,
    pub sender_name: String,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Ring buffer of the last K chat messages; older entries drop head-first.
pub struct ChatLog {
    ring: VecDeque<ChatEntry>,
    cap: usize,
}

impl ChatLog {
    pub fn new(cap: usize) -> Self {
        Self { ring: VecDeque::with_capacity(cap.min(1024)), cap }
    }

    pub fn push(&mut self, entry: ChatEntry) {
        while self.ring.len() >= self.cap {
            self.ring.pop_front();
        }
        self.ring.push_back(entry);
    }

    pub fn snapshot(&self) -> Vec<ChatEntry> {
        self.ring.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Uploader {
    Participant(ParticipantId),
    Manual,
}

#[derive(Clone, Debug)]
pub struct FileEntry {
    pub fid: String,
    pub filename: String,
    pub size_bytes: u64,
    pub uploader_name: String,
    pub uploader: Uploader,
    /// File name inside the spool directory (namespaced by fid).
    pub spool_name: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Strip any path components and reject names that cannot live in the spool.
pub fn sanitize_filename(raw: &str) -> ControlResult<String> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if base.is_empty() || base == "." || base == ".." {
        return Err(ControlError::InvalidArgument("invalid filename"));
    }
    if base.starts_with('.') {
        return Err(ControlError::InvalidArgument("hidden filenames not allowed"));
    }
    if base.len() > MAX_FILENAME_BYTES {
        return Err(ControlError::InvalidArgument("filename too long"));
    }
    if base.chars().any(|c| c.is_control()) {
        return Err(ControlError::InvalidArgument("invalid filename"));
    }
    Ok(base.to_string())
}

/// Fids become part of a spool path, so the alphabet is tight.
pub fn validate_fid(fid: &str) -> ControlResult<()> {
    if fid.is_empty() || fid.len() > MAX_FID_BYTES {
        return Err(ControlError::InvalidArgument("invalid fid"));
    }
    if !fid.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')) {
        return Err(ControlError::InvalidArgument("invalid fid"));
    }
    if fid.starts_with('.') {
        return Err(ControlError::InvalidArgument("invalid fid"));
    }
    Ok(())
}

/// A validated upload the mediator may start streaming.
#[derive(Clone, Debug)]
pub struct AcceptedOffer {
    pub fid: String,
    pub filename: String,
    pub size: u64,
    pub spool_path: PathBuf,
}

pub struct SessionState {
    pub chat: ChatLog,
    files: BTreeMap<String, FileEntry>,
    /// Offers accepted but not yet completed; reserves the fid.
    pending_uploads: BTreeSet<String>,
    spool_dir: PathBuf,
    next_manual: u64,
}

impl SessionState {
    pub fn new(spool_dir: PathBuf, chat_cap: usize) -> Self {
        Self {
            chat: ChatLog::new(chat_cap),
            files: BTreeMap::new(),
            pending_uploads: BTreeSet::new(),
            spool_dir,
            next_manual: 0,
        }
    }

    pub fn spool_dir(&self) -> &Path {
        &self.spool_dir
    }

    // -- chat ----------------------------------------------------------------

    /// Validate and log a chat message. Rejections surface as typed errors;
    /// a chat is never silently discarded.
    pub fn post_chat(
        &mut self,
        reg: &Registry,
        sender: ParticipantId,
        text: &str,
    ) -> ControlResult<Vec<ControlEvent>> {
        let p = reg.lookup(sender).ok_or(ControlError::NotFound("participant"))?;
        if !p.perms.may_chat {
            return Err(ControlError::PermissionDenied("chat disabled"));
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(ControlError::InvalidArgument("message empty"));
        }
        if text.len() > MAX_CHAT_BYTES {
            return Err(ControlError::InvalidArgument("message too long"));
        }

        let entry = ChatEntry {
            sender_id: sender,
            sender_name: p.name.clone(),
            text: text.to_string(),
            at: Utc::now(),
        };
        self.chat.push(entry.clone());
        Ok(vec![ControlEvent::ChatPosted { entry }])
    }

    // -- shared files --------------------------------------------------------

    pub fn file(&self, fid: &str) -> Option<&FileEntry> {
        self.files.get(fid)
    }

    pub fn files_snapshot(&self) -> Vec<FileEntry> {
        self.files.values().cloned().collect()
    }

    /// Validate a `file_offer` and reserve its fid. The caller streams the
    /// bytes and then calls [`complete_upload`](Self::complete_upload) or
    /// [`abort_upload`](Self::abort_upload).
    pub fn accept_offer(
        &mut self,
        reg: &Registry,
        uploader: ParticipantId,
        fid: &str,
        filename: &str,
        size: u64,
        max_file_size: u64,
    ) -> ControlResult<AcceptedOffer> {
        let p = reg.lookup(uploader).ok_or(ControlError::NotFound("participant"))?;
        if !p.perms.may_upload {
            return Err(ControlError::PermissionDenied("upload disabled"));
        }
        if size > max_file_size {
            return Err(ControlError::InvalidArgument("file too large"));
        }
        validate_fid(fid)?;
        let filename = sanitize_filename(filename)?;
        if self.files.contains_key(fid) || self.pending_uploads.contains(fid) {
            return Err(ControlError::AlreadyExists("fid"));
        }

        self.pending_uploads.insert(fid.to_string());
        let spool_name = format!("{fid}_{filename}");
        Ok(AcceptedOffer {
            fid: fid.to_string(),
            filename,
            size,
            spool_path: self.spool_dir.join(spool_name),
        })
    }

    /// Register a finished upload and announce it.
    pub fn complete_upload(
        &mut self,
        reg: &Registry,
        uploader: ParticipantId,
        offer: &AcceptedOffer,
    ) -> ControlResult<Vec<ControlEvent>> {
        self.pending_uploads.remove(&offer.fid);
        if self.files.contains_key(&offer.fid) {
            return Err(ControlError::AlreadyExists("fid"));
        }
        // The uploader may have left mid-transfer; the file is still shared.
        let uploader_name = reg
            .lookup(uploader)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| format!("participant {uploader}"));

        let entry = FileEntry {
            fid: offer.fid.clone(),
            filename: offer.filename.clone(),
            size_bytes: offer.size,
            uploader_name,
            uploader: Uploader::Participant(uploader),
            spool_name: format!("{}_{}", offer.fid, offer.filename),
            uploaded_at: Utc::now(),
        };
        self.files.insert(entry.fid.clone(), entry.clone());
        Ok(vec![ControlEvent::FileAvailable { entry }])
    }

    pub fn abort_upload(&mut self, fid: &str) {
        self.pending_uploads.remove(fid);
    }

    /// Check a `file_request` against permissions and the index.
    pub fn accept_request(
        &self,
        reg: &Registry,
        requester: ParticipantId,
        fid: &str,
    ) -> ControlResult<(PathBuf, u64)> {
        let p = reg.lookup(requester).ok_or(ControlError::NotFound("participant"))?;
        if !p.perms.may_download {
            return Err(ControlError::PermissionDenied("download disabled"));
        }
        let entry = self.files.get(fid).ok_or(ControlError::NotFound("file"))?;
        Ok((self.spool_dir.join(&entry.spool_name), entry.size_bytes))
    }

    // -- manual spool scan ---------------------------------------------------

    /// Enumerate the spool and index regular files the session does not know
    /// yet as `manual_*` entries. Previous manual entries are refreshed away;
    /// uploaded entries are kept. Symlinks, hidden files and directories are
    /// skipped.
    pub fn scan_spool(&mut self) -> std::io::Result<Vec<ControlEvent>> {
        self.files.retain(|_, e| e.uploader != Uploader::Manual);
        let known: BTreeSet<String> =
            self.files.values().map(|e| e.spool_name.clone()).collect();

        let mut events = Vec::new();
        for dirent in std::fs::read_dir(&self.spool_dir)? {
            let dirent = match dirent {
                Ok(d) => d,
                Err(e) => {
                    warn!("spool entry unreadable: {e}");
                    continue;
                }
            };
            let name = match dirent.file_name().into_string() {
                Ok(n) => n,
                Err(_) => continue,
            };
            if name.starts_with('.') || known.contains(&name) {
                continue;
            }
            // symlink_metadata so links never pass as regular files
            let meta = match std::fs::symlink_metadata(dirent.path()) {
                Ok(m) => m,
                Err(e) => {
                    warn!(%name, "spool stat failed: {e}");
                    continue;
                }
            };
            if !meta.is_file() {
                continue;
            }

            self.next_manual += 1;
            let fid = format!("manual_{}_{}", self.next_manual, name);
            debug!(%fid, "indexed spool file");
            let entry = FileEntry {
                fid: fid.clone(),
                filename: name.clone(),
                size_bytes: meta.len(),
                uploader_name: "manual".to_string(),
                uploader: Uploader::Manual,
                spool_name: name,
                uploaded_at: Utc::now(),
            };
            self.files.insert(fid, entry.clone());
            events.push(ControlEvent::FileAvailable { entry });
        }
        Ok(events)
    }
}
