//! The registry owner task.
//!
//! All registry, session-state and presenter mutations flow through this one
//! task as messages; replies ride oneshot channels. Applying one mutation at
//! a time keeps dependent broadcasts in causal order and makes the
//! single-presenter and single-host invariants race-free. The owner never
//! performs blocking I/O: enqueueing to participant queues is non-blocking
//! by construction.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use lm_control::{
    session::AcceptedOffer, ControlError, ControlEvent, ControlResult, LeaveReason, Moderation,
    ParticipantId, PermissionField, Registry, SessionState,
};
use lm_media::{MediaDirectory, MediaForwarder, PeerId, PeerPolicy};
use lm_metrics::HubMetrics;
use lm_proto::message::{Envelope, Message};

use crate::config::Config;
use crate::fanout::{self, RecipientSet};
use crate::outbound::{Class, OutboundHandle};
use crate::state::{PushHub, Sink};

const MAILBOX_DEPTH: usize = 512;

pub enum Command {
    Admit {
        name: String,
        addr: SocketAddr,
        handle: OutboundHandle,
        reply: oneshot::Sender<Result<ParticipantId, String>>,
    },
    Inbound {
        from: ParticipantId,
        env: Envelope,
    },
    FileOffer {
        from: ParticipantId,
        fid: String,
        filename: String,
        size: u64,
        reply: oneshot::Sender<ControlResult<AcceptedOffer>>,
    },
    UploadDone {
        uploader: ParticipantId,
        offer: AcceptedOffer,
    },
    UploadFailed {
        fid: String,
    },
    FileRequest {
        from: ParticipantId,
        fid: String,
        reply: oneshot::Sender<ControlResult<(PathBuf, u64)>>,
    },
    Disconnected {
        id: ParticipantId,
    },
    Evict {
        id: ParticipantId,
        reason: LeaveReason,
    },
    Sweep,
    RescanSpool {
        from: ParticipantId,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Clone)]
pub struct OwnerHandle {
    tx: mpsc::Sender<Command>,
}

impl OwnerHandle {
    async fn send(&self, cmd: Command) {
        let _ = self.tx.send(cmd).await;
    }

    pub async fn admit(
        &self,
        name: String,
        addr: SocketAddr,
        handle: OutboundHandle,
    ) -> Result<ParticipantId, String> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Admit { name, addr, handle, reply }).await;
        rx.await.unwrap_or_else(|_| Err("server shutting down".to_string()))
    }

    pub async fn inbound(&self, from: ParticipantId, env: Envelope) {
        self.send(Command::Inbound { from, env }).await;
    }

    pub async fn file_offer(
        &self,
        from: ParticipantId,
        fid: String,
        filename: String,
        size: u64,
    ) -> ControlResult<AcceptedOffer> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::FileOffer { from, fid, filename, size, reply }).await;
        rx.await.unwrap_or(Err(ControlError::FailedPrecondition("server shutting down")))
    }

    pub async fn upload_done(&self, uploader: ParticipantId, offer: AcceptedOffer) {
        self.send(Command::UploadDone { uploader, offer }).await;
    }

    pub async fn upload_failed(&self, fid: String) {
        self.send(Command::UploadFailed { fid }).await;
    }

    pub async fn file_request(
        &self,
        from: ParticipantId,
        fid: String,
    ) -> ControlResult<(PathBuf, u64)> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::FileRequest { from, fid, reply }).await;
        rx.await.unwrap_or(Err(ControlError::FailedPrecondition("server shutting down")))
    }

    pub async fn disconnected(&self, id: ParticipantId) {
        self.send(Command::Disconnected { id }).await;
    }

    pub async fn evict(&self, id: ParticipantId, reason: LeaveReason) {
        self.send(Command::Evict { id, reason }).await;
    }

    pub async fn sweep(&self) {
        self.send(Command::Sweep).await;
    }

    pub async fn rescan_spool(&self, from: ParticipantId) {
        self.send(Command::RescanSpool { from }).await;
    }

    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown { reply }).await;
        let _ = rx.await;
    }
}

pub struct Owner {
    reg: Registry,
    session: SessionState,
    moderation: Moderation,
    pushes: Arc<PushHub>,
    media_dir: Arc<MediaDirectory>,
    forwarder: Arc<MediaForwarder>,
    metrics: HubMetrics,
    heartbeat_soft: Duration,
    heartbeat_hard: Duration,
    max_file_size: u64,
}

/// Build the owner, seed the local host, and run the startup spool scan.
pub fn spawn(
    cfg: &Config,
    pushes: Arc<PushHub>,
    media_dir: Arc<MediaDirectory>,
    forwarder: Arc<MediaForwarder>,
    console_tx: mpsc::Sender<Envelope>,
) -> OwnerHandle {
    let mut reg = Registry::new(cfg.max_participants);
    reg.seed_local_host(&cfg.host_name);
    pushes.register(ParticipantId::LOCAL_HOST, Sink::Console(console_tx));

    let mut session = SessionState::new(cfg.spool_dir.clone(), cfg.chat_history_size);
    match session.scan_spool() {
        Ok(events) => {
            if !events.is_empty() {
                info!(files = events.len(), "indexed existing spool files");
            }
        }
        Err(e) => warn!("startup spool scan failed: {e}"),
    }

    let owner = Owner {
        reg,
        session,
        moderation: Moderation::new(),
        pushes,
        media_dir,
        forwarder,
        metrics: HubMetrics::new("lm"),
        heartbeat_soft: Duration::from_secs(cfg.heartbeat_soft_s),
        heartbeat_hard: Duration::from_secs(cfg.heartbeat_hard_s),
        max_file_size: cfg.max_file_size,
    };

    let (tx, rx) = mpsc::channel(MAILBOX_DEPTH);
    tokio::spawn(owner.run(rx));
    OwnerHandle { tx }
}

impl Owner {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::Admit { name, addr, handle, reply } => {
                    let _ = reply.send(self.admit(name, addr, handle));
                }
                Command::Inbound { from, env } => self.inbound(from, env),
                Command::FileOffer { from, fid, filename, size, reply } => {
                    let r = self.session.accept_offer(
                        &self.reg,
                        from,
                        &fid,
                        &filename,
                        size,
                        self.max_file_size,
                    );
                    let _ = reply.send(r);
                }
                Command::UploadDone { uploader, offer } => {
                    match self.session.complete_upload(&self.reg, uploader, &offer) {
                        Ok(events) => {
                            self.metrics.file_transfer("upload", "ok");
                            self.fan_out(events);
                        }
                        Err(e) => warn!(fid = %offer.fid, "upload registration failed: {e}"),
                    }
                }
                Command::UploadFailed { fid } => {
                    self.metrics.file_transfer("upload", "failed");
                    self.session.abort_upload(&fid);
                }
                Command::FileRequest { from, fid, reply } => {
                    let _ = reply.send(self.session.accept_request(&self.reg, from, &fid));
                }
                Command::Disconnected { id } => {
                    if self.reg.contains(id) {
                        debug!(%id, "connection lost");
                        self.remove(id, LeaveReason::Logout);
                    }
                }
                Command::Evict { id, reason } => {
                    if self.reg.contains(id) {
                        self.metrics.evicted(reason.wire_reason().unwrap_or("logout"));
                        self.remove(id, reason);
                    }
                }
                Command::Sweep => self.sweep(),
                Command::RescanSpool { from } => self.rescan(from),
                Command::Shutdown { reply } => {
                    self.broadcast_shutdown();
                    let _ = reply.send(());
                    break;
                }
            }
        }
    }

    // -- admit / remove ------------------------------------------------------

    fn admit(
        &mut self,
        name: String,
        addr: SocketAddr,
        handle: OutboundHandle,
    ) -> Result<ParticipantId, String> {
        let (id, events) = self.reg.admit(&name, addr).map_err(|e| e.to_string())?;
        info!(%id, %name, %addr, "participant admitted");

        self.pushes.register(id, Sink::Conn(handle));
        self.media_dir.insert(PeerId(id.0), self.media_policy(id));

        // login_success carries the full state snapshot
        let participants = self.reg.iter().map(fanout::participant_record).collect();
        let chat_history = self.session.chat.snapshot().iter().map(fanout::chat_record).collect();
        let shared_files = self
            .session
            .files_snapshot()
            .iter()
            .map(|e| (e.fid.clone(), fanout::file_record(e)))
            .collect();
        let env = Envelope::now(Message::LoginSuccess {
            client_id: id.0,
            participants,
            chat_history,
            shared_files,
            host_id: self.reg.host_id().map(|h| h.0).unwrap_or(0),
        });
        self.pushes.send_to(id, Class::Control, &env);

        self.fan_out(events);
        self.metrics.participants(self.reg.len());
        Ok(id)
    }

    fn remove(&mut self, id: ParticipantId, reason: LeaveReason) {
        let events = match self.moderation.remove_participant(&mut self.reg, id, reason) {
            Ok(events) => events,
            Err(_) => return,
        };
        if let Some(sink) = self.pushes.unregister(id) {
            sink.close();
        }
        self.media_dir.remove(PeerId(id.0));
        self.forwarder.forget(PeerId(id.0));
        self.metrics.participants(self.reg.len());
        self.fan_out(events);
    }

    // -- inbound control records --------------------------------------------

    fn inbound(&mut self, from: ParticipantId, env: Envelope) {
        if !self.reg.contains(from) {
            return;
        }
        // Any decoded control record counts as liveness; datagrams never do.
        self.reg.touch(from);

        let result = match env.msg {
            Message::Heartbeat => Ok(Vec::new()),
            Message::Logout => {
                info!(%from, "logout");
                self.remove(from, LeaveReason::Logout);
                Ok(Vec::new())
            }
            Message::Chat { text, .. } => self.session.post_chat(&self.reg, from, &text),
            Message::MediaState { video_on, audio_on, .. } => {
                self.reg.update_media_state(from, video_on, audio_on)
            }
            Message::RequestPresenter => self.moderation.request_presenter(&mut self.reg, from),
            Message::ScreenFrame { frame_data } => {
                self.relay_screen_frame(from, frame_data);
                Ok(Vec::new())
            }
            Message::ForceMute { target_client } => match target_client {
                Some(t) => self.moderation.force_mute(&mut self.reg, from, ParticipantId(t)),
                None => Err(ControlError::InvalidArgument("target required")),
            },
            Message::ForceVideoOff { target_client } => match target_client {
                Some(t) => self.moderation.force_video_off(&mut self.reg, from, ParticipantId(t)),
                None => Err(ControlError::InvalidArgument("target required")),
            },
            Message::ForceMuteAll => self.moderation.force_mute_all(&mut self.reg, from),
            Message::ForceVideoOffAll => self.moderation.force_video_off_all(&mut self.reg, from),
            Message::ForceStopPresenting { target_client } => self.moderation.force_stop_presenting(
                &mut self.reg,
                from,
                target_client.map(ParticipantId),
            ),
            Message::ForceStopScreenSharing { target_client } => self
                .moderation
                .force_stop_screen_sharing(&mut self.reg, from, target_client.map(ParticipantId)),
            Message::Kick { target } => {
                let target = ParticipantId(target);
                match self.moderation.kick(&mut self.reg, from, target) {
                    Ok(events) => {
                        self.teardown_after_kick(target);
                        Ok(events)
                    }
                    Err(e) => Err(e),
                }
            }
            Message::SetPermission { target, field, value } => {
                match PermissionField::from_str(&field) {
                    Some(field) => self.moderation.set_permission(
                        &mut self.reg,
                        from,
                        ParticipantId(target),
                        field,
                        value,
                    ),
                    None => Err(ControlError::InvalidArgument("unknown permission field")),
                }
            }
            Message::HostRequest { request_type, message, target_client } => match target_client {
                Some(t) => self.moderation.host_request(
                    &self.reg,
                    from,
                    ParticipantId(t),
                    request_type,
                    message,
                ),
                None => Err(ControlError::InvalidArgument("target required")),
            },
            Message::GetFilesList => {
                let shared_files = self
                    .session
                    .files_snapshot()
                    .iter()
                    .map(|e| (e.fid.clone(), fanout::file_record(e)))
                    .collect();
                let env = Envelope::now(Message::FilesListUpdate { shared_files });
                self.pushes.send_to(from, Class::Control, &env);
                Ok(Vec::new())
            }
            other => {
                // a client echoing server-only records is misbehaving, not fatal
                warn!(%from, msg = message_tag(&other), "ignoring unexpected record");
                Ok(Vec::new())
            }
        };

        match result {
            Ok(events) => self.fan_out(events),
            Err(e) => self.reply_error(from, &e),
        }
    }

    /// Latest-wins relay to everyone but the presenter. Frames from anyone
    /// not holding the slot are dropped (counted, not fatal).
    fn relay_screen_frame(&mut self, from: ParticipantId, frame_data: Vec<u8>) {
        if self.moderation.presenter() != Some(from) {
            debug!(%from, "screen frame from non-presenter dropped");
            self.metrics.queue_drop("screen");
            return;
        }
        let env = Envelope::now(Message::ScreenFrame { frame_data });
        let unhealthy = fanout::deliver(
            &self.reg,
            &self.pushes,
            &self.metrics,
            RecipientSet::AllExcept(from),
            Class::Screen,
            &env,
        );
        self.evict_unhealthy(unhealthy);
    }

    /// A kicked participant's tasks are torn down exactly like an eviction;
    /// `remove_participant` already ran inside the moderation call.
    fn teardown_after_kick(&mut self, target: ParticipantId) {
        if let Some(sink) = self.pushes.unregister(target) {
            sink.close();
        }
        self.media_dir.remove(PeerId(target.0));
        self.forwarder.forget(PeerId(target.0));
        self.metrics.participants(self.reg.len());
        self.metrics.evicted("kicked");
    }

    // -- liveness ------------------------------------------------------------

    fn sweep(&mut self) {
        let (expired, warned) = self.reg.sweep_liveness(self.heartbeat_soft, self.heartbeat_hard);
        for id in warned {
            warn!(%id, "heartbeat overdue");
        }
        for id in expired {
            info!(%id, "heartbeat hard timeout, evicting");
            self.metrics.evicted("timeout");
            self.remove(id, LeaveReason::Timeout);
        }
    }

    // -- spool ---------------------------------------------------------------

    fn rescan(&mut self, from: ParticipantId) {
        if !self.reg.lookup(from).map(|p| p.is_host()).unwrap_or(false) {
            self.reply_error(from, &ControlError::PermissionDenied("host only"));
            return;
        }
        match self.session.scan_spool() {
            Ok(events) => self.fan_out(events),
            Err(e) => warn!("spool rescan failed: {e}"),
        }
    }

    // -- event fan-out -------------------------------------------------------

    fn fan_out(&mut self, events: Vec<ControlEvent>) {
        let mut unhealthy = Vec::new();
        for ev in &events {
            self.apply_media_side_effects(ev);
            for (set, class, env) in fanout::translate(ev) {
                unhealthy.extend(fanout::deliver(
                    &self.reg,
                    &self.pushes,
                    &self.metrics,
                    set,
                    class,
                    &env,
                ));
            }
        }
        self.evict_unhealthy(unhealthy);
    }

    fn evict_unhealthy(&mut self, mut ids: Vec<ParticipantId>) {
        ids.sort_unstable();
        ids.dedup();
        for id in ids {
            if self.reg.contains(id) {
                warn!(%id, "control queue overflow, evicting");
                self.metrics.evicted("error");
                self.remove(id, LeaveReason::Error);
            }
        }
    }

    /// Keep the datagram fast path's policy view in step with the registry,
    /// the same way the gateway's membership cache shadows the control plane.
    fn apply_media_side_effects(&self, ev: &ControlEvent) {
        let id = match ev {
            ControlEvent::MediaStateChanged { id, .. } => *id,
            ControlEvent::PermissionChanged { target, .. } => *target,
            ControlEvent::Forced { target, .. } => *target,
            _ => return,
        };
        if self.reg.contains(id) {
            self.media_dir.set_policy(PeerId(id.0), self.media_policy(id));
        }
    }

    fn media_policy(&self, id: ParticipantId) -> PeerPolicy {
        match self.reg.lookup(id) {
            Some(p) => PeerPolicy {
                may_video: p.perms.may_video,
                may_audio: p.perms.may_audio,
                video_on: p.media.video_on,
                audio_on: p.media.audio_on,
            },
            None => PeerPolicy::default(),
        }
    }

    fn reply_error(&self, to: ParticipantId, err: &ControlError) {
        let env = Envelope::now(Message::PermissionError { message: err.to_string() });
        self.pushes.send_to(to, Class::Control, &env);
    }

    // -- shutdown ------------------------------------------------------------

    fn broadcast_shutdown(&mut self) {
        info!("broadcasting server shutdown");
        let env = Envelope::now(Message::ServerShutdown);
        fanout::deliver(
            &self.reg,
            &self.pushes,
            &self.metrics,
            RecipientSet::All,
            Class::Control,
            &env,
        );
        for p in self.reg.snapshot() {
            if let Some(sink) = self.pushes.unregister(p.id) {
                sink.close();
            }
        }
    }
}

fn message_tag(msg: &Message) -> &'static str {
    match msg {
        Message::Login { .. } => "login",
        Message::LoginSuccess { .. } => "login_success",
        Message::LoginError { .. } => "login_error",
        Message::UserJoined { .. } => "user_joined",
        Message::UserLeft { .. } => "user_left",
        Message::HostChanged { .. } => "host_changed",
        Message::PresenterGranted => "presenter_granted",
        Message::PresenterDenied { .. } => "presenter_denied",
        Message::PresenterChanged { .. } => "presenter_changed",
        Message::PermissionError { .. } => "permission_error",
        Message::FileUploadPort { .. } => "file_upload_port",
        Message::FileAvailable { .. } => "file_available",
        Message::FileDownloadPort { .. } => "file_download_port",
        Message::FileError { .. } => "file_error",
        Message::FilesListUpdate { .. } => "files_list_update",
        Message::ServerShutdown => "server_shutdown",
        _ => "other",
    }
}
