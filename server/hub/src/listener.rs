//! Transport endpoints: the control listener with its per-connection
//! reader/writer tasks, and the two datagram receive loops.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use lm_control::ParticipantId;
use lm_media::MediaKind;
use lm_proto::frame::{read_frame, write_frame, MAX_FRAME_BYTES};
use lm_proto::message::{decode, Decoded, Envelope, Message};

use crate::outbound::{self, OutboundHandle};
use crate::state::{HubShared, UdpTx};

pub async fn run_control_listener(shared: Arc<HubShared>, listener: TcpListener) {
    loop {
        tokio::select! {
            _ = shared.shutdown_signalled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    let shared = shared.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_conn(shared, stream, remote).await {
                            debug!(%remote, "connection ended: {e:#}");
                        }
                    });
                }
                Err(e) => {
                    warn!("accept failed: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
        }
    }
}

async fn handle_conn(shared: Arc<HubShared>, stream: TcpStream, remote: SocketAddr) -> Result<()> {
    stream.set_nodelay(true).ok();
    let (mut rd, mut wr) = stream.into_split();

    let login_deadline = Duration::from_secs(shared.cfg.login_s);
    let body_deadline = Duration::from_secs(shared.cfg.read_body_s);

    // First frame must be a login within the handshake deadline.
    let payload = timeout(login_deadline, read_frame(&mut rd, MAX_FRAME_BYTES, Some(body_deadline)))
        .await
        .context("login timeout")?
        .context("login read")?;

    let name = match decode(&payload) {
        Ok(Decoded::Known(env)) => match env.msg {
            Message::Login { name } => name,
            _ => {
                reject(&mut wr, "expected login").await;
                return Ok(());
            }
        },
        _ => {
            reject(&mut wr, "malformed login").await;
            return Ok(());
        }
    };

    let handle = OutboundHandle::new();
    let id = match shared.owner.admit(name, remote, handle.clone()).await {
        Ok(id) => id,
        Err(reason) => {
            info!(%remote, %reason, "login rejected");
            reject(&mut wr, &reason).await;
            return Ok(());
        }
    };

    // Writer drains the outbound queues; reader and writer are independent,
    // so a blocked writer never stalls inbound dispatch.
    tokio::spawn(outbound::run_writer(
        id,
        handle.clone(),
        wr,
        Duration::from_millis(shared.cfg.write_soft_ms),
        Duration::from_millis(shared.cfg.write_hard_ms),
        shared.owner.clone(),
    ));

    read_loop(shared, id, handle, rd, body_deadline).await;
    Ok(())
}

async fn read_loop(
    shared: Arc<HubShared>,
    id: ParticipantId,
    handle: OutboundHandle,
    mut rd: OwnedReadHalf,
    body_deadline: Duration,
) {
    loop {
        tokio::select! {
            // eviction / shutdown closes the handle; stop reading
            _ = handle.closed() => break,
            read = read_frame(&mut rd, MAX_FRAME_BYTES, Some(body_deadline)) => {
                let payload = match read {
                    Ok(p) => p,
                    Err(e) => {
                        debug!(%id, "control read ended: {e}");
                        shared.owner.disconnected(id).await;
                        break;
                    }
                };
                match decode(&payload) {
                    Ok(Decoded::Known(env)) => {
                        let graceful = matches!(env.msg, Message::Logout);
                        route(&shared, id, env).await;
                        if graceful {
                            break;
                        }
                    }
                    Ok(Decoded::Unknown(tag)) => {
                        warn!(%id, %tag, "ignoring unknown message type");
                    }
                    Err(e) => {
                        // framing/protocol error: close this connection only
                        warn!(%id, "protocol error, closing connection: {e}");
                        shared.owner.evict(id, lm_control::LeaveReason::Error).await;
                        break;
                    }
                }
            }
        }
    }
}

/// Dispatch one inbound record. File transfers need a reply before any bytes
/// move, so they run through dedicated request/reply commands; everything
/// else is fire-and-forget into the owner mailbox.
async fn route(shared: &Arc<HubShared>, from: ParticipantId, env: Envelope) {
    match env.msg {
        Message::FileOffer { fid, filename, size } => {
            match shared.owner.file_offer(from, fid.clone(), filename, size).await {
                Ok(offer) => crate::files::spawn_upload(shared.clone(), from, offer),
                Err(e) => crate::files::send_file_error(shared, from, &fid, &e.to_string()),
            }
        }
        Message::FileRequest { fid } => {
            match shared.owner.file_request(from, fid.clone()).await {
                Ok((path, size)) => {
                    crate::files::spawn_download(shared.clone(), from, fid, path, size)
                }
                Err(e) => crate::files::send_file_error(shared, from, &fid, &e.to_string()),
            }
        }
        _ => shared.owner.inbound(from, env).await,
    }
}

async fn reject(wr: &mut OwnedWriteHalf, reason: &str) {
    let env = Envelope::now(Message::LoginError { reason: reason.to_string() });
    if let Ok(bytes) = env.encode() {
        let _ = write_frame(wr, &bytes).await;
    }
}

/// One receive loop per media port. Datagrams are validated and fanned out
/// inline; every failure mode is a counted drop, never a crash.
pub async fn run_media_loop(shared: Arc<HubShared>, sock: Arc<UdpSocket>, kind: MediaKind) {
    let tx = UdpTx(sock.clone());
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        tokio::select! {
            _ = shared.shutdown_signalled() => break,
            received = sock.recv_from(&mut buf) => match received {
                Ok((n, src)) => shared.forwarder.handle(kind, &tx, src, &buf[..n]),
                Err(e) => {
                    warn!(kind = kind.as_str(), "datagram recv failed: {e}");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
        }
    }
}
