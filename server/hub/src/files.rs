//! File exchange mediator.
//!
//! Every transfer gets its own ephemeral listener on the hub's interface;
//! file bytes never share a connection with the control channel. Uploads
//! stream into a hidden `.part` file and are renamed into place only on a
//! complete, exact-size read; any failure deletes the partial and registers
//! nothing. Downloads open the spool file per transfer, so concurrent
//! downloads of the same fid are independent.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use lm_control::session::AcceptedOffer;
use lm_control::ParticipantId;
use lm_metrics::HubMetrics;
use lm_proto::message::{Envelope, Message};

use crate::outbound::Class;
use crate::state::HubShared;

const CHUNK_BYTES: usize = 32 * 1024;

pub fn send_file_error(shared: &Arc<HubShared>, to: ParticipantId, fid: &str, reason: &str) {
    let env = Envelope::now(Message::FileError {
        fid: fid.to_string(),
        reason: reason.to_string(),
    });
    shared.pushes.send_to(to, Class::Control, &env);
}

// -- upload ------------------------------------------------------------------

pub fn spawn_upload(shared: Arc<HubShared>, uploader: ParticipantId, offer: AcceptedOffer) {
    tokio::spawn(async move {
        match run_upload(&shared, uploader, &offer).await {
            Ok(()) => {
                info!(fid = %offer.fid, size = offer.size, "upload complete");
                shared.owner.upload_done(uploader, offer).await;
            }
            Err(e) => {
                warn!(fid = %offer.fid, "upload failed: {e:#}");
                shared.owner.upload_failed(offer.fid.clone()).await;
                send_file_error(&shared, uploader, &offer.fid, &format!("upload failed: {e}"));
            }
        }
    });
}

async fn run_upload(
    shared: &Arc<HubShared>,
    uploader: ParticipantId,
    offer: &AcceptedOffer,
) -> Result<()> {
    let accept_deadline = Duration::from_secs(shared.cfg.transfer_accept_s);
    let idle_deadline = Duration::from_secs(shared.cfg.transfer_idle_s);

    let listener = bind_ephemeral(shared).await?;
    let port = listener.local_addr()?.port();
    debug!(fid = %offer.fid, port, "upload listener ready");

    let env = Envelope::now(Message::FileUploadPort { fid: offer.fid.clone(), port });
    shared.pushes.send_to(uploader, Class::Control, &env);

    let (mut stream, peer) = timeout(accept_deadline, listener.accept())
        .await
        .context("no uploader connection")?
        .context("accept upload connection")?;
    drop(listener);
    debug!(fid = %offer.fid, %peer, "uploader connected");

    let part_path = part_path(&offer.spool_path, &offer.fid);
    // partial files never survive a failed transfer
    let cleanup = scopeguard::guard(part_path.clone(), |p| {
        let _ = std::fs::remove_file(p);
    });

    let mut file = tokio::fs::File::create(&part_path)
        .await
        .context("create spool file")?;

    let mut buf = vec![0u8; CHUNK_BYTES];
    let mut remaining = offer.size;
    while remaining > 0 {
        let want = buf.len().min(remaining as usize);
        let n = timeout(idle_deadline, stream.read(&mut buf[..want]))
            .await
            .context("upload stalled")?
            .context("upload read")?;
        if n == 0 {
            bail!("short upload: {remaining} bytes missing");
        }
        file.write_all(&buf[..n]).await.context("spool write")?;
        remaining -= n as u64;
    }
    file.flush().await.context("spool flush")?;
    drop(file);

    tokio::fs::rename(&part_path, &offer.spool_path)
        .await
        .context("finalize spool file")?;
    scopeguard::ScopeGuard::into_inner(cleanup);
    Ok(())
}

// -- download ----------------------------------------------------------------

pub fn spawn_download(
    shared: Arc<HubShared>,
    requester: ParticipantId,
    fid: String,
    path: PathBuf,
    size: u64,
) {
    tokio::spawn(async move {
        let metrics = HubMetrics::new("lm");
        match run_download(&shared, requester, &fid, &path, size).await {
            Ok(()) => {
                debug!(%fid, size, "download complete");
                metrics.file_transfer("download", "ok");
            }
            Err(e) => {
                warn!(%fid, "download failed: {e:#}");
                metrics.file_transfer("download", "failed");
                send_file_error(&shared, requester, &fid, &format!("download failed: {e}"));
            }
        }
    });
}

async fn run_download(
    shared: &Arc<HubShared>,
    requester: ParticipantId,
    fid: &str,
    path: &Path,
    size: u64,
) -> Result<()> {
    let accept_deadline = Duration::from_secs(shared.cfg.transfer_accept_s);
    let idle_deadline = Duration::from_secs(shared.cfg.transfer_idle_s);

    let listener = bind_ephemeral(shared).await?;
    let port = listener.local_addr()?.port();
    debug!(%fid, port, "download listener ready");

    let env = Envelope::now(Message::FileDownloadPort { fid: fid.to_string(), port, size });
    shared.pushes.send_to(requester, Class::Control, &env);

    let (stream, peer) = timeout(accept_deadline, listener.accept())
        .await
        .context("no downloader connection")?
        .context("accept download connection")?;
    drop(listener);
    debug!(%fid, %peer, "downloader connected");

    let mut file = tokio::fs::File::open(path).await.context("open spool file")?;
    stream_file(&mut file, stream, idle_deadline).await
}

async fn stream_file(
    file: &mut tokio::fs::File,
    mut stream: TcpStream,
    idle_deadline: Duration,
) -> Result<()> {
    let mut buf = vec![0u8; CHUNK_BYTES];
    loop {
        let n = file.read(&mut buf).await.context("spool read")?;
        if n == 0 {
            break;
        }
        timeout(idle_deadline, stream.write_all(&buf[..n]))
            .await
            .context("download stalled")?
            .context("download write")?;
    }
    stream.shutdown().await.ok();
    Ok(())
}

async fn bind_ephemeral(shared: &Arc<HubShared>) -> Result<TcpListener> {
    let addr = SocketAddr::new(shared.bind_ip, 0);
    TcpListener::bind(addr).await.context("bind ephemeral transfer port")
}

fn part_path(spool_path: &Path, fid: &str) -> PathBuf {
    let dir = spool_path.parent().unwrap_or_else(|| Path::new("."));
    dir.join(format!(".{fid}.part"))
}
