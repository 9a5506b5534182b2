//! LAN meeting hub: a single central server fanning out A/V, screen share,
//! chat, shared files and moderation between LAN participants.

pub mod config;
pub mod console;
pub mod fanout;
pub mod files;
pub mod listener;
pub mod liveness;
pub mod metrics_adapter;
pub mod outbound;
pub mod owner;
pub mod state;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use lm_media::{MediaDirectory, MediaForwarder, MediaForwarderConfig, MediaKind};

pub use config::Config;
pub use console::HostConsole;

/// A running hub. Addresses reflect the actually bound ports so tests can
/// ask for port 0.
pub struct Hub {
    pub control_addr: SocketAddr,
    pub video_addr: SocketAddr,
    pub audio_addr: SocketAddr,
    console: Option<HostConsole>,
    shared: Arc<state::HubShared>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Hub {
    /// Bind all ports and start every hub task. Failure to bind is the one
    /// fatal startup error.
    pub async fn spawn(cfg: Config) -> Result<Hub> {
        tokio::fs::create_dir_all(&cfg.spool_dir)
            .await
            .with_context(|| format!("create spool dir {}", cfg.spool_dir.display()))?;

        let bind_ip: IpAddr = cfg.bind_address.parse().context("bind address")?;

        let control = TcpListener::bind((bind_ip, cfg.control_port))
            .await
            .context("bind control port")?;
        let video = Arc::new(
            UdpSocket::bind((bind_ip, cfg.video_port)).await.context("bind video port")?,
        );
        let audio = Arc::new(
            UdpSocket::bind((bind_ip, cfg.audio_port)).await.context("bind audio port")?,
        );

        let control_addr = control.local_addr()?;
        let video_addr = video.local_addr()?;
        let audio_addr = audio.local_addr()?;

        let media_dir = Arc::new(MediaDirectory::new());
        let forwarder = Arc::new(MediaForwarder::new(
            MediaForwarderConfig::default(),
            media_dir.clone(),
            metrics_adapter::media_metrics(),
        ));

        let pushes = Arc::new(state::PushHub::new());
        let (console_tx, console_rx) = mpsc::channel(256);
        let owner = owner::spawn(&cfg, pushes.clone(), media_dir.clone(), forwarder.clone(), console_tx);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(state::HubShared {
            cfg,
            owner: owner.clone(),
            pushes,
            media_dir,
            forwarder,
            bind_ip,
            shutdown: shutdown_rx,
        });

        let tasks = vec![
            tokio::spawn(listener::run_control_listener(shared.clone(), control)),
            tokio::spawn(listener::run_media_loop(shared.clone(), video, MediaKind::Video)),
            tokio::spawn(listener::run_media_loop(shared.clone(), audio, MediaKind::Audio)),
            tokio::spawn(liveness::run_liveness(shared.clone())),
        ];

        info!(%control_addr, %video_addr, %audio_addr, "hub listening");

        Ok(Hub {
            control_addr,
            video_addr,
            audio_addr,
            console: Some(HostConsole::new(owner, console_rx)),
            shared,
            shutdown_tx,
            tasks,
        })
    }

    /// Take the local host's console handle. Available exactly once.
    pub fn console(&mut self) -> HostConsole {
        self.console.take().expect("console already taken")
    }

    /// Broadcast `server_shutdown`, give writers the flush budget, then hard
    /// close all listeners and tasks.
    pub async fn shutdown(self) {
        self.shared.owner.shutdown().await;
        tokio::time::sleep(Duration::from_millis(self.shared.cfg.shutdown_flush_ms)).await;
        let _ = self.shutdown_tx.send(true);
        for task in &self.tasks {
            task.abort();
        }
        info!("hub stopped");
    }
}
