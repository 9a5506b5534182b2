use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "lm-hub", about = "LAN meeting hub")]
pub struct Config {
    /// Interface to bind all ports on.
    #[arg(long, default_value = "0.0.0.0")]
    pub bind_address: String,

    #[arg(long, default_value_t = 8888)]
    pub control_port: u16,

    #[arg(long, default_value_t = 8889)]
    pub video_port: u16,

    #[arg(long, default_value_t = 8890)]
    pub audio_port: u16,

    /// Directory holding shared files.
    #[arg(long, env = "LM_SPOOL_DIR", default_value = "uploads")]
    pub spool_dir: PathBuf,

    /// Maximum accepted upload, in bytes.
    #[arg(long, default_value_t = 100 * 1024 * 1024)]
    pub max_file_size: u64,

    /// Chat ring-buffer depth.
    #[arg(long, default_value_t = 500)]
    pub chat_history_size: usize,

    #[arg(long, default_value_t = 20)]
    pub heartbeat_soft_s: u64,

    #[arg(long, default_value_t = 30)]
    pub heartbeat_hard_s: u64,

    #[arg(long, default_value_t = 100)]
    pub max_participants: usize,

    /// Display name of the seeded local host participant (id 0).
    #[arg(long, default_value = "host")]
    pub host_name: String,

    /// Prometheus scrape endpoint; metrics are off when unset.
    #[arg(long, env = "LM_METRICS_LISTEN")]
    pub metrics_listen: Option<String>,

    #[arg(long, default_value_t = 5_000)]
    pub write_soft_ms: u64,

    #[arg(long, default_value_t = 15_000)]
    pub write_hard_ms: u64,

    /// Seconds a file transfer may sit idle before it is failed.
    #[arg(long, default_value_t = 30)]
    pub transfer_idle_s: u64,

    /// Seconds an ephemeral transfer listener waits for its first accept.
    #[arg(long, default_value_t = 30)]
    pub transfer_accept_s: u64,

    /// Seconds allowed to complete a declared frame body.
    #[arg(long, default_value_t = 10)]
    pub read_body_s: u64,

    /// Seconds a fresh connection gets to finish the login handshake.
    #[arg(long, default_value_t = 10)]
    pub login_s: u64,

    /// Best-effort writer flush budget on shutdown, in milliseconds.
    #[arg(long, default_value_t = 2_000)]
    pub shutdown_flush_ms: u64,
}
