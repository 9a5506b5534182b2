//! Connection health monitor: a one-second tick that asks the owner to sweep
//! heartbeat deadlines. The soft/hard policy itself lives with the registry.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};

use crate::state::HubShared;

pub async fn run_liveness(shared: Arc<HubShared>) {
    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shared.shutdown_signalled() => break,
            _ = tick.tick() => shared.owner.sweep().await,
        }
    }
}
