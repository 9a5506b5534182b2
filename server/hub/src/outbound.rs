//! Per-participant outbound queues and the writer task.
//!
//! One writer per connection owns the TCP write half; everything else
//! enqueues through an [`OutboundHandle`]. Three channels with distinct
//! overflow policy:
//!
//! - `control`: never dropped; breaching the hard bound marks the recipient
//!   unhealthy and the caller evicts it.
//! - `chat` (chat, roster, presence, file announcements): bounded by item
//!   count and aggregate bytes, drop-oldest.
//! - `screen`: a single latest-wins slot; a newer frame replaces any frame
//!   still pending.
//!
//! A blocked writer never blocks the reader: enqueue is non-blocking by
//! construction.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Notify;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use lm_control::{LeaveReason, ParticipantId};
use lm_proto::frame::write_frame;

use crate::owner::OwnerHandle;

pub const CONTROL_HARD_BOUND: usize = 1024;
pub const CHAT_SOFT_BOUND: usize = 256;
pub const CHAT_BYTE_BOUND: usize = 8 * 1024 * 1024;

/// Reliable-channel class of an outbound item; picks the queue and with it
/// the overflow policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Class {
    Control,
    Chat,
    Screen,
}

impl Class {
    pub fn as_str(&self) -> &'static str {
        match self {
            Class::Control => "control",
            Class::Chat => "chat",
            Class::Screen => "screen",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Chat-class items were dropped head-first to make room.
    DroppedOldest(usize),
    /// A pending screen frame was replaced.
    Replaced,
    /// Control hard bound breached; the recipient must be evicted.
    Overflow,
    Closed,
}

struct ChatQueue {
    items: VecDeque<Bytes>,
    bytes: usize,
}

struct Inner {
    control: Mutex<VecDeque<Bytes>>,
    chat: Mutex<ChatQueue>,
    screen: Mutex<Option<Bytes>>,
    notify: Notify,
    closed: AtomicBool,
    close_notify: Notify,
}

#[derive(Clone)]
pub struct OutboundHandle {
    inner: Arc<Inner>,
}

impl Default for OutboundHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboundHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                control: Mutex::new(VecDeque::new()),
                chat: Mutex::new(ChatQueue { items: VecDeque::new(), bytes: 0 }),
                screen: Mutex::new(None),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
                close_notify: Notify::new(),
            }),
        }
    }

    pub fn push(&self, class: Class, payload: Bytes) -> PushOutcome {
        if self.is_closed() {
            return PushOutcome::Closed;
        }
        let outcome = match class {
            Class::Control => {
                let mut q = self.inner.control.lock().unwrap();
                if q.len() >= CONTROL_HARD_BOUND {
                    return PushOutcome::Overflow;
                }
                q.push_back(payload);
                PushOutcome::Queued
            }
            Class::Chat => {
                let mut q = self.inner.chat.lock().unwrap();
                let mut dropped = 0;
                while !q.items.is_empty()
                    && (q.items.len() >= CHAT_SOFT_BOUND
                        || q.bytes + payload.len() > CHAT_BYTE_BOUND)
                {
                    if let Some(old) = q.items.pop_front() {
                        q.bytes -= old.len();
                        dropped += 1;
                    }
                }
                q.bytes += payload.len();
                q.items.push_back(payload);
                if dropped > 0 {
                    PushOutcome::DroppedOldest(dropped)
                } else {
                    PushOutcome::Queued
                }
            }
            Class::Screen => {
                let mut slot = self.inner.screen.lock().unwrap();
                let replaced = slot.replace(payload).is_some();
                if replaced {
                    PushOutcome::Replaced
                } else {
                    PushOutcome::Queued
                }
            }
        };
        self.inner.notify.notify_one();
        outcome
    }

    /// Stop accepting new items. The writer drains what is already queued,
    /// then exits; the reader observes [`closed`](Self::closed) and unwinds.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.close_notify.notify_waiters();
        self.inner.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Resolves once the handle is closed.
    pub async fn closed(&self) {
        loop {
            let notified = self.inner.close_notify.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }

    fn pop(&self) -> Option<(Class, Bytes)> {
        if let Some(b) = self.inner.control.lock().unwrap().pop_front() {
            return Some((Class::Control, b));
        }
        {
            let mut q = self.inner.chat.lock().unwrap();
            if let Some(b) = q.items.pop_front() {
                q.bytes -= b.len();
                return Some((Class::Chat, b));
            }
        }
        self.inner.screen.lock().unwrap().take().map(|b| (Class::Screen, b))
    }

    /// Next item in priority order (control, chat, screen). Returns `None`
    /// once the handle is closed and drained.
    pub async fn next(&self) -> Option<(Class, Bytes)> {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(item) = self.pop() {
                return Some(item);
            }
            if self.is_closed() {
                return None;
            }
            notified.await;
        }
    }
}

/// Drain a participant's queues into its TCP write half.
///
/// Whole-frame writes run under the hard deadline; a frame that completes
/// late only warns (the soft deadline), a frame that misses the hard deadline
/// gets the recipient evicted. Frames are never abandoned midway, so the
/// stream stays framed.
pub async fn run_writer(
    id: ParticipantId,
    handle: OutboundHandle,
    mut wr: OwnedWriteHalf,
    soft: Duration,
    hard: Duration,
    owner: OwnerHandle,
) {
    while let Some((class, payload)) = handle.next().await {
        let start = Instant::now();
        match timeout(hard, write_frame(&mut wr, &payload)).await {
            Ok(Ok(())) => {
                let elapsed = start.elapsed();
                if elapsed > soft {
                    warn!(%id, class = class.as_str(), ?elapsed, "slow control write");
                }
            }
            Ok(Err(e)) => {
                debug!(%id, "control write failed: {e}");
                owner.disconnected(id).await;
                break;
            }
            Err(_) => {
                warn!(%id, "control write missed hard deadline, evicting");
                owner.evict(id, LeaveReason::Error).await;
                break;
            }
        }
    }
    let _ = wr.shutdown().await;
}
