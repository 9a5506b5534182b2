//! A/V datagram forwarding.
//!
//! Responsibilities:
//! - Parse and validate incoming video/audio datagrams.
//! - Learn each participant's media endpoint from its first valid datagram
//!   (and follow rebinds from later ones).
//! - Enforce policy (known sender, permission, forced-off state, rate limits).
//! - Forward datagrams verbatim to every other participant with a learned
//!   endpoint; a send that would block is dropped and counted.
//!
//! The forwarder never decodes media payloads and never retransmits;
//! sequence numbers pass through untouched for client-side reordering.

pub mod directory;
pub mod forwarder;

pub use directory::{MediaDirectory, PeerId, PeerPolicy};
pub use forwarder::{DatagramTx, MediaForwarder, MediaForwarderConfig, MediaKind, MediaMetrics, NoopMetrics};
