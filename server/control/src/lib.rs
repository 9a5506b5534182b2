//! Session control plane: participant registry, session state, moderation.
//!
//! Everything here is synchronous, single-owner state. The hub runs one owner
//! task that applies mutations in arrival order; each mutation returns the
//! [`ControlEvent`]s it caused so the caller can fan them out in causal order.

pub mod errors;
pub mod events;
pub mod ids;
pub mod moderation;
pub mod perms;
pub mod registry;
pub mod session;

pub use errors::{ControlError, ControlResult};
pub use events::{ControlEvent, ForcedAction, LeaveReason};
pub use ids::ParticipantId;
pub use moderation::Moderation;
pub use perms::{PermissionField, Permissions};
pub use registry::{MediaState, Participant, Registry, Role};
pub use session::{ChatEntry, FileEntry, SessionState, Uploader};
