//! Authoritative participant table.
//!
//! All mutations are serialized through the owning task; readers get cloned
//! snapshots. The table is small (≤ 100 participants) so cloning is cheap.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::errors::{ControlError, ControlResult};
use crate::events::{ControlEvent, ForcedAction, LeaveReason};
use crate::ids::ParticipantId;
use crate::perms::{PermissionField, Permissions};

pub const MAX_NAME_CHARS: usize = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Host,
    Guest,
}

/// Independent media flags mirrored to all rosters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MediaState {
    pub video_on: bool,
    pub audio_on: bool,
    pub screen_sharing: bool,
    pub is_presenter: bool,
}

#[derive(Clone, Debug)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub role: Role,
    pub control_addr: Option<SocketAddr>,
    pub media: MediaState,
    pub perms: Permissions,
    pub joined_at: DateTime<Utc>,
    pub last_seen: Instant,
    soft_warned: bool,
}

impl Participant {
    pub fn is_host(&self) -> bool {
        self.role == Role::Host
    }
}

pub struct Registry {
    table: BTreeMap<ParticipantId, Participant>,
    next_id: u32,
    max_participants: usize,
    default_perms: Permissions,
}

impl Registry {
    pub fn new(max_participants: usize) -> Self {
        Self {
            table: BTreeMap::new(),
            next_id: 1,
            max_participants,
            default_perms: Permissions::default(),
        }
    }

    /// Install the local host participant (id 0). The host console has no
    /// socket; `control_addr` stays empty and liveness never evicts it.
    pub fn seed_local_host(&mut self, name: &str) -> &Participant {
        let p = Participant {
            id: ParticipantId::LOCAL_HOST,
            name: name.to_string(),
            role: Role::Host,
            control_addr: None,
            media: MediaState::default(),
            perms: self.default_perms,
            joined_at: Utc::now(),
            last_seen: Instant::now(),
            soft_warned: false,
        };
        self.table.insert(p.id, p);
        &self.table[&ParticipantId::LOCAL_HOST]
    }

    /// Validate and admit a participant. Duplicate display names are allowed;
    /// the assigned id disambiguates.
    pub fn admit(
        &mut self,
        name: &str,
        control_addr: SocketAddr,
    ) -> ControlResult<(ParticipantId, Vec<ControlEvent>)> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ControlError::InvalidArgument("display name empty"));
        }
        if name.chars().count() > MAX_NAME_CHARS {
            return Err(ControlError::InvalidArgument("display name too long"));
        }
        if self.table.len() >= self.max_participants {
            return Err(ControlError::ResourceExhausted("session full"));
        }

        let id = ParticipantId(self.next_id);
        self.next_id += 1;

        // If the session somehow has no host (the seeded host already left),
        // the first admit takes the role; the single-host invariant holds.
        let role = if self.host_id().is_none() { Role::Host } else { Role::Guest };

        let p = Participant {
            id,
            name: name.to_string(),
            role,
            control_addr: Some(control_addr),
            media: MediaState::default(),
            perms: self.default_perms,
            joined_at: Utc::now(),
            last_seen: Instant::now(),
            soft_warned: false,
        };
        self.table.insert(id, p);

        Ok((id, vec![ControlEvent::UserJoined { id, name: name.to_string() }]))
    }

    /// Remove a participant; if it held the host role, atomically promote the
    /// oldest remaining participant (tie-break: lowest id). There is no window
    /// in which the session has participants but no host.
    pub fn remove(
        &mut self,
        id: ParticipantId,
        reason: LeaveReason,
    ) -> ControlResult<Vec<ControlEvent>> {
        let removed = self.table.remove(&id).ok_or(ControlError::NotFound("participant"))?;

        let mut events = vec![ControlEvent::UserLeft { id, reason }];

        if removed.role == Role::Host {
            let successor = self
                .table
                .values()
                .min_by_key(|p| (p.joined_at, p.id))
                .map(|p| p.id);
            if let Some(next) = successor {
                if let Some(p) = self.table.get_mut(&next) {
                    p.role = Role::Host;
                }
                debug!(from = %id, to = %next, "host transferred");
                events.push(ControlEvent::HostChanged { id: next });
            }
        }

        Ok(events)
    }

    pub fn lookup(&self, id: ParticipantId) -> Option<&Participant> {
        self.table.get(&id)
    }

    pub(crate) fn lookup_mut(&mut self, id: ParticipantId) -> Option<&mut Participant> {
        self.table.get_mut(&id)
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.table.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.table.values()
    }

    pub fn snapshot(&self) -> Vec<Participant> {
        self.table.values().cloned().collect()
    }

    pub fn host_id(&self) -> Option<ParticipantId> {
        self.table.values().find(|p| p.is_host()).map(|p| p.id)
    }

    /// Refresh liveness. Any decoded control-channel record counts; datagrams
    /// never reach this path.
    pub fn touch(&mut self, id: ParticipantId) {
        if let Some(p) = self.table.get_mut(&id) {
            p.last_seen = Instant::now();
            p.soft_warned = false;
        }
    }

    /// Apply a client-reported media state, clamped to its permissions.
    /// A report that violates a revoked permission is forced back off and the
    /// participant is notified so its client stops the capture.
    pub fn update_media_state(
        &mut self,
        id: ParticipantId,
        video_on: bool,
        audio_on: bool,
    ) -> ControlResult<Vec<ControlEvent>> {
        let p = self.table.get_mut(&id).ok_or(ControlError::NotFound("participant"))?;

        let mut events = Vec::new();
        if video_on && !p.perms.may_video {
            events.push(ControlEvent::Forced { target: id, action: ForcedAction::VideoOff });
        }
        if audio_on && !p.perms.may_audio {
            events.push(ControlEvent::Forced { target: id, action: ForcedAction::Mute });
        }

        p.media.video_on = video_on && p.perms.may_video;
        p.media.audio_on = audio_on && p.perms.may_audio;

        events.push(ControlEvent::MediaStateChanged {
            id,
            video_on: p.media.video_on,
            audio_on: p.media.audio_on,
        });
        Ok(events)
    }

    /// Returns whether the value actually changed (idempotent updates produce
    /// no broadcast).
    pub fn set_permission(
        &mut self,
        id: ParticipantId,
        field: PermissionField,
        value: bool,
    ) -> ControlResult<bool> {
        let p = self.table.get_mut(&id).ok_or(ControlError::NotFound("participant"))?;
        if p.perms.get(field) == value {
            return Ok(false);
        }
        p.perms.set(field, value);
        Ok(true)
    }

    /// Liveness sweep: returns ids past the hard deadline (to evict) and ids
    /// newly past the soft deadline (to warn about, once). The local host has
    /// no heartbeat source and is exempt.
    pub fn sweep_liveness(
        &mut self,
        soft: Duration,
        hard: Duration,
    ) -> (Vec<ParticipantId>, Vec<ParticipantId>) {
        let now = Instant::now();
        let mut expired = Vec::new();
        let mut warned = Vec::new();
        for p in self.table.values_mut() {
            if p.id == ParticipantId::LOCAL_HOST {
                continue;
            }
            let idle = now.duration_since(p.last_seen);
            if idle >= hard {
                expired.push(p.id);
            } else if idle >= soft && !p.soft_warned {
                p.soft_warned = true;
                warned.push(p.id);
            }
        }
        (expired, warned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    fn registry_with_host() -> Registry {
        let mut reg = Registry::new(100);
        reg.seed_local_host("host");
        reg
    }

    #[test]
    fn ids_are_monotonic_and_unique() {
        let mut reg = registry_with_host();
        let (a, _) = reg.admit("alice", addr(1000)).unwrap();
        let (b, _) = reg.admit("bob", addr(1001)).unwrap();
        assert_eq!(a, ParticipantId(1));
        assert_eq!(b, ParticipantId(2));
        reg.remove(a, LeaveReason::Logout).unwrap();
        let (c, _) = reg.admit("carol", addr(1002)).unwrap();
        // freed ids are not reused
        assert_eq!(c, ParticipantId(3));
    }

    #[test]
    fn duplicate_names_are_admitted() {
        let mut reg = registry_with_host();
        reg.admit("alice", addr(1000)).unwrap();
        assert!(reg.admit("alice", addr(1001)).is_ok());
    }

    #[test]
    fn name_validation() {
        let mut reg = registry_with_host();
        assert_eq!(
            reg.admit("  ", addr(1)).err(),
            Some(ControlError::InvalidArgument("display name empty"))
        );
        let long = "x".repeat(MAX_NAME_CHARS + 1);
        assert_eq!(
            reg.admit(&long, addr(1)).err(),
            Some(ControlError::InvalidArgument("display name too long"))
        );
        // exactly the limit is fine
        let ok = "x".repeat(MAX_NAME_CHARS);
        assert!(reg.admit(&ok, addr(1)).is_ok());
    }

    #[test]
    fn capacity_is_enforced() {
        let mut reg = Registry::new(2);
        reg.seed_local_host("host");
        reg.admit("alice", addr(1)).unwrap();
        assert_eq!(
            reg.admit("bob", addr(2)).err(),
            Some(ControlError::ResourceExhausted("session full"))
        );
    }

    #[test]
    fn host_removal_promotes_oldest() {
        let mut reg = registry_with_host();
        let (a, _) = reg.admit("alice", addr(1)).unwrap();
        let (b, _) = reg.admit("bob", addr(2)).unwrap();

        let events = reg.remove(ParticipantId::LOCAL_HOST, LeaveReason::Logout).unwrap();
        assert!(matches!(events[0], ControlEvent::UserLeft { id, .. } if id == ParticipantId::LOCAL_HOST));
        assert!(matches!(events[1], ControlEvent::HostChanged { id } if id == a));

        assert_eq!(reg.host_id(), Some(a));
        assert_eq!(reg.lookup(b).unwrap().role, Role::Guest);
    }

    #[test]
    fn exactly_one_host_at_all_times() {
        let mut reg = registry_with_host();
        reg.admit("alice", addr(1)).unwrap();
        reg.admit("bob", addr(2)).unwrap();
        for _ in 0..3 {
            let hosts: Vec<_> = reg.iter().filter(|p| p.is_host()).collect();
            assert_eq!(hosts.len(), 1);
            let host = hosts[0].id;
            reg.remove(host, LeaveReason::Logout).unwrap();
        }
        assert!(reg.is_empty());
    }

    #[test]
    fn media_state_is_clamped_to_permissions() {
        let mut reg = registry_with_host();
        let (a, _) = reg.admit("alice", addr(1)).unwrap();
        reg.set_permission(a, PermissionField::Audio, false).unwrap();

        let events = reg.update_media_state(a, true, true).unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, ControlEvent::Forced { action: ForcedAction::Mute, .. })));
        let p = reg.lookup(a).unwrap();
        assert!(p.media.video_on);
        assert!(!p.media.audio_on);
    }

    #[test]
    fn set_permission_is_idempotent() {
        let mut reg = registry_with_host();
        let (a, _) = reg.admit("alice", addr(1)).unwrap();
        assert!(reg.set_permission(a, PermissionField::Chat, false).unwrap());
        assert!(!reg.set_permission(a, PermissionField::Chat, false).unwrap());
    }

    #[test]
    fn sweep_skips_local_host_and_warns_once() {
        let mut reg = registry_with_host();
        let (a, _) = reg.admit("alice", addr(1)).unwrap();

        let (expired, warned) = reg.sweep_liveness(Duration::ZERO, Duration::from_secs(3600));
        assert!(expired.is_empty());
        assert_eq!(warned, vec![a]);

        // second sweep does not re-warn
        let (_, warned) = reg.sweep_liveness(Duration::ZERO, Duration::from_secs(3600));
        assert!(warned.is_empty());

        let (expired, _) = reg.sweep_liveness(Duration::ZERO, Duration::ZERO);
        assert_eq!(expired, vec![a]);
    }
}
