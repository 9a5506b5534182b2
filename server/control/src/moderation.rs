//! Host moderation and presenter arbitration.
//!
//! All transitions run on the registry owner, so two simultaneous
//! `request_presenter` calls resolve in arrival order and the slot never has
//! two holders. Forced state changes mutate the registry and emit both a
//! targeted notification and a broadcast delta.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::errors::{ControlError, ControlResult};
use crate::events::{ControlEvent, ForcedAction, LeaveReason};
use crate::ids::ParticipantId;
use crate::perms::PermissionField;
use crate::registry::Registry;

#[derive(Default)]
pub struct Moderation {
    presenter: Option<(ParticipantId, DateTime<Utc>)>,
}

impl Moderation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn presenter(&self) -> Option<ParticipantId> {
        self.presenter.map(|(id, _)| id)
    }

    fn ensure_host(&self, reg: &Registry, actor: ParticipantId) -> ControlResult<()> {
        match reg.lookup(actor) {
            Some(p) if p.is_host() => Ok(()),
            Some(_) => Err(ControlError::PermissionDenied("host only")),
            None => Err(ControlError::NotFound("participant")),
        }
    }

    // -- presenter state machine ---------------------------------------------

    /// `empty --request--> Held(pid)`; a busy slot or a revoked permission
    /// yields a denial event, not an error.
    pub fn request_presenter(
        &mut self,
        reg: &mut Registry,
        who: ParticipantId,
    ) -> ControlResult<Vec<ControlEvent>> {
        let p = reg.lookup(who).ok_or(ControlError::NotFound("participant"))?;
        if !p.perms.may_screen_share {
            return Ok(vec![ControlEvent::PresenterDenied {
                id: who,
                reason: "screen sharing disabled",
            }]);
        }
        match self.presenter {
            Some((holder, _)) if holder == who => {
                // re-request by the current holder is idempotent
                Ok(vec![ControlEvent::PresenterGranted { id: who }])
            }
            Some(_) => Ok(vec![ControlEvent::PresenterDenied { id: who, reason: "busy" }]),
            None => {
                self.presenter = Some((who, Utc::now()));
                if let Some(p) = reg.lookup_mut(who) {
                    p.media.is_presenter = true;
                    p.media.screen_sharing = true;
                }
                info!(id = %who, "presenter granted");
                Ok(vec![
                    ControlEvent::PresenterGranted { id: who },
                    ControlEvent::PresenterChanged { id: Some(who) },
                ])
            }
        }
    }

    /// Voluntary stop; a no-op when the caller does not hold the slot.
    pub fn stop_presenting(
        &mut self,
        reg: &mut Registry,
        who: ParticipantId,
    ) -> ControlResult<Vec<ControlEvent>> {
        if self.presenter() != Some(who) {
            return Ok(Vec::new());
        }
        self.clear_slot(reg, who);
        Ok(vec![ControlEvent::PresenterChanged { id: None }])
    }

    fn clear_slot(&mut self, reg: &mut Registry, holder: ParticipantId) {
        self.presenter = None;
        if let Some(p) = reg.lookup_mut(holder) {
            p.media.is_presenter = false;
            p.media.screen_sharing = false;
        }
    }

    // -- host-only commands --------------------------------------------------

    pub fn force_mute(
        &mut self,
        reg: &mut Registry,
        actor: ParticipantId,
        target: ParticipantId,
    ) -> ControlResult<Vec<ControlEvent>> {
        self.ensure_host(reg, actor)?;
        Self::force_media_off(reg, target, ForcedAction::Mute)
    }

    pub fn force_video_off(
        &mut self,
        reg: &mut Registry,
        actor: ParticipantId,
        target: ParticipantId,
    ) -> ControlResult<Vec<ControlEvent>> {
        self.ensure_host(reg, actor)?;
        Self::force_media_off(reg, target, ForcedAction::VideoOff)
    }

    pub fn force_mute_all(
        &mut self,
        reg: &mut Registry,
        actor: ParticipantId,
    ) -> ControlResult<Vec<ControlEvent>> {
        self.ensure_host(reg, actor)?;
        let targets: Vec<_> = reg.iter().map(|p| p.id).filter(|&id| id != actor).collect();
        let mut events = Vec::new();
        for t in targets {
            events.extend(Self::force_media_off(reg, t, ForcedAction::Mute)?);
        }
        Ok(events)
    }

    pub fn force_video_off_all(
        &mut self,
        reg: &mut Registry,
        actor: ParticipantId,
    ) -> ControlResult<Vec<ControlEvent>> {
        self.ensure_host(reg, actor)?;
        let targets: Vec<_> = reg.iter().map(|p| p.id).filter(|&id| id != actor).collect();
        let mut events = Vec::new();
        for t in targets {
            events.extend(Self::force_media_off(reg, t, ForcedAction::VideoOff)?);
        }
        Ok(events)
    }

    fn force_media_off(
        reg: &mut Registry,
        target: ParticipantId,
        action: ForcedAction,
    ) -> ControlResult<Vec<ControlEvent>> {
        let p = reg.lookup_mut(target).ok_or(ControlError::NotFound("participant"))?;
        match action {
            ForcedAction::Mute => p.media.audio_on = false,
            ForcedAction::VideoOff => p.media.video_on = false,
            _ => return Err(ControlError::InvalidArgument("not a media action")),
        }
        let (video_on, audio_on) = (p.media.video_on, p.media.audio_on);
        Ok(vec![
            ControlEvent::Forced { target, action },
            ControlEvent::MediaStateChanged { id: target, video_on, audio_on },
        ])
    }

    /// Force the presenter (or an explicit target holding the slot) to stop.
    pub fn force_stop_presenting(
        &mut self,
        reg: &mut Registry,
        actor: ParticipantId,
        target: Option<ParticipantId>,
    ) -> ControlResult<Vec<ControlEvent>> {
        self.ensure_host(reg, actor)?;
        let holder = self.presenter().ok_or(ControlError::FailedPrecondition("no active presenter"))?;
        let target = target.unwrap_or(holder);
        if target != holder {
            return Err(ControlError::FailedPrecondition("target is not presenting"));
        }
        self.clear_slot(reg, holder);
        Ok(vec![
            ControlEvent::Forced { target: holder, action: ForcedAction::StopPresenting },
            ControlEvent::PresenterChanged { id: None },
        ])
    }

    /// Like `force_stop_presenting`, but also covers a participant whose
    /// `screen_sharing` flag is set without holding the slot.
    pub fn force_stop_screen_sharing(
        &mut self,
        reg: &mut Registry,
        actor: ParticipantId,
        target: Option<ParticipantId>,
    ) -> ControlResult<Vec<ControlEvent>> {
        self.ensure_host(reg, actor)?;
        let target = target
            .or(self.presenter())
            .ok_or(ControlError::FailedPrecondition("no active screen share"))?;

        if self.presenter() == Some(target) {
            self.clear_slot(reg, target);
            return Ok(vec![
                ControlEvent::Forced { target, action: ForcedAction::StopScreenShare },
                ControlEvent::PresenterChanged { id: None },
            ]);
        }

        let p = reg.lookup_mut(target).ok_or(ControlError::NotFound("participant"))?;
        p.media.screen_sharing = false;
        Ok(vec![ControlEvent::Forced { target, action: ForcedAction::StopScreenShare }])
    }

    pub fn kick(
        &mut self,
        reg: &mut Registry,
        actor: ParticipantId,
        target: ParticipantId,
    ) -> ControlResult<Vec<ControlEvent>> {
        self.ensure_host(reg, actor)?;
        if target == actor {
            return Err(ControlError::InvalidArgument("cannot kick self"));
        }
        if !reg.contains(target) {
            return Err(ControlError::NotFound("participant"));
        }
        info!(target = %target, "kicked by host");
        self.remove_participant(reg, target, LeaveReason::Kicked)
    }

    /// Idempotent: setting a field to its current value produces no events.
    /// Revoking a permission force-stops the matching live state.
    pub fn set_permission(
        &mut self,
        reg: &mut Registry,
        actor: ParticipantId,
        target: ParticipantId,
        field: PermissionField,
        value: bool,
    ) -> ControlResult<Vec<ControlEvent>> {
        self.ensure_host(reg, actor)?;
        if !reg.set_permission(target, field, value)? {
            return Ok(Vec::new());
        }

        let mut events = vec![ControlEvent::PermissionChanged { target, field, value }];
        if !value {
            match field {
                PermissionField::Audio if reg.lookup(target).is_some_and(|p| p.media.audio_on) => {
                    events.extend(Self::force_media_off(reg, target, ForcedAction::Mute)?);
                }
                PermissionField::Video if reg.lookup(target).is_some_and(|p| p.media.video_on) => {
                    events.extend(Self::force_media_off(reg, target, ForcedAction::VideoOff)?);
                }
                PermissionField::ScreenShare if self.presenter() == Some(target) => {
                    self.clear_slot(reg, target);
                    events.push(ControlEvent::Forced {
                        target,
                        action: ForcedAction::StopPresenting,
                    });
                    events.push(ControlEvent::PresenterChanged { id: None });
                }
                _ => {}
            }
        }
        Ok(events)
    }

    /// Non-forcing prompt shown on the target's client.
    pub fn host_request(
        &self,
        reg: &Registry,
        actor: ParticipantId,
        target: ParticipantId,
        request_type: String,
        message: String,
    ) -> ControlResult<Vec<ControlEvent>> {
        self.ensure_host(reg, actor)?;
        if !reg.contains(target) {
            return Err(ControlError::NotFound("participant"));
        }
        Ok(vec![ControlEvent::HostPrompt { target, request_type, message }])
    }

    /// Remove a participant, clearing the presenter slot if held and
    /// promoting a new host if needed, in causal order.
    pub fn remove_participant(
        &mut self,
        reg: &mut Registry,
        who: ParticipantId,
        reason: LeaveReason,
    ) -> ControlResult<Vec<ControlEvent>> {
        let was_presenter = self.presenter() == Some(who);
        if was_presenter {
            self.presenter = None;
        }
        let mut events = reg.remove(who, reason)?;
        if was_presenter {
            events.insert(1, ControlEvent::PresenterChanged { id: None });
        }
        Ok(events)
    }
}
