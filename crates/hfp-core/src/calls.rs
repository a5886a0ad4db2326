//! Call/audio coordinator state
//!
//! Holds the phone-side view (call counts, indicators, volumes), the voice
//! recognition and virtual call flags, and the A2DP coexistence guard. The
//! methods here only reason about that state; the session performs the
//! resulting radio and audio commands.

use serde::Serialize;

use crate::types::{A2dpConnection, A2dpPlayState, CallState, CallStateUpdate, PhoneState};

/// Voice recognition and virtual call flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VoiceRecognition {
    /// A voice recognition session is running
    pub started: bool,
    /// The peer asked to start; waiting for the voice assistant
    pub waiting: bool,
    /// A SCO session without a network call is in progress
    pub virtual_call_active: bool,
}

impl VoiceRecognition {
    pub fn clear_recognition(&mut self) {
        self.started = false;
        self.waiting = false;
    }
}

/// A2DP media state as far as voice calls care
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct A2dpGuard {
    pub connection: A2dpConnection,
    pub play_state: A2dpPlayState,
    /// We asked audio routing to suspend media
    pub suspended: bool,
    /// Indicator updates are held back until media stops
    pub pending_ciev: bool,
    /// Call state updates held back while media was playing
    pub pending_call_states: Vec<CallStateUpdate>,
}

impl A2dpGuard {
    pub fn is_connected(&self) -> bool {
        self.connection == A2dpConnection::Connected
    }

    pub fn is_playing(&self) -> bool {
        self.play_state == A2dpPlayState::Playing
    }

    /// Mark media suspended; true when it was not already
    pub fn suspend(&mut self) -> bool {
        !std::mem::replace(&mut self.suspended, true)
    }

    /// Mark media resumed; true when it was suspended
    pub fn release(&mut self) -> bool {
        std::mem::replace(&mut self.suspended, false)
    }

    /// Forget held back updates after a fresh service level connection
    pub fn reset_pending(&mut self) {
        self.suspended = false;
        self.pending_ciev = false;
        self.pending_call_states.clear();
    }
}

/// Everything the session knows about calls
#[derive(Debug, Clone, Default, Serialize)]
pub struct CallAudioCoordinator {
    pub phone: PhoneState,
    pub vr: VoiceRecognition,
    pub a2dp: A2dpGuard,
    /// HF indicators the peer listed in AT+BIND=
    pub hf_indicators: Vec<i64>,
}

impl CallAudioCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_in_call(&self) -> bool {
        self.phone.is_in_call()
    }

    pub fn is_virtual_call_active(&self) -> bool {
        self.vr.virtual_call_active
    }

    /// Whether a voice channel is justified right now
    pub fn is_sco_acceptable(&self, route_allowed: bool) -> bool {
        route_allowed
            && (self.vr.started
                || self.phone.num_active > 0
                || self.phone.num_held > 0
                || (self.phone.call_state != CallState::Idle
                    && self.phone.call_state != CallState::Incoming))
    }

    /// A virtual call may only start with no call and no voice recognition
    pub fn can_begin_virtual_call(&self) -> bool {
        !self.is_in_call() && !self.vr.started
    }

    /// Record an update in the phone state.
    ///
    /// While a virtual call runs and the phone is otherwise idle, an idle
    /// update is reported as one active call so the peer keeps its call
    /// indicator. Returns whether that happened.
    pub fn apply_call_state(&mut self, update: &mut CallStateUpdate) -> bool {
        self.phone.apply(update);
        if self.vr.virtual_call_active
            && !self.is_in_call()
            && update.call_state == CallState::Idle
        {
            update.num_active = 1;
            self.phone.num_active = 1;
            return true;
        }
        false
    }

    /// Set battery charge from a level/scale pair; returns the new value
    pub fn set_battery(&mut self, level: u32, scale: u32) -> Option<u8> {
        if scale == 0 {
            return None;
        }
        let charge = (u64::from(level) * 5 / u64::from(scale)).min(u64::from(u8::MAX)) as u8;
        self.phone.status.battery = charge;
        Some(charge)
    }

    /// +CIND callsetup value
    pub fn call_setup_indicator(&self) -> u8 {
        match self.phone.call_state {
            CallState::Incoming | CallState::Waiting => 1,
            CallState::Dialing => 2,
            CallState::Alerting => 3,
            _ => 0,
        }
    }

    /// +CIND callheld value; a virtual call never reports held calls
    pub fn call_held_indicator(&self) -> u8 {
        if self.vr.virtual_call_active || self.phone.num_held == 0 {
            0
        } else if self.phone.num_active > 0 {
            1
        } else {
            2
        }
    }

    /// +CIND call value
    pub fn call_indicator(&self) -> u8 {
        u8::from(self.phone.num_active > 0 || self.phone.num_held > 0)
    }

    /// Full `+CIND:` line
    pub fn cind_line(&self) -> String {
        let status = &self.phone.status;
        format!(
            "+CIND: {},{},{},{},{},{},{}",
            status.service,
            self.call_indicator(),
            self.call_setup_indicator(),
            self.call_held_indicator(),
            status.signal,
            status.roam,
            status.battery
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_virtual_idle_is_stabilized() {
        let mut calls = CallAudioCoordinator::new();
        calls.vr.virtual_call_active = true;

        let mut update = CallStateUpdate::new(0, 0, CallState::Idle);
        assert!(calls.apply_call_state(&mut update));
        assert_eq!(update.num_active, 1);
        assert_eq!(calls.phone.num_active, 1);
    }

    #[test]
    fn test_no_stabilization_without_virtual_call() {
        let mut calls = CallAudioCoordinator::new();
        let mut update = CallStateUpdate::new(0, 0, CallState::Idle);
        assert!(!calls.apply_call_state(&mut update));
        assert_eq!(calls.phone.num_active, 0);
    }

    #[test]
    fn test_sco_acceptance() {
        let mut calls = CallAudioCoordinator::new();
        assert!(!calls.is_sco_acceptable(true));

        calls.phone.call_state = CallState::Incoming;
        assert!(!calls.is_sco_acceptable(true));

        calls.phone.call_state = CallState::Alerting;
        assert!(calls.is_sco_acceptable(true));
        assert!(!calls.is_sco_acceptable(false));

        calls.phone.call_state = CallState::Idle;
        calls.vr.started = true;
        assert!(calls.is_sco_acceptable(true));
    }

    #[test]
    fn test_cind_line() {
        let mut calls = CallAudioCoordinator::new();
        calls.phone.status.service = 1;
        calls.phone.status.signal = 4;
        calls.phone.num_active = 1;
        calls.phone.num_held = 1;
        assert_eq!(calls.cind_line(), "+CIND: 1,1,0,1,4,0,5");

        calls.vr.virtual_call_active = true;
        assert_eq!(calls.call_held_indicator(), 0);
    }

    #[test]
    fn test_battery_scaling() {
        let mut calls = CallAudioCoordinator::new();
        assert_eq!(calls.set_battery(50, 100), Some(2));
        assert_eq!(calls.set_battery(1, 0), None);
        assert_eq!(calls.phone.status.battery, 2);
    }

    #[test]
    fn test_suspend_release_once() {
        let mut guard = A2dpGuard::default();
        assert!(guard.suspend());
        assert!(!guard.suspend());
        assert!(guard.release());
        assert!(!guard.release());
    }
}
