//! Single-shot session timers
//!
//! A [`TimerTable`] remembers which timers are armed, keyed by kind and
//! (optionally) device. Every arm gets a fresh token; the scheduler delivers
//! a [`TimerFired`] carrying that token back into the session mailbox when
//! the delay elapses. A fire whose token no longer matches the table (because
//! the timer was cancelled or re-armed) is stale and must be ignored, which
//! is how cancellation works without reaching into the scheduler.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::events::SessionEvent;
use crate::types::DeviceId;

/// What a timer guards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
pub enum TimerKind {
    /// Outbound connect left unresolved
    ConnectTimeout,
    /// ATD issued, telephony never reported a dialing call
    DialingOutTimeout,
    /// AT+BVRA=1 received, voice assistant never started
    StartVrTimeout,
    /// AT+CLCC forwarded, telephony never finished the list
    ClccResponseTimeout,
    /// Alerting phase of a virtual call is over
    VirtualCallActive,
    /// Re-query telephony shortly after SLC
    QueryPhoneState,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TimerKey {
    pub kind: TimerKind,
    pub device: Option<DeviceId>,
}

impl TimerKey {
    pub fn new(kind: TimerKind, device: Option<DeviceId>) -> Self {
        Self { kind, device }
    }
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.device {
            Some(device) => write!(f, "{}({})", self.kind, device),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Delivered to the mailbox when an armed timer elapses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFired {
    pub key: TimerKey,
    pub token: u64,
}

/// Something that can deliver a [`TimerFired`] after a delay
pub trait TimerScheduler: Send + Sync {
    fn schedule(&self, fired: TimerFired, after: Duration);
}

/// Sleeps on the tokio runtime, then posts into the session mailbox
#[derive(Debug, Clone)]
pub struct TokioTimerScheduler {
    mailbox: mpsc::UnboundedSender<SessionEvent>,
}

impl TokioTimerScheduler {
    pub fn new(mailbox: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { mailbox }
    }
}

impl TimerScheduler for TokioTimerScheduler {
    fn schedule(&self, fired: TimerFired, after: Duration) {
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if mailbox.send(SessionEvent::Timer(fired)).is_err() {
                tracing::debug!("Timer fired after session shut down");
            }
        });
    }
}

/// Armed timers and their current tokens
pub struct TimerTable {
    armed: IndexMap<TimerKey, u64>,
    next_token: u64,
    scheduler: Arc<dyn TimerScheduler>,
}

impl TimerTable {
    pub fn new(scheduler: Arc<dyn TimerScheduler>) -> Self {
        Self {
            armed: IndexMap::new(),
            next_token: 1,
            scheduler,
        }
    }

    /// Arm (or re-arm) a timer; any earlier arm of the same key goes stale
    pub fn arm(&mut self, kind: TimerKind, device: Option<DeviceId>, after: Duration) -> u64 {
        let key = TimerKey::new(kind, device);
        let token = self.next_token;
        self.next_token += 1;
        tracing::debug!("Arming {} for {:?}", key, after);
        self.armed.insert(key.clone(), token);
        self.scheduler.schedule(TimerFired { key, token }, after);
        token
    }

    /// Cancel one timer, returning whether it was armed
    pub fn cancel(&mut self, kind: TimerKind, device: Option<&DeviceId>) -> bool {
        let key = TimerKey::new(kind, device.cloned());
        let removed = self.armed.shift_remove(&key).is_some();
        if removed {
            tracing::debug!("Cancelled {}", key);
        }
        removed
    }

    /// Cancel every timer of a kind, returning how many were armed
    pub fn cancel_kind(&mut self, kind: TimerKind) -> usize {
        let before = self.armed.len();
        self.armed.retain(|key, _| key.kind != kind);
        before - self.armed.len()
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.armed.keys().any(|key| key.kind == kind)
    }

    /// Device attached to the oldest armed timer of a kind
    pub fn device_for(&self, kind: TimerKind) -> Option<DeviceId> {
        self.armed
            .keys()
            .find(|key| key.kind == kind && key.device.is_some())
            .and_then(|key| key.device.clone())
    }

    /// Consume a fire: true when it is the live arm of its key
    pub fn accept(&mut self, fired: &TimerFired) -> bool {
        match self.armed.get(&fired.key) {
            Some(token) if *token == fired.token => {
                self.armed.shift_remove(&fired.key);
                true
            }
            _ => false,
        }
    }

    pub fn armed_keys(&self) -> Vec<TimerKey> {
        self.armed.keys().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.armed.clear();
    }
}

impl fmt::Debug for TimerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerTable")
            .field("armed", &self.armed)
            .field("next_token", &self.next_token)
            .finish()
    }
}
