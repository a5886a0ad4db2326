//! Hands-free session state machine
//!
//! [`HandsfreeSession`] owns every piece of session state: the current
//! [`HfpState`] tag, the device registry, the retry ledger, the call/audio
//! coordinator and the timer table. Events are processed strictly one at a
//! time by [`HandsfreeSession::dispatch`].
//!
//! Each state has its own handler module (`disconnected`, `pending`,
//! `connected`, `audio_on`, `multi_pending`); behaviour shared between states
//! lives in `shared`. A handler either handles an event, defers it, or
//! reports it as not handled.
//!
//! ## Deferral
//!
//! Deferred events are parked in a FIFO. Whenever a handler requests a
//! transition, the parked events are moved in front of the work queue in
//! their original order, so they are looked at again before anything that
//! arrives later. Events synthesized while handling (a timeout turning into a
//! disconnect notification, for instance) go to the back of the work queue
//! and are processed before the next mailbox event.
//!
//! ## Transitions
//!
//! A handler calls [`HandsfreeSession::transition_to`]; the new state takes
//! effect after the handler returns, and the last request wins. Entry actions
//! run only when the state actually changes.

mod audio_on;
mod connected;
mod disconnected;
mod multi_pending;
mod pending;
mod shared;

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::adapters::Collaborators;
use crate::at::AtResponder;
use crate::calls::CallAudioCoordinator;
use crate::config::SessionConfig;
use crate::events::{Notification, NotificationHub, SessionEvent};
use crate::registry::DeviceRegistry;
use crate::retry::RetryLedger;
use crate::session::SessionSnapshot;
use crate::timers::{TimerKind, TimerScheduler, TimerTable};
use crate::types::{AudioState, CallState, CallStateUpdate, ConnectionState, DeviceId};

/// Session state tag
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, strum::Display,
)]
pub enum HfpState {
    /// No peer connected and no attempt in flight
    #[default]
    Disconnected,
    /// A single connect or disconnect is in flight
    Pending,
    /// At least one peer connected, no voice channel
    Connected,
    /// Voice channel up
    AudioOn,
    /// A second peer is being connected or one of two is being dropped
    MultiPending,
}

/// What a state handler did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Handled,
    /// Parked until the next transition
    Deferred,
    /// The current state has no use for the event
    NotHandled,
}

/// The per-adapter session
pub struct HandsfreeSession {
    state: HfpState,
    next_state: Option<HfpState>,
    config: Arc<SessionConfig>,
    registry: DeviceRegistry,
    retries: RetryLedger,
    calls: CallAudioCoordinator,
    audio_state: AudioState,
    /// A voice channel teardown was issued and has not been confirmed yet
    audio_teardown_pending: bool,
    dialing_out: bool,
    timers: TimerTable,
    deferred: VecDeque<SessionEvent>,
    work: VecDeque<SessionEvent>,
    collab: Collaborators,
    responder: AtResponder,
    notifications: NotificationHub,
    stopped: bool,
}

impl std::fmt::Debug for HandsfreeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandsfreeSession")
            .field("state", &self.state)
            .field("registry", &self.registry)
            .field("audio_state", &self.audio_state)
            .field("deferred", &self.deferred.len())
            .field("timers", &self.timers)
            .finish_non_exhaustive()
    }
}

impl HandsfreeSession {
    pub fn new(
        config: Arc<SessionConfig>,
        collab: Collaborators,
        scheduler: Arc<dyn TimerScheduler>,
        notifications: NotificationHub,
    ) -> Self {
        let responder = AtResponder::new(collab.radio.clone(), collab.telephony.clone());
        Self {
            state: HfpState::Disconnected,
            next_state: None,
            registry: DeviceRegistry::new(config.max_connections),
            retries: RetryLedger::new(),
            calls: CallAudioCoordinator::new(),
            audio_state: AudioState::Disconnected,
            audio_teardown_pending: false,
            dialing_out: false,
            timers: TimerTable::new(scheduler),
            deferred: VecDeque::new(),
            work: VecDeque::new(),
            config,
            collab,
            responder,
            notifications,
            stopped: false,
        }
    }

    pub fn state(&self) -> HfpState {
        self.state
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn calls(&self) -> &CallAudioCoordinator {
        &self.calls
    }

    pub fn retries(&self) -> &RetryLedger {
        &self.retries
    }

    pub fn timers(&self) -> &TimerTable {
        &self.timers
    }

    pub fn audio_state(&self) -> AudioState {
        self.audio_state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    pub fn is_dialing_out(&self) -> bool {
        self.dialing_out
    }

    /// True once a shutdown has been processed
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Process one mailbox event and everything it causes
    pub async fn dispatch(&mut self, event: SessionEvent) {
        self.work.push_back(event);
        while let Some(next) = self.work.pop_front() {
            if self.stopped {
                debug!("Session stopped, dropping {}", next.name());
                continue;
            }
            self.process_one(next).await;
        }
    }

    async fn process_one(&mut self, event: SessionEvent) -> ProcessOutcome {
        let event = match event {
            SessionEvent::Timer(fired) => {
                if !self.timers.accept(&fired) {
                    debug!("Ignoring stale timer {}", fired.key);
                    return ProcessOutcome::Handled;
                }
                if fired.key.kind == TimerKind::VirtualCallActive {
                    SessionEvent::CallStateChanged {
                        update: CallStateUpdate::new(1, 0, CallState::Idle),
                        is_virtual: true,
                    }
                } else {
                    SessionEvent::Timer(fired)
                }
            }
            SessionEvent::Shutdown { reply } => {
                self.shutdown().await;
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
                return ProcessOutcome::Handled;
            }
            other => other,
        };

        let name = event.name();
        let before = self.state;
        debug!("{} processing {}", before, name);

        let outcome = match before {
            HfpState::Disconnected => self.handle_disconnected(event).await,
            HfpState::Pending => self.handle_pending(event).await,
            HfpState::Connected => self.handle_connected(event).await,
            HfpState::AudioOn => self.handle_audio_on(event).await,
            HfpState::MultiPending => self.handle_multi_pending(event).await,
        };

        match outcome {
            ProcessOutcome::Handled => {}
            ProcessOutcome::Deferred => debug!("{} deferred {}", before, name),
            ProcessOutcome::NotHandled => {
                warn!("{} did not handle {}", before, name);
                self.notifications.publish(Notification::EventRejected {
                    state: before.to_string(),
                    event: name.to_string(),
                });
            }
        }

        if let Some(next) = self.next_state.take() {
            self.state = next;
            self.replay_deferred();
            if next != before {
                info!("Session state {} -> {}", before, next);
                self.on_enter(next).await;
            }
        }
        outcome
    }

    /// Request a state change; applied once the current handler returns
    pub(crate) fn transition_to(&mut self, state: HfpState) {
        self.next_state = Some(state);
    }

    /// Park an event until the next transition
    pub(crate) fn defer(&mut self, event: SessionEvent) -> ProcessOutcome {
        self.deferred.push_back(event);
        ProcessOutcome::Deferred
    }

    /// Queue an internally synthesized event behind the current work
    pub(crate) fn enqueue(&mut self, event: SessionEvent) {
        self.work.push_back(event);
    }

    fn replay_deferred(&mut self) {
        if self.deferred.is_empty() {
            return;
        }
        debug!("Replaying {} deferred events", self.deferred.len());
        while let Some(event) = self.deferred.pop_back() {
            self.work.push_front(event);
        }
    }

    async fn on_enter(&mut self, state: HfpState) {
        match state {
            HfpState::Disconnected => {
                self.drop_leftover_roles().await;
                self.audio_teardown_pending = false;
                if let Err(e) = self.collab.telephony.listen_for_phone_state(false).await {
                    warn!("Failed to stop phone state listener: {}", e);
                }
                self.calls.vr.clear_recognition();
                self.dialing_out = false;
            }
            HfpState::Connected => {
                if let Err(e) = self.collab.telephony.listen_for_phone_state(true).await {
                    warn!("Failed to start phone state listener: {}", e);
                }
            }
            HfpState::Pending | HfpState::AudioOn | HfpState::MultiPending => {}
        }
    }

    /// Profile connection state of a device as observers should see it
    pub fn connection_state(&self, device: &DeviceId) -> ConnectionState {
        let registry = &self.registry;
        match self.state {
            HfpState::Disconnected => ConnectionState::Disconnected,
            HfpState::Pending => {
                if registry.is_target(device) {
                    ConnectionState::Connecting
                } else if registry.is_connected(device) {
                    ConnectionState::Disconnecting
                } else if registry.is_incoming(device) {
                    ConnectionState::Connecting
                } else {
                    ConnectionState::Disconnected
                }
            }
            HfpState::MultiPending => {
                if registry.is_target(device) || registry.is_incoming(device) {
                    ConnectionState::Connecting
                } else if registry.is_connected(device) {
                    match registry.multi_disconnect() {
                        Some(leaving) if leaving == device => ConnectionState::Disconnecting,
                        _ => ConnectionState::Connected,
                    }
                } else {
                    ConnectionState::Disconnected
                }
            }
            HfpState::Connected | HfpState::AudioOn => {
                if registry.is_connected(device) {
                    ConnectionState::Connected
                } else {
                    ConnectionState::Disconnected
                }
            }
        }
    }

    /// Point-in-time copy of what observers may query
    pub fn snapshot(&self) -> SessionSnapshot {
        let mut known: Vec<DeviceId> = self.registry.connected_devices();
        for role in [self.registry.target(), self.registry.incoming()]
            .into_iter()
            .flatten()
        {
            if !known.contains(role) {
                known.push(role.clone());
            }
        }
        let connection_states = known
            .into_iter()
            .map(|device| {
                let state = self.connection_state(&device);
                (device, state)
            })
            .collect();

        SessionSnapshot {
            state: self.state,
            connected_devices: self.registry.connected_devices(),
            current_device: self.registry.current().cloned(),
            target_device: self.registry.target().cloned(),
            incoming_device: self.registry.incoming().cloned(),
            active_audio_device: self.registry.active_audio().cloned(),
            audio_state: self.audio_state,
            connection_states,
            phone: self.calls.phone.clone(),
            voice_recognition: self.calls.vr,
            stopped: self.stopped,
        }
    }

    /// Tear the session down: broadcast the final states and stop processing
    async fn shutdown(&mut self) {
        info!("Shutting down hands-free session in {}", self.state);
        self.collab.audio.set_sco_routing(false).await;

        if let Some(active) = self.registry.active_audio().cloned() {
            self.broadcast_audio(&active, AudioState::Disconnected, AudioState::Connected)
                .await;
        }

        for role in [self.registry.target().cloned(), self.registry.incoming().cloned()]
            .into_iter()
            .flatten()
        {
            if self.connection_state(&role) == ConnectionState::Connecting {
                self.broadcast_connection(
                    &role,
                    ConnectionState::Disconnected,
                    ConnectionState::Connecting,
                )
                .await;
            }
        }

        for device in self.registry.connected_devices() {
            self.broadcast_connection(
                &device,
                ConnectionState::Disconnected,
                ConnectionState::Connected,
            )
            .await;
        }

        self.timers.clear();
        self.deferred.clear();
        self.work.clear();
        self.stopped = true;
    }
}

#[cfg(test)]
mod tests;
