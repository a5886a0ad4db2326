//! Pending: one connect or disconnect is in flight

use tracing::{debug, error, info, warn};

use crate::events::{SessionEvent, StackEvent, StackEventKind};
use crate::timers::TimerKind;
use crate::types::{ConnectionState, DeviceId, LinkConnectionState};

use super::{HandsfreeSession, HfpState, ProcessOutcome};

impl HandsfreeSession {
    pub(super) async fn handle_pending(&mut self, event: SessionEvent) -> ProcessOutcome {
        match event {
            SessionEvent::Connect(_) | SessionEvent::ConnectAudio => return self.defer(event),
            SessionEvent::Disconnect(ref device) => {
                let cancels_target =
                    self.registry.current().is_some() && self.registry.is_target(device);
                if !cancels_target {
                    return self.defer(event);
                }
                info!("Cancelling connect to {}", device);
                let device = device.clone();
                self.broadcast_connection(
                    &device,
                    ConnectionState::Disconnected,
                    ConnectionState::Connecting,
                )
                .await;
                self.registry.set_target(None);
            }
            SessionEvent::Timer(fired) if fired.key.kind == TimerKind::ConnectTimeout => {
                self.connect_timed_out(fired.key.device.as_ref());
            }
            SessionEvent::BatteryChanged { level, scale } => self.process_battery(level, scale),
            SessionEvent::CallStateChanged { update, is_virtual } => {
                self.process_call_state(update, is_virtual).await
            }
            SessionEvent::Stack(StackEvent {
                device,
                kind: StackEventKind::ConnectionStateChanged(state),
            }) => {
                if self.timers.cancel(TimerKind::ConnectTimeout, Some(&device)) {
                    debug!("Connect timeout for {} cancelled", device);
                }
                self.pending_connection_event(state, device).await;
            }
            SessionEvent::Stack(stack) => {
                warn!("Unexpected {} from {} while pending", stack.kind.name(), stack.device);
            }
            _ => return ProcessOutcome::NotHandled,
        }
        ProcessOutcome::Handled
    }

    async fn pending_connection_event(&mut self, state: LinkConnectionState, device: DeviceId) {
        match state {
            LinkConnectionState::Disconnected => self.pending_link_disconnected(device).await,
            LinkConnectionState::Connected => self.pending_link_connected(device).await,
            LinkConnectionState::SlcConnected => {
                if self.registry.is_connected(&device)
                    || self.registry.is_target(&device)
                    || self.registry.is_incoming(&device)
                {
                    debug!("SLC with {} while pending", device);
                } else {
                    self.pending_accept_other(device).await;
                }
            }
            LinkConnectionState::Connecting => {
                if self.registry.is_current(&device) {
                    debug!("Current device {} connecting back", device);
                } else if self.registry.is_target(&device) {
                    debug!("Stack and target {} are connecting", device);
                } else if self.registry.is_incoming(&device) {
                    error!("Another connecting event from incoming {}", device);
                } else {
                    debug!("Incoming connection from {} while pending, ignored", device);
                }
            }
            LinkConnectionState::Disconnecting => {
                if self.registry.is_current(&device) {
                    debug!("Stack is disconnecting {}", device);
                } else {
                    warn!("Disconnecting event from {} while pending", device);
                }
            }
        }
    }

    async fn pending_link_disconnected(&mut self, device: DeviceId) {
        if self.registry.is_connected(&device) {
            self.audio_lost_with_link(&device).await;
            self.wide_band_off().await;
            self.registry.remove_connected(&device);
            info!("{} removed while pending", device);
            self.broadcast_connection(
                &device,
                ConnectionState::Disconnected,
                ConnectionState::Disconnecting,
            )
            .await;
            self.set_current(None);

            if let Some(target) = self.registry.target().cloned() {
                if self.link_connect(&target).await {
                    return;
                }
                self.broadcast_connection(
                    &target,
                    ConnectionState::Disconnected,
                    ConnectionState::Connecting,
                )
                .await;
                self.registry.set_target(None);
            } else {
                self.abandon_incoming().await;
            }
            if self.registry.is_empty() {
                self.transition_to(HfpState::Disconnected);
            } else {
                let next = self.settled_state();
                self.settle_after_multi_disconnect(next).await;
            }
        } else if self.registry.is_target(&device) {
            self.retries.purge(&device);
            self.broadcast_connection(
                &device,
                ConnectionState::Disconnected,
                ConnectionState::Connecting,
            )
            .await;
            self.registry.set_target(None);
            self.leave_pending();
        } else if self.registry.is_incoming(&device) {
            self.broadcast_connection(
                &device,
                ConnectionState::Disconnected,
                ConnectionState::Connecting,
            )
            .await;
            self.registry.set_incoming(None);
            self.leave_pending();
        } else {
            error!("Unknown device {} disconnected", device);
        }
    }

    fn leave_pending(&mut self) {
        if self.registry.is_empty() {
            self.transition_to(HfpState::Disconnected);
        } else {
            self.transition_to(HfpState::Connected);
        }
    }

    async fn pending_link_connected(&mut self, device: DeviceId) {
        if self.registry.is_connected(&device) {
            // a disconnect failed
            self.broadcast_connection(
                &device,
                ConnectionState::Connected,
                ConnectionState::Disconnecting,
            )
            .await;
            if let Some(target) = self.registry.target().cloned() {
                self.broadcast_connection(
                    &target,
                    ConnectionState::Disconnected,
                    ConnectionState::Connecting,
                )
                .await;
            }
            self.registry.set_target(None);
            self.abandon_incoming().await;
            self.transition_to(HfpState::Connected);
        } else if self.registry.is_target(&device) || self.registry.is_incoming(&device) {
            if !self.registry.has_capacity() {
                warn!("No room left for {}", device);
                self.reject_connection(&device).await;
                self.broadcast_connection(
                    &device,
                    ConnectionState::Disconnected,
                    ConnectionState::Connecting,
                )
                .await;
                if self.registry.is_target(&device) {
                    self.registry.set_target(None);
                } else {
                    self.registry.set_incoming(None);
                }
                self.leave_pending();
                return;
            }
            self.add_connected(&device);
            self.set_current(Some(device.clone()));
            if self.registry.is_target(&device) {
                self.registry.set_target(None);
            } else {
                self.registry.set_incoming(None);
            }
            info!("{} connected", device);
            self.transition_to(HfpState::Connected);
            self.broadcast_connection(
                &device,
                ConnectionState::Connected,
                ConnectionState::Connecting,
            )
            .await;
            self.config_audio_parameters(&device).await;
        } else {
            self.pending_accept_other(device).await;
        }
    }

    /// Another peer connected on its own while pending
    async fn pending_accept_other(&mut self, device: DeviceId) {
        warn!("Other incoming device {} connected while pending", device);
        if !self.ok_to_connect(&device).await {
            self.reject_connection(&device).await;
            return;
        }
        if !self.registry.has_capacity() {
            warn!("No room for {}", device);
            self.reject_connection(&device).await;
            return;
        }
        self.broadcast_connection(&device, ConnectionState::Connected, ConnectionState::Disconnected)
            .await;
        self.add_connected(&device);
        self.set_current(Some(device.clone()));
        self.config_audio_parameters(&device).await;
    }
}
