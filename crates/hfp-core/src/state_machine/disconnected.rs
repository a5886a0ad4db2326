//! Disconnected: nothing connected, nothing in flight

use tracing::{debug, error, info};

use crate::events::{SessionEvent, StackEvent, StackEventKind};
use crate::types::{ConnectionState, DeviceId, LinkConnectionState};

use super::{HandsfreeSession, HfpState, ProcessOutcome};

impl HandsfreeSession {
    pub(super) async fn handle_disconnected(&mut self, event: SessionEvent) -> ProcessOutcome {
        if !self.registry.is_empty()
            || self.registry.target().is_some()
            || self.registry.incoming().is_some()
        {
            error!(
                "Disconnected with stale roles: {} connected, target {:?}, incoming {:?}",
                self.registry.connected_count(),
                self.registry.target(),
                self.registry.incoming()
            );
            return ProcessOutcome::NotHandled;
        }

        match event {
            SessionEvent::Connect(device) => self.connect_from_idle(device).await,
            SessionEvent::Disconnect(device) => {
                debug!("Disconnect {} ignored, nothing connected", device);
            }
            SessionEvent::BatteryChanged { level, scale } => self.process_battery(level, scale),
            SessionEvent::CallStateChanged { update, is_virtual } => {
                self.process_call_state(update, is_virtual).await
            }
            SessionEvent::A2dpPlayStateChanged { previous, current } => {
                self.process_a2dp_play_state(previous, current).await
            }
            SessionEvent::A2dpConnectionChanged(connection) => {
                self.calls.a2dp.connection = connection;
            }
            SessionEvent::CallTypeChanged { cs_call } => self.calls.phone.cs_call = cs_call,
            SessionEvent::Stack(stack) => self.disconnected_stack_event(stack).await,
            _ => return ProcessOutcome::NotHandled,
        }
        ProcessOutcome::Handled
    }

    async fn connect_from_idle(&mut self, device: DeviceId) {
        if !self.may_retry(&device) {
            return;
        }
        self.broadcast_connection(&device, ConnectionState::Connecting, ConnectionState::Disconnected)
            .await;
        if !self.link_connect(&device).await {
            self.broadcast_connection(
                &device,
                ConnectionState::Disconnected,
                ConnectionState::Connecting,
            )
            .await;
            return;
        }

        if let Err(e) = self.collab.telephony.query_phone_state().await {
            error!("Phone state query failed: {}", e);
        }
        self.registry.set_target(Some(device.clone()));
        self.transition_to(HfpState::Pending);
        self.connect_issued(&device);
    }

    async fn disconnected_stack_event(&mut self, stack: StackEvent) {
        let StackEvent { device, kind } = stack;
        let state = match kind {
            StackEventKind::ConnectionStateChanged(state) => state,
            other => {
                debug!("Ignoring {} from {} while disconnected", other.name(), device);
                return;
            }
        };

        match state {
            LinkConnectionState::Disconnected | LinkConnectionState::Disconnecting => {
                debug!("Ignoring {} from {}", state, device);
            }
            LinkConnectionState::Connecting => {
                if self.ok_to_connect(&device).await {
                    info!("Incoming connection from {}", device);
                    self.broadcast_connection(
                        &device,
                        ConnectionState::Connecting,
                        ConnectionState::Disconnected,
                    )
                    .await;
                    self.registry.set_incoming(Some(device));
                    self.transition_to(HfpState::Pending);
                } else {
                    self.reject_connection(&device).await;
                }
            }
            LinkConnectionState::Connected => {
                if self.ok_to_connect(&device).await {
                    info!("Incoming connection from {} completed", device);
                    if let Err(e) = self.collab.telephony.query_phone_state().await {
                        error!("Phone state query failed: {}", e);
                    }
                    self.broadcast_connection(
                        &device,
                        ConnectionState::Connected,
                        ConnectionState::Disconnected,
                    )
                    .await;
                    self.add_connected(&device);
                    self.set_current(Some(device.clone()));
                    self.transition_to(HfpState::Connected);
                    self.config_audio_parameters(&device).await;
                } else {
                    self.reject_connection(&device).await;
                }
            }
            LinkConnectionState::SlcConnected => {
                debug!("SLC from {} while disconnected", device);
            }
        }
    }
}
