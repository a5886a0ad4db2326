//! Connected: at least one peer has a service level connection, no voice
//! channel is up

use tracing::{debug, error, info, warn};

use crate::events::{SessionEvent, StackEvent, StackEventKind};
use crate::timers::TimerKind;
use crate::types::{AudioState, ConnectionState, DeviceId, LinkAudioState, LinkConnectionState};

use super::{HandsfreeSession, HfpState, ProcessOutcome};

impl HandsfreeSession {
    pub(super) async fn handle_connected(&mut self, event: SessionEvent) -> ProcessOutcome {
        match event {
            SessionEvent::Connect(device) => self.connected_connect(device).await,
            SessionEvent::Disconnect(device) => self.connected_disconnect(device).await,
            SessionEvent::ConnectAudio => {
                if !self.calls.is_sco_acceptable(self.config.audio_route_allowed) {
                    warn!("Audio connect refused: no call and audio routing not allowed");
                } else {
                    let device = self
                        .registry
                        .active_audio()
                        .or(self.registry.current())
                        .cloned();
                    match device {
                        Some(device) => {
                            self.link_connect_audio(&device).await;
                        }
                        None => error!("No device to connect audio to"),
                    }
                }
            }
            SessionEvent::StartVoiceRecognition(device) => {
                self.process_local_vr_start(&device).await
            }
            SessionEvent::StopVoiceRecognition(_) => self.process_local_vr_stop().await,
            SessionEvent::StartVirtualCall { reply, .. } => {
                let started = self.begin_virtual_call().await;
                if let Some(reply) = reply {
                    let _ = reply.send(started);
                }
            }
            SessionEvent::StopVirtualCall { reply, .. } => {
                let stopped = self.end_virtual_call().await;
                if let Some(reply) = reply {
                    let _ = reply.send(stopped);
                }
            }
            SessionEvent::Stack(StackEvent { device, kind }) => match kind {
                StackEventKind::ConnectionStateChanged(state) => {
                    self.connected_connection_event(state, device).await
                }
                StackEventKind::AudioStateChanged(state) => {
                    self.connected_audio_event(state, device).await
                }
                kind => self.process_at_event(StackEvent::new(device, kind)).await,
            },
            other => return self.handle_connected_common(other).await,
        }
        ProcessOutcome::Handled
    }

    async fn connected_connect(&mut self, device: DeviceId) {
        if self.registry.is_connected(&device) {
            error!("Connect to {} ignored, already connected", device);
            return;
        }
        if !self.may_retry(&device) {
            return;
        }

        if !self.registry.has_capacity() {
            let Some(evictee) = self.registry.connected_at(0).cloned() else {
                return;
            };
            info!("At capacity, dropping {} to make room for {}", evictee, device);
            self.broadcast_connection(&device, ConnectionState::Connecting, ConnectionState::Disconnected)
                .await;
            if !self.link_disconnect(&evictee).await {
                self.broadcast_connection(
                    &device,
                    ConnectionState::Disconnected,
                    ConnectionState::Connecting,
                )
                .await;
                return;
            }
            self.broadcast_connection(
                &evictee,
                ConnectionState::Disconnecting,
                ConnectionState::Connected,
            )
            .await;
            self.registry.set_target(Some(device.clone()));
            if self.registry.max_connections() == 1 {
                self.transition_to(HfpState::Pending);
            } else {
                self.registry.set_multi_disconnect(Some(evictee));
                self.transition_to(HfpState::MultiPending);
            }
        } else {
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
            self.registry.set_target(Some(device.clone()));
            self.transition_to(HfpState::MultiPending);
        }
        self.connect_issued(&device);
    }

    async fn connected_disconnect(&mut self, device: DeviceId) {
        if !self.registry.is_connected(&device) {
            debug!("Disconnect {} ignored, not connected", device);
            return;
        }
        self.broadcast_connection(&device, ConnectionState::Disconnecting, ConnectionState::Connected)
            .await;
        if !self.link_disconnect(&device).await {
            self.broadcast_connection(
                &device,
                ConnectionState::Connected,
                ConnectionState::Disconnecting,
            )
            .await;
            return;
        }
        if self.registry.connected_count() > 1 {
            self.registry.set_multi_disconnect(Some(device));
            self.transition_to(HfpState::MultiPending);
        } else {
            self.transition_to(HfpState::Pending);
        }
    }

    async fn connected_connection_event(&mut self, state: LinkConnectionState, device: DeviceId) {
        match state {
            LinkConnectionState::Disconnected => {
                if !self.registry.is_connected(&device) {
                    error!("Disconnected from unknown device {}", device);
                    return;
                }
                self.audio_lost_with_link(&device).await;
                self.wide_band_off().await;
                self.registry.remove_connected(&device);
                info!("{} removed while connected", device);
                if self.registry.is_empty() {
                    self.set_current(None);
                    self.transition_to(HfpState::Disconnected);
                } else {
                    self.settle_after_multi_disconnect(HfpState::Connected)
                        .await;
                }
                self.broadcast_connection(
                    &device,
                    ConnectionState::Disconnected,
                    ConnectionState::Connected,
                )
                .await;
            }
            LinkConnectionState::SlcConnected => {
                self.retries.purge(&device);
                let delay = self.config.query_phone_state_delay;
                self.timers.arm(TimerKind::QueryPhoneState, None, delay);
                self.reset_a2dp_after_slc().await;
            }
            LinkConnectionState::Connected => {
                if self.registry.is_connected(&device) {
                    self.registry.set_incoming(None);
                    self.registry.set_target(None);
                    return;
                }
                if self.ok_to_connect(&device).await && self.registry.has_capacity() {
                    info!("Incoming {} accepted while connected", device);
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
            LinkConnectionState::Connecting | LinkConnectionState::Disconnecting => {
                debug!("{} reported {} while connected", device, state);
            }
        }
    }

    async fn connected_audio_event(&mut self, state: LinkAudioState, device: DeviceId) {
        if !self.registry.is_connected(&device) {
            error!("Audio changed on disconnected device {}", device);
            return;
        }
        match state {
            LinkAudioState::Connected => {
                if self.accept_audio(&device).await {
                    self.transition_to(HfpState::AudioOn);
                }
            }
            LinkAudioState::Connecting => {
                self.audio_state = AudioState::Connecting;
                self.broadcast_audio(&device, AudioState::Connecting, AudioState::Disconnected)
                    .await;
            }
            LinkAudioState::Disconnected => {
                self.end_virtual_call().await;
                if self.calls.a2dp.suspended
                    && !self.calls.is_in_call()
                    && self.calls.phone.number.is_empty()
                {
                    debug!("Audio attempt over, resuming A2DP");
                    self.resume_a2dp().await;
                }
                self.audio_teardown_pending = false;
                if self.audio_state == AudioState::Connecting {
                    self.audio_state = AudioState::Disconnected;
                    self.broadcast_audio(&device, AudioState::Disconnected, AudioState::Connecting)
                        .await;
                }
            }
            LinkAudioState::Disconnecting => {}
        }
    }
}
