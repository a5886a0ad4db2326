//! AudioOn: the voice channel to one peer is up

use tracing::{debug, error, info, warn};

use crate::events::{SessionEvent, StackEvent, StackEventKind};
use crate::timers::TimerKind;
use crate::types::{ConnectionState, DeviceId, LinkAudioState, LinkConnectionState};

use super::{HandsfreeSession, HfpState, ProcessOutcome};

impl HandsfreeSession {
    pub(super) async fn handle_audio_on(&mut self, event: SessionEvent) -> ProcessOutcome {
        match event {
            SessionEvent::Connect(device) => self.audio_on_connect(device).await,
            SessionEvent::Disconnect(device) => self.audio_on_disconnect(device).await,
            SessionEvent::Timer(fired) if fired.key.kind == TimerKind::ConnectTimeout => {
                self.connect_timed_out(fired.key.device.as_ref());
            }
            SessionEvent::DisconnectAudio => self.disconnect_active_audio().await,
            SessionEvent::ConnectAudio => return ProcessOutcome::NotHandled,
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
            SessionEvent::ScoVolumeChanged(volume) => self.process_sco_volume(volume).await,
            SessionEvent::Stack(StackEvent { device, kind }) => match kind {
                StackEventKind::ConnectionStateChanged(state) => {
                    self.audio_on_connection_event(state, device).await
                }
                StackEventKind::AudioStateChanged(state) => {
                    self.audio_on_audio_event(state, device).await
                }
                kind => self.process_at_event(StackEvent::new(device, kind)).await,
            },
            other => return self.handle_connected_common(other).await,
        }
        ProcessOutcome::Handled
    }

    pub(super) async fn disconnect_active_audio(&mut self) {
        if let Some(active) = self.registry.active_audio().cloned() {
            if self.issue_audio_disconnect(&active).await {
                debug!("Disconnecting audio on {}", active);
            }
        }
    }

    async fn audio_on_connect(&mut self, device: DeviceId) {
        if self.registry.is_connected(&device) {
            error!("Connect to {} ignored, already connected", device);
            return;
        }

        if self.registry.max_connections() == 1 {
            // Audio goes first, then the current peer, then the new one
            if self.audio_teardown_pending {
                self.deferred.push_back(SessionEvent::Connect(device));
                return;
            }
            let Some(current) = self.registry.current().cloned() else {
                error!("AudioOn without a current device");
                return;
            };
            self.deferred
                .push_back(SessionEvent::Disconnect(current.clone()));
            self.deferred.push_back(SessionEvent::Connect(device));
            self.issue_audio_disconnect(&current).await;
            return;
        }

        if !self.may_retry(&device) {
            return;
        }

        if !self.registry.has_capacity() {
            let first = self.registry.connected_at(0).cloned();
            let evictee = match first {
                Some(first) if self.registry.is_active_audio(&first) => {
                    self.registry.connected_at(1).cloned()
                }
                other => other,
            };
            let Some(evictee) = evictee else {
                error!("No device to drop for {}", device);
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
            self.registry.set_multi_disconnect(Some(evictee));
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
        }
        self.transition_to(HfpState::MultiPending);
        self.connect_issued(&device);
    }

    async fn audio_on_disconnect(&mut self, device: DeviceId) {
        if !self.registry.is_connected(&device) {
            debug!("Disconnect {} ignored, not connected", device);
            return;
        }

        if self.registry.is_active_audio(&device) {
            // Audio first, the disconnect is looked at again afterwards
            self.deferred.push_back(SessionEvent::Disconnect(device.clone()));
            if !self.issue_audio_disconnect(&device).await {
                self.transition_to(HfpState::Connected);
            }
            return;
        }

        self.broadcast_connection(&device, ConnectionState::Disconnecting, ConnectionState::Connected)
            .await;
        if !self.link_disconnect(&device).await {
            warn!("Disconnect of {} failed while audio is on", device);
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
        }
    }

    async fn audio_on_connection_event(&mut self, state: LinkConnectionState, device: DeviceId) {
        match state {
            LinkConnectionState::Disconnected => {
                if !self.registry.is_connected(&device) {
                    error!("Disconnected from unknown device {}", device);
                    return;
                }
                if self.audio_lost_with_link(&device).await {
                    self.transition_to(HfpState::Connected);
                }
                self.wide_band_off().await;
                self.registry.remove_connected(&device);
                info!("{} removed while audio on", device);
                self.broadcast_connection(
                    &device,
                    ConnectionState::Disconnected,
                    ConnectionState::Connected,
                )
                .await;
                if self.registry.is_empty() {
                    self.transition_to(HfpState::Disconnected);
                } else {
                    let next = self.settled_state();
                    self.settle_after_multi_disconnect(next).await;
                }
            }
            LinkConnectionState::SlcConnected => {
                self.retries.purge(&device);
                if let Err(e) = self.collab.telephony.query_phone_state().await {
                    error!("Phone state query failed: {}", e);
                }
            }
            LinkConnectionState::Connected => {
                if self.registry.is_connected(&device) {
                    self.registry.set_incoming(None);
                    self.registry.set_target(None);
                    return;
                }
                warn!("{} connected while audio is on", device);
                self.admit_additional(&device).await;
            }
            LinkConnectionState::Connecting | LinkConnectionState::Disconnecting => {
                error!("{} reported {} while audio on", device, state);
            }
        }
    }

    async fn audio_on_audio_event(&mut self, state: LinkAudioState, device: DeviceId) {
        if !self.registry.is_connected(&device) {
            error!("Audio changed on disconnected device {}", device);
            return;
        }
        match state {
            LinkAudioState::Disconnected => {
                self.audio_lost(&device).await;
                self.transition_to(HfpState::Connected);
            }
            LinkAudioState::Disconnecting => {}
            LinkAudioState::Connected | LinkAudioState::Connecting => {
                error!("{} reported audio {} while audio on", device, state);
            }
        }
    }
}
