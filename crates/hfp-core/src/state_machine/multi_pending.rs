//! MultiPending: another peer is being connected, or one of several is being
//! dropped, while at least one stays connected

use tracing::{debug, error, info, warn};

use crate::events::{SessionEvent, StackEvent, StackEventKind};
use crate::timers::TimerKind;
use crate::types::{AudioState, ConnectionState, DeviceId, LinkAudioState, LinkConnectionState};

use super::{HandsfreeSession, HfpState, ProcessOutcome};

impl HandsfreeSession {
    pub(super) async fn handle_multi_pending(&mut self, event: SessionEvent) -> ProcessOutcome {
        match event {
            SessionEvent::Connect(_) => return self.defer(event),
            SessionEvent::Disconnect(ref device) => {
                if !self.registry.is_target(device) {
                    return self.defer(event);
                }
                let device = device.clone();
                self.cancel_multi_target(device).await;
            }
            SessionEvent::ConnectAudio => {
                if let Some(current) = self.registry.current().cloned() {
                    self.link_connect_audio(&current).await;
                }
            }
            SessionEvent::DisconnectAudio => self.disconnect_active_audio().await,
            SessionEvent::Timer(fired) if fired.key.kind == TimerKind::ConnectTimeout => {
                self.connect_timed_out(fired.key.device.as_ref());
            }
            SessionEvent::StartVoiceRecognition(device) => {
                if self.registry.is_connected(&device) {
                    self.process_local_vr_start(&device).await;
                }
            }
            SessionEvent::StopVoiceRecognition(device) => {
                if self.registry.is_connected(&device) {
                    self.process_local_vr_stop().await;
                }
            }
            SessionEvent::StartVirtualCall { device, reply } => {
                let started =
                    self.registry.is_connected(&device) && self.begin_virtual_call().await;
                if let Some(reply) = reply {
                    let _ = reply.send(started);
                }
            }
            SessionEvent::StopVirtualCall { device, reply } => {
                let stopped = self.registry.is_connected(&device) && self.end_virtual_call().await;
                if let Some(reply) = reply {
                    let _ = reply.send(stopped);
                }
            }
            SessionEvent::ScoVolumeChanged(volume) => self.process_sco_volume(volume).await,
            SessionEvent::Stack(StackEvent { device, kind }) => match kind {
                StackEventKind::ConnectionStateChanged(state) => {
                    if self.timers.cancel(TimerKind::ConnectTimeout, Some(&device)) {
                        debug!("Connect timeout for {} cancelled", device);
                    }
                    self.multi_pending_connection_event(state, device).await
                }
                StackEventKind::AudioStateChanged(state) => {
                    self.multi_pending_audio_event(state, device).await
                }
                StackEventKind::CodecNegotiated { codec } => {
                    debug!("Codec {:?} from {} ignored while pending", codec, device);
                }
                kind => self.process_at_event(StackEvent::new(device, kind)).await,
            },
            other => return self.handle_connected_common(other).await,
        }
        ProcessOutcome::Handled
    }

    /// The peer being connected is no longer wanted
    async fn cancel_multi_target(&mut self, device: DeviceId) {
        info!("Cancelling connect to {}", device);
        self.timers.cancel(TimerKind::ConnectTimeout, Some(&device));
        self.broadcast_connection(
            &device,
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
        )
        .await;
        self.registry.set_target(None);
        if self.registry.multi_disconnect().is_some() {
            // the drop in flight settles the state once confirmed
            return;
        }
        self.link_disconnect(&device).await;
        if self.registry.is_empty() {
            self.transition_to(HfpState::Disconnected);
        } else {
            let next = self.settled_state();
            self.transition_to(next);
        }
    }

    async fn multi_pending_connection_event(
        &mut self,
        state: LinkConnectionState,
        device: DeviceId,
    ) {
        match state {
            LinkConnectionState::Disconnected => self.multi_pending_disconnected(device).await,
            LinkConnectionState::Connected => self.multi_pending_connected(device).await,
            LinkConnectionState::SlcConnected => {
                self.retries.purge(&device);
                if let Err(e) = self.collab.telephony.listen_for_phone_state(true).await {
                    warn!("Failed to start phone state listener: {}", e);
                }
                let delay = self.config.query_phone_state_delay;
                self.timers.arm(TimerKind::QueryPhoneState, None, delay);
                self.reset_a2dp_after_slc().await;
            }
            LinkConnectionState::Connecting => {
                if self.registry.is_connected(&device) {
                    error!("Connected device {} connecting back", device);
                } else if self.registry.is_target(&device) {
                    debug!("Stack and target {} are connecting", device);
                } else if self.registry.is_incoming(&device) {
                    error!("Another connecting event from incoming {}", device);
                }
            }
            LinkConnectionState::Disconnecting => {
                if self.registry.is_connected(&device) {
                    debug!("Stack is disconnecting {}", device);
                } else if self.registry.is_target(&device) {
                    error!("Target {} is getting disconnected", device);
                } else if self.registry.is_incoming(&device) {
                    error!("Incoming {} is getting disconnected", device);
                } else {
                    error!("Disconnecting unknown device {}", device);
                }
            }
        }
    }

    async fn multi_pending_disconnected(&mut self, device: DeviceId) {
        if self.registry.is_connected(&device) {
            if self.registry.is_multi_disconnect(&device) {
                self.audio_lost_with_link(&device).await;
                self.registry.set_multi_disconnect(None);
                self.registry.remove_connected(&device);
                info!("{} dropped while pending", device);
                self.broadcast_connection(
                    &device,
                    ConnectionState::Disconnected,
                    ConnectionState::Disconnecting,
                )
                .await;

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
            } else {
                // another peer went away while this one is connecting
                self.audio_lost_with_link(&device).await;
                self.registry.remove_connected(&device);
                info!("{} removed while pending", device);
                self.broadcast_connection(
                    &device,
                    ConnectionState::Disconnected,
                    ConnectionState::Connected,
                )
                .await;
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
            self.registry.set_multi_disconnect(None);
            if self.registry.is_empty() {
                self.transition_to(HfpState::Disconnected);
            } else {
                let next = self.settled_state();
                self.transition_to(next);
            }
        } else {
            error!("Unknown device {} disconnected", device);
        }
    }

    async fn multi_pending_connected(&mut self, device: DeviceId) {
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
            self.registry.set_multi_disconnect(None);
            let next = self.settled_state();
            self.transition_to(next);
        } else if self.registry.is_target(&device) {
            self.add_connected(&device);
            self.set_current(Some(device.clone()));
            self.registry.set_target(None);
            info!("{} connected alongside others", device);
            let next = self.settled_state();
            self.transition_to(next);
            self.broadcast_connection(
                &device,
                ConnectionState::Connected,
                ConnectionState::Connecting,
            )
            .await;
            self.config_audio_parameters(&device).await;
        } else {
            warn!("Other incoming device {} connected while pending", device);
            self.admit_additional(&device).await;
        }
    }

    async fn multi_pending_audio_event(&mut self, state: LinkAudioState, device: DeviceId) {
        if !self.registry.is_connected(&device) {
            error!("Audio changed on disconnected device {}", device);
            return;
        }
        match state {
            LinkAudioState::Connected => {
                self.accept_audio(&device).await;
            }
            LinkAudioState::Connecting => {
                self.audio_state = AudioState::Connecting;
                self.broadcast_audio(&device, AudioState::Connecting, AudioState::Disconnected)
                    .await;
            }
            LinkAudioState::Disconnected => self.audio_lost(&device).await,
            LinkAudioState::Disconnecting => {}
        }
    }
}
