//! Behaviour shared by several states: broadcasts, admission, audio
//! parameters, call state bookkeeping and the AT command dispatch used while
//! a service level connection exists.

use tracing::{debug, error, info, warn};

use crate::at::ClccOutcome;
use crate::events::{Notification, SessionEvent, StackEvent, StackEventKind};
use crate::retry::RetryDecision;
use crate::timers::{TimerFired, TimerKind};
use crate::types::{
    cme, A2dpPlayState, AudioParameter, AudioParams, AudioState, BondState, CallState,
    CallStateUpdate, ClccEntry, CodecKind, ConnectionState, DeviceId, LinkConnectionState,
    PeerPriority, VolumeKind, VrState,
};

use super::{HandsfreeSession, HfpState, ProcessOutcome};

const UNKNOWN_DEVICE_NAME: &str = "<unknown>";

impl HandsfreeSession {
    // ---- broadcasts ---------------------------------------------------

    /// Publish a connection transition; leaving Connected ends a virtual call
    pub(super) async fn broadcast_connection(
        &mut self,
        device: &DeviceId,
        current: ConnectionState,
        previous: ConnectionState,
    ) {
        debug!("Connection state {}: {} -> {}", device, previous, current);
        if previous == ConnectionState::Connected {
            self.end_virtual_call().await;
        }
        self.notifications.publish(Notification::ConnectionStateChanged {
            device: device.clone(),
            previous,
            current,
        });
    }

    /// Publish an audio transition; losing audio ends a virtual call
    pub(super) async fn broadcast_audio(
        &mut self,
        device: &DeviceId,
        current: AudioState,
        previous: AudioState,
    ) {
        if previous == AudioState::Connected {
            self.end_virtual_call().await;
        }
        debug!("Audio state {}: {} -> {}", device, previous, current);
        self.notifications.publish(Notification::AudioStateChanged {
            device: device.clone(),
            previous,
            current,
        });
    }

    // ---- admission and link commands ------------------------------------

    /// Admission policy for unsolicited inbound connections
    pub(super) async fn ok_to_connect(&self, device: &DeviceId) -> bool {
        let policy = &self.collab.policy;
        if policy.is_quiet_mode().await && self.registry.target().is_none() {
            info!("Rejecting inbound {} in quiet mode", device);
            return false;
        }
        let priority = policy.priority(device).await;
        let accepted = priority.allows_connection()
            || (priority == PeerPriority::Undefined
                && policy.bond_state(device).await != BondState::None);
        if !accepted {
            info!("Rejecting inbound {}: priority {:?}", device, priority);
        }
        accepted
    }

    /// Drop an inbound link and let another profile try the peer
    pub(super) async fn reject_connection(&self, device: &DeviceId) {
        warn!("Incoming connection from {} rejected", device);
        self.link_disconnect(device).await;
        self.collab.policy.connect_other_profile(device).await;
    }

    pub(super) async fn link_connect(&self, device: &DeviceId) -> bool {
        match self.collab.radio.connect(device).await {
            Ok(()) => true,
            Err(e) => {
                error!("Link connect to {} failed: {}", device, e);
                false
            }
        }
    }

    pub(super) async fn link_disconnect(&self, device: &DeviceId) -> bool {
        match self.collab.radio.disconnect(device).await {
            Ok(()) => true,
            Err(e) => {
                error!("Link disconnect from {} failed: {}", device, e);
                false
            }
        }
    }

    pub(super) async fn link_connect_audio(&self, device: &DeviceId) -> bool {
        match self.collab.radio.connect_audio(device).await {
            Ok(()) => true,
            Err(e) => {
                error!("Audio connect to {} failed: {}", device, e);
                false
            }
        }
    }

    pub(super) async fn link_disconnect_audio(&self, device: &DeviceId) -> bool {
        match self.collab.radio.disconnect_audio(device).await {
            Ok(()) => true,
            Err(e) => {
                error!("Audio disconnect from {} failed: {}", device, e);
                false
            }
        }
    }

    /// Retry ledger gate for an outbound connect
    pub(super) fn may_retry(&mut self, device: &DeviceId) -> bool {
        matches!(self.retries.check(device), RetryDecision::Proceed { .. })
    }

    /// Bookkeeping once an outbound connect has been issued
    pub(super) fn connect_issued(&mut self, device: &DeviceId) {
        self.retries.record_attempt(device);
        let timeout = self.config.connect_timeout;
        self.timers
            .arm(TimerKind::ConnectTimeout, Some(device.clone()), timeout);
    }

    /// Turn a ConnectTimeout into a Disconnected notification for the target
    pub(super) fn connect_timed_out(&mut self, device: Option<&DeviceId>) {
        let target = self.registry.target().cloned();
        match (target, device) {
            (Some(target), Some(fired)) if &target == fired => {
                info!("Connect to {} timed out", target);
                let event = StackEvent::new(
                    target,
                    StackEventKind::ConnectionStateChanged(LinkConnectionState::Disconnected),
                );
                self.enqueue(SessionEvent::Stack(event));
            }
            _ => debug!("Connect timeout for {:?} no longer relevant", device),
        }
    }

    pub(super) fn add_connected(&mut self, device: &DeviceId) -> bool {
        match self.registry.add_connected(device.clone()) {
            Ok(()) => true,
            Err(e) => {
                error!("{}", e);
                false
            }
        }
    }

    pub(super) fn set_current(&mut self, device: Option<DeviceId>) {
        if let Err(e) = self.registry.set_current(device) {
            error!("{}", e);
        }
    }

    pub(super) fn set_active_audio(&mut self, device: Option<DeviceId>) {
        if let Err(e) = self.registry.set_active_audio(device) {
            error!("{}", e);
        }
    }

    /// After one of several connected devices left: pick the most recently
    /// connected survivor as current when the current device was the one
    /// that left, move to `next` and refresh observers about the survivor.
    pub(super) async fn settle_after_multi_disconnect(&mut self, next: HfpState) {
        if self.registry.current().is_none() {
            self.registry.reassign_current_to_last();
        }
        debug!("Current device after disconnect: {:?}", self.registry.current());
        self.transition_to(next);
        if let Some(current) = self.registry.current().cloned() {
            self.broadcast_connection(&current, ConnectionState::Connected, ConnectionState::Disconnected)
                .await;
        }
    }

    /// Connected or AudioOn depending on the voice channel
    pub(super) fn settled_state(&self) -> HfpState {
        if self.audio_state == AudioState::Connected {
            HfpState::AudioOn
        } else {
            HfpState::Connected
        }
    }

    pub(super) fn is_connected_state(&self) -> bool {
        matches!(self.state, HfpState::Connected | HfpState::AudioOn)
    }

    pub(super) fn is_audio_on(&self) -> bool {
        self.state == HfpState::AudioOn
    }

    // ---- audio parameters -------------------------------------------------

    async fn headset_name(&self, device: &DeviceId) -> String {
        self.collab
            .policy
            .device_name(device)
            .await
            .unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string())
    }

    /// Reset a freshly connected device to default parameters
    pub(super) async fn config_audio_parameters(&mut self, device: &DeviceId) {
        self.registry
            .set_audio_params(device.clone(), AudioParams::default());
        let name = self.headset_name(device).await;
        let audio = &self.collab.audio;
        audio.set_parameter(&AudioParameter::HeadsetName(name)).await;
        audio.set_parameter(&AudioParameter::NoiseReduction(true)).await;
        debug!("Audio parameters reset for {}", device);
    }

    /// Push the stored parameters of the audio device
    pub(super) async fn set_audio_parameters(&self, device: &DeviceId) {
        let params = match self.registry.audio_params(device) {
            Some(params) => *params,
            None => {
                error!("No audio parameters stored for {}", device);
                AudioParams {
                    noise_reduction: false,
                    codec: CodecKind::Narrowband,
                }
            }
        };
        let name = self.headset_name(device).await;
        let audio = &self.collab.audio;
        audio
            .set_parameter(&AudioParameter::WideBand(params.codec == CodecKind::Wideband))
            .await;
        audio.set_parameter(&AudioParameter::HeadsetName(name)).await;
        audio
            .set_parameter(&AudioParameter::NoiseReduction(params.noise_reduction))
            .await;
    }

    pub(super) async fn wide_band_off(&self) {
        self.collab
            .audio
            .set_parameter(&AudioParameter::WideBand(false))
            .await;
    }

    /// Forget held back A2DP state after a fresh SLC, then suspend media if
    /// a call is already running
    pub(super) async fn reset_a2dp_after_slc(&mut self) {
        self.calls.a2dp.reset_pending();
        if self.calls.is_in_call() && self.calls.a2dp.is_connected() {
            self.collab
                .audio
                .set_parameter(&AudioParameter::A2dpSuspended(true))
                .await;
            self.calls.a2dp.suspended = true;
        }
    }

    pub(super) async fn resume_a2dp(&mut self) {
        self.calls.a2dp.release();
        self.collab
            .audio
            .set_parameter(&AudioParameter::A2dpSuspended(false))
            .await;
    }

    async fn suspend_a2dp(&mut self) {
        self.calls.a2dp.suspended = true;
        self.collab
            .audio
            .set_parameter(&AudioParameter::A2dpSuspended(true))
            .await;
    }

    // ---- call state -------------------------------------------------------

    /// Record a call state update and forward it to the peers
    pub(super) async fn process_call_state(&mut self, update: CallStateUpdate, is_virtual: bool) {
        let mut update = update;
        let stabilized = self.record_call_state(&mut update).await;
        if stabilized {
            debug!("Virtual call keeps the call indicator active");
        } else if !is_virtual && self.end_virtual_call().await {
            // Ending the virtual call reset the phone state to idle
            self.calls.phone.apply(&update);
        }
        self.process_a2dp_state(update).await;
    }

    async fn record_call_state(&mut self, update: &mut CallStateUpdate) -> bool {
        let stabilized = self.calls.apply_call_state(update);
        debug!(
            "Call state active={} held={} state={}",
            update.num_active, update.num_held, update.call_state
        );

        if self.dialing_out && update.call_state == CallState::Dialing {
            let device = self.timers.device_for(TimerKind::DialingOutTimeout);
            self.timers.cancel_kind(TimerKind::DialingOutTimeout);
            self.dialing_out = false;
            match device {
                Some(device) => self.responder.ok(&device).await,
                None => debug!("Dial placed but no device is waiting"),
            }
        }

        stabilized
    }

    /// Suspend media before telling peers about a call, holding updates back
    /// while media still plays
    async fn process_a2dp_state(&mut self, update: CallStateUpdate) {
        if self.calls.is_in_call() && self.is_connected_state() && self.calls.a2dp.is_connected() {
            if self.calls.a2dp.suspend() {
                debug!("Suspending A2DP for call");
                self.collab
                    .audio
                    .set_parameter(&AudioParameter::A2dpSuspended(true))
                    .await;
            }
            if self.calls.a2dp.is_playing() && !self.calls.is_virtual_call_active() {
                debug!("A2DP still playing, holding call state back");
                self.calls.a2dp.pending_ciev = true;
                self.calls.a2dp.pending_call_states.push(update);
                return;
            }
        }

        if self.state != HfpState::Disconnected {
            if let Err(e) = self.collab.radio.phone_state_changed(&update).await {
                warn!("Failed to forward call state: {}", e);
            }
        }

        if self.calls.a2dp.suspended
            && !self.is_audio_on()
            && !self.calls.is_in_call()
            && update.number.is_empty()
        {
            debug!("Call over, resuming A2DP");
            self.resume_a2dp().await;
        }
    }

    /// Start a SCO session that is not backed by a network call
    pub(super) async fn begin_virtual_call(&mut self) -> bool {
        if !self.calls.can_begin_virtual_call() {
            error!("Virtual call refused: call or voice recognition in progress");
            return false;
        }
        self.calls.vr.virtual_call_active = true;

        if self.calls.a2dp.is_connected() {
            self.suspend_a2dp().await;
            if self.calls.a2dp.is_playing() {
                debug!("Virtual call waits for A2DP to stop");
                self.calls.a2dp.pending_ciev = true;
                return true;
            }
        }
        self.send_virtual_call_setup().await;
        info!("Virtual call started");
        true
    }

    async fn send_virtual_call_setup(&mut self) {
        for state in [CallState::Dialing, CallState::Alerting] {
            self.process_call_state(CallStateUpdate::new(0, 0, state), true)
                .await;
        }
        let delay = self.config.virtual_call_active_delay;
        self.timers.arm(TimerKind::VirtualCallActive, None, delay);
    }

    /// End the virtual call; false when none was running
    pub(super) async fn end_virtual_call(&mut self) -> bool {
        if !self.calls.is_virtual_call_active() {
            return false;
        }
        self.calls.vr.virtual_call_active = false;
        self.timers.cancel(TimerKind::VirtualCallActive, None);

        let mut idle = CallStateUpdate::new(0, 0, CallState::Idle);
        self.record_call_state(&mut idle).await;
        self.process_a2dp_state(idle).await;
        info!("Virtual call ended");
        true
    }

    pub(super) async fn process_a2dp_play_state(
        &mut self,
        previous: A2dpPlayState,
        current: A2dpPlayState,
    ) {
        debug!(
            "A2DP play state {:?} -> {:?}, suspended={}",
            previous, current, self.calls.a2dp.suspended
        );
        if previous == A2dpPlayState::Playing {
            if self.calls.a2dp.suspended && self.calls.a2dp.pending_ciev {
                if self.calls.is_virtual_call_active() {
                    self.send_virtual_call_setup().await;
                } else {
                    let pending = std::mem::take(&mut self.calls.a2dp.pending_call_states);
                    for update in pending {
                        if let Err(e) = self.collab.radio.phone_state_changed(&update).await {
                            warn!("Failed to forward held back call state: {}", e);
                        }
                    }
                }
                self.calls.a2dp.pending_ciev = false;
            }
        } else if (self.calls.is_in_call() || self.calls.is_virtual_call_active())
            && self.is_connected_state()
        {
            if self.calls.a2dp.suspended {
                error!("A2DP started while in call");
            } else {
                self.suspend_a2dp().await;
            }
        }
        self.calls.a2dp.play_state = current;
    }

    pub(super) fn process_battery(&mut self, level: u32, scale: u32) {
        match self.calls.set_battery(level, scale) {
            Some(charge) => debug!("Battery charge now {}", charge),
            None => error!("Bad battery report {}/{}", level, scale),
        }
    }

    // ---- voice recognition ------------------------------------------------

    /// AT+BVRA from the peer
    async fn process_vr_event(&mut self, state: VrState, device: &DeviceId) {
        match state {
            VrState::Started => {
                if self.calls.is_virtual_call_active() || self.calls.is_in_call() {
                    self.responder.error(device, cme::NONE).await;
                    return;
                }
                if let Err(e) = self.collab.telephony.launch_voice_command().await {
                    error!("Voice command unavailable: {}", e);
                    self.responder.error(device, cme::NONE).await;
                    return;
                }
                self.calls.vr.waiting = true;
                let timeout = self.config.start_vr_timeout;
                self.timers
                    .arm(TimerKind::StartVrTimeout, Some(device.clone()), timeout);
            }
            VrState::Stopped => {
                if !(self.calls.vr.started || self.calls.vr.waiting) {
                    self.responder.error(device, cme::NONE).await;
                    return;
                }
                self.responder.ok(device).await;
                self.calls.vr.clear_recognition();
                if !self.calls.is_in_call() {
                    if let Some(active) = self.registry.active_audio().cloned() {
                        self.link_disconnect_audio(&active).await;
                        self.resume_a2dp().await;
                    }
                }
            }
        }
    }

    /// Voice recognition started on the gateway side
    pub(super) async fn process_local_vr_start(&mut self, requested: &DeviceId) {
        if self.calls.vr.started || self.calls.is_in_call() {
            error!("Voice recognition start ignored while started or in call");
            return;
        }
        self.calls.vr.started = true;

        let device;
        let need_audio;
        if self.calls.vr.waiting {
            device = match self.timers.device_for(TimerKind::StartVrTimeout) {
                Some(device) => device,
                None => return,
            };
            info!("Voice recognition started for {}", device);
            self.calls.vr.waiting = false;
            self.responder.ok(&device).await;
            self.timers.cancel_kind(TimerKind::StartVrTimeout);
            need_audio = true;
        } else {
            let target = if self.registry.is_connected(requested) {
                Some(requested.clone())
            } else {
                self.registry.current().cloned()
            };
            let Some(target) = target else {
                error!("No device for voice recognition");
                return;
            };
            need_audio = match self.collab.radio.start_voice_recognition(&target).await {
                Ok(()) => true,
                Err(e) => {
                    warn!("Start voice recognition on {} failed: {}", target, e);
                    false
                }
            };
            device = target;
        }

        if need_audio && !self.is_audio_on() {
            debug!("Bringing up audio for voice recognition");
            self.suspend_a2dp().await;
            self.link_connect_audio(&device).await;
        }
    }

    /// Voice recognition stopped on the gateway side
    pub(super) async fn process_local_vr_stop(&mut self) {
        if !(self.calls.vr.started || self.calls.vr.waiting) {
            return;
        }
        self.calls.vr.clear_recognition();

        let Some(active) = self.registry.active_audio().cloned() else {
            return;
        };
        let stopped = match self.collab.radio.stop_voice_recognition(&active).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Stop voice recognition on {} failed: {}", active, e);
                false
            }
        };
        if stopped
            && (!self.calls.is_in_call() || self.calls.phone.call_state == CallState::Incoming)
        {
            self.link_disconnect_audio(&active).await;
            self.resume_a2dp().await;
        }
    }

    // ---- call control from the peer ---------------------------------------

    async fn process_hangup(&mut self) {
        if self.calls.is_virtual_call_active() {
            self.end_virtual_call().await;
        } else if let Err(e) = self.collab.telephony.hangup_call().await {
            error!("Hang up failed: {}", e);
        }
    }

    async fn answer_call(&self) {
        if let Err(e) = self.collab.telephony.answer_call().await {
            error!("Answer failed: {}", e);
        }
    }

    async fn last_dialled_number(&self) -> Option<String> {
        match self.collab.telephony.last_dialled_number().await {
            Ok(number) => number,
            Err(e) => {
                error!("Last dialled number unavailable: {}", e);
                None
            }
        }
    }

    async fn process_dial_call(&mut self, number: &str, device: &DeviceId) {
        if self.dialing_out {
            debug!("Dial from {} while already dialing", device);
            self.responder.error(device, cme::NONE).await;
            return;
        }

        let dial_number = if number.is_empty() || number.starts_with('>') {
            if number.starts_with(">9999") {
                self.responder.error(device, cme::NONE).await;
                return;
            }
            match self.last_dialled_number().await {
                Some(number) => number,
                None => {
                    debug!("No last dialled number");
                    self.responder.error(device, cme::NONE).await;
                    return;
                }
            }
        } else {
            number.strip_suffix(';').unwrap_or(number).to_string()
        };

        self.end_virtual_call().await;

        if let Err(e) = self.collab.telephony.dial(&dial_number).await {
            error!("Dial {} failed: {}", dial_number, e);
            self.responder.error(device, cme::NONE).await;
            return;
        }
        self.dialing_out = true;
        let timeout = self.config.dialing_out_timeout;
        self.timers
            .arm(TimerKind::DialingOutTimeout, Some(device.clone()), timeout);
    }

    async fn process_key_pressed(&mut self) {
        if self.calls.phone.call_state == CallState::Incoming {
            self.answer_call().await;
        } else if self.calls.phone.num_active > 0 {
            if !self.is_audio_on() {
                if let Some(current) = self.registry.current().cloned() {
                    self.link_connect_audio(&current).await;
                }
            } else if let Err(e) = self.collab.telephony.hangup_call().await {
                error!("Hang up failed: {}", e);
            }
        } else {
            match self.last_dialled_number().await {
                Some(number) => {
                    if let Err(e) = self.collab.telephony.dial(&number).await {
                        error!("Redial failed: {}", e);
                    }
                }
                None => debug!("Key press with no last dialled number"),
            }
        }
    }

    async fn process_volume(&mut self, kind: VolumeKind, volume: u8, device: &DeviceId) {
        if !self.registry.is_active_audio(device) && self.calls.is_in_call() {
            warn!("Ignoring volume change from {} during call", device);
            return;
        }
        match kind {
            VolumeKind::Speaker => {
                self.calls.phone.speaker_volume = volume;
                let show_ui = self.is_audio_on();
                self.collab.audio.set_sco_volume(volume, show_ui).await;
            }
            VolumeKind::Microphone => self.calls.phone.mic_volume = volume,
        }
    }

    async fn process_noise_reduction(&mut self, enabled: bool, device: &DeviceId) {
        if self.registry.audio_params(device).is_some() {
            self.registry.audio_params_mut(device).noise_reduction = enabled;
            debug!("Noise reduction for {} now {}", device, enabled);
        } else {
            error!("No audio parameters for {}", device);
        }
        if self.registry.is_active_audio(device) && self.audio_state == AudioState::Connected {
            self.set_audio_parameters(device).await;
        }
    }

    async fn process_codec_negotiated(&mut self, codec: Option<CodecKind>, device: &DeviceId) {
        let codec_in_use = codec.unwrap_or_default();
        if self.registry.audio_params(device).is_some() {
            self.registry.audio_params_mut(device).codec = codec_in_use;
        } else {
            error!("No audio parameters for {}", device);
        }
        let wide = codec == Some(CodecKind::Wideband);
        debug!("Codec for {} now {:?}", device, codec);
        self.collab
            .audio
            .set_parameter(&AudioParameter::WideBand(wide))
            .await;
    }

    // ---- AT dispatch --------------------------------------------------------

    /// Everything a peer can ask for once the service level connection is up
    pub(super) async fn process_at_event(&mut self, event: StackEvent) {
        let StackEvent { device, kind } = event;
        match kind {
            StackEventKind::VrStateChanged(state) => self.process_vr_event(state, &device).await,
            StackEventKind::AnswerCall => self.answer_call().await,
            StackEventKind::HangupCall => self.process_hangup().await,
            StackEventKind::VolumeChanged { kind, volume } => {
                self.process_volume(kind, volume, &device).await
            }
            StackEventKind::DialCall { number } => self.process_dial_call(&number, &device).await,
            StackEventKind::SendDtmf { digit } => {
                if let Err(e) = self.collab.telephony.send_dtmf(digit).await {
                    error!("DTMF {} failed: {}", digit, e);
                }
            }
            StackEventKind::NoiseReductionChanged { enabled } => {
                self.process_noise_reduction(enabled, &device).await
            }
            StackEventKind::CodecNegotiated { codec } => {
                self.process_codec_negotiated(codec, &device).await
            }
            StackEventKind::AtChld { action } => self.responder.chld(&device, action).await,
            StackEventKind::SubscriberNumberRequest => self.responder.cnum(&device).await,
            StackEventKind::AtCind => self.responder.cind(&device, &self.calls).await,
            StackEventKind::AtCops => self.responder.cops(&device).await,
            StackEventKind::AtClcc => {
                let outcome = self.responder.clcc(&device, &self.calls).await;
                if outcome == ClccOutcome::AwaitingTelephony {
                    let timeout = self.config.clcc_response_timeout;
                    self.timers
                        .arm(TimerKind::ClccResponseTimeout, Some(device), timeout);
                }
            }
            StackEventKind::UnknownAt { command } => {
                let hit = self
                    .responder
                    .unknown_at(&device, &command, &self.config.vendor_commands)
                    .await;
                if let Some(hit) = hit {
                    self.notifications.publish(Notification::VendorSpecificCommand {
                        device,
                        command: hit.command,
                        company_id: hit.company_id,
                        args: hit.args,
                    });
                }
            }
            StackEventKind::KeyPressed => self.process_key_pressed().await,
            StackEventKind::AtBind { indicators, kind } => {
                self.responder
                    .bind(
                        &device,
                        kind,
                        &indicators,
                        &self.config.hf_indicators,
                        &mut self.calls.hf_indicators,
                    )
                    .await
            }
            StackEventKind::AtBiev { args } => {
                let update = self
                    .responder
                    .biev(&device, &args, &self.config.hf_indicators)
                    .await;
                if let Some((indicator, value)) = update {
                    self.notifications.publish(Notification::HfIndicatorValueChanged {
                        device,
                        indicator,
                        value,
                    });
                }
            }
            StackEventKind::ConnectionStateChanged(_) | StackEventKind::AudioStateChanged(_) => {
                warn!("Link state event from {} reached the AT dispatcher", device);
            }
        }
    }

    // ---- telephony pushes and timers while connected -------------------------

    /// Events handled the same way in Connected, AudioOn and MultiPending
    pub(super) async fn handle_connected_common(&mut self, event: SessionEvent) -> ProcessOutcome {
        match event {
            SessionEvent::CallStateChanged { update, is_virtual } => {
                self.process_call_state(update, is_virtual).await
            }
            SessionEvent::BatteryChanged { level, scale } => self.process_battery(level, scale),
            SessionEvent::DeviceStatusChanged(status) => {
                self.calls.phone.status = status;
                if let Err(e) = self.collab.radio.device_status_changed(&status).await {
                    warn!("Failed to forward device status: {}", e);
                }
            }
            SessionEvent::ClccResponse(entry) => self.process_clcc_response(entry).await,
            SessionEvent::SendVendorResultCode {
                device,
                command,
                arg,
            } => {
                self.responder
                    .vendor_result_code(&device, &command, &arg)
                    .await
            }
            SessionEvent::SetCodec(device, codec) => {
                if !self.registry.is_connected(&device) {
                    warn!("Codec change for {} which is not connected", device);
                } else if let Err(e) = self.collab.radio.set_codec(&device, codec).await {
                    error!("Set codec on {} failed: {}", device, e);
                }
            }
            SessionEvent::A2dpConnectionChanged(connection) => {
                debug!("A2DP connection now {:?}", connection);
                self.calls.a2dp.connection = connection;
            }
            SessionEvent::A2dpPlayStateChanged { previous, current } => {
                self.process_a2dp_play_state(previous, current).await
            }
            SessionEvent::CallTypeChanged { cs_call } => {
                debug!("Call type cs_call={}", cs_call);
                self.calls.phone.cs_call = cs_call;
            }
            SessionEvent::Timer(fired) => return self.handle_connected_timer(fired).await,
            _ => return ProcessOutcome::NotHandled,
        }
        ProcessOutcome::Handled
    }

    async fn handle_connected_timer(&mut self, fired: TimerFired) -> ProcessOutcome {
        let device = fired.key.device;
        match fired.key.kind {
            TimerKind::DialingOutTimeout => {
                if self.dialing_out {
                    warn!("Timed out waiting for the call to be placed");
                    self.dialing_out = false;
                    if let Some(device) = device {
                        self.responder.error(&device, cme::NONE).await;
                    }
                }
            }
            TimerKind::StartVrTimeout => {
                if self.calls.vr.waiting {
                    warn!("Timed out waiting for voice recognition to start");
                    self.calls.vr.waiting = false;
                    if let Some(device) = device {
                        self.responder.error(&device, cme::NONE).await;
                    }
                }
            }
            TimerKind::ClccResponseTimeout => {
                if let Some(device) = device {
                    self.responder
                        .clcc_entry(&device, &ClccEntry::terminator())
                        .await;
                }
            }
            TimerKind::QueryPhoneState => {
                debug!("Querying phone state after SLC");
                if let Err(e) = self.collab.telephony.query_phone_state().await {
                    error!("Phone state query failed: {}", e);
                }
            }
            TimerKind::ConnectTimeout | TimerKind::VirtualCallActive => {
                return ProcessOutcome::NotHandled
            }
        }
        ProcessOutcome::Handled
    }

    async fn process_clcc_response(&mut self, entry: ClccEntry) {
        let Some(device) = self.timers.device_for(TimerKind::ClccResponseTimeout) else {
            warn!("No device waiting for a current calls list");
            return;
        };
        if entry.is_terminator() {
            self.timers
                .cancel(TimerKind::ClccResponseTimeout, Some(&device));
        }
        self.responder.clcc_entry(&device, &entry).await;
    }

    /// SCO stream volume changed on the gateway side
    pub(super) async fn process_sco_volume(&mut self, volume: u8) {
        let Some(active) = self.registry.active_audio().cloned() else {
            return;
        };
        if self.calls.phone.speaker_volume != volume {
            self.calls.phone.speaker_volume = volume;
            if let Err(e) = self
                .collab
                .radio
                .set_volume(VolumeKind::Speaker, volume, &active)
                .await
            {
                warn!("Failed to set speaker volume on {}: {}", active, e);
            }
        }
    }

    /// Accept one more inbound peer while others are connected
    pub(super) async fn admit_additional(&mut self, device: &DeviceId) -> bool {
        if self.ok_to_connect(device).await && self.registry.has_capacity() {
            self.broadcast_connection(device, ConnectionState::Connected, ConnectionState::Disconnected)
                .await;
            self.add_connected(device);
            self.set_current(Some(device.clone()));
            self.config_audio_parameters(device).await;
            true
        } else {
            self.reject_connection(device).await;
            false
        }
    }

    /// SCO came up on a listed device; false when it was refused
    pub(super) async fn accept_audio(&mut self, device: &DeviceId) -> bool {
        if !self.calls.is_sco_acceptable(self.config.audio_route_allowed) {
            info!("Audio on {} not acceptable, tearing it down", device);
            self.link_disconnect_audio(device).await;
            return false;
        }
        self.audio_state = AudioState::Connected;
        self.audio_teardown_pending = false;
        self.set_audio_parameters(device).await;
        self.collab.audio.set_sco_routing(true).await;
        self.broadcast_audio(device, AudioState::Connected, AudioState::Connecting)
            .await;
        self.set_active_audio(Some(device.clone()));
        true
    }

    /// SCO went away while it had been up
    pub(super) async fn audio_lost(&mut self, device: &DeviceId) {
        let previous = self.audio_state;
        if previous == AudioState::Disconnected {
            return;
        }
        self.audio_state = AudioState::Disconnected;
        self.audio_teardown_pending = false;
        self.set_active_audio(None);
        if self.collab.audio.is_speakerphone_on().await {
            self.collab.audio.set_sco_routing(false).await;
            self.collab.audio.set_speakerphone(true).await;
        } else {
            self.collab.audio.set_sco_routing(false).await;
        }
        self.end_virtual_call().await;
        if self.calls.a2dp.suspended
            && !self.calls.is_in_call()
            && self.calls.phone.number.is_empty()
        {
            self.resume_a2dp().await;
        }
        self.broadcast_audio(device, AudioState::Disconnected, previous)
            .await;
        if !self.calls.phone.cs_call {
            self.calls.phone.cs_call = true;
        }
    }

    /// The link of `device` dropped. When it carried the voice channel, the
    /// channel is closed out first. Returns whether that happened.
    pub(super) async fn audio_lost_with_link(&mut self, device: &DeviceId) -> bool {
        if self.audio_state == AudioState::Disconnected {
            return false;
        }
        let carried = self.registry.is_active_audio(device)
            || (self.registry.active_audio().is_none() && self.registry.connected_count() == 1);
        if !carried {
            return false;
        }
        self.audio_lost(device).await;
        true
    }

    /// Ask the radio to drop the voice channel unless that is already under way
    pub(super) async fn issue_audio_disconnect(&mut self, device: &DeviceId) -> bool {
        if self.audio_teardown_pending {
            debug!("Audio teardown on {} already requested", device);
            return true;
        }
        self.audio_teardown_pending = self.link_disconnect_audio(device).await;
        self.audio_teardown_pending
    }

    // ---- role cleanup ---------------------------------------------------

    /// Give up on an inbound peer that never finished connecting
    pub(super) async fn abandon_incoming(&mut self) {
        if let Some(incoming) = self.registry.incoming().cloned() {
            info!("Abandoning unfinished inbound connection from {}", incoming);
            self.broadcast_connection(
                &incoming,
                ConnectionState::Disconnected,
                ConnectionState::Connecting,
            )
            .await;
            self.registry.set_incoming(None);
        }
    }

    /// Disconnected holds no roles; roll back any connect left unresolved
    pub(super) async fn drop_leftover_roles(&mut self) {
        if let Some(target) = self.registry.take_target() {
            warn!("Dropping unresolved connect to {}", target);
            self.timers.cancel(TimerKind::ConnectTimeout, Some(&target));
            self.broadcast_connection(
                &target,
                ConnectionState::Disconnected,
                ConnectionState::Connecting,
            )
            .await;
        }
        self.abandon_incoming().await;
        self.registry.set_multi_disconnect(None);
    }
}
