//! Shared doubles for the session integration tests
//!
//! [`FakeStack`] stands in for every collaborator and records each command
//! the session issues. [`ManualTimers`] captures timer arms so a test decides
//! when (and whether) a timer fires. [`Harness`] wires both to a
//! [`HandsfreeSession`] and drives it directly, one event at a time.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use hfp_core::adapters::{AdapterPolicy, AudioRouting, Collaborators, RadioLink, Telephony};
use hfp_core::events::{NotificationHub, NotificationSubscriber};
use hfp_core::types::{
    AtResultCode, AudioParameter, BondState, CallStateUpdate, CodecKind, DeviceStatus,
    PeerPriority, VolumeKind,
};
use hfp_core::{
    CallState, ConnectionState, DeviceId, HandsfreeSession, LinkAudioState, LinkConnectionState,
    Notification, SessionConfig, SessionError, SessionEvent, StackEvent, StackEventKind,
    TimerFired, TimerKind, TimerScheduler,
};

pub fn dev_bytes(n: u8) -> [u8; 6] {
    [0x00, 0x1A, 0x7D, 0xDA, 0x71, n]
}

pub fn dev(n: u8) -> DeviceId {
    DeviceId::from_bytes(dev_bytes(n))
}

/// One command issued to a collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect(DeviceId),
    Disconnect(DeviceId),
    ConnectAudio(DeviceId),
    DisconnectAudio(DeviceId),
    SetCodec(DeviceId, CodecKind),
    StartVoiceRecognition(DeviceId),
    StopVoiceRecognition(DeviceId),
    AtResponse(AtResultCode, u8, DeviceId),
    AtString(String, DeviceId),
    SetVolume(VolumeKind, u8, DeviceId),
    PhoneState(CallStateUpdate),
    DeviceStatus(DeviceStatus),
    AnswerCall,
    HangupCall,
    SendDtmf(u8),
    Chld(u32),
    ListCurrentCalls,
    QueryPhoneState,
    ListenForPhoneState(bool),
    Dial(String),
    LaunchVoiceCommand,
    ScoRouting(bool),
    AudioParameter(AudioParameter),
    Speakerphone(bool),
    ScoVolume(u8, bool),
    ConnectOtherProfile(DeviceId),
}

/// Recording double for every collaborator
pub struct FakeStack {
    log: Mutex<Vec<Command>>,
    failing: Mutex<HashSet<&'static str>>,
    pub quiet_mode: Mutex<bool>,
    pub priority: Mutex<PeerPriority>,
    pub bond_state: Mutex<BondState>,
    pub speakerphone: Mutex<bool>,
    pub last_dialled: Mutex<Option<String>>,
    pub subscriber_number: Mutex<Option<String>>,
    pub operator: Mutex<Option<String>>,
    pub telephony_lists_calls: Mutex<bool>,
}

impl Default for FakeStack {
    fn default() -> Self {
        Self {
            log: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            quiet_mode: Mutex::new(false),
            priority: Mutex::new(PeerPriority::On),
            bond_state: Mutex::new(BondState::Bonded),
            speakerphone: Mutex::new(false),
            last_dialled: Mutex::new(None),
            subscriber_number: Mutex::new(Some("+15551230000".to_string())),
            operator: Mutex::new(Some("Carrier".to_string())),
            telephony_lists_calls: Mutex::new(true),
        }
    }
}

impl FakeStack {
    fn record(&self, command: Command) {
        self.log.lock().push(command);
    }

    /// Make the named operation fail from now on
    pub fn fail(&self, operation: &'static str) {
        self.failing.lock().insert(operation);
    }

    pub fn recover(&self, operation: &'static str) {
        self.failing.lock().remove(operation);
    }

    fn outcome(&self, operation: &'static str, device: Option<&DeviceId>) -> hfp_core::Result<()> {
        if self.failing.lock().contains(operation) {
            return Err(match device {
                Some(device) => SessionError::link(operation, device),
                None => SessionError::Telephony {
                    message: format!("{} unavailable", operation),
                },
            });
        }
        Ok(())
    }

    pub fn commands(&self) -> Vec<Command> {
        self.log.lock().clone()
    }

    pub fn take_commands(&self) -> Vec<Command> {
        std::mem::take(&mut *self.log.lock())
    }

    pub fn count(&self, wanted: &Command) -> usize {
        self.log.lock().iter().filter(|c| *c == wanted).count()
    }

    pub fn position(&self, wanted: &Command) -> Option<usize> {
        self.log.lock().iter().position(|c| c == wanted)
    }

    /// Final AT result codes sent to `device`, in order
    pub fn at_results(&self, device: &DeviceId) -> Vec<(AtResultCode, u8)> {
        self.log
            .lock()
            .iter()
            .filter_map(|c| match c {
                Command::AtResponse(code, error, to) if to == device => Some((*code, *error)),
                _ => None,
            })
            .collect()
    }

    /// Information lines sent to `device`, in order
    pub fn at_lines(&self, device: &DeviceId) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter_map(|c| match c {
                Command::AtString(text, to) if to == device => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn phone_states(&self) -> Vec<CallStateUpdate> {
        self.log
            .lock()
            .iter()
            .filter_map(|c| match c {
                Command::PhoneState(update) => Some(update.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl RadioLink for FakeStack {
    async fn connect(&self, device: &DeviceId) -> hfp_core::Result<()> {
        self.outcome("connect", Some(device))?;
        self.record(Command::Connect(device.clone()));
        Ok(())
    }

    async fn disconnect(&self, device: &DeviceId) -> hfp_core::Result<()> {
        self.outcome("disconnect", Some(device))?;
        self.record(Command::Disconnect(device.clone()));
        Ok(())
    }

    async fn connect_audio(&self, device: &DeviceId) -> hfp_core::Result<()> {
        self.outcome("connect_audio", Some(device))?;
        self.record(Command::ConnectAudio(device.clone()));
        Ok(())
    }

    async fn disconnect_audio(&self, device: &DeviceId) -> hfp_core::Result<()> {
        self.outcome("disconnect_audio", Some(device))?;
        self.record(Command::DisconnectAudio(device.clone()));
        Ok(())
    }

    async fn set_codec(&self, device: &DeviceId, codec: CodecKind) -> hfp_core::Result<()> {
        self.record(Command::SetCodec(device.clone(), codec));
        Ok(())
    }

    async fn start_voice_recognition(&self, device: &DeviceId) -> hfp_core::Result<()> {
        self.outcome("start_voice_recognition", Some(device))?;
        self.record(Command::StartVoiceRecognition(device.clone()));
        Ok(())
    }

    async fn stop_voice_recognition(&self, device: &DeviceId) -> hfp_core::Result<()> {
        self.record(Command::StopVoiceRecognition(device.clone()));
        Ok(())
    }

    async fn send_at_response(
        &self,
        code: AtResultCode,
        error: u8,
        device: &DeviceId,
    ) -> hfp_core::Result<()> {
        self.record(Command::AtResponse(code, error, device.clone()));
        Ok(())
    }

    async fn send_at_string(&self, text: &str, device: &DeviceId) -> hfp_core::Result<()> {
        self.record(Command::AtString(text.to_string(), device.clone()));
        Ok(())
    }

    async fn set_volume(&self, kind: VolumeKind, volume: u8, device: &DeviceId) -> hfp_core::Result<()> {
        self.record(Command::SetVolume(kind, volume, device.clone()));
        Ok(())
    }

    async fn phone_state_changed(&self, update: &CallStateUpdate) -> hfp_core::Result<()> {
        self.record(Command::PhoneState(update.clone()));
        Ok(())
    }

    async fn device_status_changed(&self, status: &DeviceStatus) -> hfp_core::Result<()> {
        self.record(Command::DeviceStatus(*status));
        Ok(())
    }
}

#[async_trait]
impl Telephony for FakeStack {
    async fn answer_call(&self) -> hfp_core::Result<()> {
        self.record(Command::AnswerCall);
        Ok(())
    }

    async fn hangup_call(&self) -> hfp_core::Result<()> {
        self.record(Command::HangupCall);
        Ok(())
    }

    async fn send_dtmf(&self, digit: u8) -> hfp_core::Result<()> {
        self.record(Command::SendDtmf(digit));
        Ok(())
    }

    async fn process_chld(&self, action: u32) -> hfp_core::Result<bool> {
        self.outcome("chld", None)?;
        self.record(Command::Chld(action));
        Ok(action <= 4)
    }

    async fn subscriber_number(&self) -> hfp_core::Result<Option<String>> {
        Ok(self.subscriber_number.lock().clone())
    }

    async fn network_operator(&self) -> hfp_core::Result<Option<String>> {
        self.outcome("operator", None)?;
        Ok(self.operator.lock().clone())
    }

    async fn list_current_calls(&self) -> hfp_core::Result<bool> {
        self.record(Command::ListCurrentCalls);
        Ok(*self.telephony_lists_calls.lock())
    }

    async fn query_phone_state(&self) -> hfp_core::Result<()> {
        self.record(Command::QueryPhoneState);
        Ok(())
    }

    async fn listen_for_phone_state(&self, enable: bool) -> hfp_core::Result<()> {
        self.record(Command::ListenForPhoneState(enable));
        Ok(())
    }

    async fn dial(&self, number: &str) -> hfp_core::Result<()> {
        self.outcome("dial", None)?;
        self.record(Command::Dial(number.to_string()));
        Ok(())
    }

    async fn last_dialled_number(&self) -> hfp_core::Result<Option<String>> {
        Ok(self.last_dialled.lock().clone())
    }

    async fn launch_voice_command(&self) -> hfp_core::Result<()> {
        self.outcome("voice_command", None)?;
        self.record(Command::LaunchVoiceCommand);
        Ok(())
    }
}

#[async_trait]
impl AudioRouting for FakeStack {
    async fn set_sco_routing(&self, enabled: bool) {
        self.record(Command::ScoRouting(enabled));
    }

    async fn set_parameter(&self, parameter: &AudioParameter) {
        self.record(Command::AudioParameter(parameter.clone()));
    }

    async fn is_speakerphone_on(&self) -> bool {
        *self.speakerphone.lock()
    }

    async fn set_speakerphone(&self, enabled: bool) {
        self.record(Command::Speakerphone(enabled));
    }

    async fn set_sco_volume(&self, volume: u8, show_ui: bool) {
        self.record(Command::ScoVolume(volume, show_ui));
    }
}

#[async_trait]
impl AdapterPolicy for FakeStack {
    async fn is_quiet_mode(&self) -> bool {
        *self.quiet_mode.lock()
    }

    async fn priority(&self, _device: &DeviceId) -> PeerPriority {
        *self.priority.lock()
    }

    async fn bond_state(&self, _device: &DeviceId) -> BondState {
        *self.bond_state.lock()
    }

    async fn device_name(&self, device: &DeviceId) -> Option<String> {
        Some(format!("Headset {}", device))
    }

    async fn connect_other_profile(&self, device: &DeviceId) {
        self.record(Command::ConnectOtherProfile(device.clone()));
    }
}

/// Timer scheduler that only remembers what was armed
#[derive(Default)]
pub struct ManualTimers {
    scheduled: Mutex<Vec<(TimerFired, Duration)>>,
}

impl TimerScheduler for ManualTimers {
    fn schedule(&self, fired: TimerFired, after: Duration) {
        self.scheduled.lock().push((fired, after));
    }
}

impl ManualTimers {
    /// The most recent arm of a kind
    pub fn latest(&self, kind: TimerKind) -> Option<TimerFired> {
        self.scheduled
            .lock()
            .iter()
            .rev()
            .find(|(fired, _)| fired.key.kind == kind)
            .map(|(fired, _)| fired.clone())
    }

    pub fn delay_of(&self, kind: TimerKind) -> Option<Duration> {
        self.scheduled
            .lock()
            .iter()
            .rev()
            .find(|(fired, _)| fired.key.kind == kind)
            .map(|(_, after)| *after)
    }

    pub fn armed_count(&self, kind: TimerKind) -> usize {
        self.scheduled
            .lock()
            .iter()
            .filter(|(fired, _)| fired.key.kind == kind)
            .count()
    }
}

/// A session wired to recording doubles
pub struct Harness {
    pub session: HandsfreeSession,
    pub stack: Arc<FakeStack>,
    pub timers: Arc<ManualTimers>,
    pub notifications: NotificationSubscriber,
}

impl Harness {
    pub fn new(max_connections: usize) -> Self {
        Self::with_config(SessionConfig::default().with_max_connections(max_connections))
    }

    pub fn with_config(config: SessionConfig) -> Self {
        let stack = Arc::new(FakeStack::default());
        let timers = Arc::new(ManualTimers::default());
        let collab = Collaborators::new(stack.clone(), stack.clone(), stack.clone(), stack.clone());
        let hub = NotificationHub::new();
        let notifications = hub.subscribe();
        let session = HandsfreeSession::new(Arc::new(config), collab, timers.clone(), hub);
        Self {
            session,
            stack,
            timers,
            notifications,
        }
    }

    pub async fn send(&mut self, event: SessionEvent) {
        self.session.dispatch(event).await;
    }

    pub async fn link(&mut self, device: &DeviceId, state: LinkConnectionState) {
        self.stack_event(device, StackEventKind::ConnectionStateChanged(state))
            .await;
    }

    pub async fn audio(&mut self, device: &DeviceId, state: LinkAudioState) {
        self.stack_event(device, StackEventKind::AudioStateChanged(state))
            .await;
    }

    pub async fn stack_event(&mut self, device: &DeviceId, kind: StackEventKind) {
        self.send(SessionEvent::Stack(StackEvent::new(device.clone(), kind)))
            .await;
    }

    pub async fn call_state(&mut self, active: u32, held: u32, state: CallState) {
        self.send(SessionEvent::CallStateChanged {
            update: CallStateUpdate::new(active, held, state),
            is_virtual: false,
        })
        .await;
    }

    /// Deliver the most recent arm of a timer kind, stale or not
    pub async fn fire(&mut self, kind: TimerKind) {
        let fired = self.timers.latest(kind);
        match fired {
            Some(fired) => self.send(SessionEvent::Timer(fired)).await,
            None => panic!("no {} timer was ever armed", kind),
        }
    }

    /// Outbound connect that completes with SLC
    pub async fn connect_device(&mut self, device: &DeviceId) {
        self.send(SessionEvent::Connect(device.clone())).await;
        self.link(device, LinkConnectionState::Connected).await;
        self.link(device, LinkConnectionState::SlcConnected).await;
    }

    /// Put an active call up and bring audio to `device`
    pub async fn audio_on(&mut self, device: &DeviceId) {
        self.call_state(1, 0, CallState::Idle).await;
        self.send(SessionEvent::ConnectAudio).await;
        self.audio(device, LinkAudioState::Connecting).await;
        self.audio(device, LinkAudioState::Connected).await;
    }

    pub fn drain(&mut self) -> Vec<Notification> {
        self.notifications.drain()
    }

    /// Connection transitions published since the last drain
    pub fn connection_changes(&mut self) -> Vec<(DeviceId, ConnectionState, ConnectionState)> {
        self.drain()
            .into_iter()
            .filter_map(|n| match n {
                Notification::ConnectionStateChanged {
                    device,
                    previous,
                    current,
                } => Some((device, previous, current)),
                _ => None,
            })
            .collect()
    }
}

pub async fn start_virtual_call(harness: &mut Harness, device: &DeviceId) -> bool {
    let (reply, answer) = tokio::sync::oneshot::channel();
    harness
        .send(SessionEvent::StartVirtualCall {
            device: device.clone(),
            reply: Some(reply),
        })
        .await;
    answer.await.unwrap_or(false)
}
