//! Session events
//!
//! Everything that reaches the session goes through one mailbox as a
//! [`SessionEvent`]: API requests, decoded link-layer notifications
//! ([`StackEvent`]), telephony pushes, and timer fires. Outward facing
//! notifications live in [`notifications`].

pub mod decoder;
pub mod notifications;

use tokio::sync::oneshot;

use crate::at::parser::AtArg;
use crate::timers::TimerFired;
use crate::types::{
    A2dpConnection, A2dpPlayState, BindKind, CallStateUpdate, ClccEntry, CodecKind, DeviceId,
    DeviceStatus, LinkAudioState, LinkConnectionState, VolumeKind, VrState,
};

pub use decoder::{EventInlet, RawStackEvent, StackEventCode};
pub use notifications::{Notification, NotificationHub, NotificationSubscriber};

/// One unit of work for the session actor
#[derive(Debug, strum::IntoStaticStr)]
pub enum SessionEvent {
    // API requests
    Connect(DeviceId),
    Disconnect(DeviceId),
    /// Bring up audio on the audio device, or the current device
    ConnectAudio,
    DisconnectAudio,
    StartVoiceRecognition(DeviceId),
    StopVoiceRecognition(DeviceId),
    StartVirtualCall {
        device: DeviceId,
        reply: Option<oneshot::Sender<bool>>,
    },
    StopVirtualCall {
        device: DeviceId,
        reply: Option<oneshot::Sender<bool>>,
    },
    SetCodec(DeviceId, CodecKind),

    // Telephony and media pushes
    CallStateChanged {
        update: CallStateUpdate,
        is_virtual: bool,
    },
    DeviceStatusChanged(DeviceStatus),
    BatteryChanged {
        level: u32,
        scale: u32,
    },
    ScoVolumeChanged(u8),
    CallTypeChanged {
        cs_call: bool,
    },
    A2dpConnectionChanged(A2dpConnection),
    A2dpPlayStateChanged {
        previous: A2dpPlayState,
        current: A2dpPlayState,
    },
    ClccResponse(ClccEntry),
    SendVendorResultCode {
        device: DeviceId,
        command: String,
        arg: String,
    },

    /// Decoded link-layer notification
    Stack(StackEvent),

    /// A timer elapsed
    Timer(TimerFired),

    /// Tear the session down and stop the actor
    Shutdown {
        reply: Option<oneshot::Sender<()>>,
    },
}

impl SessionEvent {
    /// Static name used in logs and rejection notifications
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Stack(stack) => stack.kind.name(),
            other => other.into(),
        }
    }
}

/// A link-layer notification tagged with the peer it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackEvent {
    pub device: DeviceId,
    pub kind: StackEventKind,
}

impl StackEvent {
    pub fn new(device: DeviceId, kind: StackEventKind) -> Self {
        Self { device, kind }
    }
}

/// What the link layer reported
#[derive(Debug, Clone, PartialEq, Eq, strum::IntoStaticStr)]
pub enum StackEventKind {
    ConnectionStateChanged(LinkConnectionState),
    AudioStateChanged(LinkAudioState),
    VrStateChanged(VrState),
    AnswerCall,
    HangupCall,
    VolumeChanged { kind: VolumeKind, volume: u8 },
    /// `ATD<number>`; empty for a redial request
    DialCall { number: String },
    SendDtmf { digit: u8 },
    NoiseReductionChanged { enabled: bool },
    /// `None` when the peer reported no codec in use
    CodecNegotiated { codec: Option<CodecKind> },
    AtChld { action: u32 },
    SubscriberNumberRequest,
    AtCind,
    AtCops,
    AtClcc,
    UnknownAt { command: String },
    KeyPressed,
    AtBind { indicators: Vec<AtArg>, kind: BindKind },
    AtBiev { args: String },
}

impl StackEventKind {
    pub fn name(&self) -> &'static str {
        self.into()
    }
}
