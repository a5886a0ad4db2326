//! Protocol event decoder
//!
//! The native radio layer reports callbacks as a kind code, the six address
//! bytes of the peer, and up to two integers and a string. [`RawStackEvent::decode`]
//! validates the codes and turns the payload into a typed [`StackEvent`];
//! [`EventInlet`] does that on the producer side and posts the result into the
//! session mailbox. Payloads with unknown codes are logged and dropped.

use tokio::sync::mpsc;

use crate::at::parser::generate_args;
use crate::errors::{Result, SessionError};
use crate::events::{SessionEvent, StackEvent, StackEventKind};
use crate::types::{
    BindKind, CodecKind, DeviceId, LinkAudioState, LinkConnectionState, VolumeKind, VrState,
};

/// Callback kinds emitted by the native layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StackEventCode {
    ConnectionStateChanged = 1,
    AudioStateChanged = 2,
    VrStateChanged = 3,
    AnswerCall = 4,
    HangupCall = 5,
    VolumeChanged = 6,
    DialCall = 7,
    SendDtmf = 8,
    NoiseReduction = 9,
    AtChld = 10,
    SubscriberNumberRequest = 11,
    AtCind = 12,
    AtCops = 13,
    AtClcc = 14,
    UnknownAt = 15,
    KeyPressed = 16,
    Wbs = 17,
    AtBind = 18,
    AtBiev = 19,
}

impl TryFrom<u8> for StackEventCode {
    type Error = SessionError;

    fn try_from(code: u8) -> Result<Self> {
        use StackEventCode::*;
        let kind = match code {
            1 => ConnectionStateChanged,
            2 => AudioStateChanged,
            3 => VrStateChanged,
            4 => AnswerCall,
            5 => HangupCall,
            6 => VolumeChanged,
            7 => DialCall,
            8 => SendDtmf,
            9 => NoiseReduction,
            10 => AtChld,
            11 => SubscriberNumberRequest,
            12 => AtCind,
            13 => AtCops,
            14 => AtClcc,
            15 => UnknownAt,
            16 => KeyPressed,
            17 => Wbs,
            18 => AtBind,
            19 => AtBiev,
            other => {
                return Err(SessionError::protocol(format!(
                    "unknown stack event code {}",
                    other
                )))
            }
        };
        Ok(kind)
    }
}

/// Native callback payload
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawStackEvent {
    pub kind: u8,
    pub device: [u8; 6],
    pub value_int: i32,
    pub value_int2: i32,
    pub value_string: Option<String>,
}

impl RawStackEvent {
    pub fn new(kind: StackEventCode, device: [u8; 6]) -> Self {
        Self {
            kind: kind as u8,
            device,
            ..Default::default()
        }
    }

    pub fn with_int(mut self, value: i32) -> Self {
        self.value_int = value;
        self
    }

    pub fn with_int2(mut self, value: i32) -> Self {
        self.value_int2 = value;
        self
    }

    pub fn with_string(mut self, value: impl Into<String>) -> Self {
        self.value_string = Some(value.into());
        self
    }

    /// Validate the payload and build the typed event
    pub fn decode(&self) -> Result<StackEvent> {
        let code = StackEventCode::try_from(self.kind)?;
        let device = DeviceId::from_bytes(self.device);
        let kind = match code {
            StackEventCode::ConnectionStateChanged => {
                StackEventKind::ConnectionStateChanged(connection_state(self.value_int)?)
            }
            StackEventCode::AudioStateChanged => {
                StackEventKind::AudioStateChanged(audio_state(self.value_int)?)
            }
            StackEventCode::VrStateChanged => StackEventKind::VrStateChanged(match self.value_int {
                0 => VrState::Stopped,
                1 => VrState::Started,
                other => return Err(bad_code("voice recognition state", other)),
            }),
            StackEventCode::AnswerCall => StackEventKind::AnswerCall,
            StackEventCode::HangupCall => StackEventKind::HangupCall,
            StackEventCode::VolumeChanged => {
                let kind = match self.value_int {
                    0 => VolumeKind::Speaker,
                    1 => VolumeKind::Microphone,
                    other => return Err(bad_code("volume type", other)),
                };
                let volume = u8::try_from(self.value_int2)
                    .map_err(|_| bad_code("volume", self.value_int2))?;
                StackEventKind::VolumeChanged { kind, volume }
            }
            StackEventCode::DialCall => StackEventKind::DialCall {
                number: self.value_string.clone().unwrap_or_default(),
            },
            StackEventCode::SendDtmf => StackEventKind::SendDtmf {
                digit: u8::try_from(self.value_int).map_err(|_| bad_code("dtmf", self.value_int))?,
            },
            StackEventCode::NoiseReduction => StackEventKind::NoiseReductionChanged {
                enabled: self.value_int == 1,
            },
            StackEventCode::AtChld => StackEventKind::AtChld {
                action: u32::try_from(self.value_int)
                    .map_err(|_| bad_code("chld action", self.value_int))?,
            },
            StackEventCode::SubscriberNumberRequest => StackEventKind::SubscriberNumberRequest,
            StackEventCode::AtCind => StackEventKind::AtCind,
            StackEventCode::AtCops => StackEventKind::AtCops,
            StackEventCode::AtClcc => StackEventKind::AtClcc,
            StackEventCode::UnknownAt => StackEventKind::UnknownAt {
                command: self.value_string.clone().unwrap_or_default(),
            },
            StackEventCode::KeyPressed => StackEventKind::KeyPressed,
            StackEventCode::Wbs => StackEventKind::CodecNegotiated {
                codec: match self.value_int {
                    0 => None,
                    1 => Some(CodecKind::Narrowband),
                    2 => Some(CodecKind::Wideband),
                    other => return Err(bad_code("wbs codec", other)),
                },
            },
            StackEventCode::AtBind => {
                let kind = match self.value_int {
                    0 => BindKind::Set,
                    1 => BindKind::Read,
                    2 => BindKind::Test,
                    other => return Err(bad_code("bind type", other)),
                };
                let indicators = match (&kind, &self.value_string) {
                    (BindKind::Set, Some(list)) => generate_args(list),
                    _ => Vec::new(),
                };
                StackEventKind::AtBind { indicators, kind }
            }
            StackEventCode::AtBiev => StackEventKind::AtBiev {
                args: self.value_string.clone().unwrap_or_default(),
            },
        };
        Ok(StackEvent::new(device, kind))
    }
}

fn bad_code(what: &str, value: i32) -> SessionError {
    SessionError::protocol(format!("invalid {}: {}", what, value))
}

fn connection_state(value: i32) -> Result<LinkConnectionState> {
    Ok(match value {
        0 => LinkConnectionState::Disconnected,
        1 => LinkConnectionState::Connecting,
        2 => LinkConnectionState::Connected,
        3 => LinkConnectionState::SlcConnected,
        4 => LinkConnectionState::Disconnecting,
        other => return Err(bad_code("connection state", other)),
    })
}

fn audio_state(value: i32) -> Result<LinkAudioState> {
    Ok(match value {
        0 => LinkAudioState::Disconnected,
        1 => LinkAudioState::Connecting,
        2 => LinkAudioState::Connected,
        3 => LinkAudioState::Disconnecting,
        other => return Err(bad_code("audio state", other)),
    })
}

/// Producer-side entry point for native callbacks
#[derive(Debug, Clone)]
pub struct EventInlet {
    mailbox: mpsc::UnboundedSender<SessionEvent>,
}

impl EventInlet {
    pub fn new(mailbox: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { mailbox }
    }

    /// Decode a callback and post it to the session
    pub fn deliver(&self, raw: RawStackEvent) -> Result<()> {
        let event = match raw.decode() {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Dropping stack event {:?}: {}", raw, e);
                return Err(e);
            }
        };
        tracing::debug!("Stack event {} from {}", event.kind.name(), event.device);
        self.mailbox
            .send(SessionEvent::Stack(event))
            .map_err(|_| SessionError::MailboxClosed)
    }
}
