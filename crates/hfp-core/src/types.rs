//! Core types shared across the session controller

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SessionError};

/// Stable identifier of a peer device, keyed by its radio address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a device id from an address string, normalized to upper case
    pub fn new(address: impl AsRef<str>) -> Self {
        Self(address.as_ref().to_ascii_uppercase())
    }

    /// Create a device id from the six raw address bytes
    pub fn from_bytes(bytes: [u8; 6]) -> Self {
        let text = bytes
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":");
        Self(text)
    }

    /// The address string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeviceId {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        let valid = parts.len() == 6
            && parts
                .iter()
                .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()));
        if !valid {
            return Err(SessionError::protocol(format!("invalid device address: {}", s)));
        }
        Ok(Self::new(s))
    }
}

/// Profile-level connection state reported to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Connection state as reported by the link layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum LinkConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Service level connection established, AT exchange is now valid
    SlcConnected,
    Disconnecting,
}

/// Voice channel (SCO) state, global across devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, strum::Display)]
pub enum AudioState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Voice channel state as reported by the link layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum LinkAudioState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Phone call state, as the telephony side reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, strum::Display)]
pub enum CallState {
    Active,
    Held,
    Dialing,
    Alerting,
    Incoming,
    Waiting,
    #[default]
    Idle,
}

/// SCO codec kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, strum::Display)]
pub enum CodecKind {
    /// CVSD, narrow band
    #[default]
    Narrowband,
    /// mSBC, wide band
    Wideband,
}

/// Which volume a peer adjusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeKind {
    Speaker,
    Microphone,
}

/// Voice recognition state reported by the peer (AT+BVRA)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VrState {
    Stopped,
    Started,
}

/// Flavor of an AT+BIND request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindKind {
    /// `AT+BIND=<a>,<b>` lists the indicators the peer supports
    Set,
    /// `AT+BIND?` asks which indicators the gateway has enabled
    Read,
    /// `AT+BIND=?` asks which indicators the gateway supports
    Test,
}

/// Connection priority the user configured for a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PeerPriority {
    #[default]
    Undefined,
    Off,
    On,
    AutoConnect,
}

impl PeerPriority {
    /// Whether the priority explicitly allows connections
    pub fn allows_connection(&self) -> bool {
        matches!(self, PeerPriority::On | PeerPriority::AutoConnect)
    }
}

/// Pairing state of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BondState {
    #[default]
    None,
    Bonding,
    Bonded,
}

/// Whether an A2DP media link is connected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum A2dpConnection {
    #[default]
    Disconnected,
    Connected,
}

/// Whether A2DP media is streaming
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum A2dpPlayState {
    #[default]
    NotPlaying,
    Playing,
}

/// Final result code of an AT exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AtResultCode {
    Ok,
    Error,
}

/// Extended (CME) error numbers sent along with `ERROR`
pub mod cme {
    /// No extended error
    pub const NONE: u8 = 0;
    /// Operation not supported
    pub const OPERATION_NOT_SUPPORTED: u8 = 4;
}

/// Per-device voice channel parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioParams {
    /// Noise reduction / echo cancellation requested by the peer
    pub noise_reduction: bool,
    pub codec: CodecKind,
}

impl Default for AudioParams {
    fn default() -> Self {
        Self {
            noise_reduction: true,
            codec: CodecKind::Narrowband,
        }
    }
}

/// A named parameter pushed to the audio routing subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioParameter {
    HeadsetName(String),
    NoiseReduction(bool),
    WideBand(bool),
    A2dpSuspended(bool),
}

impl fmt::Display for AudioParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let on_off = |v: bool| if v { "on" } else { "off" };
        match self {
            AudioParameter::HeadsetName(name) => write!(f, "bt_headset_name={}", name),
            AudioParameter::NoiseReduction(v) => write!(f, "bt_headset_nrec={}", on_off(*v)),
            AudioParameter::WideBand(v) => write!(f, "bt_wbs={}", on_off(*v)),
            AudioParameter::A2dpSuspended(v) => write!(f, "A2dpSuspended={}", v),
        }
    }
}

/// A call state update coming from the telephony side
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CallStateUpdate {
    pub num_active: u32,
    pub num_held: u32,
    pub call_state: CallState,
    pub number: String,
    pub number_type: u16,
}

impl CallStateUpdate {
    pub fn new(num_active: u32, num_held: u32, call_state: CallState) -> Self {
        Self {
            num_active,
            num_held,
            call_state,
            number: String::new(),
            number_type: 0,
        }
    }

    pub fn with_number(mut self, number: impl Into<String>, number_type: u16) -> Self {
        self.number = number.into();
        self.number_type = number_type;
        self
    }
}

/// Network/device indicators (+CIEV service, roam, signal, battchg)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub service: u8,
    pub roam: u8,
    pub signal: u8,
    pub battery: u8,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self {
            service: 0,
            roam: 0,
            signal: 0,
            battery: 5,
        }
    }
}

/// Everything the gateway knows about the phone side
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PhoneState {
    pub num_active: u32,
    pub num_held: u32,
    pub call_state: CallState,
    pub number: String,
    pub number_type: u16,
    pub status: DeviceStatus,
    pub speaker_volume: u8,
    pub mic_volume: u8,
    /// Whether the current call is a circuit switched call
    pub cs_call: bool,
}

impl PhoneState {
    /// Whether any call is active, held, or being set up
    pub fn is_in_call(&self) -> bool {
        self.num_active > 0 || self.num_held > 0 || self.call_state != CallState::Idle
    }

    pub fn apply(&mut self, update: &CallStateUpdate) {
        self.num_active = update.num_active;
        self.num_held = update.num_held;
        self.call_state = update.call_state;
        self.number = update.number.clone();
        self.number_type = update.number_type;
    }

    /// The update that describes the current call state
    pub fn as_update(&self) -> CallStateUpdate {
        CallStateUpdate {
            num_active: self.num_active,
            num_held: self.num_held,
            call_state: self.call_state,
            number: self.number.clone(),
            number_type: self.number_type,
        }
    }
}

/// One entry of a current calls (+CLCC) list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClccEntry {
    /// 1-based call index; 0 terminates the list
    pub index: u32,
    /// 0 outgoing, 1 incoming
    pub direction: u8,
    /// 0 active, 1 held, 2 dialing, 3 alerting, 4 incoming, 5 waiting
    pub status: u8,
    /// 0 voice, 1 data, 2 fax
    pub mode: u8,
    pub multiparty: bool,
    pub number: Option<String>,
    pub number_type: u16,
}

impl ClccEntry {
    /// The entry that closes a list
    pub fn terminator() -> Self {
        Self {
            index: 0,
            direction: 0,
            status: 0,
            mode: 0,
            multiparty: false,
            number: None,
            number_type: 0,
        }
    }

    pub fn is_terminator(&self) -> bool {
        self.index == 0
    }
}
