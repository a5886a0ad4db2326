//! Collaborator boundaries
//!
//! The session never talks to hardware, the telephony stack or the adapter
//! service directly. Everything goes through the traits below so that the
//! state machine can be driven by a recording double in tests.
//!
//! Radio calls only report whether a command could be *issued*; the real
//! outcome arrives later as a [`StackEvent`](crate::events::StackEvent) in
//! the session mailbox.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::Result;
use crate::types::{
    AtResultCode, AudioParameter, BondState, CallStateUpdate, CodecKind, DeviceId, DeviceStatus,
    PeerPriority, VolumeKind,
};

/// Radio link and voice transport
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RadioLink: Send + Sync {
    async fn connect(&self, device: &DeviceId) -> Result<()>;
    async fn disconnect(&self, device: &DeviceId) -> Result<()>;
    async fn connect_audio(&self, device: &DeviceId) -> Result<()>;
    async fn disconnect_audio(&self, device: &DeviceId) -> Result<()>;
    async fn set_codec(&self, device: &DeviceId, codec: CodecKind) -> Result<()>;
    async fn start_voice_recognition(&self, device: &DeviceId) -> Result<()>;
    async fn stop_voice_recognition(&self, device: &DeviceId) -> Result<()>;

    /// Final result code; `error` is a CME error number, 0 when unused
    async fn send_at_response(&self, code: AtResultCode, error: u8, device: &DeviceId) -> Result<()>;

    /// Intermediate response line such as `+CIND: 1,0,0,0,5,0,5`
    async fn send_at_string(&self, text: &str, device: &DeviceId) -> Result<()>;

    async fn set_volume(&self, kind: VolumeKind, volume: u8, device: &DeviceId) -> Result<()>;

    /// Unsolicited call indicator update for every connected peer
    async fn phone_state_changed(&self, update: &CallStateUpdate) -> Result<()>;

    /// Unsolicited service/roam/signal/battery update
    async fn device_status_changed(&self, status: &DeviceStatus) -> Result<()>;
}

/// Phone-side call control
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Telephony: Send + Sync {
    async fn answer_call(&self) -> Result<()>;
    async fn hangup_call(&self) -> Result<()>;
    async fn send_dtmf(&self, digit: u8) -> Result<()>;
    async fn process_chld(&self, action: u32) -> Result<bool>;
    async fn subscriber_number(&self) -> Result<Option<String>>;
    async fn network_operator(&self) -> Result<Option<String>>;

    /// Ask for a current calls list; entries come back as `ClccResponse`
    /// events. `false` means there is nothing to report.
    async fn list_current_calls(&self) -> Result<bool>;

    /// Ask telephony to push its state again as `CallStateChanged`
    async fn query_phone_state(&self) -> Result<()>;
    async fn listen_for_phone_state(&self, enable: bool) -> Result<()>;
    async fn dial(&self, number: &str) -> Result<()>;
    async fn last_dialled_number(&self) -> Result<Option<String>>;

    /// Bring up the voice assistant
    async fn launch_voice_command(&self) -> Result<()>;
}

/// Audio routing and volume control
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AudioRouting: Send + Sync {
    async fn set_sco_routing(&self, enabled: bool);
    async fn set_parameter(&self, parameter: &AudioParameter);
    async fn is_speakerphone_on(&self) -> bool;
    async fn set_speakerphone(&self, enabled: bool);
    async fn set_sco_volume(&self, volume: u8, show_ui: bool);
}

/// Adapter-wide policy inputs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AdapterPolicy: Send + Sync {
    async fn is_quiet_mode(&self) -> bool;
    async fn priority(&self, device: &DeviceId) -> PeerPriority;
    async fn bond_state(&self, device: &DeviceId) -> BondState;
    async fn device_name(&self, device: &DeviceId) -> Option<String>;

    /// A peer was rejected here; let another profile try
    async fn connect_other_profile(&self, device: &DeviceId);
}

/// The set of collaborators a session is wired to
#[derive(Clone)]
pub struct Collaborators {
    pub radio: Arc<dyn RadioLink>,
    pub telephony: Arc<dyn Telephony>,
    pub audio: Arc<dyn AudioRouting>,
    pub policy: Arc<dyn AdapterPolicy>,
}

impl Collaborators {
    pub fn new(
        radio: Arc<dyn RadioLink>,
        telephony: Arc<dyn Telephony>,
        audio: Arc<dyn AudioRouting>,
        policy: Arc<dyn AdapterPolicy>,
    ) -> Self {
        Self {
            radio,
            telephony,
            audio,
            policy,
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
