//! Session actor and its handle
//!
//! [`spawn_session`] moves a [`HandsfreeSession`] onto its own tokio task and
//! returns a cloneable [`SessionHandle`]. Every request goes through the
//! actor's mailbox; queries are answered from a [`SessionSnapshot`] the actor
//! republishes over a `watch` channel after each event, so reading state
//! never waits behind the mailbox.
//!
//! # Example
//!
//! ```rust,no_run
//! # use hfp_core::{Collaborators, DeviceId, SessionConfig};
//! # async fn run(collab: Collaborators) -> hfp_core::Result<()> {
//! let handle = hfp_core::spawn_session(SessionConfig::default(), collab)?;
//! let mut notifications = handle.subscribe();
//!
//! let headset = DeviceId::from_bytes([0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x13]);
//! handle.connect(headset.clone())?;
//! let first = notifications.receive().await?;
//! println!("{:?}", first);
//!
//! handle.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use crate::adapters::Collaborators;
use crate::calls::VoiceRecognition;
use crate::config::SessionConfig;
use crate::errors::{Result, SessionError};
use crate::events::{EventInlet, NotificationHub, NotificationSubscriber, SessionEvent};
use crate::state_machine::{HandsfreeSession, HfpState};
use crate::timers::{TimerScheduler, TokioTimerScheduler};
use crate::types::{
    A2dpConnection, A2dpPlayState, AudioState, CallStateUpdate, ClccEntry, CodecKind,
    ConnectionState, DeviceId, DeviceStatus, PhoneState,
};

/// What observers can read without going through the mailbox
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: HfpState,
    pub connected_devices: Vec<DeviceId>,
    pub current_device: Option<DeviceId>,
    pub target_device: Option<DeviceId>,
    pub incoming_device: Option<DeviceId>,
    pub active_audio_device: Option<DeviceId>,
    pub audio_state: AudioState,
    /// Every device the session knows about and how observers should see it
    pub connection_states: Vec<(DeviceId, ConnectionState)>,
    pub phone: PhoneState,
    pub voice_recognition: VoiceRecognition,
    pub stopped: bool,
}

impl SessionSnapshot {
    pub fn connection_state(&self, device: &DeviceId) -> ConnectionState {
        self.connection_states
            .iter()
            .find(|(known, _)| known == device)
            .map(|(_, state)| *state)
            .unwrap_or(ConnectionState::Disconnected)
    }
}

/// Cloneable front door to a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    mailbox: mpsc::UnboundedSender<SessionEvent>,
    snapshot: watch::Receiver<SessionSnapshot>,
    notifications: NotificationHub,
}

/// Validate `config`, start the actor and return its handle
pub fn spawn_session(config: SessionConfig, collab: Collaborators) -> Result<SessionHandle> {
    spawn_session_with(config, collab, |mailbox| {
        Arc::new(TokioTimerScheduler::new(mailbox))
    })
}

/// Like [`spawn_session`], with a caller supplied timer scheduler built
/// from the session mailbox
pub fn spawn_session_with<F>(
    config: SessionConfig,
    collab: Collaborators,
    scheduler: F,
) -> Result<SessionHandle>
where
    F: FnOnce(mpsc::UnboundedSender<SessionEvent>) -> Arc<dyn TimerScheduler>,
{
    config.validate()?;
    let (mailbox, inbox) = mpsc::unbounded_channel();
    let notifications = NotificationHub::new();
    let session = HandsfreeSession::new(
        Arc::new(config),
        collab,
        scheduler(mailbox.clone()),
        notifications.clone(),
    );
    let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());

    tokio::spawn(run(session, inbox, snapshot_tx));

    Ok(SessionHandle {
        mailbox,
        snapshot: snapshot_rx,
        notifications,
    })
}

async fn run(
    mut session: HandsfreeSession,
    mut inbox: mpsc::UnboundedReceiver<SessionEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
) {
    info!("Hands-free session started, max {} connections", session.config().max_connections);
    while let Some(event) = inbox.recv().await {
        session.dispatch(event).await;
        snapshot.send_replace(session.snapshot());
        if session.is_stopped() {
            break;
        }
    }
    debug!("Session mailbox drained");
    info!("Hands-free session stopped");
}

impl SessionHandle {
    fn send(&self, event: SessionEvent) -> Result<()> {
        self.mailbox
            .send(event)
            .map_err(|_| SessionError::MailboxClosed)
    }

    /// Connect to a peer; the outcome arrives as notifications
    pub fn connect(&self, device: DeviceId) -> Result<()> {
        self.send(SessionEvent::Connect(device))
    }

    pub fn disconnect(&self, device: DeviceId) -> Result<()> {
        self.send(SessionEvent::Disconnect(device))
    }

    pub fn connect_audio(&self) -> Result<()> {
        self.send(SessionEvent::ConnectAudio)
    }

    pub fn disconnect_audio(&self) -> Result<()> {
        self.send(SessionEvent::DisconnectAudio)
    }

    pub fn start_voice_recognition(&self, device: DeviceId) -> Result<()> {
        self.send(SessionEvent::StartVoiceRecognition(device))
    }

    pub fn stop_voice_recognition(&self, device: DeviceId) -> Result<()> {
        self.send(SessionEvent::StopVoiceRecognition(device))
    }

    /// Start a virtual call; `false` when the session refused or could not
    /// act on the request in its current state
    pub async fn start_virtual_call(&self, device: DeviceId) -> Result<bool> {
        let (reply, answer) = oneshot::channel();
        self.send(SessionEvent::StartVirtualCall {
            device,
            reply: Some(reply),
        })?;
        Ok(answer.await.unwrap_or(false))
    }

    /// Stop the virtual call; `false` when none was running
    pub async fn stop_virtual_call(&self, device: DeviceId) -> Result<bool> {
        let (reply, answer) = oneshot::channel();
        self.send(SessionEvent::StopVirtualCall {
            device,
            reply: Some(reply),
        })?;
        Ok(answer.await.unwrap_or(false))
    }

    pub fn set_codec(&self, device: DeviceId, codec: CodecKind) -> Result<()> {
        self.send(SessionEvent::SetCodec(device, codec))
    }

    // ---- telephony and media pushes -----------------------------------------

    pub fn call_state_changed(&self, update: CallStateUpdate, is_virtual: bool) -> Result<()> {
        self.send(SessionEvent::CallStateChanged { update, is_virtual })
    }

    pub fn device_status_changed(&self, status: DeviceStatus) -> Result<()> {
        self.send(SessionEvent::DeviceStatusChanged(status))
    }

    pub fn battery_changed(&self, level: u32, scale: u32) -> Result<()> {
        self.send(SessionEvent::BatteryChanged { level, scale })
    }

    pub fn sco_volume_changed(&self, volume: u8) -> Result<()> {
        self.send(SessionEvent::ScoVolumeChanged(volume))
    }

    pub fn call_type_changed(&self, cs_call: bool) -> Result<()> {
        self.send(SessionEvent::CallTypeChanged { cs_call })
    }

    pub fn a2dp_connection_changed(&self, connection: A2dpConnection) -> Result<()> {
        self.send(SessionEvent::A2dpConnectionChanged(connection))
    }

    pub fn a2dp_play_state_changed(
        &self,
        previous: A2dpPlayState,
        current: A2dpPlayState,
    ) -> Result<()> {
        self.send(SessionEvent::A2dpPlayStateChanged { previous, current })
    }

    /// One entry of a current calls list; index 0 ends the list
    pub fn clcc_response(&self, entry: ClccEntry) -> Result<()> {
        self.send(SessionEvent::ClccResponse(entry))
    }

    pub fn send_vendor_result_code(
        &self,
        device: DeviceId,
        command: impl Into<String>,
        arg: impl Into<String>,
    ) -> Result<()> {
        self.send(SessionEvent::SendVendorResultCode {
            device,
            command: command.into(),
            arg: arg.into(),
        })
    }

    // ---- observation --------------------------------------------------------

    pub fn subscribe(&self) -> NotificationSubscriber {
        self.notifications.subscribe()
    }

    /// Inlet for link-layer callbacks
    pub fn event_inlet(&self) -> EventInlet {
        EventInlet::new(self.mailbox.clone())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Wait until the actor publishes a snapshot newer than the last one
    /// seen through this handle
    pub async fn changed(&mut self) -> Result<SessionSnapshot> {
        self.snapshot
            .changed()
            .await
            .map_err(|_| SessionError::MailboxClosed)?;
        Ok(self.snapshot.borrow_and_update().clone())
    }

    pub fn state(&self) -> HfpState {
        self.snapshot.borrow().state
    }

    pub fn connection_state(&self, device: &DeviceId) -> ConnectionState {
        self.snapshot.borrow().connection_state(device)
    }

    pub fn connected_devices(&self) -> Vec<DeviceId> {
        self.snapshot.borrow().connected_devices.clone()
    }

    pub fn audio_state(&self) -> AudioState {
        self.snapshot.borrow().audio_state
    }

    /// Tear the session down and wait for the final broadcasts
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.send(SessionEvent::Shutdown { reply: Some(reply) })?;
        if done.await.is_err() {
            debug!("Session already stopped");
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }
}
