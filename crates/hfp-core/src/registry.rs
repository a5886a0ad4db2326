//! Device registry
//!
//! Tracks which peers play which role in the session (current, outbound
//! target, inbound candidate, voice channel owner, eviction victim) along with
//! the insertion-ordered set of connected peers. The registry only stores
//! roles; deciding when a role changes is the state machine's job. It does
//! refuse changes that would break its own invariants:
//!
//! - the connected set never grows past `max_connections`
//! - the current device and the active audio device are always connected
//!   (or unset)

use std::collections::HashMap;

use indexmap::IndexSet;
use serde::Serialize;

use crate::errors::{Result, SessionError};
use crate::types::{AudioParams, DeviceId};

/// Role bookkeeping for every peer the session knows about
#[derive(Debug, Clone, Serialize)]
pub struct DeviceRegistry {
    max_connections: usize,
    current: Option<DeviceId>,
    target: Option<DeviceId>,
    incoming: Option<DeviceId>,
    active_audio: Option<DeviceId>,
    multi_disconnect: Option<DeviceId>,
    connected: IndexSet<DeviceId>,
    audio_params: HashMap<DeviceId, AudioParams>,
}

impl DeviceRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            current: None,
            target: None,
            incoming: None,
            active_audio: None,
            multi_disconnect: None,
            connected: IndexSet::new(),
            audio_params: HashMap::new(),
        }
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn current(&self) -> Option<&DeviceId> {
        self.current.as_ref()
    }

    pub fn target(&self) -> Option<&DeviceId> {
        self.target.as_ref()
    }

    pub fn incoming(&self) -> Option<&DeviceId> {
        self.incoming.as_ref()
    }

    pub fn active_audio(&self) -> Option<&DeviceId> {
        self.active_audio.as_ref()
    }

    pub fn multi_disconnect(&self) -> Option<&DeviceId> {
        self.multi_disconnect.as_ref()
    }

    pub fn is_target(&self, device: &DeviceId) -> bool {
        self.target.as_ref() == Some(device)
    }

    pub fn is_incoming(&self, device: &DeviceId) -> bool {
        self.incoming.as_ref() == Some(device)
    }

    pub fn is_current(&self, device: &DeviceId) -> bool {
        self.current.as_ref() == Some(device)
    }

    pub fn is_active_audio(&self, device: &DeviceId) -> bool {
        self.active_audio.as_ref() == Some(device)
    }

    pub fn is_multi_disconnect(&self, device: &DeviceId) -> bool {
        self.multi_disconnect.as_ref() == Some(device)
    }

    /// Set the current device; it must already be connected
    pub fn set_current(&mut self, device: Option<DeviceId>) -> Result<()> {
        if let Some(d) = &device {
            if !self.connected.contains(d) {
                return Err(SessionError::invalid_state(format!(
                    "current device {} is not connected",
                    d
                )));
            }
        }
        self.current = device;
        Ok(())
    }

    /// Track an outbound attempt, replacing any previous one
    pub fn set_target(&mut self, device: Option<DeviceId>) {
        if let (Some(d), Some(i)) = (&device, &self.incoming) {
            if d == i {
                self.incoming = None;
            }
        }
        self.target = device;
    }

    pub fn take_target(&mut self) -> Option<DeviceId> {
        self.target.take()
    }

    pub fn set_incoming(&mut self, device: Option<DeviceId>) {
        if let (Some(d), Some(t)) = (&device, &self.target) {
            if d == t {
                return;
            }
        }
        self.incoming = device;
    }

    /// Give the voice channel to a connected device
    pub fn set_active_audio(&mut self, device: Option<DeviceId>) -> Result<()> {
        if let Some(d) = &device {
            if !self.connected.contains(d) {
                return Err(SessionError::invalid_state(format!(
                    "audio device {} is not connected",
                    d
                )));
            }
        }
        self.active_audio = device;
        Ok(())
    }

    pub fn set_multi_disconnect(&mut self, device: Option<DeviceId>) {
        self.multi_disconnect = device;
    }

    pub fn is_connected(&self, device: &DeviceId) -> bool {
        self.connected.contains(device)
    }

    pub fn connected_count(&self) -> usize {
        self.connected.len()
    }

    pub fn has_capacity(&self) -> bool {
        self.connected.len() < self.max_connections
    }

    pub fn is_empty(&self) -> bool {
        self.connected.is_empty()
    }

    /// Connected devices in insertion order
    pub fn connected(&self) -> impl Iterator<Item = &DeviceId> {
        self.connected.iter()
    }

    pub fn connected_devices(&self) -> Vec<DeviceId> {
        self.connected.iter().cloned().collect()
    }

    pub fn connected_at(&self, index: usize) -> Option<&DeviceId> {
        self.connected.get_index(index)
    }

    /// Add a device to the connected set; a no-op when it is already there
    pub fn add_connected(&mut self, device: DeviceId) -> Result<()> {
        if self.connected.contains(&device) {
            return Ok(());
        }
        if !self.has_capacity() {
            return Err(SessionError::invalid_state(format!(
                "cannot add {}: {} of {} connections in use",
                device,
                self.connected.len(),
                self.max_connections
            )));
        }
        tracing::debug!("Device {} added to connected set", device);
        self.connected.insert(device);
        Ok(())
    }

    /// Remove a device from the connected set and drop its audio parameters.
    ///
    /// Clears the current and active audio roles when they point at the
    /// removed device; reassigning them is up to the caller.
    pub fn remove_connected(&mut self, device: &DeviceId) -> bool {
        let removed = self.connected.shift_remove(device);
        if removed {
            tracing::debug!("Device {} removed from connected set", device);
            self.audio_params.remove(device);
            if self.current.as_ref() == Some(device) {
                self.current = None;
            }
            if self.active_audio.as_ref() == Some(device) {
                self.active_audio = None;
            }
        }
        removed
    }

    /// Reassign the current device to the most recently inserted survivor
    pub fn reassign_current_to_last(&mut self) -> Option<&DeviceId> {
        self.current = self.connected.last().cloned();
        self.current.as_ref()
    }

    pub fn audio_params(&self, device: &DeviceId) -> Option<&AudioParams> {
        self.audio_params.get(device)
    }

    pub fn set_audio_params(&mut self, device: DeviceId, params: AudioParams) {
        self.audio_params.insert(device, params);
    }

    pub fn audio_params_mut(&mut self, device: &DeviceId) -> &mut AudioParams {
        self.audio_params.entry(device.clone()).or_default()
    }

    /// Forget every role and connection
    pub fn clear(&mut self) {
        self.current = None;
        self.target = None;
        self.incoming = None;
        self.active_audio = None;
        self.multi_disconnect = None;
        self.connected.clear();
        self.audio_params.clear();
    }
}
