//! Outward notifications
//!
//! Observers subscribe to a [`NotificationHub`] and receive every connection
//! and audio transition plus vendor command and HF indicator traffic. The hub
//! is a thin wrapper over `tokio::sync::broadcast`; publishing never blocks
//! the session, and a slow subscriber lags rather than stalling the actor.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::errors::{Result, SessionError};
use crate::types::{AudioState, ConnectionState, DeviceId};

/// Buffer for 1000 notifications
pub const NOTIFICATION_CAPACITY: usize = 1000;

/// Something observers may care about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notification {
    ConnectionStateChanged {
        device: DeviceId,
        previous: ConnectionState,
        current: ConnectionState,
    },
    AudioStateChanged {
        device: DeviceId,
        previous: AudioState,
        current: AudioState,
    },
    VendorSpecificCommand {
        device: DeviceId,
        command: String,
        company_id: u16,
        args: String,
    },
    HfIndicatorValueChanged {
        device: DeviceId,
        indicator: u16,
        value: u64,
    },
    /// An event arrived that the current state cannot process
    EventRejected {
        state: String,
        event: String,
    },
}

/// Subscriber wrapper for notifications
pub struct NotificationSubscriber {
    receiver: broadcast::Receiver<Notification>,
}

impl NotificationSubscriber {
    pub fn new(receiver: broadcast::Receiver<Notification>) -> Self {
        Self { receiver }
    }

    /// Receive the next notification
    pub async fn receive(&mut self) -> Result<Notification> {
        self.receiver
            .recv()
            .await
            .map_err(|e| SessionError::internal(format!("Failed to receive notification: {}", e)))
    }

    /// Try to receive a notification without blocking
    pub fn try_receive(&mut self) -> Result<Option<Notification>> {
        match self.receiver.try_recv() {
            Ok(notification) => Ok(Some(notification)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(e) => Err(SessionError::internal(format!(
                "Failed to try receive notification: {}",
                e
            ))),
        }
    }

    /// Everything currently buffered, in order
    pub fn drain(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(Some(notification)) = self.try_receive() {
            out.push(notification);
        }
        out
    }
}

/// Fan-out point for notifications
#[derive(Clone)]
pub struct NotificationHub {
    sender: broadcast::Sender<Notification>,
}

impl std::fmt::Debug for NotificationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationHub")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl NotificationHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self { sender }
    }

    /// Publish a notification; having no subscribers is not an error
    pub fn publish(&self, notification: Notification) {
        tracing::debug!("Publishing {:?}", notification);
        if self.sender.send(notification).is_err() {
            tracing::trace!("No notification subscribers");
        }
    }

    pub fn subscribe(&self) -> NotificationSubscriber {
        NotificationSubscriber::new(self.sender.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let hub = NotificationHub::new();
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();
        let device = DeviceId::new("00:11:22:33:44:55");

        hub.publish(Notification::ConnectionStateChanged {
            device: device.clone(),
            previous: ConnectionState::Disconnected,
            current: ConnectionState::Connecting,
        });

        let expected = Notification::ConnectionStateChanged {
            device,
            previous: ConnectionState::Disconnected,
            current: ConnectionState::Connecting,
        };
        assert_eq!(first.receive().await.unwrap(), expected);
        assert_eq!(second.try_receive().unwrap(), Some(expected));
        assert_eq!(second.try_receive().unwrap(), None);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let hub = NotificationHub::new();
        hub.publish(Notification::EventRejected {
            state: "Disconnected".into(),
            event: "AtCind".into(),
        });
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_serializes_as_json() {
        let json = serde_json::to_string(&Notification::HfIndicatorValueChanged {
            device: DeviceId::new("00:11:22:33:44:55"),
            indicator: 1,
            value: 1,
        })
        .unwrap();
        assert!(json.contains("HfIndicatorValueChanged"));
        assert!(json.contains("00:11:22:33:44:55"));
    }
}
