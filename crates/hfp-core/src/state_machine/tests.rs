use super::*;

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::adapters::{AdapterPolicy, AudioRouting, RadioLink, Telephony};
use crate::errors::Result;
use crate::events::{NotificationSubscriber, StackEvent, StackEventKind};
use crate::timers::TimerFired;
use crate::types::{
    AtResultCode, AudioParameter, BondState, CodecKind, DeviceStatus, LinkConnectionState,
    PeerPriority, VolumeKind,
};

/// Accepts everything and remembers the radio and listener calls
#[derive(Default)]
struct Quiet {
    log: Mutex<Vec<String>>,
}

impl Quiet {
    fn note(&self, entry: impl Into<String>) {
        self.log.lock().push(entry.into());
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

#[async_trait]
impl RadioLink for Quiet {
    async fn connect(&self, device: &DeviceId) -> Result<()> {
        self.note(format!("connect {}", device));
        Ok(())
    }
    async fn disconnect(&self, device: &DeviceId) -> Result<()> {
        self.note(format!("disconnect {}", device));
        Ok(())
    }
    async fn connect_audio(&self, device: &DeviceId) -> Result<()> {
        self.note(format!("connect_audio {}", device));
        Ok(())
    }
    async fn disconnect_audio(&self, device: &DeviceId) -> Result<()> {
        self.note(format!("disconnect_audio {}", device));
        Ok(())
    }
    async fn set_codec(&self, _device: &DeviceId, _codec: CodecKind) -> Result<()> {
        Ok(())
    }
    async fn start_voice_recognition(&self, _device: &DeviceId) -> Result<()> {
        Ok(())
    }
    async fn stop_voice_recognition(&self, _device: &DeviceId) -> Result<()> {
        Ok(())
    }
    async fn send_at_response(&self, _code: AtResultCode, _error: u8, _device: &DeviceId) -> Result<()> {
        Ok(())
    }
    async fn send_at_string(&self, _text: &str, _device: &DeviceId) -> Result<()> {
        Ok(())
    }
    async fn set_volume(&self, _kind: VolumeKind, _volume: u8, _device: &DeviceId) -> Result<()> {
        Ok(())
    }
    async fn phone_state_changed(&self, _update: &CallStateUpdate) -> Result<()> {
        Ok(())
    }
    async fn device_status_changed(&self, _status: &DeviceStatus) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Telephony for Quiet {
    async fn answer_call(&self) -> Result<()> {
        Ok(())
    }
    async fn hangup_call(&self) -> Result<()> {
        Ok(())
    }
    async fn send_dtmf(&self, _digit: u8) -> Result<()> {
        Ok(())
    }
    async fn process_chld(&self, _action: u32) -> Result<bool> {
        Ok(false)
    }
    async fn subscriber_number(&self) -> Result<Option<String>> {
        Ok(None)
    }
    async fn network_operator(&self) -> Result<Option<String>> {
        Ok(None)
    }
    async fn list_current_calls(&self) -> Result<bool> {
        Ok(false)
    }
    async fn query_phone_state(&self) -> Result<()> {
        Ok(())
    }
    async fn listen_for_phone_state(&self, enable: bool) -> Result<()> {
        self.note(format!("listen {}", enable));
        Ok(())
    }
    async fn dial(&self, _number: &str) -> Result<()> {
        Ok(())
    }
    async fn last_dialled_number(&self) -> Result<Option<String>> {
        Ok(None)
    }
    async fn launch_voice_command(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl AudioRouting for Quiet {
    async fn set_sco_routing(&self, _enabled: bool) {}
    async fn set_parameter(&self, _parameter: &AudioParameter) {}
    async fn is_speakerphone_on(&self) -> bool {
        false
    }
    async fn set_speakerphone(&self, _enabled: bool) {}
    async fn set_sco_volume(&self, _volume: u8, _show_ui: bool) {}
}

#[async_trait]
impl AdapterPolicy for Quiet {
    async fn is_quiet_mode(&self) -> bool {
        false
    }
    async fn priority(&self, _device: &DeviceId) -> PeerPriority {
        PeerPriority::On
    }
    async fn bond_state(&self, _device: &DeviceId) -> BondState {
        BondState::Bonded
    }
    async fn device_name(&self, _device: &DeviceId) -> Option<String> {
        None
    }
    async fn connect_other_profile(&self, _device: &DeviceId) {}
}

#[derive(Default)]
struct Recording(Mutex<Vec<TimerFired>>);

impl TimerScheduler for Recording {
    fn schedule(&self, fired: TimerFired, _after: Duration) {
        self.0.lock().push(fired);
    }
}

impl Recording {
    fn last(&self, kind: TimerKind) -> TimerFired {
        self.0
            .lock()
            .iter()
            .rev()
            .find(|fired| fired.key.kind == kind)
            .cloned()
            .unwrap()
    }
}

struct Fixture {
    session: HandsfreeSession,
    stack: Arc<Quiet>,
    timers: Arc<Recording>,
    notifications: NotificationSubscriber,
}

fn fixture(max_connections: usize) -> Fixture {
    let stack = Arc::new(Quiet::default());
    let timers = Arc::new(Recording::default());
    let hub = NotificationHub::new();
    let notifications = hub.subscribe();
    let config = SessionConfig::default().with_max_connections(max_connections);
    let collab = Collaborators::new(stack.clone(), stack.clone(), stack.clone(), stack.clone());
    let session = HandsfreeSession::new(Arc::new(config), collab, timers.clone(), hub);
    Fixture {
        session,
        stack,
        timers,
        notifications,
    }
}

fn dev(n: u8) -> DeviceId {
    DeviceId::from_bytes([0x00, 0x1A, 0x7D, 0xDA, 0x71, n])
}

fn link(device: &DeviceId, state: LinkConnectionState) -> SessionEvent {
    SessionEvent::Stack(StackEvent::new(
        device.clone(),
        StackEventKind::ConnectionStateChanged(state),
    ))
}

fn rejections(notifications: &mut NotificationSubscriber) -> Vec<(String, String)> {
    notifications
        .drain()
        .into_iter()
        .filter_map(|n| match n {
            Notification::EventRejected { state, event } => Some((state, event)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_deferred_events_replay_in_order_after_transition() {
    let mut f = fixture(1);
    let d1 = dev(1);

    f.session.dispatch(SessionEvent::Connect(d1.clone())).await;
    assert_eq!(f.session.state(), HfpState::Pending);

    f.session.dispatch(SessionEvent::Disconnect(d1.clone())).await;
    f.session.dispatch(SessionEvent::ConnectAudio).await;
    let parked: Vec<&str> = f.session.deferred.iter().map(|e| e.name()).collect();
    assert_eq!(parked, vec!["Disconnect", "ConnectAudio"]);

    f.session
        .dispatch(link(&d1, LinkConnectionState::Connected))
        .await;

    // the replayed disconnect runs first and puts the session back in Pending,
    // where the audio request is parked again
    assert_eq!(f.session.state(), HfpState::Pending);
    let parked: Vec<&str> = f.session.deferred.iter().map(|e| e.name()).collect();
    assert_eq!(parked, vec!["ConnectAudio"]);
    assert_eq!(
        f.stack.log(),
        vec![
            format!("connect {}", d1),
            "listen true".to_string(),
            format!("disconnect {}", d1),
        ]
    );
}

#[tokio::test]
async fn test_connection_state_follows_roles() {
    let mut f = fixture(2);
    let (d1, d2, d3) = (dev(1), dev(2), dev(3));

    f.session.registry.add_connected(d1.clone()).unwrap();
    f.session.registry.set_target(Some(d2.clone()));

    f.session.state = HfpState::Pending;
    assert_eq!(f.session.connection_state(&d1), ConnectionState::Disconnecting);
    assert_eq!(f.session.connection_state(&d2), ConnectionState::Connecting);
    assert_eq!(f.session.connection_state(&d3), ConnectionState::Disconnected);

    f.session.state = HfpState::MultiPending;
    assert_eq!(f.session.connection_state(&d1), ConnectionState::Connected);
    assert_eq!(f.session.connection_state(&d2), ConnectionState::Connecting);

    f.session.registry.set_target(None);
    f.session.registry.add_connected(d2.clone()).unwrap();
    f.session.registry.set_multi_disconnect(Some(d1.clone()));
    assert_eq!(f.session.connection_state(&d1), ConnectionState::Disconnecting);
    assert_eq!(f.session.connection_state(&d2), ConnectionState::Connected);

    f.session.state = HfpState::Connected;
    assert_eq!(f.session.connection_state(&d1), ConnectionState::Connected);
    assert_eq!(f.session.connection_state(&d3), ConnectionState::Disconnected);

    f.session.state = HfpState::Disconnected;
    assert_eq!(f.session.connection_state(&d1), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_disconnected_with_stale_roles_rejects_everything() {
    let mut f = fixture(1);
    f.session.registry.add_connected(dev(1)).unwrap();

    f.session.dispatch(SessionEvent::Connect(dev(2))).await;

    assert_eq!(f.session.state(), HfpState::Disconnected);
    assert!(f.stack.log().is_empty());
    assert_eq!(
        rejections(&mut f.notifications),
        vec![("Disconnected".to_string(), "Connect".to_string())]
    );
}

#[tokio::test]
async fn test_stale_timer_is_ignored() {
    let mut f = fixture(1);
    let d1 = dev(1);

    f.session
        .timers
        .arm(TimerKind::ConnectTimeout, Some(d1.clone()), Duration::from_secs(38));
    let stale = f.timers.last(TimerKind::ConnectTimeout);
    f.session.timers.cancel(TimerKind::ConnectTimeout, Some(&d1));

    f.session.dispatch(SessionEvent::Timer(stale)).await;
    assert!(rejections(&mut f.notifications).is_empty());

    // a live fire reaches the handler, which has no use for it here
    f.session
        .timers
        .arm(TimerKind::ConnectTimeout, Some(d1.clone()), Duration::from_secs(38));
    let live = f.timers.last(TimerKind::ConnectTimeout);
    f.session.dispatch(SessionEvent::Timer(live)).await;
    assert_eq!(
        rejections(&mut f.notifications),
        vec![("Disconnected".to_string(), "Timer".to_string())]
    );
}

#[tokio::test]
async fn test_virtual_call_timer_becomes_call_update() {
    let mut f = fixture(1);
    f.session.calls.vr.virtual_call_active = true;

    f.session
        .timers
        .arm(TimerKind::VirtualCallActive, None, Duration::from_millis(50));
    let fired = f.timers.last(TimerKind::VirtualCallActive);
    f.session.dispatch(SessionEvent::Timer(fired)).await;

    assert_eq!(f.session.calls().phone.num_active, 1);
    assert_eq!(f.session.calls().phone.call_state, CallState::Idle);
    assert!(rejections(&mut f.notifications).is_empty());
}

#[tokio::test]
async fn test_entering_disconnected_clears_dialing_and_recognition() {
    let mut f = fixture(1);
    let d1 = dev(1);
    f.session.dispatch(link(&d1, LinkConnectionState::Connected)).await;
    assert_eq!(f.session.state(), HfpState::Connected);

    f.session.dialing_out = true;
    f.session.calls.vr.started = true;
    f.session.calls.vr.waiting = true;
    f.session
        .dispatch(link(&d1, LinkConnectionState::Disconnected))
        .await;

    assert_eq!(f.session.state(), HfpState::Disconnected);
    assert!(!f.session.is_dialing_out());
    assert!(!f.session.calls().vr.started);
    assert!(!f.session.calls().vr.waiting);
    assert_eq!(f.stack.log().last().map(String::as_str), Some("listen false"));
}

#[tokio::test]
async fn test_shutdown_broadcasts_and_stops() {
    let mut f = fixture(1);
    let d1 = dev(1);
    f.session.dispatch(link(&d1, LinkConnectionState::Connected)).await;
    f.notifications.drain();

    let (tx, rx) = tokio::sync::oneshot::channel();
    f.session
        .dispatch(SessionEvent::Shutdown { reply: Some(tx) })
        .await;

    rx.await.unwrap();
    assert!(f.session.is_stopped());
    assert_eq!(
        f.notifications.drain(),
        vec![Notification::ConnectionStateChanged {
            device: d1.clone(),
            previous: ConnectionState::Connected,
            current: ConnectionState::Disconnected,
        }]
    );

    f.session.dispatch(SessionEvent::Connect(dev(2))).await;
    assert!(f.notifications.drain().is_empty());
    assert!(f.session.timers().armed_keys().is_empty());
}

#[tokio::test]
async fn test_entering_disconnected_drops_unfinished_inbound() {
    let mut f = fixture(1);
    let (d2, d3) = (dev(2), dev(3));
    f.session.state = HfpState::Connected;
    f.session.registry.add_connected(d2.clone()).unwrap();
    f.session.registry.set_current(Some(d2.clone())).unwrap();
    f.session.registry.set_incoming(Some(d3.clone()));

    f.session.dispatch(link(&d2, LinkConnectionState::Disconnected)).await;

    assert_eq!(f.session.state(), HfpState::Disconnected);
    assert_eq!(f.session.registry().incoming(), None);
    assert_eq!(f.session.registry().target(), None);
    let dropped = f
        .notifications
        .drain()
        .into_iter()
        .any(|n| {
            n == Notification::ConnectionStateChanged {
                device: d3.clone(),
                previous: ConnectionState::Connecting,
                current: ConnectionState::Disconnected,
            }
        });
    assert!(dropped);

    // the session accepts new work instead of staying wedged
    f.session.dispatch(SessionEvent::Connect(dev(4))).await;
    assert_eq!(f.session.state(), HfpState::Pending);
}
