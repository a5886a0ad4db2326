//! # HFP-Core
//!
//! Hands-Free Profile audio gateway session controller.
//!
//! This crate provides:
//! - A five-state session machine (Disconnected, Pending, Connected, AudioOn,
//!   MultiPending) arbitrating connections to one or two headsets
//! - Ownership of the single voice (SCO) channel, with A2DP coexistence and
//!   virtual (non-network) calls
//! - Decoding of link-layer callbacks into typed events
//! - AT command replies: indicators, current calls, operator, subscriber
//!   number, HF indicators and vendor commands
//!
//! ## Architecture
//!
//! One tokio task owns a [`HandsfreeSession`] and processes its mailbox one
//! event at a time. Callers talk to it through a [`SessionHandle`]; the radio,
//! telephony, audio routing and adapter policy sit behind the traits in
//! [`adapters`] so the whole machine can be driven by recording doubles.

pub mod adapters;
pub mod at;
pub mod calls;
pub mod config;
pub mod errors;
pub mod events;
pub mod registry;
pub mod retry;
pub mod session;
pub mod state_machine;
pub mod timers;
pub mod types;

pub use adapters::{AdapterPolicy, AudioRouting, Collaborators, RadioLink, Telephony};
pub use config::SessionConfig;
pub use errors::{Result, SessionError};
pub use events::{
    EventInlet, Notification, NotificationHub, NotificationSubscriber, RawStackEvent,
    SessionEvent, StackEvent, StackEventCode, StackEventKind,
};
pub use registry::DeviceRegistry;
pub use session::{spawn_session, spawn_session_with, SessionHandle, SessionSnapshot};
pub use state_machine::{HandsfreeSession, HfpState, ProcessOutcome};
pub use timers::{TimerFired, TimerKey, TimerKind, TimerScheduler};
pub use types::{
    AudioState, CallState, CallStateUpdate, CodecKind, ConnectionState, DeviceId,
    LinkAudioState, LinkConnectionState,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
