//! Session configuration
//!
//! [`SessionConfig`] is built once when the adapter starts and shared by
//! reference with the session for its whole lifetime. Defaults match what
//! deployed gateways use; every knob can be adjusted through the `with_*`
//! builders, loaded from YAML, or (for the connection limit) taken from the
//! `HFP_MAX_CONNECTIONS` environment variable.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use hfp_core::config::SessionConfig;
//!
//! let config = SessionConfig::default()
//!     .with_max_connections(2)
//!     .with_connect_timeout(Duration::from_secs(20));
//! assert!(config.validate().is_ok());
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SessionError};

/// Environment variable that overrides [`SessionConfig::max_connections`]
pub const MAX_CONNECTIONS_ENV: &str = "HFP_MAX_CONNECTIONS";

/// Bluetooth SIG company id for Plantronics
pub const COMPANY_PLANTRONICS: u16 = 0x0055;
/// Bluetooth SIG company id for Google
pub const COMPANY_GOOGLE: u16 = 0x00E0;

/// HF indicator assigned number for enhanced safety
pub const HF_INDICATOR_ENHANCED_SAFETY: u16 = 1;
/// HF indicator assigned number for battery level
pub const HF_INDICATOR_BATTERY_LEVEL: u16 = 2;

/// A vendor specific AT command the gateway forwards to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorCommand {
    /// Command text including the leading `+`, e.g. `+XEVENT`
    pub command: String,
    pub company_id: u16,
}

/// One HF indicator the gateway supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HfIndicatorConfig {
    pub assigned_number: u16,
    pub enabled: bool,
}

/// Configuration for a hands-free session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Number of peers that may be connected at once (1 or 2)
    pub max_connections: usize,

    /// How long an outbound connect may stay unresolved
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,

    /// How long telephony has to report a dialing call after ATD
    #[serde(with = "duration_ms")]
    pub dialing_out_timeout: Duration,

    /// How long the voice assistant has to start after AT+BVRA=1
    #[serde(with = "duration_ms")]
    pub start_vr_timeout: Duration,

    /// How long telephony has to finish a +CLCC list
    #[serde(with = "duration_ms")]
    pub clcc_response_timeout: Duration,

    /// Delay between the alerting and active phases of a virtual call
    #[serde(with = "duration_ms")]
    pub virtual_call_active_delay: Duration,

    /// Delay before querying the phone after SLC comes up
    #[serde(with = "duration_ms")]
    pub query_phone_state_delay: Duration,

    /// Whether SCO audio may be routed to headsets at all
    pub audio_route_allowed: bool,

    /// Vendor commands forwarded to observers
    pub vendor_commands: Vec<VendorCommand>,

    /// HF indicators supported on the gateway side
    pub hf_indicators: Vec<HfIndicatorConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_connections: 1,
            connect_timeout: Duration::from_millis(38_000),
            dialing_out_timeout: Duration::from_millis(10_000),
            start_vr_timeout: Duration::from_millis(5_000),
            clcc_response_timeout: Duration::from_millis(5_000),
            virtual_call_active_delay: Duration::from_millis(50),
            query_phone_state_delay: Duration::from_millis(100),
            audio_route_allowed: true,
            vendor_commands: vec![
                VendorCommand {
                    command: "+XEVENT".to_string(),
                    company_id: COMPANY_PLANTRONICS,
                },
                VendorCommand {
                    command: "+ANDROID".to_string(),
                    company_id: COMPANY_GOOGLE,
                },
            ],
            hf_indicators: vec![HfIndicatorConfig {
                assigned_number: HF_INDICATOR_ENHANCED_SAFETY,
                enabled: true,
            }],
        }
    }
}

impl SessionConfig {
    /// Defaults, with `max_connections` taken from `HFP_MAX_CONNECTIONS` when set
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(value) = std::env::var(MAX_CONNECTIONS_ENV) {
            let parsed = value.trim().parse::<usize>().map_err(|_| {
                SessionError::config(format!("{} is not a number: {}", MAX_CONNECTIONS_ENV, value))
            })?;
            tracing::info!("Max connections overridden from environment: {}", parsed);
            config.max_connections = parsed;
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document; missing keys keep their defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: SessionConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    /// Check the configuration for values the session cannot work with
    pub fn validate(&self) -> Result<()> {
        if !(1..=2).contains(&self.max_connections) {
            return Err(SessionError::config(format!(
                "max_connections must be 1 or 2, got {}",
                self.max_connections
            )));
        }
        if self.connect_timeout.is_zero() {
            return Err(SessionError::config("connect_timeout must be non-zero"));
        }
        for vendor in &self.vendor_commands {
            if !vendor.command.starts_with('+') || vendor.command.len() < 2 {
                return Err(SessionError::config(format!(
                    "vendor command must look like +NAME: {}",
                    vendor.command
                )));
            }
        }
        Ok(())
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_dialing_out_timeout(mut self, timeout: Duration) -> Self {
        self.dialing_out_timeout = timeout;
        self
    }

    pub fn with_start_vr_timeout(mut self, timeout: Duration) -> Self {
        self.start_vr_timeout = timeout;
        self
    }

    pub fn with_clcc_response_timeout(mut self, timeout: Duration) -> Self {
        self.clcc_response_timeout = timeout;
        self
    }

    pub fn with_audio_route_allowed(mut self, allowed: bool) -> Self {
        self.audio_route_allowed = allowed;
        self
    }

    /// Add a vendor command to the forwarding table
    pub fn with_vendor_command(mut self, command: impl Into<String>, company_id: u16) -> Self {
        self.vendor_commands.push(VendorCommand {
            command: command.into(),
            company_id,
        });
        self
    }

    /// Add or replace a gateway-side HF indicator
    pub fn with_hf_indicator(mut self, assigned_number: u16, enabled: bool) -> Self {
        self.hf_indicators.retain(|i| i.assigned_number != assigned_number);
        self.hf_indicators.push(HfIndicatorConfig {
            assigned_number,
            enabled,
        });
        self
    }

    /// Company id registered for a vendor command, if any
    pub fn company_id(&self, command: &str) -> Option<u16> {
        self.vendor_commands
            .iter()
            .find(|v| v.command.eq_ignore_ascii_case(command))
            .map(|v| v.company_id)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
