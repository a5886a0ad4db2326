//! AT command responder
//!
//! Each method answers one peer request on the radio link. Replies are an
//! optional information line (`send_at_string`) followed by a final result
//! code (`send_at_response`). Radio failures are logged and swallowed: there
//! is nobody else to tell. Telephony failures are answered with `ERROR`.

use std::sync::Arc;

use crate::adapters::{RadioLink, Telephony};
use crate::at::parser::{command_type, normalize, parse_biev, AtArg};
use crate::calls::CallAudioCoordinator;
use crate::config::{HfIndicatorConfig, VendorCommand};
use crate::types::{cme, AtResultCode, BindKind, CallState, ClccEntry, DeviceId};

/// Type of address for international numbers
const TOA_INTERNATIONAL: u16 = 145;
/// Type of address for everything else
const TOA_UNKNOWN: u16 = 129;

/// Result of an AT+CLCC request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClccOutcome {
    /// The list was answered in full
    Complete,
    /// Telephony will push entries; a response timeout should be armed
    AwaitingTelephony,
}

/// A vendor command that observers should hear about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorCommandHit {
    pub command: String,
    pub company_id: u16,
    pub args: String,
}

fn number_type(number: &str) -> u16 {
    if number.starts_with('+') {
        TOA_INTERNATIONAL
    } else {
        TOA_UNKNOWN
    }
}

fn clcc_status(state: CallState) -> u8 {
    match state {
        CallState::Active | CallState::Idle => 0,
        CallState::Held => 1,
        CallState::Dialing => 2,
        CallState::Alerting => 3,
        CallState::Incoming => 4,
        CallState::Waiting => 5,
    }
}

/// `+CLCC:` line for a non-terminating entry
pub fn format_clcc(entry: &ClccEntry) -> String {
    let mut line = format!(
        "+CLCC: {},{},{},{},{}",
        entry.index,
        entry.direction,
        entry.status,
        entry.mode,
        u8::from(entry.multiparty)
    );
    if let Some(number) = entry.number.as_deref().filter(|n| !n.is_empty()) {
        line.push_str(&format!(",\"{}\",{}", number, entry.number_type));
    }
    line
}

/// `+CNUM:` line for a subscriber number
pub fn format_cnum(number: &str) -> String {
    format!("+CNUM: ,\"{}\",{},,4", number, number_type(number))
}

#[derive(Clone)]
pub struct AtResponder {
    radio: Arc<dyn RadioLink>,
    telephony: Arc<dyn Telephony>,
}

impl std::fmt::Debug for AtResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtResponder").finish_non_exhaustive()
    }
}

impl AtResponder {
    pub fn new(radio: Arc<dyn RadioLink>, telephony: Arc<dyn Telephony>) -> Self {
        Self { radio, telephony }
    }

    async fn reply(&self, code: AtResultCode, error: u8, device: &DeviceId) {
        if let Err(e) = self.radio.send_at_response(code, error, device).await {
            tracing::warn!("Failed to send {:?} to {}: {}", code, device, e);
        }
    }

    async fn line(&self, text: &str, device: &DeviceId) {
        if let Err(e) = self.radio.send_at_string(text, device).await {
            tracing::warn!("Failed to send '{}' to {}: {}", text, device, e);
        }
    }

    pub async fn ok(&self, device: &DeviceId) {
        self.reply(AtResultCode::Ok, cme::NONE, device).await;
    }

    pub async fn error(&self, device: &DeviceId, code: u8) {
        self.reply(AtResultCode::Error, code, device).await;
    }

    pub async fn cind(&self, device: &DeviceId, calls: &CallAudioCoordinator) {
        self.line(&calls.cind_line(), device).await;
        self.ok(device).await;
    }

    pub async fn cops(&self, device: &DeviceId) {
        let operator = match self.telephony.network_operator().await {
            Ok(name) => name.unwrap_or_default(),
            Err(e) => {
                tracing::error!("Network operator query failed: {}", e);
                String::new()
            }
        };
        self.line(&format!("+COPS: 0,0,\"{}\"", operator), device).await;
        self.ok(device).await;
    }

    pub async fn cnum(&self, device: &DeviceId) {
        match self.telephony.subscriber_number().await {
            Ok(Some(number)) => {
                self.line(&format_cnum(&number), device).await;
                self.ok(device).await;
            }
            Ok(None) => {
                tracing::info!("No subscriber number for {}", device);
                self.error(device, cme::NONE).await;
            }
            Err(e) => {
                tracing::error!("Subscriber number query failed: {}", e);
                self.error(device, cme::NONE).await;
            }
        }
    }

    pub async fn chld(&self, device: &DeviceId, action: u32) {
        match self.telephony.process_chld(action).await {
            Ok(true) => self.ok(device).await,
            Ok(false) => self.error(device, cme::NONE).await,
            Err(e) => {
                tracing::error!("CHLD {} failed: {}", action, e);
                self.error(device, cme::NONE).await;
            }
        }
    }

    /// Answer AT+CLCC; a virtual call is answered locally
    pub async fn clcc(&self, device: &DeviceId, calls: &CallAudioCoordinator) -> ClccOutcome {
        if calls.is_virtual_call_active() {
            let number = match self.telephony.subscriber_number().await {
                Ok(number) => number.unwrap_or_default(),
                Err(e) => {
                    tracing::error!("Subscriber number query failed: {}", e);
                    String::new()
                }
            };
            let status = if calls.phone.num_active == 0 {
                clcc_status(calls.phone.call_state)
            } else {
                0
            };
            let entry = ClccEntry {
                index: 1,
                direction: 0,
                status,
                mode: 0,
                multiparty: false,
                number_type: number_type(&number),
                number: Some(number),
            };
            self.clcc_entry(device, &entry).await;
            self.clcc_entry(device, &ClccEntry::terminator()).await;
            return ClccOutcome::Complete;
        }

        match self.telephony.list_current_calls().await {
            Ok(true) => ClccOutcome::AwaitingTelephony,
            Ok(false) => {
                self.clcc_entry(device, &ClccEntry::terminator()).await;
                ClccOutcome::Complete
            }
            Err(e) => {
                tracing::error!("Current calls query failed: {}", e);
                self.clcc_entry(device, &ClccEntry::terminator()).await;
                ClccOutcome::Complete
            }
        }
    }

    /// Send one list entry; the terminator closes the list with OK
    pub async fn clcc_entry(&self, device: &DeviceId, entry: &ClccEntry) {
        if entry.is_terminator() {
            self.ok(device).await;
        } else {
            self.line(&format_clcc(entry), device).await;
        }
    }

    pub async fn bind(
        &self,
        device: &DeviceId,
        kind: BindKind,
        indicators: &[AtArg],
        supported: &[HfIndicatorConfig],
        peer_list: &mut Vec<i64>,
    ) {
        match kind {
            BindKind::Read => {
                for indicator in supported {
                    let line = format!(
                        "+BIND: {},{}",
                        indicator.assigned_number,
                        u8::from(indicator.enabled)
                    );
                    self.line(&line, device).await;
                }
                self.ok(device).await;
            }
            BindKind::Set => {
                *peer_list = indicators.iter().filter_map(AtArg::as_int).collect();
                tracing::debug!("Peer {} supports HF indicators {:?}", device, peer_list);
            }
            BindKind::Test => {
                let numbers = supported
                    .iter()
                    .map(|i| i.assigned_number.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                self.line(&format!("+BIND: ({})", numbers), device).await;
                self.ok(device).await;
            }
        }
    }

    /// Answer AT+BIEV; returns the indicator update to publish when valid
    pub async fn biev(
        &self,
        device: &DeviceId,
        args: &str,
        supported: &[HfIndicatorConfig],
    ) -> Option<(u16, u64)> {
        let accepted = parse_biev(args).filter(|(indicator, value)| {
            *value <= 1
                && supported
                    .iter()
                    .any(|i| i.assigned_number == *indicator && i.enabled)
        });
        match accepted {
            Some(update) => {
                self.ok(device).await;
                Some(update)
            }
            None => {
                tracing::warn!("Rejected AT+BIEV={} from {}", args, device);
                self.error(device, cme::NONE).await;
                None
            }
        }
    }

    /// Answer a command the radio layer did not recognise
    pub async fn unknown_at(
        &self,
        device: &DeviceId,
        raw: &str,
        vendors: &[VendorCommand],
    ) -> Option<VendorCommandHit> {
        let command = normalize(raw);
        let kind = command_type(&command);
        tracing::debug!("Unknown AT '{}' ({:?}) from {}", command, kind, device);

        if ["+CSCS", "+CPBS", "+CPBR", "+CSQ"]
            .iter()
            .any(|prefix| command.starts_with(prefix))
        {
            self.error(device, cme::OPERATION_NOT_SUPPORTED).await;
            return None;
        }

        match vendor_command(&command, vendors) {
            Some(hit) => {
                self.ok(device).await;
                Some(hit)
            }
            None => {
                self.error(device, cme::NONE).await;
                None
            }
        }
    }

    /// Push an unsolicited vendor result code to the peer
    pub async fn vendor_result_code(&self, device: &DeviceId, command: &str, arg: &str) {
        self.line(&format!("{}: {}", command, arg), device).await;
    }
}

/// Only set commands for a registered vendor are forwarded
fn vendor_command(command: &str, vendors: &[VendorCommand]) -> Option<VendorCommandHit> {
    let (name, args) = command.split_once('=')?;
    if args.starts_with('?') {
        return None;
    }
    let vendor = vendors
        .iter()
        .find(|v| v.command.eq_ignore_ascii_case(name))?;
    Some(VendorCommandHit {
        command: name.to_string(),
        company_id: vendor.company_id,
        args: args.to_string(),
    })
}
