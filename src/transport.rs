// src/transport.rs - Outbound send interface used by the dispatcher
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use crate::{error::Result, notification::EventNotification, object::ObjectId};

/// Network address of a recipient that is not known by device instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// Network number, 0 for the local network
    #[serde(default)]
    pub network: u16,
    /// Link-layer address bytes
    pub mac: Vec<u8>,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.network)?;
        for byte in &self.mac {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Who a destination entry sends to
///
/// In YAML this is a single-key map; fields holding it use
/// `serde_yaml::with::singleton_map`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Recipient {
    Device(ObjectId),
    Address(Address),
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipient::Device(id) => write!(f, "{}", id),
            Recipient::Address(addr) => write!(f, "{}", addr),
        }
    }
}

/// Send primitives provided by the network layer
///
/// Retries and acknowledgment tracking for confirmed sends belong to the
/// implementation; callers never retry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_confirmed(
        &self,
        recipient: &Recipient,
        process_id: u32,
        notification: &EventNotification,
    ) -> Result<()>;

    async fn send_unconfirmed(
        &self,
        recipient: &Recipient,
        process_id: u32,
        notification: &EventNotification,
    ) -> Result<()>;
}

/// Transport that only logs what it would send
#[derive(Debug, Default, Clone)]
pub struct LoggingTransport;

impl LoggingTransport {
    pub fn new() -> Self {
        Self
    }

    fn log(&self, mode: &str, recipient: &Recipient, process_id: u32, n: &EventNotification) {
        info!(
            "{} event notification to {} (process {}): {} {} -> {} priority {}{}",
            mode,
            recipient,
            process_id,
            n.event_object,
            n.from_state,
            n.to_state,
            n.priority,
            n.message_text
                .as_deref()
                .map(|text| format!(" \"{}\"", text))
                .unwrap_or_default(),
        );
        match serde_json::to_string(n) {
            Ok(payload) => debug!("Payload: {}", payload),
            Err(e) => debug!("Payload not serializable: {}", e),
        }
    }
}

#[async_trait]
impl Transport for LoggingTransport {
    async fn send_confirmed(
        &self,
        recipient: &Recipient,
        process_id: u32,
        notification: &EventNotification,
    ) -> Result<()> {
        self.log("Confirmed", recipient, process_id, notification);
        Ok(())
    }

    async fn send_unconfirmed(
        &self,
        recipient: &Recipient,
        process_id: u32,
        notification: &EventNotification,
    ) -> Result<()> {
        self.log("Unconfirmed", recipient, process_id, notification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectType;

    #[test]
    fn test_recipient_display_and_yaml() {
        let addr = Recipient::Address(Address { network: 5, mac: vec![0x0a, 0x00, 0x01, 0xff] });
        assert_eq!(addr.to_string(), "5:0a0001ff");

        let yaml = "device:\n  type: device\n  instance: 1001\n";
        let recipient: Recipient =
            serde_yaml::with::singleton_map::deserialize(serde_yaml::Deserializer::from_str(yaml)).unwrap();
        assert_eq!(recipient, Recipient::Device(ObjectId::new(ObjectType::Device, 1001)));
    }
}
