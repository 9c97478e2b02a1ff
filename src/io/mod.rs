// src/io/mod.rs
//
// IO layer for the gateway: the KM271 serial link driver on one side and
// the MQTT client on the other. The two sides are decoupled by a
// notification channel so the link task never blocks on the network.

pub mod error;
pub mod km271;
pub mod mqtt;

pub use error::{GatewayError, LinkError};

use tokio::sync::mpsc;

// ============================================================================
// Notifications
// ============================================================================

/// A single outbound MQTT notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Publication {
    /// Full topic (base topic already applied).
    pub topic: String,
    /// UTF-8 payload.
    pub payload: String,
    /// MQTT retain flag.
    pub retain: bool,
}

/// Sending half of the notification channel.
///
/// Handed to the decoder, command builder and info ticker. `publish` never
/// blocks: notifications are queued and drained by the MQTT task in order,
/// so per-block publications always precede the block's acknowledgement on
/// the wire.
#[derive(Clone)]
pub struct Publisher {
    base_topic: String,
    retain: bool,
    tx: mpsc::UnboundedSender<Publication>,
}

impl Publisher {
    /// Create a publisher and the receiving end the MQTT task drains.
    /// `retain` is applied to every queued notification.
    pub fn new(base_topic: &str, retain: bool) -> (Self, mpsc::UnboundedReceiver<Publication>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                base_topic: base_topic.trim_end_matches('/').to_string(),
                retain,
                tx,
            },
            rx,
        )
    }

    /// Queue a notification under `<base_topic><suffix>`.
    pub fn publish(&self, suffix: &str, payload: impl Into<String>) {
        let publication = Publication {
            topic: format!("{}{}", self.base_topic, suffix),
            payload: payload.into(),
            retain: self.retain,
        };
        // The receiver only disappears on shutdown; nothing useful to do then.
        let _ = self.tx.send(publication);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_applies_base_topic() {
        let (publisher, mut rx) = Publisher::new("buderus/km271", false);
        publisher.publish("/status/HK1_pump", "50");

        let publication = rx.try_recv().unwrap();
        assert_eq!(publication.topic, "buderus/km271/status/HK1_pump");
        assert_eq!(publication.payload, "50");
        assert!(!publication.retain);
    }

    #[test]
    fn test_publish_trims_trailing_slash() {
        let (publisher, mut rx) = Publisher::new("km271/", false);
        publisher.publish("/info", "{}");
        assert_eq!(rx.try_recv().unwrap().topic, "km271/info");
    }

    #[test]
    fn test_publish_carries_configured_retain_flag() {
        let (publisher, mut rx) = Publisher::new("km271", true);
        publisher.publish("/status/DHW_setpoint", "55.00");
        assert!(rx.try_recv().unwrap().retain);
    }
}
