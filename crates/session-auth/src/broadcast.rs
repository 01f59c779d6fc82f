//! Cross-tab token channel
//!
//! Every token store attached to the same `TokenChannel` publishes its
//! mutations here and applies whatever it receives, its own messages included.
//! Payloads travel as raw JSON so a receiver can drop anything it does not
//! understand without affecting the others.

use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Buffered messages per subscriber before it starts lagging.
const CHANNEL_CAPACITY: usize = 64;

/// Message exchanged between tabs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BroadcastMessage {
    /// New token state. Both fields are `null` after a clear; both keys must
    /// be present either way.
    #[serde(rename = "TOKEN_UPDATE")]
    TokenUpdate {
        #[serde(deserialize_with = "present")]
        token: Option<String>,
        /// Absolute expiry in unix milliseconds
        #[serde(deserialize_with = "present")]
        expiration: Option<u64>,
    },
}

/// Deserialize an `Option` whose key may hold `null` but may not be missing.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::deserialize(deserializer)
}

impl BroadcastMessage {
    /// Parse a raw payload; `None` for anything malformed or of an unknown type.
    ///
    /// A token update must carry a token and an expiry together, or neither.
    pub fn parse(payload: &str) -> Option<Self> {
        match serde_json::from_str::<Self>(payload) {
            Ok(BroadcastMessage::TokenUpdate { token, expiration })
                if token.is_some() != expiration.is_some() =>
            {
                debug!(
                    has_token = token.is_some(),
                    has_expiration = expiration.is_some(),
                    "ignoring half-filled token update"
                );
                None
            }
            Ok(message) => Some(message),
            Err(e) => {
                debug!(error = %e, "ignoring malformed broadcast payload");
                None
            }
        }
    }
}

/// Publish/subscribe port shared by all tabs of one browser profile.
#[derive(Debug, Clone)]
pub struct TokenChannel {
    sender: broadcast::Sender<String>,
}

impl TokenChannel {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish a message to every subscriber.
    pub fn publish(&self, message: &BroadcastMessage) {
        match serde_json::to_string(message) {
            Ok(payload) => self.publish_raw(payload),
            Err(e) => debug!(error = %e, "failed to encode broadcast message"),
        }
    }

    /// Publish an arbitrary payload. Having no subscribers is not an error.
    pub fn publish_raw(&self, payload: String) {
        let _ = self.sender.send(payload);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }
}

impl Default for TokenChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_update_wire_format() {
        let message = BroadcastMessage::TokenUpdate {
            token: Some("at_1".into()),
            expiration: Some(1_700_000_300_000),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "TOKEN_UPDATE");
        assert_eq!(json["token"], "at_1");
        assert_eq!(json["expiration"], 1_700_000_300_000u64);
    }

    #[test]
    fn cleared_update_parses_with_nulls() {
        let message =
            BroadcastMessage::parse(r#"{"type":"TOKEN_UPDATE","token":null,"expiration":null}"#)
                .unwrap();
        assert_eq!(
            message,
            BroadcastMessage::TokenUpdate {
                token: None,
                expiration: None
            }
        );
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert!(BroadcastMessage::parse("not json").is_none());
        assert!(BroadcastMessage::parse(r#"{"type":"LOGOUT"}"#).is_none());
        assert!(BroadcastMessage::parse(r#"{"token":"at_1"}"#).is_none());
        assert!(
            BroadcastMessage::parse(r#"{"type":"TOKEN_UPDATE","token":42,"expiration":1}"#)
                .is_none()
        );
        assert!(BroadcastMessage::parse(r#"{"type":"TOKEN_UPDATE"}"#).is_none());
        assert!(BroadcastMessage::parse(r#"{"type":"TOKEN_UPDATE","token":null}"#).is_none());
        assert!(
            BroadcastMessage::parse(r#"{"type":"TOKEN_UPDATE","token":"at_1","expiration":null}"#)
                .is_none()
        );
        assert!(
            BroadcastMessage::parse(r#"{"type":"TOKEN_UPDATE","token":null,"expiration":5}"#)
                .is_none()
        );
        assert!(BroadcastMessage::parse(r#"{"type":"TOKEN_UPDATE","token":"at_1"}"#).is_none());
    }

    #[tokio::test]
    async fn subscribers_receive_published_messages() {
        let channel = TokenChannel::new();
        let mut rx = channel.subscribe();
        channel.publish(&BroadcastMessage::TokenUpdate {
            token: Some("at_2".into()),
            expiration: Some(5),
        });
        let payload = rx.recv().await.unwrap();
        assert!(matches!(
            BroadcastMessage::parse(&payload),
            Some(BroadcastMessage::TokenUpdate { token: Some(t), .. }) if t == "at_2"
        ));
    }
}
