//! Wire Protocol Messages
//!
//! JSON text frames exchanged with downstream clients and the command
//! shape sent to the upstream provider.
//!
//! # Downstream
//!
//! ```json
//! {"action": "subscribe", "symbols": ["AAPL", "MSFT"]}
//! {"action": "unsubscribe", "symbols": ["AAPL"]}
//! {"action": "ping"}
//! ```
//!
//! Server replies are tagged by `type`. Upstream ticks are forwarded
//! verbatim and are not modelled here.
//!
//! # Upstream
//!
//! ```json
//! {"action": "subscribe", "symbols": ["AAPL", "MSFT"]}
//! ```

use serde::{Deserialize, Serialize};

use super::streaming::{ClientId, Symbol};

/// Reply sent for any frame that is not a recognised client request.
pub const INVALID_MESSAGE_FORMAT: &str = "Invalid message format";

/// Notice broadcast to every client once upstream reconnects are exhausted.
pub const UPSTREAM_UNAVAILABLE: &str =
    "Market data connection lost. Maximum reconnection attempts reached.";

/// Greeting sent after a client is registered.
pub const CONNECTION_GREETING: &str = "Connected to real-time market data relay";

// =============================================================================
// Client -> Server
// =============================================================================

/// A control request from a downstream client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientRequest {
    /// Add symbols to the client's subscription set.
    Subscribe {
        /// Requested symbols.
        symbols: Vec<Symbol>,
    },
    /// Remove symbols from the client's subscription set.
    Unsubscribe {
        /// Symbols to drop.
        symbols: Vec<Symbol>,
    },
    /// Liveness probe.
    Ping,
}

impl ClientRequest {
    /// Parse a client text frame.
    ///
    /// # Errors
    ///
    /// Returns the JSON error for non-JSON input or unknown actions.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

// =============================================================================
// Server -> Client
// =============================================================================

/// A control reply sent to a downstream client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Registration succeeded.
    ConnectionSuccess {
        /// Human readable greeting.
        message: String,
        /// Identifier assigned to the client.
        #[serde(rename = "clientId")]
        client_id: String,
    },
    /// Subscribe acknowledgement echoing the requested symbols.
    SubscriptionSuccess {
        /// Requested symbols.
        symbols: Vec<Symbol>,
    },
    /// Unsubscribe acknowledgement echoing the requested symbols.
    UnsubscriptionSuccess {
        /// Requested symbols.
        symbols: Vec<Symbol>,
    },
    /// Reply to a ping.
    Pong {
        /// Server time in Unix milliseconds.
        timestamp: i64,
    },
    /// Malformed input or terminal upstream failure.
    Error {
        /// Description of the failure.
        message: String,
    },
}

impl ServerMessage {
    /// Greeting for a newly registered client.
    #[must_use]
    pub fn connection_success(client_id: ClientId) -> Self {
        Self::ConnectionSuccess {
            message: CONNECTION_GREETING.to_string(),
            client_id: client_id.to_string(),
        }
    }

    /// Pong stamped with the current time.
    #[must_use]
    pub fn pong_now() -> Self {
        Self::Pong {
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Error reply.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Encode as a JSON text frame.
    #[must_use]
    pub fn to_json(&self) -> String {
        // Plain enums of strings and integers always serialize.
        serde_json::to_string(self).unwrap_or_default()
    }
}

// =============================================================================
// Server -> Upstream
// =============================================================================

/// Direction of an upstream subscription command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamAction {
    /// Start receiving ticks for the symbols.
    Subscribe,
    /// Stop receiving ticks for the symbols.
    Unsubscribe,
}

impl UpstreamAction {
    /// Wire name of the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// Command sent on the upstream connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamRequest {
    /// Subscribe or unsubscribe.
    pub action: UpstreamAction,
    /// Affected symbols.
    pub symbols: Vec<Symbol>,
}

impl UpstreamRequest {
    /// Build a subscribe command.
    #[must_use]
    pub const fn subscribe(symbols: Vec<Symbol>) -> Self {
        Self {
            action: UpstreamAction::Subscribe,
            symbols,
        }
    }

    /// Build an unsubscribe command.
    #[must_use]
    pub const fn unsubscribe(symbols: Vec<Symbol>) -> Self {
        Self {
            action: UpstreamAction::Unsubscribe,
            symbols,
        }
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn parse_subscribe() {
        let request = ClientRequest::parse(r#"{"action":"subscribe","symbols":["AAPL","MSFT"]}"#)
            .unwrap();
        assert_eq!(
            request,
            ClientRequest::Subscribe {
                symbols: vec!["AAPL".to_string(), "MSFT".to_string()]
            }
        );
    }

    #[test]
    fn parse_unsubscribe() {
        let request =
            ClientRequest::parse(r#"{"action":"unsubscribe","symbols":["TSLA"]}"#).unwrap();
        assert_eq!(
            request,
            ClientRequest::Unsubscribe {
                symbols: vec!["TSLA".to_string()]
            }
        );
    }

    #[test]
    fn parse_ping() {
        assert_eq!(
            ClientRequest::parse(r#"{"action":"ping"}"#).unwrap(),
            ClientRequest::Ping
        );
    }

    #[test]
    fn reject_malformed_requests() {
        assert!(ClientRequest::parse("not json").is_err());
        assert!(ClientRequest::parse(r#"{"action":"dance"}"#).is_err());
        assert!(ClientRequest::parse(r#"{"action":"subscribe"}"#).is_err());
        assert!(ClientRequest::parse(r#"{"action":"subscribe","symbols":"AAPL"}"#).is_err());
        assert!(ClientRequest::parse(r#"["subscribe"]"#).is_err());
    }

    #[test]
    fn connection_success_shape() {
        let id = ClientId::generate();
        let value: Value =
            serde_json::from_str(&ServerMessage::connection_success(id).to_json()).unwrap();

        assert_eq!(value["type"], "connection_success");
        assert_eq!(value["message"], CONNECTION_GREETING);
        assert_eq!(value["clientId"], id.to_string());
    }

    #[test]
    fn acknowledgement_shapes() {
        let sub = ServerMessage::SubscriptionSuccess {
            symbols: vec!["AAPL".to_string()],
        };
        let unsub = ServerMessage::UnsubscriptionSuccess {
            symbols: vec!["AAPL".to_string()],
        };

        assert_eq!(
            serde_json::from_str::<Value>(&sub.to_json()).unwrap(),
            json!({"type": "subscription_success", "symbols": ["AAPL"]})
        );
        assert_eq!(
            serde_json::from_str::<Value>(&unsub.to_json()).unwrap(),
            json!({"type": "unsubscription_success", "symbols": ["AAPL"]})
        );
    }

    #[test]
    fn pong_and_error_shapes() {
        let pong: Value = serde_json::from_str(&ServerMessage::pong_now().to_json()).unwrap();
        assert_eq!(pong["type"], "pong");
        assert!(pong["timestamp"].as_i64().unwrap() > 0);

        let error: Value =
            serde_json::from_str(&ServerMessage::error(INVALID_MESSAGE_FORMAT).to_json()).unwrap();
        assert_eq!(
            error,
            json!({"type": "error", "message": "Invalid message format"})
        );
    }

    #[test]
    fn upstream_request_shape() {
        let json = UpstreamRequest::subscribe(vec!["AAPL".to_string(), "MSFT".to_string()])
            .to_json()
            .unwrap();
        assert_eq!(json, r#"{"action":"subscribe","symbols":["AAPL","MSFT"]}"#);

        let json = UpstreamRequest::unsubscribe(vec!["AAPL".to_string()])
            .to_json()
            .unwrap();
        assert_eq!(json, r#"{"action":"unsubscribe","symbols":["AAPL"]}"#);
    }
}
