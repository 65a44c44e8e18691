//! Downstream Message Types
//!
//! JSON shapes exchanged with browser sessions on `/ws/stock`.
//!
//! # Wire Format (JSON)
//! ```json
//! {"type": "SUBSCRIBE", "code": "005930"}                 // client → bridge
//! {"type": "ACK", "session": "6f1c…"}                     // on connect
//! {"type": "ACK", "code": "005930"}                       // after SUBSCRIBE
//! {"type": "PRICE", "code": "005930", "price": "71200"}
//! {"type": "ERROR", "message": "missing code"}
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A parsed client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    /// Switch the session to `code`.
    Subscribe {
        /// Symbol, trimmed and non-blank.
        code: String,
    },
}

/// Reasons a client payload is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// Not a JSON object.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// `type` missing or not supported.
    #[error("unsupported message type: {0}")]
    UnsupportedType(String),

    /// `code` missing or blank.
    #[error("missing code")]
    MissingCode,

    /// The connection sent a binary frame.
    #[error("binary messages are not supported")]
    BinaryMessage,
}

#[derive(Deserialize)]
struct RawRequest {
    #[serde(rename = "type")]
    kind: Option<String>,
    code: Option<serde_json::Value>,
}

/// Parse one client text message.
///
/// # Errors
///
/// Returns an error for unparsable JSON, a missing or unsupported `type`,
/// and a missing, blank or non-string `code`.
pub fn parse_client_request(payload: &str) -> Result<ClientRequest, RequestError> {
    let value: serde_json::Value =
        serde_json::from_str(payload).map_err(|e| RequestError::InvalidJson(e.to_string()))?;
    // A derived struct would also accept `["SUBSCRIBE", "005930"]`
    if !value.is_object() {
        return Err(RequestError::InvalidJson("expected a JSON object".to_string()));
    }
    let raw: RawRequest =
        serde_json::from_value(value).map_err(|e| RequestError::InvalidJson(e.to_string()))?;

    match raw.kind.as_deref() {
        Some("SUBSCRIBE") => {}
        Some(other) => return Err(RequestError::UnsupportedType(other.to_string())),
        None => return Err(RequestError::UnsupportedType("<none>".to_string())),
    }

    let code = raw
        .code
        .as_ref()
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or(RequestError::MissingCode)?;

    Ok(ClientRequest::Subscribe {
        code: code.to_string(),
    })
}

/// A notification sent to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    /// Acknowledges a connection or a subscription.
    Ack {
        /// Symbol now active.
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        /// Session id, on connect.
        #[serde(skip_serializing_if = "Option::is_none")]
        session: Option<String>,
    },
    /// A trade price.
    Price {
        /// Symbol.
        code: String,
        /// Price as printed by the exchange.
        price: String,
    },
    /// A rejected request.
    Error {
        /// Reason.
        message: String,
    },
}

impl ServerMessage {
    /// Session-open acknowledgement.
    #[must_use]
    pub fn session_ack(session: impl Into<String>) -> Self {
        Self::Ack {
            code: None,
            session: Some(session.into()),
        }
    }

    /// Subscription acknowledgement.
    #[must_use]
    pub fn subscribe_ack(code: impl Into<String>) -> Self {
        Self::Ack {
            code: Some(code.into()),
            session: None,
        }
    }

    /// Serialize to the wire text.
    #[must_use]
    pub fn to_json(&self) -> String {
        // Only strings and options of strings: serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl From<&RequestError> for ServerMessage {
    fn from(error: &RequestError) -> Self {
        Self::Error {
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn parse_subscribe() {
        assert_eq!(
            parse_client_request(r#"{"type":"SUBSCRIBE","code":"005930"}"#),
            Ok(ClientRequest::Subscribe {
                code: "005930".to_string()
            })
        );
    }

    #[test]
    fn parse_trims_code() {
        assert_eq!(
            parse_client_request(r#"{"type":"SUBSCRIBE","code":" 000660 "}"#),
            Ok(ClientRequest::Subscribe {
                code: "000660".to_string()
            })
        );
    }

    #[test_case(r#"{"type":"SUBSCRIBE"}"# ; "missing code")]
    #[test_case(r#"{"type":"SUBSCRIBE","code":"   "}"# ; "blank code")]
    #[test_case(r#"{"type":"SUBSCRIBE","code":null}"# ; "null code")]
    #[test_case(r#"{"type":"SUBSCRIBE","code":5930}"# ; "numeric code")]
    fn parse_missing_code(payload: &str) {
        assert_eq!(parse_client_request(payload), Err(RequestError::MissingCode));
    }

    #[test_case(r#"{"type":"UNSUBSCRIBE","code":"005930"}"# ; "unknown type")]
    #[test_case(r#"{"code":"005930"}"# ; "missing type")]
    fn parse_unsupported_type(payload: &str) {
        assert!(matches!(
            parse_client_request(payload),
            Err(RequestError::UnsupportedType(_))
        ));
    }

    #[test_case("not json" ; "garbage")]
    #[test_case("[1,2,3]" ; "array")]
    #[test_case(r#"["SUBSCRIBE","005930"]"# ; "positional subscribe")]
    #[test_case(r#""SUBSCRIBE""# ; "string")]
    #[test_case("null" ; "null")]
    #[test_case("" ; "empty")]
    fn parse_invalid_json(payload: &str) {
        assert!(matches!(
            parse_client_request(payload),
            Err(RequestError::InvalidJson(_))
        ));
    }

    #[test]
    fn array_is_rejected_as_not_an_object() {
        assert_eq!(
            parse_client_request(r#"["SUBSCRIBE","005930"]"#),
            Err(RequestError::InvalidJson("expected a JSON object".to_string()))
        );
    }

    #[test]
    fn price_wire_shape() {
        let json = ServerMessage::Price {
            code: "005930".to_string(),
            price: "71200".to_string(),
        }
        .to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(
            value,
            serde_json::json!({"type": "PRICE", "code": "005930", "price": "71200"})
        );
    }

    #[test]
    fn ack_wire_shapes() {
        assert_eq!(
            ServerMessage::subscribe_ack("005930").to_json(),
            r#"{"type":"ACK","code":"005930"}"#
        );
        assert_eq!(
            ServerMessage::session_ack("abc").to_json(),
            r#"{"type":"ACK","session":"abc"}"#
        );
    }

    #[test]
    fn error_wire_shape() {
        let json = ServerMessage::from(&RequestError::MissingCode).to_json();
        assert_eq!(json, r#"{"type":"ERROR","message":"missing code"}"#);
    }
}
