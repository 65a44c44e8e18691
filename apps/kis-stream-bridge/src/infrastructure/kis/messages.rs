//! KIS WebSocket Message Types
//!
//! Wire format types for the KIS real-time stream.
//!
//! # Message Shapes
//!
//! ## Control Frames (JSON)
//! - subscribe/unsubscribe requests we send
//! - subscription results and errors the vendor sends back
//! - `PINGPONG` heartbeats (echoed back verbatim)
//!
//! ## Data Frames (pipe-delimited)
//! - `0|H0STCNT0|001|005930^091500^71200^...` real-time trades; the payload
//!   is `^`-delimited with the symbol at field 0 and the price at field 2
//! - `1|...` encrypted frames (not used by this service)

use serde::{Deserialize, Serialize};

// =============================================================================
// Constants
// =============================================================================

/// Transaction id of the domestic real-time trade stream.
pub const REALTIME_TRADE_TR_ID: &str = "H0STCNT0";

/// Transaction id of vendor heartbeat frames.
pub const HEARTBEAT_TR_ID: &str = "PINGPONG";

/// Prefix of unencrypted data frames.
pub const DATA_FRAME_PREFIX: &str = "0|";

/// Separator between the fields of a data frame.
pub const FRAME_FIELD_SEPARATOR: char = '|';

/// Separator between the values of a data frame payload.
pub const PAYLOAD_FIELD_SEPARATOR: char = '^';

/// Payload index of the symbol (`MKSC_SHRN_ISCD`).
pub const SYMBOL_FIELD: usize = 0;

/// Payload index of the current price (`STCK_PRPR`).
pub const PRICE_FIELD: usize = 2;

/// Customer type for individual accounts.
pub const CUSTOMER_TYPE_PERSONAL: &str = "P";

/// Content type announced in control frames.
pub const CONTENT_TYPE_UTF8: &str = "utf-8";

/// `rt_cd` value of a successful control response.
pub const RESULT_CODE_SUCCESS: &str = "0";

// =============================================================================
// Outbound: Subscription Requests
// =============================================================================

/// Registration type of a subscription request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrType {
    /// Register for a symbol.
    #[serde(rename = "1")]
    Subscribe,
    /// Deregister from a symbol.
    #[serde(rename = "2")]
    Unsubscribe,
}

impl TrType {
    /// Wire value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "1",
            Self::Unsubscribe => "2",
        }
    }
}

/// Subscribe or unsubscribe request.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "header": {"approval_key": "...", "custtype": "P", "tr_type": "1", "content-type": "utf-8"},
///   "body": {"input": {"tr_id": "H0STCNT0", "tr_key": "005930"}}
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionFrame<'a> {
    /// Request header.
    pub header: SubscriptionHeader<'a>,
    /// Request body.
    pub body: SubscriptionBody<'a>,
}

/// Header of a subscription request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionHeader<'a> {
    /// Streaming approval key.
    pub approval_key: &'a str,
    /// Customer type.
    pub custtype: &'static str,
    /// Register or deregister.
    pub tr_type: TrType,
    /// Content encoding.
    #[serde(rename = "content-type")]
    pub content_type: &'static str,
}

/// Body of a subscription request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionBody<'a> {
    /// Stream and key.
    pub input: SubscriptionInput<'a>,
}

/// Stream and key of a subscription request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionInput<'a> {
    /// Stream transaction id.
    pub tr_id: &'static str,
    /// Symbol.
    pub tr_key: &'a str,
}

impl<'a> SubscriptionFrame<'a> {
    /// Request for the real-time trade stream of `symbol`.
    #[must_use]
    pub const fn realtime_trade(approval_key: &'a str, tr_type: TrType, symbol: &'a str) -> Self {
        Self {
            header: SubscriptionHeader {
                approval_key,
                custtype: CUSTOMER_TYPE_PERSONAL,
                tr_type,
                content_type: CONTENT_TYPE_UTF8,
            },
            body: SubscriptionBody {
                input: SubscriptionInput {
                    tr_id: REALTIME_TRADE_TR_ID,
                    tr_key: symbol,
                },
            },
        }
    }
}

// =============================================================================
// Inbound: Control Frames
// =============================================================================

/// Control frame sent by the vendor.
///
/// # Wire Format (JSON)
/// ```json
/// {"header": {"tr_id": "H0STCNT0", "tr_key": "005930", "encrypt": "N"},
///  "body": {"rt_cd": "0", "msg_cd": "OPSP0000", "msg1": "SUBSCRIBE SUCCESS"}}
/// {"header": {"tr_id": "PINGPONG", "datetime": "20240102093000"}}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ControlFrame {
    /// Frame header.
    #[serde(default)]
    pub header: ControlHeader,
    /// Result body; heartbeats carry none.
    #[serde(default)]
    pub body: Option<ControlBody>,
}

/// Header of a control frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ControlHeader {
    /// Transaction id.
    #[serde(default)]
    pub tr_id: String,
    /// Symbol the response refers to, if any.
    #[serde(default)]
    pub tr_key: Option<String>,
}

/// Result part of a control frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ControlBody {
    /// Result code; `"0"` is success.
    #[serde(default)]
    pub rt_cd: String,
    /// Vendor message code.
    #[serde(default)]
    pub msg_cd: String,
    /// Human-readable message.
    #[serde(default)]
    pub msg1: String,
}

impl ControlFrame {
    /// Whether this is a vendor heartbeat.
    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        self.header.tr_id == HEARTBEAT_TR_ID
    }

    /// Whether the vendor reported a failure.
    ///
    /// Only an explicit, non-empty `rt_cd` other than `"0"` counts.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.body
            .as_ref()
            .is_some_and(|b| !b.rt_cd.is_empty() && b.rt_cd != RESULT_CODE_SUCCESS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_frame_wire_shape() {
        let frame = SubscriptionFrame::realtime_trade("approval", TrType::Subscribe, "005930");
        let value = serde_json::to_value(&frame).unwrap();

        assert_eq!(
            value,
            serde_json::json!({
                "header": {
                    "approval_key": "approval",
                    "custtype": "P",
                    "tr_type": "1",
                    "content-type": "utf-8"
                },
                "body": {"input": {"tr_id": "H0STCNT0", "tr_key": "005930"}}
            })
        );
    }

    #[test]
    fn unsubscribe_tr_type() {
        let frame = SubscriptionFrame::realtime_trade("k", TrType::Unsubscribe, "000660");
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["header"]["tr_type"], "2");
        assert_eq!(TrType::Unsubscribe.as_str(), "2");
    }

    #[test]
    fn parse_subscribe_success() {
        let json = r#"{"header":{"tr_id":"H0STCNT0","tr_key":"005930","encrypt":"N"},
            "body":{"rt_cd":"0","msg_cd":"OPSP0000","msg1":"SUBSCRIBE SUCCESS","output":{"iv":"x","key":"y"}}}"#;
        let frame: ControlFrame = serde_json::from_str(json).unwrap();

        assert_eq!(frame.header.tr_id, "H0STCNT0");
        assert_eq!(frame.header.tr_key.as_deref(), Some("005930"));
        assert!(!frame.is_failure());
        assert!(!frame.is_heartbeat());
    }

    #[test]
    fn parse_failure() {
        let json = r#"{"header":{"tr_id":"H0STCNT0"},
            "body":{"rt_cd":"1","msg_cd":"OPSP8996","msg1":"ALREADY IN USE appkey"}}"#;
        let frame: ControlFrame = serde_json::from_str(json).unwrap();

        assert!(frame.is_failure());
        assert_eq!(frame.body.unwrap().msg_cd, "OPSP8996");
    }

    #[test]
    fn parse_heartbeat() {
        let frame: ControlFrame =
            serde_json::from_str(r#"{"header":{"tr_id":"PINGPONG","datetime":"20240102093000"}}"#)
                .unwrap();

        assert!(frame.is_heartbeat());
        assert!(!frame.is_failure());
    }

    #[test]
    fn empty_rt_cd_is_not_failure() {
        let frame: ControlFrame =
            serde_json::from_str(r#"{"header":{"tr_id":"H0STCNT0"},"body":{"msg1":"hi"}}"#)
                .unwrap();
        assert!(!frame.is_failure());
    }
}
