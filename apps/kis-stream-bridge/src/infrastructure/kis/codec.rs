//! Stream Codec
//!
//! Decodes the two wire formats that share the KIS stream connection and
//! encodes our subscription requests.
//!
//! - a frame starting with `{` is a JSON control frame; `PINGPONG` frames
//!   are reported separately so they can be echoed
//! - a frame starting with `0|` is a data frame
//!   `0|<tr_id>|<count>|<payload>`; for the trade stream each record
//!   yields a [`PriceTick`]
//! - anything else (including encrypted `1|` frames) is ignored

use crate::domain::market::PriceTick;
use crate::infrastructure::kis::messages::{
    ControlFrame, DATA_FRAME_PREFIX, FRAME_FIELD_SEPARATOR, PAYLOAD_FIELD_SEPARATOR, PRICE_FIELD,
    REALTIME_TRADE_TR_ID, SYMBOL_FIELD, SubscriptionFrame, TrType,
};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// A data frame was truncated or otherwise malformed.
    #[error("invalid data frame: {0}")]
    InvalidFormat(String),
}

/// A decoded upstream frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamFrame {
    /// Vendor heartbeat; echo the raw text back as a pong.
    Heartbeat,
    /// Any other control frame.
    Control(ControlFrame),
    /// Trade prices from a data frame.
    Ticks(Vec<PriceTick>),
    /// A frame this service does not consume.
    Ignored,
}

/// Codec for the KIS stream.
#[derive(Debug, Default, Clone)]
pub struct FrameCodec;

impl FrameCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if a control frame is not valid JSON or a trade data
    /// frame is too short to carry a price.
    pub fn decode(&self, text: &str) -> Result<UpstreamFrame, CodecError> {
        let trimmed = text.trim_start();

        if trimmed.starts_with('{') {
            let frame: ControlFrame = serde_json::from_str(trimmed)?;
            if frame.is_heartbeat() {
                return Ok(UpstreamFrame::Heartbeat);
            }
            return Ok(UpstreamFrame::Control(frame));
        }

        if trimmed.starts_with(DATA_FRAME_PREFIX) {
            return Self::decode_data(trimmed);
        }

        Ok(UpstreamFrame::Ignored)
    }

    fn decode_data(text: &str) -> Result<UpstreamFrame, CodecError> {
        let parts: Vec<&str> = text.splitn(4, FRAME_FIELD_SEPARATOR).collect();
        if parts.len() < 4 {
            return Err(CodecError::InvalidFormat(format!(
                "expected 4 sections, got {}",
                parts.len()
            )));
        }

        if parts[1] != REALTIME_TRADE_TR_ID {
            return Ok(UpstreamFrame::Ignored);
        }

        let count = parts[2].trim().parse::<usize>().unwrap_or(1).max(1);
        let fields: Vec<&str> = parts[3].split(PAYLOAD_FIELD_SEPARATOR).collect();

        if fields.len() <= PRICE_FIELD {
            return Err(CodecError::InvalidFormat(format!(
                "payload has {} fields, price is field {PRICE_FIELD}",
                fields.len()
            )));
        }

        let record_len = if count > 1 && fields.len() % count == 0 {
            fields.len() / count
        } else {
            fields.len()
        };

        let ticks = fields
            .chunks(record_len)
            .filter(|record| record.len() > PRICE_FIELD)
            .filter_map(|record| {
                let symbol = record[SYMBOL_FIELD].trim();
                let price = record[PRICE_FIELD].trim();
                (!symbol.is_empty() && !price.is_empty()).then(|| PriceTick::new(symbol, price))
            })
            .collect();

        Ok(UpstreamFrame::Ticks(ticks))
    }

    /// Encode a subscribe/unsubscribe request for the trade stream.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode_subscription(
        &self,
        approval_key: &str,
        tr_type: TrType,
        symbol: &str,
    ) -> Result<String, CodecError> {
        let frame = SubscriptionFrame::realtime_trade(approval_key, tr_type, symbol);
        Ok(serde_json::to_string(&frame)?)
    }
}
