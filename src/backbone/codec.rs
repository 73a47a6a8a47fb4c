//! Envelope encoding on the wire.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backbone::types::{BackboneError, BackboneResult, Envelope, CODE_OK};

/// Payload codec used for every backbone exchange.
///
/// Both variants write envelopes as JSON. They differ on decode: `Json`
/// requires a structured envelope, `String` accepts any UTF-8 reply and
/// treats text that is not an envelope as a successful plain body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Json,
    String,
}

impl Codec {
    pub fn encode(&self, envelope: &Envelope) -> BackboneResult<Bytes> {
        serde_json::to_vec(envelope)
            .map(Bytes::from)
            .map_err(|e| BackboneError::Encode(e.to_string()))
    }

    pub fn decode(&self, payload: &[u8]) -> BackboneResult<Envelope> {
        match self {
            Codec::Json => {
                serde_json::from_slice(payload).map_err(|e| BackboneError::Decode(e.to_string()))
            }
            Codec::String => {
                let text = std::str::from_utf8(payload)
                    .map_err(|e| BackboneError::Decode(e.to_string()))?;
                match serde_json::from_str::<Value>(text) {
                    Ok(value @ Value::Object(_)) => serde_json::from_value(value)
                        .map_err(|e| BackboneError::Decode(e.to_string())),
                    _ => Ok(Envelope {
                        headers: None,
                        body: Some(Value::String(text.to_string())),
                        code: Some(CODE_OK),
                    }),
                }
            }
        }
    }
}
