//! JSON message envelope and payload validation
//!
//! Every message on the wire, in either direction, is a UTF-8 JSON object
//! `{"type": <string>, "data": <object>}`.

use crate::error::{MatchmakingError, Result};
use crate::types::{
    MatchRequest, PairingProposed, PairingRejected, RejectPairing, SubmitGameRequest,
};
use crate::utils::is_half_point_multiple;
use serde::Serialize;
use serde_json::{Map, Value};

/// Inbound message types
pub const SUBMIT_GAME_REQUEST_TYPE: &str = "submit_game_request";
pub const MATCH_REQUEST_TYPE: &str = "match_request";
pub const REJECT_PAIRING_TYPE: &str = "reject_pairing";

/// Outbound event types
pub const PAIRING_PROPOSED_TYPE: &str = "pairing_proposed";
pub const PAIRING_REJECTED_TYPE: &str = "pairing_rejected";

/// Routing keys for events
pub const PAIRING_PROPOSED_ROUTING_KEY: &str = "pairing.proposed";
pub const PAIRING_REJECTED_ROUTING_KEY: &str = "pairing.rejected";

/// Accepted board sizes
pub const MIN_BOARD_SIZE: u8 = 5;
pub const MAX_BOARD_SIZE: u8 = 25;

/// Largest handicap; a single handicap stone is not a thing
pub const MAX_HANDICAP: u8 = 9;

/// Largest komi magnitude accepted
pub const MAX_KOMI: f64 = 150.0;

/// A decoded envelope whose payload has not been interpreted yet
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub kind: String,
    pub data: Value,
}

/// A recognized inbound message with its decoded payload
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    SubmitGameRequest(SubmitGameRequest),
    MatchRequest(MatchRequest),
    RejectPairing(RejectPairing),
}

impl InboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::SubmitGameRequest(_) => SUBMIT_GAME_REQUEST_TYPE,
            InboundMessage::MatchRequest(_) => MATCH_REQUEST_TYPE,
            InboundMessage::RejectPairing(_) => REJECT_PAIRING_TYPE,
        }
    }
}

/// An outbound event ready to publish
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    PairingProposed(PairingProposed),
    PairingRejected(PairingRejected),
}

impl OutboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundEvent::PairingProposed(_) => PAIRING_PROPOSED_TYPE,
            OutboundEvent::PairingRejected(_) => PAIRING_REJECTED_TYPE,
        }
    }

    pub fn routing_key(&self) -> &'static str {
        match self {
            OutboundEvent::PairingProposed(_) => PAIRING_PROPOSED_ROUTING_KEY,
            OutboundEvent::PairingRejected(_) => PAIRING_REJECTED_ROUTING_KEY,
        }
    }

    pub fn to_envelope(&self) -> Result<Envelope> {
        match self {
            OutboundEvent::PairingProposed(event) => Envelope::wrap(self.kind(), event),
            OutboundEvent::PairingRejected(event) => Envelope::wrap(self.kind(), event),
        }
    }
}

fn invalid(reason: impl Into<String>) -> anyhow::Error {
    MatchmakingError::InvalidMessage {
        reason: reason.into(),
    }
    .into()
}

impl Envelope {
    /// Wrap a serializable payload under the given type
    pub fn wrap<T: Serialize>(kind: &str, payload: &T) -> Result<Self> {
        let data = serde_json::to_value(payload).map_err(|e| MatchmakingError::InternalError {
            message: format!("Failed to serialize {} payload: {}", kind, e),
        })?;

        Ok(Self {
            kind: kind.to_string(),
            data,
        })
    }

    /// Parse raw bytes into an envelope.
    ///
    /// Fails with `InvalidMessage` when the bytes are not a JSON object, when
    /// either key is missing, or when `type` is not a string.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| invalid(format!("Message is not valid JSON: {}", e)))?;

        let mut object = match value {
            Value::Object(object) => object,
            _ => return Err(invalid("Message is not a JSON object")),
        };

        let kind = match object.remove("type") {
            Some(Value::String(kind)) => kind,
            Some(_) => return Err(invalid("Message type is not a string")),
            None => return Err(invalid("Message has no type")),
        };

        let data = object
            .remove("data")
            .ok_or_else(|| invalid(format!("Message of type {} has no data", kind)))?;

        Ok(Self { kind, data })
    }

    /// Serialize the envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut object = Map::new();
        object.insert("type".to_string(), Value::String(self.kind.clone()));
        object.insert("data".to_string(), self.data.clone());

        serde_json::to_vec(&Value::Object(object)).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Decode the payload for a recognized type.
    ///
    /// Returns `Ok(None)` for a type this service does not handle, and
    /// `InvalidMessage` when a recognized payload does not decode or fails
    /// validation.
    pub fn decode(&self) -> Result<Option<InboundMessage>> {
        let message = match self.kind.as_str() {
            SUBMIT_GAME_REQUEST_TYPE => {
                let submit: SubmitGameRequest = self.payload()?;
                MessageUtils::validate_submit_request(&submit)?;
                InboundMessage::SubmitGameRequest(submit)
            }
            MATCH_REQUEST_TYPE => InboundMessage::MatchRequest(self.payload()?),
            REJECT_PAIRING_TYPE => InboundMessage::RejectPairing(self.payload()?),
            _ => return Ok(None),
        };

        Ok(Some(message))
    }

    fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        if !self.data.is_object() {
            return Err(invalid(format!("Data for {} is not an object", self.kind)));
        }

        serde_json::from_value(self.data.clone())
            .map_err(|e| invalid(format!("Invalid {} payload: {}", self.kind, e)))
    }
}

/// Payload validation utilities
pub struct MessageUtils;

impl MessageUtils {
    /// Check explicit preferences against the accepted ranges
    pub fn validate_submit_request(request: &SubmitGameRequest) -> Result<()> {
        if let Some(&board_size) = request.board_size.as_option() {
            if !(MIN_BOARD_SIZE..=MAX_BOARD_SIZE).contains(&board_size) {
                return Err(MatchmakingError::InvalidGameRequest {
                    reason: format!(
                        "Board size {} outside {}..={}",
                        board_size, MIN_BOARD_SIZE, MAX_BOARD_SIZE
                    ),
                }
                .into());
            }
        }

        if let Some(&handicap) = request.handicap.as_option() {
            if handicap == 1 || handicap > MAX_HANDICAP {
                return Err(MatchmakingError::InvalidGameRequest {
                    reason: format!("Handicap must be 0 or 2..={}, got {}", MAX_HANDICAP, handicap),
                }
                .into());
            }
        }

        if let Some(&komi) = request.komi.as_option() {
            if !komi.is_finite() || komi.abs() > MAX_KOMI || !is_half_point_multiple(komi) {
                return Err(MatchmakingError::InvalidGameRequest {
                    reason: format!(
                        "Komi must be a multiple of 0.5 within ±{}, got {}",
                        MAX_KOMI, komi
                    ),
                }
                .into());
            }
        }

        Ok(())
    }
}
