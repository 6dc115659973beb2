//! The wire envelope: every frame on the socket is one MsgPack-encoded
//! `{id, type, payload}` map.
//!
//! Commands from the client carry a client-chosen `id`; the matching
//! response (`resp_success`/`resp_error`) echoes it. Server-pushed events
//! carry a fresh id. Payloads are dynamic maps decoded into typed structs
//! per message type by the dispatcher.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Message type of a successful command response.
pub const RESP_SUCCESS: &str = "resp_success";
/// Message type of a failed command response.
pub const RESP_ERROR: &str = "resp_error";

fn nil() -> rmpv::Value {
    rmpv::Value::Nil
}

/// One frame on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation id: client-chosen for commands, echoed in responses,
    /// fresh for events.
    pub id: String,
    /// Message type string (`cmd_*`, `resp_*`, `event_*`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific payload map. Nil when the message carries none.
    #[serde(default = "nil")]
    pub payload: rmpv::Value,
}

impl Envelope {
    /// Builds an envelope with an already-encoded payload value.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: impl Into<String>, payload: rmpv::Value) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            payload,
        }
    }

    /// Builds an envelope from a typed payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload fails to serialize.
    pub fn with_payload<T: Serialize>(
        id: impl Into<String>,
        kind: impl Into<String>,
        payload: &T,
    ) -> anyhow::Result<Self> {
        Ok(Self::new(id, kind, rmpv::ext::to_value(payload)?))
    }

    /// Builds a `resp_success` envelope answering `request_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload fails to serialize.
    pub fn success<T: Serialize>(request_id: &str, payload: &T) -> anyhow::Result<Self> {
        Self::with_payload(request_id, RESP_SUCCESS, payload)
    }

    /// Builds a `resp_error` envelope answering `request_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload fails to serialize.
    pub fn error(request_id: &str, payload: &super::ErrorPayload) -> anyhow::Result<Self> {
        Self::with_payload(request_id, RESP_ERROR, payload)
    }

    /// Whether this envelope is a command response (success or error).
    #[must_use]
    pub fn is_response(&self) -> bool {
        self.kind == RESP_SUCCESS || self.kind == RESP_ERROR
    }

    /// Decodes the payload into a typed struct.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not match `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        Ok(rmpv::ext::from_value(self.payload.clone())?)
    }

    /// Encodes the envelope as named-map MsgPack bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Decodes an envelope from MsgPack bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid envelope map.
    pub fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::messages::ErrorPayload;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Probe {
        direction: String,
        steps: u32,
    }

    #[test]
    fn envelope_round_trips_with_typed_payload() {
        let probe = Probe {
            direction: "up".to_string(),
            steps: 3,
        };
        let env = Envelope::with_payload("req-1", "cmd_move", &probe).unwrap();
        let bytes = env.encode().unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();

        assert_eq!(decoded.id, "req-1");
        assert_eq!(decoded.kind, "cmd_move");
        assert_eq!(decoded.payload_as::<Probe>().unwrap(), probe);
    }

    #[test]
    fn wire_map_uses_type_key() {
        let env = Envelope::new("a", "cmd_move", rmpv::Value::Nil);
        let bytes = env.encode().unwrap();
        let val: rmpv::Value = rmp_serde::from_slice(&bytes).unwrap();
        let map = val.as_map().expect("envelope must be a map");
        let keys: Vec<&str> = map.iter().filter_map(|(k, _)| k.as_str()).collect();
        assert!(keys.contains(&"id"));
        assert!(keys.contains(&"type"), "discriminator must be named 'type'");
        assert!(keys.contains(&"payload"));
    }

    #[test]
    fn missing_payload_decodes_as_nil() {
        // A two-field map without payload is still a valid envelope.
        let val = rmpv::Value::Map(vec![
            (rmpv::Value::from("id"), rmpv::Value::from("x")),
            (rmpv::Value::from("type"), rmpv::Value::from("cmd_sort_inventory")),
        ]);
        let bytes = rmp_serde::to_vec_named(&val).unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();
        assert_eq!(decoded.payload, rmpv::Value::Nil);
    }

    #[test]
    fn success_echoes_request_id() {
        let env = Envelope::success("req-9", &Probe {
            direction: "down".to_string(),
            steps: 1,
        })
        .unwrap();
        assert_eq!(env.id, "req-9");
        assert_eq!(env.kind, RESP_SUCCESS);
        assert!(env.is_response());
    }

    #[test]
    fn error_carries_code_and_message() {
        let env = Envelope::error("req-2", &ErrorPayload::new("blocked", "Movement blocked"))
            .unwrap();
        assert_eq!(env.kind, RESP_ERROR);
        let payload: ErrorPayload = env.payload_as().unwrap();
        assert_eq!(payload.error_code.as_deref(), Some("blocked"));
        assert_eq!(payload.message, "Movement blocked");
    }

    #[test]
    fn payload_type_mismatch_is_an_error() {
        let env = Envelope::with_payload("req-3", "cmd_move", &Probe {
            direction: "up".to_string(),
            steps: 1,
        })
        .unwrap();

        #[derive(Debug, Deserialize)]
        struct Other {
            #[allow(dead_code)]
            token: String,
        }
        assert!(env.payload_as::<Other>().is_err());
    }
}
