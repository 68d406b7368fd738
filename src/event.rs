use serde::{Deserialize, Serialize};

/// Opaque domain payload recorded in the outbox.
///
/// The outbox never inspects `payload`; it is stored and handed to the
/// publisher as-is. Events are immutable once created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event type (e.g., "OrderCreated", "PaymentSucceeded")
    #[serde(rename = "type")]
    pub event_type: String,
    /// Serialized payload (typically JSON or binary)
    #[serde(rename = "data", with = "base64_bytes")]
    pub payload: Vec<u8>,
}

impl Event {
    /// Create a new event with the given type and payload.
    pub fn new(event_type: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: payload.into(),
        }
    }

    /// Create an event with a string payload.
    pub fn with_string_payload(event_type: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::new(event_type, payload.into().into_bytes())
    }

    /// Create an event with bitcode-serialized payload.
    pub fn encode<T: Serialize>(
        event_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self, bitcode::Error> {
        let bytes = bitcode::serialize(payload)?;
        Ok(Self::new(event_type, bytes))
    }

    /// Decode the payload from bitcode binary format.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, bitcode::Error> {
        bitcode::deserialize(&self.payload)
    }

    /// Get the payload as a string (if valid UTF-8).
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Payload bytes travel as base64 text inside JSON records.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}
