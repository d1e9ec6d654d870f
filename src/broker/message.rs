use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::error::{ProcessingError, ValidationError};

/// The unit of transfer between producer and consumer.
///
/// On the wire this is a UTF-8 JSON object:
///
/// ```json
/// { "message": "hello", "timestamp": "2024-05-01T12:00:00.000Z" }
/// ```
///
/// `message` is never empty. Construction goes through [`Envelope::new`] on
/// the producer side and [`Envelope::from_payload`] on the consumer side,
/// both of which enforce that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub message: String,
    #[serde(with = "iso8601")]
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Stamps `message` with the current time.
    pub fn new(message: impl Into<String>) -> Result<Self, ValidationError> {
        Self::with_timestamp(message, Utc::now())
    }

    pub fn with_timestamp(
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let message = message.into();
        if message.is_empty() {
            return Err(ValidationError::MissingMessage);
        }
        Ok(Self {
            message,
            // the wire format only carries milliseconds
            timestamp: timestamp.trunc_subsecs(3),
        })
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, ProcessingError> {
        let envelope: Envelope = serde_json::from_slice(payload)
            .map_err(|e| ProcessingError::Deserialization(e.to_string()))?;
        if envelope.message.is_empty() {
            return Err(ProcessingError::Deserialization(
                "message is empty".to_string(),
            ));
        }
        Ok(envelope)
    }
}

/// ISO-8601 in UTC with millisecond precision and a `Z` suffix.
mod iso8601 {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
