//! Provenance QR payload.
//!
//! The payload is generated once at recording start, serialized to compact
//! JSON, and burned into every frame of the take. It is never mutated after
//! generation.

use gluewave_common::clock::TimeSource;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProvenanceError;

/// Schema version written into new payloads.
pub const PAYLOAD_VERSION: &str = "0.1";

/// Marker prefix that every Gluewave take id carries.
pub const ID_PREFIX: &str = "gw-";

/// Snapshot of the three gain stages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Volumes {
    pub big: f64,
    pub small: f64,
    pub master: f64,
}

/// The document embedded in recorded video as a QR code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrPayload {
    /// Schema version.
    pub v: String,

    /// `gw-` followed by a per-take unique token.
    pub id: String,

    /// Creation timestamp (ISO 8601).
    pub created_at: String,

    /// Human-readable title of the session.
    pub title: String,

    /// Gain snapshot at recording start.
    pub volumes: Volumes,
}

impl QrPayload {
    /// Generate a fresh payload for a new take.
    pub fn generate(title: impl Into<String>, volumes: Volumes, time: &dyn TimeSource) -> Self {
        Self {
            v: PAYLOAD_VERSION.to_string(),
            id: format!("{ID_PREFIX}{}", time.unique_token()),
            created_at: time.now_iso8601(),
            title: title.into(),
            volumes,
        }
    }

    /// Compact JSON text that goes into the QR code.
    pub fn to_qr_text(&self) -> Result<String, ProvenanceError> {
        Ok(serde_json::to_string(self)?)
    }

    /// File name a saved take is downloaded under.
    pub fn download_name(&self, extension: &str) -> String {
        format!("{}.{extension}", self.id)
    }

    /// Parse decoded QR text, accepting it only if it has the payload shape.
    ///
    /// Required: an object with a string `id` carrying [`ID_PREFIX`], a string
    /// `createdAt`, and a `volumes` object with numeric `big`, `small` and
    /// `master`. `v` and `title` are carried over when present.
    pub fn parse(text: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(text.trim()).ok()?;
        let object = value.as_object()?;

        let id = object.get("id")?.as_str()?;
        if !id.starts_with(ID_PREFIX) {
            return None;
        }
        let created_at = object.get("createdAt")?.as_str()?;

        let volumes = object.get("volumes")?.as_object()?;
        let volumes = Volumes {
            big: volumes.get("big")?.as_f64()?,
            small: volumes.get("small")?.as_f64()?,
            master: volumes.get("master")?.as_f64()?,
        };

        let text_field = |key: &str| {
            object
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        Some(Self {
            v: text_field("v"),
            id: id.to_string(),
            created_at: created_at.to_string(),
            title: text_field("title"),
            volumes,
        })
    }
}

#[cfg(test)]
mod tests {
    use gluewave_common::clock::FixedTimeSource;

    use super::*;

    fn sample() -> QrPayload {
        QrPayload {
            v: "0.1".to_string(),
            id: "gw-123".to_string(),
            created_at: "2024-01-01T00:00:00.000Z".to_string(),
            title: "T".to_string(),
            volumes: Volumes {
                big: 0.7,
                small: 0.3,
                master: 0.4,
            },
        }
    }

    #[test]
    fn generate_uses_prefix_and_time_source() {
        let time = FixedTimeSource::new("2024-05-05T10:00:00.000Z", "abc123");
        let payload = QrPayload::generate("Take", sample().volumes, &time);
        assert_eq!(payload.id, "gw-abc123");
        assert_eq!(payload.created_at, "2024-05-05T10:00:00.000Z");
        assert_eq!(payload.v, PAYLOAD_VERSION);
    }

    #[test]
    fn qr_text_uses_wire_field_names() {
        let text = sample().to_qr_text().unwrap();
        assert_eq!(
            text,
            r#"{"v":"0.1","id":"gw-123","createdAt":"2024-01-01T00:00:00.000Z","title":"T","volumes":{"big":0.7,"small":0.3,"master":0.4}}"#
        );
        assert_eq!(QrPayload::parse(&text), Some(sample()));
    }

    #[test]
    fn parse_rejects_foreign_ids() {
        let text = r#"{"id":"xx-1","createdAt":"2024","volumes":{"big":1,"small":1,"master":1}}"#;
        assert!(QrPayload::parse(text).is_none());
    }

    #[test]
    fn parse_rejects_missing_or_non_numeric_volumes() {
        let missing = r#"{"id":"gw-1","createdAt":"2024","volumes":{"big":1,"small":1}}"#;
        let textual = r#"{"id":"gw-1","createdAt":"2024","volumes":{"big":"1","small":1,"master":1}}"#;
        assert!(QrPayload::parse(missing).is_none());
        assert!(QrPayload::parse(textual).is_none());
    }

    #[test]
    fn parse_rejects_non_json_and_non_objects() {
        assert!(QrPayload::parse("https://example.com").is_none());
        assert!(QrPayload::parse("[1,2,3]").is_none());
        assert!(QrPayload::parse(r#"{"id":"gw-1","createdAt":5}"#).is_none());
    }

    #[test]
    fn parse_tolerates_missing_optional_fields() {
        let text = r#"{"id":"gw-9","createdAt":"2024","volumes":{"big":1,"small":0,"master":0.5}}"#;
        let payload = QrPayload::parse(text).unwrap();
        assert_eq!(payload.title, "");
        assert_eq!(payload.v, "");
        assert_eq!(payload.volumes.master, 0.5);
    }

    #[test]
    fn download_name_derives_from_id() {
        assert_eq!(sample().download_name("webm"), "gw-123.webm");
    }
}
