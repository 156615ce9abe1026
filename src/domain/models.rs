//! Entity models
//!
//! Rows in the columnar store serialize through these types; field names
//! match column names exactly. Timestamps are RFC 3339 text columns and
//! UUIDs canonicalize to strings at the insert boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A media source; parent of one or more flows
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub id: Uuid,
    pub format: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub soft_deleted: bool,
}

impl Source {
    pub fn new(id: Uuid, format: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            format: format.into(),
            label: None,
            description: None,
            created: now,
            updated: now,
            soft_deleted: false,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// A time-ordered media stream produced by a source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Flow {
    pub id: Uuid,
    pub source_id: Uuid,
    pub format: String,
    #[serde(default)]
    pub codec: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub frame_width: Option<i64>,
    #[serde(default)]
    pub frame_height: Option<i64>,
    #[serde(default)]
    pub frame_rate: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub soft_deleted: bool,
}

impl Flow {
    pub fn new(id: Uuid, source_id: Uuid, format: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            source_id,
            format: format.into(),
            codec: None,
            label: None,
            frame_width: None,
            frame_height: None,
            frame_rate: None,
            created: now,
            updated: now,
            soft_deleted: false,
        }
    }

    pub fn with_codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = Some(codec.into());
        self
    }
}

/// Deduplicated media payload referenced by segments across flows
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaObject {
    pub id: String,
    pub size: i64,
    pub created: DateTime<Utc>,
    /// Derived on read from the segments referencing this object; never a
    /// stored column.
    #[serde(default)]
    pub referenced_by_flows: Vec<String>,
}

impl MediaObject {
    pub fn new(id: impl Into<String>, size: i64) -> Self {
        Self {
            id: id.into(),
            size,
            created: Utc::now(),
            referenced_by_flows: Vec::new(),
        }
    }
}

/// A time-ranged chunk of media, indexed here and stored opaquely in the
/// object store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub object_id: String,
    /// Half-open interval, compact or standard wire form
    pub timerange: String,
    #[serde(default)]
    pub ts_offset: Option<String>,
    #[serde(default)]
    pub last_duration: Option<String>,
    #[serde(default)]
    pub sample_offset: i64,
    #[serde(default)]
    pub sample_count: i64,
    #[serde(default)]
    pub key_frame_count: i64,
    #[serde(default)]
    pub storage_path: String,
    pub created: DateTime<Utc>,
}

impl Segment {
    pub fn new(
        id: Uuid,
        flow_id: Uuid,
        object_id: impl Into<String>,
        timerange: impl Into<String>,
    ) -> Self {
        Self {
            id,
            flow_id,
            object_id: object_id.into(),
            timerange: timerange.into(),
            ts_offset: None,
            last_duration: None,
            sample_offset: 0,
            sample_count: 0,
            key_frame_count: 0,
            storage_path: String::new(),
            created: Utc::now(),
        }
    }
}

/// One tag row; `(entity_type, entity_id, tag_name)` is unique
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    pub tag_name: String,
    pub tag_value: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub updated_by: Option<String>,
}

/// Webhook registration row; delivery is handled outside the core
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Webhook {
    pub id: Uuid,
    pub url: String,
    #[serde(default)]
    pub api_key_name: Option<String>,
    #[serde(default)]
    pub events: Vec<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// Pending segment-range deletion job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeletionRequest {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub timerange: String,
    pub status: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// Serialize a model into an insertable row map.
pub fn to_row<T: Serialize>(model: &T) -> serde_json::Map<String, Value> {
    match serde_json::to_value(model) {
        Ok(Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    }
}

/// Deserialize a row map back into a model. Columns holding JSON-encoded
/// nested values (named in `json_columns`) are revived first.
pub fn from_row<T: for<'de> Deserialize<'de>>(
    mut row: serde_json::Map<String, Value>,
    json_columns: &[&str],
) -> Option<T> {
    for column in json_columns {
        let revived = match row.get(*column) {
            Some(Value::String(raw)) => serde_json::from_str::<Value>(raw).ok(),
            _ => None,
        };
        if let Some(revived) = revived {
            row.insert((*column).to_string(), revived);
        }
    }
    match serde_json::from_value(Value::Object(row)) {
        Ok(model) => Some(model),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to deserialize entity row");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_row_round_trip() {
        let source = Source::new(Uuid::new_v4(), "urn:x-nmos:format:video").with_label("Cam A");
        let row = to_row(&source);

        assert_eq!(row["format"], "urn:x-nmos:format:video");
        assert_eq!(row["label"], "Cam A");
        assert_eq!(row["soft_deleted"], false);

        let back: Source = from_row(row, &[]).unwrap();
        assert_eq!(back, source);
    }

    #[test]
    fn segment_row_round_trip() {
        let segment = Segment::new(Uuid::new_v4(), Uuid::new_v4(), "obj-1", "[0:0_10:0)");
        let row = to_row(&segment);
        assert_eq!(row["timerange"], "[0:0_10:0)");

        let back: Segment = from_row(row, &[]).unwrap();
        assert_eq!(back, segment);
    }

    #[test]
    fn webhook_events_revive_from_json_text() {
        let webhook = Webhook {
            id: Uuid::new_v4(),
            url: "https://example.invalid/hook".to_string(),
            api_key_name: None,
            events: vec!["flow.created".to_string(), "segment.added".to_string()],
            created: Utc::now(),
            updated: Utc::now(),
        };
        let mut row = to_row(&webhook);
        // Simulate the canonicalized stored form: nested list as JSON text
        let events_json = serde_json::to_string(&webhook.events).unwrap();
        row.insert("events".to_string(), Value::String(events_json));

        let back: Webhook = from_row(row, &["events"]).unwrap();
        assert_eq!(back.events, webhook.events);
    }

    #[test]
    fn uuids_serialize_to_canonical_strings() {
        let id = Uuid::new_v4();
        let source = Source::new(id, "urn:x-nmos:format:audio");
        let row = to_row(&source);
        assert_eq!(row["id"], Value::String(id.to_string()));
    }

    #[test]
    fn malformed_row_is_none() {
        let mut row = serde_json::Map::new();
        row.insert("id".to_string(), Value::String("not-a-uuid".to_string()));
        assert!(from_row::<Source>(row, &[]).is_none());
    }
}
