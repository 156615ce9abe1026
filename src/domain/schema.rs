//! Persisted table layout
//!
//! The nine entity tables and their default projections. `EntityStore::init`
//! drives these through the table-ops create/evolve path, so adding a column
//! here evolves existing deployments in place.

use crate::data::columnar::{DataType, Field, TableSchema};

pub const SOURCES: &str = "sources";
pub const FLOWS: &str = "flows";
pub const OBJECTS: &str = "objects";
pub const SEGMENTS: &str = "segments";
pub const TAGS: &str = "tags";
pub const USERS: &str = "users";
pub const API_TOKENS: &str = "api_tokens";
pub const WEBHOOKS: &str = "webhooks";
pub const DELETION_REQUESTS: &str = "deletion_requests";

/// One table with its default projections
pub struct TableSpec {
    pub name: &'static str,
    pub schema: TableSchema,
    pub projections: Vec<(String, Vec<String>)>,
}

fn field(name: &str, data_type: DataType) -> Field {
    Field::new(name, data_type)
}

fn projection(name: &str, columns: &[&str]) -> (String, Vec<String>) {
    (
        name.to_string(),
        columns.iter().map(|c| c.to_string()).collect(),
    )
}

/// Every entity table, leaves first so referenced tables exist before their
/// referrers.
pub fn entity_tables() -> Vec<TableSpec> {
    vec![
        TableSpec {
            name: SOURCES,
            schema: TableSchema::new(vec![
                field("id", DataType::String),
                field("format", DataType::String),
                field("label", DataType::String),
                field("description", DataType::String),
                field("created", DataType::String),
                field("updated", DataType::String),
                field("soft_deleted", DataType::Boolean),
            ]),
            projections: vec![],
        },
        TableSpec {
            name: FLOWS,
            schema: TableSchema::new(vec![
                field("id", DataType::String),
                field("source_id", DataType::String),
                field("format", DataType::String),
                field("codec", DataType::String),
                field("label", DataType::String),
                field("frame_width", DataType::Int64),
                field("frame_height", DataType::Int64),
                field("frame_rate", DataType::String),
                field("created", DataType::String),
                field("updated", DataType::String),
                field("soft_deleted", DataType::Boolean),
            ]),
            projections: vec![projection("flows_by_source", &["source_id"])],
        },
        TableSpec {
            name: OBJECTS,
            schema: TableSchema::new(vec![
                field("id", DataType::String),
                field("size", DataType::Int64),
                field("created", DataType::String),
            ]),
            projections: vec![],
        },
        TableSpec {
            name: SEGMENTS,
            schema: TableSchema::new(vec![
                field("id", DataType::String),
                field("flow_id", DataType::String),
                field("object_id", DataType::String),
                field("timerange", DataType::String),
                field("ts_offset", DataType::String),
                field("last_duration", DataType::String),
                field("sample_offset", DataType::Int64),
                field("sample_count", DataType::Int64),
                field("key_frame_count", DataType::Int64),
                field("storage_path", DataType::String),
                field("created", DataType::String),
            ]),
            projections: vec![projection("segments_by_flow", &["flow_id", "timerange"])],
        },
        TableSpec {
            name: TAGS,
            schema: TableSchema::new(vec![
                field("id", DataType::String),
                field("entity_type", DataType::String),
                field("entity_id", DataType::String),
                field("tag_name", DataType::String),
                field("tag_value", DataType::String),
                field("created", DataType::String),
                field("updated", DataType::String),
                field("created_by", DataType::String),
                field("updated_by", DataType::String),
            ]),
            projections: vec![projection("tags_by_entity", &["entity_type", "entity_id"])],
        },
        TableSpec {
            name: USERS,
            schema: TableSchema::new(vec![
                field("id", DataType::String),
                field("username", DataType::String),
                field("password_hash", DataType::String),
                field("created", DataType::String),
                field("updated", DataType::String),
            ]),
            projections: vec![],
        },
        TableSpec {
            name: API_TOKENS,
            schema: TableSchema::new(vec![
                field("id", DataType::String),
                field("user_id", DataType::String),
                field("token_hash", DataType::String),
                field("label", DataType::String),
                field("created", DataType::String),
                field("expires", DataType::String),
            ]),
            projections: vec![],
        },
        TableSpec {
            name: WEBHOOKS,
            schema: TableSchema::new(vec![
                field("id", DataType::String),
                field("url", DataType::String),
                field("api_key_name", DataType::String),
                field("events", DataType::String),
                field("created", DataType::String),
                field("updated", DataType::String),
            ]),
            projections: vec![],
        },
        TableSpec {
            name: DELETION_REQUESTS,
            schema: TableSchema::new(vec![
                field("id", DataType::String),
                field("flow_id", DataType::String),
                field("timerange", DataType::String),
                field("status", DataType::String),
                field("created", DataType::String),
                field("updated", DataType::String),
            ]),
            projections: vec![],
        },
    ]
}
