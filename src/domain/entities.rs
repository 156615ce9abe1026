//! Source / Flow / Object CRUD over the columnar store
//!
//! Maintains the referential rules the columnar engine does not: a flow
//! requires a live source, hard deletes require no live referrers, and
//! object reference counts derive from segments on read. Soft-deleted rows
//! are excluded from every default read through a single filter helper;
//! `include_deleted` makes the exception explicit.

use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use super::models::{self, DeletionRequest, Flow, MediaObject, Source, Webhook};
use super::schema::{
    self, DELETION_REQUESTS, FLOWS, OBJECTS, SEGMENTS, SOURCES, TAGS, WEBHOOKS,
};
use crate::data::columnar::{ColumnarStore, Predicate};
use crate::data::error::StoreError;

/// Entity CRUD facade
pub struct EntityStore {
    columnar: Arc<ColumnarStore>,
}

impl EntityStore {
    /// Create or evolve every entity table, then return the facade.
    pub async fn init(columnar: Arc<ColumnarStore>) -> Result<Self, StoreError> {
        for spec in schema::entity_tables() {
            columnar
                .create_table(spec.name, &spec.schema, Some(&spec.projections))
                .await?;
        }
        tracing::debug!("Entity tables ready");
        Ok(Self { columnar })
    }

    pub fn columnar(&self) -> &Arc<ColumnarStore> {
        &self.columnar
    }

    // =========================================================================
    // Sources
    // =========================================================================

    pub async fn create_source(&self, source: &Source) -> Result<(), StoreError> {
        if self.get_source(source.id, true).await?.is_some() {
            return Err(StoreError::Conflict(format!(
                "source '{}' already exists",
                source.id
            )));
        }
        self.columnar
            .insert_single(SOURCES, &models::to_row(source))
            .await?;
        tracing::debug!(source_id = %source.id, "Created source");
        Ok(())
    }

    /// Lookup by id; soft-deleted sources are invisible unless
    /// `include_deleted`.
    pub async fn get_source(
        &self,
        id: Uuid,
        include_deleted: bool,
    ) -> Result<Option<Source>, StoreError> {
        let predicate = live_filter(
            Predicate::new().eq("id", id.to_string()),
            include_deleted,
        );
        self.first_row::<Source>(SOURCES, &predicate, &[]).await
    }

    pub async fn list_sources(
        &self,
        predicate: Option<Predicate>,
        limit: Option<usize>,
    ) -> Result<Vec<Source>, StoreError> {
        let predicate = live_filter(predicate.unwrap_or_default(), false);
        self.rows::<Source>(SOURCES, &predicate, limit, &[]).await
    }

    /// Patch mutable source fields; bumps `updated`. Returns rows affected.
    pub async fn update_source(
        &self,
        id: Uuid,
        patch: &Map<String, Value>,
    ) -> Result<usize, StoreError> {
        let predicate = live_filter(Predicate::new().eq("id", id.to_string()), false);
        self.columnar
            .update(SOURCES, &with_updated_stamp(patch), Some(&predicate))
            .await
    }

    /// Mark a source deleted; default reads stop returning it.
    pub async fn soft_delete_source(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut patch = Map::new();
        patch.insert("soft_deleted".to_string(), Value::Bool(true));
        let affected = self.update_source(id, &patch).await?;
        Ok(affected > 0)
    }

    /// Remove the source row outright; refused while live flows reference it.
    pub async fn hard_delete_source(&self, id: Uuid) -> Result<(), StoreError> {
        let live_flows = self.list_flows(Some(id), None).await?;
        if !live_flows.is_empty() {
            return Err(StoreError::Conflict(format!(
                "source '{}' still has {} live flows",
                id,
                live_flows.len()
            )));
        }

        let predicate = Predicate::new().eq("id", id.to_string());
        self.columnar.delete(SOURCES, Some(&predicate)).await?;
        let tag_predicate = Predicate::new()
            .eq("entity_type", "source")
            .eq("entity_id", id.to_string());
        self.columnar.delete(TAGS, Some(&tag_predicate)).await?;
        tracing::debug!(source_id = %id, "Hard-deleted source");
        Ok(())
    }

    // =========================================================================
    // Flows
    // =========================================================================

    /// Create a flow; its source must exist and be live.
    pub async fn create_flow(&self, flow: &Flow) -> Result<(), StoreError> {
        if self.get_source(flow.source_id, false).await?.is_none() {
            return Err(StoreError::not_found("source", flow.source_id.to_string()));
        }
        if self.get_flow(flow.id, true).await?.is_some() {
            return Err(StoreError::Conflict(format!(
                "flow '{}' already exists",
                flow.id
            )));
        }
        self.columnar
            .insert_single(FLOWS, &models::to_row(flow))
            .await?;
        tracing::debug!(flow_id = %flow.id, source_id = %flow.source_id, "Created flow");
        Ok(())
    }

    pub async fn get_flow(
        &self,
        id: Uuid,
        include_deleted: bool,
    ) -> Result<Option<Flow>, StoreError> {
        let predicate = live_filter(
            Predicate::new().eq("id", id.to_string()),
            include_deleted,
        );
        self.first_row::<Flow>(FLOWS, &predicate, &[]).await
    }

    pub async fn list_flows(
        &self,
        source_id: Option<Uuid>,
        limit: Option<usize>,
    ) -> Result<Vec<Flow>, StoreError> {
        let mut predicate = Predicate::new();
        if let Some(source_id) = source_id {
            predicate = predicate.eq("source_id", source_id.to_string());
        }
        self.rows::<Flow>(FLOWS, &live_filter(predicate, false), limit, &[])
            .await
    }

    pub async fn update_flow(
        &self,
        id: Uuid,
        patch: &Map<String, Value>,
    ) -> Result<usize, StoreError> {
        let predicate = live_filter(Predicate::new().eq("id", id.to_string()), false);
        self.columnar
            .update(FLOWS, &with_updated_stamp(patch), Some(&predicate))
            .await
    }

    pub async fn soft_delete_flow(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut patch = Map::new();
        patch.insert("soft_deleted".to_string(), Value::Bool(true));
        let affected = self.update_flow(id, &patch).await?;
        Ok(affected > 0)
    }

    /// Remove the flow row outright; refused while segments reference it.
    pub async fn hard_delete_flow(&self, id: Uuid) -> Result<(), StoreError> {
        let segment_predicate = Predicate::new().eq("flow_id", id.to_string());
        let segments = self
            .columnar
            .select(
                SEGMENTS,
                Some(&segment_predicate),
                Some(&["id".to_string()]),
                Some(1),
                false,
            )
            .await?;
        if !segments.is_empty() {
            return Err(StoreError::Conflict(format!(
                "flow '{}' still has indexed segments",
                id
            )));
        }

        let predicate = Predicate::new().eq("id", id.to_string());
        self.columnar.delete(FLOWS, Some(&predicate)).await?;
        let tag_predicate = Predicate::new()
            .eq("entity_type", "flow")
            .eq("entity_id", id.to_string());
        self.columnar.delete(TAGS, Some(&tag_predicate)).await?;
        tracing::debug!(flow_id = %id, "Hard-deleted flow");
        Ok(())
    }

    // =========================================================================
    // Objects
    // =========================================================================

    pub async fn create_object(&self, object: &MediaObject) -> Result<(), StoreError> {
        if self.object_row(&object.id).await?.is_some() {
            return Err(StoreError::Conflict(format!(
                "object '{}' already exists",
                object.id
            )));
        }
        let mut row = models::to_row(object);
        // Reference sets are derived on read, never stored
        row.remove("referenced_by_flows");
        self.columnar.insert_single(OBJECTS, &row).await?;
        tracing::debug!(object_id = %object.id, "Created object");
        Ok(())
    }

    /// Lookup with the reference set recomputed lazily from segments.
    pub async fn get_object(&self, id: &str) -> Result<Option<MediaObject>, StoreError> {
        let Some(mut object) = self.object_row(id).await? else {
            return Ok(None);
        };
        object.referenced_by_flows = self.object_references(id).await?;
        Ok(Some(object))
    }

    /// Remove an object; refused while any segment references it.
    pub async fn delete_object(&self, id: &str) -> Result<(), StoreError> {
        let references = self.object_references(id).await?;
        if !references.is_empty() {
            return Err(StoreError::Conflict(format!(
                "object '{}' is referenced by {} flows",
                id,
                references.len()
            )));
        }
        let predicate = Predicate::new().eq("id", id);
        self.columnar.delete(OBJECTS, Some(&predicate)).await?;
        tracing::debug!(object_id = %id, "Deleted object");
        Ok(())
    }

    async fn object_row(&self, id: &str) -> Result<Option<MediaObject>, StoreError> {
        let predicate = Predicate::new().eq("id", id);
        self.first_row::<MediaObject>(OBJECTS, &predicate, &[])
            .await
    }

    /// Distinct flow ids of segments referencing an object.
    async fn object_references(&self, id: &str) -> Result<Vec<String>, StoreError> {
        let predicate = Predicate::new().eq("object_id", id);
        let result = self
            .columnar
            .select(
                SEGMENTS,
                Some(&predicate),
                Some(&["flow_id".to_string()]),
                None,
                false,
            )
            .await?;

        let mut flows: Vec<String> = result
            .column("flow_id")
            .map(|col| {
                col.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        flows.sort();
        flows.dedup();
        Ok(flows)
    }

    // =========================================================================
    // Webhooks
    // =========================================================================

    pub async fn register_webhook(&self, webhook: &Webhook) -> Result<(), StoreError> {
        self.columnar
            .insert_single(WEBHOOKS, &models::to_row(webhook))
            .await?;
        tracing::debug!(webhook_id = %webhook.id, url = %webhook.url, "Registered webhook");
        Ok(())
    }

    pub async fn list_webhooks(&self) -> Result<Vec<Webhook>, StoreError> {
        self.rows::<Webhook>(WEBHOOKS, &Predicate::new(), None, &["events"])
            .await
    }

    pub async fn delete_webhook(&self, id: Uuid) -> Result<bool, StoreError> {
        let predicate = Predicate::new().eq("id", id.to_string());
        let deleted = self.columnar.delete(WEBHOOKS, Some(&predicate)).await?;
        Ok(deleted > 0)
    }

    // =========================================================================
    // Deletion requests
    // =========================================================================

    pub async fn create_deletion_request(
        &self,
        request: &DeletionRequest,
    ) -> Result<(), StoreError> {
        self.columnar
            .insert_single(DELETION_REQUESTS, &models::to_row(request))
            .await?;
        Ok(())
    }

    pub async fn get_deletion_request(
        &self,
        id: Uuid,
    ) -> Result<Option<DeletionRequest>, StoreError> {
        let predicate = Predicate::new().eq("id", id.to_string());
        self.first_row::<DeletionRequest>(DELETION_REQUESTS, &predicate, &[])
            .await
    }

    pub async fn set_deletion_request_status(
        &self,
        id: Uuid,
        status: &str,
    ) -> Result<usize, StoreError> {
        let mut patch = Map::new();
        patch.insert("status".to_string(), Value::String(status.to_string()));
        let predicate = Predicate::new().eq("id", id.to_string());
        self.columnar
            .update(
                DELETION_REQUESTS,
                &with_updated_stamp(&patch),
                Some(&predicate),
            )
            .await
    }

    pub async fn list_deletion_requests(
        &self,
        status: Option<&str>,
    ) -> Result<Vec<DeletionRequest>, StoreError> {
        let mut predicate = Predicate::new();
        if let Some(status) = status {
            predicate = predicate.eq("status", status);
        }
        self.rows::<DeletionRequest>(DELETION_REQUESTS, &predicate, None, &[])
            .await
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn first_row<T: for<'de> serde::Deserialize<'de>>(
        &self,
        table: &str,
        predicate: &Predicate,
        json_columns: &[&str],
    ) -> Result<Option<T>, StoreError> {
        let rows = self
            .columnar
            .select_rows(table, Some(predicate), None, Some(1))
            .await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| models::from_row(row, json_columns)))
    }

    async fn rows<T: for<'de> serde::Deserialize<'de>>(
        &self,
        table: &str,
        predicate: &Predicate,
        limit: Option<usize>,
        json_columns: &[&str],
    ) -> Result<Vec<T>, StoreError> {
        let rows = self
            .columnar
            .select_rows(table, Some(predicate), None, limit)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| models::from_row(row, json_columns))
            .collect())
    }
}

/// Apply the implicit `soft_deleted = false` filter to a default read.
fn live_filter(predicate: Predicate, include_deleted: bool) -> Predicate {
    if include_deleted {
        predicate
    } else {
        predicate.eq("soft_deleted", false)
    }
}

/// Copy of `patch` with the `updated` audit column stamped.
fn with_updated_stamp(patch: &Map<String, Value>) -> Map<String, Value> {
    let mut stamped = patch.clone();
    stamped.insert(
        "updated".to_string(),
        Value::String(chrono::Utc::now().to_rfc3339()),
    );
    stamped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::AppConfig;
    use crate::data::columnar::duckdb::DuckdbConnector;
    use crate::domain::models::Segment;
    use serde_json::json;

    async fn entity_store() -> EntityStore {
        let config = AppConfig::default();
        let columnar = Arc::new(
            ColumnarStore::init(Arc::new(DuckdbConnector::in_memory()), &config)
                .await
                .expect("store init"),
        );
        EntityStore::init(columnar).await.expect("entity init")
    }

    async fn seeded_source(store: &EntityStore) -> Source {
        let source = Source::new(Uuid::new_v4(), "urn:x-nmos:format:video").with_label("Cam A");
        store.create_source(&source).await.unwrap();
        source
    }

    #[tokio::test]
    async fn init_creates_all_tables() {
        let store = entity_store().await;
        let tables = store.columnar().tables();
        for name in [SOURCES, FLOWS, OBJECTS, SEGMENTS, TAGS, WEBHOOKS] {
            assert!(tables.contains(&name.to_string()), "missing {}", name);
        }
    }

    #[tokio::test]
    async fn source_round_trip() {
        let store = entity_store().await;
        let source = seeded_source(&store).await;

        let fetched = store.get_source(source.id, false).await.unwrap().unwrap();
        assert_eq!(fetched.format, "urn:x-nmos:format:video");
        assert_eq!(fetched.label.as_deref(), Some("Cam A"));
    }

    #[tokio::test]
    async fn duplicate_source_is_a_conflict() {
        let store = entity_store().await;
        let source = seeded_source(&store).await;
        assert!(matches!(
            store.create_source(&source).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn missing_source_lookup_is_none() {
        let store = entity_store().await;
        assert!(
            store
                .get_source(Uuid::new_v4(), false)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn soft_deleted_source_hidden_by_default() {
        let store = entity_store().await;
        let source = seeded_source(&store).await;

        assert!(store.soft_delete_source(source.id).await.unwrap());

        // Default read misses it, forced include-deleted read finds it
        assert!(store.get_source(source.id, false).await.unwrap().is_none());
        let hidden = store.get_source(source.id, true).await.unwrap().unwrap();
        assert!(hidden.soft_deleted);
    }

    #[tokio::test]
    async fn flow_requires_live_source() {
        let store = entity_store().await;
        let flow = Flow::new(Uuid::new_v4(), Uuid::new_v4(), "urn:x-nmos:format:video");
        assert!(matches!(
            store.create_flow(&flow).await,
            Err(StoreError::NotFound { entity: "source", .. })
        ));

        let source = seeded_source(&store).await;
        store.soft_delete_source(source.id).await.unwrap();
        let flow = Flow::new(Uuid::new_v4(), source.id, "urn:x-nmos:format:video");
        assert!(matches!(
            store.create_flow(&flow).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn flow_round_trip_and_listing() {
        let store = entity_store().await;
        let source = seeded_source(&store).await;
        let flow = Flow::new(Uuid::new_v4(), source.id, "urn:x-nmos:format:video")
            .with_codec("H.264");
        store.create_flow(&flow).await.unwrap();

        let listed = store.list_flows(Some(source.id), None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].codec.as_deref(), Some("H.264"));

        let other = store.list_flows(Some(Uuid::new_v4()), None).await.unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn update_flow_patches_fields() {
        let store = entity_store().await;
        let source = seeded_source(&store).await;
        let flow = Flow::new(Uuid::new_v4(), source.id, "urn:x-nmos:format:video");
        store.create_flow(&flow).await.unwrap();

        let mut patch = Map::new();
        patch.insert("codec".to_string(), json!("H.265"));
        let affected = store.update_flow(flow.id, &patch).await.unwrap();
        assert_eq!(affected, 1);

        let updated = store.get_flow(flow.id, false).await.unwrap().unwrap();
        assert_eq!(updated.codec.as_deref(), Some("H.265"));
        assert!(updated.updated > flow.updated);
    }

    #[tokio::test]
    async fn hard_delete_source_requires_no_live_flows() {
        let store = entity_store().await;
        let source = seeded_source(&store).await;
        let flow = Flow::new(Uuid::new_v4(), source.id, "urn:x-nmos:format:video");
        store.create_flow(&flow).await.unwrap();

        assert!(matches!(
            store.hard_delete_source(source.id).await,
            Err(StoreError::Conflict(_))
        ));

        store.soft_delete_flow(flow.id).await.unwrap();
        store.hard_delete_source(source.id).await.unwrap();
        assert!(store.get_source(source.id, true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn object_reference_counts_derive_from_segments() {
        let store = entity_store().await;
        let source = seeded_source(&store).await;
        let flow_a = Flow::new(Uuid::new_v4(), source.id, "urn:x-nmos:format:video");
        let flow_b = Flow::new(Uuid::new_v4(), source.id, "urn:x-nmos:format:video");
        store.create_flow(&flow_a).await.unwrap();
        store.create_flow(&flow_b).await.unwrap();

        let object = MediaObject::new("obj-1", 3);
        store.create_object(&object).await.unwrap();

        // Two segments in flow A, one in flow B, all sharing the object
        for (flow_id, range) in [
            (flow_a.id, "[0:0_10:0)"),
            (flow_a.id, "[10:0_20:0)"),
            (flow_b.id, "[0:0_10:0)"),
        ] {
            let segment = Segment::new(Uuid::new_v4(), flow_id, "obj-1", range);
            store
                .columnar()
                .insert_single(SEGMENTS, &models::to_row(&segment))
                .await
                .unwrap();
        }

        let fetched = store.get_object("obj-1").await.unwrap().unwrap();
        let mut expected = vec![flow_a.id.to_string(), flow_b.id.to_string()];
        expected.sort();
        assert_eq!(fetched.referenced_by_flows, expected);

        // Referenced objects refuse deletion
        assert!(matches!(
            store.delete_object("obj-1").await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn unreferenced_object_deletes_cleanly() {
        let store = entity_store().await;
        let object = MediaObject::new("obj-free", 10);
        store.create_object(&object).await.unwrap();

        store.delete_object("obj-free").await.unwrap();
        assert!(store.get_object("obj-free").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn webhook_round_trip_revives_events() {
        let store = entity_store().await;
        let webhook = Webhook {
            id: Uuid::new_v4(),
            url: "https://example.invalid/hook".to_string(),
            api_key_name: Some("ops".to_string()),
            events: vec!["flow.created".to_string(), "segment.added".to_string()],
            created: chrono::Utc::now(),
            updated: chrono::Utc::now(),
        };
        store.register_webhook(&webhook).await.unwrap();

        let listed = store.list_webhooks().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].events, webhook.events);

        assert!(store.delete_webhook(webhook.id).await.unwrap());
        assert!(store.list_webhooks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deletion_request_lifecycle() {
        let store = entity_store().await;
        let request = DeletionRequest {
            id: Uuid::new_v4(),
            flow_id: Uuid::new_v4(),
            timerange: "[0:0_60:0)".to_string(),
            status: "pending".to_string(),
            created: chrono::Utc::now(),
            updated: chrono::Utc::now(),
        };
        store.create_deletion_request(&request).await.unwrap();

        let pending = store.list_deletion_requests(Some("pending")).await.unwrap();
        assert_eq!(pending.len(), 1);

        store
            .set_deletion_request_status(request.id, "done")
            .await
            .unwrap();
        let fetched = store.get_deletion_request(request.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, "done");
        assert!(
            store
                .list_deletion_requests(Some("pending"))
                .await
                .unwrap()
                .is_empty()
        );
    }
}
