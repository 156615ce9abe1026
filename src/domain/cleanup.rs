//! Garbage collection over soft-deleted entities
//!
//! Soft-deleted rows stay in the store until a cleanup pass removes them.
//! The pass runs in dependency order: pending deletion requests first (they
//! remove segment rows and payloads), then soft-deleted flows without
//! segments, then soft-deleted sources without flows, and finally objects no
//! segment references anymore. Rows that still have referrers are left for a
//! later pass.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::models::{self, DeletionRequest, Flow, Source};
use super::schema::{DELETION_REQUESTS, FLOWS, OBJECTS, SEGMENTS, SOURCES, TAGS};
use super::segments::SegmentService;
use crate::data::columnar::{ColumnarStore, Predicate};
use crate::data::error::StoreError;
use crate::data::objects::store::PayloadStore;

/// Outcome of one cleanup pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub requests_processed: usize,
    pub segments_deleted: usize,
    pub flows_purged: usize,
    pub sources_purged: usize,
    pub objects_purged: usize,
}

/// Garbage-collection sweep over the entity tables
pub struct CleanupService {
    columnar: Arc<ColumnarStore>,
    segments: SegmentService,
}

impl CleanupService {
    pub fn new(columnar: Arc<ColumnarStore>, payloads: Arc<dyn PayloadStore>) -> Self {
        let segments = SegmentService::new(Arc::clone(&columnar), payloads);
        Self { columnar, segments }
    }

    /// Full pass: deletion requests, then flows, sources and objects whose
    /// soft-delete happened before `cutoff`.
    pub async fn run(&self, cutoff: DateTime<Utc>) -> Result<CleanupReport, StoreError> {
        let mut report = CleanupReport::default();

        let (requests, segments) = self.process_deletion_requests().await?;
        report.requests_processed = requests;
        report.segments_deleted = segments;

        report.flows_purged = self.purge_soft_deleted_flows(cutoff).await?;
        report.sources_purged = self.purge_soft_deleted_sources(cutoff).await?;
        report.objects_purged = self.purge_orphan_objects().await?;

        tracing::debug!(
            requests = report.requests_processed,
            segments = report.segments_deleted,
            flows = report.flows_purged,
            sources = report.sources_purged,
            objects = report.objects_purged,
            "Cleanup pass completed"
        );
        Ok(report)
    }

    /// Execute pending deletion requests: remove the matching segment rows
    /// and payloads, then mark each request `completed` (or `failed`).
    /// Returns `(requests processed, segment rows deleted)`.
    pub async fn process_deletion_requests(&self) -> Result<(usize, usize), StoreError> {
        let predicate = Predicate::new().eq("status", "pending");
        let rows = self
            .columnar
            .select_rows(DELETION_REQUESTS, Some(&predicate), None, None)
            .await?;
        let requests: Vec<DeletionRequest> = rows
            .into_iter()
            .filter_map(|row| models::from_row(row, &[]))
            .collect();

        let mut processed = 0usize;
        let mut segments_deleted = 0usize;
        for request in requests {
            let outcome = self
                .segments
                .delete(request.flow_id, Some(&request.timerange))
                .await;
            let status = match outcome {
                Ok(deleted) => {
                    segments_deleted += deleted;
                    "completed"
                }
                Err(e) => {
                    tracing::warn!(
                        request_id = %request.id,
                        flow_id = %request.flow_id,
                        error = %e,
                        "Deletion request failed"
                    );
                    "failed"
                }
            };

            let mut patch = serde_json::Map::new();
            patch.insert("status".to_string(), serde_json::Value::from(status));
            patch.insert(
                "updated".to_string(),
                serde_json::Value::from(Utc::now().to_rfc3339()),
            );
            let id_predicate = Predicate::new().eq("id", request.id.to_string());
            self.columnar
                .update(DELETION_REQUESTS, &patch, Some(&id_predicate))
                .await?;
            processed += 1;
        }
        Ok((processed, segments_deleted))
    }

    /// Hard-delete soft-deleted flows with no remaining segment rows.
    async fn purge_soft_deleted_flows(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let predicate = Predicate::new()
            .eq("soft_deleted", true)
            .lt("updated", cutoff.to_rfc3339());
        let rows = self
            .columnar
            .select_rows(FLOWS, Some(&predicate), None, None)
            .await?;
        let flows: Vec<Flow> = rows
            .into_iter()
            .filter_map(|row| models::from_row(row, &[]))
            .collect();

        let mut purged = 0usize;
        for flow in flows {
            if self.has_rows(SEGMENTS, "flow_id", &flow.id.to_string()).await? {
                tracing::debug!(flow_id = %flow.id, "Flow still has segments, skipping purge");
                continue;
            }
            self.delete_entity_row(FLOWS, "flow", flow.id).await?;
            purged += 1;
        }
        Ok(purged)
    }

    /// Hard-delete soft-deleted sources with no remaining flow rows (live or
    /// soft-deleted).
    async fn purge_soft_deleted_sources(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let predicate = Predicate::new()
            .eq("soft_deleted", true)
            .lt("updated", cutoff.to_rfc3339());
        let rows = self
            .columnar
            .select_rows(SOURCES, Some(&predicate), None, None)
            .await?;
        let sources: Vec<Source> = rows
            .into_iter()
            .filter_map(|row| models::from_row(row, &[]))
            .collect();

        let mut purged = 0usize;
        for source in sources {
            if self
                .has_rows(FLOWS, "source_id", &source.id.to_string())
                .await?
            {
                tracing::debug!(source_id = %source.id, "Source still has flows, skipping purge");
                continue;
            }
            self.delete_entity_row(SOURCES, "source", source.id).await?;
            purged += 1;
        }
        Ok(purged)
    }

    /// Delete object rows that no segment references anymore.
    pub async fn purge_orphan_objects(&self) -> Result<usize, StoreError> {
        let rows = self
            .columnar
            .select_rows(OBJECTS, None, Some(&["id".to_string()]), None)
            .await?;

        let mut purged = 0usize;
        for row in rows {
            let Some(id) = row.get("id").and_then(serde_json::Value::as_str) else {
                continue;
            };
            if self.has_rows(SEGMENTS, "object_id", id).await? {
                continue;
            }
            let predicate = Predicate::new().eq("id", id);
            purged += self.columnar.delete(OBJECTS, Some(&predicate)).await?;
            tracing::debug!(object_id = %id, "Purged orphan object");
        }
        Ok(purged)
    }

    async fn has_rows(
        &self,
        table: &str,
        column: &str,
        value: &str,
    ) -> Result<bool, StoreError> {
        let predicate = Predicate::new().eq(column, value);
        let result = self
            .columnar
            .select(
                table,
                Some(&predicate),
                Some(&["id".to_string()]),
                Some(1),
                false,
            )
            .await?;
        Ok(!result.is_empty())
    }

    /// Remove an entity row and its tags.
    async fn delete_entity_row(
        &self,
        table: &str,
        entity_type: &str,
        id: Uuid,
    ) -> Result<(), StoreError> {
        let predicate = Predicate::new().eq("id", id.to_string());
        self.columnar.delete(table, Some(&predicate)).await?;
        let tag_predicate = Predicate::new()
            .eq("entity_type", entity_type)
            .eq("entity_id", id.to_string());
        self.columnar.delete(TAGS, Some(&tag_predicate)).await?;
        tracing::debug!(entity_type = %entity_type, id = %id, "Purged entity row");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{AppConfig, StorageBackendInfo};
    use crate::data::columnar::duckdb::DuckdbConnector;
    use crate::data::objects::filesystem::FilesystemPayloadStore;
    use crate::domain::entities::EntityStore;
    use crate::domain::models::{MediaObject, Segment};
    use crate::domain::tags::TagStore;

    struct Fixture {
        _dir: tempfile::TempDir,
        entities: EntityStore,
        segments: SegmentService,
        cleanup: CleanupService,
        tags: TagStore,
    }

    async fn fixture() -> Fixture {
        let config = AppConfig::default();
        let columnar = Arc::new(
            ColumnarStore::init(Arc::new(DuckdbConnector::in_memory()), &config)
                .await
                .expect("store init"),
        );
        let entities = EntityStore::init(Arc::clone(&columnar))
            .await
            .expect("entity init");

        let dir = tempfile::TempDir::new().unwrap();
        let payloads: Arc<dyn PayloadStore> = Arc::new(FilesystemPayloadStore::new(
            dir.path().to_path_buf(),
            StorageBackendInfo::default(),
        ));

        Fixture {
            _dir: dir,
            segments: SegmentService::new(Arc::clone(&columnar), Arc::clone(&payloads)),
            cleanup: CleanupService::new(Arc::clone(&columnar), payloads),
            tags: TagStore::new(Arc::clone(&columnar)),
            entities,
        }
    }

    async fn seeded_flow(fx: &Fixture) -> Flow {
        let source = Source::new(Uuid::new_v4(), "urn:x-nmos:format:video");
        fx.entities.create_source(&source).await.unwrap();
        let flow = Flow::new(Uuid::new_v4(), source.id, "urn:x-nmos:format:video");
        fx.entities.create_flow(&flow).await.unwrap();
        flow
    }

    fn future_cutoff() -> DateTime<Utc> {
        Utc::now() + chrono::Duration::minutes(1)
    }

    #[tokio::test]
    async fn deletion_requests_remove_segments_and_complete() {
        let fx = fixture().await;
        let flow = seeded_flow(&fx).await;
        for range in ["[0:0_10:0)", "[10:0_20:0)", "[30:0_40:0)"] {
            let segment = Segment::new(Uuid::new_v4(), flow.id, "obj-1", range);
            fx.segments
                .put(segment, b"DATA".as_slice().into(), None)
                .await
                .unwrap();
        }

        let request = DeletionRequest {
            id: Uuid::new_v4(),
            flow_id: flow.id,
            timerange: "[0:0_20:0)".to_string(),
            status: "pending".to_string(),
            created: Utc::now(),
            updated: Utc::now(),
        };
        fx.entities.create_deletion_request(&request).await.unwrap();

        let (processed, deleted) = fx.cleanup.process_deletion_requests().await.unwrap();
        assert_eq!(processed, 1);
        assert_eq!(deleted, 2);

        let remaining = fx.segments.list(flow.id, None).await.unwrap();
        assert_eq!(remaining.len(), 1);

        let done = fx.entities.get_deletion_request(request.id).await.unwrap().unwrap();
        assert_eq!(done.status, "completed");
    }

    #[tokio::test]
    async fn soft_deleted_flow_with_segments_survives_until_empty() {
        let fx = fixture().await;
        let flow = seeded_flow(&fx).await;
        let segment = Segment::new(Uuid::new_v4(), flow.id, "obj-1", "[0:0_10:0)");
        fx.segments
            .put(segment, b"DATA".as_slice().into(), None)
            .await
            .unwrap();
        fx.entities.soft_delete_flow(flow.id).await.unwrap();

        let report = fx.cleanup.run(future_cutoff()).await.unwrap();
        assert_eq!(report.flows_purged, 0);
        assert!(fx.entities.get_flow(flow.id, true).await.unwrap().is_some());

        fx.segments.delete(flow.id, None).await.unwrap();
        let report = fx.cleanup.run(future_cutoff()).await.unwrap();
        assert_eq!(report.flows_purged, 1);
        assert!(fx.entities.get_flow(flow.id, true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn source_purges_after_its_flows() {
        let fx = fixture().await;
        let flow = seeded_flow(&fx).await;
        let source_id = flow.source_id;
        fx.entities.soft_delete_flow(flow.id).await.unwrap();
        fx.entities.soft_delete_source(source_id).await.unwrap();
        fx.tags
            .set_tag("source", &source_id.to_string(), "env", "prod", None)
            .await
            .unwrap();

        let report = fx.cleanup.run(future_cutoff()).await.unwrap();
        // Flow purges this pass; the source follows because the flow row is
        // already gone when sources are examined.
        assert_eq!(report.flows_purged, 1);
        assert_eq!(report.sources_purged, 1);
        assert!(
            fx.entities
                .get_source(source_id, true)
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            fx.tags
                .get_tags("source", &source_id.to_string())
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn recent_soft_deletes_survive_the_cutoff() {
        let fx = fixture().await;
        let flow = seeded_flow(&fx).await;
        fx.entities.soft_delete_flow(flow.id).await.unwrap();

        // Cutoff in the past: nothing is old enough to purge
        let cutoff = Utc::now() - chrono::Duration::hours(1);
        let report = fx.cleanup.run(cutoff).await.unwrap();
        assert_eq!(report.flows_purged, 0);
        assert!(fx.entities.get_flow(flow.id, true).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn orphan_objects_are_purged() {
        let fx = fixture().await;
        let flow = seeded_flow(&fx).await;

        fx.entities
            .create_object(&MediaObject::new("obj-used", 3))
            .await
            .unwrap();
        fx.entities
            .create_object(&MediaObject::new("obj-orphan", 3))
            .await
            .unwrap();
        let segment = Segment::new(Uuid::new_v4(), flow.id, "obj-used", "[0:0_10:0)");
        fx.segments
            .put(segment, b"DATA".as_slice().into(), None)
            .await
            .unwrap();

        let purged = fx.cleanup.purge_orphan_objects().await.unwrap();
        assert_eq!(purged, 1);
        assert!(fx.entities.get_object("obj-used").await.unwrap().is_some());
        assert!(fx.entities.get_object("obj-orphan").await.unwrap().is_none());
    }
}
