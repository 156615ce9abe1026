//! Time-addressable media store core
//!
//! A dual-tier storage engine for time-ranged media segments:
//!
//! - a columnar metadata store holding the entity tables (sources, flows,
//!   objects, segments, tags, ...) with cached table metadata, predicate
//!   compilation, split/subsplit query planning, transactional batch
//!   ingestion and row-id based UPDATE/DELETE;
//! - an object store holding opaque segment payloads addressed by a
//!   deterministic `{flow}/{YYYY}/{MM}/{DD}/{segment}` key, with presigned
//!   URL minting;
//! - pushdown time-series analytics plus a hybrid path through a private
//!   embedded analytical engine.
//!
//! [`TamsStore`] wires the layers together. The columnar engine is consumed
//! through the [`data::columnar::engine`] traits; this crate ships an
//! embedded implementation used by single-node deployments and the test
//! suite, while remote engine adapters implement the same traits out of
//! tree. HTTP routing, authentication and webhook delivery are the
//! embedding application's concern.

pub mod core;
pub mod data;
pub mod domain;
pub mod utils;

use std::sync::Arc;

use crate::core::config::{AppConfig, PayloadBackend};
use crate::data::analytics::{HybridAnalytics, TimeSeriesAnalytics};
use crate::data::columnar::ColumnarStore;
use crate::data::columnar::duckdb::DuckdbConnector;
use crate::data::columnar::engine::EngineConnector;
use crate::data::error::StoreError;
use crate::data::objects::{FilesystemPayloadStore, PayloadStore, SegmentObjectStore};
use crate::domain::{CleanupService, EntityStore, SegmentService, TagStore};

/// Top-level store: columnar metadata, payload storage, facades and
/// analytics wired from one [`AppConfig`].
pub struct TamsStore {
    config: AppConfig,
    columnar: Arc<ColumnarStore>,
    payloads: Arc<dyn PayloadStore>,
    entities: EntityStore,
    tags: TagStore,
    segments: SegmentService,
    cleanup: CleanupService,
    timeseries: TimeSeriesAnalytics,
    hybrid: HybridAnalytics,
}

impl TamsStore {
    /// Initialize against a columnar engine connector: connect, bootstrap
    /// the schema, create/evolve the entity tables and open the payload
    /// backend.
    pub async fn init(
        config: AppConfig,
        connector: Arc<dyn EngineConnector>,
    ) -> Result<Self, StoreError> {
        let columnar = Arc::new(ColumnarStore::init(connector, &config).await?);

        let payloads: Arc<dyn PayloadStore> = match config.object_store.backend_kind {
            PayloadBackend::S3 => Arc::new(
                SegmentObjectStore::connect(config.object_store.clone()).await?,
            ),
            PayloadBackend::Filesystem => {
                let root = config.object_store.filesystem_root.clone().ok_or_else(|| {
                    StoreError::Config(
                        "filesystem payload backend requires object_store.filesystem_root"
                            .to_string(),
                    )
                })?;
                Arc::new(FilesystemPayloadStore::new(
                    root,
                    config.object_store.backend.clone(),
                ))
            }
        };

        let entities = EntityStore::init(Arc::clone(&columnar)).await?;
        let tags = TagStore::new(Arc::clone(&columnar));
        let segments = SegmentService::new(Arc::clone(&columnar), Arc::clone(&payloads));
        let cleanup = CleanupService::new(Arc::clone(&columnar), Arc::clone(&payloads));
        let timeseries = TimeSeriesAnalytics::new(Arc::clone(&columnar));
        let hybrid = HybridAnalytics::new(Arc::clone(&columnar));

        tracing::debug!(
            payload_backend = %config.object_store.backend_kind,
            "TamsStore initialized"
        );
        Ok(Self {
            config,
            columnar,
            payloads,
            entities,
            tags,
            segments,
            cleanup,
            timeseries,
            hybrid,
        })
    }

    /// Initialize with the embedded columnar engine (in-memory, or on disk
    /// when `db_path` is set).
    pub async fn init_embedded(
        config: AppConfig,
        db_path: Option<std::path::PathBuf>,
    ) -> Result<Self, StoreError> {
        let connector: Arc<dyn EngineConnector> = match db_path {
            Some(path) => Arc::new(DuckdbConnector::new(path)),
            None => Arc::new(DuckdbConnector::in_memory()),
        };
        Self::init(config, connector).await
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn columnar(&self) -> &Arc<ColumnarStore> {
        &self.columnar
    }

    pub fn payloads(&self) -> &Arc<dyn PayloadStore> {
        &self.payloads
    }

    pub fn entities(&self) -> &EntityStore {
        &self.entities
    }

    pub fn tags(&self) -> &TagStore {
        &self.tags
    }

    pub fn segments(&self) -> &SegmentService {
        &self.segments
    }

    pub fn cleanup(&self) -> &CleanupService {
        &self.cleanup
    }

    pub fn timeseries(&self) -> &TimeSeriesAnalytics {
        &self.timeseries
    }

    pub fn hybrid(&self) -> &HybridAnalytics {
        &self.hybrid
    }

    /// Close engine sessions. Idempotent.
    pub async fn close(&self) {
        self.columnar.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::columnar::Predicate;
    use crate::domain::models::{Flow, Segment, Source};
    use std::collections::BTreeMap;
    use uuid::Uuid;

    async fn embedded_store() -> (tempfile::TempDir, TamsStore) {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.object_store.backend_kind = PayloadBackend::Filesystem;
        config.object_store.filesystem_root = Some(dir.path().join("payloads"));

        let store = TamsStore::init_embedded(config, None).await.expect("init");
        (dir, store)
    }

    #[tokio::test]
    async fn filesystem_backend_requires_root() {
        let mut config = AppConfig::default();
        config.object_store.backend_kind = PayloadBackend::Filesystem;
        config.object_store.filesystem_root = None;

        let result = TamsStore::init_embedded(config, None).await;
        assert!(matches!(result, Err(StoreError::Config(_))));
    }

    #[tokio::test]
    async fn end_to_end_ingest_and_lookup() {
        let (_dir, store) = embedded_store().await;

        // Source -> flow -> segment with payload
        let source = Source::new(Uuid::new_v4(), "urn:x-nmos:format:video").with_label("Cam A");
        store.entities().create_source(&source).await.unwrap();
        let flow = Flow::new(Uuid::new_v4(), source.id, "urn:x-nmos:format:video")
            .with_codec("H.264");
        store.entities().create_flow(&flow).await.unwrap();

        let mut segment = Segment::new(Uuid::new_v4(), flow.id, "obj-1", "[0:0_10:0)");
        segment.sample_count = 1_000;
        segment.key_frame_count = 10;
        let stored = store
            .segments()
            .put(segment, b"XYZ".as_slice().into(), None)
            .await
            .unwrap();

        // Payload round-trips through the derived key
        let payload = store
            .segments()
            .get_payload(flow.id, stored.id)
            .await
            .unwrap();
        assert_eq!(payload, Some(b"XYZ".to_vec()));

        // Default segment listing for the flow returns exactly it
        let listed = store.segments().list(flow.id, None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].storage_path, stored.storage_path);
    }

    #[tokio::test]
    async fn tags_flow_through_the_facade() {
        let (_dir, store) = embedded_store().await;
        let tags: BTreeMap<String, String> = [("env", "prod"), ("quality", "uhd")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let report = store
            .tags()
            .replace_all_tags("flow", "f1", &tags, None)
            .await
            .unwrap();
        assert!(report.ok);
        assert_eq!(store.tags().get_tags("flow", "f1").await.unwrap(), tags);
    }

    #[tokio::test]
    async fn analytics_are_wired() {
        let (_dir, store) = embedded_store().await;
        assert!(store.hybrid().is_available());

        // Aggregate over an entity table proves the analytics path end to end
        let result = store
            .columnar()
            .aggregate(
                "sources",
                &["COUNT(*) as count".to_string()],
                None,
                None,
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(result.num_rows(), 1);
    }

    #[tokio::test]
    async fn soft_deleted_source_excluded_from_default_listing() {
        let (_dir, store) = embedded_store().await;
        let source = Source::new(Uuid::new_v4(), "urn:x-nmos:format:audio");
        store.entities().create_source(&source).await.unwrap();
        store
            .entities()
            .soft_delete_source(source.id)
            .await
            .unwrap();

        let listed = store
            .entities()
            .list_sources(Some(Predicate::new()), None)
            .await
            .unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn cleanup_purges_soft_deleted_entities() {
        let (_dir, store) = embedded_store().await;
        let source = Source::new(Uuid::new_v4(), "urn:x-nmos:format:video");
        store.entities().create_source(&source).await.unwrap();
        store
            .entities()
            .soft_delete_source(source.id)
            .await
            .unwrap();

        let cutoff = chrono::Utc::now() + chrono::Duration::minutes(1);
        let report = store.cleanup().run(cutoff).await.unwrap();
        assert_eq!(report.sources_purged, 1);
        assert!(
            store
                .entities()
                .get_source(source.id, true)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (_dir, store) = embedded_store().await;
        store.close().await;
        store.close().await;
    }
}
