//! Segment ingestion and lookup facade
//!
//! Orchestrates the payload store and the segment index: a put writes the
//! payload under the deterministic key, then inserts the index row with
//! `storage_path` set to that key. If the index insert fails after the
//! payload landed, a compensating delete runs with bounded retries; on final
//! failure the orphaned key is logged with enough context for a
//! reconciliation sweep.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use super::models::{self, Segment};
use super::schema::{FLOWS, SEGMENTS};
use crate::data::columnar::{ColumnarStore, Predicate};
use crate::data::error::StoreError;
use crate::data::objects::store::{GetUrl, PayloadStore, SegmentDescriptor, SegmentPayload};
use crate::utils::retry::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, retry_with_backoff};
use crate::utils::timerange::{TimeRange, timeranges_overlap};

/// Segment facade over the columnar index and the payload store
pub struct SegmentService {
    columnar: Arc<ColumnarStore>,
    payloads: Arc<dyn PayloadStore>,
}

impl SegmentService {
    pub fn new(columnar: Arc<ColumnarStore>, payloads: Arc<dyn PayloadStore>) -> Self {
        Self { columnar, payloads }
    }

    /// Store a segment payload and index it atomically from the caller's
    /// perspective: either both the payload and the index row exist
    /// afterwards, or neither does (payload cleanup is best-effort).
    pub async fn put(
        &self,
        mut segment: Segment,
        payload: SegmentPayload,
        content_type: Option<&str>,
    ) -> Result<Segment, StoreError> {
        let range = TimeRange::parse(&segment.timerange)?;
        if range.end.is_finite() && range.start >= range.end {
            return Err(StoreError::Validation(format!(
                "segment timerange '{}' must satisfy start < end",
                segment.timerange
            )));
        }
        self.require_live_flow(segment.flow_id).await?;

        let descriptor = SegmentDescriptor {
            segment_id: segment.id.to_string(),
            timerange: segment.timerange.clone(),
            ts_offset: segment.ts_offset.clone(),
            last_duration: segment.last_duration.clone(),
            sample_offset: segment.sample_offset,
            sample_count: segment.sample_count,
            key_frame_count: segment.key_frame_count,
        };
        let key = self
            .payloads
            .store_segment(
                &segment.flow_id.to_string(),
                &descriptor,
                payload,
                content_type,
            )
            .await?;
        segment.storage_path = key.clone();

        match self
            .columnar
            .insert_single(SEGMENTS, &models::to_row(&segment))
            .await
        {
            Ok(()) => {
                tracing::debug!(
                    flow_id = %segment.flow_id,
                    segment_id = %segment.id,
                    storage_path = %segment.storage_path,
                    "Stored and indexed segment"
                );
                Ok(segment)
            }
            Err(insert_error) => {
                self.compensate_payload(&segment, &key).await;
                Err(insert_error)
            }
        }
    }

    /// Index row plus access URLs for a segment; `None` on miss.
    pub async fn get(
        &self,
        flow_id: Uuid,
        segment_id: Uuid,
    ) -> Result<Option<(Segment, Vec<GetUrl>)>, StoreError> {
        let Some(segment) = self.find(flow_id, segment_id).await? else {
            return Ok(None);
        };
        let urls = self
            .payloads
            .get_urls(
                &flow_id.to_string(),
                &segment_id.to_string(),
                &segment.timerange,
                Some(&segment.storage_path),
            )
            .await?;
        Ok(Some((segment, urls)))
    }

    /// Raw payload bytes for an indexed segment; `None` when either the
    /// index row or the payload is missing.
    pub async fn get_payload(
        &self,
        flow_id: Uuid,
        segment_id: Uuid,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let Some(segment) = self.find(flow_id, segment_id).await? else {
            return Ok(None);
        };
        let data = self
            .payloads
            .get_segment(
                &flow_id.to_string(),
                &segment_id.to_string(),
                &segment.timerange,
            )
            .await?;
        Ok(data)
    }

    /// Segments of a flow, optionally filtered to those overlapping a query
    /// timerange.
    pub async fn list(
        &self,
        flow_id: Uuid,
        timerange: Option<&str>,
    ) -> Result<Vec<Segment>, StoreError> {
        let predicate = Predicate::new().eq("flow_id", flow_id.to_string());
        let rows = self
            .columnar
            .select_rows(SEGMENTS, Some(&predicate), None, None)
            .await?;

        let mut segments: Vec<Segment> = rows
            .into_iter()
            .filter_map(|row| models::from_row(row, &[]))
            .collect();
        if let Some(query_range) = timerange {
            segments.retain(|s| timeranges_overlap(&s.timerange, query_range));
        }
        Ok(segments)
    }

    /// Delete a flow's segments (optionally only those overlapping a
    /// timerange): index rows first, then best-effort payload deletes.
    /// Returns the number of index rows removed.
    pub async fn delete(
        &self,
        flow_id: Uuid,
        timerange: Option<&str>,
    ) -> Result<usize, StoreError> {
        let targets = self.list(flow_id, timerange).await?;
        if targets.is_empty() {
            return Ok(0);
        }

        let ids: Vec<Value> = targets.iter().map(|s| Value::from(s.id.to_string())).collect();
        let predicate = Predicate::new()
            .eq("flow_id", flow_id.to_string())
            .in_list("id", ids);
        let deleted = self.columnar.delete(SEGMENTS, Some(&predicate)).await?;

        for segment in &targets {
            if let Err(e) = self.payloads.delete_object(&segment.storage_path).await {
                tracing::warn!(
                    flow_id = %flow_id,
                    segment_id = %segment.id,
                    storage_path = %segment.storage_path,
                    error = %e,
                    "Failed to delete segment payload"
                );
            }
        }

        tracing::debug!(flow_id = %flow_id, deleted, "Deleted segments");
        Ok(deleted)
    }

    async fn find(
        &self,
        flow_id: Uuid,
        segment_id: Uuid,
    ) -> Result<Option<Segment>, StoreError> {
        let predicate = Predicate::new()
            .eq("flow_id", flow_id.to_string())
            .eq("id", segment_id.to_string());
        let rows = self
            .columnar
            .select_rows(SEGMENTS, Some(&predicate), None, Some(1))
            .await?;
        Ok(rows.into_iter().next().and_then(|row| models::from_row(row, &[])))
    }

    async fn require_live_flow(&self, flow_id: Uuid) -> Result<(), StoreError> {
        let predicate = Predicate::new()
            .eq("id", flow_id.to_string())
            .eq("soft_deleted", false);
        let rows = self
            .columnar
            .select(
                FLOWS,
                Some(&predicate),
                Some(&["id".to_string()]),
                Some(1),
                false,
            )
            .await?;
        if rows.is_empty() {
            return Err(StoreError::not_found("flow", flow_id.to_string()));
        }
        Ok(())
    }

    /// Best-effort removal of a payload whose index insert failed.
    async fn compensate_payload(&self, segment: &Segment, key: &str) {
        let outcome = retry_with_backoff(DEFAULT_MAX_ATTEMPTS, DEFAULT_BASE_DELAY_MS, || {
            self.payloads.delete_object(key)
        })
        .await;

        match outcome {
            Ok(attempts) => {
                tracing::warn!(
                    flow_id = %segment.flow_id,
                    segment_id = %segment.id,
                    storage_path = %key,
                    attempts,
                    "Index insert failed; compensating payload delete succeeded"
                );
            }
            Err((error, attempts)) => {
                // Orphaned payload: leave enough context for a
                // reconciliation sweep to find it.
                tracing::warn!(
                    flow_id = %segment.flow_id,
                    segment_id = %segment.id,
                    storage_path = %key,
                    attempts,
                    error = %error,
                    "Index insert failed and payload cleanup exhausted retries; orphan remains"
                );
            }
        }
    }
}
