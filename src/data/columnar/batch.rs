//! Chunked batch insertion
//!
//! Two modes over the column-oriented insert path:
//!
//! - best-effort: failed batches are logged and skipped, the total inserted
//!   row count is returned;
//! - transactional-safe: every batch is tracked through retry rounds and the
//!   caller receives a structured per-batch report. The store offers no
//!   cross-batch rollback, so partial failure is surfaced, never hidden.

use std::collections::BTreeMap;
use std::time::Instant;

use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::{ColumnSet, ColumnarStore};
use crate::core::constants::{RETRY_ATTEMPT_PAUSE_MS, RETRY_ROUND_PAUSE_MS};
use crate::data::error::StoreError;

/// Terminal and in-flight states of one tracked batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Retrying,
    Success,
    Failed,
    Cancelled,
}

/// Tracking record for one batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchDetail {
    pub batch_index: usize,
    pub start_row: usize,
    pub end_row: usize,
    pub row_count: usize,
    pub status: BatchStatus,
    pub attempts: u32,
    pub error: Option<String>,
    pub rows_inserted: usize,
}

/// Structured result of a transactional batch insert
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    /// True only when every batch reached `success`
    pub success: bool,
    pub total_rows: usize,
    pub total_inserted: usize,
    pub total_failed: usize,
    pub batches_total: usize,
    pub batches_successful: usize,
    pub batches_failed: usize,
    pub batches_cancelled: usize,
    /// Wall-clock seconds
    pub execution_time: f64,
    /// Rows per second
    pub insertion_rate: f64,
    pub batch_details: BTreeMap<String, BatchDetail>,
    pub failed_batch_ids: Vec<String>,
}

/// Tuning knobs for [`ColumnarStore::insert_batch_transactional`];
/// unset fields fall back to the configured defaults.
#[derive(Default, Clone)]
pub struct TransactionalInsertOptions {
    pub batch_size: Option<usize>,
    pub max_workers: Option<usize>,
    pub max_retries: Option<u32>,
    /// Advisory only: the store cannot roll back committed batches, so this
    /// merely logs a warning when set.
    pub enable_rollback: bool,
    /// Cooperative cancellation: in-flight batches complete, never-submitted
    /// batches are reported as `cancelled`.
    pub cancel: Option<CancellationToken>,
}

enum AttemptOutcome {
    Success(usize),
    Error(String),
    Cancelled,
}

impl ColumnarStore {
    /// Best-effort chunked insert. Batch failures are logged and skipped;
    /// returns the total rows inserted.
    pub async fn insert_batch_efficient(
        &self,
        table: &str,
        data: ColumnSet,
        batch_size: Option<usize>,
        max_workers: Option<usize>,
    ) -> Result<usize, StoreError> {
        let config = self.batch_config();
        let batch_size = batch_size.unwrap_or(config.batch_size).max(1);
        let max_workers = max_workers.unwrap_or(config.max_workers).max(1);

        let total_rows = data.num_rows();
        if total_rows == 0 {
            return Ok(0);
        }
        let start = Instant::now();
        let batches = chunk(&data, batch_size);
        let num_batches = batches.len();
        let parallel = num_batches > config.parallel_threshold && max_workers > 1;
        tracing::debug!(
            table = %table,
            total_rows,
            num_batches,
            batch_size,
            parallel,
            "Starting best-effort batch insertion"
        );

        let mut total_inserted = 0usize;
        if parallel {
            let mut stream = futures::stream::iter(batches.into_iter().enumerate().map(
                |(index, batch)| async move {
                    (index, self.insert_columns(table, batch).await)
                },
            ))
            .buffer_unordered(max_workers);

            while let Some((index, result)) = stream.next().await {
                match result {
                    Ok(rows) => total_inserted += rows,
                    Err(e) => {
                        tracing::error!(
                            table = %table,
                            batch = index,
                            error = %e,
                            "Batch insertion failed"
                        );
                    }
                }
            }
        } else {
            for (index, batch) in batches.into_iter().enumerate() {
                match self.insert_columns(table, batch).await {
                    Ok(rows) => total_inserted += rows,
                    Err(e) => {
                        tracing::error!(
                            table = %table,
                            batch = index,
                            error = %e,
                            "Batch insertion failed"
                        );
                    }
                }
            }
        }

        let execution_time = start.elapsed().as_secs_f64();
        self.monitor().record(
            "insert_batch_efficient",
            table,
            execution_time,
            total_inserted,
            1,
            1,
            true,
            None,
        );
        tracing::debug!(
            table = %table,
            inserted = total_inserted,
            total_rows,
            execution_time,
            "Best-effort batch insertion completed"
        );
        Ok(total_inserted)
    }

    /// Transactional-safe chunked insert: tracked batches, bounded retry
    /// rounds and a structured per-batch report. Partial failure is returned
    /// in the report, not raised.
    pub async fn insert_batch_transactional(
        &self,
        table: &str,
        data: ColumnSet,
        options: TransactionalInsertOptions,
    ) -> Result<BatchReport, StoreError> {
        let config = self.batch_config();
        let batch_size = options.batch_size.unwrap_or(config.batch_size).max(1);
        let max_workers = options.max_workers.unwrap_or(config.max_workers).max(1);
        let max_retries = options.max_retries.unwrap_or(config.max_retries).max(1);

        if options.enable_rollback {
            tracing::warn!(
                table = %table,
                "Rollback requested but the columnar store cannot roll back \
                 committed batches; treat the report as authoritative"
            );
        }

        let total_rows = data.num_rows();
        let start = Instant::now();
        let batches = chunk(&data, batch_size);
        let num_batches = batches.len();
        let parallel = num_batches > config.parallel_threshold && max_workers > 1;

        let mut details: Vec<BatchDetail> = (0..num_batches)
            .map(|index| {
                let start_row = index * batch_size;
                let end_row = ((index + 1) * batch_size).min(total_rows);
                BatchDetail {
                    batch_index: index,
                    start_row,
                    end_row,
                    row_count: end_row - start_row,
                    status: BatchStatus::Pending,
                    attempts: 0,
                    error: None,
                    rows_inserted: 0,
                }
            })
            .collect();

        tracing::debug!(
            table = %table,
            total_rows,
            num_batches,
            batch_size,
            max_workers,
            max_retries,
            parallel,
            "Starting transactional batch insertion"
        );

        for round in 0..=max_retries {
            let active: Vec<usize> = details
                .iter()
                .filter(|d| matches!(d.status, BatchStatus::Pending | BatchStatus::Retrying))
                .map(|d| d.batch_index)
                .collect();
            if active.is_empty() {
                break;
            }
            tracing::debug!(round = round + 1, active = active.len(), "Processing batch round");

            let outcomes = if parallel {
                self.run_round_parallel(table, &batches, &active, max_workers, &options.cancel)
                    .await
            } else {
                self.run_round_sequential(table, &batches, &active, &options.cancel)
                    .await
            };

            for (index, outcome) in outcomes {
                let detail = &mut details[index];
                match outcome {
                    AttemptOutcome::Success(rows) => {
                        detail.attempts += 1;
                        detail.status = BatchStatus::Success;
                        detail.rows_inserted = rows;
                    }
                    AttemptOutcome::Error(error) => {
                        detail.attempts += 1;
                        detail.error = Some(error.clone());
                        if detail.attempts < max_retries {
                            detail.status = BatchStatus::Retrying;
                            tracing::warn!(
                                table = %table,
                                batch = index,
                                attempt = detail.attempts,
                                max_retries,
                                error = %error,
                                "Batch failed, will retry"
                            );
                        } else {
                            detail.status = BatchStatus::Failed;
                            tracing::error!(
                                table = %table,
                                batch = index,
                                attempts = detail.attempts,
                                error = %error,
                                "Batch failed permanently"
                            );
                        }
                    }
                    AttemptOutcome::Cancelled => {
                        detail.status = BatchStatus::Cancelled;
                    }
                }
            }

            let retrying = details
                .iter()
                .any(|d| d.status == BatchStatus::Retrying);
            if retrying && round < max_retries {
                let pause = if parallel {
                    RETRY_ROUND_PAUSE_MS
                } else {
                    RETRY_ATTEMPT_PAUSE_MS
                };
                tokio::time::sleep(std::time::Duration::from_millis(pause)).await;
            }
        }

        let execution_time = start.elapsed().as_secs_f64();
        let report = build_report(total_rows, details, execution_time);

        self.monitor().record(
            "insert_batch_transactional",
            table,
            execution_time,
            report.total_inserted,
            1,
            1,
            report.success,
            (!report.success).then(|| {
                format!(
                    "partial failure: {} batches failed, {} cancelled",
                    report.batches_failed, report.batches_cancelled
                )
            }),
        );

        if report.success {
            tracing::debug!(
                table = %table,
                inserted = report.total_inserted,
                execution_time,
                "Transactional batch insertion completed"
            );
        } else {
            tracing::error!(
                table = %table,
                failed_batches = report.batches_failed,
                cancelled_batches = report.batches_cancelled,
                failed_ids = ?report.failed_batch_ids,
                "Transactional batch insertion completed with failures"
            );
        }
        Ok(report)
    }

    async fn run_round_parallel(
        &self,
        table: &str,
        batches: &[ColumnSet],
        active: &[usize],
        max_workers: usize,
        cancel: &Option<CancellationToken>,
    ) -> Vec<(usize, AttemptOutcome)> {
        let mut outcomes = Vec::with_capacity(active.len());
        let mut stream = futures::stream::iter(active.iter().map(|&index| {
            let batch = batches[index].clone();
            let cancel = cancel.clone();
            async move {
                if cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                    return (index, AttemptOutcome::Cancelled);
                }
                match self.insert_columns(table, batch).await {
                    Ok(rows) => (index, AttemptOutcome::Success(rows)),
                    Err(e) => (index, AttemptOutcome::Error(e.to_string())),
                }
            }
        }))
        .buffer_unordered(max_workers);

        while let Some(outcome) = stream.next().await {
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn run_round_sequential(
        &self,
        table: &str,
        batches: &[ColumnSet],
        active: &[usize],
        cancel: &Option<CancellationToken>,
    ) -> Vec<(usize, AttemptOutcome)> {
        let mut outcomes = Vec::with_capacity(active.len());
        for &index in active {
            if cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                outcomes.push((index, AttemptOutcome::Cancelled));
                continue;
            }
            let outcome = match self.insert_columns(table, batches[index].clone()).await {
                Ok(rows) => AttemptOutcome::Success(rows),
                Err(e) => AttemptOutcome::Error(e.to_string()),
            };
            outcomes.push((index, outcome));
        }
        outcomes
    }

    /// Log structured recovery information for a partially-failed insert.
    /// The store cannot undo committed batches; this emits everything an
    /// operator needs for manual reconciliation.
    pub fn cleanup_partial_insertion(
        &self,
        table: &str,
        failed_batch_ids: &[String],
        report: &BatchReport,
    ) -> bool {
        tracing::warn!(
            table = %table,
            failed_batches = ?failed_batch_ids,
            "Partial insertion cleanup requested"
        );

        let mut total_failed_rows = 0usize;
        for batch_id in failed_batch_ids {
            let Some(detail) = report.batch_details.get(batch_id) else {
                continue;
            };
            total_failed_rows += detail.row_count;
            tracing::warn!(
                table = %table,
                batch_id = %batch_id,
                start_row = detail.start_row,
                end_row = detail.end_row,
                row_count = detail.row_count,
                attempts = detail.attempts,
                error = detail.error.as_deref().unwrap_or("unknown"),
                "Failed batch row range"
            );
        }

        tracing::warn!(
            table = %table,
            total_failed_rows,
            recovery_required = true,
            "Recovery information logged; re-submit the failed row ranges \
             after addressing the underlying engine failure"
        );
        true
    }
}

/// Split a column set into row chunks of at most `batch_size`.
fn chunk(data: &ColumnSet, batch_size: usize) -> Vec<ColumnSet> {
    let total_rows = data.num_rows();
    (0..total_rows)
        .step_by(batch_size)
        .map(|start| data.slice(start, start + batch_size))
        .collect()
}

fn build_report(
    total_rows: usize,
    details: Vec<BatchDetail>,
    execution_time: f64,
) -> BatchReport {
    let batches_total = details.len();
    let batches_successful = details
        .iter()
        .filter(|d| d.status == BatchStatus::Success)
        .count();
    let batches_failed = details
        .iter()
        .filter(|d| d.status == BatchStatus::Failed)
        .count();
    let batches_cancelled = details
        .iter()
        .filter(|d| d.status == BatchStatus::Cancelled)
        .count();
    let total_inserted: usize = details
        .iter()
        .filter(|d| d.status == BatchStatus::Success)
        .map(|d| d.rows_inserted)
        .sum();
    let failed_batch_ids: Vec<String> = details
        .iter()
        .filter(|d| d.status == BatchStatus::Failed)
        .map(|d| batch_id(d.batch_index))
        .collect();
    let batch_details: BTreeMap<String, BatchDetail> = details
        .into_iter()
        .map(|d| (batch_id(d.batch_index), d))
        .collect();

    BatchReport {
        success: batches_failed == 0 && batches_cancelled == 0,
        total_rows,
        total_inserted,
        total_failed: total_rows - total_inserted,
        batches_total,
        batches_successful,
        batches_failed,
        batches_cancelled,
        execution_time,
        insertion_rate: if execution_time > 0.0 {
            total_inserted as f64 / execution_time
        } else {
            0.0
        },
        batch_details,
        failed_batch_ids,
    }
}

fn batch_id(index: usize) -> String {
    format!("batch_{}", index)
}
