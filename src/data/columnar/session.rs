//! Engine session management
//!
//! Opens one engine session per endpoint, bootstrapping the bucket/schema on
//! first use. Sessions are pooled for the life of the manager; disconnect is
//! idempotent.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;

use super::engine::{EngineConnector, EngineSession};
use crate::core::config::ColumnarConfig;
use crate::data::error::StoreError;

/// Pooled engine sessions keyed by endpoint
pub struct SessionManager {
    connector: Arc<dyn EngineConnector>,
    config: ColumnarConfig,
    sessions: DashMap<String, Arc<dyn EngineSession>>,
    connected: AtomicBool,
}

impl SessionManager {
    pub fn new(connector: Arc<dyn EngineConnector>, config: ColumnarConfig) -> Self {
        tracing::debug!(
            endpoints = config.endpoints.len(),
            bucket = %config.bucket,
            schema = %config.schema,
            "Initialized session manager"
        );
        Self {
            connector,
            config,
            sessions: DashMap::new(),
            connected: AtomicBool::new(false),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    pub fn schema(&self) -> &str {
        &self.config.schema
    }

    pub fn endpoints(&self) -> &[String] {
        &self.config.endpoints
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Connect to the first endpoint and bootstrap the bucket/schema.
    pub async fn connect(&self) -> Result<(), StoreError> {
        let endpoint = self
            .config
            .endpoints
            .first()
            .ok_or_else(|| StoreError::Config("no columnar endpoints configured".to_string()))?
            .clone();
        self.session_for(&endpoint).await?;
        tracing::debug!(endpoint = %endpoint, "Connected to columnar engine");
        Ok(())
    }

    /// Session for an endpoint, opened and schema-bootstrapped on first use.
    pub async fn session_for(&self, endpoint: &str) -> Result<Arc<dyn EngineSession>, StoreError> {
        if let Some(session) = self.sessions.get(endpoint) {
            return Ok(Arc::clone(&session));
        }

        let session = self
            .connector
            .connect(
                endpoint,
                &self.config.access_key,
                &self.config.secret_key,
                self.timeout(),
            )
            .await?;
        session
            .ensure_schema(&self.config.bucket, &self.config.schema)
            .await?;

        self.sessions
            .insert(endpoint.to_string(), Arc::clone(&session));
        self.connected.store(true, Ordering::Release);
        tracing::debug!(endpoint = %endpoint, "Opened engine session");
        Ok(session)
    }

    /// Close every pooled session. Idempotent.
    pub async fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::AcqRel) && self.sessions.is_empty() {
            return;
        }
        let sessions: Vec<(String, Arc<dyn EngineSession>)> = self
            .sessions
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        self.sessions.clear();

        for (endpoint, session) in sessions {
            if let Err(e) = session.close().await {
                tracing::warn!(endpoint = %endpoint, error = %e, "Session close failed");
            }
        }
        tracing::debug!("Disconnected from columnar engine");
    }
}
