//! Tag operations
//!
//! Tags live in a dedicated table with a uniqueness rule on
//! `(entity_type, entity_id, tag_name)`. `replace_all_tags` deletes the
//! entity's tag rows then inserts the new set; insert failures are reported
//! as partial success rather than rolled back (tag writes are idempotent at
//! read time through the uniqueness rule).

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::models::{self, Tag};
use super::schema::TAGS;
use crate::data::columnar::{ColumnarStore, Predicate};
use crate::data::error::StoreError;

/// Outcome of a wholesale tag replacement
#[derive(Debug, Clone, Serialize)]
pub struct TagReplaceReport {
    /// True when every insert landed
    pub ok: bool,
    pub removed: usize,
    pub inserted: usize,
    /// Tag names whose insert failed
    pub failed: Vec<String>,
}

/// Tag CRUD facade
pub struct TagStore {
    columnar: Arc<ColumnarStore>,
}

impl TagStore {
    pub fn new(columnar: Arc<ColumnarStore>) -> Self {
        Self { columnar }
    }

    /// All tags of an entity as an unordered name/value map.
    pub async fn get_tags(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<BTreeMap<String, String>, StoreError> {
        let predicate = entity_predicate(entity_type, entity_id);
        let rows = self
            .columnar
            .select_rows(
                TAGS,
                Some(&predicate),
                Some(&["tag_name".to_string(), "tag_value".to_string()]),
                None,
            )
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let name = row.get("tag_name")?.as_str()?.to_string();
                let value = row.get("tag_value")?.as_str()?.to_string();
                Some((name, value))
            })
            .collect())
    }

    /// One tag value, or `None` when unset.
    pub async fn get_tag(
        &self,
        entity_type: &str,
        entity_id: &str,
        tag_name: &str,
    ) -> Result<Option<String>, StoreError> {
        let predicate = entity_predicate(entity_type, entity_id).eq("tag_name", tag_name);
        let rows = self
            .columnar
            .select_rows(
                TAGS,
                Some(&predicate),
                Some(&["tag_value".to_string()]),
                Some(1),
            )
            .await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.get("tag_value").and_then(Value::as_str).map(str::to_string)))
    }

    /// Upsert one tag, maintaining the audit columns.
    pub async fn set_tag(
        &self,
        entity_type: &str,
        entity_id: &str,
        tag_name: &str,
        tag_value: &str,
        actor: Option<&str>,
    ) -> Result<(), StoreError> {
        let predicate = entity_predicate(entity_type, entity_id).eq("tag_name", tag_name);
        let existing = self.get_tag(entity_type, entity_id, tag_name).await?;

        if existing.is_some() {
            let mut patch = serde_json::Map::new();
            patch.insert("tag_value".to_string(), Value::String(tag_value.to_string()));
            patch.insert(
                "updated".to_string(),
                Value::String(Utc::now().to_rfc3339()),
            );
            if let Some(actor) = actor {
                patch.insert("updated_by".to_string(), Value::String(actor.to_string()));
            }
            self.columnar.update(TAGS, &patch, Some(&predicate)).await?;
        } else {
            let tag = new_tag(entity_type, entity_id, tag_name, tag_value, actor);
            self.columnar
                .insert_single(TAGS, &models::to_row(&tag))
                .await?;
        }
        tracing::debug!(
            entity_type = %entity_type,
            entity_id = %entity_id,
            tag_name = %tag_name,
            "Set tag"
        );
        Ok(())
    }

    /// Delete one tag; `false` when it was not set.
    pub async fn delete_tag(
        &self,
        entity_type: &str,
        entity_id: &str,
        tag_name: &str,
    ) -> Result<bool, StoreError> {
        let predicate = entity_predicate(entity_type, entity_id).eq("tag_name", tag_name);
        let deleted = self.columnar.delete(TAGS, Some(&predicate)).await?;
        Ok(deleted > 0)
    }

    /// Delete every tag of an entity; returns rows removed.
    pub async fn delete_all_tags(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<usize, StoreError> {
        let predicate = entity_predicate(entity_type, entity_id);
        self.columnar.delete(TAGS, Some(&predicate)).await
    }

    /// Replace an entity's whole tag set: delete-then-insert. Insert
    /// failures appear in the report; nothing is rolled back.
    pub async fn replace_all_tags(
        &self,
        entity_type: &str,
        entity_id: &str,
        tags: &BTreeMap<String, String>,
        actor: Option<&str>,
    ) -> Result<TagReplaceReport, StoreError> {
        let removed = self.delete_all_tags(entity_type, entity_id).await?;

        let mut inserted = 0usize;
        let mut failed = Vec::new();
        for (name, value) in tags {
            let tag = new_tag(entity_type, entity_id, name, value, actor);
            match self
                .columnar
                .insert_single(TAGS, &models::to_row(&tag))
                .await
            {
                Ok(()) => inserted += 1,
                Err(e) => {
                    tracing::warn!(
                        entity_type = %entity_type,
                        entity_id = %entity_id,
                        tag_name = %name,
                        error = %e,
                        "Tag insert failed during replace"
                    );
                    failed.push(name.clone());
                }
            }
        }

        tracing::debug!(
            entity_type = %entity_type,
            entity_id = %entity_id,
            removed,
            inserted,
            failed = failed.len(),
            "Replaced tag set"
        );
        Ok(TagReplaceReport {
            ok: failed.is_empty(),
            removed,
            inserted,
            failed,
        })
    }

    /// Search tag rows by any combination of entity type, name and value.
    pub async fn search_tags(
        &self,
        entity_type: Option<&str>,
        tag_name: Option<&str>,
        tag_value: Option<&str>,
    ) -> Result<Vec<Tag>, StoreError> {
        let mut predicate = Predicate::new();
        if let Some(entity_type) = entity_type {
            predicate = predicate.eq("entity_type", entity_type);
        }
        if let Some(tag_name) = tag_name {
            predicate = predicate.eq("tag_name", tag_name);
        }
        if let Some(tag_value) = tag_value {
            predicate = predicate.eq("tag_value", tag_value);
        }

        let rows = self
            .columnar
            .select_rows(TAGS, Some(&predicate), None, None)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| models::from_row(row, &[]))
            .collect())
    }
}

fn entity_predicate(entity_type: &str, entity_id: &str) -> Predicate {
    Predicate::new()
        .eq("entity_type", entity_type)
        .eq("entity_id", entity_id)
}

fn new_tag(
    entity_type: &str,
    entity_id: &str,
    tag_name: &str,
    tag_value: &str,
    actor: Option<&str>,
) -> Tag {
    let now = Utc::now();
    Tag {
        id: Uuid::new_v4(),
        entity_type: entity_type.to_string(),
        entity_id: entity_id.to_string(),
        tag_name: tag_name.to_string(),
        tag_value: tag_value.to_string(),
        created: now,
        updated: now,
        created_by: actor.map(str::to_string),
        updated_by: actor.map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::AppConfig;
    use crate::data::columnar::duckdb::DuckdbConnector;
    use crate::domain::entities::EntityStore;

    async fn tag_store() -> TagStore {
        let config = AppConfig::default();
        let columnar = Arc::new(
            ColumnarStore::init(Arc::new(DuckdbConnector::in_memory()), &config)
                .await
                .expect("store init"),
        );
        // Creates the tags table alongside the other entity tables
        EntityStore::init(Arc::clone(&columnar))
            .await
            .expect("entity init");
        TagStore::new(columnar)
    }

    fn tag_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn set_then_get_tag() {
        let store = tag_store().await;
        store
            .set_tag("source", "s1", "location", "studio-3", Some("ops"))
            .await
            .unwrap();

        let value = store.get_tag("source", "s1", "location").await.unwrap();
        assert_eq!(value.as_deref(), Some("studio-3"));
    }

    #[tokio::test]
    async fn set_tag_upserts_existing() {
        let store = tag_store().await;
        store
            .set_tag("source", "s1", "location", "studio-3", None)
            .await
            .unwrap();
        store
            .set_tag("source", "s1", "location", "studio-4", Some("ops"))
            .await
            .unwrap();

        let tags = store.get_tags("source", "s1").await.unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags["location"], "studio-4");
    }

    #[tokio::test]
    async fn tags_scoped_per_entity() {
        let store = tag_store().await;
        store
            .set_tag("source", "s1", "env", "prod", None)
            .await
            .unwrap();
        store
            .set_tag("flow", "s1", "env", "staging", None)
            .await
            .unwrap();

        assert_eq!(
            store.get_tag("source", "s1", "env").await.unwrap().as_deref(),
            Some("prod")
        );
        assert_eq!(
            store.get_tag("flow", "s1", "env").await.unwrap().as_deref(),
            Some("staging")
        );
    }

    #[tokio::test]
    async fn replace_all_tags_round_trips() {
        let store = tag_store().await;
        store
            .set_tag("flow", "f1", "stale", "yes", None)
            .await
            .unwrap();

        let tags = tag_map(&[("env", "prod"), ("quality", "uhd"), ("live", "true")]);
        let report = store
            .replace_all_tags("flow", "f1", &tags, Some("ops"))
            .await
            .unwrap();

        assert!(report.ok);
        assert_eq!(report.removed, 1);
        assert_eq!(report.inserted, 3);
        assert!(report.failed.is_empty());

        let fetched = store.get_tags("flow", "f1").await.unwrap();
        assert_eq!(fetched, tags);
    }

    #[tokio::test]
    async fn replace_with_empty_set_clears() {
        let store = tag_store().await;
        store.set_tag("flow", "f1", "env", "prod", None).await.unwrap();

        let report = store
            .replace_all_tags("flow", "f1", &BTreeMap::new(), None)
            .await
            .unwrap();
        assert!(report.ok);
        assert_eq!(report.removed, 1);
        assert!(store.get_tags("flow", "f1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_tag_reports_presence() {
        let store = tag_store().await;
        store.set_tag("flow", "f1", "env", "prod", None).await.unwrap();

        assert!(store.delete_tag("flow", "f1", "env").await.unwrap());
        assert!(!store.delete_tag("flow", "f1", "env").await.unwrap());
    }

    #[tokio::test]
    async fn search_by_name_and_value() {
        let store = tag_store().await;
        store.set_tag("flow", "f1", "env", "prod", None).await.unwrap();
        store.set_tag("flow", "f2", "env", "prod", None).await.unwrap();
        store
            .set_tag("source", "s1", "env", "staging", None)
            .await
            .unwrap();

        let prod = store
            .search_tags(None, Some("env"), Some("prod"))
            .await
            .unwrap();
        assert_eq!(prod.len(), 2);

        let flows = store.search_tags(Some("flow"), None, None).await.unwrap();
        assert_eq!(flows.len(), 2);

        let audit = &prod[0];
        assert_eq!(audit.tag_name, "env");
        assert!(audit.created_by.is_none());
    }
}
