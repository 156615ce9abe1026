//! Domain layer: entity models, persisted schemas and the store facades

pub mod cleanup;
pub mod entities;
pub mod models;
pub mod schema;
pub mod segments;
pub mod tags;

pub use cleanup::{CleanupReport, CleanupService};
pub use entities::EntityStore;
pub use models::{DeletionRequest, Flow, MediaObject, Segment, Source, Tag, Webhook};
pub use segments::SegmentService;
pub use tags::{TagReplaceReport, TagStore};
