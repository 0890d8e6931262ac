//! Core domain logic for InkBridge handwriting transcription.
//! Reconciles recognized handwriting with persisted, user-editable blocks.

pub mod db;
pub mod logging;
pub mod model;
pub mod reconcile;
pub mod repo;
pub mod service;
pub mod store;

pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::block::{AnnotationBlock, BlockArena, BlockId, BlockProperties, PageId};
pub use model::line::{canonical_text, LineBounds, RecognitionLine};
pub use model::stroke::{Stroke, StrokeId, StrokePoint};
pub use reconcile::commit::{commit_plan, FailedAction, ReconcileReport};
pub use reconcile::config::{ConfigError, ReconcileConfig, DEFAULT_LINE_TOLERANCE};
pub use reconcile::edit::{EditError, MergeRequest, SplitRequest};
pub use reconcile::engine::{
    ActionKind, BlockAction, PreserveReason, RecognitionScope, ReconcilePlan, ReconcileSnapshot,
    ReconciliationEngine,
};
pub use repo::gateway::{EditCommit, GatewayError, GatewayResult, PersistenceGateway};
pub use repo::sqlite_gateway::SqliteGateway;
pub use service::oracle::{FixtureOracle, OracleError, RecognitionOracle};
pub use service::page_lock::{PageGuard, PageLocks};
pub use service::transcription_service::{
    EditOutcome, PassOutcome, ServiceError, TranscriptionService,
};
pub use store::stroke_store::{StrokeStore, StrokeStoreError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
