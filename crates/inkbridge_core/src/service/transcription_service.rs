//! Transcription and block-edit use-case service.
//!
//! # Responsibility
//! - Run "transcribe new content" and "refresh full page" passes.
//! - Route user merge/split/erase edits through the same page lock.
//!
//! # Invariants
//! - One pass or edit per page at a time; contention fails fast.
//! - Read failures and oracle failures abort before any block mutation.
//! - Captured strokes are persisted unassociated before recognition.
//! - The oracle is skipped for an empty batch; the engine still runs so
//!   erased blocks are cleaned up.

use crate::model::block::{AnnotationBlock, BlockArena, BlockId, PageId};
use crate::model::line::RecognitionLine;
use crate::model::stroke::{Stroke, StrokeId};
use crate::reconcile::commit::{commit_plan, ReconcileReport};
use crate::reconcile::config::{ConfigError, ReconcileConfig};
use crate::reconcile::edit::{
    apply_edit, plan_merge, plan_split, EditError, EditPlan, MergeRequest, SplitRequest,
};
use crate::reconcile::engine::{
    RecognitionScope, ReconcilePlan, ReconcileSnapshot, ReconciliationEngine,
};
use crate::repo::gateway::{GatewayError, PersistenceGateway};
use crate::service::oracle::{OracleError, RecognitionOracle};
use crate::service::page_lock::{PageGuard, PageLocks};
use crate::store::stroke_store::{StrokeStore, StrokeStoreError};
use log::{error, info};
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Service error for passes and edits.
#[derive(Debug)]
pub enum ServiceError {
    /// Page id is blank.
    InvalidPageId,
    /// Another pass or edit holds the page.
    PassInFlight(PageId),
    Config(ConfigError),
    Oracle(OracleError),
    Gateway(GatewayError),
    Edit(EditError),
    /// Stroke named by the caller is not on the page.
    StrokeNotFound(StrokeId),
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPageId => write!(f, "page id must not be blank"),
            Self::PassInFlight(page_id) => {
                write!(f, "a pass is already running for page `{page_id}`")
            }
            Self::Config(err) => write!(f, "{err}"),
            Self::Oracle(err) => write!(f, "{err}"),
            Self::Gateway(err) => write!(f, "{err}"),
            Self::Edit(err) => write!(f, "{err}"),
            Self::StrokeNotFound(id) => write!(f, "stroke not found: {id}"),
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Oracle(err) => Some(err),
            Self::Gateway(err) => Some(err),
            Self::Edit(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigError> for ServiceError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<OracleError> for ServiceError {
    fn from(value: OracleError) -> Self {
        Self::Oracle(value)
    }
}

impl From<GatewayError> for ServiceError {
    fn from(value: GatewayError) -> Self {
        Self::Gateway(value)
    }
}

impl From<EditError> for ServiceError {
    fn from(value: EditError) -> Self {
        Self::Edit(value)
    }
}

impl From<StrokeStoreError> for ServiceError {
    fn from(value: StrokeStoreError) -> Self {
        match value {
            StrokeStoreError::StrokeNotFound(id) => Self::StrokeNotFound(id),
        }
    }
}

/// Result of one transcription pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PassOutcome {
    pub scope: RecognitionScope,
    /// Captured strokes that were new to the page.
    pub ingested: usize,
    /// Strokes sent to the oracle; zero means it was not called.
    pub recognized: usize,
    pub lines: Vec<RecognitionLine>,
    pub plan: ReconcilePlan,
    pub report: ReconcileReport,
}

/// Blocks after a committed edit.
#[derive(Debug, Clone, PartialEq)]
pub struct EditOutcome {
    /// Survivor of a merge, or the upper half of a split.
    pub retained: AnnotationBlock,
    /// Lower half of a split.
    pub created: Option<AnnotationBlock>,
}

/// Transcription service facade over a gateway and an oracle.
pub struct TranscriptionService<G: PersistenceGateway, O: RecognitionOracle> {
    gateway: G,
    oracle: O,
    engine: ReconciliationEngine,
    locks: PageLocks,
}

impl<G: PersistenceGateway, O: RecognitionOracle> TranscriptionService<G, O> {
    /// Creates a service with its own page lock registry.
    pub fn new(gateway: G, oracle: O, config: ReconcileConfig) -> Result<Self, ServiceError> {
        config.validate()?;
        Ok(Self {
            gateway,
            oracle,
            engine: ReconciliationEngine::new(config),
            locks: PageLocks::new(),
        })
    }

    /// Shares `locks` with other services working on the same pages.
    pub fn with_locks(mut self, locks: PageLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn locks(&self) -> &PageLocks {
        &self.locks
    }

    /// Recognizes only unassociated strokes and appends blocks for them.
    pub fn transcribe_new(
        &self,
        page_id: &str,
        captured: &[Stroke],
    ) -> Result<PassOutcome, ServiceError> {
        self.run_pass(page_id, RecognitionScope::Unassociated, |_blocks| {
            let mut store = StrokeStore::from_strokes(self.gateway.read_strokes(page_id)?);
            let mut fresh = Vec::new();
            for stroke in captured {
                let mut stroke = stroke.clone();
                stroke.block_ref = None;
                if store.insert_new(stroke.clone()) {
                    fresh.push(stroke);
                }
            }
            self.gateway.write_strokes(page_id, &fresh)?;
            Ok((store, fresh.len()))
        })
    }

    /// Re-recognizes every live stroke of the page.
    ///
    /// Remote, cached and captured strokes are merged by id; references to
    /// blocks that no longer exist are released before recognition.
    pub fn refresh_page(
        &self,
        page_id: &str,
        cached: &[Stroke],
        captured: &[Stroke],
    ) -> Result<PassOutcome, ServiceError> {
        self.run_pass(page_id, RecognitionScope::FullPage, |blocks| {
            let remote = self.gateway.read_strokes(page_id)?;
            let known: HashSet<BlockId> = blocks.iter().map(|block| block.id).collect();

            let mut store =
                StrokeStore::merge_sources([remote.as_slice(), cached, captured]);
            store.release_dangling(&known);

            let remote_by_id: HashMap<StrokeId, &Stroke> =
                remote.iter().map(|stroke| (stroke.id, stroke)).collect();
            let changed: Vec<Stroke> = store
                .iter()
                .filter(|stroke| remote_by_id.get(&stroke.id) != Some(stroke))
                .cloned()
                .collect();
            let ingested = changed
                .iter()
                .filter(|stroke| !remote_by_id.contains_key(&stroke.id))
                .count();
            self.gateway.write_strokes(page_id, &changed)?;
            Ok((store, ingested))
        })
    }

    /// Merges `request.absorbed` into `request.survivor`.
    pub fn merge_blocks(
        &self,
        page_id: &str,
        request: &MergeRequest,
    ) -> Result<EditOutcome, ServiceError> {
        self.run_edit(page_id, "merge", |arena, strokes| {
            plan_merge(arena, strokes, request)
        })
    }

    /// Splits one block at `request.boundary_y`.
    pub fn split_block(
        &self,
        page_id: &str,
        request: &SplitRequest,
    ) -> Result<EditOutcome, ServiceError> {
        self.run_edit(page_id, "split", |arena, strokes| {
            plan_split(arena, strokes, request)
        })
    }

    /// Tombstones erased strokes. Blocks left without live strokes are
    /// removed by the next pass.
    pub fn delete_strokes(&self, page_id: &str, ids: &[StrokeId]) -> Result<usize, ServiceError> {
        let _guard = self.acquire(page_id)?;
        let mut store = StrokeStore::from_strokes(self.gateway.read_strokes(page_id)?);
        let mut erased = Vec::new();
        for id in ids {
            if store.get(*id).is_some_and(|stroke| stroke.is_live()) {
                erased.push(*id);
            }
            store.mark_deleted(*id)?;
        }
        self.gateway
            .write_strokes(page_id, &store.snapshot_of(&erased))?;
        info!(
            "event=strokes_erase module=service status=ok page_id={} requested={} erased={}",
            page_id,
            ids.len(),
            erased.len()
        );
        Ok(erased.len())
    }

    fn acquire(&self, page_id: &str) -> Result<PageGuard, ServiceError> {
        if page_id.trim().is_empty() {
            return Err(ServiceError::InvalidPageId);
        }
        self.locks
            .try_acquire(page_id)
            .ok_or_else(|| ServiceError::PassInFlight(page_id.to_string()))
    }

    fn run_pass(
        &self,
        page_id: &str,
        scope: RecognitionScope,
        ingest: impl FnOnce(&[AnnotationBlock]) -> Result<(StrokeStore, usize), ServiceError>,
    ) -> Result<PassOutcome, ServiceError> {
        let _guard = self.acquire(page_id)?;
        let started_at = Instant::now();
        info!(
            "event=transcription_pass module=service status=start page_id={} scope={}",
            page_id,
            scope.as_str()
        );

        let result = self.pass_body(page_id, scope, ingest);
        match &result {
            Ok(outcome) => info!(
                "event=transcription_pass module=service status={} page_id={} scope={} ingested={} recognized={} lines={} changed_blocks={} failed={} duration_ms={}",
                if outcome.report.has_failures() { "partial" } else { "ok" },
                page_id,
                scope.as_str(),
                outcome.ingested,
                outcome.recognized,
                outcome.lines.len(),
                outcome.report.changed_blocks(),
                outcome.report.failed.len(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=transcription_pass module=service status=error page_id={} scope={} duration_ms={} error={}",
                page_id,
                scope.as_str(),
                started_at.elapsed().as_millis(),
                err
            ),
        }
        result
    }

    fn pass_body(
        &self,
        page_id: &str,
        scope: RecognitionScope,
        ingest: impl FnOnce(&[AnnotationBlock]) -> Result<(StrokeStore, usize), ServiceError>,
    ) -> Result<PassOutcome, ServiceError> {
        let blocks = self.gateway.list_blocks(page_id)?;
        let (mut store, ingested) = ingest(&blocks)?;

        let batch: Vec<Stroke> = match scope {
            RecognitionScope::Unassociated => store.unassociated_strokes(),
            RecognitionScope::FullPage => store.live_strokes(),
        }
        .into_iter()
        .cloned()
        .collect();
        let lines = if batch.is_empty() {
            Vec::new()
        } else {
            self.oracle.recognize(&batch)?
        };

        let plan = self.engine.plan(&ReconcileSnapshot {
            page_id,
            blocks: &blocks,
            strokes: &store,
            lines: &lines,
            scope,
        });
        let report = commit_plan(&self.gateway, page_id, &plan, &mut store);

        Ok(PassOutcome {
            scope,
            ingested,
            recognized: batch.len(),
            lines,
            plan,
            report,
        })
    }

    fn run_edit(
        &self,
        page_id: &str,
        kind: &'static str,
        plan_edit: impl FnOnce(&BlockArena, &StrokeStore) -> Result<EditPlan, EditError>,
    ) -> Result<EditOutcome, ServiceError> {
        let _guard = self.acquire(page_id)?;
        let mut arena = BlockArena::from_blocks(self.gateway.list_blocks(page_id)?);
        let mut store = StrokeStore::from_strokes(self.gateway.read_strokes(page_id)?);

        let plan = plan_edit(&arena, &store)?;
        if let Err(err) = self.gateway.commit_edit(page_id, &plan.commit) {
            error!(
                "event=block_edit module=service status=error kind={} page_id={} block_id={} error={}",
                kind, page_id, plan.retained, err
            );
            return Err(err.into());
        }
        apply_edit(&mut arena, &mut store, &plan.commit);
        info!(
            "event=block_edit module=service status=ok kind={} page_id={} block_id={} strokes={}",
            kind,
            page_id,
            plan.retained,
            plan.commit.strokes.len()
        );

        let retained = arena
            .get(plan.retained)
            .cloned()
            .ok_or(EditError::BlockNotFound(plan.retained))?;
        let created = plan.created.and_then(|id| arena.get(id).cloned());
        Ok(EditOutcome { retained, created })
    }
}
