//! Plan execution against the persistence gateway.
//!
//! # Responsibility
//! - Apply a `ReconcilePlan` action by action.
//! - Keep each action's block write and stroke writes together as one unit.
//! - Report per-kind counts and isolated failures.
//!
//! # Invariants
//! - Units run in kind order: create, update, skip, preserve, delete.
//! - A failed unit is compensated and recorded; later units still run.
//! - `StrokeStore` only reflects units whose writes all succeeded.

use crate::model::block::BlockId;
use crate::model::stroke::StrokeId;
use crate::reconcile::engine::{
    ActionKind, BlockAction, CreateAction, ReconcilePlan, UpdateAction,
};
use crate::repo::gateway::{GatewayError, GatewayResult, PersistenceGateway};
use crate::store::stroke_store::StrokeStore;
use log::{error, info, warn};

const APPLY_ORDER: [ActionKind; 5] = [
    ActionKind::Create,
    ActionKind::Update,
    ActionKind::Skip,
    ActionKind::Preserve,
    ActionKind::Delete,
];

/// One action that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedAction {
    pub kind: ActionKind,
    pub block_id: BlockId,
    /// Gateway error message.
    pub error: String,
}

/// Outcome of applying one plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub preserved: usize,
    pub deleted: usize,
    pub failed: Vec<FailedAction>,
}

impl ReconcileReport {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Returns whether any block was created, updated or deleted.
    pub fn changed_blocks(&self) -> bool {
        self.created + self.updated + self.deleted > 0
    }

    fn record_success(&mut self, kind: ActionKind) {
        let counter = match kind {
            ActionKind::Create => &mut self.created,
            ActionKind::Update => &mut self.updated,
            ActionKind::Skip => &mut self.skipped,
            ActionKind::Preserve => &mut self.preserved,
            ActionKind::Delete => &mut self.deleted,
        };
        *counter += 1;
    }
}

/// Applies `plan` for `page_id`, updating `strokes` as units succeed.
///
/// Gateway write failures never abort the pass; they surface in
/// `ReconcileReport::failed`.
pub fn commit_plan<G: PersistenceGateway>(
    gateway: &G,
    page_id: &str,
    plan: &ReconcilePlan,
    strokes: &mut StrokeStore,
) -> ReconcileReport {
    info!(
        "event=reconcile_commit module=reconcile status=start page_id={} actions={}",
        page_id,
        plan.actions.len()
    );
    let mut report = ReconcileReport::default();

    for kind in APPLY_ORDER {
        for action in plan.actions.iter().filter(|action| action.kind() == kind) {
            let result = match action {
                BlockAction::Create(create) => apply_create(gateway, page_id, create, strokes),
                BlockAction::Update(update) => apply_update(gateway, page_id, update, strokes),
                BlockAction::Skip {
                    block_id, claimed, ..
                } => apply_claims(gateway, page_id, *block_id, claimed, strokes),
                BlockAction::Preserve { .. } => Ok(()),
                BlockAction::Delete { block_id, released } => {
                    apply_delete(gateway, page_id, *block_id, released, strokes)
                }
            };
            match result {
                Ok(()) => report.record_success(kind),
                Err(err) => {
                    warn!(
                        "event=reconcile_action module=reconcile status=error page_id={} action={} block_id={} error={}",
                        page_id,
                        kind,
                        action.block_id(),
                        err
                    );
                    report.failed.push(FailedAction {
                        kind,
                        block_id: action.block_id(),
                        error: err.to_string(),
                    });
                }
            }
        }
    }

    info!(
        "event=reconcile_commit module=reconcile status={} page_id={} created={} updated={} skipped={} preserved={} deleted={} failed={}",
        if report.has_failures() { "partial" } else { "ok" },
        page_id,
        report.created,
        report.updated,
        report.skipped,
        report.preserved,
        report.deleted,
        report.failed.len()
    );
    report
}

fn apply_create<G: PersistenceGateway>(
    gateway: &G,
    page_id: &str,
    create: &CreateAction,
    strokes: &mut StrokeStore,
) -> GatewayResult<()> {
    let block_id = create.block.id;
    gateway.create_block(page_id, &create.block)?;

    let staged = strokes.staged_assignment(&create.strokes, Some(block_id));
    if let Err(err) = gateway.write_strokes(page_id, &staged) {
        compensate(ActionKind::Create, block_id, gateway.delete_block(block_id));
        return Err(err);
    }
    for stroke in staged {
        strokes.upsert(stroke);
    }
    Ok(())
}

fn apply_update<G: PersistenceGateway>(
    gateway: &G,
    page_id: &str,
    update: &UpdateAction,
    strokes: &mut StrokeStore,
) -> GatewayResult<()> {
    let previous = &update.previous;
    gateway.update_block_content(previous.id, &update.content, &update.properties)?;

    let staged = strokes.staged_assignment(&update.claimed, Some(previous.id));
    if let Err(err) = gateway.write_strokes(page_id, &staged) {
        compensate(
            ActionKind::Update,
            previous.id,
            gateway.update_block_content(previous.id, &previous.content, &previous.properties()),
        );
        return Err(err);
    }
    for stroke in staged {
        strokes.upsert(stroke);
    }
    Ok(())
}

fn apply_claims<G: PersistenceGateway>(
    gateway: &G,
    page_id: &str,
    block_id: BlockId,
    claimed: &[StrokeId],
    strokes: &mut StrokeStore,
) -> GatewayResult<()> {
    if claimed.is_empty() {
        return Ok(());
    }
    let staged = strokes.staged_assignment(claimed, Some(block_id));
    gateway.write_strokes(page_id, &staged)?;
    for stroke in staged {
        strokes.upsert(stroke);
    }
    Ok(())
}

fn apply_delete<G: PersistenceGateway>(
    gateway: &G,
    page_id: &str,
    block_id: BlockId,
    released: &[StrokeId],
    strokes: &mut StrokeStore,
) -> GatewayResult<()> {
    let staged = strokes.staged_assignment(released, None);
    gateway.write_strokes(page_id, &staged)?;

    if let Err(err) = gateway.delete_block(block_id) {
        let original = strokes.snapshot_of(released);
        compensate(
            ActionKind::Delete,
            block_id,
            gateway.write_strokes(page_id, &original),
        );
        return Err(err);
    }
    for stroke in staged {
        strokes.upsert(stroke);
    }
    Ok(())
}

fn compensate(kind: ActionKind, block_id: BlockId, result: Result<(), GatewayError>) {
    match result {
        Ok(()) => info!(
            "event=reconcile_compensate module=reconcile status=ok action={} block_id={}",
            kind, block_id
        ),
        Err(err) => error!(
            "event=reconcile_compensate module=reconcile status=error action={} block_id={} error={}",
            kind, block_id, err
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::{commit_plan, ReconcileReport};
    use crate::model::block::{AnnotationBlock, BlockId, BlockProperties};
    use crate::model::line::LineBounds;
    use crate::model::stroke::{Stroke, StrokePoint};
    use crate::reconcile::engine::{
        ActionKind, BlockAction, CreateAction, PreserveReason, ReconcilePlan, UpdateAction,
    };
    use crate::repo::gateway::{EditCommit, GatewayError, GatewayResult, PersistenceGateway};
    use crate::store::stroke_store::StrokeStore;
    use std::cell::RefCell;
    use std::collections::HashMap;

    const PAGE: &str = "page-1";

    /// Map-backed gateway that can reject stroke writes touching one block.
    #[derive(Default)]
    struct MemoryGateway {
        blocks: RefCell<HashMap<BlockId, AnnotationBlock>>,
        strokes: RefCell<HashMap<i64, Stroke>>,
        calls: RefCell<Vec<&'static str>>,
        reject_strokes_for: Option<BlockId>,
    }

    impl PersistenceGateway for MemoryGateway {
        fn list_blocks(&self, _page_id: &str) -> GatewayResult<Vec<AnnotationBlock>> {
            Ok(self.blocks.borrow().values().cloned().collect())
        }

        fn create_block(&self, _page_id: &str, block: &AnnotationBlock) -> GatewayResult<()> {
            self.calls.borrow_mut().push("create");
            self.blocks.borrow_mut().insert(block.id, block.clone());
            Ok(())
        }

        fn update_block_content(
            &self,
            block_id: BlockId,
            content: &str,
            properties: &BlockProperties,
        ) -> GatewayResult<()> {
            self.calls.borrow_mut().push("update");
            let mut blocks = self.blocks.borrow_mut();
            let block = blocks
                .get_mut(&block_id)
                .ok_or(GatewayError::BlockNotFound(block_id))?;
            block.apply_content(content, properties.clone());
            Ok(())
        }

        fn delete_block(&self, block_id: BlockId) -> GatewayResult<()> {
            self.calls.borrow_mut().push("delete");
            self.blocks
                .borrow_mut()
                .remove(&block_id)
                .map(|_| ())
                .ok_or(GatewayError::BlockNotFound(block_id))
        }

        fn read_strokes(&self, _page_id: &str) -> GatewayResult<Vec<Stroke>> {
            Ok(self.strokes.borrow().values().cloned().collect())
        }

        fn write_strokes(&self, _page_id: &str, strokes: &[Stroke]) -> GatewayResult<()> {
            self.calls.borrow_mut().push("strokes");
            let rejected = strokes.iter().any(|stroke| {
                stroke.block_ref.is_some() && stroke.block_ref == self.reject_strokes_for
            });
            if rejected {
                return Err(GatewayError::Unavailable("stroke write rejected".to_string()));
            }
            let mut stored = self.strokes.borrow_mut();
            for stroke in strokes {
                stored.insert(stroke.id, stroke.clone());
            }
            Ok(())
        }

        fn commit_edit(&self, _page_id: &str, _edit: &EditCommit) -> GatewayResult<()> {
            Ok(())
        }
    }

    fn stroke(id: i64) -> Stroke {
        Stroke::with_id(id, vec![StrokePoint::new(0.0, 1.0, id)])
    }

    fn create(content: &str, strokes: Vec<i64>) -> BlockAction {
        BlockAction::Create(CreateAction {
            block: AnnotationBlock::new(PAGE, content),
            strokes,
            line: 0,
        })
    }

    #[test]
    fn applies_in_kind_order_and_counts() {
        let gateway = MemoryGateway::default();
        let kept = AnnotationBlock::new(PAGE, "kept");
        gateway.blocks.borrow_mut().insert(kept.id, kept.clone());
        let mut strokes = StrokeStore::from_strokes([stroke(1), stroke(2)]);

        let plan = ReconcilePlan {
            actions: vec![
                BlockAction::Delete {
                    block_id: kept.id,
                    released: Vec::new(),
                },
                create("new", vec![1, 2]),
            ],
        };
        let report = commit_plan(&gateway, PAGE, &plan, &mut strokes);

        assert_eq!(report.created, 1);
        assert_eq!(report.deleted, 1);
        assert!(!report.has_failures());
        assert_eq!(
            *gateway.calls.borrow(),
            vec!["create", "strokes", "strokes", "delete"]
        );
        assert!(strokes.unassociated_strokes().is_empty());
    }

    #[test]
    fn failed_stroke_write_rolls_back_created_block_only() {
        let mut gateway = MemoryGateway::default();
        let failing = create("bad", vec![1]);
        let failing_id = failing.block_id();
        gateway.reject_strokes_for = Some(failing_id);
        let mut strokes = StrokeStore::from_strokes([stroke(1), stroke(2)]);

        let plan = ReconcilePlan {
            actions: vec![failing, create("good", vec![2])],
        };
        let report = commit_plan(&gateway, PAGE, &plan, &mut strokes);

        assert_eq!(report.created, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].kind, ActionKind::Create);
        assert_eq!(report.failed[0].block_id, failing_id);
        assert!(!gateway.blocks.borrow().contains_key(&failing_id));
        assert_eq!(strokes.get(1).unwrap().block_ref, None);
        assert!(strokes.get(2).unwrap().block_ref.is_some());
    }

    #[test]
    fn failed_update_restores_previous_content() {
        let mut previous = AnnotationBlock::new(PAGE, "TODO Buy milk");
        previous.canonical_snapshot = "Buy milk".to_string();
        previous.bounds_hint = Some(LineBounds::new(0.0, 10.0));
        let mut gateway = MemoryGateway::default();
        gateway.reject_strokes_for = Some(previous.id);
        gateway
            .blocks
            .borrow_mut()
            .insert(previous.id, previous.clone());
        let mut strokes = StrokeStore::from_strokes([stroke(1)]);

        let plan = ReconcilePlan {
            actions: vec![
                BlockAction::Update(UpdateAction {
                    previous: previous.clone(),
                    content: "TODO Buy oat milk".to_string(),
                    properties: BlockProperties {
                        canonical_snapshot: "Buy oat milk".to_string(),
                        bounds_hint: Some(LineBounds::new(0.0, 12.0)),
                    },
                    claimed: vec![1],
                    lines: vec![0],
                }),
                BlockAction::Preserve {
                    block_id: previous.id,
                    reason: PreserveReason::NoMatchingLine,
                },
            ],
        };
        let report = commit_plan(&gateway, PAGE, &plan, &mut strokes);

        assert_eq!(
            report,
            ReconcileReport {
                preserved: 1,
                failed: report.failed.clone(),
                ..ReconcileReport::default()
            }
        );
        assert_eq!(gateway.blocks.borrow()[&previous.id], previous);
        assert_eq!(strokes.get(1).unwrap().block_ref, None);
    }
}
