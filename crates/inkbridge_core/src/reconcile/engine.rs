//! Incremental reconciliation of recognized lines against persisted blocks.
//!
//! # Responsibility
//! - Match fresh recognition lines to existing blocks via stroke overlap,
//!   falling back to bounds-hint overlap for legacy blocks.
//! - Emit one CREATE/UPDATE/SKIP/PRESERVE/DELETE decision per block and one
//!   CREATE per unconsumed line.
//!
//! # Invariants
//! - Pure: reads an immutable snapshot, performs no I/O, keeps no state
//!   between calls.
//! - DELETE is emitted only for blocks whose referencing strokes are all
//!   tombstoned; recognition silence never deletes.
//! - A line is consumed by at most one block; blocks are evaluated in
//!   creation order and lines combined in page order.
//! - A stroke is claimed by at most one action in a plan, and only if it was
//!   unassociated in the snapshot.

use crate::model::block::{AnnotationBlock, BlockId, BlockProperties};
use crate::model::line::{join_nonempty, union_bounds, RecognitionLine};
use crate::model::stroke::{Stroke, StrokeId};
use crate::reconcile::config::ReconcileConfig;
use crate::reconcile::spatial::candidate_strokes;
use crate::reconcile::transform::{ContentTransform, DecorationPreservingTransform, PriorContent};
use crate::store::stroke_store::StrokeStore;
use log::{debug, info, warn};
use std::collections::{BTreeSet, HashSet};
use std::fmt::{Display, Formatter};

/// Which strokes the oracle was given for this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionScope {
    /// Only unassociated strokes were recognized ("transcribe new content").
    Unassociated,
    /// Every live stroke was recognized ("refresh full page").
    FullPage,
}

impl RecognitionScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unassociated => "unassociated",
            Self::FullPage => "full_page",
        }
    }
}

/// Immutable input of one reconciliation pass.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileSnapshot<'a> {
    pub page_id: &'a str,
    /// Existing blocks in creation order.
    pub blocks: &'a [AnnotationBlock],
    pub strokes: &'a StrokeStore,
    /// Oracle output in the order it was returned.
    pub lines: &'a [RecognitionLine],
    pub scope: RecognitionScope,
}

/// Why a block was left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreserveReason {
    /// Block has live strokes but no recognized line overlapped them.
    NoMatchingLine,
    /// Legacy block whose bounds hint matched zero or several lines.
    AmbiguousLegacyMatch { matches: usize },
}

/// Action kind, used for ordering and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActionKind {
    Create,
    Update,
    Skip,
    Preserve,
    Delete,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Skip => "skip",
            Self::Preserve => "preserve",
            Self::Delete => "delete",
        }
    }
}

impl Display for ActionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// New block for an unconsumed line.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateAction {
    pub block: AnnotationBlock,
    /// Strokes whose `block_ref` becomes the new block id.
    pub strokes: Vec<StrokeId>,
    /// Index of the source line in the snapshot.
    pub line: usize,
}

/// Content regeneration for a block whose combined canonical text changed.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateAction {
    /// Block as it was before this pass; used to restore on failure.
    pub previous: AnnotationBlock,
    pub content: String,
    pub properties: BlockProperties,
    /// Unassociated candidate strokes now attached to this block.
    pub claimed: Vec<StrokeId>,
    /// Matched line indices in page order.
    pub lines: Vec<usize>,
}

/// One reconciliation decision.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockAction {
    Create(CreateAction),
    Update(UpdateAction),
    /// Combined canonical equals the stored snapshot; content is untouched.
    Skip {
        block_id: BlockId,
        claimed: Vec<StrokeId>,
        lines: Vec<usize>,
    },
    Preserve {
        block_id: BlockId,
        reason: PreserveReason,
    },
    /// All referencing strokes are tombstoned.
    Delete {
        block_id: BlockId,
        /// Tombstoned strokes whose reference is cleared with the block.
        released: Vec<StrokeId>,
    },
}

impl BlockAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Create(_) => ActionKind::Create,
            Self::Update(_) => ActionKind::Update,
            Self::Skip { .. } => ActionKind::Skip,
            Self::Preserve { .. } => ActionKind::Preserve,
            Self::Delete { .. } => ActionKind::Delete,
        }
    }

    pub fn block_id(&self) -> BlockId {
        match self {
            Self::Create(action) => action.block.id,
            Self::Update(action) => action.previous.id,
            Self::Skip { block_id, .. }
            | Self::Preserve { block_id, .. }
            | Self::Delete { block_id, .. } => *block_id,
        }
    }

    /// Returns whether the action changes block content or existence.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self.kind(),
            ActionKind::Create | ActionKind::Update | ActionKind::Delete
        )
    }

    /// Strokes whose `block_ref` this action changes.
    pub fn touched_strokes(&self) -> &[StrokeId] {
        match self {
            Self::Create(action) => &action.strokes,
            Self::Update(action) => &action.claimed,
            Self::Skip { claimed, .. } => claimed,
            Self::Delete { released, .. } => released,
            Self::Preserve { .. } => &[],
        }
    }
}

/// Ordered output of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    /// Existing-block decisions in creation order, then creates in page order.
    pub actions: Vec<BlockAction>,
}

impl ReconcilePlan {
    pub fn count(&self, kind: ActionKind) -> usize {
        self.actions
            .iter()
            .filter(|action| action.kind() == kind)
            .count()
    }

    /// Actions that create, update or delete a block.
    pub fn mutations(&self) -> impl Iterator<Item = &BlockAction> {
        self.actions.iter().filter(|action| action.is_mutation())
    }

    /// Decision for an existing block, if any.
    pub fn action_for(&self, block_id: BlockId) -> Option<&BlockAction> {
        self.actions
            .iter()
            .find(|action| action.block_id() == block_id)
    }

    /// Returns whether applying the plan would change nothing.
    pub fn is_noop(&self) -> bool {
        self.actions
            .iter()
            .all(|action| !action.is_mutation() && action.touched_strokes().is_empty())
    }
}

/// Stateless reconciliation engine.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationEngine<T: ContentTransform = DecorationPreservingTransform> {
    config: ReconcileConfig,
    transform: T,
}

impl ReconciliationEngine<DecorationPreservingTransform> {
    /// Creates an engine with the decoration-preserving content transform.
    pub fn new(config: ReconcileConfig) -> Self {
        Self::with_transform(config, DecorationPreservingTransform)
    }
}

impl<T: ContentTransform> ReconciliationEngine<T> {
    pub fn with_transform(config: ReconcileConfig, transform: T) -> Self {
        Self { config, transform }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Computes the action plan for one snapshot.
    pub fn plan(&self, snapshot: &ReconcileSnapshot<'_>) -> ReconcilePlan {
        let lines = snapshot.lines;
        let batch: Vec<&Stroke> = match snapshot.scope {
            RecognitionScope::Unassociated => snapshot.strokes.unassociated_strokes(),
            RecognitionScope::FullPage => snapshot.strokes.live_strokes(),
        };
        let candidates: Vec<BTreeSet<StrokeId>> = lines
            .iter()
            .map(|line| {
                candidate_strokes(line, batch.iter().copied(), self.config.line_tolerance)
            })
            .collect();
        let page_order = page_order(lines);

        let mut pass = PassState {
            consumed: vec![false; lines.len()],
            claimed: HashSet::new(),
        };
        let mut actions = Vec::with_capacity(snapshot.blocks.len() + lines.len());

        for block in snapshot.blocks {
            let action = self.decide_block(snapshot, block, &candidates, &page_order, &mut pass);
            debug!(
                "event=reconcile_block module=reconcile status=ok block_id={} action={}",
                block.id,
                action.kind()
            );
            actions.push(action);
        }

        let mut created_levels: Vec<(u32, BlockId)> = Vec::new();
        for &index in &page_order {
            if pass.consumed[index] {
                continue;
            }
            let line = &lines[index];
            let strokes = pass.claim(snapshot.strokes, &candidates[index]);

            let mut block =
                AnnotationBlock::new(snapshot.page_id, self.transform.render(&line.text, None));
            block.canonical_snapshot = line.canonical.clone();
            block.bounds_hint = line.valid_bounds().copied();
            block.parent_id = outline_parent(&created_levels, line.indent_level);
            created_levels.push((line.indent_level, block.id));

            actions.push(BlockAction::Create(CreateAction {
                block,
                strokes,
                line: index,
            }));
        }

        let plan = ReconcilePlan { actions };
        info!(
            "event=reconcile_plan module=reconcile status=ok scope={} blocks={} lines={} batch={} create={} update={} skip={} preserve={} delete={}",
            snapshot.scope.as_str(),
            snapshot.blocks.len(),
            lines.len(),
            batch.len(),
            plan.count(ActionKind::Create),
            plan.count(ActionKind::Update),
            plan.count(ActionKind::Skip),
            plan.count(ActionKind::Preserve),
            plan.count(ActionKind::Delete),
        );
        plan
    }

    fn decide_block(
        &self,
        snapshot: &ReconcileSnapshot<'_>,
        block: &AnnotationBlock,
        candidates: &[BTreeSet<StrokeId>],
        page_order: &[usize],
        pass: &mut PassState,
    ) -> BlockAction {
        let lines = snapshot.lines;
        let live: BTreeSet<StrokeId> = snapshot
            .strokes
            .strokes_for_block(block.id)
            .iter()
            .map(|stroke| stroke.id)
            .collect();

        let matched: Vec<usize> = if !live.is_empty() {
            page_order
                .iter()
                .copied()
                .filter(|index| !pass.consumed[*index] && !candidates[*index].is_disjoint(&live))
                .collect()
        } else {
            let referencing = snapshot.strokes.referencing_strokes(block.id);
            if !referencing.is_empty() {
                return BlockAction::Delete {
                    block_id: block.id,
                    released: referencing.iter().map(|stroke| stroke.id).collect(),
                };
            }
            if snapshot.scope == RecognitionScope::Unassociated {
                // New-content lines never describe pre-existing blocks.
                return BlockAction::Preserve {
                    block_id: block.id,
                    reason: PreserveReason::NoMatchingLine,
                };
            }
            let hits: Vec<usize> = match &block.bounds_hint {
                Some(hint) => page_order
                    .iter()
                    .copied()
                    .filter(|index| !pass.consumed[*index])
                    .filter(|index| {
                        lines[*index]
                            .valid_bounds()
                            .is_some_and(|bounds| bounds.overlaps(hint))
                    })
                    .collect(),
                None => Vec::new(),
            };
            if hits.len() != 1 {
                warn!(
                    "event=legacy_match module=reconcile status=ambiguous block_id={} matches={}",
                    block.id,
                    hits.len()
                );
                return BlockAction::Preserve {
                    block_id: block.id,
                    reason: PreserveReason::AmbiguousLegacyMatch {
                        matches: hits.len(),
                    },
                };
            }
            hits
        };

        if matched.is_empty() {
            return BlockAction::Preserve {
                block_id: block.id,
                reason: PreserveReason::NoMatchingLine,
            };
        }

        let mut claimed = Vec::new();
        for index in &matched {
            pass.consumed[*index] = true;
            claimed.extend(pass.claim(snapshot.strokes, &candidates[*index]));
        }

        let combined_canonical =
            join_nonempty(matched.iter().map(|index| lines[*index].canonical.as_str()));
        if combined_canonical == block.canonical_snapshot {
            return BlockAction::Skip {
                block_id: block.id,
                claimed,
                lines: matched,
            };
        }

        let combined_text = join_nonempty(matched.iter().map(|index| lines[*index].text.as_str()));
        let content = self.transform.render(
            &combined_text,
            Some(PriorContent {
                content: &block.content,
                canonical: &block.canonical_snapshot,
            }),
        );
        let bounds_hint =
            union_bounds(matched.iter().filter_map(|index| lines[*index].valid_bounds()))
                .or(block.bounds_hint);

        BlockAction::Update(UpdateAction {
            previous: block.clone(),
            content,
            properties: BlockProperties {
                canonical_snapshot: combined_canonical,
                bounds_hint,
            },
            claimed,
            lines: matched,
        })
    }
}

/// Mutable bookkeeping of one plan computation.
struct PassState {
    consumed: Vec<bool>,
    claimed: HashSet<StrokeId>,
}

impl PassState {
    /// Claims candidates that are live, unassociated and not yet claimed.
    fn claim(&mut self, strokes: &StrokeStore, candidates: &BTreeSet<StrokeId>) -> Vec<StrokeId> {
        let mut taken = Vec::new();
        for id in candidates {
            let eligible = strokes
                .get(*id)
                .is_some_and(|stroke| stroke.is_live() && stroke.block_ref.is_none());
            if eligible && self.claimed.insert(*id) {
                taken.push(*id);
            }
        }
        taken
    }
}

/// Line indices sorted top-to-bottom; lines without bounds keep oracle order
/// after all bounded lines.
fn page_order(lines: &[RecognitionLine]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..lines.len()).collect();
    order.sort_by(|left, right| {
        let top = |index: usize| {
            lines[index]
                .valid_bounds()
                .map_or(f64::INFINITY, |bounds| bounds.min_y)
        };
        top(*left).total_cmp(&top(*right)).then(left.cmp(right))
    });
    order
}

/// Closest preceding created block with a smaller indent level.
fn outline_parent(created: &[(u32, BlockId)], indent_level: u32) -> Option<BlockId> {
    if indent_level == 0 {
        return None;
    }
    created
        .iter()
        .rev()
        .find(|(level, _)| *level < indent_level)
        .map(|(_, id)| *id)
}
