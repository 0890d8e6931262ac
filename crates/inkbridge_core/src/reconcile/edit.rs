//! Block merge and split driven by explicit user edits.
//!
//! # Responsibility
//! - Turn a merge or split request into an `EditCommit`.
//! - Apply a persisted `EditCommit` to in-memory blocks and strokes.
//!
//! # Invariants
//! - Merge never loses a stroke: every stroke of the absorbed block, live or
//!   tombstoned, is re-pointed at the survivor.
//! - Split never leaves a side without live strokes.
//! - A split side's snapshot is its content without user decorations, so a
//!   re-recognition of the same strokes skips it.
//! - Planning does not mutate; `apply_edit` runs only after the gateway
//!   commit succeeded.

use crate::model::block::{AnnotationBlock, BlockArena, BlockId};
use crate::model::line::{canonical_text, join_nonempty, union_bounds, LineBounds};
use crate::model::stroke::{Stroke, StrokeId};
use crate::reconcile::spatial::{split_membership, SplitSide};
use crate::reconcile::transform::strip_decorations;
use crate::repo::gateway::EditCommit;
use crate::store::stroke_store::StrokeStore;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Rejected edit request.
#[derive(Debug, Clone, PartialEq)]
pub enum EditError {
    BlockNotFound(BlockId),
    /// A block cannot absorb itself.
    SelfMerge(BlockId),
    /// Merged blocks live on different pages.
    CrossPageMerge {
        survivor: BlockId,
        absorbed: BlockId,
    },
    /// Absorbed block is a non-parent ancestor of the survivor.
    MergeWouldCycle {
        survivor: BlockId,
        absorbed: BlockId,
    },
    /// Split boundary is not a finite coordinate.
    InvalidBoundary(f64),
    /// One side of the split would own no live stroke.
    EmptySplitSide(SplitSide),
}

impl Display for EditError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlockNotFound(id) => write!(f, "block not found: {id}"),
            Self::SelfMerge(id) => write!(f, "block cannot be merged into itself: {id}"),
            Self::CrossPageMerge { survivor, absorbed } => write!(
                f,
                "blocks {survivor} and {absorbed} are on different pages"
            ),
            Self::MergeWouldCycle { survivor, absorbed } => write!(
                f,
                "merging {absorbed} into {survivor} would create a parent cycle"
            ),
            Self::InvalidBoundary(value) => write!(f, "invalid split boundary: {value}"),
            Self::EmptySplitSide(SplitSide::Above) => {
                write!(f, "split leaves no strokes above the boundary")
            }
            Self::EmptySplitSide(SplitSide::Below) => {
                write!(f, "split leaves no strokes below the boundary")
            }
        }
    }
}

impl Error for EditError {}

/// Merge of `absorbed` into `survivor`.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeRequest {
    pub survivor: BlockId,
    pub absorbed: BlockId,
    /// Content chosen by the user; defaults to both contents, top first.
    pub merged_content: Option<String>,
}

/// Split of one block at a horizontal boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitRequest {
    pub block_id: BlockId,
    pub boundary_y: f64,
    /// Content kept by the original block (above the boundary).
    pub upper_content: String,
    /// Content of the new block (below the boundary).
    pub lower_content: String,
}

/// Planned edit with the ids the caller may want to report.
#[derive(Debug, Clone, PartialEq)]
pub struct EditPlan {
    pub commit: EditCommit,
    /// Block that holds the upper/merged content after the edit.
    pub retained: BlockId,
    /// Block created by a split.
    pub created: Option<BlockId>,
}

/// Plans merging two blocks of the same page.
pub fn plan_merge(
    arena: &BlockArena,
    strokes: &StrokeStore,
    request: &MergeRequest,
) -> Result<EditPlan, EditError> {
    let (survivor_id, absorbed_id) = (request.survivor, request.absorbed);
    if survivor_id == absorbed_id {
        return Err(EditError::SelfMerge(survivor_id));
    }
    let survivor = arena
        .get(survivor_id)
        .ok_or(EditError::BlockNotFound(survivor_id))?;
    let absorbed = arena
        .get(absorbed_id)
        .ok_or(EditError::BlockNotFound(absorbed_id))?;
    if survivor.page_id != absorbed.page_id {
        return Err(EditError::CrossPageMerge {
            survivor: survivor_id,
            absorbed: absorbed_id,
        });
    }
    let absorbed_is_parent = arena.parent_of(survivor_id) == Some(absorbed_id);
    if !absorbed_is_parent && arena.is_ancestor(absorbed_id, survivor_id) {
        return Err(EditError::MergeWouldCycle {
            survivor: survivor_id,
            absorbed: absorbed_id,
        });
    }

    let (top, bottom) = if is_above(absorbed, survivor) {
        (absorbed, survivor)
    } else {
        (survivor, absorbed)
    };

    let mut merged = survivor.clone();
    merged.content = request
        .merged_content
        .clone()
        .unwrap_or_else(|| format!("{}\n{}", top.content, bottom.content));
    merged.canonical_snapshot = join_nonempty([
        top.canonical_snapshot.as_str(),
        bottom.canonical_snapshot.as_str(),
    ]);
    merged.bounds_hint =
        union_bounds(survivor.bounds_hint.iter().chain(absorbed.bounds_hint.iter()));
    if absorbed_is_parent {
        merged.parent_id = absorbed.parent_id;
    }

    let mut upserts = vec![merged];
    for child in arena.children_of(Some(absorbed_id)) {
        if child == survivor_id {
            continue;
        }
        if let Some(block) = arena.get(child) {
            let mut reparented = block.clone();
            reparented.parent_id = Some(survivor_id);
            upserts.push(reparented);
        }
    }

    let moved: Vec<StrokeId> = strokes
        .referencing_strokes(absorbed_id)
        .iter()
        .map(|stroke| stroke.id)
        .collect();

    Ok(EditPlan {
        commit: EditCommit {
            upserts,
            removals: vec![absorbed_id],
            strokes: strokes.staged_assignment(&moved, Some(survivor_id)),
        },
        retained: survivor_id,
        created: None,
    })
}

/// Plans splitting one block into an upper and a new lower block.
pub fn plan_split(
    arena: &BlockArena,
    strokes: &StrokeStore,
    request: &SplitRequest,
) -> Result<EditPlan, EditError> {
    if !request.boundary_y.is_finite() {
        return Err(EditError::InvalidBoundary(request.boundary_y));
    }
    let original = arena
        .get(request.block_id)
        .ok_or(EditError::BlockNotFound(request.block_id))?;

    let mut upper_live = Vec::new();
    let mut lower_live = Vec::new();
    let mut lower_ids = Vec::new();
    for stroke in strokes.referencing_strokes(original.id) {
        let side = split_membership(stroke, request.boundary_y);
        if side == SplitSide::Below {
            lower_ids.push(stroke.id);
        }
        if stroke.is_live() {
            match side {
                SplitSide::Above => upper_live.push(stroke),
                SplitSide::Below => lower_live.push(stroke),
            }
        }
    }
    if upper_live.is_empty() {
        return Err(EditError::EmptySplitSide(SplitSide::Above));
    }
    if lower_live.is_empty() {
        return Err(EditError::EmptySplitSide(SplitSide::Below));
    }

    let mut upper = original.clone();
    upper.content = request.upper_content.clone();
    upper.canonical_snapshot = canonical_text(strip_decorations(&request.upper_content));
    upper.bounds_hint = side_hint(
        original.bounds_hint,
        SplitSide::Above,
        request.boundary_y,
        &upper_live,
    );

    let mut lower = AnnotationBlock::new(original.page_id.clone(), request.lower_content.clone());
    lower.parent_id = original.parent_id;
    lower.canonical_snapshot = canonical_text(strip_decorations(&request.lower_content));
    lower.bounds_hint = side_hint(
        original.bounds_hint,
        SplitSide::Below,
        request.boundary_y,
        &lower_live,
    );

    let lower_id = lower.id;
    Ok(EditPlan {
        commit: EditCommit {
            upserts: vec![upper, lower],
            removals: Vec::new(),
            strokes: strokes.staged_assignment(&lower_ids, Some(lower_id)),
        },
        retained: request.block_id,
        created: Some(lower_id),
    })
}

/// Applies a committed edit to in-memory state.
pub fn apply_edit(arena: &mut BlockArena, strokes: &mut StrokeStore, commit: &EditCommit) {
    for block in &commit.upserts {
        match arena.get_mut(block.id) {
            Some(existing) => *existing = block.clone(),
            None => {
                arena.push(block.clone());
            }
        }
    }
    for id in &commit.removals {
        arena.remove(*id);
    }
    for stroke in &commit.strokes {
        strokes.upsert(stroke.clone());
    }
}

/// Top-to-bottom order by bounds hint; ties and missing hints keep `other` first.
fn is_above(block: &AnnotationBlock, other: &AnnotationBlock) -> bool {
    match (block.bounds_hint, other.bounds_hint) {
        (Some(left), Some(right)) => left.min_y < right.min_y,
        _ => false,
    }
}

/// Original hint clipped at the boundary, or the side's stroke extent when
/// clipping leaves nothing.
fn side_hint(
    original: Option<LineBounds>,
    side: SplitSide,
    boundary_y: f64,
    live: &[&Stroke],
) -> Option<LineBounds> {
    let clipped = original.map(|hint| match side {
        SplitSide::Above => LineBounds::new(hint.min_y, hint.max_y.min(boundary_y)),
        SplitSide::Below => LineBounds::new(hint.min_y.max(boundary_y), hint.max_y),
    });
    clipped.filter(LineBounds::is_valid).or_else(|| {
        let extents: Vec<LineBounds> = live
            .iter()
            .filter_map(|stroke| stroke.vertical_extent())
            .map(|(min_y, max_y)| LineBounds::new(min_y, max_y))
            .collect();
        union_bounds(&extents)
    })
}

#[cfg(test)]
mod tests {
    use super::{apply_edit, plan_merge, plan_split, EditError, MergeRequest, SplitRequest};
    use crate::model::block::{AnnotationBlock, BlockArena};
    use crate::model::line::LineBounds;
    use crate::model::stroke::{Stroke, StrokePoint};
    use crate::reconcile::spatial::SplitSide;
    use crate::store::stroke_store::StrokeStore;

    const PAGE: &str = "page-1";

    fn block(content: &str, min_y: f64, max_y: f64) -> AnnotationBlock {
        let mut block = AnnotationBlock::new(PAGE, content);
        block.canonical_snapshot = content.to_string();
        block.bounds_hint = Some(LineBounds::new(min_y, max_y));
        block
    }

    fn stroke(id: i64, top: f64, bottom: f64, owner: &AnnotationBlock) -> Stroke {
        let mut stroke = Stroke::with_id(
            id,
            vec![
                StrokePoint::new(0.0, top, id),
                StrokePoint::new(1.0, bottom, id + 1),
            ],
        );
        stroke.block_ref = Some(owner.id);
        stroke
    }

    #[test]
    fn merge_moves_all_strokes_and_joins_snapshots_top_first() {
        let lower = block("Call Sam", 20.0, 30.0);
        let upper = block("Buy milk", 0.0, 10.0);
        let mut child = AnnotationBlock::new(PAGE, "child");
        child.parent_id = Some(upper.id);
        let mut arena = BlockArena::from_blocks([lower.clone(), upper.clone(), child.clone()]);
        let mut strokes = StrokeStore::from_strokes([
            stroke(1, 0.0, 10.0, &upper),
            stroke(2, 0.0, 10.0, &upper),
            stroke(3, 20.0, 30.0, &lower),
        ]);
        strokes.mark_deleted(2).unwrap();

        let plan = plan_merge(
            &arena,
            &strokes,
            &MergeRequest {
                survivor: lower.id,
                absorbed: upper.id,
                merged_content: None,
            },
        )
        .unwrap();
        apply_edit(&mut arena, &mut strokes, &plan.commit);

        let merged = arena.get(lower.id).unwrap();
        assert_eq!(merged.canonical_snapshot, "Buy milk Call Sam");
        assert_eq!(merged.content, "Buy milk\nCall Sam");
        assert_eq!(merged.bounds_hint, Some(LineBounds::new(0.0, 30.0)));
        assert!(!arena.contains(upper.id));
        assert_eq!(arena.parent_of(child.id), Some(lower.id));
        assert!(strokes.referencing_strokes(upper.id).is_empty());
        assert_eq!(strokes.referencing_strokes(lower.id).len(), 3);
    }

    #[test]
    fn merge_rejects_self_and_unknown_blocks() {
        let only = block("a", 0.0, 1.0);
        let arena = BlockArena::from_blocks([only.clone()]);
        let strokes = StrokeStore::new();
        let request = |absorbed| MergeRequest {
            survivor: only.id,
            absorbed,
            merged_content: None,
        };

        assert_eq!(
            plan_merge(&arena, &strokes, &request(only.id)),
            Err(EditError::SelfMerge(only.id))
        );
        let missing = AnnotationBlock::new(PAGE, "gone").id;
        assert_eq!(
            plan_merge(&arena, &strokes, &request(missing)),
            Err(EditError::BlockNotFound(missing))
        );
    }

    #[test]
    fn split_partitions_strokes_at_boundary() {
        let original = block("Buy milk Call Sam", 0.0, 30.0);
        let mut arena = BlockArena::from_blocks([original.clone()]);
        let mut strokes = StrokeStore::from_strokes([
            stroke(1, 0.0, 10.0, &original),
            stroke(2, 8.0, 16.0, &original),
            stroke(3, 20.0, 30.0, &original),
        ]);

        let plan = plan_split(
            &arena,
            &strokes,
            &SplitRequest {
                block_id: original.id,
                boundary_y: 15.0,
                upper_content: "Buy milk".to_string(),
                lower_content: " Call  Sam".to_string(),
            },
        )
        .unwrap();
        apply_edit(&mut arena, &mut strokes, &plan.commit);

        let lower_id = plan.created.unwrap();
        let upper = arena.get(original.id).unwrap();
        let lower = arena.get(lower_id).unwrap();
        assert_eq!(upper.canonical_snapshot, "Buy milk");
        assert_eq!(lower.canonical_snapshot, "Call Sam");
        assert_eq!(upper.bounds_hint, Some(LineBounds::new(0.0, 15.0)));
        assert_eq!(lower.bounds_hint, Some(LineBounds::new(15.0, 30.0)));
        assert_eq!(arena.ids().last(), Some(&lower_id));
        assert_eq!(strokes.strokes_for_block(original.id).len(), 2);
        assert_eq!(strokes.strokes_for_block(lower_id).len(), 1);
    }

    #[test]
    fn split_rejects_an_empty_side() {
        let original = block("Buy milk", 0.0, 10.0);
        let arena = BlockArena::from_blocks([original.clone()]);
        let strokes = StrokeStore::from_strokes([stroke(1, 0.0, 10.0, &original)]);

        let result = plan_split(
            &arena,
            &strokes,
            &SplitRequest {
                block_id: original.id,
                boundary_y: 20.0,
                upper_content: "Buy milk".to_string(),
                lower_content: String::new(),
            },
        );
        assert_eq!(result, Err(EditError::EmptySplitSide(SplitSide::Below)));
    }
}
