//! In-memory stroke collection with block association bookkeeping.
//!
//! # Responsibility
//! - Own one page's strokes, keyed and ordered by capture start time.
//! - Answer association queries (unassociated, per block, liveness).
//! - Perform single and bulk `block_ref` reassignment.
//!
//! # Invariants
//! - A stroke references at most one block.
//! - `unassociated_strokes()` is the complement of the union of all live
//!   block stroke sets within the live stroke set.
//! - Tombstoned strokes are never returned as unassociated or live members.

use crate::model::block::BlockId;
use crate::model::stroke::{Stroke, StrokeId};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors from stroke store mutations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrokeStoreError {
    /// Target stroke id is not in the store.
    StrokeNotFound(StrokeId),
}

impl Display for StrokeStoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StrokeNotFound(id) => write!(f, "stroke not found: {id}"),
        }
    }
}

impl Error for StrokeStoreError {}

/// Page-scoped stroke collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrokeStore {
    strokes: BTreeMap<StrokeId, Stroke>,
}

impl StrokeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from one source; later duplicates replace earlier ones.
    pub fn from_strokes(strokes: impl IntoIterator<Item = Stroke>) -> Self {
        let mut store = Self::new();
        for stroke in strokes {
            store.upsert(stroke);
        }
        store
    }

    /// Builds a store from several sources deduplicated by stroke id.
    ///
    /// Sources are ordered by authority (remote first). For a duplicated id:
    /// a tombstone in any source wins; otherwise the first source that records
    /// an association wins; otherwise the first copy is kept.
    pub fn merge_sources<'a>(sources: impl IntoIterator<Item = &'a [Stroke]>) -> Self {
        let mut store = Self::new();
        for source in sources {
            for stroke in source {
                match store.strokes.get_mut(&stroke.id) {
                    None => {
                        store.strokes.insert(stroke.id, stroke.clone());
                    }
                    Some(existing) => {
                        if stroke.is_deleted {
                            existing.is_deleted = true;
                        }
                        if existing.block_ref.is_none() {
                            existing.block_ref = stroke.block_ref;
                        }
                    }
                }
            }
        }
        store
    }

    /// Inserts or replaces one stroke. Returns the previous copy, if any.
    pub fn upsert(&mut self, stroke: Stroke) -> Option<Stroke> {
        self.strokes.insert(stroke.id, stroke)
    }

    /// Inserts a stroke only if its id is unknown. Returns whether it was added.
    pub fn insert_new(&mut self, stroke: Stroke) -> bool {
        if self.strokes.contains_key(&stroke.id) {
            return false;
        }
        self.strokes.insert(stroke.id, stroke);
        true
    }

    pub fn get(&self, id: StrokeId) -> Option<&Stroke> {
        self.strokes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.strokes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty()
    }

    /// All strokes, tombstones included, ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = &Stroke> {
        self.strokes.values()
    }

    /// Live strokes ordered by id.
    pub fn live_strokes(&self) -> Vec<&Stroke> {
        self.strokes.values().filter(|stroke| stroke.is_live()).collect()
    }

    /// Sets or clears one stroke's block association.
    pub fn assign_block(
        &mut self,
        stroke_id: StrokeId,
        block_id: Option<BlockId>,
    ) -> Result<(), StrokeStoreError> {
        let stroke = self
            .strokes
            .get_mut(&stroke_id)
            .ok_or(StrokeStoreError::StrokeNotFound(stroke_id))?;
        stroke.block_ref = block_id;
        Ok(())
    }

    /// Live strokes currently backing `block_id`.
    pub fn strokes_for_block(&self, block_id: BlockId) -> Vec<&Stroke> {
        self.strokes
            .values()
            .filter(|stroke| stroke.is_live() && stroke.block_ref == Some(block_id))
            .collect()
    }

    /// Every stroke referencing `block_id`, tombstones included.
    pub fn referencing_strokes(&self, block_id: BlockId) -> Vec<&Stroke> {
        self.strokes
            .values()
            .filter(|stroke| stroke.block_ref == Some(block_id))
            .collect()
    }

    /// Live strokes eligible for the next recognition call.
    pub fn unassociated_strokes(&self) -> Vec<&Stroke> {
        self.strokes
            .values()
            .filter(|stroke| stroke.is_live() && stroke.block_ref.is_none())
            .collect()
    }

    /// Ids of live strokes, used for orphan liveness checks.
    pub fn existing_stroke_ids(&self) -> BTreeSet<StrokeId> {
        self.strokes
            .values()
            .filter(|stroke| stroke.is_live())
            .map(|stroke| stroke.id)
            .collect()
    }

    /// Tombstones one stroke, keeping its association.
    pub fn mark_deleted(&mut self, stroke_id: StrokeId) -> Result<(), StrokeStoreError> {
        let stroke = self
            .strokes
            .get_mut(&stroke_id)
            .ok_or(StrokeStoreError::StrokeNotFound(stroke_id))?;
        stroke.is_deleted = true;
        Ok(())
    }

    /// Points every stroke referencing `from` at `to`. Returns touched ids.
    pub fn reassign_all(&mut self, from: BlockId, to: Option<BlockId>) -> Vec<StrokeId> {
        let mut touched = Vec::new();
        for stroke in self.strokes.values_mut() {
            if stroke.block_ref == Some(from) {
                stroke.block_ref = to;
                touched.push(stroke.id);
            }
        }
        touched
    }

    /// Clears references to blocks outside `known_blocks`. Returns touched ids.
    pub fn release_dangling(&mut self, known_blocks: &HashSet<BlockId>) -> Vec<StrokeId> {
        let mut touched = Vec::new();
        for stroke in self.strokes.values_mut() {
            if let Some(block_id) = stroke.block_ref {
                if !known_blocks.contains(&block_id) {
                    stroke.block_ref = None;
                    touched.push(stroke.id);
                }
            }
        }
        touched
    }

    /// Clones of the given strokes with `block_ref` replaced.
    ///
    /// Unknown ids are skipped. Used to stage writes before they are applied.
    pub fn staged_assignment(&self, ids: &[StrokeId], block_id: Option<BlockId>) -> Vec<Stroke> {
        ids.iter()
            .filter_map(|id| self.strokes.get(id))
            .map(|stroke| {
                let mut staged = stroke.clone();
                staged.block_ref = block_id;
                staged
            })
            .collect()
    }

    /// Clones of the given strokes as currently stored.
    pub fn snapshot_of(&self, ids: &[StrokeId]) -> Vec<Stroke> {
        ids.iter()
            .filter_map(|id| self.strokes.get(id).cloned())
            .collect()
    }
}
