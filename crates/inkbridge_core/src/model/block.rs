//! Annotation block model and hierarchy arena.
//!
//! # Responsibility
//! - Define the persisted, user-editable text block.
//! - Define the two persisted block properties (bounds hint, canonical snapshot).
//! - Rebuild parent/child structure on demand from explicit parent ids.
//!
//! # Invariants
//! - `id` is stable and never reused for another block.
//! - `canonical_snapshot` is the canonical text of the last successful match
//!   and is the only "nothing changed" criterion.
//! - Blocks never store their stroke list; see `StrokeStore`.

use crate::model::line::LineBounds;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier for annotation blocks.
pub type BlockId = Uuid;

/// Identifier of the page a block or stroke lives on.
pub type PageId = String;

/// Validation failures for block records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockValidationError {
    /// Page id is blank.
    EmptyPageId,
    /// Block lists itself as parent.
    SelfParent(BlockId),
    /// Bounds hint is non-finite or inverted.
    InvalidBoundsHint(BlockId),
}

impl Display for BlockValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyPageId => write!(f, "block page id must not be blank"),
            Self::SelfParent(id) => write!(f, "block cannot be its own parent: {id}"),
            Self::InvalidBoundsHint(id) => write!(f, "block has invalid bounds hint: {id}"),
        }
    }
}

impl Error for BlockValidationError {}

/// Properties persisted alongside block content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockProperties {
    pub canonical_snapshot: String,
    pub bounds_hint: Option<LineBounds>,
}

/// Persisted, user-editable unit of text backed by zero or more strokes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationBlock {
    pub id: BlockId,
    pub page_id: PageId,
    /// Parent block. `None` means the block sits directly under the page.
    pub parent_id: Option<BlockId>,
    /// User-editable text. May diverge from recognized text.
    pub content: String,
    pub canonical_snapshot: String,
    /// Vertical bounds at last match; used only for legacy fallback matching.
    pub bounds_hint: Option<LineBounds>,
}

impl AnnotationBlock {
    /// Creates a root-level block with a generated id.
    pub fn new(page_id: impl Into<PageId>, content: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), page_id, content)
    }

    /// Creates a root-level block with a caller-provided id.
    pub fn with_id(id: BlockId, page_id: impl Into<PageId>, content: impl Into<String>) -> Self {
        Self {
            id,
            page_id: page_id.into(),
            parent_id: None,
            content: content.into(),
            canonical_snapshot: String::new(),
            bounds_hint: None,
        }
    }

    /// Returns the persisted property bag for this block.
    pub fn properties(&self) -> BlockProperties {
        BlockProperties {
            canonical_snapshot: self.canonical_snapshot.clone(),
            bounds_hint: self.bounds_hint,
        }
    }

    /// Overwrites content and properties in one step.
    pub fn apply_content(&mut self, content: impl Into<String>, properties: BlockProperties) {
        self.content = content.into();
        self.canonical_snapshot = properties.canonical_snapshot;
        self.bounds_hint = properties.bounds_hint;
    }

    /// Checks structural invariants before persistence.
    pub fn validate(&self) -> Result<(), BlockValidationError> {
        if self.page_id.trim().is_empty() {
            return Err(BlockValidationError::EmptyPageId);
        }
        if self.parent_id == Some(self.id) {
            return Err(BlockValidationError::SelfParent(self.id));
        }
        if let Some(bounds) = &self.bounds_hint {
            if !bounds.is_valid() {
                return Err(BlockValidationError::InvalidBoundsHint(self.id));
            }
        }
        Ok(())
    }
}

/// Arena of one page's blocks, indexed by id, in creation order.
///
/// Children are derived from `parent_id` on demand; a parent that is not in
/// the arena makes the child a root.
#[derive(Debug, Clone, Default)]
pub struct BlockArena {
    order: Vec<BlockId>,
    blocks: HashMap<BlockId, AnnotationBlock>,
}

impl BlockArena {
    /// Builds an arena from blocks listed in creation order.
    ///
    /// A duplicated id keeps its first occurrence.
    pub fn from_blocks(blocks: impl IntoIterator<Item = AnnotationBlock>) -> Self {
        let mut arena = Self::default();
        for block in blocks {
            arena.push(block);
        }
        arena
    }

    /// Appends a block at the end of creation order. Returns false on duplicate id.
    pub fn push(&mut self, block: AnnotationBlock) -> bool {
        if self.blocks.contains_key(&block.id) {
            return false;
        }
        self.order.push(block.id);
        self.blocks.insert(block.id, block);
        true
    }

    /// Removes a block; its children become roots unless reparented first.
    pub fn remove(&mut self, id: BlockId) -> Option<AnnotationBlock> {
        let removed = self.blocks.remove(&id)?;
        self.order.retain(|existing| *existing != id);
        Some(removed)
    }

    pub fn get(&self, id: BlockId) -> Option<&AnnotationBlock> {
        self.blocks.get(&id)
    }

    pub fn get_mut(&mut self, id: BlockId) -> Option<&mut AnnotationBlock> {
        self.blocks.get_mut(&id)
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.blocks.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Block ids in creation order.
    pub fn ids(&self) -> &[BlockId] {
        &self.order
    }

    /// Blocks in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &AnnotationBlock> {
        self.order.iter().filter_map(|id| self.blocks.get(id))
    }

    /// Effective parent: `None` when unset or when the parent is not in the arena.
    pub fn parent_of(&self, id: BlockId) -> Option<BlockId> {
        self.blocks
            .get(&id)?
            .parent_id
            .filter(|parent| self.blocks.contains_key(parent))
    }

    /// Children of `parent` (or page roots for `None`) in creation order.
    pub fn children_of(&self, parent: Option<BlockId>) -> Vec<BlockId> {
        self.order
            .iter()
            .copied()
            .filter(|id| self.parent_of(*id) == parent)
            .collect()
    }

    /// Full parent -> children index, rebuilt from parent ids.
    pub fn children_index(&self) -> BTreeMap<Option<BlockId>, Vec<BlockId>> {
        let mut index: BTreeMap<Option<BlockId>, Vec<BlockId>> = BTreeMap::new();
        for id in &self.order {
            index.entry(self.parent_of(*id)).or_default().push(*id);
        }
        index
    }

    /// Returns whether `ancestor` appears on the parent chain of `id`.
    ///
    /// Cyclic parent chains stop at the first repeated node.
    pub fn is_ancestor(&self, ancestor: BlockId, id: BlockId) -> bool {
        let mut visited = HashSet::new();
        let mut cursor = self.parent_of(id);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            if !visited.insert(current) {
                return false;
            }
            cursor = self.parent_of(current);
        }
        false
    }
}
