//! Persistence gateway contract for blocks and stroke associations.
//!
//! # Responsibility
//! - Define the storage operations the reconciliation workflow depends on.
//! - Define the atomic edit commit used by block merge and split.
//!
//! # Invariants
//! - Block properties are limited to the canonical snapshot and bounds hint.
//! - Stroke association lives on stroke records, never as a list on blocks.
//! - `write_strokes` is an upsert that round-trips `block_ref` and tombstones.
//! - `commit_edit` applies all of its parts or none of them.

use crate::db::DbError;
use crate::model::block::{AnnotationBlock, BlockId, BlockProperties, BlockValidationError};
use crate::model::stroke::Stroke;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Storage-layer failure.
#[derive(Debug)]
pub enum GatewayError {
    /// Underlying database error.
    Db(DbError),
    /// Target block does not exist or is deleted.
    BlockNotFound(BlockId),
    /// Block failed validation before write.
    Validation(BlockValidationError),
    /// Persisted data cannot be converted into the domain model.
    InvalidData(String),
    /// Store is unreachable or rejected the call.
    Unavailable(String),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
}

impl Display for GatewayError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::BlockNotFound(id) => write!(f, "block not found: {id}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::Unavailable(message) => write!(f, "block store unavailable: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "gateway requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => write!(f, "gateway requires table `{table}`"),
        }
    }
}

impl Error for GatewayError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Validation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for GatewayError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for GatewayError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<BlockValidationError> for GatewayError {
    fn from(value: BlockValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Block-structure change and stroke rewrites persisted as one unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditCommit {
    /// New or changed blocks, written in order.
    pub upserts: Vec<AnnotationBlock>,
    /// Blocks removed by the edit.
    pub removals: Vec<BlockId>,
    /// Strokes with their post-edit `block_ref`.
    pub strokes: Vec<Stroke>,
}

impl EditCommit {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removals.is_empty() && self.strokes.is_empty()
    }
}

/// Storage operations used by reconciliation and edits.
pub trait PersistenceGateway {
    /// Lists active blocks of one page in creation order.
    fn list_blocks(&self, page_id: &str) -> GatewayResult<Vec<AnnotationBlock>>;
    /// Creates one block; parent ref and properties travel on the block.
    fn create_block(&self, page_id: &str, block: &AnnotationBlock) -> GatewayResult<()>;
    /// Replaces content and properties of one active block.
    fn update_block_content(
        &self,
        block_id: BlockId,
        content: &str,
        properties: &BlockProperties,
    ) -> GatewayResult<()>;
    /// Removes one block from the active set.
    fn delete_block(&self, block_id: BlockId) -> GatewayResult<()>;
    /// Reads every stroke of one page, tombstones included.
    fn read_strokes(&self, page_id: &str) -> GatewayResult<Vec<Stroke>>;
    /// Upserts strokes of one page.
    fn write_strokes(&self, page_id: &str, strokes: &[Stroke]) -> GatewayResult<()>;
    /// Persists a merge/split atomically.
    fn commit_edit(&self, page_id: &str, edit: &EditCommit) -> GatewayResult<()>;
}

impl<G: PersistenceGateway + ?Sized> PersistenceGateway for &G {
    fn list_blocks(&self, page_id: &str) -> GatewayResult<Vec<AnnotationBlock>> {
        (**self).list_blocks(page_id)
    }

    fn create_block(&self, page_id: &str, block: &AnnotationBlock) -> GatewayResult<()> {
        (**self).create_block(page_id, block)
    }

    fn update_block_content(
        &self,
        block_id: BlockId,
        content: &str,
        properties: &BlockProperties,
    ) -> GatewayResult<()> {
        (**self).update_block_content(block_id, content, properties)
    }

    fn delete_block(&self, block_id: BlockId) -> GatewayResult<()> {
        (**self).delete_block(block_id)
    }

    fn read_strokes(&self, page_id: &str) -> GatewayResult<Vec<Stroke>> {
        (**self).read_strokes(page_id)
    }

    fn write_strokes(&self, page_id: &str, strokes: &[Stroke]) -> GatewayResult<()> {
        (**self).write_strokes(page_id, strokes)
    }

    fn commit_edit(&self, page_id: &str, edit: &EditCommit) -> GatewayResult<()> {
        (**self).commit_edit(page_id, edit)
    }
}
