//! SQLite implementation of the persistence gateway.
//!
//! # Responsibility
//! - Store annotation blocks and page strokes in the local database.
//! - Keep SQL details and transaction boundaries inside the gateway.
//!
//! # Invariants
//! - Blocks are soft-deleted; listing returns active blocks by `created_seq`.
//! - Stroke geometry is written once; upserts only change `block_uuid` and
//!   `is_deleted`.
//! - `commit_edit` runs in one immediate transaction.

use crate::db::migrations::latest_version;
use crate::model::block::{AnnotationBlock, BlockId, BlockProperties};
use crate::model::line::LineBounds;
use crate::model::stroke::{Stroke, StrokePoint};
use crate::repo::gateway::{EditCommit, GatewayError, GatewayResult, PersistenceGateway};
use rusqlite::{params, Connection, Row, Transaction, TransactionBehavior};
use uuid::Uuid;

const BLOCK_SELECT_SQL: &str = "SELECT
    block_uuid,
    page_id,
    parent_uuid,
    content,
    canonical_snapshot,
    bounds_hint
FROM annotation_blocks";

/// SQLite-backed gateway over a migrated connection.
pub struct SqliteGateway<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteGateway<'conn> {
    /// Creates a gateway from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> GatewayResult<Self> {
        ensure_gateway_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl PersistenceGateway for SqliteGateway<'_> {
    fn list_blocks(&self, page_id: &str) -> GatewayResult<Vec<AnnotationBlock>> {
        let mut stmt = self.conn.prepare(&format!(
            "{BLOCK_SELECT_SQL}
             WHERE page_id = ?1
               AND is_deleted = 0
             ORDER BY created_seq ASC, block_uuid ASC;"
        ))?;
        let mut rows = stmt.query([page_id])?;
        let mut blocks = Vec::new();
        while let Some(row) = rows.next()? {
            blocks.push(parse_block_row(row)?);
        }
        Ok(blocks)
    }

    fn create_block(&self, page_id: &str, block: &AnnotationBlock) -> GatewayResult<()> {
        insert_block(self.conn, page_id, block)
    }

    fn update_block_content(
        &self,
        block_id: BlockId,
        content: &str,
        properties: &BlockProperties,
    ) -> GatewayResult<()> {
        if properties.bounds_hint.is_some_and(|hint| !hint.is_valid()) {
            return Err(GatewayError::InvalidData(format!(
                "invalid bounds hint for block {block_id}"
            )));
        }
        let changed = self.conn.execute(
            "UPDATE annotation_blocks
             SET
                content = ?1,
                canonical_snapshot = ?2,
                bounds_hint = ?3,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE block_uuid = ?4
               AND is_deleted = 0;",
            params![
                content,
                properties.canonical_snapshot.as_str(),
                properties.bounds_hint.map(|hint| hint.to_hint()),
                block_id.to_string(),
            ],
        )?;
        if changed == 0 {
            return Err(GatewayError::BlockNotFound(block_id));
        }
        Ok(())
    }

    fn delete_block(&self, block_id: BlockId) -> GatewayResult<()> {
        soft_delete_block(self.conn, block_id)
    }

    fn read_strokes(&self, page_id: &str) -> GatewayResult<Vec<Stroke>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                stroke_id,
                points_json,
                block_uuid,
                is_deleted
             FROM strokes
             WHERE page_id = ?1
             ORDER BY stroke_id ASC;",
        )?;
        let mut rows = stmt.query([page_id])?;
        let mut strokes = Vec::new();
        while let Some(row) = rows.next()? {
            strokes.push(parse_stroke_row(row)?);
        }
        Ok(strokes)
    }

    fn write_strokes(&self, page_id: &str, strokes: &[Stroke]) -> GatewayResult<()> {
        if strokes.is_empty() {
            return Ok(());
        }
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        upsert_strokes(&tx, page_id, strokes)?;
        tx.commit()?;
        Ok(())
    }

    fn commit_edit(&self, page_id: &str, edit: &EditCommit) -> GatewayResult<()> {
        if edit.is_empty() {
            return Ok(());
        }
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        for block in &edit.upserts {
            upsert_block(&tx, page_id, block)?;
        }
        for block_id in &edit.removals {
            soft_delete_block(&tx, *block_id)?;
        }
        upsert_strokes(&tx, page_id, &edit.strokes)?;
        tx.commit()?;
        Ok(())
    }
}

fn insert_block(conn: &Connection, page_id: &str, block: &AnnotationBlock) -> GatewayResult<()> {
    block.validate()?;
    if block.page_id != page_id {
        return Err(GatewayError::InvalidData(format!(
            "block {} belongs to page `{}`, not `{page_id}`",
            block.id, block.page_id
        )));
    }
    let created_seq = next_created_seq(conn, page_id)?;
    conn.execute(
        "INSERT INTO annotation_blocks (
            block_uuid,
            page_id,
            parent_uuid,
            content,
            canonical_snapshot,
            bounds_hint,
            created_seq,
            is_deleted
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0);",
        params![
            block.id.to_string(),
            page_id,
            block.parent_id.map(|value| value.to_string()),
            block.content.as_str(),
            block.canonical_snapshot.as_str(),
            block.bounds_hint.map(|hint| hint.to_hint()),
            created_seq,
        ],
    )?;
    Ok(())
}

fn upsert_block(conn: &Connection, page_id: &str, block: &AnnotationBlock) -> GatewayResult<()> {
    block.validate()?;
    let changed = conn.execute(
        "UPDATE annotation_blocks
         SET
            parent_uuid = ?1,
            content = ?2,
            canonical_snapshot = ?3,
            bounds_hint = ?4,
            updated_at = (strftime('%s', 'now') * 1000)
         WHERE block_uuid = ?5
           AND page_id = ?6
           AND is_deleted = 0;",
        params![
            block.parent_id.map(|value| value.to_string()),
            block.content.as_str(),
            block.canonical_snapshot.as_str(),
            block.bounds_hint.map(|hint| hint.to_hint()),
            block.id.to_string(),
            page_id,
        ],
    )?;
    if changed == 0 {
        insert_block(conn, page_id, block)?;
    }
    Ok(())
}

fn soft_delete_block(conn: &Connection, block_id: BlockId) -> GatewayResult<()> {
    let changed = conn.execute(
        "UPDATE annotation_blocks
         SET
            is_deleted = 1,
            updated_at = (strftime('%s', 'now') * 1000)
         WHERE block_uuid = ?1
           AND is_deleted = 0;",
        [block_id.to_string()],
    )?;
    if changed == 0 {
        return Err(GatewayError::BlockNotFound(block_id));
    }
    Ok(())
}

fn upsert_strokes(conn: &Connection, page_id: &str, strokes: &[Stroke]) -> GatewayResult<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO strokes (
            page_id,
            stroke_id,
            points_json,
            block_uuid,
            is_deleted
        ) VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(page_id, stroke_id) DO UPDATE SET
            block_uuid = excluded.block_uuid,
            is_deleted = excluded.is_deleted,
            updated_at = (strftime('%s', 'now') * 1000);",
    )?;
    for stroke in strokes {
        let points_json = serde_json::to_string(&stroke.points).map_err(|err| {
            GatewayError::InvalidData(format!("cannot encode stroke {}: {err}", stroke.id))
        })?;
        stmt.execute(params![
            page_id,
            stroke.id,
            points_json,
            stroke.block_ref.map(|value| value.to_string()),
            bool_to_int(stroke.is_deleted),
        ])?;
    }
    Ok(())
}

fn next_created_seq(conn: &Connection, page_id: &str) -> GatewayResult<i64> {
    let next = conn.query_row(
        "SELECT COALESCE(MAX(created_seq), -1) + 1
         FROM annotation_blocks
         WHERE page_id = ?1;",
        [page_id],
        |row| row.get(0),
    )?;
    Ok(next)
}

fn parse_block_row(row: &Row<'_>) -> GatewayResult<AnnotationBlock> {
    let id = parse_uuid(&row.get::<_, String>("block_uuid")?, "annotation_blocks.block_uuid")?;
    let parent_id = match row.get::<_, Option<String>>("parent_uuid")? {
        Some(value) => Some(parse_uuid(&value, "annotation_blocks.parent_uuid")?),
        None => None,
    };
    let bounds_hint = match row.get::<_, Option<String>>("bounds_hint")? {
        Some(value) => Some(LineBounds::parse_hint(&value).map_err(|err| {
            GatewayError::InvalidData(format!("{err} in annotation_blocks.bounds_hint"))
        })?),
        None => None,
    };

    let block = AnnotationBlock {
        id,
        page_id: row.get("page_id")?,
        parent_id,
        content: row.get("content")?,
        canonical_snapshot: row.get("canonical_snapshot")?,
        bounds_hint,
    };
    block.validate()?;
    Ok(block)
}

fn parse_stroke_row(row: &Row<'_>) -> GatewayResult<Stroke> {
    let id: i64 = row.get("stroke_id")?;
    let points_json: String = row.get("points_json")?;
    let points: Vec<StrokePoint> = serde_json::from_str(&points_json).map_err(|err| {
        GatewayError::InvalidData(format!("invalid points for stroke {id}: {err}"))
    })?;
    let block_ref = match row.get::<_, Option<String>>("block_uuid")? {
        Some(value) => Some(parse_uuid(&value, "strokes.block_uuid")?),
        None => None,
    };
    let is_deleted = match row.get::<_, i64>("is_deleted")? {
        0 => false,
        1 => true,
        other => {
            return Err(GatewayError::InvalidData(format!(
                "invalid is_deleted value `{other}` in strokes.is_deleted"
            )));
        }
    };

    Ok(Stroke {
        id,
        points,
        block_ref,
        is_deleted,
    })
}

fn parse_uuid(value: &str, column: &'static str) -> GatewayResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| GatewayError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

fn ensure_gateway_connection_ready(conn: &Connection) -> GatewayResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(GatewayError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in ["annotation_blocks", "strokes"] {
        if !table_exists(conn, table)? {
            return Err(GatewayError::MissingRequiredTable(table));
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> GatewayResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}
