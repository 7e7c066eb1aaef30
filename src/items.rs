//! Item collection boundary.
//!
//! The classifier does not own the media items; it only reads tag sets and
//! writes or removes the predicted label. [`ItemStore`] is that boundary,
//! and [`SqliteItemStore`] is the shipped implementation backing the CLI
//! and the test suite.

use std::collections::HashMap;
use std::path::Path;

use rusqlite::{Connection, params};

use crate::error::{Result, TagwiseError, from_sqlite};
use crate::model::{LabelSource, ModelKind};

/// An item with its tag set, as read for inference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedItem {
    pub id: i64,
    pub tags: Vec<String>,
}

/// An item with a trusted label, as read for training.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledItem {
    pub id: i64,
    pub label: String,
    pub tags: Vec<String>,
}

/// A stored label assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelAssignment {
    pub label: String,
    pub source: LabelSource,
    pub confidence: Option<f64>,
}

/// Access to the external item collection. Implementations must return
/// training data from trusted sources only; machine-predicted labels never
/// feed back into training.
pub trait ItemStore {
    /// Items carrying a trusted label for this model.
    fn count_labeled(&self, model: ModelKind) -> Result<u64>;

    /// One page of trusted-labeled items, ordered by id.
    fn labeled_batch(&self, model: ModelKind, limit: usize, offset: u64)
    -> Result<Vec<LabeledItem>>;

    /// Items with no label at all for this model.
    fn count_unlabeled(&self, model: ModelKind) -> Result<u64>;

    /// One page of unlabeled items with id greater than `after_id`, ordered
    /// by id. Keyset pagination stays deterministic even as labels are
    /// written between pages.
    fn unlabeled_after(
        &self,
        model: ModelKind,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<TaggedItem>>;

    /// Tag set of one item, `None` when the item does not exist.
    fn item_tags(&self, item_id: i64) -> Result<Option<Vec<String>>>;

    fn current_label(&self, model: ModelKind, item_id: i64) -> Result<Option<LabelAssignment>>;

    /// Replace the item's label for this model. Any prior label is cleared
    /// first; `None` leaves the item unlabeled.
    fn write_label(
        &self,
        model: ModelKind,
        item_id: i64,
        label: Option<&str>,
        source: LabelSource,
        confidence: Option<f64>,
    ) -> Result<()>;

    /// Remove every machine-applied label for this model. Returns the number
    /// of labels cleared. This is the first step of disaster recovery.
    fn clear_machine_labels(&self, model: ModelKind) -> Result<u64>;

    /// Current label counts by label name, all sources.
    fn label_distribution(&self, model: ModelKind) -> Result<HashMap<String, u64>>;
}

const ITEM_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY AUTOINCREMENT
);

CREATE TABLE IF NOT EXISTS item_tags (
    item_id INTEGER NOT NULL REFERENCES items(id),
    tag     TEXT NOT NULL,
    PRIMARY KEY (item_id, tag)
);

CREATE TABLE IF NOT EXISTS item_labels (
    item_id    INTEGER NOT NULL REFERENCES items(id),
    model      TEXT NOT NULL,
    label      TEXT NOT NULL,
    source     TEXT NOT NULL,
    confidence REAL,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (item_id, model)
);

CREATE INDEX IF NOT EXISTS idx_item_labels_model ON item_labels(model, label);
";

/// SQLite-backed item store.
pub struct SqliteItemStore {
    conn: Connection,
}

impl std::fmt::Debug for SqliteItemStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteItemStore").finish_non_exhaustive()
    }
}

impl SqliteItemStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
            .map_err(from_sqlite)?;
        conn.pragma_update(None, "busy_timeout", 30_000)
            .map_err(from_sqlite)?;
        conn.execute_batch(ITEM_SCHEMA).map_err(from_sqlite)?;
        Ok(Self { conn })
    }

    /// Insert an item with its tags. Used by import tooling and tests.
    pub fn add_item(&self, tags: &[&str]) -> Result<i64> {
        self.conn
            .execute("INSERT INTO items DEFAULT VALUES", [])
            .map_err(from_sqlite)?;
        let id = self.conn.last_insert_rowid();
        let mut stmt = self
            .conn
            .prepare_cached("INSERT OR IGNORE INTO item_tags(item_id, tag) VALUES (?, ?)")?;
        for tag in tags {
            stmt.execute(params![id, tag]).map_err(from_sqlite)?;
        }
        Ok(id)
    }

    fn tags_for(&self, item_id: i64) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT tag FROM item_tags WHERE item_id = ? ORDER BY tag")?;
        let rows = stmt.query_map([item_id], |row| row.get(0))?;
        let mut tags = Vec::new();
        for row in rows {
            tags.push(row?);
        }
        Ok(tags)
    }

    fn item_exists(&self, item_id: i64) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row("SELECT count(*) FROM items WHERE id = ?", [item_id], |row| {
                row.get(0)
            })?;
        Ok(count > 0)
    }
}

impl ItemStore for SqliteItemStore {
    fn count_labeled(&self, model: ModelKind) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT count(*) FROM item_labels WHERE model = ? AND source IN ('user', 'import')",
            [model.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn labeled_batch(
        &self,
        model: ModelKind,
        limit: usize,
        offset: u64,
    ) -> Result<Vec<LabeledItem>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT item_id, label FROM item_labels
             WHERE model = ? AND source IN ('user', 'import')
             ORDER BY item_id LIMIT ? OFFSET ?",
        )?;
        let rows = stmt.query_map(
            params![model.as_str(), limit as i64, offset as i64],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
        )?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }

        let mut out = Vec::with_capacity(ids.len());
        for (id, label) in ids {
            out.push(LabeledItem {
                id,
                label,
                tags: self.tags_for(id)?,
            });
        }
        Ok(out)
    }

    fn count_unlabeled(&self, model: ModelKind) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT count(*) FROM items i
             LEFT JOIN item_labels il ON il.item_id = i.id AND il.model = ?
             WHERE il.item_id IS NULL",
            [model.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn unlabeled_after(
        &self,
        model: ModelKind,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<TaggedItem>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT i.id FROM items i
             LEFT JOIN item_labels il ON il.item_id = i.id AND il.model = ?
             WHERE il.item_id IS NULL AND i.id > ?
             ORDER BY i.id LIMIT ?",
        )?;
        let rows = stmt.query_map(params![model.as_str(), after_id, limit as i64], |row| {
            row.get::<_, i64>(0)
        })?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push(TaggedItem {
                id,
                tags: self.tags_for(id)?,
            });
        }
        Ok(out)
    }

    fn item_tags(&self, item_id: i64) -> Result<Option<Vec<String>>> {
        if !self.item_exists(item_id)? {
            return Ok(None);
        }
        Ok(Some(self.tags_for(item_id)?))
    }

    fn current_label(&self, model: ModelKind, item_id: i64) -> Result<Option<LabelAssignment>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT label, source, confidence FROM item_labels
             WHERE model = ? AND item_id = ?",
        )?;
        let mut rows = stmt.query(params![model.as_str(), item_id])?;
        if let Some(row) = rows.next()? {
            let label: String = row.get(0)?;
            let source_raw: String = row.get(1)?;
            let source = LabelSource::parse(&source_raw).ok_or_else(|| {
                TagwiseError::Config(format!("unrecognized label source: {source_raw}"))
            })?;
            return Ok(Some(LabelAssignment {
                label,
                source,
                confidence: row.get(2)?,
            }));
        }
        Ok(None)
    }

    fn write_label(
        &self,
        model: ModelKind,
        item_id: i64,
        label: Option<&str>,
        source: LabelSource,
        confidence: Option<f64>,
    ) -> Result<()> {
        if !self.item_exists(item_id)? {
            return Err(TagwiseError::ItemNotFound(item_id));
        }

        // Prior label tags are always cleared first; a None label leaves the
        // item unlabeled.
        self.conn
            .execute(
                "DELETE FROM item_labels WHERE model = ? AND item_id = ?",
                params![model.as_str(), item_id],
            )
            .map_err(from_sqlite)?;

        if let Some(label) = label {
            let now = chrono::Utc::now().to_rfc3339();
            self.conn
                .execute(
                    "INSERT INTO item_labels(item_id, model, label, source, confidence, updated_at)
                     VALUES (?, ?, ?, ?, ?, ?)",
                    params![item_id, model.as_str(), label, source.as_str(), confidence, now],
                )
                .map_err(from_sqlite)?;
        }
        Ok(())
    }

    fn clear_machine_labels(&self, model: ModelKind) -> Result<u64> {
        let cleared = self
            .conn
            .execute(
                "DELETE FROM item_labels WHERE model = ? AND source = 'ai_inference'",
                [model.as_str()],
            )
            .map_err(from_sqlite)?;
        Ok(cleared as u64)
    }

    fn label_distribution(&self, model: ModelKind) -> Result<HashMap<String, u64>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT label, count(*) FROM item_labels WHERE model = ? GROUP BY label",
        )?;
        let rows = stmt.query_map([model.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut out = HashMap::new();
        for row in rows {
            let (label, count) = row?;
            out.insert(label, count as u64);
        }
        Ok(out)
    }
}
