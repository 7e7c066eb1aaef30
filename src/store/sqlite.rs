//! SQLite weight store
//!
//! One store file per model kind, all using the same normalized schema:
//! tag and label dictionaries plus per-tag and per-tag-pair weight tables.
//! The store is the only component that touches disk; scoring works against
//! an in-memory [`WeightSnapshot`] loaded from here.

use std::collections::HashMap;
use std::path::Path;

use rusqlite::{Connection, params};
use tracing::{debug, warn};

use crate::config::ClassifierConfig;
use crate::error::{Result, TagwiseError, from_sqlite};
use crate::model::{LabelId, ModelKind, PairKey, TagId, WeightSnapshot};
use crate::store::migrations;

const EXPECTED_TABLES: [&str; 6] = [
    "tags",
    "labels",
    "tag_weights",
    "tag_pair_weights",
    "config",
    "model_metadata",
];

/// Rows per insert transaction during weight persistence. Bounds both
/// transaction size and writer lock hold time.
const INSERT_BATCH_SIZE: usize = 500;

/// Computed weight for one (tag, label) pair, keyed by name; ids are
/// resolved at persistence time.
#[derive(Debug, Clone, PartialEq)]
pub struct TagWeightRow {
    pub tag: String,
    pub label: String,
    pub weight: f64,
    pub sample_count: i64,
}

/// Computed weight for one (tag pair, label) triple, keyed by name.
#[derive(Debug, Clone, PartialEq)]
pub struct PairWeightRow {
    pub tag1: String,
    pub tag2: String,
    pub label: String,
    pub weight: f64,
    pub co_occurrence_count: i64,
}

/// SQLite-backed weight store for one model.
pub struct WeightStore {
    conn: Connection,
    model: ModelKind,
    schema_version: u32,
}

impl std::fmt::Debug for WeightStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightStore")
            .field("model", &self.model)
            .field("schema_version", &self.schema_version)
            .finish_non_exhaustive()
    }
}

impl WeightStore {
    /// Open (or create) the weight store at the given path.
    pub fn open(path: impl AsRef<Path>, model: ModelKind) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::from_connection(conn, model)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory(model: ModelKind) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, model)
    }

    fn from_connection(conn: Connection, model: ModelKind) -> Result<Self> {
        configure_pragmas(&conn)?;
        let schema_version = ensure_schema(&conn)?;

        let store = Self {
            conn,
            model,
            schema_version,
        };
        for label in model.fixed_labels() {
            store.intern_label(label)?;
        }
        Ok(store)
    }

    pub fn model(&self) -> ModelKind {
        self.model
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Get or create the surrogate key for a tag name. The tag dictionary is
    /// append-only; rows are never deleted.
    pub fn intern_tag(&self, name: &str) -> Result<TagId> {
        self.conn
            .execute("INSERT OR IGNORE INTO tags(name) VALUES (?)", [name])
            .map_err(from_sqlite)?;
        let id: i64 = self
            .conn
            .query_row("SELECT id FROM tags WHERE name = ?", [name], |row| {
                row.get(0)
            })?;
        Ok(TagId(id))
    }

    /// Get or create the surrogate key for a label name.
    pub fn intern_label(&self, name: &str) -> Result<LabelId> {
        self.conn
            .execute("INSERT OR IGNORE INTO labels(name) VALUES (?)", [name])
            .map_err(from_sqlite)?;
        let id: i64 = self
            .conn
            .query_row("SELECT id FROM labels WHERE name = ?", [name], |row| {
                row.get(0)
            })?;
        Ok(LabelId(id))
    }

    pub fn label_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT name FROM labels ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Replace all weight rows with the given set. Deletion and insertion are
    /// committed in bounded batches so a large training run never holds one
    /// giant transaction. Pair rows are canonicalized (`tag1_id < tag2_id`)
    /// before insert; self-pairs are dropped.
    pub fn replace_weights(
        &mut self,
        tag_rows: &[TagWeightRow],
        pair_rows: &[PairWeightRow],
    ) -> Result<(usize, usize)> {
        let mut tag_ids: HashMap<String, TagId> = HashMap::new();
        let mut label_ids: HashMap<String, LabelId> = HashMap::new();

        for row in tag_rows {
            if !tag_ids.contains_key(&row.tag) {
                let id = self.intern_tag(&row.tag)?;
                tag_ids.insert(row.tag.clone(), id);
            }
            if !label_ids.contains_key(&row.label) {
                let id = self.intern_label(&row.label)?;
                label_ids.insert(row.label.clone(), id);
            }
        }
        for row in pair_rows {
            for tag in [&row.tag1, &row.tag2] {
                if !tag_ids.contains_key(tag) {
                    let id = self.intern_tag(tag)?;
                    tag_ids.insert(tag.clone(), id);
                }
            }
            if !label_ids.contains_key(&row.label) {
                let id = self.intern_label(&row.label)?;
                label_ids.insert(row.label.clone(), id);
            }
        }

        {
            let tx = self.conn.transaction().map_err(from_sqlite)?;
            tx.execute("DELETE FROM tag_weights", [])
                .map_err(from_sqlite)?;
            tx.execute("DELETE FROM tag_pair_weights", [])
                .map_err(from_sqlite)?;
            tx.commit().map_err(from_sqlite)?;
        }

        let mut inserted_tags = 0usize;
        for chunk in tag_rows.chunks(INSERT_BATCH_SIZE) {
            let tx = self.conn.transaction().map_err(from_sqlite)?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO tag_weights(tag_id, label_id, weight, sample_count)
                     VALUES (?, ?, ?, ?)",
                )?;
                for row in chunk {
                    let tag_id = tag_ids[&row.tag];
                    let label_id = label_ids[&row.label];
                    stmt.execute(params![tag_id.0, label_id.0, row.weight, row.sample_count])
                        .map_err(from_sqlite)?;
                    inserted_tags += 1;
                }
            }
            tx.commit().map_err(from_sqlite)?;
        }

        let mut inserted_pairs = 0usize;
        for chunk in pair_rows.chunks(INSERT_BATCH_SIZE) {
            let tx = self.conn.transaction().map_err(from_sqlite)?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR REPLACE INTO tag_pair_weights
                     (tag1_id, tag2_id, label_id, weight, co_occurrence_count)
                     VALUES (?, ?, ?, ?, ?)",
                )?;
                for row in chunk {
                    let a = tag_ids[&row.tag1];
                    let b = tag_ids[&row.tag2];
                    if a == b {
                        debug!(tag = %row.tag1, "skipping self-pair weight row");
                        continue;
                    }
                    let key = PairKey::new(a, b);
                    let label_id = label_ids[&row.label];
                    stmt.execute(params![
                        key.first.0,
                        key.second.0,
                        label_id.0,
                        row.weight,
                        row.co_occurrence_count
                    ])
                    .map_err(from_sqlite)?;
                    inserted_pairs += 1;
                }
            }
            tx.commit().map_err(from_sqlite)?;
        }

        debug!(
            tag_weights = inserted_tags,
            pair_weights = inserted_pairs,
            "replaced weight tables"
        );
        Ok((inserted_tags, inserted_pairs))
    }

    /// Load everything scoring needs into an immutable snapshot.
    pub fn load_snapshot(&self) -> Result<WeightSnapshot> {
        let cfg = ClassifierConfig::load(self)?;

        let mut labels = HashMap::new();
        {
            let mut stmt = self.conn.prepare("SELECT id, name FROM labels")?;
            let rows = stmt.query_map([], |row| {
                Ok((LabelId(row.get::<_, i64>(0)?), row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (id, name) = row?;
                labels.insert(id, name);
            }
        }

        let mut tag_ids = HashMap::new();
        {
            let mut stmt = self.conn.prepare("SELECT id, name FROM tags")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(1)?, TagId(row.get::<_, i64>(0)?)))
            })?;
            for row in rows {
                let (name, id) = row?;
                tag_ids.insert(name, id);
            }
        }

        let mut tag_weights = HashMap::new();
        {
            let mut stmt = self
                .conn
                .prepare("SELECT tag_id, label_id, weight FROM tag_weights")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    TagId(row.get::<_, i64>(0)?),
                    LabelId(row.get::<_, i64>(1)?),
                    row.get::<_, f64>(2)?,
                ))
            })?;
            for row in rows {
                let (tag, label, weight) = row?;
                tag_weights.insert((tag, label), weight);
            }
        }

        let mut pair_weights = HashMap::new();
        {
            let mut stmt = self
                .conn
                .prepare("SELECT tag1_id, tag2_id, label_id, weight FROM tag_pair_weights")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    TagId(row.get::<_, i64>(0)?),
                    TagId(row.get::<_, i64>(1)?),
                    LabelId(row.get::<_, i64>(2)?),
                    row.get::<_, f64>(3)?,
                ))
            })?;
            for row in rows {
                let (a, b, label, weight) = row?;
                pair_weights.insert((PairKey::new(a, b), label), weight);
            }
        }

        let label_thresholds = labels
            .iter()
            .map(|(id, name)| (*id, cfg.label_threshold(name)))
            .collect();

        Ok(WeightSnapshot {
            labels,
            tag_ids,
            tag_weights,
            pair_weights,
            pair_multiplier: cfg.pair_weight_multiplier(),
            min_confidence: cfg.min_confidence(),
            label_thresholds,
            max_tags_for_pairs: cfg.max_tags_for_pairs(),
        })
    }

    pub fn tag_weight_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT count(*) FROM tag_weights", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn pair_weight_count(&self) -> Result<u64> {
        let count: i64 =
            self.conn
                .query_row("SELECT count(*) FROM tag_pair_weights", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ------------------------------------------------------------------
    // model_metadata
    // ------------------------------------------------------------------

    pub fn metadata_set(&self, key: &str, value: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO model_metadata(key, value, updated_at) VALUES (?, ?, ?)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                               updated_at = excluded.updated_at",
                params![key, value, now],
            )
            .map_err(from_sqlite)?;
        Ok(())
    }

    pub fn metadata_get(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM model_metadata WHERE key = ?")?;
        let mut rows = stmt.query([key])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(row.get(0)?));
        }
        Ok(None)
    }

    pub fn metadata_all(&self) -> Result<HashMap<String, String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM model_metadata")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = HashMap::new();
        for row in rows {
            let (key, value) = row?;
            out.insert(key, value);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // config
    // ------------------------------------------------------------------

    pub fn config_get(&self, key: &str) -> Result<Option<f64>> {
        let mut stmt = self.conn.prepare("SELECT value FROM config WHERE key = ?")?;
        let mut rows = stmt.query([key])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(row.get(0)?));
        }
        Ok(None)
    }

    pub fn config_set(&self, key: &str, value: f64) -> Result<()> {
        if !crate::config::is_known_key(key) {
            return Err(TagwiseError::UnknownConfigKey(key.to_string()));
        }
        self.conn
            .execute(
                "INSERT INTO config(key, value) VALUES (?, ?)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(from_sqlite)?;
        Ok(())
    }

    /// Drop all overrides, restoring compiled-in defaults.
    pub fn config_reset(&self) -> Result<()> {
        self.conn
            .execute("DELETE FROM config", [])
            .map_err(from_sqlite)?;
        Ok(())
    }

    pub fn config_all(&self) -> Result<HashMap<String, f64>> {
        let mut stmt = self.conn.prepare("SELECT key, value FROM config")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;
        let mut out = HashMap::new();
        for row in rows {
            let (key, value) = row?;
            out.insert(key, value);
        }
        Ok(out)
    }
}

fn configure_pragmas(conn: &Connection) -> Result<()> {
    // Write-ahead journal with a generous wait so readers survive training
    // commits instead of failing outright.
    conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
        .map_err(from_sqlite)?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .map_err(from_sqlite)?;
    conn.pragma_update(None, "busy_timeout", 30_000)
        .map_err(from_sqlite)?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(from_sqlite)?;
    Ok(())
}

/// Run migrations and verify the expected tables exist. A store file whose
/// `user_version` claims migration but lacks tables (corruption or version
/// skew) is re-initialized in place rather than crashing the caller.
fn ensure_schema(conn: &Connection) -> Result<u32> {
    let version = migrations::run_migrations(conn)?;
    if schema_is_valid(conn)? {
        return Ok(version);
    }

    warn!("weight store schema mismatch detected, re-initializing");
    conn.pragma_update(None, "user_version", 0)
        .map_err(from_sqlite)?;
    let version = migrations::run_migrations(conn)?;
    if !schema_is_valid(conn)? {
        return Err(TagwiseError::SchemaMismatch(
            "expected tables still missing after re-initialization".to_string(),
        ));
    }
    Ok(version)
}

fn schema_is_valid(conn: &Connection) -> Result<bool> {
    let mut stmt =
        conn.prepare("SELECT count(*) FROM sqlite_master WHERE type='table' AND name=?")?;
    for table in EXPECTED_TABLES {
        let count: i64 = stmt.query_row([table], |row| row.get(0))?;
        if count == 0 {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> WeightStore {
        WeightStore::open_in_memory(ModelKind::Rating).unwrap()
    }

    #[test]
    fn open_interns_fixed_rating_labels() {
        let store = store();
        let names = store.label_names().unwrap();
        assert_eq!(
            names,
            vec!["general", "sensitive", "questionable", "explicit"]
        );
    }

    #[test]
    fn character_store_starts_with_no_labels() {
        let store = WeightStore::open_in_memory(ModelKind::Character).unwrap();
        assert!(store.label_names().unwrap().is_empty());
    }

    #[test]
    fn intern_tag_is_stable() {
        let store = store();
        let a = store.intern_tag("landscape").unwrap();
        let b = store.intern_tag("landscape").unwrap();
        assert_eq!(a, b);
        let c = store.intern_tag("portrait").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn replace_weights_canonicalizes_pairs() {
        let mut store = store();
        let rows = vec![PairWeightRow {
            // Intern order makes "zebra" get the lower id; the row must be
            // flipped on insert to satisfy tag1_id < tag2_id.
            tag1: "apple".to_string(),
            tag2: "zebra".to_string(),
            label: "general".to_string(),
            weight: 1.5,
            co_occurrence_count: 4,
        }];
        store.intern_tag("zebra").unwrap();
        store.replace_weights(&[], &rows).unwrap();

        let snapshot = store.load_snapshot().unwrap();
        assert_eq!(snapshot.pair_weights.len(), 1);
        let ((key, _), _) = snapshot.pair_weights.iter().next().map(|(k, v)| (*k, *v)).unwrap();
        assert!(key.first < key.second);
    }

    #[test]
    fn replace_weights_is_a_full_replacement() {
        let mut store = store();
        let first = vec![TagWeightRow {
            tag: "sunset".to_string(),
            label: "general".to_string(),
            weight: 2.0,
            sample_count: 10,
        }];
        store.replace_weights(&first, &[]).unwrap();
        assert_eq!(store.tag_weight_count().unwrap(), 1);

        let second = vec![TagWeightRow {
            tag: "beach".to_string(),
            label: "general".to_string(),
            weight: -1.0,
            sample_count: 3,
        }];
        store.replace_weights(&second, &[]).unwrap();
        assert_eq!(store.tag_weight_count().unwrap(), 1);

        let snapshot = store.load_snapshot().unwrap();
        let beach = snapshot.tag_ids["beach"];
        let general = snapshot
            .labels
            .iter()
            .find(|(_, name)| name.as_str() == "general")
            .map(|(id, _)| *id)
            .unwrap();
        assert_eq!(snapshot.tag_weights.get(&(beach, general)), Some(&-1.0));
    }

    #[test]
    fn metadata_round_trip() {
        let store = store();
        assert_eq!(store.metadata_get("last_trained_at").unwrap(), None);
        store.metadata_set("last_trained_at", "2026-01-01T00:00:00Z").unwrap();
        assert_eq!(
            store.metadata_get("last_trained_at").unwrap().as_deref(),
            Some("2026-01-01T00:00:00Z")
        );
    }

    #[test]
    fn config_rejects_unknown_keys() {
        let store = store();
        let err = store.config_set("warp_factor", 9.0).unwrap_err();
        assert!(matches!(err, TagwiseError::UnknownConfigKey(_)));
    }

    #[test]
    fn config_set_and_reset() {
        let store = store();
        store.config_set("min_confidence", 0.8).unwrap();
        assert_eq!(store.config_get("min_confidence").unwrap(), Some(0.8));
        store.config_reset().unwrap();
        assert_eq!(store.config_get("min_confidence").unwrap(), None);
    }
}
