//! SQLite-backed implementation of every store contract.
//!
//! Both representations live in one database file: the legacy tables are
//! assumed to exist (they are created if absent so that fresh databases work),
//! the normalized tables are only created through [`NormalizedStore::create_schema`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use entsync_error::{Result, SyncError};
use entsync_types::{
    Attribute, AttributeRow, AuthoritativeStore, EntityId, FieldValue, LegacyEntity,
    NormalizedEntity,
};
use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params, params_from_iter};
use tracing::{debug, info, warn};

use super::{BacklogSource, LegacyStore, NormalizedStore, SettingsStore, Transactional};
use crate::config::PromotedField;

/// Table names used by [`SqliteStore`].
pub mod tables {
    pub const LEGACY_ENTITIES: &str = "legacy_entities";
    pub const LEGACY_ATTRIBUTES: &str = "legacy_attributes";
    pub const ENTITIES: &str = "entities";
    pub const ENTITY_ATTRIBUTES: &str = "entity_attributes";
    pub const SETTINGS: &str = "sync_settings";
}

use tables::{ENTITIES, ENTITY_ATTRIBUTES, LEGACY_ATTRIBUTES, LEGACY_ENTITIES, SETTINGS};

const SETTING_AUTHORITATIVE: &str = "authoritative_store";
const SETTING_BACKGROUND_SYNC: &str = "background_sync";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Most entity IDs bound into one `IN (...)` list. Kept well under
/// `SQLITE_MAX_VARIABLE_NUMBER` so exclusion keys still fit beside them.
const MAX_IDS_PER_QUERY: usize = 4_096;

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

fn classify(err: rusqlite::Error) -> SyncError {
    if let rusqlite::Error::SqliteFailure(failure, message) = &err {
        match failure.code {
            ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::CannotOpen
            | ErrorCode::SystemIoFailure
            | ErrorCode::NotADatabase
            | ErrorCode::DatabaseCorrupt => return SyncError::unavailable(err.to_string()),
            _ => {}
        }
        if let Some(table) = message
            .as_deref()
            .and_then(|m| m.strip_prefix("no such table: "))
        {
            return SyncError::SchemaMissing {
                table: table.to_owned(),
            };
        }
    }
    SyncError::internal(format!("sqlite: {err}"))
}

trait SqlResultExt<T> {
    fn map_sql(self) -> Result<T>;
}

impl<T> SqlResultExt<T> for rusqlite::Result<T> {
    fn map_sql(self) -> Result<T> {
        self.map_err(classify)
    }
}

// ---------------------------------------------------------------------------
// SQL helpers
// ---------------------------------------------------------------------------

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn text_values(values: &[String]) -> impl Iterator<Item = Value> + '_ {
    values.iter().map(|v| Value::Text(v.clone()))
}

/// Sorted, deduplicated ID chunks of at most [`MAX_IDS_PER_QUERY`], so that
/// per-chunk results concatenate in ascending entity order.
fn id_chunks(ids: &[EntityId]) -> Vec<Vec<EntityId>> {
    let mut sorted = ids.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    sorted
        .chunks(MAX_IDS_PER_QUERY)
        .map(<[EntityId]>::to_vec)
        .collect()
}

fn id_values(ids: &[EntityId]) -> impl Iterator<Item = Value> + '_ {
    ids.iter().map(|id| Value::Integer(*id))
}

fn limit_value(limit: usize) -> Value {
    Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX))
}

fn to_sql_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Integer(v) => Value::Integer(*v),
        FieldValue::Real(v) => Value::Real(*v),
        FieldValue::Text(v) => Value::Text(v.clone()),
    }
}

fn from_sql_value(value: Value) -> FieldValue {
    match value {
        Value::Null => FieldValue::Null,
        Value::Integer(v) => FieldValue::Integer(v),
        Value::Real(v) => FieldValue::Real(v),
        Value::Text(v) => FieldValue::Text(v),
        Value::Blob(v) => FieldValue::Text(String::from_utf8_lossy(&v).into_owned()),
    }
}

fn count_to_u64(count: i64) -> u64 {
    u64::try_from(count).unwrap_or(0)
}

/// Rows that need a migration pass, as one `id` column.
fn pending_union_sql(type_count: usize) -> String {
    let types = placeholders(type_count);
    format!(
        "SELECT l.id AS id FROM {LEGACY_ENTITIES} l \
         LEFT JOIN {ENTITIES} n ON n.id = l.id \
         WHERE l.entity_type IN ({types}) \
           AND (n.id IS NULL OR l.modified_at > n.synced_at) \
         UNION ALL \
         SELECT n.id AS id FROM {ENTITIES} n \
         WHERE NOT EXISTS (SELECT 1 FROM {LEGACY_ENTITIES} l WHERE l.id = n.id)"
    )
}

// ---------------------------------------------------------------------------
// SqliteStore
// ---------------------------------------------------------------------------

/// Both stores and the settings table behind one SQLite connection.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    promoted: Vec<PromotedField>,
}

impl SqliteStore {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>, promoted: Vec<PromotedField>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_sql()?;
        let mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_sql()?;
        conn.pragma_update(None, "synchronous", "NORMAL").map_sql()?;
        debug!(path = %path.display(), journal_mode = %mode, "opened sqlite store");
        Self::from_connection(conn, promoted)
    }

    /// Private in-memory database, used by tests and dry runs.
    pub fn open_in_memory(promoted: Vec<PromotedField>) -> Result<Self> {
        let conn = Connection::open_in_memory().map_sql()?;
        Self::from_connection(conn, promoted)
    }

    fn from_connection(conn: Connection, promoted: Vec<PromotedField>) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT).map_sql()?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {LEGACY_ENTITIES} (
                 id INTEGER PRIMARY KEY,
                 entity_type TEXT NOT NULL,
                 status TEXT NOT NULL,
                 created_at INTEGER NOT NULL,
                 modified_at INTEGER NOT NULL
             );
             CREATE INDEX IF NOT EXISTS {LEGACY_ENTITIES}_type_id
                 ON {LEGACY_ENTITIES} (entity_type, id);
             CREATE TABLE IF NOT EXISTS {LEGACY_ATTRIBUTES} (
                 attr_id INTEGER PRIMARY KEY AUTOINCREMENT,
                 entity_id INTEGER NOT NULL,
                 attr_key TEXT NOT NULL,
                 attr_value TEXT NOT NULL DEFAULT ''
             );
             CREATE INDEX IF NOT EXISTS {LEGACY_ATTRIBUTES}_entity_key
                 ON {LEGACY_ATTRIBUTES} (entity_id, attr_key);
             CREATE TABLE IF NOT EXISTS {SETTINGS} (
                 name TEXT PRIMARY KEY,
                 value TEXT NOT NULL
             );"
        ))
        .map_sql()?;
        Ok(Self { conn, promoted })
    }

    /// Commit `work` as one unit. Nested calls become savepoints.
    fn atomically<T>(&self, savepoint: &str, work: impl FnOnce() -> Result<T>) -> Result<T> {
        if !self.conn.is_autocommit() {
            self.conn
                .execute_batch(&format!("SAVEPOINT {savepoint}"))
                .map_sql()?;
            return match work() {
                Ok(value) => {
                    self.conn
                        .execute_batch(&format!("RELEASE {savepoint}"))
                        .map_sql()?;
                    Ok(value)
                }
                Err(err) => {
                    if let Err(rollback) = self.conn.execute_batch(&format!(
                        "ROLLBACK TO {savepoint}; RELEASE {savepoint}"
                    )) {
                        warn!(savepoint, error = %rollback, "savepoint rollback failed");
                    }
                    Err(err)
                }
            };
        }

        self.conn.execute_batch("BEGIN IMMEDIATE").map_sql()?;
        let result = work().and_then(|value| {
            self.conn.execute_batch("COMMIT").map_sql()?;
            Ok(value)
        });
        if result.is_err() && !self.conn.is_autocommit() {
            if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                warn!(error = %rollback, "transaction rollback failed");
            }
        }
        result
    }

    fn query_ids(&self, sql: &str, params: &[Value]) -> Result<Vec<EntityId>> {
        let mut stmt = self.conn.prepare_cached(sql).map_sql()?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| row.get::<_, i64>(0))
            .map_sql()?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_sql()
    }

    fn query_count(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row(sql, params_from_iter(params.iter()), |row| row.get(0))
            .map_sql()?;
        Ok(count_to_u64(count))
    }

    fn query_attribute_rows(&self, sql: &str, params: &[Value]) -> Result<Vec<AttributeRow>> {
        let mut stmt = self.conn.prepare_cached(sql).map_sql()?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                Ok(AttributeRow {
                    entity_id: row.get(0)?,
                    key: row.get(1)?,
                    value: row.get(2)?,
                })
            })
            .map_sql()?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_sql()
    }

    fn read_attributes(&self, table: &str, id: EntityId) -> Result<Vec<Attribute>> {
        let sql = format!(
            "SELECT attr_key, attr_value FROM {table} WHERE entity_id = ?1 ORDER BY attr_id"
        );
        let mut stmt = self.conn.prepare_cached(&sql).map_sql()?;
        let rows = stmt
            .query_map(params![id], |row| {
                Ok(Attribute {
                    key: row.get(0)?,
                    value: row.get(1)?,
                })
            })
            .map_sql()?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_sql()
    }

    fn insert_attributes(&self, table: &str, id: EntityId, attributes: &[Attribute]) -> Result<()> {
        let sql =
            format!("INSERT INTO {table} (entity_id, attr_key, attr_value) VALUES (?1, ?2, ?3)");
        let mut stmt = self.conn.prepare_cached(&sql).map_sql()?;
        for attr in attributes {
            stmt.execute(params![id, attr.key, attr.value]).map_sql()?;
        }
        Ok(())
    }

    fn read_setting(&self, name: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                &format!("SELECT value FROM {SETTINGS} WHERE name = ?1"),
                params![name],
                |row| row.get(0),
            )
            .optional()
            .map_sql()
    }

    fn write_setting(&self, name: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO {SETTINGS} (name, value) VALUES (?1, ?2) \
                     ON CONFLICT(name) DO UPDATE SET value = excluded.value"
                ),
                params![name, value],
            )
            .map_sql()?;
        Ok(())
    }

    // -- Legacy writes -------------------------------------------------------
    //
    // These stand in for the live application that owns the legacy tables.

    /// Insert or fully replace a legacy entity and its attributes.
    pub fn put_legacy_entity(&self, entity: &LegacyEntity) -> Result<()> {
        self.atomically("entsync_legacy_put", || {
            self.conn
                .execute(
                    &format!(
                        "INSERT INTO {LEGACY_ENTITIES} \
                         (id, entity_type, status, created_at, modified_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5) \
                         ON CONFLICT(id) DO UPDATE SET \
                           entity_type = excluded.entity_type, \
                           status = excluded.status, \
                           created_at = excluded.created_at, \
                           modified_at = excluded.modified_at"
                    ),
                    params![
                        entity.id,
                        entity.entity_type,
                        entity.status,
                        entity.created_at,
                        entity.modified_at
                    ],
                )
                .map_sql()?;
            self.conn
                .execute(
                    &format!("DELETE FROM {LEGACY_ATTRIBUTES} WHERE entity_id = ?1"),
                    params![entity.id],
                )
                .map_sql()?;
            self.insert_attributes(LEGACY_ATTRIBUTES, entity.id, &entity.attributes)
        })
    }

    /// Append one attribute row and bump the entity's `modified_at`.
    pub fn append_legacy_attribute(
        &self,
        id: EntityId,
        key: &str,
        value: &str,
        modified_at: i64,
    ) -> Result<()> {
        self.atomically("entsync_legacy_append", || {
            let touched = self
                .conn
                .execute(
                    &format!("UPDATE {LEGACY_ENTITIES} SET modified_at = ?1 WHERE id = ?2"),
                    params![modified_at, id],
                )
                .map_sql()?;
            if touched == 0 {
                return Err(SyncError::NotFound { id });
            }
            self.insert_attributes(LEGACY_ATTRIBUTES, id, &[Attribute::new(key, value)])
        })
    }

    /// Delete a legacy entity and its attributes. Returns whether it existed.
    pub fn delete_legacy_entity(&self, id: EntityId) -> Result<bool> {
        self.atomically("entsync_legacy_delete", || {
            self.conn
                .execute(
                    &format!("DELETE FROM {LEGACY_ATTRIBUTES} WHERE entity_id = ?1"),
                    params![id],
                )
                .map_sql()?;
            let removed = self
                .conn
                .execute(
                    &format!("DELETE FROM {LEGACY_ENTITIES} WHERE id = ?1"),
                    params![id],
                )
                .map_sql()?;
            Ok(removed > 0)
        })
    }

    /// Number of normalized attribute rows stored for one entity.
    pub fn normalized_attribute_count(&self, id: EntityId) -> Result<u64> {
        self.query_count(
            &format!("SELECT COUNT(*) FROM {ENTITY_ATTRIBUTES} WHERE entity_id = ?1"),
            &[Value::Integer(id)],
        )
    }
}

// ---------------------------------------------------------------------------
// Contract implementations
// ---------------------------------------------------------------------------

impl LegacyStore for SqliteStore {
    fn read_legacy_entity(&self, id: EntityId) -> Result<LegacyEntity> {
        let head = self
            .conn
            .query_row(
                &format!(
                    "SELECT entity_type, status, created_at, modified_at \
                     FROM {LEGACY_ENTITIES} WHERE id = ?1"
                ),
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()
            .map_sql()?;
        let Some((entity_type, status, created_at, modified_at)) = head else {
            return Err(SyncError::NotFound { id });
        };
        Ok(LegacyEntity {
            id,
            entity_type,
            status,
            created_at,
            modified_at,
            attributes: self.read_attributes(LEGACY_ATTRIBUTES, id)?,
        })
    }

    fn list_entity_ids_in_range(
        &self,
        entity_types: &[String],
        start: EntityId,
        end: EntityId,
        limit: usize,
    ) -> Result<Vec<EntityId>> {
        let sql = format!(
            "SELECT id FROM {LEGACY_ENTITIES} \
             WHERE entity_type IN ({}) AND id >= ? AND id <= ? \
             ORDER BY id ASC LIMIT ?",
            placeholders(entity_types.len())
        );
        let params: Vec<Value> = text_values(entity_types)
            .chain([Value::Integer(start), Value::Integer(end), limit_value(limit)])
            .collect();
        self.query_ids(&sql, &params)
    }

    fn count_entities_in_range(
        &self,
        entity_types: &[String],
        start: EntityId,
        end: EntityId,
    ) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {LEGACY_ENTITIES} \
             WHERE entity_type IN ({}) AND id >= ? AND id <= ?",
            placeholders(entity_types.len())
        );
        let params: Vec<Value> = text_values(entity_types)
            .chain([Value::Integer(start), Value::Integer(end)])
            .collect();
        self.query_count(&sql, &params)
    }

    fn legacy_attribute_rows(
        &self,
        ids: &[EntityId],
        exclude: &BTreeSet<String>,
    ) -> Result<Vec<AttributeRow>> {
        let mut rows = Vec::new();
        for chunk in id_chunks(ids) {
            let mut sql = format!(
                "SELECT entity_id, attr_key, attr_value FROM {LEGACY_ATTRIBUTES} \
                 WHERE entity_id IN ({})",
                placeholders(chunk.len())
            );
            if !exclude.is_empty() {
                sql.push_str(&format!(" AND attr_key NOT IN ({})", placeholders(exclude.len())));
            }
            sql.push_str(" ORDER BY entity_id ASC, attr_key ASC, attr_id ASC");
            let params: Vec<Value> = id_values(&chunk)
                .chain(exclude.iter().map(|k| Value::Text(k.clone())))
                .collect();
            rows.extend(self.query_attribute_rows(&sql, &params)?);
        }
        Ok(rows)
    }
}

impl NormalizedStore for SqliteStore {
    fn schema_exists(&self) -> Result<bool> {
        let found = self.query_count(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN (?1, ?2)",
            &[
                Value::Text(ENTITIES.to_owned()),
                Value::Text(ENTITY_ATTRIBUTES.to_owned()),
            ],
        )?;
        Ok(found == 2)
    }

    fn create_schema(&self) -> Result<()> {
        let promoted_columns: String = self
            .promoted
            .iter()
            .map(|f| format!(",\n    {} {}", quote_ident(&f.column), f.kind.sql_type()))
            .collect();
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {ENTITIES} (
                 id INTEGER PRIMARY KEY,
                 entity_type TEXT NOT NULL,
                 status TEXT NOT NULL,
                 created_at INTEGER NOT NULL,
                 modified_at INTEGER NOT NULL,
                 synced_at INTEGER NOT NULL{promoted_columns}
             );
             CREATE TABLE IF NOT EXISTS {ENTITY_ATTRIBUTES} (
                 attr_id INTEGER PRIMARY KEY AUTOINCREMENT,
                 entity_id INTEGER NOT NULL,
                 attr_key TEXT NOT NULL,
                 attr_value TEXT NOT NULL DEFAULT ''
             );
             CREATE INDEX IF NOT EXISTS {ENTITY_ATTRIBUTES}_entity_key
                 ON {ENTITY_ATTRIBUTES} (entity_id, attr_key);"
        );
        self.atomically("entsync_schema", || self.conn.execute_batch(&ddl).map_sql())?;
        info!(
            table = ENTITIES,
            promoted = self.promoted.len(),
            "normalized schema created"
        );
        Ok(())
    }

    fn read_normalized_entity(&self, id: EntityId) -> Result<NormalizedEntity> {
        let columns: String = self
            .promoted
            .iter()
            .map(|f| format!(", {}", quote_ident(&f.column)))
            .collect();
        let sql = format!(
            "SELECT entity_type, status, created_at, modified_at, synced_at{columns} \
             FROM {ENTITIES} WHERE id = ?1"
        );
        let promoted_count = self.promoted.len();
        let row = self
            .conn
            .query_row(&sql, params![id], |row| {
                let mut values = Vec::with_capacity(promoted_count);
                for index in 0..promoted_count {
                    values.push(row.get::<_, Value>(5 + index)?);
                }
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    values,
                ))
            })
            .optional()
            .map_sql()?;
        let Some((entity_type, status, created_at, modified_at, synced_at, values)) = row else {
            return Err(SyncError::NotFound { id });
        };

        let fields: BTreeMap<String, FieldValue> = self
            .promoted
            .iter()
            .zip(values)
            .map(|(field, value)| (field.column.clone(), from_sql_value(value)))
            .collect();

        Ok(NormalizedEntity {
            id,
            entity_type,
            status,
            created_at,
            modified_at,
            synced_at,
            fields,
            attributes: self.read_attributes(ENTITY_ATTRIBUTES, id)?,
        })
    }

    fn write_normalized_entity(&self, entity: &NormalizedEntity) -> Result<()> {
        let column_names: Vec<String> = self
            .promoted
            .iter()
            .map(|f| quote_ident(&f.column))
            .collect();
        let insert_columns: String = column_names.iter().map(|c| format!(", {c}")).collect();
        let updates: String = column_names
            .iter()
            .map(|c| format!(", {c} = excluded.{c}"))
            .collect();
        let sql = format!(
            "INSERT INTO {ENTITIES} \
             (id, entity_type, status, created_at, modified_at, synced_at{insert_columns}) \
             VALUES ({}) \
             ON CONFLICT(id) DO UPDATE SET \
               entity_type = excluded.entity_type, \
               status = excluded.status, \
               created_at = excluded.created_at, \
               modified_at = excluded.modified_at, \
               synced_at = excluded.synced_at{updates}",
            placeholders(6 + column_names.len())
        );
        let params: Vec<Value> = [
            Value::Integer(entity.id),
            Value::Text(entity.entity_type.clone()),
            Value::Text(entity.status.clone()),
            Value::Integer(entity.created_at),
            Value::Integer(entity.modified_at),
            Value::Integer(entity.synced_at),
        ]
        .into_iter()
        .chain(self.promoted.iter().map(|f| {
            entity
                .fields
                .get(&f.column)
                .map_or(Value::Null, to_sql_value)
        }))
        .collect();

        self.atomically("entsync_write", || {
            self.conn
                .execute(&sql, params_from_iter(params.iter()))
                .map_sql()?;
            self.conn
                .execute(
                    &format!("DELETE FROM {ENTITY_ATTRIBUTES} WHERE entity_id = ?1"),
                    params![entity.id],
                )
                .map_sql()?;
            self.insert_attributes(ENTITY_ATTRIBUTES, entity.id, &entity.attributes)
        })
    }

    fn delete_normalized_entity(&self, id: EntityId) -> Result<bool> {
        self.atomically("entsync_delete", || {
            self.conn
                .execute(
                    &format!("DELETE FROM {ENTITY_ATTRIBUTES} WHERE entity_id = ?1"),
                    params![id],
                )
                .map_sql()?;
            let removed = self
                .conn
                .execute(&format!("DELETE FROM {ENTITIES} WHERE id = ?1"), params![id])
                .map_sql()?;
            Ok(removed > 0)
        })
    }

    fn normalized_attribute_rows(&self, ids: &[EntityId]) -> Result<Vec<AttributeRow>> {
        let mut rows = Vec::new();
        for chunk in id_chunks(ids) {
            let sql = format!(
                "SELECT entity_id, attr_key, attr_value FROM {ENTITY_ATTRIBUTES} \
                 WHERE entity_id IN ({}) \
                 ORDER BY entity_id ASC, attr_key ASC, attr_id ASC",
                placeholders(chunk.len())
            );
            let params: Vec<Value> = id_values(&chunk).collect();
            rows.extend(self.query_attribute_rows(&sql, &params)?);
        }
        Ok(rows)
    }
}

impl BacklogSource for SqliteStore {
    fn count_pending(&self, entity_types: &[String]) -> Result<u64> {
        if !self.schema_exists()? {
            // Without normalized tables every in-scope legacy entity is pending.
            return self.count_entities_in_range(entity_types, EntityId::MIN, EntityId::MAX);
        }
        let sql = format!(
            "SELECT COUNT(*) FROM ({})",
            pending_union_sql(entity_types.len())
        );
        let params: Vec<Value> = text_values(entity_types).collect();
        self.query_count(&sql, &params)
    }

    fn pending_ids_after(
        &self,
        entity_types: &[String],
        after: Option<EntityId>,
        limit: usize,
    ) -> Result<Vec<EntityId>> {
        if !self.schema_exists()? {
            let start = after.map_or(EntityId::MIN, |id| id.saturating_add(1));
            return self.list_entity_ids_in_range(entity_types, start, EntityId::MAX, limit);
        }
        let mut params: Vec<Value> = text_values(entity_types).collect();
        let cursor = match after {
            Some(id) => {
                params.push(Value::Integer(id));
                "WHERE id > ?"
            }
            None => "",
        };
        params.push(limit_value(limit));
        let sql = format!(
            "SELECT id FROM ({}) {cursor} ORDER BY id ASC LIMIT ?",
            pending_union_sql(entity_types.len())
        );
        self.query_ids(&sql, &params)
    }
}

impl SettingsStore for SqliteStore {
    fn authoritative_store(&self) -> Result<AuthoritativeStore> {
        match self.read_setting(SETTING_AUTHORITATIVE)? {
            None => Ok(AuthoritativeStore::default()),
            Some(raw) => AuthoritativeStore::parse(&raw).ok_or_else(|| {
                SyncError::internal(format!("unrecognized authoritative store `{raw}`"))
            }),
        }
    }

    fn set_authoritative_store(&self, store: AuthoritativeStore) -> Result<()> {
        self.write_setting(SETTING_AUTHORITATIVE, store.as_str())
    }

    fn background_sync_enabled(&self) -> Result<bool> {
        Ok(self.read_setting(SETTING_BACKGROUND_SYNC)?.as_deref() == Some("yes"))
    }

    fn set_background_sync_enabled(&self, enabled: bool) -> Result<()> {
        self.write_setting(SETTING_BACKGROUND_SYNC, if enabled { "yes" } else { "no" })
    }
}

impl Transactional for SqliteStore {
    fn in_transaction<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.atomically("entsync_unit", work)
    }
}
