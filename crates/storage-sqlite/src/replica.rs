//! SQLite implementation of the local replica contract.
//!
//! All SQL is built dynamically against the fixed set of synced tables;
//! identifiers are validated against `PRAGMA table_info` (cached per table)
//! before they are ever interpolated, and values always go through bound
//! parameters.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};
use rusqlite::types::ValueRef;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

use atelier_core::{
    CascadeReport, Changeset, Fields, LocalReplica, Record, Result, SyncError, TableChanges,
    GALLERY_SYNC_TABLES, IMAGES_TABLE, IMAGE_RELATION_TABLES,
};

use crate::schema::BOOTSTRAP_SQL;

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn db_err(err: rusqlite::Error) -> SyncError {
    SyncError::storage(format!("SQLite error: {}", err))
}

fn escape_sqlite_str(value: &str) -> String {
    value.replace('\'', "''")
}

fn quote_identifier(value: &str) -> String {
    format!("`{}`", value.replace('`', "``"))
}

fn validate_sync_table(table: &str) -> Result<()> {
    if GALLERY_SYNC_TABLES.contains(&table) {
        return Ok(());
    }
    Err(SyncError::storage(format!(
        "Unsupported sync table '{}'",
        table
    )))
}

fn json_to_sql(value: &serde_json::Value) -> rusqlite::types::Value {
    use rusqlite::types::Value;
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(v) => Value::Integer(i64::from(*v)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else {
                Value::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::Text(s.clone()),
        other => Value::Text(other.to_string()),
    }
}

fn row_to_record(row: &Row<'_>, columns: &[String]) -> rusqlite::Result<Record> {
    let mut id = String::new();
    let mut fields = Fields::new();
    for (idx, name) in columns.iter().enumerate() {
        let value = match row.get_ref(idx)? {
            ValueRef::Null => serde_json::Value::Null,
            ValueRef::Integer(v) => json!(v),
            ValueRef::Real(v) => json!(v),
            ValueRef::Text(v) => {
                serde_json::Value::String(String::from_utf8_lossy(v).into_owned())
            }
            // No synced table stores blobs.
            ValueRef::Blob(_) => serde_json::Value::Null,
        };
        if name == "id" {
            id = value.as_str().unwrap_or_default().to_string();
        } else {
            fields.insert(name.clone(), value);
        }
    }
    Ok(Record::new(id, fields))
}

fn select_records(
    conn: &Connection,
    table: &str,
    predicate: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<Record>> {
    let sql = format!("SELECT * FROM {} {}", quote_identifier(table), predicate);
    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let mut rows = stmt.query(params).map_err(db_err)?;
    let mut records = Vec::new();
    while let Some(row) = rows.next().map_err(db_err)? {
        records.push(row_to_record(row, &columns).map_err(db_err)?);
    }
    Ok(records)
}

fn insert_row(
    conn: &Connection,
    table: &str,
    id: &str,
    fields: &Fields,
    marker: &str,
    replace: bool,
) -> Result<()> {
    use rusqlite::types::Value;

    let mut columns = vec!["id".to_string()];
    let mut values = vec![Value::Text(id.to_string())];
    for (name, value) in fields {
        if name == "id" || name == "sync_status" {
            continue;
        }
        columns.push(name.clone());
        values.push(json_to_sql(value));
    }
    columns.push("sync_status".to_string());
    values.push(Value::Text(marker.to_string()));

    let column_sql = columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = vec!["?"; columns.len()].join(", ");
    let verb = if replace { "INSERT OR REPLACE" } else { "INSERT" };
    conn.execute(
        &format!(
            "{} INTO {} ({}) VALUES ({})",
            verb,
            quote_identifier(table),
            column_sql,
            placeholders
        ),
        params_from_iter(values),
    )
    .map_err(db_err)?;
    Ok(())
}

/// Delete one row, leaving a tombstone when the remote already knew it.
/// Returns whether the row existed.
fn delete_row(conn: &Connection, table: &str, id: &str) -> Result<bool> {
    let marker: Option<String> = conn
        .query_row(
            &format!(
                "SELECT sync_status FROM {} WHERE id = ?1",
                quote_identifier(table)
            ),
            [id],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err)?;
    let Some(marker) = marker else {
        return Ok(false);
    };

    conn.execute(
        &format!("DELETE FROM {} WHERE id = ?1", quote_identifier(table)),
        [id],
    )
    .map_err(db_err)?;

    // A never-pushed record leaves no trace; the remote never saw it.
    if marker != "created" {
        conn.execute(
            "INSERT OR REPLACE INTO sync_tombstones (table_name, record_id, deleted_at) \
             VALUES (?1, ?2, ?3)",
            params![table, id, now_millis()],
        )
        .map_err(db_err)?;
    }
    Ok(true)
}

/// Assign an id and stamp timestamps on a new row's fields.
fn prepare_new_row(mut fields: Fields) -> (String, Fields) {
    let id = fields
        .remove("id")
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let now = now_millis();
    fields.entry("created_at".to_string()).or_insert(json!(now));
    fields.insert("updated_at".to_string(), json!(now));
    (id, fields)
}

/// Change-tracked gallery replica over a single SQLite connection.
pub struct SqliteReplica {
    conn: Mutex<Connection>,
    columns: Mutex<HashMap<String, HashSet<String>>>,
}

impl SqliteReplica {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
            .map_err(db_err)?;
        conn.execute_batch(BOOTSTRAP_SQL).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
            columns: Mutex::new(HashMap::new()),
        })
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SyncError::storage("Replica connection mutex is poisoned"))
    }

    fn table_columns(&self, conn: &Connection, table: &str) -> Result<HashSet<String>> {
        if let Ok(cache) = self.columns.lock() {
            if let Some(columns) = cache.get(table) {
                return Ok(columns.clone());
            }
        }
        let mut stmt = conn
            .prepare(&format!(
                "PRAGMA table_info('{}')",
                escape_sqlite_str(table)
            ))
            .map_err(db_err)?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .map_err(db_err)?
            .collect::<rusqlite::Result<HashSet<_>>>()
            .map_err(db_err)?;
        if let Ok(mut cache) = self.columns.lock() {
            cache.insert(table.to_string(), columns.clone());
        }
        Ok(columns)
    }

    /// Reject locally-written fields that do not match a real column.
    fn validate_columns(&self, conn: &Connection, table: &str, fields: &Fields) -> Result<()> {
        let known = self.table_columns(conn, table)?;
        for name in fields.keys() {
            if !known.contains(name) {
                return Err(SyncError::storage(format!(
                    "Column '{}' is not valid for table '{}'",
                    name, table
                )));
            }
        }
        Ok(())
    }

    /// Drop unknown fields from a remote record. Newer clients may sync
    /// columns this build does not have yet.
    fn filter_remote_fields(&self, conn: &Connection, table: &str, record: &Record) -> Result<Fields> {
        let known = self.table_columns(conn, table)?;
        let mut fields = Fields::new();
        for (name, value) in &record.fields {
            if known.contains(name) {
                fields.insert(name.clone(), value.clone());
            } else {
                warn!(
                    "[SqliteReplica] Ignoring unknown column '{}' on pulled {} record {}",
                    name, table, record.id
                );
            }
        }
        Ok(fields)
    }

    fn find_one(conn: &Connection, table: &str, id: &str) -> Result<Option<Record>> {
        Ok(select_records(conn, table, "WHERE id = ?1", &[&id])?.into_iter().next())
    }
}

#[async_trait]
impl LocalReplica for SqliteReplica {
    async fn find(&self, table: &str, id: &str) -> Result<Option<Record>> {
        validate_sync_table(table)?;
        let conn = self.lock_conn()?;
        Self::find_one(&conn, table, id)
    }

    async fn create(&self, table: &str, fields: Fields) -> Result<Record> {
        validate_sync_table(table)?;
        let conn = self.lock_conn()?;
        let (id, fields) = prepare_new_row(fields);
        self.validate_columns(&conn, table, &fields)?;
        insert_row(&conn, table, &id, &fields, "created", false)?;
        Self::find_one(&conn, table, &id)?
            .ok_or_else(|| SyncError::storage(format!("Created record {} vanished", id)))
    }

    async fn update(&self, table: &str, id: &str, fields: Fields) -> Result<Record> {
        use rusqlite::types::Value;

        validate_sync_table(table)?;
        let conn = self.lock_conn()?;
        self.validate_columns(&conn, table, &fields)?;

        let mut sets = Vec::new();
        let mut values = Vec::new();
        for (name, value) in &fields {
            if name == "id" || name == "sync_status" || name == "updated_at" {
                continue;
            }
            sets.push(format!("{} = ?", quote_identifier(name)));
            values.push(json_to_sql(value));
        }
        sets.push("updated_at = ?".to_string());
        values.push(Value::Integer(now_millis()));
        values.push(Value::Text(id.to_string()));

        let changed = conn
            .execute(
                &format!(
                    "UPDATE {} SET {} WHERE id = ?",
                    quote_identifier(table),
                    sets.join(", ")
                ),
                params_from_iter(values),
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(SyncError::storage(format!(
                "No record {} in {}",
                id, table
            )));
        }
        // An unpushed `created` record stays `created`.
        conn.execute(
            &format!(
                "UPDATE {} SET sync_status = 'updated' WHERE id = ?1 AND sync_status = 'synced'",
                quote_identifier(table)
            ),
            [id],
        )
        .map_err(db_err)?;

        Self::find_one(&conn, table, id)?
            .ok_or_else(|| SyncError::storage(format!("Updated record {} vanished", id)))
    }

    async fn delete(&self, table: &str, id: &str) -> Result<()> {
        validate_sync_table(table)?;
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        delete_row(&tx, table, id)?;
        tx.commit().map_err(db_err)
    }

    async fn query_by_field(&self, table: &str, field: &str, value: &str) -> Result<Vec<Record>> {
        validate_sync_table(table)?;
        let conn = self.lock_conn()?;
        let known = self.table_columns(&conn, table)?;
        if !known.contains(field) {
            return Err(SyncError::storage(format!(
                "Column '{}' is not valid for table '{}'",
                field, table
            )));
        }
        select_records(
            &conn,
            table,
            &format!("WHERE {} = ?1", quote_identifier(field)),
            &[&value],
        )
    }

    async fn count_pending(&self, table: &str) -> Result<u64> {
        validate_sync_table(table)?;
        let conn = self.lock_conn()?;
        let dirty: i64 = conn
            .query_row(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE sync_status != 'synced'",
                    quote_identifier(table)
                ),
                [],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        let tombstones: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sync_tombstones WHERE table_name = ?1",
                [table],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok((dirty + tombstones) as u64)
    }

    async fn collect_dirty(&self) -> Result<Changeset> {
        let conn = self.lock_conn()?;
        let mut changes = Changeset::default();
        for table in GALLERY_SYNC_TABLES {
            let mut entry = TableChanges::default();
            for record in select_records(
                &conn,
                table,
                "WHERE sync_status IN ('created', 'updated') ORDER BY updated_at",
                &[],
            )? {
                match record.str_field("sync_status") {
                    Some("created") => entry.created.push(record),
                    _ => entry.updated.push(record),
                }
            }

            let mut stmt = conn
                .prepare(
                    "SELECT record_id FROM sync_tombstones WHERE table_name = ?1 \
                     ORDER BY deleted_at",
                )
                .map_err(db_err)?;
            entry.deleted = stmt
                .query_map([table], |row| row.get::<_, String>(0))
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;

            if !entry.is_empty() {
                changes.tables.insert(table.to_string(), entry);
            }
        }
        Ok(changes)
    }

    async fn apply_remote_changes(&self, changes: &Changeset) -> Result<()> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        for (table, table_changes) in &changes.tables {
            if validate_sync_table(table).is_err() {
                warn!("[SqliteReplica] Ignoring pulled changes for unknown table '{}'", table);
                continue;
            }
            for record in table_changes.upserts() {
                let fields = self.filter_remote_fields(&tx, table, record)?;
                insert_row(&tx, table, &record.id, &fields, "synced", true)?;
            }
            for id in &table_changes.deleted {
                tx.execute(
                    &format!("DELETE FROM {} WHERE id = ?1", quote_identifier(table)),
                    [id],
                )
                .map_err(db_err)?;
                tx.execute(
                    "DELETE FROM sync_tombstones WHERE table_name = ?1 AND record_id = ?2",
                    params![table, id],
                )
                .map_err(db_err)?;
            }
        }
        tx.commit().map_err(db_err)?;
        debug!(
            "[SqliteReplica] Applied {} pulled records",
            changes.record_count()
        );
        Ok(())
    }

    async fn mark_changeset_synced(&self, changes: &Changeset) -> Result<()> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        for (table, table_changes) in &changes.tables {
            if validate_sync_table(table).is_err() {
                continue;
            }
            for record in table_changes.upserts() {
                tx.execute(
                    &format!(
                        "UPDATE {} SET sync_status = 'synced' WHERE id = ?1",
                        quote_identifier(table)
                    ),
                    [record.id.as_str()],
                )
                .map_err(db_err)?;
            }
            for id in &table_changes.deleted {
                tx.execute(
                    "DELETE FROM sync_tombstones WHERE table_name = ?1 AND record_id = ?2",
                    params![table, id],
                )
                .map_err(db_err)?;
            }
        }
        tx.commit().map_err(db_err)
    }

    async fn create_image_with_relations(
        &self,
        image: Fields,
        relations: Vec<(String, Fields)>,
    ) -> Result<Record> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction().map_err(db_err)?;

        let (image_id, image_fields) = prepare_new_row(image);
        self.validate_columns(&tx, IMAGES_TABLE, &image_fields)?;
        insert_row(&tx, IMAGES_TABLE, &image_id, &image_fields, "created", false)?;

        for (table, fields) in relations {
            validate_sync_table(&table)?;
            let (relation_id, relation_fields) = prepare_new_row(fields);
            self.validate_columns(&tx, &table, &relation_fields)?;
            insert_row(&tx, &table, &relation_id, &relation_fields, "created", false)?;
        }

        let record = Self::find_one(&tx, IMAGES_TABLE, &image_id)?
            .ok_or_else(|| SyncError::storage(format!("Created image {} vanished", image_id)))?;
        tx.commit().map_err(db_err)?;
        Ok(record)
    }

    async fn delete_image_and_relations(&self, image_id: &str) -> Result<CascadeReport> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        let mut report = CascadeReport::default();

        for table in IMAGE_RELATION_TABLES {
            let mut stmt = tx
                .prepare(&format!(
                    "SELECT id FROM {} WHERE image_id = ?1",
                    quote_identifier(table)
                ))
                .map_err(db_err)?;
            let relation_ids: Vec<String> = stmt
                .query_map([image_id], |row| row.get(0))
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            for id in &relation_ids {
                delete_row(&tx, table, id)?;
            }
            if !relation_ids.is_empty() {
                report.removed.insert(table.to_string(), relation_ids.len());
            }
        }
        report.image_removed = delete_row(&tx, IMAGES_TABLE, image_id)?;

        tx.commit().map_err(db_err)?;
        Ok(report)
    }

    async fn last_pulled_at(&self) -> Result<i64> {
        let conn = self.lock_conn()?;
        conn.query_row("SELECT last_pulled_at FROM sync_cursor WHERE id = 1", [], |row| {
            row.get(0)
        })
        .map_err(db_err)
    }

    async fn set_last_pulled_at(&self, timestamp: i64) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE sync_cursor SET last_pulled_at = ?1 WHERE id = 1",
            [timestamp],
        )
        .map_err(db_err)?;
        Ok(())
    }
}
