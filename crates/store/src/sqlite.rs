// Record store on a single SQLite file.
//
// Every dataset lives in one `records` table; a record's attributes are a
// JSON object in `data`, queried with `json_extract`.

use std::path::Path;

use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};

use mendkit_recon::merge::MergeKey;
use mendkit_recon::model::Attributes;
use mendkit_recon::{AttrValue, Candidate, Capabilities, ChangeSet, RecordId, Store, StoreError, StoreRead};

use crate::error::SqliteStoreError;

pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    dataset TEXT NOT NULL,
    id INTEGER NOT NULL,
    data TEXT NOT NULL,            -- JSON object of attributes
    PRIMARY KEY (dataset, id)
);

CREATE TABLE IF NOT EXISTS migration_state (
    job TEXT PRIMARY KEY,
    state TEXT NOT NULL,           -- JSON MigrationState
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_log (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    recorded_at TEXT NOT NULL,
    job TEXT NOT NULL,
    dataset TEXT NOT NULL,
    record_id INTEGER NOT NULL,
    mode TEXT NOT NULL,            -- execute | preview
    category TEXT NOT NULL,
    detail TEXT
);
"#;

/// Record count for one dataset.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DatasetInfo {
    pub name: String,
    pub records: usize,
}

pub struct SqliteStore {
    pub(crate) conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, SqliteStoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        tracing::debug!(path = %path.display(), "store opened");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, SqliteStoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Insert or replace records in one transaction. Returns the number written.
    pub fn upsert<I>(&mut self, dataset: &str, records: I) -> Result<usize, SqliteStoreError>
    where
        I: IntoIterator<Item = (RecordId, Attributes)>,
    {
        let tx = self.conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO records (dataset, id, data) VALUES (?1, ?2, ?3)
                 ON CONFLICT (dataset, id) DO UPDATE SET data = excluded.data",
            )?;
            for (id, attributes) in records {
                stmt.execute(params![dataset, sql_id(id)?, serde_json::to_string(&attributes)?])?;
                written += 1;
            }
        }
        tx.commit()?;
        tracing::info!(dataset, written, "records upserted");
        Ok(written)
    }

    pub fn datasets(&self) -> Result<Vec<DatasetInfo>, SqliteStoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT dataset, COUNT(*) FROM records GROUP BY dataset ORDER BY dataset")?;
        let rows = stmt.query_map([], |row| {
            Ok(DatasetInfo {
                name: row.get(0)?,
                records: row.get::<_, i64>(1)? as usize,
            })
        })?;
        let datasets = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(datasets)
    }

    pub fn count(&self, dataset: &str) -> Result<usize, SqliteStoreError> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE dataset = ?1",
            params![dataset],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    fn load(&self, dataset: &str, id: RecordId) -> Result<Option<Candidate>, SqliteStoreError> {
        let data: Option<String> = self
            .conn
            .query_row(
                "SELECT data FROM records WHERE dataset = ?1 AND id = ?2",
                params![dataset, sql_id(id)?],
                |row| row.get(0),
            )
            .optional()?;
        data.map(|data| decode(id, &data)).transpose()
    }

    fn ids_after(&self, dataset: &str, after: Option<RecordId>, limit: usize) -> Result<Vec<RecordId>, SqliteStoreError> {
        let after = match after {
            Some(id) => sql_id(id)?,
            None => -1,
        };
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id FROM records WHERE dataset = ?1 AND id > ?2 ORDER BY id LIMIT ?3")?;
        let ids = stmt.query_map(params![dataset, after, limit], |row| row.get::<_, i64>(0))?;
        let ids = ids.map(|id| id.map(record_id)).collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn first_with(&self, dataset: &str, attribute: &str, value: &AttrValue) -> Result<Option<Candidate>, SqliteStoreError> {
        let found: Option<(i64, String)> = self
            .conn
            .query_row(
                "SELECT id, data FROM records
                 WHERE dataset = ?1 AND json_extract(data, ?2) = ?3
                 ORDER BY id LIMIT 1",
                params![dataset, json_path(attribute), sql_value(value)],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        found
            .map(|(id, data)| decode(record_id(id), &data))
            .transpose()
    }

    fn first_with_key(
        &self,
        dataset: &str,
        attributes: &[String],
        key: &MergeKey,
        exclude: RecordId,
    ) -> Result<Option<RecordId>, SqliteStoreError> {
        let mut sql = String::from("SELECT id FROM records WHERE dataset = ?1 AND id != ?2");
        let mut args: Vec<Value> = vec![Value::Text(dataset.to_string()), Value::Integer(sql_id(exclude)?)];

        for (attribute, value) in attributes.iter().zip(&key.0) {
            args.push(Value::Text(json_path(attribute)));
            let path = args.len();
            if matches!(value, AttrValue::Null) {
                sql.push_str(&format!(" AND json_extract(data, ?{path}) IS NULL"));
            } else {
                args.push(sql_value(value));
                sql.push_str(&format!(" AND json_extract(data, ?{path}) = ?{}", args.len()));
            }
        }
        sql.push_str(" ORDER BY id LIMIT 1");

        let id: Option<i64> = self
            .conn
            .query_row(&sql, rusqlite::params_from_iter(args), |row| row.get(0))
            .optional()?;
        Ok(id.map(record_id))
    }

    fn apply(&mut self, dataset: &str, id: RecordId, changes: &ChangeSet) -> Result<bool, SqliteStoreError> {
        let tx = self.conn.transaction()?;
        let data: Option<String> = tx
            .query_row(
                "SELECT data FROM records WHERE dataset = ?1 AND id = ?2",
                params![dataset, sql_id(id)?],
                |row| row.get(0),
            )
            .optional()?;
        let Some(data) = data else {
            return Ok(false);
        };

        let mut attributes: Attributes = serde_json::from_str(&data)?;
        for (name, value) in changes.iter() {
            attributes.insert(name.clone(), value.clone());
        }
        tx.execute(
            "UPDATE records SET data = ?3 WHERE dataset = ?1 AND id = ?2",
            params![dataset, sql_id(id)?, serde_json::to_string(&attributes)?],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn remove(&mut self, dataset: &str, id: RecordId) -> Result<bool, SqliteStoreError> {
        let n = self.conn.execute(
            "DELETE FROM records WHERE dataset = ?1 AND id = ?2",
            params![dataset, sql_id(id)?],
        )?;
        Ok(n > 0)
    }
}

impl StoreRead for SqliteStore {
    fn capabilities(&self) -> Capabilities {
        Capabilities::ALL
    }

    fn list_ids(&self, dataset: &str, after: Option<RecordId>, limit: usize) -> Result<Vec<RecordId>, StoreError> {
        self.ids_after(dataset, after, limit)
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    fn read(&self, dataset: &str, id: RecordId) -> Result<Option<Candidate>, StoreError> {
        Ok(self.load(dataset, id)?)
    }

    fn find_by_attribute(
        &self,
        dataset: &str,
        attribute: &str,
        value: &AttrValue,
    ) -> Result<Option<Candidate>, StoreError> {
        if value.is_empty() {
            return Ok(None);
        }
        Ok(self.first_with(dataset, attribute, value)?)
    }

    fn exists_with_key(
        &self,
        dataset: &str,
        attributes: &[String],
        key: &MergeKey,
        exclude: RecordId,
    ) -> Result<Option<RecordId>, StoreError> {
        Ok(self.first_with_key(dataset, attributes, key, exclude)?)
    }
}

impl Store for SqliteStore {
    fn commit(&mut self, dataset: &str, id: RecordId, changes: &ChangeSet) -> Result<(), StoreError> {
        if changes.is_empty() {
            return Ok(());
        }
        if self.apply(dataset, id, changes)? {
            Ok(())
        } else {
            Err(StoreError::NotFound {
                dataset: dataset.to_string(),
                id,
            })
        }
    }

    fn delete(&mut self, dataset: &str, id: RecordId) -> Result<(), StoreError> {
        if self.remove(dataset, id)? {
            Ok(())
        } else {
            Err(StoreError::NotFound {
                dataset: dataset.to_string(),
                id,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Value mapping
// ---------------------------------------------------------------------------

pub(crate) fn sql_id(id: RecordId) -> Result<i64, SqliteStoreError> {
    i64::try_from(id.0).map_err(|_| SqliteStoreError::IdOutOfRange(id.0))
}

// Only ids that passed through `sql_id` are ever stored.
pub(crate) fn record_id(id: i64) -> RecordId {
    RecordId(id as u64)
}

fn sql_value(value: &AttrValue) -> Value {
    match value {
        AttrValue::Null => Value::Null,
        AttrValue::Integer(n) => Value::Integer(*n),
        AttrValue::Text(s) => Value::Text(s.clone()),
    }
}

/// `$."name"`, so attribute names containing dots are not read as paths.
fn json_path(attribute: &str) -> String {
    format!("$.\"{}\"", attribute.replace('"', "\\\""))
}

fn decode(id: RecordId, data: &str) -> Result<Candidate, SqliteStoreError> {
    Ok(Candidate::new(id, serde_json::from_str(data)?))
}
