use rusqlite::{params, OptionalExtension};

use mendkit_recon::MigrationState;

use crate::error::SqliteStoreError;
use crate::sqlite::SqliteStore;

impl SqliteStore {
    /// Persisted run-once state of `job`; `NotStarted` if it never ran.
    pub fn load_state(&self, job: &str) -> Result<MigrationState, SqliteStoreError> {
        let state: Option<String> = self
            .conn
            .query_row(
                "SELECT state FROM migration_state WHERE job = ?1",
                params![job],
                |row| row.get(0),
            )
            .optional()?;
        match state {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(MigrationState::NotStarted),
        }
    }

    pub fn save_state(&self, job: &str, state: &MigrationState) -> Result<(), SqliteStoreError> {
        self.conn.execute(
            "INSERT INTO migration_state (job, state, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (job) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at",
            params![job, serde_json::to_string(state)?, chrono::Utc::now().to_rfc3339()],
        )?;
        tracing::debug!(job, ?state, "migration state saved");
        Ok(())
    }

    /// Forget `job`'s progress. Returns whether anything was stored.
    pub fn reset_state(&self, job: &str) -> Result<bool, SqliteStoreError> {
        let n = self
            .conn
            .execute("DELETE FROM migration_state WHERE job = ?1", params![job])?;
        if n > 0 {
            tracing::info!(job, "migration state reset");
        }
        Ok(n > 0)
    }

    /// Every job with stored state, by name.
    pub fn states(&self) -> Result<Vec<(String, MigrationState)>, SqliteStoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT job, state FROM migration_state ORDER BY job")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        let mut states = Vec::new();
        for row in rows {
            let (job, json) = row?;
            states.push((job, serde_json::from_str(&json)?));
        }
        Ok(states)
    }
}

#[cfg(test)]
mod tests {
    use mendkit_recon::BatchOffset;

    use super::*;

    #[test]
    fn unknown_job_has_not_started() {
        let s = SqliteStore::open_in_memory().unwrap();
        assert_eq!(s.load_state("never").unwrap(), MigrationState::NotStarted);
    }

    #[test]
    fn save_overwrites_and_reset_clears() {
        let s = SqliteStore::open_in_memory().unwrap();
        let progress = MigrationState::InProgress {
            offset: BatchOffset::after(50),
        };
        s.save_state("owners", &progress).unwrap();
        assert_eq!(s.load_state("owners").unwrap(), progress);

        s.save_state("owners", &MigrationState::Completed).unwrap();
        assert_eq!(s.load_state("owners").unwrap(), MigrationState::Completed);
        assert_eq!(s.states().unwrap(), vec![("owners".to_string(), MigrationState::Completed)]);

        assert!(s.reset_state("owners").unwrap());
        assert!(!s.reset_state("owners").unwrap());
        assert_eq!(s.load_state("owners").unwrap(), MigrationState::NotStarted);
    }
}
