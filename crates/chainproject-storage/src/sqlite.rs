//! SQLite projection store.
//!
//! Persists records, the checkpoint, and reorg snapshots to a single SQLite
//! file. Uses `sqlx` with WAL mode so readers are not blocked by the writer.
//!
//! Snapshots are not copies: every mutation appends the record's prior value
//! to an undo journal, and a snapshot remembers the journal position it was
//! taken at. Reverting replays the journal backward to that position.
//!
//! # Usage
//! ```rust,no_run
//! use chainproject_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./projection.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnection, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use chainproject_core::checkpoint::Checkpoint;
use chainproject_core::error::StoreError;
use chainproject_core::store::{apply_mutation, ProjectionStore, SnapshotTag, WriteBatch};
use chainproject_core::types::MappingRecord;

const RECORD_COLUMNS: &str = "id, key, foreign_token, home_token, foreign_bridge, home_bridge, \
                              foreign_start_block, home_start_block";

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// SQLite-backed projection store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./projection.db"`) or a full
    /// SQLite URL (`"sqlite:./projection.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(db_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Every pooled connection to `sqlite::memory:` is its own database, so
    /// the pool is pinned to one long-lived connection.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect("sqlite::memory:")
            .await
            .map_err(db_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS records (
                id                  TEXT    PRIMARY KEY,
                key                 TEXT    NOT NULL,
                foreign_token       TEXT    NOT NULL,
                home_token          TEXT    NOT NULL,
                foreign_bridge      TEXT    NOT NULL,
                home_bridge         TEXT    NOT NULL,
                foreign_start_block INTEGER NOT NULL,
                home_start_block    INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        // Single-row table
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoint (
                id           INTEGER PRIMARY KEY CHECK (id = 0),
                block_number INTEGER NOT NULL,
                block_hash   TEXT    NOT NULL,
                updated_at   INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        // Undo log: `prior` is the record JSON before the mutation, NULL if absent.
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS journal (
                seq       INTEGER PRIMARY KEY AUTOINCREMENT,
                record_id TEXT    NOT NULL,
                prior     TEXT
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS snapshots (
                block_number INTEGER NOT NULL,
                block_hash   TEXT    NOT NULL,
                journal_seq  INTEGER NOT NULL,
                checkpoint   TEXT,
                PRIMARY KEY (block_number, block_hash)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }
}

// ─── Row helpers ─────────────────────────────────────────────────────────────

fn record_from_row(row: &SqliteRow) -> MappingRecord {
    MappingRecord {
        id: row.get("id"),
        key: row.get("key"),
        foreign_token: row.get("foreign_token"),
        home_token: row.get("home_token"),
        foreign_bridge: row.get("foreign_bridge"),
        home_bridge: row.get("home_bridge"),
        foreign_start_block: row.get::<i64, _>("foreign_start_block") as u64,
        home_start_block: row.get::<i64, _>("home_start_block") as u64,
    }
}

async fn fetch_record(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<MappingRecord>, StoreError> {
    let row = sqlx::query(&format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(row.as_ref().map(record_from_row))
}

async fn write_record(conn: &mut SqliteConnection, rec: &MappingRecord) -> Result<(), StoreError> {
    sqlx::query(&format!(
        "INSERT OR REPLACE INTO records ({RECORD_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(&rec.id)
    .bind(&rec.key)
    .bind(&rec.foreign_token)
    .bind(&rec.home_token)
    .bind(&rec.foreign_bridge)
    .bind(&rec.home_bridge)
    .bind(rec.foreign_start_block as i64)
    .bind(rec.home_start_block as i64)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn remove_record(conn: &mut SqliteConnection, id: &str) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM records WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(())
}

async fn fetch_checkpoint(conn: &mut SqliteConnection) -> Result<Option<Checkpoint>, StoreError> {
    let row = sqlx::query(
        "SELECT block_number, block_hash, updated_at FROM checkpoint WHERE id = 0",
    )
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err)?;

    Ok(row.map(|r| Checkpoint {
        block_number: r.get::<i64, _>("block_number") as u64,
        block_hash: r.get("block_hash"),
        updated_at: r.get("updated_at"),
    }))
}

async fn write_checkpoint(conn: &mut SqliteConnection, cp: &Checkpoint) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT OR REPLACE INTO checkpoint (id, block_number, block_hash, updated_at)
         VALUES (0, ?, ?, ?)",
    )
    .bind(cp.block_number as i64)
    .bind(&cp.block_hash)
    .bind(cp.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(json: &str) -> Result<T, StoreError> {
    serde_json::from_str(json).map_err(|e| StoreError::Corrupted(e.to_string()))
}

// ─── ProjectionStore impl ────────────────────────────────────────────────────

#[async_trait]
impl ProjectionStore for SqliteStore {
    async fn load(&self, id: &str) -> Result<Option<MappingRecord>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        fetch_record(&mut conn, id).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        for mutation in &batch.mutations {
            let id = mutation.id();
            let prior = fetch_record(&mut tx, id).await?;
            let prior_json = prior.as_ref().map(to_json).transpose()?;

            sqlx::query("INSERT INTO journal (record_id, prior) VALUES (?, ?)")
                .bind(id)
                .bind(prior_json)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;

            match apply_mutation(prior, mutation) {
                Some(record) => write_record(&mut tx, &record).await?,
                None => remove_record(&mut tx, id).await?,
            }
        }

        if let Some(cp) = &batch.checkpoint {
            write_checkpoint(&mut tx, cp).await?;
        }

        tx.commit().await.map_err(db_err)?;

        debug!(
            mutations = batch.mutations.len(),
            block = batch.checkpoint.as_ref().map(|cp| cp.block_number),
            "batch committed"
        );
        Ok(())
    }

    async fn load_checkpoint(&self) -> Result<Option<Checkpoint>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        fetch_checkpoint(&mut conn).await
    }

    async fn snapshot(&self, tag: &SnapshotTag) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let checkpoint = fetch_checkpoint(&mut tx).await?;
        let checkpoint_json = checkpoint.as_ref().map(to_json).transpose()?;

        sqlx::query(
            "INSERT OR REPLACE INTO snapshots (block_number, block_hash, journal_seq, checkpoint)
             VALUES (?, ?, (SELECT COALESCE(MAX(seq), 0) FROM journal), ?)",
        )
        .bind(tag.block_number as i64)
        .bind(&tag.block_hash)
        .bind(checkpoint_json)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        debug!(block = tag.block_number, "snapshot taken");
        Ok(())
    }

    async fn revert_to(&self, tag: &SnapshotTag) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let snapshot = sqlx::query(
            "SELECT journal_seq, checkpoint FROM snapshots
             WHERE block_number = ? AND block_hash = ?",
        )
        .bind(tag.block_number as i64)
        .bind(&tag.block_hash)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| StoreError::UnknownSnapshot {
            block_number: tag.block_number,
            block_hash: tag.block_hash.clone(),
        })?;

        let seq: i64 = snapshot.get("journal_seq");
        let checkpoint_json: Option<String> = snapshot.get("checkpoint");

        let entries = sqlx::query(
            "SELECT record_id, prior FROM journal WHERE seq > ? ORDER BY seq DESC",
        )
        .bind(seq)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?;

        for entry in &entries {
            let id: String = entry.get("record_id");
            match entry.get::<Option<String>, _>("prior") {
                Some(json) => write_record(&mut tx, &from_json::<MappingRecord>(&json)?).await?,
                None => remove_record(&mut tx, &id).await?,
            }
        }

        sqlx::query("DELETE FROM journal WHERE seq > ?")
            .bind(seq)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        match checkpoint_json {
            Some(json) => write_checkpoint(&mut tx, &from_json::<Checkpoint>(&json)?).await?,
            None => {
                sqlx::query("DELETE FROM checkpoint")
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
            }
        }

        sqlx::query("DELETE FROM snapshots WHERE block_number > ?")
            .bind(tag.block_number as i64)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        debug!(
            block = tag.block_number,
            undone = entries.len(),
            "reverted to snapshot"
        );
        Ok(())
    }

    async fn snapshots(&self) -> Result<Vec<SnapshotTag>, StoreError> {
        let rows = sqlx::query(
            "SELECT block_number, block_hash FROM snapshots ORDER BY block_number, block_hash",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .iter()
            .map(|r| SnapshotTag {
                block_number: r.get::<i64, _>("block_number") as u64,
                block_hash: r.get("block_hash"),
            })
            .collect())
    }

    async fn prune_snapshots(&self, block_number: u64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("DELETE FROM snapshots WHERE block_number < ?")
            .bind(block_number as i64)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        // Journal entries at or below the oldest remaining snapshot can never be replayed.
        sqlx::query(
            "DELETE FROM journal WHERE seq <= COALESCE(
                (SELECT MIN(journal_seq) FROM snapshots),
                (SELECT MAX(seq) FROM journal)
             )",
        )
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        debug!(below = block_number, "snapshots pruned");
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<MappingRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM records ORDER BY id LIMIT ?"
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.iter().map(record_from_row).collect())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM records")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        let cnt: i64 = row.get("cnt");
        Ok(cnt as usize)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chainproject_core::store::Mutation;
    use chainproject_core::types::RecordPatch;

    fn full_patch(n: u64) -> RecordPatch {
        RecordPatch {
            key: Some(format!("0x{n:02x}")),
            foreign_token: Some("0xaaa".into()),
            home_token: Some("0xbbb".into()),
            foreign_bridge: Some("0xccc".into()),
            home_bridge: Some("0xddd".into()),
            foreign_start_block: Some(100 + n),
            home_start_block: Some(200 + n),
        }
    }

    fn tag(n: u64) -> SnapshotTag {
        SnapshotTag {
            block_number: n,
            block_hash: format!("0x{n:064x}"),
        }
    }

    fn cp(n: u64) -> Checkpoint {
        Checkpoint {
            block_number: n,
            block_hash: format!("0x{n:064x}"),
            updated_at: 1_700_000_000,
        }
    }

    // ── Records ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn upsert_and_load() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.upsert("0xabc", full_patch(1)).await.unwrap();

        let rec = store.load("0xabc").await.unwrap().unwrap();
        assert_eq!(rec.key, "0x01");
        assert_eq!(rec.home_bridge, "0xddd");
        assert_eq!(rec.foreign_start_block, 101);
        assert_eq!(rec.home_start_block, 201);
        assert!(store.load("0xmissing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn partial_upsert_merges() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.upsert("0xabc", full_patch(1)).await.unwrap();
        store
            .upsert(
                "0xabc",
                RecordPatch {
                    home_start_block: Some(999),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let rec = store.load("0xabc").await.unwrap().unwrap();
        assert_eq!(rec.home_start_block, 999);
        assert_eq!(rec.foreign_start_block, 101);
        assert_eq!(rec.foreign_token, "0xaaa");
    }

    #[tokio::test]
    async fn delete_and_count() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.upsert("0x1", full_patch(1)).await.unwrap();
        store.upsert("0x2", full_patch(2)).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);

        store.delete("0x1").await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store.load("0x1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn commit_is_all_or_nothing_with_checkpoint() {
        let store = SqliteStore::in_memory().await.unwrap();
        let batch = WriteBatch::new()
            .push(Mutation::Upsert {
                id: "0x1".into(),
                patch: full_patch(1),
            })
            .checkpoint(cp(10));
        store.commit(batch).await.unwrap();

        assert_eq!(store.load_checkpoint().await.unwrap(), Some(cp(10)));
        assert!(store.load("0x1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn list_orders_by_id() {
        let store = SqliteStore::in_memory().await.unwrap();
        for id in ["0xc", "0xa", "0xb"] {
            store.upsert(id, full_patch(0)).await.unwrap();
        }
        let ids: Vec<_> = store
            .list(usize::MAX)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["0xa", "0xb", "0xc"]);
        assert_eq!(store.list(1).await.unwrap().len(), 1);
    }

    // ── Snapshots ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn revert_replays_journal_backward() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .commit(
                WriteBatch::new()
                    .push(Mutation::Upsert {
                        id: "0xa".into(),
                        patch: full_patch(1),
                    })
                    .checkpoint(cp(5)),
            )
            .await
            .unwrap();
        store.snapshot(&tag(5)).await.unwrap();
        let before = store.list(usize::MAX).await.unwrap();

        store.upsert("0xa", full_patch(2)).await.unwrap();
        store.upsert("0xa", full_patch(3)).await.unwrap();
        store.upsert("0xb", full_patch(4)).await.unwrap();
        store
            .commit(WriteBatch::new().push(Mutation::Delete { id: "0xa".into() }).checkpoint(cp(7)))
            .await
            .unwrap();
        store.snapshot(&tag(7)).await.unwrap();

        store.revert_to(&tag(5)).await.unwrap();

        assert_eq!(store.list(usize::MAX).await.unwrap(), before);
        assert_eq!(store.load_checkpoint().await.unwrap(), Some(cp(5)));
        assert_eq!(store.snapshots().await.unwrap(), vec![tag(5)]);
    }

    #[tokio::test]
    async fn revert_to_genesis_snapshot_clears_checkpoint() {
        let store = SqliteStore::in_memory().await.unwrap();
        let genesis = SnapshotTag::from(&Checkpoint::genesis());
        store.snapshot(&genesis).await.unwrap();
        store
            .commit(
                WriteBatch::new()
                    .push(Mutation::Upsert {
                        id: "0xa".into(),
                        patch: full_patch(1),
                    })
                    .checkpoint(cp(3)),
            )
            .await
            .unwrap();

        store.revert_to(&genesis).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.load_checkpoint().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn revert_unknown_snapshot_errors() {
        let store = SqliteStore::in_memory().await.unwrap();
        let err = store.revert_to(&tag(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownSnapshot { block_number: 1, .. }));
    }

    #[tokio::test]
    async fn prune_keeps_newer_snapshots_revertible() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.snapshot(&tag(1)).await.unwrap();
        store.upsert("0xa", full_patch(1)).await.unwrap();
        store.snapshot(&tag(2)).await.unwrap();
        store.upsert("0xa", full_patch(2)).await.unwrap();
        store.snapshot(&tag(3)).await.unwrap();
        store.upsert("0xa", full_patch(3)).await.unwrap();

        store.prune_snapshots(2).await.unwrap();
        assert_eq!(store.snapshots().await.unwrap(), vec![tag(2), tag(3)]);

        store.revert_to(&tag(2)).await.unwrap();
        let rec = store.load("0xa").await.unwrap().unwrap();
        assert_eq!(rec.key, "0x01");
    }

    // ── Persistence ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("projection.db");
        let path = path.to_str().unwrap();

        {
            let store = SqliteStore::open(path).await.unwrap();
            store.snapshot(&tag(4)).await.unwrap();
            store
                .commit(
                    WriteBatch::new()
                        .push(Mutation::Upsert {
                            id: "0xa".into(),
                            patch: full_patch(1),
                        })
                        .checkpoint(cp(5)),
                )
                .await
                .unwrap();
            store.pool.close().await;
        }

        let store = SqliteStore::open(path).await.unwrap();
        assert_eq!(store.load_checkpoint().await.unwrap(), Some(cp(5)));
        assert_eq!(store.load("0xa").await.unwrap().unwrap().key, "0x01");
        assert_eq!(store.snapshots().await.unwrap(), vec![tag(4)]);
    }
}
