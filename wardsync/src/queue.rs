//! Local durable queue of pending clinical writes
//!
//! The queue is the single source of truth for not-yet-synced captures. An
//! item is either present (pending) or absent (synced and removed); there is
//! no terminal failed state. Payloads are sealed at rest through the injected
//! [`PayloadCipher`] and only opened when read back for replay.

use crate::config::QueueConfig;
use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use crypto::PayloadCipher;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Kind of clinical write a queue item carries.
/// Determines which remote applier handles it during replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    VitalSigns,
    MedicationRecord,
    Procedure,
    Note,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::VitalSigns => "vital_signs",
            RecordKind::MedicationRecord => "medication_record",
            RecordKind::Procedure => "procedure",
            RecordKind::Note => "note",
        }
    }

    pub fn parse(s: &str) -> SyncResult<Self> {
        match s {
            "vital_signs" => Ok(RecordKind::VitalSigns),
            "medication_record" => Ok(RecordKind::MedicationRecord),
            "procedure" => Ok(RecordKind::Procedure),
            "note" => Ok(RecordKind::Note),
            _ => Err(SyncError::InvalidOperation(format!(
                "Unknown record kind: {}",
                s
            ))),
        }
    }
}

/// A pending clinical write
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    /// Unique item ID, assigned at enqueue time, never reused.
    /// Doubles as the idempotency key for the remote create.
    pub id: Uuid,

    /// Caregiver the item belongs to; all queue reads are scoped to one owner
    pub owner_id: String,

    /// Which clinical write this is
    pub kind: RecordKind,

    /// Decrypted clinical payload, shaped per `kind`
    pub payload: serde_json::Value,

    /// Enqueue time, used for ordering and debugging only
    pub enqueued_at: DateTime<Utc>,

    /// Number of failed replay attempts (diagnostic, never gates retry)
    pub attempts: i32,

    /// Last replay error, if any
    pub last_error: Option<String>,
}

/// Encrypted, append-capable local store of pending write operations
pub struct OfflineQueue {
    pool: SqlitePool,
    cipher: Arc<dyn PayloadCipher>,
}

impl OfflineQueue {
    /// Open (creating if missing) the local queue database
    pub async fn new(config: QueueConfig, cipher: Arc<dyn PayloadCipher>) -> SyncResult<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", config.db_path))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        // WAL for better concurrency between enqueue and drain
        if config.enable_wal {
            sqlx::query("PRAGMA journal_mode = WAL")
                .execute(&pool)
                .await?;
        }

        // Overwrite freed pages so removed clinical payloads are truly gone
        if config.enable_secure_delete {
            sqlx::query("PRAGMA secure_delete = ON")
                .execute(&pool)
                .await?;
        }

        let queue = Self { pool, cipher };
        queue.initialize_schema().await?;

        tracing::info!(
            db_path = %config.db_path,
            cipher = queue.cipher.algorithm(),
            "Opened offline queue"
        );

        Ok(queue)
    }

    async fn initialize_schema(&self) -> SyncResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_queue (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                enqueued_at TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sync_queue_owner ON sync_queue(owner_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sync_queue_enqueued ON sync_queue(enqueued_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Persist a pending clinical write.
    ///
    /// The payload is sealed before it touches the storage medium. Storage
    /// errors propagate to the caller; a silently lost clinical write is a
    /// patient-safety defect.
    pub async fn add_to_queue(
        &self,
        owner_id: &str,
        kind: RecordKind,
        payload: serde_json::Value,
    ) -> SyncResult<QueueItem> {
        let id = Uuid::new_v4();
        let enqueued_at = Utc::now();

        let plaintext = serde_json::to_vec(&payload)?;
        let sealed = self.cipher.seal(&plaintext)?;

        sqlx::query(
            r#"
            INSERT INTO sync_queue (id, owner_id, kind, payload, enqueued_at, attempts)
            VALUES (?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(id.to_string())
        .bind(owner_id)
        .bind(kind.as_str())
        .bind(&sealed)
        .bind(enqueued_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            item_id = %id,
            owner_id = owner_id,
            kind = kind.as_str(),
            "Queued clinical write for sync"
        );

        Ok(QueueItem {
            id,
            owner_id: owner_id.to_string(),
            kind,
            payload,
            enqueued_at,
            attempts: 0,
            last_error: None,
        })
    }

    /// All pending items for one caregiver, oldest first, payloads opened.
    ///
    /// Restartable: reflects current store state, not a consumed stream.
    pub async fn pending_items(&self, owner_id: &str) -> SyncResult<Vec<QueueItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner_id, kind, payload, enqueued_at, attempts, last_error
            FROM sync_queue
            WHERE owner_id = ?
            ORDER BY enqueued_at ASC, rowid ASC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let owner_id: String = row.try_get("owner_id")?;
            let kind: String = row.try_get("kind")?;
            let sealed: String = row.try_get("payload")?;
            let enqueued_at: String = row.try_get("enqueued_at")?;
            let attempts: i32 = row.try_get("attempts")?;
            let last_error: Option<String> = row.try_get("last_error")?;

            let plaintext = self.cipher.open(&sealed)?;
            let payload: serde_json::Value = serde_json::from_slice(&plaintext)?;

            items.push(QueueItem {
                id: Uuid::parse_str(&id)
                    .map_err(|e| SyncError::Internal(format!("Invalid UUID: {}", e)))?,
                owner_id,
                kind: RecordKind::parse(&kind)?,
                payload,
                enqueued_at: DateTime::parse_from_rfc3339(&enqueued_at)
                    .map_err(|e| SyncError::Internal(format!("Invalid timestamp: {}", e)))?
                    .with_timezone(&Utc),
                attempts,
                last_error,
            });
        }

        Ok(items)
    }

    /// Remove a synced item. Idempotent: removing an absent id is a no-op,
    /// so a duplicate removal after a retried pass is harmless.
    pub async fn remove_from_queue(&self, id: Uuid) -> SyncResult<()> {
        let result = sqlx::query("DELETE FROM sync_queue WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            tracing::debug!(item_id = %id, "Removed synced item from queue");
        }

        Ok(())
    }

    /// Count of pending items for badge display. Does not decrypt payloads.
    pub async fn pending_count(&self, owner_id: &str) -> SyncResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM sync_queue WHERE owner_id = ?")
            .bind(owner_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get("n")?)
    }

    /// Record a failed replay attempt. The item stays pending.
    pub async fn record_failure(&self, id: Uuid, error: &str) -> SyncResult<()> {
        sqlx::query(
            r#"
            UPDATE sync_queue
            SET attempts = attempts + 1,
                last_error = ?
            WHERE id = ?
            "#,
        )
        .bind(error)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        tracing::warn!(item_id = %id, error = error, "Item replay failed; left in queue");

        Ok(())
    }

    /// Vacuum to reclaim space and securely overwrite freed pages.
    /// Worth running after a large drain.
    pub async fn vacuum(&self) -> SyncResult<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    /// Close the underlying pool. Any later operation on this queue
    /// returns a storage error.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
