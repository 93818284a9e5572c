//! Replication checkpoint persistence.
//!
//! The checkpoint is a single 64-bit logical position, the oplog timestamp of
//! the last entry fully applied to the target. It lives in the target store
//! itself, in the reserved `replication_checkpoint` table, one row per source
//! database identity. Writes happen only after the corresponding mutation has
//! committed; monotonicity is enforced by the caller, not here. Running two
//! tailer instances against the same source/target pair is unsupported.

use mysql_async::prelude::Queryable;
use tracing::debug;

use crate::mysql::statement::CHECKPOINT_TABLE;
use crate::mysql::ConnectionManager;
use crate::Result;

#[derive(Clone)]
pub struct CheckpointStore {
    manager: ConnectionManager,
    service: String,
}

impl CheckpointStore {
    pub fn new(manager: ConnectionManager, service: String) -> Self {
        Self { manager, service }
    }

    /// The last applied position for this source database, zero if none is
    /// recorded.
    pub async fn read_timestamp(&self) -> Result<u64> {
        let mut conn = self.manager.acquire().await?;
        let row: Option<u64> = conn
            .exec_first(
                format!("SELECT timestamp FROM `{CHECKPOINT_TABLE}` WHERE service = ?"),
                (self.service.as_str(),),
            )
            .await?;
        Ok(row.unwrap_or(0))
    }

    /// Unconditionally overwrites the stored position.
    pub async fn update_timestamp(&self, ts: u64) -> Result<()> {
        let mut conn = self.manager.acquire().await?;
        conn.exec_drop(
            format!("UPDATE `{CHECKPOINT_TABLE}` SET timestamp = ? WHERE service = ?"),
            (ts, self.service.as_str()),
        )
        .await?;
        debug!(ts, "checkpoint advanced");
        Ok(())
    }
}
