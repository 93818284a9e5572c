//! The Oplog Tailer.
//!
//! Owns the source client and the single live tailing cursor. A tail session
//! opens an await-data cursor over `local.oplog.rs` filtered to the known
//! namespaces past the checkpoint, and applies entries strictly in delivery
//! order, one at a time. Any per-entry failure or cursor error ends the
//! session; the reconnect loop opens a fresh one from the last durable
//! checkpoint, giving at-least-once delivery.

use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::{CursorType, FindOneOptions, FindOptions};
use mongodb::{Client, Collection};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::oplog::{self, Action, LogEntry};
use crate::checkpoint::CheckpointStore;
use crate::defs::Definition;
use crate::mysql::MutationExecutor;
use crate::{Error, Result};

const OPLOG_DB: &str = "local";
const OPLOG_COLLECTION: &str = "oplog.rs";
const AWAIT_DATA_TIMEOUT: Duration = Duration::from_secs(1);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// Cumulative count is reported every this many applied entries.
const PROGRESS_INTERVAL: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailerState {
    Idle,
    ImportPending,
    Tailing,
    Reconnecting,
    Stopped,
}

/// In-memory replication position, advanced only after the corresponding
/// mutation and checkpoint write have committed.
#[derive(Debug, Default)]
struct Progress {
    /// Position of the last fully applied entry. Never moves backward.
    last_ts: u64,
    /// Entries applied across all sessions.
    processed: u64,
}

impl Progress {
    fn position(&self) -> u64 {
        self.last_ts
    }

    fn applied(&self) -> u64 {
        self.processed
    }

    /// Seeds the position, trusted as already applied. Not counted as an
    /// applied entry.
    fn seed(&mut self, ts: u64) {
        self.last_ts = ts;
    }

    /// Whether an entry at this position may advance the checkpoint. Entries
    /// behind the position are replays of already applied work.
    fn admits(&self, ts: u64) -> bool {
        ts >= self.last_ts
    }

    /// Advances past an applied entry. Returns true when a progress report
    /// is due.
    fn record(&mut self, ts: u64) -> bool {
        self.last_ts = ts;
        self.processed += 1;
        self.processed % PROGRESS_INTERVAL == 0
    }
}

pub struct OplogTailer {
    client: Client,
    /// Source database name; collections are read from here during import.
    db_name: String,
    defs: Arc<Vec<Definition>>,
    executor: MutationExecutor,
    checkpoint: CheckpointStore,
    progress: Progress,
    state: TailerState,
}

impl OplogTailer {
    pub async fn connect(
        url: &str,
        db_name: String,
        defs: Arc<Vec<Definition>>,
        executor: MutationExecutor,
        checkpoint: CheckpointStore,
    ) -> Result<Self> {
        let client = Client::with_uri_str(url).await?;
        Ok(Self {
            client,
            db_name,
            defs,
            executor,
            checkpoint,
            progress: Progress::default(),
            state: TailerState::Idle,
        })
    }

    pub fn state(&self) -> TailerState {
        self.state
    }

    pub fn checkpoint(&self) -> u64 {
        self.progress.position()
    }

    /// Seeds the in-memory position, trusted as already applied.
    pub fn set_checkpoint(&mut self, ts: u64) {
        self.progress.seed(ts);
    }

    fn oplog(&self) -> Collection<Document> {
        self.client.database(OPLOG_DB).collection(OPLOG_COLLECTION)
    }

    /// The newest position currently in the source oplog.
    pub async fn latest_timestamp(&self) -> Result<u64> {
        self.edge_timestamp(-1)
            .await?
            .ok_or_else(|| Error::InvalidEntry {
                message: "oplog is empty".to_string(),
            })
    }

    /// The oldest retained position, None when the oplog is empty.
    pub async fn oldest_timestamp(&self) -> Result<Option<u64>> {
        self.edge_timestamp(1).await
    }

    async fn edge_timestamp(&self, natural_order: i32) -> Result<Option<u64>> {
        let options = FindOneOptions::builder()
            .sort(doc! { "$natural": natural_order })
            .build();
        let entry = self.oplog().find_one(doc! {}).with_options(options).await?;
        match entry {
            Some(entry) => {
                let ts = entry.get_timestamp("ts").map_err(|e| Error::InvalidEntry {
                    message: format!("bad ts on oplog edge entry: {e}"),
                })?;
                Ok(Some(oplog::pack_timestamp(ts)))
            }
            None => Ok(None),
        }
    }

    /// Copies one collection into its target table, row by row.
    ///
    /// The next cursor fetch is not issued until the previous row's insert
    /// has resolved, so at most one document is in flight regardless of
    /// collection size.
    pub async fn import_collection(&mut self, def: &Definition) -> Result<u64> {
        self.state = TailerState::ImportPending;
        info!(ns = %def.ns, "importing collection");
        let collection: Collection<Document> = self
            .client
            .database(&self.db_name)
            .collection(&def.collection);
        let mut cursor = collection.find(doc! {}).await?;
        let mut copied = 0u64;
        while let Some(document) = cursor.try_next().await? {
            self.executor.insert(def, &document, false).await?;
            copied += 1;
        }
        info!(ns = %def.ns, rows = copied, "collection imported");
        Ok(copied)
    }

    /// Runs tail sessions until the process exits. Each session failure is
    /// absorbed; the next session resumes from the last durable checkpoint.
    pub async fn tail_forever(&mut self) -> Result<()> {
        let mut sessions = 0u64;
        loop {
            if sessions == 0 {
                info!("connecting to the oplog");
            } else {
                self.state = TailerState::Reconnecting;
                info!(sessions, "reconnecting to the oplog");
            }
            sessions += 1;
            match self.tail().await {
                Ok(()) => info!(checkpoint = self.progress.position(), "tail session ended"),
                Err(e) => {
                    warn!(error = %e, checkpoint = self.progress.position(), "tail session failed")
                }
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    /// Runs one tailing session from the current checkpoint. Returns when the
    /// cursor closes or the first entry fails to apply.
    pub async fn tail(&mut self) -> Result<()> {
        let from = self.progress.position();
        self.check_retention(from).await?;

        let namespaces: Vec<String> = self.defs.iter().map(|d| d.ns.clone()).collect();
        let filter = doc! {
            "ns": { "$in": namespaces },
            "ts": { "$gt": Bson::Timestamp(oplog::unpack_timestamp(from)) },
        };
        let options = FindOptions::builder()
            .cursor_type(CursorType::TailableAwait)
            .max_await_time(AWAIT_DATA_TIMEOUT)
            .build();

        info!(from, "watching the oplog");
        self.state = TailerState::Tailing;
        let mut cursor = self.oplog().find(filter).with_options(options).await?;
        while let Some(raw) = cursor.try_next().await? {
            let entry = LogEntry::parse(&raw)?;
            if oplog::should_skip(&entry, self.progress.position()) {
                continue;
            }
            self.apply(&entry).await?;
        }
        info!("oplog cursor closed");
        Ok(())
    }

    /// Flags a checkpoint that has aged out of the retained oplog window.
    /// Operations between the checkpoint and the oldest retained entry are
    /// lost to this consumer; the gap is surfaced rather than silently
    /// skipped over.
    async fn check_retention(&self, from: u64) -> Result<()> {
        if from == 0 {
            return Ok(());
        }
        if let Some(oldest) = self.oldest_timestamp().await? {
            if oldest > from {
                warn!(
                    checkpoint = from,
                    oldest,
                    "checkpoint predates the retained oplog window, operations may have been lost"
                );
            }
        }
        Ok(())
    }

    /// Applies one entry and advances the checkpoint.
    async fn apply(&mut self, entry: &LogEntry) -> Result<()> {
        let defs = Arc::clone(&self.defs);
        let Some(def) = defs.iter().find(|d| d.ns == entry.ns) else {
            debug!(ns = %entry.ns, "entry for unmapped namespace ignored");
            return Ok(());
        };
        match entry.action(&def.id_field().field)? {
            Action::Insert { doc, replace } => self.executor.insert(def, doc, replace).await?,
            Action::Update { id, set, unset } => {
                self.executor.update(def, id, set, unset).await?
            }
            Action::Delete { id } => self.executor.remove(def, id).await?,
            Action::Skip => {}
        }
        self.advance(entry.ts).await
    }

    /// Persists the new position after the mutation has committed.
    async fn advance(&mut self, ts: u64) -> Result<()> {
        if !self.progress.admits(ts) {
            warn!(
                ts,
                checkpoint = self.progress.position(),
                "out-of-order entry ignored"
            );
            return Ok(());
        }
        self.checkpoint.update_timestamp(ts).await?;
        if self.progress.record(ts) {
            info!(processed = self.progress.applied(), "replication progress");
        }
        Ok(())
    }

    /// Embedded-mode shutdown: releases the source client without exiting
    /// the process.
    pub async fn stop(mut self) {
        self.state = TailerState::Stopped;
        info!("tailer stopped");
        self.client.shutdown().await;
    }
}
