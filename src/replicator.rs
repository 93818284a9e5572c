//! The Sync Orchestrator.
//!
//! Sequences the optional bulk import, the checkpoint bootstrap, and the
//! tail-reconnect loop. A checkpoint read failure at startup is the only
//! error treated as terminal; everything downstream is absorbed by the
//! tailer's reconnect loop.

use std::sync::Arc;
use tracing::info;

use crate::checkpoint::CheckpointStore;
use crate::defs::{self, Definition};
use crate::mongo::OplogTailer;
use crate::mysql::{ConnectionManager, MutationExecutor};
use crate::{Config, Error, Result};

pub struct Replicator {
    defs: Arc<Vec<Definition>>,
    executor: MutationExecutor,
    checkpoint: CheckpointStore,
    tailer: OplogTailer,
}

impl Replicator {
    pub async fn new(config: Config) -> Result<Self> {
        let defs = defs::build_definitions(&config)?;
        let service = config.database_name()?;
        let manager = ConnectionManager::from_url(&config.dist)?;
        let executor = MutationExecutor::new(manager.clone(), Arc::clone(&defs), service.clone());
        let checkpoint = CheckpointStore::new(manager, service.clone());
        let tailer = OplogTailer::connect(
            &config.src,
            service,
            Arc::clone(&defs),
            executor.clone(),
            checkpoint.clone(),
        )
        .await?;
        Ok(Self {
            defs,
            executor,
            checkpoint,
            tailer,
        })
    }

    /// Resumes from the stored checkpoint, bootstrapping it from the latest
    /// oplog position when none is recorded, then tails.
    pub async fn start(&mut self, forever: bool) -> Result<()> {
        let ts = self
            .checkpoint
            .read_timestamp()
            .await
            .map_err(|e| Error::Checkpoint {
                message: format!("failed to read stored position: {e}"),
            })?;
        if ts > 0 {
            info!(checkpoint = ts, "resuming from stored checkpoint");
            self.tailer.set_checkpoint(ts);
        } else {
            self.bootstrap_checkpoint().await?;
        }
        self.run(forever).await
    }

    /// Recreates the target tables, copies every collection, bootstraps the
    /// checkpoint, then tails.
    pub async fn import_and_start(&mut self, forever: bool) -> Result<()> {
        self.executor.create_tables().await?;
        self.import_all().await?;
        self.bootstrap_checkpoint().await?;
        self.run(forever).await
    }

    /// Copies collections strictly one after another.
    async fn import_all(&mut self) -> Result<()> {
        info!("beginning full import");
        let defs = Arc::clone(&self.defs);
        let mut total = 0u64;
        for def in defs.iter() {
            total += self.tailer.import_collection(def).await?;
        }
        info!(rows = total, "full import done");
        Ok(())
    }

    /// Records the source's current latest log position as already applied.
    async fn bootstrap_checkpoint(&mut self) -> Result<()> {
        let ts = self.tailer.latest_timestamp().await?;
        self.checkpoint.update_timestamp(ts).await?;
        self.tailer.set_checkpoint(ts);
        info!(checkpoint = ts, "checkpoint bootstrapped from latest oplog position");
        Ok(())
    }

    async fn run(&mut self, forever: bool) -> Result<()> {
        if forever {
            self.tailer.tail_forever().await
        } else {
            self.tailer.tail().await
        }
    }

    /// Embedded-mode shutdown: releases the held source connection without
    /// terminating the process.
    pub async fn shutdown(self) {
        self.tailer.stop().await;
    }
}
