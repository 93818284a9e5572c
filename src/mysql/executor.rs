//! The Mutation Executor: applies translated operations to MySQL.
//!
//! Every statement runs through the [`ConnectionManager`], one at a time.
//! Statement text comes from the pure builders in [`statement`]; this module
//! only owns execution.

use mongodb::bson::{Bson, Document};
use mysql_async::prelude::Queryable;
use mysql_async::Params;
use std::sync::Arc;
use tracing::{debug, info};

use super::connection::ConnectionManager;
use super::statement::{self, Statement};
use crate::defs::Definition;
use crate::Result;

#[derive(Clone)]
pub struct MutationExecutor {
    manager: ConnectionManager,
    defs: Arc<Vec<Definition>>,
    /// Source database identity the checkpoint row is scoped by.
    service: String,
}

impl MutationExecutor {
    pub fn new(manager: ConnectionManager, defs: Arc<Vec<Definition>>, service: String) -> Self {
        Self {
            manager,
            defs,
            service,
        }
    }

    /// Inserts a full document, optionally with REPLACE semantics.
    pub async fn insert(&self, def: &Definition, doc: &Document, replace: bool) -> Result<()> {
        self.execute(statement::insert(def, doc, replace)).await
    }

    /// Applies a partial update. Resolves immediately without touching the
    /// target when neither payload names a mapped column.
    pub async fn update(
        &self,
        def: &Definition,
        id: &Bson,
        set: Option<&Document>,
        unset: Option<&Document>,
    ) -> Result<()> {
        match statement::update(def, id, set, unset) {
            Some(stmt) => self.execute(stmt).await,
            None => {
                debug!(ns = %def.ns, "update touches no mapped column, skipped");
                Ok(())
            }
        }
    }

    /// Deletes the row by primary key.
    pub async fn remove(&self, def: &Definition, id: &Bson) -> Result<()> {
        self.execute(statement::delete(def, id)).await
    }

    /// (Re)creates the checkpoint table and one table per definition, then
    /// seeds the checkpoint row at zero. The whole batch runs on a single
    /// acquired connection.
    pub async fn create_tables(&self) -> Result<()> {
        info!("recreating target tables");
        let mut conn = self.manager.acquire().await?;
        for sql in statement::create_checkpoint_table() {
            conn.query_drop(sql).await?;
        }
        let seed = statement::seed_checkpoint(&self.service);
        conn.exec_drop(seed.sql, Params::Positional(seed.params))
            .await?;
        for def in self.defs.iter() {
            for sql in statement::create_table(def) {
                conn.query_drop(sql).await?;
            }
            info!(table = %def.table, "table created");
        }
        Ok(())
    }

    async fn execute(&self, stmt: Statement) -> Result<()> {
        let mut conn = self.manager.acquire().await?;
        conn.exec_drop(stmt.sql, Params::Positional(stmt.params))
            .await?;
        Ok(())
    }
}
