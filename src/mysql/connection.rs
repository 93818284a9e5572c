//! Managed access to the single target connection.
//!
//! The manager owns at most one live MySQL connection. [`acquire`] probes the
//! held connection before handing it out and discards it when the probe
//! fails. Connection establishment is single-flight: concurrent callers
//! during an in-flight attempt await that same attempt, and a failed attempt
//! rejects every waiter with the underlying error. The manager never retries
//! on its own; retry policy belongs to the orchestrator's reconnect loop.
//!
//! [`acquire`]: ConnectionManager::acquire

use futures::future::{BoxFuture, FutureExt, Shared};
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Opts};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::{Error, Result};

type ConnectAttempt = Shared<BoxFuture<'static, std::result::Result<(), String>>>;

#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    opts: Opts,
    conn: Mutex<Option<Conn>>,
    connecting: Mutex<Option<ConnectAttempt>>,
    attempts: AtomicU64,
}

/// Exclusive access to the live connection for the duration of one statement
/// (or one DDL batch). Holding the guard is what serializes statement
/// execution.
pub struct ManagedConn<'a> {
    guard: MutexGuard<'a, Option<Conn>>,
}

impl Deref for ManagedConn<'_> {
    type Target = Conn;

    fn deref(&self) -> &Conn {
        // Invariant: a guard is only constructed over a populated slot.
        self.guard.as_ref().expect("managed connection slot empty")
    }
}

impl DerefMut for ManagedConn<'_> {
    fn deref_mut(&mut self) -> &mut Conn {
        self.guard.as_mut().expect("managed connection slot empty")
    }
}

impl ConnectionManager {
    pub fn from_url(url: &str) -> Result<Self> {
        let opts =
            Opts::from_url(url).map_err(|e| Error::Config(format!("invalid MySQL URL: {e}")))?;
        Ok(Self {
            inner: Arc::new(Inner {
                opts,
                conn: Mutex::new(None),
                connecting: Mutex::new(None),
                attempts: AtomicU64::new(0),
            }),
        })
    }

    /// Returns a usable connection, establishing one if none is held or the
    /// held one fails its liveness probe.
    pub async fn acquire(&self) -> Result<ManagedConn<'_>> {
        loop {
            {
                let mut slot = self.inner.conn.lock().await;
                let alive = match slot.as_mut() {
                    Some(conn) => conn.ping().await.is_ok(),
                    None => false,
                };
                if alive {
                    return Ok(ManagedConn { guard: slot });
                }
                if let Some(dead) = slot.take() {
                    warn!("MySQL connection failed liveness probe, discarding");
                    let _ = dead.disconnect().await;
                }
            }
            self.connect().await?;
        }
    }

    /// Joins or starts the one in-flight connection attempt.
    ///
    /// The attempt clears its own pending slot before it resolves. Waiters
    /// never touch the slot: a lagging waiter of a failed attempt must not
    /// remove a successor attempt another caller has already started.
    async fn connect(&self) -> Result<()> {
        let attempt = {
            let mut pending = self.inner.connecting.lock().await;
            match pending.as_ref() {
                Some(attempt) => {
                    debug!("waiting for in-flight MySQL connection attempt");
                    attempt.clone()
                }
                None => {
                    let n = self.inner.attempts.fetch_add(1, Ordering::Relaxed) + 1;
                    info!(attempt = n, "connecting to MySQL");
                    let inner = Arc::clone(&self.inner);
                    let attempt: ConnectAttempt = async move {
                        let outcome = match Conn::new(inner.opts.clone()).await {
                            Ok(conn) => {
                                *inner.conn.lock().await = Some(conn);
                                Ok(())
                            }
                            Err(e) => Err(e.to_string()),
                        };
                        inner.connecting.lock().await.take();
                        outcome
                    }
                    .boxed()
                    .shared();
                    *pending = Some(attempt.clone());
                    attempt
                }
            }
        };

        attempt.await.map_err(Error::Connection)
    }
}
