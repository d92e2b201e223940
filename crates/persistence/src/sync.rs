//! Background flush of dirty users into durable storage.
//!
//! Eventual by nature: a user is marked dirty on commit and written some time
//! later. A failed flush puts the drained ids back so the next tick retries.

use crate::sqlite::SqliteSink;
use crate::store::StateStore;
use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tap_core::{SyncConfig, UserId, UserRecord};
use tokio::sync::watch;
use tracing::{info, warn};

/// Full state of one user as written to durable storage.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UserSnapshot {
    pub user_id: UserId,
    pub points: u64,
    pub energy: u64,
    pub level: u32,
    pub profit_per_hour: u64,
    /// The whole record as JSON.
    pub raw_state: serde_json::Value,
}

impl UserSnapshot {
    /// Snapshot of a record; `None` when the user has no economy state yet.
    pub fn from_record(user_id: UserId, record: &UserRecord) -> Result<Option<Self>> {
        let Some(state) = &record.economy else {
            return Ok(None);
        };
        Ok(Some(Self {
            user_id,
            points: state.points,
            energy: state.energy,
            level: state.level,
            profit_per_hour: state.profit_per_hour,
            raw_state: serde_json::to_value(record)?,
        }))
    }
}

/// Outcome of one flush.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Dirty ids taken from the store.
    pub drained: usize,
    /// Rows upserted.
    pub written: usize,
}

/// Drains dirty markers in batches and upserts snapshots.
pub struct SyncWorker<S: StateStore> {
    store: Arc<S>,
    sink: SqliteSink,
    cfg: SyncConfig,
}

impl<S: StateStore> SyncWorker<S> {
    pub fn new(store: Arc<S>, sink: SqliteSink, cfg: SyncConfig) -> Self {
        Self { store, sink, cfg }
    }

    /// Flush at most one batch.
    pub async fn flush_once(&self) -> Result<FlushReport> {
        let ids = self.store.drain_dirty(self.cfg.batch_size)?;
        if ids.is_empty() {
            return Ok(FlushReport::default());
        }
        let snapshots = match self.snapshots(&ids) {
            Ok(s) => s,
            Err(e) => {
                self.requeue(&ids);
                return Err(e);
            }
        };
        if let Err(e) = self.sink.upsert(&snapshots).await {
            warn!(error = %e, users = ids.len(), "flush failed, requeueing");
            self.requeue(&ids);
            return Err(e);
        }
        info!(drained = ids.len(), written = snapshots.len(), "flushed dirty users");
        Ok(FlushReport {
            drained: ids.len(),
            written: snapshots.len(),
        })
    }

    /// Flush batches until nothing is dirty.
    pub async fn flush_all(&self) -> Result<FlushReport> {
        let mut total = FlushReport::default();
        loop {
            let report = self.flush_once().await?;
            if report.drained == 0 {
                return Ok(total);
            }
            total.drained += report.drained;
            total.written += report.written;
        }
    }

    /// Flush every `interval_secs` until `shutdown` flips to true, then drain
    /// whatever is left.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<FlushReport> {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.cfg.interval_secs));
        info!(
            interval_secs = self.cfg.interval_secs,
            batch_size = self.cfg.batch_size,
            "sync worker started"
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.flush_once().await {
                        warn!(error = %e, "sync tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        let report = self.flush_all().await?;
        info!(drained = report.drained, "sync worker stopped");
        Ok(report)
    }

    fn snapshots(&self, ids: &[UserId]) -> Result<Vec<UserSnapshot>> {
        let mut out = Vec::with_capacity(ids.len());
        for &id in ids {
            if let Some(record) = self.store.read(id)? {
                if let Some(snap) = UserSnapshot::from_record(id, &record)? {
                    out.push(snap);
                }
            }
        }
        Ok(out)
    }

    fn requeue(&self, ids: &[UserId]) {
        if let Err(e) = self.store.mark_dirty(ids) {
            warn!(error = %e, users = ids.len(), "could not requeue dirty users");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::init_memory_db;
    use crate::store::MemoryStore;
    use tap_core::UserEconomyState;

    fn seed(store: &MemoryStore, id: i64, points: u64) {
        store
            .transact(UserId(id), |rec| {
                let mut s = UserEconomyState::new(0);
                s.points = points;
                rec.economy = Some(s);
                Ok(())
            })
            .unwrap();
    }

    async fn worker(store: Arc<MemoryStore>, batch_size: usize) -> SyncWorker<MemoryStore> {
        let sink = SqliteSink::new(init_memory_db().await.unwrap());
        SyncWorker::new(
            store,
            sink,
            SyncConfig {
                batch_size,
                interval_secs: 1,
            },
        )
    }

    #[tokio::test]
    async fn flush_writes_in_batches() {
        let store = Arc::new(MemoryStore::new());
        for id in 1..=5 {
            seed(&store, id, id as u64 * 10);
        }
        let w = worker(Arc::clone(&store), 2).await;
        let first = w.flush_once().await.unwrap();
        assert_eq!(first, FlushReport { drained: 2, written: 2 });
        let rest = w.flush_all().await.unwrap();
        assert_eq!(rest.drained, 3);
        assert_eq!(w.sink.count().await.unwrap(), 5);
        let row = w.sink.fetch(UserId(4)).await.unwrap().unwrap();
        assert_eq!(row.points, 40);
        assert!(row.raw_state.contains("\"economy\""));
    }

    #[tokio::test]
    async fn users_without_economy_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        store.mark_dirty(&[UserId(99)]).unwrap();
        let w = worker(Arc::clone(&store), 10).await;
        let report = w.flush_once().await.unwrap();
        assert_eq!(report, FlushReport { drained: 1, written: 0 });
    }

    #[tokio::test]
    async fn failed_flush_requeues() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 1, 10);
        seed(&store, 2, 20);
        let w = worker(Arc::clone(&store), 10).await;
        w.sink.pool().close().await;
        assert!(w.flush_once().await.is_err());
        assert_eq!(store.dirty_len(), 2);
    }

    #[tokio::test]
    async fn run_drains_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let w = worker(Arc::clone(&store), 10).await;
        let sink = w.sink.clone();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(w.run(rx));
        seed(&store, 3, 30);
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
        assert_eq!(store.dirty_len(), 0);
        assert_eq!(sink.fetch(UserId(3)).await.unwrap().unwrap().points, 30);
    }
}
