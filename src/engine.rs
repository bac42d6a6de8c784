//! Engine wiring: owns the stores and the shared collaborators, hands out
//! write transactions, and replays command logs after a crash.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::cache::{CacheAccess, GraphCaches};
use crate::config::Config;
use crate::error::Result;
use crate::indexing::{IndexingService, NoopIndexingService};
use crate::lock::LockService;
use crate::log::{CommandLog, LogSink};
use crate::scan::{InMemoryLabelScanStore, LabelScanStore};
use crate::store::records::TxId;
use crate::store::Stores;
use crate::tx::command::Command;
use crate::tx::{NoopTxState, TxStateHooks, WriteTransaction};

pub struct Engine {
    stores: Arc<Stores>,
    locks: Arc<LockService>,
    cache: Arc<dyn CacheAccess>,
    indexes: Arc<dyn IndexingService>,
    label_scan: Arc<dyn LabelScanStore>,
    state: Arc<dyn TxStateHooks>,
    log: Arc<CommandLog>,
    next_identifier: AtomicU64,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        let caches = GraphCaches::new(config.node_cache_size, config.relationship_cache_size);
        Self::with_parts(
            config,
            Arc::new(caches),
            Arc::new(NoopIndexingService),
            Arc::new(InMemoryLabelScanStore::new()),
            Arc::new(NoopTxState),
        )
    }

    pub fn with_parts(
        config: Config,
        cache: Arc<dyn CacheAccess>,
        indexes: Arc<dyn IndexingService>,
        label_scan: Arc<dyn LabelScanStore>,
        state: Arc<dyn TxStateHooks>,
    ) -> Self {
        Self {
            stores: Stores::new(config),
            locks: Arc::new(LockService::new()),
            cache,
            indexes,
            label_scan,
            state,
            log: Arc::new(CommandLog::new()),
            next_identifier: AtomicU64::new(1),
        }
    }

    pub fn stores(&self) -> &Arc<Stores> {
        &self.stores
    }

    pub fn locks(&self) -> &Arc<LockService> {
        &self.locks
    }

    pub fn log(&self) -> &Arc<CommandLog> {
        &self.log
    }

    /// The transaction id a live commit must use next.
    pub fn next_commit_id(&self) -> TxId {
        self.stores.last_committed_tx() + 1
    }

    pub fn begin_tx(&self) -> WriteTransaction {
        WriteTransaction::new(
            Arc::clone(&self.stores),
            Arc::clone(&self.locks),
            Arc::clone(&self.cache),
            Arc::clone(&self.indexes),
            Arc::clone(&self.label_scan),
            Arc::clone(&self.log) as Arc<dyn LogSink>,
            Arc::clone(&self.state),
            self.next_identifier.fetch_add(1, Ordering::Relaxed),
            self.stores.last_committed_tx(),
        )
    }

    /// A transaction prepared to receive replayed commands.
    pub fn begin_recovery_tx(&self) -> WriteTransaction {
        let mut tx = self.begin_tx();
        tx.set_recovered();
        tx
    }

    /// Prepares and commits in one step, assigning the next id in sequence.
    pub fn commit(&self, tx: &mut WriteTransaction) -> Result<TxId> {
        tx.prepare()?;
        let commit_id = self.next_commit_id();
        tx.commit(commit_id)?;
        Ok(commit_id)
    }

    /// Replays recovered transactions, in log order, against the stores.
    pub fn recover<I>(&self, transactions: I) -> Result<()>
    where
        I: IntoIterator<Item = (TxId, Vec<Command>)>,
    {
        let mut replayed = 0;
        for (tx_id, commands) in transactions {
            let mut tx = self.begin_recovery_tx();
            for command in commands {
                tx.inject_command(command)?;
            }
            tx.commit(tx_id)?;
            replayed += 1;
        }
        info!(transactions = replayed, "recovery replay finished");
        Ok(())
    }
}
