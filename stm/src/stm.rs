// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use crate::{
    error::{StmResult, TxError},
    sync::{lock, Mutex, MutexGuard},
    transaction::Transaction,
    var::{Value, Var},
    waiter::Waiter,
};
use lazy_static::lazy_static;
use log::*;
use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};

lazy_static! {
    static ref GLOBAL: Stm = Stm::new();
}

static ENGINE_IDS: AtomicUsize = AtomicUsize::new(0);

/// Counters describing the work an [`Stm`] has done so far.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StmStats {
    /// Transactions that committed
    pub commits: u64,

    /// Attempts restarted because a var of their read set changed before commit
    pub conflicts: u64,

    /// Attempts that signalled a retry
    pub retries: u64,

    /// Transactions cancelled by their body
    pub aborts: u64,
}

/// The transaction engine.
///
/// All verify and commit phases of an engine are serialized by a single lock, which
/// makes commits linearizable. Transaction bodies themselves run in parallel and
/// take the lock only to copy a value into their read set. Cloning an [`Stm`]
/// returns a handle to the same engine.
///
/// Each [`Var`] belongs to the engine that created it. Most programs use the
/// process-wide engine returned by [`Stm::global`], which owns the vars built with
/// [`Var::new`] and is what the free functions of this crate run on.
#[derive(Clone)]
pub struct Stm {
    inner: Arc<Engine>,
}

struct Engine {
    id: usize,

    /// Serializes read snapshots, validation and commits
    serial: Mutex<()>,

    transaction_ids: AtomicUsize,

    commits: AtomicU64,
    conflicts: AtomicU64,
    retries: AtomicU64,
    aborts: AtomicU64,
}

impl Default for Stm {
    fn default() -> Self {
        Self::new()
    }
}

impl Stm {
    /// Creates an independent engine with its own serialization lock.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Engine {
                id: ENGINE_IDS.fetch_add(1, Ordering::Relaxed),
                serial: Mutex::new(()),
                transaction_ids: AtomicUsize::new(0),
                commits: AtomicU64::new(0),
                conflicts: AtomicU64::new(0),
                retries: AtomicU64::new(0),
                aborts: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the process-wide engine.
    pub fn global() -> &'static Stm {
        &GLOBAL
    }

    /// This will create a new transactional variable [`Var`] owned by this engine.
    pub fn create<T>(&self, value: T) -> Var<T>
    where
        T: Send + Sync + 'static,
    {
        Var::bind(self.inner.id, value)
    }

    pub fn stats(&self) -> StmStats {
        StmStats {
            commits: self.inner.commits.load(Ordering::Relaxed),
            conflicts: self.inner.conflicts.load(Ordering::Relaxed),
            retries: self.inner.retries.load(Ordering::Relaxed),
            aborts: self.inner.aborts.load(Ordering::Relaxed),
        }
    }

    /// Runs `transaction` atomically and returns its result.
    ///
    /// 1. Speculative execution
    ///    Run the transaction against a fresh [`Transaction`], recording the value and
    ///    version of every var read, and staging every write.
    /// 2. Retry
    ///    If the transaction signals [`TxError::Retry`], sleep until a var of its read
    ///    set is changed by a commit, then start over.
    /// 3. Abort
    ///    If the transaction returns [`TxError::Abort`], return the error. Nothing is written.
    /// 4. Validate
    ///    Take the serialization lock and check that every var read still has the
    ///    version it was read at. If not, release the lock and start over.
    /// 5. Commit
    ///    Write the staged values, bump the versions of the written vars and wake the
    ///    transactions waiting on them. Release the lock.
    ///
    /// There is no bound on the number of attempts.
    pub fn atomically<R, E, F>(&self, transaction: F) -> Result<R, E>
    where
        F: Fn(&mut Transaction) -> StmResult<R, E>,
    {
        let tx_id = self.increment_tx_ids();

        loop {
            match self.attempt(tx_id, &transaction) {
                Attempt::Done(result) => return result,
                Attempt::Restart => continue,
                Attempt::Wait(waiter) => waiter.wait(),
            }
            debug!("TX({}): WOKEN UP", tx_id);
        }
    }

    /// Runs `transaction` atomically without blocking the executor while it waits
    /// on a retry. Behaves exactly like [`Stm::atomically`] otherwise.
    #[cfg(feature = "async")]
    pub async fn atomically_async<R, E, F>(&self, transaction: F) -> Result<R, E>
    where
        F: Fn(&mut Transaction) -> StmResult<R, E>,
    {
        let tx_id = self.increment_tx_ids();

        loop {
            match self.attempt(tx_id, &transaction) {
                Attempt::Done(result) => return result,
                Attempt::Restart => continue,
                Attempt::Wait(waiter) => waiter.notified().await,
            }
            debug!("TX({}): WOKEN UP", tx_id);
        }
    }

    /// Runs a transaction that cannot abort.
    pub fn run<R, F>(&self, transaction: F) -> R
    where
        F: Fn(&mut Transaction) -> StmResult<R>,
    {
        match self.atomically(transaction) {
            Ok(res) => res,
            Err(never) => match never {},
        }
    }

    /// Atomically reads `var`.
    pub fn atomic_get<T>(&self, var: &Var<T>) -> T
    where
        T: Clone + Send + Sync + 'static,
    {
        self.run(|tx| Ok(tx.get(var)))
    }

    /// Atomically writes `value` to `var`.
    pub fn atomic_set<T>(&self, var: &Var<T>, value: T)
    where
        T: Clone + Send + Sync + 'static,
    {
        self.run(|tx| {
            tx.set(var, value.clone());
            Ok(())
        })
    }

    pub(crate) fn id(&self) -> usize {
        self.inner.id
    }

    pub(crate) fn serialize(&self) -> MutexGuard<'_, ()> {
        lock(&self.inner.serial)
    }

    fn increment_tx_ids(&self) -> usize {
        self.inner.transaction_ids.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Runs one attempt of `transaction` against a fresh log.
    fn attempt<R, E, F>(&self, tx_id: usize, transaction: &F) -> Attempt<R, E>
    where
        F: Fn(&mut Transaction) -> StmResult<R, E>,
    {
        let mut tx = Transaction::new(self.clone(), tx_id);
        debug!("TX({}): START", tx_id);

        match transaction(&mut tx) {
            Ok(res) => match self.try_commit(tx) {
                true => Attempt::Done(Ok(res)),
                false => Attempt::Restart,
            },
            Err(TxError::Retry) => match self.prepare_wait(&tx) {
                Some(waiter) => Attempt::Wait(waiter),
                None => Attempt::Restart,
            },
            Err(TxError::Abort(e)) => {
                self.inner.aborts.fetch_add(1, Ordering::Relaxed);
                info!("TX({}): ABORTED", tx_id);
                Attempt::Done(Err(e))
            }
        }
    }

    /// Validates the read set and applies the write set. Returns `false` if the
    /// transaction conflicted with a commit and has to run again.
    fn try_commit(&self, tx: Transaction) -> bool {
        let replaced: Vec<Value> = {
            let _serial = self.serialize();

            if !tx.validate() {
                self.inner.conflicts.fetch_add(1, Ordering::Relaxed);
                info!("TX({}): VALIDATING READ SET FAILED. RESTARTING", tx.id());
                return false;
            }

            debug!(
                "TX({}): COMMIT. READS ({}), WRITES ({})",
                tx.id(),
                tx.read_count(),
                tx.write_count()
            );
            let replaced = tx.commit();
            self.inner.commits.fetch_add(1, Ordering::Relaxed);

            replaced
        };

        // old values and the log are released outside of the engine locks
        drop(replaced);
        drop(tx);

        true
    }

    /// Registers a waiter on the read set of a retried transaction. Returns `None`
    /// if a var of the read set has already changed, in which case the transaction
    /// can run again straight away.
    fn prepare_wait(&self, tx: &Transaction) -> Option<Arc<Waiter>> {
        self.inner.retries.fetch_add(1, Ordering::Relaxed);
        let _serial = self.serialize();

        if !tx.validate() {
            debug!("TX({}): RETRY. READ SET ALREADY CHANGED", tx.id());
            return None;
        }

        if tx.read_count() == 0 {
            warn!("TX({}): RETRY WITHOUT READS. THIS WILL NEVER WAKE UP", tx.id());
        }

        info!("TX({}): RETRY. WAITING ON ({}) VARS", tx.id(), tx.read_count());
        let waiter = Waiter::new();
        tx.register(&waiter);

        Some(waiter)
    }

    #[cfg(test)]
    pub(crate) fn begin(&self) -> Transaction {
        Transaction::new(self.clone(), self.increment_tx_ids())
    }

    #[cfg(test)]
    pub(crate) fn validate(&self, tx: &Transaction) -> bool {
        let _serial = self.serialize();
        tx.validate()
    }
}

/// Outcome of a single attempt of a transaction body.
enum Attempt<R, E> {
    /// Committed or aborted
    Done(Result<R, E>),

    /// The read set was stale, run again straight away
    Restart,

    /// Retried, run again once the waiter is notified
    Wait(Arc<Waiter>),
}
