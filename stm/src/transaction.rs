// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use crate::{
    error::{Retry, StmResult, TxError},
    stm::Stm,
    var::{AnyVar, Value, Var},
    waiter::Waiter,
};
use log::*;
use std::{collections::HashMap, sync::Arc};

/// The log of one attempt of a transaction body.
///
/// Every var read for the first time is recorded in the read set together with
/// the version it had. Every write is staged in the write set and only applied
/// to the var if the attempt commits. A fresh [`Transaction`] is created for
/// every attempt, so nothing staged by a failed attempt survives it.
pub struct Transaction {
    /// Transaction id, shared by all attempts of one `atomically` call
    id: usize,

    stm: Stm,

    /// Keyed by [`Var::id`]
    reads: HashMap<usize, ReadEntry>,

    /// Keyed by [`Var::id`]
    writes: HashMap<usize, WriteEntry>,
}

struct ReadEntry {
    var: Arc<dyn AnyVar>,
    version: u64,
    value: Value,
}

#[derive(Clone)]
struct WriteEntry {
    var: Arc<dyn AnyVar>,
    value: Value,
}

fn downcast<T>(value: &Value) -> T
where
    T: Clone + 'static,
{
    // entries are keyed by var identity, and a var only ever holds its own type
    match value.downcast_ref::<T>() {
        Some(value) => value.clone(),
        None => unreachable!("transaction log entry does not match the type of its var"),
    }
}

impl Transaction {
    pub(crate) fn new(stm: Stm, id: usize) -> Self {
        Self {
            id,
            stm,
            reads: HashMap::new(),
            writes: HashMap::new(),
        }
    }

    /// Returns the id of the `atomically` call this attempt belongs to. All attempts
    /// of one call share it.
    pub fn id(&self) -> usize {
        self.id
    }

    fn check_engine<T>(&self, var: &Var<T>)
    where
        T: Send + Sync + 'static,
    {
        assert_eq!(
            var.engine(),
            self.stm.id(),
            "TX({}): var {:?} belongs to another engine",
            self.id,
            var
        );
    }

    /// Reads the value of `var` as seen by this transaction.
    ///
    /// A value staged by [`Transaction::set`] takes precedence, then a value read
    /// earlier in this attempt. Otherwise the current value is copied into the read
    /// set while holding the serialization lock, and validated again at commit time.
    ///
    /// # Panics
    ///
    /// Panics if `var` was created by a different engine than the one running
    /// this transaction.
    pub fn get<T>(&mut self, var: &Var<T>) -> T
    where
        T: Clone + Send + Sync + 'static,
    {
        self.check_engine(var);
        let id = var.id();

        if let Some(entry) = self.writes.get(&id) {
            return downcast(&entry.value);
        }

        if let Some(entry) = self.reads.get(&id) {
            return downcast(&entry.value);
        }

        let (value, version) = {
            let _serial = self.stm.serialize();
            var.snapshot()
        };
        trace!("TX({}): READ VAR ({:#x}) AT VERSION ({})", self.id, id, version);

        let result = (*value).clone();
        self.reads.insert(
            id,
            ReadEntry {
                var: var.erased(),
                version,
                value,
            },
        );

        result
    }

    /// Stages `value` to be written to `var` on commit. The last staged value wins.
    ///
    /// # Panics
    ///
    /// Panics if `var` was created by a different engine than the one running
    /// this transaction.
    pub fn set<T>(&mut self, var: &Var<T>, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.check_engine(var);
        self.writes.insert(
            var.id(),
            WriteEntry {
                var: var.erased(),
                value: Arc::new(value),
            },
        );
    }

    /// Applies `f` to the value of `var` and stages the result.
    pub fn modify<T, F>(&mut self, var: &Var<T>, f: F)
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> T,
    {
        let value = self.get(var);
        self.set(var, f(value));
    }

    /// Stages `value` and returns the value `var` had in this transaction before.
    pub fn replace<T>(&mut self, var: &Var<T>, value: T) -> T
    where
        T: Clone + Send + Sync + 'static,
    {
        let previous = self.get(var);
        self.set(var, value);
        previous
    }

    /// Abandons this attempt. The transaction is run again once a var it has read
    /// was changed by another transaction.
    pub fn retry<R, E>(&self) -> StmResult<R, E> {
        Err(TxError::Retry)
    }

    /// Retries unless `predicate` holds. Use with `?`.
    pub fn assert(&self, predicate: bool) -> Result<(), Retry> {
        match predicate {
            true => Ok(()),
            false => Err(Retry),
        }
    }

    /// Cancels the transaction. `atomically` returns `error` to its caller.
    pub fn abort<R, E>(&self, error: E) -> StmResult<R, E> {
        Err(TxError::Abort(error))
    }

    /// Runs `first`, and `second` if `first` retries.
    ///
    /// Writes staged by a retrying `first` are discarded before `second` runs.
    /// Its reads are kept, so that the transaction wakes up when any var looked at
    /// by either branch changes. An abort of `first` is returned as is.
    pub fn or<R, E, F, G>(&mut self, first: F, second: G) -> StmResult<R, E>
    where
        F: FnOnce(&mut Transaction) -> StmResult<R, E>,
        G: FnOnce(&mut Transaction) -> StmResult<R, E>,
    {
        let writes = self.writes.clone();

        match first(self) {
            Err(TxError::Retry) => {
                debug!("TX({}): BRANCH RETRIED. TRYING ALTERNATIVE", self.id);
                self.writes = writes;
                second(self)
            }
            result => result,
        }
    }

    pub(crate) fn read_count(&self) -> usize {
        self.reads.len()
    }

    pub(crate) fn write_count(&self) -> usize {
        self.writes.len()
    }

    /// Checks that no var of the read set changed since it was read.
    /// Callers must hold the serialization lock.
    pub(crate) fn validate(&self) -> bool {
        self.reads.values().all(|entry| entry.var.version() == entry.version)
    }

    /// Registers `waiter` on every var of the read set.
    /// Callers must hold the serialization lock.
    pub(crate) fn register(&self, waiter: &Arc<Waiter>) {
        for entry in self.reads.values() {
            entry.var.register(waiter);
        }
    }

    /// Writes the write set to the vars and returns the values they replaced.
    /// Callers must hold the serialization lock and have validated the read set.
    pub(crate) fn commit(&self) -> Vec<Value> {
        self.writes
            .values()
            .map(|entry| entry.var.commit(entry.value.clone()))
            .collect()
    }
}
