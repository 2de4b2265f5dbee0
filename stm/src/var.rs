// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use crate::{
    stm::Stm,
    sync::{lock, Mutex},
    waiter::Waiter,
};
use std::{
    any::Any,
    fmt::{self, Debug},
    hash::{Hash, Hasher},
    sync::{Arc, Weak},
};

/// A type-erased value as it is kept inside a transaction log.
pub(crate) type Value = Arc<dyn Any + Send + Sync>;

/// [`Var`] is a shared transactional variable.
///
/// A var is only ever changed by a committing transaction; there is no way to
/// write to it directly. Cloning a [`Var`] returns another handle to the same
/// variable. Two handles are equal if, and only if, they point to the same
/// variable, regardless of the values they hold.
///
/// Every var belongs to the engine it was created by, and can only be accessed
/// by transactions of that engine.
pub struct Var<T> {
    inner: Arc<VarInner<T>>,
}

pub(crate) struct VarInner<T> {
    /// Id of the owning engine
    engine: usize,

    slot: Mutex<Slot<T>>,
}

struct Slot<T> {
    value: Arc<T>,

    /// Number of commits that wrote to this var
    version: u64,

    /// Transactions sleeping until this var changes
    waiters: Vec<Weak<Waiter>>,
}

impl<T> Var<T>
where
    T: Send + Sync + 'static,
{
    /// Creates a new transactional variable holding `value`, owned by the
    /// process-wide engine [`Stm::global`].
    pub fn new(value: T) -> Self {
        Stm::global().create(value)
    }

    pub(crate) fn bind(engine: usize, value: T) -> Self {
        Self {
            inner: Arc::new(VarInner {
                engine,
                slot: Mutex::new(Slot {
                    value: Arc::new(value),
                    version: 0,
                    waiters: Vec::new(),
                }),
            }),
        }
    }

    /// Returns the identity of this var. All handles to the same var share it.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    /// Id of the engine owning this var.
    pub(crate) fn engine(&self) -> usize {
        self.inner.engine
    }

    /// The value and version as of now. Callers must hold the serialization lock.
    pub(crate) fn snapshot(&self) -> (Arc<T>, u64) {
        let slot = lock(&self.inner.slot);
        (slot.value.clone(), slot.version)
    }

    pub(crate) fn erased(&self) -> Arc<dyn AnyVar> {
        self.inner.clone()
    }
}

/// The operations the engine needs on a var without knowing its type.
pub(crate) trait AnyVar: Send + Sync {
    fn version(&self) -> u64;

    /// Stores `value`, bumps the version and wakes every registered waiter.
    /// Returns the replaced value, which must be dropped only after all engine
    /// locks have been released. Callers must hold the serialization lock.
    fn commit(&self, value: Value) -> Value;

    fn register(&self, waiter: &Arc<Waiter>);
}

impl<T> AnyVar for VarInner<T>
where
    T: Send + Sync + 'static,
{
    fn version(&self) -> u64 {
        lock(&self.slot).version
    }

    fn commit(&self, value: Value) -> Value {
        // the log only pairs a var with values of the var's own type
        let value = match value.downcast::<T>() {
            Ok(value) => value,
            Err(_) => unreachable!("committed value does not match the type of its var"),
        };

        let mut slot = lock(&self.slot);
        slot.version += 1;
        let replaced = std::mem::replace(&mut slot.value, value);

        for waiter in slot.waiters.drain(..) {
            if let Some(waiter) = waiter.upgrade() {
                waiter.notify();
            }
        }

        replaced
    }

    fn register(&self, waiter: &Arc<Waiter>) {
        let mut slot = lock(&self.slot);
        slot.waiters.retain(|w| w.strong_count() > 0);
        slot.waiters.push(Arc::downgrade(waiter));
    }
}

impl<T> Clone for Var<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Debug for Var<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Var")
            .field("id", &(Arc::as_ptr(&self.inner) as *const () as usize))
            .field("engine", &self.inner.engine)
            .finish()
    }
}

impl<T> Hash for Var<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.inner).hash(state);
    }
}

impl<T> PartialEq for Var<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Eq for Var<T> {}
