// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! # Simple Software Transactional Memory
//!
//! Shared state lives in transactional variables ([`Var`]). A transaction is a
//! closure reading and writing vars through a [`Transaction`] log; it is run by
//! [`atomically`] until it commits. All reads are validated and all writes are
//! applied in one step, so a transaction either takes effect completely or not
//! at all, and never observes the partial effects of another transaction.
//!
//! Transactions compose: [`compose`] runs several of them as one, and [`select`]
//! runs the first one that does not [`retry`]. A transaction that retries is put
//! to sleep until a var it has read is changed by another transaction.
//!
//! Transactions may run more than once, so they must not have side effects besides
//! the ones on their vars.
//!
//! ```
//! use simple_stm::*;
//!
//! let x = Var::new(3usize);
//!
//! // decrement x, or wait until it is positive
//! atomically(|tx| {
//!     let current = tx.get(&x);
//!     tx.assert(current > 0)?;
//!     tx.set(&x, current - 1);
//!     Ok::<_, TxError>(())
//! })
//! .expect("transaction cannot abort");
//!
//! assert_eq!(atomic_get(&x), 2);
//! ```

pub mod error;
pub mod ops;
pub mod stm;
pub mod transaction;
pub mod var;

mod sync;
mod waiter;

pub use crate::stm::{Stm, StmStats};
pub use error::{Retry, StmResult, TxError};
pub use ops::{abort, body, compose, guard, retry, select, Body};
pub use transaction::Transaction;
pub use var::Var;

/// Runs `transaction` atomically on the process-wide engine, see [`Stm::atomically`].
pub fn atomically<R, E, F>(transaction: F) -> Result<R, E>
where
    F: Fn(&mut Transaction) -> StmResult<R, E>,
{
    Stm::global().atomically(transaction)
}

/// Runs `transaction` atomically on the process-wide engine without blocking the
/// executor on retries, see [`Stm::atomically_async`].
#[cfg(feature = "async")]
pub async fn atomically_async<R, E, F>(transaction: F) -> Result<R, E>
where
    F: Fn(&mut Transaction) -> StmResult<R, E>,
{
    Stm::global().atomically_async(transaction).await
}

/// Atomically reads `var` on the process-wide engine.
pub fn atomic_get<T>(var: &Var<T>) -> T
where
    T: Clone + Send + Sync + 'static,
{
    Stm::global().atomic_get(var)
}

/// Atomically writes `value` to `var` on the process-wide engine.
pub fn atomic_set<T>(var: &Var<T>, value: T)
where
    T: Clone + Send + Sync + 'static,
{
    Stm::global().atomic_set(var, value)
}
