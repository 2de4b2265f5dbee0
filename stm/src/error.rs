// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::convert::Infallible;
use thiserror::Error as DeriveError;

/// The outcome of a transaction body that did not complete.
///
/// [`TxError::Retry`] is a control signal: it is caught by the engine and by
/// [`crate::select`], and never reaches the caller of [`crate::Stm::atomically`].
/// [`TxError::Abort`] cancels the transaction and hands the inner error back to
/// the caller unchanged. No writes of an aborted attempt are ever applied.
#[derive(Debug, DeriveError, PartialEq, Eq)]
pub enum TxError<E = Infallible> {
    #[error("transaction requested a retry")]
    Retry,

    #[error("transaction aborted: {0}")]
    Abort(E),
}

impl<E> TxError<E> {
    /// Returns `true` for the retry signal.
    pub fn is_retry(&self) -> bool {
        matches!(self, TxError::Retry)
    }

    /// Maps the abort payload, leaving a retry untouched.
    pub fn map_abort<F, O>(self, f: O) -> TxError<F>
    where
        O: FnOnce(E) -> F,
    {
        match self {
            TxError::Retry => TxError::Retry,
            TxError::Abort(e) => TxError::Abort(f(e)),
        }
    }
}

/// The retry signal on its own, as returned by [`crate::Transaction::assert`] and
/// [`crate::guard`]. It converts into a [`TxError`] of any abort type, so `?` can
/// be used on it in every transaction body.
#[derive(Clone, Copy, Debug, DeriveError, PartialEq, Eq)]
#[error("transaction requested a retry")]
pub struct Retry;

impl<E> From<Retry> for TxError<E> {
    fn from(_: Retry) -> Self {
        TxError::Retry
    }
}

/// Result type of transaction bodies.
pub type StmResult<T, E = Infallible> = Result<T, TxError<E>>;
