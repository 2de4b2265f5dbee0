// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Building larger transactions out of smaller ones.
//!
//! Neither [`compose`] nor [`select`] does any work itself. Both return a new
//! transaction body which can be passed to [`crate::Stm::atomically`] or combined
//! further.

use crate::{
    error::{Retry, StmResult, TxError},
    transaction::Transaction,
};
use std::convert::Infallible;

/// A boxed transaction body.
pub type Body<'a, R = (), E = Infallible> = Box<dyn Fn(&mut Transaction) -> StmResult<R, E> + Send + Sync + 'a>;

/// Boxes a transaction body, so that bodies of different types can be passed
/// to [`compose`] and [`select`] together.
pub fn body<'a, R, E, F>(f: F) -> Body<'a, R, E>
where
    F: Fn(&mut Transaction) -> StmResult<R, E> + Send + Sync + 'a,
{
    Box::new(f)
}

/// Runs all `bodies` in order against the same transaction.
///
/// The first body to retry or abort stops the sequence, and its error is returned.
/// The remaining bodies do not run.
pub fn compose<'a, E, I>(bodies: I) -> impl Fn(&mut Transaction) -> StmResult<(), E> + Send + Sync + 'a
where
    I: IntoIterator<Item = Body<'a, (), E>>,
    E: 'a,
{
    let bodies: Vec<Body<'a, (), E>> = bodies.into_iter().collect();

    move |tx: &mut Transaction| {
        for body in bodies.iter() {
            body(tx)?;
        }
        Ok(())
    }
}

/// Runs `bodies` in order until one of them does not retry, and returns its result.
///
/// A body that retries has its staged writes discarded before the next body runs.
/// If every body retries, the selection retries as a whole and wakes up when any var
/// read by any of the bodies changes. An empty selection always retries; since it
/// reads nothing, running it with [`crate::Stm::atomically`] blocks forever.
pub fn select<'a, R, E, I>(bodies: I) -> impl Fn(&mut Transaction) -> StmResult<R, E> + Send + Sync + 'a
where
    I: IntoIterator<Item = Body<'a, R, E>>,
    R: 'a,
    E: 'a,
{
    let bodies: Vec<Body<'a, R, E>> = bodies.into_iter().collect();

    move |tx: &mut Transaction| select_from(&bodies, tx)
}

fn select_from<R, E>(bodies: &[Body<'_, R, E>], tx: &mut Transaction) -> StmResult<R, E> {
    match bodies {
        [] => tx.retry(),
        [only] => only(tx),
        [first, rest @ ..] => tx.or(|tx| first(tx), |tx| select_from(rest, tx)),
    }
}

/// Abandons the current attempt, see [`Transaction::retry`].
pub fn retry<R, E>() -> StmResult<R, E> {
    Err(TxError::Retry)
}

/// Retries unless `cond` holds. Use with `?`.
pub fn guard(cond: bool) -> Result<(), Retry> {
    match cond {
        true => Ok(()),
        false => Err(Retry),
    }
}

/// Cancels the transaction with `error`, see [`Transaction::abort`].
pub fn abort<R, E>(error: E) -> StmResult<R, E> {
    Err(TxError::Abort(error))
}

#[cfg(test)]
mod tests {
    use super::{body, compose, guard, select, Body};
    use crate::{Stm, StmResult, Transaction, TxError, Var};
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    fn dec(var: &Var<usize>) -> impl Fn(&mut Transaction) -> StmResult<()> + Send + Sync + 'static {
        let var = var.clone();
        move |tx| {
            let current = tx.get(&var);
            guard(current > 0)?;
            tx.set(&var, current - 1);
            Ok(())
        }
    }

    #[test]
    fn test_compose_runs_in_sequence() {
        let stm = Stm::new();
        let x = stm.create(2usize);
        let y = stm.create(1usize);

        stm.run(compose(vec![body(dec(&x)), body(dec(&x)), body(dec(&y))]));

        assert_eq!(stm.atomic_get(&x), 0);
        assert_eq!(stm.atomic_get(&y), 0);
    }

    #[test]
    fn test_compose_stops_on_retry() {
        let stm = Stm::new();
        let x = stm.create(0usize);
        let ran = Arc::new(AtomicBool::new(false));
        let r = ran.clone();

        let composed = compose(vec![
            body(dec(&x)),
            body(move |_: &mut Transaction| {
                r.store(true, Ordering::SeqCst);
                Ok(())
            }),
        ]);

        let mut tx = stm.begin();
        assert_eq!(composed(&mut tx), Err(TxError::Retry));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_compose_stops_on_abort() {
        let stm = Stm::new();
        let x = stm.create(5usize);
        let x2 = x.clone();

        let result: Result<(), &str> = stm.atomically(compose(vec![
            body(|tx: &mut Transaction| tx.abort("stop")),
            body(move |tx: &mut Transaction| {
                tx.set(&x2, 0);
                Ok(())
            }),
        ]));

        assert_eq!(result, Err("stop"));
        assert_eq!(stm.atomic_get(&x), 5);
    }

    #[test]
    fn test_select_takes_first_success() {
        let stm = Stm::new();
        let x = stm.create(0usize);
        let y = stm.create(3usize);

        stm.run(select(vec![body(dec(&x)), body(dec(&y))]));

        assert_eq!(stm.atomic_get(&x), 0);
        assert_eq!(stm.atomic_get(&y), 2);
    }

    #[test]
    fn test_select_returns_branch_result() {
        let stm = Stm::new();
        let bodies: Vec<Body<'_, &str>> = vec![
            body(|tx: &mut Transaction| tx.retry()),
            body(|_: &mut Transaction| Ok("second")),
            body(|_: &mut Transaction| Ok("third")),
        ];

        assert_eq!(stm.run(select(bodies)), "second");
    }

    #[test]
    fn test_select_single_passes_through() {
        let stm = Stm::new();
        let bodies: Vec<Body<'_, (), &str>> = vec![body(|tx: &mut Transaction| tx.abort("inner"))];

        assert_eq!(stm.atomically(select(bodies)), Err("inner"));
    }

    #[test]
    fn test_select_empty_retries() {
        let stm = Stm::new();
        let empty: Vec<Body<'_>> = Vec::new();
        let mut tx = stm.begin();

        assert_eq!(select(empty)(&mut tx), Err(TxError::Retry));
    }

    #[test]
    fn test_select_all_retry() {
        let stm = Stm::new();
        let x = stm.create(0usize);
        let y = stm.create(0usize);
        let mut tx = stm.begin();

        assert_eq!(select(vec![body(dec(&x)), body(dec(&y))])(&mut tx), Err(TxError::Retry));
    }

    #[test]
    fn test_select_discards_writes_of_retried_branch() {
        let stm = Stm::new();
        let staged = stm.create(0usize);
        let (s1, s2) = (staged.clone(), staged.clone());
        let other = stm.create(0usize);
        let o = other.clone();

        stm.run(select(vec![
            body(move |tx: &mut Transaction| {
                tx.set(&s1, 99);
                tx.retry()
            }),
            body(move |tx: &mut Transaction| {
                let seen = tx.get(&s2);
                tx.set(&o, seen + 1);
                Ok(())
            }),
        ]));

        assert_eq!(stm.atomic_get(&staged), 0);
        assert_eq!(stm.atomic_get(&other), 1);
    }
}
