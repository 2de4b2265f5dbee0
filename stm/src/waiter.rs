// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Wake-up registration for retried transactions.
//!
//! A transaction that signals a retry registers one [`Waiter`] on every
//! [`crate::Var`] of its read set and then sleeps on it. Any commit writing to
//! one of those vars notifies the waiter. Registration and notification both
//! happen under the engine's serialization lock, so a wake-up cannot be lost
//! between the consistency check and the registration.

use crate::sync::{lock, Mutex};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, Thread},
};

#[cfg(feature = "async")]
use futures::task::AtomicWaker;
#[cfg(feature = "async")]
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

pub(crate) struct Waiter {
    notified: AtomicBool,

    /// The thread parked in `wait`
    sleeper: Mutex<Option<Thread>>,

    #[cfg(feature = "async")]
    waker: AtomicWaker,
}

impl Waiter {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            notified: AtomicBool::new(false),
            sleeper: Mutex::new(None),
            #[cfg(feature = "async")]
            waker: AtomicWaker::new(),
        })
    }

    pub(crate) fn is_notified(&self) -> bool {
        self.notified.load(Ordering::Acquire)
    }

    /// Wakes the sleeping transaction, if any. Notifying twice is harmless.
    pub(crate) fn notify(&self) {
        self.notified.store(true, Ordering::Release);

        // pairs with the flag check in `wait`
        if let Some(sleeper) = lock(&self.sleeper).take() {
            sleeper.unpark();
        }

        #[cfg(feature = "async")]
        self.waker.wake();
    }

    /// Parks the current thread until [`Self::notify`] has been called.
    pub(crate) fn wait(&self) {
        *lock(&self.sleeper) = Some(thread::current());

        // park may return spuriously
        while !self.is_notified() {
            thread::park();
        }
    }

    /// Returns a future resolving once [`Self::notify`] has been called.
    #[cfg(feature = "async")]
    pub(crate) fn notified(self: Arc<Self>) -> Notified {
        Notified { waiter: self }
    }
}

#[cfg(feature = "async")]
pub(crate) struct Notified {
    waiter: Arc<Waiter>,
}

#[cfg(feature = "async")]
impl Future for Notified {
    type Output = ();

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.waiter.is_notified() {
            return Poll::Ready(());
        }

        self.waiter.waker.register(ctx.waker());

        // the notification may have raced the registration
        match self.waiter.is_notified() {
            true => Poll::Ready(()),
            false => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Waiter;
    use std::{thread, time::Duration};

    #[test]
    fn test_notify_before_wait() {
        let waiter = Waiter::new();
        waiter.notify();
        waiter.wait();

        assert!(waiter.is_notified());
    }

    #[test]
    fn test_notify_from_other_thread() {
        let waiter = Waiter::new();
        let w = waiter.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            w.notify();
        });

        waiter.wait();
        handle.join().expect("Failed to join notifying thread");

        assert!(waiter.is_notified());
    }
}
