// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

#[cfg(not(feature = "no_deadlocks"))]
pub(crate) use std::sync::{Mutex, MutexGuard};

#[cfg(feature = "no_deadlocks")]
pub(crate) use no_deadlocks::{Mutex, MutexGuard};

/// Acquires the mutex. A poisoned mutex is recovered, since no engine lock is
/// ever held while user code runs.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
