// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use simple_stm::{guard, Stm, TxError};
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_async_increments() {
    let stm = Stm::new();
    let var = stm.create(0usize);

    let mut tasks = Vec::new();
    for _ in 0..100 {
        let stm = stm.clone();
        let var = var.clone();
        tasks.push(tokio::spawn(async move {
            stm.atomically_async(|tx| {
                tx.modify(&var, |v| v + 1);
                Ok::<_, TxError>(())
            })
            .await
        }));
    }

    for task in tasks {
        assert!(task.await.expect("Failed to join task").is_ok());
    }

    assert_eq!(stm.atomic_get(&var), 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_retry_waits_for_commit() {
    let stm = Stm::new();
    let ready = stm.create(false);

    let s = stm.clone();
    let r = ready.clone();
    let waiting = tokio::spawn(async move {
        s.atomically_async(|tx| {
            let is_ready = tx.get(&r);
            guard(is_ready)?;
            Ok::<_, TxError>("done")
        })
        .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiting.is_finished());

    stm.atomically_async(|tx| {
        tx.set(&ready, true);
        Ok::<_, TxError>(())
    })
    .await
    .expect("setting the flag cannot abort");

    let result = tokio::time::timeout(Duration::from_secs(5), waiting)
        .await
        .expect("waiting task must wake up")
        .expect("Failed to join task");

    assert_eq!(result, Ok("done"));
}

#[tokio::test]
async fn test_async_abort() {
    let stm = Stm::new();
    let var = stm.create(1usize);

    let result = stm
        .atomically_async(|tx| {
            tx.set(&var, 2);
            tx.abort::<(), _>("cancelled")
        })
        .await;

    assert_eq!(result, Err("cancelled"));
    assert_eq!(stm.atomic_get(&var), 1);
}
