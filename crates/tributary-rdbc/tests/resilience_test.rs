//! Retry behavior for deadlock and lock-wait errors

mod common;

use common::init_test_logging;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tributary_rdbc::prelude::*;

#[tokio::test(start_paused = true)]
async fn test_deadlock_twice_then_success() {
    init_test_logging();
    let policy = RetryPolicy::for_dialect(&PostgresDialect).with_max_attempts(3);
    let calls = AtomicU32::new(0);

    let result = retry_db_call(&policy, "merge page", || async {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= 2 {
            Err(Error::deadlock("40P01", "deadlock detected"))
        } else {
            Ok(n)
        }
    })
    .await;

    assert_eq!(result.unwrap(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_reraise_last_error() {
    let policy = RetryPolicy::for_dialect(&MySqlDialect);
    let calls = AtomicU32::new(0);

    let result: Result<()> = retry_db_call(&policy, "diff page", || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::database("1213", "Deadlock found when trying to get lock"))
    })
    .await;

    let err = result.unwrap_err();
    assert_eq!(err.code(), Some("1213"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_each_kind_waits_its_own_timeout() {
    let policy = RetryPolicy::for_dialect(&SqlServerDialect)
        .with_deadlock_wait(Duration::from_millis(500))
        .with_lock_wait(Duration::from_secs(10));

    let start = Instant::now();
    let calls = AtomicU32::new(0);
    let result = retry_db_call(&policy, "lock wait", || async {
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(Error::database("1222", "Lock request time out period exceeded"))
        } else {
            Ok(())
        }
    })
    .await;
    assert!(result.is_ok());
    assert!(start.elapsed() >= Duration::from_secs(10));

    let start = Instant::now();
    let calls = AtomicU32::new(0);
    let result = retry_db_call(&policy, "deadlock", || async {
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(Error::database("1205", "Transaction was deadlocked"))
        } else {
            Ok(())
        }
    })
    .await;
    assert!(result.is_ok());
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_unrecognized_codes_propagate_immediately() {
    let policy = RetryPolicy::for_dialect(&PostgresDialect);
    let calls = AtomicU32::new(0);

    let result: Result<()> = retry_db_call(&policy, "insert", || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::database("23505", "duplicate key value"))
    })
    .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_policy_single_attempt() {
    let calls = AtomicU32::new(0);
    let result: Result<()> = retry_db_call(&RetryPolicy::disabled(), "once", || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::lock_wait("55P03", "could not obtain lock"))
    })
    .await;
    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
