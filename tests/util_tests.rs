//! Tests for utility modules (retry, partial JSON, promises, serial execution).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use roci_stream::error::{RetryReason, RociError};
use roci_stream::util::partial_json::{parse_partial_json, PartialJsonState};
use roci_stream::util::promise::Resolvable;
use roci_stream::util::retry::RetryPolicy;
use roci_stream::util::serial::SerialJobExecutor;
use roci_stream::util::timeout::cancel_after;

fn policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        initial_backoff: Duration::from_millis(100),
        multiplier: 2.0,
        max_retry_after: Duration::from_secs(60),
    }
}

#[tokio::test(start_paused = true)]
async fn retry_policy_retries_retryable_errors_until_success() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let started = tokio::time::Instant::now();

    let value = policy(3)
        .execute(|| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(RociError::Network("reset".into()))
                } else {
                    Ok("ok")
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(value, "ok");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    // 100ms, then 200ms.
    assert_eq!(started.elapsed(), Duration::from_millis(300));
}

#[tokio::test]
async fn non_retryable_first_failure_is_returned_as_is() {
    let attempts = AtomicUsize::new(0);
    let err = policy(3)
        .execute(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(RociError::api(400, "bad request")) }
        })
        .await
        .unwrap_err();

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(matches!(err, RociError::Api { status: 400, .. }));
}

#[tokio::test(start_paused = true)]
async fn non_retryable_after_retries_reports_every_error() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let err = policy(3)
        .execute(|| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err::<(), _>(RociError::api(503, "busy"))
                } else {
                    Err(RociError::api(401, "unauthorized"))
                }
            }
        })
        .await
        .unwrap_err();

    match err {
        RociError::RetryExhausted {
            reason, errors, message,
        } => {
            assert_eq!(reason, RetryReason::ErrorNotRetryable);
            assert_eq!(errors.len(), 2);
            assert!(message.contains("non-retryable"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn long_retry_after_hint_falls_back_to_backoff() {
    let policy = RetryPolicy {
        max_retry_after: Duration::from_secs(1),
        ..policy(1)
    };
    let hinted = RociError::api_with_retry_after(429, "slow", 5_000);
    assert_eq!(
        policy.retry_delay(&hinted, Duration::from_millis(100)),
        Duration::from_millis(100)
    );
    let short = RociError::api_with_retry_after(429, "slow", 50);
    assert_eq!(
        policy.retry_delay(&short, Duration::from_millis(100)),
        Duration::from_millis(50)
    );
}

#[tokio::test(start_paused = true)]
async fn huge_multiplier_saturates_instead_of_panicking() {
    let policy = RetryPolicy {
        multiplier: f64::MAX,
        ..policy(1)
    };
    assert_eq!(
        policy.next_backoff(Duration::from_secs(1)),
        Duration::MAX
    );

    let attempts = AtomicUsize::new(0);
    let started = tokio::time::Instant::now();
    let value = policy
        .execute(|| {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(RociError::api(503, "busy"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .unwrap();
    assert_eq!(value, 1);
    assert_eq!(started.elapsed(), Duration::from_millis(100));
}

#[test]
fn negative_or_nan_multiplier_keeps_the_current_backoff() {
    let current = Duration::from_millis(250);
    for multiplier in [-2.0, f64::NAN] {
        let policy = RetryPolicy {
            multiplier,
            ..policy(1)
        };
        assert_eq!(policy.next_backoff(current), current);
    }
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_the_backoff() {
    let token = CancellationToken::new();
    let timer = cancel_after(token.clone(), Duration::from_millis(50));
    let err = policy(5)
        .execute_with_cancel(&token, || async {
            Err::<(), _>(RociError::Network("down".into()))
        })
        .await
        .unwrap_err();

    assert!(err.is_abort());
    timer.abort();
}

#[test]
fn partial_json_repairs_truncated_objects() {
    let parsed = parse_partial_json(Some(r#"{"city":"Os"#));
    assert_eq!(parsed.state, PartialJsonState::RepairedParse);
    assert_eq!(parsed.value, Some(json!({ "city": "Os" })));

    let nested = parse_partial_json(Some(r#"{"a":[1,2"#));
    assert_eq!(nested.value, Some(json!({ "a": [1, 2] })));

    assert_eq!(
        parse_partial_json(None).state,
        PartialJsonState::UndefinedInput
    );
}

#[tokio::test]
async fn resolvable_wakes_every_waiter_once() {
    let promise: Resolvable<u32> = Resolvable::new();
    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let promise = promise.clone();
            tokio::spawn(async move { promise.wait().await })
        })
        .collect();

    assert!(promise.resolve(7));
    assert!(!promise.resolve(8));
    for waiter in waiters {
        assert_eq!(waiter.await.unwrap(), 7);
    }
    assert_eq!(promise.get(), Some(&7));
}

#[tokio::test]
async fn serial_executor_preserves_submission_order() {
    let executor = SerialJobExecutor::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    let jobs = (0..5).map(|i| {
        let log = log.clone();
        let executor = executor.clone();
        async move {
            executor
                .run(move || async move {
                    tokio::task::yield_now().await;
                    log.lock().unwrap().push(i);
                    Ok(())
                })
                .await
        }
    });
    for outcome in futures::future::join_all(jobs).await {
        outcome.unwrap();
    }

    assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn serial_executor_survives_a_panicking_job() {
    let executor = SerialJobExecutor::new();
    let failed = executor
        .run(|| async {
            if true {
                panic!("bad job");
            }
            Ok(())
        })
        .await;
    assert!(failed.is_err());
    assert_eq!(executor.run(|| async { Ok(1) }).await.unwrap(), 1);
}
