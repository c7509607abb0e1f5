mod common;

use arbiter_common::types::Verdict;
use arbiter_engine::JudgePool;
use common::{case, judge, submission, FakeSandbox};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_bounds_live_processes() {
    let sandbox = FakeSandbox::new();
    let pool = JudgePool::new(Arc::new(judge(sandbox.clone())), 8);

    let mut handles = Vec::new();
    let mut ids = HashSet::new();
    for i in 0..50 {
        let sub = submission(
            "python",
            "print(input())  # slow",
            vec![case(&i.to_string(), &i.to_string()), case("x", "x")],
            10,
        );
        ids.insert(sub.id);
        let pool = pool.clone();
        handles.push(tokio::spawn(async move { pool.submit(sub).await }));
    }

    let mut reported = HashSet::new();
    for handle in handles {
        let report = handle.await.unwrap();
        assert_eq!(report.verdict, Verdict::Accepted);
        assert!(reported.insert(report.submission_id));
    }

    assert_eq!(reported, ids);
    assert!(sandbox.max_live() <= 8, "max live was {}", sandbox.max_live());
    assert_eq!(sandbox.live(), 0);
    assert_eq!(sandbox.live_workspaces(), 0);
    assert_eq!(pool.idle_workers(), 8);
}

#[tokio::test]
async fn test_cancel_while_queued() {
    let sandbox = FakeSandbox::new();
    let pool = JudgePool::new(Arc::new(judge(sandbox.clone())), 1);
    let _busy = pool.reserve().await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let sub = submission("python", "print(input())", vec![case("a", "a")], 10);
    let id = sub.id;

    let report = pool.submit_with_cancel(sub, cancel).await;

    assert_eq!(report.submission_id, id);
    assert_eq!(report.verdict, Verdict::SystemError);
    assert!(report.retryable);
    assert_eq!(sandbox.spawned(), 0);
}

#[tokio::test]
async fn test_closed_pool_reports_system_error() {
    let pool = JudgePool::new(Arc::new(judge(FakeSandbox::new())), 2);
    pool.close();

    assert!(pool.reserve().await.is_err());
    let report = pool
        .submit(submission("python", "print(input())", vec![case("a", "a")], 10))
        .await;
    assert_eq!(report.verdict, Verdict::SystemError);
    assert!(report.diagnostic.contains("shut down"));
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_submit_keeps_worker_busy() {
    let sandbox = FakeSandbox::new();
    let pool = JudgePool::new(Arc::new(judge(sandbox.clone())), 1);
    let stuck = submission("python", "while True: pass  # sleep", vec![case("", "x")], 10);

    let abandoned = tokio::time::timeout(Duration::from_millis(100), pool.submit(stuck)).await;
    assert!(abandoned.is_err());
    assert_eq!(pool.idle_workers(), 0);

    // A second submission waits for the only worker instead of running alongside
    let quick = submission("python", "print(input())", vec![case("a", "a")], 10);
    let waiting = tokio::time::timeout(Duration::from_millis(100), pool.submit(quick)).await;
    assert!(waiting.is_err());
    assert_eq!(sandbox.max_live(), 1);

    // The detached evaluation hits its wall clock limit and frees the worker
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(pool.idle_workers(), 1);
    assert_eq!(sandbox.live(), 0);

    let report = pool
        .submit(submission("python", "print(input())", vec![case("b", "b")], 10))
        .await;
    assert_eq!(report.verdict, Verdict::Accepted);
    assert_eq!(sandbox.max_live(), 1);
}

fn assert_send<T: Send>(_: &T) {}

#[test]
fn test_evaluation_future_is_send() {
    let judge = judge(FakeSandbox::new());
    let sub = submission("python", "print(input())", vec![case("a", "a"), case("b", "b")], 10);
    let evaluation = judge.evaluate(sub, CancellationToken::new());
    assert_send(&evaluation);
}
