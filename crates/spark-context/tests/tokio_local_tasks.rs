//! 在真实的 Tokio `LocalSet` 上验证亲和性守卫。
//!
//! 任务身份来自 `tokio::task::try_id()`；任务之间的交错由 `oneshot` 通道精确编排，
//! 不依赖调度器的公平性假设。

use std::sync::Arc;

use spark_context::test_stubs::RecordingDiagnosticSink;
use spark_context::{
    Context, ContextScope, ContextStorage, CoroutineAffinityGuard, DetachPolicy,
    ExecutionContextStore, FutureContextExt, StorageConfig, TokioTaskIdentity, local,
};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::oneshot;
use tokio::task::{self, LocalSet};

type Guarded = CoroutineAffinityGuard<ExecutionContextStore>;

fn runtime() -> Runtime {
    Builder::new_current_thread()
        .build()
        .expect("构建单线程运行时")
}

fn guarded(sink: &RecordingDiagnosticSink) -> Guarded {
    let config = StorageConfig::default().with_detach_policy(DetachPolicy::Strict);
    CoroutineAffinityGuard::new(
        ExecutionContextStore::with_config(config.clone()),
        Arc::new(TokioTaskIdentity),
        Arc::new(sink.clone()),
    )
    .with_config(&config)
}

fn ctx(tag: &str) -> Context {
    Context::root().with_baggage("tag", tag)
}

#[test]
fn single_task_round_trip_is_silent() {
    let sink = RecordingDiagnosticSink::default();
    let storage = guarded(&sink);
    LocalSet::new().block_on(&runtime(), async move {
        task::spawn_local(async move {
            let mut scope = storage.attach(ctx("x"));
            task::yield_now().await;
            assert_eq!(storage.current(), ctx("x"));
            scope.detach().expect("同一任务内释放");
            assert!(storage.current().is_root());
        })
        .await
        .expect("任务应正常结束");
    });
    assert!(sink.is_empty());
}

#[test]
fn suspended_scope_leaks_to_sibling_task() {
    let sink = RecordingDiagnosticSink::default();
    let storage = guarded(&sink);
    let seen = LocalSet::new().block_on(&runtime(), async move {
        let (attached_tx, attached_rx) = oneshot::channel::<()>();
        let (resume_tx, resume_rx) = oneshot::channel::<()>();

        let first_storage = storage.clone();
        let first = task::spawn_local(async move {
            let mut scope = first_storage.attach(ctx("x"));
            attached_tx.send(()).expect("接收端仍存活");
            resume_rx.await.expect("发送端仍存活");
            scope.detach()
        });

        let second_storage = storage.clone();
        let second = task::spawn_local(async move {
            attached_rx.await.expect("发送端仍存活");
            let seen = second_storage.current();
            resume_tx.send(()).expect("接收端仍存活");
            seen
        });

        let seen = second.await.expect("任务应正常结束");
        first
            .await
            .expect("任务应正常结束")
            .expect("创建者在恢复后释放 Scope");
        assert!(storage.current().is_root());
        seen
    });

    assert_eq!(seen, ctx("x"), "另一个任务读到了挂起任务的快照");
    let reports = sink.take();
    assert_eq!(reports.len(), 1);
    assert_ne!(reports[0].owner, reports[0].observer);
    assert!(reports[0].owner.is_some() && reports[0].observer.is_some());
}

#[test]
fn with_context_keeps_interleaved_tasks_isolated() {
    let sink = RecordingDiagnosticSink::default();
    let storage = guarded(&sink);
    LocalSet::new().block_on(&runtime(), async move {
        let mut handles = Vec::new();
        for tag in ["a", "b", "c"] {
            let reader = storage.clone();
            let future = async move {
                let mut seen = Vec::new();
                for _ in 0..3 {
                    seen.push(reader.current());
                    task::yield_now().await;
                }
                seen
            };
            handles.push((tag, task::spawn_local(future.with_context(storage.clone(), ctx(tag)))));
        }
        for (tag, handle) in handles {
            let seen = handle.await.expect("任务应正常结束");
            assert!(seen.iter().all(|observed| *observed == ctx(tag)));
        }
        assert!(storage.current().is_root());
    });
    assert!(sink.is_empty(), "每次 poll 都在同一任务内压栈与出栈");
}

#[test]
fn in_current_context_carries_snapshot_into_spawned_task() {
    LocalSet::new().block_on(&runtime(), async {
        let mut scope = local::attach(ctx("parent"));
        let child = async { local::current() }.in_current_context();
        scope.detach().expect("根 Future 释放自己的 Scope");

        let seen = task::spawn_local(child).await.expect("任务应正常结束");
        assert_eq!(seen, ctx("parent"));
        assert!(local::current().is_root());
    });
}
