//! 上下文栈嵌套性质验证。
//!
//! # 教案级注释概览
//! - **核心目标 (Why)**：对任意遵守 LIFO 的 attach/detach 序列，`current()` 在每一步都等于“最近一次压入且尚未释放”的快照；
//!   释放后恢复的快照恰好是压入前的快照；违反 LIFO 的释放被拒绝且不改动栈；
//! - **设计手法 (How)**：以 `Vec<Context>` 作为影子模型，Proptest 生成操作序列，同时驱动真实存储与模型并逐步比对；
//! - **合同与边界 (What)**：全部操作在同一个“任务”中执行，守卫不应产生任何诊断。

use std::sync::Arc;

use proptest::prelude::*;
use spark_context::test_stubs::{ManualTaskIdentity, RecordingDiagnosticSink};
use spark_context::{
    Context, ContextScope, ContextStorage, CoroutineAffinityGuard, DetachPolicy,
    ExecutionContextStore, GuardedScope, IllegalState, StorageConfig, StoreScope, TaskId,
};

#[derive(Clone, Debug)]
enum Op {
    Attach(u8),
    Detach,
    DetachBottom,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => any::<u8>().prop_map(Op::Attach),
        3 => Just(Op::Detach),
        1 => Just(Op::DetachBottom),
    ]
}

fn ctx(tag: u8) -> Context {
    Context::root().with_baggage("tag", tag.to_string())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_current_tracks_innermost_live_scope(ops in prop::collection::vec(op(), 0..64)) {
        let config = StorageConfig::default().with_detach_policy(DetachPolicy::Strict);
        let tasks = ManualTaskIdentity::default();
        let sink = RecordingDiagnosticSink::default();
        let storage = CoroutineAffinityGuard::new(
            ExecutionContextStore::with_config(config.clone()),
            Arc::new(tasks.clone()),
            Arc::new(sink.clone()),
        )
        .with_config(&config);
        let _running = tasks.enter(TaskId::from_raw(1));

        let mut live: Vec<(GuardedScope<StoreScope>, Context)> = Vec::new();
        for op in ops {
            match op {
                Op::Attach(tag) => {
                    let before = storage.current();
                    let scope = storage.attach(ctx(tag));
                    prop_assert_eq!(scope.previous(), &before);
                    prop_assert_eq!(storage.current(), ctx(tag));
                    live.push((scope, ctx(tag)));
                }
                Op::Detach => {
                    if let Some((mut scope, _)) = live.pop() {
                        let restore = scope.previous().clone();
                        prop_assert!(scope.detach().is_ok());
                        prop_assert_eq!(storage.current(), restore);
                    }
                }
                Op::DetachBottom => {
                    if live.len() >= 2 {
                        let top = storage.current();
                        let err = live[0].0.detach().expect_err("非栈顶释放必须失败");
                        let is_out_of_order = matches!(
                            err.as_illegal_state(),
                            Some(IllegalState::OutOfOrder { .. })
                        );
                        prop_assert!(is_out_of_order);
                        prop_assert_eq!(storage.current(), top);
                    }
                }
            }
            let expected = live.last().map_or_else(Context::root, |(_, context)| context.clone());
            prop_assert_eq!(storage.current(), expected);
            prop_assert_eq!(storage.inner().depth(), live.len());
        }

        while let Some((mut scope, _)) = live.pop() {
            prop_assert!(scope.detach().is_ok());
        }
        prop_assert!(storage.current().is_root());
        prop_assert!(sink.is_empty());
    }
}
