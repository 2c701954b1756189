//! 跨挂起点的安全交接：为 Future 的每一次 `poll` 建立并释放 Scope。
//!
//! # 教案式说明
//! - **意图（Why）**：在 `attach` 与 `detach` 之间 `.await` 会让 Scope 在任务挂起时仍留在共享栈上，
//!   这正是亲和性守卫报告的情形；需要让上下文“跟随任务”时，应该把上下文绑定到 Future 本身；
//! - **逻辑（How）**：[`WithContext`] 持有快照与存储句柄，每次 `poll` 先压栈、再驱动内部 Future、
//!   返回前出栈；出栈放在 Drop 守卫中，内部 Future panic 时同样执行；
//! - **契约（What）**：
//!   - 内部 Future 在任意一次 `poll` 中读取 `current()` 都得到绑定的快照；
//!   - 内部 Future 自身的 attach/detach 在同一次 `poll` 内配对时，`poll` 返回后栈恢复原状，挂起期间不会暴露任何 Scope；
//!   - 例外：内部 Future 跨挂起点持有自己 attach 的 Scope 时，包装层的 Scope 不在栈顶，无法出栈。
//!     此时记录 `warn` 日志，两帧都留在共享栈上，由遗留 Scope 的持有者按 LIFO 顺序释放后栈才恢复；
//!     存储为亲和性守卫时，其他任务随后的读取会被报告。出栈失败不影响 `poll` 的结果。

use core::future::Future;
use core::pin::Pin;
use core::task::{Context as TaskContext, Poll};

use pin_project::pin_project;
use tracing::warn;

use crate::context::Context;
use crate::local::{self, LocalStorage};
use crate::storage::{ContextScope, ContextStorage};

/// 在每次 `poll` 期间将 `context` 设为当前快照的 Future 包装。
#[pin_project]
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct WithContext<F, S> {
    #[pin]
    inner: F,
    context: Context,
    storage: S,
}

impl<F, S> WithContext<F, S> {
    pub fn new(inner: F, storage: S, context: Context) -> Self {
        Self {
            inner,
            context,
            storage,
        }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn into_inner(self) -> F {
        self.inner
    }
}

impl<F, S> Future for WithContext<F, S>
where
    F: Future,
    S: ContextStorage,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let _attached = PollScope(this.storage.attach(this.context.clone()));
        this.inner.poll(cx)
    }
}

struct PollScope<T: ContextScope>(T);

impl<T: ContextScope> Drop for PollScope<T> {
    fn drop(&mut self) {
        if let Err(err) = self.0.detach() {
            warn!(
                code = err.code(),
                scope = %self.0.key(),
                error = %err,
                "failed to detach poll-scoped context"
            );
        }
    }
}

/// 为任意 Future 提供上下文绑定的便捷方法。
pub trait FutureContextExt: Future + Sized {
    /// 每次 `poll` 期间在 `storage` 上激活 `context`。
    fn with_context<S: ContextStorage>(self, storage: S, context: Context) -> WithContext<Self, S> {
        WithContext::new(self, storage, context)
    }

    /// 捕获当前线程存储的当前快照，并在之后的每次 `poll` 中恢复它。
    ///
    /// 常用于 `spawn_local` 之前：新任务看到的是派生它时的上下文，而不是共享栈上恰好位于栈顶的内容。
    fn in_current_context(self) -> WithContext<Self, LocalStorage> {
        let storage = local::storage();
        let context = storage.current();
        WithContext::new(self, storage, context)
    }
}

impl<F: Future> FutureContextExt for F {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DetachPolicy, StorageConfig};
    use crate::storage::ExecutionContextStore;
    use core::task::Waker;
    use std::future::poll_fn;
    use tracing_test::traced_test;

    fn store() -> ExecutionContextStore {
        ExecutionContextStore::with_config(
            StorageConfig::default().with_detach_policy(DetachPolicy::Strict),
        )
    }

    #[test]
    fn context_is_active_only_while_polled() {
        let store = store();
        let observer = store.clone();
        let mut polls = 0;
        let future = poll_fn(move |_| {
            polls += 1;
            assert_eq!(observer.current().baggage("request"), Some("r-1"));
            if polls < 2 {
                Poll::Pending
            } else {
                Poll::Ready(polls)
            }
        })
        .with_context(store.clone(), Context::root().with_baggage("request", "r-1"));

        let mut future = Box::pin(future);
        let mut cx = TaskContext::from_waker(Waker::noop());
        assert!(future.as_mut().poll(&mut cx).is_pending());
        assert!(store.current().is_root(), "挂起期间不得暴露 Scope");
        assert_eq!(store.depth(), 0);
        assert_eq!(future.as_mut().poll(&mut cx), Poll::Ready(2));
        assert!(store.current().is_root());
    }

    #[test]
    fn outer_scope_is_restored_after_poll() {
        let store = store();
        let mut outer = store.attach(Context::root().with_baggage("layer", "outer"));
        let mut future = Box::pin(
            poll_fn(|_| Poll::Ready(()))
                .with_context(store.clone(), Context::root().with_baggage("layer", "inner")),
        );
        let mut cx = TaskContext::from_waker(Waker::noop());
        assert_eq!(future.as_mut().poll(&mut cx), Poll::Ready(()));
        assert_eq!(store.current().baggage("layer"), Some("outer"));
        outer.detach().expect("外层 Scope 仍位于栈顶");
    }

    #[test]
    #[traced_test]
    fn scope_leaked_across_pending_keeps_wrapper_frame() {
        let store = store();
        let leaker = store.clone();
        let mut leaked = None;
        let mut future = Box::pin(
            poll_fn(move |_| {
                if leaked.is_none() {
                    leaked = Some(leaker.attach(Context::root().with_baggage("layer", "leak")));
                    return Poll::Pending;
                }
                Poll::Ready(leaked.take())
            })
            .with_context(store.clone(), Context::root().with_baggage("layer", "wrapper")),
        );
        let mut cx = TaskContext::from_waker(Waker::noop());

        assert!(future.as_mut().poll(&mut cx).is_pending());
        assert!(logs_contain("failed to detach poll-scoped context"));
        assert_eq!(store.depth(), 2, "包装层的帧压在遗留 Scope 之下");
        assert_eq!(store.current().baggage("layer"), Some("leak"));

        let Poll::Ready(Some(mut leaked)) = future.as_mut().poll(&mut cx) else {
            panic!("第二次 poll 应交还遗留的 Scope");
        };
        leaked.detach().expect("遗留 Scope 位于栈顶");
        let mut wrapper = store.scope().expect("包装层的帧仍在栈上");
        assert_eq!(wrapper.context().baggage("layer"), Some("wrapper"));
        wrapper.detach().expect("按 LIFO 顺序清理包装层的帧");
        assert!(store.current().is_root());
    }
}
