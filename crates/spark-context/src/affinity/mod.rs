//! 协程亲和性守卫。
//!
//! # 教案式说明
//! - **意图（Why）**：基础存储按线程（或执行上下文）共享一条栈，并不知道同一线程上还有多个协作式任务在交错执行。
//!   一个任务在 Scope 尚未释放时挂起，它压入的快照就会被随后运行的其他任务读到，LIFO 嵌套也随之被打乱；
//! - **逻辑（How）**：守卫在 `attach` 时把当前任务标识写入 Scope 元数据，之后每次读取 `current()`/`scope()`
//!   都比较栈顶 Scope 的标识与当前任务，不一致即向 [`DiagnosticSink`] 报告；
//! - **契约（What）**：
//!   - 守卫只检测，不阻止：读取结果始终是底层存储的答案，因为有意的跨任务上下文传递是受支持的用法；
//!   - `fork`/`switch`/`destroy` 原样转发，执行上下文粒度与任务粒度互不相干；
//!   - `detach` 不做亲和性检查，风险在观测时暴露，而非释放时。

mod diagnostics;
mod identity;

pub use diagnostics::{AccessKind, AffinityDiagnostic, DiagnosticSink, TracingDiagnosticSink};
#[cfg(feature = "tokio")]
pub use identity::TokioTaskIdentity;
pub use identity::{NoTaskIdentity, TaskId, TaskIdentityProvider, default_task_identity};

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use tracing::error;

use crate::config::{DetachPolicy, MismatchReporting, StorageConfig};
use crate::context::Context;
use crate::error::{IllegalState, Result, codes};
use crate::execution::ExecutionContextId;
use crate::storage::{
    ContextScope, ContextStorage, ScopeKey, ScopeMetadata, apply_detach_policy,
};

/// 包装任意 [`ContextStorage`]，为其加上协程亲和性检测。
///
/// # 契约说明（What）
/// - 守卫本身实现 [`ContextStorage`]，可以替换任何期望基础存储的位置；
/// - 诊断频率由 [`MismatchReporting`] 决定，非法释放的处置由 [`DetachPolicy`] 决定；
/// - 守卫的内部状态不做同步，类型为 `!Send`，只在持有协作式调度线程时运行。
pub struct CoroutineAffinityGuard<S> {
    inner: S,
    tasks: Arc<dyn TaskIdentityProvider>,
    sink: Arc<dyn DiagnosticSink>,
    reporting: MismatchReporting,
    detach_policy: DetachPolicy,
    reported: Rc<RefCell<HashSet<ScopeKey>>>,
}

impl<S: ContextStorage> CoroutineAffinityGuard<S> {
    pub fn new(
        inner: S,
        tasks: Arc<dyn TaskIdentityProvider>,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            inner,
            tasks,
            sink,
            reporting: MismatchReporting::default(),
            detach_policy: DetachPolicy::default(),
            reported: Rc::new(RefCell::new(HashSet::new())),
        }
    }

    /// 采用配置中的诊断频率与释放策略。
    pub fn with_config(mut self, config: &StorageConfig) -> Self {
        self.reporting = config.mismatch_reporting;
        self.detach_policy = config.detach_policy;
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn task_identity(&self) -> &Arc<dyn TaskIdentityProvider> {
        &self.tasks
    }

    /// 读取栈顶 Scope 并比较任务身份；空栈直接放行。
    fn check_affinity(&self, access: AccessKind) -> Option<S::Scope> {
        let scope = self.inner.scope()?;
        let observer = self.tasks.current_task();
        if scope.metadata().owner() != observer.as_ref() {
            self.report(&scope, observer, access);
        }
        Some(scope)
    }

    fn report(&self, scope: &S::Scope, observer: Option<TaskId>, access: AccessKind) {
        if self.reporting == MismatchReporting::OncePerScope
            && !self.reported.borrow_mut().insert(scope.key().clone())
        {
            return;
        }
        self.sink.report(&AffinityDiagnostic {
            scope: scope.key().clone(),
            owner: scope.metadata().owner().copied(),
            observer,
            access,
        });
    }

    /// 写入创建者任务。内层存储已经写入标记（例如守卫嵌套）时只核对，不再重复写入。
    fn stamp(&self, scope: &mut S::Scope) {
        let owner = self.tasks.current_task();
        let metadata = scope.metadata();
        if metadata.is_stamped() {
            if metadata.owner() != owner.as_ref() {
                error!(
                    code = codes::ILLEGAL_STATE,
                    scope = %scope.key(),
                    stamped = ?metadata.owner(),
                    running = ?owner,
                    "scope was stamped with a different owner by the inner storage"
                );
            }
            return;
        }
        let stamped = scope.stamp_owner(owner);
        debug_assert!(
            stamped.is_ok(),
            "freshly attached scope rejected its owner stamp: {stamped:?}"
        );
        if let Err(err) = stamped {
            error!(
                code = err.code(),
                scope = %scope.key(),
                error = %err,
                "failed to stamp scope owner"
            );
        }
    }

    fn wrap(&self, inner: S::Scope) -> GuardedScope<S::Scope> {
        GuardedScope {
            inner,
            detached: false,
            detach_policy: self.detach_policy,
            reported: Rc::clone(&self.reported),
        }
    }
}

impl<S: Clone> Clone for CoroutineAffinityGuard<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            tasks: Arc::clone(&self.tasks),
            sink: Arc::clone(&self.sink),
            reporting: self.reporting,
            detach_policy: self.detach_policy,
            reported: Rc::clone(&self.reported),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for CoroutineAffinityGuard<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoroutineAffinityGuard")
            .field("inner", &self.inner)
            .field("reporting", &self.reporting)
            .field("detach_policy", &self.detach_policy)
            .finish_non_exhaustive()
    }
}

impl<S: ContextStorage> ContextStorage for CoroutineAffinityGuard<S> {
    type Scope = GuardedScope<S::Scope>;

    fn fork(&self, id: impl Into<ExecutionContextId>) -> Result<()> {
        self.inner.fork(id)
    }

    fn switch(&self, id: impl Into<ExecutionContextId>) -> Result<()> {
        self.inner.switch(id)
    }

    fn destroy(&self, id: impl Into<ExecutionContextId>) -> Result<()> {
        let id = id.into();
        self.inner.destroy(id.clone())?;
        self.reported
            .borrow_mut()
            .retain(|key| key.execution() != &id);
        Ok(())
    }

    fn active(&self) -> ExecutionContextId {
        self.inner.active()
    }

    fn scope(&self) -> Option<Self::Scope> {
        self.check_affinity(AccessKind::Scope)
            .map(|scope| self.wrap(scope))
    }

    fn current(&self) -> Context {
        let _ = self.check_affinity(AccessKind::Current);
        self.inner.current()
    }

    fn attach(&self, context: Context) -> Self::Scope {
        debug_assert!(
            self.tasks.is_supported(),
            "task identity provider is unavailable in this build"
        );
        let mut scope = self.inner.attach(context);
        self.stamp(&mut scope);
        self.wrap(scope)
    }
}

/// 守卫返回的 Scope：透明转发，只额外负责“同一句柄至多释放一次”。
///
/// 释放时调用内层的 `detach_strict`，非法状态的处置只在本层按守卫的策略进行一次，
/// 因此宽松策略下被忽略的乱序释放不会让句柄误记为已释放。
pub struct GuardedScope<T> {
    inner: T,
    detached: bool,
    detach_policy: DetachPolicy,
    reported: Rc<RefCell<HashSet<ScopeKey>>>,
}

impl<T: ContextScope> GuardedScope<T> {
    pub fn is_detached(&self) -> bool {
        self.detached
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: ContextScope> ContextScope for GuardedScope<T> {
    fn key(&self) -> &ScopeKey {
        self.inner.key()
    }

    fn context(&self) -> &Context {
        self.inner.context()
    }

    fn previous(&self) -> &Context {
        self.inner.previous()
    }

    fn metadata(&self) -> &ScopeMetadata {
        self.inner.metadata()
    }

    fn stamp_owner(&mut self, owner: Option<TaskId>) -> Result<()> {
        self.inner.stamp_owner(owner)
    }

    fn detach_strict(&mut self) -> Result<()> {
        if self.detached {
            return Err(IllegalState::DoubleDetach {
                scope: self.inner.key().clone(),
            }
            .into());
        }
        self.inner.detach_strict()?;
        self.detached = true;
        self.reported.borrow_mut().remove(self.inner.key());
        Ok(())
    }

    /// 按本守卫的 [`DetachPolicy`] 处置非法释放；只有真正出栈时句柄才记为已释放。
    fn detach(&mut self) -> Result<()> {
        let outcome = self.detach_strict();
        apply_detach_policy(self.detach_policy, self.inner.key(), outcome)
    }
}

impl<T: fmt::Debug> fmt::Debug for GuardedScope<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardedScope")
            .field("inner", &self.inner)
            .field("detached", &self.detached)
            .finish()
    }
}
