//! 上下文存储契约：执行上下文粒度的栈管理与一次性 Scope 句柄。
//!
//! # 教案式说明
//! - **意图（Why）**：埋点代码只依赖 [`ContextStorage`] 这一组操作；基础栈实现
//!   [`ExecutionContextStore`] 与亲和性守卫 [`CoroutineAffinityGuard`](crate::affinity::CoroutineAffinityGuard)
//!   实现同一 Trait，守卫因此可以无感替换基础存储；
//! - **逻辑（How）**：存储以 `&self` 暴露全部操作，内部使用单线程可变性；Scope 通过 [`ScopeKey`]
//!   定位到所属栈的具体帧，而非持有帧的引用；
//! - **契约（What）**：
//!   - `current()` 永不失败，空栈返回 [`Context::root`]；
//!   - `attach()` 永不失败，返回的 Scope 记录被压入的快照与需要恢复的快照；
//!   - 每个 Scope 必须按 LIFO 顺序且仅释放一次，违反者视为编程错误。

mod store;

pub use store::{ExecutionContextStore, StoreScope};

use core::fmt;

use tracing::warn;

use crate::affinity::TaskId;
use crate::config::DetachPolicy;
use crate::context::Context;
use crate::error::{ContextError, Result, codes};
use crate::execution::ExecutionContextId;

/// 上下文存储的统一操作面。
pub trait ContextStorage {
    /// `attach`/`scope` 返回的句柄类型。
    type Scope: ContextScope;

    /// 为 `id` 创建独立的上下文栈。
    fn fork(&self, id: impl Into<ExecutionContextId>) -> Result<()>;

    /// 使 `id` 的栈成为后续 `current`/`attach`/`scope` 的作用对象。
    fn switch(&self, id: impl Into<ExecutionContextId>) -> Result<()>;

    /// 丢弃 `id` 的栈，并使其上全部存活 Scope 失效。
    fn destroy(&self, id: impl Into<ExecutionContextId>) -> Result<()>;

    /// 当前激活的执行上下文。
    fn active(&self) -> ExecutionContextId;

    /// 激活栈的栈顶 Scope；空栈返回 `None`。
    fn scope(&self) -> Option<Self::Scope>;

    /// 激活栈栈顶的快照；空栈返回根快照。
    fn current(&self) -> Context;

    /// 压入 `context` 并返回对应的 Scope。
    fn attach(&self, context: Context) -> Self::Scope;
}

/// 一次压栈对应的句柄。
///
/// # 契约说明（What）
/// - `context()` 为本次压入的快照，`previous()` 为释放后应恢复的快照；
/// - `metadata()` 是 Scope 上的显式旁路元数据，目前只承载创建者任务标识；
/// - `stamp_owner` 只能成功调用一次，之后标记不可再改写；
/// - `detach_strict` 释放本次压栈，返回前栈顶恢复为 `previous()`；任何非法状态都以错误返回，栈保持不变；
/// - `detach` 在 `detach_strict` 之上套用 [`DetachPolicy`]，宽松策略下非法状态只记录告警。
///   包装型 Scope 必须基于内层的 `detach_strict` 判断是否真正出栈，而不是内层 `detach` 的返回值。
pub trait ContextScope {
    fn key(&self) -> &ScopeKey;

    fn context(&self) -> &Context;

    fn previous(&self) -> &Context;

    fn metadata(&self) -> &ScopeMetadata;

    /// 写入创建者任务标识；`owner` 为 `None` 表示创建时不处于任何协作式任务中。
    fn stamp_owner(&mut self, owner: Option<TaskId>) -> Result<()>;

    fn detach_strict(&mut self) -> Result<()>;

    fn detach(&mut self) -> Result<()>;
}

/// 按 `policy` 处置一次释放失败：宽松策略下吞掉 [`IllegalState`]，其余错误原样返回。
pub(crate) fn apply_detach_policy(
    policy: DetachPolicy,
    key: &ScopeKey,
    outcome: Result<()>,
) -> Result<()> {
    match outcome {
        Err(ContextError::IllegalState(illegal)) if policy == DetachPolicy::Lenient => {
            warn!(
                code = codes::ILLEGAL_STATE,
                scope = %key,
                error = %illegal,
                "ignored illegal scope detach"
            );
            Ok(())
        }
        outcome => outcome,
    }
}

/// Scope 在全局范围内的唯一定位：执行上下文 + 栈代际 + 帧序号。
///
/// 栈代际在每次 `fork` 时递增，`destroy` 之后即使同名执行上下文被重新 fork，
/// 旧 Scope 的代际也无法再匹配。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ScopeKey {
    execution: ExecutionContextId,
    generation: u64,
    serial: u64,
}

impl ScopeKey {
    pub(crate) fn new(execution: ExecutionContextId, generation: u64, serial: u64) -> Self {
        Self {
            execution,
            generation,
            serial,
        }
    }

    pub fn execution(&self) -> &ExecutionContextId {
        &self.execution
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}/{}", self.execution, self.generation, self.serial)
    }
}

/// Scope 的旁路元数据。
///
/// 未写入标记的 Scope（例如直接由基础存储创建）在亲和性比较中等同于“不属于任何任务”。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScopeMetadata {
    owner: Option<TaskId>,
    stamped: bool,
}

impl ScopeMetadata {
    pub(crate) fn stamped(owner: Option<TaskId>) -> Self {
        Self {
            owner,
            stamped: true,
        }
    }

    /// 创建者任务标识。
    pub fn owner(&self) -> Option<&TaskId> {
        self.owner.as_ref()
    }

    pub fn is_stamped(&self) -> bool {
        self.stamped
    }
}
