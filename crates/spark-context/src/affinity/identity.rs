use std::fmt;
use std::sync::Arc;

/// 协作式任务的不透明标识，仅用于相等比较。
///
/// # 契约说明（What）
/// - 标识由 [`TaskIdentityProvider`] 从运行时读取，守卫从不借助它获取任务的所有权或控制权；
/// - 不同来源的标识（原始整数、Tokio 任务 ID）之间永不相等。
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(Repr);

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum Repr {
    Raw(u64),
    #[cfg(feature = "tokio")]
    Tokio(tokio::task::Id),
}

impl TaskId {
    /// 以宿主自定义的整数构造标识，适用于自研调度器或测试替身。
    pub const fn from_raw(raw: u64) -> Self {
        TaskId(Repr::Raw(raw))
    }
}

#[cfg(feature = "tokio")]
impl From<tokio::task::Id> for TaskId {
    fn from(id: tokio::task::Id) -> Self {
        TaskId(Repr::Tokio(id))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Repr::Raw(raw) => write!(f, "task-{raw}"),
            #[cfg(feature = "tokio")]
            Repr::Tokio(id) => write!(f, "tokio-{id}"),
        }
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({self})")
    }
}

/// 查询“当前正在执行的协作式任务”的能力。
///
/// # 教案式说明
/// - **意图（Why）**：亲和性守卫需要在 `attach` 与每次读取时比较任务身份，但不应绑定到某个特定运行时；
/// - **逻辑（How）**：宿主注入实现，守卫只调用 `current_task`；
/// - **契约（What）**：
///   - 在任务外（例如普通同步调用或 `block_on` 的根 Future）必须返回 `None`；
///   - 同一任务在整个生命周期内必须返回相等的标识，不同任务的标识必须不同；
///   - `is_supported` 用于调试构建下的前置断言，表示该能力在当前构建中可用。
pub trait TaskIdentityProvider: Send + Sync + 'static {
    fn current_task(&self) -> Option<TaskId>;

    fn is_supported(&self) -> bool {
        true
    }
}

/// 不接入任何协作式运行时：所有调用都视为“不在任务中”，守卫因此永不报告不匹配。
#[derive(Clone, Copy, Debug, Default)]
pub struct NoTaskIdentity;

impl TaskIdentityProvider for NoTaskIdentity {
    fn current_task(&self) -> Option<TaskId> {
        None
    }
}

/// 基于 `tokio::task::try_id()` 的任务身份来源。
///
/// `spawn`/`spawn_local` 产生的任务拥有各自的 ID；`Runtime::block_on`、`LocalSet::block_on`
/// 驱动的根 Future 不属于任何任务，返回 `None`。
#[cfg(feature = "tokio")]
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioTaskIdentity;

#[cfg(feature = "tokio")]
impl TaskIdentityProvider for TokioTaskIdentity {
    fn current_task(&self) -> Option<TaskId> {
        tokio::task::try_id().map(TaskId::from)
    }
}

/// 当前构建下的默认任务身份来源：启用 `tokio` 特性时读取 Tokio 任务 ID，否则为 [`NoTaskIdentity`]。
pub fn default_task_identity() -> Arc<dyn TaskIdentityProvider> {
    #[cfg(feature = "tokio")]
    {
        Arc::new(TokioTaskIdentity)
    }
    #[cfg(not(feature = "tokio"))]
    {
        Arc::new(NoTaskIdentity)
    }
}
