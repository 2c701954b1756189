use std::fmt;

use tracing::warn;

use super::identity::TaskId;
use crate::error::codes;
use crate::storage::ScopeKey;

/// 触发亲和性检查的读取入口。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessKind {
    Current,
    Scope,
}

impl AccessKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessKind::Current => "current",
            AccessKind::Scope => "scope",
        }
    }
}

/// 一次亲和性不匹配的诊断事件。
///
/// # 契约说明（What）
/// - `scope`：被观测的栈顶 Scope；
/// - `owner`：创建该 Scope 的任务，`None` 表示创建时不在任何任务中；
/// - `observer`：执行本次读取的任务；
/// - 诊断是非致命信号：上报后读取照常返回底层存储的结果。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AffinityDiagnostic {
    pub scope: ScopeKey,
    pub owner: Option<TaskId>,
    pub observer: Option<TaskId>,
    pub access: AccessKind,
}

impl AffinityDiagnostic {
    pub const MESSAGE: &'static str = "cooperative context switching not supported";

    pub fn code(&self) -> &'static str {
        codes::AFFINITY_MISMATCH
    }
}

struct TaskLabel<'a>(Option<&'a TaskId>);

impl fmt::Display for TaskLabel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(task) => fmt::Display::fmt(task, f),
            None => f.write_str("<no task>"),
        }
    }
}

impl fmt::Display for AffinityDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: scope {} created by {} is observed via {}() from {}; \
             restoration order cannot be guaranteed",
            Self::MESSAGE,
            self.scope,
            TaskLabel(self.owner.as_ref()),
            self.access.as_str(),
            TaskLabel(self.observer.as_ref()),
        )
    }
}

/// 非致命诊断的接收端。
///
/// # 教案式说明
/// - **意图（Why）**：检测到跨任务观测时既不能阻止读取，也不能静默忽略；诊断以注入能力的形式交给宿主，
///   生产环境写入日志，测试环境替换为记录型实现后直接断言；
/// - **契约（What）**：`report` 不得 panic，也不得回调上下文存储（调用发生在存储读取路径上）。
pub trait DiagnosticSink: Send + Sync + 'static {
    fn report(&self, diagnostic: &AffinityDiagnostic);
}

/// 将诊断写成 `tracing` 告警，target 为 `spark_context::affinity`。
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingDiagnosticSink;

impl DiagnosticSink for TracingDiagnosticSink {
    fn report(&self, diagnostic: &AffinityDiagnostic) {
        warn!(
            target: "spark_context::affinity",
            code = diagnostic.code(),
            scope = %diagnostic.scope,
            owner = %TaskLabel(diagnostic.owner.as_ref()),
            observer = %TaskLabel(diagnostic.observer.as_ref()),
            access = diagnostic.access.as_str(),
            "{}",
            AffinityDiagnostic::MESSAGE
        );
    }
}
