use thiserror::Error;

use crate::execution::ExecutionContextId;
use crate::storage::ScopeKey;

/// 稳定错误码，遵循 `<域>.<语义>` 约定，供日志、告警与测试做精确匹配。
pub mod codes {
    /// `switch` 引用了从未 fork 的执行上下文。
    pub const UNKNOWN_EXECUTION: &str = "context.unknown_execution";
    /// `fork`/`destroy` 引用的执行上下文与当前状态冲突。
    pub const INVALID_EXECUTION: &str = "context.invalid_execution";
    /// 重复释放、乱序释放、销毁后继续使用等编程错误。
    pub const ILLEGAL_STATE: &str = "context.illegal_state";
    /// 配置无法解析。
    pub const CONFIG_INVALID: &str = "context.config_invalid";
    /// 协程亲和性不匹配诊断；仅用于诊断事件，从不作为 `Err` 返回。
    pub const AFFINITY_MISMATCH: &str = "context.affinity_mismatch";
    /// 与 OpenTelemetry 上下文互转失败。
    pub const OTEL_BRIDGE: &str = "context.otel_bridge";
}

pub type Result<T, E = ContextError> = core::result::Result<T, E>;

/// 上下文存储对调用方暴露的硬失败。
///
/// # 教案式说明
/// - **意图（Why）**：执行上下文标识错误或栈结构被误用时，继续运行只会让后续的恢复语义不可预测，
///   因此这些情况一律以 `Err` 向上传播，由调用方决定如何处理；
/// - **契约（What）**：协程亲和性问题不属于本类型，它们只会经由
///   [`DiagnosticSink`](crate::affinity::DiagnosticSink) 报告，绝不打断宿主业务。
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ContextError {
    #[error("执行上下文 `{0}` 尚未 fork，无法切换")]
    UnknownExecutionContext(ExecutionContextId),
    #[error("执行上下文 `{id}` 不可用: {reason}")]
    InvalidExecutionContext {
        id: ExecutionContextId,
        reason: &'static str,
    },
    #[error(transparent)]
    IllegalState(#[from] IllegalState),
    #[error("上下文存储配置不合法: {0}")]
    Config(#[from] toml::de::Error),
}

impl ContextError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            ContextError::UnknownExecutionContext(_) => codes::UNKNOWN_EXECUTION,
            ContextError::InvalidExecutionContext { .. } => codes::INVALID_EXECUTION,
            ContextError::IllegalState(_) => codes::ILLEGAL_STATE,
            ContextError::Config(_) => codes::CONFIG_INVALID,
        }
    }

    pub fn as_illegal_state(&self) -> Option<&IllegalState> {
        match self {
            ContextError::IllegalState(state) => Some(state),
            _ => None,
        }
    }
}

/// Scope 生命周期上的编程错误。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IllegalState {
    #[error("scope {scope} 已被释放，禁止重复 detach")]
    DoubleDetach { scope: ScopeKey },
    #[error("scope {scope} 不在栈顶（栈顶为 {top}），违反 LIFO 释放顺序")]
    OutOfOrder { scope: ScopeKey, top: ScopeKey },
    #[error("scope {scope} 所属的执行上下文已被销毁")]
    Destroyed { scope: ScopeKey },
    #[error("scope {scope} 已写入任务亲和性标记，禁止覆盖")]
    AlreadyStamped { scope: ScopeKey },
}

impl IllegalState {
    pub fn scope(&self) -> &ScopeKey {
        match self {
            IllegalState::DoubleDetach { scope }
            | IllegalState::OutOfOrder { scope, .. }
            | IllegalState::Destroyed { scope }
            | IllegalState::AlreadyStamped { scope } => scope,
        }
    }
}
