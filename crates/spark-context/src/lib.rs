#![deny(unsafe_code)]
#![allow(clippy::result_large_err)]
#![doc = "spark-context: 面向协作式任务的上下文栈存储与协程亲和性守卫。"]
#![doc = ""]
#![doc = "== 组成 =="]
#![doc = "1. 基础存储 [`ExecutionContextStore`]：按执行上下文维护 LIFO 快照栈，对协作式任务一无所知。"]
#![doc = "2. 亲和性守卫 [`CoroutineAffinityGuard`]：在 `attach` 时记录创建者任务，在每次读取时比较当前任务，不一致即经由 [`DiagnosticSink`] 报告。"]
#![doc = "3. 交接工具 [`future::WithContext`]：需要让上下文跟随任务时，把快照绑定到 Future 的每一次 `poll`。"]
#![doc = ""]
#![doc = "== 线程模型 =="]
#![doc = "存储与守卫均为 `!Send`：一条栈只由拥有它的线程（及其上交错执行的协作式任务）访问；[`Context`] 快照本身可以跨线程传递。"]
#![doc = ""]
#![doc = "== 失败语义 =="]
#![doc = "执行上下文误用与 Scope 生命周期误用以 [`ContextError`] 返回；亲和性不匹配从不返回错误，读取结果始终来自底层存储。"]

pub mod affinity;
pub mod config;
pub mod context;
pub mod error;
pub mod execution;
pub mod future;
pub mod local;
#[cfg(feature = "otel")]
pub mod otel;
pub mod storage;
pub mod test_stubs;
pub mod trace;

pub use affinity::{
    AccessKind, AffinityDiagnostic, CoroutineAffinityGuard, DiagnosticSink, GuardedScope,
    NoTaskIdentity, TaskId, TaskIdentityProvider, TracingDiagnosticSink,
};
#[cfg(feature = "tokio")]
pub use affinity::TokioTaskIdentity;
pub use config::{DetachPolicy, ForkSeed, MismatchReporting, StorageConfig};
pub use context::Context;
pub use error::{ContextError, IllegalState, Result};
pub use execution::ExecutionContextId;
pub use future::{FutureContextExt, WithContext};
pub use storage::{
    ContextScope, ContextStorage, ExecutionContextStore, ScopeKey, ScopeMetadata, StoreScope,
};
pub use trace::{SpanId, TraceContext, TraceFlags, TraceId, TraceState, TraceStateEntry};
