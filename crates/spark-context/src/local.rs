//! 线程级的环境存储：让埋点代码通过自由函数访问上下文，而无需层层传递存储句柄。
//!
//! 每条线程在首次访问时惰性创建一个 [`LocalStorage`]，即包裹基础存储的亲和性守卫，
//! 默认使用 [`default_task_identity`] 与 [`TracingDiagnosticSink`]。需要其他配置时，
//! 在该线程首次访问之前调用 [`init`]。

use std::cell::OnceCell;
use std::sync::Arc;

use tracing::debug;

use crate::affinity::{
    CoroutineAffinityGuard, GuardedScope, TracingDiagnosticSink, default_task_identity,
};
use crate::config::StorageConfig;
use crate::context::Context;
use crate::storage::{ContextStorage, ExecutionContextStore, StoreScope};

/// 线程本地存储的具体类型。
pub type LocalStorage = CoroutineAffinityGuard<ExecutionContextStore>;

thread_local! {
    static STORAGE: OnceCell<LocalStorage> = const { OnceCell::new() };
}

fn build(config: StorageConfig) -> LocalStorage {
    CoroutineAffinityGuard::new(
        ExecutionContextStore::with_config(config.clone()),
        default_task_identity(),
        Arc::new(TracingDiagnosticSink),
    )
    .with_config(&config)
}

/// 以 `config` 初始化当前线程的存储。
///
/// 返回 `false` 表示当前线程的存储已经存在（显式初始化过或已被访问过），此次配置被忽略。
pub fn init(config: StorageConfig) -> bool {
    STORAGE.with(|cell| {
        let installed = cell.set(build(config)).is_ok();
        if !installed {
            debug!("thread-local context storage already initialised; config ignored");
        }
        installed
    })
}

/// 当前线程存储的句柄；句柄与线程内其他句柄共享状态。
pub fn storage() -> LocalStorage {
    STORAGE.with(|cell| cell.get_or_init(|| build(StorageConfig::default())).clone())
}

/// 当前线程激活栈的栈顶快照。
pub fn current() -> Context {
    storage().current()
}

pub fn attach(context: Context) -> GuardedScope<StoreScope> {
    storage().attach(context)
}

pub fn scope() -> Option<GuardedScope<StoreScope>> {
    storage().scope()
}
