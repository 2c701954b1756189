//! 上下文存储测试桩：可手动驱动的任务身份与记录型诊断接收端。
//!
//! # 设计定位（Why）
//! - 亲和性守卫依赖 [`TaskIdentityProvider`] 与 [`DiagnosticSink`] 两项注入能力；真实实现分别绑定到异步运行时与日志系统，
//!   难以在同步单元测试中精确控制“此刻是哪个任务在运行”，也无法直接断言诊断内容；
//! - 本模块提供两者的测试替身，集成测试与宿主自己的测试都可以复用，不必各自重复定义。
//!
//! # 使用方式（How）
//! - [`ManualTaskIdentity::enter`] 模拟“某任务开始运行”，返回的守卫在 Drop 时恢复之前的任务，嵌套调用即可模拟挂起与恢复；
//! - [`RecordingDiagnosticSink`] 按到达顺序保存全部诊断，`take` 取走并清空。
//!
//! # 契约说明（What）
//! - 两个类型克隆后共享内部状态：一份交给守卫，一份留在测试中观察；
//! - 桩对象不做任何 IO，也不依赖运行时。

use std::sync::Arc;

use parking_lot::Mutex;

use crate::affinity::{AffinityDiagnostic, DiagnosticSink, TaskId, TaskIdentityProvider};

/// 由测试代码手动指定“当前任务”的身份来源。
#[derive(Clone, Debug, Default)]
pub struct ManualTaskIdentity {
    current: Arc<Mutex<Option<TaskId>>>,
}

impl ManualTaskIdentity {
    /// 令 `task` 成为当前任务，直到返回的守卫被 Drop。
    #[must_use = "守卫被丢弃时会立即恢复之前的任务"]
    pub fn enter(&self, task: TaskId) -> EnteredTask {
        let previous = self.current.lock().replace(task);
        EnteredTask {
            current: Arc::clone(&self.current),
            previous,
        }
    }

    pub fn set(&self, task: Option<TaskId>) {
        *self.current.lock() = task;
    }

    pub fn clear(&self) {
        self.set(None);
    }
}

impl TaskIdentityProvider for ManualTaskIdentity {
    fn current_task(&self) -> Option<TaskId> {
        *self.current.lock()
    }
}

/// [`ManualTaskIdentity::enter`] 返回的守卫。
#[derive(Debug)]
pub struct EnteredTask {
    current: Arc<Mutex<Option<TaskId>>>,
    previous: Option<TaskId>,
}

impl Drop for EnteredTask {
    fn drop(&mut self) {
        *self.current.lock() = self.previous;
    }
}

/// 记录全部诊断事件的接收端。
#[derive(Clone, Debug, Default)]
pub struct RecordingDiagnosticSink {
    records: Arc<Mutex<Vec<AffinityDiagnostic>>>,
}

impl RecordingDiagnosticSink {
    /// 取走已记录的诊断并清空缓冲。
    pub fn take(&self) -> Vec<AffinityDiagnostic> {
        std::mem::take(&mut *self.records.lock())
    }

    pub fn snapshot(&self) -> Vec<AffinityDiagnostic> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl DiagnosticSink for RecordingDiagnosticSink {
    fn report(&self, diagnostic: &AffinityDiagnostic) {
        self.records.lock().push(diagnostic.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_enter_restores_outer_task() {
        let tasks = ManualTaskIdentity::default();
        assert_eq!(tasks.current_task(), None);
        {
            let _outer = tasks.enter(TaskId::from_raw(1));
            {
                let _inner = tasks.enter(TaskId::from_raw(2));
                assert_eq!(tasks.current_task(), Some(TaskId::from_raw(2)));
            }
            assert_eq!(tasks.current_task(), Some(TaskId::from_raw(1)));
        }
        assert_eq!(tasks.current_task(), None);
    }
}
