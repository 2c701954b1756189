use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::trace::TraceContext;

/// `Context` 是一次执行路径上处于活跃状态的不可变传播快照（Trace/Span/Baggage）。
///
/// # 设计初衷（Why）
/// - 上下文栈的全部语义都建立在“快照不可变”之上：`attach` 压入的值在出栈前不会被任何人改写，
///   因而恢复（restore）只需记录前一个快照即可；
/// - 埋点代码会在多个协作式任务之间传递快照，克隆必须足够廉价。
///
/// # 关键逻辑（How）
/// - 内部以 `Arc` 共享载荷，克隆只增加引用计数；
/// - 所有“修改”方法（`with_trace`、`with_baggage`）均返回新的快照，原快照保持不变；
/// - 相等性先比较指针身份，再退化为结构比较，两个独立构造但内容一致的快照视为相等。
///
/// # 契约说明（What）
/// - [`Context::root`] 返回进程级唯一的根快照，空栈上的 `current()` 始终返回它；
/// - `Context` 满足 `Send + Sync`，可在线程与任务之间自由传递；真正受亲和性约束的是
///   持有它的 [`ContextScope`](crate::storage::ContextScope)，而非快照本身。
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ContextInner {
    trace: Option<TraceContext>,
    baggage: BTreeMap<String, String>,
}

impl Context {
    /// 根快照：不携带追踪信息与 Baggage。
    pub fn root() -> Context {
        static ROOT: OnceLock<Context> = OnceLock::new();
        ROOT.get_or_init(|| Context {
            inner: Arc::new(ContextInner::default()),
        })
        .clone()
    }

    /// 判断是否为根快照（按结构判断，而非指针）。
    pub fn is_root(&self) -> bool {
        self.inner.trace.is_none() && self.inner.baggage.is_empty()
    }

    /// 基于当前快照派生携带指定追踪上下文的新快照。
    pub fn with_trace(&self, trace: TraceContext) -> Context {
        Context {
            inner: Arc::new(ContextInner {
                trace: Some(trace),
                baggage: self.inner.baggage.clone(),
            }),
        }
    }

    /// 基于当前快照派生追加（或覆盖）一条 Baggage 的新快照。
    pub fn with_baggage(&self, key: impl Into<String>, value: impl Into<String>) -> Context {
        let mut baggage = self.inner.baggage.clone();
        baggage.insert(key.into(), value.into());
        Context {
            inner: Arc::new(ContextInner {
                trace: self.inner.trace.clone(),
                baggage,
            }),
        }
    }

    pub fn trace(&self) -> Option<&TraceContext> {
        self.inner.trace.as_ref()
    }

    pub fn baggage(&self, key: &str) -> Option<&str> {
        self.inner.baggage.get(key).map(String::as_str)
    }

    /// 按键的字典序遍历全部 Baggage。
    pub fn baggage_iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner
            .baggage
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// 两个句柄是否指向同一份快照（身份比较）。
    pub fn ptr_eq(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::root()
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.inner == other.inner
    }
}

impl Eq for Context {}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("trace", &self.inner.trace)
            .field("baggage", &self.inner.baggage)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{SpanId, TraceFlags, TraceId};

    fn sample_trace() -> TraceContext {
        TraceContext::new(
            TraceId::from_bytes([3; 16]),
            SpanId::from_bytes([4; 8]),
            TraceFlags::new(TraceFlags::SAMPLED),
        )
    }

    #[test]
    fn root_is_shared_and_empty() {
        let a = Context::root();
        let b = Context::default();
        assert!(a.ptr_eq(&b), "根快照应为进程级单例");
        assert!(a.is_root());
        assert!(a.trace().is_none());
    }

    #[test]
    fn derivation_leaves_source_untouched() {
        let root = Context::root();
        let derived = root.with_baggage("tenant", "acme").with_trace(sample_trace());
        assert!(root.is_root(), "派生不得修改原快照");
        assert_eq!(derived.baggage("tenant"), Some("acme"));
        assert_eq!(derived.trace(), Some(&sample_trace()));
    }

    #[test]
    fn equality_is_structural() {
        let a = Context::root().with_baggage("k", "v");
        let b = Context::root().with_baggage("k", "v");
        assert!(!a.ptr_eq(&b));
        assert_eq!(a, b);
        assert_ne!(a, Context::root());
    }
}
