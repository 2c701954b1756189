//! W3C Trace Context 的最小值模型，作为 [`Context`](crate::Context) 的追踪载荷。
//!
//! # 教案式说明
//! - **意图（Why）**：上下文栈只关心“哪一个快照处于活跃状态”，但埋点代码仍需要从快照中读出
//!   `trace_id`/`span_id`，因此保留一份与 W3C 规范对齐的轻量表示；
//! - **逻辑（How）**：标识符使用定长字节数组的新类型包装，`tracestate` 以有序条目集合表示；
//! - **契约（What）**：本模块不负责 ID 生成、采样或序列化，这些由上层 SDK 决定。

use core::fmt;

use thiserror::Error;

/// 128 bit 链路标识。
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId([u8; 16]);

impl TraceId {
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub const fn to_bytes(self) -> [u8; 16] {
        self.0
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TraceId({self})")
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// 64 bit Span 标识。
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId([u8; 8]);

impl SpanId {
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub const fn to_bytes(self) -> [u8; 8] {
        self.0
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpanId({self})")
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// 链路追踪上下文，遵循 W3C Trace Context 规范。
///
/// # 契约说明（What）
/// - 实例按值比较，两个字段完全相同的追踪上下文视为同一条链路位置；
/// - 不校验 ID 是否全零，合法性由产生追踪信息的 SDK 负责；
/// - `trace_state` 存在堆分配，热路径上应限制条目数量（W3C 推荐 <= 32）。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TraceContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub trace_flags: TraceFlags,
    pub trace_state: TraceState,
}

impl TraceContext {
    /// 创建新的追踪上下文，`trace_state` 为空。
    pub fn new(trace_id: TraceId, span_id: SpanId, trace_flags: TraceFlags) -> Self {
        Self {
            trace_id,
            span_id,
            trace_flags,
            trace_state: TraceState::default(),
        }
    }

    /// 替换 `tracestate` 信息，保留其余字段。
    pub fn with_state(mut self, state: TraceState) -> Self {
        self.trace_state = state;
        self
    }
}

/// 追踪标志位集合。Bit0 (`0x01`) 表示 `sampled`，其余位保留。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TraceFlags {
    bits: u8,
}

impl TraceFlags {
    /// `sampled` 位的掩码。
    pub const SAMPLED: u8 = 0x01;

    pub const fn new(bits: u8) -> Self {
        Self { bits }
    }

    pub const fn bits(&self) -> u8 {
        self.bits
    }
}

/// `tracestate` 条目集合。
///
/// # 逻辑解析（How）
/// - 内部使用 `Vec<TraceStateEntry>` 维护插入顺序；
/// - `insert` 按键名去重，符合 W3C “最新值优先” 的定义。
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct TraceState {
    entries: Vec<TraceStateEntry>,
}

impl TraceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 基于已有条目构建 `TraceState`，任一条目非法即返回错误。
    pub fn from_entries(entries: Vec<TraceStateEntry>) -> Result<Self, TraceStateError> {
        let mut state = Self::new();
        for entry in entries {
            state.insert(entry)?;
        }
        Ok(state)
    }

    /// 插入或替换条目。
    pub fn insert(&mut self, entry: TraceStateEntry) -> Result<(), TraceStateError> {
        entry.validate()?;
        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|current| current.key == entry.key)
        {
            *existing = entry;
        } else {
            self.entries.push(entry);
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| entry.value.as_str())
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &TraceStateEntry> {
        self.entries.iter()
    }
}

/// 单个 `tracestate` 条目；键、值长度均需在 1..=256 字节之间，值不可包含 `,` 或 `=`。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TraceStateEntry {
    pub key: String,
    pub value: String,
}

impl TraceStateEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn validate(&self) -> Result<(), TraceStateError> {
        if self.key.is_empty() || self.key.len() > 256 {
            return Err(TraceStateError::InvalidKey);
        }
        if self.value.is_empty() || self.value.len() > 256 {
            return Err(TraceStateError::InvalidValue);
        }
        if self.value.contains(',') || self.value.contains('=') {
            return Err(TraceStateError::InvalidValue);
        }
        Ok(())
    }
}

/// `TraceState` 校验失败时的错误类型。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum TraceStateError {
    #[error("tracestate 键不合法")]
    InvalidKey,
    #[error("tracestate 值不合法")]
    InvalidValue,
}
