//! 上下文存储与亲和性守卫的配置项。
//!
//! # 教案式说明
//! - **意图（Why）**：fork 的播种方式、重复定义策略、诊断频率与非法状态处置都属于“部署选择”，
//!   不同宿主（开发环境、生产环境、回放环境）需要不同取值，因此集中为一个可反序列化的结构；
//! - **逻辑（How）**：`StorageConfig` 实现 `serde::Deserialize`，缺省字段回退到 [`Default`]，
//!   宿主可以直接从 TOML 片段加载，也可以用 `with_*` 方法在代码里构造；
//! - **契约（What）**：未知字段会被拒绝，避免拼写错误悄悄落回默认值。

use serde::Deserialize;

use crate::error::Result;

/// `fork` 创建新栈时的初始内容。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForkSeed {
    /// 新栈为空，`current()` 返回根快照。
    #[default]
    Empty,
    /// 复制调用方当前所在栈的全部帧（包含原有亲和性标记，不做改写）。
    Inherit,
}

/// 同一 Scope 多次被其他任务观测时的诊断频率。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchReporting {
    /// 每次不匹配的读取都报告一次。
    #[default]
    EveryAccess,
    /// 每个 Scope 至多报告一次，直到它被释放。
    OncePerScope,
}

/// 非法状态（重复释放、乱序释放、销毁后释放）的处置策略。
///
/// # 契约说明（What）
/// - `Strict`：以 [`IllegalState`](crate::IllegalState) 错误返回，调试构建默认值；
/// - `Lenient`：记录 `warn` 日志后按空操作处理，发布构建默认值，保证追踪不会拖垮宿主。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetachPolicy {
    Strict,
    Lenient,
}

impl Default for DetachPolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            DetachPolicy::Strict
        } else {
            DetachPolicy::Lenient
        }
    }
}

/// 上下文存储的完整配置。
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub fork_seed: ForkSeed,
    /// 是否允许对已存在的执行上下文再次 `fork`（覆盖旧栈）。
    pub allow_redefine: bool,
    pub mismatch_reporting: MismatchReporting,
    pub detach_policy: DetachPolicy,
}

impl StorageConfig {
    /// 从 TOML 文本加载配置。
    ///
    /// ```
    /// use spark_context::config::{ForkSeed, StorageConfig};
    ///
    /// let config = StorageConfig::from_toml_str("fork_seed = \"inherit\"").unwrap();
    /// assert_eq!(config.fork_seed, ForkSeed::Inherit);
    /// assert!(!config.allow_redefine);
    /// ```
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    pub fn with_fork_seed(mut self, seed: ForkSeed) -> Self {
        self.fork_seed = seed;
        self
    }

    pub fn with_allow_redefine(mut self, allow: bool) -> Self {
        self.allow_redefine = allow;
        self
    }

    pub fn with_mismatch_reporting(mut self, reporting: MismatchReporting) -> Self {
        self.mismatch_reporting = reporting;
        self
    }

    pub fn with_detach_policy(mut self, policy: DetachPolicy) -> Self {
        self.detach_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;

    #[test]
    fn empty_document_yields_defaults() {
        let config = StorageConfig::from_toml_str("").expect("空文档应使用默认值");
        assert_eq!(config, StorageConfig::default());
        assert_eq!(config.mismatch_reporting, MismatchReporting::EveryAccess);
    }

    #[test]
    fn all_keys_are_parsed() {
        let config = StorageConfig::from_toml_str(
            r#"
            fork_seed = "inherit"
            allow_redefine = true
            mismatch_reporting = "once_per_scope"
            detach_policy = "lenient"
            "#,
        )
        .expect("完整配置应解析成功");
        assert_eq!(
            config,
            StorageConfig::default()
                .with_fork_seed(ForkSeed::Inherit)
                .with_allow_redefine(true)
                .with_mismatch_reporting(MismatchReporting::OncePerScope)
                .with_detach_policy(DetachPolicy::Lenient)
        );
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err = StorageConfig::from_toml_str("fork_sead = \"empty\"").expect_err("拼写错误必须报错");
        assert_eq!(err.code(), codes::CONFIG_INVALID);
    }
}
