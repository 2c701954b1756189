use std::borrow::Cow;
use std::fmt;

/// `ExecutionContextId` 命名一个拥有独立上下文栈的隔离域。
///
/// # 教案式说明
/// - **意图（Why）**：进程 fork、工作线程池重建等场景下，子执行体不能继续改写父执行体的上下文栈，
///   需要一个比协作式任务更粗粒度的标识来切换整栈；
/// - **逻辑（How）**：标识可以是整数（如子进程序号）或字符串（如 `"worker-2"`），两者互不相等；
/// - **契约（What）**：标识仅用于相等比较与哈希，不携带任何资源所有权；[`ExecutionContextId::MAIN`]
///   是存储初始化时自动创建并激活的栈。
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExecutionContextId {
    Int(i64),
    Name(Cow<'static, str>),
}

impl ExecutionContextId {
    /// 存储创建时默认激活的执行上下文。
    pub const MAIN: ExecutionContextId = ExecutionContextId::Name(Cow::Borrowed("main"));

    pub fn is_main(&self) -> bool {
        *self == Self::MAIN
    }
}

impl From<i64> for ExecutionContextId {
    fn from(value: i64) -> Self {
        ExecutionContextId::Int(value)
    }
}

impl From<u32> for ExecutionContextId {
    fn from(value: u32) -> Self {
        ExecutionContextId::Int(i64::from(value))
    }
}

impl From<&'static str> for ExecutionContextId {
    fn from(value: &'static str) -> Self {
        ExecutionContextId::Name(Cow::Borrowed(value))
    }
}

impl From<String> for ExecutionContextId {
    fn from(value: String) -> Self {
        ExecutionContextId::Name(Cow::Owned(value))
    }
}

impl fmt::Display for ExecutionContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionContextId::Int(value) => write!(f, "{value}"),
            ExecutionContextId::Name(name) => f.write_str(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn borrowed_and_owned_names_are_equal() {
        let borrowed = ExecutionContextId::from("worker-2");
        let owned = ExecutionContextId::from(String::from("worker-2"));
        assert_eq!(borrowed, owned);
        assert!(ExecutionContextId::from("main").is_main());
    }

    #[test]
    fn integer_and_name_never_collide() {
        assert_ne!(ExecutionContextId::from(2_i64), ExecutionContextId::from("2"));
        assert_eq!(ExecutionContextId::from(2_i64).to_string(), "2");
    }
}
