use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use super::{ContextScope, ContextStorage, ScopeKey, ScopeMetadata, apply_detach_policy};
use crate::affinity::TaskId;
use crate::config::{DetachPolicy, ForkSeed, StorageConfig};
use crate::context::Context;
use crate::error::{ContextError, IllegalState, Result};
use crate::execution::ExecutionContextId;

/// 基础上下文存储：每个执行上下文一条栈，对协作式任务一无所知。
///
/// # 设计初衷（Why）
/// - 它的行为与普通线程局部存储一致：同一线程上交错执行的多个任务共享同一条栈，任何在 Scope
///   尚未释放时挂起的任务，都会把自己压入的快照暴露给下一个在该线程上运行的任务；
/// - 这正是 [`CoroutineAffinityGuard`](crate::affinity::CoroutineAffinityGuard) 需要检测的风险，
///   基础存储本身只负责把栈结构维护正确。
///
/// # 关键逻辑（How）
/// - 状态保存在 `Rc<RefCell<_>>` 中，句柄克隆后共享同一份状态；Scope 也持有该引用，以便独立释放；
/// - 每次 `fork` 分配新的栈代际，Scope 通过 [`ScopeKey`] 中的代际识别“栈已被销毁”；
/// - 创建时自动建立并激活 [`ExecutionContextId::MAIN`]。
///
/// # 契约说明（What）
/// - `destroy` 对未知标识幂等；销毁当前激活的栈会回退到 `MAIN`；`MAIN` 本身不可销毁；
/// - 非法释放按 [`DetachPolicy`] 处置：`Strict` 返回错误，`Lenient` 记录告警后忽略。
///
/// # 线程安全
/// - 类型刻意为 `!Send + !Sync`：栈只应由拥有它的那条线程（及其上的协作式任务）访问。
#[derive(Clone)]
pub struct ExecutionContextStore {
    state: Rc<RefCell<StoreState>>,
}

struct StoreState {
    config: StorageConfig,
    stacks: HashMap<ExecutionContextId, ContextStack>,
    active: ExecutionContextId,
    next_generation: u64,
    next_serial: u64,
}

struct ContextStack {
    generation: u64,
    frames: Vec<Frame>,
}

#[derive(Clone)]
struct Frame {
    serial: u64,
    context: Context,
    previous: Context,
    metadata: ScopeMetadata,
}

impl ExecutionContextStore {
    pub fn new() -> Self {
        Self::with_config(StorageConfig::default())
    }

    pub fn with_config(config: StorageConfig) -> Self {
        let mut stacks = HashMap::new();
        stacks.insert(
            ExecutionContextId::MAIN,
            ContextStack {
                generation: 0,
                frames: Vec::new(),
            },
        );
        Self {
            state: Rc::new(RefCell::new(StoreState {
                config,
                stacks,
                active: ExecutionContextId::MAIN,
                next_generation: 1,
                next_serial: 0,
            })),
        }
    }

    pub fn config(&self) -> StorageConfig {
        self.state.borrow().config.clone()
    }

    /// 激活栈的深度。
    pub fn depth(&self) -> usize {
        let state = self.state.borrow();
        state.active_stack().map_or(0, |stack| stack.frames.len())
    }

    pub fn contains(&self, id: &ExecutionContextId) -> bool {
        self.state.borrow().stacks.contains_key(id)
    }
}

impl Default for ExecutionContextStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExecutionContextStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("ExecutionContextStore")
            .field("active", &state.active)
            .field("stacks", &state.stacks.len())
            .field("config", &state.config)
            .finish()
    }
}

impl StoreState {
    fn active_stack(&self) -> Option<&ContextStack> {
        self.stacks.get(&self.active)
    }

    fn top_frame(&self) -> Option<(u64, &Frame)> {
        let stack = self.active_stack()?;
        stack.frames.last().map(|frame| (stack.generation, frame))
    }

    fn locate(&mut self, key: &ScopeKey) -> core::result::Result<&mut ContextStack, IllegalState> {
        match self.stacks.get_mut(key.execution()) {
            Some(stack) if stack.generation == key.generation() => Ok(stack),
            _ => Err(IllegalState::Destroyed { scope: key.clone() }),
        }
    }

    fn pop(&mut self, key: &ScopeKey) -> core::result::Result<(), IllegalState> {
        let stack = self.locate(key)?;
        let generation = stack.generation;
        let Some(position) = stack
            .frames
            .iter()
            .rposition(|frame| frame.serial == key.serial())
        else {
            return Err(IllegalState::DoubleDetach { scope: key.clone() });
        };
        if position + 1 != stack.frames.len() {
            let top = stack
                .frames
                .last()
                .map(|frame| ScopeKey::new(key.execution().clone(), generation, frame.serial))
                .unwrap_or_else(|| key.clone());
            return Err(IllegalState::OutOfOrder {
                scope: key.clone(),
                top,
            });
        }
        stack.frames.pop();
        Ok(())
    }

    fn stamp(
        &mut self,
        key: &ScopeKey,
        owner: Option<TaskId>,
    ) -> core::result::Result<ScopeMetadata, IllegalState> {
        let stack = self.locate(key)?;
        let frame = stack
            .frames
            .iter_mut()
            .rfind(|frame| frame.serial == key.serial())
            .ok_or_else(|| IllegalState::DoubleDetach { scope: key.clone() })?;
        if frame.metadata.is_stamped() {
            return Err(IllegalState::AlreadyStamped { scope: key.clone() });
        }
        frame.metadata = ScopeMetadata::stamped(owner);
        Ok(frame.metadata.clone())
    }
}

impl ContextStorage for ExecutionContextStore {
    type Scope = StoreScope;

    fn fork(&self, id: impl Into<ExecutionContextId>) -> Result<()> {
        let id = id.into();
        let mut state = self.state.borrow_mut();
        if state.stacks.contains_key(&id) && !state.config.allow_redefine {
            return Err(ContextError::InvalidExecutionContext {
                id,
                reason: "执行上下文已存在且不允许重复定义",
            });
        }
        let generation = state.next_generation;
        state.next_generation += 1;
        let frames = match state.config.fork_seed {
            ForkSeed::Empty => Vec::new(),
            ForkSeed::Inherit => state
                .active_stack()
                .map(|stack| stack.frames.clone())
                .unwrap_or_default(),
        };
        debug!(
            execution = %id,
            generation,
            inherited = frames.len(),
            "forked execution context"
        );
        state.stacks.insert(id, ContextStack { generation, frames });
        Ok(())
    }

    fn switch(&self, id: impl Into<ExecutionContextId>) -> Result<()> {
        let id = id.into();
        let mut state = self.state.borrow_mut();
        if !state.stacks.contains_key(&id) {
            return Err(ContextError::UnknownExecutionContext(id));
        }
        debug!(from = %state.active, to = %id, "switched execution context");
        state.active = id;
        Ok(())
    }

    fn destroy(&self, id: impl Into<ExecutionContextId>) -> Result<()> {
        let id = id.into();
        if id.is_main() {
            return Err(ContextError::InvalidExecutionContext {
                id,
                reason: "主执行上下文不可销毁",
            });
        }
        let mut state = self.state.borrow_mut();
        match state.stacks.remove(&id) {
            Some(stack) => {
                debug!(
                    execution = %id,
                    generation = stack.generation,
                    abandoned = stack.frames.len(),
                    "destroyed execution context"
                );
                if state.active == id {
                    state.active = ExecutionContextId::MAIN;
                }
            }
            None => debug!(execution = %id, "destroy ignored for unknown execution context"),
        }
        Ok(())
    }

    fn active(&self) -> ExecutionContextId {
        self.state.borrow().active.clone()
    }

    fn scope(&self) -> Option<StoreScope> {
        let state = self.state.borrow();
        let (generation, frame) = state.top_frame()?;
        Some(StoreScope {
            state: Rc::clone(&self.state),
            key: ScopeKey::new(state.active.clone(), generation, frame.serial),
            context: frame.context.clone(),
            previous: frame.previous.clone(),
            metadata: frame.metadata.clone(),
        })
    }

    fn current(&self) -> Context {
        self.state
            .borrow()
            .top_frame()
            .map_or_else(Context::root, |(_, frame)| frame.context.clone())
    }

    fn attach(&self, context: Context) -> StoreScope {
        let mut state = self.state.borrow_mut();
        let serial = state.next_serial;
        state.next_serial += 1;
        let previous = state
            .top_frame()
            .map_or_else(Context::root, |(_, frame)| frame.context.clone());
        let active = state.active.clone();
        let stack = state
            .stacks
            .entry(active.clone())
            .or_insert_with(|| ContextStack {
                generation: 0,
                frames: Vec::new(),
            });
        let key = ScopeKey::new(active, stack.generation, serial);
        stack.frames.push(Frame {
            serial,
            context: context.clone(),
            previous: previous.clone(),
            metadata: ScopeMetadata::default(),
        });
        StoreScope {
            state: Rc::clone(&self.state),
            key,
            context,
            previous,
            metadata: ScopeMetadata::default(),
        }
    }
}

/// [`ExecutionContextStore`] 返回的 Scope。
///
/// 同一帧可以存在多个句柄（`attach` 的返回值与后续 `scope()` 的返回值），
/// 任意一个句柄完成释放后，其余句柄再释放即为重复释放。
pub struct StoreScope {
    state: Rc<RefCell<StoreState>>,
    key: ScopeKey,
    context: Context,
    previous: Context,
    metadata: ScopeMetadata,
}

impl ContextScope for StoreScope {
    fn key(&self) -> &ScopeKey {
        &self.key
    }

    fn context(&self) -> &Context {
        &self.context
    }

    fn previous(&self) -> &Context {
        &self.previous
    }

    fn metadata(&self) -> &ScopeMetadata {
        &self.metadata
    }

    fn stamp_owner(&mut self, owner: Option<TaskId>) -> Result<()> {
        if self.metadata.is_stamped() {
            return Err(IllegalState::AlreadyStamped {
                scope: self.key.clone(),
            }
            .into());
        }
        let metadata = self.state.borrow_mut().stamp(&self.key, owner)?;
        self.metadata = metadata;
        Ok(())
    }

    fn detach_strict(&mut self) -> Result<()> {
        self.state.borrow_mut().pop(&self.key)?;
        Ok(())
    }

    fn detach(&mut self) -> Result<()> {
        let policy = self.state.borrow().config.detach_policy;
        let outcome = self.detach_strict();
        apply_detach_policy(policy, &self.key, outcome)
    }
}

impl fmt::Debug for StoreScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreScope")
            .field("key", &self.key)
            .field("context", &self.context)
            .field("metadata", &self.metadata)
            .finish()
    }
}
