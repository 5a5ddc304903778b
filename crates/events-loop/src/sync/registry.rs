//! 已启用 loop 的注册表
//!
//! 每个 loop 占一个槽位：loop 实例 + 专属串行队列 + 启用代数。
//! 所有增删都经过同一把锁，锁内不调用任何 loop 代码（工厂、poll、process、on_error），
//! 因此可以从任意线程、包括另一个 loop 的 on_error 回调中安全地投递命令。

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::utils::Clock;
use super::events_loop::{EventsLoop, LoopKind};
use super::operation::{EpochToken, LoopOperation};
use super::queue::{CycleRequest, LoopQueue};
use super::status::SyncStatusBook;

/// 注册表命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryCommand {
    Enable(String),
    Disable(String),
    DisableAll,
}

/// 接收注册表命令的入口（类型擦除，供 [`CoreLoopDelegate`](super::CoreLoopDelegate) 使用）
pub trait RegistryCommandSink: Send + Sync {
    fn send(&self, command: RegistryCommand);
}

type LoopConstructor<L> = Box<dyn Fn(&str) -> Arc<L> + Send + Sync>;

struct LoopSlot<L> {
    events_loop: Arc<L>,
    queue: LoopQueue,
    generation: u64,
}

struct Slots<L> {
    map: HashMap<String, LoopSlot<L>>,
    /// 新建队列的初始暂停状态，与调度器状态保持一致
    paused: bool,
}

/// 同一类 loop 的注册表
pub struct LoopRegistry<L: EventsLoop> {
    kind: LoopKind,
    constructor: LoopConstructor<L>,
    slots: Mutex<Slots<L>>,
    next_generation: AtomicU64,
    runtime: Handle,
    clock: Arc<dyn Clock>,
    status: Arc<SyncStatusBook>,
}

impl<L: EventsLoop> LoopRegistry<L> {
    pub fn new(
        kind: LoopKind,
        constructor: impl Fn(&str) -> Arc<L> + Send + Sync + 'static,
        runtime: Handle,
        clock: Arc<dyn Clock>,
        status: Arc<SyncStatusBook>,
    ) -> Self {
        Self {
            kind,
            constructor: Box::new(constructor),
            slots: Mutex::new(Slots {
                map: HashMap::new(),
                paused: true,
            }),
            next_generation: AtomicU64::new(1),
            runtime,
            clock,
            status,
        }
    }

    pub fn kind(&self) -> LoopKind {
        self.kind
    }

    /// 执行一条命令
    pub fn apply(&self, command: RegistryCommand) {
        match command {
            RegistryCommand::Enable(loop_id) => {
                self.enable(&loop_id);
            }
            RegistryCommand::Disable(loop_id) => {
                self.disable(&loop_id);
            }
            RegistryCommand::DisableAll => self.disable_all(),
        }
    }

    /// 启用 loop，已启用时为空操作；返回是否新建
    pub fn enable(&self, loop_id: &str) -> bool {
        if self.slots.lock().map.contains_key(loop_id) {
            debug!("{} loop {} 已启用，忽略", self.kind, loop_id);
            return false;
        }

        // 工厂属于调用方代码，在锁外执行
        let events_loop = (self.constructor)(loop_id);

        let mut slots = self.slots.lock();
        if slots.map.contains_key(loop_id) {
            debug!("{} loop {} 已被并发启用，丢弃重复实例", self.kind, loop_id);
            return false;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let queue = LoopQueue::new(format!("{}:{}", self.kind, loop_id), slots.paused);
        // 代数登记与槽位插入在同一临界区内，和 disable 的 forget 互斥
        self.status.activate(self.kind, loop_id, generation);
        self.spawn_worker(&queue, events_loop.clone(), generation);

        slots.map.insert(
            loop_id.to_string(),
            LoopSlot {
                events_loop,
                queue,
                generation,
            },
        );
        info!("✅ {} loop 已启用: {} (generation={})", self.kind, loop_id, generation);
        true
    }

    /// 禁用 loop；运行中的周期允许结束，但结果会被丢弃
    pub fn disable(&self, loop_id: &str) -> bool {
        let removed = {
            let mut slots = self.slots.lock();
            let removed = slots.map.remove(loop_id);
            if removed.is_some() {
                self.status.forget(self.kind, loop_id);
            }
            removed
        };
        match removed {
            Some(slot) => {
                slot.queue.shutdown();
                info!("🛑 {} loop 已禁用: {} (generation={})", self.kind, loop_id, slot.generation);
                true
            }
            None => {
                debug!("{} loop {} 未启用，忽略禁用", self.kind, loop_id);
                false
            }
        }
    }

    pub fn disable_all(&self) {
        let drained: Vec<(String, LoopSlot<L>)> = {
            let mut slots = self.slots.lock();
            let drained: Vec<_> = slots.map.drain().collect();
            for (loop_id, _) in &drained {
                self.status.forget(self.kind, loop_id);
            }
            drained
        };
        for (loop_id, slot) in drained {
            slot.queue.shutdown();
            info!("🛑 {} loop 已禁用: {}", self.kind, loop_id);
        }
    }

    pub fn enabled_ids(&self) -> BTreeSet<String> {
        self.slots.lock().map.keys().cloned().collect()
    }

    pub fn get(&self, loop_id: &str) -> Option<Arc<L>> {
        self.slots.lock().map.get(loop_id).map(|slot| slot.events_loop.clone())
    }

    pub fn generation(&self, loop_id: &str) -> Option<u64> {
        self.slots.lock().map.get(loop_id).map(|slot| slot.generation)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 为指定 loop 请求一个同步周期
    pub fn request(&self, loop_id: &str, request: CycleRequest) -> bool {
        match self.slots.lock().map.get(loop_id) {
            Some(slot) => slot.queue.request(request),
            None => {
                debug!("{} loop {} 未启用，忽略 {:?} 请求", self.kind, loop_id, request);
                false
            }
        }
    }

    /// 为所有已启用 loop 各请求一个同步周期
    pub fn request_all(&self, request: CycleRequest) {
        for slot in self.slots.lock().map.values() {
            slot.queue.request(request);
        }
    }

    pub fn pause_all(&self) {
        let mut slots = self.slots.lock();
        slots.paused = true;
        for slot in slots.map.values() {
            slot.queue.pause();
        }
    }

    pub fn resume_all(&self) {
        let mut slots = self.slots.lock();
        slots.paused = false;
        for slot in slots.map.values() {
            slot.queue.resume();
        }
    }

    /// 等待所有队列进入稳定状态
    pub async fn wait_until_idle(&self) {
        let queues: Vec<LoopQueue> = self
            .slots
            .lock()
            .map
            .values()
            .map(|slot| slot.queue.clone())
            .collect();
        futures::future::join_all(queues.iter().map(|queue| queue.settled())).await;
    }

    fn spawn_worker(&self, queue: &LoopQueue, events_loop: Arc<L>, generation: u64) {
        let kind = self.kind;
        let clock = self.clock.clone();
        let status = self.status.clone();
        let epoch = EpochToken::new(generation, queue.cancellation_token());

        queue.spawn_worker(&self.runtime, move || {
            let operation = LoopOperation::new(events_loop.clone(), kind, epoch.clone(), clock.clone());
            let status = status.clone();
            async move {
                // 代数校验在 status book 的锁内完成，禁用后到达的报告会被丢弃
                if let Some(completion) = operation.run().await {
                    status.record(completion);
                }
            }
        });
    }
}

impl<L: EventsLoop> RegistryCommandSink for LoopRegistry<L> {
    fn send(&self, command: RegistryCommand) {
        self.apply(command);
    }
}

impl<L: EventsLoop> Drop for LoopRegistry<L> {
    fn drop(&mut self) {
        for slot in self.slots.get_mut().map.values() {
            slot.queue.shutdown();
        }
    }
}
