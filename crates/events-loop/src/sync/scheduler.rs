//! 周期同步调度器
//!
//! 持有一个重复定时器和两个 loop 注册表（core / special）。
//! 每次 tick 或手动触发，都在对应 loop 的专属队列上请求一个同步周期，
//! loop 之间并发，同一 loop 内严格串行。
//!
//! ## 生命周期
//!
//! ```text
//! Idle ──start()──▶ Started ──suspend()──▶ Suspended
//!   ▲                  ▲                       │
//!   │                  └────────start()────────┘
//!   └──────────────reset()（任意状态）
//! ```
//!
//! - `suspend()` 只停止新的调度，运行中的周期照常跑完
//! - `reset()` 禁用所有 loop，运行中周期的结果被丢弃
//! - 公开操作都不返回错误，失败通过 `on_error`、状态记录和完成广播体现

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::EventsLoopConfig;
use crate::error::Result;
use crate::timer::{TickCallback, TimerHandle, TimerScheduler, TokioTimerScheduler};
use crate::utils::time::format_log_time;
use crate::utils::{Clock, SystemClock};
use super::events_loop::{CoreLoopDelegate, CoreLoopFactory, EventsLoop, LoopKind, SpecialLoopFactory};
use super::queue::CycleRequest;
use super::registry::{LoopRegistry, RegistryCommandSink};
use super::status::{LoopCompletion, LoopSyncStatus, SyncStatusBook};

/// 调度器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerState {
    Idle,
    Started,
    Suspended,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerState::Idle => write!(f, "idle"),
            SchedulerState::Started => write!(f, "started"),
            SchedulerState::Suspended => write!(f, "suspended"),
        }
    }
}

/// 调度器的外部依赖：定时器、时钟、tokio runtime
#[derive(Debug, Clone)]
pub struct SchedulerEnvironment {
    pub timer_scheduler: Arc<dyn TimerScheduler>,
    pub clock: Arc<dyn Clock>,
    /// 所有 worker 都 spawn 到这个 runtime，因此 enable / trigger 可以在任意线程调用
    pub runtime: Handle,
}

impl SchedulerEnvironment {
    /// 使用当前 tokio runtime、tokio 定时器和系统时钟
    ///
    /// 必须在 runtime 上下文中调用。
    pub fn current() -> Self {
        let runtime = Handle::current();
        Self {
            timer_scheduler: Arc::new(TokioTimerScheduler::new(runtime.clone())),
            clock: Arc::new(SystemClock),
            runtime,
        }
    }
}

struct Lifecycle {
    state: SchedulerState,
    timer: Option<TimerHandle>,
}

struct SchedulerInner<C: EventsLoop, S: EventsLoop> {
    config: EventsLoopConfig,
    timer_scheduler: Arc<dyn TimerScheduler>,
    clock: Arc<dyn Clock>,
    lifecycle: Mutex<Lifecycle>,
    core: LoopRegistry<C>,
    /// 切换 core loop 时串行化，保证任意时刻最多一个 core loop
    core_switch: Mutex<()>,
    specials: Arc<LoopRegistry<S>>,
    status: Arc<SyncStatusBook>,
}

impl<C: EventsLoop, S: EventsLoop> SchedulerInner<C, S> {
    fn on_tick(&self) {
        let state = self.lifecycle.lock().state;
        if state != SchedulerState::Started {
            debug!("⏰ 定时器触发，但调度器处于 {} 状态，忽略", state);
            return;
        }

        debug!(
            "⏰ 定时器触发: core={}, special={}",
            self.core.len(),
            self.specials.len()
        );
        self.core.request_all(CycleRequest::Tick);
        self.specials.request_all(CycleRequest::Tick);
    }

    fn current_core_loop_id(&self) -> Option<String> {
        self.core.enabled_ids().into_iter().next()
    }
}

/// 周期同步调度器
///
/// `C` 为 core loop 类型，`S` 为 special loop 类型。
pub struct EventsPeriodicScheduler<C: EventsLoop, S: EventsLoop> {
    inner: Arc<SchedulerInner<C, S>>,
}

impl<C: EventsLoop, S: EventsLoop> EventsPeriodicScheduler<C, S> {
    /// 使用当前 tokio runtime 创建调度器
    ///
    /// 必须在 runtime 上下文中调用。
    pub fn new(
        config: EventsLoopConfig,
        core_factory: impl CoreLoopFactory<C> + 'static,
        special_factory: impl SpecialLoopFactory<S> + 'static,
    ) -> Result<Self> {
        Self::with_environment(config, SchedulerEnvironment::current(), core_factory, special_factory)
    }

    pub fn with_environment(
        config: EventsLoopConfig,
        environment: SchedulerEnvironment,
        core_factory: impl CoreLoopFactory<C> + 'static,
        special_factory: impl SpecialLoopFactory<S> + 'static,
    ) -> Result<Self> {
        config.validate()?;

        let status = Arc::new(SyncStatusBook::new(config.completion_channel_capacity));

        let specials = Arc::new(LoopRegistry::new(
            LoopKind::Special,
            move |special_loop_id: &str| special_factory.make_special_loop(special_loop_id),
            environment.runtime.clone(),
            environment.clock.clone(),
            status.clone(),
        ));

        let sink: Arc<dyn RegistryCommandSink> = specials.clone();
        let delegate_target: Weak<dyn RegistryCommandSink> = Arc::downgrade(&sink);
        drop(sink);

        let core = LoopRegistry::new(
            LoopKind::Core,
            move |user_id: &str| {
                core_factory.make_core_loop(user_id, CoreLoopDelegate::new(delegate_target.clone()))
            },
            environment.runtime.clone(),
            environment.clock.clone(),
            status.clone(),
        );

        info!(
            "🚀 Events loop 调度器已创建: 同步间隔 {}s",
            config.sync_interval_secs
        );

        Ok(Self {
            inner: Arc::new(SchedulerInner {
                config,
                timer_scheduler: environment.timer_scheduler,
                clock: environment.clock,
                lifecycle: Mutex::new(Lifecycle {
                    state: SchedulerState::Idle,
                    timer: None,
                }),
                core,
                core_switch: Mutex::new(()),
                specials,
                status,
            }),
        })
    }

    pub fn config(&self) -> &EventsLoopConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SchedulerState {
        self.inner.lifecycle.lock().state
    }

    /// 当前定时器（仅 Started 状态下有效）
    pub fn timer(&self) -> Option<TimerHandle> {
        self.inner.lifecycle.lock().timer.clone()
    }

    /// 启动调度：启动定时器并恢复所有队列
    ///
    /// 幂等：已启动且定时器有效时只确保队列处于运行状态。
    pub fn start(&self) {
        let needs_timer = {
            let mut lifecycle = self.inner.lifecycle.lock();
            let previous = lifecycle.state;
            lifecycle.state = SchedulerState::Started;
            self.inner.core.resume_all();
            self.inner.specials.resume_all();

            let armed = lifecycle.timer.as_ref().is_some_and(TimerHandle::is_valid);
            if previous == SchedulerState::Started && armed {
                debug!("调度器已启动，忽略重复 start");
            } else {
                info!("▶️ 调度器启动（之前状态: {}）", previous);
            }
            !armed
        };

        if needs_timer {
            self.arm_timer();
        }
    }

    /// 暂停调度：停止定时器并暂停所有队列，运行中的周期照常跑完
    pub fn suspend(&self) {
        let timer = {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.state == SchedulerState::Idle {
                debug!("调度器尚未启动，忽略 suspend");
                return;
            }
            lifecycle.state = SchedulerState::Suspended;
            self.inner.core.pause_all();
            self.inner.specials.pause_all();
            lifecycle.timer.take()
        };

        if let Some(timer) = timer {
            timer.invalidate();
        }
        info!("⏸️ 调度器已暂停");
    }

    /// 重置：禁用所有 loop、停止定时器，回到 Idle
    pub fn reset(&self) {
        let timer = {
            let mut lifecycle = self.inner.lifecycle.lock();
            lifecycle.state = SchedulerState::Idle;
            self.inner.core.pause_all();
            self.inner.specials.pause_all();
            lifecycle.timer.take()
        };

        if let Some(timer) = timer {
            timer.invalidate();
        }

        {
            let _switch = self.inner.core_switch.lock();
            self.inner.core.disable_all();
        }
        self.inner.specials.disable_all();
        info!("🔄 调度器已重置，所有 loop 已禁用");
    }

    /// 关闭调度器，释放时也会自动调用
    pub fn shutdown(&self) {
        self.reset();
        info!("🛑 调度器已关闭");
    }

    /// 启用 core loop
    ///
    /// 每个活跃用户恰好一个 core loop：启用另一个用户时，先禁用之前的 core loop。
    pub fn enable_core_loop(&self, user_id: &str) {
        let _switch = self.inner.core_switch.lock();
        for previous in self.inner.core.enabled_ids() {
            if previous != user_id {
                info!("🔀 切换 core loop: {} → {}", previous, user_id);
                self.inner.core.disable(&previous);
            }
        }
        self.inner.core.enable(user_id);
    }

    pub fn disable_core_loop(&self) {
        let _switch = self.inner.core_switch.lock();
        self.inner.core.disable_all();
    }

    pub fn enable_special_loop(&self, special_loop_id: &str) {
        self.inner.specials.enable(special_loop_id);
    }

    pub fn disable_special_loop(&self, special_loop_id: &str) {
        self.inner.specials.disable(special_loop_id);
    }

    /// 手动触发 core loop 同步
    ///
    /// 在 core loop 自己的队列上执行，不会与运行中的周期并发。
    pub fn trigger_core_loop(&self) {
        match self.inner.current_core_loop_id() {
            Some(user_id) => {
                debug!("👆 手动触发 core loop: {}", user_id);
                self.inner.core.request(&user_id, CycleRequest::Manual);
            }
            None => debug!("没有已启用的 core loop，忽略手动触发"),
        }
    }

    /// 手动触发 special loop 同步
    pub fn trigger_special_loop(&self, special_loop_id: &str) {
        debug!("👆 手动触发 special loop: {}", special_loop_id);
        self.inner.specials.request(special_loop_id, CycleRequest::Manual);
    }

    /// 当前 core loop 的用户 ID
    pub fn core_loop_id(&self) -> Option<String> {
        self.inner.current_core_loop_id()
    }

    pub fn core_loop(&self) -> Option<Arc<C>> {
        let user_id = self.inner.current_core_loop_id()?;
        self.inner.core.get(&user_id)
    }

    pub fn special_loop(&self, special_loop_id: &str) -> Option<Arc<S>> {
        self.inner.specials.get(special_loop_id)
    }

    pub fn enabled_special_loop_ids(&self) -> BTreeSet<String> {
        self.inner.specials.enabled_ids()
    }

    /// 订阅同步周期完成事件
    pub fn subscribe_completions(&self) -> broadcast::Receiver<LoopCompletion> {
        self.inner.status.subscribe()
    }

    /// special loop 的汇总同步状态
    pub fn sync_status(&self, special_loop_id: &str) -> Option<LoopSyncStatus> {
        self.inner.status.status(LoopKind::Special, special_loop_id)
    }

    pub fn core_sync_status(&self) -> Option<LoopSyncStatus> {
        let user_id = self.inner.current_core_loop_id()?;
        self.inner.status.status(LoopKind::Core, &user_id)
    }

    /// 等待所有队列进入稳定状态（没有排队或运行中的周期，暂停队列中排队的周期不计）
    pub async fn wait_until_idle(&self) {
        futures::future::join(
            self.inner.core.wait_until_idle(),
            self.inner.specials.wait_until_idle(),
        )
        .await;
    }

    fn arm_timer(&self) {
        let weak = Arc::downgrade(&self.inner);
        let tick: TickCallback = Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.on_tick();
            }
        });

        let interval = self.inner.config.sync_interval();
        let fire_date = self.inner.clock.now();
        let timer = self.inner.timer_scheduler.schedule(interval, fire_date, tick);

        let mut lifecycle = self.inner.lifecycle.lock();
        let armed = lifecycle.timer.as_ref().is_some_and(TimerHandle::is_valid);
        if lifecycle.state == SchedulerState::Started && !armed {
            info!(
                "⏰ 定时器已启动: 间隔 {}s，首次触发 {}",
                interval.as_secs(),
                format_log_time(fire_date)
            );
            lifecycle.timer = Some(timer);
        } else {
            // 并发 start / suspend 之间落败的一方
            timer.invalidate();
        }
    }
}

impl<C: EventsLoop, S: EventsLoop> Drop for EventsPeriodicScheduler<C, S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
