//! 调度器生命周期 Hook
//!
//! 后台时暂停调度（定时器停止、队列暂停），前台时重新启动。

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::error::Result;
use crate::lifecycle::LifecycleHook;
use crate::sync::{EventsLoop, EventsPeriodicScheduler, SchedulerState};

pub struct SchedulerLifecycleHook<C: EventsLoop, S: EventsLoop> {
    scheduler: Arc<EventsPeriodicScheduler<C, S>>,
}

impl<C: EventsLoop, S: EventsLoop> SchedulerLifecycleHook<C, S> {
    pub fn new(scheduler: Arc<EventsPeriodicScheduler<C, S>>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl<C: EventsLoop, S: EventsLoop> LifecycleHook for SchedulerLifecycleHook<C, S> {
    async fn on_background(&self) -> Result<()> {
        info!("[Scheduler Hook] App 切换到后台，暂停同步");
        self.scheduler.suspend();
        Ok(())
    }

    /// 只恢复被后台暂停的调度器，尚未启动（Idle）的保持不动
    async fn on_foreground(&self) -> Result<()> {
        if self.scheduler.state() == SchedulerState::Suspended {
            info!("[Scheduler Hook] App 切换到前台，恢复同步");
            self.scheduler.start();
        }
        Ok(())
    }
}
