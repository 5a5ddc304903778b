//! Events Loop - 基于 cursor 的增量事件同步调度
//!
//! 一个 core 数据流（当前用户的事件流）加任意数量的 special 数据流（日历、联系人 …），
//! 按固定间隔或手动触发，从上次的 latest event ID 开始拉取增量、翻页直到追上服务端：
//! - ⏰ 周期调度：一个定时器驱动所有已启用的 loop
//! - 🧵 串行队列：每个 loop 独占一个队列，loop 之间互不阻塞
//! - 🛡️ 失败隔离：一个 loop 的失败只交给它自己的 `on_error`
//! - 🔄 生命周期：start / suspend / reset，取消的周期不会复活
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use events_loop::{EventsLoopConfig, EventsPeriodicScheduler};
//! # use events_loop::{CoreLoopDelegate, EventsLoop};
//! # use std::sync::Arc;
//! # fn make_core<C: EventsLoop>(_: &str, _: CoreLoopDelegate) -> Arc<C> { unimplemented!() }
//! # fn make_special<S: EventsLoop>(_: &str) -> Arc<S> { unimplemented!() }
//! # async fn run<C: EventsLoop, S: EventsLoop>() -> events_loop::Result<()> {
//! let scheduler = EventsPeriodicScheduler::<C, S>::new(
//!     EventsLoopConfig::default(),
//!     |user_id: &str, delegate: CoreLoopDelegate| make_core::<C>(user_id, delegate),
//!     |special_loop_id: &str| make_special::<S>(special_loop_id),
//! )?;
//!
//! scheduler.enable_core_loop("user-1");
//! scheduler.enable_special_loop("calendar");
//! scheduler.start();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod sync;
pub mod timer;
pub mod utils;
pub mod version;

#[cfg(test)]
mod test_support;

pub use config::{EventsLoopConfig, EventsLoopConfigBuilder};
pub use error::{EventsLoopError, EventsLoopSdkError, LoopOutcome, Result};
pub use lifecycle::{LifecycleHook, LifecycleManager, SchedulerLifecycleHook};
pub use sync::{
    CoreLoopDelegate, CoreLoopFactory, EventsLoop, EventsPage, EventsPeriodicScheduler, LoopCompletion,
    LoopKind, LoopSyncStatus, SchedulerEnvironment, SchedulerState, SpecialLoopFactory,
};
pub use timer::{TimerHandle, TimerScheduler, TokioTimerScheduler};
pub use utils::{Clock, SystemClock};
pub use version::{BUILD_TIME, GIT_SHA, SDK_VERSION};
