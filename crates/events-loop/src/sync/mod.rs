//! 增量事件同步
//!
//! - [`events_loop`]：loop 契约（poll / process / on_error）与工厂
//! - [`operation`]：单个 loop 的一次同步周期
//! - [`queue`]：每个 loop 专属的串行队列
//! - [`registry`]：已启用 loop 的注册表
//! - [`status`]：完成记录与广播
//! - [`scheduler`]：周期调度器

pub mod events_loop;
pub mod operation;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod status;

pub use events_loop::{
    CoreLoopDelegate, CoreLoopFactory, EventsLoop, EventsPage, LoopKind, SpecialLoopFactory,
};
pub use operation::{EpochToken, LoopOperation};
pub use queue::{CycleRequest, LoopQueue, QueueState};
pub use registry::{LoopRegistry, RegistryCommand, RegistryCommandSink};
pub use scheduler::{EventsPeriodicScheduler, SchedulerEnvironment, SchedulerState};
pub use status::{LoopCompletion, LoopSyncStatus, SyncStatusBook};
