//! Events loop 接口
//!
//! 一个 loop 就是一条可增量同步的数据流：持有 latest event ID（cursor），
//! 通过 poll 拉取该 cursor 之后的一页增量，再通过 process 落地。
//! 具体的 HTTP 请求、JSON 解析、持久化都由实现方负责，调度器只关心这里的契约。
//!
//! - core loop：每个活跃用户恰好一个（用户事件流）
//! - special loop：任意数量，按任意 ID 区分（日历、联系人 …）

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tracing::debug;

use crate::error::EventsLoopError;
use super::registry::{RegistryCommand, RegistryCommandSink};

/// loop 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LoopKind {
    Core,
    Special,
}

impl LoopKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopKind::Core => "core",
            LoopKind::Special => "special",
        }
    }
}

impl std::fmt::Display for LoopKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// poll 返回的一页事件
///
/// 页的具体内容（消息、标签、日历事件 …）由实现方定义，调度器只读取这三个字段。
pub trait EventsPage: Send + 'static {
    /// 本页之后的新 cursor
    fn latest_event_id(&self) -> &str;

    /// 服务端要求清空本地缓存并完整重同步
    fn requires_clear_cache(&self) -> bool;

    /// 该 cursor 之后还有更多事件
    fn has_more_pages(&self) -> bool;
}

/// 一条可增量同步的数据流
#[async_trait]
pub trait EventsLoop: Send + Sync + 'static {
    type Page: EventsPage;

    /// 稳定的 loop 标识（core loop 为用户 ID）
    fn loop_id(&self) -> &str;

    /// 最近一次提交的 cursor
    ///
    /// 首次成功同步前、或清空缓存后为 `None`。
    fn latest_event_id(&self) -> Option<String>;

    /// 提交 cursor
    ///
    /// 只在一页 poll + process 都成功后由同步周期调用。
    fn set_latest_event_id(&self, latest_event_id: Option<String>);

    /// 拉取 `since` 之后的一页事件，不修改任何本地状态
    async fn poll(&self, since: &str) -> anyhow::Result<Self::Page>;

    /// 应用一页事件
    async fn process(&self, page: Self::Page) -> anyhow::Result<()>;

    /// 本 loop 的同步周期失败时同步调用
    fn on_error(&self, error: &EventsLoopError);
}

/// 创建 core loop
pub trait CoreLoopFactory<C>: Send + Sync {
    fn make_core_loop(&self, user_id: &str, delegate: CoreLoopDelegate) -> Arc<C>;
}

impl<C, F> CoreLoopFactory<C> for F
where
    F: Fn(&str, CoreLoopDelegate) -> Arc<C> + Send + Sync,
{
    fn make_core_loop(&self, user_id: &str, delegate: CoreLoopDelegate) -> Arc<C> {
        self(user_id, delegate)
    }
}

/// 创建 special loop
pub trait SpecialLoopFactory<S>: Send + Sync {
    fn make_special_loop(&self, special_loop_id: &str) -> Arc<S>;
}

impl<S, F> SpecialLoopFactory<S> for F
where
    F: Fn(&str) -> Arc<S> + Send + Sync,
{
    fn make_special_loop(&self, special_loop_id: &str) -> Arc<S> {
        self(special_loop_id)
    }
}

/// core loop 回调调度器的入口
///
/// core loop 在处理自己的事件时可能发现某个 special loop 需要停掉（例如对应日历已被删除），
/// 通过这里向 special loop 注册表投递禁用命令。只持有弱引用：调度器释放后调用为空操作。
#[derive(Clone)]
pub struct CoreLoopDelegate {
    specials: Weak<dyn RegistryCommandSink>,
}

impl CoreLoopDelegate {
    pub(crate) fn new(specials: Weak<dyn RegistryCommandSink>) -> Self {
        Self { specials }
    }

    /// 禁用指定 special loop，下一次 tick 之前生效
    pub fn disable_special_loop(&self, special_loop_id: &str) {
        match self.specials.upgrade() {
            Some(specials) => specials.send(RegistryCommand::Disable(special_loop_id.to_string())),
            None => debug!("调度器已释放，忽略禁用 special loop: {}", special_loop_id),
        }
    }
}

impl std::fmt::Debug for CoreLoopDelegate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreLoopDelegate")
            .field("attached", &(self.specials.strong_count() > 0))
            .finish()
    }
}
