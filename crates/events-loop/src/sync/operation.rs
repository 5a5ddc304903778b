//! 单个 loop 的一次同步周期
//!
//! poll → process → (has_more_pages 时继续 poll → process …)，直到追上服务端或失败。
//!
//! ## cursor 提交规则
//!
//! - 只有 poll 与 process 都成功的页才会提交 cursor
//! - process 失败：本页 cursor 不提交，下个周期重新拉取同一区间
//! - requires_clear_cache：本页不处理，之前已提交的页保持有效
//!
//! ## 取消
//!
//! 每个 await 之后都检查 [`EpochToken`]：loop 在周期中途被禁用（或调度器 reset）时，
//! 迟到的 poll 结果直接丢弃，不回调、不上报、不再翻页。
//! 例外：process 已成功的页仍然提交 cursor，数据已落地，cursor 必须跟上。

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{EventsLoopError, LoopOutcome};
use crate::utils::Clock;
use super::events_loop::{EventsLoop, EventsPage, LoopKind};
use super::status::LoopCompletion;

/// loop 某一次启用的身份凭证
///
/// 禁用时 token 被取消，同一代的所有迟到结果随之失效。
#[derive(Debug, Clone)]
pub struct EpochToken {
    generation: u64,
    cancel: CancellationToken,
}

impl EpochToken {
    pub fn new(generation: u64, cancel: CancellationToken) -> Self {
        Self { generation, cancel }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_live(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

/// 一次同步周期
pub struct LoopOperation<L: EventsLoop> {
    events_loop: Arc<L>,
    kind: LoopKind,
    epoch: EpochToken,
    clock: Arc<dyn Clock>,
}

impl<L: EventsLoop> LoopOperation<L> {
    pub fn new(events_loop: Arc<L>, kind: LoopKind, epoch: EpochToken, clock: Arc<dyn Clock>) -> Self {
        Self {
            events_loop,
            kind,
            epoch,
            clock,
        }
    }

    /// 执行周期，返回完成报告；周期被取消时返回 None
    pub async fn run(self) -> Option<LoopCompletion> {
        if !self.epoch.is_live() {
            return None;
        }

        let loop_id = self.events_loop.loop_id().to_string();
        let Some(mut since) = self.events_loop.latest_event_id() else {
            return self.fail(EventsLoopError::MissingLatestEventId, 0);
        };

        debug!("🔄 {} loop {} 开始同步，since={}", self.kind, loop_id, since);
        let mut pages_processed = 0usize;

        loop {
            let page = match self.events_loop.poll(&since).await {
                Ok(page) => page,
                Err(e) => {
                    if !self.epoch.is_live() {
                        return None;
                    }
                    return self.fail(EventsLoopError::Network(e.to_string()), pages_processed);
                }
            };
            if !self.epoch.is_live() {
                debug!("{} loop {} 已被禁用，丢弃迟到的 poll 结果", self.kind, loop_id);
                return None;
            }

            if page.requires_clear_cache() {
                return self.fail(EventsLoopError::CacheIsOutdated, pages_processed);
            }

            let next_event_id = page.latest_event_id().to_string();
            let has_more_pages = page.has_more_pages();

            if let Err(e) = self.events_loop.process(page).await {
                if !self.epoch.is_live() {
                    return None;
                }
                return self.fail(EventsLoopError::PageProcessing(e.to_string()), pages_processed);
            }

            // 已落地的页必须提交 cursor，即使 loop 已被禁用
            self.events_loop.set_latest_event_id(Some(next_event_id.clone()));
            pages_processed += 1;
            since = next_event_id;

            if !self.epoch.is_live() {
                debug!("{} loop {} 已被禁用，提交 cursor 后停止翻页", self.kind, loop_id);
                return None;
            }

            if !has_more_pages {
                break;
            }
            debug!("{} loop {} 还有更多事件，继续拉取下一页（已处理 {} 页）", self.kind, loop_id, pages_processed);
        }

        info!(
            "✅ {} loop {} 同步完成: {} 页，latest_event_id={}",
            self.kind, loop_id, pages_processed, since
        );
        Some(self.completion(LoopOutcome::Completed, None, pages_processed))
    }

    fn fail(&self, error: EventsLoopError, pages_processed: usize) -> Option<LoopCompletion> {
        warn!(
            "⚠️ {} loop {} 同步失败: {}",
            self.kind,
            self.events_loop.loop_id(),
            error
        );
        self.events_loop.on_error(&error);
        Some(self.completion(error.outcome(), Some(error.to_string()), pages_processed))
    }

    fn completion(&self, outcome: LoopOutcome, error: Option<String>, pages_processed: usize) -> LoopCompletion {
        LoopCompletion {
            kind: self.kind,
            loop_id: self.events_loop.loop_id().to_string(),
            generation: self.epoch.generation(),
            outcome,
            error,
            pages_processed,
            latest_event_id: self.events_loop.latest_event_id(),
            finished_at: self.clock.now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fixed_clock, LoopSpy, RecordedEvent};

    fn operation(spy: &Arc<LoopSpy>, cancel: &CancellationToken) -> LoopOperation<LoopSpy> {
        LoopOperation::new(
            spy.clone(),
            LoopKind::Special,
            EpochToken::new(7, cancel.clone()),
            fixed_clock(),
        )
    }

    #[tokio::test]
    async fn test_single_page_commits_cursor() {
        let spy = LoopSpy::new("A");
        spy.set_latest("a_#0");
        let cancel = CancellationToken::new();

        let completion = operation(&spy, &cancel).run().await.unwrap();

        assert_eq!(completion.outcome, LoopOutcome::Completed);
        assert_eq!(completion.generation, 7);
        assert_eq!(completion.pages_processed, 1);
        assert_eq!(completion.latest_event_id.as_deref(), Some("a_#0_#1"));
        assert_eq!(spy.latest().as_deref(), Some("a_#0_#1"));
    }

    #[tokio::test]
    async fn test_drains_all_pages_in_one_cycle() {
        let spy = LoopSpy::new("A");
        spy.set_latest("a_#0");
        spy.set_more_pages(4);
        let cancel = CancellationToken::new();

        let completion = operation(&spy, &cancel).run().await.unwrap();

        assert_eq!(completion.pages_processed, 5);
        assert_eq!(spy.poll_calls(), 5);
        assert_eq!(spy.process_calls(), 5);
        assert_eq!(spy.latest().as_deref(), Some("a_#0_#1_#2_#3_#4_#5"));
    }

    #[tokio::test]
    async fn test_missing_cursor_fails_without_polling() {
        let spy = LoopSpy::new("A");
        let cancel = CancellationToken::new();

        let completion = operation(&spy, &cancel).run().await.unwrap();

        assert_eq!(completion.outcome, LoopOutcome::MissingLatestEventId);
        assert_eq!(spy.poll_calls(), 0);
        assert_eq!(spy.recorded_events(), vec![RecordedEvent::MissingLatestEventIdError]);
        assert!(spy.latest().is_none());
    }

    #[tokio::test]
    async fn test_clear_cache_stops_before_processing_and_keeps_committed_pages() {
        let spy = LoopSpy::new("A");
        spy.set_latest("a_#0");
        spy.set_more_pages(3);
        spy.set_requires_clear_cache_from_poll(2);
        let cancel = CancellationToken::new();

        let completion = operation(&spy, &cancel).run().await.unwrap();

        assert_eq!(completion.outcome, LoopOutcome::CacheIsOutdated);
        assert_eq!(completion.pages_processed, 1);
        assert_eq!(spy.poll_calls(), 2);
        assert_eq!(spy.process_calls(), 1);
        assert_eq!(spy.latest().as_deref(), Some("a_#0_#1"));
        assert_eq!(
            spy.recorded_events().last(),
            Some(&RecordedEvent::RequiresClearCacheError)
        );
    }

    #[tokio::test]
    async fn test_processing_failure_keeps_previous_cursor() {
        let spy = LoopSpy::new("A");
        spy.set_latest("a_#0");
        spy.set_processing_error("disk full");
        let cancel = CancellationToken::new();

        let completion = operation(&spy, &cancel).run().await.unwrap();

        assert_eq!(completion.outcome, LoopOutcome::PageProcessing);
        assert!(completion.error.unwrap().contains("disk full"));
        assert_eq!(spy.latest().as_deref(), Some("a_#0"));
        assert_eq!(
            spy.recorded_events().last(),
            Some(&RecordedEvent::PageProcessingError("disk full".to_string()))
        );
    }

    #[tokio::test]
    async fn test_network_failure_keeps_cursor() {
        let spy = LoopSpy::new("A");
        spy.set_latest("a_#0");
        spy.set_network_error("offline");
        let cancel = CancellationToken::new();

        let completion = operation(&spy, &cancel).run().await.unwrap();

        assert_eq!(completion.outcome, LoopOutcome::Network);
        assert_eq!(spy.latest().as_deref(), Some("a_#0"));
        assert_eq!(
            spy.recorded_events(),
            vec![
                RecordedEvent::StartedPolling("a_#0".to_string()),
                RecordedEvent::NetworkError("offline".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_cancelled_epoch_discards_late_poll_result() {
        let spy = LoopSpy::new("A");
        spy.set_latest("a_#0");
        let gate = spy.install_poll_gate();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(operation(&spy, &cancel).run());
        spy.wait_for_poll_started().await;

        cancel.cancel();
        gate.add_permits(1);

        assert!(handle.await.unwrap().is_none());
        assert_eq!(spy.process_calls(), 0);
        assert_eq!(spy.latest().as_deref(), Some("a_#0"));
        assert!(!spy
            .recorded_events()
            .iter()
            .any(|event| matches!(event, RecordedEvent::StartedProcessing(_))));
    }

    #[tokio::test]
    async fn test_cancel_during_process_still_commits_applied_page() {
        let spy = LoopSpy::new("A");
        spy.set_latest("a_#0");
        spy.set_more_pages(2);
        let gate = spy.install_process_gate();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(operation(&spy, &cancel).run());
        spy.wait_for_process_started().await;

        cancel.cancel();
        gate.add_permits(1);

        assert!(handle.await.unwrap().is_none());
        assert_eq!(spy.process_calls(), 1);
        assert_eq!(spy.latest().as_deref(), Some("a_#0_#1"));
        // 禁用后不再翻页，也不回调 on_error
        assert_eq!(spy.poll_calls(), 1);
        assert_eq!(
            spy.recorded_events().last(),
            Some(&RecordedEvent::FinishedProcessing("a_#0_#1".to_string()))
        );
    }

    #[tokio::test]
    async fn test_cancel_during_failed_process_skips_error_hook() {
        let spy = LoopSpy::new("A");
        spy.set_latest("a_#0");
        spy.set_processing_error("disk full");
        let gate = spy.install_process_gate();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(operation(&spy, &cancel).run());
        spy.wait_for_process_started().await;

        cancel.cancel();
        gate.add_permits(1);

        assert!(handle.await.unwrap().is_none());
        assert_eq!(spy.latest().as_deref(), Some("a_#0"));
        assert!(!spy
            .recorded_events()
            .iter()
            .any(|event| matches!(event, RecordedEvent::PageProcessingError(_))));
    }
}
