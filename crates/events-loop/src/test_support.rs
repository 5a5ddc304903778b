//! 测试辅助：记录调用的 loop、手动定时器、固定时钟

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore};

use crate::config::EventsLoopConfig;
use crate::error::EventsLoopError;
use crate::sync::{
    CoreLoopDelegate, EventsLoop, EventsPage, EventsPeriodicScheduler, SchedulerEnvironment,
};
use crate::timer::{TickCallback, TimerHandle, TimerScheduler};
use crate::utils::Clock;

/// spy 记录的调用序列
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RecordedEvent {
    StartedPolling(String),
    FinishedPolling {
        event_id: String,
        requires_clear_cache: bool,
        has_more_pages: bool,
    },
    StartedProcessing(String),
    FinishedProcessing(String),
    MissingLatestEventIdError,
    RequiresClearCacheError,
    NetworkError(String),
    PageProcessingError(String),
}

#[derive(Debug)]
pub(crate) struct SpyPage {
    latest_event_id: String,
    requires_clear_cache: bool,
    has_more_pages: bool,
}

impl EventsPage for SpyPage {
    fn latest_event_id(&self) -> &str {
        &self.latest_event_id
    }

    fn requires_clear_cache(&self) -> bool {
        self.requires_clear_cache
    }

    fn has_more_pages(&self) -> bool {
        self.has_more_pages
    }
}

#[derive(Default)]
struct SpyState {
    latest: Option<String>,
    poll_count: usize,
    process_count: usize,
    more_pages_remaining: usize,
    clear_cache_from_poll: Option<usize>,
    network_error: Option<String>,
    processing_error: Option<String>,
    events: Vec<RecordedEvent>,
    delegate: Option<CoreLoopDelegate>,
    disable_on_poll: Vec<String>,
    disable_on_error: Vec<String>,
}

/// 记录所有调用的 loop
///
/// 新 cursor 为 `"{since}_#{第几次 poll}"`，例如 `a_#0` 第一次 poll 得到 `a_#0_#1`。
pub(crate) struct LoopSpy {
    loop_id: String,
    state: Mutex<SpyState>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    process_gate: Mutex<Option<Arc<Semaphore>>>,
    poll_started: Notify,
    poll_finished: Notify,
    process_started: Notify,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl LoopSpy {
    pub(crate) fn new(loop_id: &str) -> Arc<Self> {
        Arc::new(Self {
            loop_id: loop_id.to_string(),
            state: Mutex::new(SpyState::default()),
            gate: Mutex::new(None),
            process_gate: Mutex::new(None),
            poll_started: Notify::new(),
            poll_finished: Notify::new(),
            process_started: Notify::new(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub(crate) fn set_latest(&self, latest_event_id: &str) {
        self.state.lock().latest = Some(latest_event_id.to_string());
    }

    pub(crate) fn latest(&self) -> Option<String> {
        self.state.lock().latest.clone()
    }

    /// 前 `count` 次 poll 返回 has_more_pages = true
    pub(crate) fn set_more_pages(&self, count: usize) {
        self.state.lock().more_pages_remaining = count;
    }

    /// 第 `poll_number` 次（从 1 开始）及之后的 poll 要求清空缓存
    pub(crate) fn set_requires_clear_cache_from_poll(&self, poll_number: usize) {
        self.state.lock().clear_cache_from_poll = Some(poll_number);
    }

    pub(crate) fn set_network_error(&self, message: &str) {
        self.state.lock().network_error = Some(message.to_string());
    }

    pub(crate) fn clear_network_error(&self) {
        self.state.lock().network_error = None;
    }

    pub(crate) fn set_processing_error(&self, message: &str) {
        self.state.lock().processing_error = Some(message.to_string());
    }

    pub(crate) fn set_delegate(&self, delegate: CoreLoopDelegate) {
        self.state.lock().delegate = Some(delegate);
    }

    pub(crate) fn delegate(&self) -> Option<CoreLoopDelegate> {
        self.state.lock().delegate.clone()
    }

    /// 每次 poll 开始时通过 delegate 禁用指定 special loop
    pub(crate) fn disable_special_on_poll(&self, special_loop_id: &str) {
        self.state.lock().disable_on_poll.push(special_loop_id.to_string());
    }

    /// on_error 中通过 delegate 禁用指定 special loop
    pub(crate) fn disable_special_on_error(&self, special_loop_id: &str) {
        self.state.lock().disable_on_error.push(special_loop_id.to_string());
    }

    pub(crate) fn poll_calls(&self) -> usize {
        self.state.lock().poll_count
    }

    pub(crate) fn process_calls(&self) -> usize {
        self.state.lock().process_count
    }

    pub(crate) fn recorded_events(&self) -> Vec<RecordedEvent> {
        self.state.lock().events.clone()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// 之后每次 poll 都要先拿到一个 permit 才会继续
    pub(crate) fn install_poll_gate(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    /// 之后每次 process 都要先拿到一个 permit 才会继续
    pub(crate) fn install_process_gate(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.process_gate.lock() = Some(gate.clone());
        gate
    }

    pub(crate) async fn wait_for_process_started(&self) {
        self.process_started.notified().await;
    }

    pub(crate) async fn wait_for_poll_started(&self) {
        self.poll_started.notified().await;
    }

    pub(crate) async fn wait_for_poll_finished(&self) {
        self.poll_finished.notified().await;
    }

    fn disable_specials(&self, targets: Vec<String>) {
        let delegate = self.state.lock().delegate.clone();
        if let Some(delegate) = delegate {
            for special_loop_id in targets {
                delegate.disable_special_loop(&special_loop_id);
            }
        }
    }
}

#[async_trait]
impl EventsLoop for LoopSpy {
    type Page = SpyPage;

    fn loop_id(&self) -> &str {
        &self.loop_id
    }

    fn latest_event_id(&self) -> Option<String> {
        self.latest()
    }

    fn set_latest_event_id(&self, latest_event_id: Option<String>) {
        self.state.lock().latest = latest_event_id;
    }

    async fn poll(&self, since: &str) -> anyhow::Result<SpyPage> {
        let targets = self.state.lock().disable_on_poll.clone();
        self.disable_specials(targets);

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        self.poll_started.notify_one();

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.acquire().await.expect("poll gate closed").forget();
        }
        tokio::task::yield_now().await;

        let result = {
            let mut state = self.state.lock();
            state.events.push(RecordedEvent::StartedPolling(since.to_string()));
            state.poll_count += 1;

            match state.network_error.clone() {
                Some(message) => Err(anyhow!(message)),
                None => {
                    let poll_number = state.poll_count;
                    let has_more_pages = if state.more_pages_remaining > 0 {
                        state.more_pages_remaining -= 1;
                        true
                    } else {
                        false
                    };
                    let requires_clear_cache = state
                        .clear_cache_from_poll
                        .is_some_and(|from| poll_number >= from);
                    let page = SpyPage {
                        latest_event_id: format!("{}_#{}", since, poll_number),
                        requires_clear_cache,
                        has_more_pages,
                    };
                    state.events.push(RecordedEvent::FinishedPolling {
                        event_id: page.latest_event_id.clone(),
                        requires_clear_cache,
                        has_more_pages,
                    });
                    Ok(page)
                }
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.poll_finished.notify_one();
        result
    }

    async fn process(&self, page: SpyPage) -> anyhow::Result<()> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        {
            let mut state = self.state.lock();
            state.events.push(RecordedEvent::StartedProcessing(page.latest_event_id.clone()));
            state.process_count += 1;
        }
        self.process_started.notify_one();

        let gate = self.process_gate.lock().clone();
        if let Some(gate) = gate {
            gate.acquire().await.expect("process gate closed").forget();
        }
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut state = self.state.lock();
        if let Some(message) = state.processing_error.clone() {
            return Err(anyhow!(message));
        }
        state.events.push(RecordedEvent::FinishedProcessing(page.latest_event_id));
        Ok(())
    }

    fn on_error(&self, error: &EventsLoopError) {
        let event = match error {
            EventsLoopError::MissingLatestEventId => RecordedEvent::MissingLatestEventIdError,
            EventsLoopError::Network(message) => RecordedEvent::NetworkError(message.clone()),
            EventsLoopError::CacheIsOutdated => RecordedEvent::RequiresClearCacheError,
            EventsLoopError::PageProcessing(message) => RecordedEvent::PageProcessingError(message.clone()),
        };
        let targets = {
            let mut state = self.state.lock();
            state.events.push(event);
            state.disable_on_error.clone()
        };
        self.disable_specials(targets);
    }
}

/// 只记录调度请求、由测试手动触发 tick 的定时器
#[derive(Default)]
pub(crate) struct ManualTimerScheduler {
    timers: Mutex<Vec<(TimerHandle, TickCallback)>>,
}

impl ManualTimerScheduler {
    pub(crate) fn add_calls(&self) -> usize {
        self.timers.lock().len()
    }

    pub(crate) fn last_timer(&self) -> Option<TimerHandle> {
        self.timers.lock().last().map(|(handle, _)| handle.clone())
    }

    /// 触发所有仍然有效的定时器
    pub(crate) fn simulate_tick(&self) {
        let callbacks: Vec<TickCallback> = self
            .timers
            .lock()
            .iter()
            .filter(|(handle, _)| handle.is_valid())
            .map(|(_, tick)| tick.clone())
            .collect();
        for tick in callbacks {
            tick();
        }
    }
}

impl std::fmt::Debug for ManualTimerScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualTimerScheduler")
            .field("add_calls", &self.add_calls())
            .finish()
    }
}

impl TimerScheduler for ManualTimerScheduler {
    fn schedule(&self, interval: Duration, fire_date: DateTime<Utc>, tick: TickCallback) -> TimerHandle {
        let handle = TimerHandle::new(interval, fire_date);
        self.timers.lock().push((handle.clone(), tick));
        handle
    }
}

#[derive(Debug)]
pub(crate) struct FixedClock(DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

pub(crate) fn fixed_clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().expect("valid date"),
    ))
}

/// core loop 与 special loop 都是 [`LoopSpy`]，初始 cursor 为 `"{id}_#0"`
pub(crate) fn scheduler_with_manual_timer() -> (
    EventsPeriodicScheduler<LoopSpy, LoopSpy>,
    Arc<ManualTimerScheduler>,
) {
    let timer = Arc::new(ManualTimerScheduler::default());
    let environment = SchedulerEnvironment {
        timer_scheduler: timer.clone(),
        clock: fixed_clock(),
        runtime: Handle::current(),
    };

    let scheduler = EventsPeriodicScheduler::with_environment(
        EventsLoopConfig::default(),
        environment,
        |user_id: &str, delegate: CoreLoopDelegate| {
            let spy = LoopSpy::new(user_id);
            spy.set_latest(&format!("{}_#0", user_id));
            spy.set_delegate(delegate);
            spy
        },
        |special_loop_id: &str| {
            let spy = LoopSpy::new(special_loop_id);
            spy.set_latest(&format!("{}_#0", special_loop_id));
            spy
        },
    )
    .expect("default config is valid");

    (scheduler, timer)
}
