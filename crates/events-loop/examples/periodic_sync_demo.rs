//! 周期同步演示
//!
//! 用内存中的事件日志模拟服务端：一个 core loop + 两个 special loop，
//! 展示 tick 驱动的翻页同步、手动触发、core loop 禁用 special loop、suspend / reset。

use async_trait::async_trait;
use events_loop::{
    CoreLoopDelegate, EventsLoop, EventsLoopConfig, EventsLoopError, EventsPage, EventsPeriodicScheduler,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// 每页最多返回的事件数
const PAGE_SIZE: usize = 2;

/// 内存事件日志，按 stream 存放事件
#[derive(Default)]
struct EventLog {
    streams: Mutex<HashMap<String, Vec<String>>>,
}

impl EventLog {
    fn append(&self, stream: &str, event: &str) {
        self.streams
            .lock()
            .entry(stream.to_string())
            .or_default()
            .push(event.to_string());
    }

    /// cursor 为已读取的事件数
    fn page_after(&self, stream: &str, since: &str) -> anyhow::Result<DemoPage> {
        let offset: usize = since.parse()?;
        let streams = self.streams.lock();
        let events = streams.get(stream).cloned().unwrap_or_default();
        let end = (offset + PAGE_SIZE).min(events.len());
        Ok(DemoPage {
            events: events[offset.min(end)..end].to_vec(),
            latest_event_id: end.to_string(),
            has_more_pages: end < events.len(),
        })
    }
}

struct DemoPage {
    events: Vec<String>,
    latest_event_id: String,
    has_more_pages: bool,
}

impl EventsPage for DemoPage {
    fn latest_event_id(&self) -> &str {
        &self.latest_event_id
    }

    fn requires_clear_cache(&self) -> bool {
        false
    }

    fn has_more_pages(&self) -> bool {
        self.has_more_pages
    }
}

struct DemoLoop {
    id: String,
    log: Arc<EventLog>,
    cursor: Mutex<Option<String>>,
    delegate: Option<CoreLoopDelegate>,
}

impl DemoLoop {
    fn new(id: &str, log: Arc<EventLog>, delegate: Option<CoreLoopDelegate>) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            log,
            cursor: Mutex::new(Some("0".to_string())),
            delegate,
        })
    }
}

#[async_trait]
impl EventsLoop for DemoLoop {
    type Page = DemoPage;

    fn loop_id(&self) -> &str {
        &self.id
    }

    fn latest_event_id(&self) -> Option<String> {
        self.cursor.lock().clone()
    }

    fn set_latest_event_id(&self, latest_event_id: Option<String>) {
        *self.cursor.lock() = latest_event_id;
    }

    async fn poll(&self, since: &str) -> anyhow::Result<DemoPage> {
        sleep(Duration::from_millis(50)).await;
        self.log.page_after(&self.id, since)
    }

    async fn process(&self, page: DemoPage) -> anyhow::Result<()> {
        for event in &page.events {
            println!("  📥 [{}] {}", self.id, event);
            // core 事件流通知某个日历已被删除
            if let (Some(calendar), Some(delegate)) = (event.strip_prefix("calendar-deleted:"), &self.delegate) {
                delegate.disable_special_loop(calendar);
            }
        }
        Ok(())
    }

    fn on_error(&self, error: &EventsLoopError) {
        println!("  ⚠️ [{}] 同步失败: {}", self.id, error);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("========================================");
    println!("Events loop 周期同步演示");
    println!("{}", events_loop::version::version_line());
    println!("========================================\n");

    let log = Arc::new(EventLog::default());
    for index in 1..=5 {
        log.append("alice", &format!("message-{}", index));
    }
    log.append("work-calendar", "meeting-1");
    log.append("contacts", "contact-bob");

    let config = EventsLoopConfig::builder().sync_interval_secs(1).build()?;
    let core_log = log.clone();
    let special_log = log.clone();
    let scheduler = EventsPeriodicScheduler::<DemoLoop, DemoLoop>::new(
        config,
        move |user_id: &str, delegate: CoreLoopDelegate| DemoLoop::new(user_id, core_log.clone(), Some(delegate)),
        move |special_loop_id: &str| DemoLoop::new(special_loop_id, special_log.clone(), None),
    )?;

    let mut completions = scheduler.subscribe_completions();
    tokio::spawn(async move {
        while let Ok(completion) = completions.recv().await {
            println!(
                "  ✅ {} loop {} 周期结束: {}，{} 页，cursor={:?}",
                completion.kind,
                completion.loop_id,
                completion.outcome,
                completion.pages_processed,
                completion.latest_event_id
            );
        }
    });

    // === 1. 启用 loop 并启动 ===
    scheduler.enable_core_loop("alice");
    scheduler.enable_special_loop("work-calendar");
    scheduler.enable_special_loop("contacts");
    scheduler.start();
    sleep(Duration::from_millis(500)).await;
    scheduler.wait_until_idle().await;

    // === 2. 新事件 + 手动触发 ===
    println!("\n👆 手动触发 core loop");
    log.append("alice", "message-6");
    log.append("alice", "calendar-deleted:work-calendar");
    scheduler.trigger_core_loop();
    sleep(Duration::from_millis(300)).await;
    scheduler.wait_until_idle().await;
    println!("已启用的 special loop: {:?}", scheduler.enabled_special_loop_ids());

    // === 3. 暂停期间的事件在 start 后同步 ===
    println!("\n⏸️ 暂停调度");
    scheduler.suspend();
    log.append("contacts", "contact-carol");
    sleep(Duration::from_millis(1500)).await;
    println!("▶️ 恢复调度");
    scheduler.start();
    sleep(Duration::from_millis(500)).await;
    scheduler.wait_until_idle().await;

    if let Some(status) = scheduler.sync_status("contacts") {
        println!("contacts 同步状态: {:?}", status);
    }

    // === 4. 重置 ===
    scheduler.reset();
    println!("\n🔄 已重置，状态: {}", scheduler.state());

    Ok(())
}
