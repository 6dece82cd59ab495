//! 遥测分发器
//!
//! 有界队列 + 固定数量的 worker：
//! - 请求路径使用 `try_send` 投递，从不等待
//! - 队列已满（或容量为 0）时丢弃事件并计数
//! - worker 负责位置解析与持久化，单次持久化有超时上限
//! - 关闭时停止接收新事件，worker 排空已入队事件（有时间上限）
//! - 关闭后 `enqueued == persisted + failed + abandoned`

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::{AccessLogEntry, AccessLogSink, RequestEvent};
use crate::services::geoip::Resolver;

/// 分发器参数
#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// 队列容量，0 表示关闭队列（所有事件都会被丢弃）
    pub queue_capacity: usize,
    pub workers: usize,
    pub persist_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            workers: 4,
            persist_timeout: Duration::from_millis(5000),
        }
    }
}

/// 分发计数器
#[derive(Debug, Default)]
pub struct DispatchStats {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    persisted: AtomicU64,
    failed: AtomicU64,
}

/// 计数器快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub enqueued: u64,
    pub dropped: u64,
    pub persisted: u64,
    pub failed: u64,
    /// 已入队但未处理完的事件（排空超时被放弃）
    pub abandoned: u64,
}

impl DispatchStats {
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn persisted(&self) -> u64 {
        self.persisted.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            enqueued: self.enqueued(),
            dropped: self.dropped(),
            persisted: self.persisted(),
            failed: self.failed(),
            abandoned: 0,
        }
    }
}

/// 请求路径持有的投递句柄（`Clone` 只复制 Arc 与 Sender）
#[derive(Debug, Clone)]
pub struct TelemetryDispatcher {
    sender: Option<mpsc::Sender<RequestEvent>>,
    stats: Arc<DispatchStats>,
    closed: Arc<AtomicBool>,
}

impl TelemetryDispatcher {
    /// 启动 worker 池，返回投递句柄与池句柄
    ///
    /// 必须在 tokio 运行时内调用
    pub fn spawn(
        config: DispatcherConfig,
        resolver: Resolver,
        sink: Arc<dyn AccessLogSink>,
    ) -> (Self, WorkerPool) {
        let stats = Arc::new(DispatchStats::default());
        let closed = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // tokio 的 channel 不接受容量 0，此时不创建队列
        if config.queue_capacity == 0 {
            warn!("Telemetry queue capacity is 0, every request event will be dropped");
            let dispatcher = Self {
                sender: None,
                stats: stats.clone(),
                closed: closed.clone(),
            };
            return (
                dispatcher,
                WorkerPool {
                    workers: Vec::new(),
                    shutdown: shutdown_tx,
                    stats,
                    closed,
                    queue: None,
                },
            );
        }

        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let shared = Arc::new(WorkerShared {
            receiver: Mutex::new(rx),
            resolver,
            sink,
            stats: stats.clone(),
            persist_timeout: config.persist_timeout,
        });

        let worker_count = config.workers.max(1);
        let workers = (0..worker_count)
            .map(|id| tokio::spawn(run_worker(id, shared.clone(), shutdown_rx.clone())))
            .collect();

        info!(
            "Telemetry dispatcher started: {} workers, queue capacity {}",
            worker_count, config.queue_capacity
        );

        let dispatcher = Self {
            sender: Some(tx.clone()),
            stats: stats.clone(),
            closed: closed.clone(),
        };
        (
            dispatcher,
            WorkerPool {
                workers,
                shutdown: shutdown_tx,
                stats,
                closed,
                queue: Some(tx),
            },
        )
    }

    /// 遥测关闭时使用的占位句柄，不会收到事件
    pub fn disabled() -> Self {
        Self {
            sender: None,
            stats: Arc::new(DispatchStats::default()),
            closed: Arc::new(AtomicBool::new(true)),
        }
    }

    /// 非阻塞投递；返回事件是否入队
    pub fn dispatch(&self, event: RequestEvent) -> bool {
        if self.closed.load(Ordering::Acquire) {
            self.record_drop(&event, "dispatcher is shutting down");
            return false;
        }
        let Some(sender) = &self.sender else {
            self.record_drop(&event, "telemetry queue is disabled");
            return false;
        };

        match sender.try_send(event) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.record_drop(&event, "telemetry queue is full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                self.record_drop(&event, "telemetry queue is closed");
                false
            }
        }
    }

    fn record_drop(&self, event: &RequestEvent, reason: &str) {
        let total = self.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            "Dropped request event for {}{} ({}), {} dropped so far",
            event.host, event.path, reason, total
        );
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }
}

struct WorkerShared {
    receiver: Mutex<mpsc::Receiver<RequestEvent>>,
    resolver: Resolver,
    sink: Arc<dyn AccessLogSink>,
    stats: Arc<DispatchStats>,
    persist_timeout: Duration,
}

async fn run_worker(id: usize, shared: Arc<WorkerShared>, mut shutdown: watch::Receiver<bool>) {
    trace!("Telemetry worker {} started", id);
    let mut draining = false;

    loop {
        let event = {
            let mut rx = shared.receiver.lock().await;
            if draining {
                // 接收端关闭后新的投递直接失败，缓冲区内的事件仍可取出
                rx.close();
                rx.try_recv().ok()
            } else {
                tokio::select! {
                    event = rx.recv() => event,
                    _ = shutdown.changed() => {
                        draining = true;
                        continue;
                    }
                }
            }
        };

        let Some(event) = event else {
            break;
        };
        process_event(&shared, event).await;
    }

    trace!("Telemetry worker {} stopped", id);
}

async fn process_event(shared: &WorkerShared, event: RequestEvent) {
    let location = shared.resolver.resolve_or_unknown(&event.client_ip);
    let entry = AccessLogEntry::from_event(event, location);
    let target = format!("{}{}", entry.host, entry.path);

    match tokio::time::timeout(shared.persist_timeout, shared.sink.persist(entry)).await {
        Ok(Ok(())) => {
            shared.stats.persisted.fetch_add(1, Ordering::Relaxed);
            trace!("Access log persisted for {}", target);
        }
        Ok(Err(e)) => {
            shared.stats.failed.fetch_add(1, Ordering::Relaxed);
            warn!("Failed to persist access log for {}: {}", target, e);
        }
        Err(_) => {
            shared.stats.failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Persisting access log for {} timed out after {} ms",
                target,
                shared.persist_timeout.as_millis()
            );
        }
    }
}

/// worker 池句柄，用于优雅关闭
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
    stats: Arc<DispatchStats>,
    closed: Arc<AtomicBool>,
    /// 仅用于查询剩余队列长度
    queue: Option<mpsc::Sender<RequestEvent>>,
}

impl WorkerPool {
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// 队列中尚未处理的事件数
    pub fn pending(&self) -> usize {
        self.queue
            .as_ref()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .unwrap_or(0)
    }

    /// 停止接收事件并排空队列，超时后放弃剩余事件
    pub async fn shutdown(self, timeout: Duration) -> StatsSnapshot {
        self.closed.store(true, Ordering::Release);
        let pending = self.pending();
        debug!("Draining telemetry queue ({} pending events)", pending);

        let _ = self.shutdown.send(true);
        let mut workers = self.workers;

        if tokio::time::timeout(timeout, join_all(workers.iter_mut()))
            .await
            .is_err()
        {
            let abandoned = self
                .queue
                .as_ref()
                .map(|tx| tx.max_capacity() - tx.capacity())
                .unwrap_or(0);
            warn!(
                "Telemetry drain timed out after {:?}, abandoning {} queued events",
                timeout, abandoned
            );
            for handle in workers.iter().filter(|h| !h.is_finished()) {
                handle.abort();
            }
            // 等待被取消的 worker 真正退出，之后计数不再变化
            for handle in workers.iter_mut().filter(|h| !h.is_finished()) {
                let _ = handle.await;
            }
        }

        let mut snapshot = self.stats.snapshot();
        snapshot.abandoned = snapshot
            .enqueued
            .saturating_sub(snapshot.persisted + snapshot.failed);
        info!(
            "Telemetry dispatcher stopped: {} enqueued, {} dropped, {} persisted, {} failed, {} abandoned",
            snapshot.enqueued, snapshot.dropped, snapshot.persisted, snapshot.failed, snapshot.abandoned
        );
        snapshot
    }
}
