//! 请求遥测
//!
//! 请求处理路径只负责采集原始的 `RequestEvent`，
//! 位置解析和持久化交给 `TelemetryDispatcher` 的工作池完成。

pub mod dispatcher;
pub mod sink;

pub use dispatcher::{DispatchStats, DispatcherConfig, StatsSnapshot, TelemetryDispatcher, WorkerPool};
pub use sink::AccessLogSink;

use chrono::{DateTime, Utc};

use crate::services::geoip::Location;

/// 请求路径上采集的原始事件（尚未解析位置）
#[derive(Debug, Clone)]
pub struct RequestEvent {
    pub host: String,
    pub path: String,
    pub raw_query: String,
    pub client_ip: String,
    pub duration_micros: u64,
    pub recorded_at: DateTime<Utc>,
}

impl RequestEvent {
    pub fn new(host: String, path: String, raw_query: String, client_ip: String) -> Self {
        Self {
            host,
            path,
            raw_query,
            client_ip,
            duration_micros: 0,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_duration_micros(mut self, micros: u64) -> Self {
        self.duration_micros = micros;
        self
    }
}

/// 一条完整的访问日志
#[derive(Debug, Clone, PartialEq)]
pub struct AccessLogEntry {
    pub host: String,
    pub path: String,
    pub raw_query: String,
    pub client_ip: String,
    pub duration_micros: u64,
    /// 未命中时为 `Location::default()`
    pub location: Location,
    pub created_at: DateTime<Utc>,
}

impl AccessLogEntry {
    /// 由原始事件和解析出的位置组装
    pub fn from_event(event: RequestEvent, location: Location) -> Self {
        Self {
            host: event.host,
            path: event.path,
            raw_query: event.raw_query,
            client_ip: event.client_ip,
            duration_micros: event.duration_micros,
            location,
            created_at: event.recorded_at,
        }
    }
}
