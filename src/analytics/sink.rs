use super::AccessLogEntry;

/// 访问日志 Sink
///
/// 失败只返回错误，由调用方记录日志后丢弃
#[async_trait::async_trait]
pub trait AccessLogSink: Send + Sync {
    async fn persist(&self, entry: AccessLogEntry) -> anyhow::Result<()>;
}
