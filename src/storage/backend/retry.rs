//! 数据库写入重试
//!
//! 只对瞬时错误重试：连接池获取失败、连接中断、死锁、锁等待超时、SQLite BUSY/LOCKED

use std::future::Future;
use std::time::Duration;

use sea_orm::DbErr;
use sea_orm::error::RuntimeErr;
use tokio::time::sleep;
use tracing::{debug, warn};

/// 可重试的数据库错误码
/// - MySQL: 1213 死锁, 1205 锁等待超时
/// - PostgreSQL: 40001 序列化失败, 40P01 死锁
/// - SQLite: 5 BUSY, 6 LOCKED
const RETRYABLE_CODES: &[&str] = &["1213", "1205", "40001", "40P01", "5", "6"];

const RETRYABLE_MESSAGES: &[&str] = &[
    "deadlock",
    "lock wait timeout",
    "database is locked",
    "serialization failure",
];

/// 判断数据库错误是否可重试
pub fn is_retryable_error(err: &DbErr) -> bool {
    match err {
        DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => true,
        DbErr::Exec(runtime) | DbErr::Query(runtime) => is_retryable_runtime(runtime),
        _ => false,
    }
}

fn is_retryable_runtime(err: &RuntimeErr) -> bool {
    let message = match err {
        RuntimeErr::SqlxError(sqlx_err) => {
            use std::ops::Deref;
            let code = sqlx_err
                .deref()
                .as_database_error()
                .and_then(|db_err| db_err.code().map(|c| c.into_owned()));
            if let Some(code) = code {
                return RETRYABLE_CODES.contains(&code.as_str());
            }
            sqlx_err.to_string()
        }
        RuntimeErr::Internal(msg) => msg.clone(),
        #[allow(unreachable_patterns)]
        _ => return false,
    };
    message_is_retryable(&message)
}

fn message_is_retryable(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_MESSAGES.iter().any(|m| lower.contains(m))
}

/// 重试参数
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// 首次尝试之后的最大重试次数
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

/// 以指数退避执行操作，仅瞬时错误会触发重试
pub async fn with_retry<T, F, Fut>(
    operation_name: &str,
    config: RetryConfig,
    mut operation: F,
) -> Result<T, DbErr>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DbErr>>,
{
    let mut retries = 0;
    loop {
        let err = match operation().await {
            Ok(value) => {
                if retries > 0 {
                    debug!("'{}' succeeded after {} retries", operation_name, retries);
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !is_retryable_error(&err) {
            debug!("'{}' failed with a permanent error: {}", operation_name, err);
            return Err(err);
        }
        if retries >= config.max_retries {
            return Err(err);
        }

        retries += 1;
        let delay = calculate_backoff(retries, config.base_delay_ms, config.max_delay_ms);
        warn!(
            "'{}' hit a transient error (retry {}/{}): {}; backing off {} ms",
            operation_name, retries, config.max_retries, err, delay
        );
        sleep(Duration::from_millis(delay)).await;
    }
}

/// 第 n 次重试的延迟：`base * 2^(n-1)`，封顶后再加 0-25% 抖动
fn calculate_backoff(retry: u32, base_ms: u64, max_ms: u64) -> u64 {
    let exponent = retry.saturating_sub(1).min(32);
    let capped = base_ms.saturating_mul(1u64 << exponent).min(max_ms);
    capped.saturating_add(rand::random_range(0..=capped / 4))
}
