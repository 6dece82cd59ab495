//! SeaORM 存储后端
//!
//! 支持 SQLite、MySQL/MariaDB 与 PostgreSQL，类型由 URL 推断。

mod access_log_sink;
mod connection;
pub mod retry;

use std::sync::Arc;

use sea_orm::{DatabaseConnection, EntityTrait, PaginatorTrait};
use tracing::info;

use crate::analytics::AccessLogSink;
use crate::config::DatabaseConfig;
use crate::errors::{GeotrailError, Result};

pub use access_log_sink::entry_to_active_model;
pub use connection::{connect_generic, connect_sqlite, run_migrations};

use migration::entities::AccessLogEntity;

/// 从数据库 URL 推断数据库类型
pub fn infer_backend_from_url(database_url: &str) -> Result<String> {
    if database_url.starts_with("sqlite:")
        || database_url.ends_with(".db")
        || database_url.ends_with(".sqlite")
        || database_url == ":memory:"
    {
        Ok("sqlite".to_string())
    } else if database_url.starts_with("mysql://") || database_url.starts_with("mariadb://") {
        Ok("mysql".to_string())
    } else if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        Ok("postgres".to_string())
    } else {
        Err(GeotrailError::database_config(format!(
            "Cannot infer database type from URL: {}. Supported: sqlite://, mysql://, mariadb://, postgres://",
            database_url
        )))
    }
}

/// 访问日志存储
#[derive(Clone)]
pub struct SeaOrmStorage {
    db: DatabaseConnection,
    backend_name: String,
    retry_config: retry::RetryConfig,
}

impl SeaOrmStorage {
    /// 连接数据库并执行迁移
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let database_url = config.database_url.as_str();
        if database_url.is_empty() {
            return Err(GeotrailError::database_config("database_url is not set"));
        }
        let backend_name = infer_backend_from_url(database_url)?;

        let db = if backend_name == "sqlite" {
            connect_sqlite(database_url).await?
        } else {
            connect_generic(database_url, &backend_name, config.pool_size).await?
        };

        let storage = SeaOrmStorage {
            db,
            backend_name,
            retry_config: retry::RetryConfig {
                max_retries: config.retry_count,
                base_delay_ms: config.retry_base_delay_ms,
                max_delay_ms: config.retry_max_delay_ms,
            },
        };

        run_migrations(&storage.db).await?;

        info!(
            "{} access log storage initialized",
            storage.backend_name.to_uppercase()
        );
        Ok(storage)
    }

    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    pub fn as_access_log_sink(&self) -> Arc<dyn AccessLogSink> {
        Arc::new(self.clone()) as Arc<dyn AccessLogSink>
    }

    pub fn get_db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// 已写入的访问日志条数
    pub async fn count_access_logs(&self) -> Result<u64> {
        Ok(AccessLogEntity::find().count(&self.db).await?)
    }
}
