//! AccessLogSink implementation for SeaOrmStorage

use async_trait::async_trait;
use sea_orm::{ActiveValue::Set, EntityTrait};
use tracing::trace;

use super::SeaOrmStorage;
use super::retry;
use crate::analytics::{AccessLogEntry, AccessLogSink};

use migration::entities::access_log;

/// 与 access_logs 表定长列一致的字符上限
const HOST_MAX_CHARS: usize = 255;
const CLIENT_IP_MAX_CHARS: usize = 45;
const CONTINENT_MAX_CHARS: usize = 16;
const COUNTRY_MAX_CHARS: usize = 64;
const REGION_MAX_CHARS: usize = 128;
const CITY_MAX_CHARS: usize = 128;

/// 截断到最多 `max_chars` 个字符（Host、X-Forwarded-For 由客户端控制）
fn clamp_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((byte_index, _)) => value[..byte_index].to_string(),
        None => value.to_string(),
    }
}

/// AccessLogEntry -> ActiveModel（id 由数据库自增）
pub fn entry_to_active_model(entry: &AccessLogEntry) -> access_log::ActiveModel {
    let location = &entry.location;
    access_log::ActiveModel {
        host: Set(clamp_chars(&entry.host, HOST_MAX_CHARS)),
        path: Set(entry.path.clone()),
        raw_query: Set(entry.raw_query.clone()),
        client_ip: Set(clamp_chars(&entry.client_ip, CLIENT_IP_MAX_CHARS)),
        duration_micros: Set(i64::try_from(entry.duration_micros).unwrap_or(i64::MAX)),
        continent: Set(clamp_chars(&location.continent, CONTINENT_MAX_CHARS)),
        country: Set(clamp_chars(&location.country, COUNTRY_MAX_CHARS)),
        region: Set(clamp_chars(&location.region, REGION_MAX_CHARS)),
        city: Set(clamp_chars(&location.city, CITY_MAX_CHARS)),
        latitude: Set(entry.location.latitude),
        longitude: Set(entry.location.longitude),
        created_at: Set(entry.created_at),
        ..Default::default()
    }
}

#[async_trait]
impl AccessLogSink for SeaOrmStorage {
    async fn persist(&self, entry: AccessLogEntry) -> anyhow::Result<()> {
        let model = entry_to_active_model(&entry);
        let db = &self.db;

        retry::with_retry("persist_access_log", self.retry_config, || {
            let model = model.clone();
            async move { access_log::Entity::insert(model).exec(db).await }
        })
        .await
        .map_err(|e| anyhow::anyhow!("Failed to insert access log: {}", e))?;

        trace!(
            "Access log for {} written to {}",
            entry.client_ip,
            self.backend_name
        );
        Ok(())
    }
}
