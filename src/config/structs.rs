use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::{GeotrailError, Result};

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// 环境变量前缀（GEOTRAIL__SECTION__KEY）
pub const ENV_PREFIX: &str = "GEOTRAIL";

/// 静态配置
///
/// - server: 监听地址、端口、worker 数量
/// - upstream: 转发目标
/// - geoip: 区间数据集
/// - telemetry: 遥测队列与 worker 池
/// - database: 访问日志存储
/// - logging: 日志输出
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StaticConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub geoip: GeoipConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl StaticConfig {
    /// 从 TOML 文件和环境变量加载配置，失败时回退到默认值
    ///
    /// 优先级：ENV > 配置文件 > 默认值
    /// 示例：GEOTRAIL__SERVER__PORT=9999
    pub fn load(path: Option<&str>) -> Self {
        let path = path.unwrap_or(DEFAULT_CONFIG_PATH);
        match Self::try_load(path) {
            Ok(config) => {
                if std::path::Path::new(path).exists() {
                    eprintln!("[INFO] Configuration loaded from: {}", path);
                }
                config
            }
            Err(e) => {
                eprintln!("[ERROR] Failed to load config: {}", e);
                let mut config = Self::default();
                config.apply_legacy_overrides(|key| std::env::var(key).ok());
                config
            }
        }
    }

    /// 加载配置并返回错误
    pub fn try_load(path: &str) -> std::result::Result<Self, config::ConfigError> {
        use config::{Config, Environment, File};

        let settings = Config::builder()
            // 1. TOML 文件（可选）
            .add_source(File::with_name(path).required(false))
            // 2. 环境变量覆盖
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("telemetry.trusted_proxies")
                    .try_parsing(true),
            )
            .build()?;

        let mut config = settings.try_deserialize::<StaticConfig>()?;
        config.apply_legacy_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// 兼容旧部署的环境变量
    ///
    /// - `PROXY_TARGET` 覆盖 `upstream.target`
    /// - 设置了 `DB_HOST` 时由 `DB_*` 拼出 PostgreSQL URL
    pub fn apply_legacy_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(target) = lookup("PROXY_TARGET").filter(|t| !t.is_empty()) {
            self.upstream.target = target;
        }

        let Some(host) = lookup("DB_HOST").filter(|h| !h.is_empty()) else {
            return;
        };
        let port = lookup("DB_PORT")
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(5432);
        let user = lookup("DB_USER").unwrap_or_default();
        let password = lookup("DB_PASSWORD").unwrap_or_default();
        let name = lookup("DB_NAME").unwrap_or_default();

        match build_postgres_url(&host, port, &user, &password, &name) {
            Some(url) => self.database.database_url = url,
            None => eprintln!("[WARN] Ignoring DB_* variables, cannot build a URL for host {}", host),
        }
    }

    /// 启动前校验
    pub fn validate(&self) -> Result<()> {
        let target = Url::parse(&self.upstream.target).map_err(|e| {
            GeotrailError::validation(format!(
                "upstream.target '{}' is not a valid URL: {}",
                self.upstream.target, e
            ))
        })?;
        if !matches!(target.scheme(), "http" | "https") {
            return Err(GeotrailError::validation(format!(
                "upstream.target must use http or https, got '{}'",
                target.scheme()
            )));
        }
        if self.geoip.dataset_path.is_empty() {
            return Err(GeotrailError::validation("geoip.dataset_path is empty"));
        }
        if self.geoip.progress_step_percent > 100 {
            return Err(GeotrailError::validation(
                "geoip.progress_step_percent must be between 0 and 100",
            ));
        }
        if self.telemetry.workers == 0 {
            return Err(GeotrailError::validation("telemetry.workers must be at least 1"));
        }
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(GeotrailError::validation(format!(
                "logging.format must be 'text' or 'json', got '{}'",
                self.logging.format
            )));
        }
        Ok(())
    }

    /// 生成示例 TOML 配置文件
    pub fn generate_sample_config() -> String {
        let sample_config = Self::default();
        toml::to_string_pretty(&sample_config)
            .unwrap_or_else(|e| format!("Error generating sample config: {}", e))
    }

    /// 保存配置到 TOML 文件
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| GeotrailError::config(format!("Cannot serialize config: {}", e)))?;

        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }
}

fn build_postgres_url(host: &str, port: u16, user: &str, password: &str, name: &str) -> Option<String> {
    let mut url = Url::parse("postgres://localhost/").ok()?;
    url.set_host(Some(host)).ok()?;
    url.set_port(Some(port)).ok()?;
    if !user.is_empty() {
        url.set_username(user).ok()?;
    }
    if !password.is_empty() {
        url.set_password(Some(password)).ok()?;
    }
    url.set_path(name);
    url.set_query(Some("sslmode=disable"));
    Some(url.to_string())
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    #[serde(default = "default_cpu_count")]
    pub cpu_count: usize,
}

/// 转发目标配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_target")]
    pub target: String,
    #[serde(default = "default_upstream_timeout_secs")]
    pub timeout_secs: u64,
    /// 单个请求 body 上限（字节）
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// IP 区间数据集配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoipConfig {
    #[serde(default = "default_dataset_path")]
    pub dataset_path: String,
    /// 加载进度日志间隔（百分比，0 关闭）
    #[serde(default = "default_progress_step_percent")]
    pub progress_step_percent: u8,
}

/// 遥测配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,
    /// 队列容量，0 表示丢弃全部事件
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_telemetry_workers")]
    pub workers: usize,
    #[serde(default = "default_persist_timeout_ms")]
    pub persist_timeout_ms: u64,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// 可信代理 IP / CIDR；为空时总是信任转发头
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
}

/// 数据库连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_database_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_log_file")]
    pub file: Option<String>,
    #[serde(default = "default_max_backups")]
    pub max_backups: u32,
    #[serde(default = "default_enable_rotation")]
    pub enable_rotation: bool,
}

// ============================================================
// Default value functions for static config
// ============================================================

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    3001
}

fn default_cpu_count() -> usize {
    num_cpus::get()
}

fn default_upstream_target() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_upstream_timeout_secs() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_dataset_path() -> String {
    "dbip-city-lite.csv".to_string()
}

fn default_progress_step_percent() -> u8 {
    10
}

fn default_telemetry_enabled() -> bool {
    true
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_telemetry_workers() -> usize {
    4
}

fn default_persist_timeout_ms() -> u64 {
    5000
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

fn default_database_url() -> String {
    "geotrail.db".to_string()
}

fn default_database_pool_size() -> u32 {
    10
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    100
}

fn default_retry_max_delay_ms() -> u64 {
    2000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_log_file() -> Option<String> {
    None
}

fn default_max_backups() -> u32 {
    5
}

fn default_enable_rotation() -> bool {
    true
}

// ============================================================
// Default implementations
// ============================================================

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            cpu_count: default_cpu_count(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            target: default_upstream_target(),
            timeout_secs: default_upstream_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for GeoipConfig {
    fn default() -> Self {
        Self {
            dataset_path: default_dataset_path(),
            progress_step_percent: default_progress_step_percent(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_telemetry_enabled(),
            queue_capacity: default_queue_capacity(),
            workers: default_telemetry_workers(),
            persist_timeout_ms: default_persist_timeout_ms(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            trusted_proxies: Vec::new(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            pool_size: default_database_pool_size(),
            retry_count: default_retry_count(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: default_log_file(),
            max_backups: default_max_backups(),
            enable_rotation: default_enable_rotation(),
        }
    }
}
