use std::fmt;

use crate::services::geoip::LoadError;

#[derive(Debug, Clone)]
pub enum GeotrailError {
    Config(String),
    DatasetLoad(String),
    DatabaseConfig(String),
    DatabaseConnection(String),
    DatabaseOperation(String),
    FileOperation(String),
    Upstream(String),
    Validation(String),
}

impl GeotrailError {
    /// 获取错误代码
    pub fn code(&self) -> &'static str {
        match self {
            GeotrailError::Config(_) => "E001",
            GeotrailError::DatasetLoad(_) => "E002",
            GeotrailError::DatabaseConfig(_) => "E003",
            GeotrailError::DatabaseConnection(_) => "E004",
            GeotrailError::DatabaseOperation(_) => "E005",
            GeotrailError::FileOperation(_) => "E006",
            GeotrailError::Upstream(_) => "E007",
            GeotrailError::Validation(_) => "E008",
        }
    }

    /// 获取错误类型名称
    pub fn error_type(&self) -> &'static str {
        match self {
            GeotrailError::Config(_) => "Configuration Error",
            GeotrailError::DatasetLoad(_) => "Dataset Load Error",
            GeotrailError::DatabaseConfig(_) => "Database Configuration Error",
            GeotrailError::DatabaseConnection(_) => "Database Connection Error",
            GeotrailError::DatabaseOperation(_) => "Database Operation Error",
            GeotrailError::FileOperation(_) => "File Operation Error",
            GeotrailError::Upstream(_) => "Upstream Error",
            GeotrailError::Validation(_) => "Validation Error",
        }
    }

    /// 获取错误详情
    pub fn message(&self) -> &str {
        match self {
            GeotrailError::Config(msg)
            | GeotrailError::DatasetLoad(msg)
            | GeotrailError::DatabaseConfig(msg)
            | GeotrailError::DatabaseConnection(msg)
            | GeotrailError::DatabaseOperation(msg)
            | GeotrailError::FileOperation(msg)
            | GeotrailError::Upstream(msg)
            | GeotrailError::Validation(msg) => msg,
        }
    }

    /// 格式化为彩色输出（用于 Server 模式）
    pub fn format_colored(&self) -> String {
        use colored::Colorize;
        format!(
            "{} {} {}\n  {}",
            "[ERROR]".red().bold(),
            self.code().yellow(),
            self.error_type().red(),
            self.message().white()
        )
    }

    /// 格式化为简洁输出（用于 CLI 模式）
    pub fn format_simple(&self) -> String {
        format!("{}: {}", self.error_type(), self.message())
    }
}

impl fmt::Display for GeotrailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_simple())
    }
}

impl std::error::Error for GeotrailError {}

// 便捷的构造函数
impl GeotrailError {
    pub fn config<T: Into<String>>(msg: T) -> Self {
        GeotrailError::Config(msg.into())
    }

    pub fn database_config<T: Into<String>>(msg: T) -> Self {
        GeotrailError::DatabaseConfig(msg.into())
    }

    pub fn database_connection<T: Into<String>>(msg: T) -> Self {
        GeotrailError::DatabaseConnection(msg.into())
    }

    pub fn database_operation<T: Into<String>>(msg: T) -> Self {
        GeotrailError::DatabaseOperation(msg.into())
    }

    pub fn upstream<T: Into<String>>(msg: T) -> Self {
        GeotrailError::Upstream(msg.into())
    }

    pub fn validation<T: Into<String>>(msg: T) -> Self {
        GeotrailError::Validation(msg.into())
    }
}

impl From<sea_orm::DbErr> for GeotrailError {
    fn from(err: sea_orm::DbErr) -> Self {
        GeotrailError::DatabaseOperation(err.to_string())
    }
}

impl From<std::io::Error> for GeotrailError {
    fn from(err: std::io::Error) -> Self {
        GeotrailError::FileOperation(err.to_string())
    }
}

impl From<LoadError> for GeotrailError {
    fn from(err: LoadError) -> Self {
        GeotrailError::DatasetLoad(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GeotrailError>;
