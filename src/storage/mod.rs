use std::sync::Arc;

use crate::errors::Result;

pub mod backend;

pub use backend::SeaOrmStorage;

pub struct StorageFactory;

impl StorageFactory {
    /// 按全局配置创建存储
    pub async fn create() -> Result<Arc<SeaOrmStorage>> {
        let config = crate::config::get_config();
        let storage = SeaOrmStorage::new(&config.database).await?;
        Ok(Arc::new(storage))
    }
}
