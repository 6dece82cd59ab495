//! GeoIP 模块
//!
//! 基于本地 IP 区间数据集的地理位置查询：
//! - `codec`: 地址文本与整数互转
//! - `range_table`: 按地址族排序的不可变区间表
//! - `dataset`: 从分隔文本加载区间表
//! - `resolver`: 面向请求的点查询

pub mod codec;
mod dataset;
mod range_table;
mod resolver;

pub use codec::{AddressError, AddressFamily};
pub use dataset::{DatasetLoader, LoadSummary, REQUIRED_FIELDS};
pub use range_table::{AddressRange, LoadError, Location, RangeTable};
pub use resolver::Resolver;
