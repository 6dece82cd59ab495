//! 地址解析器
//!
//! 对客户端地址做点查询，解析失败或无区间命中都视为未知位置，
//! 不会向调用方返回错误。

use std::sync::Arc;

use tracing::debug;

use super::codec;
use super::range_table::{Location, RangeTable};

/// 共享的只读解析器（`Clone` 只复制 Arc）
#[derive(Debug, Clone)]
pub struct Resolver {
    table: Arc<RangeTable>,
}

impl Resolver {
    pub fn new(table: Arc<RangeTable>) -> Self {
        Self { table }
    }

    /// 查询地址所在区间的位置
    pub fn resolve(&self, address: &str) -> Option<&Location> {
        let (family, value) = match codec::parse(address) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("Resolver: {}, treating as unknown", e);
                return None;
            }
        };

        let location = self.table.lookup(family, value);
        match location {
            Some(loc) => debug!(
                "Location found for IP: {}, City: {}, Country: {}, Continent: {}",
                address, loc.city, loc.country, loc.continent
            ),
            None => debug!("No location found for IP: {}", address),
        }
        location
    }

    /// 查询地址位置，未命中时返回空位置
    pub fn resolve_or_unknown(&self, address: &str) -> Location {
        self.resolve(address).cloned().unwrap_or_default()
    }

    pub fn table(&self) -> &RangeTable {
        &self.table
    }
}
