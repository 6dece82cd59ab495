//! IP 区间表
//!
//! 启动时一次性构建、此后只读的区间集合：
//! - 按地址族拆分为两个序列，各自按 lower 升序排列
//! - 同一地址族内区间两两不重叠（构建时校验，违反即报错）
//! - 点查询使用二分查找：找到最大的 `lower <= value`，再检查 `value <= upper`

use std::io;

use serde::Serialize;
use thiserror::Error;

use super::codec::{self, AddressFamily};

/// 地理位置信息
///
/// 所有字段为空时表示未知位置（`Location::default()`）
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Location {
    pub continent: String,
    pub country: String,
    pub region: String,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    /// 是否为未知位置
    pub fn is_unknown(&self) -> bool {
        self.continent.is_empty()
            && self.country.is_empty()
            && self.region.is_empty()
            && self.city.is_empty()
    }
}

/// 一个连续地址区间及其位置
#[derive(Debug, Clone, PartialEq)]
pub struct AddressRange {
    pub family: AddressFamily,
    pub lower: u128,
    pub upper: u128,
    pub location: Location,
}

impl AddressRange {
    #[inline]
    pub fn contains(&self, value: u128) -> bool {
        self.lower <= value && value <= self.upper
    }

    /// 以文本形式描述区间，用于错误信息
    pub fn describe(&self) -> String {
        let render = |v: u128| {
            codec::decode(self.family, v)
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| v.to_string())
        };
        format!("{}-{}", render(self.lower), render(self.upper))
    }
}

/// 数据集加载错误（启动期致命）
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read dataset: {0}")]
    Io(#[from] io::Error),

    #[error("malformed dataset file: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid coordinate {value:?} at row {row}")]
    Coordinate { row: u64, value: String },

    #[error("range {range} has lower bound above upper bound")]
    InvertedRange { range: String },

    #[error("overlapping {family} ranges: {first} and {second}")]
    Overlap {
        family: AddressFamily,
        first: String,
        second: String,
    },
}

/// 不可变区间表
#[derive(Debug, Default)]
pub struct RangeTable {
    v4: Vec<AddressRange>,
    v6: Vec<AddressRange>,
}

impl RangeTable {
    /// 从区间列表构建（输入顺序任意）
    ///
    /// 构建时会排序并校验：
    /// - 每个区间 `lower <= upper`
    /// - 同一地址族内区间不重叠
    pub fn from_ranges(ranges: Vec<AddressRange>) -> Result<Self, LoadError> {
        let mut v4 = Vec::new();
        let mut v6 = Vec::new();

        for range in ranges {
            if range.lower > range.upper {
                return Err(LoadError::InvertedRange {
                    range: range.describe(),
                });
            }
            match range.family {
                AddressFamily::V4 => v4.push(range),
                AddressFamily::V6 => v6.push(range),
            }
        }

        Self::sort_and_validate(&mut v4, AddressFamily::V4)?;
        Self::sort_and_validate(&mut v6, AddressFamily::V6)?;

        Ok(Self { v4, v6 })
    }

    fn sort_and_validate(
        ranges: &mut [AddressRange],
        family: AddressFamily,
    ) -> Result<(), LoadError> {
        ranges.sort_unstable_by_key(|r| r.lower);

        if let Some(pair) = ranges.windows(2).find(|w| w[1].lower <= w[0].upper) {
            return Err(LoadError::Overlap {
                family,
                first: pair[0].describe(),
                second: pair[1].describe(),
            });
        }
        Ok(())
    }

    #[inline]
    fn ranges(&self, family: AddressFamily) -> &[AddressRange] {
        match family {
            AddressFamily::V4 => &self.v4,
            AddressFamily::V6 => &self.v6,
        }
    }

    /// 二分查找包含 value 的区间
    pub fn lookup(&self, family: AddressFamily, value: u128) -> Option<&Location> {
        let ranges = self.ranges(family);
        // 第一个 lower > value 的位置，前一个即为候选
        let idx = ranges.partition_point(|r| r.lower <= value);
        let candidate = ranges.get(idx.checked_sub(1)?)?;
        (value <= candidate.upper).then_some(&candidate.location)
    }

    /// 线性扫描查找，仅作为二分查找的对照基线
    pub fn lookup_linear(&self, family: AddressFamily, value: u128) -> Option<&Location> {
        self.ranges(family)
            .iter()
            .find(|r| r.contains(value))
            .map(|r| &r.location)
    }

    /// 某个地址族的区间数量
    pub fn family_len(&self, family: AddressFamily) -> usize {
        self.ranges(family).len()
    }

    pub fn len(&self) -> usize {
        self.v4.len() + self.v6.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
