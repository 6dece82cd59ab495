//! IP 地址编码
//!
//! 将文本形式的 IPv4 / IPv6 地址转换为 `u128` 整数，用于区间比较：
//! - 包含 `:` 视为 IPv6，否则视为 IPv4（不做 fallback 解析）
//! - IPv4 编码为 32 位大端值，与 IPv6 共用 `u128` 表示
//! - 两种地址族之间从不比较，区间查找按地址族分开进行

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::Serialize;
use thiserror::Error;

/// 地址族
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    /// 根据文本判断地址族：含冒号即 IPv6
    #[inline]
    pub fn detect(text: &str) -> Self {
        if text.contains(':') {
            AddressFamily::V6
        } else {
            AddressFamily::V4
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::V4 => write!(f, "ipv4"),
            AddressFamily::V6 => write!(f, "ipv6"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {family} address: {text:?}")]
pub struct AddressError {
    pub family: AddressFamily,
    pub text: String,
}

/// 解析地址文本为 (地址族, 整数值)
pub fn parse(text: &str) -> Result<(AddressFamily, u128), AddressError> {
    let family = AddressFamily::detect(text);
    let value = match family {
        AddressFamily::V6 => text.parse::<Ipv6Addr>().map(u128::from).ok(),
        AddressFamily::V4 => text
            .parse::<Ipv4Addr>()
            .map(|v4| u128::from(u32::from(v4)))
            .ok(),
    };

    value.map(|v| (family, v)).ok_or_else(|| AddressError {
        family,
        text: text.to_string(),
    })
}

/// 将整数值还原为地址；IPv4 超出 32 位时返回 None
pub fn decode(family: AddressFamily, value: u128) -> Option<IpAddr> {
    match family {
        AddressFamily::V4 => u32::try_from(value)
            .ok()
            .map(|v| IpAddr::V4(Ipv4Addr::from(v))),
        AddressFamily::V6 => Some(IpAddr::V6(Ipv6Addr::from(value))),
    }
}
