//! 客户端 IP 提取
//!
//! 优先级：
//! 1. `X-Forwarded-For` 的第一项（去空白、去端口）
//! 2. `X-Real-IP`
//! 3. 传输层对端地址
//!
//! 配置了 trusted_proxies 时，只有对端命中列表才采信转发头；
//! 列表为空时总是采信（部署在负载均衡之后）。

use std::net::{IpAddr, SocketAddr};

use actix_web::http::header::HeaderMap;
use tracing::trace;

/// 去掉地址中的端口
///
/// - `1.2.3.4:80` -> `1.2.3.4`
/// - `[2001:db8::1]:443` -> `2001:db8::1`
/// - 不带方括号的 IPv6 原样返回
pub fn strip_port(addr: &str) -> &str {
    let addr = addr.trim();
    if let Some(rest) = addr.strip_prefix('[') {
        return rest.split_once(']').map(|(host, _)| host).unwrap_or(addr);
    }
    if addr.matches(':').count() == 1
        && let Some((host, _)) = addr.split_once(':')
    {
        return host;
    }
    addr
}

/// 检查 IP 是否在可信代理列表中（支持单 IP 与 CIDR）
pub fn is_trusted_proxy(ip: &str, trusted_proxies: &[String]) -> bool {
    let ip_addr = match ip.parse::<SocketAddr>() {
        Ok(socket_addr) => socket_addr.ip(),
        Err(_) => match ip.parse::<IpAddr>() {
            Ok(ip_addr) => ip_addr,
            Err(_) => return false,
        },
    };

    trusted_proxies.iter().any(|proxy| {
        if proxy.contains('/') {
            ip_in_cidr(&ip_addr, proxy)
        } else {
            proxy.parse::<IpAddr>().is_ok_and(|p| p == ip_addr)
        }
    })
}

/// CIDR 检查
pub fn ip_in_cidr(ip: &IpAddr, cidr: &str) -> bool {
    let Some((network, prefix_len)) = cidr.split_once('/') else {
        return false;
    };
    let Ok(prefix_len) = prefix_len.parse::<u32>() else {
        return false;
    };
    let Ok(network_addr) = network.parse::<IpAddr>() else {
        return false;
    };

    match (ip, network_addr) {
        (IpAddr::V4(ip), IpAddr::V4(net)) if prefix_len <= 32 => {
            let mask = u32::MAX.checked_shl(32 - prefix_len).unwrap_or(0);
            (u32::from(*ip) & mask) == (u32::from(net) & mask)
        }
        (IpAddr::V6(ip), IpAddr::V6(net)) if prefix_len <= 128 => {
            let mask = u128::MAX.checked_shl(128 - prefix_len).unwrap_or(0);
            (u128::from(*ip) & mask) == (u128::from(net) & mask)
        }
        _ => false,
    }
}

/// 从请求头提取转发的客户端地址
pub fn forwarded_ip_from_headers(headers: &HeaderMap) -> Option<String> {
    let from_header = |name: &str, first_only: bool| {
        headers
            .get(name)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| if first_only { s.split(',').next() } else { Some(s) })
            .map(strip_port)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    from_header("x-forwarded-for", true).or_else(|| from_header("x-real-ip", false))
}

/// 确定请求的客户端地址
///
/// 无任何可用地址时返回空串（解析器会将其视为未知位置）
pub fn extract_client_ip(
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    trusted_proxies: &[String],
) -> String {
    let peer_ip = peer.map(|ip| ip.to_string());

    if !trusted_proxies.is_empty() {
        let trusted = peer_ip
            .as_deref()
            .is_some_and(|ip| is_trusted_proxy(ip, trusted_proxies));
        if !trusted {
            trace!("Peer {:?} is not a trusted proxy, ignoring forwarded headers", peer_ip);
            return peer_ip.unwrap_or_default();
        }
    }

    forwarded_ip_from_headers(headers)
        .or(peer_ip)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut req = TestRequest::default();
        for (name, value) in pairs {
            req = req.insert_header((*name, *value));
        }
        req.to_http_request().headers().clone()
    }

    fn peer() -> Option<IpAddr> {
        Some("10.0.0.5".parse().unwrap())
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("1.2.3.4:8080"), "1.2.3.4");
        assert_eq!(strip_port(" 1.2.3.4 "), "1.2.3.4");
        assert_eq!(strip_port("[2001:db8::1]:443"), "2001:db8::1");
        assert_eq!(strip_port("2001:db8::1"), "2001:db8::1");
        assert_eq!(strip_port("1.2.3.4"), "1.2.3.4");
    }

    #[test]
    fn test_forwarded_for_first_entry_wins() {
        let h = headers(&[
            ("X-Forwarded-For", " 203.0.113.7:5555 , 10.0.0.1"),
            ("X-Real-IP", "198.51.100.1"),
        ]);
        assert_eq!(extract_client_ip(&h, peer(), &[]), "203.0.113.7");
    }

    #[test]
    fn test_real_ip_fallback() {
        let h = headers(&[("X-Real-IP", "198.51.100.1")]);
        assert_eq!(extract_client_ip(&h, peer(), &[]), "198.51.100.1");
    }

    #[test]
    fn test_peer_fallback() {
        let h = headers(&[]);
        assert_eq!(extract_client_ip(&h, peer(), &[]), "10.0.0.5");
        assert_eq!(extract_client_ip(&h, None, &[]), "");
    }

    #[test]
    fn test_empty_forwarded_for_falls_through() {
        let h = headers(&[("X-Forwarded-For", " "), ("X-Real-IP", "198.51.100.1")]);
        assert_eq!(extract_client_ip(&h, peer(), &[]), "198.51.100.1");
    }

    #[test]
    fn test_untrusted_peer_ignores_headers() {
        let h = headers(&[("X-Forwarded-For", "203.0.113.7")]);
        let trusted = vec!["192.168.0.0/16".to_string()];
        assert_eq!(extract_client_ip(&h, peer(), &trusted), "10.0.0.5");

        let trusted = vec!["10.0.0.0/8".to_string()];
        assert_eq!(extract_client_ip(&h, peer(), &trusted), "203.0.113.7");
    }

    #[test]
    fn test_ip_in_cidr() {
        let ip: IpAddr = "192.168.1.100".parse().unwrap();
        assert!(ip_in_cidr(&ip, "192.168.1.0/24"));
        assert!(!ip_in_cidr(&ip, "192.168.2.0/24"));
        assert!(ip_in_cidr(&ip, "0.0.0.0/0"));
        assert!(!ip_in_cidr(&ip, "192.168.1.0/33"));

        let ip: IpAddr = "2001:db8::1".parse().unwrap();
        assert!(ip_in_cidr(&ip, "2001:db8::/32"));
        assert!(!ip_in_cidr(&ip, "2001:db9::/32"));
        assert!(!ip_in_cidr(&ip, "10.0.0.0/8"));
    }

    #[test]
    fn test_is_trusted_proxy() {
        let proxies = vec!["127.0.0.1".to_string(), "192.168.1.0/24".to_string()];
        assert!(is_trusted_proxy("127.0.0.1", &proxies));
        assert!(is_trusted_proxy("127.0.0.1:8080", &proxies));
        assert!(is_trusted_proxy("192.168.1.50", &proxies));
        assert!(!is_trusted_proxy("8.8.8.8", &proxies));
        assert!(!is_trusted_proxy("garbage", &proxies));
    }
}
