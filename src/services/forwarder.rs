//! 上游转发
//!
//! 代理核心只依赖 `Forwarder` trait；`HttpForwarder` 是基于 reqwest 的实现：
//! - 将请求改写到固定上游（保留 path + query）
//! - 追加 X-Forwarded-Host / X-Origin-Host / X-Forwarded-For
//! - 双向剔除 hop-by-hop 头，不跟随重定向
//! - 上游响应完整缓冲后返回，状态码与 body 原样透传

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, trace};
use url::Url;

use crate::errors::{GeotrailError, Result};

/// 转发给上游的请求
#[derive(Debug, Clone, Default)]
pub struct ProxyRequest {
    pub method: String,
    /// 形如 `/path?query`
    pub path_and_query: String,
    pub headers: Vec<(String, Vec<u8>)>,
    pub body: Bytes,
    /// 入站 Host 头
    pub host: Option<String>,
    /// 传输层对端地址（不含端口）
    pub peer_ip: Option<String>,
}

/// 上游响应
#[derive(Debug, Clone, Default)]
pub struct ProxyResponse {
    pub status: u16,
    pub headers: Vec<(String, Vec<u8>)>,
    pub body: Bytes,
}

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("upstream timed out after {0} ms")]
    Timeout(u64),

    #[error("cannot connect to upstream: {0}")]
    Connect(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("upstream error: {0}")]
    Upstream(String),
}

/// 转发协作方
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, request: ProxyRequest) -> std::result::Result<ProxyResponse, ForwardError>;
}

/// 判断是否为 hop-by-hop 头（不应跨代理转发）
pub fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// 基于 reqwest 的单上游转发器
pub struct HttpForwarder {
    client: reqwest::Client,
    base: String,
    origin_host: String,
    timeout: Duration,
}

impl HttpForwarder {
    pub fn new(target: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(target).map_err(|e| {
            GeotrailError::config(format!("Invalid upstream target '{}': {}", target, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(GeotrailError::config(format!(
                "Unsupported upstream scheme '{}', expected http or https",
                url.scheme()
            )));
        }
        let Some(host) = url.host_str() else {
            return Err(GeotrailError::config(format!(
                "Upstream target '{}' has no host",
                target
            )));
        };
        let origin_host = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(100)
            .build()
            .map_err(|e| GeotrailError::upstream(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base: url.as_str().trim_end_matches('/').to_string(),
            origin_host,
            timeout,
        })
    }

    /// 上游 URL（base + path + query）
    pub fn upstream_url(&self, path_and_query: &str) -> String {
        if path_and_query.starts_with('/') {
            format!("{}{}", self.base, path_and_query)
        } else {
            format!("{}/{}", self.base, path_and_query)
        }
    }

    fn map_error(&self, e: reqwest::Error) -> ForwardError {
        if e.is_timeout() {
            ForwardError::Timeout(self.timeout.as_millis() as u64)
        } else if e.is_connect() {
            ForwardError::Connect(e.to_string())
        } else if e.is_builder() {
            ForwardError::InvalidRequest(e.to_string())
        } else {
            ForwardError::Upstream(e.to_string())
        }
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(&self, request: ProxyRequest) -> std::result::Result<ProxyResponse, ForwardError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| ForwardError::InvalidRequest(e.to_string()))?;
        let url = self.upstream_url(&request.path_and_query);
        trace!("Forwarding {} {}", method, url);

        let mut builder = self.client.request(method, &url);

        let mut forwarded_for: Option<String> = None;
        for (name, value) in &request.headers {
            let lower = name.to_ascii_lowercase();
            if is_hop_by_hop(&lower) || lower == "host" || lower == "content-length" {
                continue;
            }
            if lower == "x-forwarded-for" {
                forwarded_for = String::from_utf8(value.clone()).ok();
                continue;
            }
            builder = builder.header(name.as_str(), value.as_slice());
        }

        if let Some(ref host) = request.host {
            builder = builder.header("X-Forwarded-Host", host.as_str());
        }
        builder = builder.header("X-Origin-Host", self.origin_host.as_str());

        let forwarded_for = match (forwarded_for, request.peer_ip) {
            (Some(prior), Some(peer)) => Some(format!("{}, {}", prior, peer)),
            (prior, peer) => prior.or(peer),
        };
        if let Some(ref chain) = forwarded_for {
            builder = builder.header("X-Forwarded-For", chain.as_str());
        }

        let response = builder
            .body(request.body)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect();
        let body = response.bytes().await.map_err(|e| self.map_error(e))?;

        debug!("Upstream responded {} for {} ({} bytes)", status, url, body.len());

        Ok(ProxyResponse {
            status,
            headers,
            body,
        })
    }
}
