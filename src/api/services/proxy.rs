//! 反向代理处理器
//!
//! 作为 `default_service` 接收所有请求，交给 `Forwarder` 转发，
//! 上游响应原样返回；转发失败时返回 502，超时返回 504。

use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponse, web};
use tracing::{error, trace};

use crate::services::forwarder::{ForwardError, Forwarder, ProxyRequest, ProxyResponse};

pub struct ProxyService;

impl ProxyService {
    pub async fn handle(
        req: HttpRequest,
        body: web::Bytes,
        forwarder: web::Data<Arc<dyn Forwarder>>,
    ) -> HttpResponse {
        let request = Self::to_proxy_request(&req, body);
        let target = request.path_and_query.clone();

        match forwarder.forward(request).await {
            Ok(response) => {
                trace!("Proxied {} {} -> {}", req.method(), target, response.status);
                Self::to_http_response(response)
            }
            Err(e @ ForwardError::Timeout(_)) => {
                error!("Upstream timeout for {} {}: {}", req.method(), target, e);
                HttpResponse::GatewayTimeout().finish()
            }
            Err(e) => {
                error!("Proxy error for {} {}: {}", req.method(), target, e);
                HttpResponse::BadGateway().finish()
            }
        }
    }

    fn to_proxy_request(req: &HttpRequest, body: web::Bytes) -> ProxyRequest {
        let headers = req
            .headers()
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect();
        let host = req
            .headers()
            .get(actix_web::http::header::HOST)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);

        ProxyRequest {
            method: req.method().as_str().to_string(),
            path_and_query: req
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string()),
            headers,
            body,
            host,
            peer_ip: req.peer_addr().map(|addr| addr.ip().to_string()),
        }
    }

    fn to_http_response(response: ProxyResponse) -> HttpResponse {
        let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
        let mut builder = HttpResponse::build(status);
        for (name, value) in &response.headers {
            // actix 根据 body 重新计算长度
            if name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            builder.append_header((name.as_str(), value.as_slice()));
        }
        builder.body(response.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::{self, TestRequest};
    use actix_web::{App, body::to_bytes};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex;

    struct EchoForwarder {
        seen: Mutex<Vec<ProxyRequest>>,
    }

    #[async_trait]
    impl Forwarder for EchoForwarder {
        async fn forward(&self, request: ProxyRequest) -> Result<ProxyResponse, ForwardError> {
            let body = request.body.clone();
            self.seen.lock().unwrap().push(request);
            Ok(ProxyResponse {
                status: 201,
                headers: vec![("x-upstream".to_string(), b"yes".to_vec())],
                body,
            })
        }
    }

    struct FailingForwarder(fn() -> ForwardError);

    #[async_trait]
    impl Forwarder for FailingForwarder {
        async fn forward(&self, _request: ProxyRequest) -> Result<ProxyResponse, ForwardError> {
            Err((self.0)())
        }
    }

    fn data(forwarder: impl Forwarder + 'static) -> web::Data<Arc<dyn Forwarder>> {
        web::Data::new(Arc::new(forwarder) as Arc<dyn Forwarder>)
    }

    #[actix_web::test]
    async fn test_response_passes_through() {
        let forwarder = Arc::new(EchoForwarder {
            seen: Mutex::new(Vec::new()),
        });
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(forwarder.clone() as Arc<dyn Forwarder>))
                .default_service(web::to(ProxyService::handle)),
        )
        .await;

        let req = TestRequest::post()
            .uri("/api/items?page=2")
            .insert_header(("Host", "shop.example"))
            .set_payload("hello")
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(resp.headers().get("x-upstream").unwrap(), "yes");
        let body = to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"hello"));

        let seen = forwarder.seen.lock().unwrap();
        assert_eq!(seen[0].method, "POST");
        assert_eq!(seen[0].path_and_query, "/api/items?page=2");
        assert_eq!(seen[0].host.as_deref(), Some("shop.example"));
    }

    #[actix_web::test]
    async fn test_forward_failure_maps_to_bad_gateway() {
        let app = test::init_service(
            App::new()
                .app_data(data(FailingForwarder(|| {
                    ForwardError::Connect("refused".to_string())
                })))
                .default_service(web::to(ProxyService::handle)),
        )
        .await;

        let resp = test::call_service(&app, TestRequest::get().uri("/").to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[actix_web::test]
    async fn test_forward_timeout_maps_to_gateway_timeout() {
        let app = test::init_service(
            App::new()
                .app_data(data(FailingForwarder(|| ForwardError::Timeout(30_000))))
                .default_service(web::to(ProxyService::handle)),
        )
        .await;

        let resp = test::call_service(&app, TestRequest::get().uri("/slow").to_request()).await;
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
