//! 代理 + 遥测中间件端到端测试
//!
//! 上游由 mock Forwarder 代替，访问日志写入内存 sink

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use actix_web::{App, test, web};
use async_trait::async_trait;
use bytes::Bytes;

use geotrail::analytics::{
    AccessLogEntry, AccessLogSink, DispatcherConfig, TelemetryDispatcher, WorkerPool,
};
use geotrail::api::middleware::TelemetryMiddleware;
use geotrail::api::services::ProxyService;
use geotrail::services::{
    DatasetLoader, ForwardError, Forwarder, ProxyRequest, ProxyResponse, Resolver,
};

const DATASET: &str = "1.2.3.0,1.2.3.255,EU,FR,Ile-de-France,Paris,48.8534,2.3488\n";

#[derive(Default)]
struct MemorySink {
    entries: Mutex<Vec<AccessLogEntry>>,
}

#[async_trait]
impl AccessLogSink for MemorySink {
    async fn persist(&self, entry: AccessLogEntry) -> anyhow::Result<()> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }
}

/// 记录收到的请求并返回固定响应
#[derive(Default)]
struct EchoForwarder {
    seen: Mutex<Vec<ProxyRequest>>,
}

#[async_trait]
impl Forwarder for EchoForwarder {
    async fn forward(&self, request: ProxyRequest) -> Result<ProxyResponse, ForwardError> {
        let body = Bytes::from(format!("upstream saw {}", request.path_and_query));
        self.seen.lock().unwrap().push(request);
        Ok(ProxyResponse {
            status: 201,
            headers: vec![("x-upstream".to_string(), b"yes".to_vec())],
            body,
        })
    }
}

/// 每次写入都要等待 `delay`
struct SlowSink {
    delay: Duration,
    entries: Mutex<Vec<AccessLogEntry>>,
}

#[async_trait]
impl AccessLogSink for SlowSink {
    async fn persist(&self, entry: AccessLogEntry) -> anyhow::Result<()> {
        tokio::time::sleep(self.delay).await;
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }
}

struct FailingForwarder;

#[async_trait]
impl Forwarder for FailingForwarder {
    async fn forward(&self, _request: ProxyRequest) -> Result<ProxyResponse, ForwardError> {
        Err(ForwardError::Timeout(10))
    }
}

fn resolver() -> Resolver {
    let (table, _) = DatasetLoader::new(0)
        .load_reader(DATASET.as_bytes(), None)
        .unwrap();
    Resolver::new(Arc::new(table))
}

fn spawn_dispatcher(
    queue_capacity: usize,
    sink: Arc<MemorySink>,
) -> (TelemetryDispatcher, WorkerPool) {
    let config = DispatcherConfig {
        queue_capacity,
        workers: 2,
        persist_timeout: Duration::from_secs(2),
    };
    TelemetryDispatcher::spawn(config, resolver(), sink)
}

#[actix_web::test]
async fn test_response_is_untouched_and_access_log_is_written() {
    let sink = Arc::new(MemorySink::default());
    let (dispatcher, pool) = spawn_dispatcher(16, sink.clone());
    let echo = Arc::new(EchoForwarder::default());
    let forwarder: Arc<dyn Forwarder> = echo.clone();

    let app = test::init_service(
        App::new()
            .wrap(TelemetryMiddleware::new(dispatcher, Vec::new()))
            .app_data(web::Data::new(forwarder))
            .default_service(web::to(ProxyService::handle)),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/products/42?color=red&size=m")
        .insert_header(("Host", "shop.example.com"))
        .insert_header(("X-Forwarded-For", "1.2.3.77, 10.0.0.1"))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status().as_u16(), 201);
    assert_eq!(resp.headers().get("x-upstream").unwrap(), "yes");
    let body = test::read_body(resp).await;
    assert_eq!(body, Bytes::from("upstream saw /products/42?color=red&size=m"));

    let stats = pool.shutdown(Duration::from_secs(5)).await;
    assert_eq!(stats.enqueued, 1);
    assert_eq!(stats.persisted, 1);

    let entries = sink.entries.lock().unwrap();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.host, "shop.example.com");
    assert_eq!(entry.path, "/products/42");
    assert_eq!(entry.raw_query, "color=red&size=m");
    assert_eq!(entry.client_ip, "1.2.3.77");
    assert_eq!(entry.location.city, "Paris");
    assert_eq!(entry.location.country, "FR");

    let seen = echo.seen.lock().unwrap();
    assert_eq!(seen[0].host.as_deref(), Some("shop.example.com"));
}

#[actix_web::test]
async fn test_unknown_caller_is_still_logged() {
    let sink = Arc::new(MemorySink::default());
    let (dispatcher, pool) = spawn_dispatcher(16, sink.clone());
    let forwarder: Arc<dyn Forwarder> = Arc::new(EchoForwarder::default());

    let app = test::init_service(
        App::new()
            .wrap(TelemetryMiddleware::new(dispatcher, Vec::new()))
            .app_data(web::Data::new(forwarder))
            .default_service(web::to(ProxyService::handle)),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/submit")
        .insert_header(("X-Real-IP", "203.0.113.9"))
        .set_payload("payload")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 201);

    pool.shutdown(Duration::from_secs(5)).await;

    let entries = sink.entries.lock().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].client_ip, "203.0.113.9");
    assert_eq!(entries[0].raw_query, "");
    assert!(entries[0].location.is_unknown());
}

#[actix_web::test]
async fn test_upstream_failure_is_logged_and_mapped() {
    let sink = Arc::new(MemorySink::default());
    let (dispatcher, pool) = spawn_dispatcher(16, sink.clone());
    let forwarder: Arc<dyn Forwarder> = Arc::new(FailingForwarder);

    let app = test::init_service(
        App::new()
            .wrap(TelemetryMiddleware::new(dispatcher, Vec::new()))
            .app_data(web::Data::new(forwarder))
            .default_service(web::to(ProxyService::handle)),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/slow")
        .insert_header(("X-Forwarded-For", "1.2.3.4"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 504);

    let stats = pool.shutdown(Duration::from_secs(5)).await;
    assert_eq!(stats.persisted, 1);
    assert_eq!(sink.entries.lock().unwrap()[0].path, "/slow");
}

#[actix_web::test]
async fn test_zero_capacity_still_serves_requests() {
    let sink = Arc::new(MemorySink::default());
    let (dispatcher, pool) = spawn_dispatcher(0, sink.clone());
    let forwarder: Arc<dyn Forwarder> = Arc::new(EchoForwarder::default());

    let app = test::init_service(
        App::new()
            .wrap(TelemetryMiddleware::new(dispatcher, Vec::new()))
            .app_data(web::Data::new(forwarder))
            .default_service(web::to(ProxyService::handle)),
    )
    .await;

    for _ in 0..3 {
        let req = test::TestRequest::get().uri("/ping").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 201);
    }

    let stats = pool.shutdown(Duration::from_secs(1)).await;
    assert_eq!(stats.enqueued, 0);
    assert_eq!(stats.dropped, 3);
    assert!(sink.entries.lock().unwrap().is_empty());
}

#[actix_web::test]
async fn test_untrusted_peer_cannot_spoof_forwarded_for() {
    let sink = Arc::new(MemorySink::default());
    let (dispatcher, pool) = spawn_dispatcher(16, sink.clone());
    let forwarder: Arc<dyn Forwarder> = Arc::new(EchoForwarder::default());

    let app = test::init_service(
        App::new()
            .wrap(TelemetryMiddleware::new(
                dispatcher,
                vec!["10.0.0.0/8".to_string()],
            ))
            .app_data(web::Data::new(forwarder))
            .default_service(web::to(ProxyService::handle)),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/")
        .peer_addr("198.51.100.7:40000".parse().unwrap())
        .insert_header(("X-Forwarded-For", "1.2.3.4"))
        .to_request();
    test::call_service(&app, req).await;

    let req = test::TestRequest::get()
        .uri("/")
        .peer_addr("10.1.2.3:40000".parse().unwrap())
        .insert_header(("X-Forwarded-For", "1.2.3.4"))
        .to_request();
    test::call_service(&app, req).await;

    pool.shutdown(Duration::from_secs(5)).await;

    let entries = sink.entries.lock().unwrap();
    let mut ips: Vec<&str> = entries.iter().map(|e| e.client_ip.as_str()).collect();
    ips.sort_unstable();
    assert_eq!(ips, vec!["1.2.3.4", "198.51.100.7"]);
}

#[actix_web::test]
async fn test_slow_sink_does_not_delay_responses() {
    let sink = Arc::new(SlowSink {
        delay: Duration::from_millis(500),
        entries: Mutex::new(Vec::new()),
    });
    let config = DispatcherConfig {
        queue_capacity: 16,
        workers: 2,
        persist_timeout: Duration::from_secs(5),
    };
    let (dispatcher, pool) = TelemetryDispatcher::spawn(config, resolver(), sink.clone());
    let forwarder: Arc<dyn Forwarder> = Arc::new(EchoForwarder::default());

    let app = test::init_service(
        App::new()
            .wrap(TelemetryMiddleware::new(dispatcher, Vec::new()))
            .app_data(web::Data::new(forwarder))
            .default_service(web::to(ProxyService::handle)),
    )
    .await;

    let start = Instant::now();
    for i in 0..3 {
        let req = test::TestRequest::get()
            .uri(&format!("/fast/{}", i))
            .insert_header(("X-Forwarded-For", "1.2.3.4"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 201);
    }
    let elapsed = start.elapsed();
    assert!(
        elapsed < Duration::from_millis(250),
        "responses waited on the sink: {:?}",
        elapsed
    );
    assert!(sink.entries.lock().unwrap().is_empty());

    let stats = pool.shutdown(Duration::from_secs(10)).await;
    assert_eq!(stats.persisted, 3);
    assert_eq!(sink.entries.lock().unwrap().len(), 3);
}
