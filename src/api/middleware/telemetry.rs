//! HTTP telemetry middleware
//!
//! Times each request around the wrapped service and hands a
//! `RequestEvent` to the dispatcher once the response is ready.
//! The response itself is passed through untouched.

use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use actix_service::{Service, Transform};
use actix_web::{
    Error,
    dev::{ServiceRequest, ServiceResponse},
    http::header,
};
use futures_util::future::{LocalBoxFuture, Ready, ready};

use crate::analytics::{RequestEvent, TelemetryDispatcher};
use crate::utils::extract_client_ip;

/// Telemetry middleware factory
#[derive(Clone)]
pub struct TelemetryMiddleware {
    dispatcher: TelemetryDispatcher,
    trusted_proxies: Arc<Vec<String>>,
}

impl TelemetryMiddleware {
    pub fn new(dispatcher: TelemetryDispatcher, trusted_proxies: Vec<String>) -> Self {
        Self {
            dispatcher,
            trusted_proxies: Arc::new(trusted_proxies),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for TelemetryMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = TelemetryService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(TelemetryService {
            service: Rc::new(service),
            dispatcher: self.dispatcher.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
        }))
    }
}

pub struct TelemetryService<S> {
    service: Rc<S>,
    dispatcher: TelemetryDispatcher,
    trusted_proxies: Arc<Vec<String>>,
}

/// Request fields captured before the request is handed down
fn capture(req: &ServiceRequest, trusted_proxies: &[String]) -> RequestEvent {
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| req.connection_info().host().to_string());
    let peer = req.peer_addr().map(|addr| addr.ip());
    let client_ip = extract_client_ip(req.headers(), peer, trusted_proxies);

    RequestEvent::new(
        host,
        req.path().to_string(),
        req.query_string().to_string(),
        client_ip,
    )
}

impl<S, B> Service<ServiceRequest> for TelemetryService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &self,
        ctx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let srv = self.service.clone();
        let dispatcher = self.dispatcher.clone();
        let start = Instant::now();
        let event = capture(&req, &self.trusted_proxies);

        Box::pin(async move {
            let result = srv.call(req).await;

            let micros = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
            dispatcher.dispatch(event.with_duration_micros(micros));

            result
        })
    }
}
