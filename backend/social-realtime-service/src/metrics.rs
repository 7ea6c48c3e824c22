//! Prometheus collectors for the realtime service, registered lazily in
//! the default registry and exposed on `/metrics`.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpResponse,
};
use futures::future::{ready, LocalBoxFuture, Ready};
use once_cell::sync::Lazy;
use prometheus::core::Collector;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder,
};
use std::rc::Rc;
use std::time::{Duration, Instant};

fn register<C: Collector + Clone + 'static>(collector: C) -> C {
    prometheus::default_registry()
        .register(Box::new(collector.clone()))
        .expect("metric registered twice");
    collector
}

const LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5];

static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register(
        IntCounterVec::new(
            Opts::new(
                "realtime_http_requests_total",
                "Total HTTP requests handled by social-realtime-service",
            ),
            &["method", "path", "status"],
        )
        .expect("valid realtime_http_requests_total"),
    )
});

static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register(
        HistogramVec::new(
            HistogramOpts::new(
                "realtime_http_request_duration_seconds",
                "HTTP request latency for social-realtime-service",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["method", "path", "status"],
        )
        .expect("valid realtime_http_request_duration_seconds"),
    )
});

static MESSAGES_SENT_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register(
        IntCounter::new(
            "realtime_messages_sent_total",
            "Messages persisted and fanned out",
        )
        .expect("valid realtime_messages_sent_total"),
    )
});

/// `outcome` is `created` or `grouped`.
static NOTIFICATIONS_CREATED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register(
        IntCounterVec::new(
            Opts::new(
                "realtime_notifications_created_total",
                "Notifications created or folded into an existing group",
            ),
            &["outcome"],
        )
        .expect("valid realtime_notifications_created_total"),
    )
});

static LIVE_PUSH_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register(
        IntCounter::new(
            "realtime_live_push_failures_total",
            "Events that could not be delivered to a live connection",
        )
        .expect("valid realtime_live_push_failures_total"),
    )
});

static ONLINE_USERS: Lazy<IntGauge> = Lazy::new(|| {
    register(
        IntGauge::new("realtime_online_users", "Users with at least one connection")
            .expect("valid realtime_online_users"),
    )
});

static ACTIVE_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    register(
        IntGauge::new("realtime_active_connections", "Open WebSocket connections")
            .expect("valid realtime_active_connections"),
    )
});

pub fn observe_http_request(method: &str, path: &str, status: u16, elapsed: Duration) {
    let status_label = status.to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status_label])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path, &status_label])
        .observe(elapsed.as_secs_f64());
}

pub fn record_message_sent() {
    MESSAGES_SENT_TOTAL.inc();
}

pub fn record_notification(outcome: &str) {
    NOTIFICATIONS_CREATED_TOTAL
        .with_label_values(&[outcome])
        .inc();
}

pub fn record_push_failure() {
    LIVE_PUSH_FAILURES_TOTAL.inc();
}

pub fn set_presence(online_users: usize, connections: usize) {
    ONLINE_USERS.set(online_users as i64);
    ACTIVE_CONNECTIONS.set(connections as i64);
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

/// Records request count and latency per route pattern.
pub struct MetricsMiddleware;

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService {
            service: Rc::new(service),
        }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        // Route pattern keeps ids out of the label set.
        let path = req
            .match_pattern()
            .unwrap_or_else(|| "unmatched".to_string());
        let method = req.method().to_string();
        let start = Instant::now();

        Box::pin(async move {
            let result = service.call(req).await;
            let elapsed = start.elapsed();
            match &result {
                Ok(response) => {
                    observe_http_request(&method, &path, response.status().as_u16(), elapsed);
                }
                Err(_) => {
                    observe_http_request(&method, &path, 500, elapsed);
                }
            }
            result
        })
    }
}
