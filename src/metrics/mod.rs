//! Prometheus metrics for the Aegis proxy
//!
//! One [`Metrics`] instance is owned by the server context; nothing here is
//! process-global.

use std::convert::Infallible;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Aegis metrics collection
pub struct Metrics {
    /// Registry for all metrics
    pub registry: Registry,

    // Connection metrics
    /// Total client connections accepted
    pub connections_total: IntCounter,
    /// Current active client sessions
    pub connections_active: IntGauge,
    /// Total client sessions closed
    pub connections_closed: IntCounter,
    /// Connections turned away before a session started
    pub connections_rejected_total: IntCounterVec,

    // Query metrics
    /// Statements processed by kind
    pub queries_total: IntCounterVec,
    /// Statement latency histogram (in seconds)
    pub query_duration_seconds: HistogramVec,
    /// Statement errors by class
    pub query_errors_total: IntCounterVec,

    // Routing metrics
    /// Statements routed by target (reader/writer)
    pub queries_routed_total: IntCounterVec,
}

impl Metrics {
    /// Create a new metrics collection
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let connections_total = IntCounter::new(
            "aegis_connections_total",
            "Total number of client connections accepted",
        )?;
        let connections_active = IntGauge::new(
            "aegis_connections_active",
            "Current number of active client sessions",
        )?;
        let connections_closed = IntCounter::new(
            "aegis_connections_closed_total",
            "Total number of client sessions closed",
        )?;
        let connections_rejected_total = IntCounterVec::new(
            Opts::new(
                "aegis_connections_rejected_total",
                "Total number of client connections rejected at accept time",
            ),
            &["reason"], // per_ip, workers
        )?;

        let queries_total = IntCounterVec::new(
            Opts::new("aegis_queries_total", "Total number of statements processed"),
            &["kind"], // select, show, use, proxy_status, other
        )?;
        let query_duration_seconds = HistogramVec::new(
            HistogramOpts::new("aegis_query_duration_seconds", "Statement latency in seconds")
                .buckets(vec![
                    0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
                    5.0, 10.0,
                ]),
            &["kind"],
        )?;
        let query_errors_total = IntCounterVec::new(
            Opts::new("aegis_query_errors_total", "Total number of statement errors"),
            &["class"], // parse, backend, pool, unsupported
        )?;

        let queries_routed_total = IntCounterVec::new(
            Opts::new(
                "aegis_queries_routed_total",
                "Total number of statements routed by target",
            ),
            &["target"], // reader, writer
        )?;

        registry.register(Box::new(connections_total.clone()))?;
        registry.register(Box::new(connections_active.clone()))?;
        registry.register(Box::new(connections_closed.clone()))?;
        registry.register(Box::new(connections_rejected_total.clone()))?;
        registry.register(Box::new(queries_total.clone()))?;
        registry.register(Box::new(query_duration_seconds.clone()))?;
        registry.register(Box::new(query_errors_total.clone()))?;
        registry.register(Box::new(queries_routed_total.clone()))?;

        Ok(Self {
            registry,
            connections_total,
            connections_active,
            connections_closed,
            connections_rejected_total,
            queries_total,
            query_duration_seconds,
            query_errors_total,
            queries_routed_total,
        })
    }

    /// Record a statement execution
    pub fn record_query(&self, kind: &str, duration_secs: f64) {
        self.queries_total.with_label_values(&[kind]).inc();
        self.query_duration_seconds
            .with_label_values(&[kind])
            .observe(duration_secs);
    }

    /// Record a statement error
    pub fn record_query_error(&self, class: &str) {
        self.query_errors_total.with_label_values(&[class]).inc();
    }

    /// Record route decision
    pub fn record_route(&self, target: &str) {
        self.queries_routed_total.with_label_values(&[target]).inc();
    }

    /// Record a new session
    pub fn record_connection_accepted(&self) {
        self.connections_total.inc();
        self.connections_active.inc();
    }

    /// Record a session closed
    pub fn record_connection_closed(&self) {
        self.connections_active.dec();
        self.connections_closed.inc();
    }

    /// Record a connection rejected before its session started
    pub fn record_connection_rejected(&self, reason: &str) {
        self.connections_rejected_total
            .with_label_values(&[reason])
            .inc();
    }

    /// Get metrics as Prometheus text format
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// Serve `/metrics` and `/health` over HTTP until `shutdown` fires
pub async fn serve_metrics(
    listener: TcpListener,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
) {
    info!(addr = ?listener.local_addr().ok(), "Metrics server listening");

    loop {
        let stream = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(e) => {
                    error!(error = %e, "Failed to accept metrics connection");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    continue;
                }
            },
        };

        let metrics = metrics.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| handle_request(req, metrics.clone()));
            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                error!(error = %e, "Metrics server connection error");
            }
        });
    }
    debug!("Metrics server stopped");
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (status, body) = match req.uri().path() {
        "/metrics" => match metrics.gather() {
            Ok(text) => (StatusCode::OK, text),
            Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        },
        "/health" => (StatusCode::OK, "OK".to_string()),
        _ => (StatusCode::NOT_FOUND, "Not Found".to_string()),
    };

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
    );
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn http_get(addr: std::net::SocketAddr, path: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            path
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let metrics = Arc::new(Metrics::new().unwrap());
        metrics.record_connection_accepted();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(serve_metrics(listener, metrics, shutdown.clone()));

        let response = http_get(addr, "/metrics").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("aegis_connections_active 1"));

        assert!(http_get(addr, "/health").await.ends_with("OK"));
        assert!(http_get(addr, "/nope").await.starts_with("HTTP/1.1 404"));

        shutdown.cancel();
        task.await.unwrap();
    }

    #[test]
    fn test_gather_renders_recorded_values() {
        let metrics = Metrics::new().unwrap();
        metrics.record_connection_accepted();
        metrics.record_query("select", 0.002);
        metrics.record_route("reader");
        metrics.record_connection_rejected("per_ip");

        let text = metrics.gather().unwrap();
        assert!(text.contains("aegis_connections_total 1"));
        assert!(text.contains("aegis_queries_total{kind=\"select\"} 1"));
        assert!(text.contains("aegis_queries_routed_total{target=\"reader\"} 1"));
        assert!(text.contains("aegis_connections_rejected_total{reason=\"per_ip\"} 1"));
    }

    #[test]
    fn test_connection_gauge() {
        let metrics = Metrics::new().unwrap();
        metrics.record_connection_accepted();
        metrics.record_connection_accepted();
        metrics.record_connection_closed();
        assert_eq!(metrics.connections_active.get(), 1);
        assert_eq!(metrics.connections_closed.get(), 1);
    }
}
