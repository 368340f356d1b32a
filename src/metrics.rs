use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use prometheus::{Encoder, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::env;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info};

lazy_static::lazy_static! {
    pub static ref METRIC_NAMESPACE: String =
        env::var("METRIC_NAMESPACE").unwrap_or_else(|_| "shortener_loadtest".to_string());

    // === Scheduler Metrics ===

    pub static ref ACTIVE_VUS: IntGauge =
        IntGauge::with_opts(
            Opts::new("active_vus", "Number of virtual users currently iterating")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    // === Operation Metrics ===

    pub static ref OPERATIONS_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("operations_total", "Total number of operations executed")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["operation", "outcome"]  // outcome: success, or a failure label
        ).unwrap();

    pub static ref OPERATION_DURATION_SECONDS: HistogramVec =
        HistogramVec::new(
            prometheus::HistogramOpts::new(
                "operation_duration_seconds",
                "Operation latencies in seconds"
            ).namespace(METRIC_NAMESPACE.as_str()),
            &["operation"]
        ).unwrap();

    pub static ref CHECKS_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("checks_total", "Total number of response checks")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["check", "result"]  // result: passed, failed
        ).unwrap();
}

/// Registers the harness metrics with the default Prometheus registry.
///
/// Safe to call more than once; already registered collectors are skipped.
pub fn register_metrics() -> Result<(), prometheus::Error> {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(ACTIVE_VUS.clone()),
        Box::new(OPERATIONS_TOTAL.clone()),
        Box::new(OPERATION_DURATION_SECONDS.clone()),
        Box::new(CHECKS_TOTAL.clone()),
    ];

    for collector in collectors {
        match prometheus::default_registry().register(collector) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

/// HTTP handler for the Prometheus metrics endpoint.
pub async fn metrics_handler(
    _req: Request<Body>,
    registry: Arc<Mutex<Registry>>,
) -> Result<Response<Body>, hyper::Error> {
    let encoder = TextEncoder::new();
    let buffer = encode(&registry);

    let response = match Response::builder()
        .status(200)
        .header("Content-Type", encoder.format_type())
        .body(Body::from(buffer))
    {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "Failed to build metrics response");
            let mut response = Response::new(Body::empty());
            *response.status_mut() = hyper::StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    };

    Ok(response)
}

/// Starts the Prometheus metrics HTTP server. Runs until the task is dropped.
pub async fn start_metrics_server(port: u16, registry: Arc<Mutex<Registry>>) {
    let addr = ([0, 0, 0, 0], port).into();

    let make_svc = make_service_fn(move |_conn| {
        let registry_clone = registry.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                let registry_clone_inner = registry_clone.clone();
                async move { metrics_handler(req, registry_clone_inner).await }
            }))
        }
    });

    let server = match Server::try_bind(&addr) {
        Ok(builder) => builder.serve(make_svc),
        Err(e) => {
            error!(port = port, error = %e, "Failed to bind metrics server");
            return;
        }
    };
    info!(
        port = port,
        addr = %addr,
        "Metrics server listening"
    );

    if let Err(e) = server.await {
        error!(error = %e, "Metrics server error");
    }
}

/// Gathers and encodes metrics as a string for final output.
pub fn gather_metrics_string(registry: &Arc<Mutex<Registry>>) -> String {
    String::from_utf8(encode(registry)).unwrap_or_else(|e| {
        error!(error = %e, "Error encoding metrics to UTF-8");
        String::from("# ERROR ENCODING METRICS TO UTF-8")
    })
}

fn encode(registry: &Arc<Mutex<Registry>>) -> Vec<u8> {
    let encoder = TextEncoder::new();
    let metric_families = registry
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
    }
    buffer
}
