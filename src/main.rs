use std::env;
use std::sync::{Arc, Mutex};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use shortener_loadtest::config::HarnessConfig;
use shortener_loadtest::harness::LoadTest;
use shortener_loadtest::metrics::{gather_metrics_string, register_metrics, start_metrics_server};

const EXIT_CONFIG_ERROR: i32 = 3;

/// Prints helpful configuration documentation.
fn print_config_help() {
    eprintln!("Configuration sources:");
    eprintln!("  LOADTEST_CONFIG         - Path to a YAML run file");
    eprintln!("  LOADTEST_PRESET         - Built-in run used when LOADTEST_CONFIG is unset:");
    eprintln!("                            mixedReadWrite (default), fullWrite, nonExistentRead, realScenario");
    eprintln!();
    eprintln!("Overrides:");
    eprintln!("  TARGET_URL              - Base URL of the shortener (must start with http:// or https://)");
    eprintln!("  RANDOM_SEED             - Run seed for reproducible workload draws");
    eprintln!("  METRICS_PORT            - Serve Prometheus metrics on this port during the run");
    eprintln!();
    eprintln!("Logging:");
    eprintln!("  RUST_LOG                - Log filter (default: info)");
    eprintln!("  LOG_FORMAT              - Set to 'json' for JSON log lines");
    eprintln!("  METRIC_NAMESPACE        - Prometheus metric namespace (default: shortener_loadtest)");
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    if env::var("LOG_FORMAT").map_or(false, |f| f.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() {
    init_logging();

    if let Err(e) = register_metrics() {
        error!(error = %e, "Failed to register Prometheus metrics");
    }

    let load_test = match HarnessConfig::from_env().and_then(LoadTest::new) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Configuration error: {}\n", e);
            print_config_help();
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    load_test
        .config()
        .print_summary(load_test.seed(), load_test.parsed_headers());

    // Start the Prometheus metrics HTTP server
    let registry_arc = Arc::new(Mutex::new(prometheus::default_registry().clone()));
    if let Some(port) = load_test.config().metrics_port {
        let registry = registry_arc.clone();
        tokio::spawn(async move {
            start_metrics_server(port, registry).await;
        });
    }

    let report = load_test.run().await;

    println!("{}", report.render());
    info!(verdict = %report.verdict(), "Run complete");

    if env::var("PRINT_PROMETHEUS").map_or(false, |v| v == "true") {
        println!("\n--- FINAL METRICS ---\n{}", gather_metrics_string(&registry_arc));
        println!("--- END OF FINAL METRICS ---\n");
    }

    std::process::exit(report.exit_code());
}
