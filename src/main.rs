/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* Archive: src/main.rs
*
* This file is the main entry point for the drift operator. It is
* responsible for setting up and running the controller that schedules
* drift detection across Configuration custom resources.
*
* Architecture:
* The program follows the standard `kube-rs` operator structure.
* 1.  **Initialization**: It begins by initializing a Kubernetes client and
*     setting up `tracing` for structured logging, with an OpenTelemetry
*     Jaeger pipeline for distributed traces.
* 2.  **Knobs**: The scheduling knobs (check interval, drift interval and
*     drift threshold) are read from the environment and validated before
*     anything is watched; a malformed or out-of-range value refuses to
*     start the process.
* 3.  **Controller**: A `Controller` from `kube-rs` watches every
*     Configuration in the cluster. Each reconcile invocation evaluates the
*     whole fleet, since admitting a configuration into drift detection is
*     a global decision bounded by the in-flight count.
* 4.  **Shared Context**: A shared `Context` carries the configuration
*     store, the event recorder, the clock and the knobs into the
*     reconciler.
* 5.  **Metrics**: Custom Prometheus metrics are registered at startup and
*     served on `/metrics` from a background `warp` server.
*
* SPDX-License-Identifier: Apache-2.0 */

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as AnyhowContext, Result};
use futures::stream::StreamExt;
use kube::api::Api;
use kube::runtime::{watcher, Controller};
use kube::Client;
use prometheus::{Encoder, Registry, TextEncoder};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use warp::Filter;

mod clock;
mod crds;
mod events;
mod metrics;
mod store;

mod controllers {
    pub mod drift_controller;
}

use clock::SystemClock;
use controllers::drift_controller::{self, Context, Settings};
use crds::Configuration;
use events::KubeRecorder;
use store::KubeStore;

/// Initializes the tracing pipeline: JSON logs plus Jaeger traces.
fn init_telemetry() -> Result<()> {
    let tracer = opentelemetry_jaeger::new_agent_pipeline()
        .with_service_name("drift-operator")
        .install_batch(opentelemetry::runtime::Tokio)?;

    let telemetry = tracing_opentelemetry::layer().with_tracer(tracer);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().json();

    tracing_subscriber::registry()
        .with(filter)
        .with(telemetry)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

/// Parses a simple duration string (e.g. "30s", "5m", "2h") into a `Duration`.
fn parse_duration_str(s: &str) -> Result<Duration> {
    let s = s.trim();
    if let Some(num_str) = s.strip_suffix('s') {
        let secs = num_str
            .parse::<u64>()
            .with_context(|| format!("invalid duration '{s}'"))?;
        Ok(Duration::from_secs(secs))
    } else if let Some(num_str) = s.strip_suffix('m') {
        let mins = num_str
            .parse::<u64>()
            .with_context(|| format!("invalid duration '{s}'"))?;
        Ok(Duration::from_secs(mins * 60))
    } else if let Some(num_str) = s.strip_suffix('h') {
        let hours = num_str
            .parse::<u64>()
            .with_context(|| format!("invalid duration '{s}'"))?;
        Ok(Duration::from_secs(hours * 3600))
    } else {
        anyhow::bail!("invalid duration '{s}', expected a suffix of s, m or h")
    }
}

/// Builds the scheduler knobs from the environment, starting from the
/// defaults of five minute ticks, a two hour drift interval and a 20%
/// threshold. Any malformed or out-of-range value is a startup error.
fn settings_from_env() -> Result<Settings> {
    let mut settings = Settings::default();

    if let Ok(value) = env::var("DRIFT_CHECK_INTERVAL") {
        settings.check_interval = parse_duration_str(&value)
            .with_context(|| format!("invalid DRIFT_CHECK_INTERVAL '{value}'"))?;
    }
    if let Ok(value) = env::var("DRIFT_INTERVAL") {
        settings.drift_interval = parse_duration_str(&value)
            .with_context(|| format!("invalid DRIFT_INTERVAL '{value}'"))?;
    }
    if let Ok(value) = env::var("DRIFT_THRESHOLD") {
        settings.drift_threshold = value
            .parse::<f64>()
            .with_context(|| format!("invalid DRIFT_THRESHOLD '{value}'"))?;
    }
    settings.validate()?;

    Ok(settings)
}

/// Renders the metrics into the Prometheus text format.
async fn metrics_handler(registry: Arc<Registry>) -> Result<impl warp::Reply, warp::Rejection> {
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    encoder
        .encode(&registry.gather(), &mut buffer)
        .expect("Failed to encode metrics");

    let response = String::from_utf8(buffer).expect("Failed to convert metrics to string");
    Ok(warp::reply::with_header(
        response,
        "Content-Type",
        encoder.format_type(),
    ))
}

/// Runs the HTTP server to expose the /metrics endpoint.
async fn run_metrics_server(registry: Arc<Registry>) {
    let metrics_route = warp::path("metrics")
        .and(warp::get())
        .and(warp::any().map(move || Arc::clone(&registry)))
        .and_then(metrics_handler);

    info!("Starting metrics server on 0.0.0.0:9090");
    warp::serve(metrics_route).run(([0, 0, 0, 0], 9090)).await;
}

/// The main entry point of the operator.
#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize Telemetry and Logging
    init_telemetry()?;
    info!("Telemetry initialized.");

    // 2. Read and validate the scheduling knobs
    let settings = settings_from_env()?;
    info!(
        check_interval = ?settings.check_interval,
        drift_interval = ?settings.drift_interval,
        drift_threshold = settings.drift_threshold,
        "Drift scheduler configured."
    );

    // 3. Initialize Kubernetes Client and the Configuration watch
    let client = Client::try_default().await?;
    let configurations = Api::<Configuration>::all(client.clone());

    // 4. Create the shared context for the drift controller
    let context = Arc::new(Context {
        store: Arc::new(KubeStore::new(client.clone())),
        recorder: Arc::new(KubeRecorder::new(client.clone())),
        clock: Arc::new(SystemClock),
        settings,
    });

    // 5. Initialize metrics registry and serve it in the background
    let registry = Arc::new(metrics::create_and_register_metrics()?);
    info!("Custom metrics registered.");
    tokio::spawn(run_metrics_server(registry));

    info!("Drift operator starting...");

    // 6. Run the drift controller until shutdown
    Controller::new(configurations, watcher::Config::default())
        .shutdown_on_signal()
        .run(
            drift_controller::reconcile,
            drift_controller::on_error,
            context,
        )
        .for_each(|res| async move {
            match res {
                Ok(o) => tracing::debug!("Reconciled Configuration: {:?}", o),
                Err(e) => tracing::error!("Configuration reconcile error: {}", e),
            }
        })
        .await;

    info!("Drift operator shutting down.");
    opentelemetry::global::shutdown_tracer_provider();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_suffixes_parse() {
        assert_eq!(parse_duration_str("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration_str("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration_str("2h").unwrap(), Duration::from_secs(7200));
    }

    #[test]
    fn malformed_durations_are_rejected() {
        assert!(parse_duration_str("5").is_err());
        assert!(parse_duration_str("m5").is_err());
        assert!(parse_duration_str("").is_err());
        assert!(parse_duration_str("1.5h").is_err());
    }
}
