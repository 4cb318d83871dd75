use std::time::Duration;

use envconfig::Envconfig;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, Tracer};
use opentelemetry_sdk::{runtime, Resource};
use tokio::signal::unix::{signal, SignalKind};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use remote_flags::config::Config;
use remote_flags::server::serve;

/// Resolves on the first SIGTERM or ctrl-c.
async fn shutdown_signal() {
    let mut term = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = tokio::signal::ctrl_c() => {},
    }

    tracing::info!("shutdown requested, draining in-flight requests");
}

fn otlp_tracer(config: &Config, endpoint: &str) -> Tracer {
    let trace_config = opentelemetry_sdk::trace::Config::default()
        .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
            config.otel_sampling_rate,
        ))))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(Resource::new([KeyValue::new(
            "service.name",
            config.otel_service_name.clone(),
        )]));

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .with_timeout(Duration::from_secs(config.otel_export_timeout_secs));

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_trace_config(trace_config)
        .with_exporter(exporter)
        .install_batch(runtime::Tokio)
        .expect("failed to install the OTLP trace pipeline")
}

/// Stdout logging filtered by `RUST_LOG`, plus OTLP export when `OTEL_URL` is set.
fn init_tracing(config: &Config) {
    let stdout = if *config.debug {
        fmt::layer()
            .pretty()
            .with_span_events(FmtSpan::CLOSE)
            .boxed()
    } else {
        fmt::layer().json().with_current_span(true).boxed()
    };

    let otel = config.otel_url.as_deref().map(|endpoint| {
        tracing_opentelemetry::layer()
            .with_tracer(otlp_tracer(config, endpoint))
            .with_filter(LevelFilter::from_level(config.otel_log_level))
    });

    tracing_subscriber::registry()
        .with(stdout.with_filter(EnvFilter::from_default_env()))
        .with(otel)
        .init();
}

#[tokio::main]
async fn main() {
    let config = Config::init_from_env().expect("invalid configuration");
    init_tracing(&config);

    let listener = tokio::net::TcpListener::bind(config.address)
        .await
        .expect("could not bind port");
    serve(config, listener, shutdown_signal()).await;
}
