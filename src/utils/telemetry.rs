//! Process-wide tracing setup.
//!
//! Call [`init_telemetry`] exactly once from `main` and keep the returned
//! guard alive for the life of the process; dropping it flushes the file
//! writer and shuts the OTLP exporter down.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::{propagation::TraceContextPropagator, runtime, trace as sdktrace, Resource};
use std::error::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::LoggingConfig;

pub struct TelemetryGuard {
    _file_guard: Option<WorkerGuard>,
    otlp: bool,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if self.otlp {
            global::shutdown_tracer_provider();
        }
    }
}

fn install_otlp_tracer(service_name: &str) -> Result<sdktrace::Tracer, Box<dyn Error + Send + Sync>> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .build_span_exporter()?;

    let trace_config = sdktrace::Config::default().with_resource(Resource::new(vec![
        KeyValue::new("service.name", service_name.to_string()),
    ]));

    let provider = sdktrace::TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_config(trace_config)
        .build();

    global::set_tracer_provider(provider.clone());
    Ok(provider.tracer(service_name.to_string()))
}

pub fn init_telemetry(config: &LoggingConfig) -> Result<TelemetryGuard, Box<dyn Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let otel_layer = if config.otlp {
        let tracer = install_otlp_tracer(&config.service_name)?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let (file_layer, file_guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, format!("{}.log", config.service_name));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    Registry::default()
        .with(filter)
        .with(otel_layer)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init()?;

    Ok(TelemetryGuard {
        _file_guard: file_guard,
        otlp: config.otlp,
    })
}
