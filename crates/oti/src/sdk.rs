//! SDK wiring: exporters, providers, global registration, and the [`Oti`] handle.

use opentelemetry::global;
use opentelemetry::metrics::{Meter, MeterProvider};
use opentelemetry::trace::TracerProvider;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::exporter::PushMetricExporter;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider, SpanExporter, TracerProviderBuilder};
use opentelemetry_sdk::Resource;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{
    ExporterType, MetricExporterMode, OtiConfig, PeriodicMetricReaderConfig, SpanProcessorType,
};
use crate::error::{ConfigWarning, OtiError};

/// Handle over the registered tracer and meter providers.
///
/// Call [`Oti::shutdown`] once at process end to flush pending telemetry.
/// Dropping a handle that was not shut down shuts it down. Nothing emitted
/// after shutdown is guaranteed to reach the exporter.
pub struct Oti {
    service_name: String,
    span_processor_type: SpanProcessorType,
    tracer_provider: Option<SdkTracerProvider>,
    meter_provider: Option<SdkMeterProvider>,
}

impl Oti {
    /// Build the providers described by `config` and register them globally.
    ///
    /// The gRPC exporter needs a tokio reactor, so call this from inside a
    /// multi-thread runtime when `OTELGRPC` is selected. The simple processor
    /// exports on the thread that ends the span, which OTLP exporters cannot
    /// do from a runtime worker; inside a runtime OTLP spans go through the
    /// batch processor instead.
    ///
    /// Warnings collected while resolving `config` are logged here, once the
    /// subscriber is installed.
    pub fn init(config: &OtiConfig) -> Result<Self, OtiError> {
        let resource = build_resource(config);
        let mut warnings = config.warnings().to_vec();

        let span_processor_type = effective_span_processor(config, &mut warnings);
        let tracer_provider =
            build_tracer_provider(config, span_processor_type, resource.clone())?;
        global::set_text_map_propagator(TraceContextPropagator::new());
        global::set_tracer_provider(tracer_provider.clone());

        let meter_provider = build_meter_provider(config, resource)?;
        if let Some(ref provider) = meter_provider {
            global::set_meter_provider(provider.clone());
        }

        install_subscriber(config, tracer_provider.tracer(config.service_name.clone()));

        for warning in &warnings {
            tracing::warn!("{warning}");
        }

        tracing::info!(
            service = %config.service_name,
            exporter = %config.exporter_config.exporter_type,
            processor = %span_processor_type,
            endpoint = %config.exporter_config.exporter_url,
            sampler = %config.sampling_config.trace_sampling_type,
            metrics = %config.metric_exporter_mode,
            "OpenTelemetry initialized"
        );

        Ok(Self {
            service_name: config.service_name.clone(),
            span_processor_type,
            tracer_provider: Some(tracer_provider),
            meter_provider,
        })
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// The span processor actually in use, which may differ from the configured one.
    pub fn span_processor_type(&self) -> SpanProcessorType {
        self.span_processor_type
    }

    /// A tracer from this handle's provider, or the global one after shutdown.
    pub fn tracer(&self, name: &'static str) -> global::BoxedTracer {
        match &self.tracer_provider {
            Some(provider) => global::BoxedTracer::new(Box::new(provider.tracer(name))),
            None => global::tracer(name),
        }
    }

    /// A meter from this handle's provider, or a no-op meter when metrics are disabled.
    pub fn meter(&self, name: &'static str) -> Meter {
        match &self.meter_provider {
            Some(provider) => provider.meter(name),
            None => global::meter(name),
        }
    }

    /// Export everything buffered so far without stopping the providers.
    pub fn force_flush(&self) -> Result<(), OtiError> {
        if let Some(ref provider) = self.tracer_provider {
            provider
                .force_flush()
                .map_err(|source| OtiError::Flush { signal: "trace", source })?;
        }
        if let Some(ref provider) = self.meter_provider {
            provider
                .force_flush()
                .map_err(|source| OtiError::Flush { signal: "metric", source })?;
        }
        Ok(())
    }

    /// Flush and stop both providers. Later calls are no-ops.
    ///
    /// Both providers are always shut down; the first failure is returned.
    pub fn shutdown(&mut self) -> Result<(), OtiError> {
        let traces = self
            .tracer_provider
            .take()
            .map(|p| p.shutdown())
            .transpose()
            .map_err(|source| OtiError::Shutdown { signal: "trace", source });
        let metrics = self
            .meter_provider
            .take()
            .map(|p| p.shutdown())
            .transpose()
            .map_err(|source| OtiError::Shutdown { signal: "metric", source });

        traces?;
        metrics?;
        Ok(())
    }

    pub fn is_shutdown(&self) -> bool {
        self.tracer_provider.is_none() && self.meter_provider.is_none()
    }
}

impl Drop for Oti {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            eprintln!("Failed to shut down OpenTelemetry providers: {e}");
        }
    }
}

fn build_resource(config: &OtiConfig) -> Resource {
    Resource::builder_empty()
        .with_service_name(config.service_name.clone())
        .with_attributes([
            KeyValue::new("service.namespace", config.service_namespace.clone()),
            KeyValue::new("service.version", config.service_version.clone()),
            KeyValue::new("service.instance.id", config.service_instance_id.clone()),
        ])
        .build()
}

/// OTLP exporters block on network I/O when the simple processor hands them a
/// span. From a tokio worker that either panics (blocking HTTP client) or can
/// stall the reactor driving the gRPC channel.
fn effective_span_processor(
    config: &OtiConfig,
    warnings: &mut Vec<ConfigWarning>,
) -> SpanProcessorType {
    let exporter = config.exporter_config.exporter_type;
    let otlp = matches!(exporter, ExporterType::OtelGrpc | ExporterType::OtelHttp);

    if config.span_processor_type == SpanProcessorType::Simple
        && otlp
        && tokio::runtime::Handle::try_current().is_ok()
    {
        warnings.push(ConfigWarning::SimpleProcessorInRuntime {
            exporter: exporter.as_str(),
        });
        return SpanProcessorType::Batch;
    }

    config.span_processor_type
}

fn build_tracer_provider(
    config: &OtiConfig,
    processor: SpanProcessorType,
    resource: Resource,
) -> Result<SdkTracerProvider, OtiError> {
    let sampling = &config.sampling_config;
    let builder = SdkTracerProvider::builder()
        .with_sampler(
            sampling
                .trace_sampling_type
                .to_sampler(sampling.trace_sampling_ratio),
        )
        .with_resource(resource);

    let url = config.exporter_config.exporter_url.as_str();
    let builder = match config.exporter_config.exporter_type {
        ExporterType::OtelGrpc => {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(url)
                .build()
                .map_err(|source| OtiError::ExporterBuild { signal: "trace", source })?;
            with_span_exporter(builder, exporter, processor)
        }
        ExporterType::OtelHttp => {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_http()
                .with_endpoint(url)
                .build()
                .map_err(|source| OtiError::ExporterBuild { signal: "trace", source })?;
            with_span_exporter(builder, exporter, processor)
        }
        ExporterType::Console => {
            with_span_exporter(builder, opentelemetry_stdout::SpanExporter::default(), processor)
        }
    };

    Ok(builder.build())
}

fn with_span_exporter<E>(
    builder: TracerProviderBuilder,
    exporter: E,
    processor: SpanProcessorType,
) -> TracerProviderBuilder
where
    E: SpanExporter + 'static,
{
    match processor {
        SpanProcessorType::Batch => builder.with_batch_exporter(exporter),
        SpanProcessorType::Simple => builder.with_simple_exporter(exporter),
    }
}

fn build_meter_provider(
    config: &OtiConfig,
    resource: Resource,
) -> Result<Option<SdkMeterProvider>, OtiError> {
    let mode = config.metric_exporter_mode;
    let reader = &config.periodic_metric_reader;
    let url = config.metric_exporter_endpoint.url(mode);

    let provider = match mode {
        MetricExporterMode::None => return Ok(None),
        MetricExporterMode::OtelGrpc => {
            let exporter = opentelemetry_otlp::MetricExporter::builder()
                .with_tonic()
                .with_endpoint(url)
                .with_timeout(reader.export_timeout())
                .build()
                .map_err(|source| OtiError::ExporterBuild { signal: "metric", source })?;
            periodic_meter_provider(exporter, reader, resource)
        }
        MetricExporterMode::OtelHttp => {
            let exporter = opentelemetry_otlp::MetricExporter::builder()
                .with_http()
                .with_endpoint(url)
                .with_timeout(reader.export_timeout())
                .build()
                .map_err(|source| OtiError::ExporterBuild { signal: "metric", source })?;
            periodic_meter_provider(exporter, reader, resource)
        }
        MetricExporterMode::Console => periodic_meter_provider(
            opentelemetry_stdout::MetricExporter::default(),
            reader,
            resource,
        ),
    };

    Ok(Some(provider))
}

fn periodic_meter_provider<E>(
    exporter: E,
    reader: &PeriodicMetricReaderConfig,
    resource: Resource,
) -> SdkMeterProvider
where
    E: PushMetricExporter,
{
    let reader = PeriodicReader::builder(exporter)
        .with_interval(reader.export_interval())
        .build();

    SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(resource)
        .build()
}

/// Bridge `tracing` spans into the tracer and log to stderr. Leaves an
/// already-installed global subscriber in place.
fn install_subscriber(config: &OtiConfig, tracer: SdkTracer) {
    let env_filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = tracing_subscriber::registry()
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .with(env_filter)
        .try_init();

    if let Err(e) = installed {
        tracing::debug!(error = %e, "Global tracing subscriber already set, keeping it");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io;
    use std::sync::{Arc, Mutex};

    use opentelemetry::trace::{Span, Tracer};

    use super::*;
    use crate::config::OtiSettings;

    /// Nothing listens on the discard port, so exports fail fast.
    const CLOSED_GRPC: &str = "http://127.0.0.1:9";
    const CLOSED_HTTP: &str = "http://127.0.0.1:9/v1/traces";

    fn otlp_config(exporter: ExporterType, url: &str, processor: SpanProcessorType) -> OtiConfig {
        OtiConfig::resolve(
            OtiSettings::new()
                .with_service_name("sdk-test")
                .with_exporter_type(exporter)
                .with_exporter_url(url)
                .with_span_processor_type(processor)
                .with_sampling_type("always_on"),
            &HashMap::<String, String>::new(),
        )
    }

    /// Collects fmt output so tests can assert on what was logged.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capturing_subscriber() -> (CapturedLogs, impl tracing::Subscriber + Send + Sync) {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        (logs, subscriber)
    }

    fn console_config(processor: SpanProcessorType) -> OtiConfig {
        OtiConfig::resolve(
            OtiSettings::new()
                .with_service_name("sdk-test")
                .with_exporter_type(ExporterType::Console)
                .with_span_processor_type(processor)
                .with_sampling_type("always_on"),
            &HashMap::<String, String>::new(),
        )
    }

    #[test]
    fn test_console_simple_init_and_idempotent_shutdown() {
        let mut oti = Oti::init(&console_config(SpanProcessorType::Simple)).unwrap();
        assert_eq!(oti.service_name(), "sdk-test");
        assert!(!oti.is_shutdown());

        let mut span = oti.tracer("sdk-test").start("span-name");
        span.end();

        oti.force_flush().unwrap();
        oti.shutdown().unwrap();
        assert!(oti.is_shutdown());
        oti.shutdown().unwrap();
    }

    #[test]
    fn test_console_batch_with_console_metrics() {
        let config = OtiConfig::resolve(
            OtiSettings::new()
                .with_exporter_type(ExporterType::Console)
                .with_span_processor_type(SpanProcessorType::Batch)
                .with_metric_exporter_mode(MetricExporterMode::Console)
                .with_export_interval_millis(60_000),
            &HashMap::<String, String>::new(),
        );
        let mut oti = Oti::init(&config).unwrap();

        let counter = oti.meter("sdk-test").u64_counter("oti.count").build();
        counter.add(1, &[]);
        oti.tracer("sdk-test").in_span("batched", |_cx| {});

        oti.shutdown().unwrap();
        assert!(oti.is_shutdown());
    }

    #[test]
    fn test_drop_shuts_down() {
        let oti = Oti::init(&console_config(SpanProcessorType::Batch)).unwrap();
        drop(oti);
    }

    #[test]
    fn test_resource_carries_service_identity() {
        let config = OtiConfig::resolve(
            OtiSettings::new()
                .with_service_name("svc")
                .with_service_namespace("examples")
                .with_service_version("v1.0.0")
                .with_service_instance_id("stot_42"),
            &HashMap::<String, String>::new(),
        );
        let resource = build_resource(&config);

        let get = |key: &'static str| resource.get(&opentelemetry::Key::from_static_str(key));
        assert_eq!(get("service.name"), Some("svc".into()));
        assert_eq!(get("service.namespace"), Some("examples".into()));
        assert_eq!(get("service.version"), Some("v1.0.0".into()));
        assert_eq!(get("service.instance.id"), Some("stot_42".into()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_otlp_http_simple_inside_runtime_uses_batch() {
        let (logs, subscriber) = capturing_subscriber();

        let config = otlp_config(ExporterType::OtelHttp, CLOSED_HTTP, SpanProcessorType::Simple);
        let mut oti = tracing::subscriber::with_default(subscriber, || Oti::init(&config)).unwrap();
        assert_eq!(oti.span_processor_type(), SpanProcessorType::Batch);
        assert!(
            logs.contents().contains("OTELHTTP exporter cannot use the SIMPLE span processor"),
            "{}",
            logs.contents()
        );

        // Ending a span on a runtime worker must not export inline.
        oti.tracer("sdk-test").start("span-name").end();

        // The export to the closed port fails; only teardown matters here.
        let _ = tokio::task::block_in_place(|| oti.shutdown());
        assert!(oti.is_shutdown());
    }

    #[test]
    fn test_otlp_http_simple_outside_runtime_stays_simple() {
        let config = otlp_config(ExporterType::OtelHttp, CLOSED_HTTP, SpanProcessorType::Simple);
        let mut oti = Oti::init(&config).unwrap();
        assert_eq!(oti.span_processor_type(), SpanProcessorType::Simple);

        oti.tracer("sdk-test").start("span-name").end();

        let _ = oti.shutdown();
        assert!(oti.is_shutdown());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_otlp_grpc_init_with_both_processors() {
        for processor in [SpanProcessorType::Batch, SpanProcessorType::Simple] {
            let config = otlp_config(ExporterType::OtelGrpc, CLOSED_GRPC, processor);
            let mut oti = Oti::init(&config).unwrap();
            assert_eq!(oti.span_processor_type(), SpanProcessorType::Batch);

            oti.tracer("sdk-test").in_span("span-name", |_cx| {});

            let _ = tokio::task::block_in_place(|| oti.shutdown());
            assert!(oti.is_shutdown());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_otlp_http_batch_init() {
        let config = otlp_config(ExporterType::OtelHttp, CLOSED_HTTP, SpanProcessorType::Batch);
        let mut oti = Oti::init(&config).unwrap();
        assert_eq!(oti.span_processor_type(), SpanProcessorType::Batch);
        assert!(config.warnings().is_empty());

        oti.tracer("sdk-test").in_span("span-name", |_cx| {});

        let _ = tokio::task::block_in_place(|| oti.shutdown());
        assert!(oti.is_shutdown());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_otlp_metric_exporters_init() {
        for mode in [MetricExporterMode::OtelGrpc, MetricExporterMode::OtelHttp] {
            let config = OtiConfig::resolve(
                OtiSettings::new()
                    .with_exporter_type(ExporterType::Console)
                    .with_metric_exporter_mode(mode)
                    .with_metric_exporter_endpoint("127.0.0.1", 9)
                    .with_export_timeout_millis(1_000),
                &HashMap::<String, String>::new(),
            );
            let mut oti = Oti::init(&config).unwrap();

            oti.meter("sdk-test").u64_counter("oti.spans").build().add(1, &[]);

            let _ = tokio::task::block_in_place(|| oti.shutdown());
            assert!(oti.is_shutdown());
        }
    }

    #[test]
    fn test_resolution_warnings_logged_after_subscriber() {
        let (logs, subscriber) = capturing_subscriber();

        tracing::subscriber::with_default(subscriber, || {
            let env = HashMap::from([
                ("OTEL_TRACES_SAMPLER", "xray"),
                ("OTEL_TRACES_SAMPLER_ARG", "lots"),
            ]);
            let config = OtiConfig::resolve(
                OtiSettings::new()
                    .with_exporter_type(ExporterType::Console)
                    .with_span_processor_type(SpanProcessorType::Simple),
                &env,
            );
            assert_eq!(config.warnings().len(), 2);
            assert!(logs.contents().is_empty(), "resolution itself logs nothing");

            let mut oti = Oti::init(&config).unwrap();
            oti.shutdown().unwrap();
        });

        let output = logs.contents();
        assert!(output.contains("WARN"), "{output}");
        assert!(output.contains("OTEL_TRACES_SAMPLER_ARG=`lots`"), "{output}");
        assert!(output.contains("unrecognized trace sampler `xray`"), "{output}");
    }
}
