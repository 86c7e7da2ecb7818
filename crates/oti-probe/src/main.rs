//! oti-probe: emit one span through OTI and optionally confirm Jaeger indexed it.

mod settings;

use opentelemetry::trace::{TraceContextExt, Tracer};
use opentelemetry::KeyValue;
use oti::{Oti, OtiConfig, TraceQueryClient};

fn main() -> anyhow::Result<()> {
    // Parse CLI args
    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1).cloned())
        .or_else(|| std::env::var("OTI_CONFIG").ok())
        .unwrap_or_else(|| "oti.toml".to_string());

    let span_name = args
        .iter()
        .position(|a| a == "--span-name")
        .and_then(|i| args.get(i + 1).cloned())
        .unwrap_or_else(|| "span-name".to_string());

    let verify_url = args
        .iter()
        .position(|a| a == "--verify")
        .map(|i| {
            args.get(i + 1)
                .filter(|a| !a.starts_with('-'))
                .cloned()
                .unwrap_or_else(|| oti::query::DEFAULT_QUERY_URL.to_string())
        });

    let print_config = args.iter().any(|a| a == "--print-config");

    // Explicit settings (TOML + OTI_*), then OTEL_* and defaults
    let config = OtiConfig::from_settings(settings::load(&config_path)?);

    if print_config {
        // No subscriber is installed on this path.
        for warning in config.warnings() {
            eprintln!("warning: {warning}");
        }
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    // Build the tokio runtime first: the tonic gRPC exporter needs a reactor context
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run(config, span_name, verify_url))
}

async fn run(config: OtiConfig, span_name: String, verify_url: Option<String>) -> anyhow::Result<()> {
    let mut oti = Oti::init(&config)?;

    let tracer = oti.tracer("oti-probe");
    let trace_id = tracer.in_span(span_name.clone(), |cx| {
        let span = cx.span();
        span.set_attribute(KeyValue::new("probe.instance", config.service_instance_id.clone()));
        span.span_context().trace_id().to_string()
    });

    oti.meter("oti-probe")
        .u64_counter("oti.probe.spans")
        .with_description("Probe spans emitted")
        .build()
        .add(1, &[KeyValue::new("span.name", span_name.clone())]);

    tracing::info!(
        service = %config.service_name,
        span = %span_name,
        trace_id = %trace_id,
        "Probe span emitted"
    );

    // Shutdown blocks on the final export, which the gRPC exporter drives on this runtime.
    tokio::task::block_in_place(|| oti.shutdown())?;

    let Some(url) = verify_url else {
        return Ok(());
    };

    let traces = TraceQueryClient::new(url.clone())
        .fetch_traces_by_service(&config.service_name)
        .await?;

    let found = traces
        .iter()
        .flat_map(|t| t.data.iter())
        .flat_map(|trace| trace.spans.iter())
        .any(|span| span.operation_name == span_name);

    if !found {
        anyhow::bail!(
            "span `{span_name}` for service `{}` not found at {url}",
            config.service_name
        );
    }

    println!("span `{span_name}` found in trace backend (trace_id {trace_id})");
    Ok(())
}
