//! Console logging plus optional OpenTelemetry export. The feature flags are
//! described in the crate README.

#[cfg(all(
    any(feature = "honeycomb", feature = "stdout"),
    not(any(feature = "tracing", feature = "metrics"))
))]
compile_error!("Exporter features need at least one of 'tracing' or 'metrics' enabled.");

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics::SdkMeterProvider;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::trace::SdkTracerProvider;

#[cfg(any(feature = "stdout", feature = "honeycomb"))]
const EXPORT_INTERVAL: core::time::Duration = core::time::Duration::from_secs(5);

pub struct TelemetryProviders {
    #[cfg(feature = "tracing")]
    pub tracer_provider: SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: SdkMeterProvider,
}

/// Installs the global subscriber: an `RUST_LOG` filter (default `info`), a
/// console formatter, and the OTel layers of the enabled features.
pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    let console = tracing_subscriber::fmt::layer()
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_target(false);
    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(console);

    #[cfg(any(feature = "metrics", feature = "tracing"))]
    let scope = opentelemetry::InstrumentationScope::builder("taskwire")
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(opentelemetry_semantic_conventions::SCHEMA_URL)
        .build();

    #[cfg(feature = "tracing")]
    let (subscriber, tracer_provider) = {
        use opentelemetry::trace::TracerProvider;

        let provider = tracer_provider()?;
        opentelemetry::global::set_text_map_propagator(
            opentelemetry_sdk::propagation::TraceContextPropagator::new(),
        );
        opentelemetry::global::set_tracer_provider(provider.clone());
        let layer = tracing_opentelemetry::layer()
            .with_tracer(provider.tracer_with_scope(scope.clone()))
            .with_error_records_to_exceptions(true);
        (subscriber.with(layer), provider)
    };

    #[cfg(feature = "metrics")]
    let (subscriber, meter_provider) = {
        let provider = meter_provider()?;
        opentelemetry::global::set_meter_provider(provider.clone());
        taskwire::telemetry::init_metric_handles(&opentelemetry::global::meter_with_scope(scope));
        let layer = tracing_opentelemetry::MetricsLayer::new(provider.clone());
        (subscriber.with(layer), provider)
    };

    subscriber.init();

    Ok(TelemetryProviders {
        #[cfg(feature = "tracing")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

/// Flushes and stops the exporters. Failures go to stderr: the subscriber
/// may no longer be able to report them.
pub fn shutdown_telemetry(_providers: TelemetryProviders) {
    #[cfg(feature = "tracing")]
    {
        report("flushing traces", _providers.tracer_provider.force_flush());
        report("shutting down tracer", _providers.tracer_provider.shutdown());
    }
    #[cfg(feature = "metrics")]
    {
        report("flushing metrics", _providers.meter_provider.force_flush());
        report("shutting down meter", _providers.meter_provider.shutdown());
    }
}

#[cfg(any(feature = "metrics", feature = "tracing"))]
fn report<E: core::fmt::Debug>(action: &str, result: Result<(), E>) {
    if let Err(err) = result {
        eprintln!("Error {action}: {err:#?}");
    }
}

#[cfg(any(feature = "metrics", feature = "tracing"))]
fn resource() -> opentelemetry_sdk::Resource {
    use opentelemetry_semantic_conventions as semconv;

    let version = opentelemetry::KeyValue::new(
        semconv::resource::SERVICE_VERSION,
        env!("CARGO_PKG_VERSION"),
    );
    opentelemetry_sdk::Resource::builder()
        .with_service_name("taskwire-worker")
        .with_schema_url([version], semconv::SCHEMA_URL)
        .build()
}

#[cfg(feature = "tracing")]
fn tracer_provider() -> anyhow::Result<SdkTracerProvider> {
    #[allow(unused_mut)]
    let mut builder = SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    {
        let exporter = opentelemetry_stdout::SpanExporter::default();
        builder = builder.with_span_processor(batched(exporter));
    }

    #[cfg(feature = "honeycomb")]
    {
        use anyhow::Context;

        let exporter = Honeycomb::from_env()?
            .configure(opentelemetry_otlp::SpanExporter::builder().with_tonic())
            .build()
            .context("failed to build span exporter")?;
        builder = builder.with_span_processor(batched(exporter));
    }

    Ok(builder.build())
}

#[cfg(all(feature = "tracing", any(feature = "stdout", feature = "honeycomb")))]
fn batched<E>(exporter: E) -> opentelemetry_sdk::trace::BatchSpanProcessor
where
    E: opentelemetry_sdk::trace::SpanExporter + 'static,
{
    use opentelemetry_sdk::trace::{BatchConfigBuilder, BatchSpanProcessor};

    let config = BatchConfigBuilder::default()
        .with_scheduled_delay(EXPORT_INTERVAL)
        .with_max_queue_size(2048)
        .build();
    BatchSpanProcessor::builder(exporter)
        .with_batch_config(config)
        .build()
}

#[cfg(feature = "metrics")]
fn meter_provider() -> anyhow::Result<SdkMeterProvider> {
    #[allow(unused_mut)]
    let mut builder = SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    {
        let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(
            opentelemetry_stdout::MetricExporter::default(),
        )
        .with_interval(EXPORT_INTERVAL)
        .build();
        builder = builder.with_reader(reader);
    }

    #[cfg(feature = "honeycomb")]
    {
        use anyhow::Context;

        let exporter = Honeycomb::from_env()?
            .configure(opentelemetry_otlp::MetricExporter::builder().with_tonic())
            .with_temporality(opentelemetry_sdk::metrics::Temporality::Delta)
            .build()
            .context("failed to build metric exporter")?;
        builder = builder.with_periodic_exporter(exporter);
    }

    Ok(builder.build())
}

/// OTLP/gRPC destination, read from `HONEYCOMB_API_KEY`,
/// `HONEYCOMB_DATASET`, `HONEYCOMB_ENDPOINT` and `HONEYCOMB_COMPRESSION`.
#[cfg(feature = "honeycomb")]
struct Honeycomb {
    metadata: tonic::metadata::MetadataMap,
    endpoint: String,
    compression: opentelemetry_otlp::Compression,
}

#[cfg(feature = "honeycomb")]
impl Honeycomb {
    fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        use anyhow::Context;
        use core::str::FromStr;

        let var = |name: &str| lookup(name).with_context(|| format!("missing `{name}`"));

        let mut metadata = tonic::metadata::MetadataMap::new();
        metadata.insert(
            "x-honeycomb-team",
            var("HONEYCOMB_API_KEY")?.parse().context("invalid API key")?,
        );
        metadata.insert(
            "x-honeycomb-dataset",
            var("HONEYCOMB_DATASET")?.parse().context("invalid dataset")?,
        );
        let endpoint = var("HONEYCOMB_ENDPOINT")?;
        let compression = var("HONEYCOMB_COMPRESSION")?.to_ascii_lowercase();
        let compression = opentelemetry_otlp::Compression::from_str(&compression)?;

        Ok(Self {
            metadata,
            endpoint,
            compression,
        })
    }

    /// Applies the shared transport settings to a span or metric exporter.
    fn configure<B>(self, builder: B) -> B
    where
        B: opentelemetry_otlp::WithExportConfig + opentelemetry_otlp::WithTonicConfig,
    {
        builder
            .with_tls_config(tonic::transport::ClientTlsConfig::new().with_native_roots())
            .with_metadata(self.metadata)
            .with_compression(self.compression)
            .with_endpoint(self.endpoint)
            .with_protocol(opentelemetry_otlp::Protocol::Grpc)
            .with_timeout(core::time::Duration::from_secs(10))
    }
}
