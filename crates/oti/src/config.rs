//! Configuration types and resolution.
//!
//! Every field of [`OtiConfig`] is resolved independently with the same
//! priority (highest to lowest):
//! 1. Explicit settings ([`OtiSettings`])
//! 2. Recognized `OTEL_*` environment variables
//! 3. Defaults

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};

use crate::env::{self, EnvSource, ProcessEnv};
use crate::error::{ConfigWarning, ParseOptionError};
use crate::sampling::SamplingType;

pub const DEFAULT_SERVICE_NAME: &str = "oti-service";
pub const DEFAULT_SERVICE_NAMESPACE: &str = "default";
pub const DEFAULT_SERVICE_VERSION: &str = "0.0.0";
pub const DEFAULT_SPAN_PROCESSOR_TYPE: SpanProcessorType = SpanProcessorType::Batch;
pub const DEFAULT_EXPORTER_TYPE: ExporterType = ExporterType::Console;
pub const DEFAULT_EXPORTER_URL: &str = "http://localhost:4317";
pub const DEFAULT_SAMPLING_TYPE: SamplingType = SamplingType::ParentBasedAlwaysOn;
pub const DEFAULT_SAMPLING_RATIO: f64 = 1.0;
pub const DEFAULT_METRIC_EXPORTER_MODE: MetricExporterMode = MetricExporterMode::None;
pub const DEFAULT_METRIC_EXPORTER_ENDPOINT_ADDR: &str = "localhost";
pub const DEFAULT_METRIC_EXPORTER_ENDPOINT_PORT: u16 = 4317;
pub const DEFAULT_EXPORT_INTERVAL_MILLIS: u64 = 60_000;
pub const DEFAULT_EXPORT_TIMEOUT_MILLIS: u64 = 30_000;
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Declares a closed set of named options with case-insensitive parsing
/// and string-based serde.
macro_rules! named_options {
    (
        $(#[$meta:meta])*
        pub enum $name:ident ($kind:literal) {
            $(
                $(#[$vmeta:meta])*
                $variant:ident => $canonical:literal $(| $alias:literal)*
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $canonical),+
                }
            }
        }

        impl FromStr for $name {
            type Err = ParseOptionError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.trim();
                $(
                    if [$canonical $(, $alias)*].iter().any(|n| n.eq_ignore_ascii_case(s)) {
                        return Ok($name::$variant);
                    }
                )+
                Err(ParseOptionError {
                    kind: $kind,
                    value: s.to_string(),
                })
            }
        }

        impl TryFrom<String> for $name {
            type Error = ParseOptionError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                s.parse()
            }
        }

        impl From<$name> for String {
            fn from(v: $name) -> Self {
                v.as_str().to_string()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

named_options! {
    /// Where spans are exported.
    pub enum ExporterType ("exporter type") {
        /// OTLP over gRPC (tonic).
        OtelGrpc => "OTELGRPC" | "otlp_grpc" | "grpc",
        /// OTLP over HTTP with protobuf payloads.
        OtelHttp => "OTELHTTP" | "otlp_http" | "http",
        /// Pretty-printed to stdout.
        #[default]
        Console => "CONSOLE" | "stdout",
    }
}

named_options! {
    /// How finished spans are handed to the exporter.
    pub enum SpanProcessorType ("span processor type") {
        #[default]
        Batch => "BATCH",
        Simple => "SIMPLE",
    }
}

named_options! {
    /// Where metrics are exported. `None` skips the meter provider entirely.
    pub enum MetricExporterMode ("metric exporter mode") {
        #[default]
        None => "NONE" | "off",
        OtelGrpc => "OTELGRPC" | "otlp_grpc" | "grpc",
        OtelHttp => "OTELHTTP" | "otlp_http" | "http",
        Console => "CONSOLE" | "stdout",
    }
}

/// Span exporter selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExporterConfig {
    pub exporter_type: ExporterType,
    pub exporter_url: String,
}

/// Trace sampler selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplingConfig {
    pub trace_sampling_type: SamplingType,
    /// Only used by the ratio-based samplers.
    pub trace_sampling_ratio: f64,
}

/// Address of the OTLP metrics collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricExporterEndpointConfig {
    pub endpoint_addr: String,
    pub endpoint_port: u16,
}

impl MetricExporterEndpointConfig {
    /// Collector URL for the given transport. HTTP needs the signal path.
    pub fn url(&self, mode: MetricExporterMode) -> String {
        let base = format!("http://{}:{}", self.endpoint_addr, self.endpoint_port);
        match mode {
            MetricExporterMode::OtelHttp => format!("{base}/v1/metrics"),
            _ => base,
        }
    }
}

/// Periodic metric reader tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeriodicMetricReaderConfig {
    pub export_interval_millis: u64,
    pub export_timeout_millis: u64,
}

impl PeriodicMetricReaderConfig {
    pub fn export_interval(&self) -> Duration {
        Duration::from_millis(self.export_interval_millis)
    }

    pub fn export_timeout(&self) -> Duration {
        Duration::from_millis(self.export_timeout_millis)
    }
}

/// Fully resolved configuration. Built once, read once by [`crate::Oti::init`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OtiConfig {
    pub service_name: String,
    pub service_namespace: String,
    pub service_version: String,
    pub service_instance_id: String,
    pub span_processor_type: SpanProcessorType,
    pub exporter_config: ExporterConfig,
    pub sampling_config: SamplingConfig,
    pub metric_exporter_mode: MetricExporterMode,
    pub metric_exporter_endpoint: MetricExporterEndpointConfig,
    pub periodic_metric_reader: PeriodicMetricReaderConfig,
    /// `EnvFilter` directive for the fmt layer (e.g. "info", "oti=debug,info").
    pub log_level: String,
    #[serde(skip)]
    warnings: Vec<ConfigWarning>,
}

/// Explicit settings. Anything left `None` falls through to the environment,
/// then to the default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OtiSettings {
    #[serde(deserialize_with = "string_like")]
    pub service_name: Option<String>,
    #[serde(deserialize_with = "string_like")]
    pub service_namespace: Option<String>,
    #[serde(deserialize_with = "string_like")]
    pub service_version: Option<String>,
    #[serde(deserialize_with = "string_like")]
    pub service_instance_id: Option<String>,
    pub span_processor_type: Option<SpanProcessorType>,
    pub exporter: ExporterSettings,
    pub sampling: SamplingSettings,
    pub metric_exporter_mode: Option<MetricExporterMode>,
    pub metric_exporter_endpoint: MetricExporterEndpointSettings,
    pub periodic_metric_reader: PeriodicMetricReaderSettings,
    #[serde(deserialize_with = "string_like")]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExporterSettings {
    pub exporter_type: Option<ExporterType>,
    #[serde(deserialize_with = "string_like")]
    pub exporter_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SamplingSettings {
    pub trace_sampling_type: Option<SamplingType>,
    pub trace_sampling_ratio: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricExporterEndpointSettings {
    #[serde(deserialize_with = "string_like")]
    pub endpoint_addr: Option<String>,
    pub endpoint_port: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PeriodicMetricReaderSettings {
    pub export_interval_millis: Option<u64>,
    pub export_timeout_millis: Option<u64>,
}

/// Accept scalars for string fields. Layered sources such as figment's
/// `Env` hand over `OTI_SERVICE_VERSION=1.0` as a float and `42` as an
/// integer.
fn string_like<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringLike;

    impl<'de> Visitor<'de> for StringLike {
        type Value = Option<String>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a string or a scalar")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
            Ok(Some(v))
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_i128<E: de::Error>(self, v: i128) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_u128<E: de::Error>(self, v: u128) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        // Debug keeps the fraction: 1.0 stays "1.0", not "1".
        fn visit_f32<E: de::Error>(self, v: f32) -> Result<Self::Value, E> {
            Ok(Some(format!("{v:?}")))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
            Ok(Some(format!("{v:?}")))
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
            d.deserialize_any(StringLike)
        }
    }

    deserializer.deserialize_any(StringLike)
}

impl OtiSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    pub fn with_service_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.service_namespace = Some(namespace.into());
        self
    }

    pub fn with_service_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = Some(version.into());
        self
    }

    pub fn with_service_instance_id(mut self, id: impl Into<String>) -> Self {
        self.service_instance_id = Some(id.into());
        self
    }

    pub fn with_span_processor_type(mut self, kind: SpanProcessorType) -> Self {
        self.span_processor_type = Some(kind);
        self
    }

    pub fn with_exporter_type(mut self, kind: ExporterType) -> Self {
        self.exporter.exporter_type = Some(kind);
        self
    }

    pub fn with_exporter_url(mut self, url: impl Into<String>) -> Self {
        self.exporter.exporter_url = Some(url.into());
        self
    }

    pub fn with_sampling_type(mut self, kind: impl Into<SamplingType>) -> Self {
        self.sampling.trace_sampling_type = Some(kind.into());
        self
    }

    pub fn with_sampling_ratio(mut self, ratio: f64) -> Self {
        self.sampling.trace_sampling_ratio = Some(ratio);
        self
    }

    pub fn with_metric_exporter_mode(mut self, mode: MetricExporterMode) -> Self {
        self.metric_exporter_mode = Some(mode);
        self
    }

    pub fn with_metric_exporter_endpoint(mut self, addr: impl Into<String>, port: u16) -> Self {
        self.metric_exporter_endpoint.endpoint_addr = Some(addr.into());
        self.metric_exporter_endpoint.endpoint_port = Some(port);
        self
    }

    pub fn with_export_interval_millis(mut self, millis: u64) -> Self {
        self.periodic_metric_reader.export_interval_millis = Some(millis);
        self
    }

    pub fn with_export_timeout_millis(mut self, millis: u64) -> Self {
        self.periodic_metric_reader.export_timeout_millis = Some(millis);
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }
}

impl Default for OtiConfig {
    /// Defaults only; the environment is not consulted.
    fn default() -> Self {
        Self::resolve(OtiSettings::default(), &std::collections::HashMap::<String, String>::new())
    }
}

impl OtiConfig {
    /// Resolve against the process environment with no explicit settings.
    pub fn from_env() -> Self {
        Self::resolve(OtiSettings::default(), &ProcessEnv)
    }

    /// Resolve explicit settings against the process environment.
    pub fn from_settings(settings: OtiSettings) -> Self {
        Self::resolve(settings, &ProcessEnv)
    }

    /// Resolve explicit settings against `env`, field by field.
    pub fn resolve<E: EnvSource>(settings: OtiSettings, env: &E) -> Self {
        let OtiSettings {
            service_name,
            service_namespace,
            service_version,
            service_instance_id,
            span_processor_type,
            exporter,
            sampling,
            metric_exporter_mode,
            metric_exporter_endpoint,
            periodic_metric_reader,
            log_level,
        } = settings;
        let mut warnings = Vec::new();

        let trace_sampling_type = sampling
            .trace_sampling_type
            .or_else(|| env.non_empty(env::OTEL_TRACES_SAMPLER).map(SamplingType::from))
            .unwrap_or(DEFAULT_SAMPLING_TYPE);
        if let SamplingType::Unrecognized(ref name) = trace_sampling_type {
            warnings.push(ConfigWarning::UnrecognizedSampler(name.clone()));
        }

        Self {
            service_name: service_name
                .or_else(|| env.non_empty(env::OTEL_SERVICE_NAME))
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
            service_namespace: service_namespace
                .unwrap_or_else(|| DEFAULT_SERVICE_NAMESPACE.to_string()),
            service_version: service_version.unwrap_or_else(|| DEFAULT_SERVICE_VERSION.to_string()),
            service_instance_id: service_instance_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            span_processor_type: span_processor_type.unwrap_or(DEFAULT_SPAN_PROCESSOR_TYPE),
            exporter_config: ExporterConfig {
                exporter_type: exporter.exporter_type.unwrap_or(DEFAULT_EXPORTER_TYPE),
                exporter_url: exporter
                    .exporter_url
                    .unwrap_or_else(|| DEFAULT_EXPORTER_URL.to_string()),
            },
            sampling_config: SamplingConfig {
                trace_sampling_type,
                trace_sampling_ratio: sampling
                    .trace_sampling_ratio
                    .or_else(|| parsed_env(env, env::OTEL_TRACES_SAMPLER_ARG, &mut warnings))
                    .unwrap_or(DEFAULT_SAMPLING_RATIO),
            },
            metric_exporter_mode: metric_exporter_mode.unwrap_or(DEFAULT_METRIC_EXPORTER_MODE),
            metric_exporter_endpoint: MetricExporterEndpointConfig {
                endpoint_addr: metric_exporter_endpoint
                    .endpoint_addr
                    .unwrap_or_else(|| DEFAULT_METRIC_EXPORTER_ENDPOINT_ADDR.to_string()),
                endpoint_port: metric_exporter_endpoint
                    .endpoint_port
                    .unwrap_or(DEFAULT_METRIC_EXPORTER_ENDPOINT_PORT),
            },
            periodic_metric_reader: PeriodicMetricReaderConfig {
                export_interval_millis: periodic_metric_reader
                    .export_interval_millis
                    .or_else(|| {
                        parsed_env(env, env::OTEL_METRIC_EXPORT_INTERVAL_MILLIS, &mut warnings)
                    })
                    .unwrap_or(DEFAULT_EXPORT_INTERVAL_MILLIS),
                export_timeout_millis: periodic_metric_reader
                    .export_timeout_millis
                    .or_else(|| {
                        parsed_env(env, env::OTEL_METRIC_EXPORT_TIMEOUT_MILLIS, &mut warnings)
                    })
                    .unwrap_or(DEFAULT_EXPORT_TIMEOUT_MILLIS),
            },
            log_level: log_level.unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            warnings,
        }
    }

    /// Problems noticed during resolution, in the order they were found.
    pub fn warnings(&self) -> &[ConfigWarning] {
        &self.warnings
    }
}

/// Parse a numeric environment value. Malformed values are recorded and ignored.
fn parsed_env<E: EnvSource, T: FromStr>(
    env: &E,
    key: &'static str,
    warnings: &mut Vec<ConfigWarning>,
) -> Option<T> {
    let raw = env.non_empty(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warnings.push(ConfigWarning::MalformedEnv {
                variable: key,
                value: raw,
            });
            None
        }
    }
}
