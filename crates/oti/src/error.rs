//! Error types.

use opentelemetry_otlp::ExporterBuildError;
use opentelemetry_sdk::error::OTelSdkError;

/// Failures while wiring or tearing down the SDK.
#[derive(Debug, thiserror::Error)]
pub enum OtiError {
    #[error("failed to build {signal} exporter: {source}")]
    ExporterBuild {
        signal: &'static str,
        #[source]
        source: ExporterBuildError,
    },

    #[error("failed to flush {signal} provider: {source}")]
    Flush {
        signal: &'static str,
        #[source]
        source: OTelSdkError,
    },

    #[error("failed to shut down {signal} provider: {source}")]
    Shutdown {
        signal: &'static str,
        #[source]
        source: OTelSdkError,
    },
}

/// A configuration option name that is not one of the known values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized {kind} `{value}`")]
pub struct ParseOptionError {
    pub kind: &'static str,
    pub value: String,
}

/// A configuration problem that did not stop resolution or init.
///
/// Collected while resolving and logged by [`crate::Oti::init`] once the
/// subscriber is in place.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigWarning {
    #[error("ignoring malformed {variable}=`{value}`, using the default")]
    MalformedEnv {
        variable: &'static str,
        value: String,
    },

    #[error("unrecognized trace sampler `{0}`, using parentbased_always_on")]
    UnrecognizedSampler(String),

    #[error("{exporter} exporter cannot use the SIMPLE span processor inside a tokio runtime, using BATCH")]
    SimpleProcessorInRuntime { exporter: &'static str },
}

/// Failures while querying the trace backend.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("trace query request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("trace query returned status {0}")]
    Status(reqwest::StatusCode),
}
