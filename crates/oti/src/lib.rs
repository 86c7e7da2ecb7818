//! OpenTelemetry initialization façade.
//!
//! Resolve an [`OtiConfig`] from explicit [`OtiSettings`], `OTEL_*`
//! environment variables and defaults, then hand it to [`Oti::init`] to
//! register tracer and meter providers. Keep the returned [`Oti`] alive and
//! call [`Oti::shutdown`] before exit.
//!
//! ```no_run
//! use oti::{ExporterType, Oti, OtiConfig, OtiSettings};
//!
//! # fn main() -> Result<(), oti::OtiError> {
//! let config = OtiConfig::from_settings(
//!     OtiSettings::new()
//!         .with_service_name("checkout")
//!         .with_exporter_type(ExporterType::OtelHttp)
//!         .with_exporter_url("http://localhost:4318/v1/traces"),
//! );
//! let mut oti = Oti::init(&config)?;
//! // ... instrumented work ...
//! oti.shutdown()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod env;
pub mod error;
pub mod query;
pub mod sampling;
pub mod sdk;

pub use config::{
    ExporterConfig, ExporterType, MetricExporterEndpointConfig, MetricExporterMode, OtiConfig,
    OtiSettings, PeriodicMetricReaderConfig, SamplingConfig, SpanProcessorType,
};
pub use env::{EnvSource, ProcessEnv};
pub use error::{ConfigWarning, OtiError, ParseOptionError, QueryError};
pub use query::{PollPolicy, TraceQueryClient, TracesResponse};
pub use sampling::SamplingType;
pub use sdk::Oti;
