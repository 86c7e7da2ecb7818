//! Environment lookups used during configuration resolution.
//!
//! Resolution never reads `std::env` directly; it goes through an
//! [`EnvSource`] so callers (and tests) can hand in an explicit environment.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};

/// Service name reported in the `service.name` resource attribute.
pub const OTEL_SERVICE_NAME: &str = "OTEL_SERVICE_NAME";
/// Sampler selection (`always_on`, `traceidratio`, ...).
pub const OTEL_TRACES_SAMPLER: &str = "OTEL_TRACES_SAMPLER";
/// Sampler argument, the ratio for ratio-based samplers.
pub const OTEL_TRACES_SAMPLER_ARG: &str = "OTEL_TRACES_SAMPLER_ARG";
/// Periodic metric reader export interval in milliseconds.
pub const OTEL_METRIC_EXPORT_INTERVAL_MILLIS: &str = "OTEL_METRIC_EXPORT_INTERVAL_MILLIS";
/// Periodic metric reader export timeout in milliseconds.
pub const OTEL_METRIC_EXPORT_TIMEOUT_MILLIS: &str = "OTEL_METRIC_EXPORT_TIMEOUT_MILLIS";

/// A read-only view of environment variables.
pub trait EnvSource {
    /// Returns the value of `key`, or `None` when it is unset.
    fn var(&self, key: &str) -> Option<String>;

    /// Like [`EnvSource::var`], but treats an empty or all-whitespace value as unset.
    fn non_empty(&self, key: &str) -> Option<String> {
        self.var(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

/// The environment of the running process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl<K, V, S> EnvSource for HashMap<K, V, S>
where
    K: Borrow<str> + Hash + Eq,
    V: AsRef<str>,
    S: BuildHasher,
{
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).map(|v| v.as_ref().to_string())
    }
}

impl<E: EnvSource + ?Sized> EnvSource for &E {
    fn var(&self, key: &str) -> Option<String> {
        (**self).var(key)
    }
}
