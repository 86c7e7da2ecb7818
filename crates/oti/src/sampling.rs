//! Trace sampling selection.
//!
//! Sampler names follow the `OTEL_TRACES_SAMPLER` vocabulary. The short
//! upper-case forms (`ALWAYS`, `NEVER`, `RATIO`) are accepted as aliases.

use std::fmt;
use std::str::FromStr;

use opentelemetry_sdk::trace::Sampler;
use serde::{Deserialize, Serialize};

/// Which sampler the tracer provider is built with.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SamplingType {
    AlwaysOn,
    AlwaysOff,
    TraceIdRatio,
    #[default]
    ParentBasedAlwaysOn,
    ParentBasedAlwaysOff,
    ParentBasedTraceIdRatio,
    /// A name this crate does not know, kept as given (trimmed).
    Unrecognized(String),
}

impl SamplingType {
    pub fn as_str(&self) -> &str {
        match self {
            SamplingType::AlwaysOn => "always_on",
            SamplingType::AlwaysOff => "always_off",
            SamplingType::TraceIdRatio => "traceidratio",
            SamplingType::ParentBasedAlwaysOn => "parentbased_always_on",
            SamplingType::ParentBasedAlwaysOff => "parentbased_always_off",
            SamplingType::ParentBasedTraceIdRatio => "parentbased_traceidratio",
            SamplingType::Unrecognized(name) => name,
        }
    }

    /// Build the SDK sampler. `ratio` only matters for the ratio-based kinds.
    ///
    /// Unrecognized names fall back to `ParentBased(AlwaysOn)`, the SDK default.
    /// Resolution records a [`crate::ConfigWarning`] for them.
    pub fn to_sampler(&self, ratio: f64) -> Sampler {
        match self {
            SamplingType::AlwaysOn => Sampler::AlwaysOn,
            SamplingType::AlwaysOff => Sampler::AlwaysOff,
            SamplingType::TraceIdRatio => Sampler::TraceIdRatioBased(ratio),
            SamplingType::ParentBasedAlwaysOn => Sampler::ParentBased(Box::new(Sampler::AlwaysOn)),
            SamplingType::ParentBasedAlwaysOff => {
                Sampler::ParentBased(Box::new(Sampler::AlwaysOff))
            }
            SamplingType::ParentBasedTraceIdRatio => {
                Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(ratio)))
            }
            SamplingType::Unrecognized(_) => Sampler::ParentBased(Box::new(Sampler::AlwaysOn)),
        }
    }
}

impl FromStr for SamplingType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parsed = match s.to_ascii_lowercase().as_str() {
            "always_on" | "always" => SamplingType::AlwaysOn,
            "always_off" | "never" => SamplingType::AlwaysOff,
            "traceidratio" | "ratio" => SamplingType::TraceIdRatio,
            "parentbased_always_on" => SamplingType::ParentBasedAlwaysOn,
            "parentbased_always_off" => SamplingType::ParentBasedAlwaysOff,
            "parentbased_traceidratio" => SamplingType::ParentBasedTraceIdRatio,
            _ => SamplingType::Unrecognized(s.to_string()),
        };
        Ok(parsed)
    }
}

impl From<String> for SamplingType {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(parsed) => parsed,
            Err(never) => match never {},
        }
    }
}

impl From<&str> for SamplingType {
    fn from(s: &str) -> Self {
        SamplingType::from(s.to_string())
    }
}

impl From<SamplingType> for String {
    fn from(t: SamplingType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for SamplingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use opentelemetry::trace::{
        SamplingDecision, SpanContext, SpanId, SpanKind, TraceContextExt, TraceFlags, TraceId,
        TraceState,
    };
    use opentelemetry::Context;
    use opentelemetry_sdk::trace::ShouldSample;

    use super::*;

    #[test]
    fn test_parse_env_names_and_aliases() {
        assert_eq!(SamplingType::from("always_off"), SamplingType::AlwaysOff);
        assert_eq!(SamplingType::from("ALWAYS"), SamplingType::AlwaysOn);
        assert_eq!(SamplingType::from("NEVER"), SamplingType::AlwaysOff);
        assert_eq!(SamplingType::from("Ratio"), SamplingType::TraceIdRatio);
        assert_eq!(
            SamplingType::from("ParentBased_TraceIdRatio"),
            SamplingType::ParentBasedTraceIdRatio
        );
    }

    #[test]
    fn test_unknown_name_is_carried_verbatim() {
        let t = SamplingType::from("jaeger_remote");
        assert_eq!(t, SamplingType::Unrecognized("jaeger_remote".to_string()));
        assert_eq!(t.to_string(), "jaeger_remote");
    }

    /// Decision for a root span (no parent) with the given trace id.
    fn root_decision(sampler: &Sampler, trace_id: u128) -> SamplingDecision {
        sampler
            .should_sample(
                None,
                TraceId::from(trace_id),
                "span-name",
                &SpanKind::Internal,
                &[],
                &[],
            )
            .decision
    }

    fn sampled_parent() -> Context {
        Context::new().with_remote_span_context(SpanContext::new(
            TraceId::from(7),
            SpanId::from(7),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        ))
    }

    #[test]
    fn test_sampler_mapping() {
        let low = 1;
        let high = u128::MAX;

        assert_eq!(
            root_decision(&SamplingType::AlwaysOn.to_sampler(0.0), high),
            SamplingDecision::RecordAndSample
        );
        assert_eq!(
            root_decision(&SamplingType::AlwaysOff.to_sampler(1.0), low),
            SamplingDecision::Drop
        );

        // Ratio samplers keep trace ids below the ratio's cut and drop the rest.
        let ratio = SamplingType::TraceIdRatio.to_sampler(0.5);
        assert_eq!(root_decision(&ratio, low), SamplingDecision::RecordAndSample);
        assert_eq!(root_decision(&ratio, high), SamplingDecision::Drop);

        let parent_ratio = SamplingType::ParentBasedTraceIdRatio.to_sampler(0.5);
        assert_eq!(root_decision(&parent_ratio, low), SamplingDecision::RecordAndSample);
        assert_eq!(root_decision(&parent_ratio, high), SamplingDecision::Drop);

        assert_eq!(
            root_decision(&SamplingType::ParentBasedAlwaysOn.to_sampler(1.0), high),
            SamplingDecision::RecordAndSample
        );

        let parent_off = SamplingType::ParentBasedAlwaysOff.to_sampler(1.0);
        assert_eq!(root_decision(&parent_off, low), SamplingDecision::Drop);

        // A sampled parent overrides the root sampler.
        let decision = parent_off
            .should_sample(
                Some(&sampled_parent()),
                TraceId::from(7),
                "child",
                &SpanKind::Internal,
                &[],
                &[],
            )
            .decision;
        assert_eq!(decision, SamplingDecision::RecordAndSample);
    }

    #[test]
    fn test_unrecognized_falls_back_to_parent_based_always_on() {
        let sampler = SamplingType::from("bogus").to_sampler(0.0);
        assert_eq!(root_decision(&sampler, u128::MAX), SamplingDecision::RecordAndSample);
        assert!(format!("{sampler:?}").starts_with("ParentBased"));
    }

    #[test]
    fn test_unrecognized_name_is_trimmed() {
        assert_eq!(SamplingType::from(" xray "), SamplingType::from("xray"));
        assert_eq!(SamplingType::from("\txray\n").as_str(), "xray");
    }

    #[test]
    fn test_serde_uses_names() {
        let t: SamplingType = serde_json::from_str("\"traceidratio\"").unwrap();
        assert_eq!(t, SamplingType::TraceIdRatio);
        assert_eq!(
            serde_json::to_string(&SamplingType::ParentBasedAlwaysOn).unwrap(),
            "\"parentbased_always_on\""
        );
    }
}
