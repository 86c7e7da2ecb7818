//! Probe settings loading.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use oti::OtiSettings;

/// Load explicit OTI settings from a TOML file and environment variables.
///
/// Priority (highest to lowest):
/// 1. Environment variables (OTI_ prefix, __ for nesting)
/// 2. TOML config file (a missing file is skipped)
///
/// Both layers count as explicit settings, so they beat `OTEL_*` variables
/// during resolution.
pub fn load(config_path: &str) -> anyhow::Result<OtiSettings> {
    let settings: OtiSettings = Figment::new()
        .merge(Toml::file(config_path))
        .merge(Env::prefixed("OTI_").split("__"))
        .extract()?;

    Ok(settings)
}
