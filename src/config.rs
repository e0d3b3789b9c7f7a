//! Process-wide defaults, layered the way the rest of the ambient stack
//! expects: compiled-in defaults, then an optional file, then environment
//! overrides.

use serde::{Deserialize, Serialize};

use crate::policy::ProcessDefaults;

/// The on-disk/env-overridable shape of [`ProcessDefaults`]. Kept separate
/// from the policy-facing type so the resolver never has to know about
/// `figment`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub no_oversubscribe: bool,
    pub no_use_local: bool,
    pub allow_overload: bool,
    pub daemons_on_head_node: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        let defaults = ProcessDefaults::default();
        PlannerConfig {
            no_oversubscribe: defaults.no_oversubscribe,
            no_use_local: defaults.no_use_local,
            allow_overload: defaults.allow_overload,
            daemons_on_head_node: defaults.daemons_on_head_node,
        }
    }
}

impl From<PlannerConfig> for ProcessDefaults {
    fn from(cfg: PlannerConfig) -> Self {
        ProcessDefaults {
            no_oversubscribe: cfg.no_oversubscribe,
            no_use_local: cfg.no_use_local,
            allow_overload: cfg.allow_overload,
            daemons_on_head_node: cfg.daemons_on_head_node,
        }
    }
}

#[cfg(feature = "figment_config")]
mod layered {
    use super::PlannerConfig;
    use figment::providers::{Env, Format, Serialized, Yaml};
    use figment::Figment;

    /// Layers compiled defaults, an optional YAML file, then
    /// `JOBPLAN_`-prefixed environment variables on top.
    pub fn load(config_path: Option<&str>) -> Result<PlannerConfig, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(PlannerConfig::default()));
        if let Some(path) = config_path {
            figment = figment.merge(Yaml::file(path));
        }
        figment = figment.merge(Env::prefixed("JOBPLAN_"));
        figment.extract()
    }
}

#[cfg(feature = "figment_config")]
pub use layered::load;

#[cfg(not(feature = "figment_config"))]
pub fn load(_config_path: Option<&str>) -> Result<PlannerConfig, &'static str> {
    Ok(PlannerConfig::default())
}
