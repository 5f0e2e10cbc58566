//! bcmctl configuration: engine limits plus logging

use serde::{Deserialize, Serialize};

use bcm_cases::EngineConfig;
use bcm_common::LogConfig;

/// Name used for `config/{name}.{toml,yaml,json}`
pub const CONFIG_NAME: &str = "bcm";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let cfg: AppConfig = serde_yaml::from_str("engine:\n  tick_ms: 100\n").unwrap();
        assert_eq!(cfg.engine.tick_ms, 100);
        assert_eq!(cfg.engine.active_capacity, 64);
        assert_eq!(cfg.log, LogConfig::default());
    }
}
