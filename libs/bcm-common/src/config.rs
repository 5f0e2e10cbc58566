//! Layered configuration loading
//!
//! Priority (highest to lowest):
//! 1. Environment variables (`BCM_` prefix, `__` separates nested keys;
//!    `BCM_LOG` is the log filter and never a config key)
//! 2. Explicit config file passed by the caller
//! 3. `config/{name}.{toml,yaml,json}` in the working directory
//! 4. `T::default()`

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CommonError, Result};

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "BCM_";

fn file_provider(path: &Path) -> Result<Figment> {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| CommonError::Config("Config file must have an extension".to_string()))?;

    match extension {
        "toml" => Ok(Figment::new().merge(Toml::file(path))),
        "yaml" | "yml" => Ok(Figment::new().merge(Yaml::file(path))),
        "json" => Ok(Figment::new().merge(Json::file(path))),
        _ => Err(CommonError::Config(format!(
            "Unsupported config file format: {}",
            extension
        ))),
    }
}

/// Load configuration from defaults, well-known files, an optional explicit
/// file and the environment
pub fn load_config<T>(name: &str, explicit: Option<&Path>) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Serialize + Default,
{
    let mut figment = Figment::from(Serialized::defaults(T::default()))
        .merge(Toml::file(format!("config/{}.toml", name)))
        .merge(Yaml::file(format!("config/{}.yaml", name)))
        .merge(Json::file(format!("config/{}.json", name)));

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(CommonError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        figment = figment.merge(file_provider(path)?);
    }

    figment
        .merge(Env::prefixed(ENV_PREFIX).ignore(&["LOG"]).split("__"))
        .extract()
        .map_err(|e| CommonError::Config(format!("Failed to load configuration: {}", e)))
}

/// Load configuration from a single file
pub fn load_config_from_file<T, P>(path: P) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
    P: AsRef<Path>,
{
    file_provider(path.as_ref())?
        .extract()
        .map_err(|e| CommonError::Config(format!("Failed to load configuration from file: {}", e)))
}
