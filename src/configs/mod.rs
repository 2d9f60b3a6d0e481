//! Registered experiment configs.
//!
//! A config string is `name` or `name:arg`, for example
//! `vit_i1k:variant=B/32,aug=light1`.

pub mod bit_i21k;
pub mod common_fewshot;
pub mod vit_i1k;

use tracing::info;

use crate::config::ConfigDict;
use crate::error::{BigVisionError, Result};

/// Builds a config from the argument part of a config string.
pub type ConfigBuilder = fn(Option<&str>) -> Result<ConfigDict>;

pub const REGISTRY: &[(&str, ConfigBuilder)] = &[
    ("bit_i21k", bit_i21k::get_config),
    ("vit_i1k", vit_i1k::get_config),
];

pub fn names() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|(name, _)| *name)
}

/// Resolves a config string to a locked config.
pub fn get_config(spec: &str) -> Result<ConfigDict> {
    let (name, arg) = match spec.split_once(':') {
        Some((name, arg)) => (name, Some(arg)),
        None => (spec, None),
    };
    let name = name.trim_end_matches(".py");
    let builder = REGISTRY
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, b)| *b)
        .ok_or_else(|| BigVisionError::unknown("config", name))?;
    info!(config = name, arg = arg.unwrap_or(""), "building config");
    builder(arg)
}

/// Builds a config and applies `key=value` overrides in order.
pub fn get_config_with_overrides<S: AsRef<str>>(spec: &str, overrides: &[S]) -> Result<ConfigDict> {
    let mut config = get_config(spec)?;
    for assignment in overrides {
        config.apply_override(assignment.as_ref())?;
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_name_and_arg() {
        let cfg = get_config("vit_i1k:variant=S/32").unwrap();
        assert_eq!(cfg.get_str("model.variant").unwrap(), "S/32");
        let cfg = get_config("bit_i21k").unwrap();
        assert_eq!(cfg.get_str("model_name").unwrap(), "bit");
        assert!(get_config("vit_i1k.py").is_ok());
    }

    #[test]
    fn test_unknown_config() {
        assert!(matches!(
            get_config("mae_i1k"),
            Err(BigVisionError::Unknown { kind: "config", .. })
        ));
        assert!(matches!(
            get_config("bit_i21k:runlocal,variant=nonsense"),
            Err(BigVisionError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let cfg = get_config_with_overrides("vit_i1k", &["num_epochs=90", "val.split=validation[:100]"]).unwrap();
        assert_eq!(cfg.get_int("num_epochs").unwrap(), 90);
        assert_eq!(cfg.get_str("val.split").unwrap(), "validation[:100]");
        assert!(get_config_with_overrides("vit_i1k", &["not_a_key=1"]).is_err());
    }

    #[test]
    fn test_names() {
        assert_eq!(names().collect::<Vec<_>>(), vec!["bit_i21k", "vit_i1k"]);
    }
}
