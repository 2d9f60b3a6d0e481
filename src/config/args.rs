use super::{ConfigDict, ConfigValue};
use crate::error::{BigVisionError, Result};

/// Parses the argument part of a config string, e.g. the
/// `variant=B/16,aug=light1` in `vit_i1k:variant=B/16,aug=light1`.
///
/// Every key must appear in `defaults`, whose types decide how values are
/// parsed. A bare key without `=` sets a bool default to true.
pub fn parse_arg(arg: Option<&str>, defaults: &[(&str, ConfigValue)]) -> Result<ConfigDict> {
    let mut parsed = ConfigDict::from_pairs(defaults.iter().map(|(k, v)| (*k, v.clone())));
    let arg = match arg.map(str::trim) {
        Some(a) if !a.is_empty() => a,
        _ => return Ok(parsed),
    };

    for item in arg.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (key, raw) = match item.split_once('=') {
            Some((k, v)) => (k.trim(), Some(v.trim())),
            None => (item, None),
        };
        let default = parsed
            .get(key)
            .map_err(|_| BigVisionError::InvalidArgument(format!("unknown config argument `{}`", key)))?;
        let value = match (raw, default) {
            (Some(raw), default) => parse_typed(default, raw, key)?,
            (None, ConfigValue::Bool(_)) => ConfigValue::Bool(true),
            (None, other) => {
                return Err(BigVisionError::InvalidArgument(format!(
                    "argument `{}` of type {} needs a value",
                    key,
                    other.type_name()
                )))
            }
        };
        parsed.set(key, value)?;
    }
    Ok(parsed)
}

/// Parses `raw` as a value of the same type as `template`.
///
/// A `None` template infers the type from the text. Lists and dicts are
/// given as JSON.
pub fn parse_typed(template: &ConfigValue, raw: &str, key: &str) -> Result<ConfigValue> {
    let invalid = |expected: &str| {
        BigVisionError::InvalidArgument(format!("`{}` expects {}, got `{}`", key, expected, raw))
    };
    let value = match template {
        ConfigValue::Bool(_) => ConfigValue::Bool(parse_bool(raw).ok_or_else(|| invalid("a bool"))?),
        ConfigValue::Int(_) => ConfigValue::Int(raw.parse().map_err(|_| invalid("an int"))?),
        ConfigValue::Float(_) => ConfigValue::Float(raw.parse().map_err(|_| invalid("a float"))?),
        ConfigValue::Str(_) => ConfigValue::Str(raw.to_string()),
        ConfigValue::None => infer(raw),
        ConfigValue::List(_) | ConfigValue::Dict(_) => {
            let parsed: ConfigValue =
                serde_json::from_str(raw).map_err(|_| invalid(template.type_name()))?;
            if parsed.type_name() != template.type_name() {
                return Err(invalid(template.type_name()));
            }
            parsed
        }
    };
    Ok(value)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "true" | "True" | "1" => Some(true),
        "false" | "False" | "0" => Some(false),
        _ => None,
    }
}

fn infer(raw: &str) -> ConfigValue {
    if raw == "None" {
        ConfigValue::None
    } else if let Ok(i) = raw.parse::<i64>() {
        ConfigValue::Int(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        ConfigValue::Float(f)
    } else if let Some(b) = parse_bool(raw) {
        ConfigValue::Bool(b)
    } else {
        ConfigValue::Str(raw.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> Vec<(&'static str, ConfigValue)> {
        vec![
            ("variant", ConfigValue::from("B/16")),
            ("runlocal", ConfigValue::from(false)),
            ("aug", ConfigValue::from("")),
        ]
    }

    #[test]
    fn test_empty_arg_gives_defaults() {
        let arg = parse_arg(None, &defaults()).unwrap();
        assert_eq!(arg.get_str("variant").unwrap(), "B/16");
        assert!(!arg.get_bool("runlocal").unwrap());
        let arg = parse_arg(Some(""), &defaults()).unwrap();
        assert_eq!(arg.get_str("aug").unwrap(), "");
    }

    #[test]
    fn test_values_follow_default_types() {
        let arg = parse_arg(Some("variant=B/32,aug=light1,runlocal=True"), &defaults()).unwrap();
        assert_eq!(arg.get_str("variant").unwrap(), "B/32");
        assert_eq!(arg.get_str("aug").unwrap(), "light1");
        assert!(arg.get_bool("runlocal").unwrap());
    }

    #[test]
    fn test_bare_bool_flag() {
        let arg = parse_arg(Some("runlocal"), &defaults()).unwrap();
        assert!(arg.get_bool("runlocal").unwrap());
        assert!(parse_arg(Some("variant"), &defaults()).is_err());
    }

    #[test]
    fn test_unknown_key_fails() {
        assert!(parse_arg(Some("model=vit"), &defaults()).is_err());
        assert!(parse_arg(Some("runlocal=maybe"), &defaults()).is_err());
    }

    #[test]
    fn test_parse_typed_lists_and_inference() {
        let template = ConfigValue::list(vec![1, 5]);
        let parsed = parse_typed(&template, "[1, 5, 10]", "shots").unwrap();
        assert_eq!(parsed, ConfigValue::list(vec![1, 5, 10]));
        assert!(parse_typed(&template, "{\"a\": 1}", "shots").is_err());

        assert_eq!(parse_typed(&ConfigValue::None, "3", "x").unwrap(), ConfigValue::Int(3));
        assert_eq!(parse_typed(&ConfigValue::None, "0.5", "x").unwrap(), ConfigValue::Float(0.5));
        assert_eq!(parse_typed(&ConfigValue::None, "abc", "x").unwrap(), ConfigValue::from("abc"));
    }
}
