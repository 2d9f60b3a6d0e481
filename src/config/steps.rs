use super::ConfigDict;
use crate::error::{BigVisionError, Result};

const UNITS: [&str; 4] = ["steps", "examples", "epochs", "percent"];

/// Resolves a step count given as exactly one of `{name}_steps`,
/// `{name}_examples`, `{name}_epochs` or `{name}_percent`.
///
/// Keys holding `None` count as absent. Fractional results truncate toward
/// zero. With nothing set, `default` is returned, or an error if there is no
/// default.
pub fn get_steps(
    name: &str,
    cfg: &ConfigDict,
    data_size: Option<usize>,
    batch_size: Option<usize>,
    total_steps: Option<usize>,
    default: Option<usize>,
) -> Result<usize> {
    let key = |unit: &str| {
        if name.is_empty() {
            unit.to_string()
        } else {
            format!("{}_{}", name, unit)
        }
    };

    let found: Vec<&str> = UNITS
        .iter()
        .copied()
        .filter(|unit| cfg.get(&key(*unit)).map_or(false, |v| !v.is_none()))
        .collect();

    let unit = match found.as_slice() {
        [] => {
            return default.ok_or_else(|| {
                BigVisionError::MissingKey(format!("one of {}", UNITS.map(|u| key(u)).join(", ")))
            })
        }
        [unit] => *unit,
        _ => {
            return Err(BigVisionError::InvalidArgument(format!(
                "only one of {} may be set",
                found.iter().map(|u| key(*u)).collect::<Vec<_>>().join(", ")
            )))
        }
    };

    let path = key(unit);
    let requires = |what: &str| {
        BigVisionError::InvalidArgument(format!("`{}` requires {} to be known", path, what))
    };
    let steps = match unit {
        "steps" => non_negative(cfg.get_int(&path)?, &path)?,
        "examples" => {
            let batch_size = batch_size.filter(|b| *b > 0).ok_or_else(|| requires("batch size"))?;
            non_negative(cfg.get_int(&path)?, &path)? / batch_size
        }
        "epochs" => {
            let batch_size = batch_size.filter(|b| *b > 0).ok_or_else(|| requires("batch size"))?;
            let data_size = data_size.ok_or_else(|| requires("dataset size"))?;
            let epochs = non_negative_float(cfg.get_float(&path)?, &path)?;
            (epochs * data_size as f64 / batch_size as f64) as usize
        }
        _ => {
            let total_steps = total_steps.ok_or_else(|| requires("total steps"))?;
            (non_negative_float(cfg.get_float(&path)?, &path)? * total_steps as f64) as usize
        }
    };
    Ok(steps)
}

fn non_negative(value: i64, path: &str) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| BigVisionError::InvalidArgument(format!("`{}` must be non-negative, got {}", path, value)))
}

fn non_negative_float(value: f64, path: &str) -> Result<f64> {
    if value >= 0.0 {
        Ok(value)
    } else {
        Err(BigVisionError::InvalidArgument(format!("`{}` must be non-negative, got {}", path, value)))
    }
}
