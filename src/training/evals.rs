use serde::Serialize;

use crate::config::{ConfigDict, ConfigValue};
use crate::error::{BigVisionError, Result};

/// One evaluator of a run, resolved from its config block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalSpec {
    pub name: String,
    /// Evaluator type, e.g. `classification` or `fewshot_lsr`.
    pub kind: String,
    pub dataset: String,
    pub split: Option<String>,
    pub pp_fn: Option<String>,
    pub log_steps: Option<usize>,
    /// The full block, for evaluator-specific settings.
    pub block: ConfigDict,
}

/// Resolves the `evals` list of `(name, kind)` pairs against `config`.
pub fn resolve_evals(config: &ConfigDict) -> Result<Vec<EvalSpec>> {
    let default_dataset = config.get_str("dataset")?;
    config
        .get_list("evals")?
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let (name, kind) = eval_pair(entry, i)?;
            let block = config
                .get_dict(name)
                .map_err(|_| BigVisionError::MissingKey(format!("evaluator block `{}`", name)))?;
            EvalSpec::from_block(name, kind, block, default_dataset)
        })
        .collect()
}

fn eval_pair(entry: &ConfigValue, index: usize) -> Result<(&str, &str)> {
    let malformed = || BigVisionError::InvalidArgument(format!("evals[{}] must be a (name, kind) pair", index));
    match entry.as_list() {
        Some([name, kind]) => Ok((name.as_str().ok_or_else(malformed)?, kind.as_str().ok_or_else(malformed)?)),
        _ => Err(malformed()),
    }
}

impl EvalSpec {
    fn from_block(name: &str, kind: &str, block: &ConfigDict, default_dataset: &str) -> Result<Self> {
        let opt_str = |key: &str| -> Result<Option<String>> {
            match block.get_opt(key) {
                Some(v) if !v.is_none() => Ok(Some(block.get_str(key)?.to_string())),
                _ => Ok(None),
            }
        };
        let log_steps = match block.get_opt("log_steps") {
            Some(v) if !v.is_none() => Some(usize::try_from(block.get_int("log_steps")?).map_err(|_| {
                BigVisionError::InvalidArgument(format!("`{}.log_steps` must be non-negative", name))
            })?),
            _ => None,
        };

        Ok(EvalSpec {
            name: name.to_string(),
            kind: kind.to_string(),
            dataset: opt_str("dataset")?.unwrap_or_else(|| default_dataset.to_string()),
            split: opt_str("split")?,
            pp_fn: opt_str("pp_fn")?,
            log_steps,
            block: block.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs;

    #[test]
    fn test_vit_evals() {
        let cfg = configs::get_config("vit_i1k").unwrap();
        let evals = resolve_evals(&cfg).unwrap();

        let names: Vec<_> = evals.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["minival", "val", "real", "v2", "fewshot"]);

        assert_eq!(evals[2].dataset, "imagenet2012_real");
        assert_eq!(evals[2].split.as_deref(), Some("validation"));
        assert!(evals[2].pp_fn.as_deref().unwrap().contains("key=\"real_label\""));
        assert_eq!(evals[1].log_steps, Some(1000));

        let fewshot = &evals[4];
        assert_eq!(fewshot.kind, "fewshot_lsr");
        assert_eq!(fewshot.dataset, "imagenet2012");
        assert_eq!(fewshot.split, None);
        assert_eq!(fewshot.log_steps, Some(10_000));
        assert_eq!(fewshot.block.get_int("num_seeds").unwrap(), 3);
    }

    #[test]
    fn test_missing_block() {
        let cfg = ConfigDict::from_pairs([
            ("dataset", ConfigValue::from("imagenet2012")),
            ("evals", ConfigValue::list([ConfigValue::list(vec!["val", "classification"])])),
        ]);
        match resolve_evals(&cfg) {
            Err(BigVisionError::MissingKey(msg)) => assert!(msg.contains("`val`")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_entry() {
        let cfg = ConfigDict::from_pairs([
            ("dataset", ConfigValue::from("imagenet2012")),
            ("evals", ConfigValue::list([ConfigValue::from("val")])),
        ]);
        assert!(matches!(resolve_evals(&cfg), Err(BigVisionError::InvalidArgument(_))));
    }
}
