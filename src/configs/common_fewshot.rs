//! Few-shot linear-regression evaluator block shared by the configs.

use crate::config::{ConfigDict, ConfigValue};
use crate::error::Result;

fn dataset(tfds_name: &str, train_split: &str, test_split: &str) -> ConfigValue {
    ConfigValue::list(vec![tfds_name, train_split, test_split])
}

/// Evaluator settings for few-shot linear probes on the representation
/// layer.
pub fn get_fewshot_lsr(target_resolution: usize, resize_resolution: usize, runlocal: bool) -> Result<ConfigDict> {
    let mut config = ConfigDict::new();
    config.set("type", "fewshot_lsr")?;
    config.set("representation_layer", "pre_logits")?;
    config.set("log_steps", 25_000)?;

    let datasets = if runlocal {
        ConfigDict::from_pairs([("pets", dataset("oxford_iiit_pet", "train", "test"))])
    } else {
        ConfigDict::from_pairs([
            ("caltech", dataset("caltech101", "train", "test")),
            ("cars", dataset("cars196:2.1.0", "train", "test")),
            ("cifar100", dataset("cifar100", "train", "test")),
            ("dtd", dataset("dtd", "train", "test")),
            ("imagenet", dataset("imagenet2012_subset/10pct", "train", "validation")),
            ("pets", dataset("oxford_iiit_pet", "train", "test")),
            ("uc_merced", dataset("uc_merced", "train[:1000]", "train[1000:]")),
        ])
    };
    config.set("datasets", datasets)?;

    let pp = format!(
        "decode|resize({})|central_crop({})|value_range(-1,1)",
        resize_resolution, target_resolution
    );
    config.set("pp_train", pp.clone())?;
    config.set("pp_eval", pp)?;
    config.set("shots", ConfigValue::list(vec![1, 5, 10, 25]))?;
    config.set("l2_reg", 2f64.powi(10))?;
    config.set("num_seeds", 3)?;

    let first = if runlocal { "pets" } else { "imagenet" };
    config.set(
        "display_first",
        ConfigValue::list(vec![ConfigValue::list(vec![ConfigValue::from(first), ConfigValue::from(10)])]),
    )?;
    config.set("prefix", "")?;
    Ok(config)
}
