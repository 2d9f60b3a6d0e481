//! Pre-training BiT (ResNet-50x1) on ImageNet-21k.
//!
//! The first 51200 images of the `full` split are held out for validation
//! and test.

use tracing::debug;

use super::common_fewshot::get_fewshot_lsr;
use crate::config::{parse_arg, ConfigDict, ConfigValue};
use crate::error::Result;

/// Takes no arguments; any non-empty argument is an error.
pub fn get_config(arg: Option<&str>) -> Result<ConfigDict> {
    parse_arg(arg, &[])?;
    let mut config = ConfigDict::new();

    config.set("dataset", "imagenet21k")?;
    config.set("train_split", "full[51200:]")?;
    config.set("num_classes", 21843)?;
    config.set("init_head_bias", -10.0)?;
    config.set("loss", "sigmoid_xent")?;

    config.set("trial", 0)?;
    let batch_size = 4096;
    config.set("batch_size", batch_size)?;
    config.set("num_epochs", 90)?;

    let pp_common = format!("|value_range(-1, 1)|onehot({})", config.get_int("num_classes")?);
    config.set("pp_train", format!("decode_jpeg_and_inception_crop(224)|flip_lr{}", pp_common))?;
    let pp_eval = format!("decode|resize_small(256)|central_crop(224){}", pp_common);
    // Per host, so small-ish is fine.
    config.set("shuffle_buffer_size", 250_000)?;

    config.set("log_training_steps", 50)?;
    // Eval takes seconds, so it can run often.
    config.set("log_eval_steps", 1000)?;
    config.set("checkpoint_steps", 1000)?;

    config.set("model_name", "bit")?;
    config.set(
        "model",
        ConfigDict::from_pairs([("depth", ConfigValue::from(50)), ("width", ConfigValue::from(1.0))]),
    )?;

    config.set("optax_name", "big_vision.momentum_hp")?;
    config.set("grad_clip_norm", 1.0)?;

    // Linear scaling rule: sweep these together with batch_size.
    config.set("lr", (0.03 / 256.0) * batch_size as f64)?;
    config.set("wd", (3e-5 / 256.0) * batch_size as f64)?;
    config.set(
        "schedule",
        ConfigDict::from_pairs([
            ("decay_type", ConfigValue::from("cosine")),
            ("warmup_steps", ConfigValue::from(5000)),
        ]),
    )?;

    config.set(
        "evals",
        ConfigValue::list(
            [("val", "classification"), ("test", "classification"), ("fewshot", "fewshot_lsr")]
                .into_iter()
                .map(|(name, kind)| ConfigValue::list(vec![name, kind])),
        ),
    )?;

    let eval_common = ConfigDict::from_pairs([
        ("dataset", config.get("dataset")?.clone()),
        ("pp_fn", ConfigValue::from(pp_eval)),
        ("loss_name", config.get("loss")?.clone()),
        ("log_steps", ConfigValue::from(1000)),
    ]);
    let mut val = eval_common.clone();
    val.set("split", "full[25600:51200]")?;
    config.set("val", val)?;
    let mut test = eval_common;
    test.set("split", "full[:25600]")?;
    config.set("test", test)?;

    let mut fewshot = get_fewshot_lsr(224, 256, false)?;
    fewshot.set("log_steps", 25_000)?;
    config.set("fewshot", fewshot)?;

    debug!(batch_size, "built bit_i21k config");
    Ok(config.locked())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::pp;

    #[test]
    fn test_linear_scaling_rule() {
        let cfg = get_config(None).unwrap();
        assert_relative_eq!(cfg.get_float("lr").unwrap(), 0.48, max_relative = 1e-12);
        assert_relative_eq!(cfg.get_float("wd").unwrap(), 4.8e-4, max_relative = 1e-12);
    }

    #[test]
    fn test_fields() {
        let cfg = get_config(None).unwrap();
        assert_eq!(cfg.get_int("num_classes").unwrap(), 21843);
        assert_eq!(cfg.get_str("loss").unwrap(), "sigmoid_xent");
        assert_eq!(cfg.get_int("model.depth").unwrap(), 50);
        assert_eq!(cfg.get_str("val.split").unwrap(), "full[25600:51200]");
        assert_eq!(cfg.get_str("test.dataset").unwrap(), "imagenet21k");
        assert_eq!(cfg.get_int("fewshot.log_steps").unwrap(), 25_000);
        assert!(cfg.get_str("pp_train").unwrap().ends_with("onehot(21843)"));
        assert!(pp::parse_known(cfg.get_str("test.pp_fn").unwrap()).is_ok());
    }

    #[test]
    fn test_rejects_arguments() {
        assert!(get_config(Some("")).is_ok());
        assert!(get_config(Some("runlocal")).is_err());
        assert!(get_config(Some("variant=nonsense")).is_err());
    }
}
