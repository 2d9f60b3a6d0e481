//! Pre-training ViT on ILSVRC-2012 (arXiv:2106.10270).
//!
//! The argument selects the model and augmentation strength:
//!
//! ```text
//! bigvision show vit_i1k:variant=B/16
//! bigvision show vit_i1k:variant=B/32,aug=light1 --set num_epochs=300
//! ```

use tracing::debug;

use super::common_fewshot::get_fewshot_lsr;
use crate::config::{parse_arg, ConfigDict, ConfigValue};
use crate::error::{BigVisionError, Result};

/// Mixup probability per augmentation setting.
fn mixup_p(aug: &str) -> Option<f64> {
    let p = match aug {
        "none" | "light1" => 0.0,
        "light2" | "medium1" => 0.2,
        "medium2" | "strong1" => 0.5,
        "strong2" => 0.8,
        _ => return None,
    };
    Some(p)
}

/// RandAugment op per augmentation setting.
fn randaug(aug: &str) -> Option<&'static str> {
    let op = match aug {
        "none" => "",
        // light1 still applies randaug with magnitude 0.
        "light1" => "randaug(2,0)",
        "light2" => "randaug(2,10)",
        "medium1" | "medium2" => "randaug(2,15)",
        "strong1" | "strong2" => "randaug(2,20)",
        _ => return None,
    };
    Some(op)
}

/// Default augmentation per model variant; roughly the best setting between
/// 30 and 300 epochs.
fn default_aug(variant: &str) -> Option<&'static str> {
    let aug = match variant {
        "Ti/16" => "light1",
        "S/32" => "light2",
        "S/16" | "B/32" | "B/16" | "L/16" => "medium2",
        _ => return None,
    };
    Some(aug)
}

pub fn get_config(arg: Option<&str>) -> Result<ConfigDict> {
    let arg = parse_arg(
        arg,
        &[
            ("variant", ConfigValue::from("B/16")),
            ("runlocal", ConfigValue::from(false)),
            ("aug", ConfigValue::from("")),
        ],
    )?;
    let variant = arg.get_str("variant")?;
    let runlocal = arg.get_bool("runlocal")?;

    let aug_setting = match arg.get_str("aug")? {
        "" => default_aug(variant).ok_or_else(|| BigVisionError::unknown("ViT variant", variant))?,
        aug => aug,
    };
    let randaug = randaug(aug_setting).ok_or_else(|| BigVisionError::unknown("aug setting", aug_setting))?;
    let mixup_p = mixup_p(aug_setting).ok_or_else(|| BigVisionError::unknown("aug setting", aug_setting))?;
    debug!(variant, aug_setting, runlocal, "building vit_i1k config");

    let mut config = ConfigDict::new();

    config.set("dataset", "imagenet2012")?;
    config.set("train_split", "train[:99%]")?;
    // Caching the raw dataset needs up to 120GB of RAM.
    config.set("cache_raw", !runlocal)?;
    config.set("shuffle_buffer_size", 250_000)?;
    config.set("num_classes", 1000)?;
    config.set("loss", "softmax_xent")?;
    config.set("batch_size", 4096)?;
    config.set("num_epochs", 300)?;

    let pp_common = |lbl: &str| {
        format!(
            "|value_range(-1, 1)|onehot(1000, key=\"{}\", key_result=\"labels\")|keep(\"image\", \"labels\")",
            lbl
        )
    };
    config.set(
        "pp_train",
        format!("decode_jpeg_and_inception_crop(224)|flip_lr|{}{}", randaug, pp_common("label")),
    )?;
    let pp_eval = |lbl: &str| format!("decode|resize_small(256)|central_crop(224){}", pp_common(lbl));

    // Small models need aggressive prefetching to keep up with the input.
    config.set("prefetch_to_host", 8)?;
    config.set("prefetch_to_device", 4)?;

    config.set("log_training_steps", 50)?;
    config.set("log_eval_steps", 1000)?;
    config.set("checkpoint_steps", 1000)?;

    config.set("model_name", "vit")?;
    config.set(
        "model",
        ConfigDict::from_pairs([
            ("variant", ConfigValue::from(variant)),
            ("rep_size", ConfigValue::from(true)),
            ("pool_type", ConfigValue::from("tok")),
        ]),
    )?;

    config.set("grad_clip_norm", 1.0)?;
    config.set("optax_name", "scale_by_adam")?;
    config.set("optax", ConfigDict::from_pairs([("mu_dtype", ConfigValue::from("bfloat16"))]))?;

    config.set("lr", 0.001)?;
    config.set("wd", 0.0001)?;
    config.set(
        "schedule",
        ConfigDict::from_pairs([
            ("warmup_steps", ConfigValue::from(10_000)),
            ("decay_type", ConfigValue::from("cosine")),
        ]),
    )?;

    config.set(
        "mixup",
        ConfigDict::from_pairs([("p", ConfigValue::from(mixup_p)), ("fold_in", ConfigValue::None)]),
    )?;

    config.set(
        "evals",
        ConfigValue::list(
            [
                ("minival", "classification"),
                ("val", "classification"),
                ("real", "classification"),
                ("v2", "classification"),
                ("fewshot", "fewshot_lsr"),
            ]
            .into_iter()
            .map(|(name, kind)| ConfigValue::list(vec![name, kind])),
        ),
    )?;

    let eval_common = ConfigDict::from_pairs([
        ("pp_fn", ConfigValue::from(pp_eval("label"))),
        ("loss_name", config.get("loss")?.clone()),
        ("log_steps", ConfigValue::from(1000)),
    ]);

    let mut minival = eval_common.clone();
    minival.set("dataset", "imagenet2012")?;
    minival.set("split", "train[99%:]")?;
    config.set("minival", minival)?;

    let mut val = eval_common.clone();
    val.set("dataset", "imagenet2012")?;
    val.set("split", "validation")?;
    config.set("val", val)?;

    let mut real = eval_common.clone();
    real.set("dataset", "imagenet2012_real")?;
    real.set("split", "validation")?;
    real.set("pp_fn", pp_eval("real_label"))?;
    config.set("real", real)?;

    let mut v2 = eval_common;
    v2.set("dataset", "imagenet_v2")?;
    v2.set("split", "test")?;
    config.set("v2", v2)?;

    let mut fewshot = get_fewshot_lsr(224, 256, false)?;
    fewshot.set("log_steps", 10_000)?;
    config.set("fewshot", fewshot)?;

    // Much smaller settings for quick local debugging runs.
    if runlocal {
        config.set("shuffle_buffer_size", 10)?;
        config.set("batch_size", 8)?;
        config.set_path("minival.split", "train[:16]")?;
        config.set_path("val.split", "validation[:16]")?;
        config.set_path("real.split", "validation[:16]")?;
        config.set_path("v2.split", "test[:16]")?;
    }

    Ok(config.locked())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pp;

    #[test]
    fn test_default_is_b16_medium2() {
        let cfg = get_config(None).unwrap();
        assert_eq!(cfg.get_str("model.variant").unwrap(), "B/16");
        assert_eq!(cfg.get_float("mixup.p").unwrap(), 0.5);
        assert!(cfg.get_str("pp_train").unwrap().contains("|randaug(2,15)|"));
        assert!(cfg.get_bool("cache_raw").unwrap());
        assert_eq!(cfg.get_int("batch_size").unwrap(), 4096);
        assert_eq!(cfg.get_str("schedule.decay_type").unwrap(), "cosine");
        assert!(cfg.is_locked());
    }

    #[test]
    fn test_explicit_aug_overrides_variant_default() {
        let cfg = get_config(Some("variant=B/32,aug=light1")).unwrap();
        assert_eq!(cfg.get_str("model.variant").unwrap(), "B/32");
        assert_eq!(cfg.get_float("mixup.p").unwrap(), 0.0);
        assert!(cfg.get_str("pp_train").unwrap().contains("|randaug(2,0)|"));
    }

    #[test]
    fn test_none_aug_leaves_empty_segment() {
        let cfg = get_config(Some("aug=none")).unwrap();
        let pp_train = cfg.get_str("pp_train").unwrap();
        assert!(pp_train.contains("flip_lr||value_range"));
        let ops = pp::parse_known(pp_train).unwrap();
        assert_eq!(ops.len(), 5);
    }

    #[test]
    fn test_unknown_variant_or_aug_fails_loud() {
        assert!(matches!(
            get_config(Some("variant=H/14")),
            Err(BigVisionError::Unknown { kind: "ViT variant", .. })
        ));
        assert!(get_config(Some("variant=H/14,aug=light2")).is_ok());
        assert!(get_config(Some("aug=extreme")).is_err());
    }

    #[test]
    fn test_eval_blocks() {
        let cfg = get_config(None).unwrap();
        assert_eq!(cfg.get_list("evals").unwrap().len(), 5);
        assert_eq!(cfg.get_str("minival.split").unwrap(), "train[99%:]");
        assert_eq!(cfg.get_str("real.dataset").unwrap(), "imagenet2012_real");
        assert!(cfg.get_str("real.pp_fn").unwrap().contains("key=\"real_label\""));
        assert!(cfg.get_str("val.pp_fn").unwrap().contains("key=\"label\""));
        assert_eq!(cfg.get_str("v2.loss_name").unwrap(), "softmax_xent");
        assert_eq!(cfg.get_int("fewshot.log_steps").unwrap(), 10_000);
        for name in ["minival", "val", "real", "v2"] {
            let pp_fn = cfg.get_str(&format!("{}.pp_fn", name)).unwrap();
            assert!(pp::parse_known(pp_fn).is_ok(), "{}", pp_fn);
        }
    }

    #[test]
    fn test_runlocal_shrinks() {
        let cfg = get_config(Some("runlocal")).unwrap();
        assert!(!cfg.get_bool("cache_raw").unwrap());
        assert_eq!(cfg.get_int("batch_size").unwrap(), 8);
        assert_eq!(cfg.get_int("shuffle_buffer_size").unwrap(), 10);
        assert_eq!(cfg.get_str("val.split").unwrap(), "validation[:16]");
        assert_eq!(cfg.get_str("v2.split").unwrap(), "test[:16]");
    }
}
