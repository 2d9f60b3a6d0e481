//! Typed view of a run config, as consumed by a training loop.
//!
//! [`TrainSetup::from_config`] reads everything a loop needs up front so
//! that a bad config fails before any data is touched.

pub mod evals;

pub use evals::{resolve_evals, EvalSpec};

use serde::Serialize;
use tracing::{debug, info};

use crate::config::{get_steps, ConfigDict};
use crate::error::{BigVisionError, Result};
use crate::schedule::{schedule_from_config, LrSchedule};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Loss {
    SoftmaxXent,
    SigmoidXent,
}

impl Loss {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "softmax_xent" => Ok(Loss::SoftmaxXent),
            "sigmoid_xent" => Ok(Loss::SigmoidXent),
            other => Err(BigVisionError::unknown("loss", other)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Loss::SoftmaxXent => "softmax_xent",
            Loss::SigmoidXent => "sigmoid_xent",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainSetup {
    pub dataset: String,
    pub train_split: String,
    pub num_classes: usize,
    pub loss: Loss,
    pub batch_size: usize,
    pub total_steps: usize,
    pub steps_per_epoch: usize,
    pub model_name: String,
    pub model: ConfigDict,
    pub optax_name: String,
    pub lr: f64,
    pub wd: f64,
    pub grad_clip_norm: Option<f64>,
    pub schedule: LrSchedule,
    pub evals: Vec<EvalSpec>,
}

impl TrainSetup {
    /// Resolves a run config against a training set of `train_examples`.
    ///
    /// The run length comes from `total_{steps,examples,epochs}` if one is
    /// set, otherwise from `num_epochs`.
    pub fn from_config(config: &ConfigDict, train_examples: usize) -> Result<Self> {
        let batch_size = positive(config.get_int("batch_size")?, "batch_size")?;
        let num_classes = positive(config.get_int("num_classes")?, "num_classes")?;
        let steps_per_epoch = train_examples / batch_size;

        let from_num_epochs = match config.get_opt("num_epochs") {
            Some(v) if !v.is_none() => {
                Some((config.get_float("num_epochs")? * train_examples as f64 / batch_size as f64) as usize)
            }
            _ => None,
        };
        let total_steps = get_steps(
            "total",
            config,
            Some(train_examples),
            Some(batch_size),
            None,
            from_num_epochs,
        )?;
        if total_steps == 0 {
            return Err(BigVisionError::InvalidArgument(format!(
                "run has no steps ({} examples, batch size {})",
                train_examples, batch_size
            )));
        }

        let grad_clip_norm = match config.get_opt("grad_clip_norm") {
            Some(v) if !v.is_none() => Some(config.get_float("grad_clip_norm")?),
            _ => None,
        };
        let schedule = schedule_from_config(config, total_steps, Some(steps_per_epoch).filter(|s| *s > 0))?;
        let evals = resolve_evals(config)?;

        let setup = TrainSetup {
            dataset: config.get_str("dataset")?.to_string(),
            train_split: config.get_str("train_split")?.to_string(),
            num_classes,
            loss: Loss::from_name(config.get_str("loss")?)?,
            batch_size,
            total_steps,
            steps_per_epoch,
            model_name: config.get_str("model_name")?.to_string(),
            model: config.get_dict("model")?.clone(),
            optax_name: config.get_str("optax_name")?.to_string(),
            lr: config.get_float("lr")?,
            wd: config.get_float("wd")?,
            grad_clip_norm,
            schedule,
            evals,
        };
        debug!(loss = setup.loss.name(), steps_per_epoch = setup.steps_per_epoch, "resolved train setup");
        info!(
            dataset = %setup.dataset,
            model = %setup.model_name,
            total_steps = setup.total_steps,
            evals = setup.evals.len(),
            "train setup ready"
        );
        Ok(setup)
    }

    pub fn lr_at(&self, step: usize) -> f32 {
        self.schedule.at(step)
    }
}

fn positive(value: i64, key: &str) -> Result<usize> {
    usize::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| BigVisionError::InvalidArgument(format!("`{}` must be positive, got {}", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs;
    use approx::assert_relative_eq;

    const IMAGENET_TRAIN: usize = 1_281_167;

    #[test]
    fn test_vit_setup() {
        let cfg = configs::get_config("vit_i1k:variant=B/32").unwrap();
        // train[:99%]
        let examples = IMAGENET_TRAIN * 99 / 100;
        let setup = TrainSetup::from_config(&cfg, examples).unwrap();

        assert_eq!(setup.loss, Loss::SoftmaxXent);
        assert_eq!(setup.batch_size, 4096);
        assert_eq!(setup.steps_per_epoch, examples / 4096);
        assert_eq!(setup.total_steps, (300.0 * examples as f64 / 4096.0) as usize);
        assert_eq!(setup.model.get_str("variant").unwrap(), "B/32");
        assert_eq!(setup.grad_clip_norm, Some(1.0));
        assert_eq!(setup.schedule.warmup_steps, 10_000);
        assert_eq!(setup.evals.len(), 5);

        assert_relative_eq!(setup.lr_at(0), 0.0);
        assert_relative_eq!(setup.lr_at(10_000), 0.001, max_relative = 1e-6);
        assert!(setup.lr_at(setup.total_steps) < 1e-9);
    }

    #[test]
    fn test_bit_setup() {
        let cfg = configs::get_config("bit_i21k").unwrap();
        let setup = TrainSetup::from_config(&cfg, 14_197_122 - 51_200).unwrap();
        assert_eq!(setup.loss, Loss::SigmoidXent);
        assert_eq!(setup.num_classes, 21843);
        assert_eq!(setup.optax_name, "big_vision.momentum_hp");
        assert_eq!(setup.evals.iter().map(|e| e.kind.as_str()).collect::<Vec<_>>(), vec![
            "classification",
            "classification",
            "fewshot_lsr"
        ]);
    }

    #[test]
    fn test_total_steps_takes_precedence() {
        let locked = configs::get_config("vit_i1k:runlocal").unwrap();
        // Locked configs reject new keys, so start from an unlocked copy.
        let mut cfg = ConfigDict::from_json_str(&locked.to_json_pretty().unwrap()).unwrap();
        cfg.set("total_steps", 100).unwrap();
        cfg.set_path("schedule.warmup_steps", 10).unwrap();
        let setup = TrainSetup::from_config(&cfg, 1000).unwrap();
        assert_eq!(setup.total_steps, 100);
        assert_eq!(setup.batch_size, 8);
    }

    #[test]
    fn test_unknown_loss() {
        let mut cfg = configs::get_config("vit_i1k").unwrap();
        cfg.set("loss", "hinge").unwrap();
        assert!(matches!(
            TrainSetup::from_config(&cfg, IMAGENET_TRAIN),
            Err(BigVisionError::Unknown { kind: "loss", .. })
        ));
    }

    #[test]
    fn test_warmup_longer_than_run() {
        let cfg = configs::get_config("vit_i1k").unwrap();
        // One epoch of 4096 examples gives 300 steps, below the 10k warmup.
        assert!(matches!(
            TrainSetup::from_config(&cfg, 4096),
            Err(BigVisionError::Schedule(_))
        ));
    }

    #[test]
    fn test_empty_dataset() {
        let cfg = configs::get_config("vit_i1k").unwrap();
        assert!(TrainSetup::from_config(&cfg, 0).is_err());
    }
}
