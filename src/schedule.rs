//! Learning-rate schedules: warmup, a decay curve, then cooldown.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{get_steps, ConfigDict, ConfigValue};
use crate::error::{BigVisionError, Result};

/// Shape of the schedule between warmup and cooldown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Decay {
    /// `end + (lr - end) * (1 - progress)^power`. Linear is `power = 1`.
    Polynomial { end: f64, power: f64 },
    Cosine,
    Rsqrt { timescale: f64 },
    /// Multiplies by `mults[i]` once `steps[i]` is reached.
    Stair { steps: Vec<usize>, mults: Vec<f64> },
}

impl Decay {
    /// Builds a decay from its name and keyword arguments.
    pub fn from_name(decay_type: &str, kw: &ConfigDict) -> Result<Self> {
        let float_or = |key: &str, default: f64| -> Result<f64> {
            match kw.get_opt(key) {
                Some(v) if !v.is_none() => kw.get_float(key),
                _ => Ok(default),
            }
        };
        let decay = match decay_type {
            "linear" | "polynomial" => {
                let linear_end = float_or("linear_end", 0.0)?;
                Decay::Polynomial {
                    end: float_or("end", linear_end)?,
                    power: float_or("power", 1.0)?,
                }
            }
            "cosine" => Decay::Cosine,
            "rsqrt" => Decay::Rsqrt {
                timescale: float_or("timescale", 10_000.0)?,
            },
            "stair" => {
                let steps = match kw.get_opt("steps") {
                    Some(_) => kw
                        .get_list("steps")?
                        .iter()
                        .map(|v| list_item_usize(v, "steps"))
                        .collect::<Result<Vec<_>>>()?,
                    None => Vec::new(),
                };
                let mults = match kw.get_opt("mults") {
                    Some(_) => kw
                        .get_list("mults")?
                        .iter()
                        .map(|v| {
                            v.as_float().ok_or_else(|| BigVisionError::TypeMismatch {
                                key: "mults".to_string(),
                                expected: "float",
                                found: v.type_name(),
                            })
                        })
                        .collect::<Result<Vec<_>>>()?,
                    None => Vec::new(),
                };
                if steps.len() != mults.len() {
                    return Err(BigVisionError::Schedule(format!(
                        "stair schedule has {} steps but {} mults",
                        steps.len(),
                        mults.len()
                    )));
                }
                if steps.windows(2).any(|w| w[0] > w[1]) {
                    return Err(BigVisionError::Schedule("stair steps must be sorted".to_string()));
                }
                Decay::Stair { steps, mults }
            }
            other => return Err(BigVisionError::unknown("lr decay type", other)),
        };
        Ok(decay)
    }
}

fn list_item_usize(v: &ConfigValue, key: &str) -> Result<usize> {
    v.as_int()
        .and_then(|i| usize::try_from(i).ok())
        .ok_or_else(|| BigVisionError::TypeMismatch {
            key: key.to_string(),
            expected: "non-negative int",
            found: v.type_name(),
        })
}

/// A learning rate as a function of the step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LrSchedule {
    /// Base rate after batch-size scaling.
    pub base: f64,
    pub total_steps: usize,
    pub warmup_steps: usize,
    pub cooldown_steps: usize,
    pub decay: Decay,
}

impl LrSchedule {
    pub fn at(&self, step: usize) -> f32 {
        let step = step as f64;
        let total = self.total_steps as f64;
        let warmup = self.warmup_steps as f64;
        let cooldown = self.cooldown_steps as f64;

        let progress = ((step - warmup) / (total - warmup)).clamp(0.0, 1.0);
        let mut lr = self.base;
        match &self.decay {
            Decay::Polynomial { end, power } => {
                lr = end + (lr - end) * (1.0 - progress).powf(*power);
            }
            Decay::Cosine => {
                lr *= 0.5 * (1.0 + (PI * progress).cos());
            }
            Decay::Rsqrt { timescale } => {
                if warmup < step {
                    let shift = timescale - warmup;
                    lr /= ((step + shift) / timescale).sqrt();
                }
            }
            Decay::Stair { steps, mults } => {
                // Number of boundaries at or before this step.
                let idx = steps.partition_point(|&s| (s as f64) < step + 1.0);
                if idx > 0 {
                    lr *= mults[idx - 1];
                }
            }
        }

        if self.warmup_steps > 0 {
            lr *= (step / warmup).min(1.0);
        }
        if self.cooldown_steps > 0 {
            lr *= ((total - step) / cooldown).min(1.0);
        }
        lr as f32
    }
}

/// Creates a learning-rate schedule.
///
/// `kw` carries `warmup_{steps,examples,epochs,percent}`, `cooldown_{...}` and the
/// decay-specific arguments (`end`/`linear_end`, `power`, `timescale`,
/// `steps`, `mults`). Examples are divided by `global_batch_size`; epoch
/// counts need `steps_per_epoch`.
pub fn create_learning_rate_schedule(
    global_batch_size: usize,
    total_steps: usize,
    steps_per_epoch: Option<usize>,
    base: f64,
    decay_type: &str,
    scale_with_batchsize: bool,
    kw: &ConfigDict,
) -> Result<LrSchedule> {
    let examples_per_epoch = steps_per_epoch.map(|s| s * global_batch_size);
    let resolve = |name: &str| {
        get_steps(
            name,
            kw,
            examples_per_epoch,
            Some(global_batch_size),
            Some(total_steps),
            Some(0),
        )
    };
    let warmup_steps = resolve("warmup")?;
    let cooldown_steps = resolve("cooldown")?;

    if total_steps > 1 && warmup_steps >= total_steps {
        return Err(BigVisionError::Schedule(format!(
            "warmup_steps ({}) must be below total_steps ({})",
            warmup_steps, total_steps
        )));
    }

    let base = if scale_with_batchsize {
        base * global_batch_size as f64 / 256.0
    } else {
        base
    };
    let decay = Decay::from_name(decay_type, kw)?;
    debug!(?decay, base, total_steps, warmup_steps, cooldown_steps, "created lr schedule");

    Ok(LrSchedule {
        base,
        total_steps,
        warmup_steps,
        cooldown_steps,
        decay,
    })
}

/// Builds the schedule described by a run config's `lr`, `batch_size` and
/// `schedule` block. `decay_type` defaults to `stair`.
pub fn schedule_from_config(
    config: &ConfigDict,
    total_steps: usize,
    steps_per_epoch: Option<usize>,
) -> Result<LrSchedule> {
    let kw = config.get_dict("schedule")?;
    let decay_type = match kw.get_opt("decay_type") {
        Some(_) => kw.get_str("decay_type")?,
        None => "stair",
    };
    let scale = match kw.get_opt("scale_with_batchsize") {
        Some(_) => kw.get_bool("scale_with_batchsize")?,
        None => false,
    };
    let batch_size = usize::try_from(config.get_int("batch_size")?)
        .map_err(|_| BigVisionError::InvalidArgument("batch_size must be non-negative".to_string()))?;
    create_learning_rate_schedule(
        batch_size,
        total_steps,
        steps_per_epoch,
        config.get_float("lr")?,
        decay_type,
        scale,
        kw,
    )
}
