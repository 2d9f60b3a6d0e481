//! `bigvision` CLI: inspect experiment configs and the runs they describe.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bigvision::configs;
use bigvision::{ConfigDict, TrainSetup};

#[derive(Parser, Debug)]
#[command(name = "bigvision", about = "Inspect big_vision-style experiment configs", version)]
struct Cli {
    /// Tracing filter, e.g. `info` or `bigvision=debug`.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// Registered config string (`vit_i1k:variant=B/32`) or a `.json` file.
    config: String,

    /// Override an existing key, e.g. `--set val.split=validation[:100]`.
    #[arg(long = "set", value_name = "KEY=VALUE")]
    overrides: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the resolved config as JSON.
    Show(ConfigArgs),

    /// Print `step lr` rows of the learning-rate schedule.
    Schedule {
        #[command(flatten)]
        config: ConfigArgs,

        /// Number of training examples.
        #[arg(long)]
        train_examples: usize,

        /// Print every K-th step.
        #[arg(long, default_value_t = 1000)]
        every: usize,
    },

    /// List the evaluators of a run.
    Evals(ConfigArgs),
}

fn load(args: &ConfigArgs) -> anyhow::Result<ConfigDict> {
    let mut config = if args.config.ends_with(".json") {
        ConfigDict::from_path(&args.config).with_context(|| format!("loading {}", args.config))?
    } else {
        configs::get_config(&args.config).with_context(|| format!("building config `{}`", args.config))?
    };
    for assignment in &args.overrides {
        config
            .apply_override(assignment)
            .with_context(|| format!("applying override `{}`", assignment))?;
    }
    Ok(config)
}

/// Every `every`-th step from 0, always ending on `total_steps`.
fn schedule_rows(total_steps: usize, every: usize) -> Vec<usize> {
    let mut steps: Vec<usize> = (0..=total_steps).step_by(every.max(1)).collect();
    if steps.last() != Some(&total_steps) {
        steps.push(total_steps);
    }
    steps
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log_level).context("invalid --log-level")?)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("bigvision v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Show(args) => {
            let config = load(&args)?;
            println!("{}", config.to_json_pretty()?);
        }
        Command::Schedule {
            config,
            train_examples,
            every,
        } => {
            let config = load(&config)?;
            let setup = TrainSetup::from_config(&config, train_examples)?;
            tracing::info!(
                "{} steps, warmup {}, base lr {}",
                setup.total_steps,
                setup.schedule.warmup_steps,
                setup.schedule.base
            );
            for step in schedule_rows(setup.total_steps, every) {
                println!("{}\t{:.6e}", step, setup.lr_at(step));
            }
        }
        Command::Evals(args) => {
            let config = load(&args)?;
            for eval in bigvision::training::resolve_evals(&config)? {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    eval.name,
                    eval.kind,
                    eval.dataset,
                    eval.split.as_deref().unwrap_or("-"),
                    eval.log_steps.map_or("-".to_string(), |s| s.to_string()),
                );
            }
        }
    }
    Ok(())
}
