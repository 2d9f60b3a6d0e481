pub mod config;
pub use config::{get_steps, parse_arg, ConfigDict, ConfigValue};

pub mod configs;

pub mod checkpoint;
pub use checkpoint::{load_checkpoint, load_checkpoint_like, save_checkpoint};

pub mod pp;
pub use pp::PpOp;

pub mod schedule;
pub use schedule::{create_learning_rate_schedule, Decay, LrSchedule};

pub mod sharding;
pub use sharding::DeviceMesh;

pub mod training;
pub use training::{EvalSpec, Loss, TrainSetup};

pub mod tree;
pub use tree::{Tree, TreeDef};

pub mod utils;

pub mod error;
pub use error::{BigVisionError, Result};
