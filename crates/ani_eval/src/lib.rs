pub mod cli;
pub mod runner;

pub use cli::{EvalArgs, EvalConfig};
pub use runner::{evaluate_all, run, Phase};
