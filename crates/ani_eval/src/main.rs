use ani_eval::{EvalArgs, EvalConfig};
use anyhow::Result;
use clap::Parser;
use env_logger::Env;

fn main() -> Result<()> {
    let args = EvalArgs::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    let config = EvalConfig::from(args);
    log::info!("Configuration: {:?}", config);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    ani_eval::run(&config, &mut out)
}
