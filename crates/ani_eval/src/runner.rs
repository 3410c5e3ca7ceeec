use std::io::Write;

use ani_core::{hartree2kcal, load_datasets, AevConstants, BatchLoader, ChunkSource, EnergyShifter};
use ani_physics::{assemble_model, Container, EnergyRmse, Evaluator, Metric, ENERGIES};
use anyhow::{Context, Result};
use log::{debug, info};

use crate::cli::EvalConfig;

/// Per-dataset progress of an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    LoaderBuilt,
    EngineConstructed,
    Running,
    Completed,
    Printed,
}

/// Assembles the model, loads the baseline and the datasets, then writes
/// one `"<rmse> kcal/mol"` line per dataset to `out`.
pub fn run(config: &EvalConfig, out: &mut dyn Write) -> Result<()> {
    let constants = match &config.const_file {
        Some(path) => AevConstants::from_file(path)
            .with_context(|| format!("Failed to load AEV constants from {}", path.display()))?,
        None => AevConstants::builtin().context("Failed to load built-in AEV constants")?,
    };

    let network_dir = config
        .network_dir
        .as_deref()
        .context("--network_dir is required to assemble the model")?;
    let mut model = assemble_model(&constants, network_dir, config.ensemble, config.device)
        .with_context(|| format!("Failed to assemble model from {}", network_dir.display()))?;

    let shifter = match &config.sae_file {
        Some(path) => EnergyShifter::from_file(&constants.species, path)
            .with_context(|| format!("Failed to load self energies from {}", path.display()))?,
        None => EnergyShifter::builtin(&constants.species).context("Failed to load built-in self energies")?,
    };

    let datasets = load_datasets(&config.dataset_path, config.chunk_size, shifter)
        .with_context(|| format!("Failed to load datasets from {}", config.dataset_path.display()))?;
    info!("Loaded {} dataset(s) from {}", datasets.len(), config.dataset_path.display());

    evaluate_all(&mut model, &datasets, config.batch_chunks, out)
}

/// Evaluates each dataset in turn; a failure aborts before its line is written.
pub fn evaluate_all(
    model: &mut Container,
    datasets: &[Box<dyn ChunkSource>],
    batch_chunks: usize,
    out: &mut dyn Write,
) -> Result<()> {
    for dataset in datasets {
        let name = dataset.name().to_string();
        let loader = BatchLoader::new(dataset.as_ref(), batch_chunks)?;
        debug!("{}: {:?}", name, Phase::LoaderBuilt);

        let metrics: Vec<Box<dyn Metric>> = vec![Box::new(EnergyRmse::new(ENERGIES))];
        let mut evaluator = Evaluator::new(model, metrics);
        debug!("{}: {:?}", name, Phase::EngineConstructed);

        debug!("{}: {:?}", name, Phase::Running);
        let state = evaluator
            .run(&loader)
            .with_context(|| format!("Evaluation of dataset '{}' failed", name))?;
        debug!("{}: {:?}", name, Phase::Completed);

        let rmse = state
            .metrics
            .get("RMSE")
            .copied()
            .context("evaluator produced no RMSE")?;
        writeln!(out, "{} kcal/mol", hartree2kcal(rmse))?;
        debug!("{}: {:?}", name, Phase::Printed);
    }
    Ok(())
}
