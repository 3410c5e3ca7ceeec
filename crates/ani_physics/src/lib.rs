use std::path::Path;

use ani_core::{AevConstants, Chunk};
use log::info;
use tch::{Device, Tensor};

pub mod aev;
pub mod container;
pub mod engine;
pub mod error;
pub mod model;
pub mod network;
pub mod prepare;

pub use aev::{AevComputer, SpeciesAev};
pub use container::{Container, Outputs};
pub use engine::{EnergyRmse, EngineState, Evaluator, Metric};
pub use error::{Error, Result};
pub use model::{AniEnsemble, AniModel};
pub use network::{AtomicNetwork, OnnxNetwork, TorchScriptNetwork};
pub use prepare::{PrepareInput, SpeciesCoordinates};

/// Name of the energy output of an assembled model.
pub const ENERGIES: &str = "energies";

/// One stage of an inference pipeline.
pub trait Module {
    type Input;
    type Output;

    fn forward(&mut self, input: Self::Input) -> Result<Self::Output>;

    /// Moves parameters and buffers to `device`; later outputs live there.
    fn to_device(&mut self, device: Device);
}

/// Runs `first`, then feeds its output to `second`.
pub struct Sequential<A, B> {
    first: A,
    second: B,
}

impl<A, B> Sequential<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<A, B> Module for Sequential<A, B>
where
    A: Module,
    B: Module<Input = A::Output>,
{
    type Input = A::Input;
    type Output = B::Output;

    fn forward(&mut self, input: Self::Input) -> Result<Self::Output> {
        let hidden = self.first.forward(input)?;
        self.second.forward(hidden)
    }

    fn to_device(&mut self, device: Device) {
        self.first.to_device(device);
        self.second.to_device(device);
    }
}

pub type EnergyModel = Sequential<Sequential<PrepareInput, AevComputer>, AniEnsemble>;

pub fn energy_model(constants: &AevConstants, ensemble: AniEnsemble) -> EnergyModel {
    let prepare = PrepareInput::new(constants.species.clone());
    let aev = AevComputer::new(constants.clone());
    Sequential::new(Sequential::new(prepare, aev), ensemble)
}

/// Builds `PrepareInput -> AevComputer -> AniEnsemble` from pretrained
/// networks, wraps it in a container whose output is named `"energies"`
/// and moves it to `device`.
///
/// Without `ensemble` the networks are read from `network_dir` itself;
/// with `Some(n)`, member `i` is read from `{network_dir}{i}/networks/`.
pub fn assemble_model(
    constants: &AevConstants,
    network_dir: &Path,
    ensemble: Option<usize>,
    device: Device,
) -> Result<Container> {
    let ensemble = match ensemble {
        Some(n) => AniEnsemble::from_prefix(&constants.species, network_dir, n, device)?,
        None => AniEnsemble::from_dir(&constants.species, network_dir, device)?,
    };
    info!(
        "Assembled model: {} species, AEV length {}, {} ensemble member(s), device {:?}",
        constants.num_species(),
        constants.aev_length(),
        ensemble.len(),
        device
    );

    let mut container = Container::new();
    container.insert(ENERGIES, Box::new(energy_model(constants, ensemble)));
    container.to_device(device);
    Ok(container)
}

/// Boxed stage mapping a chunk to one tensor, as stored in a [`Container`].
pub type ChunkModel = Box<dyn Module<Input = Chunk, Output = Tensor>>;
