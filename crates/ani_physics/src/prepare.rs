use ani_core::{Chunk, SpeciesSet};
use tch::{Device, Kind, Tensor};

use crate::{Module, Result};

/// Species indices `[n, A]` (i64) and coordinates `[n, A, 3]` (f32).
pub struct SpeciesCoordinates {
    pub species: Tensor,
    pub coordinates: Tensor,
}

/// Turns a chunk into tensors the featurizer understands.
///
/// Element symbols are mapped to their index in the species set; a symbol
/// outside the set is an error.
pub struct PrepareInput {
    species: SpeciesSet,
    device: Device,
}

impl PrepareInput {
    pub fn new(species: SpeciesSet) -> Self {
        Self { species, device: Device::Cpu }
    }

    pub fn species(&self) -> &SpeciesSet {
        &self.species
    }
}

impl Module for PrepareInput {
    type Input = Chunk;
    type Output = SpeciesCoordinates;

    fn forward(&mut self, chunk: Chunk) -> Result<SpeciesCoordinates> {
        let n = chunk.num_conformations() as i64;
        let a = chunk.num_atoms() as i64;
        let indices = self.species.indices(&chunk.species)?;

        let species = Tensor::from_slice(&indices)
            .view([1, a])
            .expand([n, a], false)
            .contiguous()
            .to(self.device);

        let flat: Vec<f32> = chunk.coordinates.iter().copied().collect();
        let coordinates = Tensor::from_slice(&flat)
            .view([n, a, 3])
            .to_kind(Kind::Float)
            .to(self.device);

        Ok(SpeciesCoordinates { species, coordinates })
    }

    fn to_device(&mut self, device: Device) {
        self.device = device;
    }
}
