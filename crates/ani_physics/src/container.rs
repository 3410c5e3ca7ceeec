use std::collections::BTreeMap;

use ani_core::Chunk;
use tch::{Device, Tensor};

use crate::{ChunkModel, Error, Result};

/// Named outputs of one container forward pass.
pub type Outputs = BTreeMap<String, Tensor>;

/// Named models sharing one input.
///
/// A forward pass runs every model over each chunk of a batch and
/// concatenates the per-chunk results along the conformation axis, so
/// output `k` lines up with the batch targets.
#[derive(Default)]
pub struct Container {
    models: BTreeMap<String, ChunkModel>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, model: ChunkModel) {
        self.models.insert(name.into(), model);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    pub fn to_device(&mut self, device: Device) {
        for model in self.models.values_mut() {
            model.to_device(device);
        }
    }

    pub fn forward(&mut self, chunks: Vec<Chunk>) -> Result<Outputs> {
        let mut parts: BTreeMap<String, Vec<Tensor>> = BTreeMap::new();
        for chunk in chunks {
            for (name, model) in self.models.iter_mut() {
                let out = model.forward(chunk.clone())?;
                parts.entry(name.clone()).or_default().push(out);
            }
        }

        let mut outputs = Outputs::new();
        for (name, tensors) in parts {
            outputs.insert(name, Tensor::cat(&tensors, 0));
        }
        Ok(outputs)
    }
}

/// Looks up output `key`.
pub fn output<'a>(outputs: &'a Outputs, key: &str) -> Result<&'a Tensor> {
    outputs.get(key).ok_or_else(|| Error::MissingOutput(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Module;
    use ndarray::{Array1, Array3};
    use tch::Kind;

    /// Emits the chunk's reference energies plus a fixed offset.
    pub(crate) struct Echo(pub f64);

    impl Module for Echo {
        type Input = Chunk;
        type Output = Tensor;

        fn forward(&mut self, chunk: Chunk) -> Result<Tensor> {
            let e: Vec<f64> = chunk.energies.iter().map(|e| e + self.0).collect();
            Ok(Tensor::from_slice(&e))
        }

        fn to_device(&mut self, _device: Device) {}
    }

    fn chunk(energies: &[f64]) -> Chunk {
        let n = energies.len();
        Chunk::new(vec!["H".into()], Array3::zeros((n, 1, 3)), Array1::from(energies.to_vec())).unwrap()
    }

    #[test]
    fn test_concatenates_chunks() {
        let mut c = Container::new();
        c.insert("energies", Box::new(Echo(1.0)));
        c.insert("raw", Box::new(Echo(0.0)));
        assert_eq!(c.names().collect::<Vec<_>>(), vec!["energies", "raw"]);

        let out = c.forward(vec![chunk(&[1.0, 2.0]), chunk(&[3.0])]).unwrap();
        let e = output(&out, "energies").unwrap().to_kind(Kind::Double);
        assert_eq!(Vec::<f64>::try_from(e).unwrap(), vec![2.0, 3.0, 4.0]);
        assert!(matches!(output(&out, "forces"), Err(Error::MissingOutput(_))));
    }
}
