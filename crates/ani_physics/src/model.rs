use std::ffi::OsString;
use std::path::{Path, PathBuf};

use ani_core::SpeciesSet;
use log::{debug, info};
use tch::{Device, Kind, Tensor};

use crate::aev::SpeciesAev;
use crate::network::{load_network, AtomicNetwork};
use crate::{Error, Module, Result};

/// One network per species; molecular energy is the sum of atomic energies.
pub struct AniModel {
    networks: Vec<Box<dyn AtomicNetwork>>,
    device: Device,
}

impl AniModel {
    /// `networks[i]` handles atoms of species index `i`.
    pub fn new(networks: Vec<Box<dyn AtomicNetwork>>) -> Self {
        Self { networks, device: Device::Cpu }
    }

    /// Loads `ANN-<symbol>.{pt,onnx}` for every species from `dir`.
    pub fn from_dir(species: &SpeciesSet, dir: &Path, device: Device) -> Result<Self> {
        if !dir.is_dir() {
            return Err(Error::MissingNetworkDir(dir.to_path_buf()));
        }
        let networks = species
            .symbols()
            .iter()
            .map(|s| load_network(dir, s, device))
            .collect::<Result<Vec<_>>>()?;
        debug!("Loaded {} networks from {}", networks.len(), dir.display());
        Ok(Self { networks, device })
    }

    pub fn num_species(&self) -> usize {
        self.networks.len()
    }

    /// Molecular energies `[n]` (f64) of a batch of conformations.
    pub fn energies(&mut self, input: &SpeciesAev) -> Result<Tensor> {
        let (n, a) = input.species.size2()?;
        let (_, _, l) = input.aevs.size3()?;
        let species = input.species.flatten(0, -1);
        let aevs = input.aevs.view([-1, l]);

        let mut atomic = Tensor::zeros([n * a], (Kind::Double, self.device));
        for (i, net) in self.networks.iter_mut().enumerate() {
            let idx = species.eq(i as i64).nonzero().flatten(0, -1);
            if idx.numel() == 0 {
                continue;
            }
            let out = net.forward(&aevs.index_select(0, &idx))?;
            if out.numel() != idx.numel() {
                return Err(Error::Shape(format!(
                    "network {} returned {} values for {} atoms",
                    i,
                    out.numel(),
                    idx.numel()
                )));
            }
            atomic = atomic.index_copy(0, &idx, &out.to_kind(Kind::Double).to(self.device));
        }

        Ok(atomic.view([n, a]).sum_dim_intlist([1i64].as_slice(), false, Kind::Double))
    }

    fn to_device(&mut self, device: Device) {
        for net in &mut self.networks {
            net.to_device(device);
        }
        self.device = device;
    }
}

/// Averages the molecular energies of its members.
pub struct AniEnsemble {
    members: Vec<AniModel>,
}

impl AniEnsemble {
    pub fn new(members: Vec<AniModel>) -> Result<Self> {
        if members.is_empty() {
            return Err(Error::InvalidArgument("ensemble needs at least one member".into()));
        }
        Ok(Self { members })
    }

    /// Single model read from `dir`.
    pub fn from_dir(species: &SpeciesSet, dir: &Path, device: Device) -> Result<Self> {
        Self::new(vec![AniModel::from_dir(species, dir, device)?])
    }

    /// `size` models, member `i` read from `{prefix}{i}/networks/`.
    pub fn from_prefix(species: &SpeciesSet, prefix: &Path, size: usize, device: Device) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidArgument("ensemble size must be positive".into()));
        }
        let members = (0..size)
            .map(|i| AniModel::from_dir(species, &member_dir(prefix, i), device))
            .collect::<Result<Vec<_>>>()?;
        info!("Loaded ensemble of {} from {}*", size, prefix.display());
        Self::new(members)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl Module for AniEnsemble {
    type Input = SpeciesAev;
    type Output = Tensor;

    fn forward(&mut self, input: SpeciesAev) -> Result<Tensor> {
        let mut total: Option<Tensor> = None;
        for member in &mut self.members {
            let e = member.energies(&input)?;
            total = Some(match total {
                Some(t) => t + e,
                None => e,
            });
        }
        let total = total.ok_or_else(|| Error::InvalidArgument("empty ensemble".into()))?;
        Ok(total / self.members.len() as f64)
    }

    fn to_device(&mut self, device: Device) {
        for member in &mut self.members {
            member.to_device(device);
        }
    }
}

fn member_dir(prefix: &Path, index: usize) -> PathBuf {
    let mut dir = OsString::from(prefix.as_os_str());
    dir.push(index.to_string());
    PathBuf::from(dir).join("networks")
}
