use std::f32::consts::PI;

use ani_core::AevConstants;
use glam::Vec3;
use rayon::prelude::*;
use tch::{Device, Kind, Tensor};

use crate::prepare::SpeciesCoordinates;
use crate::{Error, Module, Result};

/// Species indices `[n, A]` and atomic environment vectors `[n, A, L]`.
pub struct SpeciesAev {
    pub species: Tensor,
    pub aevs: Tensor,
}

/// ANI atomic environment vectors.
///
/// Layout of one AEV: the radial part (one block per neighbour species,
/// `ShfR` fastest) followed by the angular part (one block per unordered
/// species pair in upper-triangular order; `EtaA, Zeta, ShfA, ShfZ` with
/// `ShfZ` fastest). Atoms with a negative species index are padding: they
/// get a zero AEV and are invisible to their neighbours.
pub struct AevComputer {
    constants: AevConstants,
    device: Device,
}

impl AevComputer {
    pub fn new(constants: AevConstants) -> Self {
        Self { constants, device: Device::Cpu }
    }

    pub fn constants(&self) -> &AevConstants {
        &self.constants
    }

    pub fn aev_length(&self) -> usize {
        self.constants.aev_length()
    }

    fn pair_index(&self, s1: usize, s2: usize) -> usize {
        let n = self.constants.num_species();
        let (t1, t2) = if s1 <= s2 { (s1, s2) } else { (s2, s1) };
        t1 * n - (t1 * (t1 + 1)) / 2 + t2
    }

    /// AEV of atom `center` of one conformation, written into `out`.
    fn compute_atom(&self, center: usize, species: &[i64], positions: &[Vec3], out: &mut [f32]) {
        if species[center] < 0 {
            return;
        }
        let c = &self.constants;
        let pos_i = positions[center];

        // Neighbors within the radial cutoff
        let mut neighbors = Vec::new();
        for (j, &pos_j) in positions.iter().enumerate() {
            if j == center || species[j] < 0 {
                continue;
            }
            let r_vec = pos_j - pos_i;
            let r = r_vec.length();
            if r < 1.0e-5 {
                continue;
            }
            if r <= c.rcr {
                neighbors.push((r, r_vec, species[j] as usize));
            }
        }

        // --- Radial Part ---
        let radial_sub = c.radial_sublength();
        for &(r, _, s_j) in &neighbors {
            let fc = cutoff_cosine(r, c.rcr);
            let offset = s_j * radial_sub;
            for (e, &eta) in c.eta_r.iter().enumerate() {
                for (k, &shift) in c.shf_r.iter().enumerate() {
                    let delta = r - shift;
                    out[offset + e * c.shf_r.len() + k] += 0.25 * (-eta * delta * delta).exp() * fc;
                }
            }
        }

        // --- Angular Part ---
        let angular: Vec<_> = neighbors.iter().filter(|(r, _, _)| *r <= c.rca).collect();
        let angular_sub = c.angular_sublength();
        let radial_length = c.radial_length();
        for (m, &&(r_ij, vec_ij, s1)) in angular.iter().enumerate() {
            for &&(r_ik, vec_ik, s2) in &angular[m + 1..] {
                let base = radial_length + self.pair_index(s1, s2) * angular_sub;

                let cos_theta = 0.95 * vec_ij.dot(vec_ik) / (r_ij * r_ik);
                let theta = cos_theta.acos();
                let r_avg = (r_ij + r_ik) * 0.5;
                let fc_prod = cutoff_cosine(r_ij, c.rca) * cutoff_cosine(r_ik, c.rca);

                let mut idx = base;
                for &eta in &c.eta_a {
                    for &zeta in &c.zeta {
                        for &shf_a in &c.shf_a {
                            let delta_r = r_avg - shf_a;
                            let radial_term = (-eta * delta_r * delta_r).exp();
                            for &shf_z in &c.shf_z {
                                let angular_term = ((1.0 + (theta - shf_z).cos()) * 0.5).powf(zeta);
                                out[idx] += 2.0 * angular_term * radial_term * fc_prod;
                                idx += 1;
                            }
                        }
                    }
                }
            }
        }
    }

    /// AEVs of every atom of every conformation, flattened `[n * A * L]`.
    pub fn compute(&self, species: &[i64], coordinates: &[f32], n_atoms: usize) -> Result<Vec<f32>> {
        if n_atoms == 0 {
            return Ok(Vec::new());
        }
        if coordinates.len() != species.len() * 3 || species.len() % n_atoms != 0 {
            return Err(Error::Shape(format!(
                "{} species and {} coordinates for {} atoms per conformation",
                species.len(),
                coordinates.len(),
                n_atoms
            )));
        }
        let n_species = self.constants.num_species() as i64;
        if let Some(&bad) = species.iter().find(|&&s| s >= n_species) {
            return Err(Error::Shape(format!("species index {} out of range ({})", bad, n_species)));
        }

        let positions: Vec<Vec3> = coordinates.chunks_exact(3).map(Vec3::from_slice).collect();
        let len = self.aev_length();
        let mut aevs = vec![0.0f32; species.len() * len];
        aevs.par_chunks_mut(len).enumerate().for_each(|(idx, out)| {
            let conf = idx / n_atoms;
            let atom = idx % n_atoms;
            let range = conf * n_atoms..(conf + 1) * n_atoms;
            self.compute_atom(atom, &species[range.clone()], &positions[range], out);
        });
        Ok(aevs)
    }
}

impl Module for AevComputer {
    type Input = SpeciesCoordinates;
    type Output = SpeciesAev;

    fn forward(&mut self, input: SpeciesCoordinates) -> Result<SpeciesAev> {
        let (n, a) = input.species.size2()?;
        let species = Vec::<i64>::try_from(input.species.to_device(Device::Cpu).flatten(0, -1))?;
        let coordinates = Vec::<f32>::try_from(
            input.coordinates.to_device(Device::Cpu).to_kind(Kind::Float).flatten(0, -1),
        )?;

        let aevs = self.compute(&species, &coordinates, a as usize)?;
        let aevs = Tensor::from_slice(&aevs)
            .view([n, a, self.aev_length() as i64])
            .to(self.device);

        Ok(SpeciesAev { species: input.species.to(self.device), aevs })
    }

    fn to_device(&mut self, device: Device) {
        self.device = device;
    }
}

// Helpers
fn cutoff_cosine(r: f32, rc: f32) -> f32 {
    if r > rc {
        0.0
    } else {
        0.5 * (PI * r / rc).cos() + 0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn computer() -> AevComputer {
        AevComputer::new(AevConstants::builtin().unwrap())
    }

    #[test]
    fn test_cutoff() {
        assert_relative_eq!(cutoff_cosine(0.0, 5.2), 1.0);
        assert_relative_eq!(cutoff_cosine(2.6, 5.2), 0.5, epsilon = 1e-6);
        assert_relative_eq!(cutoff_cosine(5.2, 5.2), 0.0, epsilon = 1e-6);
        assert_eq!(cutoff_cosine(6.0, 5.2), 0.0);
    }

    #[test]
    fn test_pair_index_is_upper_triangular() {
        let aev = computer();
        let pairs: Vec<usize> = (0..4)
            .flat_map(|i| (i..4).map(move |j| (i, j)))
            .map(|(i, j)| aev.pair_index(i, j))
            .collect();
        assert_eq!(pairs, (0..10).collect::<Vec<_>>());
        assert_eq!(aev.pair_index(3, 1), aev.pair_index(1, 3));
    }

    #[test]
    fn test_isolated_atom_has_zero_aev() {
        let aev = computer();
        let out = aev.compute(&[1], &[0.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(out.len(), 384);
        assert!(out.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_hydrogen_molecule_radial_terms() {
        let aev = computer();
        let r = 0.74f32;
        let out = aev.compute(&[0, 0], &[0.0, 0.0, 0.0, r, 0.0, 0.0], 2).unwrap();
        let c = aev.constants();

        // Atom 0 sees one H neighbour: only the H radial block is populated.
        let fc = cutoff_cosine(r, c.rcr);
        for (k, &shift) in c.shf_r.iter().enumerate() {
            let expected = 0.25 * (-c.eta_r[0] * (r - shift).powi(2)).exp() * fc;
            assert_relative_eq!(out[k], expected, epsilon = 1e-7);
        }
        assert!(out[16..384].iter().all(|&x| x == 0.0));

        // Both atoms see the same environment.
        assert_eq!(&out[..384], &out[384..]);
    }

    #[test]
    fn test_angular_block_for_water() {
        let aev = computer();
        // O at origin, two H at 0.96 Å with a 104.5° angle.
        let theta = 104.5f32.to_radians();
        let coords = [
            0.0, 0.0, 0.0,
            0.96, 0.0, 0.0,
            0.96 * theta.cos(), 0.96 * theta.sin(), 0.0,
        ];
        let out = aev.compute(&[3, 0, 0], &coords, 3).unwrap();
        let o = &out[..384];

        // The oxygen's angular features live in the (H, H) block only.
        let hh = 64 + aev.pair_index(0, 0) * 32;
        assert!(o[hh..hh + 32].iter().any(|&x| x > 0.0));
        assert!(o[64..hh].iter().all(|&x| x == 0.0));
        assert!(o[hh + 32..].iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_angular_terms_for_water() {
        let aev = computer();
        let c = aev.constants();
        let r = 0.96f32;
        let angle = 104.5f32.to_radians();
        let coords = [0.0, 0.0, 0.0, r, 0.0, 0.0, r * angle.cos(), r * angle.sin(), 0.0];
        let out = aev.compute(&[3, 0, 0], &coords, 3).unwrap();

        // One (H, H) pair around the oxygen; the cosine is damped by 0.95.
        let theta = (0.95 * angle.cos()).acos();
        let fc = cutoff_cosine(r, c.rca);
        let base = c.radial_length() + aev.pair_index(0, 0) * c.angular_sublength();
        let mut idx = base;
        for &eta in &c.eta_a {
            for &zeta in &c.zeta {
                for &shf_a in &c.shf_a {
                    for &shf_z in &c.shf_z {
                        let expected = 2.0
                            * ((1.0 + (theta - shf_z).cos()) / 2.0).powf(zeta)
                            * (-eta * (r - shf_a).powi(2)).exp()
                            * fc
                            * fc;
                        assert_relative_eq!(out[idx], expected, epsilon = 1e-9, max_relative = 1e-4);
                        idx += 1;
                    }
                }
            }
        }
        assert_eq!(idx, base + c.angular_sublength());

        // ShfZ varies fastest: neighbouring entries differ only in ShfZ.
        let first = 2.0 * ((1.0 + (theta - c.shf_z[1]).cos()) / 2.0).powf(c.zeta[0])
            * (-c.eta_a[0] * (r - c.shf_a[0]).powi(2)).exp()
            * fc
            * fc;
        assert_relative_eq!(out[base + 1], first, epsilon = 1e-9, max_relative = 1e-4);
    }

    #[test]
    fn test_padding_atoms_are_ignored() {
        let aev = computer();
        let with_pad = aev
            .compute(&[0, 0, -1], &[0.0, 0.0, 0.0, 0.74, 0.0, 0.0, 0.3, 0.3, 0.0], 3)
            .unwrap();
        let without = aev.compute(&[0, 0], &[0.0, 0.0, 0.0, 0.74, 0.0, 0.0], 2).unwrap();
        assert_eq!(&with_pad[..768], &without[..]);
        assert!(with_pad[768..].iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_forward_shapes() {
        let mut aev = computer();
        let input = SpeciesCoordinates {
            species: Tensor::from_slice(&[1i64, 0, 0, 0, 0, 1, 0, 0, 0, 0]).view([2, 5]),
            coordinates: Tensor::zeros([2, 5, 3], (Kind::Float, Device::Cpu)),
        };
        let out = aev.forward(input).unwrap();
        assert_eq!(out.aevs.size(), vec![2, 5, 384]);
        assert_eq!(out.species.size(), vec![2, 5]);
    }

    #[test]
    fn test_species_out_of_range() {
        let aev = computer();
        assert!(aev.compute(&[7], &[0.0, 0.0, 0.0], 1).is_err());
    }
}
