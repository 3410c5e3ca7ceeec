use std::collections::HashMap;
use std::path::Path;

use log::debug;

use crate::dataset::{Chunk, Transform};
use crate::{Error, Result, SpeciesSet};

const BUILTIN_SELF_ENERGIES: &str = include_str!("../resources/sae_linfit.dat");

/// Per-species self atomic energies (Hartree).
///
/// Subtracting the summed self energies of a molecule from its total energy
/// leaves the part the networks are trained to predict.
#[derive(Debug, Clone)]
pub struct EnergyShifter {
    species: SpeciesSet,
    self_energies: HashMap<String, f64>,
}

impl EnergyShifter {
    pub fn from_file<P: AsRef<Path>>(species: &SpeciesSet, path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(Error::io(path))?;
        let shifter = Self::parse(species, &text)?;
        debug!("Loaded self energies for {} species from {}", species.len(), path.display());
        Ok(shifter)
    }

    /// ANI-1x linear-fit self energies for H, C, N, O.
    pub fn builtin(species: &SpeciesSet) -> Result<Self> {
        Self::parse(species, BUILTIN_SELF_ENERGIES)
    }

    /// Parses `Symbol,index=value` lines. Every species of `species` must
    /// have an entry; extra entries are kept but unused.
    pub fn parse(species: &SpeciesSet, text: &str) -> Result<Self> {
        let mut self_energies = HashMap::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (name, value) = line.split_once('=').ok_or_else(|| {
                Error::SelfEnergies(format!("line {}: expected 'Symbol,index=value'", lineno + 1))
            })?;
            let symbol = name.split(',').next().unwrap_or_default().trim();
            if symbol.is_empty() {
                return Err(Error::SelfEnergies(format!("line {}: missing species", lineno + 1)));
            }
            let energy: f64 = value.trim().parse().map_err(|_| {
                Error::SelfEnergies(format!("line {}: invalid energy '{}'", lineno + 1, value.trim()))
            })?;
            self_energies.insert(symbol.to_string(), energy);
        }

        for s in species.symbols() {
            if !self_energies.contains_key(s) {
                return Err(Error::MissingSelfEnergy(s.clone()));
            }
        }

        Ok(Self { species: species.clone(), self_energies })
    }

    pub fn species(&self) -> &SpeciesSet {
        &self.species
    }

    /// Summed self energy of a molecule.
    pub fn self_energy(&self, symbols: &[String]) -> Result<f64> {
        symbols.iter().try_fold(0.0, |acc, s| {
            if self.species.index_of(s).is_none() {
                return Err(Error::UnknownSpecies(s.clone()));
            }
            self.self_energies
                .get(s)
                .map(|e| acc + e)
                .ok_or_else(|| Error::MissingSelfEnergy(s.clone()))
        })
    }

    pub fn subtract(&self, chunk: &mut Chunk) -> Result<()> {
        let shift = self.self_energy(&chunk.species)?;
        chunk.energies.mapv_inplace(|e| e - shift);
        Ok(())
    }

    pub fn into_transform(self) -> Transform {
        Box::new(move |chunk: &mut Chunk| self.subtract(chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{Array1, Array3};

    fn hcno() -> SpeciesSet {
        SpeciesSet::new(&["H", "C", "N", "O"]).unwrap()
    }

    fn symbols(s: &[&str]) -> Vec<String> {
        s.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn test_builtin_self_energies() {
        let shifter = EnergyShifter::builtin(&hcno()).unwrap();
        let methane = symbols(&["C", "H", "H", "H", "H"]);
        let expected = -38.08316124 + 4.0 * -0.60095298;
        assert_relative_eq!(shifter.self_energy(&methane).unwrap(), expected, max_relative = 1e-12);
    }

    #[test]
    fn test_subtract_chunk() {
        let shifter = EnergyShifter::builtin(&hcno()).unwrap();
        let mut chunk = Chunk::new(
            symbols(&["O", "H", "H"]),
            Array3::zeros((2, 3, 3)),
            Array1::from(vec![-76.4, -76.3]),
        )
        .unwrap();
        shifter.subtract(&mut chunk).unwrap();
        let sae = -75.19446356 + 2.0 * -0.60095298;
        assert_relative_eq!(chunk.energies[0], -76.4 - sae, max_relative = 1e-12);
        assert_relative_eq!(chunk.energies[1], -76.3 - sae, max_relative = 1e-12);
    }

    #[test]
    fn test_missing_species_is_fatal() {
        let species = SpeciesSet::new(&["H", "C", "S"]).unwrap();
        let err = EnergyShifter::builtin(&species).unwrap_err();
        assert!(matches!(err, Error::MissingSelfEnergy(s) if s == "S"));
    }

    #[test]
    fn test_unknown_atom() {
        let shifter = EnergyShifter::builtin(&hcno()).unwrap();
        let err = shifter.self_energy(&symbols(&["C", "Cl"])).unwrap_err();
        assert!(matches!(err, Error::UnknownSpecies(s) if s == "Cl"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(EnergyShifter::parse(&hcno(), "H,0 -0.5\n").is_err());
        assert!(EnergyShifter::parse(&hcno(), "H,0=abc\n").is_err());
    }
}
