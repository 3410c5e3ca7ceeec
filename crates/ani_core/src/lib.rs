pub mod constants;
pub mod dataset;
pub mod energy;
pub mod error;
pub mod h5;

pub use constants::AevConstants;
pub use dataset::{
    load_datasets, read_collection, save_collection, Batch, BatchLoader, Chunk, ChunkSource,
    DatasetCollection, InMemoryDataset, Transform,
};
pub use energy::EnergyShifter;
pub use error::{Error, Result};
pub use h5::Hdf5Dataset;

/// 1 Hartree in kcal/mol.
pub const HARTREE_TO_KCALMOL: f64 = 627.509;

pub fn hartree2kcal(x: f64) -> f64 {
    HARTREE_TO_KCALMOL * x
}

/// Ordered set of element symbols a model was built for.
///
/// The position of a symbol is its species index, used to pick the AEV
/// block, the atomic network and the self energy of an atom. The same set
/// must be shared by the featurizer, the energy shifter and the networks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeciesSet {
    symbols: Vec<String>,
}

impl SpeciesSet {
    pub fn new<S: AsRef<str>>(symbols: &[S]) -> Result<Self> {
        let mut out: Vec<String> = Vec::with_capacity(symbols.len());
        for s in symbols {
            let s = s.as_ref().trim();
            if s.is_empty() {
                return Err(Error::InvalidArgument("empty species symbol".to_string()));
            }
            if out.iter().any(|o| o == s) {
                return Err(Error::InvalidArgument(format!("duplicate species '{}'", s)));
            }
            out.push(s.to_string());
        }
        if out.is_empty() {
            return Err(Error::InvalidArgument("species set is empty".to_string()));
        }
        Ok(Self { symbols: out })
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn index_of(&self, symbol: &str) -> Option<usize> {
        self.symbols.iter().position(|s| s == symbol)
    }

    /// Maps a molecule's element symbols to species indices.
    pub fn indices(&self, symbols: &[String]) -> Result<Vec<i64>> {
        symbols
            .iter()
            .map(|s| {
                self.index_of(s)
                    .map(|i| i as i64)
                    .ok_or_else(|| Error::UnknownSpecies(s.clone()))
            })
            .collect()
    }
}

const ELEMENTS: [(&str, u8); 30] = [
    ("H", 1), ("He", 2), ("Li", 3), ("Be", 4), ("B", 5), ("C", 6), ("N", 7), ("O", 8),
    ("F", 9), ("Ne", 10), ("Na", 11), ("Mg", 12), ("Al", 13), ("Si", 14), ("P", 15),
    ("S", 16), ("Cl", 17), ("Ar", 18), ("K", 19), ("Ca", 20), ("Fe", 26), ("Cu", 29),
    ("Zn", 30), ("Br", 35), ("Ag", 47), ("I", 53), ("Au", 79), ("Hg", 80), ("Pb", 82),
    ("U", 92),
];

pub fn atomic_number_to_symbol(z: u8) -> Option<&'static str> {
    ELEMENTS.iter().find(|&&(_, n)| n == z).map(|&(sym, _)| sym)
}
