//! Conformation chunks, the datasets that produce them and the batch loader.
//!
//! A dataset is anything implementing [`ChunkSource`]: a finite sequence of
//! chunks that can be walked again from the start. HDF5 files are read
//! lazily through [`Hdf5Dataset`](crate::Hdf5Dataset); collections prepared
//! ahead of time are stored with [`save_collection`] and read back fully
//! into memory.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use bincode::Options;
use log::{debug, info};
use ndarray::{Array1, Array3, Axis};
use serde::{Deserialize, Serialize};

use crate::energy::EnergyShifter;
use crate::h5::Hdf5Dataset;
use crate::{Error, Result};

/// Conformations of one molecule: element symbols `[A]`, coordinates
/// `[n, A, 3]` in Å and target energies `[n]` in Hartree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub species: Vec<String>,
    pub coordinates: Array3<f32>,
    pub energies: Array1<f64>,
}

impl Chunk {
    pub fn new(species: Vec<String>, coordinates: Array3<f32>, energies: Array1<f64>) -> Result<Self> {
        let chunk = Self { species, coordinates, energies };
        chunk.validate()?;
        Ok(chunk)
    }

    pub fn validate(&self) -> Result<()> {
        let (n, a, d) = self.coordinates.dim();
        if d != 3 {
            return Err(Error::MalformedChunk(format!("coordinates have {} components, expected 3", d)));
        }
        if a != self.species.len() {
            return Err(Error::MalformedChunk(format!(
                "{} species for {} atoms",
                self.species.len(),
                a
            )));
        }
        if n != self.energies.len() {
            return Err(Error::MalformedChunk(format!(
                "{} energies for {} conformations",
                self.energies.len(),
                n
            )));
        }
        Ok(())
    }

    pub fn num_conformations(&self) -> usize {
        self.energies.len()
    }

    pub fn num_atoms(&self) -> usize {
        self.species.len()
    }

    /// Conformations `start..end` of this chunk.
    pub fn slice(&self, start: usize, end: usize) -> Chunk {
        Chunk {
            species: self.species.clone(),
            coordinates: self.coordinates.slice_axis(Axis(0), (start..end).into()).to_owned(),
            energies: self.energies.slice_axis(Axis(0), (start..end).into()).to_owned(),
        }
    }
}

/// In-place edit applied to every chunk when it is read.
pub type Transform = Box<dyn Fn(&mut Chunk) -> Result<()> + Send + Sync>;

pub trait ChunkSource {
    fn name(&self) -> &str;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn chunk(&self, index: usize) -> Result<Chunk>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InMemoryDataset {
    pub name: String,
    pub chunks: Vec<Chunk>,
}

impl InMemoryDataset {
    pub fn new(name: impl Into<String>, chunks: Vec<Chunk>) -> Result<Self> {
        let dataset = Self { name: name.into(), chunks };
        dataset.validate()?;
        Ok(dataset)
    }

    pub fn validate(&self) -> Result<()> {
        for (i, chunk) in self.chunks.iter().enumerate() {
            chunk
                .validate()
                .map_err(|e| Error::MalformedChunk(format!("{} chunk {}: {}", self.name, i, e)))?;
        }
        Ok(())
    }
}

impl ChunkSource for InMemoryDataset {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> usize {
        self.chunks.len()
    }

    fn chunk(&self, index: usize) -> Result<Chunk> {
        self.chunks
            .get(index)
            .cloned()
            .ok_or_else(|| Error::InvalidArgument(format!("chunk {} out of range ({})", index, self.chunks.len())))
    }
}

/// On-disk envelope of a serialized dataset collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DatasetCollection {
    Single(InMemoryDataset),
    Many(Vec<InMemoryDataset>),
}

impl DatasetCollection {
    pub fn into_datasets(self) -> Vec<InMemoryDataset> {
        match self {
            DatasetCollection::Single(d) => vec![d],
            DatasetCollection::Many(ds) => ds,
        }
    }
}

/// Fixed-width little-endian encoding, as `bincode::serialize` writes it.
fn collection_codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
}

pub fn save_collection<P: AsRef<Path>>(path: P, collection: &DatasetCollection) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(Error::io(path))?;
    collection_codec().serialize_into(BufWriter::new(file), collection)?;
    Ok(())
}

/// Reads a collection written by [`save_collection`] and checks every chunk.
///
/// Decoding is bounded by the file size, so a corrupt length prefix is an
/// error rather than an allocation failure.
pub fn read_collection<P: AsRef<Path>>(path: P) -> Result<Vec<InMemoryDataset>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(Error::io(path))?;
    let limit = file.metadata().map_err(Error::io(path))?.len();
    let collection: DatasetCollection = collection_codec()
        .with_limit(limit)
        .deserialize_from(BufReader::new(file))?;
    let datasets = collection.into_datasets();
    for d in &datasets {
        d.validate()?;
    }
    Ok(datasets)
}

/// Directories and `.h5`/`.hdf5` files are read as HDF5.
pub fn is_hdf5_path(path: &Path) -> bool {
    path.is_dir() || has_hdf5_extension(path)
}

pub(crate) fn has_hdf5_extension(path: &Path) -> bool {
    matches!(
        path.extension().and_then(std::ffi::OsStr::to_str),
        Some("h5") | Some("hdf5")
    )
}

/// Resolves a dataset path to the list of datasets it holds.
///
/// `.h5`/`.hdf5` files and directories become a single HDF5 dataset chunked
/// by `chunk_size` with the self energies subtracted. Anything else is read
/// as a serialized [`DatasetCollection`], whose energies are used as stored.
pub fn load_datasets<P: AsRef<Path>>(
    path: P,
    chunk_size: usize,
    shifter: EnergyShifter,
) -> Result<Vec<Box<dyn ChunkSource>>> {
    let path = path.as_ref();
    if is_hdf5_path(path) {
        let dataset = Hdf5Dataset::open(path, chunk_size, vec![shifter.into_transform()])?;
        info!("Opened HDF5 dataset {} ({} chunks)", path.display(), dataset.len());
        Ok(vec![Box::new(dataset) as Box<dyn ChunkSource>])
    } else {
        let datasets = read_collection(path)?;
        info!("Read {} serialized datasets from {}", datasets.len(), path.display());
        Ok(datasets
            .into_iter()
            .map(|d| Box::new(d) as Box<dyn ChunkSource>)
            .collect())
    }
}

/// `batch_chunks` consecutive chunks of a dataset.
#[derive(Debug, Clone)]
pub struct Batch {
    pub chunks: Vec<Chunk>,
}

impl Batch {
    pub fn num_conformations(&self) -> usize {
        self.chunks.iter().map(Chunk::num_conformations).sum()
    }

    /// Target energies of all chunks, in chunk order.
    pub fn targets(&self) -> Array1<f64> {
        self.chunks.iter().flat_map(|c| c.energies.iter().copied()).collect()
    }
}

pub struct BatchLoader<'a> {
    source: &'a dyn ChunkSource,
    batch_chunks: usize,
}

impl<'a> BatchLoader<'a> {
    pub fn new(source: &'a dyn ChunkSource, batch_chunks: usize) -> Result<Self> {
        if batch_chunks == 0 {
            return Err(Error::InvalidArgument("batch_chunks must be at least 1".to_string()));
        }
        debug!("Batch loader over '{}': {} chunks, {} per batch", source.name(), source.len(), batch_chunks);
        Ok(Self { source, batch_chunks })
    }

    pub fn len(&self) -> usize {
        self.source.len().div_ceil(self.batch_chunks)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Walks the dataset once, in order. Can be called repeatedly.
    pub fn iter(&self) -> Batches<'_> {
        Batches { loader: self, next: 0 }
    }
}

pub struct Batches<'l> {
    loader: &'l BatchLoader<'l>,
    next: usize,
}

impl Iterator for Batches<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        let total = self.loader.source.len();
        if self.next >= total {
            return None;
        }
        let end = (self.next + self.loader.batch_chunks).min(total);
        let chunks = (self.next..end).map(|i| self.loader.source.chunk(i)).collect::<Result<Vec<_>>>();
        self.next = end;
        Some(chunks.map(|chunks| Batch { chunks }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SpeciesSet;
    use ndarray::Array3;

    fn water(n: usize, first_energy: f64) -> Chunk {
        let energies: Array1<f64> = (0..n).map(|i| first_energy + i as f64).collect();
        Chunk::new(
            vec!["O".to_string(), "H".to_string(), "H".to_string()],
            Array3::from_elem((n, 3, 3), 0.5),
            energies,
        )
        .unwrap()
    }

    fn dataset(name: &str, chunks: usize) -> InMemoryDataset {
        InMemoryDataset::new(name, (0..chunks).map(|i| water(2, i as f64 * 10.0)).collect()).unwrap()
    }

    fn shifter() -> EnergyShifter {
        EnergyShifter::builtin(&SpeciesSet::new(&["H", "C", "N", "O"]).unwrap()).unwrap()
    }

    #[test]
    fn test_chunk_validation() {
        let bad = Chunk::new(vec!["H".to_string()], Array3::zeros((2, 2, 3)), Array1::zeros(2));
        assert!(matches!(bad, Err(Error::MalformedChunk(_))));
        let bad = Chunk::new(vec!["H".to_string()], Array3::zeros((2, 1, 3)), Array1::zeros(3));
        assert!(matches!(bad, Err(Error::MalformedChunk(_))));
        let bad = Chunk::new(vec!["H".to_string()], Array3::zeros((2, 1, 2)), Array1::zeros(2));
        assert!(matches!(bad, Err(Error::MalformedChunk(_))));
    }

    #[test]
    fn test_single_dataset_is_wrapped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("one.bin");
        save_collection(&path, &DatasetCollection::Single(dataset("solo", 3))).unwrap();

        let loaded = load_datasets(&path, 256, shifter()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name(), "solo");
        assert_eq!(loaded[0].len(), 3);
    }

    #[test]
    fn test_dataset_list_is_kept_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("many.bin");
        let datasets = vec![dataset("a", 1), dataset("b", 2), dataset("c", 3)];
        save_collection(&path, &DatasetCollection::Many(datasets.clone())).unwrap();

        let loaded = load_datasets(&path, 256, shifter()).unwrap();
        let names: Vec<&str> = loaded.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(loaded[2].len(), 3);
        // Serialized energies are used as stored.
        assert_eq!(loaded[1].chunk(1).unwrap(), datasets[1].chunks[1]);
    }

    #[test]
    fn test_empty_collection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        save_collection(&path, &DatasetCollection::Many(Vec::new())).unwrap();
        assert!(load_datasets(&path, 256, shifter()).unwrap().is_empty());
    }

    #[test]
    fn test_garbage_collection_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.pkl");
        std::fs::write(&path, b"\x80\x04not a collection").unwrap();
        assert!(matches!(read_collection(&path), Err(Error::Collection(_))));
    }

    #[test]
    fn test_oversized_length_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.bin");
        // `Single` variant tag, then a dataset name claiming 2^62 bytes.
        let mut bytes = 0u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&(1u64 << 62).to_le_bytes());
        bytes.extend_from_slice(b"solo");
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(read_collection(&path), Err(Error::Collection(_))));
    }

    #[test]
    fn test_collection_matches_plain_bincode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.bin");
        let collection = DatasetCollection::Many(vec![dataset("a", 2)]);
        std::fs::write(&path, bincode::serialize(&collection).unwrap()).unwrap();
        assert_eq!(read_collection(&path).unwrap(), collection.into_datasets());
    }

    #[test]
    fn test_malformed_chunk_in_collection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.bin");
        let mut d = dataset("bad", 1);
        d.chunks[0].species.pop();
        save_collection(&path, &DatasetCollection::Single(d)).unwrap();
        assert!(matches!(read_collection(&path), Err(Error::MalformedChunk(_))));
    }

    #[test]
    fn test_hdf5_path_detection() {
        let dir = tempfile::tempdir().unwrap();
        assert!(is_hdf5_path(dir.path()));
        assert!(is_hdf5_path(Path::new("data/ani_gdb_s01.h5")));
        assert!(is_hdf5_path(Path::new("data/ani_gdb_s01.hdf5")));
        assert!(!is_hdf5_path(Path::new("data/testset.pkl")));
        assert!(!is_hdf5_path(Path::new("data/h5")));
    }

    #[test]
    fn test_batch_loader_groups_chunks() {
        let d = dataset("d", 5);
        let loader = BatchLoader::new(&d, 2).unwrap();
        assert_eq!(loader.len(), 3);

        let batches: Vec<Batch> = loader.iter().collect::<Result<_>>().unwrap();
        let sizes: Vec<usize> = batches.iter().map(|b| b.chunks.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(batches[0].num_conformations(), 4);
        assert_eq!(batches[0].targets().to_vec(), vec![0.0, 1.0, 10.0, 11.0]);
        assert_eq!(batches[2].targets().to_vec(), vec![40.0, 41.0]);

        // Restartable.
        assert_eq!(loader.iter().count(), 3);
    }

    #[test]
    fn test_batch_loader_rejects_zero() {
        let d = dataset("d", 1);
        assert!(BatchLoader::new(&d, 0).is_err());
    }

    #[test]
    fn test_chunk_slice() {
        let c = water(5, 0.0);
        let s = c.slice(1, 3);
        assert_eq!(s.num_conformations(), 2);
        assert_eq!(s.energies.to_vec(), vec![1.0, 2.0]);
        assert_eq!(s.num_atoms(), 3);
    }
}
