//! Lazily-read ANI HDF5 datasets.
//!
//! Every group holding `coordinates` (`[n, A, 3]`), `energies` (`[n]`) and
//! either `species` (`[A]` strings) or `atomic_numbers` (`[A]` integers) is
//! one molecule. Groups are walked recursively in name order; a directory
//! contributes every `.h5`/`.hdf5` file directly inside it, sorted by name.

use std::path::{Path, PathBuf};

use hdf5::types::{FixedAscii, TypeDescriptor, VarLenAscii, VarLenUnicode};
use hdf5::{File, Group};
use log::debug;
use ndarray::{s, Array1, Array3};

use crate::dataset::{has_hdf5_extension, Chunk, ChunkSource, Transform};
use crate::{atomic_number_to_symbol, Error, Result};

struct MoleculeRef {
    file: usize,
    path: String,
}

struct ChunkRef {
    molecule: usize,
    start: usize,
    end: usize,
}

pub struct Hdf5Dataset {
    name: String,
    files: Vec<File>,
    molecules: Vec<MoleculeRef>,
    chunks: Vec<ChunkRef>,
    transforms: Vec<Transform>,
}

impl Hdf5Dataset {
    /// Indexes every molecule under `path` and splits its conformations
    /// into chunks of at most `chunk_size`. Arrays are read on demand.
    pub fn open<P: AsRef<Path>>(path: P, chunk_size: usize, transforms: Vec<Transform>) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidArgument("chunk_size must be at least 1".to_string()));
        }
        let path = path.as_ref();

        let mut files = Vec::new();
        let mut molecules = Vec::new();
        let mut chunks = Vec::new();

        for file_path in hdf5_files(path)? {
            let file = File::open(&file_path)?;
            let mut groups = Vec::new();
            collect_molecules(&file, &mut groups)?;
            debug!("{}: {} molecules", file_path.display(), groups.len());

            for group_path in groups {
                let n = file
                    .dataset(&format!("{}/energies", group_path))?
                    .shape()
                    .first()
                    .copied()
                    .unwrap_or(0);
                let molecule = molecules.len();
                let mut start = 0;
                while start < n {
                    let end = (start + chunk_size).min(n);
                    chunks.push(ChunkRef { molecule, start, end });
                    start = end;
                }
                molecules.push(MoleculeRef { file: files.len(), path: group_path });
            }
            files.push(file);
        }

        Ok(Self {
            name: path.display().to_string(),
            files,
            molecules,
            chunks,
            transforms,
        })
    }

    pub fn num_molecules(&self) -> usize {
        self.molecules.len()
    }
}

impl ChunkSource for Hdf5Dataset {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> usize {
        self.chunks.len()
    }

    fn chunk(&self, index: usize) -> Result<Chunk> {
        let r = self
            .chunks
            .get(index)
            .ok_or_else(|| Error::InvalidArgument(format!("chunk {} out of range ({})", index, self.chunks.len())))?;
        let molecule = &self.molecules[r.molecule];
        let group = self.files[molecule.file].group(&molecule.path)?;

        // Only the chunk's conformations are read.
        let species = read_species(&group)?;
        let coordinates: Array3<f32> = group
            .dataset("coordinates")?
            .read_slice(s![r.start..r.end, .., ..])?;
        let energies: Array1<f64> = group.dataset("energies")?.read_slice_1d(s![r.start..r.end])?;
        let mut chunk = Chunk::new(species, coordinates, energies)
            .map_err(|e| Error::MalformedChunk(format!("{}[{}..{}]: {}", molecule.path, r.start, r.end, e)))?;

        for transform in &self.transforms {
            transform(&mut chunk)?;
        }
        Ok(chunk)
    }
}

fn hdf5_files(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(path).map_err(Error::io(path))? {
        let p = entry.map_err(Error::io(path))?.path();
        if p.is_file() && has_hdf5_extension(&p) {
            files.push(p);
        }
    }
    if files.is_empty() {
        return Err(Error::NoHdf5Files(path.to_path_buf()));
    }
    files.sort();
    Ok(files)
}

fn is_molecule(group: &Group) -> bool {
    group.link_exists("coordinates")
        && group.link_exists("energies")
        && (group.link_exists("species") || group.link_exists("atomic_numbers"))
}

fn collect_molecules(group: &Group, out: &mut Vec<String>) -> Result<()> {
    if is_molecule(group) {
        out.push(group.name());
        return Ok(());
    }
    let mut children = group.groups()?;
    children.sort_by_key(|g| g.name());
    for child in &children {
        collect_molecules(child, out)?;
    }
    Ok(())
}

fn read_species(group: &Group) -> Result<Vec<String>> {
    if !group.link_exists("species") {
        let numbers = group.dataset("atomic_numbers")?.read_raw::<i64>()?;
        return numbers
            .iter()
            .map(|&z| {
                u8::try_from(z)
                    .ok()
                    .and_then(atomic_number_to_symbol)
                    .map(str::to_string)
                    .ok_or_else(|| Error::UnknownSpecies(format!("atomic number {}", z)))
            })
            .collect();
    }

    let ds = group.dataset("species")?;
    let symbols: Vec<String> = match ds.dtype()?.to_descriptor()? {
        TypeDescriptor::FixedAscii(1) => ds.read_raw::<FixedAscii<1>>()?.iter().map(|s| clean(s.as_str())).collect(),
        TypeDescriptor::FixedAscii(2) => ds.read_raw::<FixedAscii<2>>()?.iter().map(|s| clean(s.as_str())).collect(),
        TypeDescriptor::FixedAscii(3) => ds.read_raw::<FixedAscii<3>>()?.iter().map(|s| clean(s.as_str())).collect(),
        TypeDescriptor::VarLenAscii => ds.read_raw::<VarLenAscii>()?.iter().map(|s| clean(s.as_str())).collect(),
        TypeDescriptor::VarLenUnicode => ds.read_raw::<VarLenUnicode>()?.iter().map(|s| clean(s.as_str())).collect(),
        other => {
            return Err(Error::MalformedChunk(format!(
                "{}: unsupported species type {:?}",
                group.name(),
                other
            )))
        }
    };
    Ok(symbols)
}

fn clean(s: &str) -> String {
    s.trim_matches(|c: char| c == '\0' || c.is_whitespace()).to_string()
}
