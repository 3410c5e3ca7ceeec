use std::path::Path;

use log::debug;

use crate::{Error, Result, SpeciesSet};

const BUILTIN_CONSTANTS: &str = include_str!("../resources/rHCNO-5.2R_16-3.5A_a4-8.params");

/// Symmetry function parameters of an AEV computer, as stored in a
/// NeuroChem `.params` file.
///
/// ```text
/// Rcr = 5.2000e+00
/// EtaR = [1.6000000e+01]
/// Atyp = [H,C,N,O]
/// ```
///
/// Keys other than the nine below (e.g. `TM`) are ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct AevConstants {
    /// Radial cutoff (Å).
    pub rcr: f32,
    /// Angular cutoff (Å).
    pub rca: f32,
    pub eta_r: Vec<f32>,
    pub shf_r: Vec<f32>,
    pub zeta: Vec<f32>,
    pub shf_z: Vec<f32>,
    pub eta_a: Vec<f32>,
    pub shf_a: Vec<f32>,
    pub species: SpeciesSet,
}

impl AevConstants {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(Error::io(path))?;
        let constants = Self::parse(&text)?;
        debug!("Loaded AEV constants from {} (AEV length {})", path.display(), constants.aev_length());
        Ok(constants)
    }

    /// ANI-1x constants (H, C, N, O; 5.2 Å radial / 3.5 Å angular cutoff).
    pub fn builtin() -> Result<Self> {
        Self::parse(BUILTIN_CONSTANTS)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut rcr = None;
        let mut rca = None;
        let mut eta_r = None;
        let mut shf_r = None;
        let mut zeta = None;
        let mut shf_z = None;
        let mut eta_a = None;
        let mut shf_a = None;
        let mut atyp = None;

        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (name, value) = line.split_once('=').ok_or_else(|| {
                Error::Constants(format!("line {}: expected 'name = value'", lineno + 1))
            })?;
            let value = value.trim();
            match name.trim() {
                "Rcr" => rcr = Some(parse_scalar(value, lineno)?),
                "Rca" => rca = Some(parse_scalar(value, lineno)?),
                "EtaR" => eta_r = Some(parse_list(value, lineno)?),
                "ShfR" => shf_r = Some(parse_list(value, lineno)?),
                "Zeta" => zeta = Some(parse_list(value, lineno)?),
                "ShfZ" => shf_z = Some(parse_list(value, lineno)?),
                "EtaA" => eta_a = Some(parse_list(value, lineno)?),
                "ShfA" => shf_a = Some(parse_list(value, lineno)?),
                "Atyp" => {
                    let symbols: Vec<&str> = list_items(value, lineno)?.collect();
                    atyp = Some(SpeciesSet::new(&symbols)?);
                }
                _ => {}
            }
        }

        fn required<T>(v: Option<T>, name: &str) -> Result<T> {
            v.ok_or_else(|| Error::Constants(format!("missing '{}'", name)))
        }

        Ok(Self {
            rcr: required(rcr, "Rcr")?,
            rca: required(rca, "Rca")?,
            eta_r: required(eta_r, "EtaR")?,
            shf_r: required(shf_r, "ShfR")?,
            zeta: required(zeta, "Zeta")?,
            shf_z: required(shf_z, "ShfZ")?,
            eta_a: required(eta_a, "EtaA")?,
            shf_a: required(shf_a, "ShfA")?,
            species: required(atyp, "Atyp")?,
        })
    }

    pub fn num_species(&self) -> usize {
        self.species.len()
    }

    /// Radial features per neighbour species.
    pub fn radial_sublength(&self) -> usize {
        self.eta_r.len() * self.shf_r.len()
    }

    /// Angular features per unordered neighbour species pair.
    pub fn angular_sublength(&self) -> usize {
        self.eta_a.len() * self.zeta.len() * self.shf_a.len() * self.shf_z.len()
    }

    pub fn radial_length(&self) -> usize {
        self.num_species() * self.radial_sublength()
    }

    pub fn num_species_pairs(&self) -> usize {
        let n = self.num_species();
        n * (n + 1) / 2
    }

    pub fn angular_length(&self) -> usize {
        self.num_species_pairs() * self.angular_sublength()
    }

    pub fn aev_length(&self) -> usize {
        self.radial_length() + self.angular_length()
    }
}

fn parse_scalar(value: &str, lineno: usize) -> Result<f32> {
    value
        .parse()
        .map_err(|_| Error::Constants(format!("line {}: invalid number '{}'", lineno + 1, value)))
}

fn list_items(value: &str, lineno: usize) -> Result<impl Iterator<Item = &str>> {
    let inner = value
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .ok_or_else(|| Error::Constants(format!("line {}: expected '[...]'", lineno + 1)))?;
    Ok(inner.split(',').map(str::trim).filter(|s| !s.is_empty()))
}

fn parse_list(value: &str, lineno: usize) -> Result<Vec<f32>> {
    let values = list_items(value, lineno)?
        .map(|item| parse_scalar(item, lineno))
        .collect::<Result<Vec<f32>>>()?;
    if values.is_empty() {
        return Err(Error::Constants(format!("line {}: empty list", lineno + 1)));
    }
    Ok(values)
}
