use std::path::{Path, PathBuf};

use log::debug;
use ndarray::Array2;
use ort::execution_providers::CPUExecutionProvider;
use ort::session::Session;
use ort::value::Tensor as OrtTensor;
use tch::{CModule, Device, Kind, Tensor};

use crate::error::onnx_err;
use crate::{Error, Result};

/// Per-species network mapping AEVs `[m, L]` to atomic energies `[m]`.
pub trait AtomicNetwork {
    fn forward(&mut self, aevs: &Tensor) -> Result<Tensor>;

    fn to_device(&mut self, device: Device);
}

/// TorchScript network (`ANN-<symbol>.pt`).
pub struct TorchScriptNetwork {
    module: CModule,
    device: Device,
}

impl TorchScriptNetwork {
    pub fn load<P: AsRef<Path>>(path: P, device: Device) -> Result<Self> {
        let mut module = CModule::load_on_device(path.as_ref(), device)?;
        module.set_eval();
        Ok(Self { module, device })
    }
}

impl AtomicNetwork for TorchScriptNetwork {
    fn forward(&mut self, aevs: &Tensor) -> Result<Tensor> {
        let input = aevs.to_device(self.device).to_kind(Kind::Float);
        let out = tch::no_grad(|| self.module.forward_ts(&[input]))?;
        Ok(out.flatten(0, -1).to_kind(Kind::Double))
    }

    fn to_device(&mut self, device: Device) {
        self.module.to(device, Kind::Float, false);
        self.device = device;
    }
}

/// ONNX network (`ANN-<symbol>.onnx`) run on the CPU through ONNX Runtime.
///
/// The first graph input receives the AEVs, the first graph output is read
/// back as atomic energies.
pub struct OnnxNetwork {
    session: Session,
    input: String,
    output: String,
    device: Device,
}

impl OnnxNetwork {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let session = Session::builder()
            .map_err(onnx_err)?
            .with_execution_providers([CPUExecutionProvider::default().build()])
            .map_err(onnx_err)?
            .commit_from_file(path.as_ref())
            .map_err(onnx_err)?;

        let input = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| Error::Onnx(format!("{} has no inputs", path.as_ref().display())))?;
        let output = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| Error::Onnx(format!("{} has no outputs", path.as_ref().display())))?;

        Ok(Self { session, input, output, device: Device::Cpu })
    }
}

impl AtomicNetwork for OnnxNetwork {
    fn forward(&mut self, aevs: &Tensor) -> Result<Tensor> {
        let (m, l) = aevs.size2()?;
        if m == 0 {
            return Ok(Tensor::zeros([0], (Kind::Double, self.device)));
        }
        let flat = Vec::<f32>::try_from(aevs.to_device(Device::Cpu).to_kind(Kind::Float).flatten(0, -1))?;
        let array = Array2::from_shape_vec((m as usize, l as usize), flat)
            .map_err(|e| Error::Shape(e.to_string()))?;

        let inputs = ort::inputs![self.input.as_str() => OrtTensor::from_array(array).map_err(onnx_err)?];
        let outputs = self.session.run(inputs).map_err(onnx_err)?;
        let (_shape, energies) = outputs[self.output.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(onnx_err)?;
        if energies.len() != m as usize {
            return Err(Error::Shape(format!(
                "network returned {} values for {} atoms",
                energies.len(),
                m
            )));
        }

        Ok(Tensor::from_slice(energies).to_kind(Kind::Double).to(self.device))
    }

    fn to_device(&mut self, device: Device) {
        // Inference stays on the CPU; only results follow the device.
        self.device = device;
    }
}

/// Loads the network of `symbol` from `dir`, preferring TorchScript over ONNX.
pub fn load_network(dir: &Path, symbol: &str, device: Device) -> Result<Box<dyn AtomicNetwork>> {
    let candidates: [PathBuf; 2] = [
        dir.join(format!("ANN-{}.pt", symbol)),
        dir.join(format!("ANN-{}.onnx", symbol)),
    ];
    match candidates.iter().find(|p| p.is_file()) {
        Some(path) if path.extension().is_some_and(|e| e == "pt") => {
            debug!("Loading TorchScript network {}", path.display());
            Ok(Box::new(TorchScriptNetwork::load(path, device)?))
        }
        Some(path) => {
            debug!("Loading ONNX network {}", path.display());
            let mut net = OnnxNetwork::load(path)?;
            net.to_device(device);
            Ok(Box::new(net))
        }
        None => Err(Error::MissingNetwork { species: symbol.to_string(), dir: dir.to_path_buf() }),
    }
}
