use std::path::PathBuf;

use clap::Parser;
use tch::Device;

#[derive(Parser, Debug)]
#[command(
    name = "ani-eval",
    about = "Evaluate a pretrained ANI ensemble and report the energy RMSE in kcal/mol",
    version
)]
pub struct EvalArgs {
    /// HDF5 file or directory, or a serialized dataset collection
    #[arg(value_name = "DATASET")]
    pub dataset_path: PathBuf,

    /// Compute device: cpu, cuda, cuda:N or mps (default: cuda if available)
    #[arg(short, long, value_name = "DEVICE", value_parser = parse_device)]
    pub device: Option<Device>,

    /// Conformations per chunk
    #[arg(long = "chunk_size", value_name = "N", default_value_t = 256)]
    pub chunk_size: usize,

    /// Chunks per minibatch
    #[arg(long = "batch_chunks", value_name = "N", default_value_t = 4)]
    pub batch_chunks: usize,

    /// AEV constants file (default: built-in ANI-1x constants)
    #[arg(long = "const_file", value_name = "FILE")]
    pub const_file: Option<PathBuf>,

    /// Self-atomic-energies file (default: built-in ANI-1x table)
    #[arg(long = "sae_file", value_name = "FILE")]
    pub sae_file: Option<PathBuf>,

    /// Network directory, or member prefix with --ensemble (required: there are no built-in networks)
    #[arg(long = "network_dir", value_name = "DIR")]
    pub network_dir: Option<PathBuf>,

    /// Ensemble size; member i is read from <network_dir><i>/networks/
    #[arg(long, value_name = "N")]
    pub ensemble: Option<usize>,
}

/// Resolved, immutable run configuration.
#[derive(Debug, Clone)]
pub struct EvalConfig {
    pub dataset_path: PathBuf,
    pub device: Device,
    pub chunk_size: usize,
    pub batch_chunks: usize,
    pub const_file: Option<PathBuf>,
    pub sae_file: Option<PathBuf>,
    pub network_dir: Option<PathBuf>,
    pub ensemble: Option<usize>,
}

impl From<EvalArgs> for EvalConfig {
    fn from(args: EvalArgs) -> Self {
        Self {
            dataset_path: args.dataset_path,
            device: args.device.unwrap_or_else(Device::cuda_if_available),
            chunk_size: args.chunk_size,
            batch_chunks: args.batch_chunks,
            const_file: args.const_file,
            sae_file: args.sae_file,
            network_dir: args.network_dir,
            ensemble: args.ensemble,
        }
    }
}

pub fn parse_device(s: &str) -> Result<Device, String> {
    match s.to_ascii_lowercase().as_str() {
        "cpu" => Ok(Device::Cpu),
        "cuda" => Ok(Device::Cuda(0)),
        "mps" => Ok(Device::Mps),
        other => match other.strip_prefix("cuda:") {
            Some(index) => index
                .parse::<usize>()
                .map(Device::Cuda)
                .map_err(|_| format!("invalid CUDA device index '{}'", index)),
            None => Err(format!("unknown device '{}' (expected cpu, cuda, cuda:N or mps)", s)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;
    use clap::CommandFactory;

    #[test]
    fn test_defaults() {
        let args = EvalArgs::try_parse_from(["ani-eval", "data.h5"]).unwrap();
        assert_eq!(args.dataset_path, PathBuf::from("data.h5"));
        assert_eq!(args.chunk_size, 256);
        assert_eq!(args.batch_chunks, 4);
        assert!(args.device.is_none());
        assert!(args.ensemble.is_none());
        assert!(args.network_dir.is_none());
    }

    #[test]
    fn test_all_options() {
        let args = EvalArgs::try_parse_from([
            "ani-eval",
            "-d",
            "cpu",
            "--chunk_size",
            "32",
            "--batch_chunks",
            "2",
            "--const_file",
            "c.params",
            "--sae_file",
            "sae.dat",
            "--network_dir",
            "/models/train",
            "--ensemble",
            "8",
            "collection.bin",
        ])
        .unwrap();
        let config = EvalConfig::from(args);
        assert_eq!(config.device, Device::Cpu);
        assert_eq!(config.chunk_size, 32);
        assert_eq!(config.batch_chunks, 2);
        assert_eq!(config.const_file, Some(PathBuf::from("c.params")));
        assert_eq!(config.sae_file, Some(PathBuf::from("sae.dat")));
        assert_eq!(config.network_dir, Some(PathBuf::from("/models/train")));
        assert_eq!(config.ensemble, Some(8));
        assert_eq!(config.dataset_path, PathBuf::from("collection.bin"));
    }

    #[test]
    fn test_missing_dataset_path() {
        let err = EvalArgs::try_parse_from(["ani-eval", "--device", "cpu"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        assert_ne!(err.exit_code(), 0);
    }

    #[test]
    fn test_bad_numbers_rejected() {
        assert!(EvalArgs::try_parse_from(["ani-eval", "--ensemble", "two", "x.h5"]).is_err());
        assert!(EvalArgs::try_parse_from(["ani-eval", "--chunk_size", "-1", "x.h5"]).is_err());
    }

    #[test]
    fn test_network_dir_help_says_required() {
        let help = EvalArgs::command().render_help().to_string();
        assert!(help.contains("required: there are no built-in networks"));
    }

    #[test]
    fn test_parse_device() {
        assert_eq!(parse_device("cpu").unwrap(), Device::Cpu);
        assert_eq!(parse_device("CUDA").unwrap(), Device::Cuda(0));
        assert_eq!(parse_device("cuda:3").unwrap(), Device::Cuda(3));
        assert_eq!(parse_device("mps").unwrap(), Device::Mps);
        assert!(parse_device("cuda:x").is_err());
        assert!(parse_device("tpu").is_err());
    }
}
