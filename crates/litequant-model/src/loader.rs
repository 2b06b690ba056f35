//! Checkpoint loading.
//!
//! Source classifiers are read from a single SafeTensors file. The layer
//! list travels in the file metadata under [`ARCHITECTURE_METADATA_KEY`],
//! or in a `config.json` next to the weights.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use memmap2::MmapOptions;
use safetensors::SafeTensors;
use tracing::{debug, info};

use crate::config::ClassifierConfig;

/// Metadata key holding the architecture JSON.
pub const ARCHITECTURE_METADATA_KEY: &str = "litequant.architecture";

/// Weight file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightFormat {
    /// SafeTensors format.
    SafeTensors,
    /// Keras HDF5 format.
    Hdf5,
}

impl WeightFormat {
    /// Detect format from filename.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "safetensors" => Some(Self::SafeTensors),
            "h5" | "hdf5" | "keras" => Some(Self::Hdf5),
            _ => None,
        }
    }
}

/// Model loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Device to load model on.
    pub device: Device,

    /// Enable memory mapping.
    pub use_mmap: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            device: Device::Cpu,
            use_mmap: true,
        }
    }
}

impl LoaderConfig {
    /// Set memory mapping.
    pub fn with_mmap(mut self, use_mmap: bool) -> Self {
        self.use_mmap = use_mmap;
        self
    }
}

/// Everything read from a checkpoint file.
#[derive(Debug)]
pub struct Checkpoint {
    /// Architecture.
    pub config: ClassifierConfig,

    /// Named weights, widened to f32.
    pub tensors: HashMap<String, Tensor>,

    /// File the weights came from.
    pub path: PathBuf,

    /// File size in bytes.
    pub file_size: u64,
}

/// Checkpoint loader.
pub struct ModelLoader {
    /// Loader configuration.
    config: LoaderConfig,

    /// Weight file.
    path: PathBuf,

    /// File size in bytes.
    file_size: u64,
}

impl ModelLoader {
    /// Create a loader for a weight file.
    pub fn new<P: AsRef<Path>>(path: P, config: LoaderConfig) -> Result<Self, LoaderError> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            return Err(LoaderError::NotFound(path.display().to_string()));
        }

        match WeightFormat::from_path(&path) {
            Some(WeightFormat::SafeTensors) => {}
            Some(WeightFormat::Hdf5) => {
                return Err(LoaderError::UnsupportedFormat(format!(
                    "{} is an HDF5 checkpoint; export the weights to .safetensors first",
                    path.display()
                )))
            }
            None => return Err(LoaderError::UnsupportedFormat(path.display().to_string())),
        }

        let file_size = std::fs::metadata(&path)
            .map_err(|e| LoaderError::IoError(e.to_string()))?
            .len();

        Ok(Self {
            config,
            path,
            file_size,
        })
    }

    /// Weight file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Weight file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Read architecture and weights.
    pub fn load(&self) -> Result<Checkpoint, LoaderError> {
        let tensors_and_meta = if self.config.use_mmap {
            self.load_mmap()?
        } else {
            self.load_direct()?
        };
        let (tensors, embedded) = tensors_and_meta;

        let config = match embedded {
            Some(json) => {
                debug!("Using embedded architecture from {}", self.path.display());
                ClassifierConfig::from_json_str(&json)
                    .map_err(|e| LoaderError::ConfigError(e.to_string()))?
            }
            None => self.load_sidecar_config()?,
        };

        config
            .validate()
            .map_err(|e| LoaderError::ConfigError(e.to_string()))?;

        info!(
            "Loaded {} tensors for '{}' from {}",
            tensors.len(),
            config.name,
            self.path.display()
        );

        Ok(Checkpoint {
            config,
            tensors,
            path: self.path.clone(),
            file_size: self.file_size,
        })
    }

    /// Load with memory mapping.
    #[allow(unsafe_code)]
    fn load_mmap(&self) -> Result<(HashMap<String, Tensor>, Option<String>), LoaderError> {
        debug!("Memory mapping: {}", self.path.display());

        let file = std::fs::File::open(&self.path).map_err(|e| LoaderError::IoError(e.to_string()))?;

        // SAFETY: the map is read-only and dropped before this function returns.
        let mmap = unsafe {
            MmapOptions::new()
                .map(&file)
                .map_err(|e| LoaderError::IoError(e.to_string()))?
        };

        Self::read_buffer(&mmap, &self.config.device)
    }

    /// Load by reading the whole file.
    fn load_direct(&self) -> Result<(HashMap<String, Tensor>, Option<String>), LoaderError> {
        debug!("Loading: {}", self.path.display());

        let data = std::fs::read(&self.path).map_err(|e| LoaderError::IoError(e.to_string()))?;
        Self::read_buffer(&data, &self.config.device)
    }

    fn read_buffer(
        buffer: &[u8],
        device: &Device,
    ) -> Result<(HashMap<String, Tensor>, Option<String>), LoaderError> {
        let (_, metadata) = SafeTensors::read_metadata(buffer)
            .map_err(|e| LoaderError::FormatError(e.to_string()))?;
        let architecture = metadata
            .metadata()
            .as_ref()
            .and_then(|m| m.get(ARCHITECTURE_METADATA_KEY).cloned());

        let st = SafeTensors::deserialize(buffer).map_err(|e| LoaderError::FormatError(e.to_string()))?;

        let mut tensors = HashMap::new();
        for (name, view) in st.tensors() {
            let tensor = convert_tensor(&view, device)
                .map_err(|e| LoaderError::TensorError(format!("{name}: {e}")))?;
            tensors.insert(name, tensor);
        }

        Ok((tensors, architecture))
    }

    fn load_sidecar_config(&self) -> Result<ClassifierConfig, LoaderError> {
        let sidecar = self
            .path
            .parent()
            .map(|dir| dir.join("config.json"))
            .filter(|p| p.exists())
            .ok_or_else(|| {
                LoaderError::ConfigError(format!(
                    "{} has no embedded architecture and no config.json beside it",
                    self.path.display()
                ))
            })?;

        debug!("Using architecture from {}", sidecar.display());
        ClassifierConfig::from_json_file(&sidecar).map_err(|e| LoaderError::ConfigError(e.to_string()))
    }
}

/// Convert a SafeTensors view into an f32 tensor.
pub fn convert_tensor(
    view: &safetensors::tensor::TensorView<'_>,
    device: &Device,
) -> Result<Tensor, LoaderError> {
    let shape = view.shape();
    let data = view.data();

    let tensor = match view.dtype() {
        safetensors::Dtype::F32 => {
            let values: Vec<f32> = data
                .chunks_exact(4)
                .map(|b| bytemuck::pod_read_unaligned::<f32>(b))
                .collect();
            Tensor::from_vec(values, shape, device)
        }
        safetensors::Dtype::F16 => {
            let values: Vec<half::f16> = data
                .chunks_exact(2)
                .map(|b| bytemuck::pod_read_unaligned::<half::f16>(b))
                .collect();
            Tensor::from_vec(values, shape, device)
        }
        safetensors::Dtype::BF16 => {
            let values: Vec<half::bf16> = data
                .chunks_exact(2)
                .map(|b| bytemuck::pod_read_unaligned::<half::bf16>(b))
                .collect();
            Tensor::from_vec(values, shape, device)
        }
        other => return Err(LoaderError::UnsupportedDtype(format!("{:?}", other))),
    }
    .map_err(|e| LoaderError::TensorError(e.to_string()))?;

    if tensor.dtype() == DType::F32 {
        Ok(tensor)
    } else {
        tensor
            .to_dtype(DType::F32)
            .map_err(|e| LoaderError::TensorError(e.to_string()))
    }
}

/// Loader error types.
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Unsupported weight format: {0}")]
    UnsupportedFormat(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Format error: {0}")]
    FormatError(String),

    #[error("Tensor error: {0}")]
    TensorError(String),

    #[error("Unsupported dtype: {0}")]
    UnsupportedDtype(String),

    #[error("Missing tensor: {0}")]
    MissingTensor(String),
}

impl From<LoaderError> for litequant_core::Error {
    fn from(e: LoaderError) -> Self {
        match e {
            LoaderError::NotFound(path) => litequant_core::Error::model_not_found(path),
            other => litequant_core::Error::model_with_source("failed to load source model", other),
        }
    }
}

/// Load a checkpoint with default settings.
pub fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<Checkpoint, LoaderError> {
    ModelLoader::new(path, LoaderConfig::default())?.load()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weights::{random_weights, save_checkpoint};
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_weight_format_detection() {
        assert_eq!(
            WeightFormat::from_path("model.safetensors"),
            Some(WeightFormat::SafeTensors)
        );
        assert_eq!(WeightFormat::from_path("nsfw.299x299.h5"), Some(WeightFormat::Hdf5));
        assert_eq!(WeightFormat::from_path("model.txt"), None);
    }

    #[test]
    fn test_missing_file() {
        let result = ModelLoader::new("/nonexistent/model.safetensors", LoaderConfig::default());
        assert!(matches!(result, Err(LoaderError::NotFound(_))));

        let err: litequant_core::Error = result.err().unwrap().into();
        assert!(matches!(err, litequant_core::Error::ModelNotFound { .. }));
    }

    #[test]
    fn test_hdf5_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.h5");
        std::fs::write(&path, b"\x89HDF\r\n\x1a\n").unwrap();

        let result = ModelLoader::new(&path, LoaderConfig::default());
        match result {
            Err(LoaderError::UnsupportedFormat(msg)) => assert!(msg.contains(".safetensors")),
            other => panic!("unexpected: {:?}", other.err()),
        }
    }

    #[test]
    fn test_load_embedded_architecture() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        let config = ClassifierConfig::mobilenet_lite();
        let mut rng = StdRng::seed_from_u64(3);
        let weights = random_weights(&config, &mut rng, &Device::Cpu).unwrap();
        save_checkpoint(&path, &config, &weights, DType::F32, true).unwrap();

        for use_mmap in [true, false] {
            let checkpoint = ModelLoader::new(&path, LoaderConfig::default().with_mmap(use_mmap))
                .unwrap()
                .load()
                .unwrap();
            assert_eq!(checkpoint.config, config);
            assert_eq!(checkpoint.tensors.len(), weights.len());
            assert!(checkpoint.file_size > 0);
        }
    }

    #[test]
    fn test_sidecar_config_and_f16_widening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.safetensors");
        let config = ClassifierConfig::mobilenet_lite();
        let mut rng = StdRng::seed_from_u64(4);
        let weights = random_weights(&config, &mut rng, &Device::Cpu).unwrap();

        save_checkpoint(&path, &config, &weights, DType::F16, false).unwrap();
        assert!(load_checkpoint(&path).is_err());

        std::fs::write(dir.path().join("config.json"), config.to_json().unwrap()).unwrap();
        let checkpoint = load_checkpoint(&path).unwrap();
        let weight = &checkpoint.tensors["layers.0.weight"];
        assert_eq!(weight.dtype(), DType::F32);
        assert_eq!(weight.dims(), &[8, 3, 3, 3]);
    }

    #[test]
    fn test_garbage_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.safetensors");
        std::fs::write(&path, b"not a checkpoint").unwrap();

        assert!(matches!(load_checkpoint(&path), Err(LoaderError::FormatError(_))));
    }
}
