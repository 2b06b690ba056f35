//! Weight initialization, checkpoint writing and statistics.

use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use rand::distributions::{Distribution, Uniform};
use rand::Rng;
use tracing::info;

use crate::config::{param_name, ClassifierConfig, LayerSpec};
use crate::loader::{LoaderError, ARCHITECTURE_METADATA_KEY};

/// Draw random weights for every layer of `config`.
///
/// Convolution and dense weights use a fan-in scaled uniform distribution;
/// batch norm statistics stay close to identity so activations keep a
/// useful range through the network.
pub fn random_weights<R: Rng + ?Sized>(
    config: &ClassifierConfig,
    rng: &mut R,
    device: &Device,
) -> Result<HashMap<String, Tensor>, candle_core::Error> {
    let mut tensors = HashMap::new();

    for (i, layer) in config.layers.iter().enumerate() {
        for (param, shape) in layer.parameters() {
            let count: usize = shape.iter().product();
            let (low, high) = init_range(layer, param, &shape);
            let dist = Uniform::new_inclusive(low, high);
            let values: Vec<f32> = (0..count).map(|_| dist.sample(rng)).collect();
            tensors.insert(param_name(i, param), Tensor::from_vec(values, shape, device)?);
        }
    }

    Ok(tensors)
}

fn init_range(layer: &LayerSpec, param: &str, shape: &[usize]) -> (f32, f32) {
    match (layer, param) {
        (LayerSpec::Conv2d { .. } | LayerSpec::Dense { .. }, "weight") => {
            let fan_in: usize = shape[1..].iter().product();
            let bound = (3.0 / fan_in.max(1) as f32).sqrt();
            (-bound, bound)
        }
        (_, "bias") | (_, "beta") | (_, "running_mean") => (-0.05, 0.05),
        (_, "gamma") => (0.8, 1.2),
        (_, "running_var") => (0.5, 1.5),
        _ => (0.0, 0.0),
    }
}

/// Write a checkpoint in SafeTensors format.
///
/// With `embed_architecture` the layer list is stored in the file metadata;
/// otherwise the caller is expected to ship a `config.json` alongside.
pub fn save_checkpoint<P: AsRef<Path>>(
    path: P,
    config: &ClassifierConfig,
    tensors: &HashMap<String, Tensor>,
    dtype: DType,
    embed_architecture: bool,
) -> Result<(), LoaderError> {
    let path = path.as_ref();

    let mut converted = Vec::with_capacity(tensors.len());
    for (name, tensor) in tensors {
        let tensor = tensor
            .to_dtype(dtype)
            .map_err(|e| LoaderError::TensorError(e.to_string()))?;
        converted.push((name.clone(), tensor));
    }
    converted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut metadata = HashMap::new();
    metadata.insert("format".to_string(), "pt".to_string());
    if embed_architecture {
        let json = config
            .to_json()
            .map_err(|e| LoaderError::ConfigError(e.to_string()))?;
        metadata.insert(ARCHITECTURE_METADATA_KEY.to_string(), json);
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| LoaderError::IoError(e.to_string()))?;
    }

    safetensors::serialize_to_file(converted, &Some(metadata), path)
        .map_err(|e| LoaderError::FormatError(e.to_string()))?;

    info!("Wrote {} tensors to {}", tensors.len(), path.display());

    Ok(())
}

/// Weight statistics.
#[derive(Debug, Clone)]
pub struct WeightStats {
    /// Weight name.
    pub name: String,

    /// Shape.
    pub shape: Vec<usize>,

    /// Data type.
    pub dtype: DType,

    /// Number of parameters.
    pub num_params: usize,

    /// Size in bytes.
    pub size_bytes: usize,

    /// Min value.
    pub min: f64,

    /// Max value.
    pub max: f64,

    /// Mean value.
    pub mean: f64,

    /// Standard deviation.
    pub std: f64,
}

impl WeightStats {
    /// Compute stats from tensor.
    pub fn from_tensor(name: &str, tensor: &Tensor) -> Result<Self, candle_core::Error> {
        let shape = tensor.dims().to_vec();
        let dtype = tensor.dtype();
        let num_params: usize = shape.iter().product();
        let size_bytes = num_params * dtype.size_in_bytes();

        let data = tensor.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        let n = data.len().max(1) as f64;

        let min = data.iter().cloned().fold(f32::INFINITY, f32::min) as f64;
        let max = data.iter().cloned().fold(f32::NEG_INFINITY, f32::max) as f64;
        let mean = data.iter().map(|&x| x as f64).sum::<f64>() / n;
        let variance = data.iter().map(|&x| (x as f64 - mean).powi(2)).sum::<f64>() / n;

        Ok(Self {
            name: name.to_string(),
            shape,
            dtype,
            num_params,
            size_bytes,
            min,
            max,
            mean,
            std: variance.sqrt(),
        })
    }
}

/// Stats for every tensor, sorted by name.
pub fn weight_stats(tensors: &HashMap<String, Tensor>) -> Result<Vec<WeightStats>, candle_core::Error> {
    let mut names: Vec<&String> = tensors.keys().collect();
    names.sort();
    names
        .into_iter()
        .map(|name| WeightStats::from_tensor(name, &tensors[name]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_random_weights_cover_all_params() {
        let config = ClassifierConfig::mobilenet_lite();
        let mut rng = StdRng::seed_from_u64(0);
        let weights = random_weights(&config, &mut rng, &Device::Cpu).unwrap();

        let expected: usize = config.layers.iter().map(|l| l.parameters().len()).sum();
        assert_eq!(weights.len(), expected);
        assert_eq!(weights["layers.9.weight"].dims(), &[5, 32]);
        assert_eq!(weights["layers.1.running_var"].dims(), &[8]);

        let total: usize = weights.values().map(|t| t.elem_count()).sum();
        assert_eq!(total, config.num_parameters());
    }

    #[test]
    fn test_random_weights_seeded() {
        let config = ClassifierConfig::mobilenet_lite();
        let a = random_weights(&config, &mut StdRng::seed_from_u64(9), &Device::Cpu).unwrap();
        let b = random_weights(&config, &mut StdRng::seed_from_u64(9), &Device::Cpu).unwrap();

        let wa: Vec<f32> = a["layers.0.weight"].flatten_all().unwrap().to_vec1().unwrap();
        let wb: Vec<f32> = b["layers.0.weight"].flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(wa, wb);
    }

    #[test]
    fn test_running_var_positive() {
        let config = ClassifierConfig::mobilenet_lite();
        let weights = random_weights(&config, &mut StdRng::seed_from_u64(1), &Device::Cpu).unwrap();
        let stats = WeightStats::from_tensor("layers.1.running_var", &weights["layers.1.running_var"]).unwrap();
        assert!(stats.min >= 0.5);
        assert!(stats.max <= 1.5);
    }

    #[test]
    fn test_weight_stats() {
        let tensor = Tensor::new(&[1.0f32, 2.0, 3.0, 4.0], &Device::Cpu).unwrap();
        let stats = WeightStats::from_tensor("w", &tensor).unwrap();
        assert_eq!(stats.num_params, 4);
        assert_eq!(stats.size_bytes, 16);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);
        assert!((stats.mean - 2.5).abs() < 1e-9);
        assert!((stats.std - 1.25f64.sqrt()).abs() < 1e-9);

        let mut map = HashMap::new();
        map.insert("b".to_string(), tensor.clone());
        map.insert("a".to_string(), tensor);
        let all = weight_stats(&map).unwrap();
        assert_eq!(all[0].name, "a");
    }
}
