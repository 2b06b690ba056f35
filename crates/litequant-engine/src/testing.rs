//! Small models shared by the engine tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use litequant_model::{random_weights, save_checkpoint, ClassifierConfig, SourceModel};

use crate::sampler::make_rng;

pub fn tiny_config() -> ClassifierConfig {
    ClassifierConfig::from_json_str(
        r#"{
            "name": "tiny",
            "input_shape": [1, 16, 16, 3],
            "labels": ["a", "b", "c"],
            "layers": [
                {"type": "conv2d", "in_channels": 3, "out_channels": 4, "kernel_size": 3, "stride": 2, "padding": 1},
                {"type": "batch_norm", "channels": 4, "activation": "relu6"},
                {"type": "conv2d", "in_channels": 4, "out_channels": 4, "kernel_size": 3,
                 "padding": 1, "groups": 4, "activation": "relu"},
                {"type": "global_avg_pool"},
                {"type": "dense", "in_features": 4, "out_features": 3},
                {"type": "softmax"}
            ]
        }"#,
    )
    .unwrap()
}

pub fn tiny_weights(seed: u64) -> HashMap<String, Tensor> {
    random_weights(&tiny_config(), &mut make_rng(Some(seed)), &Device::Cpu).unwrap()
}

pub fn tiny_model(seed: u64) -> SourceModel {
    SourceModel::new(tiny_config(), tiny_weights(seed), &Device::Cpu).unwrap()
}

pub fn write_tiny_checkpoint(dir: &Path, seed: u64) -> PathBuf {
    let path = dir.join("tiny.safetensors");
    save_checkpoint(&path, &tiny_config(), &tiny_weights(seed), DType::F32, true).unwrap();
    path
}
