//! Checkpoints shared by the command tests.

use std::path::{Path, PathBuf};

use candle_core::{DType, Device};
use litequant_engine::make_rng;
use litequant_model::{random_weights, save_checkpoint, ClassifierConfig};

pub fn tiny_config() -> ClassifierConfig {
    ClassifierConfig::from_json_str(
        r#"{
            "name": "tiny",
            "input_shape": [1, 8, 8, 3],
            "labels": ["a", "b"],
            "layers": [
                {"type": "conv2d", "in_channels": 3, "out_channels": 4, "kernel_size": 3,
                 "stride": 2, "padding": 1, "activation": "relu6"},
                {"type": "global_avg_pool"},
                {"type": "dense", "in_features": 4, "out_features": 2},
                {"type": "softmax"}
            ]
        }"#,
    )
    .unwrap()
}

pub fn write_tiny_checkpoint(dir: &Path) -> PathBuf {
    let path = dir.join("tiny.safetensors");
    let config = tiny_config();
    let weights = random_weights(&config, &mut make_rng(Some(5)), &Device::Cpu).unwrap();
    save_checkpoint(&path, &config, &weights, DType::F32, true).unwrap();
    path
}
