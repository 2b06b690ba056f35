//! Fixed conversion and verification policy.

/// Input shape of the classifier, NHWC.
pub const INPUT_SHAPE: [usize; 4] = [1, 224, 224, 3];

/// Number of output classes.
pub const NUM_CLASSES: usize = 5;

/// Output shape of the classifier.
pub const OUTPUT_SHAPE: [usize; 2] = [1, NUM_CLASSES];

/// Class labels in output order.
pub const CLASS_LABELS: [&str; NUM_CLASSES] = ["drawings", "hentai", "neutral", "porn", "sexy"];

/// Representative samples drawn to calibrate activation ranges.
pub const CALIBRATION_SAMPLES: usize = 100;

/// Fresh inputs drawn for the parity smoke test.
pub const VERIFICATION_SAMPLES: usize = 10;

/// Max absolute output difference below which a conversion is acceptable.
pub const DEFAULT_MAX_DIFF_THRESHOLD: f64 = 0.1;

/// Default location of the source checkpoint.
pub const DEFAULT_MODEL_PATH: &str = "mobilenet_v2_140_224/nsfw_mobilenet2.safetensors";

/// Default location of the converted artifact.
pub const DEFAULT_OUTPUT_PATH: &str = "app/src/main/assets/nsfw_mobilenet_v2.lqm";

/// Archive the model is published in.
pub const DEFAULT_MODEL_URL: &str =
    "https://github.com/GantMan/nsfw_model/releases/download/1.1.0/mobilenet_v2_140_224.zip";

/// Page to send operators to when the model is missing.
pub const MODEL_RELEASES_URL: &str = "https://github.com/GantMan/nsfw_model/releases";

/// Bytes per MiB, used for size reporting.
pub const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;
