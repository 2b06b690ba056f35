//! End-to-end conversion run.
//!
//! Drives the stages in order:
//! `NotLoaded -> Loaded -> Converted -> Persisted -> SelfTested -> Verified -> Reported`.
//! Every stage runs inside its own span and timer; the first failure stops
//! the run and is reported with the stage it happened in.

use std::path::{Path, PathBuf};

use litequant_config::Config;
use litequant_core::{policy, AtStage, ModelContract, PipelineStage, Result, StageResult, StageTracker};
use litequant_metrics::{StageTimer, StageTimings};
use litequant_model::{InferenceModel, SourceModel};
use rand::rngs::StdRng;
use tracing::{info, warn};

use crate::converter::{ConversionOptions, Converter, SelfTestReport};
use crate::interpreter::Interpreter;
use crate::report::{contract_lines, conversion_lines, self_test_lines, verification_lines, Report, ReportLine, Verdict};
use crate::sampler::{make_rng, CalibrationSampler};
use crate::verifier::{DeviationReport, Verifier};

/// Settings of one run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Source checkpoint.
    pub model_path: PathBuf,

    /// Artifact destination.
    pub output_path: PathBuf,

    /// Calibration samples to draw.
    pub calibration_samples: usize,

    /// Run the parity check.
    pub verify: bool,

    /// Verification inputs to draw.
    pub verification_samples: usize,

    /// Max difference below which the run is acceptable.
    pub max_diff_threshold: f64,

    /// Seed for calibration and the self test input.
    pub conversion_seed: Option<u64>,

    /// Seed for verification inputs.
    pub verification_seed: Option<u64>,

    /// Converter options.
    pub options: ConversionOptions,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(policy::DEFAULT_MODEL_PATH),
            output_path: PathBuf::from(policy::DEFAULT_OUTPUT_PATH),
            calibration_samples: policy::CALIBRATION_SAMPLES,
            verify: true,
            verification_samples: policy::VERIFICATION_SAMPLES,
            max_diff_threshold: policy::DEFAULT_MAX_DIFF_THRESHOLD,
            conversion_seed: None,
            verification_seed: None,
            options: ConversionOptions::default(),
        }
    }
}

impl PipelineSettings {
    /// Settings from a loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            model_path: PathBuf::from(&config.model.path),
            output_path: PathBuf::from(&config.conversion.output_path),
            calibration_samples: config.conversion.calibration_samples,
            verify: config.verification.enabled,
            verification_samples: config.verification.samples,
            max_diff_threshold: config.verification.max_diff_threshold,
            conversion_seed: config.conversion.seed,
            verification_seed: config.verification.seed,
            options: ConversionOptions::from_config(config),
        }
    }
}

/// Everything a successful run produced.
#[derive(Debug)]
pub struct PipelineOutcome {
    /// Where the artifact was written.
    pub artifact_path: PathBuf,

    /// Artifact size in bytes.
    pub artifact_size: u64,

    /// Self test result.
    pub self_test: SelfTestReport,

    /// Parity check result, absent when disabled.
    pub deviation: Option<DeviationReport>,

    /// Operator-facing report.
    pub report: Report,

    /// Stage durations.
    pub timings: StageTimings,
}

impl PipelineOutcome {
    /// Parity classification, absent when verification was skipped.
    pub fn verdict(&self) -> Option<Verdict> {
        self.report.verdict
    }
}

/// One conversion run.
pub struct Pipeline {
    settings: PipelineSettings,
    converter: Converter,
    tracker: StageTracker,
    timings: StageTimings,
}

impl Pipeline {
    /// Prepare a run.
    pub fn new(settings: PipelineSettings) -> Self {
        Self {
            converter: Converter::new(settings.options.clone()),
            settings,
            tracker: StageTracker::new(),
            timings: StageTimings::new(),
        }
    }

    /// Run settings.
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Last completed stage.
    pub fn stage(&self) -> PipelineStage {
        self.tracker.current()
    }

    fn step<T>(&mut self, stage: PipelineStage, f: impl FnOnce(&Converter) -> Result<T>) -> StageResult<T> {
        let timer = StageTimer::start(stage);
        let value = f(&self.converter).at_stage(stage)?;
        self.tracker.advance(stage).at_stage(stage)?;
        self.timings.finish(timer);
        Ok(value)
    }

    /// Run every stage.
    pub fn run(mut self) -> StageResult<PipelineOutcome> {
        let settings = self.settings.clone();
        let mut rng: StdRng = make_rng(settings.conversion_seed);
        let mut report = Report::new();

        let mut model = self.step(PipelineStage::Loaded, |c| c.load(&settings.model_path))?;
        let contract = ModelContract::new(model.input_spec().clone(), model.output_spec().clone());
        let mismatches = contract_lines(&contract);
        for line in &mismatches {
            warn!("{}", line.text);
        }
        report.extend(mismatches);

        let artifact = self.step(PipelineStage::Converted, |c| {
            info!("Calibrating on {} samples", settings.calibration_samples);
            let samples = CalibrationSampler::new(
                &mut rng,
                settings.calibration_samples,
                &contract.input.shape,
                model.device(),
            );
            c.convert(&model, samples)
        })?;

        let artifact_size = self.step(PipelineStage::Persisted, |c| c.persist(&artifact, &settings.output_path))?;
        report.extend(conversion_lines(
            &settings.output_path.display().to_string(),
            artifact_size,
        ));

        let (mut interpreter, self_test) = self.step(PipelineStage::SelfTested, |c| {
            c.self_test(&settings.output_path, &contract, &mut rng)
        })?;
        report.extend(self_test_lines(&self_test, &artifact.schema().labels));

        let deviation = self.step(PipelineStage::Verified, |_| {
            if !settings.verify {
                info!("Verification disabled");
                return Ok(None);
            }
            let mut verify_rng = make_rng(settings.verification_seed);
            Verifier::new(settings.verification_samples)
                .with_device(model.device().clone())
                .verify(&mut model, &mut interpreter, &mut verify_rng)
                .map(Some)
        })?;

        self.step(PipelineStage::Reported, |_| {
            match &deviation {
                Some(d) => {
                    let (verdict, lines) = verification_lines(d, settings.max_diff_threshold);
                    if !verdict.is_acceptable() {
                        warn!(
                            "Max difference {:.6} is above the {} threshold; keeping the artifact",
                            d.max_abs_diff, settings.max_diff_threshold
                        );
                    }
                    report.extend(lines);
                    report.verdict = Some(verdict);
                }
                None => report.extend([ReportLine::info("Verification skipped")]),
            }
            Ok(())
        })?;

        info!("Conversion complete in {:?}", self.timings.total());

        Ok(PipelineOutcome {
            artifact_path: settings.output_path,
            artifact_size,
            self_test,
            deviation,
            report,
            timings: self.timings,
        })
    }
}

/// Rerun the parity check for an artifact already on disk.
pub fn verify_artifact(
    model_path: &Path,
    artifact_path: &Path,
    settings: &PipelineSettings,
) -> Result<(DeviationReport, Verdict, Vec<ReportLine>)> {
    let converter = Converter::new(settings.options.clone());
    let mut model: SourceModel = converter.load(model_path)?;
    let device = model.device().clone();

    let mut interpreter = Interpreter::from_file(artifact_path, &device)?;
    interpreter.allocate_tensors()?;

    let expected = ModelContract::new(model.input_spec().clone(), model.output_spec().clone());
    expected.ensure_matches(&interpreter.contract())?;

    let deviation = Verifier::new(settings.verification_samples)
        .with_device(device)
        .verify(&mut model, &mut interpreter, &mut make_rng(settings.verification_seed))?;
    let (verdict, lines) = verification_lines(&deviation, settings.max_diff_threshold);
    Ok((deviation, verdict, lines))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::write_tiny_checkpoint;
    use litequant_core::Error;

    fn settings(dir: &Path) -> PipelineSettings {
        PipelineSettings {
            model_path: write_tiny_checkpoint(dir, 21),
            output_path: dir.join("assets/tiny.lqm"),
            calibration_samples: 6,
            verification_samples: 4,
            conversion_seed: Some(1),
            verification_seed: Some(2),
            ..Default::default()
        }
    }

    #[test]
    fn test_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());

        let outcome = Pipeline::new(settings.clone()).run().unwrap();
        assert!(outcome.artifact_path.exists());
        assert_eq!(outcome.artifact_size, std::fs::metadata(&outcome.artifact_path).unwrap().len());
        assert_eq!(outcome.self_test.test_output_shape, vec![1, 3]);
        assert_eq!(outcome.timings.len(), 6);

        let deviation = outcome.deviation.unwrap();
        assert!(deviation.max_abs_diff < 1.0);
        let verdict = outcome.verdict().unwrap();
        assert_eq!(verdict.is_acceptable(), deviation.max_abs_diff < settings.max_diff_threshold);

        let text = outcome.report.to_string();
        assert!(text.contains("Input shape [1, 16, 16, 3] differs from the expected [1, 224, 224, 3]"));
        assert!(text.contains("Model converted successfully!"));
        assert!(text.contains("Model test passed!"));
        assert!(text.contains("Max difference:"));
    }

    #[test]
    fn test_threshold_drives_verdict_only() {
        let dir = tempfile::tempdir().unwrap();
        let settings = PipelineSettings {
            max_diff_threshold: 0.0,
            ..settings(dir.path())
        };

        let outcome = Pipeline::new(settings).run().unwrap();
        assert_eq!(outcome.verdict(), Some(Verdict::Warning));
        assert!(outcome.artifact_path.exists());
        assert!(outcome.report.has_warnings());
    }

    #[test]
    fn test_seeded_runs_write_identical_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let first = settings(dir.path());
        let second = PipelineSettings {
            output_path: dir.path().join("assets/again.lqm"),
            ..first.clone()
        };

        Pipeline::new(first.clone()).run().unwrap();
        Pipeline::new(second.clone()).run().unwrap();
        assert_eq!(
            std::fs::read(&first.output_path).unwrap(),
            std::fs::read(&second.output_path).unwrap()
        );
    }

    #[test]
    fn test_missing_model_stops_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let settings = PipelineSettings {
            model_path: dir.path().join("missing.safetensors"),
            output_path: dir.path().join("assets/tiny.lqm"),
            ..Default::default()
        };

        let err = Pipeline::new(settings.clone()).run().unwrap_err();
        assert_eq!(err.stage, PipelineStage::Loaded);
        assert!(matches!(err.error, Error::ModelNotFound { .. }));
        assert!(!settings.output_path.exists());
        assert!(!dir.path().join("assets").exists());
    }

    #[test]
    fn test_verification_can_be_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let settings = PipelineSettings {
            verify: false,
            ..settings(dir.path())
        };

        let outcome = Pipeline::new(settings).run().unwrap();
        assert!(outcome.deviation.is_none());
        assert!(outcome.verdict().is_none());
        assert!(outcome.report.to_string().contains("Verification skipped"));
    }

    #[test]
    fn test_verify_existing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        Pipeline::new(settings.clone()).run().unwrap();

        let (deviation, verdict, lines) =
            verify_artifact(&settings.model_path, &settings.output_path, &settings).unwrap();
        assert_eq!(deviation.samples, 4);
        assert_eq!(verdict, Verdict::classify(deviation.max_abs_diff, settings.max_diff_threshold));
        assert_eq!(lines.len(), 3);
    }
}
