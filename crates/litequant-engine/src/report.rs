//! Operator-facing summary of a conversion run.
//!
//! Pure formatting: nothing here touches the filesystem or the models.

use std::fmt;

use litequant_core::{format_shape, policy, ModelContract};
use serde::Serialize;

use crate::converter::SelfTestReport;
use crate::verifier::DeviationReport;

/// Classification of a parity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Max difference below the threshold.
    Acceptable,
    /// Max difference at or above the threshold. The artifact is kept.
    Warning,
}

impl Verdict {
    /// Classify a max difference against `threshold`.
    pub fn classify(max_abs_diff: f64, threshold: f64) -> Self {
        if max_abs_diff < threshold {
            Verdict::Acceptable
        } else {
            Verdict::Warning
        }
    }

    /// Whether the run is acceptable.
    pub fn is_acceptable(self) -> bool {
        self == Verdict::Acceptable
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Acceptable => write!(f, "acceptable"),
            Verdict::Warning => write!(f, "warning"),
        }
    }
}

/// Severity of a report line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineLevel {
    /// Plain detail.
    Info,
    /// Completed step.
    Success,
    /// Needs the operator's attention.
    Warning,
}

/// One line of the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportLine {
    /// Severity.
    pub level: LineLevel,
    /// Text without any marker.
    pub text: String,
}

impl ReportLine {
    /// Plain detail line.
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            level: LineLevel::Info,
            text: text.into(),
        }
    }

    /// Completed-step line.
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            level: LineLevel::Success,
            text: text.into(),
        }
    }

    /// Attention line.
    pub fn warning(text: impl Into<String>) -> Self {
        Self {
            level: LineLevel::Warning,
            text: text.into(),
        }
    }
}

impl fmt::Display for ReportLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            LineLevel::Info => write!(f, "  {}", self.text),
            LineLevel::Success => write!(f, "✓ {}", self.text),
            LineLevel::Warning => write!(f, "⚠ {}", self.text),
        }
    }
}

/// Lines announcing the written artifact.
pub fn conversion_lines(output_path: &str, size_bytes: u64) -> Vec<ReportLine> {
    vec![
        ReportLine::success("Model converted successfully!"),
        ReportLine::info(format!("Location: {output_path}")),
        ReportLine::info(format!("Size: {:.2} MB", size_bytes as f64 / policy::BYTES_PER_MIB)),
    ]
}

/// Warnings for a model whose interface differs from the NSFW classifier's.
pub fn contract_lines(contract: &ModelContract) -> Vec<ReportLine> {
    let mut lines = Vec::new();
    if contract.input.shape != policy::INPUT_SHAPE {
        lines.push(ReportLine::warning(format!(
            "Input shape {} differs from the expected {}",
            format_shape(&contract.input.shape),
            format_shape(&policy::INPUT_SHAPE)
        )));
    }
    if contract.output.shape != policy::OUTPUT_SHAPE {
        lines.push(ReportLine::warning(format!(
            "Output shape {} differs from the expected {} ({} classes)",
            format_shape(&contract.output.shape),
            format_shape(&policy::OUTPUT_SHAPE),
            policy::NUM_CLASSES
        )));
    }
    lines
}

/// Lines describing the self test.
pub fn self_test_lines(report: &SelfTestReport, labels: &[String]) -> Vec<ReportLine> {
    vec![
        ReportLine::info(format!("Input shape: {}", format_shape(&report.input_shape))),
        ReportLine::info(format!("Output shape: {}", format_shape(&report.output_shape))),
        ReportLine::info(format!("Expected classes: {} ({})", labels.len(), labels.join(", "))),
        ReportLine::info(format!(
            "Test inference output shape: {}",
            format_shape(&report.test_output_shape)
        )),
        ReportLine::success("Model test passed!"),
    ]
}

/// Lines summarizing the parity check, with its classification.
pub fn verification_lines(report: &DeviationReport, threshold: f64) -> (Verdict, Vec<ReportLine>) {
    let verdict = Verdict::classify(report.max_abs_diff, threshold);
    let mut lines = vec![
        ReportLine::info(format!("Max difference: {:.6}", report.max_abs_diff)),
        ReportLine::info(format!("Mean difference: {:.6}", report.mean_abs_diff)),
    ];
    lines.push(match verdict {
        Verdict::Acceptable => ReportLine::success("Accuracy within acceptable range"),
        Verdict::Warning => ReportLine::warning("Warning: Large accuracy difference detected"),
    });
    (verdict, lines)
}

/// Full report of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    /// Lines in emission order.
    pub lines: Vec<ReportLine>,

    /// Parity classification, absent when verification was skipped.
    pub verdict: Option<Verdict>,
}

impl Report {
    /// Empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append lines.
    pub fn extend(&mut self, lines: impl IntoIterator<Item = ReportLine>) {
        self.lines.extend(lines);
    }

    /// Whether any line needs attention.
    pub fn has_warnings(&self) -> bool {
        self.lines.iter().any(|l| l.level == LineLevel::Warning)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deviation(max: f64) -> DeviationReport {
        DeviationReport {
            max_abs_diff: max,
            mean_abs_diff: max / 2.0,
            samples: 10,
            top1_agreement: 1.0,
        }
    }

    #[test]
    fn test_contract_lines() {
        use litequant_core::{ElementType, TensorSpec};

        let spec = |shape: &[usize]| TensorSpec::new("t", shape.to_vec(), ElementType::F32);
        let expected = ModelContract::new(spec(&policy::INPUT_SHAPE), spec(&policy::OUTPUT_SHAPE));
        assert!(contract_lines(&expected).is_empty());

        let small = ModelContract::new(spec(&[1, 16, 16, 3]), spec(&[1, 3]));
        let lines = contract_lines(&small);
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.level == LineLevel::Warning));
        assert!(lines[1].text.contains("[1, 3]"));
    }

    #[test]
    fn test_classify() {
        assert_eq!(Verdict::classify(0.0, 0.1), Verdict::Acceptable);
        assert_eq!(Verdict::classify(0.0999, 0.1), Verdict::Acceptable);
        assert_eq!(Verdict::classify(0.1, 0.1), Verdict::Warning);
        assert_eq!(Verdict::classify(0.5, 0.1), Verdict::Warning);
        assert_eq!(Verdict::classify(0.5, 1.0), Verdict::Acceptable);
    }

    #[test]
    fn test_verification_lines() {
        let (verdict, lines) = verification_lines(&deviation(0.012345678), policy::DEFAULT_MAX_DIFF_THRESHOLD);
        assert!(verdict.is_acceptable());
        assert_eq!(lines[0].text, "Max difference: 0.012346");
        assert_eq!(lines[1].text, "Mean difference: 0.006173");
        assert_eq!(lines[2].to_string(), "✓ Accuracy within acceptable range");

        let (verdict, lines) = verification_lines(&deviation(0.25), policy::DEFAULT_MAX_DIFF_THRESHOLD);
        assert_eq!(verdict, Verdict::Warning);
        assert_eq!(lines[2].level, LineLevel::Warning);
    }

    #[test]
    fn test_conversion_and_self_test_lines() {
        let lines = conversion_lines("app/src/main/assets/nsfw_mobilenet_v2.lqm", 3 * 1024 * 1024 + 512 * 1024);
        assert_eq!(lines[0].to_string(), "✓ Model converted successfully!");
        assert_eq!(lines[2].text, "Size: 3.50 MB");

        let labels: Vec<String> = policy::CLASS_LABELS.iter().map(|s| s.to_string()).collect();
        let report = SelfTestReport {
            input_shape: policy::INPUT_SHAPE.to_vec(),
            output_shape: policy::OUTPUT_SHAPE.to_vec(),
            test_output_shape: policy::OUTPUT_SHAPE.to_vec(),
            size_bytes: 0,
        };
        let lines = self_test_lines(&report, &labels);
        assert_eq!(lines[0].text, "Input shape: [1, 224, 224, 3]");
        assert_eq!(lines[2].text, "Expected classes: 5 (drawings, hentai, neutral, porn, sexy)");
        assert_eq!(lines[4].text, "Model test passed!");
    }

    #[test]
    fn test_report_display() {
        let mut report = Report::new();
        let (verdict, lines) = verification_lines(&deviation(0.3), 0.1);
        report.extend(lines);
        report.verdict = Some(verdict);

        assert!(report.has_warnings());
        assert!(report.to_string().ends_with("⚠ Warning: Large accuracy difference detected\n"));
    }
}
