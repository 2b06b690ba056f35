//! Progress bar utilities.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress bar style presets.
pub struct ProgressStyles;

impl ProgressStyles {
    /// Download progress bar with a known length.
    pub fn download() -> ProgressStyle {
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
    }

    /// Download progress without a length.
    pub fn download_unsized() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {bytes} ({bytes_per_sec})")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }

    /// Spinner.
    pub fn spinner() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
    }
}

/// Create a download progress bar. Hidden when `visible` is false.
pub fn create_download_bar(total: Option<u64>, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = match total {
        Some(total) => ProgressBar::new(total).with_style(ProgressStyles::download()),
        None => ProgressBar::no_length().with_style(ProgressStyles::download_unsized()),
    };
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Create a spinner. Hidden when `visible` is false.
pub fn create_spinner(message: &str, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyles::spinner());
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
