//! Download command - fetch and unpack the model archive.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Args;
use tracing::{debug, info, warn};

use litequant_config::Config;
use litequant_core::Error;

use crate::output::{format_bytes, print_info, print_success};
use crate::progress::{create_download_bar, create_spinner};

/// Download command arguments.
#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Archive URL. Defaults to `model.url` from the configuration.
    #[arg(long)]
    pub url: Option<String>,

    /// Directory to unpack into.
    #[arg(short, long, default_value = ".")]
    pub dir: String,

    /// Keep the downloaded archive after unpacking.
    #[arg(long)]
    pub keep_archive: bool,
}

/// Execute the download command.
pub fn execute(args: DownloadArgs, config: &Config, json: bool) -> Result<()> {
    let url = args.url.as_deref().unwrap_or(&config.model.url);
    let dir = Path::new(&args.dir);

    let files = fetch_and_extract(url, dir, args.keep_archive, !json)?;

    if json {
        let result = serde_json::json!({
            "url": url,
            "dir": dir.display().to_string(),
            "files": files.iter().map(|f| f.display().to_string()).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_success(&format!("Unpacked {} files into {}", files.len(), dir.display()));
        for file in &files {
            println!("  {}", file.display());
        }
    }

    Ok(())
}

/// Download `url` into `dir` and unpack it there.
///
/// Returns the unpacked paths. The archive is removed afterwards unless
/// `keep_archive` is set.
pub fn fetch_and_extract(
    url: &str,
    dir: &Path,
    keep_archive: bool,
    show_progress: bool,
) -> litequant_core::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .map_err(|e| Error::io_with_path("failed to create directory", dir.display().to_string(), e))?;

    let archive = dir.join(archive_name(url));
    if show_progress {
        print_info(&format!("Downloading {url}"));
    }
    let bytes = match download(url, &archive, show_progress) {
        Ok(bytes) => bytes,
        Err(e) => {
            discard_partial(&archive);
            return Err(e);
        }
    };
    info!("Downloaded {} to {}", format_bytes(bytes), archive.display());

    unpack(&archive, dir, url, keep_archive, show_progress)
}

/// Extract a downloaded archive and, unless `keep_archive` is set, remove it
/// whether or not extraction succeeded.
fn unpack(
    archive: &Path,
    dir: &Path,
    url: &str,
    keep_archive: bool,
    show_progress: bool,
) -> litequant_core::Result<Vec<PathBuf>> {
    let spinner = create_spinner("Extracting...", show_progress);
    let extracted = extract(archive, dir, url);
    spinner.finish_and_clear();

    if keep_archive {
        return extracted;
    }
    match std::fs::remove_file(archive) {
        Ok(()) => debug!("Removed {}", archive.display()),
        Err(e) if extracted.is_ok() => {
            return Err(Error::io_with_path("failed to remove archive", archive.display().to_string(), e));
        }
        Err(e) => warn!("Failed to remove {}: {}", archive.display(), e),
    }
    extracted
}

fn discard_partial(archive: &Path) {
    if archive.exists() {
        if let Err(e) = std::fs::remove_file(archive) {
            warn!("Failed to remove partial download {}: {}", archive.display(), e);
        }
    }
}

/// Stream `url` into `dest`, returning the number of bytes written.
pub fn download(url: &str, dest: &Path, show_progress: bool) -> litequant_core::Result<u64> {
    let response = ureq::get(url)
        .call()
        .map_err(|e| Error::acquisition_with_source("request failed", url, e))?;

    let total = response.header("Content-Length").and_then(|v| v.parse::<u64>().ok());
    let bar = create_download_bar(total, show_progress);

    let file = File::create(dest)
        .map_err(|e| Error::io_with_path("failed to create archive", dest.display().to_string(), e))?;
    let mut writer = BufWriter::new(file);
    let mut reader = bar.wrap_read(response.into_reader());

    let written = io::copy(&mut reader, &mut writer)
        .map_err(|e| Error::acquisition_with_source("download interrupted", url, e))?;
    writer
        .flush()
        .map_err(|e| Error::io_with_path("failed to write archive", dest.display().to_string(), e))?;
    bar.finish_and_clear();

    Ok(written)
}

/// Unpack a zip archive into `dir`, returning the unpacked paths.
pub fn extract(archive: &Path, dir: &Path, url: &str) -> litequant_core::Result<Vec<PathBuf>> {
    let file = File::open(archive)
        .map_err(|e| Error::io_with_path("failed to open archive", archive.display().to_string(), e))?;
    let mut zip =
        zip::ZipArchive::new(file).map_err(|e| Error::acquisition_with_source("not a zip archive", url, e))?;

    let mut files = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        let entry = zip
            .by_index(i)
            .map_err(|e| Error::acquisition_with_source("corrupt archive entry", url, e))?;
        if entry.is_file() {
            if let Some(name) = entry.enclosed_name() {
                files.push(dir.join(name));
            }
        }
    }

    zip.extract(dir)
        .map_err(|e| Error::acquisition_with_source("failed to unpack archive", url, e))?;
    Ok(files)
}

/// File name for the archive downloaded from `url`.
pub fn archive_name(url: &str) -> String {
    url.split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .unwrap_or("model.zip")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_archive_name() {
        assert_eq!(
            archive_name("https://github.com/GantMan/nsfw_model/releases/download/1.1.0/nsfw_mobilenet_v2_140_224.zip"),
            "nsfw_mobilenet_v2_140_224.zip"
        );
        assert_eq!(archive_name("https://example.com/m.zip?token=1"), "m.zip");
        assert_eq!(archive_name("https://example.com/"), "model.zip");
    }

    #[test]
    fn test_extract() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("model.zip");
        write_zip(
            &archive,
            &[
                ("mobilenet_v2_140_224/weights.safetensors", b"weights"),
                ("mobilenet_v2_140_224/config.json", b"{}"),
            ],
        );

        let out = dir.path().join("out");
        let files = extract(&archive, &out, "https://example.com/model.zip").unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(
            std::fs::read(out.join("mobilenet_v2_140_224/weights.safetensors")).unwrap(),
            b"weights"
        );
    }

    #[test]
    fn test_extract_rejects_non_zip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("model.zip");
        std::fs::write(&archive, b"<html>not found</html>").unwrap();

        let err = extract(&archive, dir.path(), "https://example.com/model.zip").unwrap_err();
        assert_eq!(err.error_code(), "ACQUISITION_ERROR");
    }

    #[test]
    fn test_failed_unpack_removes_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("model.zip");
        std::fs::write(&archive, b"<html>not found</html>").unwrap();

        let err = unpack(&archive, dir.path(), "https://example.com/model.zip", false, false).unwrap_err();
        assert_eq!(err.error_code(), "ACQUISITION_ERROR");
        assert!(!archive.exists());
    }

    #[test]
    fn test_failed_unpack_keeps_archive_on_request() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("model.zip");
        std::fs::write(&archive, b"truncated").unwrap();

        assert!(unpack(&archive, dir.path(), "https://example.com/model.zip", true, false).is_err());
        assert!(archive.exists());
    }

    #[test]
    fn test_unpack_removes_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("model.zip");
        write_zip(&archive, &[("m/weights.safetensors", b"w")]);

        let out = dir.path().join("out");
        let files = unpack(&archive, &out, "https://example.com/model.zip", false, false).unwrap();
        assert_eq!(files, vec![out.join("m/weights.safetensors")]);
        assert!(!archive.exists());
    }
}
