//! ZIP/RAR extraction into a session's upload directory.
//!
//! Only image entries (see [`super::images::IMAGE_EXTENSIONS`]) are written.
//! Entry paths are reduced to their normal components so nothing can land
//! outside the target directory, and the configured caps bound how much an
//! archive may expand to.

use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use walkdir::WalkDir;
use zip::ZipArchive;
use zip::result::ZipError;

use super::images::{is_image, is_metadata};
use crate::config::LimitsConfig;

const UNAR: &str = "unar";

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Unsupported archive format: {0}")]
    UnsupportedFormat(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid ZIP archive: {0}")]
    InvalidZip(#[from] ZipError),
    #[error("Archive is password-protected")]
    PasswordProtected,
    #[error("Archive holds more than {max} images")]
    TooManyEntries { max: usize },
    #[error("Archive expands beyond {max} bytes")]
    TooLarge { max: u64 },
    #[error("RAR extraction failed: {0}")]
    Rar(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Rar,
}

impl ArchiveKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "zip" => Some(ArchiveKind::Zip),
            "rar" => Some(ArchiveKind::Rar),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ArchiveLimits {
    pub max_entries: usize,
    pub max_total_bytes: u64,
    pub max_entry_bytes: u64,
}

impl From<&LimitsConfig> for ArchiveLimits {
    fn from(limits: &LimitsConfig) -> Self {
        Self {
            max_entries: limits.max_archive_entries,
            max_total_bytes: limits.max_extracted_bytes,
            max_entry_bytes: limits.max_entry_bytes,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractionReport {
    /// Written files, relative to the target directory.
    pub extracted: Vec<PathBuf>,
    pub skipped: usize,
    pub total_bytes: u64,
}

impl ExtractionReport {
    fn admit(&mut self, size: u64, limits: &ArchiveLimits) -> Result<(), ArchiveError> {
        if self.extracted.len() >= limits.max_entries {
            return Err(ArchiveError::TooManyEntries {
                max: limits.max_entries,
            });
        }
        if self.total_bytes + size > limits.max_total_bytes {
            return Err(ArchiveError::TooLarge {
                max: limits.max_total_bytes,
            });
        }
        Ok(())
    }
}

pub fn extract_archive(
    archive: &Path,
    target: &Path,
    limits: &ArchiveLimits,
) -> Result<ExtractionReport, ArchiveError> {
    fs::create_dir_all(target)?;
    let report = match ArchiveKind::from_path(archive) {
        Some(ArchiveKind::Zip) => extract_zip(archive, target, limits)?,
        Some(ArchiveKind::Rar) => extract_rar(OsStr::new(UNAR), archive, target, limits)?,
        None => {
            return Err(ArchiveError::UnsupportedFormat(
                archive
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            ));
        }
    };
    log::info!(
        "Extracted {} images from {} ({} skipped, {} bytes)",
        report.extracted.len(),
        archive.display(),
        report.skipped,
        report.total_bytes
    );
    Ok(report)
}

/// Keeps only normal components. `None` for empty results and for OS
/// metadata such as `__MACOSX/` folders and `._` sidecar files.
fn sanitize_path(path: &Path) -> Option<PathBuf> {
    let mut sanitized = PathBuf::new();
    for component in path.components() {
        if let Component::Normal(part) = component {
            sanitized.push(part);
        }
    }
    if sanitized.as_os_str().is_empty() || is_metadata(&sanitized) {
        None
    } else {
        Some(sanitized)
    }
}

fn extract_zip(
    archive: &Path,
    target: &Path,
    limits: &ArchiveLimits,
) -> Result<ExtractionReport, ArchiveError> {
    let reader = BufReader::new(File::open(archive)?);
    let mut zip = ZipArchive::new(reader)?;
    let mut report = ExtractionReport::default();

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| match e {
            ZipError::UnsupportedArchive(ZipError::PASSWORD_REQUIRED) => {
                ArchiveError::PasswordProtected
            }
            other => ArchiveError::InvalidZip(other),
        })?;
        if entry.is_dir() {
            continue;
        }

        let raw_name = entry.name().to_string();
        let Some(relative) = sanitize_path(Path::new(&raw_name)) else {
            log::debug!("Skipping archive entry {}", raw_name);
            report.skipped += 1;
            continue;
        };
        if !is_image(&relative) {
            report.skipped += 1;
            continue;
        }
        if entry.size() > limits.max_entry_bytes {
            log::warn!(
                "Skipping {} ({} bytes exceeds {} byte entry limit)",
                raw_name,
                entry.size(),
                limits.max_entry_bytes
            );
            report.skipped += 1;
            continue;
        }
        report.admit(entry.size(), limits)?;

        let destination = target.join(&relative);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        // The declared size can lie; never read past the entry cap.
        let mut limited = (&mut entry).take(limits.max_entry_bytes + 1);
        let mut contents = Vec::new();
        limited.read_to_end(&mut contents)?;
        if contents.len() as u64 > limits.max_entry_bytes {
            log::warn!("Skipping {}: decompressed past its declared size", raw_name);
            report.skipped += 1;
            continue;
        }
        report.admit(contents.len() as u64, limits)?;
        File::create(&destination)?.write_all(&contents)?;

        report.total_bytes += contents.len() as u64;
        report.extracted.push(relative);
    }
    Ok(report)
}

/// Unpacks with the `unar` CLI into a staging directory inside `target`,
/// then moves the admitted images into place. The staging directory is
/// removed on every path.
fn extract_rar(
    program: &OsStr,
    archive: &Path,
    target: &Path,
    limits: &ArchiveLimits,
) -> Result<ExtractionReport, ArchiveError> {
    let staging = TempDir::new_in(target)?;

    let output = Command::new(program)
        .arg("-o")
        .arg(staging.path())
        .arg("-D")
        .arg("-f")
        .arg("-q")
        .arg(archive)
        .output()
        .map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                ArchiveError::Rar("unar command not found".to_string())
            } else {
                ArchiveError::Io(e)
            }
        })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let lowered = stderr.to_lowercase();
        if lowered.contains("password") || lowered.contains("encrypted") {
            return Err(ArchiveError::PasswordProtected);
        }
        return Err(ArchiveError::Rar(stderr.trim().to_string()));
    }

    let mut report = ExtractionReport::default();
    for entry in WalkDir::new(staging.path()).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let raw = entry
            .path()
            .strip_prefix(staging.path())
            .unwrap_or(entry.path());
        let Some(relative) = sanitize_path(raw) else {
            report.skipped += 1;
            continue;
        };
        let size = entry.metadata().map_err(io::Error::other)?.len();
        if !is_image(&relative) || size > limits.max_entry_bytes {
            report.skipped += 1;
            continue;
        }
        report.admit(size, limits)?;

        let destination = target.join(&relative);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(entry.path(), &destination)?;
        report.total_bytes += size;
        report.extracted.push(relative);
    }
    Ok(report)
}
