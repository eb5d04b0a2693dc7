//! Archive expansion
//!
//! Stabilized archives are extracted into a sibling directory named after
//! the archive, then deleted. Extraction output re-enters the pipeline
//! through the filesystem watcher like any other new file, so nested
//! archives expand recursively without special-casing.
//!
//! Uses command-line tools (unzip, tar) via tokio's process support to
//! avoid blocking the async runtime.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::{debug, info, warn};

const ZIP_EXTENSIONS: &[&str] = &[".zip"];
const TAR_EXTENSIONS: &[&str] = &[".tar", ".tar.gz", ".tgz"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveType {
    Zip,
    Tar,
}

/// Archive extraction service
pub struct Extractor {
    dry_run: bool,
}

impl Extractor {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    /// Check if a file is a recognized archive
    pub fn is_archive(path: &Path) -> bool {
        archive_type(path).is_some()
    }

    /// Destination directory for an archive's contents: a sibling directory
    /// named after the archive minus its (possibly compound) extension.
    pub fn destination_for(path: &Path) -> Option<PathBuf> {
        let parent = path.parent()?;
        let name = path.file_name()?.to_str()?;
        let lower = name.to_lowercase();

        let stem = ZIP_EXTENSIONS
            .iter()
            .chain(TAR_EXTENSIONS)
            .find(|suffix| lower.ends_with(*suffix))
            .map(|suffix| &name[..name.len() - suffix.len()])?;

        if stem.is_empty() {
            return None;
        }
        Some(parent.join(stem))
    }

    /// Extract an archive in place and delete it on success. On failure the
    /// archive is left where it is; it stays inert unless re-touched.
    pub async fn extract(&self, archive: &Path) -> Result<PathBuf> {
        let archive_type = archive_type(archive).context("Unknown archive type")?;
        let dest_dir =
            Self::destination_for(archive).context("Cannot name extraction directory")?;

        if self.dry_run {
            info!(
                archive = %archive.display(),
                destination = %dest_dir.display(),
                "[DRY RUN] Would extract archive and delete it"
            );
            return Ok(dest_dir);
        }

        info!(
            archive = %archive.display(),
            destination = %dest_dir.display(),
            "Extracting archive"
        );

        tokio::fs::create_dir_all(&dest_dir)
            .await
            .context("Failed to create extraction directory")?;

        match archive_type {
            ArchiveType::Zip => extract_zip(archive, &dest_dir).await?,
            ArchiveType::Tar => extract_tar(archive, &dest_dir).await?,
        }

        if let Err(e) = tokio::fs::remove_file(archive).await {
            warn!(
                archive = %archive.display(),
                error = %e,
                "Extracted archive but failed to delete it"
            );
        } else {
            info!(archive = %archive.display(), "Extracted and deleted archive");
        }

        Ok(dest_dir)
    }
}

fn archive_type(path: &Path) -> Option<ArchiveType> {
    let name = path.file_name()?.to_str()?.to_lowercase();
    if ZIP_EXTENSIONS.iter().any(|s| name.ends_with(s)) {
        Some(ArchiveType::Zip)
    } else if TAR_EXTENSIONS.iter().any(|s| name.ends_with(s)) {
        Some(ArchiveType::Tar)
    } else {
        None
    }
}

/// Extract a ZIP archive using unzip
async fn extract_zip(archive: &Path, dest_dir: &Path) -> Result<()> {
    let output = Command::new("unzip")
        .arg("-o") // Overwrite existing files
        .arg("-q") // Quiet mode
        .arg(archive)
        .arg("-d")
        .arg(dest_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .context("Failed to run unzip. Is unzip installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("unzip failed: {}", stderr);
    }

    debug!(archive = %archive.display(), "ZIP extraction successful");
    Ok(())
}

/// Extract a tar archive (plain or gzipped) using tar
async fn extract_tar(archive: &Path, dest_dir: &Path) -> Result<()> {
    let output = Command::new("tar")
        .arg("xf") // Auto-detects compression
        .arg(archive)
        .arg("-C")
        .arg(dest_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .context("Failed to run tar. Is tar installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("tar failed: {}", stderr);
    }

    debug!(archive = %archive.display(), "tar extraction successful");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_archive() {
        assert!(Extractor::is_archive(Path::new("book.zip")));
        assert!(Extractor::is_archive(Path::new("book.ZIP")));
        assert!(Extractor::is_archive(Path::new("book.tar")));
        assert!(Extractor::is_archive(Path::new("book.tar.gz")));
        assert!(Extractor::is_archive(Path::new("book.tgz")));
        assert!(!Extractor::is_archive(Path::new("book.mp3")));
        assert!(!Extractor::is_archive(Path::new("book.m4b")));
        assert!(!Extractor::is_archive(Path::new("zip")));
    }

    #[test]
    fn test_destination_strips_compound_extensions() {
        assert_eq!(
            Extractor::destination_for(Path::new("/in/My Book.zip")),
            Some(PathBuf::from("/in/My Book"))
        );
        assert_eq!(
            Extractor::destination_for(Path::new("/in/My Book.tar.gz")),
            Some(PathBuf::from("/in/My Book"))
        );
        assert_eq!(
            Extractor::destination_for(Path::new("/in/My Book.tgz")),
            Some(PathBuf::from("/in/My Book"))
        );
        assert_eq!(Extractor::destination_for(Path::new("/in/.zip")), None);
    }

    #[tokio::test]
    async fn tar_archive_expands_and_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let book_dir = dir.path().join("book");
        std::fs::create_dir_all(&book_dir).unwrap();
        std::fs::write(book_dir.join("part1.mp3"), b"audio one").unwrap();
        std::fs::write(book_dir.join("part2.mp3"), b"audio two").unwrap();

        let archive = dir.path().join("release.tar");
        let status = std::process::Command::new("tar")
            .arg("cf")
            .arg(&archive)
            .arg("-C")
            .arg(dir.path())
            .arg("book")
            .status()
            .unwrap();
        assert!(status.success());
        std::fs::remove_dir_all(&book_dir).unwrap();

        let extractor = Extractor::new(false);
        let dest = extractor.extract(&archive).await.unwrap();

        assert_eq!(dest, dir.path().join("release"));
        assert!(dest.join("book/part1.mp3").exists());
        assert!(dest.join("book/part2.mp3").exists());
        assert!(!archive.exists());
    }

    #[tokio::test]
    async fn dry_run_leaves_archive_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("book.zip");
        std::fs::write(&archive, b"not a real zip").unwrap();

        let extractor = Extractor::new(true);
        let dest = extractor.extract(&archive).await.unwrap();

        assert_eq!(dest, dir.path().join("book"));
        assert!(archive.exists());
        assert!(!dest.exists());
    }
}
