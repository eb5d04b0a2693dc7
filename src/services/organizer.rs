//! Library organization service
//!
//! Builds the canonical Author/[Series/]Title layout. Each group is fully
//! assembled in a staging area first, then promoted into the library with
//! directory renames so readers never observe a half-written book.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lofty::config::WriteOptions;
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::Tag;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::services::identifier::{is_audio, Identification};

const STAGING_DIR: &str = ".staging";
const MANUAL_DIR: &str = "Manual_Intervention";
const MANIFEST_NAME: &str = "metadata.json";

/// What happens to the source files after a successful promote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Leave sources in place
    Copy,
    /// Delete sources once the library copy is live
    Move,
}

/// Strip filesystem-hostile characters from a path component.
/// Alphanumerics, spaces, hyphens, underscores and dots survive.
pub fn sanitize_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.'))
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub struct Organizer {
    input_dir: PathBuf,
    output_dir: PathBuf,
    puid: u32,
    pgid: u32,
    dry_run: bool,
    client: reqwest::Client,
}

impl Organizer {
    pub fn new(config: &Config) -> Self {
        Self {
            input_dir: config.input_dir.clone(),
            output_dir: config.output_dir.clone(),
            puid: config.puid,
            pgid: config.pgid,
            dry_run: config.dry_run,
            client: reqwest::Client::new(),
        }
    }

    /// Canonical destination for an identified book:
    /// `OUTPUT_DIR/Author/[Series/]Title`.
    pub fn destination_for(&self, metadata: &Identification) -> Result<PathBuf> {
        let title = metadata
            .title
            .as_deref()
            .map(sanitize_component)
            .filter(|t| !t.is_empty())
            .context("Cannot organize a book without a title")?;

        let author = metadata
            .author
            .as_deref()
            .map(sanitize_component)
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| "Unknown Author".to_string());

        let mut dest = self.output_dir.join(author);
        if let Some(series) = metadata
            .series
            .as_deref()
            .map(sanitize_component)
            .filter(|s| !s.is_empty())
        {
            dest = dest.join(series);
        }
        Ok(dest.join(title))
    }

    /// Assemble and promote a book group into the library. Returns the
    /// final library path.
    pub async fn organize(
        &self,
        dirpath: &Path,
        files: &[PathBuf],
        metadata: &Identification,
        mode: TransferMode,
    ) -> Result<PathBuf> {
        let dest = self.destination_for(metadata)?;

        if self.dry_run {
            info!(
                source = %dirpath.display(),
                dest = %dest.display(),
                "[DRY RUN] Would organize book group"
            );
            return Ok(dest);
        }

        let rel = dest
            .strip_prefix(&self.output_dir)
            .context("Destination escaped the output directory")?;
        let staging = self.output_dir.join(STAGING_DIR).join(rel);

        // Rebuild staging from scratch so a crashed earlier attempt
        // cannot leak files into this one
        if staging.exists() {
            fs::remove_dir_all(&staging)
                .with_context(|| format!("Failed to clear staging at {}", staging.display()))?;
        }
        fs::create_dir_all(&staging)
            .with_context(|| format!("Failed to create staging at {}", staging.display()))?;

        let staged_audio = self.stage_files(files, metadata, &staging)?;
        self.write_manifest(&staging, metadata)?;
        self.fetch_cover(&staging, metadata).await;

        for audio in &staged_audio {
            if let Err(e) = write_tags(audio, metadata) {
                warn!(path = %audio.display(), error = %e, "Failed to write tags");
            }
        }

        self.apply_permissions(&staging);
        self.promote(&staging, &dest)?;

        if mode == TransferMode::Move {
            self.remove_sources(dirpath, files);
        }

        info!(
            source = %dirpath.display(),
            dest = %dest.display(),
            "Organized book group"
        );
        Ok(dest)
    }

    /// Park an unidentifiable group where an operator can find it,
    /// with whatever partial metadata was gathered.
    pub fn move_to_manual(
        &self,
        dirpath: &Path,
        files: &[PathBuf],
        metadata: &Identification,
    ) -> Result<PathBuf> {
        let name = dirpath
            .file_name()
            .and_then(|n| n.to_str())
            .map(sanitize_component)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "unsorted".to_string());
        let dest = self.output_dir.join(MANUAL_DIR).join(name);

        if self.dry_run {
            info!(
                source = %dirpath.display(),
                dest = %dest.display(),
                "[DRY RUN] Would move group to manual intervention"
            );
            return Ok(dest);
        }

        fs::create_dir_all(&dest)
            .with_context(|| format!("Failed to create {}", dest.display()))?;

        for file in files {
            let Some(name) = file.file_name() else {
                continue;
            };
            let target = dest.join(name);
            fs::copy(file, &target).with_context(|| {
                format!("Failed to copy {} to {}", file.display(), target.display())
            })?;
        }
        self.write_manifest(&dest, metadata)?;
        self.apply_permissions(&dest);
        self.remove_sources(dirpath, files);

        info!(
            source = %dirpath.display(),
            dest = %dest.display(),
            "Moved group to manual intervention"
        );
        Ok(dest)
    }

    /// Copy sources into staging under canonical names. Every member of
    /// a multi-file group is numbered in original-filename order; a lone
    /// file takes the bare title. Returns the staged audio paths in
    /// track order.
    fn stage_files(
        &self,
        files: &[PathBuf],
        metadata: &Identification,
        staging: &Path,
    ) -> Result<Vec<PathBuf>> {
        let title = metadata
            .title
            .as_deref()
            .map(sanitize_component)
            .unwrap_or_default();

        let mut members: Vec<&PathBuf> = files.iter().collect();
        members.sort_by_key(|f| f.file_name().map(|n| n.to_os_string()));

        let mut staged_audio = Vec::new();
        for (index, file) in members.iter().enumerate() {
            let stem = if members.len() > 1 {
                format!("{} - {:02}", title, index + 1)
            } else {
                title.clone()
            };
            let name = match file.extension().and_then(|e| e.to_str()) {
                Some(ext) => format!("{}.{}", stem, ext.to_lowercase()),
                None => stem,
            };
            let target = staging.join(name);
            fs::copy(file, &target).with_context(|| {
                format!("Failed to copy {} to {}", file.display(), target.display())
            })?;
            if is_audio(file) {
                staged_audio.push(target);
            }
        }

        Ok(staged_audio)
    }

    fn write_manifest(&self, dir: &Path, metadata: &Identification) -> Result<()> {
        let manifest = dir.join(MANIFEST_NAME);
        let data = serde_json::to_string_pretty(metadata).context("Failed to encode metadata")?;
        fs::write(&manifest, data)
            .with_context(|| format!("Failed to write {}", manifest.display()))?;
        Ok(())
    }

    /// Best effort cover download. An existing cover image in the group
    /// is left alone.
    async fn fetch_cover(&self, staging: &Path, metadata: &Identification) {
        let Some(url) = metadata.cover_url.as_deref() else {
            return;
        };
        let has_cover = fs::read_dir(staging)
            .map(|entries| {
                entries.flatten().any(|e| {
                    let name = e.file_name().to_string_lossy().to_lowercase();
                    name.ends_with(".jpg") || name.ends_with(".jpeg") || name.ends_with(".png")
                })
            })
            .unwrap_or(false);
        if has_cover {
            return;
        }

        debug!(url = %url, "Fetching cover image");
        match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => match response.bytes().await {
                Ok(bytes) => {
                    if let Err(e) = fs::write(staging.join("cover.jpg"), &bytes) {
                        warn!(error = %e, "Failed to write cover image");
                    }
                }
                Err(e) => warn!(error = %e, "Failed to read cover image body"),
            },
            Ok(response) => {
                warn!(status = %response.status(), "Cover image fetch failed")
            }
            Err(e) => warn!(error = %e, "Cover image fetch failed"),
        }
    }

    /// Best effort ownership and mode bits: 0775 directories, 0664 files.
    fn apply_permissions(&self, root: &Path) {
        for entry in WalkDir::new(root).into_iter().flatten() {
            let path = entry.path();
            let mode = if entry.file_type().is_dir() { 0o775 } else { 0o664 };
            if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
                warn!(path = %path.display(), error = %e, "Failed to set permissions");
            }
            if let Err(e) = std::os::unix::fs::chown(path, Some(self.puid), Some(self.pgid)) {
                debug!(path = %path.display(), error = %e, "Failed to change ownership");
            }
        }
    }

    /// Swap the staged directory into place. An existing destination is
    /// renamed aside first and deleted only after the new copy is live,
    /// so a failed promote can be rolled back.
    fn promote(&self, staging: &Path, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        // Append so a dotted title keeps its full final component
        let mut aside = dest.as_os_str().to_os_string();
        aside.push(".replaced");
        let aside = PathBuf::from(aside);
        let had_existing = dest.exists();
        if had_existing {
            info!(dest = %dest.display(), "Destination exists, replacing");
            fs::rename(dest, &aside).with_context(|| {
                format!("Failed to move existing {} aside", dest.display())
            })?;
        }

        if let Err(e) = fs::rename(staging, dest) {
            if had_existing {
                if let Err(restore) = fs::rename(&aside, dest) {
                    warn!(dest = %dest.display(), error = %restore, "Failed to restore previous version");
                }
            }
            return Err(e).with_context(|| {
                format!(
                    "Failed to promote {} to {}",
                    staging.display(),
                    dest.display()
                )
            });
        }

        if had_existing {
            if let Err(e) = fs::remove_dir_all(&aside) {
                warn!(path = %aside.display(), error = %e, "Failed to remove replaced version");
            }
        }
        Ok(())
    }

    /// Delete sources after a move. The source directory itself is
    /// removed only when empty and never when it is the inbox root.
    fn remove_sources(&self, dirpath: &Path, files: &[PathBuf]) {
        for file in files {
            if let Err(e) = fs::remove_file(file) {
                warn!(path = %file.display(), error = %e, "Failed to remove source file");
            }
        }
        if dirpath != self.input_dir {
            if let Err(e) = fs::remove_dir(dirpath) {
                debug!(path = %dirpath.display(), error = %e, "Source directory not removed");
            }
        }
    }
}

/// Write identified metadata into an audio file's tags.
fn write_tags(path: &Path, metadata: &Identification) -> Result<()> {
    let mut tagged_file = Probe::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?
        .read()
        .with_context(|| format!("Failed to read tags from {}", path.display()))?;

    if tagged_file.primary_tag_mut().is_none() {
        let tag_type = tagged_file.primary_tag_type();
        tagged_file.insert_tag(Tag::new(tag_type));
    }
    let tag = tagged_file
        .primary_tag_mut()
        .context("No writable tag available")?;

    if let Some(title) = metadata.title.as_deref() {
        tag.set_title(title.to_string());
        tag.set_album(title.to_string());
    }
    if let Some(author) = metadata.author.as_deref() {
        tag.set_artist(author.to_string());
    }
    if let Some(year) = metadata.year.as_deref().and_then(|y| y.parse::<u32>().ok()) {
        tag.set_year(year);
    }
    if let Some(description) = metadata.description.as_deref() {
        tag.set_comment(description.to_string());
    }

    tagged_file
        .save_to_path(path, WriteOptions::default())
        .with_context(|| format!("Failed to save tags to {}", path.display()))?;
    Ok(())
}
