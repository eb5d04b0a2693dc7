//! Book identification from embedded tags and path text
//!
//! Two independent extractions are merged: container tags read with lofty,
//! and a cleaned-up parse of the directory or file name. Tag data wins
//! where present; path data fills the gaps.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::ItemKey;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Identification sources, in increasing order of specificity
pub mod source {
    pub const TAG: &str = "tag";
    pub const FILENAME: &str = "filename";
    pub const MERGED: &str = "merged";
}

/// Best-effort identification of a book group.
///
/// Every known field is explicit so merge logic stays exhaustive; the
/// `extra` map holds provider-specific overflow only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Identification {
    pub title: Option<String>,
    pub author: Option<String>,
    pub year: Option<String>,
    pub series: Option<String>,
    pub series_part: Option<String>,
    pub narrator: Option<String>,
    pub asin: Option<String>,
    pub isbn: Option<String>,
    pub publisher: Option<String>,
    pub description: Option<String>,
    pub cover_url: Option<String>,
    pub external_id: Option<String>,
    /// Match confidence, 0-100. Only ever raised by later stages.
    pub confidence: u8,
    /// Which stage produced this result: tag, filename, merged, or a
    /// provider name.
    pub source: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl Identification {
    pub fn from_source(source: &str) -> Self {
        Self {
            source: source.to_string(),
            ..Default::default()
        }
    }

    fn has_title_and_author(&self) -> bool {
        matches!(&self.title, Some(t) if !t.is_empty())
            && matches!(&self.author, Some(a) if !a.is_empty())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Audio container extensions lofty can be expected to probe
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4b", "m4a", "flac", "opus", "wma"];

pub fn is_audio(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Book identifier combining tag reads and path parsing
pub struct Identifier;

impl Identifier {
    pub fn new() -> Self {
        Self
    }

    /// Identify a group: tag extraction merged over filename extraction
    pub fn identify(&self, dirpath: &Path, files: &[PathBuf]) -> Identification {
        info!(group = %dirpath.display(), "Identifying content");

        let tag_result = self.extract_from_tags(files);
        let path_result = self.extract_from_path(dirpath, files);

        merge(tag_result, path_result)
    }

    /// Probe audio files in filename order, stopping at the first that
    /// yields both a title and an author; otherwise keep the first partial.
    fn extract_from_tags(&self, files: &[PathBuf]) -> Identification {
        let mut audio_files: Vec<&PathBuf> = files.iter().filter(|f| is_audio(f)).collect();
        audio_files.sort();

        let mut best = Identification::from_source(source::TAG);
        for file in audio_files {
            let result = match read_tags(file) {
                Ok(r) => r,
                Err(e) => {
                    warn!(path = %file.display(), error = %e, "Failed to read tags");
                    continue;
                }
            };
            if result.has_title_and_author() {
                return result;
            }
            if best.title.is_none() && result.title.is_some() {
                best = result;
            }
        }
        best
    }

    /// Parse a cleaned directory or file name into author/title.
    fn extract_from_path(&self, dirpath: &Path, files: &[PathBuf]) -> Identification {
        let dir_name = dirpath
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_string();

        // A placeholder directory name tells us nothing; fall back to the
        // first member filename.
        let seed = if is_placeholder(&dir_name) {
            files
                .first()
                .and_then(|f| f.file_name())
                .and_then(|n| n.to_str())
                .unwrap_or("")
                .to_string()
        } else {
            dir_name
        };

        parse_name(&seed)
    }
}

impl Default for Identifier {
    fn default() -> Self {
        Self::new()
    }
}

fn is_placeholder(name: &str) -> bool {
    matches!(name, "" | "." | "root" | "input")
}

/// Read author/title/year/narrator/ASIN from a file's primary tag
fn read_tags(path: &Path) -> anyhow::Result<Identification> {
    let tagged_file = Probe::open(path)?.read()?;
    let mut result = Identification::from_source(source::TAG);

    let tag = match tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        Some(t) => t,
        None => return Ok(result),
    };

    result.title = non_empty(tag.title().map(|s| s.to_string()));
    result.author = non_empty(tag.artist().map(|s| s.to_string()));
    result.year = tag.year().map(|y| y.to_string());
    result.description = non_empty(tag.comment().map(|s| s.to_string()));
    // Narrators conventionally ride in the composer field for audiobooks
    result.narrator = non_empty(tag.get_string(&ItemKey::Composer).map(|s| s.to_string()));
    result.asin = non_empty(
        tag.get_string(&ItemKey::Unknown("ASIN".to_string()))
            .map(|s| s.to_string()),
    );

    debug!(
        path = %path.display(),
        title = ?result.title,
        author = ?result.author,
        "Read container tags"
    );
    Ok(result)
}

/// Parse cleaned-up name text into author/title.
///
/// Known limitation: a `"A - B"` name is read as Author - Title, but some
/// catalogs order it Series - Title. There is no reliable way to tell the
/// two apart from the name alone, so the simpler reading stands.
pub fn parse_name(text: &str) -> Identification {
    let mut result = Identification::from_source(source::FILENAME);

    // Drop a trailing extension before cleanup
    let text = Path::new(text)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(text);

    let noise = Regex::new(
        r"(?i)\[.*?\]|\(.*?\)|\d+\s?kbps|unabridged|abridged|audiobook",
    )
    .unwrap();
    let cleaned = noise.replace_all(text, "");
    let cleaned = cleaned.replace('_', " ");
    let squashed = Regex::new(r"\s+").unwrap();
    let cleaned = squashed.replace_all(cleaned.trim(), " ").to_string();

    if let Some((author, title)) = cleaned.split_once(" - ") {
        result.author = non_empty(Some(author.to_string()));
        result.title = non_empty(Some(title.to_string()));
    } else {
        result.title = non_empty(Some(cleaned));
    }

    result
}

/// Combine tag and filename extractions: tag title/author/year win where
/// non-empty, filename fills gaps. ASIN and narrator only ever come from
/// tags (filenames essentially never encode them).
fn merge(tags: Identification, filename: Identification) -> Identification {
    let mut merged = Identification::from_source(source::MERGED);
    merged.title = tags.title.or(filename.title);
    merged.author = tags.author.or(filename.author);
    merged.year = tags.year.or(filename.year);
    merged.asin = tags.asin;
    merged.narrator = tags.narrator;
    merged.description = tags.description;
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_strips_noise_and_splits_author_title() {
        let result = parse_name("Frank Herbert - Dune (Unabridged) [128kbps]");
        assert_eq!(result.author.as_deref(), Some("Frank Herbert"));
        assert_eq!(result.title.as_deref(), Some("Dune"));
        assert_eq!(result.source, source::FILENAME);
    }

    #[test]
    fn parse_without_separator_is_all_title() {
        let result = parse_name("Project_Hail_Mary Audiobook");
        assert_eq!(result.author, None);
        assert_eq!(result.title.as_deref(), Some("Project Hail Mary"));
    }

    #[test]
    fn parse_drops_extension_and_bitrate() {
        let result = parse_name("The Martian 64 kbps.mp3");
        assert_eq!(result.title.as_deref(), Some("The Martian"));
    }

    #[test]
    fn placeholder_directory_falls_back_to_first_filename() {
        let identifier = Identifier::new();
        let files = vec![PathBuf::from("/data/input/Andy Weir - The Martian.epub")];
        let result = identifier.extract_from_path(Path::new("input"), &files);
        assert_eq!(result.author.as_deref(), Some("Andy Weir"));
        assert_eq!(result.title.as_deref(), Some("The Martian"));
    }

    #[test]
    fn merge_prefers_tags_and_fills_from_filename() {
        let mut tags = Identification::from_source(source::TAG);
        tags.title = Some("Dune".to_string());
        tags.author = Some("Frank Herbert".to_string());

        let filename = parse_name("Dune (Unabridged) [128kbps]");

        let merged = merge(tags, filename);
        assert_eq!(merged.title.as_deref(), Some("Dune"));
        assert_eq!(merged.author.as_deref(), Some("Frank Herbert"));
        assert_eq!(merged.source, source::MERGED);
    }

    #[test]
    fn merge_takes_filename_fields_when_tags_are_empty() {
        let tags = Identification::from_source(source::TAG);
        let filename = parse_name("Ursula K Le Guin - A Wizard of Earthsea");

        let merged = merge(tags, filename);
        assert_eq!(merged.author.as_deref(), Some("Ursula K Le Guin"));
        assert_eq!(merged.title.as_deref(), Some("A Wizard of Earthsea"));
    }

    #[test]
    fn asin_never_comes_from_filenames() {
        let tags = Identification::from_source(source::TAG);
        let mut filename = parse_name("Some Book");
        filename.asin = Some("B0ABCDEF".to_string());

        let merged = merge(tags, filename);
        assert_eq!(merged.asin, None);
    }

    #[test]
    fn audio_detection_by_extension() {
        assert!(is_audio(Path::new("a.mp3")));
        assert!(is_audio(Path::new("a.M4B")));
        assert!(is_audio(Path::new("a.flac")));
        assert!(!is_audio(Path::new("a.epub")));
        assert!(!is_audio(Path::new("cover.jpg")));
    }

    #[test]
    fn untagged_group_without_audio_uses_directory_name() {
        let identifier = Identifier::new();
        let files = vec![PathBuf::from("/data/input/Dune/book.epub")];
        let result = identifier.identify(Path::new("/data/input/Dune"), &files);
        assert_eq!(result.title.as_deref(), Some("Dune"));
        assert_eq!(result.source, source::MERGED);
    }
}
