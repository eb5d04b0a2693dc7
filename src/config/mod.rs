//! Application configuration management

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Watched inbound directory
    pub input_dir: PathBuf,

    /// Canonical library root (also holds `.staging` and `Manual_Intervention`)
    pub output_dir: PathBuf,

    /// Path of the persisted idempotency ledger
    pub ledger_path: PathBuf,

    /// How long a file's (size, mtime) must stay unchanged before it is trusted
    pub stability_window: Duration,

    /// Trailing inactivity window after which a directory group is emitted
    pub grouping_window: Duration,

    /// Extensions admitted into tracking (lowercase, with leading dot)
    pub allowed_extensions: Vec<String>,

    /// Confidence at or above which a group is organized without review
    pub match_threshold_automatic: u8,

    /// Confidence below which a group goes straight to manual intervention
    pub match_threshold_probable: u8,

    /// Ownership applied to organized output
    pub puid: u32,
    pub pgid: u32,

    /// Log intended filesystem mutations instead of performing them
    pub dry_run: bool,

    /// Leave source files in the inbox after organizing (copy instead of move)
    pub keep_source: bool,

    /// Enabled metadata providers, in priority order
    pub metadata_providers: Vec<String>,

    /// Maximum concurrently processed groups
    pub worker_pool_size: usize,

    /// Review API listen port
    pub api_port: u16,

    /// Audiobookshelf base URL for the post-organize rescan notification
    pub abs_url: Option<String>,

    /// Audiobookshelf API key
    pub abs_api_key: Option<String>,

    /// Audnexus base URL
    pub audnexus_url: String,
}

const DEFAULT_EXTENSIONS: &str = ".m4b,.mp3,.m4a,.flac,.opus,.wma,.epub,.pdf,.jpg,.png";

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let input_dir =
            PathBuf::from(env::var("INPUT_DIR").unwrap_or_else(|_| "/data/input".to_string()));
        let output_dir =
            PathBuf::from(env::var("OUTPUT_DIR").unwrap_or_else(|_| "/data/output".to_string()));

        let ledger_path = env::var("LEDGER_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| output_dir.join(".autoshelf-ledger.json"));

        let stability_secs: u64 = env::var("STABILITY_WINDOW_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .context("Invalid STABILITY_WINDOW_SECS")?;

        let grouping_secs: u64 = env::var("GROUPING_WINDOW_SECS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .context("Invalid GROUPING_WINDOW_SECS")?;

        let allowed_extensions = env::var("ALLOWED_EXTENSIONS")
            .unwrap_or_else(|_| DEFAULT_EXTENSIONS.to_string())
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        let metadata_providers = env::var("METADATA_PROVIDERS")
            .unwrap_or_else(|_| "openlibrary,googlebooks,audible".to_string())
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            input_dir,
            output_dir,
            ledger_path,

            stability_window: Duration::from_secs(stability_secs),
            grouping_window: Duration::from_secs(grouping_secs),

            allowed_extensions,

            match_threshold_automatic: env::var("MATCH_THRESHOLD_AUTOMATIC")
                .unwrap_or_else(|_| "90".to_string())
                .parse()
                .context("Invalid MATCH_THRESHOLD_AUTOMATIC")?,

            match_threshold_probable: env::var("MATCH_THRESHOLD_PROBABLE")
                .unwrap_or_else(|_| "70".to_string())
                .parse()
                .context("Invalid MATCH_THRESHOLD_PROBABLE")?,

            puid: env::var("PUID")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .context("Invalid PUID")?,

            pgid: env::var("PGID")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .context("Invalid PGID")?,

            dry_run: env::var("DRY_RUN")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),

            keep_source: env::var("KEEP_SOURCE_FILES")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),

            metadata_providers,

            worker_pool_size: env::var("WORKER_POOL_SIZE")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .context("Invalid WORKER_POOL_SIZE")?,

            api_port: env::var("API_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .context("Invalid API_PORT")?,

            abs_url: env::var("ABS_URL").ok().filter(|s| !s.is_empty()),
            abs_api_key: env::var("ABS_API_KEY").ok().filter(|s| !s.is_empty()),

            audnexus_url: env::var("AUDNEXUS_URL")
                .unwrap_or_else(|_| "https://api.audnexus.com".to_string()),
        })
    }

    /// A configuration with defaults pointed at test directories
    #[cfg(test)]
    pub fn for_tests(input_dir: PathBuf, output_dir: PathBuf) -> Self {
        let ledger_path = output_dir.join(".autoshelf-ledger.json");
        Self {
            input_dir,
            output_dir,
            ledger_path,
            stability_window: Duration::from_secs(60),
            grouping_window: Duration::from_secs(5),
            allowed_extensions: DEFAULT_EXTENSIONS
                .split(',')
                .map(str::to_string)
                .collect(),
            match_threshold_automatic: 90,
            match_threshold_probable: 70,
            puid: 1000,
            pgid: 1000,
            dry_run: false,
            keep_source: false,
            metadata_providers: vec!["openlibrary".to_string()],
            worker_pool_size: 4,
            api_port: 8000,
            abs_url: None,
            abs_api_key: None,
            audnexus_url: "https://api.audnexus.com".to_string(),
        }
    }

    /// Whether a path's extension is in the allowed set
    pub fn is_allowed_extension(&self, path: &std::path::Path) -> bool {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => {
                let dotted = format!(".{}", ext.to_lowercase());
                self.allowed_extensions.iter().any(|a| a == &dotted)
            }
            None => false,
        }
    }
}
