//! Configuration management for photarc.
//!
//! All settings are environment-driven (with a `.env` file loaded at
//! startup). Paths default to the container-style `/photos` and `/data`
//! roots.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Default database filename.
pub const DEFAULT_DATABASE_FILENAME: &str = "photarc.db";

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root directory to index.
    pub photos_dir: PathBuf,
    /// Root for derived artifacts and the store.
    pub data_dir: PathBuf,
    /// Database URL (overrides data_dir/db/photarc.db if set).
    pub database_url: Option<String>,
    /// Ordered set of max thumbnail dimensions.
    pub thumbnail_sizes: Vec<u32>,
    /// Per-stage worker parallelism.
    pub workers_per_stage: usize,
    /// Discovery batch size / generic bulk size.
    pub batch_size: usize,
    /// Recognized photo file suffixes (lowercase, with leading dot).
    pub photo_extensions: BTreeSet<String>,
    /// Watcher poll interval in seconds.
    pub watch_interval: u64,
    /// Log level: debug|info|warn|error.
    pub log_level: String,
    /// URL of the external vision-model backend.
    pub captioning_endpoint_url: String,
    /// Model id passed to the captioning backend.
    pub captioning_model: String,
    /// Server bind host.
    pub host: String,
    /// Server bind port.
    pub port: u16,
}

fn default_extensions() -> BTreeSet<String> {
    [
        ".jpg", ".jpeg", ".png", ".webp", ".heic", ".heif", ".tiff", ".tif", ".bmp",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            photos_dir: PathBuf::from("/photos"),
            data_dir: PathBuf::from("/data"),
            database_url: None,
            thumbnail_sizes: vec![200, 600, 1200],
            workers_per_stage: 2,
            batch_size: 50,
            photo_extensions: default_extensions(),
            watch_interval: 30,
            log_level: "info".to_string(),
            captioning_endpoint_url: "http://ollama:11434".to_string(),
            captioning_model: "qwen3-vl:30b-a3b-instruct".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8319,
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

impl Settings {
    /// Load settings from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Some(dir) = env_var("PHOTOS_DIR") {
            settings.photos_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_var("DATA_DIR") {
            settings.data_dir = PathBuf::from(dir);
        }
        settings.database_url = env_var("DATABASE_URL");
        if let Some(sizes) = env_var("THUMBNAIL_SIZES") {
            let parsed: Vec<u32> = sizes
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if !parsed.is_empty() {
                settings.thumbnail_sizes = parsed;
            }
        }
        if let Some(workers) = env_var("WORKERS_PER_STAGE").and_then(|s| s.parse().ok()) {
            settings.workers_per_stage = workers;
        }
        if let Some(batch) = env_var("BATCH_SIZE").and_then(|s| s.parse().ok()) {
            settings.batch_size = batch;
        }
        if let Some(exts) = env_var("PHOTO_EXTENSIONS") {
            let parsed: BTreeSet<String> = exts
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .map(|s| if s.starts_with('.') { s } else { format!(".{s}") })
                .collect();
            if !parsed.is_empty() {
                settings.photo_extensions = parsed;
            }
        }
        if let Some(interval) = env_var("WATCH_INTERVAL").and_then(|s| s.parse().ok()) {
            settings.watch_interval = interval;
        }
        if let Some(level) = env_var("LOG_LEVEL") {
            settings.log_level = level;
        }
        if let Some(url) = env_var("CAPTIONING_ENDPOINT_URL") {
            settings.captioning_endpoint_url = url;
        }
        if let Some(model) = env_var("CAPTIONING_MODEL") {
            settings.captioning_model = model;
        }
        if let Some(host) = env_var("HOST") {
            settings.host = host;
        }
        if let Some(port) = env_var("PORT").and_then(|s| s.parse().ok()) {
            settings.port = port;
        }

        settings
    }

    /// Get the database URL, constructing from the data dir if not set.
    pub fn database_url(&self) -> String {
        if let Some(ref url) = self.database_url {
            url.clone()
        } else {
            format!("sqlite:{}", self.database_path().display())
        }
    }

    /// Full path to the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("db").join(DEFAULT_DATABASE_FILENAME)
    }

    /// Directory for generated thumbnails.
    pub fn thumbnails_dir(&self) -> PathBuf {
        self.data_dir.join("thumbs")
    }

    /// Directory for face crops.
    pub fn faces_dir(&self) -> PathBuf {
        self.data_dir.join("faces")
    }

    /// Directory for extracted motion videos.
    pub fn motion_videos_dir(&self) -> PathBuf {
        self.data_dir.join("motion_videos")
    }

    /// Check whether a path has a recognized photo extension.
    pub fn is_supported_photo(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.photo_extensions.contains(&format!(".{}", e.to_lowercase())))
            .unwrap_or(false)
    }

    /// Ensure all derived-data directories exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for dir in [
            self.data_dir.join("db"),
            self.thumbnails_dir(),
            self.faces_dir(),
            self.motion_videos_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(|e| {
                std::io::Error::new(
                    e.kind(),
                    format!("Failed to create directory '{}': {}", dir.display(), e),
                )
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.photos_dir, PathBuf::from("/photos"));
        assert_eq!(settings.thumbnail_sizes, vec![200, 600, 1200]);
        assert_eq!(settings.workers_per_stage, 2);
        assert_eq!(settings.batch_size, 50);
        assert!(settings.photo_extensions.contains(".heic"));
        assert_eq!(settings.captioning_endpoint_url, "http://ollama:11434");
    }

    #[test]
    fn supported_photo_is_case_insensitive() {
        let settings = Settings::default();
        assert!(settings.is_supported_photo(Path::new("/photos/a.JPG")));
        assert!(settings.is_supported_photo(Path::new("/photos/b.heic")));
        assert!(!settings.is_supported_photo(Path::new("/photos/c.mp4")));
        assert!(!settings.is_supported_photo(Path::new("/photos/noext")));
    }

    #[test]
    fn database_url_from_data_dir() {
        let settings = Settings {
            data_dir: PathBuf::from("/tmp/photarc-test"),
            ..Default::default()
        };
        assert_eq!(
            settings.database_url(),
            "sqlite:/tmp/photarc-test/db/photarc.db"
        );
    }
}
