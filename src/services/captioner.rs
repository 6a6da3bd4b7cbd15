//! Vision-model captioning via an Ollama-compatible backend.
//!
//! Generates a natural-language caption and a tag list per photo. The
//! backend is optional infrastructure: when it is unreachable the stage
//! leaves the completion flag untouched so a later rescan can retry.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::imageops::FilterType;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::EnrichError;
use crate::pipeline::{EnrichOutcome, Enricher};
use crate::repository::{CaptionRepository, PhotoRepository};

/// Max dimension for images sent to the backend.
const MAX_IMAGE_DIMENSION: u32 = 1024;

/// Generation timeout; vision models are slow.
const GENERATE_TIMEOUT: Duration = Duration::from_secs(120);

/// Availability probe timeout.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Cap on stored tags per photo.
const MAX_TAGS: usize = 15;

const CAPTION_PROMPT: &str = "Describe this photo in one or two concise sentences. \
     Focus on the main subject, setting, and any notable details. \
     Be specific and descriptive.";

const TAG_PROMPT: &str = "List tags for this photo as a comma-separated list. \
     Include: specific objects, scenes, activities, locations/landmarks, \
     colors, mood, weather, time of day, and any other relevant descriptors. \
     Be specific (e.g. 'golden retriever' not just 'dog'). \
     Return ONLY the comma-separated tags, nothing else.";

static THINK_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid regex"));

/// Strip `<think>...</think>` blocks emitted by reasoning models.
fn strip_think_blocks(text: &str) -> String {
    THINK_BLOCK.replace_all(text, "").trim().to_string()
}

/// Normalize a comma-separated tag response.
fn parse_tags(raw: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    raw.split(',')
        .map(|t| t.trim().to_lowercase())
        .filter(|t| t.len() >= 2 && t.len() <= 80)
        .filter(|t| seen.insert(t.clone()))
        .take(MAX_TAGS)
        .collect()
}

/// Backend request format.
#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    images: Vec<String>,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

/// Backend response format.
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[allow(dead_code)]
    #[serde(default)]
    done: bool,
}

/// Load and downscale an image, returning a base64 JPEG (blocking).
fn prepare_image_base64(path: &Path, orientation: Option<i32>) -> Result<String, EnrichError> {
    let img = image::open(path)?;
    let img = super::thumbnail::apply_exif_orientation(img, orientation);
    let img = if img.width().max(img.height()) > MAX_IMAGE_DIMENSION {
        img.resize(MAX_IMAGE_DIMENSION, MAX_IMAGE_DIMENSION, FilterType::Lanczos3)
    } else {
        img
    };
    let img = image::DynamicImage::ImageRgb8(img.to_rgb8());

    let mut buffer = std::io::Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, 85);
    img.write_with_encoder(encoder)?;
    Ok(BASE64.encode(buffer.into_inner()))
}

/// CAPTIONING stage enricher.
pub struct CaptioningEnricher {
    settings: Arc<Settings>,
    photos: PhotoRepository,
    captions: CaptionRepository,
    client: Client,
}

impl CaptioningEnricher {
    pub fn new(
        settings: Arc<Settings>,
        photos: PhotoRepository,
        captions: CaptionRepository,
    ) -> Self {
        let client = Client::builder()
            .timeout(GENERATE_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            settings,
            photos,
            captions,
            client,
        }
    }

    /// Check whether the backend is reachable.
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.settings.captioning_endpoint_url);
        match self.client.get(&url).timeout(PROBE_TIMEOUT).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// Run one generation request against the backend.
    async fn generate(
        &self,
        prompt: &str,
        image_base64: &str,
        num_predict: u32,
    ) -> Result<Option<String>, EnrichError> {
        let url = format!("{}/api/generate", self.settings.captioning_endpoint_url);
        let request = GenerateRequest {
            model: self.settings.captioning_model.clone(),
            prompt: prompt.to_string(),
            images: vec![image_base64.to_string()],
            stream: false,
            options: GenerateOptions {
                temperature: 0.3,
                num_predict,
            },
        };

        let resp = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| EnrichError::Backend(e.to_string()))?;

        if !resp.status().is_success() {
            warn!("captioning backend returned HTTP {}", resp.status());
            return Ok(None);
        }

        let body: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| EnrichError::Backend(e.to_string()))?;
        let text = strip_think_blocks(&body.response);
        Ok(if text.is_empty() { None } else { Some(text) })
    }
}

#[async_trait]
impl Enricher for CaptioningEnricher {
    async fn enrich(&self, key: &str) -> Result<EnrichOutcome, EnrichError> {
        let photo = self
            .photos
            .get(key)
            .await?
            .ok_or_else(|| EnrichError::MissingRecord(key.to_string()))?;

        if photo.ollama_captioned {
            return Ok(EnrichOutcome::NoOp);
        }

        let path = self.settings.photos_dir.join(&photo.file_path);
        if !path.exists() {
            return Err(EnrichError::MissingFile(path));
        }

        // Backend down: leave the flag false so a future rescan retries,
        // but do not block the pipeline.
        if !self.is_available().await {
            debug!(key, "captioning backend unavailable, skipping");
            return Ok(EnrichOutcome::NoOp);
        }

        let orientation = photo.orientation;
        let image_base64 =
            tokio::task::spawn_blocking(move || prepare_image_base64(&path, orientation))
                .await
                .map_err(|e| EnrichError::Backend(e.to_string()))??;

        let Some(caption) = self.generate(CAPTION_PROMPT, &image_base64, 150).await? else {
            // The backend answered but produced nothing usable; mark the
            // attempt so the item is not retried endlessly.
            self.photos.mark_captioned(key).await?;
            return Ok(EnrichOutcome::Done);
        };

        self.captions
            .upsert_caption(key, &caption, &self.settings.captioning_model)
            .await?;

        if let Some(raw_tags) = self.generate(TAG_PROMPT, &image_base64, 200).await? {
            let tags = parse_tags(&raw_tags);
            for tag in &tags {
                let tag_id = self.captions.ensure_tag(tag).await?;
                self.captions.tag_photo(key, tag_id).await?;
            }
            if !tags.is_empty() {
                debug!(key, "tagged with {} tags", tags.len());
            }
        }

        self.photos.mark_captioned(key).await?;
        debug!(key, "captioned");
        Ok(EnrichOutcome::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn think_blocks_are_stripped() {
        let raw = "<think>hmm, a dog?\nprobably.</think>A golden retriever on a beach.";
        assert_eq!(strip_think_blocks(raw), "A golden retriever on a beach.");
        assert_eq!(strip_think_blocks("plain text"), "plain text");
    }

    #[test]
    fn tags_are_normalized_deduplicated_and_capped() {
        let tags = parse_tags("Sunset, beach, BEACH, x, ocean ,  golden hour");
        assert_eq!(tags, vec!["sunset", "beach", "ocean", "golden hour"]);

        let many: Vec<String> = (0..30).map(|i| format!("tag{i}")).collect();
        assert_eq!(parse_tags(&many.join(",")).len(), MAX_TAGS);
    }

    #[tokio::test]
    async fn unreachable_backend_is_reported_unavailable() {
        let settings = Arc::new(Settings {
            captioning_endpoint_url: "http://127.0.0.1:1".to_string(),
            ..Settings::default()
        });
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("t.db");
        crate::repository::migrations::run_migrations(&db.display().to_string())
            .await
            .unwrap();
        let store = crate::repository::Store::from_path(&db);
        let enricher = CaptioningEnricher::new(settings, store.photos(), store.captions());
        assert!(!enricher.is_available().await);
    }
}
