//! Reverse geocoding: GPS coordinates to place names.
//!
//! Uses an offline GeoNames lookup so the stage works without network
//! access. The geocoder data set is loaded lazily on first use and shared
//! behind a singleton.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use reverse_geocoder::ReverseGeocoder;
use tracing::{debug, info};

use crate::error::EnrichError;
use crate::pipeline::{EnrichOutcome, Enricher};
use crate::repository::PhotoRepository;

static GEOCODER: Lazy<ReverseGeocoder> = Lazy::new(|| {
    info!("loading reverse geocoder data set");
    ReverseGeocoder::new()
});

/// Resolved place names for a coordinate pair.
#[derive(Debug, Clone)]
pub struct ResolvedPlace {
    pub city: String,
    pub country: String,
    pub address: String,
}

/// Look up the nearest known place (blocking on first call while the data
/// set loads).
pub fn resolve_place(latitude: f64, longitude: f64) -> ResolvedPlace {
    let result = GEOCODER.search((latitude, longitude));
    let record = &result.record;

    let city = record.name.clone();
    let country = record.cc.clone();
    let address = if record.admin1.is_empty() {
        format!("{}, {}", city, country)
    } else {
        format!("{}, {}, {}", city, record.admin1, country)
    };

    ResolvedPlace {
        city,
        country,
        address,
    }
}

/// GEOCODING stage enricher. Optional: photos without GPS pass through
/// untouched.
pub struct GeocodingEnricher {
    photos: PhotoRepository,
}

impl GeocodingEnricher {
    pub fn new(photos: PhotoRepository) -> Self {
        Self { photos }
    }
}

#[async_trait]
impl Enricher for GeocodingEnricher {
    async fn enrich(&self, key: &str) -> Result<EnrichOutcome, EnrichError> {
        let photo = self
            .photos
            .get(key)
            .await?
            .ok_or_else(|| EnrichError::MissingRecord(key.to_string()))?;

        if photo.location_country.is_some() {
            return Ok(EnrichOutcome::NoOp);
        }
        let (Some(latitude), Some(longitude)) = (photo.gps_latitude, photo.gps_longitude) else {
            return Ok(EnrichOutcome::NoOp);
        };

        let place =
            tokio::task::spawn_blocking(move || resolve_place(latitude, longitude))
                .await
                .map_err(|e| EnrichError::Backend(e.to_string()))?;

        self.photos
            .set_location(key, &place.city, &place.country, &place.address)
            .await?;
        debug!(key, city = %place.city, "geocoded");
        Ok(EnrichOutcome::Done)
    }
}
