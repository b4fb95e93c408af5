//! Reverse geocoding over the Nominatim HTTP API

use std::time::Duration;

use async_trait::async_trait;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{Placemark, ReverseGeocoder};
use crate::config::GeocodingConfig;
use crate::{Result, UrbanFixError};

pub struct NominatimGeocoder {
    client: ClientWithMiddleware,
    base_url: String,
    language: String,
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    address: Option<Address>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Address {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    county: Option<String>,
    state_district: Option<String>,
    state: Option<String>,
}

impl From<Address> for Placemark {
    fn from(address: Address) -> Self {
        Placemark {
            city: address.city.or(address.town).or(address.village),
            subregion: address
                .county
                .or(address.state_district)
                .or(address.state),
        }
    }
}

impl NominatimGeocoder {
    pub fn new(config: &GeocodingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.into()))
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| UrbanFixError::config(format!("Failed to create HTTP client: {e}")))?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(config.max_retries);
        let client = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            language: config.language.clone(),
        })
    }

    fn reverse_url(&self, lat: f64, lon: f64) -> String {
        format!(
            "{}/reverse?format=jsonv2&lat={}&lon={}&accept-language={}",
            self.base_url, lat, lon, self.language
        )
    }
}

fn placemarks_from(response: ReverseResponse) -> Vec<Placemark> {
    if let Some(error) = response.error {
        debug!("Nominatim has no address here: {}", error);
        return Vec::new();
    }
    response.address.map(Placemark::from).into_iter().collect()
}

#[async_trait]
impl ReverseGeocoder for NominatimGeocoder {
    #[instrument(skip(self), level = "debug")]
    async fn reverse_geocode(&self, lat: f64, lon: f64) -> Result<Vec<Placemark>> {
        let response = self
            .client
            .get(self.reverse_url(lat, lon))
            .send()
            .await
            .map_err(|e| UrbanFixError::geocode(format!("Request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(UrbanFixError::geocode(format!(
                "Nominatim returned {}",
                response.status()
            )));
        }

        let body: ReverseResponse = response
            .json()
            .await
            .map_err(|e| UrbanFixError::geocode(format!("Invalid response: {e}")))?;

        Ok(placemarks_from(body))
    }
}
