//! Clients for the remote detection and report-generation services

pub mod detection;
pub mod report;

use std::time::Duration;

use async_trait::async_trait;

pub use detection::DetectionClient;
pub use report::ReportClient;

use crate::config::ServicesConfig;
use crate::models::DeviceFix;
use crate::{Result, UrbanFixError};

/// Classifies a photo taken at a position into an issue label
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, image: Vec<u8>, fix: DeviceFix) -> Result<String>;
}

fn base_url(config: &ServicesConfig) -> String {
    config.base_url.trim_end_matches('/').to_string()
}

fn http_client(config: &ServicesConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_seconds.into()))
        .build()
        .map_err(|e| UrbanFixError::config(format!("Failed to create HTTP client: {e}")))
}
