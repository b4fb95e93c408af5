use std::path::Path;

use reqwest::header::CONTENT_TYPE;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use tracing::{info, instrument};

use super::{base_url, http_client};
use crate::config::ServicesConfig;
use crate::models::ProblemReport;
use crate::{Result, UrbanFixError};

const MAX_RETRIES: u32 = 2;

/// Client for `POST /generate_report/`
pub struct ReportClient {
    client: ClientWithMiddleware,
    base_url: String,
}

impl ReportClient {
    pub fn new(config: &ServicesConfig) -> Result<Self> {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(MAX_RETRIES);
        let client = ClientBuilder::new(http_client(config)?)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        Ok(Self {
            client,
            base_url: base_url(config),
        })
    }

    /// PDF document describing `reports`
    #[instrument(skip(self, reports), fields(count = reports.len()))]
    pub async fn render(&self, reports: &[ProblemReport]) -> Result<Vec<u8>> {
        let body = serde_json::to_vec(reports)
            .map_err(|e| UrbanFixError::general(format!("Failed to encode reports: {e}")))?;

        let response = self
            .client
            .post(format!("{}/generate_report/", self.base_url))
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| UrbanFixError::remote(format!("Report request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(UrbanFixError::remote(format!(
                "Report service returned {}",
                response.status()
            )));
        }

        let pdf = response
            .bytes()
            .await
            .map_err(|e| UrbanFixError::remote(format!("Report download failed: {e}")))?;
        Ok(pdf.to_vec())
    }

    /// Render `reports` and write the PDF to `dest`, returning its size
    pub async fn generate(&self, reports: &[ProblemReport], dest: &Path) -> Result<usize> {
        let pdf = self.render(reports).await?;
        tokio::fs::write(dest, &pdf).await?;
        info!("Report with {} markers saved to {}", reports.len(), dest.display());
        Ok(pdf.len())
    }
}
