use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{Detector, base_url, http_client};
use crate::config::ServicesConfig;
use crate::models::DeviceFix;
use crate::{Result, UrbanFixError};

/// Client for `POST /analyze/`
pub struct DetectionClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    #[serde(default)]
    detections: Vec<Detection>,
}

#[derive(Debug, Deserialize)]
struct Detection {
    label: String,
}

impl DetectionClient {
    pub fn new(config: &ServicesConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            base_url: base_url(config),
        })
    }

    /// Label of the first detection in the photo
    #[instrument(skip(self, image), fields(bytes = image.len()))]
    pub async fn analyze(&self, image: Vec<u8>, lat: f64, lon: f64) -> Result<String> {
        let photo = Part::bytes(image)
            .file_name("photo.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| UrbanFixError::remote(format!("Invalid image part: {e}")))?;
        let form = Form::new()
            .part("image", photo)
            .text("lat", lat.to_string())
            .text("lon", lon.to_string());

        let response = self
            .client
            .post(format!("{}/analyze/", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| UrbanFixError::remote(format!("Detection request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(UrbanFixError::remote(format!(
                "Detection service returned {}",
                response.status()
            )));
        }

        let body: AnalyzeResponse = response
            .json()
            .await
            .map_err(|e| UrbanFixError::remote(format!("Invalid detection response: {e}")))?;
        first_label(body)
    }
}

fn first_label(response: AnalyzeResponse) -> Result<String> {
    debug!("{} detections", response.detections.len());
    response
        .detections
        .into_iter()
        .next()
        .map(|detection| detection.label)
        .ok_or_else(|| UrbanFixError::remote("Nothing detected in this photo"))
}

#[async_trait]
impl Detector for DetectionClient {
    async fn detect(&self, image: Vec<u8>, fix: DeviceFix) -> Result<String> {
        self.analyze(image, fix.latitude, fix.longitude).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::tests::serve;
    use axum::{Json, Router, extract::Multipart, http::StatusCode, routing::post};
    use serde_json::{Value, json};

    fn client(base_url: String) -> DetectionClient {
        DetectionClient::new(&ServicesConfig {
            base_url,
            ..ServicesConfig::default()
        })
        .unwrap()
    }

    async fn echo_fields(mut multipart: Multipart) -> Json<Value> {
        let mut names = Vec::new();
        let mut lat = String::new();
        while let Some(field) = multipart.next_field().await.unwrap() {
            let name = field.name().unwrap_or_default().to_string();
            if name == "lat" {
                lat = field.text().await.unwrap();
            }
            names.push(name);
        }
        Json(json!({
            "detections": [
                { "label": format!("{}@{}", names.join("+"), lat), "confidence": 0.9 },
                { "label": "graffiti" }
            ]
        }))
    }

    #[tokio::test]
    async fn test_sends_photo_and_position() {
        let base = serve(Router::new().route("/analyze/", post(echo_fields))).await;
        let label = client(base).analyze(vec![0xff, 0xd8], 45.5, 7.25).await.unwrap();
        assert_eq!(label, "image+lat+lon@45.5");
    }

    #[tokio::test]
    async fn test_http_error_is_remote_failure() {
        let base = serve(Router::new().route(
            "/analyze/",
            post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        ))
        .await;
        let result = client(base).analyze(vec![1], 0.0, 0.0).await;
        assert!(matches!(result, Err(UrbanFixError::RemoteService { .. })));
    }

    #[test]
    fn test_zero_detections_is_failure() {
        let response: AnalyzeResponse = serde_json::from_str(r#"{"detections":[]}"#).unwrap();
        assert!(first_label(response).is_err());

        let response: AnalyzeResponse = serde_json::from_str("{}").unwrap();
        assert!(first_label(response).is_err());
    }
}
