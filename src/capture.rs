//! Capture flow boundary
//!
//! A photo is first analyzed into a [`PendingReport`]. Only when the user
//! confirms (possibly editing the label) is it published to the marker store.
//! A failed analysis leaves the store untouched.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::models::{DeviceFix, ProblemReport};
use crate::services::Detector;
use crate::sync::{Snapshot, SyncController};
use crate::Result;

/// A detected issue waiting for user confirmation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingReport {
    /// Label suggested by detection
    pub label: String,
    pub fix: DeviceFix,
    pub analyzed_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct CaptureFlow {
    detector: Arc<dyn Detector>,
    controller: SyncController,
}

impl CaptureFlow {
    pub fn new(detector: Arc<dyn Detector>, controller: SyncController) -> Self {
        Self {
            detector,
            controller,
        }
    }

    #[instrument(skip(self, image), fields(bytes = image.len()))]
    pub async fn analyze(&self, image: Vec<u8>, fix: DeviceFix) -> Result<PendingReport> {
        let label = self.detector.detect(image, fix).await.inspect_err(|e| {
            warn!("Detection failed, discarding capture: {}", e);
        })?;
        Ok(PendingReport {
            label,
            fix,
            analyzed_at: Utc::now(),
        })
    }

    /// Persist the confirmed report with the label the user settled on
    pub async fn publish(&self, pending: PendingReport, label: impl Into<String>) -> Result<Snapshot> {
        self.report(label, pending.fix).await
    }

    /// Report an issue at `fix` without a photo
    pub async fn report(&self, label: impl Into<String>, fix: DeviceFix) -> Result<Snapshot> {
        let report = ProblemReport::new(label, fix.latitude, fix.longitude);
        info!("Publishing {} at {:.5}, {:.5}", report.label, report.lat, report.lon);
        self.controller.record(report).await
    }
}
