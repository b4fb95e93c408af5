//! Data models for the UrbanFix core
//!
//! This module contains the core domain models organized by concern:
//! - Report: geotagged problem reports (markers) and their identity
//! - Region: map viewports and device location fixes
//! - Category: issue categories and their presentation lookup

pub mod category;
pub mod region;
pub mod report;

// Re-export all public types for convenient access
pub use category::IssueCategory;
pub use region::{DeviceFix, MapRegion};
pub use report::{ProblemReport, ReportId, format_timestamp};
