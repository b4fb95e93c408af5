//! Error types and handling for the `UrbanFix` core

use thiserror::Error;

/// Main error type for the `UrbanFix` core
#[derive(Error, Debug)]
pub enum UrbanFixError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Input validation errors
    #[error("Invalid input: {message}")]
    Validation { message: String },

    /// A referenced record does not exist
    #[error("Not found: {message}")]
    NotFound { message: String },

    /// Persisted file or key is missing, unreadable or unwritable
    #[error("Storage unavailable: {message}")]
    StorageUnavailable { message: String },

    /// Persisted content does not match its schema
    #[error("Storage corrupt: {message}")]
    StorageCorrupt { message: String },

    /// Reverse geocoding failed or returned nothing usable
    #[error("Geocoding failed: {message}")]
    GeocodeFailure { message: String },

    /// Detection or report-generation service failed
    #[error("Remote service error: {message}")]
    RemoteService { message: String },

    /// No device location fix could be acquired
    #[error("Location unavailable: {message}")]
    Location { message: String },

    /// I/O operation errors
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// General application errors
    #[error("Application error: {message}")]
    General { message: String },
}

impl UrbanFixError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn storage_unavailable<S: Into<String>>(message: S) -> Self {
        Self::StorageUnavailable {
            message: message.into(),
        }
    }

    pub fn storage_corrupt<S: Into<String>>(message: S) -> Self {
        Self::StorageCorrupt {
            message: message.into(),
        }
    }

    pub fn geocode<S: Into<String>>(message: S) -> Self {
        Self::GeocodeFailure {
            message: message.into(),
        }
    }

    /// Create a new remote service error
    pub fn remote<S: Into<String>>(message: S) -> Self {
        Self::RemoteService {
            message: message.into(),
        }
    }

    pub fn location<S: Into<String>>(message: S) -> Self {
        Self::Location {
            message: message.into(),
        }
    }

    /// Create a new general error
    pub fn general<S: Into<String>>(message: S) -> Self {
        Self::General {
            message: message.into(),
        }
    }

    /// Whether the error belongs to the local-storage class that callers absorb
    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            UrbanFixError::StorageUnavailable { .. }
                | UrbanFixError::StorageCorrupt { .. }
                | UrbanFixError::Io { .. }
        )
    }

    /// Get a user-friendly error message
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            UrbanFixError::Config { .. } => {
                "Configuration error. Please check your config file.".to_string()
            }
            UrbanFixError::Validation { message } => {
                format!("Invalid input: {message}")
            }
            UrbanFixError::NotFound { message } => message.clone(),
            UrbanFixError::StorageUnavailable { .. } | UrbanFixError::StorageCorrupt { .. } => {
                "Saved problems could not be accessed on this device.".to_string()
            }
            UrbanFixError::GeocodeFailure { .. } => "Unknown location".to_string(),
            UrbanFixError::RemoteService { message } => {
                format!("The analysis service is unavailable: {message}")
            }
            UrbanFixError::Location { .. } => {
                "Unable to determine your location. Please check location services.".to_string()
            }
            UrbanFixError::Io { .. } => {
                "File operation failed. Please check file permissions.".to_string()
            }
            UrbanFixError::General { message } => message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let config_err = UrbanFixError::config("missing data dir");
        assert!(matches!(config_err, UrbanFixError::Config { .. }));

        let remote_err = UrbanFixError::remote("connection failed");
        assert!(matches!(remote_err, UrbanFixError::RemoteService { .. }));

        let validation_err = UrbanFixError::validation("invalid coordinates");
        assert!(matches!(validation_err, UrbanFixError::Validation { .. }));
    }

    #[test]
    fn test_user_messages() {
        let validation_err = UrbanFixError::validation("label must not be empty");
        assert!(validation_err.user_message().contains("label must not be empty"));

        let remote_err = UrbanFixError::remote("Nothing detected in this photo.");
        assert!(remote_err.user_message().contains("Nothing detected"));

        let geocode_err = UrbanFixError::geocode("timeout");
        assert_eq!(geocode_err.user_message(), "Unknown location");
    }

    #[test]
    fn test_storage_classification() {
        assert!(UrbanFixError::storage_corrupt("bad json").is_storage());
        assert!(UrbanFixError::storage_unavailable("gone").is_storage());
        assert!(!UrbanFixError::remote("down").is_storage());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: UrbanFixError = io_err.into();
        assert!(matches!(err, UrbanFixError::Io { .. }));
    }
}
