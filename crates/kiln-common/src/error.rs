//! Error types for KilnDB.

use thiserror::Error;

/// Result type alias using KilnError.
pub type Result<T> = std::result::Result<T, KilnError>;

/// Errors that can occur in KilnDB operations.
#[derive(Debug, Error)]
pub enum KilnError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    IoError(String),

    // Storage errors
    #[error("Page not found: {page_id}")]
    PageNotFound { page_id: u64 },

    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("Page size mismatch: expected {expected}, got {actual}")]
    PageSizeMismatch { expected: usize, actual: usize },

    // Hash index errors
    #[error("Hash directory full: global depth limit {max_depth} reached")]
    DirectoryFull { max_depth: u32 },

    #[error("Hash directory corrupted: {0}")]
    DirectoryCorrupted(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let kiln_err: KilnError = io_err.into();
        assert!(matches!(kiln_err, KilnError::Io(_)));
        assert!(kiln_err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_page_not_found_display() {
        let err = KilnError::PageNotFound { page_id: 42 };
        assert_eq!(err.to_string(), "Page not found: 42");
    }

    #[test]
    fn test_buffer_pool_full_display() {
        let err = KilnError::BufferPoolFull;
        assert_eq!(err.to_string(), "Buffer pool full, unable to allocate frame");
    }

    #[test]
    fn test_page_size_mismatch_display() {
        let err = KilnError::PageSizeMismatch {
            expected: 16384,
            actual: 8192,
        };
        assert_eq!(
            err.to_string(),
            "Page size mismatch: expected 16384, got 8192"
        );
    }

    #[test]
    fn test_directory_full_display() {
        let err = KilnError::DirectoryFull { max_depth: 9 };
        assert_eq!(
            err.to_string(),
            "Hash directory full: global depth limit 9 reached"
        );
    }

    #[test]
    fn test_directory_corrupted_display() {
        let err = KilnError::DirectoryCorrupted("dangling bucket reference".to_string());
        assert_eq!(
            err.to_string(),
            "Hash directory corrupted: dangling bucket reference"
        );
    }

    #[test]
    fn test_config_errors_display() {
        let err = KilnError::ConfigError("missing data_dir".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing data_dir");

        let err = KilnError::InvalidParameter {
            name: "buffer_pool_pages".to_string(),
            value: "0".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid parameter: buffer_pool_pages = 0");
    }

    #[test]
    fn test_internal_error_display() {
        let err = KilnError::Internal("assertion failed".to_string());
        assert_eq!(err.to_string(), "Internal error: assertion failed");
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(KilnError::Internal("test".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<KilnError>();
    }
}
