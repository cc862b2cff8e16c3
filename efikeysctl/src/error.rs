// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Efikeys Authors

//! Error types for efikeysctl
//!
//! Library errors keep their classification ([`efikeys::error::ErrorKind`])
//! so that the process exit code tells a script what went wrong:
//!
//! | code | meaning                                  |
//! |------|------------------------------------------|
//! | 0    | success                                  |
//! | 1    | usage or general error                   |
//! | 2    | variable, list or entry not found        |
//! | 3    | the store refused the write              |
//! | 4    | malformed input                          |
//! | 5    | key mismatch or signer not authorized    |
//! | 6    | store or file I/O failure                |

use efikeys::error::{Error as LibraryError, ErrorKind};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EfikeysctlError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Errors from the efikeys library
    #[error("{0}")]
    Library(#[from] LibraryError),

    /// Invalid command-line input
    #[error("Validation error: {0}")]
    Validation(String),

    /// File errors
    #[error("File error on {path}: {source}")]
    File {
        path: String,
        source: std::io::Error,
    },

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors carrying extra context
    #[error("{0:#}")]
    Generic(#[from] anyhow::Error),
}

/// Library module errors convert through [`efikeys::error::Error`]
macro_rules! from_library {
    ($($t:ty),* $(,)?) => {
        $(
            impl From<$t> for EfikeysctlError {
                fn from(e: $t) -> Self {
                    Self::Library(e.into())
                }
            }
        )*
    };
}

from_library!(
    efikeys::esl::EslError,
    efikeys::database::DatabaseError,
    efikeys::auth::AuthError,
    efikeys::store::StoreError,
    efikeys::store::FlashError,
    efikeys::crypto::CryptoError,
    efikeys::crypto::x509::CertificateBuilderError,
    efikeys::variables::VariableError,
    efikeys::update::UpdateError,
    efikeys::authenticode::AuthenticodeError,
    efikeys::time::TimeError,
    efikeys::guid::GuidError,
    efikeys::attributes::AttributesParseError,
);

impl EfikeysctlError {
    pub fn validation<T: Into<String>>(message: T) -> Self {
        Self::Validation(message.into())
    }

    pub fn file<P: AsRef<std::path::Path>>(
        path: P,
        source: std::io::Error,
    ) -> Self {
        Self::File {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Library(e) => match e.kind() {
                ErrorKind::Usage => 1,
                ErrorKind::NotFound => 2,
                ErrorKind::PermissionDenied => 3,
                ErrorKind::Format => 4,
                ErrorKind::KeyMismatch | ErrorKind::UnauthorizedSigner => 5,
                ErrorKind::Store => 6,
            },
            Self::File { source, .. } => match source.kind() {
                std::io::ErrorKind::NotFound => 2,
                std::io::ErrorKind::PermissionDenied => 3,
                _ => 6,
            },
            Self::Json(_) => 4,
            Self::Generic(e) => e
                .chain()
                .find_map(|cause| cause.downcast_ref::<EfikeysctlError>())
                .map_or(1, EfikeysctlError::exit_code),
            Self::Config(_) | Self::Validation(_) => 1,
        }
    }

    /// Identifier of the error type for JSON output
    pub fn error_code(&self) -> &'static str {
        match self.exit_code() {
            2 => "NOT_FOUND",
            3 => "PERMISSION_DENIED",
            4 => "FORMAT_ERROR",
            5 => "UNAUTHORIZED",
            6 => "STORE_ERROR",
            _ => match self {
                Self::Config(_) => "CONFIG_ERROR",
                Self::Validation(_) => "VALIDATION_ERROR",
                _ => "USAGE_ERROR",
            },
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "error": {
                "code": self.error_code(),
                "exit_code": self.exit_code(),
                "message": self.to_string(),
            }
        })
    }
}

/// Helper trait for adding context to results
pub trait ErrorContext<T> {
    fn with_context<F>(self, f: F) -> Result<T, EfikeysctlError>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: Into<EfikeysctlError>,
{
    fn with_context<F>(self, f: F) -> Result<T, EfikeysctlError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let base_error = e.into();
            EfikeysctlError::Generic(
                anyhow::Error::new(base_error).context(f()),
            )
        })
    }
}
