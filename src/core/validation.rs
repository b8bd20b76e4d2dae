//! Upload validation.
//!
//! Runs before anything is written: a rejected upload leaves no artifact
//! and no job record behind. Checks:
//! - File name present and free of path separators
//! - File name matches an allowed pattern (case-insensitive glob)
//! - Size within the configured limit
//! - Submitting identity present and usable as a storage key segment

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Limits applied to submitted files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadPolicy {
    /// Maximum upload size in MB (default: 500)
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,

    /// Glob patterns a file name must match (default: `*.mp3`)
    #[serde(default = "default_allowed_patterns")]
    pub allowed_patterns: Vec<String>,
}

fn default_max_file_size_mb() -> u64 {
    500
}

fn default_allowed_patterns() -> Vec<String> {
    vec!["*.mp3".to_string()]
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_file_size_mb: default_max_file_size_mb(),
            allowed_patterns: default_allowed_patterns(),
        }
    }
}

impl UploadPolicy {
    /// Size limit in bytes
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(BYTES_PER_MB)
    }

    /// Check a file name against the allowed patterns
    pub fn is_allowed_name(&self, file_name: &str) -> bool {
        let options = MatchOptions {
            case_sensitive: false,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };

        self.allowed_patterns.iter().any(|pattern_str| {
            Pattern::new(pattern_str)
                .map(|pattern| pattern.matches_with(file_name, options))
                .unwrap_or(false)
        })
    }

    /// Validate an upload before any job is created
    pub fn validate(
        &self,
        file_name: &str,
        size_bytes: u64,
        user_id: &str,
    ) -> Result<(), ValidationError> {
        if user_id.trim().is_empty() {
            return Err(ValidationError::MissingIdentity);
        }

        if user_id.contains('/') || user_id.contains('\\') || user_id == "." || user_id == ".." {
            return Err(ValidationError::InvalidIdentity(user_id.to_string()));
        }

        if file_name.trim().is_empty() {
            return Err(ValidationError::MissingFileName);
        }

        if file_name.contains('/') || file_name.contains('\\') || file_name.starts_with('.') {
            return Err(ValidationError::InvalidFileName(file_name.to_string()));
        }

        if !self.is_allowed_name(file_name) {
            return Err(ValidationError::UnsupportedFormat {
                file_name: file_name.to_string(),
                allowed: self.allowed_patterns.join(", "),
            });
        }

        if size_bytes == 0 {
            return Err(ValidationError::EmptyFile);
        }

        let limit = self.max_file_size_bytes();
        if size_bytes > limit {
            return Err(ValidationError::FileTooLarge {
                actual: size_bytes,
                limit,
            });
        }

        Ok(())
    }
}

/// Upload rejections
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("File name is required")]
    MissingFileName,

    #[error("Invalid file name: {0}")]
    InvalidFileName(String),

    #[error("Unsupported file format: {file_name} (allowed: {allowed})")]
    UnsupportedFormat { file_name: String, allowed: String },

    #[error("File is empty")]
    EmptyFile,

    #[error("File size exceeds limit: {actual} > {limit} bytes")]
    FileTooLarge { actual: u64, limit: u64 },

    #[error("Submitting user identity is required")]
    MissingIdentity,

    #[error("Invalid user identity: {0}")]
    InvalidIdentity(String),
}
