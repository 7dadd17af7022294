//! Error types for cgroup operations

use std::io;
use thiserror::Error;

/// Cgroup operation errors
#[derive(Debug, Error)]
pub enum CgroupError {
    #[error("Cgroup not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid limit value: {0}")]
    InvalidLimit(String),

    #[error("Failed to parse cgroup file: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Cgroup {path} not ready after {attempts} attempts: {detail}")]
    NotReady {
        path: String,
        attempts: u32,
        detail: String,
    },

    #[error("Cgroup is not empty: {0}")]
    NotEmpty(String),

    #[error("Controller not enabled in cgroup tree: {0}")]
    MissingController(String),

    #[error("Cgroup v2 not available")]
    CgroupV2NotAvailable,
}

pub type Result<T> = std::result::Result<T, CgroupError>;
