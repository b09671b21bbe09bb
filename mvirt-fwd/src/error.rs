//! Error types for the forwarding core.

use std::io;
use std::net::IpAddr;
use thiserror::Error;

/// Coarse classification of a [`FwdError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed input (wrong family, prefix length out of range).
    Validation,
    /// The object already exists.
    Conflict,
    /// The object to delete does not exist.
    NotFound,
    /// Node pool exhausted.
    Resource,
    /// Configuration, I/O or threading failures around the core.
    Environment,
}

/// Forwarding core errors.
#[derive(Debug, Error)]
pub enum FwdError {
    #[error("Address family mismatch")]
    InvalidFamily,

    #[error("Invalid prefix length /{prefix_len} (maximum /{max})")]
    InvalidPrefixLength { prefix_len: u8, max: u8 },

    #[error("Route ID {0} already exists for this prefix")]
    DuplicateRouteId(u32),

    #[error("Neighbor {0} already exists")]
    DuplicateNeighbor(IpAddr),

    #[error("Route not found")]
    RouteNotFound,

    #[error("Neighbor not found: {0}")]
    NeighborNotFound(IpAddr),

    #[error("Trie node pool exhausted ({capacity} nodes)")]
    AllocationFailure { capacity: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Thread panicked: {0}")]
    ThreadPanicked(String),
}

impl FwdError {
    /// Map this error onto the control-plane error taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            FwdError::InvalidFamily | FwdError::InvalidPrefixLength { .. } => {
                ErrorClass::Validation
            }
            FwdError::DuplicateRouteId(_) | FwdError::DuplicateNeighbor(_) => ErrorClass::Conflict,
            FwdError::RouteNotFound | FwdError::NeighborNotFound(_) => ErrorClass::NotFound,
            FwdError::AllocationFailure { .. } => ErrorClass::Resource,
            FwdError::Config(_)
            | FwdError::Io(_)
            | FwdError::Json(_)
            | FwdError::ThreadPanicked(_) => ErrorClass::Environment,
        }
    }
}

pub type Result<T> = std::result::Result<T, FwdError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_error_class() {
        assert_eq!(FwdError::InvalidFamily.class(), ErrorClass::Validation);
        assert_eq!(
            FwdError::InvalidPrefixLength {
                prefix_len: 33,
                max: 32
            }
            .class(),
            ErrorClass::Validation
        );
        assert_eq!(FwdError::DuplicateRouteId(7).class(), ErrorClass::Conflict);
        assert_eq!(
            FwdError::NeighborNotFound(IpAddr::V4(Ipv4Addr::LOCALHOST)).class(),
            ErrorClass::NotFound
        );
        assert_eq!(
            FwdError::AllocationFailure { capacity: 1 }.class(),
            ErrorClass::Resource
        );
        assert_eq!(
            FwdError::Config("bad".to_string()).class(),
            ErrorClass::Environment
        );
    }

    #[test]
    fn test_error_display() {
        let err = FwdError::InvalidPrefixLength {
            prefix_len: 129,
            max: 128,
        };
        assert_eq!(err.to_string(), "Invalid prefix length /129 (maximum /128)");

        let err = FwdError::DuplicateNeighbor("10.0.0.1".parse().unwrap());
        assert_eq!(err.to_string(), "Neighbor 10.0.0.1 already exists");
    }
}
