//! Error module for the spikesim library.
use std::error::Error;
use std::fmt;

/// Error types for the library.
#[derive(Debug, PartialEq, Clone)]
pub enum SnnError {
    /// Error for invalid parameters, e.g., a negative time constant.
    InvalidParameter(String),
    /// Error for a group id that does not exist in the network.
    GroupNotFound(usize),
    /// Error for a connection id that does not exist in the network.
    ConnectionNotFound(usize),
    /// Error for mismatched sizes, e.g., a rate vector shorter than the group.
    SizeMismatch { expected: usize, found: usize },
    /// Error for operations that are not allowed in the current state,
    /// e.g., connecting into a spike generator group.
    InvalidOperation(String),
    /// Error raised when the network fails its pre-simulation consistency checks.
    VerificationFailed(String),
    /// Error raised when an iterative procedure fails to converge.
    ConvergenceError(String),
    /// Error for I/O operations.
    IoError(String),
}

impl fmt::Display for SnnError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SnnError::InvalidParameter(e) => write!(f, "Invalid parameter: {}", e),
            SnnError::GroupNotFound(id) => write!(f, "Group not found: {}", id),
            SnnError::ConnectionNotFound(id) => write!(f, "Connection not found: {}", id),
            SnnError::SizeMismatch { expected, found } => {
                write!(f, "Size mismatch: expected {}, found {}", expected, found)
            }
            SnnError::InvalidOperation(e) => write!(f, "Invalid operation: {}", e),
            SnnError::VerificationFailed(e) => write!(f, "Network verification failed: {}", e),
            SnnError::ConvergenceError(e) => write!(f, "Convergence error: {}", e),
            SnnError::IoError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl Error for SnnError {}
