//! Result type aliases

use crate::error::EscrowError;

/// Standard Result type for escrow operations
pub type EscrowResult<T> = Result<T, EscrowError>;
