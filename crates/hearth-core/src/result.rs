//! Result type alias for Hearth.

use crate::HearthError;

/// A specialized `Result` type for Hearth operations.
pub type HearthResult<T> = Result<T, HearthError>;
