//! Codegen error types.

use datex_types::{MalformedBlockError, Span};
use thiserror::Error;

/// Errors that can occur while emitting or reading a DXB body.
#[derive(Debug, Error)]
pub enum CodegenError {
    /// A placeholder refers to a data slot that was not supplied.
    #[error("no data supplied for placeholder ?{index}")]
    MissingData { index: u32, span: Span },

    #[error("fraction with zero denominator")]
    ZeroDenominator { span: Span },

    /// A name does not fit its u8 length prefix.
    #[error("name too long for the wire format ({len} bytes): {name}")]
    NameTooLong { name: String, len: usize },

    /// A length-prefixed section exceeds its prefix width.
    #[error("section too large for the wire format: {0} bytes")]
    BodyTooLarge(usize),

    /// A child path is deeper than a single CHILD_SET can express.
    #[error("child path too deep: {0} keys")]
    PathTooDeep(usize),

    #[error(transparent)]
    Malformed(#[from] MalformedBlockError),
}

/// Codegen result type alias.
pub type CodegenResult<T> = Result<T, CodegenError>;
