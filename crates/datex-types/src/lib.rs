//! Shared types for DATEX.
//!
//! This crate defines source spans, diagnostics and wire fault kinds, the
//! script AST, the closed value model and the addressing model used by every
//! other stage of the pipeline.

mod error;
mod span;
pub mod address;
pub mod ast;
pub mod schema;
pub mod value;

pub use address::{
    AddressError, Endpoint, EndpointKind, EndpointRegistry, IdEndpoint, Instance, TargetClause,
    ID_ENDPOINT_LEN,
};
pub use error::{
    CompileErrors, DatexError, ErrorCategory, ErrorCode, ErrorKind, Fault, MalformedBlockError,
    Severity, MAX_ERRORS,
};
pub use schema::{SchemaError, TypeDescriptor, TypeRegistry};
pub use span::{SourceFile, Span};
pub use value::{PointerId, Rational, StdType, TypeTag, Value, POINTER_ID_LEN};

/// Result type used by the script front end.
pub type Result<T> = std::result::Result<T, DatexError>;
