//! Runtime error types for the scope interpreter.

use datex_types::{ErrorKind, Fault, MalformedBlockError};
use thiserror::Error;

use crate::interpreter::ScopeState;

/// Evaluation error: a fault raised by a body instruction, or a corrupt body.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    /// Operand of the wrong type.
    #[error("TypeError: {0}")]
    Type(String),
    /// Overflow, division by zero, index out of range.
    #[error("ValueError: {0}")]
    Value(String),
    /// Unknown variable or injected data slot.
    #[error("ReferenceError: {0}")]
    Reference(String),
    /// Unknown pointer, or an operation only the origin may perform.
    #[error("PointerError: {0}")]
    Pointer(String),
    /// Rejected by an allow / expose policy.
    #[error("PermissionError: {0}")]
    Permission(String),
    /// `THROW_ERROR`, or a fault received from a remote endpoint.
    #[error("{0}")]
    Thrown(Fault),
    #[error(transparent)]
    Malformed(#[from] MalformedBlockError),
    /// Operation not valid in the scope's current state.
    #[error("RuntimeError: scope is {0:?}")]
    InvalidState(ScopeState),
    #[error("RuntimeError: {0}")]
    Runtime(String),
}

impl EvalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Type(_) => ErrorKind::Type,
            Self::Value(_) => ErrorKind::Value,
            Self::Reference(_) => ErrorKind::Reference,
            Self::Pointer(_) => ErrorKind::Pointer,
            Self::Permission(_) => ErrorKind::Permission,
            Self::Thrown(fault) => fault.kind,
            Self::Malformed(_) => ErrorKind::Malformed,
            Self::InvalidState(_) | Self::Runtime(_) => ErrorKind::Runtime,
        }
    }

    /// The fault sent back to a requester.
    pub fn to_fault(&self) -> Fault {
        match self {
            Self::Thrown(fault) => fault.clone(),
            Self::Malformed(err) => Fault::new(ErrorKind::Malformed, err.to_string()),
            Self::Type(msg)
            | Self::Value(msg)
            | Self::Reference(msg)
            | Self::Pointer(msg)
            | Self::Permission(msg)
            | Self::Runtime(msg) => Fault::new(self.kind(), msg.clone()),
            Self::InvalidState(state) => Fault::new(self.kind(), format!("scope is {state:?}")),
        }
    }
}

impl From<Fault> for EvalError {
    fn from(fault: Fault) -> Self {
        Self::Thrown(fault)
    }
}

/// Result alias for evaluator operations.
pub type EvalResult<T> = Result<T, EvalError>;
