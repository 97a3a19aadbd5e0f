//! Runtime error types.

use datex_codegen::CodegenError;
use datex_compiler::{CompilerError, CryptoError, RoutingError};
use datex_eval::EvalError;
use datex_types::{AddressError, ErrorKind, Fault, MalformedBlockError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Compiler(#[from] CompilerError),

    #[error(transparent)]
    Codegen(#[from] CodegenError),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error(transparent)]
    Malformed(#[from] MalformedBlockError),

    /// Fault answered by the remote endpoint.
    #[error("{0}")]
    Remote(Fault),

    /// No RESPONSE within the call's timeout. The parked call is gone.
    #[error("TimeoutError: no response for sid {sid} return_index {return_index} within {ms} ms")]
    Timeout { sid: u32, return_index: u16, ms: u64 },

    /// The parked call was released before its response arrived.
    #[error("RuntimeError: call cancelled")]
    Cancelled,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RuntimeError {
    /// The fault sent back to a requester whose request failed with this.
    pub fn to_fault(&self) -> Fault {
        match self {
            Self::Remote(fault) => fault.clone(),
            Self::Eval(err) => err.to_fault(),
            Self::Timeout { .. } => Fault::new(ErrorKind::Timeout, self.to_string()),
            Self::Routing(_) | Self::Address(_) | Self::Compiler(CompilerError::Routing(_)) => {
                Fault::new(ErrorKind::Routing, self.to_string())
            }
            Self::Crypto(_) | Self::Compiler(CompilerError::Crypto(_)) => {
                Fault::new(ErrorKind::Crypto, self.to_string())
            }
            Self::Malformed(_) | Self::Compiler(CompilerError::Malformed(_)) => {
                Fault::new(ErrorKind::Malformed, self.to_string())
            }
            Self::Compiler(CompilerError::Diagnostics(_)) => {
                Fault::new(ErrorKind::Compile, self.to_string())
            }
            _ => Fault::new(ErrorKind::Runtime, self.to_string()),
        }
    }
}

/// Result alias for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
