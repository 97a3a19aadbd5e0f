//! Compiler error types.

use datex_codegen::CodegenError;
use datex_types::{AddressError, CompileErrors, MalformedBlockError};
use thiserror::Error;

/// Errors of the full compile pipeline.
#[derive(Debug, Error)]
pub enum CompilerError {
    /// Syntax or data diagnostics, with positions in the script.
    #[error("CompileError: {0}")]
    Diagnostics(CompileErrors),

    #[error(transparent)]
    Codegen(#[from] CodegenError),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Malformed(#[from] MalformedBlockError),
}

/// The receivers of a block cannot be determined or encoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// The target clause resolved to no endpoint.
    #[error("RoutingError: '{0}' resolves to no receivers")]
    NoReceivers(String),

    /// Only LOCAL blocks may omit their receivers.
    #[error("RoutingError: {0} block without receivers")]
    MissingReceivers(&'static str),

    #[error("RoutingError: ttl must be at least 1")]
    ZeroTtl,

    /// A receiver or sender has no id endpoint bound.
    #[error("RoutingError: no id endpoint bound for {0}")]
    Unbound(String),

    #[error("RoutingError: too many receivers ({0})")]
    TooManyReceivers(usize),

    #[error("RoutingError: return index exhausted for sid {0}")]
    ReturnIndexExhausted(u32),

    #[error("RoutingError: {0}")]
    Address(#[from] AddressError),
}

/// Missing or invalid key material, or a block that fails authentication.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("CryptoError: no local keys, create or import them first")]
    MissingOwnKeys,

    #[error("CryptoError: no public keys registered for {0}")]
    MissingPeerKeys(String),

    #[error("CryptoError: a signed block needs a sender")]
    AnonymousSigner,

    #[error("CryptoError: invalid key material: {0}")]
    InvalidKey(String),

    #[error("CryptoError: signature verification failed")]
    BadSignature,

    #[error("CryptoError: block is not encrypted for this endpoint")]
    NotAReceiver,

    #[error("CryptoError: decryption failed")]
    Decrypt,

    #[error("CryptoError: encryption failed")]
    Encrypt,

    #[error("CryptoError: flood blocks cannot be encrypted")]
    FloodEncrypted,
}

/// Compiler result type alias.
pub type CompilerResult<T> = Result<T, CompilerError>;

pub type CryptoResult<T> = Result<T, CryptoError>;
