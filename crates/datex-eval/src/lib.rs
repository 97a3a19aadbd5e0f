//! DATEX scope execution.
//!
//! Runs DXB bodies on an operand stack. A scope moves through
//! `Initialized → Running → Completed | Faulted | Suspended`; a suspended
//! scope waits for the result of a remote call and is resumed by the
//! runtime. Pointer mutations are applied immediately and queued as
//! [`Propagation`]s for the runtime to send.

pub mod env;
pub mod error;
pub mod interpreter;
pub mod ops;
pub mod pointer;
pub mod scope;

pub use env::{Environment, ExecutionContext};
pub use error::{EvalError, EvalResult};
pub use interpreter::{Interpreter, RemoteCall, ScopeState, Step};
pub use pointer::{apply_delta, PointerOptions, PointerStore, Propagation};
pub use scope::Scope;
