//! DATEX runtime: runs scopes on behalf of a local endpoint and talks to
//! other endpoints through a [`Transport`].
//!
//! - remote calls park the calling scope under `(sid, return_index)` and
//!   resume it when the RESPONSE arrives, or fail it on timeout;
//! - inbound blocks are verified, decrypted and dispatched by block type,
//!   or relayed with their ttl lowered when they are for someone else;
//! - pointer updates produced by a scope are sent as DATA blocks to the
//!   pointer's subscribers (at the origin) or to its origin (at a replica).

pub mod config;
pub mod context;
pub mod error;
pub mod pending;
pub mod router;
pub mod runtime;
pub mod transport;

pub use config::{ConfigStore, EndpointConfig, JsonFileStore, MemoryConfigStore, RuntimeConfig};
pub use context::RuntimeContext;
pub use error::{RuntimeError, RuntimeResult};
pub use pending::{PendingCall, PendingCalls};
pub use router::{FloodFilter, Route, RoutingTable};
pub use runtime::{Runtime, WeakRuntime};
pub use transport::{MemoryNetwork, SentBlock, Transport};
