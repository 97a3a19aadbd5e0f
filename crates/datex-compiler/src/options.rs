//! Compile options: everything the header needs besides the body.

use datex_types::{Endpoint, EndpointRegistry, TargetClause};

use crate::crypto::KeyStore;
use crate::header::{BlockType, DEFAULT_TTL};

/// Options for [`crate::compile`].
///
/// Borrowed collaborators (`registry`, `keys`) are only needed when the
/// block names aliased endpoints or asks for signing / encryption.
#[derive(Debug, Clone)]
pub struct CompileOptions<'a> {
    pub from: Option<Endpoint>,
    pub to: Option<TargetClause>,
    pub block_type: BlockType,
    pub sid: u32,
    pub return_index: u16,
    pub inc: u16,
    pub end_of_scope: bool,
    pub executable: bool,
    pub sign: bool,
    pub encrypt: bool,
    /// Broadcast to every reachable endpoint; `to` is ignored.
    pub flood: bool,
    pub ttl: u8,
    pub priority: u8,
    /// Milliseconds since the epoch; the current time when `None`.
    pub timestamp: Option<u64>,
    pub registry: Option<&'a EndpointRegistry>,
    pub keys: Option<&'a KeyStore>,
}

impl Default for CompileOptions<'_> {
    fn default() -> Self {
        Self {
            from: None,
            to: None,
            block_type: BlockType::Request,
            sid: 0,
            return_index: 0,
            inc: 0,
            end_of_scope: true,
            executable: true,
            sign: false,
            encrypt: false,
            flood: false,
            ttl: DEFAULT_TTL,
            priority: 0,
            timestamp: None,
            registry: None,
            keys: None,
        }
    }
}

impl<'a> CompileOptions<'a> {
    /// A LOCAL block: no receivers, executed in-process.
    pub fn local(sid: u32) -> Self {
        Self {
            block_type: BlockType::Local,
            sid,
            ..Self::default()
        }
    }

    pub fn to(mut self, clause: impl Into<TargetClause>) -> Self {
        self.to = Some(clause.into());
        self
    }

    pub fn from(mut self, sender: Endpoint) -> Self {
        self.from = Some(sender);
        self
    }
}
