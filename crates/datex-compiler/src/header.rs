//! DXB block framing: the routing header in front of every body.
//!
//! # Layout (little-endian)
//!
//! ```text
//! magic 0x01 0x64 | version u8 | flags u8 | sid u32 | return_index u16 | inc u16
//! sender:    0x00 | 0x01 id[12] inst_len u8 inst
//! receivers: count u16 (0xFFFF = flood), count x (id[12] inst_len u8 inst [key 104])
//! type u8 | ttl u8 | priority u8 | timestamp u64
//! [signature 64] [body nonce 24] | body_len u32 | body
//! ```
//!
//! Relays rewrite `ttl`, `priority` and the receivers section, so those are
//! excluded from the signed payload.

use std::fmt;

use datex_types::address::Instance;
use datex_types::{Endpoint, IdEndpoint, MalformedBlockError, ID_ENDPOINT_LEN};
use serde::{Deserialize, Serialize};

use crate::error::{CompilerResult, RoutingError};

pub const MAGIC: [u8; 2] = [0x01, 0x64];
pub const VERSION: u8 = 1;
pub const DEFAULT_TTL: u8 = 64;

/// Receiver count announcing a flood block.
pub const FLOOD_MARKER: u16 = 0xFFFF;

pub const SIGNATURE_LEN: usize = 64;
pub const NONCE_LEN: usize = 24;
/// Per-receiver key wrap: ephemeral x25519 key, nonce, sealed body key.
pub const WRAPPED_KEY_LEN: usize = 32 + NONCE_LEN + 48;

pub const FLAG_SIGNED: u8 = 0x01;
pub const FLAG_ENCRYPTED: u8 = 0x02;
pub const FLAG_EXECUTABLE: u8 = 0x04;
pub const FLAG_END_OF_SCOPE: u8 = 0x08;
pub const FLAG_FLOOD: u8 = 0x10;
const KNOWN_FLAGS: u8 = 0x1f;

/// Offset of the sender section.
const SENDER_OFFSET: usize = 12;

pub type ReadResult<T> = Result<T, MalformedBlockError>;

// ══════════════════════════════════════════════════════════════════════════════
// Block types
// ══════════════════════════════════════════════════════════════════════════════

/// What the receiver is expected to do with a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BlockType {
    Request = 0,
    Response = 1,
    Data = 2,
    Transaction = 3,
    Local = 4,
    Hello = 6,
    Debugger = 7,
}

impl BlockType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Self::Request,
            1 => Self::Response,
            2 => Self::Data,
            3 => Self::Transaction,
            4 => Self::Local,
            6 => Self::Hello,
            7 => Self::Debugger,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Request => "REQUEST",
            Self::Response => "RESPONSE",
            Self::Data => "DATA",
            Self::Transaction => "TRANSACTION",
            Self::Local => "LOCAL",
            Self::Hello => "HELLO",
            Self::Debugger => "DEBUGGER",
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Header
// ══════════════════════════════════════════════════════════════════════════════

/// One entry of the receivers section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverEntry {
    /// Always an id endpoint, possibly narrowed to an instance.
    pub endpoint: Endpoint,
    /// Body key sealed for this receiver, present on encrypted blocks.
    pub wrapped_key: Option<[u8; WRAPPED_KEY_LEN]>,
}

impl ReceiverEntry {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            wrapped_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Receivers {
    /// Delivered to every reachable endpoint.
    Flood,
    List(Vec<ReceiverEntry>),
}

impl Receivers {
    pub fn is_flood(&self) -> bool {
        matches!(self, Self::Flood)
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        match self {
            Self::Flood => Vec::new(),
            Self::List(entries) => entries.iter().map(|e| e.endpoint.clone()).collect(),
        }
    }

    /// The entry addressed to `id`, if any.
    pub fn entry_for(&self, id: IdEndpoint) -> Option<&ReceiverEntry> {
        match self {
            Self::Flood => None,
            Self::List(entries) => entries
                .iter()
                .find(|e| e.endpoint.id_endpoint() == Some(id)),
        }
    }
}

/// Decoded routing header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u8,
    pub block_type: BlockType,
    pub sid: u32,
    pub return_index: u16,
    pub inc: u16,
    pub executable: bool,
    pub end_of_scope: bool,
    /// `None` for anonymous blocks.
    pub sender: Option<Endpoint>,
    pub receivers: Receivers,
    pub ttl: u8,
    pub priority: u8,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub signature: Option<[u8; SIGNATURE_LEN]>,
    /// Present exactly when the body is encrypted.
    pub body_nonce: Option<[u8; NONCE_LEN]>,
}

impl BlockHeader {
    pub fn new(block_type: BlockType, sid: u32) -> Self {
        Self {
            version: VERSION,
            block_type,
            sid,
            return_index: 0,
            inc: 0,
            executable: true,
            end_of_scope: true,
            sender: None,
            receivers: Receivers::List(Vec::new()),
            ttl: DEFAULT_TTL,
            priority: 0,
            timestamp: 0,
            signature: None,
            body_nonce: None,
        }
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    pub fn is_encrypted(&self) -> bool {
        self.body_nonce.is_some()
    }

    pub fn is_flood(&self) -> bool {
        self.receivers.is_flood()
    }

    pub fn flags(&self) -> u8 {
        let mut flags = 0;
        for (set, flag) in [
            (self.is_signed(), FLAG_SIGNED),
            (self.is_encrypted(), FLAG_ENCRYPTED),
            (self.executable, FLAG_EXECUTABLE),
            (self.end_of_scope, FLAG_END_OF_SCOPE),
            (self.is_flood(), FLAG_FLOOD),
        ] {
            if set {
                flags |= flag;
            }
        }
        flags
    }
}

impl fmt::Display for BlockHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sid={} return_index={} inc={}",
            self.block_type, self.sid, self.return_index, self.inc
        )?;
        match &self.sender {
            Some(sender) => write!(f, " from {sender}")?,
            None => f.write_str(" from anonymous")?,
        }
        match &self.receivers {
            Receivers::Flood => f.write_str(" to *")?,
            Receivers::List(entries) if entries.is_empty() => {}
            Receivers::List(entries) => {
                f.write_str(" to ")?;
                for (i, entry) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", entry.endpoint)?;
                }
            }
        }
        write!(f, " ttl={} prio={}", self.ttl, self.priority)?;
        let marks: Vec<&str> = [
            (self.is_signed(), "signed"),
            (self.is_encrypted(), "encrypted"),
            (!self.executable, "data-only"),
            (!self.end_of_scope, "partial"),
        ]
        .into_iter()
        .filter_map(|(set, mark)| set.then_some(mark))
        .collect();
        if !marks.is_empty() {
            write!(f, " [{}]", marks.join(", "))?;
        }
        Ok(())
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Block
// ══════════════════════════════════════════════════════════════════════════════

/// A header and its (possibly encrypted) body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub body: Vec<u8>,
}

impl Block {
    pub fn new(header: BlockHeader, body: Vec<u8>) -> Self {
        Self { header, body }
    }

    pub fn encode(&self) -> CompilerResult<Vec<u8>> {
        let header = &self.header;
        let mut out = Vec::with_capacity(64 + self.body.len());
        write_preamble(&mut out, header)?;
        write_receivers(&mut out, &header.receivers)?;
        out.extend_from_slice(&[header.block_type as u8, header.ttl, header.priority]);
        out.extend_from_slice(&header.timestamp.to_le_bytes());
        if let Some(signature) = &header.signature {
            out.extend_from_slice(signature);
        }
        write_body(&mut out, header, &self.body)?;
        Ok(out)
    }

    /// Bytes covered by the signature.
    pub fn signed_payload(&self) -> CompilerResult<Vec<u8>> {
        let header = &self.header;
        let mut out = Vec::with_capacity(32 + self.body.len());
        write_preamble(&mut out, header)?;
        out.push(header.block_type as u8);
        out.extend_from_slice(&header.timestamp.to_le_bytes());
        write_body(&mut out, header, &self.body)?;
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> ReadResult<Self> {
        let mut cursor = Cursor::new(bytes);
        let fixed = read_fixed(&mut cursor)?;
        let sender = read_sender(&mut cursor)?;
        let receivers = read_receivers(&mut cursor, &fixed)?;

        let type_offset = cursor.pos;
        let block_type = BlockType::from_byte(cursor.u8()?).ok_or_else(|| {
            MalformedBlockError::new(type_offset, format!("unknown block type 0x{:02x}", bytes[type_offset]))
        })?;
        let ttl = cursor.u8()?;
        let priority = cursor.u8()?;
        let timestamp = cursor.u64()?;
        let signature = if fixed.flags & FLAG_SIGNED != 0 {
            Some(cursor.array::<SIGNATURE_LEN>()?)
        } else {
            None
        };
        let body_nonce = if fixed.flags & FLAG_ENCRYPTED != 0 {
            Some(cursor.array::<NONCE_LEN>()?)
        } else {
            None
        };
        let len = cursor.u32()? as usize;
        let body = cursor.take(len)?.to_vec();
        if !cursor.is_at_end() {
            return Err(MalformedBlockError::new(cursor.pos, "trailing bytes after body"));
        }

        Ok(Self {
            header: BlockHeader {
                version: fixed.version,
                block_type,
                sid: fixed.sid,
                return_index: fixed.return_index,
                inc: fixed.inc,
                executable: fixed.flags & FLAG_EXECUTABLE != 0,
                end_of_scope: fixed.flags & FLAG_END_OF_SCOPE != 0,
                sender,
                receivers,
                ttl,
                priority,
                timestamp,
                signature,
                body_nonce,
            },
            body,
        })
    }
}

/// Whether `bytes` start like a DXB block rather than a bare body.
pub fn is_block(bytes: &[u8]) -> bool {
    bytes.starts_with(&MAGIC)
}

/// Current ttl of an encoded block.
pub fn read_ttl(bytes: &[u8]) -> ReadResult<u8> {
    let offset = ttl_offset(bytes)?;
    Ok(bytes[offset])
}

/// Decrement the ttl of an encoded block in place and return the new value.
pub fn decrement_ttl(bytes: &mut [u8]) -> ReadResult<u8> {
    let offset = ttl_offset(bytes)?;
    let ttl = bytes[offset].saturating_sub(1);
    bytes[offset] = ttl;
    Ok(ttl)
}

fn ttl_offset(bytes: &[u8]) -> ReadResult<usize> {
    let mut cursor = Cursor::new(bytes);
    let fixed = read_fixed(&mut cursor)?;
    read_sender(&mut cursor)?;
    read_receivers(&mut cursor, &fixed)?;
    // type byte, then ttl
    let offset = cursor.pos + 1;
    if offset >= bytes.len() {
        return Err(MalformedBlockError::new(bytes.len(), "truncated header"));
    }
    Ok(offset)
}

// ── Writing ──────────────────────────────────────────────────────────────────

fn write_preamble(out: &mut Vec<u8>, header: &BlockHeader) -> CompilerResult<()> {
    out.extend_from_slice(&MAGIC);
    out.push(header.version);
    out.push(header.flags());
    out.extend_from_slice(&header.sid.to_le_bytes());
    out.extend_from_slice(&header.return_index.to_le_bytes());
    out.extend_from_slice(&header.inc.to_le_bytes());
    match &header.sender {
        None => out.push(0),
        Some(sender) => {
            out.push(1);
            write_endpoint(out, sender)?;
        }
    }
    Ok(())
}

fn write_receivers(out: &mut Vec<u8>, receivers: &Receivers) -> CompilerResult<()> {
    let entries = match receivers {
        Receivers::Flood => {
            out.extend_from_slice(&FLOOD_MARKER.to_le_bytes());
            return Ok(());
        }
        Receivers::List(entries) => entries,
    };
    let count = u16::try_from(entries.len())
        .ok()
        .filter(|&count| count != FLOOD_MARKER)
        .ok_or(RoutingError::TooManyReceivers(entries.len()))?;
    out.extend_from_slice(&count.to_le_bytes());
    for entry in entries {
        write_endpoint(out, &entry.endpoint)?;
        if let Some(key) = &entry.wrapped_key {
            out.extend_from_slice(key);
        }
    }
    Ok(())
}

fn write_body(out: &mut Vec<u8>, header: &BlockHeader, body: &[u8]) -> CompilerResult<()> {
    if let Some(nonce) = &header.body_nonce {
        out.extend_from_slice(nonce);
    }
    let len = u32::try_from(body.len())
        .map_err(|_| datex_codegen::CodegenError::BodyTooLarge(body.len()))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(body);
    Ok(())
}

fn write_endpoint(out: &mut Vec<u8>, endpoint: &Endpoint) -> CompilerResult<()> {
    let id = endpoint
        .id_endpoint()
        .ok_or_else(|| RoutingError::Unbound(endpoint.to_string()))?;
    out.extend_from_slice(id.as_bytes());
    let instance = match endpoint.instance() {
        Instance::Main => "",
        Instance::Named(name) => name.as_str(),
        Instance::Any => "*",
    };
    let len = u8::try_from(instance.len()).map_err(|_| datex_codegen::CodegenError::NameTooLong {
        name: instance.to_string(),
        len: instance.len(),
    })?;
    out.push(len);
    out.extend_from_slice(instance.as_bytes());
    Ok(())
}

// ── Reading ──────────────────────────────────────────────────────────────────

struct Fixed {
    version: u8,
    flags: u8,
    sid: u32,
    return_index: u16,
    inc: u16,
}

fn read_fixed(cursor: &mut Cursor<'_>) -> ReadResult<Fixed> {
    if cursor.take(2)? != MAGIC {
        return Err(MalformedBlockError::new(0, "missing DXB magic"));
    }
    let version = cursor.u8()?;
    if version != VERSION {
        return Err(MalformedBlockError::new(2, format!("unsupported version {version}")));
    }
    let flags = cursor.u8()?;
    if flags & !KNOWN_FLAGS != 0 {
        return Err(MalformedBlockError::new(3, format!("unknown flags 0x{flags:02x}")));
    }
    let fixed = Fixed {
        version,
        flags,
        sid: cursor.u32()?,
        return_index: cursor.u16()?,
        inc: cursor.u16()?,
    };
    debug_assert_eq!(cursor.pos, SENDER_OFFSET);
    Ok(fixed)
}

fn read_sender(cursor: &mut Cursor<'_>) -> ReadResult<Option<Endpoint>> {
    let offset = cursor.pos;
    match cursor.u8()? {
        0 => Ok(None),
        1 => read_endpoint(cursor).map(Some),
        other => Err(MalformedBlockError::new(
            offset,
            format!("invalid sender marker 0x{other:02x}"),
        )),
    }
}

fn read_receivers(cursor: &mut Cursor<'_>, fixed: &Fixed) -> ReadResult<Receivers> {
    let offset = cursor.pos;
    let count = cursor.u16()?;
    let flood = fixed.flags & FLAG_FLOOD != 0;
    if flood != (count == FLOOD_MARKER) {
        return Err(MalformedBlockError::new(offset, "flood flag and receiver marker disagree"));
    }
    if flood {
        return Ok(Receivers::Flood);
    }
    let encrypted = fixed.flags & FLAG_ENCRYPTED != 0;
    let mut entries = Vec::with_capacity(usize::from(count).min(256));
    for _ in 0..count {
        let endpoint = read_endpoint(cursor)?;
        let wrapped_key = if encrypted {
            Some(cursor.array::<WRAPPED_KEY_LEN>()?)
        } else {
            None
        };
        entries.push(ReceiverEntry {
            endpoint,
            wrapped_key,
        });
    }
    Ok(Receivers::List(entries))
}

fn read_endpoint(cursor: &mut Cursor<'_>) -> ReadResult<Endpoint> {
    let id = IdEndpoint::from_bytes(cursor.array::<ID_ENDPOINT_LEN>()?);
    let len_offset = cursor.pos;
    let len = usize::from(cursor.u8()?);
    let raw = cursor.take(len)?;
    let instance = std::str::from_utf8(raw)
        .map_err(|_| MalformedBlockError::new(len_offset + 1, "instance name is not UTF-8"))?;
    let endpoint = Endpoint::from_id(id);
    Ok(match instance {
        "" => endpoint,
        "*" => endpoint.any_instance(),
        name => endpoint.with_instance(name),
    })
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn take(&mut self, n: usize) -> ReadResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| MalformedBlockError::new(self.pos, "truncated block"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> ReadResult<[u8; N]> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.take(N)?);
        Ok(array)
    }

    fn u8(&mut self) -> ReadResult<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> ReadResult<u16> {
        self.array().map(u16::from_le_bytes)
    }

    fn u32(&mut self) -> ReadResult<u32> {
        self.array().map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> ReadResult<u64> {
        self.array().map(u64::from_le_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> IdEndpoint {
        IdEndpoint::from_bytes([byte; ID_ENDPOINT_LEN])
    }

    fn sample() -> Block {
        let mut header = BlockHeader::new(BlockType::Request, 7);
        header.return_index = 2;
        header.sender = Some(Endpoint::from_id(id(1)).with_instance("laptop"));
        header.receivers = Receivers::List(vec![
            ReceiverEntry::new(Endpoint::from_id(id(2))),
            ReceiverEntry::new(Endpoint::from_id(id(3)).any_instance()),
        ]);
        header.timestamp = 1_700_000_000_000;
        Block::new(header, vec![0xc1, 3, 0xa0])
    }

    #[test]
    fn encode_decode() {
        let block = sample();
        let bytes = block.encode().unwrap();
        assert!(is_block(&bytes));
        assert_eq!(bytes[3], FLAG_EXECUTABLE | FLAG_END_OF_SCOPE);
        assert_eq!(Block::decode(&bytes).unwrap(), block);
    }

    #[test]
    fn ttl_patch_keeps_everything_else() {
        let block = sample();
        let mut bytes = block.encode().unwrap();
        assert_eq!(read_ttl(&bytes).unwrap(), DEFAULT_TTL);
        assert_eq!(decrement_ttl(&mut bytes).unwrap(), DEFAULT_TTL - 1);
        let decoded = Block::decode(&bytes).unwrap();
        assert_eq!(decoded.header.ttl, DEFAULT_TTL - 1);
        assert_eq!(decoded.body, block.body);
        assert_eq!(decoded.signed_payload().unwrap(), block.signed_payload().unwrap());
    }

    #[test]
    fn flood_marker() {
        let mut block = sample();
        block.header.receivers = Receivers::Flood;
        let bytes = block.encode().unwrap();
        assert_ne!(bytes[3] & FLAG_FLOOD, 0);
        assert!(Block::decode(&bytes).unwrap().header.is_flood());
    }

    #[test]
    fn unbound_sender_is_rejected() {
        let mut block = sample();
        block.header.sender = Some(Endpoint::person("bob"));
        assert!(block.encode().is_err());
    }

    #[test]
    fn malformed_inputs() {
        let bytes = sample().encode().unwrap();
        for cut in [0, 1, 5, 13, 20, bytes.len() - 1] {
            assert!(Block::decode(&bytes[..cut]).is_err(), "cut at {cut}");
        }
        let mut trailing = bytes.clone();
        trailing.push(0);
        assert!(Block::decode(&trailing).is_err());
        let mut unknown_type = bytes.clone();
        let type_offset = ttl_offset(&bytes).unwrap() - 1;
        unknown_type[type_offset] = 5;
        assert_eq!(
            Block::decode(&unknown_type).unwrap_err().offset,
            type_offset
        );
    }

    #[test]
    fn header_display() {
        let text = sample().header.to_string();
        assert!(text.starts_with("REQUEST sid=7 return_index=2 inc=0 from @@0101"), "{text}");
        assert!(text.ends_with("ttl=64 prio=0"), "{text}");
    }
}
