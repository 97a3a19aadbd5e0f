//! DATEX compiler: orchestrates the full compilation pipeline.
//!
//! ```text
//! script → Lexer → Parser → Body emitter → Header (+ signature, encryption) → DXB block
//! ```
//!
//! [`compile_body`] stops after the emitter; [`compile`] produces a complete
//! block ready for a transport. [`decompile`] accepts either.

pub mod crypto;
pub mod error;
pub mod header;
pub mod options;
pub mod sid;

use std::time::{SystemTime, UNIX_EPOCH};

use datex_codegen::{decompile_body, emit_body, CodegenError, DataPlacement, DecompileOptions};
use datex_parser::parse_script;
use datex_types::address::Instance;
use datex_types::{
    CompileErrors, DatexError, Endpoint, EndpointRegistry, ErrorCode, IdEndpoint, SourceFile,
    Span, Value,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

pub use crypto::{ExportedKeys, KeySet, KeyStore, PublicKeys};
pub use error::{CompilerError, CompilerResult, CryptoError, CryptoResult, RoutingError};
pub use header::{Block, BlockHeader, BlockType, ReceiverEntry, Receivers, DEFAULT_TTL};
pub use options::CompileOptions;
pub use sid::{Conversation, SidAllocator};

/// Name under which inline scripts appear in diagnostics.
pub const SCRIPT_NAME: &str = "<script>";

/// Outcome of a body compilation as a serializable record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileResult {
    pub success: bool,
    pub body: Option<Vec<u8>>,
    /// SHA-256 of the body, hex-encoded.
    pub body_hash: Option<String>,
    pub errors: CompileErrors,
}

// ══════════════════════════════════════════════════════════════════════════════
// Bodies
// ══════════════════════════════════════════════════════════════════════════════

/// Compile `script` to a DXB body. `data` fills the `?` placeholders.
pub fn compile_body(
    script: &str,
    data: &[Value],
    placement: DataPlacement,
) -> CompilerResult<Vec<u8>> {
    let source = SourceFile::new(SCRIPT_NAME, script);
    let parsed = parse_script(&source);
    let ast = match parsed.script {
        Some(ast) if !parsed.errors.has_errors() => ast,
        _ => return Err(CompilerError::Diagnostics(parsed.errors)),
    };
    emit_body(&ast, data, placement).map_err(|err| codegen_diagnostic(&source, err))
}

/// Like [`compile_body`] with inlined data, reporting through a
/// [`CompileResult`] instead of an error.
pub fn compile_to_result(script: &str, data: &[Value]) -> CompileResult {
    match compile_body(script, data, DataPlacement::Inline) {
        Ok(body) => CompileResult {
            success: true,
            body_hash: Some(hex::encode(Sha256::digest(&body))),
            body: Some(body),
            errors: CompileErrors::empty(),
        },
        Err(err) => {
            let errors = match err {
                CompilerError::Diagnostics(errors) => errors,
                other => {
                    let mut errors = CompileErrors::empty();
                    errors.push_error(DatexError::new(
                        SCRIPT_NAME,
                        ErrorCode::BODY_TOO_LARGE,
                        other.to_string(),
                        Span::synthetic(),
                        "",
                    ));
                    errors
                }
            };
            CompileResult {
                success: false,
                body: None,
                body_hash: None,
                errors,
            }
        }
    }
}

fn codegen_diagnostic(source: &SourceFile, err: CodegenError) -> CompilerError {
    let (code, message, span) = match &err {
        CodegenError::MissingData { index, span } => (
            ErrorCode::MISSING_DATA,
            format!("no data supplied for placeholder ?{index}"),
            *span,
        ),
        CodegenError::ZeroDenominator { span } => (
            ErrorCode::ZERO_DENOMINATOR,
            "fraction with zero denominator".to_string(),
            *span,
        ),
        _ => return CompilerError::Codegen(err),
    };
    let line = source.line(span.start_line).unwrap_or("");
    let mut errors = CompileErrors::empty();
    errors.push_error(DatexError::new(&source.name, code, message, span, line));
    CompilerError::Diagnostics(errors)
}

// ══════════════════════════════════════════════════════════════════════════════
// Blocks
// ══════════════════════════════════════════════════════════════════════════════

/// Compile `script` into a complete DXB block. Data is always inlined.
pub fn compile(script: &str, data: &[Value], options: &CompileOptions<'_>) -> CompilerResult<Vec<u8>> {
    if options.ttl == 0 {
        return Err(RoutingError::ZeroTtl.into());
    }
    let body = compile_body(script, data, DataPlacement::Inline)?;
    compile_block(body, options)
}

/// Frame an already emitted body with a header built from `options`.
pub fn compile_block(body: Vec<u8>, options: &CompileOptions<'_>) -> CompilerResult<Vec<u8>> {
    if options.ttl == 0 {
        return Err(RoutingError::ZeroTtl.into());
    }
    let mut header = BlockHeader::new(options.block_type, options.sid);
    header.return_index = options.return_index;
    header.inc = options.inc;
    header.executable = options.executable;
    header.end_of_scope = options.end_of_scope;
    header.ttl = options.ttl;
    header.priority = options.priority;
    header.timestamp = options.timestamp.unwrap_or_else(now_millis);
    header.sender = options
        .from
        .as_ref()
        .map(|from| id_form(from, options.registry))
        .transpose()?;
    header.receivers = resolve_receivers(options)?;

    let mut block = Block::new(header, body);
    if options.encrypt {
        encrypt(&mut block, options)?;
    }
    if options.sign {
        if block.header.sender.is_none() {
            return Err(CryptoError::AnonymousSigner.into());
        }
        let keys = options.keys.ok_or(CryptoError::MissingOwnKeys)?;
        // the signature field is excluded from its own payload
        let signature = keys.sign(&block.signed_payload()?)?;
        block.header.signature = Some(signature);
    }

    let bytes = block.encode()?;
    debug!(
        sid = block.header.sid,
        return_index = block.header.return_index,
        block_type = %block.header.block_type,
        receivers = block.header.receivers.endpoints().len(),
        len = bytes.len(),
        "compiled block"
    );
    Ok(bytes)
}

fn resolve_receivers(options: &CompileOptions<'_>) -> CompilerResult<Receivers> {
    if options.flood {
        return Ok(Receivers::Flood);
    }
    let Some(clause) = &options.to else {
        if options.block_type == BlockType::Local {
            return Ok(Receivers::List(Vec::new()));
        }
        return Err(RoutingError::MissingReceivers(options.block_type.name()).into());
    };
    let endpoints: Vec<Endpoint> = match options.registry {
        Some(registry) => registry.resolve(clause),
        None => clause.resolve(&[]).into_iter().collect(),
    };
    if endpoints.is_empty() {
        return Err(RoutingError::NoReceivers(clause.to_string()).into());
    }
    let mut entries: Vec<ReceiverEntry> = Vec::with_capacity(endpoints.len());
    for endpoint in &endpoints {
        let bound = id_form(endpoint, options.registry)?;
        if !entries.iter().any(|e| e.endpoint == bound) {
            entries.push(ReceiverEntry::new(bound));
        }
    }
    Ok(Receivers::List(entries))
}

/// `endpoint` as its `@@id`, keeping the instance.
fn id_form(endpoint: &Endpoint, registry: Option<&EndpointRegistry>) -> Result<Endpoint, RoutingError> {
    let id = endpoint
        .id_endpoint()
        .or_else(|| registry.and_then(|r| r.lookup(endpoint)))
        .ok_or_else(|| RoutingError::Unbound(endpoint.to_string()))?;
    let base = Endpoint::from_id(id);
    Ok(match endpoint.instance() {
        Instance::Main => base,
        Instance::Named(name) => base.with_instance(name.clone()),
        Instance::Any => base.any_instance(),
    })
}

fn encrypt(block: &mut Block, options: &CompileOptions<'_>) -> CompilerResult<()> {
    let keys = options.keys.ok_or(CryptoError::MissingOwnKeys)?;
    let entries = match &mut block.header.receivers {
        Receivers::Flood => return Err(CryptoError::FloodEncrypted.into()),
        Receivers::List(entries) if entries.is_empty() => {
            return Err(RoutingError::MissingReceivers(options.block_type.name()).into())
        }
        Receivers::List(entries) => entries,
    };
    let sealed = crypto::seal_body(&block.body)?;
    for entry in entries.iter_mut() {
        let id = entry
            .endpoint
            .id_endpoint()
            .ok_or_else(|| RoutingError::Unbound(entry.endpoint.to_string()))?;
        let public = keys
            .peer(id)
            .ok_or_else(|| CryptoError::MissingPeerKeys(entry.endpoint.to_string()))?;
        entry.wrapped_key = Some(crypto::wrap_key(&sealed.key, &public)?);
    }
    block.header.body_nonce = Some(sealed.nonce);
    block.body = sealed.ciphertext;
    Ok(())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ══════════════════════════════════════════════════════════════════════════════
// Receiving side
// ══════════════════════════════════════════════════════════════════════════════

/// Check the signature of a signed block. Unsigned blocks pass.
pub fn verify_block(block: &Block, keys: &KeyStore) -> CompilerResult<()> {
    let Some(signature) = &block.header.signature else {
        return Ok(());
    };
    let signer = block
        .header
        .sender
        .as_ref()
        .and_then(Endpoint::id_endpoint)
        .ok_or(CryptoError::AnonymousSigner)?;
    keys.verify(signer, &block.signed_payload()?, signature)?;
    Ok(())
}

/// Plain body of `block` as seen by the endpoint `own`.
pub fn open_block(block: &Block, own: IdEndpoint, keys: &KeyStore) -> CryptoResult<Vec<u8>> {
    let Some(nonce) = &block.header.body_nonce else {
        return Ok(block.body.clone());
    };
    let wrapped = block
        .header
        .receivers
        .entry_for(own)
        .and_then(|entry| entry.wrapped_key.as_ref())
        .ok_or(CryptoError::NotAReceiver)?;
    let key = keys.unwrap_key(wrapped)?;
    crypto::open_body(&block.body, nonce, &key)
}

/// Render a body or a full block as script text.
///
/// A block gets a `//` comment line describing its header. Encrypted bodies
/// are not opened.
pub fn decompile(
    dxb: &[u8],
    formatted: bool,
    colorized: bool,
) -> Result<String, datex_types::MalformedBlockError> {
    let options = DecompileOptions {
        formatted,
        colorized,
    };
    if !header::is_block(dxb) {
        return decompile_body(dxb, options);
    }
    let block = Block::decode(dxb)?;
    let body = if block.header.is_encrypted() {
        format!("/* encrypted body, {} bytes */", block.body.len())
    } else {
        decompile_body(&block.body, options)?
    };
    Ok(format!("// {}\n{body}", block.header))
}
