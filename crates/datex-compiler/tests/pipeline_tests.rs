//! End-to-end pipeline tests: script → body → block → decompiled text.
//!
//! Covers receiver resolution, ttl handling, flood blocks, signing and
//! encryption with their key requirements, diagnostics and the
//! serializable compile result.

use datex_codegen::DataPlacement;
use datex_compiler::header::{decrement_ttl, read_ttl, FLAG_FLOOD};
use datex_compiler::{
    compile, compile_body, compile_to_result, decompile, open_block, verify_block, Block,
    BlockType, CompileOptions, CompileResult, CompilerError, CryptoError, KeyStore, Receivers,
    RoutingError, SidAllocator,
};
use datex_types::{Endpoint, EndpointRegistry, ErrorCode, IdEndpoint, TargetClause, Value};
use pretty_assertions::assert_eq;

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

fn id(byte: u8) -> IdEndpoint {
    IdEndpoint::from_bytes([byte; 12])
}

fn endpoint(byte: u8) -> Endpoint {
    Endpoint::from_id(id(byte))
}

fn request<'a>(to: impl Into<TargetClause>) -> CompileOptions<'a> {
    CompileOptions {
        from: Some(endpoint(1)),
        to: Some(to.into()),
        sid: 42,
        timestamp: Some(1_700_000_000_000),
        ..CompileOptions::default()
    }
}

fn decoded(bytes: &[u8]) -> Block {
    Block::decode(bytes).expect("block should decode")
}

// ══════════════════════════════════════════════════════════════════════════════
// 1. Bodies
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn addition_body_decompiles_to_addition() {
    let body = compile_body("1 + 2", &[], DataPlacement::Inline).unwrap();
    assert_eq!(decompile(&body, false, false).unwrap(), "1 + 2");
}

#[test]
fn fractions_stay_exact_through_the_pipeline() {
    let body = compile_body("1/3 + ?", &[Value::text("x")], DataPlacement::Inline).unwrap();
    assert_eq!(decompile(&body, false, false).unwrap(), "1/3 + \"x\"");
}

#[test]
fn syntax_errors_are_diagnostics() {
    let err = compile_body("1 +", &[], DataPlacement::Inline).unwrap_err();
    match err {
        CompilerError::Diagnostics(errors) => assert!(errors.has_errors()),
        other => panic!("expected diagnostics, got {other:?}"),
    }
}

#[test]
fn missing_data_has_a_position() {
    let err = compile_body("1;\n?", &[], DataPlacement::Inline).unwrap_err();
    let CompilerError::Diagnostics(errors) = err else {
        panic!("expected diagnostics");
    };
    let first = errors.first().unwrap();
    assert_eq!(first.code, ErrorCode::MISSING_DATA);
    assert_eq!(first.span.start_line, 2);
    assert_eq!(first.source_line, "?");
}

#[test]
fn compile_result_serializes() {
    let ok = compile_to_result("x = 1; x", &[]);
    assert!(ok.success);
    assert_eq!(ok.body_hash.as_ref().map(String::len), Some(64));

    let failed = compile_to_result("(1", &[]);
    assert!(!failed.success);
    assert!(failed.body.is_none());

    let json = serde_json::to_string(&failed).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed["success"], false);
    assert!(parsed["errors"]["total_errors"].as_u64().unwrap() > 0);

    let rt: CompileResult = serde_json::from_str(&serde_json::to_string(&ok).unwrap()).unwrap();
    assert_eq!(rt.body, ok.body);
}

// ══════════════════════════════════════════════════════════════════════════════
// 2. Receivers and routing
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn block_carries_header_and_body() {
    let bytes = compile("1 + 2", &[], &request(endpoint(2))).unwrap();
    let block = decoded(&bytes);
    assert_eq!(block.header.block_type, BlockType::Request);
    assert_eq!(block.header.sid, 42);
    assert_eq!(block.header.sender, Some(endpoint(1)));
    assert_eq!(block.header.receivers.endpoints(), vec![endpoint(2)]);
    assert_eq!(block.header.ttl, 64);

    let text = decompile(&bytes, false, false).unwrap();
    let mut lines = text.lines();
    assert!(lines.next().unwrap().starts_with("// REQUEST sid=42 return_index=0"));
    assert_eq!(lines.next(), Some("1 + 2"));
}

#[test]
fn empty_receiver_set_is_a_routing_error() {
    // ~@a over an empty universe selects nobody
    let clause = TargetClause::from(endpoint(2)).negate();
    let err = compile("1", &[], &request(clause)).unwrap_err();
    assert!(matches!(err, CompilerError::Routing(RoutingError::NoReceivers(_))));

    let mut registry = EndpointRegistry::new();
    registry.add_known(endpoint(2));
    let options = CompileOptions {
        registry: Some(&registry),
        ..request(TargetClause::from(endpoint(2)).and(endpoint(3).into()))
    };
    assert!(matches!(
        compile("1", &[], &options),
        Err(CompilerError::Routing(RoutingError::NoReceivers(_)))
    ));
}

#[test]
fn non_local_block_needs_receivers() {
    let options = CompileOptions {
        to: None,
        ..request(endpoint(2))
    };
    assert!(matches!(
        compile("1", &[], &options),
        Err(CompilerError::Routing(RoutingError::MissingReceivers("REQUEST")))
    ));
    assert!(compile("1", &[], &CompileOptions::local(1)).is_ok());
}

#[test]
fn aliases_resolve_through_the_registry() {
    let bob = Endpoint::person("bob");
    let clause = TargetClause::from(bob.clone()).or(endpoint(3).into());
    assert!(matches!(
        compile("1", &[], &request(clause.clone())),
        Err(CompilerError::Routing(RoutingError::Unbound(_)))
    ));

    let mut registry = EndpointRegistry::new();
    registry.bind(&bob, id(2)).unwrap();
    let options = CompileOptions {
        registry: Some(&registry),
        ..request(clause)
    };
    let block = decoded(&compile("1", &[], &options).unwrap());
    assert_eq!(block.header.receivers.endpoints(), vec![endpoint(2), endpoint(3)]);
}

#[test]
fn instances_survive_the_header() {
    let phone = endpoint(2).with_instance("phone");
    let block = decoded(&compile("1", &[], &request(phone.clone())).unwrap());
    assert_eq!(block.header.receivers.endpoints(), vec![phone]);
}

#[test]
fn zero_ttl_is_rejected() {
    let options = CompileOptions {
        ttl: 0,
        ..request(endpoint(2))
    };
    assert!(matches!(
        compile("1", &[], &options),
        Err(CompilerError::Routing(RoutingError::ZeroTtl))
    ));
}

#[test]
fn relays_decrement_ttl_in_place() {
    let options = CompileOptions {
        ttl: 2,
        ..request(endpoint(2))
    };
    let mut bytes = compile("1", &[], &options).unwrap();
    assert_eq!(read_ttl(&bytes).unwrap(), 2);
    assert_eq!(decrement_ttl(&mut bytes).unwrap(), 1);
    assert_eq!(decoded(&bytes).header.ttl, 1);
}

#[test]
fn flood_blocks_carry_the_marker() {
    let options = CompileOptions {
        flood: true,
        block_type: BlockType::Hello,
        ..request(endpoint(2))
    };
    let bytes = compile("void", &[], &options).unwrap();
    assert_ne!(bytes[3] & FLAG_FLOOD, 0);
    assert_eq!(decoded(&bytes).header.receivers, Receivers::Flood);
}

// ══════════════════════════════════════════════════════════════════════════════
// 3. Signing and encryption
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn signed_blocks_verify() {
    let keys = KeyStore::new();
    let public = keys.create_own_keys();
    keys.register_peer(id(1), public);
    let options = CompileOptions {
        sign: true,
        keys: Some(&keys),
        ..request(endpoint(2))
    };
    let mut bytes = compile("'hello'", &[], &options).unwrap();
    let block = decoded(&bytes);
    assert!(block.header.is_signed());
    verify_block(&block, &keys).unwrap();

    // relays may rewrite ttl without breaking the signature
    decrement_ttl(&mut bytes).unwrap();
    verify_block(&decoded(&bytes), &keys).unwrap();

    let mut tampered = decoded(&bytes);
    tampered.header.sid += 1;
    assert!(matches!(
        verify_block(&tampered, &keys),
        Err(CompilerError::Crypto(CryptoError::BadSignature))
    ));
}

#[test]
fn signing_without_keys_is_a_crypto_error() {
    let options = CompileOptions {
        sign: true,
        ..request(endpoint(2))
    };
    assert!(matches!(
        compile("1", &[], &options),
        Err(CompilerError::Crypto(CryptoError::MissingOwnKeys))
    ));

    let empty = KeyStore::new();
    let options = CompileOptions {
        sign: true,
        keys: Some(&empty),
        ..request(endpoint(2))
    };
    assert!(matches!(
        compile("1", &[], &options),
        Err(CompilerError::Crypto(CryptoError::MissingOwnKeys))
    ));
}

#[test]
fn anonymous_blocks_cannot_be_signed() {
    let keys = KeyStore::new();
    keys.create_own_keys();
    let options = CompileOptions {
        from: None,
        sign: true,
        keys: Some(&keys),
        ..request(endpoint(2))
    };
    assert!(matches!(
        compile("1", &[], &options),
        Err(CompilerError::Crypto(CryptoError::AnonymousSigner))
    ));
}

#[test]
fn encrypted_blocks_open_only_for_receivers() {
    let sender_keys = KeyStore::new();
    let receiver_keys = KeyStore::new();
    let bystander_keys = KeyStore::new();
    sender_keys.register_peer(id(2), receiver_keys.create_own_keys());
    sender_keys.register_peer(id(3), bystander_keys.create_own_keys());

    let options = CompileOptions {
        encrypt: true,
        keys: Some(&sender_keys),
        ..request(endpoint(2))
    };
    let bytes = compile("'secret' + 1", &[], &options).unwrap();
    let block = decoded(&bytes);
    assert!(block.header.is_encrypted());
    assert!(!block.body.windows(6).any(|w| w == b"secret"));
    assert!(decompile(&bytes, false, false).unwrap().contains("encrypted body"));

    let body = open_block(&block, id(2), &receiver_keys).unwrap();
    assert_eq!(decompile(&body, false, false).unwrap(), "\"secret\" + 1");
    assert_eq!(
        open_block(&block, id(3), &bystander_keys),
        Err(CryptoError::NotAReceiver)
    );
}

#[test]
fn encrypting_for_unknown_receiver_is_a_crypto_error() {
    let keys = KeyStore::new();
    keys.create_own_keys();
    let options = CompileOptions {
        encrypt: true,
        keys: Some(&keys),
        ..request(endpoint(2))
    };
    assert!(matches!(
        compile("1", &[], &options),
        Err(CompilerError::Crypto(CryptoError::MissingPeerKeys(_)))
    ));
}

#[test]
fn signed_and_encrypted_block() {
    let sender_keys = KeyStore::new();
    let receiver_keys = KeyStore::new();
    let sender_public = sender_keys.create_own_keys();
    sender_keys.register_peer(id(2), receiver_keys.create_own_keys());
    receiver_keys.register_peer(id(1), sender_public);

    let options = CompileOptions {
        sign: true,
        encrypt: true,
        keys: Some(&sender_keys),
        ..request(endpoint(2))
    };
    let block = decoded(&compile("[1, 2/3]", &[], &options).unwrap());
    verify_block(&block, &receiver_keys).unwrap();
    let body = open_block(&block, id(2), &receiver_keys).unwrap();
    assert_eq!(decompile(&body, false, false).unwrap(), "[1, 2/3]");
}

// ══════════════════════════════════════════════════════════════════════════════
// 4. Conversations
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn return_indices_increase_within_a_sid() {
    let sids = SidAllocator::starting_at(100);
    let conversation = sids.conversation();
    let mut seen = Vec::new();
    for _ in 0..5 {
        let options = CompileOptions {
            sid: conversation.sid(),
            return_index: conversation.next_return_index().unwrap(),
            ..request(endpoint(2))
        };
        seen.push(decoded(&compile("1", &[], &options).unwrap()).header.return_index);
    }
    assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    assert_ne!(sids.allocate(), conversation.sid());
}

#[test]
fn compilation_is_deterministic_100_iterations() {
    let options = request(endpoint(2));
    let first = compile("x = {a: [1, 2/3]}; @@020202020202020202020202 :: x", &[], &options).unwrap();
    for i in 0..100 {
        let again = compile("x = {a: [1, 2/3]}; @@020202020202020202020202 :: x", &[], &options).unwrap();
        assert_eq!(first, again, "determinism failure at iteration {i}");
    }
}
