//! Tokenizer tests: literals, sigiled names, operators, comments, error
//! recovery and determinism.

use datex_lexer::{tokenize, TokenKind};
use datex_types::{Endpoint, ErrorCode, SourceFile};
use pretty_assertions::assert_eq;

// ─────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────

/// Token kinds of `source`, excluding the final Eof.
fn kinds(source: &str) -> Vec<TokenKind> {
    let sf = SourceFile::new("<script>", source);
    tokenize(&sf)
        .tokens
        .into_iter()
        .map(|t| t.kind)
        .filter(|k| *k != TokenKind::Eof)
        .collect()
}

fn error_codes(source: &str) -> Vec<ErrorCode> {
    let sf = SourceFile::new("<script>", source);
    tokenize(&sf).errors.errors.iter().map(|e| e.code).collect()
}

// ─────────────────────────────────────────────────────────────────────
// Numbers
// ─────────────────────────────────────────────────────────────────────

#[test]
fn test_integers() {
    assert_eq!(
        kinds("0 42 0xff 9223372036854775807"),
        vec![
            TokenKind::Int(0),
            TokenKind::Int(42),
            TokenKind::Int(255),
            TokenKind::Int(i64::MAX),
        ]
    );
}

#[test]
fn test_integer_overflow_is_reported() {
    assert_eq!(
        error_codes("9223372036854775809"),
        vec![ErrorCode::INTEGER_OUT_OF_RANGE]
    );
}

#[test]
fn test_int_min_magnitude_is_left_to_the_parser() {
    assert!(error_codes("-9223372036854775808").is_empty());
    assert_eq!(
        kinds("-9223372036854775808"),
        vec![TokenKind::Minus, TokenKind::IntLimit]
    );
}

#[test]
fn test_floats() {
    assert_eq!(
        kinds("1.5 2e3 1e-7 2.5E+2"),
        vec![
            TokenKind::Float(1.5),
            TokenKind::Float(2000.0),
            TokenKind::Float(1e-7),
            TokenKind::Float(250.0),
        ]
    );
    assert_eq!(kinds("infinity"), vec![TokenKind::Float(f64::INFINITY)]);
    assert!(matches!(kinds("nan")[0], TokenKind::Float(x) if x.is_nan()));
}

#[test]
fn test_fraction_without_whitespace() {
    assert_eq!(
        kinds("1/3"),
        vec![TokenKind::Fraction {
            numerator: 1,
            denominator: 3
        }]
    );
}

#[test]
fn test_spaced_slash_is_division() {
    assert_eq!(
        kinds("1 / 3"),
        vec![TokenKind::Int(1), TokenKind::Slash, TokenKind::Int(3)]
    );
}

#[test]
fn test_zero_denominator_fraction() {
    assert_eq!(error_codes("1/0"), vec![ErrorCode::ZERO_DENOMINATOR]);
}

#[test]
fn test_child_index_chain_is_not_a_float() {
    assert_eq!(
        kinds("a.0.1"),
        vec![
            TokenKind::Identifier("a".into()),
            TokenKind::Dot,
            TokenKind::Int(0),
            TokenKind::Dot,
            TokenKind::Int(1),
        ]
    );
}

// ─────────────────────────────────────────────────────────────────────
// Text & buffers
// ─────────────────────────────────────────────────────────────────────

#[test]
fn test_text_quotes_and_escapes() {
    assert_eq!(
        kinds(r#""a\"b" 'c\'d' "\n\t\x41\u{1F600}""#),
        vec![
            TokenKind::Text("a\"b".into()),
            TokenKind::Text("c'd".into()),
            TokenKind::Text("\n\tA\u{1F600}".into()),
        ]
    );
}

#[test]
fn test_unterminated_text() {
    assert_eq!(error_codes("\"abc"), vec![ErrorCode::UNTERMINATED_STRING]);
}

#[test]
fn test_invalid_escape() {
    assert_eq!(error_codes(r#""\q""#), vec![ErrorCode::INVALID_ESCAPE]);
}

#[test]
fn test_buffers() {
    assert_eq!(
        kinds("`00ff10` ``"),
        vec![
            TokenKind::Buffer(vec![0x00, 0xff, 0x10]),
            TokenKind::Buffer(vec![])
        ]
    );
    assert_eq!(error_codes("`abc`"), vec![ErrorCode::INVALID_BUFFER]);
}

// ─────────────────────────────────────────────────────────────────────
// Sigiled names
// ─────────────────────────────────────────────────────────────────────

#[test]
fn test_endpoints() {
    assert_eq!(
        kinds("@bob @+unyt @bob/phone @bob/*"),
        vec![
            TokenKind::Endpoint(Endpoint::person("bob")),
            TokenKind::Endpoint(Endpoint::institution("unyt")),
            TokenKind::Endpoint(Endpoint::person("bob").with_instance("phone")),
            TokenKind::Endpoint(Endpoint::person("bob").any_instance()),
        ]
    );
}

#[test]
fn test_id_endpoint() {
    let toks = kinds("@@000000010203040506070809");
    let TokenKind::Endpoint(endpoint) = &toks[0] else {
        panic!("expected endpoint, got {toks:?}");
    };
    assert_eq!(endpoint.alias(), None);
    assert_eq!(endpoint.to_string(), "@@000000010203040506070809");
}

#[test]
fn test_invalid_endpoint() {
    assert_eq!(error_codes("@@abc"), vec![ErrorCode::INVALID_ENDPOINT]);
}

#[test]
fn test_pointers_and_create_pointer() {
    let id = "01".to_string() + &"ab".repeat(20);
    let toks = kinds(&format!("${id} $$"));
    assert!(matches!(&toks[0], TokenKind::Pointer(p) if p.to_hex() == id));
    assert_eq!(toks[1], TokenKind::DollarDollar);
    assert_eq!(error_codes("$abcd"), vec![ErrorCode::INVALID_POINTER_ID]);
}

#[test]
fn test_internal_vars_and_placeholders() {
    assert_eq!(
        kinds("#sender #tmp_1 ? ?2"),
        vec![
            TokenKind::InternalVar("sender".into()),
            TokenKind::InternalVar("tmp_1".into()),
            TokenKind::Placeholder(None),
            TokenKind::Placeholder(Some(2)),
        ]
    );
}

#[test]
fn test_type_tags_and_less_than() {
    assert_eq!(
        kinds("<Int> a < b <= c"),
        vec![
            TokenKind::TypeTag("Int".into()),
            TokenKind::Identifier("a".into()),
            TokenKind::Less,
            TokenKind::Identifier("b".into()),
            TokenKind::LessEq,
            TokenKind::Identifier("c".into()),
        ]
    );
}

#[test]
fn test_keywords() {
    assert_eq!(
        kinds("true false null void subscribe value count type"),
        vec![
            TokenKind::True,
            TokenKind::False,
            TokenKind::Null,
            TokenKind::Void,
            TokenKind::Subscribe,
            TokenKind::Value,
            TokenKind::Count,
            TokenKind::Type,
        ]
    );
}

// ─────────────────────────────────────────────────────────────────────
// Operators & punctuation
// ─────────────────────────────────────────────────────────────────────

#[test]
fn test_comparison_operators() {
    assert_eq!(
        kinds("== === ~= ~== ~ = >="),
        vec![
            TokenKind::EqEq,
            TokenKind::EqEqEq,
            TokenKind::TildeEq,
            TokenKind::TildeEqEq,
            TokenKind::Tilde,
            TokenKind::Eq,
            TokenKind::GreaterEq,
        ]
    );
}

#[test]
fn test_assignment_operators() {
    assert_eq!(
        kinds("+= -= *= /="),
        vec![
            TokenKind::PlusEq,
            TokenKind::MinusEq,
            TokenKind::StarEq,
            TokenKind::SlashEq,
        ]
    );
}

#[test]
fn test_remote_call_tokens() {
    assert_eq!(
        kinds("@bob :: (1; 2)"),
        vec![
            TokenKind::Endpoint(Endpoint::person("bob")),
            TokenKind::ColonColon,
            TokenKind::LParen,
            TokenKind::Int(1),
            TokenKind::Semicolon,
            TokenKind::Int(2),
            TokenKind::RParen,
        ]
    );
}

// ─────────────────────────────────────────────────────────────────────
// Comments & recovery
// ─────────────────────────────────────────────────────────────────────

#[test]
fn test_comments_are_skipped() {
    assert_eq!(
        kinds("1 // one\n/* two\n lines */ + 2"),
        vec![TokenKind::Int(1), TokenKind::Plus, TokenKind::Int(2)]
    );
}

#[test]
fn test_unterminated_block_comment() {
    assert_eq!(error_codes("1 /* never"), vec![ErrorCode::UNCLOSED_DELIMITER]);
}

#[test]
fn test_unexpected_character_recovers() {
    assert_eq!(kinds("1 ^ 2"), vec![TokenKind::Int(1), TokenKind::Int(2)]);
    assert_eq!(error_codes("1 ^ 2 ^"), vec![
        ErrorCode::UNEXPECTED_CHARACTER,
        ErrorCode::UNEXPECTED_CHARACTER
    ]);
}

#[test]
fn test_error_cap() {
    let source = "^".repeat(50);
    let sf = SourceFile::new("<script>", source);
    let result = tokenize(&sf);
    assert_eq!(result.errors.errors.len(), datex_types::MAX_ERRORS);
    assert_eq!(result.tokens.last().map(|t| &t.kind), Some(&TokenKind::Eof));
}

#[test]
fn test_lexer_determinism_100_iterations() {
    let source = "x = [1, 2/3, 'a']; @bob/* :: x.0 + ?";
    let first = kinds(source);
    for i in 0..100 {
        assert_eq!(first, kinds(source), "determinism failure at iteration {i}");
    }
}
