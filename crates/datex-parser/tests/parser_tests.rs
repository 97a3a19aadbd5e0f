//! Parser tests: precedence, remote calls, assignment targets, parentheses,
//! placeholders, error recovery and nesting limits.

use datex_parser::{parse_script, ParseResult, MAX_NESTING};
use datex_types::ast::*;
use datex_types::{Endpoint, ErrorCode, SourceFile};
use pretty_assertions::assert_eq;

// ─────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────

fn parse(source: &str) -> ParseResult {
    let sf = SourceFile::new("<script>", source);
    parse_script(&sf)
}

/// Parse `source`, panicking with the diagnostics on failure.
fn parse_ok(source: &str) -> Script {
    let result = parse(source);
    if result.errors.has_errors() {
        for e in &result.errors.errors {
            eprintln!("  ERROR: {e}");
        }
        panic!("unexpected parse errors for {source:?}");
    }
    result.script.expect("no script returned")
}

/// The single statement of `source`.
fn expr(source: &str) -> ExprKind {
    let script = parse_ok(source);
    assert_eq!(script.statements.len(), 1, "expected one statement");
    script.statements.into_iter().next().unwrap().kind
}

fn error_codes(source: &str) -> Vec<ErrorCode> {
    parse(source).errors.errors.iter().map(|e| e.code).collect()
}

/// Compact prefix rendering used to compare tree shapes.
fn shape(kind: &ExprKind) -> String {
    match kind {
        ExprKind::Int(i) => i.to_string(),
        ExprKind::Variable(name) => name.clone(),
        ExprKind::Text(text) => format!("{text:?}"),
        ExprKind::Endpoint(endpoint) => endpoint.to_string(),
        ExprKind::Binary { left, op, right } => {
            format!("({} {} {})", op.symbol(), shape(&left.kind), shape(&right.kind))
        }
        ExprKind::Unary { op, operand } => {
            format!("({}{})", op.symbol().trim(), shape(&operand.kind))
        }
        ExprKind::Member { object, key } => {
            format!("(. {} {})", shape(&object.kind), shape(&key.kind))
        }
        ExprKind::Remote { target, body } => {
            format!("(:: {} {})", shape(&target.kind), shape(&body.kind))
        }
        ExprKind::Scope(statements) => {
            let inner: Vec<_> = statements.iter().map(|s| shape(&s.kind)).collect();
            format!("(scope {})", inner.join(" "))
        }
        other => format!("{other:?}"),
    }
}

fn shape_of(source: &str) -> String {
    shape(&expr(source))
}

// ─────────────────────────────────────────────────────────────────────
// Precedence
// ─────────────────────────────────────────────────────────────────────

#[test]
fn test_factor_binds_tighter_than_term() {
    assert_eq!(shape_of("1 + 2 * 3"), "(+ 1 (* 2 3))");
    assert_eq!(shape_of("(1 + 2) * 3"), "(* (+ 1 2) 3)");
}

#[test]
fn test_term_is_left_associative() {
    assert_eq!(shape_of("1 - 2 - 3"), "(- (- 1 2) 3)");
}

#[test]
fn test_comparison_below_term() {
    assert_eq!(shape_of("a + 1 == b"), "(== (+ a 1) b)");
    assert_eq!(shape_of("a ~== b"), "(~== a b)");
}

#[test]
fn test_and_binds_tighter_than_or() {
    assert_eq!(shape_of("@a | @b & @c"), "(| @a (& @b @c))");
}

#[test]
fn test_not_and_child_access() {
    assert_eq!(shape_of("~@c"), "(~@c)");
    assert_eq!(shape_of("-a.b"), "(-(. a \"b\"))");
}

#[test]
fn test_chained_comparison_is_rejected() {
    assert_eq!(error_codes("a < b < c"), vec![ErrorCode::UNEXPECTED_TOKEN]);
}

#[test]
fn test_negative_literals_are_folded() {
    assert_eq!(expr("-5"), ExprKind::Int(-5));
    assert_eq!(expr("-1.5"), ExprKind::Float(-1.5));
    assert_eq!(
        expr("-1/3"),
        ExprKind::Fraction {
            numerator: -1,
            denominator: 3
        }
    );
}

#[test]
fn test_int_min_literal() {
    assert_eq!(expr("-9223372036854775808"), ExprKind::Int(i64::MIN));
    assert_eq!(shape_of("1 + -9223372036854775808"), format!("(+ 1 {})", i64::MIN));
    assert_eq!(
        error_codes("9223372036854775808"),
        vec![ErrorCode::INTEGER_OUT_OF_RANGE]
    );
}

#[test]
fn test_keyword_prefix_operators() {
    let ExprKind::Unary { op, operand } = expr("count [1, 2]") else {
        panic!("expected unary operator");
    };
    assert_eq!(op, UnaryOp::Count);
    assert!(matches!(operand.kind, ExprKind::Array(ref items) if items.len() == 2));
    assert_eq!(shape_of("subscribe $$ x"), "(subscribe($$x))");
}

// ─────────────────────────────────────────────────────────────────────
// Remote calls
// ─────────────────────────────────────────────────────────────────────

#[test]
fn test_remote_call_binds_below_or() {
    assert_eq!(shape_of("@a | @b :: 1 + 2"), "(:: (| @a @b) (+ 1 2))");
}

#[test]
fn test_remote_call_with_scope_body() {
    assert!(shape_of("@bob :: (x = 1; x + 1)").starts_with("(:: @bob (scope "));
}

#[test]
fn test_remote_body_may_assign() {
    let ExprKind::Remote { body, .. } = expr("@bob :: x = 2") else {
        panic!("expected remote call");
    };
    assert!(matches!(body.kind, ExprKind::Assign { .. }));
}

// ─────────────────────────────────────────────────────────────────────
// Assignment
// ─────────────────────────────────────────────────────────────────────

#[test]
fn test_variable_assignment() {
    let ExprKind::Assign { target, op, value } = expr("x = 1") else {
        panic!("expected assignment");
    };
    assert_eq!(target.root, PlaceRoot::Variable("x".into()));
    assert!(target.path.is_empty());
    assert_eq!(op, None);
    assert_eq!(value.kind, ExprKind::Int(1));
}

#[test]
fn test_child_path_assignment() {
    let ExprKind::Assign { target, op, .. } = expr("#obj.a.0 += 2") else {
        panic!("expected assignment");
    };
    assert_eq!(target.root, PlaceRoot::InternalVar("obj".into()));
    let keys: Vec<_> = target.path.iter().map(|k| k.kind.clone()).collect();
    assert_eq!(keys, vec![ExprKind::Text("a".into()), ExprKind::Int(0)]);
    assert_eq!(op, Some(BinaryOp::Add));
}

#[test]
fn test_assignment_is_right_associative() {
    let ExprKind::Assign { value, .. } = expr("a = b = 3") else {
        panic!("expected assignment");
    };
    assert!(matches!(value.kind, ExprKind::Assign { .. }));
}

#[test]
fn test_pointer_assignment() {
    let id = "01".to_string() + &"0a".repeat(20);
    let ExprKind::Assign { target, .. } = expr(&format!("${id}.name = 'x'")) else {
        panic!("expected assignment");
    };
    assert!(matches!(&target.root, PlaceRoot::Pointer(p) if p.to_hex() == id));
    assert_eq!(target.path.len(), 1);
}

#[test]
fn test_special_variables_are_read_only() {
    assert_eq!(error_codes("#sender = 1"), vec![ErrorCode::READ_ONLY_VARIABLE]);
}

#[test]
fn test_literal_is_not_assignable() {
    assert_eq!(
        error_codes("1 = 2"),
        vec![ErrorCode::INVALID_ASSIGNMENT_TARGET]
    );
}

// ─────────────────────────────────────────────────────────────────────
// Parentheses, collections, placeholders
// ─────────────────────────────────────────────────────────────────────

#[test]
fn test_paren_forms() {
    assert_eq!(expr("()"), ExprKind::Void);
    assert_eq!(expr("(1)"), ExprKind::Int(1));
    assert!(matches!(expr("(1,)"), ExprKind::Tuple(items) if items.len() == 1));
    assert!(matches!(expr("(1, 2, 3)"), ExprKind::Tuple(items) if items.len() == 3));
    assert_eq!(shape_of("(1; 2)"), "(scope 1 2)");
}

#[test]
fn test_objects_accept_keyword_and_text_keys() {
    let ExprKind::Object(entries) = expr("{a: 1, 'b c': 2, type: 3, 4: 5,}") else {
        panic!("expected object");
    };
    let keys: Vec<_> = entries.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, vec!["a", "b c", "type", "4"]);
}

#[test]
fn test_placeholders_are_numbered_in_order() {
    let ExprKind::Array(items) = expr("[?, ?, ?5, ?]") else {
        panic!("expected array");
    };
    let indices: Vec<_> = items
        .iter()
        .map(|i| match i.kind {
            ExprKind::Placeholder(n) => n,
            _ => panic!("expected placeholder"),
        })
        .collect();
    assert_eq!(indices, vec![0, 1, 5, 6]);
}

#[test]
fn test_special_and_internal_vars() {
    assert_eq!(expr("#sender"), ExprKind::Special(SpecialVar::Sender));
    assert_eq!(expr("#tmp"), ExprKind::InternalVar("tmp".into()));
}

#[test]
fn test_endpoint_literal() {
    assert_eq!(
        expr("@bob/phone"),
        ExprKind::Endpoint(Endpoint::person("bob").with_instance("phone"))
    );
}

#[test]
fn test_return_and_timeout() {
    assert_eq!(expr("return"), ExprKind::Return(None));
    assert!(matches!(expr("return 1"), ExprKind::Return(Some(_))));
    assert!(matches!(expr("timeout 500"), ExprKind::Timeout(_)));
}

// ─────────────────────────────────────────────────────────────────────
// Statements & recovery
// ─────────────────────────────────────────────────────────────────────

#[test]
fn test_statements_and_empty_script() {
    assert_eq!(parse_ok("x = 1; x + 1;;").statements.len(), 2);
    assert!(parse_ok("").statements.is_empty());
    assert!(parse_ok("// just a comment").statements.is_empty());
}

#[test]
fn test_missing_semicolon_is_reported() {
    assert_eq!(error_codes("1 2"), vec![ErrorCode::UNEXPECTED_TOKEN]);
}

#[test]
fn test_recovers_after_bad_statement() {
    let result = parse("1 +; 2 +; 3");
    assert_eq!(result.errors.total_errors, 2);
    assert!(result.script.is_none());
}

#[test]
fn test_unclosed_paren() {
    assert_eq!(error_codes("(1; 2"), vec![ErrorCode::UNCLOSED_DELIMITER]);
}

#[test]
fn test_stray_close_paren() {
    assert_eq!(error_codes("1; ) 2"), vec![ErrorCode::UNEXPECTED_TOKEN]);
}

#[test]
fn test_lexer_errors_come_first() {
    let codes = error_codes("\"open; 1 +");
    assert_eq!(codes.first(), Some(&ErrorCode::UNTERMINATED_STRING));
}

#[test]
fn test_nesting_limit() {
    let depth = MAX_NESTING as usize + 8;
    let source = format!("{}1{}", "[".repeat(depth), "]".repeat(depth));
    assert!(error_codes(&source).contains(&ErrorCode::NESTING_TOO_DEEP));

    let ok = format!("{}1{}", "[".repeat(10), "]".repeat(10));
    assert!(parse(&ok).script.is_some());
}

#[test]
fn test_parser_determinism_100_iterations() {
    let source = "x = {a: [1, 2/3]}; @a | @b :: (x.a.0 + ?; #sender)";
    let first = parse_ok(source);
    for i in 0..100 {
        assert_eq!(first, parse_ok(source), "determinism failure at iteration {i}");
    }
}
