use std::collections::BTreeMap;
use std::sync::Arc;

use datex_codegen::{decompile_body, fault_body, DataPlacement, DecompileOptions, Delta};
use datex_compiler::compile_body;
use datex_eval::{
    EvalError, ExecutionContext, Interpreter, PointerOptions, PointerStore, ScopeState, Scope,
    Step,
};
use datex_types::{Endpoint, ErrorKind, Fault, IdEndpoint, PointerId, Rational, TargetClause, Value};
use pretty_assertions::assert_eq;

// ── Helpers ──────────────────────────────────────────────────────────────────

fn id(byte: u8) -> IdEndpoint {
    IdEndpoint::from_bytes([byte; 12])
}

fn endpoint(byte: u8) -> Endpoint {
    Endpoint::from_id(id(byte))
}

fn store(byte: u8) -> Arc<PointerStore> {
    Arc::new(PointerStore::new(id(byte)))
}

/// Context of a scope run at `current` on behalf of `sender`.
fn remote_context(sender: u8, current: u8) -> ExecutionContext {
    ExecutionContext {
        sender: Some(endpoint(sender)),
        ..ExecutionContext::local(endpoint(current))
    }
}

fn eval_with(script: &str, data: Vec<Value>) -> Result<Value, EvalError> {
    let scope = Scope::compile(script, data).expect("script should compile");
    scope
        .execute_local(ExecutionContext::local(endpoint(1)), store(1))
        .map(|(value, _)| value)
}

fn eval(script: &str) -> Result<Value, EvalError> {
    eval_with(script, Vec::new())
}

fn rational(n: i64, d: i64) -> Value {
    Value::from_rational(Rational::new(n, d).unwrap())
}

fn interpreter(script: &str, context: ExecutionContext, pointers: Arc<PointerStore>) -> Interpreter {
    Scope::compile(script, Vec::new())
        .expect("script should compile")
        .interpreter(context, pointers)
}

// ══════════════════════════════════════════════════════════════════════════════
// 1. Arithmetic and values
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn one_plus_two() {
    assert_eq!(eval("1 + 2"), Ok(Value::Int(3)));
}

#[test]
fn empty_script_is_void() {
    assert_eq!(eval(""), Ok(Value::Void));
}

#[test]
fn last_statement_is_the_result() {
    assert_eq!(eval("1; 2; 3"), Ok(Value::Int(3)));
}

#[test]
fn fractions_stay_exact() {
    assert_eq!(eval("1/3 + 1/3"), Ok(rational(2, 3)));
    assert_eq!(eval("1 / 3"), Ok(rational(1, 3)));
    assert_eq!(eval("1/3 * 3"), Ok(Value::Int(1)));
}

#[test]
fn integer_overflow_is_a_value_error() {
    let err = eval("9223372036854775807 + 1").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Value);
}

#[test]
fn division_by_zero_is_a_value_error() {
    assert!(matches!(eval("1 / 0"), Err(EvalError::Value(_))));
    assert!(matches!(eval("1.5 / 0"), Err(EvalError::Value(_))));
}

#[test]
fn text_concatenation() {
    assert_eq!(eval("'n = ' + 1/2"), Ok(Value::text("n = 1/2")));
}

#[test]
fn comparisons() {
    assert_eq!(eval("1 == 1.0"), Ok(Value::Bool(true)));
    assert_eq!(eval("1 === 1.0"), Ok(Value::Bool(false)));
    assert_eq!(eval("1/2 < 0.75"), Ok(Value::Bool(true)));
    assert!(matches!(eval("'a' < 1"), Err(EvalError::Type(_))));
}

#[test]
fn type_and_count() {
    assert_eq!(eval("count [1, 2, 3]"), Ok(Value::Int(3)));
    assert_eq!(eval("type 1/2").unwrap().to_string(), "<Rational>");
}

// ══════════════════════════════════════════════════════════════════════════════
// 2. Variables, scopes and data
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn variables_and_actions() {
    assert_eq!(eval("x = 2; x *= 3; x + 1"), Ok(Value::Int(7)));
    assert_eq!(eval("#n = 1; #n += 1; #n"), Ok(Value::Int(2)));
}

#[test]
fn unknown_variable_is_a_reference_error() {
    assert!(matches!(eval("y + 1"), Err(EvalError::Reference(_))));
}

#[test]
fn subscope_value_and_bindings() {
    assert_eq!(eval("(1; 2) + 1"), Ok(Value::Int(3)));
    // assignment to an outer name updates it
    assert_eq!(eval("x = 1; (x = 2; y = 3); x"), Ok(Value::Int(2)));
    // names created inside a sub-scope end with it
    assert!(matches!(eval("(y = 3); y"), Err(EvalError::Reference(_))));
}

#[test]
fn return_ends_the_whole_body() {
    assert_eq!(eval("(return 5; 6); 7"), Ok(Value::Int(5)));
}

#[test]
fn collections_and_children() {
    let mut expected = BTreeMap::new();
    expected.insert("a".to_string(), Value::Array(vec![Value::Int(1), Value::Int(9)]));
    expected.insert("b".to_string(), Value::text("x"));
    assert_eq!(
        eval("o = {a: [1, 2]}; o.a.1 = 9; o.b = 'x'; o"),
        Ok(Value::Object(expected))
    );
    assert_eq!(eval("[1, 2].5"), Ok(Value::Void));
    assert_eq!(eval("t = (1, 2); t.0"), Ok(Value::Int(1)));
    assert_eq!(eval("o = {n: 1}; o.n += 4"), Ok(Value::Int(5)));
}

#[test]
fn injected_data() {
    assert_eq!(eval_with("? + ?", vec![Value::Int(1), Value::Int(2)]), Ok(Value::Int(3)));
    let items = Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    let scope = Scope::compile("count ?", vec![items]).unwrap();
    // composites are referenced, not copied into the body
    assert_eq!(scope.compiled()[0], 0x5c);
    let (value, _) = scope
        .execute_local(ExecutionContext::local(endpoint(1)), store(1))
        .unwrap();
    assert_eq!(value, Value::Int(3));
}

#[test]
fn special_variables_come_from_the_context() {
    let scope = Scope::compile("[#sender, #current]", Vec::new()).unwrap();
    let (value, _) = scope.execute_local(remote_context(2, 1), store(1)).unwrap();
    assert_eq!(
        value,
        Value::Array(vec![Value::Endpoint(endpoint(2)), Value::Endpoint(endpoint(1))])
    );
}

#[test]
fn scope_decompiles_once() {
    let scope = Scope::compile("x = 1 + 2", Vec::new()).unwrap();
    let first = scope.decompiled().unwrap().to_string();
    assert!(first.contains("1 + 2"), "{first}");
    assert_eq!(scope.decompiled().unwrap(), first);
}

// ══════════════════════════════════════════════════════════════════════════════
// 3. State machine
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn remote_call_suspends_and_resumes() {
    let script = format!("timeout 250; x = {} :: 1 + 1; x * 10", endpoint(2));
    let mut scope = interpreter(&script, ExecutionContext::local(endpoint(1)), store(1));
    assert_eq!(scope.state(), ScopeState::Initialized);

    let Step::Suspended(call) = scope.run().unwrap() else {
        panic!("expected a suspension");
    };
    assert_eq!(scope.state(), ScopeState::Suspended);
    assert_eq!(call.target, TargetClause::Endpoint(endpoint(2)));
    assert_eq!(call.timeout, Some(250));
    assert_eq!(
        call.body,
        compile_body("1 + 1", &[], DataPlacement::Inline).unwrap()
    );

    assert_eq!(scope.resume(Value::Int(2)), Ok(Step::Completed(Value::Int(20))));
    assert_eq!(scope.state(), ScopeState::Completed);
}

#[test]
fn completed_scope_cannot_run_again() {
    let mut scope = interpreter("1", ExecutionContext::local(endpoint(1)), store(1));
    scope.run().unwrap();
    assert_eq!(scope.run(), Err(EvalError::InvalidState(ScopeState::Completed)));
    assert_eq!(
        scope.resume(Value::Void),
        Err(EvalError::InvalidState(ScopeState::Completed))
    );
}

#[test]
fn remote_target_must_be_an_endpoint() {
    let mut scope = interpreter("1 :: 2", ExecutionContext::local(endpoint(1)), store(1));
    assert!(matches!(scope.run(), Err(EvalError::Type(_))));
    assert_eq!(scope.state(), ScopeState::Faulted);
}

#[test]
fn remote_call_outside_a_runtime_fails() {
    let script = format!("{} :: 1", endpoint(2));
    let err = eval(&script).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Runtime);
}

#[test]
fn thrown_fault_rejects_the_scope() {
    let fault = Fault::new(ErrorKind::Permission, "no access");
    let body = fault_body(&fault).unwrap();
    let mut scope = Interpreter::new(
        body.into(),
        Vec::new(),
        ExecutionContext::local(endpoint(1)),
        store(1),
    );
    assert_eq!(scope.run(), Err(EvalError::Thrown(fault)));
    assert_eq!(scope.state(), ScopeState::Faulted);
}

#[test]
fn truncated_body_is_malformed() {
    let mut body = compile_body("1 + 300", &[], DataPlacement::Inline).unwrap();
    body.truncate(3);
    let mut scope = Interpreter::new(
        body.into(),
        Vec::new(),
        ExecutionContext::local(endpoint(1)),
        store(1),
    );
    assert!(matches!(scope.run(), Err(EvalError::Malformed(_))));
}

// ══════════════════════════════════════════════════════════════════════════════
// 4. Pointers
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn pointer_mutation_through_a_variable() {
    assert_eq!(
        eval("p = $$ [1]; p.1 = 2; value p"),
        Ok(Value::Array(vec![Value::Int(1), Value::Int(2)]))
    );
    assert_eq!(eval("p = $$ 1; p + 1"), Ok(Value::Int(2)));
    assert_eq!(eval("p = $$ 1; q = p; p === q"), Ok(Value::Bool(true)));
}

#[test]
fn origin_of_a_pointer() {
    assert_eq!(eval("origin $$ 1"), Ok(Value::Endpoint(endpoint(1))));
}

#[test]
fn delta_goes_to_subscribers_only() {
    // @@01 owns the pointer, @@02 subscribes, @@03 does not
    let origin = store(1);
    let id = origin.create(Value::Int(1), PointerOptions::default());

    let subscribe = Scope::compile(&format!("subscribe {id}"), Vec::new()).unwrap();
    let (initial, _) = subscribe
        .execute_local(remote_context(2, 1), Arc::clone(&origin))
        .unwrap();
    assert_eq!(initial, Value::Int(1));

    let change = Scope::compile(&format!("{id} = 5"), Vec::new()).unwrap();
    let (_, updates) = change
        .execute_local(ExecutionContext::local(endpoint(1)), Arc::clone(&origin))
        .unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].targets, vec![endpoint(2)]);
    assert!(!updates[0].targets.contains(&endpoint(3)));
    assert_eq!(updates[0].delta, Delta::Replace(Value::Int(5)));

    let text = decompile_body(&updates[0].body().unwrap(), DecompileOptions::default()).unwrap();
    assert!(text.contains(&format!("{id} = 5")), "{text}");
}

#[test]
fn origin_does_not_echo_to_the_writer() {
    let origin = store(1);
    let id = origin.create(Value::Int(1), PointerOptions::default());
    origin.subscribe(&id, &endpoint(2)).unwrap();
    origin.subscribe(&id, &endpoint(4)).unwrap();

    let change = Scope::compile(&format!("{id} += 1"), Vec::new()).unwrap();
    let (value, updates) = change
        .execute_local(remote_context(2, 1), Arc::clone(&origin))
        .unwrap();
    assert_eq!(value, Value::Int(2));
    assert_eq!(updates[0].targets, vec![endpoint(4)]);
}

#[test]
fn replica_applies_updates_from_the_origin_without_forwarding() {
    let replica = store(2);
    let id = PointerId::new(id(1), 0, 0);
    replica.insert_replica(id, Value::Int(1)).unwrap();

    let update = Scope::new(
        datex_codegen::delta_body(&id, &Delta::Replace(Value::Int(5))).unwrap(),
        Vec::new(),
    );
    let (_, updates) = update
        .execute_local(remote_context(1, 2), Arc::clone(&replica))
        .unwrap();
    assert!(updates.is_empty());
    assert_eq!(replica.get(&id), Ok(Value::Int(5)));
}

#[test]
fn local_change_on_a_replica_goes_to_the_origin() {
    let replica = store(2);
    let id = PointerId::new(id(1), 0, 0);
    replica
        .insert_replica(id, Value::Object(BTreeMap::new()))
        .unwrap();

    let change = Scope::compile(&format!("{id}.k = 1"), Vec::new()).unwrap();
    let (_, updates) = change
        .execute_local(ExecutionContext::local(endpoint(2)), Arc::clone(&replica))
        .unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].targets, vec![endpoint(1)]);
    assert_eq!(
        updates[0].delta,
        Delta::Set {
            path: vec![Value::text("k")],
            value: Value::Int(1)
        }
    );
}

#[test]
fn third_party_cannot_write_a_replica() {
    let replica = store(2);
    let id = PointerId::new(id(1), 0, 0);
    replica.insert_replica(id, Value::Int(1)).unwrap();

    let change = Scope::compile(&format!("{id} = 9"), Vec::new()).unwrap();
    let err = change
        .execute_local(remote_context(3, 2), Arc::clone(&replica))
        .unwrap_err();
    assert!(matches!(err, EvalError::Permission(_)));
    assert_eq!(replica.get(&id), Ok(Value::Int(1)));
}

#[test]
fn anonymous_pointers_cannot_be_subscribed() {
    let origin = store(1);
    let id = origin.create(
        Value::Int(1),
        PointerOptions {
            anonymous: true,
            allow: None,
        },
    );
    let subscribe = Scope::compile(&format!("subscribe {id}"), Vec::new()).unwrap();
    let err = subscribe
        .execute_local(remote_context(2, 1), Arc::clone(&origin))
        .unwrap_err();
    assert!(matches!(err, EvalError::Permission(_)));

    // changes to an anonymous pointer never leave the endpoint
    let change = Scope::compile(&format!("{id} = 2"), Vec::new()).unwrap();
    let (_, updates) = change
        .execute_local(ExecutionContext::local(endpoint(1)), origin)
        .unwrap();
    assert!(updates.is_empty());
}

#[test]
fn allow_clause_limits_subscribers() {
    let origin = store(1);
    let id = origin.create(
        Value::Int(1),
        PointerOptions {
            anonymous: false,
            allow: Some(TargetClause::Endpoint(endpoint(2))),
        },
    );
    assert!(matches!(
        origin.subscribe(&id, &endpoint(3)),
        Err(EvalError::Permission(_))
    ));
    assert_eq!(origin.subscribe(&id, &endpoint(2)), Ok(Value::Int(1)));
    assert_eq!(origin.subscribers(&id), Ok(vec![endpoint(2)]));
}

#[test]
fn anonymous_pointers_are_hidden_from_remote_scopes() {
    let origin = store(1);
    let id = origin.create(
        Value::Object(BTreeMap::from([("k".to_string(), Value::Int(1))])),
        PointerOptions {
            anonymous: true,
            allow: None,
        },
    );
    for script in [
        format!("{id}"),
        format!("{id}.k"),
        format!("{id} = 2"),
        format!("{id}.k = 2"),
        format!("{id} += 2"),
    ] {
        let scope = Scope::compile(&script, Vec::new()).unwrap();
        let err = scope
            .execute_local(remote_context(2, 1), Arc::clone(&origin))
            .unwrap_err();
        assert!(matches!(err, EvalError::Permission(_)), "{script}: {err}");
    }
    assert_eq!(
        origin.get(&id),
        Ok(Value::Object(BTreeMap::from([("k".to_string(), Value::Int(1))])))
    );

    // the owning endpoint still uses it freely
    let local = Scope::compile(&format!("{id}.k"), Vec::new()).unwrap();
    let (value, _) = local
        .execute_local(ExecutionContext::local(endpoint(1)), origin)
        .unwrap();
    assert_eq!(value, Value::Int(1));
}

#[test]
fn allow_clause_limits_writers() {
    let origin = store(1);
    let id = origin.create(
        Value::Int(1),
        PointerOptions {
            anonymous: false,
            allow: Some(TargetClause::Endpoint(endpoint(2))),
        },
    );
    origin.subscribe(&id, &endpoint(2)).unwrap();

    let change = Scope::compile(&format!("{id} = 99"), Vec::new()).unwrap();
    let err = change
        .execute_local(remote_context(3, 1), Arc::clone(&origin))
        .unwrap_err();
    assert!(matches!(err, EvalError::Permission(_)));
    assert_eq!(origin.get(&id), Ok(Value::Int(1)));

    let (_, updates) = change
        .execute_local(remote_context(2, 1), Arc::clone(&origin))
        .unwrap();
    assert_eq!(origin.get(&id), Ok(Value::Int(99)));
    // the writer is the only subscriber, so nobody else needs the update
    assert!(updates.is_empty());
}

#[test]
fn unsubscribe_and_prune() {
    let origin = store(1);
    let id = origin.create(Value::Int(1), PointerOptions::default());
    origin.subscribe(&id, &endpoint(2)).unwrap();
    origin.subscribe(&id, &endpoint(3)).unwrap();

    let unsubscribe = Scope::compile(&format!("unsubscribe {id}"), Vec::new()).unwrap();
    let (removed, _) = unsubscribe
        .execute_local(remote_context(2, 1), Arc::clone(&origin))
        .unwrap();
    assert_eq!(removed, Value::Bool(true));

    origin.prune_subscriber(&id, &endpoint(3));
    let change = Scope::compile(&format!("{id} = 2"), Vec::new()).unwrap();
    let (_, updates) = change
        .execute_local(ExecutionContext::local(endpoint(1)), origin)
        .unwrap();
    // no subscribers left: nothing to send, not an error
    assert!(updates.is_empty());
}

#[test]
fn only_local_code_deletes() {
    let origin = store(1);
    let id = origin.create(Value::Int(1), PointerOptions::default());
    let delete = Scope::compile(&format!("delete {id}"), Vec::new()).unwrap();
    assert!(matches!(
        delete.execute_local(remote_context(2, 1), Arc::clone(&origin)),
        Err(EvalError::Permission(_))
    ));
    delete
        .execute_local(ExecutionContext::local(endpoint(1)), Arc::clone(&origin))
        .unwrap();
    assert!(!origin.contains(&id));
}

// ══════════════════════════════════════════════════════════════════════════════
// 5. Determinism
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn evaluation_is_deterministic() {
    let script = "x = {a: [1, 2/3]}; x.a.0 += 1/3; (y = x.a; count y) + x.a.0";
    let first = eval(script).unwrap();
    assert_eq!(first, rational(10, 3));
    for i in 0..100 {
        assert_eq!(eval(script).unwrap(), first, "iteration {i} differs");
    }
}
