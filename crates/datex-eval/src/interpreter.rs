//! Resumable stack interpreter for DXB bodies.
//!
//! Bodies are postfix: operands are pushed, operators pop them and push
//! their result. Collections and sub-scopes leave a frame marker on the
//! operand stack until their END instruction collects them.
//!
//! A `REMOTE` instruction suspends the scope. The caller performs the
//! call and hands the result back through [`Interpreter::resume`], which
//! continues right after the `REMOTE` instruction.

use std::collections::BTreeMap;
use std::sync::Arc;

use datex_codegen::{BodyReader, Delta, Instruction};
use datex_types::ast::{BinaryOp, PlaceRoot, UnaryOp};
use datex_types::{Endpoint, MalformedBlockError, PointerId, TargetClause, Value};
use tracing::trace;

use crate::env::{Environment, ExecutionContext};
use crate::error::{EvalError, EvalResult};
use crate::ops;
use crate::pointer::{PointerOptions, PointerStore, Propagation};

/// Lifecycle of one running scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    Initialized,
    Running,
    Completed,
    Faulted,
    /// Waiting for the result of a remote call.
    Suspended,
}

/// A remote call the scope is waiting for.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    pub target: TargetClause,
    /// Self-contained body to run on the receivers.
    pub body: Vec<u8>,
    /// Milliseconds, when set by a `timeout` statement.
    pub timeout: Option<u64>,
}

/// Outcome of running a scope until it stops.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Completed(Value),
    Suspended(RemoteCall),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Array,
    Object,
    Tuple,
    Subscope,
}

#[derive(Debug, Clone)]
enum Entry {
    Value(Value),
    Frame(FrameKind),
}

pub struct Interpreter {
    body: Arc<[u8]>,
    pos: usize,
    state: ScopeState,
    stack: Vec<Entry>,
    /// Last stored value of each open (sub-)scope, outermost first.
    results: Vec<Value>,
    env: Environment,
    context: ExecutionContext,
    pointers: Arc<PointerStore>,
    timeout: Option<u64>,
    propagations: Vec<Propagation>,
}

impl Interpreter {
    pub fn new(
        body: Arc<[u8]>,
        inserted: Vec<Value>,
        context: ExecutionContext,
        pointers: Arc<PointerStore>,
    ) -> Self {
        Self {
            body,
            pos: 0,
            state: ScopeState::Initialized,
            stack: Vec::new(),
            results: vec![Value::Void],
            env: Environment::new(inserted),
            context,
            pointers,
            timeout: None,
            propagations: Vec::new(),
        }
    }

    pub fn state(&self) -> ScopeState {
        self.state
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Remote call timeout set by the body so far.
    pub fn timeout(&self) -> Option<u64> {
        self.timeout
    }

    /// Pointer updates produced since the last call. The caller sends them
    /// when the scope completes or suspends.
    pub fn take_propagations(&mut self) -> Vec<Propagation> {
        std::mem::take(&mut self.propagations)
    }

    /// Start executing the body.
    pub fn run(&mut self) -> EvalResult<Step> {
        if self.state != ScopeState::Initialized {
            return Err(EvalError::InvalidState(self.state));
        }
        self.drive()
    }

    /// Continue a suspended scope with the result of its remote call.
    pub fn resume(&mut self, value: Value) -> EvalResult<Step> {
        if self.state != ScopeState::Suspended {
            return Err(EvalError::InvalidState(self.state));
        }
        self.push(value);
        self.drive()
    }

    /// Fail a suspended scope, e.g. after a timeout or a remote fault.
    pub fn fail(&mut self, error: EvalError) -> EvalError {
        self.state = ScopeState::Faulted;
        error
    }

    fn drive(&mut self) -> EvalResult<Step> {
        self.state = ScopeState::Running;
        let outcome = self.execute();
        self.state = match &outcome {
            Ok(Step::Completed(_)) => ScopeState::Completed,
            Ok(Step::Suspended(_)) => ScopeState::Suspended,
            Err(_) => ScopeState::Faulted,
        };
        outcome
    }

    fn execute(&mut self) -> EvalResult<Step> {
        let body = Arc::clone(&self.body);
        let mut reader = BodyReader::at(&body, self.pos);
        loop {
            let instruction = reader.next_instruction()?;
            self.pos = reader.position();
            let Some(instruction) = instruction else {
                return self.finish();
            };
            trace!(pos = self.pos, ?instruction, "step");
            match instruction {
                Instruction::End => return self.finish(),
                Instruction::Return => {
                    let value = self.pop()?;
                    return Ok(Step::Completed(value));
                }
                Instruction::Remote(sub) => {
                    let target = self.pop()?;
                    let target = ops::as_clause(&target).ok_or_else(|| {
                        EvalError::Type(format!(
                            "remote target must be an endpoint or target clause, got {}",
                            target.std_type().name()
                        ))
                    })?;
                    return Ok(Step::Suspended(RemoteCall {
                        target,
                        body: sub.to_vec(),
                        timeout: self.timeout,
                    }));
                }
                other => self.step(other)?,
            }
        }
    }

    fn finish(&mut self) -> EvalResult<Step> {
        if self.results.len() != 1 || !self.stack.is_empty() {
            return Err(self.malformed("body ends inside an open scope or collection"));
        }
        let value = std::mem::replace(&mut self.results[0], Value::Void);
        Ok(Step::Completed(value))
    }

    fn step(&mut self, instruction: Instruction<'_>) -> EvalResult<()> {
        match instruction {
            Instruction::CloseAndStore => {
                let value = self.pop()?;
                if let Some(slot) = self.results.last_mut() {
                    *slot = value;
                }
            }
            Instruction::SubscopeStart => {
                self.env.push_scope();
                self.stack.push(Entry::Frame(FrameKind::Subscope));
                self.results.push(Value::Void);
            }
            Instruction::SubscopeEnd => {
                self.close_frame(FrameKind::Subscope)?;
                if self.results.len() < 2 {
                    return Err(self.malformed("unbalanced sub-scope end"));
                }
                let value = self.results.pop().unwrap_or(Value::Void);
                self.env.pop_scope();
                self.push(value);
            }
            Instruction::Timeout => {
                let value = self.pop_deref()?;
                self.timeout = match value {
                    Value::Int(ms) if ms >= 0 => Some(ms as u64),
                    other => {
                        return Err(EvalError::Type(format!(
                            "timeout must be a non-negative integer, got {other}"
                        )))
                    }
                };
                self.push(Value::Void);
            }

            Instruction::Literal(value) => self.push(value),
            Instruction::ArrayStart => self.stack.push(Entry::Frame(FrameKind::Array)),
            Instruction::ObjectStart => self.stack.push(Entry::Frame(FrameKind::Object)),
            Instruction::TupleStart => self.stack.push(Entry::Frame(FrameKind::Tuple)),
            Instruction::ArrayEnd => {
                let items = self.close_frame(FrameKind::Array)?;
                self.push(Value::Array(items));
            }
            Instruction::TupleEnd => {
                let items = self.close_frame(FrameKind::Tuple)?;
                self.push(Value::Tuple(items));
            }
            Instruction::ObjectEnd => {
                let items = self.close_frame(FrameKind::Object)?;
                if items.len() % 2 != 0 {
                    return Err(self.malformed("object key without value"));
                }
                let mut entries = BTreeMap::new();
                let mut items = items.into_iter();
                while let (Some(key), Some(value)) = (items.next(), items.next()) {
                    let Value::Text(key) = key else {
                        return Err(self.malformed("object key is not text"));
                    };
                    entries.insert(key, value);
                }
                self.push(Value::Object(entries));
            }

            Instruction::Var(name) => {
                let value = self.env.get(&name).cloned().ok_or_else(|| undefined(&name))?;
                self.push(value);
            }
            Instruction::SetVar(name) => {
                let value = self.pop()?;
                self.env.set(&name, value.clone());
                self.push(value);
            }
            Instruction::VarAction(name, op) => {
                let operand = self.pop()?;
                let current = self.env.get(&name).cloned().ok_or_else(|| undefined(&name))?;
                let value = self.apply(op, current, operand)?;
                self.env.set(&name, value.clone());
                self.push(value);
            }
            Instruction::InternalVar(name) => {
                let value = self
                    .env
                    .get_internal(&name)
                    .cloned()
                    .ok_or_else(|| undefined(&format!("#{name}")))?;
                self.push(value);
            }
            Instruction::SetInternalVar(name) => {
                let value = self.pop()?;
                self.env.set_internal(&name, value.clone());
                self.push(value);
            }
            Instruction::InternalVarAction(name, op) => {
                let operand = self.pop()?;
                let current = self
                    .env
                    .get_internal(&name)
                    .cloned()
                    .ok_or_else(|| undefined(&format!("#{name}")))?;
                let value = self.apply(op, current, operand)?;
                self.env.set_internal(&name, value.clone());
                self.push(value);
            }
            Instruction::Special(var) => {
                let value = self.context.special(var);
                self.push(value);
            }
            Instruction::Insert(index) => {
                let value = self.env.inserted(index).cloned().ok_or_else(|| {
                    EvalError::Reference(format!("no injected value at index {index}"))
                })?;
                self.push(value);
            }

            Instruction::Pointer(id) => {
                self.pointers.authorize(&id, self.context.actor())?;
                self.push(Value::Pointer(id));
            }
            Instruction::SetPointer(id) => {
                let value = self.pop()?;
                self.mutate(&id, Delta::Replace(value.clone()))?;
                self.push(value);
            }
            Instruction::PointerAction(id, op) => {
                let operand = self.pop()?;
                let current = self.deref(Value::Pointer(id))?;
                let value = self.apply(op, current, operand)?;
                self.mutate(&id, Delta::Replace(value.clone()))?;
                self.push(value);
            }

            Instruction::Unary(op) => {
                let operand = self.pop()?;
                let value = self.unary(op, operand)?;
                self.push(value);
            }
            Instruction::Binary(op) => {
                let right = self.pop()?;
                let left = self.pop()?;
                let value = self.apply(op, left, right)?;
                self.push(value);
            }

            Instruction::ChildGet => {
                let key = self.pop_deref()?;
                let parent = self.pop_deref()?;
                let value = ops::child(&parent, &key)?;
                self.push(value);
            }
            Instruction::ChildSet { root, depth } => {
                let value = self.pop()?;
                let path = self.pop_path(depth)?;
                self.set_place(&root, path, value.clone())?;
                self.push(value);
            }
            Instruction::ChildAction { root, depth, op } => {
                let operand = self.pop()?;
                let path = self.pop_path(depth)?;
                let current = self.read_place(&root, &path)?;
                let value = self.apply(op, current, operand)?;
                self.set_place(&root, path, value.clone())?;
                self.push(value);
            }

            Instruction::Throw(fault) => return Err(EvalError::Thrown(fault)),
            Instruction::End | Instruction::Return | Instruction::Remote(_) => {
                return Err(self.malformed("control instruction out of place"))
            }
        }
        Ok(())
    }

    // ── Operators ────────────────────────────────────────────────────────────

    fn apply(&self, op: BinaryOp, left: Value, right: Value) -> EvalResult<Value> {
        if matches!(op, BinaryOp::Identical | BinaryOp::NotIdentical) {
            return ops::binary(op, &left, &right);
        }
        let left = self.deref(left)?;
        let right = self.deref(right)?;
        ops::binary(op, &left, &right)
    }

    fn unary(&mut self, op: UnaryOp, operand: Value) -> EvalResult<Value> {
        match op {
            UnaryOp::CreatePointer => Ok(match operand {
                Value::Pointer(id) => Value::Pointer(id),
                value => Value::Pointer(self.pointers.create(value, PointerOptions::default())),
            }),
            UnaryOp::DeletePointer => {
                let id = expect_pointer(op, &operand)?;
                self.pointers.delete(&id, self.context.actor())?;
                Ok(Value::Void)
            }
            UnaryOp::Subscribe => {
                let id = expect_pointer(op, &operand)?;
                let sender = self.context.sender.as_ref().ok_or_else(|| {
                    EvalError::Permission("anonymous senders cannot subscribe".to_string())
                })?;
                self.pointers.subscribe(&id, sender)
            }
            UnaryOp::Unsubscribe => {
                let id = expect_pointer(op, &operand)?;
                let removed = match &self.context.sender {
                    Some(sender) => self.pointers.unsubscribe(&id, sender)?,
                    None => false,
                };
                Ok(Value::Bool(removed))
            }
            UnaryOp::Value => self.deref(operand),
            UnaryOp::Origin => {
                let id = expect_pointer(op, &operand)?;
                Ok(Value::Endpoint(Endpoint::from_id(id.origin())))
            }
            UnaryOp::Subscribers => {
                let id = expect_pointer(op, &operand)?;
                let subscribers = self.pointers.subscribers(&id)?;
                Ok(Value::Array(
                    subscribers.into_iter().map(Value::Endpoint).collect(),
                ))
            }
            UnaryOp::Negate | UnaryOp::Not | UnaryOp::Count | UnaryOp::TypeOf => {
                ops::unary(op, &self.deref(operand)?)
            }
        }
    }

    fn deref(&self, value: Value) -> EvalResult<Value> {
        match value {
            Value::Pointer(id) => {
                self.pointers.authorize(&id, self.context.actor())?;
                self.pointers.get(&id)
            }
            other => Ok(other),
        }
    }

    // ── Places ───────────────────────────────────────────────────────────────

    fn mutate(&mut self, id: &PointerId, delta: Delta) -> EvalResult<()> {
        let propagation = self.pointers.mutate(id, &delta, self.context.actor())?;
        self.propagations.extend(propagation);
        Ok(())
    }

    /// Root value of a place, without dereferencing.
    fn root_value(&self, root: &PlaceRoot) -> EvalResult<Value> {
        match root {
            PlaceRoot::Variable(name) => self.env.get(name).cloned().ok_or_else(|| undefined(name)),
            PlaceRoot::InternalVar(name) => self
                .env
                .get_internal(name)
                .cloned()
                .ok_or_else(|| undefined(&format!("#{name}"))),
            PlaceRoot::Pointer(id) => {
                self.pointers.authorize(id, self.context.actor())?;
                Ok(Value::Pointer(*id))
            }
        }
    }

    fn read_place(&self, root: &PlaceRoot, path: &[Value]) -> EvalResult<Value> {
        let mut value = self.deref(self.root_value(root)?)?;
        for key in path {
            value = self.deref(ops::child(&value, key)?)?;
        }
        Ok(value)
    }

    /// Assign below a root. A root holding a pointer reference mutates the
    /// pointer instead of the binding.
    fn set_place(&mut self, root: &PlaceRoot, path: Vec<Value>, value: Value) -> EvalResult<()> {
        let current = self.root_value(root)?;
        if let Value::Pointer(id) = current {
            return self.mutate(&id, Delta::Set { path, value });
        }
        let mut updated = current;
        ops::set_child(&mut updated, &path, value)?;
        match root {
            PlaceRoot::Variable(name) => self.env.set(name, updated),
            PlaceRoot::InternalVar(name) => self.env.set_internal(name, updated),
            PlaceRoot::Pointer(_) => {}
        }
        Ok(())
    }

    // ── Stack ────────────────────────────────────────────────────────────────

    fn push(&mut self, value: Value) {
        self.stack.push(Entry::Value(value));
    }

    fn pop(&mut self) -> EvalResult<Value> {
        match self.stack.pop() {
            Some(Entry::Value(value)) => Ok(value),
            Some(frame @ Entry::Frame(_)) => {
                self.stack.push(frame);
                Err(self.malformed("operand expected"))
            }
            None => Err(self.malformed("operand stack underflow")),
        }
    }

    fn pop_deref(&mut self) -> EvalResult<Value> {
        let value = self.pop()?;
        self.deref(value)
    }

    /// Pop `depth` keys, outermost first.
    fn pop_path(&mut self, depth: u8) -> EvalResult<Vec<Value>> {
        let mut path = Vec::with_capacity(depth as usize);
        for _ in 0..depth {
            path.push(self.pop_deref()?);
        }
        path.reverse();
        Ok(path)
    }

    /// Pop the values above the innermost frame marker, which must be `kind`.
    fn close_frame(&mut self, kind: FrameKind) -> EvalResult<Vec<Value>> {
        let mut items = Vec::new();
        loop {
            match self.stack.pop() {
                Some(Entry::Value(value)) => items.push(value),
                Some(Entry::Frame(found)) if found == kind => break,
                Some(Entry::Frame(found)) => {
                    return Err(self.malformed(&format!("{kind:?} end inside {found:?}")))
                }
                None => return Err(self.malformed(&format!("{kind:?} end without start"))),
            }
        }
        items.reverse();
        Ok(items)
    }

    fn malformed(&self, reason: &str) -> EvalError {
        EvalError::Malformed(MalformedBlockError::new(self.pos, reason))
    }
}

fn undefined(name: &str) -> EvalError {
    EvalError::Reference(format!("{name} is not defined"))
}

fn expect_pointer(op: UnaryOp, value: &Value) -> EvalResult<PointerId> {
    match value {
        Value::Pointer(id) => Ok(*id),
        other => Err(EvalError::Type(format!(
            "{}expects a pointer, got {}",
            op.symbol(),
            other.std_type().name()
        ))),
    }
}
