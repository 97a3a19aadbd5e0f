//! Variable environment of one running scope.

use datex_types::ast::SpecialVar;
use datex_types::{Endpoint, Value};
use std::collections::BTreeMap;

/// Bindings of one sub-scope level.
#[derive(Debug, Clone, Default)]
struct Frame {
    vars: BTreeMap<String, Value>,
    internal: BTreeMap<String, Value>,
}

/// Who runs a scope, and on whose behalf.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// `#sender`: the endpoint the execution is attributed to.
    pub sender: Option<Endpoint>,
    /// `#current`: the local endpoint.
    pub current: Endpoint,
    /// `#timestamp`, milliseconds since the epoch.
    pub timestamp: u64,
    pub encrypted: bool,
    pub signed: bool,
    /// `#this`
    pub this: Value,
    /// `#it`
    pub it: Value,
}

impl ExecutionContext {
    /// Context of a scope the local endpoint runs for itself.
    pub fn local(current: Endpoint) -> Self {
        Self {
            sender: Some(current.clone()),
            current,
            timestamp: 0,
            encrypted: false,
            signed: false,
            this: Value::Void,
            it: Value::Void,
        }
    }

    /// The remote endpoint responsible for side effects, or `None` when the
    /// local endpoint runs the scope itself.
    pub fn actor(&self) -> Option<&Endpoint> {
        self.sender
            .as_ref()
            .filter(|sender| !same_endpoint(sender, &self.current))
    }

    pub fn special(&self, var: SpecialVar) -> Value {
        match var {
            SpecialVar::Sender => self
                .sender
                .clone()
                .map(Value::Endpoint)
                .unwrap_or(Value::Void),
            SpecialVar::Current => Value::Endpoint(self.current.clone()),
            SpecialVar::Timestamp => Value::Int(i64::try_from(self.timestamp).unwrap_or(i64::MAX)),
            SpecialVar::Encrypted => Value::Bool(self.encrypted),
            SpecialVar::Signed => Value::Bool(self.signed),
            SpecialVar::This => self.this.clone(),
            SpecialVar::It => self.it.clone(),
        }
    }
}

/// Same participant, ignoring the instance.
pub(crate) fn same_endpoint(a: &Endpoint, b: &Endpoint) -> bool {
    match (a.id_endpoint(), b.id_endpoint()) {
        (Some(x), Some(y)) => x == y,
        _ => a.main() == b.main(),
    }
}

/// Scoped variables with push/pop semantics.
///
/// Lookups search from the innermost sub-scope outward. Assigning a name
/// that exists in an outer level updates it there; otherwise the binding is
/// created in the innermost level. Injected data (`internal_vars`) is
/// read-only and addressed by index.
#[derive(Debug, Clone)]
pub struct Environment {
    frames: Vec<Frame>,
    inserted: Vec<Value>,
}

impl Environment {
    pub fn new(inserted: Vec<Value>) -> Self {
        Self {
            frames: vec![Frame::default()],
            inserted,
        }
    }

    pub fn push_scope(&mut self) {
        self.frames.push(Frame::default());
    }

    /// Pop the innermost sub-scope. The outermost level is never popped.
    pub fn pop_scope(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.frames.iter().rev().find_map(|f| f.vars.get(name))
    }

    pub fn set(&mut self, name: &str, value: Value) {
        Self::assign(&mut self.frames, name, value, |f| &mut f.vars);
    }

    pub fn get_internal(&self, name: &str) -> Option<&Value> {
        self.frames.iter().rev().find_map(|f| f.internal.get(name))
    }

    pub fn set_internal(&mut self, name: &str, value: Value) {
        Self::assign(&mut self.frames, name, value, |f| &mut f.internal);
    }

    pub fn inserted(&self, index: u32) -> Option<&Value> {
        self.inserted.get(index as usize)
    }

    fn assign(
        frames: &mut [Frame],
        name: &str,
        value: Value,
        map: fn(&mut Frame) -> &mut BTreeMap<String, Value>,
    ) {
        for frame in frames.iter_mut().rev() {
            if let Some(slot) = map(frame).get_mut(name) {
                *slot = value;
                return;
            }
        }
        if let Some(innermost) = frames.last_mut() {
            map(innermost).insert(name.to_string(), value);
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_updates_outer_binding() {
        let mut env = Environment::default();
        env.set("x", Value::Int(1));
        env.push_scope();
        env.set("x", Value::Int(2));
        env.set("y", Value::Int(3));
        assert_eq!(env.get("x"), Some(&Value::Int(2)));
        env.pop_scope();
        // outer binding was updated, inner-only binding is gone
        assert_eq!(env.get("x"), Some(&Value::Int(2)));
        assert_eq!(env.get("y"), None);
    }

    #[test]
    fn internal_vars_are_separate() {
        let mut env = Environment::new(vec![Value::Int(9)]);
        env.set_internal("x", Value::Int(1));
        assert_eq!(env.get("x"), None);
        assert_eq!(env.get_internal("x"), Some(&Value::Int(1)));
        assert_eq!(env.inserted(0), Some(&Value::Int(9)));
        assert_eq!(env.inserted(1), None);
    }

    #[test]
    fn actor_excludes_self() {
        let me = Endpoint::person("me");
        let context = ExecutionContext::local(me.clone());
        assert!(context.actor().is_none());
        let remote = ExecutionContext {
            sender: Some(Endpoint::person("bob")),
            ..ExecutionContext::local(me)
        };
        assert_eq!(remote.actor(), Some(&Endpoint::person("bob")));
    }
}
