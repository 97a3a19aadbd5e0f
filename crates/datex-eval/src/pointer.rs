//! Pointer cells and the origin-to-subscriber propagation rules.
//!
//! Every pointer lives in its own `Mutex` so concurrent mutations of one
//! pointer serialize on that pointer only. The store-wide map is behind a
//! `RwLock` that is held just long enough to find the cell.
//!
//! Propagation follows a star topology:
//! - at the origin, a mutation is sent to every subscriber except the
//!   endpoint that caused it;
//! - at a replica, an update coming from the origin is applied and sent
//!   nowhere;
//! - at a live replica, a local change is sent to the origin only;
//! - a detached replica is a snapshot: local changes stay local;
//! - a third party can never write a replica.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use datex_codegen::{delta_body, CodegenResult, Delta};
use datex_types::{Endpoint, IdEndpoint, PointerId, TargetClause, Value};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::env::same_endpoint;
use crate::error::{EvalError, EvalResult};
use crate::ops;

/// Creation options of a pointer.
#[derive(Debug, Clone, Default)]
pub struct PointerOptions {
    /// Never subscribable, never sent to another endpoint.
    pub anonymous: bool,
    /// Who may subscribe. `None` allows everyone.
    pub allow: Option<TargetClause>,
}

#[derive(Debug)]
struct PointerState {
    value: Value,
    subscribers: BTreeSet<Endpoint>,
    allow: Option<TargetClause>,
    anonymous: bool,
    /// Replica no longer subscribed at its origin.
    detached: bool,
}

/// A pointer update that must leave the local endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Propagation {
    pub pointer: PointerId,
    pub delta: Delta,
    pub targets: Vec<Endpoint>,
}

impl Propagation {
    /// The update as a DATEX body (`$id = v` or `$id.k = v`).
    pub fn body(&self) -> CodegenResult<Vec<u8>> {
        delta_body(&self.pointer, &self.delta)
    }
}

/// All pointers known to one endpoint: its own and the replicas it holds.
#[derive(Debug)]
pub struct PointerStore {
    local: IdEndpoint,
    counter: AtomicU32,
    pointers: RwLock<HashMap<PointerId, Arc<Mutex<PointerState>>>>,
}

impl PointerStore {
    pub fn new(local: IdEndpoint) -> Self {
        Self {
            local,
            counter: AtomicU32::new(0),
            pointers: RwLock::new(HashMap::new()),
        }
    }

    pub fn local(&self) -> IdEndpoint {
        self.local
    }

    /// Whether the local endpoint owns `id`.
    pub fn is_origin(&self, id: &PointerId) -> bool {
        id.origin() == self.local
    }

    /// Create a pointer owned by the local endpoint.
    pub fn create(&self, value: Value, options: PointerOptions) -> PointerId {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let id = PointerId::new(self.local, now_seconds(), counter);
        debug!(pointer = %id, anonymous = options.anonymous, "created pointer");
        let state = PointerState {
            value,
            subscribers: BTreeSet::new(),
            allow: options.allow,
            anonymous: options.anonymous,
            detached: false,
        };
        self.pointers.write().insert(id, Arc::new(Mutex::new(state)));
        id
    }

    /// Store the value of a pointer owned by another endpoint.
    pub fn insert_replica(&self, id: PointerId, value: Value) -> EvalResult<()> {
        if self.is_origin(&id) {
            return Err(EvalError::Pointer(format!(
                "{} is owned locally",
                Value::Pointer(id)
            )));
        }
        let cell = self.pointers.read().get(&id).cloned();
        match cell {
            Some(cell) => {
                let mut state = cell.lock();
                state.value = value;
                state.detached = false;
            }
            None => {
                let state = PointerState {
                    value,
                    subscribers: BTreeSet::new(),
                    allow: None,
                    anonymous: false,
                    detached: false,
                };
                self.pointers.write().insert(id, Arc::new(Mutex::new(state)));
            }
        }
        debug!(pointer = %id, "stored replica");
        Ok(())
    }

    /// Check that `actor` (`None` for local code) may read or write the
    /// local pointer `id`. Anonymous pointers are never reachable from
    /// another endpoint, and an allow clause must match the actor.
    pub fn authorize(&self, id: &PointerId, actor: Option<&Endpoint>) -> EvalResult<()> {
        let Some(actor) = actor else {
            return Ok(());
        };
        if !self.is_origin(id) {
            return Ok(());
        }
        let Some(cell) = self.pointers.read().get(id).cloned() else {
            return Ok(());
        };
        let state = cell.lock();
        check_actor(id, &state, actor)
    }

    /// Turn the replica `id` into a detached snapshot.
    pub fn detach(&self, id: &PointerId) -> EvalResult<()> {
        if self.is_origin(id) {
            return Err(EvalError::Pointer(format!("{id} is owned locally")));
        }
        self.cell(id)?.lock().detached = true;
        debug!(pointer = %id, "detached replica");
        Ok(())
    }

    /// Whether `id` is a replica that no longer follows its origin.
    pub fn is_detached(&self, id: &PointerId) -> bool {
        self.pointers
            .read()
            .get(id)
            .is_some_and(|cell| cell.lock().detached)
    }

    pub fn contains(&self, id: &PointerId) -> bool {
        self.pointers.read().contains_key(id)
    }

    pub fn get(&self, id: &PointerId) -> EvalResult<Value> {
        Ok(self.cell(id)?.lock().value.clone())
    }

    /// Drop a pointer. Only code of the origin itself may delete.
    pub fn delete(&self, id: &PointerId, actor: Option<&Endpoint>) -> EvalResult<()> {
        if !self.is_origin(id) {
            return Err(EvalError::Pointer(format!(
                "{} can only be deleted by its origin",
                Value::Pointer(*id)
            )));
        }
        if let Some(actor) = actor {
            return Err(EvalError::Permission(format!(
                "{actor} may not delete {}",
                Value::Pointer(*id)
            )));
        }
        self.pointers
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| unknown(id))
    }

    /// Apply `delta` to `id` on behalf of `actor` (`None` for local code)
    /// and work out who has to hear about it.
    pub fn mutate(
        &self,
        id: &PointerId,
        delta: &Delta,
        actor: Option<&Endpoint>,
    ) -> EvalResult<Option<Propagation>> {
        let cell = self.cell(id)?;
        let mut state = cell.lock();
        let targets = if self.is_origin(id) {
            if let Some(actor) = actor {
                check_actor(id, &state, actor)?;
            }
            if state.anonymous {
                Vec::new()
            } else {
                state
                    .subscribers
                    .iter()
                    .filter(|s| !actor.is_some_and(|a| same_endpoint(a, s)))
                    .cloned()
                    .collect()
            }
        } else {
            match actor {
                // update from the origin: apply, never forward
                Some(actor) if actor.id_endpoint() == Some(id.origin()) => Vec::new(),
                Some(actor) => {
                    return Err(EvalError::Permission(format!(
                        "{actor} may not change {}, owned by {}",
                        Value::Pointer(*id),
                        Endpoint::from_id(id.origin())
                    )))
                }
                None if state.detached => Vec::new(),
                None => vec![Endpoint::from_id(id.origin())],
            }
        };
        apply_delta(&mut state.value, delta)?;
        drop(state);

        if targets.is_empty() {
            return Ok(None);
        }
        debug!(pointer = %id, targets = targets.len(), "queued pointer update");
        Ok(Some(Propagation {
            pointer: *id,
            delta: self.externalize_delta(delta),
            targets,
        }))
    }

    /// Add `subscriber` to a local pointer and return the value it starts
    /// from.
    pub fn subscribe(&self, id: &PointerId, subscriber: &Endpoint) -> EvalResult<Value> {
        if !self.is_origin(id) {
            return Err(EvalError::Pointer(format!(
                "{} is a replica; subscribe at {}",
                Value::Pointer(*id),
                Endpoint::from_id(id.origin())
            )));
        }
        let cell = self.cell(id)?;
        let mut state = cell.lock();
        if state.anonymous {
            return Err(EvalError::Permission(format!(
                "{} is anonymous",
                Value::Pointer(*id)
            )));
        }
        if let Some(allow) = &state.allow {
            if !allow.matches(subscriber) {
                warn!(pointer = %id, endpoint = %subscriber, "subscription rejected");
                return Err(EvalError::Permission(format!(
                    "{subscriber} may not subscribe to {}",
                    Value::Pointer(*id)
                )));
            }
        }
        state.subscribers.insert(subscriber.clone());
        let value = state.value.clone();
        drop(state);
        debug!(pointer = %id, endpoint = %subscriber, "subscribed");
        Ok(self.externalize(&value))
    }

    /// Remove `subscriber`. Returns whether it was subscribed.
    pub fn unsubscribe(&self, id: &PointerId, subscriber: &Endpoint) -> EvalResult<bool> {
        let cell = self.cell(id)?;
        let removed = cell.lock().subscribers.remove(subscriber);
        Ok(removed)
    }

    /// Drop a subscriber after a failed send.
    pub fn prune_subscriber(&self, id: &PointerId, subscriber: &Endpoint) {
        if let Ok(cell) = self.cell(id) {
            if cell.lock().subscribers.remove(subscriber) {
                warn!(pointer = %id, endpoint = %subscriber, "pruned unreachable subscriber");
            }
        }
    }

    pub fn subscribers(&self, id: &PointerId) -> EvalResult<Vec<Endpoint>> {
        Ok(self.cell(id)?.lock().subscribers.iter().cloned().collect())
    }

    /// `value` as it may leave the endpoint: references to anonymous
    /// pointers are replaced by their current value.
    pub fn externalize(&self, value: &Value) -> Value {
        match value {
            Value::Pointer(id) => match self.anonymous_value(id) {
                Some(inner) => self.externalize(&inner),
                None => value.clone(),
            },
            Value::Array(items) => Value::Array(items.iter().map(|v| self.externalize(v)).collect()),
            Value::Tuple(items) => Value::Tuple(items.iter().map(|v| self.externalize(v)).collect()),
            Value::Object(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), self.externalize(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn externalize_delta(&self, delta: &Delta) -> Delta {
        match delta {
            Delta::Replace(value) => Delta::Replace(self.externalize(value)),
            Delta::Set { path, value } => Delta::Set {
                path: path.clone(),
                value: self.externalize(value),
            },
        }
    }

    fn anonymous_value(&self, id: &PointerId) -> Option<Value> {
        let cell = self.pointers.read().get(id).cloned()?;
        let state = cell.lock();
        state.anonymous.then(|| state.value.clone())
    }

    fn cell(&self, id: &PointerId) -> EvalResult<Arc<Mutex<PointerState>>> {
        self.pointers.read().get(id).cloned().ok_or_else(|| unknown(id))
    }
}

/// Apply `delta` to a pointer value.
pub fn apply_delta(value: &mut Value, delta: &Delta) -> EvalResult<()> {
    match delta {
        Delta::Replace(new) => {
            *value = new.clone();
            Ok(())
        }
        Delta::Set { path, value: new } => ops::set_child(value, path, new.clone()),
    }
}

fn check_actor(id: &PointerId, state: &PointerState, actor: &Endpoint) -> EvalResult<()> {
    if state.anonymous {
        warn!(pointer = %id, endpoint = %actor, "anonymous pointer used from outside");
        return Err(EvalError::Permission(format!("{id} is anonymous")));
    }
    match &state.allow {
        Some(allow) if !allow.matches(actor) => {
            warn!(pointer = %id, endpoint = %actor, "pointer access rejected");
            Err(EvalError::Permission(format!("{actor} may not access {id}")))
        }
        _ => Ok(()),
    }
}

fn unknown(id: &PointerId) -> EvalError {
    EvalError::Pointer(format!("unknown pointer {}", Value::Pointer(*id)))
}

fn now_seconds() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> IdEndpoint {
        IdEndpoint::from_bytes([byte; 12])
    }

    #[test]
    fn counter_makes_ids_unique() {
        let store = PointerStore::new(id(1));
        let a = store.create(Value::Int(1), PointerOptions::default());
        let b = store.create(Value::Int(1), PointerOptions::default());
        assert_ne!(a, b);
        assert_eq!(a.origin(), id(1));
        assert!(store.is_origin(&a));
    }

    #[test]
    fn set_delta_appends_and_removes() {
        let mut value = Value::Array(vec![Value::Int(1)]);
        let append = Delta::Set {
            path: vec![Value::Int(1)],
            value: Value::Int(2),
        };
        apply_delta(&mut value, &append).unwrap();
        assert_eq!(value, Value::Array(vec![Value::Int(1), Value::Int(2)]));
        let gap = Delta::Set {
            path: vec![Value::Int(5)],
            value: Value::Int(2),
        };
        assert!(matches!(apply_delta(&mut value, &gap), Err(EvalError::Value(_))));
    }

    #[test]
    fn anonymous_pointers_are_inlined_on_the_way_out() {
        let store = PointerStore::new(id(1));
        let hidden = store.create(
            Value::Int(7),
            PointerOptions {
                anonymous: true,
                allow: None,
            },
        );
        let shared = store.create(Value::Int(8), PointerOptions::default());
        let value = Value::Array(vec![Value::Pointer(hidden), Value::Pointer(shared)]);
        assert_eq!(
            store.externalize(&value),
            Value::Array(vec![Value::Int(7), Value::Pointer(shared)])
        );
    }

    #[test]
    fn remote_actors_respect_anonymity_and_allow() {
        let store = PointerStore::new(id(1));
        let hidden = store.create(
            Value::Int(7),
            PointerOptions {
                anonymous: true,
                allow: None,
            },
        );
        let guarded = store.create(
            Value::Int(8),
            PointerOptions {
                anonymous: false,
                allow: Some(TargetClause::Endpoint(Endpoint::from_id(id(2)))),
            },
        );
        let friend = Endpoint::from_id(id(2));
        let stranger = Endpoint::from_id(id(3));

        assert!(store.authorize(&hidden, None).is_ok());
        assert!(matches!(store.authorize(&hidden, Some(&friend)), Err(EvalError::Permission(_))));
        assert!(store.authorize(&guarded, Some(&friend)).is_ok());
        assert!(matches!(
            store.authorize(&guarded, Some(&stranger)),
            Err(EvalError::Permission(_))
        ));

        let write = Delta::Replace(Value::Int(99));
        assert!(matches!(
            store.mutate(&guarded, &write, Some(&stranger)),
            Err(EvalError::Permission(_))
        ));
        assert_eq!(store.get(&guarded), Ok(Value::Int(8)));
        assert!(store.mutate(&guarded, &write, Some(&friend)).is_ok());
        assert_eq!(store.get(&guarded), Ok(Value::Int(99)));
    }

    #[test]
    fn detached_replica_keeps_changes_local() {
        let store = PointerStore::new(id(2));
        let foreign = PointerId::new(id(1), 0, 0);
        store.insert_replica(foreign, Value::Int(1)).unwrap();
        let write = Delta::Replace(Value::Int(5));
        assert!(store.mutate(&foreign, &write, None).unwrap().is_some());

        store.detach(&foreign).unwrap();
        assert!(store.is_detached(&foreign));
        assert_eq!(store.mutate(&foreign, &write, None), Ok(None));
        assert_eq!(store.get(&foreign), Ok(Value::Int(5)));

        // subscribing again makes it live
        store.insert_replica(foreign, Value::Int(6)).unwrap();
        assert!(!store.is_detached(&foreign));

        let own = store.create(Value::Int(0), PointerOptions::default());
        assert!(matches!(store.detach(&own), Err(EvalError::Pointer(_))));
    }

    #[test]
    fn replicas_cannot_be_deleted() {
        let store = PointerStore::new(id(1));
        let foreign = PointerId::new(id(2), 0, 0);
        store.insert_replica(foreign, Value::Int(1)).unwrap();
        assert!(matches!(store.delete(&foreign, None), Err(EvalError::Pointer(_))));
        assert!(store.contains(&foreign));
    }
}
