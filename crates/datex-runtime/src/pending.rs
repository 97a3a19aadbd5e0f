//! Remote calls parked until their RESPONSE arrives.
//!
//! A call is keyed by `(sid, return_index)` and only the endpoint the
//! request went to may answer it. The entry is removed exactly once: when
//! the response resolves it, or when the waiting side gives up (timeout,
//! cancellation) and drops its [`PendingCall`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use datex_types::{Fault, IdEndpoint, Value};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{RuntimeError, RuntimeResult};

type Key = (u32, u16);
type Outcome = Result<Value, Fault>;

#[derive(Debug)]
struct Parked {
    responder: IdEndpoint,
    tx: oneshot::Sender<Outcome>,
}

/// Shared map of parked calls.
#[derive(Debug, Clone, Default)]
pub struct PendingCalls {
    calls: Arc<Mutex<HashMap<Key, Parked>>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a call to `responder` that may wait at most `timeout` from now.
    /// The returned guard waits for the response and removes the entry
    /// when dropped.
    pub fn park(
        &self,
        sid: u32,
        return_index: u16,
        responder: IdEndpoint,
        timeout: Duration,
    ) -> PendingCall {
        let (tx, rx) = oneshot::channel();
        self.calls
            .lock()
            .insert((sid, return_index), Parked { responder, tx });
        debug!(sid, return_index, %responder, timeout_ms = timeout.as_millis() as u64, "parked remote call");
        PendingCall {
            sid,
            return_index,
            timeout,
            deadline: Instant::now() + timeout,
            rx,
            calls: self.clone(),
        }
    }

    /// Hand a response sent by `from` to its parked call. Returns `false`
    /// when nobody is waiting for it any more, or when `from` is not the
    /// endpoint the call went to; the call then stays parked.
    pub fn resolve(
        &self,
        sid: u32,
        return_index: u16,
        from: Option<IdEndpoint>,
        outcome: Outcome,
    ) -> bool {
        let parked = {
            let mut calls = self.calls.lock();
            match calls.get(&(sid, return_index)) {
                Some(parked) if Some(parked.responder) == from => calls.remove(&(sid, return_index)),
                Some(parked) => {
                    warn!(sid, return_index, expected = %parked.responder, ?from, "response from the wrong endpoint");
                    return false;
                }
                None => None,
            }
        };
        match parked {
            Some(parked) => parked.tx.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Whether a call `(sid, return_index)` is parked and waits for `from`.
    pub fn awaits(&self, sid: u32, return_index: u16, from: Option<IdEndpoint>) -> bool {
        self.calls
            .lock()
            .get(&(sid, return_index))
            .is_some_and(|parked| Some(parked.responder) == from)
    }

    /// Number of calls still waiting.
    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, key: &Key) {
        self.calls.lock().remove(key);
    }
}

/// One parked call, owned by the task waiting for it.
#[derive(Debug)]
pub struct PendingCall {
    sid: u32,
    return_index: u16,
    timeout: Duration,
    deadline: Instant,
    rx: oneshot::Receiver<Outcome>,
    calls: PendingCalls,
}

impl PendingCall {
    pub fn sid(&self) -> u32 {
        self.sid
    }

    pub fn return_index(&self) -> u16 {
        self.return_index
    }

    /// Wait for the response until the call's deadline.
    pub async fn wait(mut self) -> RuntimeResult<Value> {
        match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(fault))) => Err(RuntimeError::Remote(fault)),
            Ok(Err(_)) => Err(RuntimeError::Cancelled),
            Err(_) => Err(RuntimeError::Timeout {
                sid: self.sid,
                return_index: self.return_index,
                ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        self.calls.remove(&(self.sid, self.return_index));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datex_types::ErrorKind;

    fn peer() -> IdEndpoint {
        IdEndpoint::from_bytes([2; 12])
    }

    #[tokio::test]
    async fn only_the_called_endpoint_may_answer() {
        let calls = PendingCalls::new();
        let call = calls.park(7, 0, peer(), Duration::from_secs(1));
        let stranger = IdEndpoint::from_bytes([3; 12]);
        assert!(!calls.resolve(7, 0, Some(stranger), Ok(Value::Int(666))));
        assert!(!calls.resolve(7, 0, None, Ok(Value::Int(666))));
        assert_eq!(calls.len(), 1);
        assert!(calls.awaits(7, 0, Some(peer())));
        assert!(!calls.awaits(7, 0, Some(stranger)));
        assert!(calls.resolve(7, 0, Some(peer()), Ok(Value::Int(3))));
        assert_eq!(call.wait().await.unwrap(), Value::Int(3));
    }

    #[tokio::test]
    async fn response_resolves_the_parked_call() {
        let calls = PendingCalls::new();
        let call = calls.park(7, 0, peer(), Duration::from_secs(1));
        assert!(calls.resolve(7, 0, Some(peer()), Ok(Value::Int(3))));
        assert_eq!(call.wait().await.unwrap(), Value::Int(3));
        assert!(calls.is_empty());
    }

    #[tokio::test]
    async fn fault_is_a_remote_error() {
        let calls = PendingCalls::new();
        let call = calls.park(7, 1, peer(), Duration::from_secs(1));
        calls.resolve(7, 1, Some(peer()), Err(Fault::new(ErrorKind::Permission, "no")));
        let err = call.wait().await.unwrap_err();
        assert!(matches!(err, RuntimeError::Remote(f) if f.kind == ErrorKind::Permission));
    }

    #[tokio::test]
    async fn timeout_cleans_up() {
        let calls = PendingCalls::new();
        let call = calls.park(7, 2, peer(), Duration::from_millis(20));
        let err = call.wait().await.unwrap_err();
        assert!(matches!(err, RuntimeError::Timeout { sid: 7, return_index: 2, ms: 20 }));
        assert!(calls.is_empty());
        assert!(!calls.resolve(7, 2, Some(peer()), Ok(Value::Void)));
    }

    #[test]
    fn dropping_the_call_unparks_it() {
        let calls = PendingCalls::new();
        let call = calls.park(1, 0, peer(), Duration::from_secs(1));
        assert_eq!(calls.len(), 1);
        drop(call);
        assert!(calls.is_empty());
    }
}
