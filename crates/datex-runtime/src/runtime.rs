//! The async execution driver of one endpoint.
//!
//! ```text
//! execute ─► Interpreter::run ─► Completed ─────────────────────► value
//!                  │
//!                  └─► Suspended(call) ─► REQUEST per receiver ─► park (sid, return_index)
//!                                                                      │
//! receive ─► decode ─► relay? ─► verify / open ─► RESPONSE ─► resolve ─┘─► resume
//! ```
//!
//! Pointer updates queued by a scope are flushed as DATA blocks after every
//! step, before the runtime waits on anything.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use datex_codegen::{fault_body, value_body, BodyReader, Instruction};
use datex_compiler::header::{decrement_ttl, read_ttl};
use datex_compiler::{
    compile_block, open_block, verify_block, Block, BlockHeader, BlockType, CompileOptions,
    Conversation, PublicKeys, RoutingError, SidAllocator,
};
use datex_eval::{EvalError, ExecutionContext, Interpreter, PointerStore, Propagation, RemoteCall, Scope, Step};
use datex_types::{Endpoint, ErrorKind, Fault, IdEndpoint, PointerId, TargetClause, Value};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::context::RuntimeContext;
use crate::error::{RuntimeError, RuntimeResult};
use crate::pending::{PendingCall, PendingCalls};
use crate::router::{FloodFilter, RoutingTable};
use crate::transport::Transport;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

struct Inner {
    context: RuntimeContext,
    pointers: Arc<PointerStore>,
    transport: Arc<dyn Transport>,
    routes: RoutingTable,
    floods: FloodFilter,
    pending: PendingCalls,
    sids: SidAllocator,
    /// Who may send us REQUESTs. `None` accepts everyone.
    expose: RwLock<Option<TargetClause>>,
}

/// A local endpoint: executes scopes, answers requests and keeps its
/// pointers in sync with their subscribers. Cheap to clone.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<Inner>,
}

/// Non-owning handle to a [`Runtime`].
#[derive(Clone)]
pub struct WeakRuntime(Weak<Inner>);

impl WeakRuntime {
    pub fn upgrade(&self) -> Option<Runtime> {
        self.0.upgrade().map(|inner| Runtime { inner })
    }
}

/// Where a receiver's answer comes from.
enum Slot {
    Local,
    Remote(PendingCall),
}

impl Runtime {
    pub fn new(context: RuntimeContext, transport: Arc<dyn Transport>) -> Self {
        let pointers = Arc::new(PointerStore::new(context.id()));
        info!(endpoint = %context.endpoint(), id = %context.id(), "runtime started");
        Self {
            inner: Arc::new(Inner {
                context,
                pointers,
                transport,
                routes: RoutingTable::new(),
                floods: FloodFilter::default(),
                pending: PendingCalls::new(),
                sids: SidAllocator::new(),
                expose: RwLock::new(None),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakRuntime {
        WeakRuntime(Arc::downgrade(&self.inner))
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.inner.context.endpoint()
    }

    pub fn id(&self) -> IdEndpoint {
        self.inner.context.id()
    }

    pub fn context(&self) -> &RuntimeContext {
        &self.inner.context
    }

    pub fn pointers(&self) -> &Arc<PointerStore> {
        &self.inner.pointers
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.inner.routes
    }

    pub fn pending_calls(&self) -> &PendingCalls {
        &self.inner.pending
    }

    /// Restrict who may send REQUESTs. Others get a `PermissionError`.
    pub fn set_expose(&self, clause: Option<TargetClause>) {
        *self.inner.expose.write() = clause;
    }

    /// Make `endpoint` reachable, directly or through `via`.
    pub fn add_route(&self, endpoint: IdEndpoint, via: Option<IdEndpoint>) {
        self.inner.routes.add(endpoint, via);
        self.inner
            .context
            .registry()
            .write()
            .add_known(Endpoint::from_id(endpoint));
    }

    /// Resolve `alias` to `id` in remote calls and target clauses.
    pub fn bind_alias(&self, alias: &Endpoint, id: IdEndpoint) -> RuntimeResult<()> {
        let mut registry = self.inner.context.registry().write();
        registry.bind(alias, id)?;
        registry.add_known(alias.main());
        Ok(())
    }

    /// Context for a scope the local endpoint runs for itself.
    pub fn local_context(&self) -> ExecutionContext {
        ExecutionContext {
            timestamp: now_millis(),
            ..ExecutionContext::local(self.endpoint().clone())
        }
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Execution
    // ══════════════════════════════════════════════════════════════════════════

    /// Run `scope` to completion, performing its remote calls.
    pub async fn execute(&self, scope: &Scope, context: ExecutionContext) -> RuntimeResult<Value> {
        let conversation = self.inner.sids.conversation();
        let interpreter = scope.interpreter(context, Arc::clone(&self.inner.pointers));
        self.drive(interpreter, &conversation).await
    }

    /// Compile and run `script` as the local endpoint.
    pub async fn execute_script(&self, script: &str, data: Vec<Value>) -> RuntimeResult<Value> {
        let scope = Scope::compile(script, data)?;
        self.execute(&scope, self.local_context()).await
    }

    fn drive<'a>(
        &'a self,
        mut interpreter: Interpreter,
        conversation: &'a Conversation,
    ) -> BoxFuture<'a, RuntimeResult<Value>> {
        Box::pin(async move {
            let mut step = interpreter.run();
            loop {
                self.flush(interpreter.take_propagations()).await;
                match step? {
                    Step::Completed(value) => return Ok(value),
                    Step::Suspended(call) => match self.remote_call(&call, conversation).await {
                        Ok(value) => step = interpreter.resume(value),
                        Err(err) => {
                            interpreter.fail(EvalError::Runtime(err.to_string()));
                            return Err(err);
                        }
                    },
                }
            }
        })
    }

    async fn run_body(&self, body: Vec<u8>, context: ExecutionContext) -> RuntimeResult<Value> {
        self.execute(&Scope::new(body, Vec::new()), context).await
    }

    /// Send `call` to every receiver of its target and collect the answers:
    /// the single value, or a tuple in receiver order.
    async fn remote_call(&self, call: &RemoteCall, conversation: &Conversation) -> RuntimeResult<Value> {
        let receivers = self.inner.context.registry().read().resolve(&call.target);
        if receivers.is_empty() {
            return Err(RoutingError::NoReceivers(call.target.to_string()).into());
        }
        let timeout = call
            .timeout
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.inner.context.config().default_timeout());

        let mut slots = Vec::with_capacity(receivers.len());
        for receiver in &receivers {
            if self.inner.context.is_local(receiver) {
                slots.push(Slot::Local);
                continue;
            }
            let to = receiver
                .id_endpoint()
                .ok_or_else(|| RoutingError::Unbound(receiver.to_string()))?;
            let return_index = conversation.next_return_index()?;
            let parked = self
                .inner
                .pending
                .park(conversation.sid(), return_index, to, timeout);
            let block = self.frame(
                call.body.clone(),
                BlockType::Request,
                conversation.sid(),
                return_index,
                Some(receiver.clone().into()),
                true,
            )?;
            debug!(sid = conversation.sid(), return_index, endpoint = %receiver, "sending request");
            self.send(to, block).await?;
            slots.push(Slot::Remote(parked));
        }

        let mut values = Vec::with_capacity(slots.len());
        for slot in slots {
            let value = match slot {
                Slot::Local => {
                    self.run_body(call.body.clone(), self.local_context()).await?
                }
                Slot::Remote(parked) => parked.wait().await?,
            };
            values.push(value);
        }
        Ok(match values.len() {
            1 => values.pop().unwrap_or(Value::Void),
            _ => Value::Tuple(values),
        })
    }

    /// Send queued pointer updates as DATA blocks. A subscriber that cannot
    /// be reached is dropped; the other targets still get the update.
    async fn flush(&self, propagations: Vec<Propagation>) {
        for propagation in propagations {
            let pointer = Value::Pointer(propagation.pointer);
            let body = match propagation.body() {
                Ok(body) => body,
                Err(err) => {
                    warn!(%pointer, error = %err, "pointer update not encodable");
                    continue;
                }
            };
            for target in &propagation.targets {
                if let Err(err) = self.send_data(body.clone(), target).await {
                    warn!(%pointer, endpoint = %target, error = %err, "pointer update not delivered");
                    self.inner.pointers.prune_subscriber(&propagation.pointer, target);
                }
            }
        }
    }

    async fn send_data(&self, body: Vec<u8>, target: &Endpoint) -> RuntimeResult<()> {
        let to = target
            .id_endpoint()
            .ok_or_else(|| RoutingError::Unbound(target.to_string()))?;
        let sid = self.inner.sids.allocate();
        let block = self.frame(body, BlockType::Data, sid, 0, Some(target.clone().into()), true)?;
        self.send(to, block).await
    }

    async fn send(&self, to: IdEndpoint, block: Vec<u8>) -> RuntimeResult<()> {
        let hop = self.inner.routes.next_hop(to);
        self.inner.transport.send(hop, block).await
    }

    /// Header for an outgoing block. `secure` applies the configured signing
    /// and encryption.
    fn frame(
        &self,
        body: Vec<u8>,
        block_type: BlockType,
        sid: u32,
        return_index: u16,
        to: Option<TargetClause>,
        secure: bool,
    ) -> RuntimeResult<Vec<u8>> {
        let config = self.inner.context.config();
        let registry = self.inner.context.registry().read();
        let options = CompileOptions {
            from: Some(self.endpoint().clone()),
            to,
            block_type,
            sid,
            return_index,
            sign: secure && config.sign,
            encrypt: secure && config.encrypt,
            ttl: config.ttl,
            priority: config.priority,
            registry: Some(&registry),
            keys: Some(self.inner.context.keys()),
            ..CompileOptions::default()
        };
        Ok(compile_block(body, &options)?)
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Remote pointers and discovery
    // ══════════════════════════════════════════════════════════════════════════

    /// Subscribe to a pointer at its origin and keep a live replica of it.
    pub async fn subscribe_remote(&self, pointer: PointerId) -> RuntimeResult<Value> {
        let origin = Endpoint::from_id(pointer.origin());
        let scope = Scope::compile(&format!("{origin} :: subscribe {pointer}"), Vec::new())?;
        let value = self.execute(&scope, self.local_context()).await?;
        self.inner.pointers.insert_replica(pointer, value.clone())?;
        debug!(%pointer, %origin, "subscribed to remote pointer");
        Ok(value)
    }

    /// Stop following a remote pointer. The local replica becomes a detached
    /// snapshot first, so later local writes stay local even when the
    /// origin cannot be told. Returns whether the origin knew us as a
    /// subscriber.
    pub async fn unsubscribe_remote(&self, pointer: PointerId) -> RuntimeResult<bool> {
        self.inner.pointers.detach(&pointer)?;
        let origin = Endpoint::from_id(pointer.origin());
        let scope = Scope::compile(&format!("{origin} :: unsubscribe {pointer}"), Vec::new())?;
        let removed = self.execute(&scope, self.local_context()).await?;
        debug!(%pointer, %origin, "unsubscribed from remote pointer");
        Ok(removed == Value::Bool(true))
    }

    /// Announce ourselves, with our public keys when we have them.
    pub async fn hello(&self, to: IdEndpoint) -> RuntimeResult<()> {
        self.add_route(to, None);
        let payload = match self.inner.context.keys().own_public() {
            Some(keys) => Value::Buffer(keys.to_bytes().to_vec()),
            None => Value::Void,
        };
        let block = self.frame(
            value_body(&payload)?,
            BlockType::Hello,
            self.inner.sids.allocate(),
            0,
            Some(Endpoint::from_id(to).into()),
            false,
        )?;
        self.send(to, block).await
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Inbound
    // ══════════════════════════════════════════════════════════════════════════

    /// Handle one block from the transport. Nothing is returned to the
    /// transport: failures are answered on the wire or logged.
    pub async fn receive(&self, mut bytes: Vec<u8>) {
        let block = match Block::decode(&bytes) {
            Ok(block) => block,
            Err(err) => {
                warn!(error = %err, "dropped malformed block");
                return;
            }
        };
        let me = self.id();
        if block.header.is_flood() {
            let from = block.header.sender.as_ref().and_then(Endpoint::id_endpoint);
            let key = (from, block.header.sid, block.header.return_index, block.header.inc);
            if from == Some(me) || !self.inner.floods.first_sighting(key) {
                debug!(sid = block.header.sid, "dropped repeated flood block");
                return;
            }
            let hops: Vec<IdEndpoint> = self
                .inner
                .routes
                .known()
                .into_iter()
                .filter(|id| *id != me && Some(*id) != from)
                .collect();
            self.relay(&mut bytes, &hops).await;
            self.process(block).await;
            return;
        }
        let receivers: Vec<IdEndpoint> = block
            .header
            .receivers
            .endpoints()
            .iter()
            .filter_map(Endpoint::id_endpoint)
            .collect();
        if receivers.contains(&me) {
            self.process(block).await;
        } else {
            let hops: Vec<IdEndpoint> = receivers
                .into_iter()
                .map(|id| self.inner.routes.next_hop(id))
                .filter(|hop| *hop != me)
                .collect();
            self.relay(&mut bytes, &hops).await;
        }
    }

    /// Forward a block with its ttl lowered by one. Blocks whose ttl is
    /// used up are dropped.
    async fn relay(&self, bytes: &mut [u8], hops: &[IdEndpoint]) {
        if hops.is_empty() {
            return;
        }
        match read_ttl(bytes) {
            Ok(ttl) if ttl <= 1 => {
                warn!(ttl, "dropped block: ttl exhausted");
                return;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "dropped malformed block");
                return;
            }
        }
        let ttl = match decrement_ttl(bytes) {
            Ok(ttl) => ttl,
            Err(err) => {
                warn!(error = %err, "dropped malformed block");
                return;
            }
        };
        for hop in hops {
            debug!(endpoint = %hop, ttl, "relaying block");
            if let Err(err) = self.inner.transport.send(*hop, bytes.to_vec()).await {
                warn!(endpoint = %hop, error = %err, "relay failed");
            }
        }
    }

    async fn process(&self, block: Block) {
        let keys = self.inner.context.keys();
        if let Err(err) = verify_block(&block, keys) {
            warn!(sid = block.header.sid, error = %err, "dropped block: bad signature");
            return;
        }
        let body = match open_block(&block, self.id(), keys) {
            Ok(body) => body,
            Err(err) => {
                warn!(sid = block.header.sid, error = %err, "dropped block: cannot decrypt");
                return;
            }
        };
        let header = block.header;
        match header.block_type {
            BlockType::Request => self.on_request(&header, body).await,
            BlockType::Response => self.on_response(&header, body).await,
            BlockType::Data => {
                if let Err(err) = self.run_body(body, self.remote_context(&header)).await {
                    warn!(sid = header.sid, error = %err, "DATA block failed");
                }
            }
            BlockType::Hello => self.on_hello(&header, &body),
            other => debug!(block_type = %other, sid = header.sid, "ignored block"),
        }
    }

    async fn on_request(&self, header: &BlockHeader, body: Vec<u8>) {
        let outcome = match self.exposed_to(header.sender.as_ref()) {
            Err(fault) => Err(fault),
            Ok(()) => match self.run_body(body, self.remote_context(header)).await {
                Ok(value) => Ok(self.inner.pointers.externalize(&value)),
                Err(err) => Err(err.to_fault()),
            },
        };
        let Some(sender) = header.sender.clone() else {
            debug!(sid = header.sid, "anonymous request, no response");
            return;
        };
        let body = match outcome {
            Ok(value) => value_body(&value).or_else(|err| {
                fault_body(&Fault::new(ErrorKind::Value, err.to_string()))
            }),
            Err(fault) => fault_body(&fault),
        };
        let sent = match body {
            Ok(body) => self.respond(header, sender.clone(), body).await,
            Err(err) => Err(err.into()),
        };
        if let Err(err) = sent {
            warn!(sid = header.sid, return_index = header.return_index, endpoint = %sender, error = %err, "response not sent");
        }
    }

    async fn respond(&self, request: &BlockHeader, to: Endpoint, body: Vec<u8>) -> RuntimeResult<()> {
        let id = to
            .id_endpoint()
            .ok_or_else(|| RoutingError::Unbound(to.to_string()))?;
        let block = self.frame(
            body,
            BlockType::Response,
            request.sid,
            request.return_index,
            Some(to.into()),
            true,
        )?;
        self.send(id, block).await
    }

    async fn on_response(&self, header: &BlockHeader, body: Vec<u8>) {
        let from = header.sender.as_ref().and_then(Endpoint::id_endpoint);
        if !self.inner.pending.awaits(header.sid, header.return_index, from) {
            warn!(sid = header.sid, return_index = header.return_index, ?from, "dropped unexpected response");
            return;
        }
        let outcome = match self.run_body(body, self.remote_context(header)).await {
            Ok(value) => Ok(value),
            Err(RuntimeError::Eval(EvalError::Thrown(fault))) => Err(fault),
            Err(err) => Err(err.to_fault()),
        };
        if !self.inner.pending.resolve(header.sid, header.return_index, from, outcome) {
            warn!(sid = header.sid, return_index = header.return_index, "dropped late or unknown response");
        }
    }

    fn on_hello(&self, header: &BlockHeader, body: &[u8]) {
        let Some(sender) = header.sender.as_ref().and_then(Endpoint::id_endpoint) else {
            debug!("ignored anonymous HELLO");
            return;
        };
        self.add_route(sender, None);
        let mut reader = BodyReader::new(body);
        if let Ok(Some(Instruction::Literal(Value::Buffer(bytes)))) = reader.next_instruction() {
            match PublicKeys::from_slice(&bytes) {
                Ok(keys) => self.inner.context.keys().register_peer(sender, keys),
                Err(err) => warn!(endpoint = %sender, error = %err, "HELLO with unusable keys"),
            }
        }
        info!(endpoint = %sender, "endpoint said hello");
    }

    fn exposed_to(&self, sender: Option<&Endpoint>) -> Result<(), Fault> {
        let expose = self.inner.expose.read();
        let Some(clause) = expose.as_ref() else {
            return Ok(());
        };
        match sender {
            Some(sender) if clause.matches(sender) => Ok(()),
            Some(sender) => {
                warn!(endpoint = %sender, "request rejected by expose policy");
                Err(Fault::new(
                    ErrorKind::Permission,
                    format!("{} is not exposed to {sender}", self.endpoint()),
                ))
            }
            None => Err(Fault::new(
                ErrorKind::Permission,
                format!("{} is not exposed to anonymous senders", self.endpoint()),
            )),
        }
    }

    fn remote_context(&self, header: &BlockHeader) -> ExecutionContext {
        ExecutionContext {
            sender: header.sender.clone(),
            current: self.endpoint().clone(),
            timestamp: header.timestamp,
            encrypted: header.is_encrypted(),
            signed: header.is_signed(),
            this: Value::Void,
            it: Value::Void,
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
