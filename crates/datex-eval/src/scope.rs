//! Executable scopes: a compiled body plus the data injected into it.

use std::sync::{Arc, OnceLock};

use datex_codegen::{decompile_body, DataPlacement, DecompileOptions};
use datex_compiler::{compile_body, CompilerResult};
use datex_types::Value;

use crate::env::ExecutionContext;
use crate::error::{EvalError, EvalResult};
use crate::interpreter::{Interpreter, Step};
use crate::pointer::{PointerStore, Propagation};

/// One executable unit. Every execution gets its own [`Interpreter`], so a
/// scope can be run any number of times, also concurrently.
#[derive(Debug, Clone)]
pub struct Scope {
    internal_vars: Vec<Value>,
    compiled: Arc<[u8]>,
    decompiled: OnceLock<String>,
}

impl Scope {
    pub fn new(compiled: Vec<u8>, internal_vars: Vec<Value>) -> Self {
        Self {
            internal_vars,
            compiled: compiled.into(),
            decompiled: OnceLock::new(),
        }
    }

    /// Compile `script`. Composite data stays in the scope and is referenced
    /// from the body by index.
    pub fn compile(script: &str, data: Vec<Value>) -> CompilerResult<Self> {
        let body = compile_body(script, &data, DataPlacement::Insert)?;
        Ok(Self::new(body, data))
    }

    pub fn compiled(&self) -> &[u8] {
        &self.compiled
    }

    pub fn internal_vars(&self) -> &[Value] {
        &self.internal_vars
    }

    /// Formatted script text of the body, computed once.
    pub fn decompiled(&self) -> EvalResult<&str> {
        if let Some(text) = self.decompiled.get() {
            return Ok(text);
        }
        let text = decompile_body(
            &self.compiled,
            DecompileOptions {
                formatted: true,
                colorized: false,
            },
        )?;
        Ok(self.decompiled.get_or_init(|| text))
    }

    /// A fresh interpreter over this scope.
    pub fn interpreter(
        &self,
        context: ExecutionContext,
        pointers: Arc<PointerStore>,
    ) -> Interpreter {
        Interpreter::new(
            Arc::clone(&self.compiled),
            self.internal_vars.clone(),
            context,
            pointers,
        )
    }

    /// Run to completion without a network. A remote call is a
    /// `RuntimeError` here; use a runtime to execute scopes that call out.
    pub fn execute_local(
        &self,
        context: ExecutionContext,
        pointers: Arc<PointerStore>,
    ) -> EvalResult<(Value, Vec<Propagation>)> {
        let mut interpreter = self.interpreter(context, pointers);
        match interpreter.run()? {
            Step::Completed(value) => Ok((value, interpreter.take_propagations())),
            Step::Suspended(call) => Err(EvalError::Runtime(format!(
                "remote call to {} needs a runtime",
                call.target
            ))),
        }
    }
}
