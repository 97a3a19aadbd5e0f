//! Body emitter.
//!
//! Walks a parsed [`Script`] and produces a postfix DXB body:
//! 1. every statement is emitted as an expression followed by
//!    `CLOSE_AND_STORE`, so the body's value is the last stored value;
//! 2. sub-scopes are bracketed by `SUBSCOPE_START` / `SUBSCOPE_END`;
//! 3. remote bodies are compiled separately and embedded as a
//!    length-prefixed sub-buffer after `REMOTE`;
//! 4. injected data is inlined, or referenced through `INSERT` when the
//!    caller keeps the values next to the body.

use datex_types::ast::*;
use datex_types::Value;
use tracing::trace;

use crate::error::{CodegenError, CodegenResult};
use crate::literal::{is_scalar, BodyWriter};
use crate::opcode::Opcode;

// ══════════════════════════════════════════════════════════════════════════════
// Public API
// ══════════════════════════════════════════════════════════════════════════════

/// How injected data values reach the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataPlacement {
    /// Every value is encoded in place. Used for blocks sent over the wire.
    #[default]
    Inline,
    /// Scalars are inlined; composites become `INSERT n` and are read from
    /// the scope's internal variables at run time.
    Insert,
}

/// Compile `script` into a DXB body.
pub fn emit_body(
    script: &Script,
    data: &[Value],
    placement: DataPlacement,
) -> CodegenResult<Vec<u8>> {
    let mut emitter = Emitter::new(data, placement);
    emitter.emit_statements(&script.statements)?;
    let body = emitter.finish();
    trace!(len = body.len(), statements = script.statements.len(), "emitted body");
    Ok(body)
}

// ══════════════════════════════════════════════════════════════════════════════
// Emitter
// ══════════════════════════════════════════════════════════════════════════════

/// Emission state for one body. Remote sub-bodies get their own emitter.
pub(crate) struct Emitter<'d> {
    pub(crate) w: BodyWriter,
    data: &'d [Value],
    placement: DataPlacement,
}

impl<'d> Emitter<'d> {
    pub(crate) fn new(data: &'d [Value], placement: DataPlacement) -> Self {
        Self {
            w: BodyWriter::new(),
            data,
            placement,
        }
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.w.finish()
    }

    /// `stmt CLOSE_AND_STORE` for each statement.
    pub(crate) fn emit_statements(&mut self, statements: &[Expr]) -> CodegenResult<()> {
        for statement in statements {
            self.emit_expr(statement)?;
            self.w.op(Opcode::CLOSE_AND_STORE);
        }
        Ok(())
    }

    /// Body of a remote call: always self-contained.
    pub(crate) fn emit_remote_body(&self, body: &Expr) -> CodegenResult<Vec<u8>> {
        let mut sub = Emitter::new(self.data, DataPlacement::Inline);
        match &body.kind {
            ExprKind::Scope(statements) => sub.emit_statements(statements)?,
            _ => sub.emit_statements(std::slice::from_ref(body))?,
        }
        Ok(sub.finish())
    }

    /// Resolve placeholder `?index` against the injected data.
    pub(crate) fn emit_placeholder(&mut self, index: u32, expr: &Expr) -> CodegenResult<()> {
        let value = self
            .data
            .get(index as usize)
            .ok_or(CodegenError::MissingData {
                index,
                span: expr.span,
            })?;
        if self.placement == DataPlacement::Insert && !is_scalar(value) {
            self.w.op(Opcode::INSERT).u32(index);
            return Ok(());
        }
        crate::literal::write_value(&mut self.w, value)
    }
}
