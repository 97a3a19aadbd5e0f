//! Expression emission.
//!
//! Every expression leaves exactly one value on the interpreter's operand
//! stack: operands are emitted first, the operator after them.

use datex_types::ast::*;
use datex_types::{Rational, Value};

use crate::compiler::Emitter;
use crate::error::{CodegenError, CodegenResult};
use crate::literal::{write_endpoint, write_int, write_text, write_type, write_value};
use crate::opcode::Opcode;
use crate::reader::{ROOT_INTERNAL_VAR, ROOT_POINTER, ROOT_VAR};

impl<'d> Emitter<'d> {
    pub(crate) fn emit_expr(&mut self, expr: &Expr) -> CodegenResult<()> {
        match &expr.kind {
            // ── Literals ──────────────────────────────────────────────────
            ExprKind::Int(i) => write_int(&mut self.w, *i),
            ExprKind::Float(x) => write_value(&mut self.w, &Value::Float(*x))?,
            ExprKind::Fraction {
                numerator,
                denominator,
            } => {
                let rational = Rational::new(*numerator, *denominator)
                    .ok_or(CodegenError::ZeroDenominator { span: expr.span })?;
                write_value(&mut self.w, &Value::from_rational(rational))?;
            }
            ExprKind::Text(text) => write_text(&mut self.w, text)?,
            ExprKind::Buffer(bytes) => write_value(&mut self.w, &Value::Buffer(bytes.clone()))?,
            ExprKind::Bool(true) => {
                self.w.op(Opcode::TRUE);
            }
            ExprKind::Bool(false) => {
                self.w.op(Opcode::FALSE);
            }
            ExprKind::Null => {
                self.w.op(Opcode::NULL);
            }
            ExprKind::Void => {
                self.w.op(Opcode::VOID);
            }
            ExprKind::Endpoint(endpoint) => write_endpoint(&mut self.w, endpoint)?,
            ExprKind::Pointer(id) => {
                self.w.op(Opcode::POINTER).raw(id.as_bytes());
            }
            ExprKind::Type(tag) => write_type(&mut self.w, tag)?,
            ExprKind::Placeholder(index) => self.emit_placeholder(*index, expr)?,

            // ── Variables ─────────────────────────────────────────────────
            ExprKind::Variable(name) => {
                self.w.op(Opcode::VAR).short_name(name)?;
            }
            ExprKind::InternalVar(name) => {
                self.w.op(Opcode::INTERNAL_VAR).short_name(name)?;
            }
            ExprKind::Special(var) => {
                self.w.op(Opcode::for_special(*var));
            }

            // ── Collections ───────────────────────────────────────────────
            ExprKind::Array(items) => {
                self.emit_sequence(Opcode::ARRAY_START, items, Opcode::ARRAY_END)?
            }
            ExprKind::Tuple(items) => {
                self.emit_sequence(Opcode::TUPLE_START, items, Opcode::TUPLE_END)?
            }
            ExprKind::Object(entries) => {
                self.w.op(Opcode::OBJECT_START);
                for (key, value) in entries {
                    write_text(&mut self.w, key)?;
                    self.emit_expr(value)?;
                }
                self.w.op(Opcode::OBJECT_END);
            }
            ExprKind::Scope(statements) => {
                self.w.op(Opcode::SUBSCOPE_START);
                self.emit_statements(statements)?;
                self.w.op(Opcode::SUBSCOPE_END);
            }

            // ── Operators ─────────────────────────────────────────────────
            ExprKind::Binary { left, op, right } => {
                self.emit_expr(left)?;
                self.emit_expr(right)?;
                self.w.op(Opcode::for_binary(*op));
            }
            ExprKind::Unary { op, operand } => {
                self.emit_expr(operand)?;
                self.w.op(Opcode::for_unary(*op));
            }
            ExprKind::Member { object, key } => {
                self.emit_expr(object)?;
                self.emit_expr(key)?;
                self.w.op(Opcode::CHILD_GET);
            }
            ExprKind::Assign { target, op, value } => self.emit_assign(target, *op, value)?,

            // ── Control ───────────────────────────────────────────────────
            ExprKind::Remote { target, body } => {
                self.emit_expr(target)?;
                let sub = self.emit_remote_body(body)?;
                self.w.op(Opcode::REMOTE).long_bytes(&sub)?;
            }
            ExprKind::Return(value) => {
                match value {
                    Some(value) => self.emit_expr(value)?,
                    None => {
                        self.w.op(Opcode::VOID);
                    }
                }
                self.w.op(Opcode::RETURN);
            }
            ExprKind::Timeout(value) => {
                self.emit_expr(value)?;
                self.w.op(Opcode::TIMEOUT);
            }
        }
        Ok(())
    }

    fn emit_sequence(&mut self, start: Opcode, items: &[Expr], end: Opcode) -> CodegenResult<()> {
        self.w.op(start);
        for item in items {
            self.emit_expr(item)?;
        }
        self.w.op(end);
        Ok(())
    }

    /// `place = value` / `place op= value`.
    ///
    /// A bare root uses the SET_* / *_ACTION instruction of its kind. A child
    /// path pushes its keys before the value and ends in CHILD_SET or
    /// CHILD_ACTION with the root and path depth inline.
    fn emit_assign(
        &mut self,
        target: &Place,
        op: Option<BinaryOp>,
        value: &Expr,
    ) -> CodegenResult<()> {
        if target.path.is_empty() {
            self.emit_expr(value)?;
            return self.emit_root_store(&target.root, op);
        }
        let depth =
            u8::try_from(target.path.len()).map_err(|_| CodegenError::PathTooDeep(target.path.len()))?;
        for key in &target.path {
            self.emit_expr(key)?;
        }
        self.emit_expr(value)?;
        match op {
            None => {
                self.w.op(Opcode::CHILD_SET);
                self.emit_root(&target.root)?;
                self.w.u8(depth);
            }
            Some(op) => {
                self.w.op(Opcode::CHILD_ACTION);
                self.emit_root(&target.root)?;
                self.w.u8(depth).op(Opcode::for_binary(op));
            }
        }
        Ok(())
    }

    fn emit_root_store(&mut self, root: &PlaceRoot, op: Option<BinaryOp>) -> CodegenResult<()> {
        match (root, op) {
            (PlaceRoot::Variable(name), None) => {
                self.w.op(Opcode::SET_VAR).short_name(name)?;
            }
            (PlaceRoot::Variable(name), Some(op)) => {
                self.w.op(Opcode::VAR_ACTION).short_name(name)?;
                self.w.op(Opcode::for_binary(op));
            }
            (PlaceRoot::InternalVar(name), None) => {
                self.w.op(Opcode::SET_INTERNAL_VAR).short_name(name)?;
            }
            (PlaceRoot::InternalVar(name), Some(op)) => {
                self.w.op(Opcode::INTERNAL_VAR_ACTION).short_name(name)?;
                self.w.op(Opcode::for_binary(op));
            }
            (PlaceRoot::Pointer(id), None) => {
                self.w.op(Opcode::SET_POINTER).raw(id.as_bytes());
            }
            (PlaceRoot::Pointer(id), Some(op)) => {
                self.w
                    .op(Opcode::POINTER_ACTION)
                    .raw(id.as_bytes())
                    .op(Opcode::for_binary(op));
            }
        }
        Ok(())
    }

    /// Inline root operand of CHILD_SET / CHILD_ACTION.
    pub(crate) fn emit_root(&mut self, root: &PlaceRoot) -> CodegenResult<()> {
        match root {
            PlaceRoot::Variable(name) => {
                self.w.u8(ROOT_VAR).short_name(name)?;
            }
            PlaceRoot::InternalVar(name) => {
                self.w.u8(ROOT_INTERNAL_VAR).short_name(name)?;
            }
            PlaceRoot::Pointer(id) => {
                self.w.u8(ROOT_POINTER).raw(id.as_bytes());
            }
        }
        Ok(())
    }
}
