//! Pointer deltas and their DXB bodies.
//!
//! A delta is the minimal description of one pointer mutation. Its body is an
//! ordinary assignment, so a receiver applies it by executing the body:
//! `Replace` becomes `$id = value`, `Set` becomes `$id.k1.k2 = value`.

use datex_types::ast::PlaceRoot;
use datex_types::{PointerId, Value};

use crate::compiler::{DataPlacement, Emitter};
use crate::error::{CodegenError, CodegenResult};
use crate::literal::write_value;
use crate::opcode::Opcode;

/// One pointer mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    /// The whole value was replaced.
    Replace(Value),
    /// The child at `path` was set. A `Void` value removes an object key.
    Set { path: Vec<Value>, value: Value },
}

impl Delta {
    pub fn value(&self) -> &Value {
        match self {
            Delta::Replace(value) | Delta::Set { value, .. } => value,
        }
    }
}

/// Encode `delta` on pointer `id` as a complete body.
pub fn delta_body(id: &PointerId, delta: &Delta) -> CodegenResult<Vec<u8>> {
    let mut emitter = Emitter::new(&[], DataPlacement::Inline);
    match delta {
        Delta::Replace(value) => {
            write_value(&mut emitter.w, value)?;
            emitter.w.op(Opcode::SET_POINTER).raw(id.as_bytes());
        }
        Delta::Set { path, value } => {
            let depth =
                u8::try_from(path.len()).map_err(|_| CodegenError::PathTooDeep(path.len()))?;
            for key in path {
                write_value(&mut emitter.w, key)?;
            }
            write_value(&mut emitter.w, value)?;
            emitter.w.op(Opcode::CHILD_SET);
            emitter.emit_root(&PlaceRoot::Pointer(*id))?;
            emitter.w.u8(depth);
        }
    }
    emitter.w.op(Opcode::CLOSE_AND_STORE);
    Ok(emitter.finish())
}
