//! DATEX body generator: script AST to DXB instruction stream, and back.
//!
//! # Body layout
//!
//! A body is a flat sequence of `(opcode, operands)` records in postfix
//! order: operands first, operator after. Each top-level statement ends
//! with `CLOSE_AND_STORE`; the value stored last is the body's result.
//! Sub-scopes are bracketed by `SUBSCOPE_START`/`SUBSCOPE_END` and remote
//! call bodies are nested as u32-length-prefixed sub-buffers.
//!
//! See [`opcode::Opcode`] for the stable code table and
//! [`reader::Instruction`] for the operand layout of each instruction.

pub mod compiler;
pub mod decompile;
pub mod delta;
pub mod error;
mod expr;
pub mod literal;
pub mod opcode;
pub mod reader;

pub use compiler::{emit_body, DataPlacement};
pub use decompile::{decompile_body, DecompileOptions};
pub use delta::{delta_body, Delta};
pub use error::{CodegenError, CodegenResult};
pub use literal::{fault_body, value_body, write_value, BodyWriter};
pub use opcode::Opcode;
pub use reader::{BodyReader, Instruction};
