//! DXB body decoding.
//!
//! [`BodyReader`] turns a body into a stream of [`Instruction`]s. It is
//! shared by the interpreter and the decompiler, so both agree on every
//! operand layout. Any truncated operand, unknown opcode or invalid name
//! is a [`MalformedBlockError`] carrying the byte offset.

use datex_types::ast::{BinaryOp, PlaceRoot, SpecialVar, UnaryOp};
use datex_types::{
    Endpoint, ErrorKind, Fault, IdEndpoint, MalformedBlockError, PointerId, Rational, StdType,
    TypeTag, Value, ID_ENDPOINT_LEN, POINTER_ID_LEN,
};

use crate::opcode::Opcode;

/// Root tags of CHILD_SET / CHILD_ACTION.
pub(crate) const ROOT_VAR: u8 = 0;
pub(crate) const ROOT_INTERNAL_VAR: u8 = 1;
pub(crate) const ROOT_POINTER: u8 = 2;

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction<'a> {
    /// Explicit end of body.
    End,
    CloseAndStore,
    SubscopeStart,
    SubscopeEnd,
    Return,
    Timeout,

    /// Self-contained scalar literal.
    Literal(Value),
    ArrayStart,
    ArrayEnd,
    ObjectStart,
    ObjectEnd,
    TupleStart,
    TupleEnd,

    Var(String),
    SetVar(String),
    VarAction(String, BinaryOp),
    InternalVar(String),
    SetInternalVar(String),
    InternalVarAction(String, BinaryOp),
    Special(SpecialVar),
    /// Injected data slot.
    Insert(u32),

    Pointer(PointerId),
    SetPointer(PointerId),
    PointerAction(PointerId, BinaryOp),

    Unary(UnaryOp),
    Binary(BinaryOp),

    /// Pops key, then object.
    ChildGet,
    /// Pops value, then `depth` keys (outermost first on the stack).
    ChildSet { root: PlaceRoot, depth: u8 },
    ChildAction {
        root: PlaceRoot,
        depth: u8,
        op: BinaryOp,
    },

    /// Pops the target; the sub-body runs on the receivers.
    Remote(&'a [u8]),
    Throw(Fault),
}

/// Cursor over a body.
#[derive(Debug, Clone)]
pub struct BodyReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

pub type ReadResult<T> = Result<T, MalformedBlockError>;

impl<'a> BodyReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Resume reading at `pos`.
    pub fn at(bytes: &'a [u8], pos: usize) -> Self {
        Self { bytes, pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    /// Decode the next instruction; `None` at the end of the body.
    pub fn next_instruction(&mut self) -> ReadResult<Option<Instruction<'a>>> {
        if self.is_at_end() {
            return Ok(None);
        }
        let start = self.pos;
        let byte = self.take_u8()?;
        let op = Opcode::from_byte(byte).ok_or_else(|| {
            MalformedBlockError::new(start, format!("unknown opcode 0x{byte:02x}"))
        })?;
        if let Some(binary) = op.as_binary() {
            return Ok(Some(Instruction::Binary(binary)));
        }
        if let Some(unary) = op.as_unary() {
            return Ok(Some(Instruction::Unary(unary)));
        }
        if let Some(special) = op.as_special() {
            return Ok(Some(Instruction::Special(special)));
        }
        let instruction = match op {
            Opcode::END => Instruction::End,
            Opcode::CLOSE_AND_STORE => Instruction::CloseAndStore,
            Opcode::SUBSCOPE_START => Instruction::SubscopeStart,
            Opcode::SUBSCOPE_END => Instruction::SubscopeEnd,
            Opcode::RETURN => Instruction::Return,
            Opcode::TIMEOUT => Instruction::Timeout,

            Opcode::ARRAY_START => Instruction::ArrayStart,
            Opcode::ARRAY_END => Instruction::ArrayEnd,
            Opcode::OBJECT_START => Instruction::ObjectStart,
            Opcode::OBJECT_END => Instruction::ObjectEnd,
            Opcode::TUPLE_START => Instruction::TupleStart,
            Opcode::TUPLE_END => Instruction::TupleEnd,

            Opcode::VAR => Instruction::Var(self.take_name()?),
            Opcode::SET_VAR => Instruction::SetVar(self.take_name()?),
            Opcode::VAR_ACTION => {
                let name = self.take_name()?;
                Instruction::VarAction(name, self.take_action()?)
            }
            Opcode::INTERNAL_VAR => Instruction::InternalVar(self.take_name()?),
            Opcode::SET_INTERNAL_VAR => Instruction::SetInternalVar(self.take_name()?),
            Opcode::INTERNAL_VAR_ACTION => {
                let name = self.take_name()?;
                Instruction::InternalVarAction(name, self.take_action()?)
            }
            Opcode::INSERT => Instruction::Insert(self.take_u32()?),

            Opcode::POINTER => Instruction::Pointer(self.take_pointer_id()?),
            Opcode::SET_POINTER => Instruction::SetPointer(self.take_pointer_id()?),
            Opcode::POINTER_ACTION => {
                let id = self.take_pointer_id()?;
                Instruction::PointerAction(id, self.take_action()?)
            }

            Opcode::CHILD_GET => Instruction::ChildGet,
            Opcode::CHILD_SET => {
                let root = self.take_root()?;
                Instruction::ChildSet {
                    root,
                    depth: self.take_u8()?,
                }
            }
            Opcode::CHILD_ACTION => {
                let root = self.take_root()?;
                let depth = self.take_u8()?;
                Instruction::ChildAction {
                    root,
                    depth,
                    op: self.take_action()?,
                }
            }

            Opcode::REMOTE => {
                let len = self.take_u32()? as usize;
                Instruction::Remote(self.take(len)?)
            }
            Opcode::THROW_ERROR => {
                let at = self.pos;
                let kind = ErrorKind::from_byte(self.take_u8()?).ok_or_else(|| {
                    MalformedBlockError::new(at, "unknown error kind")
                })?;
                let message = self.take_long_text()?;
                Instruction::Throw(Fault::new(kind, message))
            }

            literal => Instruction::Literal(self.take_literal(literal, start)?),
        };
        Ok(Some(instruction))
    }

    // ── Literals ──────────────────────────────────────────────────────────────

    fn take_literal(&mut self, op: Opcode, start: usize) -> ReadResult<Value> {
        Ok(match op {
            Opcode::TRUE => Value::Bool(true),
            Opcode::FALSE => Value::Bool(false),
            Opcode::NULL => Value::Null,
            Opcode::VOID => Value::Void,
            Opcode::INT_8 => Value::Int(i8::from_le_bytes(self.take_array()?) as i64),
            Opcode::INT_16 => Value::Int(i16::from_le_bytes(self.take_array()?) as i64),
            Opcode::INT_32 => Value::Int(i32::from_le_bytes(self.take_array()?) as i64),
            Opcode::INT_64 => Value::Int(i64::from_le_bytes(self.take_array()?)),
            Opcode::FLOAT_64 => Value::Float(f64::from_le_bytes(self.take_array()?)),
            Opcode::QUANTITY => {
                let numerator = i64::from_le_bytes(self.take_array()?);
                let denominator = u64::from_le_bytes(self.take_array()?);
                let rational = i64::try_from(denominator)
                    .ok()
                    .and_then(|d| Rational::new(numerator, d))
                    .ok_or_else(|| MalformedBlockError::new(start, "invalid quantity"))?;
                Value::from_rational(rational)
            }
            Opcode::SHORT_STRING => {
                let len = self.take_u8()? as usize;
                Value::Text(self.take_utf8(len)?)
            }
            Opcode::STRING => Value::Text(self.take_long_text()?),
            Opcode::BUFFER => {
                let len = self.take_u32()? as usize;
                Value::Buffer(self.take(len)?.to_vec())
            }
            Opcode::PERSON_ALIAS
            | Opcode::PERSON_ALIAS_WILDCARD
            | Opcode::INSTITUTION_ALIAS
            | Opcode::INSTITUTION_ALIAS_WILDCARD
            | Opcode::ENDPOINT
            | Opcode::ENDPOINT_WILDCARD => Value::Endpoint(self.take_endpoint(op, start)?),
            Opcode::TYPE => {
                let std = self.take_u8()?;
                let tag = if std == 0 {
                    TypeTag::Named(self.take_name()?)
                } else {
                    TypeTag::Std(StdType::from_byte(std).ok_or_else(|| {
                        MalformedBlockError::new(start, format!("unknown type {std}"))
                    })?)
                };
                Value::Type(tag)
            }
            other => {
                return Err(MalformedBlockError::new(
                    start,
                    format!("{} is not valid here", other.name()),
                ))
            }
        })
    }

    fn take_endpoint(&mut self, op: Opcode, start: usize) -> ReadResult<Endpoint> {
        let invalid = |reason: &str| MalformedBlockError::new(start, reason.to_string());
        let endpoint = match op {
            Opcode::ENDPOINT | Opcode::ENDPOINT_WILDCARD => {
                let bytes: [u8; ID_ENDPOINT_LEN] = self.take_array()?;
                Endpoint::from_id(IdEndpoint::from_bytes(bytes))
            }
            Opcode::INSTITUTION_ALIAS | Opcode::INSTITUTION_ALIAS_WILDCARD => {
                let name = self.take_name()?;
                Endpoint::parse(&format!("@+{name}")).map_err(|_| invalid("invalid alias"))?
            }
            _ => {
                let name = self.take_name()?;
                Endpoint::parse(&format!("@{name}")).map_err(|_| invalid("invalid alias"))?
            }
        };
        let wildcard = matches!(
            op,
            Opcode::ENDPOINT_WILDCARD
                | Opcode::PERSON_ALIAS_WILDCARD
                | Opcode::INSTITUTION_ALIAS_WILDCARD
        );
        if wildcard {
            return Ok(endpoint.any_instance());
        }
        let instance = self.take_name()?;
        if instance.is_empty() {
            Ok(endpoint)
        } else if instance.contains('/') {
            Err(invalid("invalid instance"))
        } else {
            Ok(endpoint.with_instance(instance))
        }
    }

    // ── Operands ──────────────────────────────────────────────────────────────

    fn take_root(&mut self) -> ReadResult<PlaceRoot> {
        let at = self.pos;
        Ok(match self.take_u8()? {
            ROOT_VAR => PlaceRoot::Variable(self.take_name()?),
            ROOT_INTERNAL_VAR => PlaceRoot::InternalVar(self.take_name()?),
            ROOT_POINTER => PlaceRoot::Pointer(self.take_pointer_id()?),
            other => {
                return Err(MalformedBlockError::new(
                    at,
                    format!("unknown child root tag {other}"),
                ))
            }
        })
    }

    /// Operator byte of an `*_ACTION` instruction: one of ADD..DIVIDE.
    fn take_action(&mut self) -> ReadResult<BinaryOp> {
        let at = self.pos;
        let byte = self.take_u8()?;
        Opcode::from_byte(byte)
            .and_then(Opcode::as_binary)
            .filter(|op| op.is_assignable())
            .ok_or_else(|| MalformedBlockError::new(at, format!("invalid action operator 0x{byte:02x}")))
    }

    fn take_pointer_id(&mut self) -> ReadResult<PointerId> {
        let at = self.pos;
        let bytes = self.take(POINTER_ID_LEN)?;
        PointerId::from_slice(bytes).ok_or_else(|| MalformedBlockError::new(at, "invalid pointer id"))
    }

    fn take_name(&mut self) -> ReadResult<String> {
        let len = self.take_u8()? as usize;
        self.take_utf8(len)
    }

    fn take_long_text(&mut self) -> ReadResult<String> {
        let len = self.take_u32()? as usize;
        self.take_utf8(len)
    }

    fn take_utf8(&mut self, len: usize) -> ReadResult<String> {
        let at = self.pos;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| MalformedBlockError::new(at, "invalid UTF-8 text"))
    }

    fn take_u8(&mut self) -> ReadResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn take_u32(&mut self) -> ReadResult<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    fn take_array<const N: usize>(&mut self) -> ReadResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn take(&mut self, len: usize) -> ReadResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                MalformedBlockError::new(self.pos, format!("truncated: {len} more bytes expected"))
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }
}

impl<'a> Iterator for BodyReader<'a> {
    type Item = ReadResult<Instruction<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_instruction().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::literal::{write_value, BodyWriter};

    fn decode(bytes: &[u8]) -> ReadResult<Vec<Instruction<'_>>> {
        BodyReader::new(bytes).collect()
    }

    #[test]
    fn literals_decode_to_values() {
        for value in [
            Value::Int(-300),
            Value::Float(0.25),
            Value::text("hi"),
            Value::Buffer(vec![1, 2]),
            Value::Endpoint(Endpoint::institution("unyt").with_instance("a")),
            Value::Type(TypeTag::Named("Person".into())),
        ] {
            let mut w = BodyWriter::new();
            write_value(&mut w, &value).unwrap();
            let bytes = w.finish();
            assert_eq!(decode(&bytes).unwrap(), vec![Instruction::Literal(value)]);
        }
    }

    #[test]
    fn unknown_opcode_is_malformed() {
        let err = decode(&[0xc6, 0x02]).unwrap_err();
        assert_eq!(err.offset, 1);
    }

    #[test]
    fn truncated_operand_is_malformed() {
        let err = decode(&[0xc4, 1, 2, 3]).unwrap_err();
        assert!(err.reason.contains("truncated"), "{err}");
    }

    #[test]
    fn zero_denominator_quantity_is_malformed() {
        let mut bytes = vec![0xcc];
        bytes.extend_from_slice(&1i64.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn remote_sub_body_is_borrowed() {
        let bytes = [0xf6, 2, 0, 0, 0, 0xc6, 0xa0, 0xa0];
        assert_eq!(
            decode(&bytes).unwrap(),
            vec![Instruction::Remote(&[0xc6, 0xa0]), Instruction::CloseAndStore]
        );
    }
}
