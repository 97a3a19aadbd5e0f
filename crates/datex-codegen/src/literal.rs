//! Literal encoding: every [`Value`] variant has an explicit instruction.
//!
//! Integers use the narrowest of `INT_8`..`INT_64`, strings up to 255 bytes
//! use `SHORT_STRING`, fractions stay exact as `QUANTITY`. Collections are
//! framed by their START/END opcodes with the items encoded in between;
//! object keys are encoded as string literals before each value.

use datex_types::{Endpoint, EndpointKind, Fault, Instance, TargetClause, TypeTag, Value};

use crate::error::{CodegenError, CodegenResult};
use crate::opcode::Opcode;

// ══════════════════════════════════════════════════════════════════════════════
// Byte Writer
// ══════════════════════════════════════════════════════════════════════════════

/// Append-only body buffer with little-endian primitive writers.
#[derive(Debug, Default)]
pub struct BodyWriter {
    bytes: Vec<u8>,
}

impl BodyWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn op(&mut self, op: Opcode) -> &mut Self {
        self.bytes.push(op as u8);
        self
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.bytes.push(value);
        self
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    /// u8 length prefix followed by the UTF-8 bytes.
    pub fn short_name(&mut self, name: &str) -> CodegenResult<&mut Self> {
        let len = u8::try_from(name.len()).map_err(|_| CodegenError::NameTooLong {
            name: name.to_string(),
            len: name.len(),
        })?;
        Ok(self.u8(len).raw(name.as_bytes()))
    }

    /// u32 length prefix followed by `bytes`.
    pub fn long_bytes(&mut self, bytes: &[u8]) -> CodegenResult<&mut Self> {
        let len = u32::try_from(bytes.len()).map_err(|_| CodegenError::BodyTooLarge(bytes.len()))?;
        Ok(self.u32(len).raw(bytes))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Values
// ══════════════════════════════════════════════════════════════════════════════

/// Whether `value` is inlined even when composites go through `INSERT`.
pub fn is_scalar(value: &Value) -> bool {
    !matches!(
        value,
        Value::Array(_) | Value::Object(_) | Value::Tuple(_) | Value::Target(_)
    )
}

/// Encode `value` as a self-contained literal.
pub fn write_value(w: &mut BodyWriter, value: &Value) -> CodegenResult<()> {
    match value {
        Value::Void => {
            w.op(Opcode::VOID);
        }
        Value::Null => {
            w.op(Opcode::NULL);
        }
        Value::Bool(true) => {
            w.op(Opcode::TRUE);
        }
        Value::Bool(false) => {
            w.op(Opcode::FALSE);
        }
        Value::Int(i) => write_int(w, *i),
        Value::Float(x) => {
            w.op(Opcode::FLOAT_64).raw(&x.to_le_bytes());
        }
        Value::Rational(r) => {
            // denominators are kept positive by Rational
            let denominator = r.denominator().unsigned_abs();
            w.op(Opcode::QUANTITY)
                .raw(&r.numerator().to_le_bytes())
                .raw(&denominator.to_le_bytes());
        }
        Value::Text(text) => write_text(w, text)?,
        Value::Buffer(bytes) => {
            w.op(Opcode::BUFFER).long_bytes(bytes)?;
        }
        Value::Array(items) => {
            w.op(Opcode::ARRAY_START);
            for item in items {
                write_value(w, item)?;
            }
            w.op(Opcode::ARRAY_END);
        }
        Value::Tuple(items) => {
            w.op(Opcode::TUPLE_START);
            for item in items {
                write_value(w, item)?;
            }
            w.op(Opcode::TUPLE_END);
        }
        Value::Object(entries) => {
            w.op(Opcode::OBJECT_START);
            for (key, item) in entries {
                write_text(w, key)?;
                write_value(w, item)?;
            }
            w.op(Opcode::OBJECT_END);
        }
        Value::Pointer(id) => {
            w.op(Opcode::POINTER).raw(id.as_bytes());
        }
        Value::Endpoint(endpoint) => write_endpoint(w, endpoint)?,
        Value::Target(clause) => write_target(w, clause)?,
        Value::Type(tag) => write_type(w, tag)?,
    }
    Ok(())
}

pub fn write_int(w: &mut BodyWriter, value: i64) {
    if let Ok(v) = i8::try_from(value) {
        w.op(Opcode::INT_8).raw(&v.to_le_bytes());
    } else if let Ok(v) = i16::try_from(value) {
        w.op(Opcode::INT_16).raw(&v.to_le_bytes());
    } else if let Ok(v) = i32::try_from(value) {
        w.op(Opcode::INT_32).raw(&v.to_le_bytes());
    } else {
        w.op(Opcode::INT_64).raw(&value.to_le_bytes());
    }
}

pub fn write_text(w: &mut BodyWriter, text: &str) -> CodegenResult<()> {
    match u8::try_from(text.len()) {
        Ok(len) => {
            w.op(Opcode::SHORT_STRING).u8(len).raw(text.as_bytes());
        }
        Err(_) => {
            w.op(Opcode::STRING).long_bytes(text.as_bytes())?;
        }
    }
    Ok(())
}

/// Alias endpoints carry their name, id endpoints their 12 raw bytes. Both
/// are followed by the instance name (empty for the main instance) unless a
/// wildcard opcode is used.
pub fn write_endpoint(w: &mut BodyWriter, endpoint: &Endpoint) -> CodegenResult<()> {
    let wildcard = endpoint.is_wildcard();
    match (endpoint.kind(), endpoint.id_endpoint()) {
        (EndpointKind::Id, Some(id)) => {
            let op = if wildcard {
                Opcode::ENDPOINT_WILDCARD
            } else {
                Opcode::ENDPOINT
            };
            w.op(op).raw(id.as_bytes());
        }
        (kind, _) => {
            let op = match (kind, wildcard) {
                (EndpointKind::Institution, false) => Opcode::INSTITUTION_ALIAS,
                (EndpointKind::Institution, true) => Opcode::INSTITUTION_ALIAS_WILDCARD,
                (_, false) => Opcode::PERSON_ALIAS,
                (_, true) => Opcode::PERSON_ALIAS_WILDCARD,
            };
            w.op(op).short_name(endpoint.name())?;
        }
    }
    if !wildcard {
        let instance = match endpoint.instance() {
            Instance::Named(name) => name.as_str(),
            _ => "",
        };
        w.short_name(instance)?;
    }
    Ok(())
}

/// Target clauses are endpoint literals combined with postfix AND/OR/NOT.
pub fn write_target(w: &mut BodyWriter, clause: &TargetClause) -> CodegenResult<()> {
    match clause {
        TargetClause::Endpoint(endpoint) => write_endpoint(w, endpoint)?,
        TargetClause::And(parts) | TargetClause::Or(parts) => {
            let op = if matches!(clause, TargetClause::And(_)) {
                Opcode::AND
            } else {
                Opcode::OR
            };
            for (i, part) in parts.iter().enumerate() {
                write_target(w, part)?;
                if i > 0 {
                    w.op(op);
                }
            }
        }
        TargetClause::Not(inner) => {
            write_target(w, inner)?;
            w.op(Opcode::NOT);
        }
    }
    Ok(())
}

/// `TYPE` + std type byte, or `TYPE 0x00` + u8 name length + name.
pub fn write_type(w: &mut BodyWriter, tag: &TypeTag) -> CodegenResult<()> {
    w.op(Opcode::TYPE);
    match tag {
        TypeTag::Std(std) => {
            w.u8(*std as u8);
        }
        TypeTag::Named(name) => {
            w.u8(0).short_name(name)?;
        }
    }
    Ok(())
}

/// Encode a single value as a complete body (`value CLOSE_AND_STORE`).
pub fn value_body(value: &Value) -> CodegenResult<Vec<u8>> {
    let mut w = BodyWriter::new();
    write_value(&mut w, value)?;
    w.op(Opcode::CLOSE_AND_STORE);
    Ok(w.finish())
}

/// Encode `fault` as the body of an error response.
pub fn fault_body(fault: &Fault) -> CodegenResult<Vec<u8>> {
    let mut w = BodyWriter::new();
    w.op(Opcode::THROW_ERROR)
        .u8(fault.kind as u8)
        .long_bytes(fault.message.as_bytes())?;
    Ok(w.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(value: &Value) -> Vec<u8> {
        let mut w = BodyWriter::new();
        write_value(&mut w, value).unwrap();
        w.finish()
    }

    #[test]
    fn integers_use_the_narrowest_width() {
        assert_eq!(encoded(&Value::Int(1)), vec![0xc1, 1]);
        assert_eq!(encoded(&Value::Int(-2)), vec![0xc1, 0xfe]);
        assert_eq!(encoded(&Value::Int(300)), vec![0xc2, 0x2c, 0x01]);
        assert_eq!(encoded(&Value::Int(70_000))[0], 0xc3);
        assert_eq!(encoded(&Value::Int(i64::MIN))[0], 0xc4);
    }

    #[test]
    fn long_text_switches_to_u32_length() {
        assert_eq!(encoded(&Value::text("ab")), vec![0xce, 2, b'a', b'b']);
        let long = "x".repeat(300);
        let bytes = encoded(&Value::text(long));
        assert_eq!(bytes[0], 0xc0);
        assert_eq!(&bytes[1..5], &300u32.to_le_bytes());
    }

    #[test]
    fn main_instance_is_an_empty_name() {
        let bytes = encoded(&Value::Endpoint(Endpoint::person("bob")));
        assert_eq!(bytes, vec![0xd0, 3, b'b', b'o', b'b', 0]);
        let wildcard = encoded(&Value::Endpoint(Endpoint::person("bob").any_instance()));
        assert_eq!(wildcard, vec![0xd1, 3, b'b', b'o', b'b']);
    }

    #[test]
    fn target_clauses_are_postfix() {
        let clause = TargetClause::from(Endpoint::person("a"))
            .or(TargetClause::from(Endpoint::person("b")))
            .and(TargetClause::from(Endpoint::person("c")).negate());
        let bytes = encoded(&Value::Target(clause));
        let ops: Vec<u8> = bytes
            .iter()
            .copied()
            .filter(|b| matches!(*b, 0xea | 0xeb | 0xec))
            .collect();
        assert_eq!(ops, vec![0xeb, 0xec, 0xea]);
    }

    #[test]
    fn fault_body_carries_kind_and_message() {
        let body = fault_body(&Fault::new(datex_types::ErrorKind::Type, "no")).unwrap();
        assert_eq!(body, vec![0xf4, 7, 2, 0, 0, 0, b'n', b'o']);
    }

    #[test]
    fn names_longer_than_255_bytes_are_rejected() {
        let mut w = BodyWriter::new();
        let err = w.short_name(&"n".repeat(256)).unwrap_err();
        assert!(matches!(err, CodegenError::NameTooLong { len: 256, .. }));
    }
}
