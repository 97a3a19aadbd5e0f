//! The closed DATEX value model.
//!
//! Every value that can cross the wire is one variant of [`Value`], and every
//! variant has a dedicated literal encoding in the opcode table. Numeric
//! fractions are kept exact as [`Rational`].

use crate::address::{Endpoint, IdEndpoint, TargetClause, ID_ENDPOINT_LEN};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ══════════════════════════════════════════════════════════════════════════════
// Rational
// ══════════════════════════════════════════════════════════════════════════════

/// Exact fraction in lowest terms with a positive denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    numerator: i64,
    denominator: i64,
}

fn gcd(mut a: i128, mut b: i128) -> i128 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.abs()
}

impl Rational {
    /// Reduced fraction, or `None` for a zero denominator or when the reduced
    /// terms do not fit in 64 bits.
    pub fn new(numerator: i64, denominator: i64) -> Option<Self> {
        Self::reduce(numerator as i128, denominator as i128)
    }

    fn reduce(numerator: i128, denominator: i128) -> Option<Self> {
        if denominator == 0 {
            return None;
        }
        let sign = if denominator < 0 { -1 } else { 1 };
        let divisor = gcd(numerator, denominator).max(1);
        Some(Self {
            numerator: i64::try_from(sign * numerator / divisor).ok()?,
            denominator: i64::try_from(sign * denominator / divisor).ok()?,
        })
    }

    pub fn from_int(value: i64) -> Self {
        Self {
            numerator: value,
            denominator: 1,
        }
    }

    pub fn numerator(&self) -> i64 {
        self.numerator
    }

    pub fn denominator(&self) -> i64 {
        self.denominator
    }

    pub fn is_integer(&self) -> bool {
        self.denominator == 1
    }

    pub fn to_f64(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }

    fn parts(self) -> (i128, i128) {
        (self.numerator as i128, self.denominator as i128)
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        let ((a, b), (c, d)) = (self.parts(), other.parts());
        Self::reduce(a * d + c * b, b * d)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        let ((a, b), (c, d)) = (self.parts(), other.parts());
        Self::reduce(a * d - c * b, b * d)
    }

    pub fn checked_mul(self, other: Self) -> Option<Self> {
        let ((a, b), (c, d)) = (self.parts(), other.parts());
        Self::reduce(a * c, b * d)
    }

    pub fn checked_div(self, other: Self) -> Option<Self> {
        let ((a, b), (c, d)) = (self.parts(), other.parts());
        Self::reduce(a * d, b * c)
    }

    pub fn checked_neg(self) -> Option<Self> {
        Some(Self {
            numerator: self.numerator.checked_neg()?,
            denominator: self.denominator,
        })
    }
}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rational {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        let ((a, b), (c, d)) = (self.parts(), other.parts());
        (a * d).cmp(&(c * b))
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Type tags
// ══════════════════════════════════════════════════════════════════════════════

/// Built-in types that can be referenced on the wire (`<Int>`).
///
/// The discriminants are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StdType {
    Void = 1,
    Null = 2,
    Boolean = 3,
    Int = 4,
    Float = 5,
    Rational = 6,
    Text = 7,
    Buffer = 8,
    Array = 9,
    Object = 10,
    Tuple = 11,
    Pointer = 12,
    Endpoint = 13,
    Target = 14,
    Type = 15,
}

impl StdType {
    const ALL: [StdType; 15] = [
        Self::Void,
        Self::Null,
        Self::Boolean,
        Self::Int,
        Self::Float,
        Self::Rational,
        Self::Text,
        Self::Buffer,
        Self::Array,
        Self::Object,
        Self::Tuple,
        Self::Pointer,
        Self::Endpoint,
        Self::Target,
        Self::Type,
    ];

    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| *t as u8 == byte)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Void => "Void",
            Self::Null => "Null",
            Self::Boolean => "Boolean",
            Self::Int => "Int",
            Self::Float => "Float",
            Self::Rational => "Rational",
            Self::Text => "Text",
            Self::Buffer => "Buffer",
            Self::Array => "Array",
            Self::Object => "Object",
            Self::Tuple => "Tuple",
            Self::Pointer => "Pointer",
            Self::Endpoint => "Endpoint",
            Self::Target => "Target",
            Self::Type => "Type",
        }
    }
}

/// A type reference: built-in or registered by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeTag {
    Std(StdType),
    Named(String),
}

impl TypeTag {
    /// `<Int>` for built-in names, a named tag otherwise.
    pub fn from_name(name: &str) -> Self {
        StdType::from_name(name)
            .map(Self::Std)
            .unwrap_or_else(|| Self::Named(name.to_string()))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Std(std) => std.name(),
            Self::Named(name) => name,
        }
    }
}

impl From<StdType> for TypeTag {
    fn from(std: StdType) -> Self {
        Self::Std(std)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.name())
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Pointer ids
// ══════════════════════════════════════════════════════════════════════════════

/// Length of a raw pointer id.
pub const POINTER_ID_LEN: usize = 21;

const POINTER_ID_KIND: u8 = 0x01;

/// Pointer id: kind byte, origin endpoint id, creation time (seconds) and a
/// per-origin counter. Globally unique because the origin id is embedded.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PointerId([u8; POINTER_ID_LEN]);

impl PointerId {
    pub fn new(origin: IdEndpoint, created_at: u32, counter: u32) -> Self {
        let mut bytes = [0u8; POINTER_ID_LEN];
        bytes[0] = POINTER_ID_KIND;
        bytes[1..13].copy_from_slice(origin.as_bytes());
        bytes[13..17].copy_from_slice(&created_at.to_be_bytes());
        bytes[17..21].copy_from_slice(&counter.to_be_bytes());
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; POINTER_ID_LEN] = bytes.try_into().ok()?;
        (array[0] == POINTER_ID_KIND).then_some(Self(array))
    }

    /// Parse the hex form, with or without the `$` sigil.
    pub fn from_hex(text: &str) -> Option<Self> {
        let digits = text.strip_prefix('$').unwrap_or(text);
        Self::from_slice(&hex::decode(digits).ok()?)
    }

    pub fn as_bytes(&self) -> &[u8; POINTER_ID_LEN] {
        &self.0
    }

    /// Id of the endpoint that created the pointer.
    pub fn origin(&self) -> IdEndpoint {
        let mut id = [0u8; ID_ENDPOINT_LEN];
        id.copy_from_slice(&self.0[1..13]);
        IdEndpoint::from_bytes(id)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for PointerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.to_hex())
    }
}

impl fmt::Debug for PointerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PointerId({self})")
    }
}

impl From<PointerId> for String {
    fn from(id: PointerId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for PointerId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        Self::from_hex(&value).ok_or_else(|| format!("invalid pointer id '{value}'"))
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Value
// ══════════════════════════════════════════════════════════════════════════════

/// A DATEX value.
///
/// `PartialEq` is strict structural equality (an `Int` never equals a
/// `Float`); loose numeric comparison lives in the interpreter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Void,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Rational(Rational),
    Text(String),
    Buffer(Vec<u8>),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    Tuple(Vec<Value>),
    Pointer(PointerId),
    Endpoint(Endpoint),
    Target(TargetClause),
    Type(TypeTag),
}

impl Value {
    /// Normalized numeric value: integral fractions become `Int`.
    pub fn from_rational(rational: Rational) -> Self {
        if rational.is_integer() {
            Value::Int(rational.numerator())
        } else {
            Value::Rational(rational)
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Value::Text(text.into())
    }

    pub fn std_type(&self) -> StdType {
        match self {
            Value::Void => StdType::Void,
            Value::Null => StdType::Null,
            Value::Bool(_) => StdType::Boolean,
            Value::Int(_) => StdType::Int,
            Value::Float(_) => StdType::Float,
            Value::Rational(_) => StdType::Rational,
            Value::Text(_) => StdType::Text,
            Value::Buffer(_) => StdType::Buffer,
            Value::Array(_) => StdType::Array,
            Value::Object(_) => StdType::Object,
            Value::Tuple(_) => StdType::Tuple,
            Value::Pointer(_) => StdType::Pointer,
            Value::Endpoint(_) => StdType::Endpoint,
            Value::Target(_) => StdType::Target,
            Value::Type(_) => StdType::Type,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Value::Void)
    }

    /// Truthiness used by the logic operators on non-boolean operands.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Void | Value::Null | Value::Bool(false))
    }

    /// Text used when the value is concatenated onto a string.
    pub fn to_plain_text(&self) -> String {
        match self {
            Value::Text(text) => text.clone(),
            other => other.to_string(),
        }
    }

    /// Every pointer referenced anywhere inside this value.
    pub fn pointer_refs(&self) -> Vec<PointerId> {
        let mut refs = Vec::new();
        self.collect_pointer_refs(&mut refs);
        refs
    }

    fn collect_pointer_refs(&self, refs: &mut Vec<PointerId>) {
        match self {
            Value::Pointer(id) => refs.push(*id),
            Value::Array(items) | Value::Tuple(items) => {
                items.iter().for_each(|v| v.collect_pointer_refs(refs))
            }
            Value::Object(entries) => entries.values().for_each(|v| v.collect_pointer_refs(refs)),
            _ => {}
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Endpoint> for Value {
    fn from(endpoint: Endpoint) -> Self {
        Value::Endpoint(endpoint)
    }
}

// ── Literal text ─────────────────────────────────────────────────────────────

/// Quote `text` as a double-quoted script string literal.
pub fn quote_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            c if c.is_control() => out.push_str(&format!("\\u{{{:x}}}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Script text of a float that lexes back as a float.
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "infinity" } else { "-infinity" }.to_string()
    } else {
        format!("{value:?}")
    }
}

/// Whether `key` can be written as a bare object key.
pub fn is_plain_key(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn write_items(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Value {
    /// Script literal form of the value.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => f.write_str("void"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => f.write_str(&format_float(*x)),
            Value::Rational(r) => write!(f, "{r}"),
            Value::Text(text) => f.write_str(&quote_text(text)),
            Value::Buffer(bytes) => write!(f, "`{}`", hex::encode(bytes)),
            Value::Array(items) => {
                f.write_str("[")?;
                write_items(f, items)?;
                f.write_str("]")
            }
            Value::Tuple(items) => {
                f.write_str("(")?;
                write_items(f, items)?;
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            Value::Object(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    if is_plain_key(key) {
                        write!(f, "{key}: {value}")?;
                    } else {
                        write!(f, "{}: {value}", quote_text(key))?;
                    }
                }
                f.write_str("}")
            }
            Value::Pointer(id) => write!(f, "{id}"),
            Value::Endpoint(endpoint) => write!(f, "{endpoint}"),
            Value::Target(clause) => write!(f, "{clause}"),
            Value::Type(tag) => write!(f, "{tag}"),
        }
    }
}
