//! AST node types for DATEX scripts.
//!
//! Every node carries a [`Span`] for diagnostics. The decompiler produces
//! nodes with [`Span::synthetic`].

use crate::address::Endpoint;
use crate::value::{PointerId, TypeTag};
use crate::Span;

// ══════════════════════════════════════════════════════════════════════════════
// Top Level
// ══════════════════════════════════════════════════════════════════════════════

/// A script: `;`-separated statements. Its value is the last statement's.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub statements: Vec<Expr>,
    pub span: Span,
}

/// An expression with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    // ── Literals ──
    Int(i64),
    Float(f64),
    /// `n/d` written without whitespace; kept exact.
    Fraction { numerator: i64, denominator: i64 },
    Text(String),
    Buffer(Vec<u8>),
    Bool(bool),
    Null,
    Void,
    Endpoint(Endpoint),
    Pointer(PointerId),
    Type(TypeTag),
    /// `?` (index assigned in source order) or `?N`.
    Placeholder(u32),

    // ── Variables ──
    Variable(String),
    /// `#name`
    InternalVar(String),
    /// `#sender`, `#it`, ...
    Special(SpecialVar),

    // ── Collections ──
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Tuple(Vec<Expr>),

    /// `( a; b )`
    Scope(Vec<Expr>),

    // ── Operators ──
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// `object.key`, `object.0`, `object.(expr)`
    Member { object: Box<Expr>, key: Box<Expr> },
    /// `place = value` or `place op= value`
    Assign {
        target: Place,
        op: Option<BinaryOp>,
        value: Box<Expr>,
    },
    /// `target :: body`
    Remote { target: Box<Expr>, body: Box<Expr> },
    /// `return value`
    Return(Option<Box<Expr>>),
    /// `timeout millis`
    Timeout(Box<Expr>),
}

/// Read-only variables provided by the executing runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialVar {
    Sender,
    Current,
    Timestamp,
    Encrypted,
    Signed,
    This,
    It,
}

impl SpecialVar {
    pub const ALL: [SpecialVar; 7] = [
        Self::Sender,
        Self::Current,
        Self::Timestamp,
        Self::Encrypted,
        Self::Signed,
        Self::This,
        Self::It,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|v| v.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Sender => "sender",
            Self::Current => "current",
            Self::Timestamp => "timestamp",
            Self::Encrypted => "encrypted",
            Self::Signed => "signed",
            Self::This => "this",
            Self::It => "it",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    /// `==`
    Equal,
    /// `~=`
    NotEqual,
    /// `===`
    Identical,
    /// `~==`
    NotIdentical,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    /// `&`
    And,
    /// `|`
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Equal => "==",
            Self::NotEqual => "~=",
            Self::Identical => "===",
            Self::NotIdentical => "~==",
            Self::Less => "<",
            Self::Greater => ">",
            Self::LessEqual => "<=",
            Self::GreaterEqual => ">=",
            Self::And => "&",
            Self::Or => "|",
        }
    }

    /// Binding power in the static precedence table (higher binds tighter).
    pub fn precedence(self) -> u8 {
        match self {
            Self::Or => PREC_OR,
            Self::And => PREC_AND,
            Self::Equal
            | Self::NotEqual
            | Self::Identical
            | Self::NotIdentical
            | Self::Less
            | Self::Greater
            | Self::LessEqual
            | Self::GreaterEqual => PREC_COMPARISON,
            Self::Add | Self::Subtract => PREC_TERM,
            Self::Multiply | Self::Divide => PREC_FACTOR,
        }
    }

    /// Whether the operator may be used in a compound assignment (`+=`).
    pub fn is_assignable(self) -> bool {
        matches!(
            self,
            Self::Add | Self::Subtract | Self::Multiply | Self::Divide
        )
    }
}

// ── Static precedence table ──────────────────────────────────────────────────

pub const PREC_ASSIGN: u8 = 1;
pub const PREC_REMOTE: u8 = 2;
pub const PREC_OR: u8 = 3;
pub const PREC_AND: u8 = 4;
pub const PREC_COMPARISON: u8 = 5;
pub const PREC_TERM: u8 = 6;
pub const PREC_FACTOR: u8 = 7;
pub const PREC_PREFIX: u8 = 8;
pub const PREC_POSTFIX: u8 = 9;
pub const PREC_PRIMARY: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// `-x`
    Negate,
    /// `~x`
    Not,
    /// `$$ x`
    CreatePointer,
    /// `delete $p`
    DeletePointer,
    Subscribe,
    Unsubscribe,
    /// `value $p`
    Value,
    Origin,
    Subscribers,
    Count,
    /// `type x`
    TypeOf,
}

impl UnaryOp {
    /// Source spelling; keyword operators are followed by a space.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Negate => "-",
            Self::Not => "~",
            Self::CreatePointer => "$$ ",
            Self::DeletePointer => "delete ",
            Self::Subscribe => "subscribe ",
            Self::Unsubscribe => "unsubscribe ",
            Self::Value => "value ",
            Self::Origin => "origin ",
            Self::Subscribers => "subscribers ",
            Self::Count => "count ",
            Self::TypeOf => "type ",
        }
    }
}

/// Root of an assignable place.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaceRoot {
    Variable(String),
    InternalVar(String),
    Pointer(PointerId),
}

/// Assignment target: a root plus a (possibly empty) child key path.
#[derive(Debug, Clone, PartialEq)]
pub struct Place {
    pub root: PlaceRoot,
    pub path: Vec<Expr>,
    pub span: Span,
}
