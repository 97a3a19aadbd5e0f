use crate::Span;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of diagnostics kept before the rest are only counted.
pub const MAX_ERRORS: usize = 20;

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Diagnostic category, derived from the error code range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Syntax,
    Literal,
    Data,
    Assignment,
    Structure,
}

/// Numeric compile error code (E100–E599).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ErrorCode(pub u16);

impl ErrorCode {
    // ── Syntax errors (E100–E199) ──
    pub const UNEXPECTED_TOKEN: Self = Self(100);
    pub const UNCLOSED_DELIMITER: Self = Self(101);
    pub const UNEXPECTED_CHARACTER: Self = Self(102);
    pub const UNTERMINATED_STRING: Self = Self(103);
    pub const INVALID_ESCAPE: Self = Self(104);
    pub const INVALID_ENDPOINT: Self = Self(105);
    pub const INVALID_POINTER_ID: Self = Self(106);

    // ── Literal errors (E200–E299) ──
    pub const INTEGER_OUT_OF_RANGE: Self = Self(200);
    pub const ZERO_DENOMINATOR: Self = Self(201);
    pub const INVALID_BUFFER: Self = Self(202);
    pub const INVALID_NUMBER: Self = Self(203);

    // ── Injected data errors (E300–E399) ──
    pub const MISSING_DATA: Self = Self(300);

    // ── Assignment errors (E400–E499) ──
    pub const INVALID_ASSIGNMENT_TARGET: Self = Self(400);
    pub const READ_ONLY_VARIABLE: Self = Self(401);

    // ── Structure errors (E500–E599) ──
    pub const NESTING_TOO_DEEP: Self = Self(500);
    pub const BODY_TOO_LARGE: Self = Self(501);

    pub fn category(self) -> ErrorCategory {
        match self.0 {
            200..=299 => ErrorCategory::Literal,
            300..=399 => ErrorCategory::Data,
            400..=499 => ErrorCategory::Assignment,
            500..=599 => ErrorCategory::Structure,
            _ => ErrorCategory::Syntax,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.0)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax => write!(f, "syntax"),
            Self::Literal => write!(f, "literal"),
            Self::Data => write!(f, "data"),
            Self::Assignment => write!(f, "assignment"),
            Self::Structure => write!(f, "structure"),
        }
    }
}

/// A structured compile diagnostic: the reason plus the script position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatexError {
    /// Script name (`<script>` for inline scripts).
    pub file: String,
    pub code: ErrorCode,
    pub severity: Severity,
    pub category: ErrorCategory,
    pub message: String,
    #[serde(flatten)]
    pub span: Span,
    /// The offending source line, quoted verbatim.
    pub source_line: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl DatexError {
    pub fn new(
        file: impl Into<String>,
        code: ErrorCode,
        message: impl Into<String>,
        span: Span,
        source_line: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            code,
            severity: Severity::Error,
            category: code.category(),
            message: message.into(),
            span,
            source_line: source_line.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl fmt::Display for DatexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} [{}] {}",
            self.span, self.code, self.category, self.message
        )
    }
}

impl std::error::Error for DatexError {}

/// All diagnostics of one compilation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileErrors {
    pub errors: Vec<DatexError>,
    pub warnings: Vec<DatexError>,
    pub total_errors: usize,
    pub total_warnings: usize,
}

impl CompileErrors {
    pub fn empty() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            total_errors: 0,
            total_warnings: 0,
        }
    }

    pub fn has_errors(&self) -> bool {
        self.total_errors > 0
    }

    /// Record an error. Only the first [`MAX_ERRORS`] are stored.
    pub fn push_error(&mut self, error: DatexError) {
        if self.errors.len() < MAX_ERRORS {
            self.errors.push(error);
        }
        self.total_errors += 1;
    }

    pub fn push_warning(&mut self, warning: DatexError) {
        self.warnings.push(warning);
        self.total_warnings += 1;
    }

    /// Append every diagnostic of `other`, keeping the storage cap.
    pub fn extend(&mut self, other: CompileErrors) {
        let dropped = other.total_errors - other.errors.len();
        for error in other.errors {
            self.push_error(error);
        }
        self.total_errors += dropped;
        for warning in other.warnings {
            self.push_warning(warning);
        }
    }

    /// The first stored error, if any.
    pub fn first(&self) -> Option<&DatexError> {
        self.errors.first()
    }
}

impl fmt::Display for CompileErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.first() {
            Some(first) if self.total_errors > 1 => {
                write!(f, "{first} (and {} more)", self.total_errors - 1)
            }
            Some(first) => write!(f, "{first}"),
            None => write!(f, "no errors"),
        }
    }
}

impl std::error::Error for CompileErrors {}

// ══════════════════════════════════════════════════════════════════════════════
// Wire faults
// ══════════════════════════════════════════════════════════════════════════════

/// Error class carried by a `THROW_ERROR` instruction.
///
/// The discriminants are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ErrorKind {
    Compile = 1,
    Routing = 2,
    Crypto = 3,
    Malformed = 4,
    Timeout = 5,
    Permission = 6,
    Type = 7,
    Value = 8,
    Reference = 9,
    Pointer = 10,
    Runtime = 11,
}

impl ErrorKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            1 => Self::Compile,
            2 => Self::Routing,
            3 => Self::Crypto,
            4 => Self::Malformed,
            5 => Self::Timeout,
            6 => Self::Permission,
            7 => Self::Type,
            8 => Self::Value,
            9 => Self::Reference,
            10 => Self::Pointer,
            11 => Self::Runtime,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Compile => "CompileError",
            Self::Routing => "RoutingError",
            Self::Crypto => "CryptoError",
            Self::Malformed => "MalformedBlockError",
            Self::Timeout => "TimeoutError",
            Self::Permission => "PermissionError",
            Self::Type => "TypeError",
            Self::Value => "ValueError",
            Self::Reference => "ReferenceError",
            Self::Pointer => "PointerError",
            Self::Runtime => "RuntimeError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A fault raised by a remote endpoint and delivered inside a RESPONSE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Fault {
    pub kind: ErrorKind,
    pub message: String,
}

impl Fault {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Corrupt wire input: truncated buffers, unknown opcodes or tags.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed block at byte {offset}: {reason}")]
pub struct MalformedBlockError {
    pub offset: usize,
    pub reason: String,
}

impl MalformedBlockError {
    pub fn new(offset: usize, reason: impl Into<String>) -> Self {
        Self {
            offset,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(code: ErrorCode) -> DatexError {
        DatexError::new(
            "<script>",
            code,
            "unexpected token ')'",
            Span::new(1, 5, 1, 6),
            "1 + )",
        )
    }

    #[test]
    fn test_error_code_category() {
        assert_eq!(ErrorCode::UNEXPECTED_TOKEN.category(), ErrorCategory::Syntax);
        assert_eq!(ErrorCode::ZERO_DENOMINATOR.category(), ErrorCategory::Literal);
        assert_eq!(ErrorCode::MISSING_DATA.category(), ErrorCategory::Data);
        assert_eq!(
            ErrorCode::READ_ONLY_VARIABLE.category(),
            ErrorCategory::Assignment
        );
        assert_eq!(ErrorCode::NESTING_TOO_DEEP.category(), ErrorCategory::Structure);
    }

    #[test]
    fn test_error_display_carries_position() {
        let err = sample(ErrorCode::UNEXPECTED_TOKEN);
        assert_eq!(err.to_string(), "1:5: E100 [syntax] unexpected token ')'");
    }

    #[test]
    fn test_error_json_round_trip() {
        let err = sample(ErrorCode::UNEXPECTED_TOKEN).with_suggestion("remove ')'");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"start_line\":1"));
        assert!(json.contains("\"suggestion\""));
        let back: DatexError = serde_json::from_str(&json).unwrap();
        assert_eq!(back.code, err.code);
        assert_eq!(back.span, err.span);
    }

    #[test]
    fn test_compile_errors_max_limit() {
        let mut errs = CompileErrors::empty();
        for _ in 0..25 {
            errs.push_error(sample(ErrorCode::UNEXPECTED_TOKEN));
        }
        assert_eq!(errs.errors.len(), MAX_ERRORS);
        assert_eq!(errs.total_errors, 25);
    }

    #[test]
    fn test_compile_errors_extend_keeps_totals() {
        let mut a = CompileErrors::empty();
        a.push_error(sample(ErrorCode::UNEXPECTED_TOKEN));
        let mut b = CompileErrors::empty();
        for _ in 0..22 {
            b.push_error(sample(ErrorCode::MISSING_DATA));
        }
        a.extend(b);
        assert_eq!(a.total_errors, 23);
        assert_eq!(a.errors.len(), MAX_ERRORS);
    }

    #[test]
    fn test_error_kind_byte_round_trip() {
        for byte in 1..=11u8 {
            let kind = ErrorKind::from_byte(byte).unwrap();
            assert_eq!(kind as u8, byte);
        }
        assert_eq!(ErrorKind::from_byte(0), None);
        assert_eq!(ErrorKind::from_byte(12), None);
    }

    #[test]
    fn test_fault_display() {
        let fault = Fault::new(ErrorKind::Permission, "@@b may not execute here");
        assert_eq!(fault.to_string(), "PermissionError: @@b may not execute here");
    }
}
