//! Token types for the DATEX tokenizer.
//!
//! Defines [`TokenKind`] covering every lexeme of the script language and
//! [`Token`], which pairs a kind with a source [`Span`].

use datex_types::{Endpoint, PointerId, Span};
use std::fmt;

/// Reserved words. They never lex as [`TokenKind::Identifier`].
pub const ALL_KEYWORDS: &[&str] = &[
    // Literals
    "true", "false", "null", "void", "infinity", "nan",
    // Control
    "return", "timeout",
    // Value operators
    "count", "type",
    // Pointer operators
    "value", "origin", "subscribers", "subscribe", "unsubscribe", "delete",
];

/// A single token.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// Every token kind of the script language.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // ── Literals ──────────────────────────────────────────────

    /// Integer literal, decimal or `0x` hex: `42`, `0xff`
    Int(i64),
    /// `9223372036854775808`: only valid directly after a prefix `-`,
    /// where it spells `i64::MIN`
    IntLimit,
    /// Float literal: `1.5`, `2e10`, `infinity`, `nan`
    Float(f64),
    /// Exact fraction written without whitespace: `1/3`
    Fraction { numerator: i64, denominator: i64 },
    /// `"text"` or `'text'`, escapes resolved
    Text(String),
    /// `` `0aff` ``
    Buffer(Vec<u8>),
    /// `@alias`, `@+alias`, `@@hexid`, with optional `/instance` or `/*`
    Endpoint(Endpoint),
    /// `$hexid`
    Pointer(PointerId),
    /// `<Name>`
    TypeTag(String),
    /// `?` (`None`) or `?3`
    Placeholder(Option<u32>),
    /// `true`
    True,
    /// `false`
    False,
    /// `null`
    Null,
    /// `void`
    Void,

    // ── Names ─────────────────────────────────────────────────

    /// Variable name
    Identifier(String),
    /// `#name`
    InternalVar(String),

    // ── Keywords ──────────────────────────────────────────────

    Return,
    Timeout,
    Count,
    Type,
    Value,
    Origin,
    Subscribers,
    Subscribe,
    Unsubscribe,
    Delete,

    // ── Operators ─────────────────────────────────────────────

    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `=`
    Eq,
    /// `+=`
    PlusEq,
    /// `-=`
    MinusEq,
    /// `*=`
    StarEq,
    /// `/=`
    SlashEq,
    /// `==`
    EqEq,
    /// `===`
    EqEqEq,
    /// `~=`
    TildeEq,
    /// `~==`
    TildeEqEq,
    /// `<`
    Less,
    /// `>`
    Greater,
    /// `<=`
    LessEq,
    /// `>=`
    GreaterEq,
    /// `&`
    Amp,
    /// `|`
    Pipe,
    /// `~`
    Tilde,
    /// `$$`
    DollarDollar,
    /// `::`
    ColonColon,

    // ── Punctuation ───────────────────────────────────────────

    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Semicolon,
    Dot,

    /// End of input. Always the last token.
    Eof,
}

impl TokenKind {
    /// Map a reserved word to its token.
    pub fn from_keyword(word: &str) -> Option<TokenKind> {
        Some(match word {
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            "void" => TokenKind::Void,
            "infinity" => TokenKind::Float(f64::INFINITY),
            "nan" => TokenKind::Float(f64::NAN),
            "return" => TokenKind::Return,
            "timeout" => TokenKind::Timeout,
            "count" => TokenKind::Count,
            "type" => TokenKind::Type,
            "value" => TokenKind::Value,
            "origin" => TokenKind::Origin,
            "subscribers" => TokenKind::Subscribers,
            "subscribe" => TokenKind::Subscribe,
            "unsubscribe" => TokenKind::Unsubscribe,
            "delete" => TokenKind::Delete,
            _ => return None,
        })
    }

    /// Keyword tokens, which may still be used as object keys.
    pub fn keyword_text(&self) -> Option<&'static str> {
        Some(match self {
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::Null => "null",
            TokenKind::Void => "void",
            TokenKind::Return => "return",
            TokenKind::Timeout => "timeout",
            TokenKind::Count => "count",
            TokenKind::Type => "type",
            TokenKind::Value => "value",
            TokenKind::Origin => "origin",
            TokenKind::Subscribers => "subscribers",
            TokenKind::Subscribe => "subscribe",
            TokenKind::Unsubscribe => "unsubscribe",
            TokenKind::Delete => "delete",
            _ => return None,
        })
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(word) = self.keyword_text() {
            return f.write_str(word);
        }
        match self {
            TokenKind::Int(i) => write!(f, "{i}"),
            TokenKind::IntLimit => write!(f, "{}", i64::MIN.unsigned_abs()),
            TokenKind::Float(x) => f.write_str(&datex_types::value::format_float(*x)),
            TokenKind::Fraction {
                numerator,
                denominator,
            } => write!(f, "{numerator}/{denominator}"),
            TokenKind::Text(s) => f.write_str(&datex_types::value::quote_text(s)),
            TokenKind::Buffer(bytes) => write!(f, "`{}`", hex::encode(bytes)),
            TokenKind::Endpoint(endpoint) => write!(f, "{endpoint}"),
            TokenKind::Pointer(id) => write!(f, "{id}"),
            TokenKind::TypeTag(name) => write!(f, "<{name}>"),
            TokenKind::Placeholder(None) => f.write_str("?"),
            TokenKind::Placeholder(Some(n)) => write!(f, "?{n}"),
            TokenKind::Identifier(name) => f.write_str(name),
            TokenKind::InternalVar(name) => write!(f, "#{name}"),
            TokenKind::Plus => f.write_str("+"),
            TokenKind::Minus => f.write_str("-"),
            TokenKind::Star => f.write_str("*"),
            TokenKind::Slash => f.write_str("/"),
            TokenKind::Eq => f.write_str("="),
            TokenKind::PlusEq => f.write_str("+="),
            TokenKind::MinusEq => f.write_str("-="),
            TokenKind::StarEq => f.write_str("*="),
            TokenKind::SlashEq => f.write_str("/="),
            TokenKind::EqEq => f.write_str("=="),
            TokenKind::EqEqEq => f.write_str("==="),
            TokenKind::TildeEq => f.write_str("~="),
            TokenKind::TildeEqEq => f.write_str("~=="),
            TokenKind::Less => f.write_str("<"),
            TokenKind::Greater => f.write_str(">"),
            TokenKind::LessEq => f.write_str("<="),
            TokenKind::GreaterEq => f.write_str(">="),
            TokenKind::Amp => f.write_str("&"),
            TokenKind::Pipe => f.write_str("|"),
            TokenKind::Tilde => f.write_str("~"),
            TokenKind::DollarDollar => f.write_str("$$"),
            TokenKind::ColonColon => f.write_str("::"),
            TokenKind::LParen => f.write_str("("),
            TokenKind::RParen => f.write_str(")"),
            TokenKind::LBracket => f.write_str("["),
            TokenKind::RBracket => f.write_str("]"),
            TokenKind::LBrace => f.write_str("{"),
            TokenKind::RBrace => f.write_str("}"),
            TokenKind::Comma => f.write_str(","),
            TokenKind::Colon => f.write_str(":"),
            TokenKind::Semicolon => f.write_str(";"),
            TokenKind::Dot => f.write_str("."),
            TokenKind::Eof => f.write_str("end of input"),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_keyword_maps_to_a_token() {
        for word in ALL_KEYWORDS {
            assert!(TokenKind::from_keyword(word).is_some(), "{word}");
        }
        assert_eq!(TokenKind::from_keyword("values"), None);
    }

    #[test]
    fn keyword_tokens_display_as_their_word() {
        for word in ALL_KEYWORDS.iter().filter(|w| !matches!(**w, "infinity" | "nan")) {
            let kind = TokenKind::from_keyword(word).unwrap();
            assert_eq!(kind.to_string(), *word);
        }
    }
}
