//! Primary expressions: literals, names, collections and parentheses.

use datex_lexer::token::TokenKind;
use datex_types::ast::*;
use datex_types::{ErrorCode, TypeTag};

use crate::parser::Parser;

impl<'src> Parser<'src> {
    pub(crate) fn parse_primary(&mut self) -> Option<Expr> {
        // closers are left in place so the statement loop can resynchronize
        if matches!(
            self.peek_kind(),
            TokenKind::Semicolon
                | TokenKind::RParen
                | TokenKind::RBracket
                | TokenKind::RBrace
                | TokenKind::Eof
        ) {
            let message = format!("expected an expression, got {}", self.peek_kind());
            self.error_at_current(ErrorCode::UNEXPECTED_TOKEN, message);
            return None;
        }
        let token = self.advance();
        let span = token.span;
        let kind = match token.kind {
            TokenKind::Int(i) => ExprKind::Int(i),
            TokenKind::IntLimit => {
                self.error_at(
                    ErrorCode::INTEGER_OUT_OF_RANGE,
                    format!(
                        "integer literal {} does not fit in 64 bits",
                        i64::MIN.unsigned_abs()
                    ),
                    span,
                );
                return None;
            }
            TokenKind::Float(x) => ExprKind::Float(x),
            TokenKind::Fraction {
                numerator,
                denominator,
            } => ExprKind::Fraction {
                numerator,
                denominator,
            },
            TokenKind::Text(text) => ExprKind::Text(text),
            TokenKind::Buffer(bytes) => ExprKind::Buffer(bytes),
            TokenKind::True => ExprKind::Bool(true),
            TokenKind::False => ExprKind::Bool(false),
            TokenKind::Null => ExprKind::Null,
            TokenKind::Void => ExprKind::Void,
            TokenKind::Endpoint(endpoint) => ExprKind::Endpoint(endpoint),
            TokenKind::Pointer(id) => ExprKind::Pointer(id),
            TokenKind::TypeTag(name) => ExprKind::Type(TypeTag::from_name(&name)),
            TokenKind::Placeholder(index) => {
                let index = index.unwrap_or(self.next_placeholder);
                self.next_placeholder = index.saturating_add(1);
                ExprKind::Placeholder(index)
            }
            TokenKind::Identifier(name) => ExprKind::Variable(name),
            TokenKind::InternalVar(name) => match SpecialVar::from_name(&name) {
                Some(special) => ExprKind::Special(special),
                None => ExprKind::InternalVar(name),
            },
            TokenKind::LBracket => return self.parse_array(span),
            TokenKind::LBrace => return self.parse_object(span),
            TokenKind::LParen => return self.parse_parenthesized(span),
            other => {
                self.error_at(
                    ErrorCode::UNEXPECTED_TOKEN,
                    format!("expected an expression, got '{other}'"),
                    span,
                );
                return None;
            }
        };
        Some(Expr::new(kind, span))
    }

    // ── Collections ───────────────────────────────────────────────────────────

    /// `[a, b, c]` with an optional trailing comma. `[` is already consumed.
    fn parse_array(&mut self, start: datex_types::Span) -> Option<Expr> {
        if !self.enter() {
            return None;
        }
        let items = self.parse_comma_list(&TokenKind::RBracket);
        self.leave();
        let items = items?;
        let end = self.expect(&TokenKind::RBracket)?.span;
        Some(Expr::new(ExprKind::Array(items), start.merge(end)))
    }

    /// `{key: value, ...}`. Keys are names, keywords, text or integers.
    fn parse_object(&mut self, start: datex_types::Span) -> Option<Expr> {
        if !self.enter() {
            return None;
        }
        let entries = self.parse_object_entries();
        self.leave();
        let entries = entries?;
        let end = self.expect(&TokenKind::RBrace)?.span;
        Some(Expr::new(ExprKind::Object(entries), start.merge(end)))
    }

    fn parse_object_entries(&mut self) -> Option<Vec<(String, Expr)>> {
        let mut entries = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.at_end() {
            let key = self.parse_object_key()?;
            self.expect(&TokenKind::Colon)?;
            let value = self.parse_expression()?;
            entries.push((key, value));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Some(entries)
    }

    fn parse_object_key(&mut self) -> Option<String> {
        let kind = self.peek_kind().clone();
        if let Some(word) = kind.keyword_text() {
            self.advance();
            return Some(word.to_string());
        }
        match kind {
            TokenKind::Identifier(name) | TokenKind::Text(name) => {
                self.advance();
                Some(name)
            }
            TokenKind::Int(i) => {
                self.advance();
                Some(i.to_string())
            }
            other => {
                self.error_at_current(
                    ErrorCode::UNEXPECTED_TOKEN,
                    format!("expected an object key, got '{other}'"),
                );
                None
            }
        }
    }

    /// Comma-separated expressions up to `close` (not consumed).
    fn parse_comma_list(&mut self, close: &TokenKind) -> Option<Vec<Expr>> {
        let mut items = Vec::new();
        while !self.check(close) && !self.at_end() {
            items.push(self.parse_expression()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Some(items)
    }

    // ── Parentheses ───────────────────────────────────────────────────────────

    /// `()`, `(a)`, `(a, b)`, `(a,)` or `(a; b)`. `(` is already consumed.
    fn parse_parenthesized(&mut self, start: datex_types::Span) -> Option<Expr> {
        if let Some(end) = self.eat_close_paren() {
            return Some(Expr::new(ExprKind::Void, start.merge(end)));
        }
        if !self.enter() {
            return None;
        }
        let result = self.parse_paren_contents(start);
        self.leave();
        result
    }

    fn parse_paren_contents(&mut self, start: datex_types::Span) -> Option<Expr> {
        let first = self.parse_expression()?;
        match self.peek_kind() {
            TokenKind::RParen => {
                self.advance();
                // grouping keeps the inner node, widened to the parentheses
                Some(Expr::new(first.kind, start.merge(self.previous_span())))
            }
            TokenKind::Comma => {
                self.advance();
                let mut items = vec![first];
                items.extend(self.parse_comma_list(&TokenKind::RParen)?);
                let end = self.expect(&TokenKind::RParen)?.span;
                Some(Expr::new(ExprKind::Tuple(items), start.merge(end)))
            }
            TokenKind::Semicolon => {
                let mut statements = vec![first];
                statements.extend(self.parse_statements(&TokenKind::RParen));
                let end = self.expect(&TokenKind::RParen)?.span;
                Some(Expr::new(ExprKind::Scope(statements), start.merge(end)))
            }
            other => {
                let message = format!("expected ')', ',' or ';', got '{other}'");
                let code = if self.at_end() {
                    ErrorCode::UNCLOSED_DELIMITER
                } else {
                    ErrorCode::UNEXPECTED_TOKEN
                };
                self.error_at_current(code, message);
                None
            }
        }
    }

    fn eat_close_paren(&mut self) -> Option<datex_types::Span> {
        self.check(&TokenKind::RParen).then(|| self.advance().span)
    }
}
