//! Core parser infrastructure: token cursor, error reporting, statements.

use datex_lexer::token::{Token, TokenKind};
use datex_types::ast::{Expr, Script};
use datex_types::{CompileErrors, DatexError, ErrorCode, SourceFile, Span};

/// Maximum nesting of expressions, collections and scopes.
pub const MAX_NESTING: u32 = 64;

/// The DATEX parser.
///
/// Consumes the token stream produced by the tokenizer and builds a
/// [`Script`]. Collects errors and resynchronizes at `;`.
pub struct Parser<'src> {
    tokens: Vec<Token>,
    pos: usize,
    source_file: &'src SourceFile,
    file_name: String,
    errors: CompileErrors,
    /// Current nesting depth (bounded by [`MAX_NESTING`]).
    pub(crate) depth: u32,
    /// Index handed to the next bare `?`.
    pub(crate) next_placeholder: u32,
}

/// Result of parsing.
pub struct ParseResult {
    pub script: Option<Script>,
    pub errors: CompileErrors,
}

/// Tokenize and parse `source_file`, merging the diagnostics of both stages.
pub fn parse_script(source_file: &SourceFile) -> ParseResult {
    let lexed = datex_lexer::tokenize(source_file);
    let mut result = Parser::new(lexed.tokens, source_file).parse();
    let mut errors = lexed.errors;
    errors.extend(result.errors);
    result.errors = errors;
    if result.errors.has_errors() {
        result.script = None;
    }
    result
}

impl<'src> Parser<'src> {
    pub fn new(tokens: Vec<Token>, source_file: &'src SourceFile) -> Self {
        Self {
            tokens,
            pos: 0,
            file_name: source_file.name.clone(),
            source_file,
            errors: CompileErrors::empty(),
            depth: 0,
            next_placeholder: 0,
        }
    }

    // ── Token Cursor ──────────────────────────────────────────────────────────

    pub(crate) fn peek_kind(&self) -> &TokenKind {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    pub(crate) fn look_ahead(&self, n: usize) -> &TokenKind {
        self.tokens
            .get(self.pos + n)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    /// Advance the cursor and return the consumed token.
    pub(crate) fn advance(&mut self) -> Token {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .unwrap_or_else(|| Token::new(TokenKind::Eof, self.previous_span()));
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    pub(crate) fn previous_span(&self) -> Span {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map(|t| t.span)
            .unwrap_or_else(|| Span::point(1, 1))
    }

    pub(crate) fn current_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.span)
            .unwrap_or_else(|| Span::point(1, 1))
    }

    pub(crate) fn at_end(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    pub(crate) fn check(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    pub(crate) fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn expect(&mut self, expected: &TokenKind) -> Option<Token> {
        if self.check(expected) {
            Some(self.advance())
        } else {
            let code = if self.at_end() {
                ErrorCode::UNCLOSED_DELIMITER
            } else {
                ErrorCode::UNEXPECTED_TOKEN
            };
            self.error_at_current(
                code,
                format!("expected '{}', got '{}'", expected, self.peek_kind()),
            );
            None
        }
    }

    // ── Nesting ───────────────────────────────────────────────────────────────

    /// Enter one nesting level; reports and returns `false` past the limit.
    pub(crate) fn enter(&mut self) -> bool {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            self.error_at_current(
                ErrorCode::NESTING_TOO_DEEP,
                format!("maximum nesting depth is {MAX_NESTING}"),
            );
            self.depth -= 1;
            return false;
        }
        true
    }

    pub(crate) fn leave(&mut self) {
        self.depth -= 1;
    }

    // ── Error Reporting ───────────────────────────────────────────────────────

    pub(crate) fn error_at_current(&mut self, code: ErrorCode, message: impl Into<String>) {
        let span = self.current_span();
        self.error_at(code, message, span);
    }

    pub(crate) fn error_at(&mut self, code: ErrorCode, message: impl Into<String>, span: Span) {
        let source_line = self.source_file.line(span.start_line).unwrap_or("");
        let error = DatexError::new(&self.file_name, code, message, span, source_line);
        self.errors.push_error(error);
    }

    pub(crate) fn too_many_errors(&self) -> bool {
        self.errors.total_errors >= datex_types::MAX_ERRORS
    }

    /// Skip to just past the next `;` (or to a closing `)` / end of input).
    pub(crate) fn synchronize(&mut self) {
        while !self.at_end() {
            match self.peek_kind() {
                TokenKind::Semicolon => {
                    self.advance();
                    return;
                }
                TokenKind::RParen => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    // ── Statements ────────────────────────────────────────────────────────────

    /// Parse `;`-separated statements until `terminator` (not consumed).
    pub(crate) fn parse_statements(&mut self, terminator: &TokenKind) -> Vec<Expr> {
        let mut statements = Vec::new();
        loop {
            while self.eat(&TokenKind::Semicolon) {}
            if self.check(terminator)
                || self.check(&TokenKind::RParen)
                || self.at_end()
                || self.too_many_errors()
            {
                break;
            }
            match self.parse_expression() {
                Some(expr) => {
                    statements.push(expr);
                    if !self.eat(&TokenKind::Semicolon)
                        && !self.check(terminator)
                        && !self.at_end()
                    {
                        self.error_at_current(
                            ErrorCode::UNEXPECTED_TOKEN,
                            format!("expected ';', got '{}'", self.peek_kind()),
                        );
                        self.synchronize();
                    }
                }
                None => self.synchronize(),
            }
        }
        statements
    }

    // ── Public API ────────────────────────────────────────────────────────────

    /// Parse the whole token stream into a [`Script`].
    pub fn parse(mut self) -> ParseResult {
        let start = self.current_span();
        let mut statements = self.parse_statements(&TokenKind::Eof);
        // a stray ')' stops statement parsing; report it and keep going
        while !self.at_end() && !self.too_many_errors() {
            self.error_at_current(
                ErrorCode::UNEXPECTED_TOKEN,
                format!("unexpected '{}'", self.peek_kind()),
            );
            self.advance();
            statements.extend(self.parse_statements(&TokenKind::Eof));
        }
        let span = start.merge(self.previous_span());
        let script = (!self.errors.has_errors()).then_some(Script { statements, span });
        ParseResult {
            script,
            errors: self.errors,
        }
    }
}
