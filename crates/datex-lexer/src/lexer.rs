//! Core DATEX tokenizer: converts script text to a token stream.
//!
//! Features:
//! - Every script lexeme: sigiled names (`@alias`, `$ptr`, `#var`), literals
//!   (numbers, exact fractions, strings, buffers, type tags), operators
//! - `//` line comments and `/* */` block comments are skipped
//! - Whitespace, including newlines, only separates tokens
//! - Error recovery: collects up to [`datex_types::MAX_ERRORS`] errors

use datex_types::{CompileErrors, DatexError, Endpoint, ErrorCode, PointerId, SourceFile, Span};

use crate::token::{Token, TokenKind};

/// The DATEX tokenizer.
pub struct Lexer<'src> {
    source: &'src [u8],
    source_file: &'src SourceFile,
    file_name: &'src str,
    /// Current byte offset into `source`.
    pos: usize,
    line: u32,
    col: u32,
    errors: CompileErrors,
    /// Whether the previous token was `.`, which makes `a.0.1` two child
    /// accesses rather than one float.
    after_dot: bool,
}

/// Result of lexing: tokens plus any errors collected.
pub struct LexResult {
    /// The token stream (always ends with [`TokenKind::Eof`]).
    pub tokens: Vec<Token>,
    pub errors: CompileErrors,
}

/// Tokenize a script in one call.
pub fn tokenize(source_file: &SourceFile) -> LexResult {
    Lexer::new(source_file).lex()
}

/// Start position of the token being scanned.
#[derive(Clone, Copy)]
struct Start {
    pos: usize,
    line: u32,
    col: u32,
}

fn is_name_byte(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_'
}

impl<'src> Lexer<'src> {
    pub fn new(source_file: &'src SourceFile) -> Self {
        Self {
            source: source_file.source.as_bytes(),
            source_file,
            file_name: &source_file.name,
            pos: 0,
            line: 1,
            col: 1,
            errors: CompileErrors::empty(),
            after_dot: false,
        }
    }

    /// Lex the entire script.
    pub fn lex(mut self) -> LexResult {
        let mut tokens = Vec::new();
        loop {
            if self.errors.total_errors >= datex_types::MAX_ERRORS {
                break;
            }
            let token = self.scan_token();
            self.after_dot = token.kind == TokenKind::Dot;
            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        if tokens.last().is_none_or(|t| t.kind != TokenKind::Eof) {
            tokens.push(Token::new(TokenKind::Eof, self.current_span()));
        }
        LexResult {
            tokens,
            errors: self.errors,
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Character-level helpers
    // ─────────────────────────────────────────────────────────────

    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.source.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let ch = self.source.get(self.pos).copied()?;
        self.pos += 1;
        if ch == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    fn eat(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn current_span(&self) -> Span {
        Span::point(self.line, self.col)
    }

    fn mark(&self) -> Start {
        Start {
            pos: self.pos,
            line: self.line,
            col: self.col,
        }
    }

    fn span_from(&self, start: Start) -> Span {
        Span::new(
            start.line,
            start.col,
            self.line,
            self.col.saturating_sub(1).max(1),
        )
    }

    fn lexeme(&self, start: Start) -> &'src str {
        std::str::from_utf8(&self.source[start.pos..self.pos]).unwrap_or("")
    }

    fn token(&self, kind: TokenKind, start: Start) -> Token {
        Token::new(kind, self.span_from(start))
    }

    fn emit_error(&mut self, code: ErrorCode, message: impl Into<String>, span: Span) {
        let source_line = self.source_file.line(span.start_line).unwrap_or("");
        let err = DatexError::new(self.file_name, code, message, span, source_line);
        self.errors.push_error(err);
    }

    // ─────────────────────────────────────────────────────────────
    // Whitespace & comments
    // ─────────────────────────────────────────────────────────────

    fn skip_trivia(&mut self) {
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Some(ch), _) if ch.is_ascii_whitespace() => {
                    self.advance();
                }
                (Some(b'/'), Some(b'/')) => {
                    while self.peek().is_some_and(|ch| ch != b'\n') {
                        self.advance();
                    }
                }
                (Some(b'/'), Some(b'*')) => self.skip_block_comment(),
                _ => return,
            }
        }
    }

    fn skip_block_comment(&mut self) {
        let start = self.mark();
        self.advance();
        self.advance();
        loop {
            match self.peek() {
                None => {
                    let span = self.span_from(start);
                    self.emit_error(
                        ErrorCode::UNCLOSED_DELIMITER,
                        "unterminated block comment",
                        span,
                    );
                    return;
                }
                Some(b'*') if self.peek_at(1) == Some(b'/') => {
                    self.advance();
                    self.advance();
                    return;
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Token dispatch
    // ─────────────────────────────────────────────────────────────

    fn scan_token(&mut self) -> Token {
        self.skip_trivia();
        // error paths rescan recursively; the cap bounds the depth
        if self.errors.total_errors >= datex_types::MAX_ERRORS {
            return Token::new(TokenKind::Eof, self.current_span());
        }
        let start = self.mark();
        let Some(ch) = self.advance() else {
            return Token::new(TokenKind::Eof, self.current_span());
        };

        let kind = match ch {
            b'0'..=b'9' => return self.scan_number(start),
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => return self.scan_identifier(start),
            b'"' | b'\'' => return self.scan_text(start, ch),
            b'`' => return self.scan_buffer(start),
            b'@' => return self.scan_endpoint(start),
            b'$' => return self.scan_pointer(start),
            b'#' => return self.scan_internal_var(start),
            b'?' => return self.scan_placeholder(start),
            b'<' => return self.scan_less_or_type(start),

            b'+' if self.eat(b'=') => TokenKind::PlusEq,
            b'+' => TokenKind::Plus,
            b'-' if self.eat(b'=') => TokenKind::MinusEq,
            b'-' => TokenKind::Minus,
            b'*' if self.eat(b'=') => TokenKind::StarEq,
            b'*' => TokenKind::Star,
            b'/' if self.eat(b'=') => TokenKind::SlashEq,
            b'/' => TokenKind::Slash,

            b'=' if self.peek() == Some(b'=') && self.peek_at(1) == Some(b'=') => {
                self.advance();
                self.advance();
                TokenKind::EqEqEq
            }
            b'=' if self.eat(b'=') => TokenKind::EqEq,
            b'=' => TokenKind::Eq,

            b'~' if self.peek() == Some(b'=') && self.peek_at(1) == Some(b'=') => {
                self.advance();
                self.advance();
                TokenKind::TildeEqEq
            }
            b'~' if self.eat(b'=') => TokenKind::TildeEq,
            b'~' => TokenKind::Tilde,

            b'>' if self.eat(b'=') => TokenKind::GreaterEq,
            b'>' => TokenKind::Greater,
            b':' if self.eat(b':') => TokenKind::ColonColon,
            b':' => TokenKind::Colon,

            b'&' => TokenKind::Amp,
            b'|' => TokenKind::Pipe,
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b',' => TokenKind::Comma,
            b';' => TokenKind::Semicolon,
            b'.' => TokenKind::Dot,

            _ => {
                // skip the rest of a multi-byte character
                while self.peek().is_some_and(|b| b & 0xC0 == 0x80) {
                    self.advance();
                }
                let span = self.span_from(start);
                let text = self.lexeme(start).to_string();
                self.emit_error(
                    ErrorCode::UNEXPECTED_CHARACTER,
                    format!("unexpected character '{text}'"),
                    span,
                );
                return self.scan_token();
            }
        };
        self.token(kind, start)
    }

    // ─────────────────────────────────────────────────────────────
    // Numbers
    // ─────────────────────────────────────────────────────────────

    fn skip_digits(&mut self) {
        while self.peek().is_some_and(|ch| ch.is_ascii_digit()) {
            self.advance();
        }
    }

    fn scan_number(&mut self, start: Start) -> Token {
        if self.source[start.pos] == b'0' && matches!(self.peek(), Some(b'x' | b'X')) {
            return self.scan_hex_int(start);
        }
        self.skip_digits();

        let mut is_float = false;
        if !self.after_dot
            && self.peek() == Some(b'.')
            && self.peek_at(1).is_some_and(|ch| ch.is_ascii_digit())
        {
            is_float = true;
            self.advance();
            self.skip_digits();
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let digits_at = if matches!(self.peek_at(1), Some(b'+' | b'-')) { 2 } else { 1 };
            if self.peek_at(digits_at).is_some_and(|ch| ch.is_ascii_digit()) {
                is_float = true;
                for _ in 0..digits_at {
                    self.advance();
                }
                self.skip_digits();
            }
        }
        if is_float {
            let value = self.lexeme(start).parse().unwrap_or(f64::NAN);
            return self.token(TokenKind::Float(value), start);
        }

        let numerator_text = self.lexeme(start);
        if self.peek() == Some(b'/') && self.peek_at(1).is_some_and(|ch| ch.is_ascii_digit()) {
            self.advance();
            let denominator_start = self.mark();
            self.skip_digits();
            let denominator_text = self.lexeme(denominator_start);
            return self.finish_fraction(start, numerator_text, denominator_text);
        }

        if numerator_text.parse::<u64>() == Ok(i64::MIN.unsigned_abs()) {
            return self.token(TokenKind::IntLimit, start);
        }
        let value = self.parse_int(numerator_text, start);
        self.token(TokenKind::Int(value), start)
    }

    fn scan_hex_int(&mut self, start: Start) -> Token {
        self.advance(); // consume 'x'
        let digits_start = self.mark();
        while self.peek().is_some_and(|ch| ch.is_ascii_hexdigit()) {
            self.advance();
        }
        let digits = self.lexeme(digits_start);
        let value = match i64::from_str_radix(digits, 16) {
            Ok(value) => value,
            Err(_) => {
                let span = self.span_from(start);
                let message = if digits.is_empty() {
                    "hex literal needs at least one digit".to_string()
                } else {
                    format!("hex literal 0x{digits} does not fit in 64 bits")
                };
                self.emit_error(ErrorCode::INTEGER_OUT_OF_RANGE, message, span);
                0
            }
        };
        self.token(TokenKind::Int(value), start)
    }

    fn parse_int(&mut self, text: &str, start: Start) -> i64 {
        match text.parse::<i64>() {
            Ok(value) => value,
            Err(_) => {
                let span = self.span_from(start);
                self.emit_error(
                    ErrorCode::INTEGER_OUT_OF_RANGE,
                    format!("integer literal {text} does not fit in 64 bits"),
                    span,
                );
                0
            }
        }
    }

    fn finish_fraction(&mut self, start: Start, numerator: &str, denominator: &str) -> Token {
        let numerator = self.parse_int(numerator, start);
        let denominator = self.parse_int(denominator, start);
        if denominator == 0 {
            let span = self.span_from(start);
            self.emit_error(
                ErrorCode::ZERO_DENOMINATOR,
                "fraction literal has a zero denominator",
                span,
            );
            return self.token(TokenKind::Int(0), start);
        }
        self.token(
            TokenKind::Fraction {
                numerator,
                denominator,
            },
            start,
        )
    }

    // ─────────────────────────────────────────────────────────────
    // Names
    // ─────────────────────────────────────────────────────────────

    fn skip_name(&mut self) {
        while self.peek().is_some_and(is_name_byte) {
            self.advance();
        }
    }

    fn scan_identifier(&mut self, start: Start) -> Token {
        self.skip_name();
        let text = self.lexeme(start);
        let kind =
            TokenKind::from_keyword(text).unwrap_or_else(|| TokenKind::Identifier(text.to_string()));
        self.token(kind, start)
    }

    fn scan_internal_var(&mut self, start: Start) -> Token {
        let name_start = self.mark();
        self.skip_name();
        let name = self.lexeme(name_start);
        if name.is_empty() {
            let span = self.span_from(start);
            self.emit_error(
                ErrorCode::UNEXPECTED_CHARACTER,
                "expected an internal variable name after '#'",
                span,
            );
            return self.scan_token();
        }
        self.token(TokenKind::InternalVar(name.to_string()), start)
    }

    fn scan_placeholder(&mut self, start: Start) -> Token {
        let digits_start = self.mark();
        self.skip_digits();
        let digits = self.lexeme(digits_start);
        if digits.is_empty() {
            return self.token(TokenKind::Placeholder(None), start);
        }
        let index = match digits.parse::<u32>() {
            Ok(index) => index,
            Err(_) => {
                let span = self.span_from(start);
                self.emit_error(
                    ErrorCode::INTEGER_OUT_OF_RANGE,
                    format!("placeholder index {digits} is too large"),
                    span,
                );
                0
            }
        };
        self.token(TokenKind::Placeholder(Some(index)), start)
    }

    /// `@alias`, `@+alias`, `@@hex`, each with optional `/instance` or `/*`.
    fn scan_endpoint(&mut self, start: Start) -> Token {
        if !self.eat(b'@') {
            self.eat(b'+');
        }
        self.skip_name();
        if self.peek() == Some(b'/') {
            match self.peek_at(1) {
                Some(b'*') => {
                    self.advance();
                    self.advance();
                }
                Some(ch) if is_name_byte(ch) => {
                    self.advance();
                    self.skip_name();
                }
                _ => {}
            }
        }
        let text = self.lexeme(start);
        match Endpoint::parse(text) {
            Ok(endpoint) => self.token(TokenKind::Endpoint(endpoint), start),
            Err(err) => {
                let span = self.span_from(start);
                self.emit_error(ErrorCode::INVALID_ENDPOINT, err.to_string(), span);
                self.scan_token()
            }
        }
    }

    /// `$$` or `$hexid`.
    fn scan_pointer(&mut self, start: Start) -> Token {
        if self.eat(b'$') {
            return self.token(TokenKind::DollarDollar, start);
        }
        let digits_start = self.mark();
        while self.peek().is_some_and(|ch| ch.is_ascii_hexdigit()) {
            self.advance();
        }
        let digits = self.lexeme(digits_start);
        match PointerId::from_hex(digits) {
            Some(id) => self.token(TokenKind::Pointer(id), start),
            None => {
                let span = self.span_from(start);
                self.emit_error(
                    ErrorCode::INVALID_POINTER_ID,
                    format!("invalid pointer id '${digits}'"),
                    span,
                );
                self.scan_token()
            }
        }
    }

    /// `<Name>` type tag, or one of `<` / `<=`.
    fn scan_less_or_type(&mut self, start: Start) -> Token {
        if self.peek().is_some_and(|ch| ch.is_ascii_uppercase()) {
            let mut len = 1;
            while self.peek_at(len).is_some_and(is_name_byte) {
                len += 1;
            }
            if self.peek_at(len) == Some(b'>') {
                let name_start = self.mark();
                for _ in 0..len {
                    self.advance();
                }
                let name = self.lexeme(name_start).to_string();
                self.advance(); // consume '>'
                return self.token(TokenKind::TypeTag(name), start);
            }
        }
        if self.eat(b'=') {
            self.token(TokenKind::LessEq, start)
        } else {
            self.token(TokenKind::Less, start)
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Text & buffers
    // ─────────────────────────────────────────────────────────────

    fn scan_text(&mut self, start: Start, quote: u8) -> Token {
        let mut bytes = Vec::new();
        loop {
            match self.peek() {
                None => {
                    let span = self.span_from(start);
                    self.emit_error(
                        ErrorCode::UNTERMINATED_STRING,
                        "unterminated string literal",
                        span,
                    );
                    break;
                }
                Some(ch) if ch == quote => {
                    self.advance();
                    break;
                }
                Some(b'\\') => {
                    if let Some(c) = self.scan_escape() {
                        let mut buf = [0u8; 4];
                        bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                    }
                }
                Some(ch) => {
                    self.advance();
                    bytes.push(ch);
                }
            }
        }
        let text = String::from_utf8_lossy(&bytes).into_owned();
        self.token(TokenKind::Text(text), start)
    }

    /// Escape sequence after `\`. Returns `None` (after reporting) when invalid.
    fn scan_escape(&mut self) -> Option<char> {
        let start = self.mark();
        self.advance(); // consume '\'
        let resolved = match self.advance() {
            Some(b'"') => Some('"'),
            Some(b'\'') => Some('\''),
            Some(b'\\') => Some('\\'),
            Some(b'n') => Some('\n'),
            Some(b'r') => Some('\r'),
            Some(b't') => Some('\t'),
            Some(b'0') => Some('\0'),
            Some(b'x') => self.scan_escape_digits(2),
            Some(b'u') if self.eat(b'{') => {
                let digits_start = self.mark();
                while self.peek().is_some_and(|ch| ch.is_ascii_hexdigit()) {
                    self.advance();
                }
                let digits = self.lexeme(digits_start);
                let c = u32::from_str_radix(digits, 16).ok().and_then(char::from_u32);
                if self.eat(b'}') {
                    c
                } else {
                    None
                }
            }
            _ => None,
        };
        if resolved.is_none() {
            let span = self.span_from(start);
            let text = self.lexeme(start).to_string();
            self.emit_error(
                ErrorCode::INVALID_ESCAPE,
                format!("invalid escape sequence '{text}'"),
                span,
            );
        }
        resolved
    }

    fn scan_escape_digits(&mut self, count: usize) -> Option<char> {
        let digits_start = self.mark();
        for _ in 0..count {
            if !self.peek().is_some_and(|ch| ch.is_ascii_hexdigit()) {
                return None;
            }
            self.advance();
        }
        u32::from_str_radix(self.lexeme(digits_start), 16)
            .ok()
            .and_then(char::from_u32)
    }

    fn scan_buffer(&mut self, start: Start) -> Token {
        let digits_start = self.mark();
        while self.peek().is_some_and(|ch| ch.is_ascii_hexdigit()) {
            self.advance();
        }
        let digits = self.lexeme(digits_start);
        if !self.eat(b'`') {
            let span = self.span_from(start);
            self.emit_error(
                ErrorCode::UNTERMINATED_STRING,
                "unterminated buffer literal",
                span,
            );
        }
        match hex::decode(digits) {
            Ok(bytes) => self.token(TokenKind::Buffer(bytes), start),
            Err(_) => {
                let span = self.span_from(start);
                self.emit_error(
                    ErrorCode::INVALID_BUFFER,
                    "buffer literal needs an even number of hex digits",
                    span,
                );
                self.token(TokenKind::Buffer(Vec::new()), start)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexeme_tracks_multiline_positions() {
        let sf = SourceFile::new("<script>", "x = 1;\n  y");
        let result = tokenize(&sf);
        let y = &result.tokens[4];
        assert_eq!(y.kind, TokenKind::Identifier("y".into()));
        assert_eq!((y.span.start_line, y.span.start_col), (2, 3));
    }
}
