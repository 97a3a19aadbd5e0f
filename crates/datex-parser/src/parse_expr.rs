//! Expression parsing over the static precedence table.
//!
//! Precedence (lowest → highest):
//! 1. `=`, `+=`, `-=`, `*=`, `/=` (right-associative)
//! 2. `::` remote call (right-associative)
//! 3. `|`
//! 4. `&`
//! 5. `==`, `~=`, `===`, `~==`, `<`, `>`, `<=`, `>=` (no chaining)
//! 6. `+`, `-`
//! 7. `*`, `/`
//! 8. prefix `-`, `~`, `$$` and the keyword operators
//! 9. `.` child access
//!
//! `return` and `timeout` are only valid at the start of an expression.

use datex_lexer::token::TokenKind;
use datex_types::ast::*;
use datex_types::ErrorCode;

use crate::parser::Parser;

impl<'src> Parser<'src> {
    // ══════════════════════════════════════════════════════════════════════════
    // Entry Point
    // ══════════════════════════════════════════════════════════════════════════

    pub(crate) fn parse_expression(&mut self) -> Option<Expr> {
        if !self.enter() {
            return None;
        }
        let result = match self.peek_kind() {
            TokenKind::Return => self.parse_return(),
            TokenKind::Timeout => {
                let start = self.advance().span;
                self.parse_assignment().map(|value| {
                    let span = start.merge(value.span);
                    Expr::new(ExprKind::Timeout(Box::new(value)), span)
                })
            }
            _ => self.parse_assignment(),
        };
        self.leave();
        result
    }

    fn parse_return(&mut self) -> Option<Expr> {
        let start = self.advance().span;
        if matches!(
            self.peek_kind(),
            TokenKind::Semicolon | TokenKind::RParen | TokenKind::Eof
        ) {
            return Some(Expr::new(ExprKind::Return(None), start));
        }
        let value = self.parse_assignment()?;
        let span = start.merge(value.span);
        Some(Expr::new(ExprKind::Return(Some(Box::new(value))), span))
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Precedence Chain
    // ══════════════════════════════════════════════════════════════════════════

    /// `Assign = Remote [ AssignOp Assign ]`
    fn parse_assignment(&mut self) -> Option<Expr> {
        let left = self.parse_remote()?;
        let op = match self.peek_kind() {
            TokenKind::Eq => None,
            TokenKind::PlusEq => Some(BinaryOp::Add),
            TokenKind::MinusEq => Some(BinaryOp::Subtract),
            TokenKind::StarEq => Some(BinaryOp::Multiply),
            TokenKind::SlashEq => Some(BinaryOp::Divide),
            _ => return Some(left),
        };
        self.advance();
        let target = self.to_place(left)?;
        let value = self.parse_assignment()?;
        let span = target.span.merge(value.span);
        Some(Expr::new(
            ExprKind::Assign {
                target,
                op,
                value: Box::new(value),
            },
            span,
        ))
    }

    /// Convert a parsed expression into an assignment target.
    fn to_place(&mut self, expr: Expr) -> Option<Place> {
        let span = expr.span;
        let mut path = Vec::new();
        let mut current = expr;
        loop {
            match current.kind {
                ExprKind::Member { object, key } => {
                    path.push(*key);
                    current = *object;
                }
                ExprKind::Variable(name) => {
                    path.reverse();
                    return Some(Place {
                        root: PlaceRoot::Variable(name),
                        path,
                        span,
                    });
                }
                ExprKind::InternalVar(name) => {
                    path.reverse();
                    return Some(Place {
                        root: PlaceRoot::InternalVar(name),
                        path,
                        span,
                    });
                }
                ExprKind::Pointer(id) => {
                    path.reverse();
                    return Some(Place {
                        root: PlaceRoot::Pointer(id),
                        path,
                        span,
                    });
                }
                ExprKind::Special(var) => {
                    self.error_at(
                        ErrorCode::READ_ONLY_VARIABLE,
                        format!("#{} is read-only", var.name()),
                        current.span,
                    );
                    return None;
                }
                _ => {
                    self.error_at(
                        ErrorCode::INVALID_ASSIGNMENT_TARGET,
                        "only variables, pointers and their children can be assigned",
                        current.span,
                    );
                    return None;
                }
            }
        }
    }

    /// `Remote = Or [ "::" Assign ]`
    fn parse_remote(&mut self) -> Option<Expr> {
        let target = self.parse_or()?;
        if !self.eat(&TokenKind::ColonColon) {
            return Some(target);
        }
        let body = self.parse_assignment()?;
        let span = target.span.merge(body.span);
        Some(Expr::new(
            ExprKind::Remote {
                target: Box::new(target),
                body: Box::new(body),
            },
            span,
        ))
    }

    /// Left-associative binary level.
    fn parse_binary_level(
        &mut self,
        next: fn(&mut Self) -> Option<Expr>,
        op_for: fn(&TokenKind) -> Option<BinaryOp>,
    ) -> Option<Expr> {
        let mut left = next(self)?;
        while let Some(op) = op_for(self.peek_kind()) {
            self.advance();
            let right = next(self)?;
            left = binary(left, op, right);
        }
        Some(left)
    }

    /// `Or = And { "|" And }`
    fn parse_or(&mut self) -> Option<Expr> {
        self.parse_binary_level(Self::parse_and, |kind| {
            (kind == &TokenKind::Pipe).then_some(BinaryOp::Or)
        })
    }

    /// `And = Comparison { "&" Comparison }`
    fn parse_and(&mut self) -> Option<Expr> {
        self.parse_binary_level(Self::parse_comparison, |kind| {
            (kind == &TokenKind::Amp).then_some(BinaryOp::And)
        })
    }

    /// `Comparison = Term [ CompOp Term ]`
    ///
    /// Comparison operators do not chain: `a < b < c` is a parse error.
    fn parse_comparison(&mut self) -> Option<Expr> {
        let left = self.parse_term()?;
        let Some(op) = comparison_op(self.peek_kind()) else {
            return Some(left);
        };
        self.advance();
        let right = self.parse_term()?;
        if comparison_op(self.peek_kind()).is_some() {
            self.error_at_current(
                ErrorCode::UNEXPECTED_TOKEN,
                "comparison operators cannot be chained; combine them with '&'",
            );
            return None;
        }
        Some(binary(left, op, right))
    }

    /// `Term = Factor { ("+" | "-") Factor }`
    fn parse_term(&mut self) -> Option<Expr> {
        self.parse_binary_level(Self::parse_factor, |kind| match kind {
            TokenKind::Plus => Some(BinaryOp::Add),
            TokenKind::Minus => Some(BinaryOp::Subtract),
            _ => None,
        })
    }

    /// `Factor = Prefix { ("*" | "/") Prefix }`
    fn parse_factor(&mut self) -> Option<Expr> {
        self.parse_binary_level(Self::parse_prefix, |kind| match kind {
            TokenKind::Star => Some(BinaryOp::Multiply),
            TokenKind::Slash => Some(BinaryOp::Divide),
            _ => None,
        })
    }

    /// `Prefix = PrefixOp Prefix | Postfix`
    fn parse_prefix(&mut self) -> Option<Expr> {
        let op = match self.peek_kind() {
            TokenKind::Minus => UnaryOp::Negate,
            TokenKind::Tilde => UnaryOp::Not,
            TokenKind::DollarDollar => UnaryOp::CreatePointer,
            TokenKind::Delete => UnaryOp::DeletePointer,
            TokenKind::Subscribe => UnaryOp::Subscribe,
            TokenKind::Unsubscribe => UnaryOp::Unsubscribe,
            TokenKind::Value => UnaryOp::Value,
            TokenKind::Origin => UnaryOp::Origin,
            TokenKind::Subscribers => UnaryOp::Subscribers,
            TokenKind::Count => UnaryOp::Count,
            TokenKind::Type => UnaryOp::TypeOf,
            _ => return self.parse_postfix(),
        };
        let start = self.advance().span;
        if op == UnaryOp::Negate && self.check(&TokenKind::IntLimit) {
            let span = start.merge(self.advance().span);
            return Some(Expr::new(ExprKind::Int(i64::MIN), span));
        }
        if !self.enter() {
            return None;
        }
        let operand = self.parse_prefix();
        self.leave();
        let operand = operand?;
        let span = start.merge(operand.span);
        if op == UnaryOp::Negate {
            if let Some(folded) = fold_negative_literal(&operand) {
                return Some(Expr::new(folded, span));
            }
        }
        Some(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        ))
    }

    /// `Postfix = Primary { "." Key }`
    fn parse_postfix(&mut self) -> Option<Expr> {
        let mut expr = self.parse_primary()?;
        while self.eat(&TokenKind::Dot) {
            let key = self.parse_member_key()?;
            let span = expr.span.merge(key.span);
            expr = Expr::new(
                ExprKind::Member {
                    object: Box::new(expr),
                    key: Box::new(key),
                },
                span,
            );
        }
        Some(expr)
    }

    /// Key after `.`: a name (keywords allowed), an index or `(expr)`.
    fn parse_member_key(&mut self) -> Option<Expr> {
        let kind = self.peek_kind().clone();
        if let Some(word) = kind.keyword_text() {
            let span = self.advance().span;
            return Some(Expr::new(ExprKind::Text(word.to_string()), span));
        }
        match kind {
            TokenKind::Identifier(name) => {
                let span = self.advance().span;
                Some(Expr::new(ExprKind::Text(name), span))
            }
            TokenKind::Int(index) => {
                let span = self.advance().span;
                Some(Expr::new(ExprKind::Int(index), span))
            }
            TokenKind::LParen => {
                self.advance();
                let key = self.parse_expression()?;
                self.expect(&TokenKind::RParen)?;
                Some(key)
            }
            other => {
                self.error_at_current(
                    ErrorCode::UNEXPECTED_TOKEN,
                    format!("expected a child key after '.', got '{other}'"),
                );
                None
            }
        }
    }
}

fn binary(left: Expr, op: BinaryOp, right: Expr) -> Expr {
    let span = left.span.merge(right.span);
    Expr::new(
        ExprKind::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        },
        span,
    )
}

fn comparison_op(kind: &TokenKind) -> Option<BinaryOp> {
    match kind {
        TokenKind::EqEq => Some(BinaryOp::Equal),
        TokenKind::TildeEq => Some(BinaryOp::NotEqual),
        TokenKind::EqEqEq => Some(BinaryOp::Identical),
        TokenKind::TildeEqEq => Some(BinaryOp::NotIdentical),
        TokenKind::Less => Some(BinaryOp::Less),
        TokenKind::Greater => Some(BinaryOp::Greater),
        TokenKind::LessEq => Some(BinaryOp::LessEqual),
        TokenKind::GreaterEq => Some(BinaryOp::GreaterEqual),
        _ => None,
    }
}

/// `-5`, `-1.5` and `-1/3` become literals instead of negations.
fn fold_negative_literal(operand: &Expr) -> Option<ExprKind> {
    match operand.kind {
        ExprKind::Int(i) => i.checked_neg().map(ExprKind::Int),
        ExprKind::Float(x) => Some(ExprKind::Float(-x)),
        ExprKind::Fraction {
            numerator,
            denominator,
        } => numerator.checked_neg().map(|numerator| ExprKind::Fraction {
            numerator,
            denominator,
        }),
        _ => None,
    }
}
