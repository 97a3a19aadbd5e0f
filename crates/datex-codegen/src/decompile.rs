//! DXB body → script text.
//!
//! The decompiler replays the postfix instruction stream on a stack of text
//! fragments, each tagged with the precedence of its outermost operator, and
//! inserts parentheses only where the parser would otherwise regroup. The
//! output parses back to a body with the same effect.

use datex_types::ast::{BinaryOp, PlaceRoot, UnaryOp, PREC_ASSIGN, PREC_COMPARISON, PREC_OR};
use datex_types::ast::{PREC_POSTFIX, PREC_PREFIX, PREC_PRIMARY, PREC_REMOTE};
use datex_types::value::{is_plain_key, quote_text};
use datex_types::{MalformedBlockError, Value};
use owo_colors::OwoColorize;

use crate::reader::{BodyReader, Instruction, ReadResult};

/// Output switches for [`decompile_body`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecompileOptions {
    /// One statement per line, nested collections and scopes indented.
    pub formatted: bool,
    /// ANSI colors per token class.
    pub colorized: bool,
}

/// Reconstruct the script text of a DXB body.
pub fn decompile_body(body: &[u8], options: DecompileOptions) -> ReadResult<String> {
    let decompiler = Decompiler { options };
    let statements = decompiler.statements(body)?;
    Ok(decompiler.join_statements(&statements))
}

// ══════════════════════════════════════════════════════════════════════════════
// Fragments
// ══════════════════════════════════════════════════════════════════════════════

/// Text of one sub-expression.
#[derive(Debug, Clone)]
struct Fragment {
    text: String,
    prec: u8,
    /// Set for plain literals, so keys can be shown as `.name` / `name:`.
    literal: Option<Value>,
}

impl Fragment {
    fn new(text: String, prec: u8) -> Self {
        Self {
            text,
            prec,
            literal: None,
        }
    }

    /// Text, parenthesized when `needs_parens`.
    fn wrapped(&self, needs_parens: bool) -> String {
        if needs_parens {
            format!("({})", self.text)
        } else {
            self.text.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Array,
    Object,
    Tuple,
    Subscope,
}

struct Frame {
    kind: FrameKind,
    /// Fragment stack height when the frame was opened.
    base: usize,
    /// Closed statements (sub-scopes only).
    statements: Vec<String>,
}

// ══════════════════════════════════════════════════════════════════════════════
// Decompiler
// ══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Copy)]
enum Class {
    Number,
    Text,
    Constant,
    Endpoint,
    Pointer,
    Type,
    Internal,
    Keyword,
    Fault,
}

struct Decompiler {
    options: DecompileOptions,
}

impl Decompiler {
    fn paint(&self, text: &str, class: Class) -> String {
        if !self.options.colorized {
            return text.to_string();
        }
        match class {
            Class::Number => text.cyan().to_string(),
            Class::Text => text.green().to_string(),
            Class::Constant => text.magenta().to_string(),
            Class::Endpoint => text.yellow().to_string(),
            Class::Pointer => text.red().to_string(),
            Class::Type => text.bright_cyan().to_string(),
            Class::Internal => text.bright_magenta().to_string(),
            Class::Keyword => text.blue().to_string(),
            Class::Fault => text.bright_red().to_string(),
        }
    }

    fn join_statements(&self, statements: &[String]) -> String {
        if self.options.formatted {
            statements.join(";\n")
        } else {
            statements.join("; ")
        }
    }

    /// `open items close`, one item per indented line when formatted.
    fn block(&self, open: &str, items: &[String], separator: &str, close: &str) -> String {
        if !self.options.formatted || items.is_empty() {
            return format!("{open}{}{close}", items.join(&format!("{separator} ")));
        }
        let mut out = String::from(open);
        for (i, item) in items.iter().enumerate() {
            out.push_str("\n    ");
            out.push_str(&item.replace('\n', "\n    "));
            if i + 1 < items.len() {
                out.push_str(separator);
            }
        }
        out.push('\n');
        out.push_str(close);
        out
    }

    fn literal(&self, value: &Value) -> Fragment {
        let text = value.to_string();
        let class = match value {
            Value::Int(_) | Value::Float(_) | Value::Rational(_) => Class::Number,
            Value::Text(_) | Value::Buffer(_) => Class::Text,
            Value::Endpoint(_) | Value::Target(_) => Class::Endpoint,
            Value::Pointer(_) => Class::Pointer,
            Value::Type(_) => Class::Type,
            _ => Class::Constant,
        };
        let prec = if text.starts_with('-') {
            PREC_PREFIX
        } else {
            PREC_PRIMARY
        };
        Fragment {
            text: self.paint(&text, class),
            prec,
            literal: Some(value.clone()),
        }
    }

    fn root(&self, root: &PlaceRoot) -> String {
        match root {
            PlaceRoot::Variable(name) => name.clone(),
            PlaceRoot::InternalVar(name) => self.paint(&format!("#{name}"), Class::Internal),
            PlaceRoot::Pointer(id) => self.paint(&id.to_string(), Class::Pointer),
        }
    }

    /// `.name`, `.0` or `.(expr)`.
    fn child_key(&self, key: &Fragment) -> String {
        match &key.literal {
            Some(Value::Text(name)) if is_plain_key(name) => format!(".{name}"),
            Some(Value::Int(i)) if *i >= 0 => format!(".{}", key.text),
            _ => format!(".({})", key.text),
        }
    }

    fn object_key(&self, key: &Fragment) -> String {
        match &key.literal {
            Some(Value::Text(name)) if is_plain_key(name) => name.clone(),
            Some(Value::Text(name)) => self.paint(&quote_text(name), Class::Text),
            _ => key.text.clone(),
        }
    }

    // ── Instruction replay ────────────────────────────────────────────────────

    fn statements(&self, body: &[u8]) -> ReadResult<Vec<String>> {
        let mut reader = BodyReader::new(body);
        let mut stack: Vec<Fragment> = Vec::new();
        let mut frames: Vec<Frame> = Vec::new();
        let mut statements: Vec<String> = Vec::new();

        loop {
            let at = reader.position();
            let Some(instruction) = reader.next_instruction()? else {
                break;
            };
            let pop = |stack: &mut Vec<Fragment>| {
                stack
                    .pop()
                    .ok_or_else(|| MalformedBlockError::new(at, "operand stack underflow"))
            };
            let fragment = match instruction {
                Instruction::End => break,
                Instruction::CloseAndStore => {
                    let value = pop(&mut stack)?;
                    match frames.iter_mut().rev().find(|f| f.kind == FrameKind::Subscope) {
                        Some(frame) => frame.statements.push(value.text),
                        None => statements.push(value.text),
                    }
                    continue;
                }
                Instruction::Literal(value) => self.literal(&value),
                Instruction::Pointer(id) => {
                    let mut fragment =
                        Fragment::new(self.paint(&id.to_string(), Class::Pointer), PREC_PRIMARY);
                    fragment.literal = Some(Value::Pointer(id));
                    fragment
                }
                Instruction::Var(name) => Fragment::new(name, PREC_PRIMARY),
                Instruction::InternalVar(name) => {
                    Fragment::new(self.paint(&format!("#{name}"), Class::Internal), PREC_PRIMARY)
                }
                Instruction::Special(var) => Fragment::new(
                    self.paint(&format!("#{}", var.name()), Class::Internal),
                    PREC_PRIMARY,
                ),
                Instruction::Insert(index) => {
                    Fragment::new(self.paint(&format!("?{index}"), Class::Internal), PREC_PRIMARY)
                }

                Instruction::SetVar(name) => self.store(name, None, pop(&mut stack)?),
                Instruction::VarAction(name, op) => self.store(name, Some(op), pop(&mut stack)?),
                Instruction::SetInternalVar(name) => {
                    let target = self.root(&PlaceRoot::InternalVar(name));
                    self.store(target, None, pop(&mut stack)?)
                }
                Instruction::InternalVarAction(name, op) => {
                    let target = self.root(&PlaceRoot::InternalVar(name));
                    self.store(target, Some(op), pop(&mut stack)?)
                }
                Instruction::SetPointer(id) => {
                    let target = self.root(&PlaceRoot::Pointer(id));
                    self.store(target, None, pop(&mut stack)?)
                }
                Instruction::PointerAction(id, op) => {
                    let target = self.root(&PlaceRoot::Pointer(id));
                    self.store(target, Some(op), pop(&mut stack)?)
                }
                Instruction::ChildSet { root, depth } => {
                    let value = pop(&mut stack)?;
                    let target = self.child_target(&root, depth, &mut stack, at)?;
                    self.store(target, None, value)
                }
                Instruction::ChildAction { root, depth, op } => {
                    let value = pop(&mut stack)?;
                    let target = self.child_target(&root, depth, &mut stack, at)?;
                    self.store(target, Some(op), value)
                }

                Instruction::Unary(op) => self.unary(op, pop(&mut stack)?),
                Instruction::Binary(op) => {
                    let right = pop(&mut stack)?;
                    let left = pop(&mut stack)?;
                    self.binary(left, op, right)
                }
                Instruction::ChildGet => {
                    let key = pop(&mut stack)?;
                    let object = pop(&mut stack)?;
                    let text = format!(
                        "{}{}",
                        object.wrapped(object.prec < PREC_POSTFIX),
                        self.child_key(&key)
                    );
                    Fragment::new(text, PREC_POSTFIX)
                }

                Instruction::ArrayStart => {
                    frames.push(Frame::open(FrameKind::Array, stack.len()));
                    continue;
                }
                Instruction::ObjectStart => {
                    frames.push(Frame::open(FrameKind::Object, stack.len()));
                    continue;
                }
                Instruction::TupleStart => {
                    frames.push(Frame::open(FrameKind::Tuple, stack.len()));
                    continue;
                }
                Instruction::SubscopeStart => {
                    frames.push(Frame::open(FrameKind::Subscope, stack.len()));
                    continue;
                }
                Instruction::ArrayEnd
                | Instruction::ObjectEnd
                | Instruction::TupleEnd
                | Instruction::SubscopeEnd => {
                    let frame = frames
                        .pop()
                        .ok_or_else(|| MalformedBlockError::new(at, "unbalanced collection end"))?;
                    self.close_frame(frame, &instruction, &mut stack, at)?
                }

                Instruction::Return => {
                    let value = pop(&mut stack)?;
                    let keyword = self.paint("return", Class::Keyword);
                    let text = match value.literal {
                        Some(Value::Void) => keyword,
                        _ => format!("{keyword} {}", value.text),
                    };
                    Fragment::new(text, PREC_ASSIGN)
                }
                Instruction::Timeout => {
                    let value = pop(&mut stack)?;
                    let text = format!("{} {}", self.paint("timeout", Class::Keyword), value.text);
                    Fragment::new(text, PREC_ASSIGN)
                }
                Instruction::Remote(sub) => {
                    let target = pop(&mut stack)?;
                    let inner = self.statements(sub)?;
                    let body = match inner.as_slice() {
                        [single] => single.clone(),
                        _ => self.scope_text(&inner),
                    };
                    let text = format!("{} :: {body}", target.wrapped(target.prec < PREC_OR));
                    Fragment::new(text, PREC_REMOTE)
                }
                Instruction::Throw(fault) => {
                    let text = format!(
                        "!{}({})",
                        fault.kind.name(),
                        quote_text(&fault.message)
                    );
                    Fragment::new(self.paint(&text, Class::Fault), PREC_PRIMARY)
                }
            };
            stack.push(fragment);
        }

        if !frames.is_empty() {
            return Err(MalformedBlockError::new(
                reader.position(),
                "unterminated collection or scope",
            ));
        }
        // trailing values without CLOSE_AND_STORE still show up
        statements.extend(stack.into_iter().map(|f| f.text));
        Ok(statements)
    }

    fn close_frame(
        &self,
        frame: Frame,
        end: &Instruction<'_>,
        stack: &mut Vec<Fragment>,
        at: usize,
    ) -> ReadResult<Fragment> {
        let expected = match end {
            Instruction::ArrayEnd => FrameKind::Array,
            Instruction::ObjectEnd => FrameKind::Object,
            Instruction::TupleEnd => FrameKind::Tuple,
            _ => FrameKind::Subscope,
        };
        if frame.kind != expected || stack.len() < frame.base {
            return Err(MalformedBlockError::new(at, "mismatched collection end"));
        }
        let items = stack.split_off(frame.base);
        let text = match frame.kind {
            FrameKind::Array => {
                let items: Vec<String> = items.into_iter().map(|f| f.text).collect();
                self.block("[", &items, ",", "]")
            }
            FrameKind::Tuple => {
                let items: Vec<String> = items.into_iter().map(|f| f.text).collect();
                if items.len() == 1 {
                    format!("({},)", items[0])
                } else {
                    self.block("(", &items, ",", ")")
                }
            }
            FrameKind::Object => {
                if items.len() % 2 != 0 {
                    return Err(MalformedBlockError::new(at, "object entry without value"));
                }
                let entries: Vec<String> = items
                    .chunks(2)
                    .map(|pair| format!("{}: {}", self.object_key(&pair[0]), pair[1].text))
                    .collect();
                self.block("{", &entries, ",", "}")
            }
            FrameKind::Subscope => {
                let mut statements = frame.statements;
                statements.extend(items.into_iter().map(|f| f.text));
                self.scope_text(&statements)
            }
        };
        Ok(Fragment::new(text, PREC_PRIMARY))
    }

    /// `(a; b)`, with a trailing `;` for a single statement so it stays a scope.
    fn scope_text(&self, statements: &[String]) -> String {
        match statements {
            [] => "()".to_string(),
            [single] => format!("({single};)"),
            _ => self.block("(", statements, ";", ")"),
        }
    }

    fn child_target(
        &self,
        root: &PlaceRoot,
        depth: u8,
        stack: &mut Vec<Fragment>,
        at: usize,
    ) -> ReadResult<String> {
        let depth = depth as usize;
        if stack.len() < depth {
            return Err(MalformedBlockError::new(at, "operand stack underflow"));
        }
        let keys = stack.split_off(stack.len() - depth);
        let mut text = self.root(root);
        for key in &keys {
            text.push_str(&self.child_key(key));
        }
        Ok(text)
    }

    fn store(&self, target: String, op: Option<BinaryOp>, value: Fragment) -> Fragment {
        let op = op.map(BinaryOp::symbol).unwrap_or("");
        Fragment::new(format!("{target} {op}= {}", value.text), PREC_ASSIGN)
    }

    fn unary(&self, op: UnaryOp, operand: Fragment) -> Fragment {
        let parens = operand.prec < PREC_PREFIX
            || (op == UnaryOp::Negate && operand.text.starts_with('-'));
        let symbol = match op {
            UnaryOp::Negate | UnaryOp::Not | UnaryOp::CreatePointer => op.symbol().to_string(),
            _ => {
                let word = op.symbol().trim_end();
                format!("{} ", self.paint(word, Class::Keyword))
            }
        };
        Fragment::new(
            format!("{symbol}{}", operand.wrapped(parens)),
            PREC_PREFIX,
        )
    }

    fn binary(&self, left: Fragment, op: BinaryOp, right: Fragment) -> Fragment {
        let prec = op.precedence();
        // comparisons do not chain, so an equal-precedence left side needs parens too
        let left_parens = if prec == PREC_COMPARISON {
            left.prec <= prec
        } else {
            left.prec < prec
        };
        let text = format!(
            "{} {} {}",
            left.wrapped(left_parens),
            op.symbol(),
            right.wrapped(right.prec <= prec)
        );
        Fragment::new(text, prec)
    }
}

impl Frame {
    fn open(kind: FrameKind, base: usize) -> Self {
        Self {
            kind,
            base,
            statements: Vec::new(),
        }
    }
}
