use std::{
    collections::{HashMap, HashSet},
    fmt::{self, Display, Formatter},
};

use crate::{error::Result, AsmError, LineId};

/// Anything that can turn a label into a number at evaluation time.
pub trait Symbols {
    /// Resolves `label`, failing if it is undefined or names something that is not a value.
    fn resolve(&self, label: &str, line: &LineId) -> Result<i64>;
}

impl Symbols for HashMap<String, i64> {
    fn resolve(&self, label: &str, line: &LineId) -> Result<i64> {
        self.get(label).copied().ok_or_else(|| AsmError::UndefinedLabel {
            line: line.clone(),
            label: label.to_string(),
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Tok(pub u8);

impl Tok {
    pub const MODULUS: Self = Self(b'%');
    pub const SOLIDUS: Self = Self(b'/');
    pub const STAR: Self = Self(b'*');
    pub const PLUS: Self = Self(b'+');
    pub const MINUS: Self = Self(b'-');
    pub const AMP: Self = Self(b'&');
    pub const CARET: Self = Self(b'^');
    pub const PIPE: Self = Self(b'|');
    pub const LPAREN: Self = Self(b'(');
    pub const RPAREN: Self = Self(b')');

    pub const EOF: Self = Self(0x80);
    pub const ID: Self = Self(0x81);
    pub const NUM: Self = Self(0x82);
    pub const LSB: Self = Self(0x83);
    pub const BYTE: Self = Self(0x84);

    pub const ASL: Self = Self(0xC0); // <<
    pub const ASR: Self = Self(0xC1); // >>
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

impl BinOp {
    fn from_tok(tok: Tok) -> Option<Self> {
        Some(match tok {
            Tok::PLUS => BinOp::Add,
            Tok::MINUS => BinOp::Sub,
            Tok::STAR => BinOp::Mul,
            Tok::SOLIDUS => BinOp::Div,
            Tok::MODULUS => BinOp::Mod,
            Tok::AMP => BinOp::And,
            Tok::PIPE => BinOp::Or,
            Tok::CARET => BinOp::Xor,
            Tok::ASL => BinOp::Shl,
            Tok::ASR => BinOp::Shr,
            _ => return None,
        })
    }

    fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::And => "&",
            BinOp::Or => "|",
            BinOp::Xor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprNode {
    Num(i64),
    Label(String),
    Negate(Box<ExprNode>),
    Lsb(Box<ExprNode>),
    Byte(u8, Box<ExprNode>),
    Binary(BinOp, Box<ExprNode>, Box<ExprNode>),
}

impl Display for ExprNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ExprNode::Num(value) => write!(f, "{value}"),
            ExprNode::Label(label) => write!(f, "{label}"),
            ExprNode::Negate(node) => write!(f, "-{node}"),
            ExprNode::Lsb(node) => write!(f, "LSB({node})"),
            ExprNode::Byte(n, node) => write!(f, "BYTE{n}({node})"),
            ExprNode::Binary(op, lhs, rhs) => write!(f, "({lhs} {} {rhs})", op.symbol()),
        }
    }
}

/// A parsed expression. Labels are only looked up when it is evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
    text: String,
    root: ExprNode,
}

impl Expr {
    pub fn parse(line: &LineId, text: &str) -> Result<Self> {
        let root = Parser::new(line, text).parse()?;
        Ok(Self {
            text: text.trim().to_string(),
            root,
        })
    }

    pub fn constant(value: i64) -> Self {
        Self {
            text: value.to_string(),
            root: ExprNode::Num(value),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn root(&self) -> &ExprNode {
        &self.root
    }

    pub fn negated(self) -> Self {
        Self {
            text: format!("-({})", self.text),
            root: ExprNode::Negate(Box::new(self.root)),
        }
    }

    pub fn labels(&self) -> Vec<&str> {
        fn walk<'a>(node: &'a ExprNode, out: &mut Vec<&'a str>) {
            match node {
                ExprNode::Num(_) => {}
                ExprNode::Label(label) => {
                    if !out.contains(&label.as_str()) {
                        out.push(label);
                    }
                }
                ExprNode::Negate(node) | ExprNode::Lsb(node) | ExprNode::Byte(_, node) => {
                    walk(node, out)
                }
                ExprNode::Binary(_, lhs, rhs) => {
                    walk(lhs, out);
                    walk(rhs, out);
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.root, &mut out);
        out
    }

    pub fn contains_any(&self, names: &HashSet<String>) -> bool {
        self.labels().iter().any(|label| names.contains(*label))
    }

    pub fn evaluate(&self, line: &LineId, symbols: &dyn Symbols) -> Result<i64> {
        eval_node(&self.root, line, symbols)
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

/// Parses a single numeric or character literal. Returns `None` for anything else.
pub fn parse_literal(text: &str) -> Option<i64> {
    let line = LineId::config();
    let mut lexer = Lexer::new(&line, text.trim());
    if lexer.peek().ok()? != Tok::NUM {
        return None;
    }
    let value = lexer.number;
    lexer.eat();
    (lexer.peek().ok()? == Tok::EOF).then_some(value)
}

pub fn is_valid_label(label: &str) -> bool {
    if label.starts_with("__") || label.starts_with("..") {
        return false;
    }
    let mut chars = label.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if first == '.' || first == '_' {
        // a bare prefix is not a label
        let rest = &label[1..];
        return !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    }
    first.is_ascii_alphabetic() && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn byte_of(value: i64, n: u8) -> i64 {
    // two's complement sign-extends past the natural width
    if n >= 8 {
        if value < 0 {
            0xFF
        } else {
            0
        }
    } else {
        (value >> (8 * n as u32)) & 0xFF
    }
}

fn overflow(line: &LineId, msg: &str) -> AsmError {
    AsmError::Overflow {
        line: line.clone(),
        msg: msg.to_string(),
    }
}

/// Intermediate result. Division or modulo that does not come out even carries a
/// fraction until the next bitwise operator or the end of the expression.
#[derive(Copy, Clone, Debug, PartialEq)]
enum Num {
    Int(i64),
    Real(f64),
}

impl Num {
    fn real(self) -> f64 {
        match self {
            Num::Int(value) => value as f64,
            Num::Real(value) => value,
        }
    }

    /// Truncates toward zero.
    fn int(self, line: &LineId) -> Result<i64> {
        match self {
            Num::Int(value) => Ok(value),
            Num::Real(value) => {
                // 2^63 is exactly representable, i64::MAX is not
                if !value.is_finite()
                    || value < i64::MIN as f64
                    || value >= 9_223_372_036_854_775_808.0
                {
                    return Err(overflow(line, "arithmetic overflow in fractional result"));
                }
                Ok(value.trunc() as i64)
            }
        }
    }
}

fn real(line: &LineId, value: f64, what: &str) -> Result<Num> {
    if value.is_finite() {
        Ok(Num::Real(value))
    } else {
        Err(overflow(line, &format!("arithmetic overflow in {what}")))
    }
}

fn eval_node(node: &ExprNode, line: &LineId, symbols: &dyn Symbols) -> Result<i64> {
    eval_num(node, line, symbols)?.int(line)
}

fn eval_num(node: &ExprNode, line: &LineId, symbols: &dyn Symbols) -> Result<Num> {
    match node {
        ExprNode::Num(value) => Ok(Num::Int(*value)),
        ExprNode::Label(label) => Ok(Num::Int(symbols.resolve(label, line)?)),
        ExprNode::Negate(node) => match eval_num(node, line, symbols)? {
            Num::Int(value) => value
                .checked_neg()
                .map(Num::Int)
                .ok_or_else(|| overflow(line, "arithmetic overflow in negation")),
            Num::Real(value) => Ok(Num::Real(-value)),
        },
        ExprNode::Lsb(node) => Ok(Num::Int(byte_of(eval_node(node, line, symbols)?, 0))),
        ExprNode::Byte(n, node) => Ok(Num::Int(byte_of(eval_node(node, line, symbols)?, *n))),
        ExprNode::Binary(op, lhs, rhs) => {
            let lhs = eval_num(lhs, line, symbols)?;
            let rhs = eval_num(rhs, line, symbols)?;
            match op {
                BinOp::Add | BinOp::Sub | BinOp::Mul => arithmetic(*op, lhs, rhs, line),
                BinOp::Div => divide(lhs, rhs, line),
                BinOp::Mod => modulo(lhs, rhs, line),
                _ => bitwise(*op, lhs.int(line)?, rhs.int(line)?, line).map(Num::Int),
            }
        }
    }
}

fn arithmetic(op: BinOp, lhs: Num, rhs: Num, line: &LineId) -> Result<Num> {
    let name = match op {
        BinOp::Add => "addition",
        BinOp::Sub => "subtraction",
        _ => "multiplication",
    };
    match (lhs, rhs) {
        (Num::Int(lhs), Num::Int(rhs)) => {
            let value = match op {
                BinOp::Add => lhs.checked_add(rhs),
                BinOp::Sub => lhs.checked_sub(rhs),
                _ => lhs.checked_mul(rhs),
            };
            value
                .map(Num::Int)
                .ok_or_else(|| overflow(line, &format!("arithmetic overflow in {name}")))
        }
        _ => {
            let (lhs, rhs) = (lhs.real(), rhs.real());
            let value = match op {
                BinOp::Add => lhs + rhs,
                BinOp::Sub => lhs - rhs,
                _ => lhs * rhs,
            };
            real(line, value, name)
        }
    }
}

fn divide(lhs: Num, rhs: Num, line: &LineId) -> Result<Num> {
    if rhs.real() == 0.0 {
        return Err(AsmError::DivideByZero { line: line.clone() });
    }
    if let (Num::Int(lhs), Num::Int(rhs)) = (lhs, rhs) {
        if lhs.checked_rem(rhs) == Some(0) {
            return lhs
                .checked_div(rhs)
                .map(Num::Int)
                .ok_or_else(|| overflow(line, "arithmetic overflow in division"));
        }
    }
    real(line, lhs.real() / rhs.real(), "division")
}

fn modulo(lhs: Num, rhs: Num, line: &LineId) -> Result<Num> {
    if rhs.real() == 0.0 {
        return Err(AsmError::DivideByZero { line: line.clone() });
    }
    // result takes the sign of the divisor
    match (lhs, rhs) {
        (Num::Int(lhs), Num::Int(rhs)) => {
            let rem = lhs.checked_rem(rhs).unwrap_or(0);
            if rem != 0 && ((rem < 0) != (rhs < 0)) {
                Ok(Num::Int(rem + rhs))
            } else {
                Ok(Num::Int(rem))
            }
        }
        _ => {
            let (lhs, rhs) = (lhs.real(), rhs.real());
            let rem = lhs % rhs;
            if rem != 0.0 && ((rem < 0.0) != (rhs < 0.0)) {
                real(line, rem + rhs, "modulo")
            } else {
                real(line, rem, "modulo")
            }
        }
    }
}

fn bitwise(op: BinOp, lhs: i64, rhs: i64, line: &LineId) -> Result<i64> {
    match op {
        BinOp::And => Ok(lhs & rhs),
        BinOp::Or => Ok(lhs | rhs),
        BinOp::Xor => Ok(lhs ^ rhs),
        BinOp::Shl => {
            if rhs < 0 {
                return Err(overflow(line, "negative shift count"));
            }
            if lhs == 0 {
                return Ok(0);
            }
            if rhs >= 63 {
                return Err(overflow(line, "arithmetic overflow in shift"));
            }
            let shifted = lhs << rhs;
            if (shifted >> rhs) != lhs {
                return Err(overflow(line, "arithmetic overflow in shift"));
            }
            Ok(shifted)
        }
        _ => {
            if rhs < 0 {
                return Err(overflow(line, "negative shift count"));
            }
            Ok(lhs >> rhs.min(63))
        }
    }
}

struct Lexer<'a> {
    line: &'a LineId,
    src: &'a [u8],
    at: usize,
    stash: Option<Tok>,
    string: String,
    number: i64,
    after_value: bool,
}

impl<'a> Lexer<'a> {
    fn new(line: &'a LineId, text: &'a str) -> Self {
        Self {
            line,
            src: text.as_bytes(),
            at: 0,
            stash: None,
            string: String::new(),
            number: 0,
            after_value: false,
        }
    }

    fn err(&self, token: &str) -> AsmError {
        AsmError::Lexical {
            line: self.line.clone(),
            token: token.to_string(),
        }
    }

    fn byte(&self) -> Option<u8> {
        self.src.get(self.at).copied()
    }

    fn next_byte(&self) -> Option<u8> {
        self.src.get(self.at + 1).copied()
    }

    fn stash(&mut self, tok: Tok) -> Result<Tok> {
        self.stash = Some(tok);
        Ok(tok)
    }

    fn eat(&mut self) {
        if let Some(tok) = self.stash.take() {
            self.after_value = matches!(tok, Tok::NUM | Tok::ID | Tok::RPAREN);
        }
        self.string.clear();
    }

    fn digits(&mut self) {
        while let Some(c) = self.byte() {
            if c == b'_' {
                self.at += 1;
                continue; // allow '_' separators in numbers
            }
            if !c.is_ascii_alphanumeric() {
                break;
            }
            self.string.push(c as char);
            self.at += 1;
        }
    }

    fn radix(&mut self, digits: &str, radix: u32, token: &str) -> Result<Tok> {
        if digits.is_empty() {
            return Err(self.err(token));
        }
        self.number = i64::from_str_radix(digits, radix).map_err(|_| self.err(token))?;
        self.stash(Tok::NUM)
    }

    fn escape(&mut self) -> Result<u8> {
        let c = match self.byte() {
            Some(b'n') => b'\n',
            Some(b'r') => b'\r',
            Some(b't') => b'\t',
            Some(b'\\') => b'\\',
            Some(b'\'') => b'\'',
            Some(b'"') => b'"',
            Some(b'0') => b'\0',
            _ => return Err(self.err("\\")),
        };
        self.at += 1;
        Ok(c)
    }

    fn peek(&mut self) -> Result<Tok> {
        if let Some(tok) = self.stash {
            return Ok(tok);
        }
        while let Some(c) = self.byte() {
            if !c.is_ascii_whitespace() {
                break;
            }
            self.at += 1;
        }
        let Some(c) = self.byte() else {
            return self.stash(Tok::EOF);
        };
        match c {
            b'$' => {
                self.at += 1;
                self.digits();
                let digits = self.string.clone();
                self.radix(&digits, 16, &format!("${digits}"))
            }
            // binary prefix only where a value is expected, otherwise modulus
            b'%' if !self.after_value && matches!(self.next_byte(), Some(b'0' | b'1')) => {
                self.at += 1;
                self.digits();
                let digits = self.string.clone();
                self.radix(&digits, 2, &format!("%{digits}"))
            }
            c if c.is_ascii_digit() => {
                self.digits();
                let token = self.string.clone();
                if let Some(hex) = token
                    .strip_prefix("0x")
                    .or_else(|| token.strip_prefix("0X"))
                {
                    return self.radix(hex, 16, &token);
                }
                if let Some(hex) = token.strip_suffix(['H', 'h']) {
                    if hex.bytes().all(|c| c.is_ascii_hexdigit()) {
                        return self.radix(hex, 16, &token);
                    }
                }
                if !token.bytes().all(|c| c.is_ascii_digit()) {
                    return Err(self.err(&token));
                }
                self.radix(&token, 10, &token)
            }
            b'\'' => {
                self.at += 1;
                let value = match self.byte() {
                    Some(b'\\') => {
                        self.at += 1;
                        self.escape()?
                    }
                    Some(c) if c != b'\'' => {
                        self.at += 1;
                        c
                    }
                    _ => return Err(self.err("'")),
                };
                if self.byte() != Some(b'\'') {
                    return Err(self.err(&format!("'{}", value as char)));
                }
                self.at += 1;
                self.number = value as i64;
                self.stash(Tok::NUM)
            }
            c if c.is_ascii_alphabetic() || c == b'_' || c == b'.' => {
                self.string.push(c as char);
                self.at += 1;
                while let Some(c) = self.byte() {
                    if !c.is_ascii_alphanumeric() && c != b'_' {
                        break;
                    }
                    self.string.push(c as char);
                    self.at += 1;
                }
                let ident = self.string.as_str();
                if let Some(bits) = ident.strip_prefix('b') {
                    if !bits.is_empty() && bits.bytes().all(|c| c == b'0' || c == b'1') {
                        let bits = bits.to_string();
                        return self.radix(&bits, 2, &format!("b{bits}"));
                    }
                }
                if self.byte() == Some(b'(') {
                    if ident == "LSB" {
                        return self.stash(Tok::LSB);
                    }
                    if let Some(n) = ident.strip_prefix("BYTE") {
                        if n.len() == 1 && n.as_bytes()[0].is_ascii_digit() {
                            self.number = (n.as_bytes()[0] - b'0') as i64;
                            return self.stash(Tok::BYTE);
                        }
                    }
                }
                if !is_valid_label(ident) {
                    return Err(self.err(ident));
                }
                self.stash(Tok::ID)
            }
            b'<' | b'>' => {
                if self.next_byte() != Some(c) {
                    return Err(self.err(&(c as char).to_string()));
                }
                self.at += 2;
                self.stash(if c == b'<' { Tok::ASL } else { Tok::ASR })
            }
            b'+' | b'-' | b'*' | b'/' | b'%' | b'&' | b'|' | b'^' | b'(' | b')' => {
                self.at += 1;
                self.stash(Tok(c))
            }
            _ => {
                let rest = String::from_utf8_lossy(&self.src[self.at..]);
                let token = rest.split_whitespace().next().unwrap_or_default().to_string();
                Err(self.err(&token))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Binary(BinOp),
    Negate,
    Lsb,
    Byte(u8),
    Paren,
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    operands: Vec<ExprNode>,
    operators: Vec<Op>,
}

impl<'a> Parser<'a> {
    fn new(line: &'a LineId, text: &'a str) -> Self {
        Self {
            lexer: Lexer::new(line, text),
            operands: Vec::new(),
            operators: Vec::new(),
        }
    }

    fn err(&self, msg: &str) -> AsmError {
        AsmError::syntax(self.lexer.line, msg)
    }

    fn precedence(op: Op) -> u8 {
        match op {
            Op::Paren | Op::Lsb | Op::Byte(_) => 0xFF, // only closed by `)`
            Op::Negate => 0,
            Op::Binary(BinOp::Mul | BinOp::Div | BinOp::Mod) => 1,
            Op::Binary(BinOp::Add | BinOp::Sub) => 2,
            Op::Binary(BinOp::Shl | BinOp::Shr) => 3,
            Op::Binary(BinOp::And | BinOp::Or | BinOp::Xor) => 4,
        }
    }

    fn apply(&mut self, op: Op) -> Result<()> {
        let Some(rhs) = self.operands.pop() else {
            return Err(self.err("expected value"));
        };
        let node = match op {
            Op::Negate => ExprNode::Negate(Box::new(rhs)),
            Op::Lsb => ExprNode::Lsb(Box::new(rhs)),
            Op::Byte(n) => ExprNode::Byte(n, Box::new(rhs)),
            Op::Binary(bin) => {
                let lhs = self.operands.pop().ok_or_else(|| self.err("expected value"))?;
                ExprNode::Binary(bin, Box::new(lhs), Box::new(rhs))
            }
            Op::Paren => return Err(self.err("unmatched `(`")),
        };
        self.operands.push(node);
        Ok(())
    }

    fn push_apply(&mut self, op: Op) -> Result<()> {
        while let Some(top) = self.operators.last().copied() {
            if Self::precedence(top) > Self::precedence(op) {
                break;
            }
            self.operators.pop();
            self.apply(top)?;
        }
        self.operators.push(op);
        Ok(())
    }

    fn parse(mut self) -> Result<ExprNode> {
        let mut seen_val = false;
        let mut paren_depth = 0usize;
        // shunting-yard, building the tree as operators are applied
        loop {
            match self.lexer.peek()? {
                Tok::EOF => break,
                Tok::NUM => {
                    if seen_val {
                        return Err(self.err("expected operator"));
                    }
                    self.operands.push(ExprNode::Num(self.lexer.number));
                    seen_val = true;
                }
                Tok::ID => {
                    if seen_val {
                        return Err(self.err("expected operator"));
                    }
                    self.operands.push(ExprNode::Label(self.lexer.string.clone()));
                    seen_val = true;
                }
                Tok::MINUS if !seen_val => {
                    // prefix operators never pop anything
                    self.operators.push(Op::Negate);
                }
                tok @ (Tok::LSB | Tok::BYTE) => {
                    if seen_val {
                        return Err(self.err("expected operator"));
                    }
                    self.operators.push(if tok == Tok::LSB {
                        Op::Lsb
                    } else {
                        Op::Byte(self.lexer.number as u8)
                    });
                    // the lexer only produces these when `(` follows
                    self.lexer.eat();
                    if self.lexer.peek()? != Tok::LPAREN {
                        return Err(self.err("expected `(`"));
                    }
                    self.operators.push(Op::Paren);
                    paren_depth += 1;
                }
                Tok::LPAREN => {
                    if seen_val {
                        return Err(self.err("expected operator"));
                    }
                    self.operators.push(Op::Paren);
                    paren_depth += 1;
                }
                Tok::RPAREN => {
                    if !seen_val {
                        return Err(self.err("expected value"));
                    }
                    if paren_depth == 0 {
                        return Err(self.err("unmatched `)`"));
                    }
                    loop {
                        match self.operators.pop() {
                            Some(Op::Paren) => break,
                            Some(op) => self.apply(op)?,
                            None => return Err(self.err("unmatched `)`")),
                        }
                    }
                    if let Some(op @ (Op::Lsb | Op::Byte(_))) = self.operators.last().copied() {
                        self.operators.pop();
                        self.apply(op)?;
                    }
                    paren_depth -= 1;
                }
                tok => {
                    let Some(op) = BinOp::from_tok(tok) else {
                        return Err(self.err("unexpected token"));
                    };
                    if !seen_val {
                        return Err(self.err("expected value"));
                    }
                    self.push_apply(Op::Binary(op))?;
                    seen_val = false;
                    self.lexer.eat();
                    continue;
                }
            }
            self.lexer.eat();
        }
        if self.operands.is_empty() && self.operators.is_empty() {
            return Err(self.err("empty expression"));
        }
        if !seen_val {
            return Err(self.err("expected value"));
        }
        while let Some(op) = self.operators.pop() {
            self.apply(op)?;
        }
        let root = self.operands.pop().ok_or_else(|| self.err("expected value"))?;
        if !self.operands.is_empty() {
            return Err(self.err("expected operator"));
        }
        Ok(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line() -> LineId {
        LineId::new("test.asm", 1)
    }

    fn eval(text: &str) -> i64 {
        Expr::parse(&line(), text)
            .unwrap()
            .evaluate(&line(), &HashMap::new())
            .unwrap()
    }

    fn eval_with(text: &str, labels: &[(&str, i64)]) -> Result<i64> {
        let symbols: HashMap<String, i64> = labels
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect();
        Expr::parse(&line(), text)?.evaluate(&line(), &symbols)
    }

    #[test]
    fn literals() {
        assert_eq!(eval("$1F"), 31);
        assert_eq!(eval("0x1f"), 31);
        assert_eq!(eval("0FFH"), 255);
        assert_eq!(eval("0ffh"), 255);
        assert_eq!(eval("7fh"), 127);
        assert_eq!(eval("%1010"), 10);
        assert_eq!(eval("b1010"), 10);
        assert_eq!(eval("1_000"), 1000);
        assert_eq!(eval("'A'"), 65);
        assert_eq!(eval("'\\n'"), 10);
    }

    #[test]
    fn precedence() {
        assert_eq!(eval("2 + 3 * 4"), 14);
        assert_eq!(eval("(2 + 3) * 4"), 20);
        assert_eq!(eval("1 + 2 << 2"), 12);
        assert_eq!(eval("1 << 2 + 1"), 8);
        assert_eq!(eval("6 & 3 + 1"), 4);
        assert_eq!(eval("12 | 3 ^ 1"), 14);
        assert_eq!(eval("10 - 4 - 3"), 3);
    }

    #[test]
    fn unary_minus_binds_tightly() {
        assert_eq!(eval("-2 + 5"), 3);
        assert_eq!(eval("3 - -2"), 5);
        assert_eq!(eval("--4"), 4);
        assert_eq!(eval("-(2 + 5)"), -7);
    }

    #[test]
    fn division_keeps_fractions_until_the_end() {
        assert_eq!(eval("10/3/2"), 1);
        assert_eq!(eval("7/2*2"), 7);
        assert_eq!(eval("(10/4)*4"), 10);
        assert_eq!(eval("1/3 + 1/3 + 1/3"), 1);
        assert_eq!(eval("-7/2*2"), -7);
        // bitwise operators and byte extraction see truncated operands
        assert_eq!(eval("(7/2) | 0"), 3);
        assert_eq!(eval("(7/2) << 1"), 6);
        assert_eq!(eval("LSB(7/2) * 2"), 6);
        assert_eq!(eval("-7/2"), -3);
        assert_eq!(eval("-7 % 3"), 2);
        assert_eq!(eval("7 % -3"), -2);
        assert_eq!(eval("10%3"), 1);
    }

    #[test]
    fn modulus_versus_binary_prefix() {
        assert_eq!(eval("5 %10"), 5);
        assert_eq!(eval("%10 + 1"), 3);
    }

    #[test]
    fn byte_extraction() {
        assert_eq!(eval("LSB($1234)"), 0x34);
        assert_eq!(eval("BYTE0($1234)"), 0x34);
        assert_eq!(eval("BYTE1($1234)"), 0x12);
        assert_eq!(eval("BYTE2($1234)"), 0);
        assert_eq!(eval("BYTE9($1234)"), 0);
        assert_eq!(eval("BYTE1(-1)"), 0xFF);
        assert_eq!(eval("LSB(-2)"), 0xFE);
        assert_eq!(eval("LSB($1234) + 1"), 0x35);
        assert_eq!(eval("BYTE1($12 << 8 | 7)"), 0x12);
    }

    #[test]
    fn labels() {
        assert_eq!(eval_with("start + 2", &[("start", 0x100)]).unwrap(), 0x102);
        assert_eq!(eval_with(".loop - 1", &[(".loop", 5)]).unwrap(), 4);
        assert_eq!(eval_with("_data*2", &[("_data", 3)]).unwrap(), 6);
        assert!(matches!(
            eval_with("missing + 1", &[]),
            Err(AsmError::UndefinedLabel { label, .. }) if label == "missing"
        ));
        let expr = Expr::parse(&line(), "a + b * a").unwrap();
        assert_eq!(expr.labels(), vec!["a", "b"]);
    }

    #[test]
    fn lexical_errors() {
        assert!(matches!(
            Expr::parse(&line(), "1 # 2"),
            Err(AsmError::Lexical { token, .. }) if token == "#"
        ));
        assert!(matches!(Expr::parse(&line(), "12G"), Err(AsmError::Lexical { .. })));
        assert!(matches!(Expr::parse(&line(), "__x"), Err(AsmError::Lexical { .. })));
        assert!(matches!(Expr::parse(&line(), "1 < 2"), Err(AsmError::Lexical { .. })));
        assert!(matches!(Expr::parse(&line(), "$"), Err(AsmError::Lexical { .. })));
    }

    #[test]
    fn syntax_errors() {
        for text in ["(1 + 2", "1 + 2)", "1 +", "", "1 2", "* 3", "LSB 3", "()"] {
            let err = Expr::parse(&line(), text).unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::Syntax, "{text}: {err}");
        }
    }

    #[test]
    fn arithmetic_errors() {
        assert!(matches!(
            eval_with("1 / 0", &[]),
            Err(AsmError::DivideByZero { .. })
        ));
        assert!(matches!(
            eval_with("1 % (2 - 2)", &[]),
            Err(AsmError::DivideByZero { .. })
        ));
        assert!(matches!(
            eval_with("1 << -1", &[]),
            Err(AsmError::Overflow { .. })
        ));
        assert!(matches!(
            eval_with("$7FFFFFFFFFFFFFFF + 1", &[]),
            Err(AsmError::Overflow { .. })
        ));
    }

    #[test]
    fn evaluation_is_repeatable() {
        let expr = Expr::parse(&line(), "x * 2").unwrap();
        let symbols: HashMap<String, i64> = [("x".to_string(), 21)].into_iter().collect();
        assert_eq!(expr.evaluate(&line(), &symbols).unwrap(), 42);
        assert_eq!(expr.evaluate(&line(), &symbols).unwrap(), 42);
    }

    #[test]
    fn literal_parsing() {
        assert_eq!(parse_literal("$10"), Some(16));
        assert_eq!(parse_literal(" 'z' "), Some(122));
        assert_eq!(parse_literal("1+1"), None);
        assert_eq!(parse_literal("label"), None);
    }

    #[test]
    fn label_validity() {
        assert!(is_valid_label("start"));
        assert!(is_valid_label(".loop"));
        assert!(is_valid_label("_file_local"));
        assert!(!is_valid_label("__reserved"));
        assert!(!is_valid_label("..x"));
        assert!(!is_valid_label("9lives"));
        assert!(!is_valid_label("."));
    }

    #[test]
    fn negated_wraps_root() {
        let expr = Expr::parse(&line(), "3 + 1").unwrap().negated();
        assert_eq!(expr.evaluate(&line(), &HashMap::new()).unwrap(), -4);
        assert_eq!(expr.text(), "-(3 + 1)");
    }
}
