//! Bytecode parts: deferred producers of the bit fields that make up an encoded instruction.
//!
//! A part is built when an operand is matched during the first pass, before label addresses
//! are known, and is asked for its value once labels are resolved. Evaluation never mutates a
//! part, so asking twice gives the same answer.

use std::{collections::HashSet, rc::Rc};

use indexmap::IndexMap;

use crate::{
    error::Result,
    expr::{Expr, Symbols},
    memzone::ZoneBounds,
    word::{fits, Value, Word},
    AsmError, Endian, LineId, WordLayout,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartShape {
    pub bits: u32,
    pub word_align: bool,
    pub multi_word_endian: Endian,
    pub intra_word_endian: Endian,
}

impl PartShape {
    pub fn new(bits: u32, layout: &WordLayout) -> Self {
        Self {
            bits,
            word_align: false,
            multi_word_endian: layout.multi_word_endian,
            intra_word_endian: layout.intra_word_endian,
        }
    }

    pub fn aligned(mut self, word_align: bool) -> Self {
        self.word_align = word_align;
        self
    }

    pub fn endian(mut self, multi: Option<Endian>, intra: Option<Endian>) -> Self {
        self.multi_word_endian = multi.unwrap_or(self.multi_word_endian);
        self.intra_word_endian = intra.unwrap_or(self.intra_word_endian);
        self
    }
}

/// What a part needs to know about the line it is evaluated for.
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    pub symbols: &'a dyn Symbols,
    /// Address of the instruction, in words.
    pub address: i64,
    /// Size of the instruction, in words.
    pub size: usize,
}

#[derive(Debug, Clone)]
pub enum Lookup {
    /// A key matched verbatim in the operand text.
    Key {
        key: String,
        table: Rc<IndexMap<String, i64>>,
    },
    /// A key computed from an expression.
    Numeric {
        expr: Expr,
        table: Rc<IndexMap<i64, i64>>,
    },
}

#[derive(Debug, Clone)]
pub enum PartKind {
    Numeric(i64),
    Expression(Expr),
    Range {
        expr: Expr,
        min: Option<i64>,
        max: Option<i64>,
    },
    InZone {
        expr: Expr,
        zone: ZoneBounds,
    },
    Address {
        expr: Expr,
        zone: ZoneBounds,
        slice_lsb: bool,
        match_msb: bool,
    },
    Relative {
        expr: Expr,
        zone: ZoneBounds,
        min: Option<i64>,
        max: Option<i64>,
        from_end: bool,
    },
    Enumeration(Lookup),
    Composite(Vec<ByteCodePart>),
}

#[derive(Debug, Clone)]
pub struct ByteCodePart {
    pub shape: PartShape,
    pub line: LineId,
    pub kind: PartKind,
}

fn check_range(value: i64, min: Option<i64>, max: Option<i64>, line: &LineId) -> Result<i64> {
    let below = min.is_some_and(|min| value < min);
    let above = max.is_some_and(|max| value > max);
    if below || above {
        return Err(AsmError::OutOfRange {
            line: line.clone(),
            value,
            min: min.unwrap_or(i64::MIN),
            max: max.unwrap_or(i64::MAX),
        });
    }
    Ok(value)
}

fn low_bits(value: i64, bits: u32) -> u64 {
    if bits >= 64 {
        value as u64
    } else {
        (value as u64) & ((1u64 << bits) - 1)
    }
}

impl ByteCodePart {
    pub fn new(kind: PartKind, shape: PartShape, line: &LineId) -> Self {
        Self {
            shape,
            line: line.clone(),
            kind,
        }
    }

    pub fn numeric(value: i64, shape: PartShape, line: &LineId) -> Self {
        Self::new(PartKind::Numeric(value), shape, line)
    }

    /// Fuses `parts` into one field whose width is the sum of theirs. Alignment and byte order
    /// come from `shape`.
    pub fn composite(parts: Vec<ByteCodePart>, shape: PartShape, line: &LineId) -> Self {
        let bits = parts.iter().map(ByteCodePart::bit_size).sum();
        Self::new(PartKind::Composite(parts), PartShape { bits, ..shape }, line)
    }

    pub fn with_endian(mut self, multi: Option<Endian>, intra: Option<Endian>) -> Self {
        self.shape = self.shape.endian(multi, intra);
        self
    }

    pub fn bit_size(&self) -> u32 {
        self.shape.bits
    }

    pub fn word_align(&self) -> bool {
        self.shape.word_align
    }

    pub fn expr(&self) -> Option<&Expr> {
        match &self.kind {
            PartKind::Expression(expr)
            | PartKind::Range { expr, .. }
            | PartKind::InZone { expr, .. }
            | PartKind::Address { expr, .. }
            | PartKind::Relative { expr, .. }
            | PartKind::Enumeration(Lookup::Numeric { expr, .. }) => Some(expr),
            _ => None,
        }
    }

    pub fn contains_register_labels(&self, registers: &HashSet<String>) -> bool {
        match &self.kind {
            PartKind::Composite(parts) => parts
                .iter()
                .any(|part| part.contains_register_labels(registers)),
            _ => self
                .expr()
                .is_some_and(|expr| expr.contains_any(registers)),
        }
    }

    pub fn get_value(&self, ctx: &EvalContext<'_>) -> Result<i64> {
        let line = &self.line;
        let eval = |expr: &Expr| expr.evaluate(line, ctx.symbols);
        match &self.kind {
            PartKind::Numeric(value) => Ok(*value),
            PartKind::Expression(expr) => eval(expr),
            PartKind::Range { expr, min, max } => check_range(eval(expr)?, *min, *max, line),
            PartKind::InZone { expr, zone } => zone.check(eval(expr)?, line),
            PartKind::Address {
                expr,
                zone,
                slice_lsb,
                match_msb,
            } => {
                let value = zone.check(eval(expr)?, line)?;
                if !slice_lsb {
                    return Ok(value);
                }
                let bits = self.shape.bits;
                if *match_msb && bits < 64 && (value >> bits) != (ctx.address >> bits) {
                    return Err(AsmError::AddressMsbMismatch {
                        line: line.clone(),
                        value,
                        address: ctx.address,
                    });
                }
                Ok(low_bits(value, bits) as i64)
            }
            PartKind::Relative {
                expr,
                zone,
                min,
                max,
                from_end,
            } => {
                let target = zone.check(eval(expr)?, line)?;
                let mut offset = target - ctx.address;
                if *from_end {
                    offset -= ctx.size as i64 - 1;
                }
                check_range(offset, *min, *max, line)
            }
            PartKind::Enumeration(Lookup::Key { key, table }) => {
                table
                    .get(key)
                    .copied()
                    .ok_or_else(|| AsmError::NotEnumerated {
                        line: line.clone(),
                        key: key.clone(),
                    })
            }
            PartKind::Enumeration(Lookup::Numeric { expr, table }) => {
                let key = eval(expr)?;
                table
                    .get(&key)
                    .copied()
                    .ok_or_else(|| AsmError::NotEnumerated {
                        line: line.clone(),
                        key: key.to_string(),
                    })
            }
            PartKind::Composite(parts) => {
                let mut value = 0u64;
                for part in parts {
                    let bits = part.bit_size();
                    let field = low_bits(part.get_value(ctx)?, bits);
                    value = if bits >= 64 { field } else { (value << bits) | field };
                }
                Ok(value as i64)
            }
        }
    }

    /// Resolves the part and splits it into words. Widths that are a whole number of words
    /// become a multi-word value; any other width is emitted as one raw field.
    pub fn to_words(&self, ctx: &EvalContext<'_>, layout: &WordLayout) -> Result<Vec<Word>> {
        let bits = self.shape.bits;
        if bits == 0 {
            return Ok(Vec::new());
        }
        let value = self.get_value(ctx)?;
        if !fits(value, bits) {
            return Err(AsmError::Overflow {
                line: self.line.clone(),
                msg: format!("value {value} does not fit in {bits} bits"),
            });
        }
        if bits % layout.word_bits == 0 {
            let value = Value::with_word_count(
                value,
                (bits / layout.word_bits) as usize,
                layout.word_bits,
                layout.segment_bits,
                self.shape.intra_word_endian,
                self.shape.multi_word_endian,
            )?;
            return Ok(value.words_ordered());
        }
        Ok(vec![Word::new(value, bits, bits, Endian::Big)?])
    }
}
