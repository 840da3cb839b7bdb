//! Two-pass driver over in-memory source text.
//!
//! The first pass walks every line once: it claims addresses from the current memory zone,
//! defines labels and constants, and turns instructions into bytecode parts. The second pass
//! resolves those parts against the scope each line was read in and packs the bytes.
//!
//! ```text
//! ; comment
//! start:  ld a, 5
//! count = 3
//! .org $100 "rom"
//! .memzone rom
//! .byte 1, 2, count
//! .cstr "hello"
//! .fill 4, $EA
//! .zero 2
//! .zerountil $1F
//! .align 16
//! #create_memzone ram $C000 $DFFF
//! #create-scope "gfx" prefix="gfx_"
//! #use-scope "gfx"
//! #deactivate-scope "gfx"
//! ```

use std::rc::Rc;

use crate::{
    error::Result,
    expr::is_valid_label,
    isa::{AssembledInstruction, Isa},
    memzone::{MemoryZone, MemoryZoneManager, GLOBAL_ZONE},
    scope::{ActiveScopes, LabelScopes, ScopeId, ScopeKind},
    word::{BitPacker, Value, Word},
    AsmError, Endian, Expr, LineId, WordLayout,
};

/// One line's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramLine {
    pub line: LineId,
    pub address: i64,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
enum Emit {
    Instruction(AssembledInstruction),
    /// Expression list where every element is `bits` wide.
    Data { values: Vec<Expr>, bits: u32 },
    /// `count` words of one byte value.
    Fill { value: Expr, count: usize },
    Words(Vec<Word>),
}

#[derive(Debug)]
struct Line {
    id: LineId,
    address: i64,
    scope: ScopeId,
    active: ActiveScopes,
    emit: Emit,
}

/// Where pass 1 currently is within a file.
struct Cursor {
    file_scope: ScopeId,
    scope: ScopeId,
    zone: String,
    active: ActiveScopes,
}

pub struct Program<'a> {
    isa: &'a Isa,
    scopes: LabelScopes,
    zones: MemoryZoneManager,
    lines: Vec<Line>,
}

impl<'a> Program<'a> {
    /// Prepares a program for `isa`, seeding predefined constants, zones and data blocks.
    pub fn new(isa: &'a Isa) -> Result<Self> {
        let mut program = Self {
            isa,
            scopes: LabelScopes::new(isa.registers().clone()),
            zones: isa.zone_manager()?,
            lines: Vec::new(),
        };
        let line = LineId::config();
        let global = program.scopes.global();
        let active = ActiveScopes::new();
        let predefined = isa.predefined();
        for constant in &predefined.constants {
            program
                .scopes
                .define(global, &constant.name, constant.value, &line, &active)?;
        }
        let layout = isa.layout();
        for data in &predefined.data {
            program
                .scopes
                .define(global, &data.name, data.address, &line, &active)?;
            let element = Value::with_word_count(
                data.value,
                data.size,
                layout.word_bits,
                layout.segment_bits,
                layout.intra_word_endian,
                layout.multi_word_endian,
            )?
            .words_ordered();
            let words = element
                .iter()
                .copied()
                .cycle()
                .take(element.len() * data.count)
                .collect();
            tracing::debug!(
                "predefined data `{}` at ${:X}: {} word(s)",
                data.name,
                data.address,
                element.len() * data.count
            );
            program.lines.push(Line {
                id: line.clone(),
                address: data.address,
                scope: global,
                active: active.clone(),
                emit: Emit::Words(words),
            });
        }
        Ok(program)
    }

    pub fn zones(&self) -> &MemoryZoneManager {
        &self.zones
    }

    pub fn scopes(&self) -> &LabelScopes {
        &self.scopes
    }

    /// Value of a global label or constant.
    pub fn label(&self, name: &str) -> Option<i64> {
        self.scopes
            .lookup(self.scopes.global(), name, &ActiveScopes::new())
    }

    /// Runs the first pass over one source file. Files are laid out in the order they are added.
    pub fn add_source(&mut self, file: &str, text: &str) -> Result<()> {
        tracing::trace!("starting pass 1 over {file}");
        let file: Rc<str> = Rc::from(file);
        let file_scope = self.scopes.file_scope(&file);
        let mut cursor = Cursor {
            file_scope,
            scope: file_scope,
            zone: GLOBAL_ZONE.to_string(),
            active: ActiveScopes::new(),
        };
        for (index, raw) in text.lines().enumerate() {
            let line = LineId {
                file: file.clone(),
                line: index + 1,
            };
            let code = strip_comment(raw).trim();
            if code.is_empty() {
                continue;
            }
            self.statement(&mut cursor, &line, code)?;
        }
        Ok(())
    }

    /// Runs the second pass and returns every emitting line in source order.
    pub fn assemble(&self) -> Result<Vec<ProgramLine>> {
        tracing::trace!("starting pass 2");
        let layout = self.isa.layout();
        self.lines
            .iter()
            .map(|line| -> Result<ProgramLine> {
                let symbols = self.scopes.view(line.scope, &line.active);
                let bytes = match &line.emit {
                    Emit::Instruction(instruction) => {
                        instruction.to_bytes(&symbols, line.address)?
                    }
                    Emit::Data { values, bits } => {
                        let mut words = Vec::new();
                        for expr in values {
                            let value = expr.evaluate(&line.id, &symbols)?;
                            words.extend(self.data_words(&line.id, value, *bits)?);
                        }
                        pack(&words, layout.word_bits)
                    }
                    Emit::Fill { value, count } => {
                        let value = value.evaluate(&line.id, &symbols)? & 0xFF;
                        let word = self.data_words(&line.id, value, layout.word_bits.min(8))?;
                        let words: Vec<Word> = word.iter().copied().cycle().take(*count).collect();
                        pack(&words, layout.word_bits)
                    }
                    Emit::Words(words) => pack(words, layout.word_bits),
                };
                Ok(ProgramLine {
                    line: line.id.clone(),
                    address: line.address,
                    bytes,
                })
            })
            .collect()
    }

    /// Both passes' output flattened into one image starting at the lowest emitted address.
    ///
    /// With byte-multiple words, gaps between lines are zero filled and each line lands at its
    /// address. Other word sizes have no byte addressing, so lines are concatenated in order.
    pub fn image(&self) -> Result<Vec<u8>> {
        let lines = self.assemble()?;
        tracing::trace!("writing");
        let word_bits = self.isa.layout().word_bits;
        if word_bits % 8 != 0 {
            return Ok(lines.into_iter().flat_map(|line| line.bytes).collect());
        }
        let word_bytes = (word_bits / 8) as i64;
        let Some(base) = lines
            .iter()
            .filter(|line| !line.bytes.is_empty())
            .map(|line| line.address)
            .min()
        else {
            return Ok(Vec::new());
        };
        let mut image = Vec::new();
        for line in lines.iter().filter(|line| !line.bytes.is_empty()) {
            let offset = ((line.address - base) * word_bytes) as usize;
            let end = offset + line.bytes.len();
            if image.len() < end {
                image.resize(end, 0);
            }
            image[offset..end].copy_from_slice(&line.bytes);
        }
        Ok(image)
    }

    fn statement(&mut self, cursor: &mut Cursor, line: &LineId, code: &str) -> Result<()> {
        let code = match split_label(code) {
            Some((label, rest)) => {
                self.define_label(cursor, line, label)?;
                rest.trim()
            }
            None => code,
        };
        if code.is_empty() {
            return Ok(());
        }
        if let Some((name, text)) = split_constant(code) {
            let value = Expr::parse(line, text)?
                .evaluate(line, &self.scopes.view(cursor.scope, &cursor.active))?;
            return self
                .scopes
                .define(cursor.scope, name, value, line, &cursor.active);
        }
        if code.starts_with('#') {
            return self.preprocessor(cursor, line, code);
        }
        if code.starts_with('.') {
            return self.directive(cursor, line, code);
        }
        let instruction = self.isa.parse_instruction(line, code, &self.zones)?;
        let words = instruction.word_count();
        self.emit(cursor, line, words, Emit::Instruction(instruction))
    }

    fn zone_mut(&mut self, name: &str, line: &LineId) -> Result<&mut MemoryZone> {
        self.zones
            .zone_mut(name)
            .ok_or_else(|| AsmError::UnknownZone {
                line: line.clone(),
                name: name.to_string(),
            })
    }

    fn define_label(&mut self, cursor: &mut Cursor, line: &LineId, label: &str) -> Result<()> {
        let address = self.zone_mut(&cursor.zone, line)?.current_address();
        self.scopes
            .define(cursor.scope, label, address, line, &cursor.active)?;
        if ScopeKind::of(label) != ScopeKind::Local {
            cursor.scope = self.scopes.local_scope(cursor.scope, label);
        }
        Ok(())
    }

    fn emit(&mut self, cursor: &Cursor, line: &LineId, words: usize, emit: Emit) -> Result<()> {
        let address = self.zone_mut(&cursor.zone, line)?.claim(words, line)?;
        tracing::trace!("{line}: {words} word(s) at ${address:X}");
        self.lines.push(Line {
            id: line.clone(),
            address,
            scope: cursor.scope,
            active: cursor.active.clone(),
            emit,
        });
        Ok(())
    }

    fn evaluate(&self, cursor: &Cursor, line: &LineId, text: &str) -> Result<i64> {
        Expr::parse(line, text)?.evaluate(line, &self.scopes.view(cursor.scope, &cursor.active))
    }

    fn directive(&mut self, cursor: &mut Cursor, line: &LineId, code: &str) -> Result<()> {
        let (name, args) = code
            .split_once(char::is_whitespace)
            .unwrap_or((code, ""));
        let args = args.trim();
        match name.to_lowercase().as_str() {
            ".org" => {
                let (expr, zone) = match args.rfind(['"', '\'']) {
                    Some(end) if args.ends_with(['"', '\'']) => {
                        let start = args[..end].rfind(['"', '\'']).ok_or_else(|| {
                            AsmError::syntax(line, format!("unterminated zone name in `{code}`"))
                        })?;
                        (args[..start].trim(), Some(&args[start + 1..end]))
                    }
                    _ => (args, None),
                };
                if expr.is_empty() {
                    return Err(AsmError::syntax(line, ".org needs an address"));
                }
                let value = self.evaluate(cursor, line, expr)?;
                let address = self.zones.org_address(zone, value, line)?;
                let zone = zone.unwrap_or(GLOBAL_ZONE).to_string();
                self.zone_mut(&zone, line)?
                    .set_current_address(address, line)?;
                tracing::debug!("{line}: org ${address:X} in `{zone}`");
                cursor.zone = zone;
                cursor.scope = cursor.file_scope;
                Ok(())
            }
            ".memzone" => {
                if self.zones.zone(args).is_none() {
                    return Err(AsmError::UnknownZone {
                        line: line.clone(),
                        name: args.to_string(),
                    });
                }
                cursor.zone = args.to_string();
                Ok(())
            }
            ".byte" | ".2byte" | ".4byte" | ".8byte" => {
                let bytes: u32 = match name.len() {
                    5 => 1,
                    _ => name[1..2].parse().unwrap_or(1),
                };
                let values = match quoted(args) {
                    Some((text, rest)) if rest.trim().is_empty() => {
                        if bytes == 1 {
                            let chars = text.chars().map(|c| c as i64).collect();
                            return self.string(cursor, line, chars);
                        }
                        text.chars().map(|c| Expr::constant(c as i64)).collect()
                    }
                    Some(_) => {
                        return Err(AsmError::syntax(line, format!("unexpected text after string in `{code}`")))
                    }
                    None => {
                        if args.is_empty() {
                            return Err(AsmError::syntax(line, format!("{name} needs at least one value")));
                        }
                        args.split(',')
                            .map(|text| Expr::parse(line, text))
                            .collect::<Result<Vec<_>>>()?
                    }
                };
                self.data(cursor, line, values, bytes * 8)
            }
            ".cstr" | ".asciiz" => {
                let Some((text, rest)) = quoted(args) else {
                    return Err(AsmError::syntax(line, format!("{name} needs a quoted string")));
                };
                if !rest.trim().is_empty() {
                    return Err(AsmError::syntax(line, format!("unexpected text after string in `{code}`")));
                }
                let mut chars: Vec<i64> = text.chars().map(|c| c as i64).collect();
                chars.push(self.isa.cstr_terminator());
                self.string(cursor, line, chars)
            }
            ".fill" => {
                let Some((count, value)) = args.split_once(',') else {
                    return Err(AsmError::syntax(line, ".fill needs a count and a value"));
                };
                let count = self.evaluate(cursor, line, count)?;
                let value = Expr::parse(line, value)?;
                self.fill(cursor, line, count, value)
            }
            ".zero" => {
                if args.is_empty() {
                    return Err(AsmError::syntax(line, ".zero needs a count"));
                }
                let count = self.evaluate(cursor, line, args)?;
                self.fill(cursor, line, count, Expr::constant(0))
            }
            ".zerountil" => {
                if args.is_empty() {
                    return Err(AsmError::syntax(line, ".zerountil needs an address"));
                }
                let until = self.evaluate(cursor, line, args)?;
                let address = self.zone_mut(&cursor.zone, line)?.current_address();
                if until < address {
                    tracing::debug!("{line}: ${address:X} is already past ${until:X}");
                    return Ok(());
                }
                self.fill(cursor, line, until - address + 1, Expr::constant(0))
            }
            ".align" => {
                let page = if args.is_empty() {
                    self.isa.page_size()
                } else {
                    self.evaluate(cursor, line, args)?
                };
                if page < 1 {
                    return Err(AsmError::OutOfRange {
                        line: line.clone(),
                        value: page,
                        min: 1,
                        max: i64::MAX,
                    });
                }
                let zone = self.zone_mut(&cursor.zone, line)?;
                let address = zone.current_address();
                let gap = match address.rem_euclid(page) {
                    0 => return Ok(()),
                    rem => page - rem,
                };
                zone.claim(gap as usize, line)?;
                tracing::trace!("{line}: aligning from ${address:X} to ${:X}", address + gap);
                Ok(())
            }
            _ => Err(AsmError::syntax(line, format!("unknown directive `{name}`"))),
        }
    }

    fn preprocessor(&mut self, cursor: &mut Cursor, line: &LineId, code: &str) -> Result<()> {
        let (name, args) = code
            .split_once(char::is_whitespace)
            .unwrap_or((code, ""));
        let args = args.trim();
        match name.to_lowercase().as_str() {
            "#create_memzone" => {
                let fields: Vec<&str> = args.split_whitespace().collect();
                let [zone, start, end] = fields[..] else {
                    return Err(AsmError::syntax(line, "#create_memzone needs a name, a start and an end"));
                };
                let start = self.evaluate(cursor, line, start)?;
                let end = self.evaluate(cursor, line, end)?;
                self.zones.create_zone(zone, start, end, line)
            }
            "#create-scope" => {
                let Some((scope, rest)) = quoted(args) else {
                    return Err(AsmError::syntax(line, "#create-scope needs a quoted scope name"));
                };
                let rest = rest.trim();
                let prefix = if rest.is_empty() {
                    "_".to_string()
                } else {
                    let value = rest
                        .strip_prefix("prefix")
                        .map(str::trim_start)
                        .and_then(|rest| rest.strip_prefix('='))
                        .and_then(|rest| quoted(rest.trim_start()))
                        .filter(|(_, rest)| rest.trim().is_empty());
                    match value {
                        Some((prefix, _)) => prefix,
                        None => {
                            return Err(AsmError::syntax(line, format!("invalid #create-scope syntax `{code}`")))
                        }
                    }
                };
                self.scopes.create_named(&scope, &prefix, line)
            }
            "#use-scope" | "#deactivate-scope" => {
                let scope = match quoted(args) {
                    Some((scope, rest)) if rest.trim().is_empty() => scope,
                    _ => return Err(AsmError::syntax(line, format!("{name} needs a quoted scope name"))),
                };
                if !self.scopes.has_named(&scope) {
                    return Err(AsmError::Scope {
                        line: line.clone(),
                        msg: format!("scope `{scope}` is not defined"),
                    });
                }
                if name.eq_ignore_ascii_case("#use-scope") {
                    cursor.active.activate(&scope);
                } else {
                    cursor.active.deactivate(&scope);
                }
                Ok(())
            }
            _ => Err(AsmError::syntax(line, format!("unknown preprocessor directive `{name}`"))),
        }
    }

    /// Character data for `.byte` and `.cstr`. Packed several to a word when the ISA asks for it.
    fn string(&mut self, cursor: &Cursor, line: &LineId, chars: Vec<i64>) -> Result<()> {
        match self.isa.string_byte_packing() {
            Some(fill) => {
                let words = pack_string(&chars, fill, self.isa.layout())?;
                self.emit(cursor, line, words.len(), Emit::Words(words))
            }
            None => {
                let values = chars.into_iter().map(Expr::constant).collect();
                self.data(cursor, line, values, 8)
            }
        }
    }

    fn fill(&mut self, cursor: &Cursor, line: &LineId, count: i64, value: Expr) -> Result<()> {
        let Ok(count) = usize::try_from(count) else {
            return Err(AsmError::OutOfRange {
                line: line.clone(),
                value: count,
                min: 0,
                max: i64::MAX,
            });
        };
        self.emit(cursor, line, count, Emit::Fill { value, count })
    }

    fn data(&mut self, cursor: &Cursor, line: &LineId, values: Vec<Expr>, bits: u32) -> Result<()> {
        let words = values.len() * data_word_count(bits, self.isa.layout().word_bits);
        self.emit(cursor, line, words, Emit::Data { values, bits })
    }

    /// Words for one data element. Values are masked to `bits` first.
    fn data_words(&self, line: &LineId, value: i64, bits: u32) -> Result<Vec<Word>> {
        let layout = self.isa.layout();
        let masked = if bits >= 64 {
            value
        } else {
            (value as u64 & ((1u64 << bits) - 1)) as i64
        };
        if masked != value {
            tracing::warn!("{line}: data value {value} truncated to {masked} for {bits}-bit data");
        }
        let count = data_word_count(bits, layout.word_bits);
        if count == 1 {
            return Ok(vec![Word::new(
                masked,
                layout.word_bits,
                layout.segment_bits,
                layout.intra_word_endian,
            )?]);
        }
        Ok(Value::with_word_count(
            masked,
            count,
            layout.word_bits,
            layout.segment_bits,
            layout.intra_word_endian,
            layout.multi_word_endian,
        )?
        .words_ordered())
    }
}

fn data_word_count(bits: u32, word_bits: u32) -> usize {
    bits.div_ceil(word_bits).max(1) as usize
}

/// Packs characters `word_bits / 8` to a word, padding the last word with `fill`. Big multi-word
/// order puts the first character in the most significant byte.
fn pack_string(chars: &[i64], fill: u8, layout: &WordLayout) -> Result<Vec<Word>> {
    let per_word = (layout.word_bits / 8) as usize;
    chars
        .chunks(per_word)
        .map(|chunk| {
            let mut bytes: Vec<u64> = chunk.iter().map(|&c| (c & 0xFF) as u64).collect();
            bytes.resize(per_word, fill as u64);
            let value = match layout.multi_word_endian {
                Endian::Big => bytes.iter().fold(0, |acc, &b| (acc << 8) | b),
                Endian::Little => bytes.iter().rev().fold(0, |acc, &b| (acc << 8) | b),
            };
            Word::new(
                value as i64,
                layout.word_bits,
                layout.segment_bits,
                layout.intra_word_endian,
            )
        })
        .collect()
}

fn pack(words: &[Word], word_bits: u32) -> Vec<u8> {
    let mut packer = BitPacker::new();
    for word in words {
        packer.push(word.ordered_bits(), word.bits());
    }
    packer.align(word_bits);
    packer.into_bytes()
}

/// Drops a `;` comment, ignoring semicolons inside quotes.
fn strip_comment(text: &str) -> &str {
    let mut quote = None;
    let mut escaped = false;
    for (index, c) in text.char_indices() {
        match quote {
            Some(_) if escaped => escaped = false,
            Some(_) if c == '\\' => escaped = true,
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == ';' => return &text[..index],
            None => {}
        }
    }
    text
}

fn split_label(code: &str) -> Option<(&str, &str)> {
    let (head, rest) = code.split_once(':')?;
    let head = head.trim();
    is_valid_label(head).then_some((head, rest))
}

fn split_constant(code: &str) -> Option<(&str, &str)> {
    let (head, rest) = code.split_once('=')?;
    let head = head.trim();
    is_valid_label(head).then_some((head, rest))
}

/// Reads a leading quoted string, returning its unescaped text and whatever follows it.
fn quoted(text: &str) -> Option<(String, &str)> {
    let mut chars = text.char_indices();
    let (_, quote) = chars.next().filter(|(_, c)| *c == '"' || *c == '\'')?;
    let mut out = String::new();
    let mut escaped = false;
    for (index, c) in chars {
        if escaped {
            out.push(match c {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                '0' => '\0',
                c => c,
            });
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            return Some((out, &text[index + c.len_utf8()..]));
        } else {
            out.push(c);
        }
    }
    None
}
