//! Operand addressing modes.
//!
//! Each operand is built once from configuration and knows how to recognise its own syntax in
//! an operand string. Recognition is regex based: `match_pattern` yields a non-capturing fragment
//! that composite operands splice into their own patterns, while `parse_operand` runs an anchored
//! pattern with named groups and emits the bytecode and argument parts for a match.

use std::{
    collections::HashSet,
    fmt::{self, Display, Formatter},
    rc::Rc,
};

use indexmap::IndexMap;
use regex::Regex;

use crate::{
    config::{BytecodePosition, DecoratorConfig, OperandConfig},
    error::Result,
    expr::{parse_literal, Expr},
    memzone::{MemoryZoneManager, GLOBAL_ZONE},
    parts::{ByteCodePart, Lookup, PartKind, PartShape},
    AsmError, LineId, WordLayout,
};

/// One lexical piece of an expression.
const EXPRESSION_PARTS: &str = r"(?:(?:%|b)[01]+|\$[0-9a-fA-F]+|0x[0-9a-fA-F]+|[0-9][0-9a-fA-F]*[hH]|\d+|[-+*/&|^()]|>>|<<|%|LSB\(|BYTE\d\(|[._]?\w+|'.'|[<>])";

const NUMERIC_FRAGMENT: &str = r"(?:[$%.\w()+\-*/&|^<>'\s]*[\w)'])";

const OFFSET_FRAGMENT: &str = r"[.\w\s+\-*/&|^()$%']+?";

/// Operand types in matching order. Lower ranks are tried first so that specific forms such as
/// `[hl]` are recognised before a generic expression gets a chance to claim the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandType {
    Empty,
    IndirectRegister,
    IndirectIndexedRegister,
    IndirectNumeric,
    DeferredNumeric,
    IndexedRegister,
    DictionaryKey,
    Register,
    Numeric,
    Address,
    RelativeAddress,
    NumericBytecode,
}

impl OperandType {
    pub fn precedence(self) -> u8 {
        match self {
            OperandType::Empty => 1,
            OperandType::IndirectRegister => 2,
            OperandType::IndirectIndexedRegister => 3,
            OperandType::IndirectNumeric => 4,
            OperandType::DeferredNumeric => 5,
            OperandType::IndexedRegister => 6,
            OperandType::DictionaryKey => 7,
            OperandType::Register => 8,
            OperandType::Numeric => 9,
            OperandType::Address => 10,
            OperandType::RelativeAddress => 11,
            OperandType::NumericBytecode => 12,
        }
    }
}

impl Display for OperandType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperandType::Empty => "empty",
            OperandType::IndirectRegister => "indirect_register",
            OperandType::IndirectIndexedRegister => "indirect_indexed_register",
            OperandType::IndirectNumeric => "indirect_numeric",
            OperandType::DeferredNumeric => "deferred_numeric",
            OperandType::IndexedRegister => "indexed_register",
            OperandType::DictionaryKey => "dictionary_key",
            OperandType::Register => "register",
            OperandType::Numeric => "numeric",
            OperandType::Address => "address",
            OperandType::RelativeAddress => "relative_address",
            OperandType::NumericBytecode => "numeric_bytecode",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone)]
struct RegisterForm {
    register: String,
    decorator: Option<DecoratorConfig>,
}

impl RegisterForm {
    fn decorate(&self, body: String) -> String {
        match self.decorator {
            None => body,
            Some(decorator) if decorator.is_prefix => {
                format!("{}{body}", regex::escape(decorator.kind.symbol()))
            }
            Some(decorator) => format!("{body}{}", regex::escape(decorator.kind.symbol())),
        }
    }
}

#[derive(Debug, Clone)]
struct Bytecode {
    value: Option<i64>,
    shape: PartShape,
    position: BytecodePosition,
}

#[derive(Debug, Clone)]
enum OperandKind {
    Empty,
    Register(RegisterForm),
    IndirectRegister {
        form: RegisterForm,
        offset: Option<PartShape>,
    },
    Indexed {
        form: RegisterForm,
        indirect: bool,
        index: Vec<Operand>,
    },
    Numeric {
        argument: PartShape,
        valid_address: bool,
        min: Option<i64>,
        max: Option<i64>,
    },
    IndirectNumeric {
        argument: PartShape,
        valid_address: bool,
        deferred: bool,
    },
    Address {
        argument: PartShape,
        zone: String,
        slice_lsb: bool,
        match_msb: bool,
    },
    Relative {
        argument: PartShape,
        min: Option<i64>,
        max: Option<i64>,
        curly_braces: bool,
        from_end: bool,
    },
    NumericBytecode {
        min: Option<i64>,
        max: Option<i64>,
    },
    Enumeration {
        bytecode: Option<Rc<IndexMap<String, i64>>>,
        argument: Option<(PartShape, Rc<IndexMap<String, i64>>)>,
    },
    NumericEnumeration {
        bytecode: Option<Rc<IndexMap<i64, i64>>>,
        argument: Option<(PartShape, Rc<IndexMap<i64, i64>>)>,
    },
}

#[derive(Debug, Clone)]
pub struct Operand {
    id: String,
    ty: OperandType,
    kind: OperandKind,
    bytecode: Option<Bytecode>,
    layout: WordLayout,
    parser: Option<Regex>,
}

/// The parts produced by a successful operand match.
#[derive(Debug, Clone)]
pub struct ParsedOperand<'a> {
    pub operand: &'a Operand,
    pub bytecode: Option<ByteCodePart>,
    pub argument: Option<ByteCodePart>,
    pub text: String,
}

impl ParsedOperand<'_> {
    pub fn id(&self) -> &str {
        self.operand.id()
    }
}

type Parts = Option<(Option<ByteCodePart>, Option<ByteCodePart>)>;

fn group(name: &str, inner: &str, capture: bool) -> String {
    if capture {
        format!("(?P<{name}>{inner})")
    } else {
        format!("(?:{inner})")
    }
}

/// Parses `text` as an argument expression, or gives up when it is bracketed, malformed, or
/// refers to a register.
fn expression(line: &LineId, text: &str, registers: &HashSet<String>) -> Option<Expr> {
    if text.contains(['[', ']', '{', '}']) {
        return None;
    }
    let expr = Expr::parse(line, text.trim()).ok()?;
    if expr.contains_any(registers) {
        return None;
    }
    Some(expr)
}

impl Operand {
    pub fn from_config(
        id: &str,
        config: &OperandConfig,
        registers: &HashSet<String>,
        layout: &WordLayout,
    ) -> Result<Self> {
        let fail = |msg: String| AsmError::config(format!("operand `{id}`: {msg}"));

        let bytecode = config.bytecode.as_ref().map(|bytecode| Bytecode {
            value: bytecode.value,
            shape: PartShape::new(bytecode.size, layout),
            position: bytecode.position,
        });
        let argument = config.argument.as_ref().map(|argument| {
            PartShape::new(argument.size, layout)
                .aligned(argument.word_align)
                .endian(argument.multi_word_endian, argument.intra_word_endian)
        });
        let require_argument = || argument.ok_or_else(|| fail("no argument configured".into()));
        let argument_config = config.argument.clone().unwrap_or_default();

        let register_form = || -> Result<RegisterForm> {
            let register = config
                .register
                .clone()
                .ok_or_else(|| fail("no register configured".into()))?;
            if !registers.contains(&register) {
                return Err(fail(format!("`{register}` is not a declared register")));
            }
            Ok(RegisterForm {
                register,
                decorator: config.decorator,
            })
        };

        let check_keys = |dict: &IndexMap<String, i64>, what: &str| -> Result<()> {
            match dict.keys().find(|key| registers.contains(*key)) {
                Some(key) => Err(fail(format!(
                    "register `{key}` is used as a key of the {what} dictionary"
                ))),
                None => Ok(()),
            }
        };
        let numeric_keys = |dict: &IndexMap<String, i64>| -> Result<Rc<IndexMap<i64, i64>>> {
            let mut table = IndexMap::new();
            for (key, value) in dict {
                let key = parse_literal(key)
                    .ok_or_else(|| fail(format!("`{key}` is not a numeric dictionary key")))?;
                table.insert(key, *value);
            }
            Ok(Rc::new(table))
        };
        let bytecode_dict = config.bytecode.as_ref().and_then(|b| b.value_dict.as_ref());
        let argument_dict = argument_config.value_dict.as_ref();

        let (ty, kind) = match config.ty.as_str() {
            "empty" => (OperandType::Empty, OperandKind::Empty),
            "register" => (OperandType::Register, OperandKind::Register(register_form()?)),
            "indirect_register" => (
                OperandType::IndirectRegister,
                OperandKind::IndirectRegister {
                    form: register_form()?,
                    offset: config.offset.as_ref().map(|offset| {
                        PartShape::new(offset.size, layout)
                            .aligned(offset.word_align)
                            .endian(offset.multi_word_endian, offset.intra_word_endian)
                    }),
                },
            ),
            ty @ ("indexed_register" | "indirect_indexed_register") => {
                let form = register_form()?;
                let configs = config
                    .index_operands
                    .as_ref()
                    .filter(|configs| !configs.is_empty())
                    .ok_or_else(|| fail("no index operands configured".into()))?;
                let mut index = Vec::with_capacity(configs.len());
                for (index_id, index_config) in configs {
                    let operand = Operand::from_config(index_id, index_config, registers, layout)?;
                    if operand.is_null() {
                        return Err(fail(format!("index operand `{index_id}` is empty")));
                    }
                    index.push(operand);
                }
                let size = index[0].bytecode_size();
                if index.iter().any(|operand| operand.bytecode_size() != size) {
                    return Err(fail(
                        "index operands are not configured with the same bytecode size".into(),
                    ));
                }
                index.sort_by_key(|operand| operand.ty.precedence());
                let indirect = ty == "indirect_indexed_register";
                let ty = if indirect {
                    OperandType::IndirectIndexedRegister
                } else {
                    OperandType::IndexedRegister
                };
                (
                    ty,
                    OperandKind::Indexed {
                        form,
                        indirect,
                        index,
                    },
                )
            }
            "numeric" => (
                OperandType::Numeric,
                OperandKind::Numeric {
                    argument: require_argument()?,
                    valid_address: argument_config.valid_address,
                    min: argument_config.min,
                    max: argument_config.max,
                },
            ),
            ty @ ("indirect_numeric" | "deferred_numeric") => {
                let deferred = ty == "deferred_numeric";
                let ty = if deferred {
                    OperandType::DeferredNumeric
                } else {
                    OperandType::IndirectNumeric
                };
                (
                    ty,
                    OperandKind::IndirectNumeric {
                        argument: require_argument()?,
                        valid_address: argument_config.valid_address,
                        deferred,
                    },
                )
            }
            "address" => (
                OperandType::Address,
                OperandKind::Address {
                    argument: require_argument()?,
                    zone: argument_config
                        .memory_zone
                        .clone()
                        .unwrap_or_else(|| GLOBAL_ZONE.to_string()),
                    slice_lsb: argument_config.slice_lsb,
                    match_msb: argument_config.slice_lsb && argument_config.match_address_msb,
                },
            ),
            "relative_address" => (
                OperandType::RelativeAddress,
                OperandKind::Relative {
                    argument: require_argument()?,
                    min: argument_config.min,
                    max: argument_config.max,
                    curly_braces: config.use_curly_braces,
                    from_end: config.offset_from_instruction_end,
                },
            ),
            "numeric_bytecode" => {
                let bytecode = config
                    .bytecode
                    .as_ref()
                    .ok_or_else(|| fail("no bytecode configured".into()))?;
                if let (Some(min), Some(max)) = (bytecode.min, bytecode.max) {
                    if max < min {
                        return Err(fail(format!("max {max} is smaller than min {min}")));
                    }
                }
                (
                    OperandType::NumericBytecode,
                    OperandKind::NumericBytecode {
                        min: bytecode.min,
                        max: bytecode.max,
                    },
                )
            }
            "enumeration" => {
                if bytecode_dict.is_none() && argument_dict.is_none() {
                    return Err(fail("no value_dict configured".into()));
                }
                if let Some(dict) = bytecode_dict {
                    check_keys(dict, "bytecode")?;
                }
                if let Some(dict) = argument_dict {
                    check_keys(dict, "argument")?;
                }
                let argument = match (argument, argument_dict) {
                    (Some(shape), Some(dict)) => Some((shape, Rc::new(dict.clone()))),
                    _ => None,
                };
                (
                    OperandType::DictionaryKey,
                    OperandKind::Enumeration {
                        bytecode: bytecode_dict.map(|dict| Rc::new(dict.clone())),
                        argument,
                    },
                )
            }
            "numeric_enumeration" => {
                if bytecode_dict.is_none() && argument_dict.is_none() {
                    return Err(fail("no value_dict configured".into()));
                }
                let argument = match (argument, argument_dict) {
                    (Some(shape), Some(dict)) => Some((shape, numeric_keys(dict)?)),
                    _ => None,
                };
                (
                    OperandType::DictionaryKey,
                    OperandKind::NumericEnumeration {
                        bytecode: bytecode_dict.map(numeric_keys).transpose()?,
                        argument,
                    },
                )
            }
            other => return Err(fail(format!("unknown operand type `{other}`"))),
        };

        let mut operand = Self {
            id: id.to_string(),
            ty,
            kind,
            bytecode,
            layout: *layout,
            parser: None,
        };
        operand.parser = operand.compile_parser()?;
        Ok(operand)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn ty(&self) -> OperandType {
        self.ty
    }

    /// Null operands match without consuming any operand text.
    pub fn is_null(&self) -> bool {
        self.ty == OperandType::Empty
    }

    pub fn bytecode_size(&self) -> Option<u32> {
        self.bytecode.as_ref().map(|bytecode| bytecode.shape.bits)
    }

    pub fn bytecode_position(&self) -> BytecodePosition {
        self.bytecode
            .as_ref()
            .map_or(BytecodePosition::Suffix, |bytecode| bytecode.position)
    }

    pub fn match_pattern(&self) -> String {
        self.pattern(false)
    }

    fn pattern(&self, capture: bool) -> String {
        match &self.kind {
            OperandKind::Empty => String::new(),
            OperandKind::Register(form) => {
                form.decorate(format!(r"\b{}\b", regex::escape(&form.register)))
            }
            OperandKind::IndirectRegister { form, .. } => form.decorate(format!(
                r"\[\s*{}\s*(?:{}\s*{}\s*)?\]",
                regex::escape(&form.register),
                group("sign", "[+-]", capture),
                group("offset", OFFSET_FRAGMENT, capture),
            )),
            OperandKind::Indexed {
                form,
                indirect,
                index,
            } => {
                let alternatives = index
                    .iter()
                    .map(|operand| format!("(?:{})", operand.match_pattern()))
                    .collect::<Vec<_>>()
                    .join("|");
                let body = format!(
                    r"\b{}\s*{}\s*{}",
                    regex::escape(&form.register),
                    group("sign", "[+-]", capture),
                    group("index", &alternatives, capture),
                );
                if *indirect {
                    form.decorate(format!(r"\[\s*{body}\s*\]"))
                } else {
                    form.decorate(body)
                }
            }
            OperandKind::IndirectNumeric { deferred, .. } => {
                let inner = group("expr", NUMERIC_FRAGMENT, capture);
                if *deferred {
                    format!(r"\[\s*\[\s*{inner}\s*\]\s*\]")
                } else {
                    format!(r"\[\s*{inner}\s*\]")
                }
            }
            OperandKind::Relative { curly_braces, .. } => {
                let inner = group("expr", &format!(r"(?:{EXPRESSION_PARTS}|\s)+"), capture);
                if *curly_braces {
                    format!(r"\{{\s*{inner}\s*\}}")
                } else {
                    inner
                }
            }
            OperandKind::Enumeration { bytecode, argument } => {
                let mut keys: Vec<&str> = Vec::new();
                let tables = bytecode
                    .iter()
                    .chain(argument.iter().map(|(_, table)| table));
                for table in tables {
                    for key in table.keys() {
                        if !keys.contains(&key.as_str()) {
                            keys.push(key);
                        }
                    }
                }
                let keys = keys
                    .into_iter()
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join("|");
                format!(r"\b{}\b", group("key", &keys, capture))
            }
            OperandKind::Numeric { .. }
            | OperandKind::Address { .. }
            | OperandKind::NumericBytecode { .. }
            | OperandKind::NumericEnumeration { .. } => NUMERIC_FRAGMENT.to_string(),
        }
    }

    fn compile_parser(&self) -> Result<Option<Regex>> {
        let flags = match &self.kind {
            OperandKind::Register(_)
            | OperandKind::IndirectRegister { .. }
            | OperandKind::Indexed { .. } => "(?i)",
            OperandKind::IndirectNumeric { .. }
            | OperandKind::Relative { .. }
            | OperandKind::Enumeration { .. } => "",
            _ => return Ok(None),
        };
        let pattern = format!("{flags}^(?:{})$", self.pattern(true));
        Regex::new(&pattern).map(Some).map_err(|e| {
            AsmError::config(format!("operand `{}` has a bad match pattern: {e}", self.id))
        })
    }

    fn captures<'t>(&self, text: &'t str) -> Option<regex::Captures<'t>> {
        self.parser.as_ref()?.captures(text)
    }

    fn fixed_bytecode(&self, line: &LineId) -> Option<ByteCodePart> {
        let bytecode = self.bytecode.as_ref()?;
        let value = bytecode.value?;
        Some(ByteCodePart::numeric(value, bytecode.shape, line))
    }

    fn bytecode_shape(&self) -> PartShape {
        self.bytecode
            .as_ref()
            .map_or_else(|| PartShape::new(0, &self.layout), |bytecode| bytecode.shape)
    }

    /// Tries to recognise `text`. `Ok(None)` means the text is not this kind of operand; an error
    /// means it is, but is malformed in a way no other operand could repair.
    pub fn parse_operand(
        &self,
        line: &LineId,
        text: &str,
        registers: &HashSet<String>,
        zones: &MemoryZoneManager,
    ) -> Result<Option<ParsedOperand<'_>>> {
        let text = text.trim();
        let parts = self.parse_parts(line, text, registers, zones)?;
        tracing::trace!(
            "{line}: operand `{}` ({}) {} `{text}`",
            self.id,
            self.ty,
            if parts.is_some() { "matched" } else { "rejected" }
        );
        Ok(parts.map(|(bytecode, argument)| ParsedOperand {
            operand: self,
            bytecode,
            argument,
            text: text.to_string(),
        }))
    }

    fn parse_parts(
        &self,
        line: &LineId,
        text: &str,
        registers: &HashSet<String>,
        zones: &MemoryZoneManager,
    ) -> Result<Parts> {
        let global = || zones.global_zone().bounds().clone();
        let parts = match &self.kind {
            OperandKind::Empty => Some((self.fixed_bytecode(line), None)),
            OperandKind::Register(_) => self
                .captures(text)
                .map(|_| (self.fixed_bytecode(line), None)),
            OperandKind::IndirectRegister { offset, .. } => {
                let Some(caps) = self.captures(text) else {
                    return Ok(None);
                };
                let supplied = caps.name("offset").map(|m| m.as_str().trim());
                let argument = match (offset, supplied) {
                    (None, None) => None,
                    (None, Some(_)) => {
                        return Err(AsmError::UnexpectedOffset {
                            line: line.clone(),
                            text: text.to_string(),
                        })
                    }
                    (Some(shape), None) => Some(ByteCodePart::numeric(0, *shape, line)),
                    (Some(shape), Some(offset)) => {
                        let Some(expr) = expression(line, offset, registers) else {
                            return Ok(None);
                        };
                        let expr = match caps.name("sign").map(|m| m.as_str()) {
                            Some("-") => expr.negated(),
                            _ => expr,
                        };
                        Some(ByteCodePart::new(PartKind::Expression(expr), *shape, line))
                    }
                };
                Some((self.fixed_bytecode(line), argument))
            }
            OperandKind::Indexed { index, .. } => {
                let Some(caps) = self.captures(text) else {
                    return Ok(None);
                };
                // only additive indexing is supported
                if &caps["sign"] != "+" {
                    return Ok(None);
                }
                let base = self
                    .fixed_bytecode(line)
                    .unwrap_or_else(|| ByteCodePart::numeric(0, self.bytecode_shape(), line));
                let mut parts = None;
                for operand in index {
                    let Some(parsed) = operand.parse_operand(line, &caps["index"], registers, zones)?
                    else {
                        continue;
                    };
                    let bytecode = match parsed.bytecode {
                        Some(index_bytecode) => {
                            let shape = base.shape;
                            ByteCodePart::composite(vec![base, index_bytecode], shape, line)
                        }
                        None => base,
                    };
                    parts = Some((Some(bytecode), parsed.argument));
                    break;
                }
                parts
            }
            OperandKind::Numeric {
                argument,
                valid_address,
                min,
                max,
            } => expression(line, text, registers).map(|expr| {
                let kind = if *valid_address {
                    PartKind::InZone {
                        expr,
                        zone: global(),
                    }
                } else if min.is_some() || max.is_some() {
                    PartKind::Range {
                        expr,
                        min: *min,
                        max: *max,
                    }
                } else {
                    PartKind::Expression(expr)
                };
                (
                    self.fixed_bytecode(line),
                    Some(ByteCodePart::new(kind, *argument, line)),
                )
            }),
            OperandKind::IndirectNumeric {
                argument,
                valid_address,
                ..
            } => self
                .captures(text)
                .and_then(|caps| expression(line, &caps["expr"], registers))
                .map(|expr| {
                    let kind = if *valid_address {
                        PartKind::InZone {
                            expr,
                            zone: global(),
                        }
                    } else {
                        PartKind::Expression(expr)
                    };
                    (
                        self.fixed_bytecode(line),
                        Some(ByteCodePart::new(kind, *argument, line)),
                    )
                }),
            OperandKind::Address {
                argument,
                zone,
                slice_lsb,
                match_msb,
            } => {
                let Some(expr) = expression(line, text, registers) else {
                    return Ok(None);
                };
                let kind = PartKind::Address {
                    expr,
                    zone: zones.bounds(Some(zone.as_str()), line)?,
                    slice_lsb: *slice_lsb,
                    match_msb: *match_msb,
                };
                Some((
                    self.fixed_bytecode(line),
                    Some(ByteCodePart::new(kind, *argument, line)),
                ))
            }
            OperandKind::Relative {
                argument,
                min,
                max,
                from_end,
                ..
            } => self
                .captures(text)
                .and_then(|caps| expression(line, &caps["expr"], registers))
                .map(|expr| {
                    let kind = PartKind::Relative {
                        expr,
                        zone: global(),
                        min: *min,
                        max: *max,
                        from_end: *from_end,
                    };
                    (
                        self.fixed_bytecode(line),
                        Some(ByteCodePart::new(kind, *argument, line)),
                    )
                }),
            OperandKind::NumericBytecode { min, max } => {
                expression(line, text, registers).map(|expr| {
                    let kind = PartKind::Range {
                        expr,
                        min: *min,
                        max: *max,
                    };
                    (Some(ByteCodePart::new(kind, self.bytecode_shape(), line)), None)
                })
            }
            OperandKind::Enumeration { bytecode, argument } => {
                let Some(caps) = self.captures(text) else {
                    return Ok(None);
                };
                let key = &caps["key"];
                let lookup = |table: &Rc<IndexMap<String, i64>>, shape: PartShape| {
                    table.contains_key(key).then(|| {
                        let lookup = Lookup::Key {
                            key: key.to_string(),
                            table: Rc::clone(table),
                        };
                        ByteCodePart::new(PartKind::Enumeration(lookup), shape, line)
                    })
                };
                let bytecode = bytecode
                    .as_ref()
                    .and_then(|table| lookup(table, self.bytecode_shape()));
                let argument = argument
                    .as_ref()
                    .and_then(|(shape, table)| lookup(table, *shape));
                (bytecode.is_some() || argument.is_some()).then_some((bytecode, argument))
            }
            OperandKind::NumericEnumeration { bytecode, argument } => {
                let Some(expr) = expression(line, text, registers) else {
                    return Ok(None);
                };
                let lookup = |table: &Rc<IndexMap<i64, i64>>, shape: PartShape| {
                    let lookup = Lookup::Numeric {
                        expr: expr.clone(),
                        table: Rc::clone(table),
                    };
                    ByteCodePart::new(PartKind::Enumeration(lookup), shape, line)
                };
                Some((
                    bytecode
                        .as_ref()
                        .map(|table| lookup(table, self.bytecode_shape())),
                    argument.as_ref().map(|(shape, table)| lookup(table, *shape)),
                ))
            }
        };
        Ok(parts)
    }
}

impl Display for Operand {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}<{}>", self.ty, self.id)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::parts::EvalContext;

    fn line() -> LineId {
        LineId::new("operands.asm", 7)
    }

    fn registers() -> HashSet<String> {
        ["a", "hl", "sp", "x"]
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    fn zones() -> MemoryZoneManager {
        MemoryZoneManager::new(16, 0).unwrap()
    }

    fn operand(config: &str) -> Result<Operand> {
        let config: OperandConfig = toml::from_str(config).unwrap();
        Operand::from_config("op", &config, &registers(), &WordLayout::default())
    }

    fn value(part: &ByteCodePart) -> i64 {
        let symbols: HashMap<String, i64> = [("label".to_string(), 0x42)].into_iter().collect();
        let ctx = EvalContext {
            symbols: &symbols,
            address: 0,
            size: 1,
        };
        part.get_value(&ctx).unwrap()
    }

    fn parse<'a>(operand: &'a Operand, text: &str) -> Option<ParsedOperand<'a>> {
        operand
            .parse_operand(&line(), text, &registers(), &zones())
            .unwrap()
    }

    #[test]
    fn precedence_order() {
        assert!(OperandType::IndirectRegister.precedence() < OperandType::Register.precedence());
        assert!(OperandType::Register.precedence() < OperandType::Numeric.precedence());
        assert_eq!(OperandType::NumericBytecode.precedence(), 12);
    }

    #[test]
    fn registers_match_whole_names() {
        let op = operand(
            r#"
            type = "register"
            register = "hl"
            bytecode = { value = 2, size = 2 }
            "#,
        )
        .unwrap();
        let parsed = parse(&op, " HL ").unwrap();
        assert_eq!(value(parsed.bytecode.as_ref().unwrap()), 2);
        assert!(parsed.argument.is_none());
        assert!(parse(&op, "hlx").is_none());
        assert!(parse(&op, "hl+1").is_none());
    }

    #[test]
    fn register_decorators() {
        let op = operand(
            r#"
            type = "register"
            register = "hl"
            decorator = { type = "plus_plus" }
            "#,
        )
        .unwrap();
        assert!(parse(&op, "hl++").is_some());
        assert!(parse(&op, "hl").is_none());
        assert!(parse(&op, "++hl").is_none());

        let op = operand(
            r#"
            type = "register"
            register = "sp"
            decorator = { type = "minus_minus", is_prefix = true }
            "#,
        )
        .unwrap();
        assert!(parse(&op, "--sp").is_some());
        assert!(parse(&op, "sp--").is_none());
    }

    #[test]
    fn indirect_register_offsets() {
        let plain = operand(
            r#"
            type = "indirect_register"
            register = "hl"
            bytecode = { value = 1, size = 4 }
            "#,
        )
        .unwrap();
        assert!(parse(&plain, "[hl]").unwrap().argument.is_none());
        assert!(matches!(
            plain.parse_operand(&line(), "[hl+3]", &registers(), &zones()),
            Err(AsmError::UnexpectedOffset { .. })
        ));

        let offset = operand(
            r#"
            type = "indirect_register"
            register = "hl"
            bytecode = { value = 1, size = 4 }
            offset = { size = 8 }
            "#,
        )
        .unwrap();
        let parsed = parse(&offset, "[ hl ]").unwrap();
        let argument = parsed.argument.unwrap();
        assert_eq!((value(&argument), argument.bit_size()), (0, 8));
        let parsed = parse(&offset, "[hl - 3]").unwrap();
        assert_eq!(value(parsed.argument.as_ref().unwrap()), -3);
        let parsed = parse(&offset, "[hl+label]").unwrap();
        assert_eq!(value(parsed.argument.as_ref().unwrap()), 0x42);
        assert!(parse(&offset, "[hl+a]").is_none());
    }

    #[test]
    fn indexed_registers_fuse_bytecode() {
        let op = operand(
            r#"
            type = "indirect_indexed_register"
            register = "hl"
            bytecode = { value = 3, size = 2 }

            [index_operands.imm]
            type = "numeric"
            bytecode = { value = 0, size = 2 }
            argument = { size = 8 }

            [index_operands.reg_a]
            type = "register"
            register = "a"
            bytecode = { value = 1, size = 2 }
            "#,
        )
        .unwrap();
        assert_eq!(op.ty(), OperandType::IndirectIndexedRegister);

        let parsed = parse(&op, "[hl + a]").unwrap();
        let bytecode = parsed.bytecode.unwrap();
        assert_eq!((value(&bytecode), bytecode.bit_size()), (0b1101, 4));
        assert!(parsed.argument.is_none());

        let parsed = parse(&op, "[hl+label]").unwrap();
        assert_eq!(value(parsed.bytecode.as_ref().unwrap()), 0b1100);
        assert_eq!(value(parsed.argument.as_ref().unwrap()), 0x42);

        assert!(parse(&op, "[hl-a]").is_none());
        assert!(parse(&op, "hl+a").is_none());
    }

    #[test]
    fn index_operands_must_agree() {
        let err = operand(
            r#"
            type = "indexed_register"
            register = "hl"

            [index_operands.imm]
            type = "numeric"
            bytecode = { value = 0, size = 2 }
            argument = { size = 8 }

            [index_operands.reg_a]
            type = "register"
            register = "a"
            bytecode = { value = 1, size = 3 }
            "#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn numeric_operands() {
        let op = operand(
            r#"
            type = "numeric"
            argument = { size = 16, multi_word_endian = "little" }
            "#,
        )
        .unwrap();
        let parsed = parse(&op, "label + 1").unwrap();
        assert_eq!(value(parsed.argument.as_ref().unwrap()), 0x43);
        assert!(parse(&op, "[label]").is_none());
        assert!(parse(&op, "{label}").is_none());
        assert!(parse(&op, "hl").is_none());
        assert!(parse(&op, "1 +").is_none());
    }

    #[test]
    fn indirect_and_deferred_numeric() {
        let indirect = operand("type = \"indirect_numeric\"\nargument = { size = 8 }").unwrap();
        let deferred = operand("type = \"deferred_numeric\"\nargument = { size = 8 }").unwrap();
        assert_eq!(value(parse(&indirect, "[ label ]").unwrap().argument.as_ref().unwrap()), 0x42);
        assert!(parse(&indirect, "[[label]]").is_none());
        assert!(parse(&indirect, "[hl]").is_none());
        assert_eq!(value(parse(&deferred, "[[label]]").unwrap().argument.as_ref().unwrap()), 0x42);
        assert!(parse(&deferred, "[label]").is_none());
    }

    #[test]
    fn relative_with_braces() {
        let op = operand(
            r#"
            type = "relative_address"
            use_curly_braces = true
            argument = { size = 8, min = -128, max = 127 }
            "#,
        )
        .unwrap();
        assert!(parse(&op, "{ label }").is_some());
        assert!(parse(&op, "label").is_none());
        assert!(parse(&op, "{[label]}").is_none());
    }

    #[test]
    fn enumerations() {
        let op = operand(
            r#"
            type = "enumeration"
            bytecode = { size = 2, value_dict = { nz = 0, z = 1, nc = 2 } }
            argument = { size = 8, value_dict = { c = 9 } }
            "#,
        )
        .unwrap();
        let parsed = parse(&op, "nc").unwrap();
        assert_eq!(value(parsed.bytecode.as_ref().unwrap()), 2);
        assert!(parsed.argument.is_none());
        let parsed = parse(&op, "c").unwrap();
        assert!(parsed.bytecode.is_none());
        assert_eq!(value(parsed.argument.as_ref().unwrap()), 9);
        assert!(parse(&op, "nzz").is_none());

        let err = operand(
            r#"
            type = "enumeration"
            bytecode = { size = 2, value_dict = { a = 0 } }
            "#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn numeric_enumerations() {
        let op = operand(
            r#"
            type = "numeric_enumeration"
            bytecode = { size = 2, value_dict = { "1" = 0, "2" = 1, "$4" = 2 } }
            "#,
        )
        .unwrap();
        let parsed = parse(&op, "2 * 2").unwrap();
        assert_eq!(value(parsed.bytecode.as_ref().unwrap()), 2);
    }

    #[test]
    fn numeric_bytecode_ranges() {
        let op = operand(
            r#"
            type = "numeric_bytecode"
            bytecode = { size = 3, min = 0, max = 7 }
            "#,
        )
        .unwrap();
        let parsed = parse(&op, "7").unwrap();
        assert_eq!(value(parsed.bytecode.as_ref().unwrap()), 7);
        assert!(parse(&op, "[7]").is_none());
        assert!(operand("type = \"numeric_bytecode\"\nbytecode = { size = 3, min = 7, max = 0 }").is_err());
    }

    #[test]
    fn configuration_errors() {
        assert!(operand("type = \"bogus\"").is_err());
        assert!(operand("type = \"register\"\nregister = \"q\"").is_err());
        assert!(operand("type = \"numeric\"").is_err());
        assert!(operand("type = \"register\"").is_err());
    }

    #[test]
    fn empty_operands_take_no_text() {
        let op = operand("type = \"empty\"\nbytecode = { value = 5, size = 3 }").unwrap();
        assert!(op.is_null());
        let parsed = parse(&op, "").unwrap();
        assert_eq!(value(parsed.bytecode.as_ref().unwrap()), 5);
    }
}
