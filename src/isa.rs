//! The instruction set: registers, operand sets and instructions loaded from configuration.

use std::{collections::HashSet, rc::Rc};

use indexmap::IndexMap;

use crate::{
    config::{GeneralConfig, InstructionBytecodeConfig, IsaConfig, OperandsConfig, PredefinedConfig},
    error::Result,
    expr::Symbols,
    memzone::MemoryZoneManager,
    parts::{ByteCodePart, EvalContext, PartShape},
    scope::{is_keyword, KEYWORDS},
    signature::{OperandParser, OperandSets},
    word::BitPacker,
    AsmError, LineId, WordLayout,
};

#[derive(Debug)]
struct Variant {
    base: i64,
    base_shape: PartShape,
    suffix: Option<(i64, PartShape)>,
    operands: OperandParser,
}

impl Variant {
    fn from_config(
        mnemonic: &str,
        bytecode: &InstructionBytecodeConfig,
        operands: &OperandsConfig,
        isa: &Isa,
    ) -> Result<Self> {
        let shape = PartShape::new(bytecode.size, &isa.layout)
            .endian(bytecode.multi_word_endian, bytecode.intra_word_endian);
        Ok(Self {
            base: bytecode.value,
            base_shape: shape,
            suffix: bytecode
                .suffix
                .as_ref()
                .map(|suffix| (suffix.value, PartShape { bits: suffix.size, ..shape })),
            operands: OperandParser::from_config(
                mnemonic,
                operands,
                &isa.operand_sets,
                &isa.registers,
                &isa.layout,
            )?,
        })
    }
}

#[derive(Debug)]
struct Instruction {
    mnemonic: String,
    variants: Vec<Variant>,
}

#[derive(Debug)]
pub struct Isa {
    general: GeneralConfig,
    layout: WordLayout,
    registers: HashSet<String>,
    operand_sets: OperandSets,
    instructions: IndexMap<String, Rc<Instruction>>,
    predefined: PredefinedConfig,
}

impl Isa {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Self::from_config(&IsaConfig::from_toml_str(text)?)
    }

    pub fn from_config(config: &IsaConfig) -> Result<Self> {
        let general = &config.general;
        if !(1..=64).contains(&general.word_size) {
            return Err(AsmError::config(format!(
                "word size of {} bits is not supported",
                general.word_size
            )));
        }
        if !(1..=63).contains(&general.address_size) {
            return Err(AsmError::config(format!(
                "address size of {} bits is not supported",
                general.address_size
            )));
        }
        let segment_bits = general.word_segment_size.unwrap_or(general.word_size);
        if segment_bits == 0 || general.word_size % segment_bits != 0 {
            return Err(AsmError::config(format!(
                "word segment size {segment_bits} does not divide the word size {}",
                general.word_size
            )));
        }
        if general.string_byte_packing && (general.word_size < 16 || general.word_size % 8 != 0) {
            return Err(AsmError::config(format!(
                "string byte packing needs a word size that is a multiple of 8 and at least 16, not {}",
                general.word_size
            )));
        }
        if !(0..=0xFF).contains(&general.string_byte_packing_fill) {
            return Err(AsmError::config(format!(
                "string byte packing fill {} is not a byte",
                general.string_byte_packing_fill
            )));
        }
        if general.page_size < 1 {
            return Err(AsmError::config(format!(
                "page size {} must be at least 1",
                general.page_size
            )));
        }
        let layout = WordLayout {
            word_bits: general.word_size,
            segment_bits,
            multi_word_endian: general.multi_word_endianness,
            intra_word_endian: general.intra_word_endianness,
        };

        let mut registers = HashSet::new();
        for register in &general.registers {
            if is_keyword(register) {
                return Err(AsmError::config(format!(
                    "register `{register}` is an assembler keyword"
                )));
            }
            registers.insert(register.clone());
        }

        let operand_sets = OperandSets::from_config(&config.operand_sets, &registers, &layout)?;
        let mut isa = Self {
            general: general.clone(),
            layout,
            registers,
            operand_sets,
            instructions: IndexMap::new(),
            predefined: config.predefined.clone(),
        };

        for (mnemonic, instruction) in &config.instructions {
            let mnemonic = mnemonic.to_lowercase();
            let mut variants = vec![Variant::from_config(
                &mnemonic,
                &instruction.bytecode,
                &instruction.operands,
                &isa,
            )?];
            for variant in &instruction.variants {
                variants.push(Variant::from_config(
                    &mnemonic,
                    &variant.bytecode,
                    &variant.operands,
                    &isa,
                )?);
            }
            let instruction_rc = Rc::new(Instruction {
                mnemonic: mnemonic.clone(),
                variants,
            });
            let names = std::iter::once(mnemonic.clone())
                .chain(instruction.aliases.iter().map(|alias| alias.to_lowercase()));
            for name in names {
                if KEYWORDS.iter().any(|keyword| keyword.eq_ignore_ascii_case(&name)) {
                    return Err(AsmError::config(format!(
                        "instruction `{name}` is an assembler keyword"
                    )));
                }
                if isa.instructions.contains_key(&name) {
                    return Err(AsmError::config(format!(
                        "duplicate mnemonic or alias `{name}`"
                    )));
                }
                isa.instructions.insert(name, Rc::clone(&instruction_rc));
            }
        }

        tracing::debug!(
            "loaded ISA: {} instructions, {} operand sets, {} registers, {}-bit words",
            config.instructions.len(),
            isa.operand_sets.len(),
            isa.registers.len(),
            isa.layout.word_bits
        );
        Ok(isa)
    }

    pub fn layout(&self) -> &WordLayout {
        &self.layout
    }

    pub fn registers(&self) -> &HashSet<String> {
        &self.registers
    }

    pub fn address_bits(&self) -> u32 {
        self.general.address_size
    }

    pub fn origin(&self) -> i64 {
        self.general.origin
    }

    pub fn cstr_terminator(&self) -> i64 {
        self.general.cstr_terminator
    }

    /// Fill byte for packed strings, or `None` when strings take one word per character.
    pub fn string_byte_packing(&self) -> Option<u8> {
        self.general
            .string_byte_packing
            .then_some(self.general.string_byte_packing_fill as u8)
    }

    pub fn page_size(&self) -> i64 {
        self.general.page_size
    }

    pub fn predefined(&self) -> &PredefinedConfig {
        &self.predefined
    }

    pub fn is_mnemonic(&self, name: &str) -> bool {
        self.instructions.contains_key(&name.to_lowercase())
    }

    /// Every mnemonic and alias, lowercased.
    pub fn mnemonics(&self) -> impl Iterator<Item = &str> {
        self.instructions.keys().map(String::as_str)
    }

    /// A zone manager holding the global zone and every predefined zone.
    pub fn zone_manager(&self) -> Result<MemoryZoneManager> {
        let mut zones = MemoryZoneManager::new(self.general.address_size, self.general.origin)?;
        for zone in &self.predefined.memory_zones {
            zones.create_zone(&zone.name, zone.start, zone.end, &LineId::config())?;
        }
        Ok(zones)
    }

    /// Matches an instruction line such as `ld a, [hl+2]` and returns its bytecode parts.
    pub fn parse_instruction(
        &self,
        line: &LineId,
        text: &str,
        zones: &MemoryZoneManager,
    ) -> Result<AssembledInstruction> {
        let text = text.trim();
        let (mnemonic, rest) = text
            .split_once(char::is_whitespace)
            .unwrap_or((text, ""));
        let mnemonic = mnemonic.to_lowercase();
        let rest = rest.trim();
        let instruction =
            self.instructions
                .get(&mnemonic)
                .ok_or_else(|| AsmError::UnknownMnemonic {
                    line: line.clone(),
                    mnemonic: mnemonic.clone(),
                })?;
        let operands: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split(',').map(str::trim).collect()
        };

        for variant in &instruction.variants {
            let Some(matched) =
                variant
                    .operands
                    .find_matching_operands(line, &operands, &self.registers, zones)?
            else {
                continue;
            };
            let base = ByteCodePart::numeric(variant.base, variant.base_shape, line);
            let suffix = variant
                .suffix
                .map(|(value, shape)| ByteCodePart::numeric(value, shape, line));
            let parts = matched.generate_bytecode(base, suffix);
            tracing::trace!("{line}: `{}` assembled into {} parts", instruction.mnemonic, parts.len());
            return Ok(AssembledInstruction::new(line.clone(), parts, self.layout));
        }
        Err(AsmError::NoMatchingOperands {
            line: line.clone(),
            mnemonic,
            operands: rest.to_string(),
        })
    }
}

/// An instruction's parts in emission order.
#[derive(Debug, Clone)]
pub struct AssembledInstruction {
    line: LineId,
    parts: Vec<ByteCodePart>,
    layout: WordLayout,
}

impl AssembledInstruction {
    pub fn new(line: LineId, parts: Vec<ByteCodePart>, layout: WordLayout) -> Self {
        Self {
            line,
            parts,
            layout,
        }
    }

    pub fn line(&self) -> &LineId {
        &self.line
    }

    pub fn parts(&self) -> &[ByteCodePart] {
        &self.parts
    }

    /// Bits used, counting the padding in front of word-aligned parts.
    pub fn bit_size(&self) -> usize {
        let word_bits = self.layout.word_bits as usize;
        let mut bits: usize = 0;
        for part in &self.parts {
            if part.word_align() {
                bits = bits.div_ceil(word_bits) * word_bits;
            }
            bits += part.bit_size() as usize;
        }
        bits
    }

    /// Size in words. This is how far the instruction advances the address.
    pub fn word_count(&self) -> usize {
        self.bit_size().div_ceil(self.layout.word_bits as usize)
    }

    /// Resolves every part for an instruction placed at `address` and packs the result.
    pub fn to_bytes(&self, symbols: &dyn Symbols, address: i64) -> Result<Vec<u8>> {
        let ctx = EvalContext {
            symbols,
            address,
            size: self.word_count(),
        };
        let mut packer = BitPacker::new();
        for part in &self.parts {
            if part.word_align() {
                packer.align(self.layout.word_bits);
            }
            for word in part.to_words(&ctx, &self.layout)? {
                packer.push(word.ordered_bits(), word.bits());
            }
        }
        packer.align(self.layout.word_bits);
        Ok(packer.into_bytes())
    }
}
