//! Serde model of an ISA description.
//!
//! Numbers may be written as TOML integers or as strings using the assembler's own literal
//! syntax (`"$FF"`, `"%1010"`, `"0x10"`).

use indexmap::IndexMap;
use serde::{de, Deserialize, Deserializer};
use serde_derive::{Deserialize, Serialize};

use crate::{error::Result, expr::parse_literal, Endian};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IsaConfig {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub operand_sets: IndexMap<String, OperandSetConfig>,

    #[serde(default)]
    pub instructions: IndexMap<String, InstructionConfig>,

    #[serde(default)]
    pub predefined: PredefinedConfig,
}

impl IsaConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub address_size: u32,
    pub word_size: u32,
    pub word_segment_size: Option<u32>,
    pub multi_word_endianness: Endian,
    pub intra_word_endianness: Endian,
    #[serde(deserialize_with = "deserialize_number")]
    pub origin: i64,
    pub registers: Vec<String>,
    #[serde(deserialize_with = "deserialize_number")]
    pub cstr_terminator: i64,
    /// Pack string characters several to a word instead of one per word.
    pub string_byte_packing: bool,
    #[serde(deserialize_with = "deserialize_number")]
    pub string_byte_packing_fill: i64,
    /// Default boundary for `.align`, in words.
    #[serde(deserialize_with = "deserialize_number")]
    pub page_size: i64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            address_size: 16,
            word_size: 8,
            word_segment_size: None,
            multi_word_endianness: Endian::Big,
            intra_word_endianness: Endian::Big,
            origin: 0,
            registers: Vec::new(),
            cstr_terminator: 0,
            string_byte_packing: false,
            string_byte_packing_fill: 0,
            page_size: 1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PredefinedConfig {
    pub constants: Vec<ConstantConfig>,
    pub memory_zones: Vec<ZoneConfig>,
    pub data: Vec<DataConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstantConfig {
    pub name: String,
    #[serde(deserialize_with = "deserialize_number")]
    pub value: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub name: String,
    #[serde(deserialize_with = "deserialize_number")]
    pub start: i64,
    #[serde(deserialize_with = "deserialize_number")]
    pub end: i64,
}

fn one() -> usize {
    1
}

/// A block of words placed at a fixed address before any source is assembled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub name: String,
    #[serde(deserialize_with = "deserialize_number")]
    pub address: i64,
    #[serde(deserialize_with = "deserialize_number")]
    pub value: i64,
    /// Words per element.
    #[serde(default = "one")]
    pub size: usize,
    #[serde(default = "one")]
    pub count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperandSetConfig {
    pub operand_values: IndexMap<String, OperandConfig>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BytecodePosition {
    Prefix,
    #[default]
    Suffix,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BytecodeConfig {
    #[serde(default, deserialize_with = "deserialize_opt_number")]
    pub value: Option<i64>,
    pub size: u32,
    #[serde(default)]
    pub position: BytecodePosition,
    #[serde(default, deserialize_with = "deserialize_opt_number")]
    pub min: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_opt_number")]
    pub max: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_number_dict")]
    pub value_dict: Option<IndexMap<String, i64>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArgumentConfig {
    pub size: u32,
    #[serde(default, alias = "byte_align")]
    pub word_align: bool,
    #[serde(default)]
    pub multi_word_endian: Option<Endian>,
    #[serde(default)]
    pub intra_word_endian: Option<Endian>,
    #[serde(default)]
    pub valid_address: bool,
    #[serde(default)]
    pub memory_zone: Option<String>,
    #[serde(default)]
    pub slice_lsb: bool,
    #[serde(default)]
    pub match_address_msb: bool,
    #[serde(default, deserialize_with = "deserialize_opt_number")]
    pub min: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_opt_number")]
    pub max: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_number_dict")]
    pub value_dict: Option<IndexMap<String, i64>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OffsetConfig {
    pub size: u32,
    #[serde(default, alias = "byte_align")]
    pub word_align: bool,
    #[serde(default)]
    pub multi_word_endian: Option<Endian>,
    #[serde(default)]
    pub intra_word_endian: Option<Endian>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecoratorKind {
    Plus,
    PlusPlus,
    Minus,
    MinusMinus,
    Exclamation,
    At,
}

impl DecoratorKind {
    pub fn symbol(self) -> &'static str {
        match self {
            DecoratorKind::Plus => "+",
            DecoratorKind::PlusPlus => "++",
            DecoratorKind::Minus => "-",
            DecoratorKind::MinusMinus => "--",
            DecoratorKind::Exclamation => "!",
            DecoratorKind::At => "@",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoratorConfig {
    #[serde(rename = "type")]
    pub kind: DecoratorKind,
    #[serde(default)]
    pub is_prefix: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperandConfig {
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub register: Option<String>,
    #[serde(default)]
    pub bytecode: Option<BytecodeConfig>,
    #[serde(default)]
    pub argument: Option<ArgumentConfig>,
    #[serde(default)]
    pub offset: Option<OffsetConfig>,
    #[serde(default)]
    pub decorator: Option<DecoratorConfig>,
    #[serde(default)]
    pub index_operands: Option<IndexMap<String, OperandConfig>>,
    #[serde(default)]
    pub use_curly_braces: bool,
    #[serde(default)]
    pub offset_from_instruction_end: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuffixConfig {
    #[serde(deserialize_with = "deserialize_number")]
    pub value: i64,
    pub size: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstructionBytecodeConfig {
    #[serde(deserialize_with = "deserialize_number")]
    pub value: i64,
    pub size: u32,
    #[serde(default)]
    pub suffix: Option<SuffixConfig>,
    #[serde(default)]
    pub multi_word_endian: Option<Endian>,
    #[serde(default)]
    pub intra_word_endian: Option<Endian>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OperandSetsSignatureConfig {
    pub list: Vec<String>,
    pub disallowed_pairs: Vec<Vec<String>>,
    pub reverse_argument_order: bool,
    pub reverse_bytecode_order: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpecificOperandsConfig {
    pub list: IndexMap<String, OperandConfig>,
    #[serde(default)]
    pub reverse_argument_order: bool,
    #[serde(default)]
    pub reverse_bytecode_order: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OperandsConfig {
    pub count: usize,
    pub operand_sets: Option<OperandSetsSignatureConfig>,
    pub specific_operands: IndexMap<String, SpecificOperandsConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariantConfig {
    pub bytecode: InstructionBytecodeConfig,
    #[serde(default)]
    pub operands: OperandsConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstructionConfig {
    pub bytecode: InstructionBytecodeConfig,
    #[serde(default)]
    pub operands: OperandsConfig,
    #[serde(default)]
    pub variants: Vec<VariantConfig>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Number {
    Int(i64),
    Text(String),
}

impl Number {
    fn value<E: de::Error>(self) -> Result<i64, E> {
        match self {
            Number::Int(value) => Ok(value),
            Number::Text(text) => parse_literal(&text)
                .ok_or_else(|| de::Error::custom(format!("{text} is not a valid number"))),
        }
    }
}

fn deserialize_number<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Number::deserialize(deserializer)?.value()
}

fn deserialize_opt_number<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Number>::deserialize(deserializer)?
        .map(Number::value)
        .transpose()
}

fn deserialize_number_dict<'de, D>(
    deserializer: D,
) -> Result<Option<IndexMap<String, i64>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(dict) = Option::<IndexMap<String, Number>>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let mut map = IndexMap::new();
    for (key, value) in dict {
        map.insert(key, value.value()?);
    }
    Ok(Some(map))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = IsaConfig::from_toml_str("").unwrap();
        assert_eq!(config.general.word_size, 8);
        assert_eq!(config.general.address_size, 16);
        assert_eq!(config.general.multi_word_endianness, Endian::Big);
        assert!(config.instructions.is_empty());
    }

    #[test]
    fn numbers_in_any_base() {
        let config = IsaConfig::from_toml_str(
            r#"
            [general]
            origin = "$8000"
            registers = ["a", "b"]
            multi_word_endianness = "little"

            [[predefined.constants]]
            name = "SCREEN"
            value = "%1000_0000"

            [[predefined.memory_zones]]
            name = "rom"
            start = 0x8000
            end = "0xFFFF"
            "#,
        )
        .unwrap();
        assert_eq!(config.general.origin, 0x8000);
        assert_eq!(config.general.multi_word_endianness, Endian::Little);
        assert_eq!(config.predefined.constants[0].value, 0x80);
        assert_eq!(config.predefined.memory_zones[0].end, 0xFFFF);
    }

    #[test]
    fn operand_configuration() {
        let config = IsaConfig::from_toml_str(
            r#"
            [operand_sets.sources.operand_values.hl_inc]
            type = "indirect_register"
            register = "hl"
            bytecode = { value = 2, size = 2, position = "prefix" }
            decorator = { type = "plus_plus" }

            [operand_sets.sources.operand_values.cond]
            type = "enumeration"
            bytecode = { size = 2, value_dict = { nz = 0, z = 1, nc = "%10" } }

            [instructions.ld]
            bytecode = { value = "$40", size = 8 }
            aliases = ["mov"]
            operands = { count = 1, operand_sets = { list = ["sources"] } }
            "#,
        )
        .unwrap();
        let set = &config.operand_sets["sources"];
        let hl = &set.operand_values["hl_inc"];
        assert_eq!(hl.ty, "indirect_register");
        let bytecode = hl.bytecode.as_ref().unwrap();
        assert_eq!(bytecode.position, BytecodePosition::Prefix);
        assert_eq!(hl.decorator.unwrap().kind, DecoratorKind::PlusPlus);

        let dict = set.operand_values["cond"]
            .bytecode
            .as_ref()
            .and_then(|b| b.value_dict.clone())
            .unwrap();
        assert_eq!(dict.keys().collect::<Vec<_>>(), vec!["nz", "z", "nc"]);
        assert_eq!(dict["nc"], 2);

        let ld = &config.instructions["ld"];
        assert_eq!(ld.bytecode.value, 0x40);
        assert_eq!(ld.operands.count, 1);
        assert_eq!(ld.aliases, vec!["mov".to_string()]);
    }

    #[test]
    fn bad_numbers_are_rejected() {
        let err = IsaConfig::from_toml_str("[general]\norigin = \"$XYZ\"\n").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }
}
