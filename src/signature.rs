use std::{collections::HashSet, rc::Rc};

use indexmap::IndexMap;

use crate::{
    config::{BytecodePosition, OperandSetConfig, OperandsConfig},
    error::Result,
    memzone::MemoryZoneManager,
    operand::{Operand, ParsedOperand},
    parts::ByteCodePart,
    AsmError, LineId, WordLayout,
};

/// A named, reusable list of operands tried in precedence order.
#[derive(Debug)]
pub struct OperandSet {
    name: String,
    operands: Vec<Operand>,
}

impl OperandSet {
    pub fn from_config(
        name: &str,
        config: &OperandSetConfig,
        registers: &HashSet<String>,
        layout: &WordLayout,
    ) -> Result<Self> {
        let mut operands = Vec::with_capacity(config.operand_values.len());
        for (id, operand_config) in &config.operand_values {
            let operand = Operand::from_config(id, operand_config, registers, layout)?;
            if operand.is_null() {
                return Err(AsmError::config(format!(
                    "operand set `{name}` contains empty operand `{id}`; empty operands are only \
                     allowed in specific operand lists"
                )));
            }
            operands.push(operand);
        }
        operands.sort_by_key(|operand| operand.ty().precedence());
        Ok(Self {
            name: name.to_string(),
            operands,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    /// The first operand, in precedence order, that accepts `text`.
    pub fn parse_operand(
        &self,
        line: &LineId,
        text: &str,
        registers: &HashSet<String>,
        zones: &MemoryZoneManager,
    ) -> Result<Option<ParsedOperand<'_>>> {
        for operand in &self.operands {
            if let Some(parsed) = operand.parse_operand(line, text, registers, zones)? {
                return Ok(Some(parsed));
            }
        }
        Ok(None)
    }
}

#[derive(Debug, Default)]
pub struct OperandSets {
    sets: IndexMap<String, Rc<OperandSet>>,
}

impl OperandSets {
    pub fn from_config(
        configs: &IndexMap<String, OperandSetConfig>,
        registers: &HashSet<String>,
        layout: &WordLayout,
    ) -> Result<Self> {
        let mut sets = IndexMap::new();
        for (name, config) in configs {
            let set = OperandSet::from_config(name, config, registers, layout)?;
            sets.insert(name.clone(), Rc::new(set));
        }
        Ok(Self { sets })
    }

    pub fn get(&self, name: &str) -> Option<&Rc<OperandSet>> {
        self.sets.get(name)
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

#[derive(Debug)]
struct SetSignature {
    sets: Vec<Rc<OperandSet>>,
    disallowed: Vec<Vec<String>>,
    reverse_arguments: bool,
    reverse_bytecode: bool,
}

#[derive(Debug)]
struct SpecificSignature {
    name: String,
    operands: Vec<Operand>,
    reverse_arguments: bool,
    reverse_bytecode: bool,
}

/// Resolves an instruction's operand strings against its configured signatures.
#[derive(Debug)]
pub struct OperandParser {
    count: usize,
    specific: Vec<SpecificSignature>,
    sets: Option<SetSignature>,
}

impl OperandParser {
    pub fn from_config(
        mnemonic: &str,
        config: &OperandsConfig,
        operand_sets: &OperandSets,
        registers: &HashSet<String>,
        layout: &WordLayout,
    ) -> Result<Self> {
        let mut specific = Vec::with_capacity(config.specific_operands.len());
        for (name, signature) in &config.specific_operands {
            let mut operands = Vec::with_capacity(signature.list.len());
            for (id, operand_config) in &signature.list {
                operands.push(Operand::from_config(id, operand_config, registers, layout)?);
            }
            specific.push(SpecificSignature {
                name: name.clone(),
                operands,
                reverse_arguments: signature.reverse_argument_order,
                reverse_bytecode: signature.reverse_bytecode_order,
            });
        }

        let sets = match &config.operand_sets {
            Some(signature) => {
                let mut sets = Vec::with_capacity(signature.list.len());
                for name in &signature.list {
                    let set = operand_sets.get(name).ok_or_else(|| {
                        AsmError::config(format!(
                            "instruction `{mnemonic}` refers to unknown operand set `{name}`"
                        ))
                    })?;
                    sets.push(Rc::clone(set));
                }
                if sets.len() != config.count {
                    return Err(AsmError::config(format!(
                        "instruction `{mnemonic}` lists {} operand sets but declares {} operands",
                        sets.len(),
                        config.count
                    )));
                }
                Some(SetSignature {
                    sets,
                    disallowed: signature.disallowed_pairs.clone(),
                    reverse_arguments: signature.reverse_argument_order,
                    reverse_bytecode: signature.reverse_bytecode_order,
                })
            }
            None => None,
        };

        Ok(Self {
            count: config.count,
            specific,
            sets,
        })
    }

    pub fn operand_count(&self) -> usize {
        self.count
    }

    /// `Ok(None)` means no signature accepts `operands`. Errors come only from operands that
    /// recognise their syntax but reject its content.
    pub fn find_matching_operands(
        &self,
        line: &LineId,
        operands: &[&str],
        registers: &HashSet<String>,
        zones: &MemoryZoneManager,
    ) -> Result<Option<MatchedOperands<'_>>> {
        if self.count == 0 && operands.is_empty() {
            return Ok(Some(MatchedOperands::default()));
        }
        for signature in &self.specific {
            if let Some(matched) = self.match_specific(signature, line, operands, registers, zones)? {
                tracing::trace!("{line}: matched specific operands `{}`", signature.name);
                return Ok(Some(matched));
            }
        }
        if let Some(signature) = &self.sets {
            return self.match_sets(signature, line, operands, registers, zones);
        }
        Ok(None)
    }

    fn match_specific<'a>(
        &self,
        signature: &'a SpecificSignature,
        line: &LineId,
        operands: &[&str],
        registers: &HashSet<String>,
        zones: &MemoryZoneManager,
    ) -> Result<Option<MatchedOperands<'a>>> {
        if signature.operands.len() != self.count {
            return Ok(None);
        }
        let nulls = signature.operands.iter().filter(|op| op.is_null()).count();
        if operands.len() + nulls != self.count {
            return Ok(None);
        }
        let mut texts = operands.iter();
        let mut matched = Vec::with_capacity(signature.operands.len());
        for operand in &signature.operands {
            let text = if operand.is_null() {
                ""
            } else {
                match texts.next() {
                    Some(text) => *text,
                    None => return Ok(None),
                }
            };
            match operand.parse_operand(line, text, registers, zones)? {
                Some(parsed) => matched.push(parsed),
                None => return Ok(None),
            }
        }
        Ok(Some(MatchedOperands {
            operands: matched,
            reverse_arguments: signature.reverse_arguments,
            reverse_bytecode: signature.reverse_bytecode,
        }))
    }

    fn match_sets<'a>(
        &self,
        signature: &'a SetSignature,
        line: &LineId,
        operands: &[&str],
        registers: &HashSet<String>,
        zones: &MemoryZoneManager,
    ) -> Result<Option<MatchedOperands<'a>>> {
        if operands.len() != signature.sets.len() {
            return Ok(None);
        }
        let mut matched = Vec::with_capacity(operands.len());
        for (set, text) in signature.sets.iter().zip(operands) {
            match set.parse_operand(line, text, registers, zones)? {
                Some(parsed) => matched.push(parsed),
                None => return Ok(None),
            }
        }
        let disallowed = signature.disallowed.iter().any(|pair| {
            pair.len() == matched.len() && pair.iter().zip(&matched).all(|(id, op)| id == op.id())
        });
        if disallowed {
            tracing::trace!("{line}: operand combination is disallowed");
            return Ok(None);
        }
        Ok(Some(MatchedOperands {
            operands: matched,
            reverse_arguments: signature.reverse_arguments,
            reverse_bytecode: signature.reverse_bytecode,
        }))
    }
}

#[derive(Debug, Default)]
pub struct MatchedOperands<'a> {
    operands: Vec<ParsedOperand<'a>>,
    reverse_arguments: bool,
    reverse_bytecode: bool,
}

impl<'a> MatchedOperands<'a> {
    pub fn operands(&self) -> &[ParsedOperand<'a>] {
        &self.operands
    }

    /// Lays out the instruction: prefix operand bytecode, the base bytecode, suffix operand
    /// bytecode, the fixed suffix, then every argument.
    pub fn generate_bytecode(
        self,
        base: ByteCodePart,
        suffix: Option<ByteCodePart>,
    ) -> Vec<ByteCodePart> {
        let mut prefix_bytecode = Vec::new();
        let mut suffix_bytecode = Vec::new();
        let mut arguments = Vec::new();
        for ParsedOperand {
            operand,
            bytecode,
            argument,
            ..
        } in self.operands
        {
            if let Some(bytecode) = bytecode {
                match operand.bytecode_position() {
                    BytecodePosition::Prefix => prefix_bytecode.push(bytecode),
                    BytecodePosition::Suffix => suffix_bytecode.push(bytecode),
                }
            }
            arguments.extend(argument);
        }
        if self.reverse_bytecode {
            prefix_bytecode.reverse();
            suffix_bytecode.reverse();
        }
        if self.reverse_arguments {
            arguments.reverse();
        }

        let mut parts = prefix_bytecode;
        parts.push(base);
        parts.append(&mut suffix_bytecode);
        parts.extend(suffix);
        parts.append(&mut arguments);
        parts
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::{config::IsaConfig, parts::EvalContext, parts::PartShape};

    const ISA: &str = r#"
        [general]
        registers = ["a", "b", "hl"]

        [operand_sets.sources.operand_values.imm]
        type = "numeric"
        bytecode = { value = 3, size = 2 }
        argument = { size = 8 }

        [operand_sets.sources.operand_values.hl]
        type = "register"
        register = "hl"
        bytecode = { value = 2, size = 2 }

        [operand_sets.sources.operand_values.ind_hl]
        type = "indirect_register"
        register = "hl"
        bytecode = { value = 1, size = 2, position = "prefix" }

        [operand_sets.targets.operand_values.a]
        type = "register"
        register = "a"
        bytecode = { value = 0, size = 2 }

        [operand_sets.targets.operand_values.ind_hl]
        type = "indirect_register"
        register = "hl"
        bytecode = { value = 1, size = 2 }

        [instructions.ld]
        bytecode = { value = 4, size = 4 }

        [instructions.ld.operands]
        count = 2
        operand_sets = { list = ["targets", "sources"], disallowed_pairs = [["ind_hl", "ind_hl"]] }

        [instructions.ld.operands.specific_operands.swap.list.first]
        type = "register"
        register = "b"
        bytecode = { value = 3, size = 2 }

        [instructions.ld.operands.specific_operands.swap.list.implied]
        type = "empty"
        bytecode = { value = 1, size = 2 }
    "#;

    fn line() -> LineId {
        LineId::new("signatures.asm", 2)
    }

    fn setup() -> (OperandParser, HashSet<String>) {
        let config = IsaConfig::from_toml_str(ISA).unwrap();
        let registers: HashSet<String> = config.general.registers.iter().cloned().collect();
        let layout = WordLayout::default();
        let sets = OperandSets::from_config(&config.operand_sets, &registers, &layout).unwrap();
        let parser = OperandParser::from_config(
            "ld",
            &config.instructions["ld"].operands,
            &sets,
            &registers,
            &layout,
        )
        .unwrap();
        (parser, registers)
    }

    fn ids(matched: &MatchedOperands<'_>) -> Vec<String> {
        matched
            .operands()
            .iter()
            .map(|parsed| parsed.id().to_string())
            .collect()
    }

    #[test]
    fn sets_are_sorted_by_precedence() {
        let config = IsaConfig::from_toml_str(ISA).unwrap();
        let registers: HashSet<String> = config.general.registers.iter().cloned().collect();
        let sets = OperandSets::from_config(&config.operand_sets, &registers, &WordLayout::default())
            .unwrap();
        let order: Vec<_> = sets.get("sources").unwrap().operands().iter().map(Operand::id).collect();
        assert_eq!(order, vec!["ind_hl", "hl", "imm"]);
    }

    #[test]
    fn register_wins_over_numeric() {
        let (parser, registers) = setup();
        let zones = MemoryZoneManager::new(16, 0).unwrap();
        let matched = parser
            .find_matching_operands(&line(), &["a", "hl"], &registers, &zones)
            .unwrap()
            .unwrap();
        assert_eq!(ids(&matched), vec!["a", "hl"]);
        let matched = parser
            .find_matching_operands(&line(), &["a", "hl_label"], &registers, &zones)
            .unwrap()
            .unwrap();
        assert_eq!(ids(&matched), vec!["a", "imm"]);
    }

    #[test]
    fn disallowed_pairs_and_counts() {
        let (parser, registers) = setup();
        let zones = MemoryZoneManager::new(16, 0).unwrap();
        let find = |operands: &[&str]| {
            parser
                .find_matching_operands(&line(), operands, &registers, &zones)
                .unwrap()
                .is_some()
        };
        assert!(find(&["[hl]", "a_label"]));
        assert!(!find(&["[hl]", "[hl]"]));
        assert!(!find(&["a"]));
        assert!(!find(&["a", "hl", "hl"]));
        assert!(!find(&["5", "a"]));
    }

    #[test]
    fn specific_signatures_fill_null_operands() {
        let (parser, registers) = setup();
        let zones = MemoryZoneManager::new(16, 0).unwrap();
        let matched = parser
            .find_matching_operands(&line(), &["b"], &registers, &zones)
            .unwrap()
            .unwrap();
        assert_eq!(ids(&matched), vec!["first", "implied"]);
    }

    #[test]
    fn bytecode_layout() {
        let (parser, registers) = setup();
        let zones = MemoryZoneManager::new(16, 0).unwrap();
        let matched = parser
            .find_matching_operands(&line(), &["a", "[hl]"], &registers, &zones)
            .unwrap()
            .unwrap();
        let layout = WordLayout::default();
        let base = ByteCodePart::numeric(4, PartShape::new(4, &layout), &line());
        let suffix = ByteCodePart::numeric(0xF, PartShape::new(4, &layout), &line());
        let parts = matched.generate_bytecode(base, Some(suffix));

        let symbols: HashMap<String, i64> = HashMap::new();
        let ctx = EvalContext {
            symbols: &symbols,
            address: 0,
            size: 2,
        };
        let values: Vec<(i64, u32)> = parts
            .iter()
            .map(|part| (part.get_value(&ctx).unwrap(), part.bit_size()))
            .collect();
        // [hl] carries prefix bytecode, `a` a suffix one
        assert_eq!(values, vec![(1, 2), (4, 4), (0, 2), (0xF, 4)]);
    }

    #[test]
    fn unknown_operand_set() {
        let config = IsaConfig::from_toml_str(
            r#"
            [instructions.nop]
            bytecode = { value = 0, size = 8 }
            operands = { count = 1, operand_sets = { list = ["missing"] } }
            "#,
        )
        .unwrap();
        let err = OperandParser::from_config(
            "nop",
            &config.instructions["nop"].operands,
            &OperandSets::default(),
            &HashSet::new(),
            &WordLayout::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }
}
