extern crate confasm;
extern crate parameterized;

#[cfg(test)]
mod scenarios {
    use std::collections::HashMap;

    use confasm::{AsmError, Isa, LineId, Program};
    use parameterized::parameterized;

    const ISA: &str = r#"
        [general]
        address_size = 16
        word_size = 8
        registers = ["a", "hl"]

        [operand_sets.register_or_imm.operand_values.a]
        type = "register"
        register = "a"
        bytecode = { value = 1, size = 4 }

        [operand_sets.register_or_imm.operand_values.imm]
        type = "numeric"
        bytecode = { value = 8, size = 4 }
        argument = { size = 8 }

        [operand_sets.hl_forms.operand_values.direct]
        type = "register"
        register = "hl"
        bytecode = { value = 2, size = 4 }

        [operand_sets.hl_forms.operand_values.indirect]
        type = "indirect_register"
        register = "hl"
        bytecode = { value = 1, size = 4 }

        [operand_sets.hl_forms.operand_values.imm]
        type = "numeric"
        bytecode = { value = 3, size = 4 }
        argument = { size = 8 }

        [operand_sets.near.operand_values.rel]
        type = "relative_address"
        argument = { size = 8, word_align = true, min = -128, max = 127 }

        [operand_sets.vector.operand_values.n]
        type = "numeric"
        argument = { size = 3, min = 0, max = 7 }

        [instructions.add]
        bytecode = { value = 0, size = 4 }
        operands = { count = 1, operand_sets = { list = ["register_or_imm"] } }

        [instructions.ld]
        bytecode = { value = 4, size = 4 }
        operands = { count = 1, operand_sets = { list = ["hl_forms"] } }

        [instructions.jr]
        bytecode = { value = 0x18, size = 8 }
        operands = { count = 1, operand_sets = { list = ["near"] } }

        [instructions.rst]
        bytecode = { value = 0x19, size = 5 }
        operands = { count = 1, operand_sets = { list = ["vector"] } }
    "#;

    fn isa() -> Isa {
        Isa::from_toml_str(ISA).unwrap()
    }

    fn assemble_at(text: &str, address: i64) -> Result<Vec<u8>, AsmError> {
        let isa = isa();
        let line = LineId::new("scenario.asm", 1);
        let zones = isa.zone_manager()?;
        let instruction = isa.parse_instruction(&line, text, &zones)?;
        let symbols: HashMap<String, i64> = [("target".to_string(), 0x08)].into_iter().collect();
        instruction.to_bytes(&symbols, address)
    }

    #[parameterized(input = {
        "ADD a", "ADD 5", "ld hl", "ld [hl]", "ld [ hl ]", "ld 9", "rst 7", "rst 0"
    }, expected = {
        vec![0x01], vec![0x08, 0x05], vec![0x42], vec![0x41], vec![0x41], vec![0x43, 0x09],
        vec![0xCF], vec![0xC8]
    })]
    fn encodes(input: &str, expected: Vec<u8>) {
        assert_eq!(assemble_at(input, 0).unwrap(), expected, "{input}");
    }

    #[test]
    fn relative_offsets() {
        assert_eq!(assemble_at("jr target", 0x10).unwrap(), vec![0x18, 0xF8]);
        assert_eq!(assemble_at("jr target", 0x08).unwrap(), vec![0x18, 0x00]);
        assert!(matches!(
            assemble_at("jr target", 0x100),
            Err(AsmError::OutOfRange { value: -248, .. })
        ));
    }

    #[test]
    fn ranged_operands_fail_instead_of_clamping() {
        assert!(matches!(
            assemble_at("rst 8", 0),
            Err(AsmError::OutOfRange { value: 8, min: 0, max: 7, .. })
        ));
    }

    #[test]
    fn indirect_offset_without_configuration() {
        assert!(matches!(
            assemble_at("ld [hl+3]", 0),
            Err(AsmError::UnexpectedOffset { .. })
        ));
    }

    #[test]
    fn registers_are_not_labels() {
        assert!(matches!(
            assemble_at("ld [a]", 0),
            Err(AsmError::NoMatchingOperands { .. })
        ));
    }

    #[test]
    fn program_end_to_end() {
        let isa = isa();
        let mut program = Program::new(&isa).unwrap();
        program
            .add_source(
                "main.asm",
                "; vectors\n\
                 .org $08\n\
                 target:\n\
                 \tadd a\n\
                 .org $10\n\
                 \tjr target\n\
                 \tld [hl]\n\
                 table: .byte 1, 2\n",
            )
            .unwrap();
        let lines = program.assemble().unwrap();
        let addresses: Vec<i64> = lines.iter().map(|line| line.address).collect();
        assert_eq!(addresses, vec![0x08, 0x10, 0x12, 0x13]);
        assert_eq!(lines[1].bytes, vec![0x18, 0xF8]);
        assert_eq!(program.label("table"), Some(0x13));
        let image = program.image().unwrap();
        assert_eq!(image.len(), 0x13 - 0x08 + 2);
        assert_eq!(image[0], 0x01);
        assert_eq!(&image[8..], &[0x18, 0xF8, 0x41, 1, 2]);
    }

    fn packed_isa(endianness: &str) -> Isa {
        Isa::from_toml_str(&format!(
            "[general]\n\
             word_size = 16\n\
             multi_word_endianness = \"{endianness}\"\n\
             string_byte_packing = true\n\
             string_byte_packing_fill = \"$FF\"\n"
        ))
        .unwrap()
    }

    #[parameterized(endianness = {
        "big", "little"
    }, expected = {
        vec![0x41, 0x42, 0x43, 0xFF, 0x68, 0x69, 0x00, 0xFF, 0x12, 0x34],
        vec![0x42, 0x41, 0xFF, 0x43, 0x69, 0x68, 0xFF, 0x00, 0x12, 0x34]
    })]
    fn strings_pack_into_wide_words(endianness: &str, expected: Vec<u8>) {
        let isa = packed_isa(endianness);
        let mut program = Program::new(&isa).unwrap();
        program
            .add_source(
                "strings.asm",
                "name: .byte \"ABC\"\n\
                 greeting: .cstr \"hi\"\n\
                 word: .2byte $1234\n",
            )
            .unwrap();
        assert_eq!(program.label("name"), Some(0));
        assert_eq!(program.label("greeting"), Some(2));
        assert_eq!(program.label("word"), Some(4));
        assert_eq!(program.image().unwrap(), expected);
    }

    #[test]
    fn two_characters_fill_one_word() {
        let isa = packed_isa("big");
        let mut program = Program::new(&isa).unwrap();
        program.add_source("ab.asm", ".byte \"AB\"\nafter:\n").unwrap();
        let lines = program.assemble().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].bytes, vec![0x41, 0x42]);
        assert_eq!(program.label("after"), Some(1));
    }
}
