extern crate confasm;
extern crate parameterized;

#[cfg(test)]
mod packing {
    use confasm::{BitPacker, Endian, Value, Word, WordSlice};
    use parameterized::parameterized;

    #[parameterized(endian = { Endian::Big, Endian::Little }, expected = {
        vec![0x12, 0x34], vec![0x34, 0x12]
    })]
    fn intra_word_order(endian: Endian, expected: Vec<u8>) {
        let word = Word::new(0x1234, 16, 8, endian).unwrap();
        assert_eq!(word.to_bytes(), expected);
        let decoded = Word::from_bytes(&expected, 16, 8, endian).unwrap();
        assert_eq!(decoded, vec![word]);
    }

    #[parameterized(endian = { Endian::Big, Endian::Little }, expected = {
        vec![0x12, 0x34, 0x56], vec![0x56, 0x34, 0x12]
    })]
    fn multi_word_order(endian: Endian, expected: Vec<u8>) {
        let value = Value::new(0x123456, 8, 8, Endian::Big, endian).unwrap();
        assert_eq!(value.word_count(), 3);
        assert_eq!(value.to_bytes(), expected);
    }

    #[test]
    fn both_orders_combined() {
        let value = Value::with_word_count(0x1122_3344, 2, 16, 8, Endian::Little, Endian::Little).unwrap();
        assert_eq!(value.to_bytes(), vec![0x44, 0x33, 0x22, 0x11]);
    }

    #[test]
    fn slices_fill_a_word_from_the_top() {
        let slices = [WordSlice::new(0b101, 3).unwrap(), WordSlice::new(0b11, 2).unwrap()];
        let word = Word::from_slices(&slices, 8, 8, Endian::Big).unwrap();
        assert_eq!(word.value(), 0b1011_1000);
    }

    #[test]
    fn odd_word_sizes_pack_tightly() {
        let words = [
            Word::new(0b111111, 6, 6, Endian::Big).unwrap(),
            Word::new(0b000011, 6, 6, Endian::Big).unwrap(),
        ];
        let mut packer = BitPacker::new();
        for word in &words {
            packer.push(word.ordered_bits(), word.bits());
        }
        assert_eq!(packer.bit_len(), 12);
        assert_eq!(packer.into_bytes(), vec![0b1111_1100, 0b0011_0000]);
    }

    #[test]
    fn values_must_fit() {
        assert!(Word::new(256, 8, 8, Endian::Big).is_err());
        assert!(Word::new(-128, 8, 8, Endian::Big).is_ok());
        assert!(Word::new(1, 8, 3, Endian::Big).is_err());
        assert!(Value::with_word_count(0x10000, 2, 8, 8, Endian::Big, Endian::Big).is_err());
    }
}
