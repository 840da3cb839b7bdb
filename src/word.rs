//! Bit-accurate words.
//!
//! A [`Word`] holds `bits` raw bits, most significant first, split into equal segments that are
//! reordered on serialization according to the word's intra-word endianness. A [`Value`] spreads
//! an integer over one or more words of the same shape and orders them by its multi-word
//! endianness. Whenever a word is not a whole number of bytes, serialized bits are left-packed
//! with no padding between words.

use crate::{error::Result, AsmError, Endian};

fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Whether `value` is representable in `bits` bits, either unsigned or as two's complement.
pub(crate) fn fits(value: i64, bits: u32) -> bool {
    if bits == 0 {
        return value == 0;
    }
    if bits > 64 {
        return true;
    }
    let value = value as i128;
    let min = -(1i128 << (bits - 1));
    let max = (1i128 << bits) - 1;
    (min..=max).contains(&value)
}

/// Number of bits needed to hold `value`, counting a sign bit for negatives.
pub fn bits_needed(value: i64) -> u32 {
    let magnitude = 64 - value.unsigned_abs().leading_zeros();
    if value < 0 {
        magnitude + 1
    } else {
        magnitude
    }
}

fn packing(msg: String) -> AsmError {
    AsmError::Packing(msg)
}

/// Appends bit fields most significant bit first, left-packing them into bytes.
#[derive(Debug, Default, Clone)]
pub struct BitPacker {
    bytes: Vec<u8>,
    bits: usize,
}

impl BitPacker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: u64, width: u32) {
        for i in (0..width).rev() {
            if self.bits % 8 == 0 {
                self.bytes.push(0);
            }
            if (value >> i) & 1 == 1 {
                let byte = self.bits / 8;
                self.bytes[byte] |= 0x80 >> (self.bits % 8);
            }
            self.bits += 1;
        }
    }

    /// Pads with zero bits up to the next multiple of `to` bits.
    pub fn align(&mut self, to: u32) {
        let to = to as usize;
        if to == 0 {
            return;
        }
        let pad = (to - self.bits % to) % to;
        for _ in 0..pad {
            self.push(0, 1);
        }
    }

    pub fn bit_len(&self) -> usize {
        self.bits
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// A raw bit field. Has no notion of byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordSlice {
    value: i64,
    bits: u32,
}

impl WordSlice {
    pub fn new(value: i64, bits: u32) -> Result<Self> {
        if bits > 64 {
            return Err(packing(format!("word slice of {bits} bits is too wide")));
        }
        if !fits(value, bits) {
            return Err(packing(format!(
                "value {value} does not fit a {bits}-bit word slice"
            )));
        }
        Ok(Self { value, bits })
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn raw_bits(&self) -> u64 {
        (self.value as u64) & mask(self.bits)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Word {
    value: i64,
    bits: u32,
    segment_bits: u32,
    endian: Endian,
}

impl Word {
    pub fn new(value: i64, bits: u32, segment_bits: u32, endian: Endian) -> Result<Self> {
        if bits == 0 || bits > 64 {
            return Err(packing(format!("word size of {bits} bits is not supported")));
        }
        if segment_bits == 0 || segment_bits > bits || bits % segment_bits != 0 {
            return Err(packing(format!(
                "segment size {segment_bits} does not evenly divide word size {bits}"
            )));
        }
        if !fits(value, bits) {
            return Err(packing(format!("value {value} does not fit a {bits}-bit word")));
        }
        Ok(Self {
            value,
            bits,
            segment_bits,
            endian,
        })
    }

    /// Concatenates `slices` most significant first. Unused low bits are zero.
    pub fn from_slices(
        slices: &[WordSlice],
        bits: u32,
        segment_bits: u32,
        endian: Endian,
    ) -> Result<Self> {
        let total: u32 = slices.iter().map(WordSlice::bits).sum();
        if total > bits {
            return Err(packing(format!(
                "word slices totalling {total} bits exceed the {bits}-bit word"
            )));
        }
        let mut raw = 0u64;
        for slice in slices {
            raw = if slice.bits() >= 64 {
                slice.raw_bits()
            } else {
                (raw << slice.bits()) | slice.raw_bits()
            };
        }
        if bits - total < 64 {
            raw <<= bits - total;
        }
        Self::new(raw as i64, bits, segment_bits, endian)
    }

    /// Decodes consecutive words from a left-packed bit stream, the inverse of [`Word::to_bytes`].
    /// Decoded words carry their raw unsigned bits.
    pub fn from_bytes(
        bytes: &[u8],
        bits: u32,
        segment_bits: u32,
        endian: Endian,
    ) -> Result<Vec<Self>> {
        // validate the shape up front
        Self::new(0, bits, segment_bits, endian)?;
        let total = bytes.len() * 8;
        let bit_at = |i: usize| (bytes[i / 8] >> (7 - i % 8)) & 1;
        let mut words = Vec::new();
        let mut at = 0usize;
        while at + bits as usize <= total {
            let mut ordered = 0u64;
            for i in at..(at + bits as usize) {
                ordered = (ordered << 1) | bit_at(i) as u64;
            }
            at += bits as usize;
            let count = bits / segment_bits;
            let segments: Vec<u64> = (0..count)
                .map(|i| (ordered >> ((count - 1 - i) * segment_bits)) & mask(segment_bits))
                .collect();
            let raw = Self::join(&segments, segment_bits, endian);
            words.push(Self::new(raw as i64, bits, segment_bits, endian)?);
        }
        Ok(words)
    }

    fn join(segments: &[u64], segment_bits: u32, endian: Endian) -> u64 {
        let fold = |acc: u64, segment: &u64| {
            if segment_bits >= 64 {
                *segment
            } else {
                (acc << segment_bits) | segment
            }
        };
        match endian {
            Endian::Big => segments.iter().fold(0, fold),
            Endian::Little => segments.iter().rev().fold(0, fold),
        }
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    /// The raw bits read back as a two's complement number.
    pub fn signed_value(&self) -> i64 {
        let raw = self.raw_bits();
        if self.bits < 64 && (raw >> (self.bits - 1)) & 1 == 1 {
            (raw | !mask(self.bits)) as i64
        } else {
            raw as i64
        }
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn segment_bits(&self) -> u32 {
        self.segment_bits
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn raw_bits(&self) -> u64 {
        (self.value as u64) & mask(self.bits)
    }

    /// Segments, most significant first.
    pub fn segments(&self) -> Vec<u64> {
        let count = self.bits / self.segment_bits;
        let raw = self.raw_bits();
        (0..count)
            .map(|i| {
                let shift = (count - 1 - i) * self.segment_bits;
                if shift >= 64 {
                    0
                } else {
                    (raw >> shift) & mask(self.segment_bits)
                }
            })
            .collect()
    }

    /// The word's bits in the order they are emitted.
    pub fn ordered_bits(&self) -> u64 {
        let segments = self.segments();
        let fold = |acc: u64, segment: &u64| {
            if self.segment_bits >= 64 {
                *segment
            } else {
                (acc << self.segment_bits) | segment
            }
        };
        match self.endian {
            Endian::Big => segments.iter().fold(0, fold),
            Endian::Little => segments.iter().rev().fold(0, fold),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut packer = BitPacker::new();
        packer.push(self.ordered_bits(), self.bits);
        packer.into_bytes()
    }

    /// Serializes `words` back to back. In compact mode the raw bits of every word are packed
    /// contiguously and segment order is ignored; otherwise each word starts a new byte.
    pub fn words_to_bytes(words: &[Word], compact: bool) -> Vec<u8> {
        if compact {
            let mut packer = BitPacker::new();
            for word in words {
                packer.push(word.raw_bits(), word.bits);
            }
            return packer.into_bytes();
        }
        words.iter().flat_map(Word::to_bytes).collect()
    }
}

/// An integer spread over one or more words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    value: i64,
    words: Vec<Word>,
    multi_endian: Endian,
}

impl Value {
    /// Splits `value` over as few words as hold it, at least one.
    pub fn new(
        value: i64,
        word_bits: u32,
        segment_bits: u32,
        intra_endian: Endian,
        multi_endian: Endian,
    ) -> Result<Self> {
        if word_bits == 0 {
            return Err(packing("word size of 0 bits is not supported".to_string()));
        }
        let count = bits_needed(value).div_ceil(word_bits).max(1) as usize;
        Self::with_word_count(value, count, word_bits, segment_bits, intra_endian, multi_endian)
    }

    /// Splits `value` over exactly `count` words.
    pub fn with_word_count(
        value: i64,
        count: usize,
        word_bits: u32,
        segment_bits: u32,
        intra_endian: Endian,
        multi_endian: Endian,
    ) -> Result<Self> {
        let segment_bits = if segment_bits == 0 || word_bits % segment_bits != 0 {
            tracing::warn!(
                "segment size {segment_bits} does not divide word size {word_bits}, using {word_bits}"
            );
            word_bits
        } else {
            segment_bits
        };
        let total = count as u64 * word_bits as u64;
        if count == 0 || word_bits == 0 || word_bits > 64 || total > 128 {
            return Err(packing(format!(
                "{count} word(s) of {word_bits} bits is not a supported value shape"
            )));
        }
        let min = if total >= 128 { i128::MIN } else { -(1i128 << (total - 1)) };
        let wide = value as i128;
        if wide < min || (total < 128 && wide > (1i128 << total) - 1) {
            return Err(packing(format!(
                "value {value} does not fit {count} word(s) of {word_bits} bits"
            )));
        }
        let word_mask = (1i128 << word_bits) - 1;
        let words = (0..count)
            .map(|i| {
                let shift = (count - 1 - i) as u32 * word_bits;
                let chunk = (wide >> shift) & word_mask;
                Word::new(chunk as u64 as i64, word_bits, segment_bits, intra_endian)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            value,
            words,
            multi_endian,
        })
    }

    /// Joins `words`, most significant first. All words must share one shape.
    pub fn from_words(words: Vec<Word>, multi_endian: Endian) -> Result<Self> {
        let Some(first) = words.first().copied() else {
            return Err(packing("a value needs at least one word".to_string()));
        };
        let mut wide = 0i128;
        for word in &words {
            if word.bits != first.bits
                || word.segment_bits != first.segment_bits
                || word.endian != first.endian
            {
                return Err(packing("words of a value must all share one shape".to_string()));
            }
            wide = (wide << word.bits) | word.raw_bits() as i128;
        }
        let value = i64::try_from(wide)
            .map_err(|_| packing(format!("value {wide} does not fit 64 bits")))?;
        Ok(Self {
            value,
            words,
            multi_endian,
        })
    }

    /// Concatenates `slices` most significant first into as many words as needed, zero padding
    /// the low end of the last one.
    pub fn from_word_slices(
        slices: &[WordSlice],
        word_bits: u32,
        segment_bits: u32,
        intra_endian: Endian,
        multi_endian: Endian,
    ) -> Result<Self> {
        if word_bits == 0 || word_bits > 64 {
            return Err(packing(format!("word size of {word_bits} bits is not supported")));
        }
        let mut packer = BitPacker::new();
        for slice in slices {
            packer.push(slice.raw_bits(), slice.bits());
        }
        packer.align(word_bits);
        let count = (packer.bit_len() / word_bits as usize).max(1);
        let bytes = packer.into_bytes();
        let mut words = Word::from_bytes(&bytes, word_bits, word_bits, Endian::Big)?;
        if words.is_empty() {
            words.push(Word::new(0, word_bits, word_bits, Endian::Big)?);
        }
        words.truncate(count);
        let words = words
            .into_iter()
            .map(|word| Word::new(word.value, word_bits, segment_bits, intra_endian))
            .collect::<Result<Vec<_>>>()?;
        Self::from_words(words, multi_endian)
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    pub fn multi_endian(&self) -> Endian {
        self.multi_endian
    }

    /// Words, most significant first.
    pub fn words(&self) -> &[Word] {
        &self.words
    }

    /// Words in the order they are emitted.
    pub fn words_ordered(&self) -> Vec<Word> {
        match self.multi_endian {
            Endian::Big => self.words.clone(),
            Endian::Little => self.words.iter().rev().copied().collect(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let ordered = self.words_ordered();
        match ordered.first() {
            Some(word) if word.bits % 8 != 0 => {
                let mut packer = BitPacker::new();
                for word in &ordered {
                    packer.push(word.ordered_bits(), word.bits);
                }
                packer.into_bytes()
            }
            _ => Word::words_to_bytes(&ordered, false),
        }
    }
}
