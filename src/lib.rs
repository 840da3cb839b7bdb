use std::{
    fmt::{self, Display, Formatter},
    rc::Rc,
};

use serde_derive::{Deserialize, Serialize};

pub mod config;
pub mod error;
pub mod expr;
pub mod isa;
pub mod memzone;
pub mod operand;
pub mod parts;
pub mod program;
pub mod scope;
pub mod signature;
pub mod word;

pub use config::IsaConfig;
pub use error::{AsmError, ErrorKind, Result};
pub use expr::{Expr, Symbols};
pub use isa::{AssembledInstruction, Isa};
pub use memzone::{MemoryZone, MemoryZoneManager, ZoneBounds};
pub use operand::{Operand, OperandType, ParsedOperand};
pub use parts::{ByteCodePart, EvalContext, PartKind, PartShape};
pub use program::{Program, ProgramLine};
pub use scope::{ActiveScopes, LabelScopes, ScopeId, ScopeView};
pub use signature::{MatchedOperands, OperandParser, OperandSet, OperandSets};
pub use word::{BitPacker, Value, Word, WordSlice};

/// Where a line came from. Only used for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LineId {
    pub file: Rc<str>,
    pub line: usize,
}

impl LineId {
    pub fn new(file: &str, line: usize) -> Self {
        Self {
            file: Rc::from(file),
            line,
        }
    }

    /// Stand-in location for values that come from configuration rather than source text.
    pub fn config() -> Self {
        Self::new("<config>", 0)
    }
}

impl Display for LineId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    #[default]
    Big,
    Little,
}

impl Display for Endian {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Endian::Big => write!(f, "big"),
            Endian::Little => write!(f, "little"),
        }
    }
}

/// Word geometry shared by every part an ISA produces unless a part overrides it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordLayout {
    pub word_bits: u32,
    pub segment_bits: u32,
    pub multi_word_endian: Endian,
    pub intra_word_endian: Endian,
}

impl Default for WordLayout {
    fn default() -> Self {
        Self {
            word_bits: 8,
            segment_bits: 8,
            multi_word_endian: Endian::Big,
            intra_word_endian: Endian::Big,
        }
    }
}
