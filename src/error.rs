use crate::LineId;

/// Broad class of an [`AsmError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Lexical,
    Syntax,
    Semantic,
    Configuration,
}

#[derive(thiserror::Error, Debug)]
pub enum AsmError {
    #[error("{line}: invalid token `{token}` in expression")]
    Lexical { line: LineId, token: String },

    #[error("{line}: {msg}")]
    Syntax { line: LineId, msg: String },

    #[error("{line}: undefined label `{label}`")]
    UndefinedLabel { line: LineId, label: String },

    #[error("{line}: register `{label}` used in numeric expression")]
    RegisterInExpression { line: LineId, label: String },

    #[error("{line}: label `{label}` already defined at {first}")]
    DuplicateLabel {
        line: LineId,
        label: String,
        first: LineId,
    },

    #[error("{line}: label `{label}` is not allowed: {reason}")]
    InvalidLabel {
        line: LineId,
        label: String,
        reason: String,
    },

    #[error("{line}: value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        line: LineId,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("{line}: `{key}` has no enumerated value")]
    NotEnumerated { line: LineId, key: String },

    #[error("{line}: address ${value:X} is outside memory zone `{zone}` [${start:X}, ${end:X}]")]
    OutsideZone {
        line: LineId,
        value: i64,
        zone: String,
        start: i64,
        end: i64,
    },

    #[error("{line}: operand `{text}` has an offset but none is configured")]
    UnexpectedOffset { line: LineId, text: String },

    #[error("{line}: address ${value:X} does not share upper bits with instruction address ${address:X}")]
    AddressMsbMismatch {
        line: LineId,
        value: i64,
        address: i64,
    },

    #[error("{line}: division by zero")]
    DivideByZero { line: LineId },

    #[error("{line}: {msg}")]
    Overflow { line: LineId, msg: String },

    #[error("{line}: unknown memory zone `{name}`")]
    UnknownZone { line: LineId, name: String },

    #[error("{line}: {msg}")]
    Zone { line: LineId, msg: String },

    #[error("{line}: {msg}")]
    Scope { line: LineId, msg: String },

    #[error("{line}: instruction `{mnemonic}` has no valid operands configured for `{operands}`")]
    NoMatchingOperands {
        line: LineId,
        mnemonic: String,
        operands: String,
    },

    #[error("{line}: unknown instruction `{mnemonic}`")]
    UnknownMnemonic { line: LineId, mnemonic: String },

    #[error("{0}")]
    Packing(String),

    #[error("configuration: {0}")]
    Config(String),

    #[error("configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

impl AsmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AsmError::Lexical { .. } => ErrorKind::Lexical,
            AsmError::Syntax { .. }
            | AsmError::NoMatchingOperands { .. }
            | AsmError::UnknownMnemonic { .. } => ErrorKind::Syntax,
            AsmError::Config(_) | AsmError::Toml(_) => ErrorKind::Configuration,
            _ => ErrorKind::Semantic,
        }
    }

    pub(crate) fn syntax(line: &LineId, msg: impl Into<String>) -> Self {
        AsmError::Syntax {
            line: line.clone(),
            msg: msg.into(),
        }
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        AsmError::Config(msg.into())
    }
}

pub type Result<T, E = AsmError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_location() {
        let err = AsmError::UndefinedLabel {
            line: LineId::new("main.asm", 12),
            label: "loop".to_string(),
        };
        assert_eq!(err.to_string(), "main.asm:12: undefined label `loop`");
        assert_eq!(err.kind(), ErrorKind::Semantic);
    }

    #[test]
    fn zone_errors_render_hex() {
        let err = AsmError::OutsideZone {
            line: LineId::new("a.asm", 1),
            value: 0x1234,
            zone: "rom".to_string(),
            start: 0x8000,
            end: 0xFFFF,
        };
        assert_eq!(
            err.to_string(),
            "a.asm:1: address $1234 is outside memory zone `rom` [$8000, $FFFF]"
        );
    }

    #[test]
    fn kinds() {
        let line = LineId::new("x", 1);
        assert_eq!(
            AsmError::Lexical {
                line: line.clone(),
                token: "#".to_string()
            }
            .kind(),
            ErrorKind::Lexical
        );
        assert_eq!(AsmError::syntax(&line, "bad").kind(), ErrorKind::Syntax);
        assert_eq!(AsmError::config("bad").kind(), ErrorKind::Configuration);
    }
}
