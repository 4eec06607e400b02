use core::fmt;

use object::MemoryError;

use crate::assembler::Label;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerError {
    /// An operand does not fit any encoding of its instruction.
    OperandOutOfRange { operand: i64 },
    TooManyLiterals { count: usize },
    TooManyTemps { count: usize },
    TooManyArguments { count: usize },
    UnboundLabel(Label),
    LabelAlreadyBound(Label),
    /// Emission disagreed with the computed layout.
    EncodingOverrun { position: usize },
    Memory(MemoryError),
}

impl AssemblerError {
    /// Everything except a layout/emission disagreement can be fixed by
    /// the caller.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::EncodingOverrun { .. })
    }
}

impl fmt::Display for AssemblerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OperandOutOfRange { operand } => write!(f, "operand {operand} out of range"),
            Self::TooManyLiterals { count } => write!(f, "too many literals: {count}"),
            Self::TooManyTemps { count } => write!(f, "too many temporaries: {count}"),
            Self::TooManyArguments { count } => write!(f, "too many arguments: {count}"),
            Self::UnboundLabel(label) => write!(f, "label {label} was never bound"),
            Self::LabelAlreadyBound(label) => write!(f, "label {label} is already bound"),
            Self::EncodingOverrun { position } => {
                write!(f, "encoding overran the computed layout at byte {position}")
            }
            Self::Memory(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for AssemblerError {}

impl From<MemoryError> for AssemblerError {
    fn from(e: MemoryError) -> Self {
        Self::Memory(e)
    }
}
