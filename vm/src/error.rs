use core::fmt;

use bytecode::{AssemblerError, DecodeError};
use object::{MemoryError, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// No method for `selector` along the receiver's class chain.
    DoesNotUnderstand { receiver: Value, selector: Value },
    /// A method was entered with the wrong number of arguments.
    ArgumentCountMismatch { expected: usize, got: usize },
    UnknownOpcode { byte: u8, pc: usize },
    MalformedBytecode(DecodeError),
    Assembler(AssemblerError),
    Memory(MemoryError),
    StackOverflow,
    StackUnderflow,
    TypeError { expected: &'static str, got: Value },
    /// A native method rejected its arguments, e.g. on integer overflow.
    PrimitiveFailed { selector: &'static str, receiver: Value },
    /// A dictionary value that is neither a compiled nor a native method.
    NotAMethod(Value),
    SuperclassCycle { class: Value },
    InvalidClass(Value),
    TempOutOfRange { index: u32 },
    NonBoolean(Value),
    /// A result that has no immediate encoding, e.g. SmallInteger overflow.
    Unrepresentable { kind: &'static str },
}

impl VmError {
    /// Lookup failures, encoding errors and type/primitive failures can be
    /// handled by the caller. Calling-convention violations and interpreter
    /// consistency failures mean broken bytecode or a broken compiler.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::ArgumentCountMismatch { .. }
            | Self::UnknownOpcode { .. }
            | Self::MalformedBytecode(_)
            | Self::TempOutOfRange { .. } => false,
            Self::Assembler(e) => e.is_recoverable(),
            _ => true,
        }
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DoesNotUnderstand { receiver, selector } => {
                write!(f, "{receiver:?} does not understand {selector:?}")
            }
            Self::ArgumentCountMismatch { expected, got } => {
                write!(f, "method expects {expected} arguments, got {got}")
            }
            Self::UnknownOpcode { byte, pc } => write!(f, "unknown opcode 0x{byte:02x} at pc {pc}"),
            Self::MalformedBytecode(e) => write!(f, "malformed bytecode: {e}"),
            Self::Assembler(e) => write!(f, "assembler: {e}"),
            Self::Memory(e) => write!(f, "memory: {e}"),
            Self::StackOverflow => write!(f, "stack overflow"),
            Self::StackUnderflow => write!(f, "stack underflow"),
            Self::TypeError { expected, got } => write!(f, "expected {expected}, got {got:?}"),
            Self::PrimitiveFailed { selector, receiver } => {
                write!(f, "primitive {selector} failed for {receiver:?}")
            }
            Self::NotAMethod(v) => write!(f, "{v:?} is not a method"),
            Self::SuperclassCycle { class } => {
                write!(f, "superclass chain of {class:?} would be cyclic")
            }
            Self::InvalidClass(v) => write!(f, "{v:?} is not a class"),
            Self::TempOutOfRange { index } => write!(f, "temporary {index} out of range"),
            Self::NonBoolean(v) => write!(f, "conditional jump on non-boolean {v:?}"),
            Self::Unrepresentable { kind } => write!(f, "result is not representable as a {kind}"),
        }
    }
}

impl std::error::Error for VmError {}

impl From<MemoryError> for VmError {
    fn from(e: MemoryError) -> Self {
        Self::Memory(e)
    }
}

impl From<AssemblerError> for VmError {
    fn from(e: AssemblerError) -> Self {
        Self::Assembler(e)
    }
}

impl From<DecodeError> for VmError {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::UnknownOpcode { offset, byte } => Self::UnknownOpcode { byte, pc: offset },
            other => Self::MalformedBytecode(other),
        }
    }
}
