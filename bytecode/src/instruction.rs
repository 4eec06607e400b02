use core::fmt;

use crate::op::SPECIAL_SELECTORS;

/// A decoded instruction with extension prefixes folded into its operands.
///
/// Short and long encodings of the same operation decode to the same
/// variant. Jump offsets are relative to the end of the jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    PushReceiverVariable(u32),
    PushLiteralVariable(u32),
    PushLiteralConstant(u32),
    /// Temporary index; indices below the argument count name arguments.
    PushTemp(u32),
    PushReceiver,
    PushTrue,
    PushFalse,
    PushNil,
    PushThisContext,
    PushInteger(i64),
    PushCharacter(u32),
    Dup,
    Pop,

    ReturnReceiver,
    ReturnTrue,
    ReturnFalse,
    ReturnNil,
    ReturnTop,
    Nop,

    /// Special selector `0..32`. The argument count comes from the
    /// special selector table.
    SendSpecial(u8),
    Send {
        literal: u32,
        argc: u32,
    },

    Jump(i64),
    JumpIfTrue(i64),
    JumpIfFalse(i64),

    PopStoreReceiverVariable(u32),
    PopStoreLiteralVariable(u32),
    PopStoreTemp(u32),
    StoreReceiverVariable(u32),
    StoreLiteralVariable(u32),
    StoreTemp(u32),
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PushReceiverVariable(i) => write!(f, "pushRcvr: {i}"),
            Self::PushLiteralVariable(i) => write!(f, "pushLitVar: {i}"),
            Self::PushLiteralConstant(i) => write!(f, "pushConst: {i}"),
            Self::PushTemp(i) => write!(f, "pushTemp: {i}"),
            Self::PushReceiver => write!(f, "self"),
            Self::PushTrue => write!(f, "pushConst: true"),
            Self::PushFalse => write!(f, "pushConst: false"),
            Self::PushNil => write!(f, "pushConst: nil"),
            Self::PushThisContext => write!(f, "pushThisContext"),
            Self::PushInteger(n) => write!(f, "pushConst: {n}"),
            Self::PushCharacter(c) => match char::from_u32(*c) {
                Some(c) => write!(f, "pushConst: ${c}"),
                None => write!(f, "pushConst: Character value: {c}"),
            },
            Self::Dup => write!(f, "dup"),
            Self::Pop => write!(f, "pop"),
            Self::ReturnReceiver => write!(f, "returnSelf"),
            Self::ReturnTrue => write!(f, "return: true"),
            Self::ReturnFalse => write!(f, "return: false"),
            Self::ReturnNil => write!(f, "return: nil"),
            Self::ReturnTop => write!(f, "returnTop"),
            Self::Nop => write!(f, "nop"),
            Self::SendSpecial(i) => match SPECIAL_SELECTORS.get(*i as usize) {
                Some((selector, _)) => write!(f, "send: #{selector}"),
                None => write!(f, "send: special {i}"),
            },
            Self::Send { literal, argc } => write!(f, "send: lit {literal} ({argc} args)"),
            Self::Jump(d) => write!(f, "jumpTo: {d:+}"),
            Self::JumpIfTrue(d) => write!(f, "jumpTrue: {d:+}"),
            Self::JumpIfFalse(d) => write!(f, "jumpFalse: {d:+}"),
            Self::PopStoreReceiverVariable(i) => write!(f, "popIntoRcvr: {i}"),
            Self::PopStoreLiteralVariable(i) => write!(f, "popIntoLitVar: {i}"),
            Self::PopStoreTemp(i) => write!(f, "popIntoTemp: {i}"),
            Self::StoreReceiverVariable(i) => write!(f, "storeIntoRcvr: {i}"),
            Self::StoreLiteralVariable(i) => write!(f, "storeIntoLitVar: {i}"),
            Self::StoreTemp(i) => write!(f, "storeIntoTemp: {i}"),
        }
    }
}
