/// Bytecode operations.
///
/// Short forms carry their operand in the low bits of the opcode byte (see
/// [`OPCODE_RANGES`]). Long forms read one operand byte that is combined with
/// the pending [`ExtA`](Op::ExtA) / [`ExtB`](Op::ExtB) extension value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    PushReceiverVariable,
    PushLiteralVariable,
    PushLiteralConstant,
    PushTemp,
    PushReceiver,
    PushTrue,
    PushFalse,
    PushNil,
    PushZero,
    PushOne,
    PushThisContext,
    Dup,

    ReturnReceiver,
    ReturnTrue,
    ReturnFalse,
    ReturnNil,
    ReturnTop,
    Nop,

    /// Arithmetic special selector `0..16`, SmallInteger fast path.
    SendArithmetic,
    /// Common special selector `16..32`.
    SendSpecial,
    /// Literal selector `0..16`, no arguments.
    Send0,
    Send1,
    Send2,

    /// Forward jump of 1..=8 bytes.
    ShortJump,
    ShortJumpIfTrue,
    ShortJumpIfFalse,
    PopStoreReceiverVariable,
    PopStoreTemp,
    Pop,

    /// Prefix: `ext_a = ext_a * 256 + byte` (unsigned).
    ExtA,
    /// Prefix: `ext_b = ext_b * 256 + byte`, first byte sign-extended.
    ExtB,

    LongPushReceiverVariable,
    LongPushLiteralVariable,
    LongPushLiteralConstant,
    LongPushTemp,
    /// `ext_b * 256 + byte`, signed.
    PushInteger,
    /// `ext_a * 256 + byte`.
    PushCharacter,
    /// Literal `ext_a * 32 + byte >> 3`, argc `ext_b * 8 + byte & 7`.
    LongSend,
    /// Signed offset `ext_b * 256 + byte`, relative to the next instruction.
    LongJump,
    LongJumpIfTrue,
    LongJumpIfFalse,
    LongPopStoreReceiverVariable,
    LongPopStoreLiteralVariable,
    LongPopStoreTemp,
    LongStoreReceiverVariable,
    LongStoreLiteralVariable,
    LongStoreTemp,

    /// Unassigned opcode byte.
    Unknown,
}

impl Op {
    /// Whether one operand byte follows the opcode.
    pub const fn has_operand_byte(self) -> bool {
        matches!(
            self,
            Op::ExtA
                | Op::ExtB
                | Op::LongPushReceiverVariable
                | Op::LongPushLiteralVariable
                | Op::LongPushLiteralConstant
                | Op::LongPushTemp
                | Op::PushInteger
                | Op::PushCharacter
                | Op::LongSend
                | Op::LongJump
                | Op::LongJumpIfTrue
                | Op::LongJumpIfFalse
                | Op::LongPopStoreReceiverVariable
                | Op::LongPopStoreLiteralVariable
                | Op::LongPopStoreTemp
                | Op::LongStoreReceiverVariable
                | Op::LongStoreLiteralVariable
                | Op::LongStoreTemp
        )
    }
}

/// A run of opcode bytes `first..first + count` sharing one [`Op`]. The
/// operand of a short form is `byte - first`.
#[derive(Debug, Clone, Copy)]
pub struct OpcodeRange {
    pub first: u8,
    pub count: u8,
    pub op: Op,
}

const fn range(first: u8, count: u8, op: Op) -> OpcodeRange {
    OpcodeRange { first, count, op }
}

/// The byte set. Bytes not covered decode as [`Op::Unknown`].
pub const OPCODE_RANGES: &[OpcodeRange] = &[
    range(0, 16, Op::PushReceiverVariable),
    range(16, 16, Op::PushLiteralVariable),
    range(32, 32, Op::PushLiteralConstant),
    range(64, 12, Op::PushTemp),
    range(76, 1, Op::PushReceiver),
    range(77, 1, Op::PushTrue),
    range(78, 1, Op::PushFalse),
    range(79, 1, Op::PushNil),
    range(80, 1, Op::PushZero),
    range(81, 1, Op::PushOne),
    range(82, 1, Op::PushThisContext),
    range(83, 1, Op::Dup),
    range(88, 1, Op::ReturnReceiver),
    range(89, 1, Op::ReturnTrue),
    range(90, 1, Op::ReturnFalse),
    range(91, 1, Op::ReturnNil),
    range(92, 1, Op::ReturnTop),
    range(95, 1, Op::Nop),
    range(96, 16, Op::SendArithmetic),
    range(112, 16, Op::SendSpecial),
    range(128, 16, Op::Send0),
    range(144, 16, Op::Send1),
    range(160, 16, Op::Send2),
    range(176, 8, Op::ShortJump),
    range(184, 8, Op::ShortJumpIfTrue),
    range(192, 8, Op::ShortJumpIfFalse),
    range(200, 8, Op::PopStoreReceiverVariable),
    range(208, 8, Op::PopStoreTemp),
    range(216, 1, Op::Pop),
    range(224, 1, Op::ExtA),
    range(225, 1, Op::ExtB),
    range(226, 1, Op::LongPushReceiverVariable),
    range(227, 1, Op::LongPushLiteralVariable),
    range(228, 1, Op::LongPushLiteralConstant),
    range(229, 1, Op::LongPushTemp),
    range(232, 1, Op::PushInteger),
    range(233, 1, Op::PushCharacter),
    range(234, 1, Op::LongSend),
    range(237, 1, Op::LongJump),
    range(238, 1, Op::LongJumpIfTrue),
    range(239, 1, Op::LongJumpIfFalse),
    range(240, 1, Op::LongPopStoreReceiverVariable),
    range(241, 1, Op::LongPopStoreLiteralVariable),
    range(242, 1, Op::LongPopStoreTemp),
    range(243, 1, Op::LongStoreReceiverVariable),
    range(244, 1, Op::LongStoreLiteralVariable),
    range(245, 1, Op::LongStoreTemp),
];

/// At most this many extension prefixes precede one operand.
pub const MAX_EXTENSION_BYTES: usize = 3;

/// One decode table entry: the operation and the operand embedded in the
/// opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcode {
    pub op: Op,
    pub embedded: u8,
}

const fn build_decode_table() -> [Opcode; 256] {
    let mut table = [Opcode {
        op: Op::Unknown,
        embedded: 0,
    }; 256];
    let mut r = 0;
    while r < OPCODE_RANGES.len() {
        let entry = OPCODE_RANGES[r];
        let mut i = 0;
        while i < entry.count {
            table[(entry.first + i) as usize] = Opcode {
                op: entry.op,
                embedded: i,
            };
            i += 1;
        }
        r += 1;
    }
    table
}

pub static DECODE_TABLE: [Opcode; 256] = build_decode_table();

#[inline(always)]
pub fn decode_opcode(byte: u8) -> Opcode {
    DECODE_TABLE[byte as usize]
}

/// The opcode byte for `op` with `embedded` folded in, if the range has room.
pub fn encode_opcode(op: Op, embedded: u32) -> Option<u8> {
    OPCODE_RANGES
        .iter()
        .find(|r| r.op == op)
        .filter(|r| embedded < r.count as u32)
        .map(|r| r.first + embedded as u8)
}

/// Number of short-form slots available for `op`.
pub fn short_range(op: Op) -> u32 {
    OPCODE_RANGES
        .iter()
        .find(|r| r.op == op)
        .map_or(0, |r| r.count as u32)
}

/// Selectors reachable through [`Op::SendArithmetic`] (indices `0..16`) and
/// [`Op::SendSpecial`] (indices `16..32`), with their argument counts.
pub const SPECIAL_SELECTORS: [(&str, u8); 32] = [
    ("+", 1),
    ("-", 1),
    ("<", 1),
    (">", 1),
    ("<=", 1),
    (">=", 1),
    ("=", 1),
    ("~=", 1),
    ("*", 1),
    ("/", 1),
    ("\\\\", 1),
    ("@", 1),
    ("bitShift:", 1),
    ("//", 1),
    ("bitAnd:", 1),
    ("bitOr:", 1),
    ("at:", 1),
    ("at:put:", 2),
    ("size", 0),
    ("next", 0),
    ("nextPut:", 1),
    ("atEnd", 0),
    ("==", 1),
    ("class", 0),
    ("~~", 1),
    ("value", 0),
    ("value:", 1),
    ("do:", 1),
    ("new", 0),
    ("new:", 1),
    ("x", 0),
    ("y", 0),
];

/// Special selector indices the interpreter handles inline.
pub mod special {
    pub const ADD: u8 = 0;
    pub const SUBTRACT: u8 = 1;
    pub const LESS: u8 = 2;
    pub const GREATER: u8 = 3;
    pub const LESS_EQUAL: u8 = 4;
    pub const GREATER_EQUAL: u8 = 5;
    pub const EQUAL: u8 = 6;
    pub const NOT_EQUAL: u8 = 7;
    pub const MULTIPLY: u8 = 8;
    pub const IDENTICAL: u8 = 22;
    pub const CLASS: u8 = 23;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_do_not_overlap() {
        let mut seen = [false; 256];
        for r in OPCODE_RANGES {
            for b in r.first as usize..r.first as usize + r.count as usize {
                assert!(!seen[b], "byte {b} assigned twice");
                seen[b] = true;
            }
        }
    }

    #[test]
    fn decode_table_matches_ranges() {
        assert_eq!(decode_opcode(0), Opcode { op: Op::PushReceiverVariable, embedded: 0 });
        assert_eq!(decode_opcode(47), Opcode { op: Op::PushLiteralConstant, embedded: 15 });
        assert_eq!(decode_opcode(79).op, Op::PushNil);
        assert_eq!(decode_opcode(183), Opcode { op: Op::ShortJump, embedded: 7 });
        assert_eq!(decode_opcode(0xE0).op, Op::ExtA);
        assert_eq!(decode_opcode(0xE1).op, Op::ExtB);
        assert_eq!(decode_opcode(84).op, Op::Unknown);
        assert_eq!(decode_opcode(255).op, Op::Unknown);
    }

    #[test]
    fn encode_opcode_respects_range() {
        assert_eq!(encode_opcode(Op::PushLiteralConstant, 31), Some(63));
        assert_eq!(encode_opcode(Op::PushLiteralConstant, 32), None);
        assert_eq!(encode_opcode(Op::Send2, 3), Some(163));
        assert_eq!(encode_opcode(Op::Pop, 0), Some(216));
        assert_eq!(short_range(Op::PushTemp), 12);
    }

    #[test]
    fn special_selector_indices() {
        assert_eq!(SPECIAL_SELECTORS[special::ADD as usize].0, "+");
        assert_eq!(SPECIAL_SELECTORS[special::MULTIPLY as usize].0, "*");
        assert_eq!(SPECIAL_SELECTORS[special::IDENTICAL as usize].0, "==");
        assert_eq!(SPECIAL_SELECTORS[special::CLASS as usize].0, "class");
    }
}
