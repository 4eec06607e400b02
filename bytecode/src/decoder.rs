use core::fmt;

use crate::instruction::Instruction;
use crate::op::{MAX_EXTENSION_BYTES, Op, decode_opcode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    UnknownOpcode { offset: usize, byte: u8 },
    /// The stream ended inside an instruction or after an extension prefix.
    Truncated { offset: usize },
    TooManyExtensions { offset: usize },
    /// A folded operand is out of range for its instruction.
    InvalidOperand { offset: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownOpcode { offset, byte } => {
                write!(f, "unknown opcode 0x{byte:02x} at {offset}")
            }
            Self::Truncated { offset } => write!(f, "truncated instruction at {offset}"),
            Self::TooManyExtensions { offset } => {
                write!(f, "more than {MAX_EXTENSION_BYTES} extension prefixes at {offset}")
            }
            Self::InvalidOperand { offset } => write!(f, "invalid operand at {offset}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Decodes a bytecode slice into `(offset, Instruction)` pairs.
///
/// Extension prefixes are consumed together with the instruction they
/// extend; the reported offset is that of the first prefix.
pub struct BytecodeDecoder<'a> {
    bytes: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> BytecodeDecoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self::at(bytes, 0)
    }

    /// Start decoding at byte `offset`.
    pub fn at(bytes: &'a [u8], offset: usize) -> Self {
        Self {
            bytes,
            pos: offset,
            failed: false,
        }
    }

    /// Current byte offset in the stream.
    #[inline(always)]
    pub fn offset(&self) -> usize {
        self.pos
    }

    #[inline(always)]
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    /// Decode the next instruction, or `None` at end of stream.
    pub fn decode_next(&mut self) -> Option<Result<(usize, Instruction), DecodeError>> {
        if self.is_at_end() {
            return None;
        }
        let start = self.pos;
        Some(self.decode().map(|i| (start, i)))
    }

    fn decode(&mut self) -> Result<Instruction, DecodeError> {
        let start = self.pos;
        let mut ext_a: i64 = 0;
        let mut ext_b: i64 = 0;
        let mut extensions = 0;
        let mut ext_b_seen = false;

        loop {
            let at = self.pos;
            let byte = self.read_u8(start)?;
            let opcode = decode_opcode(byte);
            let e = opcode.embedded as i64;

            let operand = if opcode.op.has_operand_byte() {
                self.read_u8(start)? as i64
            } else {
                0
            };
            let unsigned = |ext: i64| -> Result<u32, DecodeError> {
                u32::try_from(ext * 256 + operand).map_err(|_| DecodeError::InvalidOperand { offset: start })
            };

            let instruction = match opcode.op {
                Op::ExtA | Op::ExtB => {
                    extensions += 1;
                    if extensions > MAX_EXTENSION_BYTES {
                        return Err(DecodeError::TooManyExtensions { offset: start });
                    }
                    if opcode.op == Op::ExtA {
                        ext_a = ext_a * 256 + operand;
                    } else if ext_b_seen {
                        ext_b = ext_b * 256 + operand;
                    } else {
                        ext_b = operand as u8 as i8 as i64;
                        ext_b_seen = true;
                    }
                    continue;
                }
                Op::Unknown => return Err(DecodeError::UnknownOpcode { offset: at, byte }),

                Op::PushReceiverVariable => Instruction::PushReceiverVariable(e as u32),
                Op::PushLiteralVariable => Instruction::PushLiteralVariable(e as u32),
                Op::PushLiteralConstant => Instruction::PushLiteralConstant(e as u32),
                Op::PushTemp => Instruction::PushTemp(e as u32),
                Op::PushReceiver => Instruction::PushReceiver,
                Op::PushTrue => Instruction::PushTrue,
                Op::PushFalse => Instruction::PushFalse,
                Op::PushNil => Instruction::PushNil,
                Op::PushZero => Instruction::PushInteger(0),
                Op::PushOne => Instruction::PushInteger(1),
                Op::PushThisContext => Instruction::PushThisContext,
                Op::Dup => Instruction::Dup,

                Op::ReturnReceiver => Instruction::ReturnReceiver,
                Op::ReturnTrue => Instruction::ReturnTrue,
                Op::ReturnFalse => Instruction::ReturnFalse,
                Op::ReturnNil => Instruction::ReturnNil,
                Op::ReturnTop => Instruction::ReturnTop,
                Op::Nop => Instruction::Nop,

                Op::SendArithmetic => Instruction::SendSpecial(e as u8),
                Op::SendSpecial => Instruction::SendSpecial(16 + e as u8),
                Op::Send0 => Instruction::Send { literal: e as u32, argc: 0 },
                Op::Send1 => Instruction::Send { literal: e as u32, argc: 1 },
                Op::Send2 => Instruction::Send { literal: e as u32, argc: 2 },

                Op::ShortJump => Instruction::Jump(e + 1),
                Op::ShortJumpIfTrue => Instruction::JumpIfTrue(e + 1),
                Op::ShortJumpIfFalse => Instruction::JumpIfFalse(e + 1),
                Op::PopStoreReceiverVariable => Instruction::PopStoreReceiverVariable(e as u32),
                Op::PopStoreTemp => Instruction::PopStoreTemp(e as u32),
                Op::Pop => Instruction::Pop,

                Op::LongPushReceiverVariable => Instruction::PushReceiverVariable(unsigned(ext_a)?),
                Op::LongPushLiteralVariable => Instruction::PushLiteralVariable(unsigned(ext_a)?),
                Op::LongPushLiteralConstant => Instruction::PushLiteralConstant(unsigned(ext_a)?),
                Op::LongPushTemp => Instruction::PushTemp(unsigned(ext_a)?),
                Op::PushInteger => Instruction::PushInteger(ext_b * 256 + operand),
                Op::PushCharacter => Instruction::PushCharacter(unsigned(ext_a)?),
                Op::LongSend => {
                    let literal = ext_a * 32 + (operand >> 3);
                    let argc = ext_b * 8 + (operand & 7);
                    let invalid = DecodeError::InvalidOperand { offset: start };
                    Instruction::Send {
                        literal: u32::try_from(literal).map_err(|_| invalid)?,
                        argc: u32::try_from(argc).map_err(|_| invalid)?,
                    }
                }
                Op::LongJump => Instruction::Jump(ext_b * 256 + operand),
                Op::LongJumpIfTrue => Instruction::JumpIfTrue(ext_b * 256 + operand),
                Op::LongJumpIfFalse => Instruction::JumpIfFalse(ext_b * 256 + operand),
                Op::LongPopStoreReceiverVariable => {
                    Instruction::PopStoreReceiverVariable(unsigned(ext_a)?)
                }
                Op::LongPopStoreLiteralVariable => {
                    Instruction::PopStoreLiteralVariable(unsigned(ext_a)?)
                }
                Op::LongPopStoreTemp => Instruction::PopStoreTemp(unsigned(ext_a)?),
                Op::LongStoreReceiverVariable => Instruction::StoreReceiverVariable(unsigned(ext_a)?),
                Op::LongStoreLiteralVariable => Instruction::StoreLiteralVariable(unsigned(ext_a)?),
                Op::LongStoreTemp => Instruction::StoreTemp(unsigned(ext_a)?),
            };
            return Ok(instruction);
        }
    }

    fn read_u8(&mut self, start: usize) -> Result<u8, DecodeError> {
        let byte = *self
            .bytes
            .get(self.pos)
            .ok_or(DecodeError::Truncated { offset: start })?;
        self.pos += 1;
        Ok(byte)
    }
}

impl<'a> Iterator for BytecodeDecoder<'a> {
    type Item = Result<(usize, Instruction), DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let item = self.decode_next();
        if matches!(item, Some(Err(_))) {
            self.failed = true;
        }
        item
    }
}

/// One line per instruction: `offset <tab> bytes <tab> instruction`.
pub fn disassemble(bytes: &[u8], base: usize) -> String {
    use fmt::Write;

    let mut out = String::new();
    let mut decoder = BytecodeDecoder::new(bytes);
    while let Some(item) = decoder.decode_next() {
        let end = decoder.offset();
        match item {
            Ok((offset, instruction)) => {
                let raw: Vec<String> = bytes[offset..end].iter().map(|b| format!("{b:02x}")).collect();
                let _ = writeln!(out, "{:>4}  {:<12}  {instruction}", base + offset, raw.join(" "));
            }
            Err(e) => {
                let _ = writeln!(out, "{:>4}  <{e}>", base + end);
                break;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Vec<Instruction> {
        BytecodeDecoder::new(bytes)
            .map(|r| r.map(|(_, i)| i))
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn short_forms() {
        assert_eq!(
            decode_all(&[3, 20, 40, 66, 76, 80, 81, 96, 135, 150, 177, 201, 216, 92]),
            vec![
                Instruction::PushReceiverVariable(3),
                Instruction::PushLiteralVariable(4),
                Instruction::PushLiteralConstant(8),
                Instruction::PushTemp(2),
                Instruction::PushReceiver,
                Instruction::PushInteger(0),
                Instruction::PushInteger(1),
                Instruction::SendSpecial(0),
                Instruction::Send { literal: 7, argc: 0 },
                Instruction::Send { literal: 6, argc: 1 },
                Instruction::Jump(2),
                Instruction::PopStoreReceiverVariable(1),
                Instruction::Pop,
                Instruction::ReturnTop,
            ]
        );
    }

    #[test]
    fn ext_a_accumulates_unsigned() {
        // ExtA 1, ExtA 2, pushConst byte 3 => (1 * 256 + 2) * 256 + 3
        assert_eq!(
            decode_all(&[0xE0, 1, 0xE0, 2, 228, 3]),
            vec![Instruction::PushLiteralConstant(66051)]
        );
    }

    #[test]
    fn ext_b_first_byte_is_sign_extended() {
        assert_eq!(decode_all(&[0xE1, 0xFF, 232, 0xFE]), vec![Instruction::PushInteger(-2)]);
        assert_eq!(decode_all(&[0xE1, 0xFF, 0xE1, 0x00, 237, 0x10]), vec![Instruction::Jump(-65520)]);
        assert_eq!(decode_all(&[0xE1, 0x01, 232, 0x00]), vec![Instruction::PushInteger(256)]);
    }

    #[test]
    fn extensions_reset_after_use() {
        assert_eq!(
            decode_all(&[0xE0, 1, 226, 0, 226, 5]),
            vec![
                Instruction::PushReceiverVariable(256),
                Instruction::PushReceiverVariable(5),
            ]
        );
    }

    #[test]
    fn long_send_splits_operand() {
        // ExtA 1, ExtB 1, send byte (3 << 3 | 2): literal 35, argc 10
        assert_eq!(
            decode_all(&[0xE0, 1, 0xE1, 1, 234, (3 << 3) | 2]),
            vec![Instruction::Send { literal: 35, argc: 10 }]
        );
    }

    #[test]
    fn offsets_point_at_first_prefix() {
        let offsets: Vec<usize> = BytecodeDecoder::new(&[76, 0xE0, 1, 228, 0, 92])
            .map(|r| r.unwrap().0)
            .collect();
        assert_eq!(offsets, vec![0, 1, 5]);
    }

    #[test]
    fn errors() {
        let mut d = BytecodeDecoder::new(&[84]);
        assert_eq!(d.decode_next(), Some(Err(DecodeError::UnknownOpcode { offset: 0, byte: 84 })));

        let mut d = BytecodeDecoder::new(&[0xE0, 1]);
        assert_eq!(d.decode_next(), Some(Err(DecodeError::Truncated { offset: 0 })));

        let mut d = BytecodeDecoder::new(&[0xE0, 1, 0xE0, 1, 0xE0, 1, 0xE0, 1, 228, 0]);
        assert_eq!(d.decode_next(), Some(Err(DecodeError::TooManyExtensions { offset: 0 })));
    }

    #[test]
    fn disassembly_lists_every_instruction() {
        let text = disassemble(&[76, 33, 96, 92], 16);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("  16"));
        assert!(lines[2].ends_with("send: #+"));
        assert!(lines[3].ends_with("returnTop"));
    }
}
