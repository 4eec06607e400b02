mod op;
mod instruction;
mod decoder;
mod assembler;
mod method;
mod error;

pub use op::{
    DECODE_TABLE, MAX_EXTENSION_BYTES, OPCODE_RANGES, Op, Opcode, OpcodeRange,
    SPECIAL_SELECTORS, decode_opcode, encode_opcode, short_range, special,
};
pub use instruction::Instruction;
pub use decoder::{BytecodeDecoder, DecodeError, disassemble};
pub use assembler::{Assembler, JumpKind, Label, Layout, Node};
pub use method::{CompiledMethod, MethodHeader};
pub use error::AssemblerError;

#[cfg(test)]
mod tests {
    use super::*;
    use object::{MemorySettings, ObjectMemory, Value};

    const METHOD_CLASS: u32 = 20;

    #[test]
    fn generated_method_layout() {
        let mut memory = ObjectMemory::new(MemorySettings::default());
        let mut asm = Assembler::new();
        asm.push_temp(0);
        asm.push_literal(Value::from_i64(1 << 40)).unwrap();
        asm.send_special(special::ADD);
        asm.return_top();

        let method = asm.generate(&mut memory, METHOD_CLASS, 1, 2).unwrap();
        let method = CompiledMethod::from_value(&memory, method).unwrap();

        let header = method.header(&memory).unwrap();
        assert_eq!(
            header,
            MethodHeader {
                literal_count: 1,
                temp_count: 2,
                arg_count: 1
            }
        );
        assert_eq!(method.literal(&memory, 0).unwrap(), Value::from_i64(1 << 40));
        assert!(method.literal(&memory, 1).is_err());
        assert_eq!(memory.class_index_of(method.0).unwrap(), METHOD_CLASS);

        let code = method.bytecodes(&memory).unwrap();
        assert_eq!(code, &[64, 32, 96, 92]);
        assert_eq!(method.body(&memory).unwrap().len(), header.initial_pc() + 4);
    }

    #[test]
    fn disassembly_of_generated_method() {
        let mut memory = ObjectMemory::new(MemorySettings::default());
        let mut asm = Assembler::new();
        let skip = asm.new_label();
        asm.push_receiver();
        asm.push_integer(7).unwrap();
        asm.send_special(special::LESS);
        asm.jump_if_false(skip);
        asm.return_true();
        asm.bind(skip).unwrap();
        asm.return_false();

        let method = asm.generate(&mut memory, METHOD_CLASS, 0, 0).unwrap();
        let method = CompiledMethod::from_value(&memory, method).unwrap();
        let code = method.bytecodes(&memory).unwrap();

        let listing: Vec<String> = BytecodeDecoder::new(code)
            .map(|r| r.unwrap().1.to_string())
            .collect();
        assert_eq!(
            listing,
            vec!["self", "pushConst: 7", "send: #<", "jumpFalse: +1", "return: true", "return: false"]
        );
    }

    #[test]
    fn non_methods_are_refused() {
        let mut memory = ObjectMemory::new(MemorySettings::default());
        let bytes = memory
            .allocate_bytes(b"abc", object::ObjectFormat::Indexable8, 9)
            .unwrap();
        assert!(CompiledMethod::from_value(&memory, bytes).is_none());
        assert!(CompiledMethod::from_value(&memory, Value::from_i64(3)).is_none());
    }
}
