use object::{MemoryError, ObjectFormat, ObjectMemory, Value, WORD_SIZE};

/// The header word of a compiled method, stored as a SmallInteger in
/// word 0 of the method body.
///
/// ```text
/// [0..<16  literal count]
/// [16..<24 temporary count, arguments excluded]
/// [24..<32 argument count]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodHeader {
    pub literal_count: u16,
    pub temp_count: u8,
    pub arg_count: u8,
}

impl MethodHeader {
    const TEMP_SHIFT: i64 = 16;
    const ARG_SHIFT: i64 = 24;

    pub fn pack(self) -> i64 {
        self.literal_count as i64
            | (self.temp_count as i64) << Self::TEMP_SHIFT
            | (self.arg_count as i64) << Self::ARG_SHIFT
    }

    pub fn unpack(word: i64) -> Self {
        Self {
            literal_count: (word & 0xFFFF) as u16,
            temp_count: ((word >> Self::TEMP_SHIFT) & 0xFF) as u8,
            arg_count: ((word >> Self::ARG_SHIFT) & 0xFF) as u8,
        }
    }

    /// Byte offset of the first bytecode within the method body.
    pub fn initial_pc(self) -> usize {
        WORD_SIZE * (1 + self.literal_count as usize)
    }
}

/// Read access to CompiledMethod objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompiledMethod(pub Value);

impl CompiledMethod {
    /// Wrap `value` if it is a CompiledMethod-format object.
    pub fn from_value(memory: &ObjectMemory, value: Value) -> Option<Self> {
        match memory.format(value) {
            Ok((ObjectFormat::CompiledMethod, _)) => Some(Self(value)),
            _ => None,
        }
    }

    pub fn header(self, memory: &ObjectMemory) -> Result<MethodHeader, MemoryError> {
        let word = memory.fetch_pointer(self.0, 0)?;
        word.as_small_integer()
            .map(MethodHeader::unpack)
            .ok_or(MemoryError::CorruptHeader { object: self.0 })
    }

    pub fn literal(self, memory: &ObjectMemory, index: usize) -> Result<Value, MemoryError> {
        let count = self.header(memory)?.literal_count as usize;
        if index >= count {
            return Err(MemoryError::IndexOutOfBounds {
                object: self.0,
                index,
                size: count,
            });
        }
        memory.fetch_pointer(self.0, 1 + index)
    }

    /// The whole method body. Program counters index into this slice.
    pub fn body(self, memory: &ObjectMemory) -> Result<&[u8], MemoryError> {
        memory.bytes(self.0)
    }

    /// Only the bytecodes, starting at [`MethodHeader::initial_pc`].
    pub fn bytecodes(self, memory: &ObjectMemory) -> Result<&[u8], MemoryError> {
        let start = self.header(memory)?.initial_pc();
        let body = memory.bytes(self.0)?;
        body.get(start..)
            .ok_or(MemoryError::CorruptHeader { object: self.0 })
    }
}
