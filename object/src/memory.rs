use core::fmt;

use log::trace;

use crate::format::ObjectFormat;
use crate::header::{Header, HeaderFlags};
use crate::value::{Value, WORD_SIZE};

/// Sizing of an [`ObjectMemory`].
#[derive(Debug, Clone, Copy)]
pub struct MemorySettings {
    /// Bytes reserved up front.
    pub initial_size: usize,
    /// Hard upper bound on allocated bytes.
    pub limit: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            initial_size: 64 * 1024,
            limit: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    OutOfMemory { requested: usize, limit: usize },
    InvalidLayout {
        format: ObjectFormat,
        fixed: usize,
        indexable: usize,
    },
    ClassIndexOutOfRange { class_index: u32 },
    NotAnObject { value: Value },
    CorruptHeader { object: Value },
    IndexOutOfBounds {
        object: Value,
        index: usize,
        size: usize,
    },
    Immutable { object: Value },
    NotBytes { object: Value },
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory { requested, limit } => {
                write!(f, "out of object memory: {requested} bytes requested, limit is {limit}")
            }
            Self::InvalidLayout {
                format,
                fixed,
                indexable,
            } => write!(
                f,
                "format {format:?} cannot hold {fixed} fixed and {indexable} indexable fields"
            ),
            Self::ClassIndexOutOfRange { class_index } => {
                write!(f, "class index {class_index} does not fit the header")
            }
            Self::NotAnObject { value } => write!(f, "{value:?} is not a heap object"),
            Self::CorruptHeader { object } => write!(f, "{object:?} has a corrupt header"),
            Self::IndexOutOfBounds {
                object,
                index,
                size,
            } => write!(f, "index {index} out of bounds for {object:?} of size {size}"),
            Self::Immutable { object } => write!(f, "{object:?} is immutable"),
            Self::NotBytes { object } => write!(f, "{object:?} is not byte indexable"),
        }
    }
}

impl std::error::Error for MemoryError {}

/// Owned, bounds-checked object arena.
///
/// Objects are addressed by their byte offset inside the arena. The first
/// word is reserved so no object lives at address 0. Objects are never freed.
///
/// ```text
/// [extended header: true slot count]   only when slot count >= 255
/// [header]                             <- object address
/// [slot 0] [slot 1] ...
/// ```
#[derive(Debug)]
pub struct ObjectMemory {
    bytes: Vec<u8>,
    limit: usize,
    nil: Value,
    object_count: usize,
}

impl ObjectMemory {
    pub fn new(settings: MemorySettings) -> Self {
        let mut bytes = Vec::with_capacity(settings.initial_size.max(WORD_SIZE));
        bytes.resize(WORD_SIZE, 0);
        Self {
            bytes,
            limit: settings.limit.max(WORD_SIZE),
            nil: Value::ZERO,
            object_count: 0,
        }
    }

    /// The value written into fresh pointer slots.
    #[inline]
    pub fn nil(&self) -> Value {
        self.nil
    }

    /// Install the nil object. Until this is called pointer slots start as
    /// [`Value::ZERO`].
    pub fn set_nil(&mut self, nil: Value) {
        self.nil = nil;
    }

    pub fn used_bytes(&self) -> usize {
        self.bytes.len()
    }

    pub fn object_count(&self) -> usize {
        self.object_count
    }

    /// Identity hash assigned when the caller does not supply one.
    pub fn address_hash(address: usize) -> u32 {
        ((address / WORD_SIZE) as u32) & Header::MAX_IDENTITY_HASH
    }

    /// Allocate an object of `format` with `fixed_slots` pointer fields and
    /// `indexable_size` indexable elements.
    ///
    /// Pointer slots are initialised to nil, primitive bodies are zero
    /// filled. Returns the new object.
    pub fn allocate(
        &mut self,
        fixed_slots: usize,
        indexable_size: usize,
        format: ObjectFormat,
        class_index: u32,
        identity_hash: Option<u32>,
    ) -> Result<Value, MemoryError> {
        if class_index > Header::MAX_CLASS_INDEX {
            return Err(MemoryError::ClassIndexOutOfRange { class_index });
        }

        let layout_ok = match format {
            ObjectFormat::Empty => fixed_slots == 0 && indexable_size == 0,
            ObjectFormat::FixedSize | ObjectFormat::WeakFixedSize => indexable_size == 0,
            ObjectFormat::VariableSize => fixed_slots == 0,
            ObjectFormat::VariableSizeIvars | ObjectFormat::WeakVariableSize => true,
            _ => fixed_slots == 0,
        };
        if !layout_ok {
            return Err(MemoryError::InvalidLayout {
                format,
                fixed: fixed_slots,
                indexable: indexable_size,
            });
        }

        let (indexable_slots, extra) = format.indexable_layout(indexable_size);
        let slot_count = fixed_slots + indexable_slots;
        let extended = slot_count >= Header::OVERFLOW_SLOTS;
        let header_words = if extended { 2 } else { 1 };

        let start = self.bytes.len();
        let size = (header_words + slot_count)
            .checked_mul(WORD_SIZE)
            .ok_or(MemoryError::OutOfMemory {
                requested: usize::MAX,
                limit: self.limit,
            })?;
        let end = start.checked_add(size).unwrap_or(usize::MAX);
        if end > self.limit {
            return Err(MemoryError::OutOfMemory {
                requested: size,
                limit: self.limit,
            });
        }
        self.bytes.resize(end, 0);

        let address = start + (header_words - 1) * WORD_SIZE;
        if extended {
            self.write_word(start, slot_count as u64);
        }

        let hash = identity_hash.unwrap_or_else(|| Self::address_hash(address))
            & Header::MAX_IDENTITY_HASH;
        let stored_count = slot_count.min(Header::OVERFLOW_SLOTS) as u8;
        let header = Header::encode(
            stored_count,
            format.encode(extra),
            class_index,
            hash,
            HeaderFlags::empty(),
        );
        self.write_word(address, header.raw());

        if format.is_pointers() && self.nil != Value::ZERO {
            let nil = self.nil.raw();
            for i in 0..slot_count {
                self.write_word(address + WORD_SIZE * (i + 1), nil);
            }
        }

        self.object_count += 1;
        trace!(
            "allocate {format:?} class={class_index} slots={slot_count} at 0x{address:x}"
        );
        Ok(Value::from_address(address))
    }

    // ── raw word access ────────────────────────────────────────────

    fn read_word(&self, address: usize) -> u64 {
        let mut word = [0u8; WORD_SIZE];
        word.copy_from_slice(&self.bytes[address..address + WORD_SIZE]);
        u64::from_le_bytes(word)
    }

    fn write_word(&mut self, address: usize, word: u64) {
        self.bytes[address..address + WORD_SIZE].copy_from_slice(&word.to_le_bytes());
    }

    fn address_of(&self, object: Value) -> Result<usize, MemoryError> {
        let address = object
            .as_object()
            .ok_or(MemoryError::NotAnObject { value: object })?;
        if address < WORD_SIZE || address + WORD_SIZE > self.bytes.len() {
            return Err(MemoryError::NotAnObject { value: object });
        }
        Ok(address)
    }

    // ── header ─────────────────────────────────────────────────────

    pub fn header(&self, object: Value) -> Result<Header, MemoryError> {
        let address = self.address_of(object)?;
        Ok(Header::from_raw(self.read_word(address)))
    }

    pub fn format(&self, object: Value) -> Result<(ObjectFormat, u8), MemoryError> {
        let header = self.header(object)?;
        ObjectFormat::decode(header.format()).ok_or(MemoryError::CorruptHeader { object })
    }

    pub fn set_header_flags(&mut self, object: Value, flags: HeaderFlags) -> Result<(), MemoryError> {
        let address = self.address_of(object)?;
        let mut header = Header::from_raw(self.read_word(address));
        header.set_flags(flags);
        self.write_word(address, header.raw());
        Ok(())
    }

    pub fn is_immutable(&self, object: Value) -> Result<bool, MemoryError> {
        Ok(self.header(object)?.is_immutable())
    }

    /// Class index of any value. Immediates answer their fixed index.
    pub fn class_index_of(&self, value: Value) -> Result<u32, MemoryError> {
        if let Some(index) = value.immediate_class_index() {
            return Ok(index);
        }
        Ok(self.header(value)?.class_index())
    }

    /// Identity hash of any value. Immediates hash to their payload bits.
    pub fn identity_hash_of(&self, value: Value) -> Result<u32, MemoryError> {
        if value.is_immediate() {
            return Ok(((value.raw() >> 3) as u32) & Header::MAX_IDENTITY_HASH);
        }
        Ok(self.header(value)?.identity_hash())
    }

    /// True slot count, reading the extended header when present.
    pub fn slot_count(&self, object: Value) -> Result<usize, MemoryError> {
        let address = self.address_of(object)?;
        let header = Header::from_raw(self.read_word(address));
        if header.has_extended_header() {
            if address < 2 * WORD_SIZE {
                return Err(MemoryError::CorruptHeader { object });
            }
            return Ok(self.read_word(address - WORD_SIZE) as usize);
        }
        Ok(header.slot_count() as usize)
    }

    /// Address of slot 0.
    pub fn first_field_address(&self, object: Value) -> Result<usize, MemoryError> {
        Ok(self.address_of(object)? + WORD_SIZE)
    }

    // ── pointer fields ─────────────────────────────────────────────

    pub fn fetch_pointer(&self, object: Value, index: usize) -> Result<Value, MemoryError> {
        let size = self.slot_count(object)?;
        if index >= size {
            return Err(MemoryError::IndexOutOfBounds {
                object,
                index,
                size,
            });
        }
        let address = self.first_field_address(object)? + index * WORD_SIZE;
        Ok(Value::from_raw(self.read_word(address)))
    }

    pub fn store_pointer(
        &mut self,
        object: Value,
        index: usize,
        value: Value,
    ) -> Result<(), MemoryError> {
        if self.is_immutable(object)? {
            return Err(MemoryError::Immutable { object });
        }
        let size = self.slot_count(object)?;
        if index >= size {
            return Err(MemoryError::IndexOutOfBounds {
                object,
                index,
                size,
            });
        }
        let address = self.first_field_address(object)? + index * WORD_SIZE;
        self.write_word(address, value.raw());
        Ok(())
    }

    /// Raw word `index` of any object body, ignoring tags.
    pub fn fetch_word(&self, object: Value, index: usize) -> Result<u64, MemoryError> {
        Ok(self.fetch_pointer(object, index)?.raw())
    }

    pub fn store_word(&mut self, object: Value, index: usize, word: u64) -> Result<(), MemoryError> {
        self.store_pointer(object, index, Value::from_raw(word))
    }

    // ── indexable primitive fields ─────────────────────────────────

    /// Number of indexable elements of a primitive-format object.
    pub fn element_count(&self, object: Value) -> Result<usize, MemoryError> {
        let (format, extra) = self.format(object)?;
        if format.is_pointers() {
            return self.slot_count(object);
        }
        Ok(self.slot_count(object)? * format.divisor() - extra as usize)
    }

    /// Number of meaningful bytes of a byte-format object.
    pub fn byte_size(&self, object: Value) -> Result<usize, MemoryError> {
        let (format, extra) = self.format(object)?;
        if !format.is_bytes() {
            return Err(MemoryError::NotBytes { object });
        }
        Ok(self.slot_count(object)? * WORD_SIZE - extra as usize)
    }

    pub fn bytes(&self, object: Value) -> Result<&[u8], MemoryError> {
        let size = self.byte_size(object)?;
        let start = self.first_field_address(object)?;
        Ok(&self.bytes[start..start + size])
    }

    pub fn bytes_mut(&mut self, object: Value) -> Result<&mut [u8], MemoryError> {
        if self.is_immutable(object)? {
            return Err(MemoryError::Immutable { object });
        }
        let size = self.byte_size(object)?;
        let start = self.first_field_address(object)?;
        Ok(&mut self.bytes[start..start + size])
    }

    pub fn fetch_byte(&self, object: Value, index: usize) -> Result<u8, MemoryError> {
        let bytes = self.bytes(object)?;
        bytes
            .get(index)
            .copied()
            .ok_or(MemoryError::IndexOutOfBounds {
                object,
                index,
                size: bytes.len(),
            })
    }

    pub fn store_byte(&mut self, object: Value, index: usize, byte: u8) -> Result<(), MemoryError> {
        let bytes = self.bytes_mut(object)?;
        let size = bytes.len();
        let slot = bytes.get_mut(index).ok_or(MemoryError::IndexOutOfBounds {
            object,
            index,
            size,
        })?;
        *slot = byte;
        Ok(())
    }

    /// Allocate a byte-format object holding a copy of `contents`.
    pub fn allocate_bytes(
        &mut self,
        contents: &[u8],
        format: ObjectFormat,
        class_index: u32,
    ) -> Result<Value, MemoryError> {
        let object = self.allocate(0, contents.len(), format, class_index, None)?;
        self.bytes_mut(object)?.copy_from_slice(contents);
        Ok(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_CLASS: u32 = 40;

    fn memory() -> ObjectMemory {
        ObjectMemory::new(MemorySettings {
            initial_size: 4096,
            limit: 1024 * 1024,
        })
    }

    #[test]
    fn first_object_is_never_at_address_zero() {
        let mut mem = memory();
        let obj = mem.allocate(0, 0, ObjectFormat::Empty, TEST_CLASS, None).unwrap();
        assert!(obj.as_object().unwrap() >= WORD_SIZE);
        assert_eq!(mem.object_count(), 1);
    }

    #[test]
    fn slot_count_saturates_and_extended_header_holds_true_count() {
        let mut mem = memory();
        for &n in &[0usize, 1, 16, 254, 255, 256, 1000] {
            let obj = mem
                .allocate(0, n, ObjectFormat::VariableSize, TEST_CLASS, None)
                .unwrap();
            let header = mem.header(obj).unwrap();
            assert_eq!(header.slot_count() as usize, n.min(255), "stored count for {n}");
            assert_eq!(header.has_extended_header(), n >= 255);
            assert_eq!(mem.slot_count(obj).unwrap(), n, "true count for {n}");
        }
    }

    #[test]
    fn pointer_slots_start_nil() {
        let mut mem = memory();
        let nil = mem.allocate(0, 0, ObjectFormat::Empty, TEST_CLASS, None).unwrap();
        mem.set_nil(nil);

        let obj = mem
            .allocate(2, 3, ObjectFormat::VariableSizeIvars, TEST_CLASS, None)
            .unwrap();
        for i in 0..5 {
            assert_eq!(mem.fetch_pointer(obj, i).unwrap(), nil);
        }
    }

    #[test]
    fn byte_bodies_are_zero_filled_and_sized_by_extra_bits() {
        let mut mem = memory();
        let nil = mem.allocate(0, 0, ObjectFormat::Empty, TEST_CLASS, None).unwrap();
        mem.set_nil(nil);

        let bytes = mem
            .allocate(0, 13, ObjectFormat::Indexable8, TEST_CLASS, None)
            .unwrap();
        assert_eq!(mem.slot_count(bytes).unwrap(), 2);
        assert_eq!(mem.byte_size(bytes).unwrap(), 13);
        assert!(mem.bytes(bytes).unwrap().iter().all(|&b| b == 0));
        assert_eq!(mem.format(bytes).unwrap(), (ObjectFormat::Indexable8, 3));

        let shorts = mem
            .allocate(0, 5, ObjectFormat::Indexable16, TEST_CLASS, None)
            .unwrap();
        assert_eq!(mem.element_count(shorts).unwrap(), 5);
    }

    #[test]
    fn byte_access_is_bounds_checked() {
        let mut mem = memory();
        let obj = mem
            .allocate_bytes(b"hello", ObjectFormat::Indexable8, TEST_CLASS)
            .unwrap();
        assert_eq!(mem.bytes(obj).unwrap(), b"hello");
        mem.store_byte(obj, 0, b'j').unwrap();
        assert_eq!(mem.fetch_byte(obj, 0).unwrap(), b'j');
        assert!(matches!(
            mem.fetch_byte(obj, 5),
            Err(MemoryError::IndexOutOfBounds { index: 5, size: 5, .. })
        ));
    }

    #[test]
    fn pointer_access_is_bounds_checked() {
        let mut mem = memory();
        let obj = mem.allocate(2, 0, ObjectFormat::FixedSize, TEST_CLASS, None).unwrap();
        mem.store_pointer(obj, 1, Value::from_i64(9)).unwrap();
        assert_eq!(mem.fetch_pointer(obj, 1).unwrap(), Value::from_i64(9));
        assert!(mem.fetch_pointer(obj, 2).is_err());
        assert!(mem.store_pointer(obj, 2, Value::from_i64(1)).is_err());
    }

    #[test]
    fn identity_hash_defaults_to_address_and_honours_explicit_hash() {
        let mut mem = memory();
        let a = mem.allocate(0, 0, ObjectFormat::Empty, TEST_CLASS, None).unwrap();
        let b = mem.allocate(0, 0, ObjectFormat::Empty, TEST_CLASS, Some(77)).unwrap();
        assert_eq!(
            mem.header(a).unwrap().identity_hash(),
            ObjectMemory::address_hash(a.as_object().unwrap())
        );
        assert_eq!(mem.identity_hash_of(b).unwrap(), 77);
        assert_eq!(mem.identity_hash_of(a).unwrap(), mem.identity_hash_of(a).unwrap());
    }

    #[test]
    fn class_index_of_immediates_and_objects() {
        let mut mem = memory();
        let obj = mem.allocate(0, 0, ObjectFormat::Empty, TEST_CLASS, None).unwrap();
        assert_eq!(mem.class_index_of(obj).unwrap(), TEST_CLASS);
        assert_eq!(mem.class_index_of(Value::from_i64(3)).unwrap(), 1);
        assert_eq!(mem.class_index_of(Value::from_char('c')).unwrap(), 2);
    }

    #[test]
    fn invalid_layouts_are_rejected() {
        let mut mem = memory();
        assert!(matches!(
            mem.allocate(1, 0, ObjectFormat::Empty, TEST_CLASS, None),
            Err(MemoryError::InvalidLayout { .. })
        ));
        assert!(matches!(
            mem.allocate(0, 4, ObjectFormat::FixedSize, TEST_CLASS, None),
            Err(MemoryError::InvalidLayout { .. })
        ));
        assert!(matches!(
            mem.allocate(2, 4, ObjectFormat::Indexable8, TEST_CLASS, None),
            Err(MemoryError::InvalidLayout { .. })
        ));
        assert!(matches!(
            mem.allocate(0, 0, ObjectFormat::Empty, Header::MAX_CLASS_INDEX + 1, None),
            Err(MemoryError::ClassIndexOutOfRange { .. })
        ));
    }

    #[test]
    fn limit_is_enforced() {
        let mut mem = ObjectMemory::new(MemorySettings {
            initial_size: 64,
            limit: 256,
        });
        assert!(mem.allocate(0, 8, ObjectFormat::VariableSize, TEST_CLASS, None).is_ok());
        assert!(matches!(
            mem.allocate(0, 64, ObjectFormat::VariableSize, TEST_CLASS, None),
            Err(MemoryError::OutOfMemory { .. })
        ));
    }

    #[test]
    fn immutable_objects_reject_stores() {
        let mut mem = memory();
        let obj = mem.allocate(1, 0, ObjectFormat::FixedSize, TEST_CLASS, None).unwrap();
        mem.set_header_flags(obj, HeaderFlags::IMMUTABLE).unwrap();
        assert!(matches!(
            mem.store_pointer(obj, 0, Value::from_i64(1)),
            Err(MemoryError::Immutable { .. })
        ));
    }

    #[test]
    fn foreign_values_are_not_objects() {
        let mem = memory();
        assert!(mem.header(Value::from_i64(4)).is_err());
        assert!(mem.header(Value::from_address(1 << 20)).is_err());
    }
}
