mod value;
mod header;
mod format;
mod memory;

pub use value::{
    CHARACTER_CLASS_INDEX, Decoded, SMALL_FLOAT_CLASS_INDEX, SMALL_INTEGER_CLASS_INDEX,
    SMALL_INTEGER_MAX, SMALL_INTEGER_MIN, TAG_BITS, Value, ValueKind, WORD_SIZE,
};
pub use header::{Header, HeaderFlags};
pub use format::ObjectFormat;
pub use memory::{MemoryError, MemorySettings, ObjectMemory};

#[cfg(test)]
mod tests {
    use super::*;

    // ── Header ─────────────────────────────────────────────────────

    #[test]
    fn header_fields_are_independent() {
        let h = Header::encode(7, ObjectFormat::Indexable8.encode(3), 1234, 0x2A_BCDE, HeaderFlags::PINNED);
        assert_eq!(h.slot_count(), 7);
        assert_eq!(ObjectFormat::decode(h.format()), Some((ObjectFormat::Indexable8, 3)));
        assert_eq!(h.class_index(), 1234);
        assert_eq!(h.identity_hash(), 0x2A_BCDE);
        assert!(h.is_pinned());
        assert!(!h.is_immutable());
        assert_eq!(h.gc_color(), 0);
    }

    #[test]
    fn header_setters_leave_other_fields() {
        let mut h = Header::encode(3, ObjectFormat::FixedSize as u8, 50, 99, HeaderFlags::empty());
        h.set_flags(HeaderFlags::IMMUTABLE).set_gc_color(5).set_class_index(51);
        assert!(h.is_immutable());
        assert_eq!(h.gc_color(), 5);
        assert_eq!(h.class_index(), 51);
        assert_eq!(h.slot_count(), 3);
        assert_eq!(h.identity_hash(), 99);
    }

    #[test]
    fn header_saturated_slot_count() {
        let h = Header::encode(255, ObjectFormat::VariableSize as u8, 9, 0, HeaderFlags::empty());
        assert!(h.has_extended_header());
        let h = Header::encode(254, ObjectFormat::VariableSize as u8, 9, 0, HeaderFlags::empty());
        assert!(!h.has_extended_header());
    }

    // ── Memory + values ────────────────────────────────────────────

    #[test]
    fn objects_store_immediates_and_references() {
        let mut mem = ObjectMemory::new(MemorySettings::default());
        let nil = mem.allocate(0, 0, ObjectFormat::Empty, 30, None).unwrap();
        mem.set_nil(nil);

        let array = mem.allocate(0, 4, ObjectFormat::VariableSize, 31, None).unwrap();
        let point = mem.allocate(2, 0, ObjectFormat::FixedSize, 32, None).unwrap();

        mem.store_pointer(array, 0, Value::from_i64(-5)).unwrap();
        mem.store_pointer(array, 1, Value::from_char('q')).unwrap();
        mem.store_pointer(array, 2, point).unwrap();

        assert_eq!(mem.fetch_pointer(array, 0).unwrap().as_small_integer(), Some(-5));
        assert_eq!(mem.fetch_pointer(array, 1).unwrap().as_char(), Some('q'));
        assert_eq!(mem.fetch_pointer(array, 2).unwrap(), point);
        assert_eq!(mem.fetch_pointer(array, 3).unwrap(), nil);
        assert_eq!(mem.class_index_of(mem.fetch_pointer(array, 2).unwrap()).unwrap(), 32);
    }
}
