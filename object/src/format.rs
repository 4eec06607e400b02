use crate::value::WORD_SIZE;

/// Object layout format, stored in bits 24..29 of the [`Header`].
///
/// Sub-word indexable formats reserve a range of raw values: the base value
/// plus the number of unused trailing elements in the last slot ("extra
/// bits"), e.g. a 13-byte `Indexable8` object is stored with raw format
/// `16 + 3`.
///
/// [`Header`]: crate::Header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ObjectFormat {
    /// No fields at all.
    Empty = 0,
    /// Fixed pointer fields only.
    FixedSize = 1,
    /// Indexable pointer fields, no fixed fields.
    VariableSize = 2,
    /// Fixed pointer fields followed by indexable pointer fields.
    VariableSizeIvars = 3,
    WeakVariableSize = 4,
    WeakFixedSize = 5,
    Indexable64 = 9,
    Indexable32 = 10,
    Indexable16 = 12,
    Indexable8 = 16,
    /// Byte-indexable body holding a method header, literals and bytecodes.
    CompiledMethod = 24,
}

impl ObjectFormat {
    /// Size in bytes of one indexable element.
    pub const fn element_size(self) -> usize {
        match self {
            Self::Indexable32 => 4,
            Self::Indexable16 => 2,
            Self::Indexable8 | Self::CompiledMethod => 1,
            _ => WORD_SIZE,
        }
    }

    /// Number of indexable elements sharing one slot.
    pub const fn divisor(self) -> usize {
        WORD_SIZE / self.element_size()
    }

    /// Whether slots of this format hold tagged values that must start as nil.
    pub const fn is_pointers(self) -> bool {
        matches!(
            self,
            Self::Empty
                | Self::FixedSize
                | Self::VariableSize
                | Self::VariableSizeIvars
                | Self::WeakVariableSize
                | Self::WeakFixedSize
        )
    }

    pub const fn is_indexable(self) -> bool {
        !matches!(self, Self::Empty | Self::FixedSize | Self::WeakFixedSize)
    }

    pub const fn is_weak(self) -> bool {
        matches!(self, Self::WeakVariableSize | Self::WeakFixedSize)
    }

    pub const fn is_bytes(self) -> bool {
        matches!(self, Self::Indexable8 | Self::CompiledMethod)
    }

    /// Number of slots needed for `element_count` indexable elements and the
    /// number of unused elements left over in the last slot.
    pub fn indexable_layout(self, element_count: usize) -> (usize, u8) {
        let divisor = self.divisor();
        let slots = element_count.div_ceil(divisor);
        let extra = slots * divisor - element_count;
        (slots, extra as u8)
    }

    /// Raw header value of this format carrying `extra` unused elements.
    pub const fn encode(self, extra: u8) -> u8 {
        self as u8 + extra
    }

    /// Split a raw header format into base format and extra element count.
    pub const fn decode(raw: u8) -> Option<(Self, u8)> {
        let decoded = match raw {
            0 => (Self::Empty, 0),
            1 => (Self::FixedSize, 0),
            2 => (Self::VariableSize, 0),
            3 => (Self::VariableSizeIvars, 0),
            4 => (Self::WeakVariableSize, 0),
            5 => (Self::WeakFixedSize, 0),
            9 => (Self::Indexable64, 0),
            10..=11 => (Self::Indexable32, raw - 10),
            12..=15 => (Self::Indexable16, raw - 12),
            16..=23 => (Self::Indexable8, raw - 16),
            24..=31 => (Self::CompiledMethod, raw - 24),
            _ => return None,
        };
        Some(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divisors() {
        assert_eq!(ObjectFormat::Indexable64.divisor(), 1);
        assert_eq!(ObjectFormat::Indexable32.divisor(), 2);
        assert_eq!(ObjectFormat::Indexable16.divisor(), 4);
        assert_eq!(ObjectFormat::Indexable8.divisor(), 8);
        assert_eq!(ObjectFormat::CompiledMethod.divisor(), 8);
        assert_eq!(ObjectFormat::VariableSize.divisor(), 1);
    }

    #[test]
    fn byte_layout_extra_bits() {
        assert_eq!(ObjectFormat::Indexable8.indexable_layout(0), (0, 0));
        assert_eq!(ObjectFormat::Indexable8.indexable_layout(1), (1, 7));
        assert_eq!(ObjectFormat::Indexable8.indexable_layout(8), (1, 0));
        assert_eq!(ObjectFormat::Indexable8.indexable_layout(13), (2, 3));
        assert_eq!(ObjectFormat::Indexable16.indexable_layout(5), (2, 3));
        assert_eq!(ObjectFormat::Indexable32.indexable_layout(3), (2, 1));
        assert_eq!(ObjectFormat::VariableSize.indexable_layout(3), (3, 0));
    }

    #[test]
    fn encode_decode_keeps_extra() {
        for extra in 0..8u8 {
            let raw = ObjectFormat::Indexable8.encode(extra);
            assert_eq!(ObjectFormat::decode(raw), Some((ObjectFormat::Indexable8, extra)));
            let raw = ObjectFormat::CompiledMethod.encode(extra);
            assert_eq!(ObjectFormat::decode(raw), Some((ObjectFormat::CompiledMethod, extra)));
        }
        assert_eq!(ObjectFormat::decode(6), None);
        assert_eq!(ObjectFormat::decode(32), None);
    }

    #[test]
    fn pointer_formats() {
        assert!(ObjectFormat::FixedSize.is_pointers());
        assert!(ObjectFormat::WeakVariableSize.is_pointers());
        assert!(!ObjectFormat::Indexable64.is_pointers());
        assert!(!ObjectFormat::CompiledMethod.is_pointers());
        assert!(ObjectFormat::CompiledMethod.is_bytes());
        assert!(!ObjectFormat::FixedSize.is_indexable());
    }
}
